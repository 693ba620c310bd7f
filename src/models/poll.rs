use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::utils::time::flexible_option;

/// Represents the 'polls' extension row, with its options and the
/// viewer-relative selection attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub id: Uuid,
    pub post_id: Uuid,
    pub question: String,
    #[serde(default, with = "flexible_option")]
    pub closes_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub multi_select: bool,

    #[serde(default)]
    pub options: Vec<PollOption>,
    #[serde(default)]
    pub total_votes: i64,
    /// Option positions the current viewer voted for. Computed, never stored.
    #[serde(default)]
    pub selected_options: Vec<usize>,
}

impl Poll {
    pub fn is_closed(&self, now: DateTime<Utc>) -> bool {
        self.closes_at.is_some_and(|at| at <= now)
    }
}

/// Represents the 'poll_options' table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOption {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub position: usize,
    pub text: String,
    #[serde(default)]
    pub votes_count: i64,
}

/// DTO for the poll part of a create-post payload.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePollRequest {
    #[validate(length(min = 1, max = 300, message = "Question must be between 1 and 300 chars"))]
    pub question: String,
    #[validate(
        length(min = 2, max = 10, message = "Polls need between 2 and 10 options"),
        custom(function = validate_options)
    )]
    pub options: Vec<String>,
    #[serde(default, with = "flexible_option")]
    pub closes_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub multi_select: bool,
}

fn validate_options(options: &[String]) -> Result<(), validator::ValidationError> {
    for opt in options {
        if opt.trim().is_empty() {
            return Err(validator::ValidationError::new("option_cannot_be_empty"));
        }
        if opt.chars().count() > 100 {
            return Err(validator::ValidationError::new("option_too_long"));
        }
    }
    Ok(())
}

/// DTO for casting a vote.
#[derive(Debug, Deserialize, Validate)]
pub struct VoteRequest {
    #[validate(length(min = 1, message = "Select at least one option"))]
    pub option_indices: Vec<usize>,
}
