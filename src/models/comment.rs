use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    models::post::Author,
    utils::time::{flexible, flexible_option},
};

/// Content shown in place of a soft-deleted comment. The node stays so its
/// replies keep their parent.
pub const DELETED_SENTINEL: &str = "[deleted]";

/// Represents the 'comments' table; `replies` is filled when listing a tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub parent_comment_id: Option<Uuid>,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(with = "flexible")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "flexible_option")]
    pub deleted_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub is_liked: bool,
    #[serde(default)]
    pub replies: Vec<Comment>,
}

/// DTO for creating a new comment.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateCommentRequest {
    #[validate(length(
        min = 1,
        max = 1000,
        message = "Comment must be between 1 and 1000 characters"
    ))]
    pub content: String,

    /// Optional: the ID of the comment being replied to.
    pub parent_comment_id: Option<Uuid>,
}
