use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::time::flexible;

/// Represents the 'hashtags' table. Tags are stored lowercase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hashtag {
    pub id: Uuid,
    pub tag: String,
    #[serde(default)]
    pub posts_count: i64,
    #[serde(default)]
    pub followers_count: i64,
    /// Recomputed daily by the store-side trending function.
    #[serde(default)]
    pub trending_score: f64,
    #[serde(with = "flexible")]
    pub created_at: DateTime<Utc>,
}

/// Query parameters for the trending list.
#[derive(Debug, Deserialize)]
pub struct TrendingParams {
    /// Number of hashtags to return (default: 10, max: 50).
    pub limit: Option<usize>,
}
