//! Time-decayed hashtag scoring.
//!
//! The score of a hashtag is the sum of `exp(-age_hours / decay_hours)` over
//! its posts published inside the window. The store recomputes it for every
//! hashtag in one server-side function; [`trending_score`] is the same formula
//! in process, used by the in-memory store and to check results.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::store::{Store, StoreError, rpc};

/// Weight of a single post that is `age_hours` old.
pub fn decay_weight(age_hours: f64, decay_hours: f64) -> f64 {
    (-age_hours / decay_hours).exp()
}

pub fn trending_score(
    published: &[DateTime<Utc>],
    now: DateTime<Utc>,
    decay_hours: f64,
    window_days: i64,
) -> f64 {
    let window_start = now - Duration::days(window_days);
    published
        .iter()
        .filter(|at| **at >= window_start)
        .map(|at| {
            // Clock skew can put a post slightly in the future.
            let age_hours = ((now - *at).num_milliseconds() as f64 / 3_600_000.0).max(0.0);
            decay_weight(age_hours, decay_hours)
        })
        .sum()
}

/// Triggers the store-side recomputation of every hashtag's score.
#[derive(Clone)]
pub struct TrendingScorer {
    store: Arc<dyn Store>,
    decay_hours: f64,
    window_days: i64,
}

impl TrendingScorer {
    pub fn new(store: Arc<dyn Store>, decay_hours: f64, window_days: i64) -> Self {
        Self {
            store,
            decay_hours,
            window_days,
        }
    }

    /// Returns the number of hashtags rescored, when the store reports it.
    pub async fn recompute(&self, cancel: &CancellationToken) -> Result<Option<u64>, StoreError> {
        let args = json!({
            "decay_hours": self.decay_hours,
            "window_days": self.window_days,
        });
        let result = self.store.rpc(rpc::CALCULATE_TRENDING, args, cancel).await?;
        Ok(result.as_u64())
    }
}
