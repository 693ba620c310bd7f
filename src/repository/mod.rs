// src/repository/mod.rs

pub mod comment;
pub mod hashtag;
pub mod post;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::store::{Store, rpc};

pub use comment::CommentRepository;
pub use hashtag::HashtagRepository;
pub use post::PostRepository;

/// Denormalized counter columns on `posts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Likes,
    Comments,
    Shares,
    Views,
    Saves,
}

impl Counter {
    pub fn column(&self) -> &'static str {
        match self {
            Counter::Likes => "likes_count",
            Counter::Comments => "comments_count",
            Counter::Shares => "shares_count",
            Counter::Views => "views_count",
            Counter::Saves => "saves_count",
        }
    }
}

/// Atomic server-side increment. Display-only data, so failures are logged
/// and dropped.
pub async fn bump_counter(
    store: &dyn Store,
    post_id: Uuid,
    counter: Counter,
    amount: i64,
    cancel: &CancellationToken,
) {
    let args = json!({
        "post_id": post_id,
        "counter": counter.column(),
        "amount": amount,
    });
    if let Err(e) = store.rpc(rpc::INCREMENT_POST_COUNTER, args, cancel).await {
        tracing::warn!(%post_id, counter = counter.column(), "Failed to adjust counter: {}", e);
    }
}
