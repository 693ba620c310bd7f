use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    models::hashtag::Hashtag,
    store::{Filter, Order, Query, Store, StoreError, decode_first, decode_rows, tables},
};

pub const DEFAULT_TRENDING_LIMIT: usize = 10;
pub const MAX_TRENDING_LIMIT: usize = 50;

#[derive(Clone)]
pub struct HashtagRepository {
    store: Arc<dyn Store>,
}

impl HashtagRepository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Highest scores first; ties go to the more used tag.
    pub async fn trending(&self, limit: usize, cancel: &CancellationToken) -> Result<Vec<Hashtag>, StoreError> {
        let query = Query::new(Filter::new())
            .order(Order::desc("trending_score"))
            .order(Order::desc("posts_count"))
            .limit(limit);
        decode_rows(self.store.select(tables::HASHTAGS, &query, cancel).await?)
    }

    /// Lookup by tag, case-insensitively. A leading `#` is ignored.
    pub async fn find_by_tag(&self, tag: &str, cancel: &CancellationToken) -> Result<Option<Hashtag>, StoreError> {
        let tag = normalize_tag(tag);
        let query = Query::new(Filter::new().eq("tag", tag)).limit(1);
        decode_first(self.store.select(tables::HASHTAGS, &query, cancel).await?)
    }

    /// Most recent post ids linked to `hashtag_id`, at most `limit`.
    pub async fn post_ids(
        &self,
        hashtag_id: Uuid,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Uuid>, StoreError> {
        #[derive(serde::Deserialize)]
        struct Link {
            post_id: Uuid,
        }

        let query = Query::new(Filter::new().eq("hashtag_id", hashtag_id))
            .select("post_id")
            .order(Order::desc("created_at"))
            .limit(limit);
        let rows = self.store.select(tables::POST_HASHTAGS, &query, cancel).await?;
        Ok(decode_rows::<Link>(rows)?.into_iter().map(|l| l.post_id).collect())
    }
}

pub fn normalize_tag(tag: &str) -> String {
    tag.trim().trim_start_matches('#').to_lowercase()
}
