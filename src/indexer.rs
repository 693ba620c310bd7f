//! Hashtag and mention indexing for post content.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::store::{
    Condition, Filter, Op, Operand, Query, Store, StoreError, decode_first, decode_rows, tables,
};

static HASHTAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#([A-Za-z0-9_]{1,50})").expect("valid hashtag regex"));
static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z0-9_]{1,30})").expect("valid mention regex"));

/// Lowercased, de-duplicated tokens in order of first appearance.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Tokens {
    pub hashtags: Vec<String>,
    pub mentions: Vec<String>,
}

impl Tokens {
    pub fn is_empty(&self) -> bool {
        self.hashtags.is_empty() && self.mentions.is_empty()
    }
}

fn capture_all(re: &Regex, content: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in re.captures_iter(content) {
        let token = caps[1].to_lowercase();
        if !out.contains(&token) {
            out.push(token);
        }
    }
    out
}

pub fn tokenize(content: &str) -> Tokens {
    Tokens {
        hashtags: capture_all(&HASHTAG_RE, content),
        mentions: capture_all(&MENTION_RE, content),
    }
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: Uuid,
}

#[derive(Debug, Deserialize)]
struct UserRow {
    id: Uuid,
    username: String,
}

/// What one indexing pass wrote.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub hashtags_linked: usize,
    pub mentions_linked: usize,
}

/// Writes hashtag and mention links for a post. Every failure below the
/// post itself is logged and skipped; only cancellation stops the pass.
#[derive(Clone)]
pub struct HashtagIndexer {
    store: Arc<dyn Store>,
}

impl HashtagIndexer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn index(
        &self,
        post_id: Uuid,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<IndexReport, StoreError> {
        let tokens = tokenize(content);
        let mut report = IndexReport::default();
        if tokens.is_empty() {
            return Ok(report);
        }

        for tag in &tokens.hashtags {
            let hashtag_id = match self.resolve_hashtag(tag, cancel).await {
                Ok(id) => id,
                Err(StoreError::Cancelled) => return Err(StoreError::Cancelled),
                Err(e) => {
                    tracing::warn!(%post_id, tag = %tag, "Failed to resolve hashtag: {}", e);
                    continue;
                }
            };
            let link = json!({ "post_id": post_id, "hashtag_id": hashtag_id });
            match self.link(tables::POST_HASHTAGS, link, cancel).await {
                Ok(()) => report.hashtags_linked += 1,
                Err(StoreError::Cancelled) => return Err(StoreError::Cancelled),
                Err(e) => tracing::warn!(%post_id, tag = %tag, "Failed to link hashtag: {}", e),
            }
        }

        if tokens.mentions.is_empty() {
            return Ok(report);
        }

        let users = match self.resolve_usernames(&tokens.mentions, cancel).await {
            Ok(users) => users,
            Err(StoreError::Cancelled) => return Err(StoreError::Cancelled),
            Err(e) => {
                tracing::warn!(%post_id, "Failed to resolve mentions: {}", e);
                return Ok(report);
            }
        };

        for username in &tokens.mentions {
            // Unknown usernames are not mentions.
            let Some(user_id) = users.get(username) else {
                continue;
            };
            let link = json!({ "post_id": post_id, "mentioned_user_id": user_id });
            match self.link(tables::POST_MENTIONS, link, cancel).await {
                Ok(()) => report.mentions_linked += 1,
                Err(StoreError::Cancelled) => return Err(StoreError::Cancelled),
                Err(e) => tracing::warn!(%post_id, username = %username, "Failed to link mention: {}", e),
            }
        }

        Ok(report)
    }

    /// Drops the post's existing links and indexes `content` again.
    pub async fn reindex(
        &self,
        post_id: Uuid,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<IndexReport, StoreError> {
        let by_post = Filter::new().eq("post_id", post_id);
        for table in [tables::POST_HASHTAGS, tables::POST_MENTIONS] {
            match self.store.delete(table, &by_post, cancel).await {
                Ok(_) => {}
                Err(StoreError::Cancelled) => return Err(StoreError::Cancelled),
                Err(e) => tracing::warn!(%post_id, table, "Failed to clear links: {}", e),
            }
        }
        self.index(post_id, content, cancel).await
    }

    async fn find_hashtag(
        &self,
        tag: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Uuid>, StoreError> {
        let query = Query::new(Filter::new().eq("tag", tag)).select("id").limit(1);
        let rows = self.store.select(tables::HASHTAGS, &query, cancel).await?;
        Ok(decode_first::<IdRow>(rows)?.map(|row| row.id))
    }

    async fn resolve_hashtag(&self, tag: &str, cancel: &CancellationToken) -> Result<Uuid, StoreError> {
        if let Some(id) = self.find_hashtag(tag, cancel).await? {
            return Ok(id);
        }

        let row = json!({ "tag": tag, "posts_count": 0, "followers_count": 0, "trending_score": 0.0 });
        match self.store.insert(tables::HASHTAGS, row, true, cancel).await {
            Ok(rows) => decode_first::<IdRow>(rows)?
                .map(|row| row.id)
                .ok_or_else(|| StoreError::Decode("hashtag insert returned no row".to_string())),
            // Another writer created it between our lookup and insert.
            Err(e) if e.is_duplicate() => self
                .find_hashtag(tag, cancel)
                .await?
                .ok_or_else(|| StoreError::Decode(format!("hashtag '{}' vanished", tag))),
            Err(e) => Err(e),
        }
    }

    async fn resolve_usernames(
        &self,
        usernames: &[String],
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, Uuid>, StoreError> {
        // Usernames keep their case; `_` is a wildcard under ilike.
        let any_of = usernames
            .iter()
            .map(|u| Condition::field("username", Op::ILike, Operand::Text(u.clone())))
            .collect();
        let query = Query::new(Filter::new().or(any_of)).select("id,username");
        let rows = self.store.select(tables::USERS, &query, cancel).await?;
        Ok(decode_rows::<UserRow>(rows)?
            .into_iter()
            .map(|u| (u.username.to_lowercase(), u.id))
            .filter(|(name, _)| usernames.contains(name))
            .collect())
    }

    async fn link(
        &self,
        table: &str,
        row: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        match self.store.insert(table, row, false, cancel).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_duplicate() => Ok(()),
            Err(e) => Err(e),
        }
    }
}
