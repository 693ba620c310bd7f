//! Bounded interface onto the remote relational store.
//!
//! Everything above this module talks to rows as JSON values and decodes them
//! into typed models with serde. [`postgrest::PostgrestStore`] speaks to the
//! managed PostgREST endpoint; [`memory::MemoryStore`] keeps tables in process.

pub mod filter;
pub mod memory;
pub mod postgrest;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use filter::{Condition, Direction, Filter, Op, Operand, Order};

pub type Row = serde_json::Value;

/// Table names shared by the repositories and the schema in `migrations/`.
pub mod tables {
    pub const USERS: &str = "users";
    pub const FOLLOWS: &str = "follows";
    pub const POSTS: &str = "posts";
    pub const ARTICLES: &str = "articles";
    pub const ARTICLE_TAGS: &str = "article_tags";
    pub const POLLS: &str = "polls";
    pub const POLL_OPTIONS: &str = "poll_options";
    pub const POLL_VOTES: &str = "poll_votes";
    pub const POST_LIKES: &str = "post_likes";
    pub const SAVED_POSTS: &str = "saved_posts";
    pub const POST_SHARES: &str = "post_shares";
    pub const HASHTAGS: &str = "hashtags";
    pub const POST_HASHTAGS: &str = "post_hashtags";
    pub const POST_MENTIONS: &str = "post_mentions";
    pub const COMMENTS: &str = "comments";
    pub const COMMENT_LIKES: &str = "comment_likes";
    pub const NOTIFICATIONS: &str = "notifications";
}

/// Server-side functions invoked through `/rpc/{name}`.
pub mod rpc {
    pub const INCREMENT_POST_COUNTER: &str = "increment_post_counter";
    pub const INCREMENT_POLL_VOTES: &str = "increment_poll_option_votes";
    pub const CALCULATE_TRENDING: &str = "calculate_hashtag_trending_scores";
    pub const QUEUE_EMAIL_DIGESTS: &str = "queue_email_digests";
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store rejected request ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("could not decode store response: {0}")]
    Decode(String),

    #[error("store request cancelled")]
    Cancelled,
}

impl StoreError {
    /// True when the store refused a write because of a unique constraint.
    pub fn is_duplicate(&self) -> bool {
        match self {
            StoreError::Api { code, message, .. } => {
                if code.as_deref() == Some("23505") {
                    return true;
                }
                let message = message.to_lowercase();
                message.contains("duplicate") || message.contains("unique")
            }
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StoreError::Cancelled)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}

/// A read against one table.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filter: Filter,
    pub order: Vec<Order>,
    pub select: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Query {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn select(mut self, projection: &str) -> Self {
        self.select = Some(projection.to_string());
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order.push(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }
}

/// The five row operations plus `count`, each abortable through `cancel`.
#[async_trait]
pub trait Store: Send + Sync {
    async fn select(
        &self,
        table: &str,
        query: &Query,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, StoreError>;

    /// `select=count` over the same filter grammar.
    async fn count(
        &self,
        table: &str,
        filter: &Filter,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError>;

    /// Inserts one row (or an array of rows). Rows come back only when
    /// `return_representation` is set.
    async fn insert(
        &self,
        table: &str,
        row: Row,
        return_representation: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, StoreError>;

    async fn patch(
        &self,
        table: &str,
        filter: &Filter,
        updates: Row,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, StoreError>;

    /// Returns the deleted rows.
    async fn delete(
        &self,
        table: &str,
        filter: &Filter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, StoreError>;

    async fn rpc(
        &self,
        name: &str,
        args: Row,
        cancel: &CancellationToken,
    ) -> Result<Row, StoreError>;
}

pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, StoreError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(StoreError::from))
        .collect()
}

pub fn decode_first<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Option<T>, StoreError> {
    match rows.into_iter().next() {
        Some(row) => Ok(Some(serde_json::from_value(row)?)),
        None => Ok(None),
    }
}
