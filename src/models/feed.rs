use serde::{Deserialize, Serialize};

use crate::models::post::Post;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// Query parameters for paginated feeds.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    /// Number of items to return (default: 20, max: 100).
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl PageParams {
    pub fn resolve(&self) -> (usize, usize) {
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
        (limit, self.offset.unwrap_or(0))
    }
}

/// An ordered, bounded slice of posts with viewer-relative fields.
#[derive(Debug, Clone, Serialize)]
pub struct FeedPage {
    pub posts: Vec<Post>,
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
}

impl FeedPage {
    pub fn empty(limit: usize, offset: usize) -> Self {
        Self {
            posts: Vec::new(),
            total: 0,
            limit,
            offset,
        }
    }

    pub fn has_more(&self) -> bool {
        (self.offset + self.posts.len()) < self.total as usize
    }
}
