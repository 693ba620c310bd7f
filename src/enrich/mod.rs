//! Per-variant extension loaders, keyed by [`PostVariant`].
//!
//! Variants without an extension row (text, image, video) have no enricher.

pub mod article;
pub mod poll;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::post::{CreatePostRequest, Extension, Post, PostVariant},
    store::{Store, StoreError},
};

pub use article::ArticleEnricher;
pub use poll::PollEnricher;

#[async_trait]
pub trait Enricher: Send + Sync {
    fn variant(&self) -> PostVariant;

    /// Loads the extension of a single post, with the extras that are too
    /// costly for listings.
    async fn load_one(
        &self,
        post: &Post,
        viewer: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<Option<Extension>, StoreError>;

    /// Loads extensions for a page of posts in one round of queries. Posts
    /// missing from the result have no extension row.
    async fn load_batch(
        &self,
        post_ids: &[Uuid],
        viewer: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<HashMap<Uuid, Extension>, StoreError>;

    /// Writes the extension row for a freshly inserted base post.
    async fn create(
        &self,
        post: &Post,
        request: &CreatePostRequest,
        cancel: &CancellationToken,
    ) -> Result<Extension, AppError>;
}

#[derive(Clone, Default)]
pub struct EnricherRegistry {
    enrichers: HashMap<PostVariant, Arc<dyn Enricher>>,
}

impl EnricherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Article and poll enrichers over `store`.
    pub fn standard(store: Arc<dyn Store>, polls: Arc<PollEnricher>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ArticleEnricher::new(store)));
        registry.register(polls);
        registry
    }

    pub fn register(&mut self, enricher: Arc<dyn Enricher>) {
        self.enrichers.insert(enricher.variant(), enricher);
    }

    pub fn get(&self, variant: PostVariant) -> Option<Arc<dyn Enricher>> {
        self.enrichers.get(&variant).cloned()
    }
}
