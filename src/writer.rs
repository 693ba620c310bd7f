//! The uniform write path for every post variant.
//!
//! Base row first, then the variant's extension row, then hashtag and mention
//! links. Readers may briefly see a post before its links exist.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    enrich::EnricherRegistry,
    error::AppError,
    indexer::HashtagIndexer,
    models::post::{CreatePostRequest, Post, UpdatePostRequest},
    repository::PostRepository,
    store::{Filter, Store, tables},
    utils::time::format_timestamp,
};

#[derive(Clone)]
pub struct PostWriter {
    store: Arc<dyn Store>,
    posts: PostRepository,
    enrichers: EnricherRegistry,
    indexer: HashtagIndexer,
    max_content_length: usize,
}

impl PostWriter {
    pub fn new(
        store: Arc<dyn Store>,
        posts: PostRepository,
        enrichers: EnricherRegistry,
        indexer: HashtagIndexer,
        max_content_length: usize,
    ) -> Self {
        Self {
            store,
            posts,
            enrichers,
            indexer,
            max_content_length,
        }
    }

    pub async fn create(
        &self,
        author_id: Uuid,
        request: &CreatePostRequest,
        cancel: &CancellationToken,
    ) -> Result<Post, AppError> {
        request.check(self.max_content_length)?;

        let mut post = self.posts.create(author_id, request, cancel).await?;

        if let Some(enricher) = self.enrichers.get(post.variant) {
            match enricher.create(&post, request, cancel).await {
                Ok(extension) => post.attach(extension),
                Err(e) => {
                    self.discard(post.id).await;
                    return Err(e);
                }
            }
        }

        match self.indexer.index(post.id, &post.content, cancel).await {
            Ok(report) => tracing::debug!(
                post_id = %post.id,
                hashtags = report.hashtags_linked,
                mentions = report.mentions_linked,
                "Post indexed"
            ),
            Err(e) => tracing::warn!(post_id = %post.id, "Indexing stopped early: {}", e),
        }

        tracing::info!(post_id = %post.id, variant = post.variant.as_str(), "Post created");
        Ok(post)
    }

    pub async fn update(
        &self,
        post_id: Uuid,
        actor_id: Uuid,
        request: &UpdatePostRequest,
        cancel: &CancellationToken,
    ) -> Result<Post, AppError> {
        let updated = self
            .posts
            .update(post_id, actor_id, request, self.max_content_length, cancel)
            .await?;

        if updated.content_changed {
            if let Err(e) = self
                .indexer
                .reindex(post_id, &updated.post.content, cancel)
                .await
            {
                tracing::warn!(%post_id, "Reindexing stopped early: {}", e);
            }
        }
        Ok(updated.post)
    }

    /// Hides a base row whose extension could not be written. Runs on its
    /// own token so a cancelled request still cleans up.
    async fn discard(&self, post_id: Uuid) {
        let cancel = CancellationToken::new();
        let updates = json!({ "deleted_at": format_timestamp(&Utc::now()) });
        if let Err(e) = self
            .store
            .patch(tables::POSTS, &Filter::new().eq("id", post_id), updates, &cancel)
            .await
        {
            tracing::error!(%post_id, "Failed to discard post without extension: {}", e);
        }
    }
}
