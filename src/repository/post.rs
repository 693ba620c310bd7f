use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, json};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{Counter, bump_counter};
use crate::{
    enrich::EnricherRegistry,
    error::AppError,
    models::post::{CreatePostRequest, Post, UpdatePostRequest, Visibility, check_media},
    store::{Filter, Order, Query, Row, Store, StoreError, decode_first, decode_rows, tables},
    utils::time::format_timestamp,
};

/// Base columns plus the embedded author projection.
pub const POST_WITH_AUTHOR: &str =
    "*,author:users!author_id(id,username,display_name,profile_picture,is_verified)";

#[derive(Debug, Deserialize)]
struct PostIdRow {
    post_id: Uuid,
}

/// Result of [`PostRepository::update`].
#[derive(Debug)]
pub struct PostUpdate {
    pub post: Post,
    pub content_changed: bool,
}

#[derive(Clone)]
pub struct PostRepository {
    store: Arc<dyn Store>,
    enrichers: EnricherRegistry,
}

impl PostRepository {
    pub fn new(store: Arc<dyn Store>, enrichers: EnricherRegistry) -> Self {
        Self { store, enrichers }
    }

    /// Inserts the base row. Counters start at zero and `published_at` is
    /// stamped for published posts that did not bring their own.
    pub async fn create(
        &self,
        author_id: Uuid,
        request: &CreatePostRequest,
        cancel: &CancellationToken,
    ) -> Result<Post, AppError> {
        let now = Utc::now();
        let published_at = match (request.published_at, request.is_published) {
            (Some(at), _) => Some(at),
            (None, true) => Some(now),
            (None, false) => None,
        };

        let row = json!({
            "id": request.id.unwrap_or_else(Uuid::new_v4),
            "author_id": author_id,
            "variant": request.variant,
            "content": request.content,
            "media_urls": request.media_urls,
            "media_types": request.media_types,
            "visibility": request.visibility,
            "allows_comments": request.allows_comments,
            "allows_sharing": request.allows_sharing,
            "is_published": request.is_published,
            "is_draft": request.is_draft,
            "is_nsfw": request.is_nsfw,
            "is_pinned": false,
            "is_featured": false,
            "likes_count": 0,
            "comments_count": 0,
            "shares_count": 0,
            "views_count": 0,
            "saves_count": 0,
            "created_at": format_timestamp(&now),
            "updated_at": format_timestamp(&now),
            "published_at": published_at.as_ref().map(format_timestamp),
            "deleted_at": null,
        });

        let rows = self.store.insert(tables::POSTS, row, true, cancel).await?;
        decode_first::<Post>(rows)?
            .ok_or_else(|| AppError::Internal("post insert returned no row".to_string()))
    }

    /// Live (not deleted) post with its author, no viewer fields.
    pub async fn find(&self, post_id: Uuid, cancel: &CancellationToken) -> Result<Option<Post>, StoreError> {
        let query = Query::new(Filter::new().eq("id", post_id).is_null("deleted_at"))
            .select(POST_WITH_AUTHOR)
            .limit(1);
        let rows = self.store.select(tables::POSTS, &query, cancel).await?;
        decode_first(rows)
    }

    /// Live post `viewer` is allowed to open, or NotFound.
    pub async fn open(
        &self,
        post_id: Uuid,
        viewer: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<Post, AppError> {
        let not_found = || AppError::NotFound("Post not found".to_string());
        let post = self.find(post_id, cancel).await?.ok_or_else(not_found)?;
        if !visible_to(self.store.as_ref(), &post, viewer, cancel).await? {
            return Err(not_found());
        }
        Ok(post)
    }

    /// Single-post read: viewer flags, variant extension, and a best-effort
    /// view count bump.
    pub async fn get(
        &self,
        post_id: Uuid,
        viewer: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<Post, AppError> {
        let mut post = self.open(post_id, viewer, cancel).await?;

        if let Some(viewer) = viewer {
            let (liked, saved) = tokio::join!(
                self.has_link(tables::POST_LIKES, post_id, viewer, cancel),
                self.has_link(tables::SAVED_POSTS, post_id, viewer, cancel),
            );
            post.is_liked = degrade(liked, post_id, "like")?;
            post.is_saved = degrade(saved, post_id, "save")?;
        }

        if let Some(enricher) = self.enrichers.get(post.variant) {
            match enricher.load_one(&post, viewer, cancel).await {
                Ok(Some(extension)) => post.attach(extension),
                Ok(None) => tracing::error!(
                    %post_id,
                    variant = post.variant.as_str(),
                    "Post has no extension row"
                ),
                Err(StoreError::Cancelled) => return Err(AppError::Cancelled),
                Err(e) => tracing::warn!(%post_id, "Failed to load post extension: {}", e),
            }
        }

        self.spawn_view_increment(post_id);
        Ok(post)
    }

    fn spawn_view_increment(&self, post_id: Uuid) {
        let store = self.store.clone();
        // Not tied to the request; finishing the response must not abort it.
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            bump_counter(store.as_ref(), post_id, Counter::Views, 1, &cancel).await;
        });
    }

    pub async fn update(
        &self,
        post_id: Uuid,
        actor_id: Uuid,
        request: &UpdatePostRequest,
        max_content_length: usize,
        cancel: &CancellationToken,
    ) -> Result<PostUpdate, AppError> {
        request.check(max_content_length)?;

        let current = self
            .find(post_id, cancel)
            .await?
            .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;
        if current.author_id != actor_id {
            return Err(AppError::Unauthorized("You can only edit your own posts".to_string()));
        }

        let urls = request.media_urls.as_ref().unwrap_or(&current.media_urls);
        let types = request.media_types.as_ref().unwrap_or(&current.media_types);
        check_media(urls, types)?;

        let mut updates = match serde_json::to_value(request)? {
            Row::Object(fields) => fields,
            _ => Map::new(),
        };
        let now = Utc::now();
        updates.insert("updated_at".to_string(), json!(format_timestamp(&now)));
        if request.is_published == Some(true) && current.published_at.is_none() {
            updates.insert("published_at".to_string(), json!(format_timestamp(&now)));
        }

        let filter = Filter::new().eq("id", post_id).is_null("deleted_at");
        let rows = self
            .store
            .patch(tables::POSTS, &filter, Row::Object(updates), cancel)
            .await?;
        let mut post = decode_first::<Post>(rows)?
            .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;
        post.author = current.author;

        let content_changed = request
            .content
            .as_ref()
            .is_some_and(|content| *content != current.content);
        Ok(PostUpdate {
            post,
            content_changed,
        })
    }

    /// Marks the post deleted. Deleting an already deleted post succeeds.
    pub async fn soft_delete(
        &self,
        post_id: Uuid,
        actor_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        let query = Query::new(Filter::new().eq("id", post_id)).limit(1);
        let post = decode_first::<Post>(self.store.select(tables::POSTS, &query, cancel).await?)?
            .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

        if post.author_id != actor_id {
            return Err(AppError::Unauthorized("You can only delete your own posts".to_string()));
        }
        if post.deleted_at.is_some() {
            return Ok(());
        }

        let now = format_timestamp(&Utc::now());
        let updates = json!({ "deleted_at": now, "updated_at": now });
        self.store
            .patch(tables::POSTS, &Filter::new().eq("id", post_id), updates, cancel)
            .await?;
        tracing::info!(%post_id, "Post soft-deleted");
        Ok(())
    }

    pub async fn like(&self, post_id: Uuid, user_id: Uuid, cancel: &CancellationToken) -> Result<(), AppError> {
        self.open(post_id, Some(user_id), cancel).await?;
        let row = json!({ "post_id": post_id, "user_id": user_id });
        self.add_link(tables::POST_LIKES, Counter::Likes, post_id, row, cancel).await
    }

    pub async fn unlike(&self, post_id: Uuid, user_id: Uuid, cancel: &CancellationToken) -> Result<(), AppError> {
        self.remove_link(tables::POST_LIKES, Counter::Likes, post_id, user_id, cancel)
            .await
    }

    pub async fn save(
        &self,
        post_id: Uuid,
        user_id: Uuid,
        collection_name: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        self.open(post_id, Some(user_id), cancel).await?;
        let row = json!({
            "post_id": post_id,
            "user_id": user_id,
            "collection_name": collection_name,
            "created_at": format_timestamp(&Utc::now()),
        });
        self.add_link(tables::SAVED_POSTS, Counter::Saves, post_id, row, cancel).await
    }

    pub async fn unsave(&self, post_id: Uuid, user_id: Uuid, cancel: &CancellationToken) -> Result<(), AppError> {
        self.remove_link(tables::SAVED_POSTS, Counter::Saves, post_id, user_id, cancel)
            .await
    }

    pub async fn share(
        &self,
        post_id: Uuid,
        user_id: Uuid,
        comment: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        let post = self.open(post_id, Some(user_id), cancel).await?;
        if !post.allows_sharing {
            return Err(AppError::Validation("Sharing is disabled for this post".to_string()));
        }
        let row = json!({ "post_id": post_id, "user_id": user_id, "comment": comment });
        self.add_link(tables::POST_SHARES, Counter::Shares, post_id, row, cancel).await
    }

    pub async fn unshare(&self, post_id: Uuid, user_id: Uuid, cancel: &CancellationToken) -> Result<(), AppError> {
        self.remove_link(tables::POST_SHARES, Counter::Shares, post_id, user_id, cancel)
            .await
    }

    /// One query: which of `post_ids` has `viewer` liked.
    pub async fn batch_check_likes(
        &self,
        post_ids: &[Uuid],
        viewer: Uuid,
        cancel: &CancellationToken,
    ) -> Result<HashMap<Uuid, bool>, StoreError> {
        self.batch_check(tables::POST_LIKES, post_ids, viewer, cancel).await
    }

    /// One query: which of `post_ids` has `viewer` saved.
    pub async fn batch_check_saves(
        &self,
        post_ids: &[Uuid],
        viewer: Uuid,
        cancel: &CancellationToken,
    ) -> Result<HashMap<Uuid, bool>, StoreError> {
        self.batch_check(tables::SAVED_POSTS, post_ids, viewer, cancel).await
    }

    /// Posts with authors, in store order.
    pub async fn page(
        &self,
        filter: &Filter,
        order: &[Order],
        limit: usize,
        offset: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Post>, StoreError> {
        let mut query = Query::new(filter.clone())
            .select(POST_WITH_AUTHOR)
            .page(limit, offset);
        query.order = order.to_vec();
        let rows = self.store.select(tables::POSTS, &query, cancel).await?;
        decode_rows(rows)
    }

    pub async fn count(&self, filter: &Filter, cancel: &CancellationToken) -> Result<u64, StoreError> {
        self.store.count(tables::POSTS, filter, cancel).await
    }

    async fn has_link(
        &self,
        table: &str,
        post_id: Uuid,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<bool, StoreError> {
        let query = Query::new(Filter::new().eq("post_id", post_id).eq("user_id", user_id))
            .select("post_id")
            .limit(1);
        Ok(!self.store.select(table, &query, cancel).await?.is_empty())
    }

    async fn batch_check(
        &self,
        table: &str,
        post_ids: &[Uuid],
        viewer: Uuid,
        cancel: &CancellationToken,
    ) -> Result<HashMap<Uuid, bool>, StoreError> {
        if post_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let query = Query::new(
            Filter::new()
                .in_list("post_id", post_ids)
                .eq("user_id", viewer),
        )
        .select("post_id");
        let rows = self.store.select(table, &query, cancel).await?;

        let mut found: HashMap<Uuid, bool> = post_ids.iter().map(|id| (*id, false)).collect();
        for row in decode_rows::<PostIdRow>(rows)? {
            found.insert(row.post_id, true);
        }
        Ok(found)
    }

    async fn add_link(
        &self,
        table: &str,
        counter: Counter,
        post_id: Uuid,
        row: Row,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        match self.store.insert(table, row, false, cancel).await {
            Ok(_) => {
                bump_counter(self.store.as_ref(), post_id, counter, 1, cancel).await;
                Ok(())
            }
            Err(e) if e.is_duplicate() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_link(
        &self,
        table: &str,
        counter: Counter,
        post_id: Uuid,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        let filter = Filter::new().eq("post_id", post_id).eq("user_id", user_id);
        let removed = self.store.delete(table, &filter, cancel).await?;
        if !removed.is_empty() {
            bump_counter(self.store.as_ref(), post_id, counter, -1, cancel).await;
        }
        Ok(())
    }
}

/// Viewer flags fall back to `false` unless the request itself was cancelled.

/// Followers-only posts are visible to their author and to accounts
/// following the author.
pub async fn visible_to(
    store: &dyn Store,
    post: &Post,
    viewer: Option<Uuid>,
    cancel: &CancellationToken,
) -> Result<bool, StoreError> {
    if !post.readable_by(viewer) {
        return Ok(false);
    }
    if post.visibility != Visibility::Followers || viewer == Some(post.author_id) {
        return Ok(true);
    }
    let Some(viewer) = viewer else {
        return Ok(false);
    };
    let query = Query::new(
        Filter::new()
            .eq("follower_id", viewer)
            .eq("following_id", post.author_id),
    )
    .select("follower_id")
    .limit(1);
    Ok(!store.select(tables::FOLLOWS, &query, cancel).await?.is_empty())
}

fn degrade(result: Result<bool, StoreError>, post_id: Uuid, what: &str) -> Result<bool, AppError> {
    match result {
        Ok(flag) => Ok(flag),
        Err(StoreError::Cancelled) => Err(AppError::Cancelled),
        Err(e) => {
            tracing::warn!(%post_id, "Failed to check {} state: {}", what, e);
            Ok(false)
        }
    }
}
