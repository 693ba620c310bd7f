use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use validator::Validate;

use super::{Counter, PostRepository, bump_counter};
use crate::{
    error::AppError,
    models::comment::{Comment, CreateCommentRequest, DELETED_SENTINEL},
    store::{Filter, Order, Query, Store, decode_first, decode_rows, tables},
    utils::time::format_timestamp,
};

const COMMENT_WITH_AUTHOR: &str =
    "*,author:users!author_id(id,username,display_name,profile_picture,is_verified)";

/// Upper bound on comments returned for one post.
const MAX_COMMENTS: usize = 500;

#[derive(Debug, Deserialize)]
struct CommentIdRow {
    comment_id: Uuid,
}

#[derive(Clone)]
pub struct CommentRepository {
    store: Arc<dyn Store>,
    posts: PostRepository,
}

impl CommentRepository {
    pub fn new(store: Arc<dyn Store>, posts: PostRepository) -> Self {
        Self { store, posts }
    }

    pub async fn create(
        &self,
        post_id: Uuid,
        author_id: Uuid,
        request: &CreateCommentRequest,
        cancel: &CancellationToken,
    ) -> Result<Comment, AppError> {
        request
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let post = self.posts.open(post_id, Some(author_id), cancel).await?;
        if !post.allows_comments {
            return Err(AppError::Validation("Comments are disabled for this post".to_string()));
        }

        if let Some(parent_id) = request.parent_comment_id {
            let parent = self
                .find_any(parent_id, cancel)
                .await?
                .ok_or_else(|| AppError::NotFound("Parent comment not found".to_string()))?;
            if parent.post_id != post_id {
                return Err(AppError::Validation(
                    "Parent comment belongs to another post".to_string(),
                ));
            }
        }

        let row = json!({
            "post_id": post_id,
            "author_id": author_id,
            "content": request.content,
            "parent_comment_id": request.parent_comment_id,
            "likes_count": 0,
            "created_at": format_timestamp(&Utc::now()),
            "deleted_at": null,
        });
        let rows = self.store.insert(tables::COMMENTS, row, true, cancel).await?;
        let comment = decode_first::<Comment>(rows)?
            .ok_or_else(|| AppError::Internal("comment insert returned no row".to_string()))?;

        bump_counter(self.store.as_ref(), post_id, Counter::Comments, 1, cancel).await;
        Ok(comment)
    }

    /// The post's comments as a forest, oldest first at every level.
    pub async fn list(
        &self,
        post_id: Uuid,
        viewer: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Comment>, AppError> {
        let post = self.posts.open(post_id, viewer, cancel).await?;

        let query = Query::new(Filter::new().eq("post_id", post.id))
            .select(COMMENT_WITH_AUTHOR)
            .order(Order::asc("created_at"))
            .limit(MAX_COMMENTS);
        let mut comments = decode_rows::<Comment>(self.store.select(tables::COMMENTS, &query, cancel).await?)?;

        if let Some(viewer) = viewer {
            let ids: Vec<Uuid> = comments.iter().map(|c| c.id).collect();
            let liked = self.liked_by(&ids, viewer, cancel).await?;
            for comment in comments.iter_mut() {
                comment.is_liked = liked.contains(&comment.id);
            }
        }

        for comment in comments.iter_mut().filter(|c| c.deleted_at.is_some()) {
            comment.content = DELETED_SENTINEL.to_string();
            comment.author = None;
        }

        Ok(build_tree(comments))
    }

    /// Blanks the comment but keeps the node so replies stay attached.
    pub async fn soft_delete(
        &self,
        comment_id: Uuid,
        actor_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        let comment = self
            .find_any(comment_id, cancel)
            .await?
            .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;
        if comment.author_id != actor_id {
            return Err(AppError::Unauthorized("You can only delete your own comments".to_string()));
        }
        if comment.deleted_at.is_some() {
            return Ok(());
        }

        let updates = json!({
            "content": DELETED_SENTINEL,
            "deleted_at": format_timestamp(&Utc::now()),
        });
        self.store
            .patch(tables::COMMENTS, &Filter::new().eq("id", comment_id), updates, cancel)
            .await?;
        bump_counter(self.store.as_ref(), comment.post_id, Counter::Comments, -1, cancel).await;
        Ok(())
    }

    pub async fn like(&self, comment_id: Uuid, user_id: Uuid, cancel: &CancellationToken) -> Result<(), AppError> {
        let comment = self
            .find_any(comment_id, cancel)
            .await?
            .filter(|c| c.deleted_at.is_none())
            .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;

        let row = json!({ "comment_id": comment_id, "user_id": user_id });
        match self.store.insert(tables::COMMENT_LIKES, row, false, cancel).await {
            Ok(_) => self.set_likes(comment_id, comment.likes_count + 1, cancel).await,
            Err(e) if e.is_duplicate() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn unlike(&self, comment_id: Uuid, user_id: Uuid, cancel: &CancellationToken) -> Result<(), AppError> {
        let filter = Filter::new().eq("comment_id", comment_id).eq("user_id", user_id);
        let removed = self.store.delete(tables::COMMENT_LIKES, &filter, cancel).await?;
        if removed.is_empty() {
            return Ok(());
        }
        if let Some(comment) = self.find_any(comment_id, cancel).await? {
            self.set_likes(comment_id, (comment.likes_count - 1).max(0), cancel).await?;
        }
        Ok(())
    }

    async fn find_any(&self, comment_id: Uuid, cancel: &CancellationToken) -> Result<Option<Comment>, AppError> {
        let query = Query::new(Filter::new().eq("id", comment_id)).limit(1);
        Ok(decode_first(self.store.select(tables::COMMENTS, &query, cancel).await?)?)
    }

    // Read-modify-write; the count is display only.
    async fn set_likes(&self, comment_id: Uuid, likes: i64, cancel: &CancellationToken) -> Result<(), AppError> {
        let updates = json!({ "likes_count": likes });
        if let Err(e) = self
            .store
            .patch(tables::COMMENTS, &Filter::new().eq("id", comment_id), updates, cancel)
            .await
        {
            if e.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            tracing::warn!(%comment_id, "Failed to update comment likes: {}", e);
        }
        Ok(())
    }

    async fn liked_by(
        &self,
        comment_ids: &[Uuid],
        viewer: Uuid,
        cancel: &CancellationToken,
    ) -> Result<HashSet<Uuid>, AppError> {
        if comment_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let query = Query::new(
            Filter::new()
                .in_list("comment_id", comment_ids)
                .eq("user_id", viewer),
        )
        .select("comment_id");
        let rows = self.store.select(tables::COMMENT_LIKES, &query, cancel).await?;
        Ok(decode_rows::<CommentIdRow>(rows)?
            .into_iter()
            .map(|r| r.comment_id)
            .collect())
    }
}

/// Nests replies under their parents, keeping input order among siblings.
/// Replies whose parent is missing from the input become roots.
pub fn build_tree(comments: Vec<Comment>) -> Vec<Comment> {
    let ids: HashSet<Uuid> = comments.iter().map(|c| c.id).collect();
    let mut children: HashMap<Uuid, Vec<Comment>> = HashMap::new();
    let mut roots = Vec::new();

    for comment in comments {
        match comment.parent_comment_id {
            Some(parent) if ids.contains(&parent) && parent != comment.id => {
                children.entry(parent).or_default().push(comment)
            }
            _ => roots.push(comment),
        }
    }

    fn attach(mut node: Comment, children: &mut HashMap<Uuid, Vec<Comment>>) -> Comment {
        let replies = children.remove(&node.id).unwrap_or_default();
        node.replies = replies.into_iter().map(|c| attach(c, children)).collect();
        node
    }

    roots.into_iter().map(|c| attach(c, &mut children)).collect()
}
