use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::Enricher;
use crate::{
    error::AppError,
    models::{
        article::{Article, read_time_minutes},
        post::{CreatePostRequest, Extension, Post, PostVariant},
    },
    store::{Filter, Order, Query, Store, StoreError, decode_first, decode_rows, tables},
    utils::{
        html::{clean_html, strip_tags},
        slug::{next_free_slug, slugify},
    },
};

/// Listing projection; the body is only sent for single-post reads.
const BATCH_COLUMNS: &str =
    "post_id,title,subtitle,cover_image_url,slug,read_time_minutes,category,views,reads";

const SLUG_ATTEMPTS: usize = 3;

#[derive(Debug, Deserialize)]
struct TagRow {
    tag: String,
}

#[derive(Debug, Deserialize)]
struct SlugRow {
    slug: String,
}

pub struct ArticleEnricher {
    store: Arc<dyn Store>,
}

impl ArticleEnricher {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn taken_slugs(&self, base: &str, cancel: &CancellationToken) -> Result<Vec<String>, StoreError> {
        let query = Query::new(Filter::new().ilike("slug", &format!("{}%", base))).select("slug");
        let rows = self.store.select(tables::ARTICLES, &query, cancel).await?;
        Ok(decode_rows::<SlugRow>(rows)?.into_iter().map(|r| r.slug).collect())
    }

    async fn insert_tags(
        &self,
        post_id: Uuid,
        tags: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, StoreError> {
        let mut unique: Vec<String> = Vec::new();
        for tag in tags {
            let tag = tag.trim().to_lowercase();
            if !tag.is_empty() && !unique.contains(&tag) {
                unique.push(tag);
            }
        }
        if unique.is_empty() {
            return Ok(unique);
        }

        let rows: Vec<_> = unique
            .iter()
            .map(|tag| json!({ "post_id": post_id, "tag": tag }))
            .collect();
        self.store
            .insert(tables::ARTICLE_TAGS, json!(rows), false, cancel)
            .await?;
        Ok(unique)
    }
}

#[async_trait]
impl Enricher for ArticleEnricher {
    fn variant(&self) -> PostVariant {
        PostVariant::Article
    }

    async fn load_one(
        &self,
        post: &Post,
        _viewer: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<Option<Extension>, StoreError> {
        let by_post = Filter::new().eq("post_id", post.id);
        let article_query = Query::new(by_post.clone()).limit(1);
        let tags_query = Query::new(by_post).select("tag").order(Order::asc("tag"));

        let (article, tags) = tokio::join!(
            self.store.select(tables::ARTICLES, &article_query, cancel),
            self.store.select(tables::ARTICLE_TAGS, &tags_query, cancel),
        );

        let Some(mut article) = decode_first::<Article>(article?)? else {
            return Ok(None);
        };
        article.tags = decode_rows::<TagRow>(tags?)?
            .into_iter()
            .map(|t| t.tag)
            .collect();
        Ok(Some(Extension::Article(article)))
    }

    async fn load_batch(
        &self,
        post_ids: &[Uuid],
        _viewer: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<HashMap<Uuid, Extension>, StoreError> {
        if post_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let query = Query::new(Filter::new().in_list("post_id", post_ids)).select(BATCH_COLUMNS);
        let rows = self.store.select(tables::ARTICLES, &query, cancel).await?;
        Ok(decode_rows::<Article>(rows)?
            .into_iter()
            .map(|a| (a.post_id, Extension::Article(a)))
            .collect())
    }

    async fn create(
        &self,
        post: &Post,
        request: &CreatePostRequest,
        cancel: &CancellationToken,
    ) -> Result<Extension, AppError> {
        let payload = request
            .article
            .as_ref()
            .ok_or_else(|| AppError::Validation("Article posts require an 'article' payload".to_string()))?;

        let content_html = payload.content_html.as_deref().map(clean_html);
        let read_time = match &content_html {
            Some(html) => read_time_minutes(&strip_tags(html)),
            None => read_time_minutes(&post.content),
        };
        let base = slugify(&payload.title);

        let mut last_error = None;
        for attempt in 0..SLUG_ATTEMPTS {
            let taken = self.taken_slugs(&base, cancel).await?;
            let slug = next_free_slug(&base, &taken);
            let row = json!({
                "post_id": post.id,
                "title": payload.title,
                "subtitle": payload.subtitle,
                "content_html": content_html,
                "cover_image_url": payload.cover_image_url,
                "slug": slug,
                "read_time_minutes": read_time,
                "category": payload.category,
                "meta_title": payload.meta_title,
                "meta_description": payload.meta_description,
                "views": 0,
                "reads": 0,
            });

            match self.store.insert(tables::ARTICLES, row, true, cancel).await {
                Ok(rows) => {
                    let mut article = decode_first::<Article>(rows)?.ok_or_else(|| {
                        AppError::Internal("article insert returned no row".to_string())
                    })?;
                    article.tags = self.insert_tags(post.id, &payload.tags, cancel).await?;
                    return Ok(Extension::Article(article));
                }
                Err(e) if e.is_duplicate() => {
                    tracing::debug!(post_id = %post.id, attempt, slug = %slug, "Slug taken concurrently, retrying");
                    last_error = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_error
            .map(AppError::from)
            .unwrap_or_else(|| AppError::Conflict(format!("no free slug for '{}'", base))))
    }
}
