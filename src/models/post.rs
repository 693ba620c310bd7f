use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        article::{Article, CreateArticleRequest},
        poll::{CreatePollRequest, Poll},
    },
    utils::time::{flexible, flexible_option},
};

/// Subtype tag of a post. Article and poll posts carry an extension row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostVariant {
    Text,
    Image,
    Video,
    Poll,
    Article,
}

impl PostVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostVariant::Text => "text",
            PostVariant::Image => "image",
            PostVariant::Video => "video",
            PostVariant::Poll => "poll",
            PostVariant::Article => "article",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Followers,
    Private,
}

/// Embedded author projection returned with every listed post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
}

fn default_true() -> bool {
    true
}

/// Represents the 'posts' table, plus the viewer-relative and extension
/// fields the read path fills in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    pub variant: PostVariant,
    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub media_urls: Vec<String>,
    #[serde(default)]
    pub media_types: Vec<String>,

    #[serde(default)]
    pub visibility: Visibility,

    #[serde(default = "default_true")]
    pub allows_comments: bool,
    #[serde(default = "default_true")]
    pub allows_sharing: bool,
    #[serde(default)]
    pub is_published: bool,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default)]
    pub is_nsfw: bool,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub is_featured: bool,

    // Denormalized, display only.
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub comments_count: i64,
    #[serde(default)]
    pub shares_count: i64,
    #[serde(default)]
    pub views_count: i64,
    #[serde(default)]
    pub saves_count: i64,

    #[serde(with = "flexible")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "flexible")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, with = "flexible_option")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, with = "flexible_option")]
    pub deleted_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub is_liked: bool,
    #[serde(default)]
    pub is_saved: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article: Option<Article>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll: Option<Poll>,
}

/// Variant-specific payload loaded by an enricher.
#[derive(Debug, Clone)]
pub enum Extension {
    Article(Article),
    Poll(Poll),
}

impl Post {
    pub fn attach(&mut self, extension: Extension) {
        match extension {
            Extension::Article(article) => self.article = Some(article),
            Extension::Poll(poll) => self.poll = Some(poll),
        }
    }

    /// Whether `viewer` may see this post outside of the listing queries,
    /// ignoring the follow edge that followers-only posts also need.
    pub fn readable_by(&self, viewer: Option<Uuid>) -> bool {
        if viewer == Some(self.author_id) {
            return true;
        }
        self.is_published && self.visibility != Visibility::Private
    }
}

/// DTO for creating a new post.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePostRequest {
    /// Client-assigned identifier; generated when absent.
    #[serde(default)]
    pub id: Option<Uuid>,

    pub variant: PostVariant,

    #[serde(default)]
    pub content: String,

    #[serde(default)]
    #[validate(length(max = 10, message = "At most 10 media items per post"))]
    pub media_urls: Vec<String>,
    #[serde(default)]
    pub media_types: Vec<String>,

    #[serde(default)]
    pub visibility: Visibility,

    #[serde(default = "default_true")]
    pub allows_comments: bool,
    #[serde(default = "default_true")]
    pub allows_sharing: bool,
    #[serde(default = "default_true")]
    pub is_published: bool,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default)]
    pub is_nsfw: bool,

    #[serde(default, with = "flexible_option")]
    pub published_at: Option<DateTime<Utc>>,

    #[validate(nested)]
    pub article: Option<CreateArticleRequest>,
    #[validate(nested)]
    pub poll: Option<CreatePollRequest>,
}

impl CreatePostRequest {
    /// Field constraints plus the cross-field rules derive can't express.
    pub fn check(&self, max_content_length: usize) -> Result<(), AppError> {
        self.validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        check_content(&self.content, max_content_length)?;
        check_media(&self.media_urls, &self.media_types)?;

        match self.variant {
            PostVariant::Article if self.article.is_none() => Err(AppError::Validation(
                "Article posts require an 'article' payload".to_string(),
            )),
            PostVariant::Poll if self.poll.is_none() => Err(AppError::Validation(
                "Poll posts require a 'poll' payload".to_string(),
            )),
            PostVariant::Image | PostVariant::Video if self.media_urls.is_empty() => {
                Err(AppError::Validation(format!(
                    "{} posts require at least one media url",
                    self.variant.as_str()
                )))
            }
            PostVariant::Text if self.content.trim().is_empty() => Err(AppError::Validation(
                "Text posts cannot be empty".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// DTO for patching a post. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePostRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allows_comments: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allows_sharing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_published: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_draft: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_nsfw: Option<bool>,
}

impl UpdatePostRequest {
    pub fn check(&self, max_content_length: usize) -> Result<(), AppError> {
        if let Some(content) = &self.content {
            check_content(content, max_content_length)?;
        }
        Ok(())
    }
}

pub fn check_content(content: &str, max_content_length: usize) -> Result<(), AppError> {
    if content.chars().count() > max_content_length {
        return Err(AppError::Validation(format!(
            "Content must be at most {} characters",
            max_content_length
        )));
    }
    Ok(())
}

/// Media urls and their type tags are parallel lists.
pub fn check_media(urls: &[String], types: &[String]) -> Result<(), AppError> {
    if urls.len() != types.len() {
        return Err(AppError::Validation(format!(
            "media_urls has {} entries but media_types has {}",
            urls.len(),
            types.len()
        )));
    }
    if let Some(bad) = urls.iter().find(|u| Url::parse(u).is_err()) {
        return Err(AppError::Validation(format!("Invalid media url '{}'", bad)));
    }
    Ok(())
}
