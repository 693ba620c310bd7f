use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

const WORDS_PER_MINUTE: usize = 200;

/// Represents the 'articles' extension row of an article post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub post_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub content_html: Option<String>,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    pub slug: String,
    pub read_time_minutes: i32,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub meta_title: Option<String>,
    #[serde(default)]
    pub meta_description: Option<String>,
    #[serde(default)]
    pub views: i64,
    #[serde(default)]
    pub reads: i64,

    /// Loaded from 'article_tags' on single-post reads only.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// DTO for the article part of a create-post payload.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateArticleRequest {
    #[validate(length(min = 1, max = 200, message = "Title length must be between 1 and 200 chars"))]
    pub title: String,
    #[validate(length(max = 300))]
    pub subtitle: Option<String>,
    #[validate(length(max = 100000))]
    pub content_html: Option<String>,
    #[validate(url)]
    pub cover_image_url: Option<String>,
    #[validate(length(max = 50))]
    pub category: Option<String>,
    #[validate(length(max = 70))]
    pub meta_title: Option<String>,
    #[validate(length(max = 160))]
    pub meta_description: Option<String>,
    #[serde(default)]
    #[validate(length(max = 10, message = "At most 10 tags per article"))]
    pub tags: Vec<String>,
}

/// Estimated minutes to read `text`, never less than one.
pub fn read_time_minutes(text: &str) -> i32 {
    let words = text.split_whitespace().count();
    (words / WORDS_PER_MINUTE).max(1) as i32
}
