// tests/common/mod.rs
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use socialfeed::{
    config::Config,
    state::AppState,
    store::{Store, memory::MemoryStore, tables},
    utils::time::format_timestamp,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub state: AppState,
    pub cancel: CancellationToken,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.jwt_secret = "feed_test_secret".to_string();
    config
}

pub fn test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let shared: Arc<dyn Store> = store.clone();
    let state = AppState::new(test_config(), shared).expect("state wires up");
    TestApp {
        store,
        state,
        cancel: CancellationToken::new(),
    }
}

pub fn seed_user(store: &MemoryStore, username: &str) -> Uuid {
    let id = Uuid::new_v4();
    store.seed(
        tables::USERS,
        vec![json!({
            "id": id,
            "username": username,
            "display_name": format!("{} display", username),
            "profile_picture": null,
            "is_verified": false,
        })],
    );
    id
}

/// A published public post row as the store would hold it.
pub fn post_row(author_id: Uuid, variant: &str, published_at: DateTime<Utc>) -> Value {
    let at = format_timestamp(&published_at);
    json!({
        "id": Uuid::new_v4(),
        "author_id": author_id,
        "variant": variant,
        "content": format!("{} post", variant),
        "media_urls": [],
        "media_types": [],
        "visibility": "public",
        "allows_comments": true,
        "allows_sharing": true,
        "is_published": true,
        "is_draft": false,
        "is_nsfw": false,
        "is_pinned": false,
        "is_featured": false,
        "likes_count": 0,
        "comments_count": 0,
        "shares_count": 0,
        "views_count": 0,
        "saves_count": 0,
        "created_at": at,
        "updated_at": at,
        "published_at": at,
        "deleted_at": null,
    })
}

pub fn seed_post(store: &MemoryStore, row: Value) -> Uuid {
    let id = Uuid::parse_str(row["id"].as_str().expect("post row has id")).expect("uuid id");
    store.seed(tables::POSTS, vec![row]);
    id
}

pub fn seed_article(store: &MemoryStore, post_id: Uuid, title: &str, slug: &str) {
    store.seed(
        tables::ARTICLES,
        vec![json!({
            "post_id": post_id,
            "title": title,
            "slug": slug,
            "read_time_minutes": 3,
            "views": 0,
            "reads": 0,
        })],
    );
}

pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - Duration::minutes(minutes)
}

pub fn hours_ago(hours: i64) -> DateTime<Utc> {
    Utc::now() - Duration::hours(hours)
}

pub fn rows_where(store: &MemoryStore, table: &str, field: &str, value: &str) -> Vec<Value> {
    store
        .rows(table)
        .into_iter()
        .filter(|row| row[field].as_str() == Some(value))
        .collect()
}
