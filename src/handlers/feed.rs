use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde_json::json;
use uuid::Uuid;

use super::request_token;
use crate::{
    error::AppError,
    feed::FeedKind,
    models::feed::{FeedPage, PageParams},
    state::AppState,
    utils::jwt::Viewer,
};

async fn serve(
    state: &AppState,
    kind: FeedKind,
    viewer: Option<Uuid>,
    params: &PageParams,
) -> Result<Json<serde_json::Value>, AppError> {
    let (limit, offset) = params.resolve();
    let (cancel, _guard) = request_token();

    let page = state.feeds.page(&kind, viewer, limit, offset, &cancel).await?;
    Ok(Json(envelope(page)))
}

fn envelope(page: FeedPage) -> serde_json::Value {
    let has_more = page.has_more();
    json!({
        "success": true,
        "posts": page.posts,
        "total": page.total,
        "limit": page.limit,
        "offset": page.offset,
        "has_more": has_more,
    })
}

/// Public posts, newest first.
pub async fn home_feed(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, AppError> {
    serve(&state, FeedKind::Home, viewer, &params).await
}

/// Posts by accounts the viewer follows.
pub async fn following_feed(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, AppError> {
    serve(&state, FeedKind::Following, viewer, &params).await
}

/// Most liked first.
pub async fn explore_feed(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, AppError> {
    serve(&state, FeedKind::Explore, viewer, &params).await
}

pub async fn hashtag_feed(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Path(tag): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, AppError> {
    serve(&state, FeedKind::Hashtag(tag), viewer, &params).await
}

/// The viewer's saved posts, most recently saved first.
pub async fn saved_feed(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, AppError> {
    serve(&state, FeedKind::Saved, viewer, &params).await
}

/// A profile's posts. Non-public posts only for the owner.
pub async fn user_posts(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Path(user_id): Path<Uuid>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, AppError> {
    serve(&state, FeedKind::User(user_id), viewer, &params).await
}
