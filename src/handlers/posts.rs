use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use super::{optional_json, request_token};
use crate::{
    error::AppError,
    models::{
        poll::VoteRequest,
        post::{CreatePostRequest, UpdatePostRequest},
    },
    state::AppState,
    utils::jwt::{Claims, Viewer},
};

/// Optional body of `POST /posts/{id}/save`.
#[derive(Debug, Default, Deserialize)]
pub struct SaveRequest {
    pub collection_name: Option<String>,
}

/// Optional body of `POST /posts/{id}/share`.
#[derive(Debug, Default, Deserialize)]
pub struct ShareRequest {
    pub comment: Option<String>,
}

/// Create a post of any variant.
pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, AppError> {
    let author_id = claims.user_id()?;
    let (cancel, _guard) = request_token();

    let post = state.writer.create(author_id, &payload, &cancel).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "post": post })),
    ))
}

/// Get a single post with its variant payload.
pub async fn get_post(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Path(post_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let (cancel, _guard) = request_token();
    let post = state.posts.get(post_id, viewer, &cancel).await?;
    Ok(Json(json!({ "success": true, "post": post })))
}

/// Patch a post. Owner only.
pub async fn update_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
    Json(payload): Json<UpdatePostRequest>,
) -> Result<impl IntoResponse, AppError> {
    let actor_id = claims.user_id()?;
    let (cancel, _guard) = request_token();

    let post = state.writer.update(post_id, actor_id, &payload, &cancel).await?;
    Ok(Json(json!({ "success": true, "post": post })))
}

/// Soft delete a post. Owner only.
pub async fn delete_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let actor_id = claims.user_id()?;
    let (cancel, _guard) = request_token();

    state.posts.soft_delete(post_id, actor_id, &cancel).await?;
    Ok(Json(json!({ "success": true, "message": "Post deleted" })))
}

pub async fn like_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let (cancel, _guard) = request_token();
    state.posts.like(post_id, claims.user_id()?, &cancel).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn unlike_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let (cancel, _guard) = request_token();
    state.posts.unlike(post_id, claims.user_id()?, &cancel).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn save_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let request: SaveRequest = optional_json(&body)?;
    let (cancel, _guard) = request_token();
    state
        .posts
        .save(post_id, claims.user_id()?, request.collection_name.as_deref(), &cancel)
        .await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn unsave_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let (cancel, _guard) = request_token();
    state.posts.unsave(post_id, claims.user_id()?, &cancel).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn share_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let request: ShareRequest = optional_json(&body)?;
    let (cancel, _guard) = request_token();
    state
        .posts
        .share(post_id, claims.user_id()?, request.comment.as_deref(), &cancel)
        .await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn unshare_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let (cancel, _guard) = request_token();
    state.posts.unshare(post_id, claims.user_id()?, &cancel).await?;
    Ok(Json(json!({ "success": true })))
}

/// Vote on a poll post.
pub async fn vote_poll(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
    Json(payload): Json<VoteRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let (cancel, _guard) = request_token();

    let poll = state
        .polls
        .cast_vote(post_id, claims.user_id()?, &payload.option_indices, &cancel)
        .await?;
    Ok(Json(json!({ "success": true, "poll": poll })))
}
