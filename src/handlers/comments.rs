use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use uuid::Uuid;

use super::request_token;
use crate::{
    error::AppError,
    models::comment::CreateCommentRequest,
    state::AppState,
    utils::jwt::{Claims, Viewer},
};

/// Comment on a post, optionally as a reply.
pub async fn create_comment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let author_id = claims.user_id()?;
    let (cancel, _guard) = request_token();

    let comment = state
        .comments
        .create(post_id, author_id, &payload, &cancel)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "comment": comment })),
    ))
}

/// List a post's comments as a tree.
pub async fn list_comments(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Path(post_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let (cancel, _guard) = request_token();
    let comments = state.comments.list(post_id, viewer, &cancel).await?;
    Ok(Json(json!({ "success": true, "comments": comments })))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(comment_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let (cancel, _guard) = request_token();
    state
        .comments
        .soft_delete(comment_id, claims.user_id()?, &cancel)
        .await?;
    Ok(Json(json!({ "success": true, "message": "Comment deleted" })))
}

pub async fn like_comment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(comment_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let (cancel, _guard) = request_token();
    state.comments.like(comment_id, claims.user_id()?, &cancel).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn unlike_comment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(comment_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let (cancel, _guard) = request_token();
    state.comments.unlike(comment_id, claims.user_id()?, &cancel).await?;
    Ok(Json(json!({ "success": true })))
}
