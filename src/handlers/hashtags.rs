use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde_json::json;

use super::request_token;
use crate::{
    error::AppError,
    models::hashtag::TrendingParams,
    repository::hashtag::{DEFAULT_TRENDING_LIMIT, MAX_TRENDING_LIMIT},
    state::AppState,
};

/// Get trending hashtags.
pub async fn trending(
    State(state): State<AppState>,
    Query(params): Query<TrendingParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_TRENDING_LIMIT)
        .min(MAX_TRENDING_LIMIT);
    let (cancel, _guard) = request_token();

    let hashtags = state.hashtags.trending(limit, &cancel).await?;
    Ok(Json(json!({ "success": true, "hashtags": hashtags })))
}

pub async fn get_hashtag(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (cancel, _guard) = request_token();
    let hashtag = state
        .hashtags
        .find_by_tag(&tag, &cancel)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Hashtag '{}' not found", tag)))?;
    Ok(Json(json!({ "success": true, "hashtag": hashtag })))
}
