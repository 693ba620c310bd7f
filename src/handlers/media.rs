use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use serde_json::json;

use super::request_token;
use crate::{error::AppError, state::AppState, storage, utils::jwt::Claims};

/// Upload the raw request body. The `Content-Type` header names the media type.
pub async fn upload_media(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Validation("Missing Content-Type header".to_string()))?;
    let (cancel, _guard) = request_token();

    let media = state
        .storage
        .upload(user_id, content_type, body, &cancel)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "media": media })),
    ))
}

/// Delete one of the caller's uploads.
pub async fn delete_media(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let path = storage::owned_path(user_id, &path)?;
    let (cancel, _guard) = request_token();

    state.storage.delete(path, &cancel).await?;
    Ok(Json(json!({ "success": true, "message": "Media deleted" })))
}
