//! Media uploads to the object store (`/storage/v1/object/{bucket}/{path}`).

use std::time::Duration;

use axum::body::Bytes;
use reqwest::{Client, Method, RequestBuilder};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::{
    config::{StorageConfig, StoreConfig},
    error::AppError,
};

/// Where an uploaded object landed.
#[derive(Debug, Clone, Serialize)]
pub struct StoredObject {
    pub path: String,
    pub url: String,
    pub content_type: String,
    pub size: usize,
}

#[derive(Clone)]
pub struct ObjectStorage {
    client: Client,
    base: Url,
    service_key: String,
    bucket: String,
    max_upload_bytes: usize,
    allowed_mime_types: Vec<String>,
}

impl ObjectStorage {
    pub fn new(store: &StoreConfig, storage: &StorageConfig) -> Result<Self, AppError> {
        let base = Url::parse(&format!("{}/storage/v1/", store.url.trim_end_matches('/')))
            .map_err(|e| AppError::Internal(format!("invalid storage url: {}", e)))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(store.timeout_secs.max(1) * 3))
            .build()
            .map_err(|e| AppError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            base,
            service_key: store.service_key.clone(),
            bucket: storage.bucket.clone(),
            max_upload_bytes: storage.max_upload_bytes,
            allowed_mime_types: storage.allowed_mime_types.clone(),
        })
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    pub fn validate(&self, content_type: &str, size: usize) -> Result<(), AppError> {
        if size == 0 {
            return Err(AppError::Validation("Upload is empty".to_string()));
        }
        if size > self.max_upload_bytes {
            return Err(AppError::Validation(format!(
                "Upload of {} bytes exceeds the {} byte limit",
                size, self.max_upload_bytes
            )));
        }
        let essence = essence(content_type);
        if !self.allowed_mime_types.iter().any(|m| m.eq_ignore_ascii_case(&essence)) {
            return Err(AppError::Validation(format!(
                "File type '{}' is not allowed",
                essence
            )));
        }
        Ok(())
    }

    pub fn public_url(&self, path: &str) -> String {
        format!("{}object/public/{}/{}", self.base, self.bucket, path)
    }

    pub async fn upload(
        &self,
        user_id: Uuid,
        content_type: &str,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> Result<StoredObject, AppError> {
        self.validate(content_type, body.len())?;

        let content_type = essence(content_type);
        let path = object_path(user_id, &content_type);
        let size = body.len();
        let request = self
            .request(Method::POST, &path)?
            .header(reqwest::header::CONTENT_TYPE, &content_type)
            .body(body);
        self.execute(request, cancel).await?;

        tracing::info!(%user_id, path = %path, size, "Media uploaded");
        Ok(StoredObject {
            url: self.public_url(&path),
            path,
            content_type,
            size,
        })
    }

    pub async fn delete(&self, path: &str, cancel: &CancellationToken) -> Result<(), AppError> {
        let request = self.request(Method::DELETE, path)?;
        self.execute(request, cancel).await
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, AppError> {
        let url = self
            .base
            .join(&format!("object/{}/{}", self.bucket, path))
            .map_err(|e| AppError::Validation(format!("invalid object path: {}", e)))?;
        Ok(self
            .client
            .request(method, url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key))
    }

    async fn execute(&self, request: RequestBuilder, cancel: &CancellationToken) -> Result<(), AppError> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            response = request.send() => response
                .map_err(|e| AppError::StoreUnavailable(e.to_string()))?,
        };
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(AppError::StoreUnavailable(format!("object store returned {}: {}", status, text)))
        } else if status.as_u16() == 404 {
            Err(AppError::NotFound("Object not found".to_string()))
        } else {
            Err(AppError::Validation(format!("object store rejected request: {}", text)))
        }
    }
}

/// Accepts only `{user_id}/{file}` where the first segment is `user_id` and
/// `file` is a plain name.
pub fn owned_path(user_id: Uuid, path: &str) -> Result<&str, AppError> {
    let invalid = || AppError::Validation("Invalid media path".to_string());
    let (owner, file) = path.split_once('/').ok_or_else(invalid)?;
    if file.is_empty()
        || matches!(file, "." | "..")
        || file.contains(['/', '\\', '%', '?', '#'])
    {
        return Err(invalid());
    }
    match Uuid::parse_str(owner) {
        Ok(owner) if owner == user_id => Ok(path),
        Ok(_) => Err(AppError::Unauthorized(
            "You can only delete your own uploads".to_string(),
        )),
        Err(_) => Err(invalid()),
    }
}

/// `image/png; charset=...` -> `image/png`.
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// `{user_id}/{uuid}.{ext}`, with the extension guessed from the MIME type.
pub fn object_path(user_id: Uuid, content_type: &str) -> String {
    let ext = mime_guess::get_mime_extensions_str(content_type)
        .and_then(|exts| exts.first())
        .copied()
        .unwrap_or("bin");
    format!("{}/{}.{}", user_id, Uuid::new_v4(), ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn storage() -> ObjectStorage {
        let config = Config::default();
        ObjectStorage::new(&config.store, &config.storage).unwrap()
    }

    #[test]
    fn validates_size_and_type() {
        let storage = storage();
        assert!(storage.validate("image/png", 1024).is_ok());
        assert!(storage.validate("IMAGE/PNG; charset=binary", 1024).is_ok());
        assert!(storage.validate("image/png", 0).is_err());
        assert!(storage.validate("image/png", storage.max_upload_bytes() + 1).is_err());
        assert!(storage.validate("application/x-msdownload", 10).is_err());
    }

    #[test]
    fn paths_are_scoped_by_user_with_guessed_extension() {
        let user = Uuid::new_v4();
        let path = object_path(user, "image/png");
        assert!(path.starts_with(&format!("{}/", user)));
        assert!(path.ends_with(".png"));
        assert!(object_path(user, "application/x-unknown-thing").ends_with(".bin"));
    }

    #[test]
    fn owned_paths_reject_traversal_and_foreign_owners() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mine = object_path(me, "image/png");
        assert_eq!(owned_path(me, &mine).unwrap(), mine);

        assert!(matches!(
            owned_path(me, &format!("{}/x.png", other)),
            Err(AppError::Unauthorized(_))
        ));
        for path in [
            format!("{}/../{}/x.png", me, other),
            format!("{}/..", me),
            format!("{}/", me),
            format!("{}/a\\..\\b.png", me),
            format!("{}/%2e%2e", me),
            format!("{}", me),
            "../x.png".to_string(),
        ] {
            assert!(matches!(owned_path(me, &path), Err(AppError::Validation(_))), "{}", path);
        }
    }

    #[test]
    fn public_urls_point_at_the_public_bucket() {
        let url = storage().public_url("u/x.png");
        assert_eq!(url, "http://localhost:54321/storage/v1/object/public/media/u/x.png");
    }
}
