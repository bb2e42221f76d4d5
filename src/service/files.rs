use std::path::Path;
use std::sync::Arc;

use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use tracing::debug;
use uuid::Uuid;

use crate::api::error::{normalize_error, ApiError};
use crate::api::ApiClient;
use crate::models::PresignRequest;

/// Presigned file transfer: presign through the API, then post the bytes
/// straight to the returned URL.
///
/// The upload deliberately bypasses both the retry and auth transports: the
/// presigned target carries its own authorization in the form fields, and a
/// multipart body is not replayable.
pub struct FileService {
    api: Arc<ApiClient>,
    http: reqwest::Client,
}

impl FileService {
    pub fn new(api: Arc<ApiClient>, http: reqwest::Client) -> Self {
        Self { api, http }
    }

    /// Uploads the file at `path` and returns the id it was presigned under.
    pub async fn upload(&self, path: &Path) -> Result<Uuid, ApiError> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ApiError::validation("path has no usable file name"))?
            .to_string();
        let contents = tokio::fs::read(path).await.map_err(ApiError::storage)?;

        let file_id = Uuid::new_v4();
        let presigned = self
            .api
            .presign_file(&PresignRequest {
                file_id,
                filename: Some(filename.clone()),
            })
            .await?;
        let upload_url = presigned
            .upload_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ApiError::InvalidResponse("presign response has no upload url".into()))?;

        let mut form = Form::new();
        for (name, value) in presigned.form_fields.unwrap_or_default() {
            form = form.text(name, value);
        }
        form = form.part("file", Part::bytes(contents).file_name(filename));

        debug!(%file_id, url = %upload_url, "posting presigned upload");
        let resp = self.http.post(&upload_url).multipart(form).send().await?;
        match resp.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(file_id),
            _ => Err(normalize_error(resp).await),
        }
    }

    pub async fn download(&self, id: Uuid) -> Result<Vec<u8>, ApiError> {
        self.api.download_file(id).await
    }
}
