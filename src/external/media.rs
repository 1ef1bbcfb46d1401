use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use super::{check_status, ExternalError};
use crate::domain::MediaKind;

/// Where an upload comes from: a file on this host or a URL the store can fetch itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    LocalPath(PathBuf),
    RemoteUrl(String),
}

impl MediaSource {
    /// `http(s)://` and `data:` inputs are passed through to the store; anything else is a path.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("data:") {
            MediaSource::RemoteUrl(trimmed.to_string())
        } else {
            MediaSource::LocalPath(PathBuf::from(trimmed))
        }
    }
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Uploads the resource and returns its durable public URL.
    async fn upload(&self, source: MediaSource, kind: MediaKind) -> Result<String, ExternalError>;
}

/// Signed uploads against a Cloudinary-compatible upload API.
pub struct HttpMediaStore {
    client: reqwest::Client,
    cloud_name: String,
    api_key: String,
    api_secret: String,
    api_base_url: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: String,
}

impl HttpMediaStore {
    pub fn new(
        client: reqwest::Client,
        cloud_name: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        api_base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            cloud_name: cloud_name.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            api_base_url: api_base_url.into(),
        }
    }

    fn upload_url(&self, kind: MediaKind) -> String {
        format!(
            "{}/v1_1/{}/{}/upload",
            self.api_base_url.trim_end_matches('/'),
            self.cloud_name,
            kind.as_str()
        )
    }

    async fn file_part(source: MediaSource) -> Result<Part, ExternalError> {
        match source {
            MediaSource::RemoteUrl(url) => Ok(Part::text(url)),
            MediaSource::LocalPath(path) => {
                let bytes = tokio::fs::read(&path).await?;
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "upload".to_string());
                let mime = mime_guess::from_path(&path).first_or_octet_stream();
                Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str(mime.essence_str())
                    .map_err(ExternalError::from)
            }
        }
    }
}

/// SHA-256 over the sorted signed parameters followed by the API secret, hex encoded.
pub fn upload_signature(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut sorted: Vec<_> = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl MediaStore for HttpMediaStore {
    async fn upload(&self, source: MediaSource, kind: MediaKind) -> Result<String, ExternalError> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = upload_signature(&[("timestamp", &timestamp)], &self.api_secret);

        let form = Form::new()
            .part("file", Self::file_part(source).await?)
            .text("api_key", self.api_key.clone())
            .text("timestamp", timestamp)
            .text("signature_algorithm", "sha256")
            .text("signature", signature);

        let response = self
            .client
            .post(self.upload_url(kind))
            .multipart(form)
            .send()
            .await?;
        let response = check_status("media store", response).await?;
        let body: UploadResponse = response.json().await?;
        if body.secure_url.is_empty() {
            return Err(ExternalError::UnexpectedResponse("media store".into()));
        }
        Ok(body.secure_url)
    }
}
