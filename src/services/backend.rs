//! Board REST backend — durable board record and attachment URLs.
//!
//! DESIGN
//! ======
//! [`BoardApi`] is the seam the persistence bridge and file sync talk to.
//! [`HttpBoardApi`] implements it with `reqwest` against two route families:
//! signed-in users write `/api/boards/{id}`, share-link visitors write
//! `/api/public/boards/{token}`. Both families expose the same sub-routes.
//!
//! ERROR HANDLING
//! ==============
//! Status codes are classified once, here: 401/403 become `PermissionDenied`
//! (callers go read-only), 404 becomes `NotFound`, anything else non-2xx is
//! `Status`. Transport failures are `Request` and retryable.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::element::{Element, FileId};
use crate::error::ErrorCode;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("not found")]
    NotFound,
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ErrorCode for BackendError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "E_PERMISSION_DENIED",
            Self::NotFound => "E_NOT_FOUND",
            Self::Request(_) => "E_BACKEND_REQUEST",
            Self::Status { .. } => "E_BACKEND_STATUS",
            Self::InvalidResponse(_) => "E_BACKEND_RESPONSE",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Durable board record written by the persistence bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardUpdate {
    pub elements: Vec<Element>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[async_trait]
pub trait BoardApi: Send + Sync {
    async fn update_board(&self, board_id: &str, update: &BoardUpdate) -> Result<(), BackendError>;

    /// One-time upload target for an attachment.
    async fn get_upload_url(&self, board_id: &str, file_id: &str, content_type: &str)
    -> Result<String, BackendError>;

    /// Download locations for a batch of attachments. Ids the backend does
    /// not know are absent from the map.
    async fn get_batch_file_urls(
        &self,
        board_id: &str,
        file_ids: &[FileId],
    ) -> Result<HashMap<FileId, String>, BackendError>;

    async fn put_blob(&self, url: &str, content_type: &str, bytes: Vec<u8>) -> Result<(), BackendError>;

    async fn get_blob(&self, url: &str) -> Result<Vec<u8>, BackendError>;

    async fn delete_board(&self, board_id: &str) -> Result<(), BackendError>;
}

// =============================================================================
// HTTP
// =============================================================================

#[derive(Debug, Clone)]
pub enum Credentials {
    /// Signed-in user; bearer session token.
    Session(String),
    /// Share-link visitor; the token replaces the board id in routes.
    ShareToken(String),
}

#[derive(Debug, Clone)]
pub struct HttpBoardApi {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

#[derive(Deserialize)]
struct UploadUrlResponse {
    url: String,
}

#[derive(Deserialize)]
struct BatchUrlsResponse {
    urls: HashMap<FileId, String>,
}

impl HttpBoardApi {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built (TLS backend init).
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| BackendError::Request(e.to_string()))?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_owned(), credentials })
    }

    fn board_root(&self, board_id: &str) -> String {
        match &self.credentials {
            Credentials::Session(_) => format!("{}/api/boards/{board_id}", self.base_url),
            Credentials::ShareToken(token) => format!("{}/api/public/boards/{token}", self.base_url),
        }
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Credentials::Session(token) => request.bearer_auth(token),
            Credentials::ShareToken(_) => request,
        }
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let response = request.send().await.map_err(|e| BackendError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        match status {
            200..=299 => Ok(response),
            401 | 403 => Err(BackendError::PermissionDenied),
            404 => Err(BackendError::NotFound),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(BackendError::Status { status, body })
            }
        }
    }

    async fn json<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T, BackendError> {
        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl BoardApi for HttpBoardApi {
    async fn update_board(&self, board_id: &str, update: &BoardUpdate) -> Result<(), BackendError> {
        let request = self.authed(self.http.put(self.board_root(board_id)).json(update));
        self.execute(request).await?;
        Ok(())
    }

    async fn get_upload_url(
        &self,
        board_id: &str,
        file_id: &str,
        content_type: &str,
    ) -> Result<String, BackendError> {
        let url = format!("{}/files/{file_id}/upload-url", self.board_root(board_id));
        let request = self.authed(self.http.post(url).json(&json!({ "contentType": content_type })));
        let body: UploadUrlResponse = Self::json(self.execute(request).await?).await?;
        Ok(body.url)
    }

    async fn get_batch_file_urls(
        &self,
        board_id: &str,
        file_ids: &[FileId],
    ) -> Result<HashMap<FileId, String>, BackendError> {
        let url = format!("{}/files/batch", self.board_root(board_id));
        let request = self.authed(self.http.post(url).json(&json!({ "fileIds": file_ids })));
        let body: BatchUrlsResponse = Self::json(self.execute(request).await?).await?;
        Ok(body.urls)
    }

    async fn put_blob(&self, url: &str, content_type: &str, bytes: Vec<u8>) -> Result<(), BackendError> {
        let request = self
            .http
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes);
        self.execute(request).await?;
        Ok(())
    }

    async fn get_blob(&self, url: &str) -> Result<Vec<u8>, BackendError> {
        let response = self.execute(self.http.get(url)).await?;
        let bytes = response.bytes().await.map_err(|e| BackendError::Request(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn delete_board(&self, board_id: &str) -> Result<(), BackendError> {
        let request = self.authed(self.http.delete(self.board_root(board_id)));
        self.execute(request).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "backend_test.rs"]
mod tests;
