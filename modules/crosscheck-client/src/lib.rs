pub mod error;
pub mod types;
pub mod upload;

pub use error::{RemoteError, Result};
pub use types::{
    AnalysisAck, CheckType, FileKind, FileStatusEntry, FileUploadResponse, ProcessingStatus,
    ProcessingSummary, Session, SessionListResponse, SessionStatus, UploadedFile,
    ValidationResult, ValidationSummary, Verdict, WorkflowStage, WorkflowStatus,
};
pub use upload::{format_file_size, validate_selection, UploadFile, UploadLimits};

use std::fmt;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_API_PREFIX: &str = "/api/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Where the service lives and how long a single request may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_prefix: String,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ..Self::default()
        }
    }

    /// `base_url` joined with `api_prefix`, without a trailing slash.
    pub fn api_root(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let prefix = self.api_prefix.trim_matches('/');
        if prefix.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{prefix}")
        }
    }
}

/// Typed client for the sessions, files, validation and workflow resources.
///
/// Every method is one request/response round trip. Nothing is retried and
/// nothing is cached.
#[derive(Clone)]
pub struct CrosscheckClient {
    client: reqwest::Client,
    api_root: String,
}

impl fmt::Debug for CrosscheckClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrosscheckClient")
            .field("api_root", &self.api_root)
            .finish()
    }
}

impl CrosscheckClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("crosscheck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_root: config.api_root(),
        })
    }

    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    // --- Sessions ---

    pub async fn create_session(&self) -> Result<types::Session> {
        let req = self
            .request(Method::POST, "/sessions/")
            .json(&serde_json::json!({}));
        self.send_json(req).await
    }

    pub async fn list_sessions(&self, skip: u64, limit: u64) -> Result<SessionListResponse> {
        let req = self
            .request(Method::GET, "/sessions/")
            .query(&[("skip", skip), ("limit", limit)]);
        self.send_json(req).await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<types::Session> {
        require_id("session id", session_id)?;
        let req = self.request(Method::GET, &format!("/sessions/{session_id}"));
        self.send_json(req).await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        require_id("session id", session_id)?;
        let req = self.request(Method::DELETE, &format!("/sessions/{session_id}"));
        self.send_empty(req).await
    }

    // --- Files ---

    /// Upload a batch as one multipart request, one `files` part per document.
    pub async fn upload_files(
        &self,
        session_id: &str,
        files: &[UploadFile],
    ) -> Result<Vec<FileUploadResponse>> {
        require_id("session id", session_id)?;
        if files.is_empty() {
            return Err(RemoteError::Validation("no files selected".to_string()));
        }

        let mut form = reqwest::multipart::Form::new();
        for file in files {
            let part = reqwest::multipart::Part::bytes(file.bytes.clone())
                .file_name(file.filename.clone())
                .mime_str(&file.mime_type)
                .map_err(|e| {
                    RemoteError::Validation(format!("{}: bad MIME type: {e}", file.filename))
                })?;
            form = form.part("files", part);
        }

        let req = self
            .request(Method::POST, &format!("/files/upload/{session_id}"))
            .multipart(form);
        self.send_json(req).await
    }

    pub async fn list_session_files(&self, session_id: &str) -> Result<Vec<UploadedFile>> {
        require_id("session id", session_id)?;
        let req = self.request(Method::GET, &format!("/files/session/{session_id}"));
        self.send_json(req).await
    }

    pub async fn get_file(&self, file_id: &str) -> Result<UploadedFile> {
        require_id("file id", file_id)?;
        let req = self.request(Method::GET, &format!("/files/{file_id}"));
        self.send_json(req).await
    }

    pub async fn delete_file(&self, file_id: &str) -> Result<()> {
        require_id("file id", file_id)?;
        let req = self.request(Method::DELETE, &format!("/files/{file_id}"));
        self.send_empty(req).await
    }

    // --- Workflow ---

    /// Start background analysis. Returns as soon as the service accepts the job.
    pub async fn start_analysis(&self, session_id: &str) -> Result<AnalysisAck> {
        require_id("session id", session_id)?;
        let req = self.request(Method::POST, &format!("/workflow/analyze/{session_id}"));
        self.send_ack(req).await
    }

    /// Run analysis to completion inside the request.
    pub async fn analyze_now(&self, session_id: &str) -> Result<AnalysisAck> {
        require_id("session id", session_id)?;
        let req = self.request(Method::POST, &format!("/workflow/analyze-now/{session_id}"));
        self.send_ack(req).await
    }

    pub async fn workflow_status(&self, session_id: &str) -> Result<WorkflowStatus> {
        require_id("session id", session_id)?;
        let req = self.request(Method::GET, &format!("/workflow/status/{session_id}"));
        self.send_json(req).await
    }

    pub async fn retry_analysis(&self, session_id: &str) -> Result<AnalysisAck> {
        require_id("session id", session_id)?;
        let req = self.request(Method::POST, &format!("/workflow/retry/{session_id}"));
        self.send_ack(req).await
    }

    // --- Validation ---

    pub async fn validation_results(&self, session_id: &str) -> Result<Vec<ValidationResult>> {
        require_id("session id", session_id)?;
        let req = self.request(Method::GET, &format!("/validation/results/{session_id}"));
        self.send_json(req).await
    }

    pub async fn validation_summary(&self, session_id: &str) -> Result<ValidationSummary> {
        require_id("session id", session_id)?;
        let req = self.request(Method::GET, &format!("/validation/summary/{session_id}"));
        self.send_json(req).await
    }

    pub async fn clear_validation_results(&self, session_id: &str) -> Result<()> {
        require_id("session id", session_id)?;
        let req = self.request(Method::DELETE, &format!("/validation/results/{session_id}"));
        self.send_empty(req).await
    }

    // --- Plumbing ---

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        debug!(method = %method, path, "Request");
        self.client.request(method, format!("{}{}", self.api_root, path))
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response> {
        let resp = req.send().await?;

        let status = resp.status();
        debug!(status = status.as_u16(), url = %resp.url().path(), "Response");
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RemoteError::from_response(status.as_u16(), &body));
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = self.send(req).await?;
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn send_empty(&self, req: RequestBuilder) -> Result<()> {
        self.send(req).await?;
        Ok(())
    }

    /// Acknowledgements are informational; an empty body is accepted.
    async fn send_ack(&self, req: RequestBuilder) -> Result<AnalysisAck> {
        let resp = self.send(req).await?;
        let body = resp.text().await?;
        if body.trim().is_empty() {
            return Ok(AnalysisAck::default());
        }
        Ok(serde_json::from_str(&body)?)
    }
}

fn require_id(what: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(RemoteError::Validation(format!("{what} is required")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_root_joins_base_and_prefix() {
        let config = ClientConfig::new("http://qc.local:9000/");
        assert_eq!(config.api_root(), "http://qc.local:9000/api/v1");

        let bare = ClientConfig {
            api_prefix: "/".to_string(),
            ..ClientConfig::new("http://qc.local")
        };
        assert_eq!(bare.api_root(), "http://qc.local");
    }

    #[tokio::test]
    async fn blank_ids_fail_before_any_request() {
        // Nothing listens here; a validation error proves no request was sent.
        let client = CrosscheckClient::new(&ClientConfig::new("http://127.0.0.1:9")).unwrap();
        let err = client.workflow_status("  ").await.unwrap_err();
        assert_eq!(err, RemoteError::Validation("session id is required".into()));

        let err = client.upload_files("s-1", &[]).await.unwrap_err();
        assert_eq!(err, RemoteError::Validation("no files selected".into()));
    }
}
