// The seam between the store and the remote service.
//
// CrosscheckClient is the production implementation; testing::MockGateway is
// an in-memory one with scripted workflow stages, injected failures and delays.

use async_trait::async_trait;
use crosscheck_client::{
    AnalysisAck, CrosscheckClient, FileUploadResponse, Result, Session, SessionListResponse,
    UploadFile, UploadedFile, ValidationResult, ValidationSummary, WorkflowStatus,
};

#[async_trait]
pub trait Gateway: Send + Sync {
    async fn create_session(&self) -> Result<Session>;

    async fn list_sessions(&self, skip: u64, limit: u64) -> Result<SessionListResponse>;

    async fn get_session(&self, session_id: &str) -> Result<Session>;

    async fn delete_session(&self, session_id: &str) -> Result<()>;

    /// Send the whole batch in one request.
    async fn upload_files(
        &self,
        session_id: &str,
        files: &[UploadFile],
    ) -> Result<Vec<FileUploadResponse>>;

    async fn list_session_files(&self, session_id: &str) -> Result<Vec<UploadedFile>>;

    async fn get_file(&self, file_id: &str) -> Result<UploadedFile>;

    async fn delete_file(&self, file_id: &str) -> Result<()>;

    /// Kick off background analysis; progress is observed via `workflow_status`.
    async fn start_analysis(&self, session_id: &str) -> Result<AnalysisAck>;

    /// Analysis that completes inside the request.
    async fn analyze_now(&self, session_id: &str) -> Result<AnalysisAck>;

    async fn workflow_status(&self, session_id: &str) -> Result<WorkflowStatus>;

    async fn retry_analysis(&self, session_id: &str) -> Result<AnalysisAck>;

    async fn validation_results(&self, session_id: &str) -> Result<Vec<ValidationResult>>;

    async fn validation_summary(&self, session_id: &str) -> Result<ValidationSummary>;

    async fn clear_validation_results(&self, session_id: &str) -> Result<()>;
}

#[async_trait]
impl Gateway for CrosscheckClient {
    async fn create_session(&self) -> Result<Session> {
        CrosscheckClient::create_session(self).await
    }

    async fn list_sessions(&self, skip: u64, limit: u64) -> Result<SessionListResponse> {
        CrosscheckClient::list_sessions(self, skip, limit).await
    }

    async fn get_session(&self, session_id: &str) -> Result<Session> {
        CrosscheckClient::get_session(self, session_id).await
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        CrosscheckClient::delete_session(self, session_id).await
    }

    async fn upload_files(
        &self,
        session_id: &str,
        files: &[UploadFile],
    ) -> Result<Vec<FileUploadResponse>> {
        CrosscheckClient::upload_files(self, session_id, files).await
    }

    async fn list_session_files(&self, session_id: &str) -> Result<Vec<UploadedFile>> {
        CrosscheckClient::list_session_files(self, session_id).await
    }

    async fn get_file(&self, file_id: &str) -> Result<UploadedFile> {
        CrosscheckClient::get_file(self, file_id).await
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        CrosscheckClient::delete_file(self, file_id).await
    }

    async fn start_analysis(&self, session_id: &str) -> Result<AnalysisAck> {
        CrosscheckClient::start_analysis(self, session_id).await
    }

    async fn analyze_now(&self, session_id: &str) -> Result<AnalysisAck> {
        CrosscheckClient::analyze_now(self, session_id).await
    }

    async fn workflow_status(&self, session_id: &str) -> Result<WorkflowStatus> {
        CrosscheckClient::workflow_status(self, session_id).await
    }

    async fn retry_analysis(&self, session_id: &str) -> Result<AnalysisAck> {
        CrosscheckClient::retry_analysis(self, session_id).await
    }

    async fn validation_results(&self, session_id: &str) -> Result<Vec<ValidationResult>> {
        CrosscheckClient::validation_results(self, session_id).await
    }

    async fn validation_summary(&self, session_id: &str) -> Result<ValidationSummary> {
        CrosscheckClient::validation_summary(self, session_id).await
    }

    async fn clear_validation_results(&self, session_id: &str) -> Result<()> {
        CrosscheckClient::clear_validation_results(self, session_id).await
    }
}
