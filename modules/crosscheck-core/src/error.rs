use crosscheck_client::RemoteError;
use thiserror::Error;

/// The store operation a recorded error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateSession,
    LoadSession,
    LoadSessions,
    DeleteSession,
    UploadFiles,
    LoadFiles,
    LoadFile,
    DeleteFile,
    RunAnalysis,
    AnalyzeNow,
    RetryAnalysis,
    PollWorkflow,
    LoadWorkflowStatus,
    LoadValidationResults,
    LoadValidationSummary,
    ClearValidationResults,
    /// Set explicitly by presentation code.
    Manual,
}

impl Operation {
    /// Shown when the failure carries no message of its own.
    pub fn fallback_message(self) -> &'static str {
        match self {
            Operation::CreateSession => "Failed to create session",
            Operation::LoadSession => "Failed to load session",
            Operation::LoadSessions => "Failed to load sessions",
            Operation::DeleteSession => "Failed to delete session",
            Operation::UploadFiles => "Failed to upload files",
            Operation::LoadFiles => "Failed to refresh files",
            Operation::LoadFile => "Failed to load file",
            Operation::DeleteFile => "Failed to delete file",
            Operation::RunAnalysis => "Failed to start analysis",
            Operation::AnalyzeNow => "Failed to run analysis",
            Operation::RetryAnalysis => "Failed to retry analysis",
            Operation::PollWorkflow => "Lost track of analysis progress",
            Operation::LoadWorkflowStatus => "Failed to load workflow status",
            Operation::LoadValidationResults => "Failed to load validation results",
            Operation::LoadValidationSummary => "Failed to load validation summary",
            Operation::ClearValidationResults => "Failed to clear validation results",
            Operation::Manual => "Something went wrong",
        }
    }
}

/// The most recent failure, as held in published state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StoreError {
    pub operation: Operation,
    pub status_code: Option<u16>,
    pub message: String,
}

impl StoreError {
    pub fn from_remote(operation: Operation, err: &RemoteError) -> Self {
        Self {
            operation,
            status_code: err.status_code(),
            message: err
                .server_message()
                .unwrap_or(operation.fallback_message())
                .to_string(),
        }
    }

    pub fn manual(message: impl Into<String>) -> Self {
        Self {
            operation: Operation::Manual,
            status_code: None,
            message: message.into(),
        }
    }

    pub(crate) fn rejected(operation: Operation, reason: impl Into<String>) -> Self {
        Self::from_remote(operation, &RemoteError::Validation(reason.into()))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got {value:?}")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}
