//! The published state value.
//!
//! Readers receive `Arc<SessionState>` snapshots. A snapshot never changes once
//! published; every transition publishes a new one.

use std::collections::BTreeMap;

use crosscheck_client::{
    ProcessingStatus, Session, UploadedFile, ValidationResult, ValidationSummary, Verdict,
    WorkflowStage, WorkflowStatus,
};

use crate::error::StoreError;

/// Lifecycle of the workflow poll loop for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollPhase {
    #[default]
    Idle,
    Polling,
    Completed,
    Failed,
}

/// Operation families that report an in-flight indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Creating,
    Loading,
    Listing,
    Uploading,
    Deleting,
    LoadingResults,
    LoadingStatus,
}

/// In-flight indicators. Counted, so overlapping calls of one family keep the
/// indicator raised until the last of them settles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InFlight {
    creating: u32,
    loading: u32,
    listing: u32,
    uploading: u32,
    deleting: u32,
    loading_results: u32,
    loading_status: u32,
}

impl InFlight {
    fn counter(&mut self, family: Family) -> &mut u32 {
        match family {
            Family::Creating => &mut self.creating,
            Family::Loading => &mut self.loading,
            Family::Listing => &mut self.listing,
            Family::Uploading => &mut self.uploading,
            Family::Deleting => &mut self.deleting,
            Family::LoadingResults => &mut self.loading_results,
            Family::LoadingStatus => &mut self.loading_status,
        }
    }

    pub(crate) fn begin(&mut self, family: Family) {
        *self.counter(family) += 1;
    }

    pub(crate) fn end(&mut self, family: Family) {
        let counter = self.counter(family);
        *counter = counter.saturating_sub(1);
    }

    pub fn is(&self, family: Family) -> bool {
        let count = match family {
            Family::Creating => self.creating,
            Family::Loading => self.loading,
            Family::Listing => self.listing,
            Family::Uploading => self.uploading,
            Family::Deleting => self.deleting,
            Family::LoadingResults => self.loading_results,
            Family::LoadingStatus => self.loading_status,
        };
        count > 0
    }

    pub fn is_creating(&self) -> bool {
        self.is(Family::Creating)
    }

    pub fn is_loading(&self) -> bool {
        self.is(Family::Loading)
    }

    pub fn is_listing(&self) -> bool {
        self.is(Family::Listing)
    }

    pub fn is_uploading(&self) -> bool {
        self.is(Family::Uploading)
    }

    pub fn is_deleting(&self) -> bool {
        self.is(Family::Deleting)
    }

    pub fn is_loading_results(&self) -> bool {
        self.is(Family::LoadingResults)
    }

    pub fn is_loading_status(&self) -> bool {
        self.is(Family::LoadingStatus)
    }

    pub fn any(&self) -> bool {
        *self != InFlight::default()
    }
}

/// Pass / warning / fail tallies over a result set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultCounts {
    pub pass: usize,
    pub warning: usize,
    pub fail: usize,
}

/// Everything the store knows about one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionScope {
    pub session: Option<Session>,
    pub files: Vec<UploadedFile>,
    pub validation_results: Vec<ValidationResult>,
    pub validation_summary: Option<ValidationSummary>,
    pub workflow_status: Option<WorkflowStatus>,
    /// Raised from the moment analysis is requested until a terminal stage or an error.
    pub analyzing: bool,
    pub poll: PollPhase,
}

impl SessionScope {
    pub(crate) fn for_session(session: Session) -> Self {
        Self {
            session: Some(session),
            ..Self::default()
        }
    }

    pub fn stage(&self) -> Option<WorkflowStage> {
        self.workflow_status.as_ref().map(|s| s.workflow_stage)
    }

    pub fn file(&self, file_id: &str) -> Option<&UploadedFile> {
        self.files.iter().find(|f| f.id == file_id)
    }

    pub fn has_failed_files(&self) -> bool {
        self.files.iter().any(UploadedFile::is_failed)
    }

    /// A retry makes sense when a file failed or the workflow ended in failure.
    pub fn can_retry(&self) -> bool {
        self.has_failed_files() || self.stage() == Some(WorkflowStage::Failed)
    }

    pub fn files_in(&self, status: ProcessingStatus) -> usize {
        self.files
            .iter()
            .filter(|f| f.processing_status == status)
            .count()
    }

    pub fn result_counts(&self) -> ResultCounts {
        self.validation_results
            .iter()
            .fold(ResultCounts::default(), |mut counts, result| {
                match result.status {
                    Verdict::Pass => counts.pass += 1,
                    Verdict::Warning => counts.warning += 1,
                    Verdict::Fail => counts.fail += 1,
                }
                counts
            })
    }
}

/// One published snapshot of the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    /// The session the user is looking at.
    pub current_id: Option<String>,
    pub scopes: BTreeMap<String, SessionScope>,
    /// History listing, independent of the current session.
    pub sessions: Vec<Session>,
    pub sessions_total: u64,
    pub in_flight: InFlight,
    pub error: Option<StoreError>,
}

impl SessionState {
    pub fn scope(&self, session_id: &str) -> Option<&SessionScope> {
        self.scopes.get(session_id)
    }

    pub fn current(&self) -> Option<&SessionScope> {
        self.current_id.as_deref().and_then(|id| self.scopes.get(id))
    }

    pub fn current_session(&self) -> Option<&Session> {
        self.current().and_then(|scope| scope.session.as_ref())
    }

    pub fn files(&self) -> &[UploadedFile] {
        self.current()
            .map(|scope| scope.files.as_slice())
            .unwrap_or_default()
    }

    pub fn validation_results(&self) -> &[ValidationResult] {
        self.current()
            .map(|scope| scope.validation_results.as_slice())
            .unwrap_or_default()
    }

    pub fn workflow_status(&self) -> Option<&WorkflowStatus> {
        self.current().and_then(|scope| scope.workflow_status.as_ref())
    }

    pub fn stage(&self) -> Option<WorkflowStage> {
        self.current().and_then(SessionScope::stage)
    }

    pub fn has_failed_files(&self) -> bool {
        self.current().is_some_and(SessionScope::has_failed_files)
    }

    pub fn can_retry(&self) -> bool {
        self.current().is_some_and(SessionScope::can_retry)
    }

    /// True while any session has analysis running.
    pub fn is_analyzing(&self) -> bool {
        self.scopes.values().any(|scope| scope.analyzing)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    /// Locate a file in whichever scope holds it.
    pub fn find_file(&self, file_id: &str) -> Option<&UploadedFile> {
        self.scopes.values().find_map(|scope| scope.file(file_id))
    }

    pub(crate) fn scope_mut(&mut self, session_id: &str) -> &mut SessionScope {
        self.scopes.entry(session_id.to_string()).or_default()
    }
}
