// Test support for the session store.
//
// MockGateway is an in-memory Gateway with:
// - scripted workflow stages per session (the last one repeats)
// - injected failures per call, persistent until recovered
// - per-call delays, consumed one per request, to reorder responses
// - a call log
//
// Plus fixture builders for sessions, files, results and statuses.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crosscheck_client::{
    AnalysisAck, CheckType, FileKind, FileUploadResponse, ProcessingStatus, ProcessingSummary,
    RemoteError, Result, Session, SessionListResponse, SessionStatus, UploadFile, UploadedFile,
    ValidationResult, ValidationSummary, Verdict, WorkflowStage, WorkflowStatus,
};

use crate::store::lock;
use crate::traits::Gateway;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Fixed instant so equal fixtures compare equal.
pub fn fixed_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default()
}

pub fn session(id: &str) -> Session {
    Session {
        id: id.to_string(),
        created_at: fixed_time(),
        updated_at: fixed_time(),
        status: SessionStatus::Uploading,
        overall_result: None,
        files: None,
        validation_results: None,
    }
}

pub fn uploaded_file(
    id: &str,
    session_id: &str,
    name: &str,
    status: ProcessingStatus,
) -> UploadedFile {
    let mime = crosscheck_client::upload::mime_for_name(name).unwrap_or("application/pdf");
    UploadedFile {
        id: id.to_string(),
        session_id: session_id.to_string(),
        filename: format!("{id}_{name}"),
        original_filename: name.to_string(),
        file_type: FileKind::from_mime(mime).unwrap_or(FileKind::TravelerPdf),
        file_size: 1024,
        mime_type: mime.to_string(),
        processing_status: status,
        processing_error: (status == ProcessingStatus::Failed)
            .then(|| "Could not extract text".to_string()),
        extracted_data: None,
        created_at: fixed_time(),
        updated_at: fixed_time(),
    }
}

pub fn validation_result(
    id: &str,
    session_id: &str,
    check_type: CheckType,
    status: Verdict,
) -> ValidationResult {
    ValidationResult {
        id: id.to_string(),
        session_id: session_id.to_string(),
        check_type,
        status,
        description: format!("{check_type:?} check"),
        source_files: None,
        expected_value: None,
        actual_value: None,
        details: None,
        created_at: fixed_time(),
    }
}

pub fn workflow_status(session_id: &str, stage: WorkflowStage) -> WorkflowStatus {
    let session_status = match stage {
        WorkflowStage::Uploading | WorkflowStage::Unknown => SessionStatus::Uploading,
        WorkflowStage::ProcessingFiles | WorkflowStage::Validating => SessionStatus::Processing,
        WorkflowStage::Completed => SessionStatus::Completed,
        WorkflowStage::Failed => SessionStatus::Failed,
    };
    WorkflowStatus {
        session_id: session_id.to_string(),
        session_status,
        overall_result: None,
        workflow_stage: stage,
        created_at: fixed_time(),
        updated_at: fixed_time(),
        processing_summary: ProcessingSummary::default(),
        validation_summary: None,
    }
}

pub fn not_found(what: &str) -> RemoteError {
    RemoteError::Api {
        status: 404,
        detail: Some(format!("{what} not found")),
    }
}

// ---------------------------------------------------------------------------
// MockGateway
// ---------------------------------------------------------------------------

/// Gateway methods, for injecting failures and delays and counting calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    CreateSession,
    ListSessions,
    GetSession,
    DeleteSession,
    UploadFiles,
    ListSessionFiles,
    GetFile,
    DeleteFile,
    StartAnalysis,
    AnalyzeNow,
    WorkflowStatus,
    RetryAnalysis,
    ValidationResults,
    ValidationSummary,
    ClearValidationResults,
}

#[derive(Default)]
struct MockData {
    sessions: BTreeMap<String, Session>,
    files: Vec<UploadedFile>,
    results: HashMap<String, Vec<ValidationResult>>,
    stages: HashMap<String, VecDeque<WorkflowStage>>,
    failures: HashMap<Call, RemoteError>,
    delays: HashMap<Call, VecDeque<Duration>>,
    calls: Vec<(Call, String)>,
    next_id: u64,
}

impl MockData {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn require_session(&self, session_id: &str) -> Result<()> {
        if self.sessions.contains_key(session_id) {
            Ok(())
        } else {
            Err(not_found("Session"))
        }
    }

    fn files_of(&self, session_id: &str) -> Vec<UploadedFile> {
        self.files
            .iter()
            .filter(|f| f.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Next scripted stage; the last one sticks.
    fn next_stage(&mut self, session_id: &str) -> WorkflowStage {
        match self.stages.get_mut(session_id) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap_or(WorkflowStage::Unknown),
            Some(script) => script.front().copied().unwrap_or(WorkflowStage::Unknown),
            None => WorkflowStage::Uploading,
        }
    }

    fn set_session_status(&mut self, session_id: &str, status: SessionStatus) {
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.status = status;
        }
    }
}

/// In-memory gateway. Builder methods consume; runtime knobs take `&self`.
#[derive(Default)]
pub struct MockGateway {
    data: Mutex<MockData>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(self, session: Session) -> Self {
        lock(&self.data)
            .sessions
            .insert(session.id.clone(), session);
        self
    }

    pub fn with_file(self, file: UploadedFile) -> Self {
        lock(&self.data).files.push(file);
        self
    }

    pub fn with_results(self, session_id: &str, results: Vec<ValidationResult>) -> Self {
        lock(&self.data)
            .results
            .insert(session_id.to_string(), results);
        self
    }

    /// Stages returned by successive `workflow_status` calls for the session.
    pub fn script_stages(&self, session_id: &str, stages: &[WorkflowStage]) {
        lock(&self.data)
            .stages
            .insert(session_id.to_string(), stages.iter().copied().collect());
    }

    /// Fail every `call` with `err` until `recover`.
    pub fn fail(&self, call: Call, err: RemoteError) {
        lock(&self.data).failures.insert(call, err);
    }

    pub fn recover(&self, call: Call) {
        lock(&self.data).failures.remove(&call);
    }

    /// Delay the next `call` by `by`. Queued delays apply in order.
    pub fn delay(&self, call: Call, by: Duration) {
        lock(&self.data)
            .delays
            .entry(call)
            .or_default()
            .push_back(by);
    }

    pub fn set_file_status(&self, file_id: &str, status: ProcessingStatus) {
        let mut data = lock(&self.data);
        if let Some(file) = data.files.iter_mut().find(|f| f.id == file_id) {
            file.processing_status = status;
        }
    }

    pub fn set_results(&self, session_id: &str, results: Vec<ValidationResult>) {
        lock(&self.data)
            .results
            .insert(session_id.to_string(), results);
    }

    pub fn calls(&self, call: Call) -> usize {
        lock(&self.data)
            .calls
            .iter()
            .filter(|(c, _)| *c == call)
            .count()
    }

    pub fn calls_for(&self, call: Call, id: &str) -> usize {
        lock(&self.data)
            .calls
            .iter()
            .filter(|(c, arg)| *c == call && arg == id)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.data).calls.len()
    }

    pub fn stored_files(&self, session_id: &str) -> Vec<UploadedFile> {
        lock(&self.data).files_of(session_id)
    }

    /// Log the call, apply any injected failure, run `f` under the lock, then
    /// wait out any queued delay with the lock released.
    async fn handle<T>(
        &self,
        call: Call,
        arg: &str,
        f: impl FnOnce(&mut MockData) -> Result<T>,
    ) -> Result<T> {
        let (outcome, delay) = {
            let mut data = lock(&self.data);
            data.calls.push((call, arg.to_string()));
            let delay = data.delays.get_mut(&call).and_then(VecDeque::pop_front);
            let outcome = match data.failures.get(&call) {
                Some(err) => Err(err.clone()),
                None => f(&mut *data),
            };
            (outcome, delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}

fn ack(message: &str, status: &str) -> AnalysisAck {
    AnalysisAck {
        message: Some(message.to_string()),
        status: Some(status.to_string()),
        extra: serde_json::Map::new(),
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn create_session(&self) -> Result<Session> {
        self.handle(Call::CreateSession, "", |data| {
            let id = data.next_id("session");
            let created = session(&id);
            data.sessions.insert(id, created.clone());
            Ok(created)
        })
        .await
    }

    async fn list_sessions(&self, skip: u64, limit: u64) -> Result<SessionListResponse> {
        self.handle(Call::ListSessions, "", |data| {
            let sessions: Vec<Session> = data
                .sessions
                .values()
                .rev()
                .skip(skip as usize)
                .take(limit as usize)
                .cloned()
                .collect();
            Ok(SessionListResponse {
                sessions,
                total: data.sessions.len() as u64,
                page: skip / limit.max(1) + 1,
                per_page: limit,
            })
        })
        .await
    }

    async fn get_session(&self, session_id: &str) -> Result<Session> {
        self.handle(Call::GetSession, session_id, |data| {
            data.sessions
                .get(session_id)
                .cloned()
                .ok_or_else(|| not_found("Session"))
        })
        .await
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.handle(Call::DeleteSession, session_id, |data| {
            data.sessions
                .remove(session_id)
                .ok_or_else(|| not_found("Session"))?;
            data.files.retain(|f| f.session_id != session_id);
            data.results.remove(session_id);
            Ok(())
        })
        .await
    }

    async fn upload_files(
        &self,
        session_id: &str,
        files: &[UploadFile],
    ) -> Result<Vec<FileUploadResponse>> {
        self.handle(Call::UploadFiles, session_id, |data| {
            data.require_session(session_id)?;
            let mut accepted = Vec::with_capacity(files.len());
            for upload in files {
                let kind = upload.kind().ok_or_else(|| RemoteError::Api {
                    status: 400,
                    detail: Some(format!("Unsupported file type: {}", upload.mime_type)),
                })?;
                let id = data.next_id("file");
                let mut stored = uploaded_file(
                    &id,
                    session_id,
                    &upload.filename,
                    ProcessingStatus::Pending,
                );
                stored.file_type = kind;
                stored.file_size = upload.size();
                stored.mime_type = upload.mime_type.clone();
                data.files.push(stored);
                accepted.push(FileUploadResponse {
                    file_id: id,
                    filename: upload.filename.clone(),
                    file_type: kind.label().to_string(),
                    status: "PENDING".to_string(),
                    message: "File uploaded successfully".to_string(),
                });
            }
            Ok(accepted)
        })
        .await
    }

    async fn list_session_files(&self, session_id: &str) -> Result<Vec<UploadedFile>> {
        self.handle(Call::ListSessionFiles, session_id, |data| {
            data.require_session(session_id)?;
            Ok(data.files_of(session_id))
        })
        .await
    }

    async fn get_file(&self, file_id: &str) -> Result<UploadedFile> {
        self.handle(Call::GetFile, file_id, |data| {
            data.files
                .iter()
                .find(|f| f.id == file_id)
                .cloned()
                .ok_or_else(|| not_found("File"))
        })
        .await
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        self.handle(Call::DeleteFile, file_id, |data| {
            let before = data.files.len();
            data.files.retain(|f| f.id != file_id);
            if data.files.len() == before {
                return Err(not_found("File"));
            }
            Ok(())
        })
        .await
    }

    async fn start_analysis(&self, session_id: &str) -> Result<AnalysisAck> {
        self.handle(Call::StartAnalysis, session_id, |data| {
            data.require_session(session_id)?;
            data.set_session_status(session_id, SessionStatus::Processing);
            Ok(ack("Analysis started", "processing"))
        })
        .await
    }

    async fn analyze_now(&self, session_id: &str) -> Result<AnalysisAck> {
        self.handle(Call::AnalyzeNow, session_id, |data| {
            data.require_session(session_id)?;
            data.set_session_status(session_id, SessionStatus::Completed);
            data.stages
                .insert(session_id.to_string(), VecDeque::from([WorkflowStage::Completed]));
            Ok(ack("Analysis completed", "completed"))
        })
        .await
    }

    async fn workflow_status(&self, session_id: &str) -> Result<WorkflowStatus> {
        self.handle(Call::WorkflowStatus, session_id, |data| {
            data.require_session(session_id)?;
            let stage = data.next_stage(session_id);
            let mut status = workflow_status(session_id, stage);
            let files = data.files_of(session_id);
            status.processing_summary.total_files = files.len() as u32;
            for file in &files {
                let key = format!("{:?}", file.processing_status).to_uppercase();
                *status.processing_summary.by_status.entry(key).or_default() += 1;
            }
            Ok(status)
        })
        .await
    }

    async fn retry_analysis(&self, session_id: &str) -> Result<AnalysisAck> {
        self.handle(Call::RetryAnalysis, session_id, |data| {
            data.require_session(session_id)?;
            for file in data.files.iter_mut().filter(|f| f.session_id == session_id) {
                if file.processing_status == ProcessingStatus::Failed {
                    file.processing_status = ProcessingStatus::Pending;
                    file.processing_error = None;
                }
            }
            data.set_session_status(session_id, SessionStatus::Processing);
            Ok(ack("Retry started", "processing"))
        })
        .await
    }

    async fn validation_results(&self, session_id: &str) -> Result<Vec<ValidationResult>> {
        self.handle(Call::ValidationResults, session_id, |data| {
            data.require_session(session_id)?;
            Ok(data.results.get(session_id).cloned().unwrap_or_default())
        })
        .await
    }

    async fn validation_summary(&self, session_id: &str) -> Result<ValidationSummary> {
        self.handle(Call::ValidationSummary, session_id, |data| {
            data.require_session(session_id)?;
            let results = data.results.get(session_id).cloned().unwrap_or_default();
            let count = |verdict: Verdict| results.iter().filter(|r| r.status == verdict).count() as u32;
            let summary = ValidationSummary {
                total_checks: results.len() as u32,
                passed: count(Verdict::Pass),
                warnings: count(Verdict::Warning),
                failed: count(Verdict::Fail),
                overall_result: None,
            };
            Ok(summary)
        })
        .await
    }

    async fn clear_validation_results(&self, session_id: &str) -> Result<()> {
        self.handle(Call::ClearValidationResults, session_id, |data| {
            data.require_session(session_id)?;
            data.results.remove(session_id);
            Ok(())
        })
        .await
    }
}
