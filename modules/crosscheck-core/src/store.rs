//! The session store: single writer of `SessionState`.
//!
//! Operations issue gateway calls, then merge results under one lock and
//! publish a fresh snapshot. No operation returns an error; failures land in
//! `SessionState::error` and the return value says whether the call succeeded.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crosscheck_client::{
    validate_selection, CrosscheckClient, ProcessingStatus, RemoteError, Session, UploadFile,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, StoreConfig};
use crate::error::{Operation, StoreError};
use crate::poller::PollerRegistry;
use crate::sequence::{Sequencer, Slot, Tickets, GLOBAL};
use crate::state::{Family, PollPhase, SessionScope, SessionState};
use crate::traits::Gateway;

/// Shared handle to the store. Cheap to clone; all clones drive the same state.
#[derive(Clone)]
pub struct SessionStore {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) gateway: Arc<dyn Gateway>,
    pub(crate) config: StoreConfig,
    pub(crate) pollers: PollerRegistry,
    pub(crate) tickets: Tickets,
    shared: Mutex<Shared>,
    tx: watch::Sender<Arc<SessionState>>,
}

#[derive(Default)]
struct Shared {
    state: SessionState,
    seq: Sequencer,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    /// Apply `f` to the authoritative state and publish the result.
    ///
    /// The lock is held for the merge and the publish, so snapshots go out in
    /// the order merges happen. Never call this across an `.await`.
    pub(crate) fn commit<R>(&self, f: impl FnOnce(&mut SessionState, &mut Sequencer) -> R) -> R {
        let mut shared = lock(&self.shared);
        let Shared { state, seq } = &mut *shared;
        let out = f(state, seq);
        self.tx.send_if_modified(|published| {
            if **published == *state {
                return false;
            }
            *published = Arc::new(state.clone());
            true
        });
        out
    }

    pub(crate) fn begin(&self, family: Family) -> Flight<'_> {
        self.commit(|state, _| state.in_flight.begin(family));
        Flight {
            inner: self,
            family,
            armed: true,
        }
    }

    pub(crate) fn record(&self, operation: Operation, err: &RemoteError) {
        warn!(?operation, error = %err, "Store operation failed");
        self.commit(|state, _| state.error = Some(StoreError::from_remote(operation, err)));
    }

    /// Record a refusal decided locally, before any network call.
    pub(crate) fn reject(&self, operation: Operation, reason: impl Into<String>) {
        let error = StoreError::rejected(operation, reason);
        warn!(?operation, reason = %error.message, "Store operation refused");
        self.commit(|state, _| state.error = Some(error));
    }

    /// Forget `session_id`: cancel its poll loop, fence off every response
    /// issued so far and drop its scope. Call from inside a commit.
    fn release_scope(
        &self,
        state: &mut SessionState,
        seq: &mut Sequencer,
        session_id: &str,
    ) -> bool {
        let cancelled = self.pollers.cancel(session_id);
        seq.fence(session_id, self.tickets.latest());
        state.scopes.remove(session_id);
        cancelled
    }

    /// Make `session_id` current. The session it replaces is released.
    fn select(&self, state: &mut SessionState, seq: &mut Sequencer, session_id: &str) {
        match state.current_id.replace(session_id.to_string()) {
            Some(previous) if previous != session_id => {
                let cancelled = self.release_scope(state, seq, &previous);
                info!(session_id = %previous, poll_cancelled = cancelled, "Left session");
            }
            _ => {}
        }
    }
}

/// Raises an in-flight indicator and lowers it when finished or dropped.
pub(crate) struct Flight<'a> {
    inner: &'a Inner,
    family: Family,
    armed: bool,
}

impl Flight<'_> {
    /// Lower the indicator and apply `f` in the same publish.
    pub(crate) fn finish<R>(
        mut self,
        f: impl FnOnce(&mut SessionState, &mut Sequencer) -> R,
    ) -> R {
        self.armed = false;
        let family = self.family;
        self.inner.commit(|state, seq| {
            state.in_flight.end(family);
            f(state, seq)
        })
    }

    pub(crate) fn fail(self, operation: Operation, err: &RemoteError) {
        warn!(?operation, error = %err, "Store operation failed");
        self.finish(|state, _| state.error = Some(StoreError::from_remote(operation, err)));
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        if self.armed {
            let family = self.family;
            self.inner.commit(|state, _| state.in_flight.end(family));
        }
    }
}

impl SessionStore {
    pub fn new(gateway: Arc<dyn Gateway>, config: StoreConfig) -> Self {
        let (tx, _) = watch::channel(Arc::new(SessionState::default()));
        Self {
            inner: Arc::new(Inner {
                gateway,
                config,
                pollers: PollerRegistry::default(),
                tickets: Tickets::default(),
                shared: Mutex::new(Shared::default()),
                tx,
            }),
        }
    }

    /// Store backed by the HTTP gateway.
    pub fn from_config(config: &Config) -> Result<Self, RemoteError> {
        let client = CrosscheckClient::new(&config.client)?;
        Ok(Self::new(Arc::new(client), config.store.clone()))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Receiver that wakes on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionState>> {
        self.inner.tx.subscribe()
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> Arc<SessionState> {
        self.inner.tx.borrow().clone()
    }

    /// True while a poll loop is running or starting for `session_id`.
    pub fn is_polling(&self, session_id: &str) -> bool {
        self.inner.pollers.is_active(session_id)
    }

    // --- Sessions ---

    /// Create a session and make it current, starting from an empty scope.
    /// The previously current session is released.
    pub async fn create_session(&self) -> Option<Session> {
        let flight = self.inner.begin(Family::Creating);
        let ticket = self.inner.tickets.issue();

        match self.inner.gateway.create_session().await {
            Ok(session) => {
                info!(session_id = %session.id, "Session created");
                flight.finish(|state, seq| {
                    state
                        .scopes
                        .insert(session.id.clone(), SessionScope::for_session(session.clone()));
                    if seq.accept(GLOBAL, Slot::Selection, ticket) {
                        self.inner.select(state, seq, &session.id);
                    }
                    state.error = None;
                });
                Some(session)
            }
            Err(err) => {
                flight.fail(Operation::CreateSession, &err);
                None
            }
        }
    }

    /// Fetch a session and its files, and make it current.
    ///
    /// Both fetches run concurrently and merge in one publish. If either fails
    /// nothing is merged. Selecting a different session releases the previous
    /// one the way `clear_session` does.
    pub async fn load_session(&self, session_id: &str) -> bool {
        if !self.check_id(Operation::LoadSession, session_id) {
            return false;
        }
        let flight = self.inner.begin(Family::Loading);
        let ticket = self.inner.tickets.issue();

        let gateway = &self.inner.gateway;
        let (session, files) = futures::join!(
            gateway.get_session(session_id),
            gateway.list_session_files(session_id)
        );
        let (session, files) = match (session, files) {
            (Ok(session), Ok(files)) => (session, files),
            (Err(err), _) | (_, Err(err)) => {
                flight.fail(Operation::LoadSession, &err);
                return false;
            }
        };

        debug!(session_id, files = files.len(), "Session loaded");
        flight.finish(|state, seq| {
            if !seq.live(session_id, ticket) {
                debug!(session_id, "Session was cleared while loading, dropping result");
                return;
            }
            let take_session = seq.accept(session_id, Slot::Session, ticket);
            let take_files = seq.accept(session_id, Slot::Files, ticket);
            let take_selection = seq.accept(GLOBAL, Slot::Selection, ticket);
            if !(take_session || take_files || take_selection) {
                return;
            }
            let scope = state.scope_mut(session_id);
            if take_session {
                scope.session = Some(session);
            }
            if take_files {
                scope.files = files;
            }
            if take_selection {
                self.inner.select(state, seq, session_id);
            }
            state.error = None;
        });
        true
    }

    /// Refresh the history listing. Does not touch the current session.
    pub async fn load_sessions(&self) -> bool {
        let flight = self.inner.begin(Family::Listing);
        let ticket = self.inner.tickets.issue();

        match self
            .inner
            .gateway
            .list_sessions(0, self.inner.config.page_size)
            .await
        {
            Ok(page) => {
                debug!(count = page.sessions.len(), total = page.total, "Sessions listed");
                flight.finish(|state, seq| {
                    if seq.accept(GLOBAL, Slot::History, ticket) {
                        state.sessions = page.sessions;
                        state.sessions_total = page.total;
                        state.error = None;
                    }
                });
                true
            }
            Err(err) => {
                flight.fail(Operation::LoadSessions, &err);
                false
            }
        }
    }

    /// Delete a session remotely and forget everything held for it.
    pub async fn delete_session(&self, session_id: &str) -> bool {
        if !self.check_id(Operation::DeleteSession, session_id) {
            return false;
        }
        let flight = self.inner.begin(Family::Deleting);

        if let Err(err) = self.inner.gateway.delete_session(session_id).await {
            flight.fail(Operation::DeleteSession, &err);
            return false;
        }

        info!(session_id, "Session deleted");
        flight.finish(|state, seq| {
            self.inner.release_scope(state, seq, session_id);
            let before = state.sessions.len();
            state.sessions.retain(|s| s.id != session_id);
            if state.sessions.len() < before {
                state.sessions_total = state.sessions_total.saturating_sub(1);
            }
            if state.current_id.as_deref() == Some(session_id) {
                state.current_id = None;
            }
            state.error = None;
        });
        true
    }

    /// Leave the current session: stop its poll loop and drop its scope.
    ///
    /// Responses still in flight for it are discarded when they arrive. The
    /// history listing is kept.
    pub fn clear_session(&self) {
        let upto = self.inner.tickets.latest();
        let cleared = self.inner.commit(|state, seq| {
            seq.advance(GLOBAL, Slot::Selection, upto);
            state.error = None;
            let id = state.current_id.take()?;
            let cancelled = self.inner.release_scope(state, seq, &id);
            Some((id, cancelled))
        });

        if let Some((session_id, cancelled)) = cleared {
            info!(%session_id, poll_cancelled = cancelled, "Session cleared");
        }
    }

    // --- Files ---

    /// Upload a batch, then re-read the authoritative file list.
    ///
    /// Returns true once the upload is accepted, even if the follow-up refresh
    /// fails (that failure is still recorded).
    pub async fn upload_files(&self, session_id: &str, files: &[UploadFile]) -> bool {
        if !self.check_id(Operation::UploadFiles, session_id) {
            return false;
        }
        if let Err(err) = validate_selection(files, &self.inner.config.upload_limits) {
            self.inner.record(Operation::UploadFiles, &err);
            return false;
        }
        let flight = self.inner.begin(Family::Uploading);

        let uploaded = match self.inner.gateway.upload_files(session_id, files).await {
            Ok(uploaded) => uploaded,
            Err(err) => {
                flight.fail(Operation::UploadFiles, &err);
                return false;
            }
        };
        info!(session_id, count = uploaded.len(), "Files uploaded");

        let ticket = self.inner.tickets.issue();
        match self.inner.gateway.list_session_files(session_id).await {
            Ok(listed) => flight.finish(|state, seq| {
                if seq.accept(session_id, Slot::Files, ticket) {
                    state.scope_mut(session_id).files = listed;
                    state.error = None;
                }
            }),
            Err(err) => flight.fail(Operation::LoadFiles, &err),
        }
        true
    }

    /// Re-read one file and replace it in its session's list.
    pub async fn load_file(&self, file_id: &str) -> bool {
        if !self.check_id(Operation::LoadFile, file_id) {
            return false;
        }
        let flight = self.inner.begin(Family::Loading);
        let ticket = self.inner.tickets.issue();

        match self.inner.gateway.get_file(file_id).await {
            Ok(file) => {
                flight.finish(|state, seq| {
                    let session_id = file.session_id.clone();
                    let Some(scope) = state.scopes.get_mut(&session_id) else {
                        return;
                    };
                    if !seq.accept(&session_id, Slot::Files, ticket) {
                        return;
                    }
                    match scope.files.iter_mut().find(|f| f.id == file.id) {
                        Some(existing) => *existing = file,
                        None => scope.files.push(file),
                    }
                    state.error = None;
                });
                true
            }
            Err(err) => {
                flight.fail(Operation::LoadFile, &err);
                false
            }
        }
    }

    /// Delete a file.
    ///
    /// A file the store last saw in PROCESSING is refused without a network
    /// call. Otherwise the file is deleted remotely, filtered out locally once
    /// the server confirms, and the session's list is then re-read.
    pub async fn delete_file(&self, file_id: &str) -> bool {
        if !self.check_id(Operation::DeleteFile, file_id) {
            return false;
        }

        let known = self
            .snapshot()
            .find_file(file_id)
            .map(|f| (f.session_id.clone(), f.original_filename.clone(), f.processing_status));
        if let Some((_, name, ProcessingStatus::Processing)) = &known {
            self.inner.reject(
                Operation::DeleteFile,
                format!("{name} is still being processed and cannot be deleted yet"),
            );
            return false;
        }

        let flight = self.inner.begin(Family::Deleting);
        if let Err(err) = self.inner.gateway.delete_file(file_id).await {
            flight.fail(Operation::DeleteFile, &err);
            return false;
        }
        info!(file_id, "File deleted");

        let Some((session_id, _, _)) = known else {
            flight.finish(|state, _| state.error = None);
            return true;
        };

        let filter_ticket = self.inner.tickets.issue();
        self.inner.commit(|state, seq| {
            seq.advance(&session_id, Slot::Files, filter_ticket);
            if let Some(scope) = state.scopes.get_mut(&session_id) {
                scope.files.retain(|f| f.id != file_id);
            }
            state.error = None;
        });

        let ticket = self.inner.tickets.issue();
        match self.inner.gateway.list_session_files(&session_id).await {
            Ok(listed) => flight.finish(|state, seq| {
                if seq.accept(&session_id, Slot::Files, ticket) {
                    if let Some(scope) = state.scopes.get_mut(&session_id) {
                        scope.files = listed;
                    }
                }
            }),
            Err(err) => flight.fail(Operation::LoadFiles, &err),
        }
        true
    }

    // --- Workflow ---

    /// Start server-side analysis and poll its progress until a terminal stage.
    ///
    /// A second call while a loop is already running for the session does
    /// nothing and reports success.
    pub async fn run_analysis(&self, session_id: &str) -> bool {
        if !self.check_id(Operation::RunAnalysis, session_id) {
            return false;
        }
        let ticket = self.inner.tickets.issue();
        let Some(reservation) = self.reserve_poller(session_id, ticket) else {
            debug!(session_id, "Poll loop already active, not starting another");
            return true;
        };

        match self.inner.gateway.start_analysis(session_id).await {
            Ok(ack) => {
                info!(
                    session_id,
                    message = ack.message.as_deref().unwrap_or_default(),
                    "Analysis started"
                );
                self.inner.commit(|state, _| state.error = None);
                reservation.launch(self, self.inner.config.poll_initial_delay);
                true
            }
            Err(err) => {
                warn!(session_id, error = %err, "Failed to start analysis");
                reservation.abort(|state| {
                    state.error = Some(StoreError::from_remote(Operation::RunAnalysis, &err));
                });
                false
            }
        }
    }

    /// Ask the server to retry, refresh status once, then resume polling.
    ///
    /// The poll loop's first tick comes one interval after the refresh. If a
    /// loop is already running it keeps ownership of the session. That loop
    /// may settle while the retry is in flight, so the slot is claimed again
    /// once the refresh shows the workflow still running.
    pub async fn retry_analysis(&self, session_id: &str) -> bool {
        if !self.check_id(Operation::RetryAnalysis, session_id) {
            return false;
        }
        let ticket = self.inner.tickets.issue();
        let reservation = self.reserve_poller(session_id, ticket);

        if let Err(err) = self.inner.gateway.retry_analysis(session_id).await {
            warn!(session_id, error = %err, "Failed to retry analysis");
            let error = StoreError::from_remote(Operation::RetryAnalysis, &err);
            match reservation {
                Some(reservation) => reservation.abort(|state| state.error = Some(error)),
                None => self.inner.commit(|state, _| state.error = Some(error)),
            }
            return false;
        }
        info!(session_id, "Retry accepted");

        let refreshed = self.load_workflow_status(session_id).await;
        let reservation = match reservation {
            Some(reservation) => Some(reservation),
            None if refreshed && self.is_running(session_id) => {
                let again = self.reserve_poller(session_id, ticket);
                if again.is_some() {
                    debug!(session_id, "Earlier poll loop settled during the retry");
                }
                again
            }
            None => None,
        };
        match reservation {
            Some(reservation) => reservation.launch(self, self.inner.config.poll_interval),
            None => debug!(session_id, "Poll loop already active, it will observe the retry"),
        }
        refreshed
    }

    /// Run analysis synchronously on the server, then refresh status and results.
    pub async fn analyze_now(&self, session_id: &str) -> bool {
        if !self.check_id(Operation::AnalyzeNow, session_id) {
            return false;
        }
        let ticket = self.inner.tickets.issue();
        let reservation = self.reserve_poller(session_id, ticket);

        let outcome = self.inner.gateway.analyze_now(session_id).await;
        // Nothing to poll afterwards; dropping the reservation lowers `analyzing`.
        drop(reservation);

        if let Err(err) = outcome {
            self.inner.record(Operation::AnalyzeNow, &err);
            return false;
        }
        info!(session_id, "Synchronous analysis finished");

        let status = self.load_workflow_status(session_id).await;
        let results = self.load_validation_results(session_id).await;
        status && results
    }

    /// One-shot workflow status refresh.
    pub async fn load_workflow_status(&self, session_id: &str) -> bool {
        if !self.check_id(Operation::LoadWorkflowStatus, session_id) {
            return false;
        }
        let flight = self.inner.begin(Family::LoadingStatus);
        let ticket = self.inner.tickets.issue();

        match self.inner.gateway.workflow_status(session_id).await {
            Ok(status) => {
                debug!(session_id, stage = %status.workflow_stage, "Workflow status loaded");
                flight.finish(|state, seq| {
                    if seq.accept(session_id, Slot::Workflow, ticket) {
                        state.scope_mut(session_id).workflow_status = Some(status);
                        state.error = None;
                    }
                });
                true
            }
            Err(err) => {
                flight.fail(Operation::LoadWorkflowStatus, &err);
                false
            }
        }
    }

    // --- Validation ---

    /// One-shot validation results refresh. Replaces the whole result set.
    pub async fn load_validation_results(&self, session_id: &str) -> bool {
        if !self.check_id(Operation::LoadValidationResults, session_id) {
            return false;
        }
        self.refresh_validation_results(session_id, None).await
    }

    /// Shared by the public refresh and the poll loop. With a token, the merge
    /// is skipped once the token is cancelled.
    pub(crate) async fn refresh_validation_results(
        &self,
        session_id: &str,
        guard: Option<&CancellationToken>,
    ) -> bool {
        let flight = self.inner.begin(Family::LoadingResults);
        let ticket = self.inner.tickets.issue();

        match self.inner.gateway.validation_results(session_id).await {
            Ok(results) => {
                debug!(session_id, count = results.len(), "Validation results loaded");
                flight.finish(|state, seq| {
                    if guard.is_some_and(CancellationToken::is_cancelled) {
                        return;
                    }
                    if seq.accept(session_id, Slot::Validation, ticket) {
                        state.scope_mut(session_id).validation_results = results;
                        state.error = None;
                    }
                });
                true
            }
            Err(err) => {
                flight.fail(Operation::LoadValidationResults, &err);
                false
            }
        }
    }

    pub async fn load_validation_summary(&self, session_id: &str) -> bool {
        if !self.check_id(Operation::LoadValidationSummary, session_id) {
            return false;
        }
        let flight = self.inner.begin(Family::LoadingResults);
        let ticket = self.inner.tickets.issue();

        match self.inner.gateway.validation_summary(session_id).await {
            Ok(summary) => {
                flight.finish(|state, seq| {
                    if seq.accept(session_id, Slot::Summary, ticket) {
                        state.scope_mut(session_id).validation_summary = Some(summary);
                        state.error = None;
                    }
                });
                true
            }
            Err(err) => {
                flight.fail(Operation::LoadValidationSummary, &err);
                false
            }
        }
    }

    /// Delete the session's results on the server and empty them locally.
    pub async fn clear_validation_results(&self, session_id: &str) -> bool {
        if !self.check_id(Operation::ClearValidationResults, session_id) {
            return false;
        }
        let flight = self.inner.begin(Family::Deleting);

        if let Err(err) = self.inner.gateway.clear_validation_results(session_id).await {
            flight.fail(Operation::ClearValidationResults, &err);
            return false;
        }

        info!(session_id, "Validation results cleared");
        let ticket = self.inner.tickets.issue();
        flight.finish(|state, seq| {
            seq.advance(session_id, Slot::Validation, ticket);
            seq.advance(session_id, Slot::Summary, ticket);
            if let Some(scope) = state.scopes.get_mut(session_id) {
                scope.validation_results.clear();
                scope.validation_summary = None;
            }
            state.error = None;
        });
        true
    }

    // --- Errors ---

    pub fn set_error(&self, message: Option<String>) {
        self.inner
            .commit(|state, _| state.error = message.map(StoreError::manual));
    }

    pub fn clear_error(&self) {
        self.set_error(None);
    }

    // --- Lifecycle ---

    /// Wait until no poll loop is running for `session_id`, returning the
    /// snapshot that showed it.
    pub async fn wait_for_poll(&self, session_id: &str) -> Arc<SessionState> {
        let mut rx = self.subscribe();
        let settled = rx
            .wait_for(|state| {
                state
                    .scope(session_id)
                    .is_none_or(|scope| scope.poll != PollPhase::Polling)
            })
            .await
            .map(|snapshot| snapshot.clone());
        settled.unwrap_or_else(|_| self.snapshot())
    }

    /// Stop every poll loop and wait for them to exit.
    pub async fn shutdown(&self) {
        let drained = self.inner.pollers.drain();
        if drained.is_empty() {
            return;
        }
        info!(loops = drained.len(), "Stopping poll loops");

        self.inner.commit(|state, _| {
            for scope in state.scopes.values_mut() {
                scope.analyzing = false;
                if scope.poll == PollPhase::Polling {
                    scope.poll = PollPhase::Idle;
                }
            }
        });

        for (session_id, task) in drained {
            if let Some(task) = task {
                if let Err(e) = task.await {
                    warn!(%session_id, error = %e, "Poll loop task join failed");
                }
            }
        }
    }

    /// True if the last status merged for `session_id` is non-terminal.
    fn is_running(&self, session_id: &str) -> bool {
        self.snapshot()
            .scope(session_id)
            .and_then(|scope| scope.stage())
            .is_some_and(|stage| !stage.is_terminal())
    }

    fn check_id(&self, operation: Operation, id: &str) -> bool {
        if id.trim().is_empty() {
            self.inner.reject(operation, "An id is required");
            return false;
        }
        true
    }
}
