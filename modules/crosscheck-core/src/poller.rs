//! Workflow status poll loops, at most one per session.
//!
//! A loop is registered before analysis is requested so a second request for
//! the same session sees it and backs off. Every terminal path releases the
//! registration inside the same commit that settles the session's poll phase.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crosscheck_client::WorkflowStage;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Operation, StoreError};
use crate::sequence::Slot;
use crate::state::{Family, PollPhase, SessionState};
use crate::store::{lock, Inner, SessionStore};

#[derive(Debug, Clone)]
pub(crate) struct Registration {
    pub session_id: String,
    pub generation: u64,
    pub token: CancellationToken,
}

struct PollerEntry {
    generation: u64,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
pub(crate) struct PollerRegistry {
    entries: Mutex<HashMap<String, PollerEntry>>,
    generations: AtomicU64,
}

impl PollerRegistry {
    /// Claim the session's slot. None if a loop already holds it.
    pub fn reserve(&self, session_id: &str) -> Option<Registration> {
        let mut entries = lock(&self.entries);
        if entries.contains_key(session_id) {
            return None;
        }
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        entries.insert(
            session_id.to_string(),
            PollerEntry {
                generation,
                token: token.clone(),
                task: None,
            },
        );
        Some(Registration {
            session_id: session_id.to_string(),
            generation,
            token,
        })
    }

    /// Hand the spawned task to the registry. If the loop already ended the
    /// handle is simply dropped.
    pub fn attach(&self, registration: &Registration, task: JoinHandle<()>) {
        let mut entries = lock(&self.entries);
        if let Some(entry) = entries.get_mut(&registration.session_id) {
            if entry.generation == registration.generation {
                entry.task = Some(task);
            }
        }
    }

    /// Free the slot if it still belongs to this registration.
    pub fn release(&self, registration: &Registration) {
        let mut entries = lock(&self.entries);
        let owned = entries
            .get(&registration.session_id)
            .is_some_and(|entry| entry.generation == registration.generation);
        if owned {
            entries.remove(&registration.session_id);
        }
    }

    /// Cancel and forget the session's loop. Returns whether one existed.
    pub fn cancel(&self, session_id: &str) -> bool {
        match lock(&self.entries).remove(session_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every loop and hand back their tasks.
    pub fn drain(&self) -> Vec<(String, Option<JoinHandle<()>>)> {
        lock(&self.entries)
            .drain()
            .map(|(session_id, entry)| {
                entry.token.cancel();
                (session_id, entry.task)
            })
            .collect()
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        lock(&self.entries).contains_key(session_id)
    }
}

/// A claimed but not yet running poll loop.
///
/// Dropping it without `launch` frees the slot and lowers the session's
/// analyzing flag, which also covers a caller whose future is dropped.
pub(crate) struct Reservation<'a> {
    inner: &'a Inner,
    registration: Option<Registration>,
}

impl Reservation<'_> {
    /// Spawn the loop; its first tick runs after `first_delay`.
    pub fn launch(mut self, store: &SessionStore, first_delay: Duration) {
        let Some(registration) = self.registration.take() else {
            return;
        };
        if registration.token.is_cancelled() {
            debug!(session_id = %registration.session_id, "Session went away before polling began");
            return;
        }
        let task = tokio::spawn(poll_loop(store.clone(), registration.clone(), first_delay));
        self.inner.pollers.attach(&registration, task);
    }

    /// Give the slot back, applying `update` in the same publish.
    pub fn abort(mut self, update: impl FnOnce(&mut SessionState)) {
        if let Some(registration) = self.registration.take() {
            settle(self.inner, &registration, PollPhase::Idle, update);
        }
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            settle(self.inner, &registration, PollPhase::Idle, |_| {});
        }
    }
}

/// Release the registration and, unless it was cancelled, leave the session
/// in `phase` with analysis no longer running.
fn settle(
    inner: &Inner,
    registration: &Registration,
    phase: PollPhase,
    update: impl FnOnce(&mut SessionState),
) {
    inner.commit(|state, _| {
        inner.pollers.release(registration);
        if !registration.token.is_cancelled() {
            if let Some(scope) = state.scopes.get_mut(&registration.session_id) {
                scope.analyzing = false;
                scope.poll = phase;
            }
        }
        update(state);
    });
}

impl SessionStore {
    /// Claim the poll slot for `session_id` and mark it as analyzing.
    ///
    /// None if a loop already holds the slot, or if the session was cleared
    /// after `ticket` was issued.
    pub(crate) fn reserve_poller(&self, session_id: &str, ticket: u64) -> Option<Reservation<'_>> {
        let registration = self.inner.pollers.reserve(session_id)?;
        let live = self.inner.commit(|state, seq| {
            if !seq.live(session_id, ticket) {
                return false;
            }
            let scope = state.scope_mut(session_id);
            scope.analyzing = true;
            scope.poll = PollPhase::Polling;
            true
        });
        if !live {
            self.inner.pollers.release(&registration);
            return None;
        }
        Some(Reservation {
            inner: &self.inner,
            registration: Some(registration),
        })
    }

    /// One status fetch and merge.
    async fn poll_once(&self, registration: &Registration) -> Tick {
        let session_id = registration.session_id.as_str();
        let flight = self.inner.begin(Family::LoadingStatus);
        let ticket = self.inner.tickets.issue();

        let fetched = tokio::select! {
            _ = registration.token.cancelled() => return Tick::Cancelled,
            fetched = self.inner.gateway.workflow_status(session_id) => fetched,
        };

        match fetched {
            Ok(status) => flight.finish(|state, seq| {
                if registration.token.is_cancelled() {
                    return Tick::Cancelled;
                }
                let Some(scope) = state.scopes.get_mut(session_id) else {
                    return Tick::Cancelled;
                };
                if seq.accept(session_id, Slot::Workflow, ticket) {
                    scope.workflow_status = Some(status);
                }
                match scope.stage() {
                    Some(stage) if stage.is_terminal() => {
                        scope.analyzing = false;
                        Tick::Terminal(stage)
                    }
                    _ => Tick::Running,
                }
            }),
            Err(err) => {
                warn!(session_id, error = %err, "Workflow status poll failed");
                flight.finish(|state, _| {
                    if registration.token.is_cancelled() {
                        return Tick::Cancelled;
                    }
                    state.error = Some(StoreError::from_remote(Operation::PollWorkflow, &err));
                    Tick::Errored
                })
            }
        }
    }
}

enum Tick {
    Running,
    Terminal(WorkflowStage),
    Errored,
    Cancelled,
}

async fn poll_loop(store: SessionStore, registration: Registration, first_delay: Duration) {
    let session_id = registration.session_id.as_str();
    let interval = store.inner.config.poll_interval;
    let mut delay = first_delay;
    let mut polls: u32 = 0;

    info!(session_id, interval_ms = interval.as_millis() as u64, "Polling workflow status");

    loop {
        tokio::select! {
            _ = registration.token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        polls += 1;

        match store.poll_once(&registration).await {
            Tick::Running => delay = interval,
            Tick::Terminal(WorkflowStage::Completed) => {
                info!(session_id, polls, "Workflow completed, loading results");
                store
                    .refresh_validation_results(session_id, Some(&registration.token))
                    .await;
                settle(&store.inner, &registration, PollPhase::Completed, |_| {});
                return;
            }
            Tick::Terminal(stage) => {
                warn!(session_id, polls, %stage, "Workflow ended without completing");
                settle(&store.inner, &registration, PollPhase::Failed, |_| {});
                return;
            }
            Tick::Errored => {
                settle(&store.inner, &registration, PollPhase::Idle, |_| {});
                return;
            }
            Tick::Cancelled => break,
        }
    }

    debug!(session_id, polls, "Poll loop cancelled");
    store.inner.pollers.release(&registration);
}
