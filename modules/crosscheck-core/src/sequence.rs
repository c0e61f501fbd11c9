//! Completion-order guard for overlapping fetches.
//!
//! Every fetch takes a ticket from one monotonic counter when it is issued.
//! When its response arrives, the ticket must be newer than anything already
//! applied to the same `(scope, slot)` and newer than the scope's fence, or the
//! response is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Scope key for state that does not belong to a single session.
pub(crate) const GLOBAL: &str = "";

/// The field family a fetch writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Slot {
    Session,
    Files,
    Validation,
    Summary,
    Workflow,
    History,
    Selection,
}

#[derive(Debug, Default)]
pub(crate) struct Tickets(AtomicU64);

impl Tickets {
    pub fn issue(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Highest ticket issued so far.
    pub fn latest(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Sequencer {
    applied: HashMap<(String, Slot), u64>,
    fences: HashMap<String, u64>,
}

impl Sequencer {
    /// True if `ticket` was issued after the scope was last fenced.
    pub fn live(&self, scope: &str, ticket: u64) -> bool {
        self.fences.get(scope).is_none_or(|fence| ticket > *fence)
    }

    /// Claim `(scope, slot)` for `ticket`. False means the response is stale.
    pub fn accept(&mut self, scope: &str, slot: Slot, ticket: u64) -> bool {
        if !self.live(scope, ticket) {
            return false;
        }
        let applied = self.applied.entry((scope.to_string(), slot)).or_insert(0);
        if ticket <= *applied {
            return false;
        }
        *applied = ticket;
        true
    }

    /// Mark `(scope, slot)` as written at `ticket` by a local change, so any
    /// fetch issued before it is treated as stale.
    pub fn advance(&mut self, scope: &str, slot: Slot, ticket: u64) {
        let applied = self.applied.entry((scope.to_string(), slot)).or_insert(0);
        *applied = (*applied).max(ticket);
    }

    /// Drop every response for `scope` issued at or before `upto`.
    pub fn fence(&mut self, scope: &str, upto: u64) {
        self.applied.retain(|(s, _), _| s != scope);
        let fence = self.fences.entry(scope.to_string()).or_insert(0);
        *fence = (*fence).max(upto);
    }
}
