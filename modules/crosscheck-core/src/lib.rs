//! Session orchestration for the cross-check service.
//!
//! [`SessionStore`] is the only writer of [`SessionState`]. Presentation code
//! subscribes to snapshots, calls store operations, and reads derived fields
//! off whatever snapshot it last received.

pub mod config;
pub mod error;
mod poller;
mod sequence;
pub mod state;
mod store;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::{Config, StoreConfig};
pub use error::{ConfigError, Operation, StoreError};
pub use state::{Family, InFlight, PollPhase, ResultCounts, SessionScope, SessionState};
pub use store::SessionStore;
pub use traits::Gateway;
