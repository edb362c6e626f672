//! Decides when a viewer's likes are fetched, aggregated and marked read.
//!
//! Each viewer gets one [`RefreshCoordinator`] task. Callers hold a
//! [`CoordinatorHandle`] and read the latest [`CoordinatorSnapshot`].

mod handle;
mod refresh_coordinator;
mod registry;
mod state;

pub use handle::{CoordinatorCommand, CoordinatorHandle};
pub use refresh_coordinator::RefreshCoordinator;
pub use registry::CoordinatorRegistry;
pub use state::{CoordinatorSnapshot, RefreshState, Trigger, TriggerOutcome};

use std::time::Duration;

use crate::event_source::DEFAULT_FETCH_LIMIT;
use crate::notifications::presentation::DEFAULT_SNIPPET_MAX_GRAPHEMES;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub fetch_limit: usize,
    pub fetch_timeout: Duration,
    /// `None` disables the poll timer.
    pub poll_interval: Option<Duration>,
    pub snippet_max_graphemes: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            fetch_limit: DEFAULT_FETCH_LIMIT,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            poll_interval: None,
            snippet_max_graphemes: DEFAULT_SNIPPET_MAX_GRAPHEMES,
        }
    }
}
