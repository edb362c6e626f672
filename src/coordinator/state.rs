use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::notifications::NotificationGroup;
use crate::timestamps::epoch;

/// Fetch status shown by spinners and error banners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshState {
    Idle,
    /// First fetch after the viewer opened their notifications.
    Loading,
    /// Any later fetch, user-pulled or signal-driven.
    Refreshing,
    /// The first fetch failed. Left on the next trigger.
    Error,
}

/// What asked for a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// The viewer is looking at their notifications. Marks them read.
    Activate,
    /// Pull-to-refresh.
    ManualRefresh,
    /// A realtime signal said something changed.
    ExternalInvalidation,
    /// Poll timer.
    Periodic,
}

impl Trigger {
    /// Only an activation means the viewer has seen the likes.
    pub fn marks_read(self) -> bool {
        matches!(self, Trigger::Activate)
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Activate => write!(f, "activate"),
            Trigger::ManualRefresh => write!(f, "manual_refresh"),
            Trigger::ExternalInvalidation => write!(f, "external_invalidation"),
            Trigger::Periodic => write!(f, "periodic"),
        }
    }
}

/// What the coordinator did with a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A fetch was started for it.
    Started,
    /// A fetch is in flight; this one runs right after it.
    Queued,
    /// Folded into a fetch that is already running or queued.
    Coalesced,
    /// The coordinator is gone.
    Disposed,
}

/// Everything the UI layer reads about one viewer's notifications.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorSnapshot {
    pub viewer_id: String,
    pub refresh_state: RefreshState,
    pub groups: Vec<NotificationGroup>,
    pub unread_count: usize,
    pub watermark: DateTime<Utc>,
    /// Message of the last failed fetch, cleared by the next good one.
    pub last_error: Option<String>,
    /// Set while the watermark could not be written durably.
    pub persistence_error: Option<String>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub has_loaded: bool,
}

impl CoordinatorSnapshot {
    pub fn new(viewer_id: impl Into<String>, watermark: DateTime<Utc>) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            refresh_state: RefreshState::Idle,
            groups: Vec::new(),
            unread_count: 0,
            watermark,
            last_error: None,
            persistence_error: None,
            last_fetched_at: None,
            has_loaded: false,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(
            self.refresh_state,
            RefreshState::Loading | RefreshState::Refreshing
        )
    }
}

impl Default for CoordinatorSnapshot {
    fn default() -> Self {
        Self::new(String::new(), epoch())
    }
}
