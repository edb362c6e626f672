//! Likes Digest Library
//!
//! Groups "someone liked your post" events per post and tracks which of them
//! the viewer has already seen.

pub mod config;
pub mod coordinator;
pub mod event_source;
pub mod invalidation;
pub mod notifications;
pub mod sqlite_persistence;
pub mod timestamps;
pub mod watermark;

// Re-export commonly used types for convenience
pub use coordinator::{
    CoordinatorHandle, CoordinatorRegistry, CoordinatorSettings, CoordinatorSnapshot,
    RefreshCoordinator, RefreshState, Trigger, TriggerOutcome,
};
pub use event_source::{EventSource, LikeQuery, PostgrestEventSource, SqliteEventSource};
pub use invalidation::{InvalidationBus, RefreshScope};
pub use notifications::{Aggregator, LikeEvent, NotificationError, NotificationGroup};
pub use watermark::{SqliteWatermarkStore, WatermarkStore};
