//! Per-viewer read watermark: the time before which every like counts as seen.

mod sqlite_watermark_store;

pub use sqlite_watermark_store::SqliteWatermarkStore;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::notifications::NotificationError;
use crate::timestamps::{epoch, to_millis};

pub trait WatermarkStore: Send + Sync {
    /// Returns the viewer's watermark, or the Unix epoch if none was stored.
    fn get(&self, viewer_id: &str) -> Result<DateTime<Utc>>;

    /// Durably stores the viewer's watermark before returning. The write is
    /// atomic and never replaces a newer stored value.
    fn set(&self, viewer_id: &str, at: DateTime<Utc>) -> Result<()>;
}

/// Watermark to store when the viewer reads their notifications at `read_time`.
///
/// Lands strictly after `read_time` so that the next fetch, which excludes
/// the watermark itself, cannot return likes made at that instant.
pub fn read_mark(read_time: DateTime<Utc>) -> DateTime<Utc> {
    to_millis(read_time + Duration::milliseconds(1))
}

/// In-process copy of one viewer's watermark, written through to a store.
pub struct WatermarkTracker {
    viewer_id: String,
    store: Arc<dyn WatermarkStore>,
    current: DateTime<Utc>,
}

impl WatermarkTracker {
    /// Loads the stored watermark. A store that cannot be read leaves the
    /// tracker at the epoch, so every like shows as unread.
    pub async fn hydrate(viewer_id: impl Into<String>, store: Arc<dyn WatermarkStore>) -> Self {
        let viewer_id = viewer_id.into();
        let loaded = {
            let store = store.clone();
            let viewer_id = viewer_id.clone();
            tokio::task::spawn_blocking(move || store.get(&viewer_id)).await
        };

        let current = match loaded {
            Ok(Ok(at)) => at,
            Ok(Err(err)) => {
                warn!(
                    "Failed to load watermark of viewer {}, starting from epoch: {:#}",
                    viewer_id, err
                );
                epoch()
            }
            Err(err) => {
                warn!(
                    "Watermark load task for viewer {} failed, starting from epoch: {}",
                    viewer_id, err
                );
                epoch()
            }
        };
        debug!("Viewer {} watermark hydrated at {}", viewer_id, current);

        Self {
            viewer_id,
            store,
            current,
        }
    }

    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }

    pub fn current(&self) -> DateTime<Utc> {
        self.current
    }

    /// Moves the watermark forward to `to`; earlier values are ignored.
    ///
    /// The in-memory value advances even when the durable write fails. The
    /// failure is logged and returned so callers can surface it.
    pub async fn advance(&mut self, to: DateTime<Utc>) -> Result<(), NotificationError> {
        let to = to_millis(to);
        if to <= self.current {
            return Ok(());
        }
        self.current = to;

        let store = self.store.clone();
        let viewer_id = self.viewer_id.clone();
        let written = tokio::task::spawn_blocking(move || store.set(&viewer_id, to)).await;

        let failure = match written {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(err)) => format!("{:#}", err),
            Err(err) => err.to_string(),
        };
        error!(
            "Failed to persist watermark {} for viewer {}: {}",
            to, self.viewer_id, failure
        );
        Err(NotificationError::PersistenceFailure(failure))
    }

    /// Marks everything up to `read_time` as read.
    pub async fn mark_read(&mut self, read_time: DateTime<Utc>) -> Result<(), NotificationError> {
        self.advance(read_mark(read_time)).await
    }
}
