use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, RwLock};

use super::state::{CoordinatorSnapshot, RefreshState, Trigger, TriggerOutcome};
use crate::notifications::NotificationError;

/// Command sent to the coordinator loop.
pub enum CoordinatorCommand {
    Trigger {
        trigger: Trigger,
        response: oneshot::Sender<TriggerOutcome>,
    },
    MarkAsRead {
        read_time: Option<DateTime<Utc>>,
        response: oneshot::Sender<Result<DateTime<Utc>, NotificationError>>,
    },
    Settled {
        response: oneshot::Sender<()>,
    },
    Dispose,
}

/// Handle to one viewer's coordinator. Cheap to clone; every clone talks to
/// the same loop.
#[derive(Clone)]
pub struct CoordinatorHandle {
    viewer_id: String,
    command_tx: mpsc::Sender<CoordinatorCommand>,
    snapshot: Arc<RwLock<CoordinatorSnapshot>>,
    revision: watch::Receiver<u64>,
}

impl CoordinatorHandle {
    pub fn new(
        viewer_id: impl Into<String>,
        command_tx: mpsc::Sender<CoordinatorCommand>,
        snapshot: Arc<RwLock<CoordinatorSnapshot>>,
        revision: watch::Receiver<u64>,
    ) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            command_tx,
            snapshot,
            revision,
        }
    }

    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }

    /// The viewer opened their notifications: mark everything read and fetch.
    pub async fn activate(&self) -> TriggerOutcome {
        self.trigger(Trigger::Activate).await
    }

    pub async fn manual_refresh(&self) -> TriggerOutcome {
        self.trigger(Trigger::ManualRefresh).await
    }

    pub async fn external_invalidation(&self) -> TriggerOutcome {
        self.trigger(Trigger::ExternalInvalidation).await
    }

    pub async fn trigger(&self, trigger: Trigger) -> TriggerOutcome {
        let (response_tx, response_rx) = oneshot::channel();
        let sent = self
            .command_tx
            .send(CoordinatorCommand::Trigger {
                trigger,
                response: response_tx,
            })
            .await;
        if sent.is_err() {
            return TriggerOutcome::Disposed;
        }
        response_rx.await.unwrap_or(TriggerOutcome::Disposed)
    }

    /// Marks likes up to `read_time` (default: now) as read without fetching.
    ///
    /// Returns the new watermark. A `PersistenceFailure` still leaves the
    /// in-memory watermark advanced and the unread count at zero.
    pub async fn mark_as_read(
        &self,
        read_time: Option<DateTime<Utc>>,
    ) -> Result<DateTime<Utc>, NotificationError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(CoordinatorCommand::MarkAsRead {
                read_time,
                response: response_tx,
            })
            .await
            .map_err(|_| NotificationError::Disposed)?;

        response_rx.await.map_err(|_| NotificationError::Disposed)?
    }

    /// Resolves once no fetch is running or queued. Returns right away if the
    /// coordinator is gone.
    pub async fn settled(&self) {
        let (response_tx, response_rx) = oneshot::channel();
        let sent = self
            .command_tx
            .send(CoordinatorCommand::Settled {
                response: response_tx,
            })
            .await;
        if sent.is_ok() {
            let _ = response_rx.await;
        }
    }

    /// Stops the coordinator and waits for its loop to exit. An in-flight
    /// fetch is aborted and its result never reaches the snapshot.
    pub async fn dispose(&self) {
        let _ = self.command_tx.send(CoordinatorCommand::Dispose).await;
        self.command_tx.closed().await;
    }

    pub fn is_disposed(&self) -> bool {
        self.command_tx.is_closed()
    }

    /// Receiver that is notified whenever the snapshot changes. `changed()`
    /// fails once the coordinator has stopped.
    pub fn changes(&self) -> watch::Receiver<u64> {
        let mut changes = self.revision.clone();
        changes.borrow_and_update();
        changes
    }

    pub async fn snapshot(&self) -> CoordinatorSnapshot {
        self.snapshot.read().await.clone()
    }

    pub async fn unread_count(&self) -> usize {
        self.snapshot.read().await.unread_count
    }

    pub async fn refresh_state(&self) -> RefreshState {
        self.snapshot.read().await.refresh_state
    }
}
