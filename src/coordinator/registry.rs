use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{CoordinatorHandle, CoordinatorSettings, RefreshCoordinator};
use crate::event_source::EventSource;
use crate::invalidation::InvalidationBus;
use crate::watermark::WatermarkStore;

/// One coordinator per viewer, spawned on first use.
pub struct CoordinatorRegistry {
    source: Arc<dyn EventSource>,
    store: Arc<dyn WatermarkStore>,
    settings: CoordinatorSettings,
    bus: Option<InvalidationBus>,
    shutdown_token: CancellationToken,
    coordinators: Mutex<HashMap<String, CoordinatorHandle>>,
}

impl CoordinatorRegistry {
    pub fn new(
        source: Arc<dyn EventSource>,
        store: Arc<dyn WatermarkStore>,
        settings: CoordinatorSettings,
        bus: Option<InvalidationBus>,
    ) -> Self {
        Self {
            source,
            store,
            settings,
            bus,
            shutdown_token: CancellationToken::new(),
            coordinators: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the viewer's coordinator, starting a new one if there is none
    /// or the previous one was disposed.
    pub async fn handle_for(&self, viewer_id: &str) -> CoordinatorHandle {
        let mut coordinators = self.coordinators.lock().await;
        if let Some(handle) = coordinators.get(viewer_id) {
            if !handle.is_disposed() {
                return handle.clone();
            }
        }

        info!("Spawning notification coordinator for viewer {}", viewer_id);
        let handle = RefreshCoordinator::spawn(
            viewer_id,
            self.source.clone(),
            self.store.clone(),
            self.settings.clone(),
            self.bus.as_ref().map(InvalidationBus::subscribe),
            self.shutdown_token.child_token(),
        )
        .await;
        coordinators.insert(viewer_id.to_string(), handle.clone());
        handle
    }

    /// Disposes and forgets the viewer's coordinator. Returns whether one
    /// existed.
    pub async fn remove(&self, viewer_id: &str) -> bool {
        let removed = self.coordinators.lock().await.remove(viewer_id);
        match removed {
            Some(handle) => {
                handle.dispose().await;
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.coordinators.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.coordinators.lock().await.is_empty()
    }

    /// Stops every coordinator and waits for each loop to exit.
    pub async fn shutdown_all(&self) {
        self.shutdown_token.cancel();
        let handles: Vec<CoordinatorHandle> =
            self.coordinators.lock().await.drain().map(|(_, h)| h).collect();
        info!("Shutting down {} notification coordinators", handles.len());
        for handle in handles {
            handle.dispose().await;
        }
    }
}
