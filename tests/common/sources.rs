#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use likes_digest::timestamps::epoch;
use likes_digest::{EventSource, LikeEvent, LikeQuery, NotificationError, WatermarkStore};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};

/// Wraps a real source so tests can count, hold and fail fetches.
pub struct ControlledSource {
    inner: Arc<dyn EventSource>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    held: AtomicBool,
    failure: Mutex<Option<String>>,
    queries: Mutex<Vec<LikeQuery>>,
    started: Notify,
    gate: Semaphore,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ControlledSource {
    pub fn wrap(inner: Arc<dyn EventSource>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            held: AtomicBool::new(false),
            failure: Mutex::new(None),
            queries: Mutex::new(Vec::new()),
            started: Notify::new(),
            gate: Semaphore::new(0),
        })
    }

    /// Fetches started from now on wait for `release`.
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self, fetches: usize) {
        self.gate.add_permits(fetches);
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Waits until a fetch has reached the source.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<LikeQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSource for ControlledSource {
    async fn fetch_likes_since(
        &self,
        query: &LikeQuery,
    ) -> Result<Vec<LikeEvent>, NotificationError> {
        self.queries.lock().unwrap().push(query.clone());
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.started.notify_one();

        if self.held.load(Ordering::SeqCst) {
            self.gate
                .acquire()
                .await
                .map_err(NotificationError::source_unavailable)?
                .forget();
        }

        let failure = self.failure.lock().unwrap().clone();
        match failure {
            Some(message) => Err(NotificationError::SourceUnavailable(message)),
            None => self.inner.fetch_likes_since(query).await,
        }
    }
}

/// Reads fine, never manages to write.
pub struct FailingStore {
    pub initial: DateTime<Utc>,
}

impl Default for FailingStore {
    fn default() -> Self {
        Self { initial: epoch() }
    }
}

impl WatermarkStore for FailingStore {
    fn get(&self, _viewer_id: &str) -> Result<DateTime<Utc>> {
        Ok(self.initial)
    }

    fn set(&self, _viewer_id: &str, _at: DateTime<Utc>) -> Result<()> {
        bail!("database is locked")
    }
}
