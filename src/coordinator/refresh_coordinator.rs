use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handle::{CoordinatorCommand, CoordinatorHandle};
use super::state::{CoordinatorSnapshot, RefreshState, Trigger, TriggerOutcome};
use super::CoordinatorSettings;
use crate::event_source::{fetch_with_timeout, EventSource, LikeQuery};
use crate::invalidation::RefreshScope;
use crate::notifications::{Aggregator, LikeEvent, NotificationError};
use crate::watermark::{WatermarkStore, WatermarkTracker};

const COMMAND_CHANNEL_CAPACITY: usize = 32;
const COMPLETION_CHANNEL_CAPACITY: usize = 4;

struct InFlightFetch {
    generation: u64,
    trigger: Trigger,
    task: JoinHandle<()>,
}

struct FetchCompletion {
    generation: u64,
    trigger: Trigger,
    result: Result<Vec<LikeEvent>, NotificationError>,
}

/// Owns one viewer's notification state and serializes every fetch and
/// watermark change for that viewer.
pub struct RefreshCoordinator {
    viewer_id: String,
    source: Arc<dyn EventSource>,
    watermark: WatermarkTracker,
    aggregator: Aggregator,
    settings: CoordinatorSettings,

    /// Read model shared with every `CoordinatorHandle`.
    snapshot: Arc<RwLock<CoordinatorSnapshot>>,
    /// Bumped after every snapshot write.
    revision: watch::Sender<u64>,

    command_receiver: mpsc::Receiver<CoordinatorCommand>,
    invalidations: Option<broadcast::Receiver<RefreshScope>>,
    shutdown_token: CancellationToken,

    completion_sender: mpsc::Sender<FetchCompletion>,
    completion_receiver: mpsc::Receiver<FetchCompletion>,

    in_flight: Option<InFlightFetch>,
    /// Activation that arrived while a non-marking fetch was running.
    queued: Option<Trigger>,
    generation: u64,
    settle_waiters: Vec<oneshot::Sender<()>>,
}

impl RefreshCoordinator {
    /// Loads the viewer's watermark and builds an idle coordinator.
    pub async fn new(
        viewer_id: impl Into<String>,
        source: Arc<dyn EventSource>,
        store: Arc<dyn WatermarkStore>,
        settings: CoordinatorSettings,
        invalidations: Option<broadcast::Receiver<RefreshScope>>,
        shutdown_token: CancellationToken,
    ) -> (Self, CoordinatorHandle) {
        let viewer_id = viewer_id.into();
        let watermark = WatermarkTracker::hydrate(viewer_id.clone(), store).await;
        let snapshot = Arc::new(RwLock::new(CoordinatorSnapshot::new(
            viewer_id.clone(),
            watermark.current(),
        )));

        let (command_tx, command_receiver) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (completion_sender, completion_receiver) = mpsc::channel(COMPLETION_CHANNEL_CAPACITY);
        let (revision, revision_rx) = watch::channel(0);
        let handle = CoordinatorHandle::new(
            viewer_id.clone(),
            command_tx,
            snapshot.clone(),
            revision_rx,
        );

        let coordinator = Self {
            viewer_id,
            source,
            watermark,
            aggregator: Aggregator::new(settings.snippet_max_graphemes),
            settings,
            snapshot,
            revision,
            command_receiver,
            invalidations,
            shutdown_token,
            completion_sender,
            completion_receiver,
            in_flight: None,
            queued: None,
            generation: 0,
            settle_waiters: Vec::new(),
        };
        (coordinator, handle)
    }

    /// Builds a coordinator and runs it on its own task.
    pub async fn spawn(
        viewer_id: impl Into<String>,
        source: Arc<dyn EventSource>,
        store: Arc<dyn WatermarkStore>,
        settings: CoordinatorSettings,
        invalidations: Option<broadcast::Receiver<RefreshScope>>,
        shutdown_token: CancellationToken,
    ) -> CoordinatorHandle {
        let (coordinator, handle) = Self::new(
            viewer_id,
            source,
            store,
            settings,
            invalidations,
            shutdown_token,
        )
        .await;
        tokio::spawn(coordinator.run());
        handle
    }

    /// Main loop. Returns after `dispose`, shutdown, or once every handle
    /// has been dropped.
    pub async fn run(mut self) {
        info!(
            "Starting notification coordinator for viewer {} (watermark {})",
            self.viewer_id,
            self.watermark.current()
        );

        let mut ticker = self.settings.poll_interval.map(|every| {
            // First tick one period from now, not immediately.
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        loop {
            tokio::select! {
                cmd = self.command_receiver.recv() => {
                    match cmd {
                        Some(CoordinatorCommand::Dispose) => {
                            debug!("Coordinator for viewer {} disposed", self.viewer_id);
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            debug!("All handles of viewer {} dropped", self.viewer_id);
                            break;
                        }
                    }
                }
                Some(done) = self.completion_receiver.recv() => {
                    self.handle_completion(done).await;
                }
                signal = next_invalidation(&mut self.invalidations) => {
                    match signal {
                        Ok(RefreshScope::Notifications) => {
                            self.trigger(Trigger::ExternalInvalidation).await;
                        }
                        Ok(scope) => {
                            debug!("Ignoring {} invalidation", scope);
                        }
                        Err(RecvError::Lagged(missed)) => {
                            debug!("Missed {} invalidations, refreshing once", missed);
                            self.trigger(Trigger::ExternalInvalidation).await;
                        }
                        Err(RecvError::Closed) => {
                            debug!("Invalidation bus closed");
                            self.invalidations = None;
                        }
                    }
                }
                _ = next_tick(&mut ticker) => {
                    self.trigger(Trigger::Periodic).await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Coordinator for viewer {} received shutdown signal", self.viewer_id);
                    break;
                }
            }
        }

        self.stop();
        info!("Notification coordinator for viewer {} stopped", self.viewer_id);
    }

    async fn handle_command(&mut self, cmd: CoordinatorCommand) {
        match cmd {
            CoordinatorCommand::Trigger { trigger, response } => {
                let outcome = self.trigger(trigger).await;
                let _ = response.send(outcome);
            }
            CoordinatorCommand::MarkAsRead {
                read_time,
                response,
            } => {
                let result = self.mark_as_read(read_time.unwrap_or_else(Utc::now)).await;
                let _ = response.send(result);
            }
            CoordinatorCommand::Settled { response } => {
                if self.in_flight.is_none() && self.queued.is_none() {
                    let _ = response.send(());
                } else {
                    self.settle_waiters.push(response);
                }
            }
            // Handled by the loop.
            CoordinatorCommand::Dispose => {}
        }
    }

    async fn trigger(&mut self, trigger: Trigger) -> TriggerOutcome {
        let running = match self.in_flight.as_ref() {
            Some(in_flight) => in_flight.trigger,
            None => {
                self.start_fetch(trigger).await;
                return TriggerOutcome::Started;
            }
        };

        if running.marks_read() || !trigger.marks_read() || self.queued.is_some() {
            debug!(
                "Viewer {}: {} coalesced into running {} fetch",
                self.viewer_id, trigger, running
            );
            return TriggerOutcome::Coalesced;
        }

        debug!(
            "Viewer {}: {} queued behind running {} fetch",
            self.viewer_id, trigger, running
        );
        self.queued = Some(trigger);
        TriggerOutcome::Queued
    }

    async fn start_fetch(&mut self, trigger: Trigger) {
        // The bound is fixed before an activation moves the watermark.
        let since = self.watermark.current();
        let persisted = if trigger.marks_read() {
            Some(self.watermark.mark_read(Utc::now()).await)
        } else {
            None
        };

        self.generation += 1;
        let generation = self.generation;

        {
            let mut snapshot = self.snapshot.write().await;
            snapshot.refresh_state = if trigger.marks_read() && !snapshot.has_loaded {
                RefreshState::Loading
            } else {
                RefreshState::Refreshing
            };
            if let Some(persisted) = persisted {
                snapshot.unread_count = 0;
                snapshot.watermark = self.watermark.current();
                snapshot.persistence_error = persisted.err().map(|err| err.to_string());
            }
        }
        self.publish();

        debug!(
            "Viewer {}: starting {} fetch #{} since {}",
            self.viewer_id, trigger, generation, since
        );

        let query = LikeQuery::new(self.viewer_id.clone(), since).with_limit(self.settings.fetch_limit);
        let source = self.source.clone();
        let timeout = self.settings.fetch_timeout;
        let completions = self.completion_sender.clone();
        let task = tokio::spawn(async move {
            let result = fetch_with_timeout(source.as_ref(), &query, timeout).await;
            let _ = completions
                .send(FetchCompletion {
                    generation,
                    trigger,
                    result,
                })
                .await;
        });

        self.in_flight = Some(InFlightFetch {
            generation,
            trigger,
            task,
        });
    }

    async fn handle_completion(&mut self, done: FetchCompletion) {
        let is_current = matches!(&self.in_flight, Some(f) if f.generation == done.generation);
        if !is_current {
            debug!(
                "Viewer {}: discarding stale fetch #{}",
                self.viewer_id, done.generation
            );
            return;
        }
        self.in_flight = None;

        {
            let mut snapshot = self.snapshot.write().await;
            match done.result {
                Ok(events) => {
                    if !done.trigger.marks_read() {
                        let watermark = self.watermark.current();
                        snapshot.unread_count = events
                            .iter()
                            .filter(|event| event.occurred_at > watermark)
                            .count();
                    }
                    snapshot.groups = self.aggregator.aggregate(&events);
                    snapshot.refresh_state = RefreshState::Idle;
                    snapshot.last_error = None;
                    snapshot.last_fetched_at = Some(Utc::now());
                    snapshot.has_loaded = true;
                    debug!(
                        "Viewer {}: fetch #{} got {} likes in {} groups, {} unread",
                        self.viewer_id,
                        done.generation,
                        events.len(),
                        snapshot.groups.len(),
                        snapshot.unread_count
                    );
                }
                Err(err) => {
                    warn!(
                        "Viewer {}: {} fetch #{} failed: {}",
                        self.viewer_id, done.trigger, done.generation, err
                    );
                    snapshot.refresh_state = if snapshot.refresh_state == RefreshState::Loading {
                        RefreshState::Error
                    } else {
                        RefreshState::Idle
                    };
                    snapshot.last_error = Some(err.to_string());
                }
            }
        }
        self.publish();

        match self.queued.take() {
            Some(next) => self.start_fetch(next).await,
            None => self.notify_settled(),
        }
    }

    async fn mark_as_read(
        &mut self,
        read_time: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, NotificationError> {
        let persisted = self.watermark.mark_read(read_time).await;

        {
            let mut snapshot = self.snapshot.write().await;
            snapshot.unread_count = 0;
            snapshot.watermark = self.watermark.current();
            snapshot.persistence_error = persisted.as_ref().err().map(|err| err.to_string());
        }
        self.publish();

        persisted.map(|_| self.watermark.current())
    }

    fn publish(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    fn notify_settled(&mut self) {
        for waiter in self.settle_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    /// Aborts whatever is running and wakes anyone waiting on `settled`.
    fn stop(&mut self) {
        // Any completion still in the channel now carries a stale generation.
        self.generation += 1;
        if let Some(in_flight) = self.in_flight.take() {
            debug!(
                "Viewer {}: aborting {} fetch #{}",
                self.viewer_id, in_flight.trigger, in_flight.generation
            );
            in_flight.task.abort();
        }
        self.queued = None;
        self.notify_settled();
    }
}

async fn next_invalidation(
    receiver: &mut Option<broadcast::Receiver<RefreshScope>>,
) -> Result<RefreshScope, RecvError> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invalidation::InvalidationBus;
    use crate::notifications::ActorRef;
    use crate::timestamps::{epoch, parse_timestamp};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::{Notify, Semaphore};

    fn like(id: &str, post_id: &str, actor: &str, at: &str) -> LikeEvent {
        LikeEvent {
            event_id: id.to_string(),
            post_id: post_id.to_string(),
            post_content: format!("content of {}", post_id),
            actor: ActorRef::new(actor),
            occurred_at: parse_timestamp(at).unwrap(),
        }
    }

    /// Holds every fetch until the test releases it.
    struct GatedSource {
        events: Vec<LikeEvent>,
        queries: Mutex<Vec<LikeQuery>>,
        calls: AtomicUsize,
        started: Notify,
        gate: Semaphore,
    }

    impl GatedSource {
        fn new(events: Vec<LikeEvent>) -> Arc<Self> {
            Arc::new(Self {
                events,
                queries: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                started: Notify::new(),
                gate: Semaphore::new(0),
            })
        }

        fn open(events: Vec<LikeEvent>) -> Arc<Self> {
            let source = Self::new(events);
            source.gate.add_permits(Semaphore::MAX_PERMITS / 2);
            source
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn release(&self, fetches: usize) {
            self.gate.add_permits(fetches);
        }
    }

    #[async_trait]
    impl EventSource for GatedSource {
        async fn fetch_likes_since(
            &self,
            query: &LikeQuery,
        ) -> Result<Vec<LikeEvent>, NotificationError> {
            self.queries.lock().unwrap().push(query.clone());
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            self.gate
                .acquire()
                .await
                .map_err(NotificationError::source_unavailable)?
                .forget();
            Ok(self.events.clone())
        }
    }

    struct EpochStore;

    impl WatermarkStore for EpochStore {
        fn get(&self, _viewer_id: &str) -> Result<DateTime<Utc>> {
            Ok(epoch())
        }

        fn set(&self, _viewer_id: &str, _at: DateTime<Utc>) -> Result<()> {
            Ok(())
        }
    }

    async fn spawn_with(
        source: Arc<GatedSource>,
        settings: CoordinatorSettings,
        bus: Option<&InvalidationBus>,
    ) -> CoordinatorHandle {
        RefreshCoordinator::spawn(
            "viewer",
            source,
            Arc::new(EpochStore),
            settings,
            bus.map(InvalidationBus::subscribe),
            CancellationToken::new(),
        )
        .await
    }

    #[tokio::test]
    async fn activation_during_refresh_is_queued_once() {
        let source = GatedSource::new(vec![like("l1", "p1", "alice", "2024-05-01T10:00:00Z")]);
        let handle = spawn_with(source.clone(), CoordinatorSettings::default(), None).await;

        assert_eq!(handle.manual_refresh().await, TriggerOutcome::Started);
        source.started.notified().await;

        assert_eq!(handle.activate().await, TriggerOutcome::Queued);
        assert_eq!(handle.activate().await, TriggerOutcome::Coalesced);
        assert_eq!(handle.external_invalidation().await, TriggerOutcome::Coalesced);

        source.release(2);
        handle.settled().await;

        assert_eq!(source.calls(), 2);
        let snapshot = handle.snapshot().await;
        assert_eq!(snapshot.unread_count, 0);
        assert_eq!(snapshot.refresh_state, RefreshState::Idle);
        assert!(snapshot.watermark > epoch());

        // Both fetches started before the activation moved the watermark.
        let queries = source.queries.lock().unwrap().clone();
        assert!(queries.iter().all(|q| q.since_exclusive == epoch()));
    }

    #[tokio::test]
    async fn activation_covers_later_triggers() {
        let source = GatedSource::new(vec![]);
        let handle = spawn_with(source.clone(), CoordinatorSettings::default(), None).await;

        assert_eq!(handle.activate().await, TriggerOutcome::Started);
        assert_eq!(handle.refresh_state().await, RefreshState::Loading);
        assert_eq!(handle.manual_refresh().await, TriggerOutcome::Coalesced);
        assert_eq!(handle.activate().await, TriggerOutcome::Coalesced);

        source.release(1);
        handle.settled().await;
        assert_eq!(source.calls(), 1);
        assert_eq!(handle.refresh_state().await, RefreshState::Idle);
    }

    #[tokio::test]
    async fn refresh_counts_unread_above_watermark() {
        let source = GatedSource::open(vec![
            like("l2", "p1", "bob", "2024-05-01T10:00:02Z"),
            like("l1", "p1", "alice", "2024-05-01T10:00:01Z"),
        ]);
        let handle = spawn_with(source, CoordinatorSettings::default(), None).await;

        assert_eq!(handle.manual_refresh().await, TriggerOutcome::Started);
        handle.settled().await;

        let snapshot = handle.snapshot().await;
        assert_eq!(snapshot.unread_count, 2);
        assert_eq!(snapshot.groups.len(), 1);
        assert_eq!(snapshot.watermark, epoch());
        assert!(snapshot.has_loaded);
        assert!(snapshot.last_fetched_at.is_some());
    }

    #[tokio::test]
    async fn mark_as_read_without_fetch() {
        let source = GatedSource::open(vec![like("l1", "p1", "alice", "2024-05-01T10:00:00Z")]);
        let handle = spawn_with(source.clone(), CoordinatorSettings::default(), None).await;

        handle.manual_refresh().await;
        handle.settled().await;
        assert_eq!(handle.unread_count().await, 1);

        let read_time = parse_timestamp("2024-05-01T10:00:00Z").unwrap();
        let watermark = handle.mark_as_read(Some(read_time)).await.unwrap();
        assert_eq!(watermark, parse_timestamp("2024-05-01T10:00:00.001Z").unwrap());
        assert_eq!(handle.unread_count().await, 0);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn only_notification_invalidations_trigger() {
        let bus = InvalidationBus::new();
        let source = GatedSource::open(vec![]);
        let handle = spawn_with(source.clone(), CoordinatorSettings::default(), Some(&bus)).await;

        bus.trigger(RefreshScope::Posts);
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.settled().await;
        assert_eq!(source.calls(), 0);

        bus.trigger(RefreshScope::Notifications);
        source.started.notified().await;
        handle.settled().await;
        assert_eq!(source.calls(), 1);
        assert_eq!(handle.unread_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_timer_skips_first_tick() {
        let source = GatedSource::open(vec![]);
        let settings = CoordinatorSettings {
            poll_interval: Some(Duration::from_secs(60)),
            ..CoordinatorSettings::default()
        };
        let handle = spawn_with(source.clone(), settings, None).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        handle.settled().await;
        assert_eq!(source.calls(), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        handle.settled().await;
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn changes_follow_snapshot_writes() {
        let source = GatedSource::new(vec![like("l1", "p1", "alice", "2024-05-01T10:00:00Z")]);
        let handle = spawn_with(source.clone(), CoordinatorSettings::default(), None).await;
        let mut changes = handle.changes();

        handle.manual_refresh().await;
        changes.changed().await.unwrap();
        assert_eq!(handle.refresh_state().await, RefreshState::Refreshing);

        source.release(1);
        changes.changed().await.unwrap();
        let snapshot = handle.snapshot().await;
        assert!(snapshot.has_loaded);
        assert_eq!(snapshot.unread_count, 1);

        handle.mark_as_read(None).await.unwrap();
        changes.changed().await.unwrap();
        assert_eq!(handle.unread_count().await, 0);

        handle.dispose().await;
        assert!(changes.changed().await.is_err());
    }

    #[tokio::test]
    async fn disposed_handle_reports_disposed() {
        let source = GatedSource::open(vec![]);
        let handle = spawn_with(source, CoordinatorSettings::default(), None).await;

        handle.dispose().await;
        assert!(handle.is_disposed());
        assert_eq!(handle.activate().await, TriggerOutcome::Disposed);
        assert_eq!(
            handle.mark_as_read(None).await,
            Err(NotificationError::Disposed)
        );
        handle.settled().await;
    }
}
