#![allow(dead_code)]

use chrono::{DateTime, Utc};
use likes_digest::event_source::Profile;
use likes_digest::timestamps::parse_timestamp;
use likes_digest::{
    CoordinatorHandle, CoordinatorSettings, EventSource, RefreshCoordinator, SqliteEventSource,
    SqliteWatermarkStore, WatermarkStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::constants::*;

pub fn at(s: &str) -> DateTime<Utc> {
    parse_timestamp(s).unwrap()
}

/// On-disk likes and watermark databases in a temp directory.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub events: SqliteEventSource,
    pub store: Arc<SqliteWatermarkStore>,
}

impl TestEnv {
    /// Viewer with two posts and no likes yet.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let events = SqliteEventSource::new(temp_dir.path().join("likes.db")).unwrap();
        let store = Arc::new(SqliteWatermarkStore::new(temp_dir.path().join("watermark.db")).unwrap());

        let profile = |id: &str, username: &str, display_name: Option<&str>| Profile {
            display_name: display_name.map(str::to_string),
            ..Profile::new(id, username)
        };
        events
            .insert_profile(&profile(VIEWER_ID, "viewer", None))
            .unwrap();
        events
            .insert_profile(&profile(ALICE_ID, "alice", Some("Alice")))
            .unwrap();
        events
            .insert_profile(&profile(BOB_ID, "bob", Some("Bob")))
            .unwrap();
        events
            .insert_profile(&profile(CAROL_ID, "carol", Some("Carol")))
            .unwrap();
        events
            .insert_post(POST_1_ID, VIEWER_ID, POST_1_CONTENT, at("2024-04-30T08:00:00Z"))
            .unwrap();
        events
            .insert_post(POST_2_ID, VIEWER_ID, POST_2_CONTENT, at("2024-04-30T09:00:00Z"))
            .unwrap();

        Self {
            temp_dir,
            events,
            store,
        }
    }

    /// Watermark at T0; Alice and Bob like post 1 at T1 and T2, Carol likes
    /// post 2 at T3.
    pub fn with_scenario() -> Self {
        let env = Self::new();
        env.store.set(VIEWER_ID, at(T0)).unwrap();
        env.events
            .insert_like("like-1", POST_1_ID, ALICE_ID, at(T1))
            .unwrap();
        env.events
            .insert_like("like-2", POST_1_ID, BOB_ID, at(T2))
            .unwrap();
        env.events
            .insert_like("like-3", POST_2_ID, CAROL_ID, at(T3))
            .unwrap();
        env
    }

    pub fn watermark_db_path(&self) -> PathBuf {
        self.temp_dir.path().join("watermark.db")
    }

    pub fn stored_watermark(&self) -> DateTime<Utc> {
        self.store.get(VIEWER_ID).unwrap()
    }

    pub async fn spawn_coordinator(&self) -> CoordinatorHandle {
        self.spawn_with(Arc::new(self.events.clone()), CoordinatorSettings::default())
            .await
    }

    pub async fn spawn_with(
        &self,
        source: Arc<dyn EventSource>,
        settings: CoordinatorSettings,
    ) -> CoordinatorHandle {
        RefreshCoordinator::spawn(
            VIEWER_ID,
            source,
            self.store.clone(),
            settings,
            None,
            CancellationToken::new(),
        )
        .await
    }
}
