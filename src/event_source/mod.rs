//! Sources of like events targeting a viewer's posts.

mod postgrest_event_source;
mod rows;
mod sqlite_event_source;

pub use postgrest_event_source::{PostgrestConfig, PostgrestEventSource};
pub use rows::{decode_rows, ActorColumns, LikeRow, PostColumns};
pub use sqlite_event_source::{Profile, SqliteEventSource};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::notifications::{LikeEvent, NotificationError};

/// How many likes a single fetch returns at most.
pub const DEFAULT_FETCH_LIMIT: usize = 40;

/// Parameters of one fetch against an [`EventSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikeQuery {
    /// Owner of the liked posts.
    pub viewer_id: String,
    /// Only likes strictly newer than this are returned.
    pub since_exclusive: DateTime<Utc>,
    pub limit: usize,
}

impl LikeQuery {
    pub fn new(viewer_id: impl Into<String>, since_exclusive: DateTime<Utc>) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            since_exclusive,
            limit: DEFAULT_FETCH_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Read-only access to like events.
///
/// Implementations return the newest `limit` likes on posts owned by
/// `query.viewer_id` with `occurred_at > query.since_exclusive`, newest first.
/// Older likes beyond the limit are dropped, not paginated.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch_likes_since(&self, query: &LikeQuery)
        -> Result<Vec<LikeEvent>, NotificationError>;
}

/// Runs a fetch bounded by `timeout`; running out of time counts as the
/// source being unavailable.
pub async fn fetch_with_timeout(
    source: &dyn EventSource,
    query: &LikeQuery,
    timeout: Duration,
) -> Result<Vec<LikeEvent>, NotificationError> {
    match tokio::time::timeout(timeout, source.fetch_likes_since(query)).await {
        Ok(result) => result.map(|events| enforce_query(events, query)),
        Err(_) => Err(NotificationError::SourceUnavailable(format!(
            "fetch timed out after {:?}",
            timeout
        ))),
    }
}

/// Re-applies the query's bound, ordering and limit to whatever a source
/// returned.
pub fn enforce_query(mut events: Vec<LikeEvent>, query: &LikeQuery) -> Vec<LikeEvent> {
    events.retain(|event| event.occurred_at > query.since_exclusive);
    events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
    events.truncate(query.limit);
    events
}
