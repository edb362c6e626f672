//! Like-notification data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Username shown when the liker's profile could not be joined.
pub const UNKNOWN_ACTOR_USERNAME: &str = "Someone";

/// Who performed a like. A denormalized copy of the liker's profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRef {
    /// Profile id of the liker, taken from the like itself so it survives a
    /// missing profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl ActorRef {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: None,
            username: username.into(),
            display_name: None,
            avatar_url: None,
        }
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN_ACTOR_USERNAME)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_avatar_url(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }

    /// The name to show: the display name when set and non-empty, else the username.
    pub fn name(&self) -> &str {
        match self.display_name.as_deref() {
            Some(display_name) if !display_name.is_empty() => display_name,
            _ => &self.username,
        }
    }

    /// Key telling two likers apart: the profile id, or the username for
    /// actors built without one.
    pub fn identity(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.username)
    }
}

/// A single like on one of the viewer's posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeEvent {
    pub event_id: String,
    pub post_id: String,
    /// Text of the liked post, empty when the join did not carry it.
    pub post_content: String,
    pub actor: ActorRef,
    pub occurred_at: DateTime<Utc>,
}

/// One actor inside a notification group with the time of their like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupActor {
    pub actor: ActorRef,
    pub occurred_at: DateTime<Utc>,
}

/// All likes on one post collapsed into a single notification entry.
///
/// Derived from [`LikeEvent`]s on every fetch and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationGroup {
    pub post_id: String,
    pub post_content_snippet: String,
    /// Most recent first, one entry per actor.
    pub actors: Vec<GroupActor>,
    pub latest_event_at: DateTime<Utc>,
    pub summary: String,
}

impl NotificationGroup {
    /// The most recent liker, whose name and avatar lead the entry.
    pub fn lead_actor(&self) -> Option<&GroupActor> {
        self.actors.first()
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    pub fn actor_names(&self) -> Vec<&str> {
        self.actors.iter().map(|a| a.actor.name()).collect()
    }
}
