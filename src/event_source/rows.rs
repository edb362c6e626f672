//! Raw like rows as returned by the backing store's join, and their decoding
//! into [`LikeEvent`]s.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

use crate::notifications::{ActorRef, LikeEvent, NotificationError};
use crate::timestamps::parse_timestamp;

/// Post columns joined onto a like row.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostColumns {
    #[serde(default)]
    pub content: Option<String>,
}

/// Liker profile columns joined onto a like row.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActorColumns {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// One row of `post_likes` joined with its post and the liker's profile.
///
/// Every field is optional so that a single bad row can be reported and
/// skipped instead of failing the whole response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LikeRow {
    #[serde(default, deserialize_with = "id_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "id_string")]
    pub post_id: Option<String>,
    /// Liker's profile id, present even when the profile did not join.
    #[serde(default, deserialize_with = "id_string")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default, rename = "posts")]
    pub post: Option<PostColumns>,
    #[serde(default)]
    pub actor: Option<ActorColumns>,
}

/// Accepts ids encoded either as JSON strings (uuid) or numbers (bigint).
fn id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl LikeRow {
    pub fn into_event(self) -> Result<LikeEvent, NotificationError> {
        let row_id = self.id.clone().unwrap_or_else(|| "<no id>".to_string());
        let malformed = |reason: &str| NotificationError::MalformedRow {
            row_id: row_id.clone(),
            reason: reason.to_string(),
        };

        let event_id = self.id.ok_or_else(|| malformed("missing id"))?;
        let post_id = self.post_id.ok_or_else(|| malformed("missing post_id"))?;
        let created_at = self
            .created_at
            .ok_or_else(|| malformed("missing created_at"))?;
        let occurred_at = parse_timestamp(&created_at)
            .ok_or_else(|| malformed(&format!("unparseable created_at {:?}", created_at)))?;

        let actor = match self.actor {
            Some(ActorColumns {
                username: Some(username),
                display_name,
                avatar_url,
            }) if !username.trim().is_empty() => ActorRef {
                id: self.user_id,
                username,
                display_name,
                avatar_url,
            },
            _ => ActorRef {
                id: self.user_id,
                ..ActorRef::unknown()
            },
        };

        Ok(LikeEvent {
            event_id,
            post_id,
            post_content: self.post.and_then(|p| p.content).unwrap_or_default(),
            actor,
            occurred_at,
        })
    }
}

/// Decodes rows, logging and dropping the malformed ones.
pub fn decode_rows(rows: Vec<LikeRow>) -> Vec<LikeEvent> {
    rows.into_iter()
        .filter_map(|row| match row.into_event() {
            Ok(event) => Some(event),
            Err(err) => {
                warn!("Skipping like row: {}", err);
                None
            }
        })
        .collect()
}
