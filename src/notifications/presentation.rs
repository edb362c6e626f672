//! Display helpers for rendering notification groups.

use chrono::{DateTime, Utc};
use serde::Serialize;
use unicode_segmentation::UnicodeSegmentation;

use super::NotificationGroup;

pub const DEFAULT_SNIPPET_MAX_GRAPHEMES: usize = 120;

const ELLIPSIS: &str = "…";

/// Trims `content` and cuts it to at most `max_graphemes` user-perceived
/// characters, appending an ellipsis when something was cut.
pub fn snippet(content: &str, max_graphemes: usize) -> String {
    let content = content.trim();
    let mut graphemes = content.grapheme_indices(true);
    match graphemes.nth(max_graphemes) {
        None => content.to_string(),
        Some((cut_at, _)) => {
            let mut truncated = content[..cut_at].trim_end().to_string();
            truncated.push_str(ELLIPSIS);
            truncated
        }
    }
}

/// Short label for how long ago `at` happened, relative to `now`.
///
/// Anything older than a week is shown as an absolute UTC date. Timestamps in
/// the future (clock skew between devices) read as "just now".
pub fn relative_label(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(at);
    if elapsed.num_minutes() < 1 {
        "just now".to_string()
    } else if elapsed.num_hours() < 1 {
        format!("{}m", elapsed.num_minutes())
    } else if elapsed.num_days() < 1 {
        format!("{}h", elapsed.num_hours())
    } else if elapsed.num_days() < 7 {
        format!("{}d", elapsed.num_days())
    } else {
        at.format("%Y-%m-%d %H:%M").to_string()
    }
}

/// One rendered row of the notifications list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupView {
    pub post_id: String,
    pub summary: String,
    pub snippet: String,
    pub lead_actor: String,
    pub lead_avatar_url: Option<String>,
    pub actor_count: usize,
    pub when: String,
    pub latest_event_at: DateTime<Utc>,
}

impl GroupView {
    pub fn new(group: &NotificationGroup, now: DateTime<Utc>) -> Self {
        let lead = group.lead_actor();
        Self {
            post_id: group.post_id.clone(),
            summary: group.summary.clone(),
            snippet: group.post_content_snippet.clone(),
            lead_actor: lead
                .map(|a| a.actor.name().to_string())
                .unwrap_or_default(),
            lead_avatar_url: lead.and_then(|a| a.actor.avatar_url.clone()),
            actor_count: group.actor_count(),
            when: relative_label(group.latest_event_at, now),
            latest_event_at: group.latest_event_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn short_content_is_untouched() {
        assert_eq!(snippet("  sunset at the pier  ", 40), "sunset at the pier");
        assert_eq!(snippet("", 10), "");
    }

    #[test]
    fn long_content_is_cut_with_ellipsis() {
        assert_eq!(snippet("abcdefghij", 4), "abcd…");
        assert_eq!(snippet("one two three", 4), "one…");
    }

    #[test]
    fn exact_length_is_not_cut() {
        assert_eq!(snippet("abcd", 4), "abcd");
    }

    #[test]
    fn cuts_on_grapheme_boundaries() {
        // Family emoji is a single grapheme made of several code points.
        let content = "👨‍👩‍👧🌅🌊";
        assert_eq!(snippet(content, 1), "👨‍👩‍👧…");
        assert_eq!(snippet("e\u{301}e\u{301}e\u{301}", 2), "e\u{301}e\u{301}…");
    }

    #[test]
    fn relative_labels() {
        let now = at("2024-05-10T12:00:00Z");
        assert_eq!(relative_label(now - Duration::seconds(30), now), "just now");
        assert_eq!(relative_label(now + Duration::seconds(30), now), "just now");
        assert_eq!(relative_label(now - Duration::minutes(5), now), "5m");
        assert_eq!(relative_label(now - Duration::hours(3), now), "3h");
        assert_eq!(relative_label(now - Duration::days(2), now), "2d");
        assert_eq!(
            relative_label(at("2024-04-01T08:30:00Z"), now),
            "2024-04-01 08:30"
        );
    }

    #[test]
    fn group_view_uses_lead_actor() {
        use crate::notifications::{aggregate, ActorRef, LikeEvent};

        let now = at("2024-05-10T12:00:00Z");
        let like = |id: &str, actor: ActorRef, when: &str| LikeEvent {
            event_id: id.to_string(),
            post_id: "p1".to_string(),
            post_content: "sunset".to_string(),
            actor,
            occurred_at: at(when),
        };
        let groups = aggregate(&[
            like("l1", ActorRef::new("alice"), "2024-05-10T11:00:00Z"),
            like(
                "l2",
                ActorRef::new("bob")
                    .with_display_name("Bob")
                    .with_avatar_url("https://img/bob.png"),
                "2024-05-10T11:55:00Z",
            ),
        ]);

        let view = GroupView::new(&groups[0], now);
        assert_eq!(view.post_id, "p1");
        assert_eq!(view.lead_actor, "Bob");
        assert_eq!(view.lead_avatar_url.as_deref(), Some("https://img/bob.png"));
        assert_eq!(view.actor_count, 2);
        assert_eq!(view.summary, "Bob and alice liked your post");
        assert_eq!(view.snippet, "sunset");
        assert_eq!(view.when, "5m");
    }
}
