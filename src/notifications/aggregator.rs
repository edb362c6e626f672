//! Groups like events by post and builds the per-post summaries.
//!
//! Everything here is pure: the same events always produce the same groups,
//! in the same order, with the same text.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::models::{GroupActor, LikeEvent, NotificationGroup};
use super::presentation::{snippet, DEFAULT_SNIPPET_MAX_GRAPHEMES};

#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    pub snippet_max_graphemes: usize,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self {
            snippet_max_graphemes: DEFAULT_SNIPPET_MAX_GRAPHEMES,
        }
    }
}

/// Work-in-progress group, kept in first-seen order of its post.
struct PendingGroup<'a> {
    post_id: &'a str,
    content: Option<(&'a str, DateTime<Utc>)>,
    actors: Vec<GroupActor>,
    actor_slots: HashMap<&'a str, usize>,
}

impl<'a> PendingGroup<'a> {
    fn new(post_id: &'a str) -> Self {
        Self {
            post_id,
            content: None,
            actors: Vec::new(),
            actor_slots: HashMap::new(),
        }
    }

    fn push(&mut self, event: &'a LikeEvent) {
        if !event.post_content.is_empty() {
            let newer = match self.content {
                Some((_, seen_at)) => event.occurred_at > seen_at,
                None => true,
            };
            if newer {
                self.content = Some((event.post_content.as_str(), event.occurred_at));
            }
        }

        match self.actor_slots.get(event.actor.identity()) {
            Some(&slot) => {
                // Same actor twice on one post: keep only their latest like.
                let existing = &mut self.actors[slot];
                if event.occurred_at > existing.occurred_at {
                    existing.actor = event.actor.clone();
                    existing.occurred_at = event.occurred_at;
                }
            }
            None => {
                self.actor_slots
                    .insert(event.actor.identity(), self.actors.len());
                self.actors.push(GroupActor {
                    actor: event.actor.clone(),
                    occurred_at: event.occurred_at,
                });
            }
        }
    }

    fn finish(mut self, snippet_max_graphemes: usize) -> Option<NotificationGroup> {
        // Stable sort so equal timestamps keep arrival order.
        self.actors.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        let latest_event_at = self.actors.first()?.occurred_at;
        let summary = like_summary(&self.actors);
        let content = self.content.map(|(content, _)| content).unwrap_or_default();

        Some(NotificationGroup {
            post_id: self.post_id.to_string(),
            post_content_snippet: snippet(content, snippet_max_graphemes),
            actors: self.actors,
            latest_event_at,
            summary,
        })
    }
}

impl Aggregator {
    pub fn new(snippet_max_graphemes: usize) -> Self {
        Self {
            snippet_max_graphemes,
        }
    }

    /// Collapses `events` into one group per post, most recently liked first.
    pub fn aggregate(&self, events: &[LikeEvent]) -> Vec<NotificationGroup> {
        let mut pending: Vec<PendingGroup<'_>> = Vec::new();
        let mut group_slots: HashMap<&str, usize> = HashMap::new();

        for event in events {
            let slot = *group_slots
                .entry(event.post_id.as_str())
                .or_insert_with(|| {
                    pending.push(PendingGroup::new(&event.post_id));
                    pending.len() - 1
                });
            pending[slot].push(event);
        }

        let mut groups: Vec<NotificationGroup> = pending
            .into_iter()
            .filter_map(|group| group.finish(self.snippet_max_graphemes))
            .collect();
        groups.sort_by(|a, b| b.latest_event_at.cmp(&a.latest_event_at));
        groups
    }
}

/// Groups `events` with the default snippet length.
pub fn aggregate(events: &[LikeEvent]) -> Vec<NotificationGroup> {
    Aggregator::default().aggregate(events)
}

/// Summary line for a group whose actors are already ordered most recent first.
pub fn like_summary(actors: &[GroupActor]) -> String {
    let names: Vec<&str> = actors.iter().map(|a| a.actor.name()).collect();
    summary_for_names(&names)
}

pub fn summary_for_names(names: &[&str]) -> String {
    match names {
        [] => String::new(),
        [only] => format!("{} liked your post", only),
        [first, second] => format!("{} and {} liked your post", first, second),
        [first, second, rest @ ..] => {
            let others = if rest.len() == 1 { "other" } else { "others" };
            format!(
                "{}, {} and {} {} liked your post",
                first,
                second,
                rest.len(),
                others
            )
        }
    }
}
