//! Like notifications: models, grouping and display helpers

pub mod aggregator;
mod error;
mod models;
pub mod presentation;

pub use aggregator::{aggregate, like_summary, Aggregator};
pub use error::NotificationError;
pub use models::{ActorRef, GroupActor, LikeEvent, NotificationGroup, UNKNOWN_ACTOR_USERNAME};
