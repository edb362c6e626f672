//! Scoped refresh signals published by realtime transports.

use tokio::sync::broadcast;
use tracing::debug;

const BUS_CAPACITY: usize = 64;

/// Which cached view a signal invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshScope {
    Posts,
    Notifications,
}

impl std::fmt::Display for RefreshScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshScope::Posts => write!(f, "posts"),
            RefreshScope::Notifications => write!(f, "notifications"),
        }
    }
}

#[derive(Clone)]
pub struct InvalidationBus {
    sender: broadcast::Sender<RefreshScope>,
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InvalidationBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefreshScope> {
        self.sender.subscribe()
    }

    /// Publishes a signal for `scope`. Returns how many subscribers got it;
    /// publishing with nobody listening is not an error.
    pub fn trigger(&self, scope: RefreshScope) -> usize {
        match self.sender.send(scope) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("No subscribers for {} invalidation", scope);
                0
            }
        }
    }
}
