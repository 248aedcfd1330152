//! Application lifecycle signals that trigger refetches.

use std::fmt;

/// Environment change delivered to [`QueryCache::handle`](crate::QueryCache::handle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// The application window regained focus.
    Focus,
    /// Network connectivity came back.
    Reconnect,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Focus => f.write_str("focus"),
            Self::Reconnect => f.write_str("reconnect"),
        }
    }
}
