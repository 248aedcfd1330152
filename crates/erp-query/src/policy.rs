//! Cache policy: staleness tiers, retention, retries and refetch triggers.

use erp_core::{QueryKey, Resource};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Matches a family of cache keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    /// Keys whose root tag is one of the given tags.
    Root(Vec<String>),
    /// Keys with the given root tag that also contain the sub-tag.
    RootWith(String, String),
    /// Keys containing any of the given tags at any position.
    Contains(Vec<String>),
}

impl KeyPattern {
    /// Keys rooted at any of the resources.
    #[must_use]
    pub fn roots(resources: &[Resource]) -> Self {
        Self::Root(resources.iter().map(|r| r.tag().to_string()).collect())
    }

    /// Keys rooted at `resource` that contain `tag`.
    #[must_use]
    pub fn root_with(resource: Resource, tag: &str) -> Self {
        Self::RootWith(resource.tag().to_string(), tag.to_string())
    }

    /// Keys containing any of `tags`.
    #[must_use]
    pub fn contains(tags: &[&str]) -> Self {
        Self::Contains(tags.iter().map(|t| (*t).to_string()).collect())
    }

    /// Returns true if `key` belongs to this family.
    #[must_use]
    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            Self::Root(roots) => key.root().is_some_and(|r| roots.iter().any(|t| t == r)),
            Self::RootWith(root, tag) => key.root() == Some(root.as_str()) && key.contains(tag),
            Self::Contains(tags) => tags.iter().any(|t| key.contains(t)),
        }
    }
}

/// Maps a key to its freshness window. The first matching tier wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalenessPolicy {
    tiers: Vec<(KeyPattern, Duration)>,
    default: Duration,
}

impl StalenessPolicy {
    /// A policy where every key uses `default`.
    #[must_use]
    pub const fn uniform(default: Duration) -> Self {
        Self {
            tiers: Vec::new(),
            default,
        }
    }

    /// Appends a tier. Earlier tiers take precedence.
    #[must_use]
    pub fn with_tier(mut self, pattern: KeyPattern, window: Duration) -> Self {
        self.tiers.push((pattern, window));
        self
    }

    /// Freshness window for `key`.
    #[must_use]
    pub fn stale_time(&self, key: &QueryKey) -> Duration {
        self.tiers
            .iter()
            .find(|(pattern, _)| pattern.matches(key))
            .map_or(self.default, |(_, window)| *window)
    }
}

impl Default for StalenessPolicy {
    /// Near-real-time recent sales, frequently-changing sales/inventory/
    /// collections, slow-changing clients/config, historical charts and
    /// statistics, five minutes for the rest.
    fn default() -> Self {
        Self::uniform(Duration::from_secs(5 * 60))
            .with_tier(
                KeyPattern::root_with(Resource::Sales, "recent"),
                Duration::from_secs(30),
            )
            .with_tier(
                KeyPattern::roots(&[Resource::Sales, Resource::Inventory, Resource::Collections]),
                Duration::from_secs(2 * 60),
            )
            .with_tier(
                KeyPattern::roots(&[Resource::Clients, Resource::Config]),
                Duration::from_secs(10 * 60),
            )
            .with_tier(
                KeyPattern::contains(&["chart", "statistics"]),
                Duration::from_secs(30 * 60),
            )
    }
}

/// Query cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Freshness windows.
    pub staleness: StalenessPolicy,
    /// Entries unread for longer than this, with no subscribers, are evicted.
    pub gc_time: Duration,
    /// Retry policy for reads.
    pub read_retry: RetryPolicy,
    /// Keys refetched on window focus (when stale).
    pub focus_refetch: KeyPattern,
    /// Keys refetched on network reconnection (when stale).
    pub reconnect_refetch: KeyPattern,
    /// Keys refetched on a fixed interval while subscribed.
    pub polling: Vec<(KeyPattern, Duration)>,
}

impl CacheConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the staleness policy.
    #[must_use]
    pub fn with_staleness(mut self, staleness: StalenessPolicy) -> Self {
        self.staleness = staleness;
        self
    }

    /// Sets the retention window.
    #[must_use]
    pub const fn with_gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = gc_time;
        self
    }

    /// Sets the read retry policy.
    #[must_use]
    pub const fn with_read_retry(mut self, retry: RetryPolicy) -> Self {
        self.read_retry = retry;
        self
    }

    /// Adds a polling rule.
    #[must_use]
    pub fn with_polling(mut self, pattern: KeyPattern, every: Duration) -> Self {
        self.polling.push((pattern, every));
        self
    }

    /// Polling interval for `key`, if it is polled.
    #[must_use]
    pub fn polling_interval(&self, key: &QueryKey) -> Option<Duration> {
        self.polling
            .iter()
            .find(|(pattern, _)| pattern.matches(key))
            .map(|(_, every)| *every)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            staleness: StalenessPolicy::default(),
            gc_time: Duration::from_secs(60 * 60),
            read_retry: RetryPolicy::READS,
            focus_refetch: KeyPattern::roots(&[Resource::Sales, Resource::Inventory]),
            reconnect_refetch: KeyPattern::roots(&[
                Resource::Sales,
                Resource::Inventory,
                Resource::Clients,
            ]),
            polling: vec![(
                KeyPattern::root_with(Resource::Sales, "recent"),
                Duration::from_secs(2 * 60),
            )],
        }
    }
}
