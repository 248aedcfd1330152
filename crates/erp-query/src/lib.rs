#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Query cache and mutation coordination for the ERP data client.
//!
//! - [`QueryCache`] - Keyed, de-duplicating cache of async reads
//! - [`MutationCoordinator`] - Runs writes and invalidates affected keys
//! - [`CacheConfig`] - Staleness tiers, retention, retries, refetch triggers
//! - [`RetryPolicy`] - Capped exponential backoff

/// Keyed cache of asynchronous read results.
pub mod cache;
/// Lifecycle signals (focus, reconnect).
pub mod events;
/// Write coordination and invalidation rules.
pub mod mutation;
/// Staleness tiers and cache configuration.
pub mod policy;
/// Retry with exponential backoff.
pub mod retry;

pub use cache::{MaintenanceReport, QueryCache, QueryState, Subscription};
pub use events::LifecycleEvent;
pub use mutation::{InvalidationRules, MutationCoordinator};
pub use policy::{CacheConfig, KeyPattern, StalenessPolicy};
pub use retry::RetryPolicy;
