#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Small-business ERP data client.
//!
//! This crate re-exports the core types, the cache and the services, and
//! provides [`Erp`], which combines a store, an auth provider, the query
//! cache and the mutation coordinator behind one handle.
//!
//! # Features
//!
//! - `sqlite` - Embedded SQLite store ([`SqliteStore`]) with local auth
//! - `rest` - Hosted table and auth APIs ([`RestClient`])

// Core types and traits
pub use erp_core::*;

// Cache and coordination
pub use erp_query::{
    CacheConfig, InvalidationRules, KeyPattern, LifecycleEvent, MaintenanceReport,
    MutationCoordinator, QueryCache, QueryState, RetryPolicy, StalenessPolicy, Subscription,
};

// Services
pub use erp_services::{
    CategoryStatistics, ClientService, CollectionService, InventoryService, ProductionRun,
    ProductionService, ProductionStage, ReceivablesSummary, SalesService, Services, SupplyService,
    SupplyStatistics, TableService,
};

// Backends
#[cfg(feature = "rest")]
pub use erp_rest::{RestAuth, RestClient, RestConfig, RestStore};
#[cfg(feature = "sqlite")]
pub use erp_store::{LocalAuth, SqliteStore};

mod app;
pub use app::{Erp, ErpBuilder};

/// Dashboard totals.
pub mod dashboard;
pub use dashboard::DashboardSummary;

/// Cache keys used by [`Erp`].
pub mod keys;

/// Log subscriber setup.
pub mod logging;
pub use logging::{LogConfig, LogFormat};
