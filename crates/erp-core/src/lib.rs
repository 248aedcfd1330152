#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core traits and types for the ERP data client.
//!
//! This crate provides the foundational abstractions shared by every layer:
//!
//! - [`RemoteStore`](store::RemoteStore) - CRUD and stored procedures over the hosted database
//! - [`AuthProvider`](auth::AuthProvider) - Session issuance and auth events
//! - [`QueryKey`](key::QueryKey) - Structured cache keys rooted at a [`Resource`](key::Resource)
//! - [`Clock`](clock::Clock) - Injectable time source
//! - [`ErpError`](error::ErpError) - Error taxonomy

/// Authentication seam and signed-in user state.
pub mod auth;
/// Injectable wall clock.
pub mod clock;
/// `{ data, error }` response envelopes.
pub mod envelope;
/// Error types for ERP operations.
pub mod error;
/// Cache keys and resource tags.
pub mod key;
/// Remote store trait and query builder.
pub mod store;
/// Business records (clients, products, supplies, sales, ...).
pub mod types;

// Re-export commonly used items at crate root
pub use auth::{AuthEvent, AuthEvents, AuthProvider, AuthState, AuthSubscription, Session, User, UserRole};
pub use clock::{Clock, ManualClock, SystemClock};
pub use envelope::{ApiResponse, Page, PaginatedResponse};
pub use error::{ErpError, Result};
pub use key::{KeyPart, QueryKey, Resource};
pub use store::{Direction, Filter, FilterOp, Record, RemoteStore, Rows, SelectQuery};
pub use types::{
    Client, Collection, CollectionStatus, ConsumedSupply, Currency, LowStockSupply, MIN_STOCK_ALERT,
    MovementDirection, MovementForm, Product, ProductionRecord, ProductionRequest,
    RECENT_SALES_LIMIT, Sale, SaleStatus, StockMovement, StockStatus, Supply, SupplyCategory,
    SupplyForm, SupplyPatch, Unit,
};
