#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! HTTP backend for the ERP data client.
//!
//! This crate implements the `erp-core` seams against a hosted service:
//!
//! - [`RestStore`] - [`RemoteStore`](erp_core::RemoteStore) over the PostgREST table API
//! - [`RestAuth`] - [`AuthProvider`](erp_core::AuthProvider) over the GoTrue auth API
//! - [`RestClient`] - Shared HTTP client and session token
//! - [`RestConfig`] - Base URL, API key and timeout, loadable from the environment
//!
//! HTTP statuses and Postgres error codes are mapped into
//! [`ErpError`](erp_core::ErpError): 401/403 become auth errors, 400/422
//! validation errors, 404 not-found, 409 conflicts, a `check_violation`
//! from the stock procedures becomes `InsufficientStock`, and everything
//! else (including transport failures) is a retryable remote error.

/// GoTrue auth provider.
pub mod auth;
/// Shared HTTP client and error mapping.
pub mod client;
/// Connection settings.
pub mod config;
/// PostgREST remote store.
pub mod store;

pub use auth::RestAuth;
pub use client::RestClient;
pub use config::RestConfig;
pub use store::RestStore;
