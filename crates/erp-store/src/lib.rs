#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Embedded store backend for the ERP data client.
//!
//! This crate provides implementations of the seams defined in `erp-core`:
//!
//! - [`SqliteStore`] - [`RemoteStore`](erp_core::RemoteStore) over a SQLite file or memory
//! - [`LocalAuth`] - [`AuthProvider`](erp_core::AuthProvider) over the same database

/// Local e-mail/password authentication.
pub mod auth;
/// Stored procedures run by [`SqliteStore`].
pub mod procedures;
/// SQLite-backed remote store.
pub mod sqlite;

pub use auth::LocalAuth;
pub use sqlite::SqliteStore;
