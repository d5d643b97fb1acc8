//! # sage-store
//!
//! Document-oriented persistence on SQLite for the Sage coach backend.
//!
//! The store keeps one document per user (credit fields, preferences,
//! graph history) and one document per conversation (messages, branch
//! metadata). Repositories are stateless and take `&Connection`; the
//! high-level [`DocumentStore`] wraps a connection pool and serializes
//! per-user graph-history writes with an in-process lock map.
//!
//! ## Crate Position
//!
//! Depends on: sage-core. Depended on by: sage-runtime.

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod migrations;
pub mod repositories;
pub mod store;

pub use connection::{ConnectionConfig, ConnectionPool, PooledConnection, new_file, new_in_memory};
pub use errors::{Result, StoreError};
pub use migrations::run_migrations;
pub use repositories::conversation::ConversationRepo;
pub use repositories::user::{NewUser, UserRepo};
pub use store::DocumentStore;
