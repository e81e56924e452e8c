//! # cafe-store
//!
//! Keyed persistence for the cafe node, backed by SQLite.
//!
//! Holds the three record kinds the relay works with: registered clients,
//! per-client thread snapshots and per-client inbox entries. The crate
//! exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection`; every mutation is a single SQL statement, so
//! concurrent upserts to one key serialize inside SQLite without lost
//! updates.

pub mod clients;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod threads;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
