//! # confab-store
//!
//! SQLite-backed persistence for the chat core: rooms, messages,
//! read-receipt sets, reactions, and the call log.
//!
//! The crate exposes a synchronous [`Database`] handle plus a [`StoreCtx`]
//! that carries every typed CRUD operation.  A `StoreCtx` is obtained either
//! from [`Database::ctx`] (autocommit) or inside a
//! [`TransactionManager`] unit of work, so the same operations run
//! identically in and out of a transaction.

pub mod calls;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod reactions;
pub mod rooms;
pub mod tx;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
pub use tx::{StoreCtx, TransactionManager};
