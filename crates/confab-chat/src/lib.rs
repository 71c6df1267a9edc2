//! # confab-chat
//!
//! The chat service: room and message operations composed into atomic units
//! of work over `confab-store`.  This crate owns the domain invariants --
//! membership counts, direct-room reuse, preview derivation, monotonic read
//! receipts -- while the store stays a dumb persistence layer.

pub mod error;
pub mod service;

pub use error::ChatError;
pub use service::ChatService;
