//! # confab-call
//!
//! In-memory call signaling: one state machine per audio/video call attempt,
//! with lock-free compare-and-set transitions so two parties racing to
//! accept/decline/timeout the same ring resolve to exactly one winner.
//!
//! Live sessions never touch the database; only terminal outcomes are handed
//! back to the caller for call-log persistence.

pub mod coordinator;
pub mod error;

pub use coordinator::{CallCoordinator, CallSnapshot};
pub use error::CallError;
