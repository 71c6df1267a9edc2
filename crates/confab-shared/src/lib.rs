//! # confab-shared
//!
//! Identifier newtypes, closed domain enums, and the request/response models
//! exchanged between the gateway and the chat/call core.  Pure data: every
//! type here derives `Serialize`/`Deserialize` so aggregates can be handed
//! straight back to connected clients.

pub mod protocol;
pub mod types;

pub use types::*;
