use thiserror::Error;

use confab_store::StoreError;

/// Errors produced by the chat service.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Participant set violates the room membership invariant.
    #[error("Invalid membership: {0}")]
    InvalidMembership(String),

    /// Store-layer failure, including `NotFound` for unknown ids.  Failures
    /// inside a unit of work abort it and propagate here unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChatError>;
