use thiserror::Error;

use confab_shared::{CallState, UserId};

/// Errors produced by the call coordinator.
///
/// `InvalidTransition` and `CallAlreadyEnded` are expected, recoverable
/// outcomes of racing parties, not faults.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The caller already has a live (non-terminal) call.
    #[error("Caller {0} is already in a call")]
    CallerBusy(UserId),

    /// The receiver already has a live (non-terminal) call.
    #[error("Receiver {0} is already in a call")]
    ReceiverBusy(UserId),

    /// No session with this call id.
    #[error("Call not found")]
    NotFound,

    /// The requested transition lost to another, or was never legal from the
    /// observed state.
    #[error("Invalid transition from {from}")]
    InvalidTransition { from: CallState },

    /// Hangup on a call that already reached a terminal outcome.
    #[error("Call already ended: {outcome}")]
    CallAlreadyEnded { outcome: CallState },
}

pub type Result<T> = std::result::Result<T, CallError>;
