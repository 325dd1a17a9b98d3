use crate::domain::{Address, PositionId, Timestamp};
use crate::external::ExternalError;
use thiserror::Error;

/// Errors raised by the rewards engine.
///
/// Every error aborts the whole operation; nothing is committed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewardsError {
    // Validation
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("mismatched batch lengths: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("invalid program window: start {start} is after end {end}")]
    InvalidWindow { start: Timestamp, end: Timestamp },
    #[error("invalid reward shares: {0}")]
    InvalidRewardShares(String),
    #[error("pool {0} already has a reward program")]
    DuplicateProgram(Address),
    #[error("pool {0} has no reward program")]
    ProgramNotFound(Address),
    #[error("epoch {0} is already committed")]
    AlreadyCommitted(u64),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("position {0} not found")]
    PositionNotFound(PositionId),

    // Access
    #[error("access denied for {caller}: {reason}")]
    AccessDenied { caller: Address, reason: String },

    // Conservation
    #[error("total rewards {requested} would exceed the maximum of {max}")]
    MaxRewardsExceeded { requested: u128, max: u128 },
    #[error("epoch {epoch} rewards {requested} would exceed the per-epoch maximum of {max}")]
    MaxRewardsPerEpochExceeded {
        epoch: u64,
        requested: u128,
        max: u128,
    },
    #[error("ceiling {ceiling} is below the {allocated} already allocated")]
    CeilingBelowAllocated { ceiling: u128, allocated: u128 },

    // No-op
    #[error("no rewards to claim")]
    NoRewards,

    // Invariants: corrupted collaborator data, fatal for the operation.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),

    #[error(transparent)]
    External(#[from] ExternalError),
}

impl RewardsError {
    /// Whether the error signals corrupted state rather than a caller mistake.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RewardsError::InvariantViolation(_) | RewardsError::Overflow(_)
        )
    }
}

/// Reject the zero address for the given field.
pub(crate) fn require_address(field: &str, addr: &Address) -> Result<(), RewardsError> {
    if addr.is_zero() {
        return Err(RewardsError::InvalidAddress(format!(
            "{} must not be the zero address",
            field
        )));
    }
    Ok(())
}
