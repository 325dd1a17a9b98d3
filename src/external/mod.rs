//! Collaborator interfaces: the position ledger, the checkpoint store, the
//! reward token and the liquidity pools.
//!
//! The engine only reads positions and checkpoints and emits mint, burn and
//! restake requests through these traits. Implementations must not call back
//! into the engine.

use crate::domain::{Address, Position, PositionId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub mod memory;

pub use memory::{CheckpointBook, InMemoryLedger, MintOutbox, PositionBook};

/// Read access to liquidity positions.
pub trait PositionSource: Send + Sync {
    fn position_exists(&self, id: PositionId) -> bool;

    /// Fetch a live position.
    ///
    /// # Returns
    /// `ExternalError::PositionNotFound` once the position has been fully withdrawn.
    fn position(&self, id: PositionId) -> Result<Position, ExternalError>;

    fn provider_positions_count(&self, provider: &Address) -> usize;

    /// Id of the provider's `index`-th position, in creation order.
    fn provider_position(&self, provider: &Address, index: usize) -> Option<PositionId>;
}

/// Per-provider "last reset" markers.
pub trait CheckpointSource: Send + Sync {
    /// Time of the provider's last removal or claim, zero if none.
    fn checkpoint(&self, provider: &Address) -> Timestamp;

    fn update_last_claim_time(&self, provider: &Address, at: Timestamp) -> Result<(), ExternalError>;
}

/// The reward token.
pub trait RewardMinter: Send + Sync {
    fn token(&self) -> Address;

    fn mint(&self, to: &Address, amount: u128) -> Result<(), ExternalError>;

    /// Undo a mint whose follow-up failed.
    fn burn(&self, from: &Address, amount: u128) -> Result<(), ExternalError>;
}

/// Liquidity provisioning on a provider's behalf.
pub trait LiquiditySink: Send + Sync {
    /// Add `amount` of `reward_token` to `pool_token` for `recipient`.
    ///
    /// # Returns
    /// Id of the new position, readable through the position source.
    fn add_liquidity_for(
        &self,
        recipient: &Address,
        pool_token: &Address,
        reward_token: &Address,
        amount: u128,
    ) -> Result<PositionId, ExternalError>;
}

/// Handles to every collaborator the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub positions: Arc<dyn PositionSource>,
    pub checkpoints: Arc<dyn CheckpointSource>,
    pub minter: Arc<dyn RewardMinter>,
    pub liquidity: Arc<dyn LiquiditySink>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("reward_token", &self.minter.token())
            .finish_non_exhaustive()
    }
}

/// All live positions of a provider, in creation order.
pub fn provider_positions(
    source: &dyn PositionSource,
    provider: &Address,
) -> Result<Vec<Position>, ExternalError> {
    let count = source.provider_positions_count(provider);
    let mut positions = Vec::with_capacity(count);
    for index in 0..count {
        let Some(id) = source.provider_position(provider, index) else {
            continue;
        };
        if source.position_exists(id) {
            positions.push(source.position(id)?);
        }
    }
    Ok(positions)
}

/// A token movement requested by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintRequest {
    pub kind: MintKind,
    pub account: Address,
    #[serde(with = "crate::domain::amount")]
    pub amount: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MintKind {
    Mint,
    Burn,
}

impl MintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MintKind::Mint => "mint",
            MintKind::Burn => "burn",
        }
    }
}

/// Error type for collaborator calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalError {
    /// The position does not exist (never created or fully withdrawn)
    PositionNotFound(PositionId),
    /// Minting the reward token failed
    MintFailed(String),
    /// Burning the reward token failed
    BurnFailed(String),
    /// Liquidity provisioning rejected the restake
    LiquidityFailed(String),
    /// The checkpoint store rejected an update
    CheckpointFailed(String),
}

impl fmt::Display for ExternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalError::PositionNotFound(id) => write!(f, "Position {} not found", id),
            ExternalError::MintFailed(msg) => write!(f, "Mint failed: {}", msg),
            ExternalError::BurnFailed(msg) => write!(f, "Burn failed: {}", msg),
            ExternalError::LiquidityFailed(msg) => write!(f, "Liquidity provisioning failed: {}", msg),
            ExternalError::CheckpointFailed(msg) => write!(f, "Checkpoint update failed: {}", msg),
        }
    }
}

impl std::error::Error for ExternalError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_error_display() {
        let err = ExternalError::PositionNotFound(PositionId::new(7));
        assert_eq!(err.to_string(), "Position 7 not found");

        let err = ExternalError::MintFailed("paused".to_string());
        assert_eq!(err.to_string(), "Mint failed: paused");

        let err = ExternalError::LiquidityFailed("pool closed".to_string());
        assert_eq!(err.to_string(), "Liquidity provisioning failed: pool closed");
    }

    #[test]
    fn test_mint_request_serializes_amount_as_string() {
        let req = MintRequest {
            kind: MintKind::Mint,
            account: Address::new("0xabc".to_string()),
            amount: 10,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["kind"], "mint");
        assert_eq!(json["amount"], "10");
    }
}
