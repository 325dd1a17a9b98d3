//! Liquidity positions as reported by the position ledger.

use super::{Address, PositionId, Timestamp};
use serde::{Deserialize, Serialize};

/// A provider's stake in one reserve of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub provider: Address,
    pub pool_token: Address,
    pub reserve_token: Address,
    /// Reserve amount currently staked; this is the position's reward weight.
    pub reserve_amount: u128,
    pub start_time: Timestamp,
}

impl Position {
    /// Whether this position counts toward `(pool, reserve)` rewards.
    pub fn stakes_in(&self, pool_token: &Address, reserve_token: &Address) -> bool {
        &self.pool_token == pool_token && &self.reserve_token == reserve_token
    }
}
