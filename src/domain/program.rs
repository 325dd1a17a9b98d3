//! Reward program definitions.

use super::{Address, Timestamp};
use serde::{Deserialize, Serialize};

/// Parts-per-million resolution shared by reward shares and multipliers.
pub const PPM_RESOLUTION: u32 = 1_000_000;

/// Portion of a program's reward rate routed to one reserve token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveShare {
    pub reserve_token: Address,
    /// Share of the pool's reward rate in PPM.
    pub share_ppm: u32,
}

/// Time-bounded reward-rate assignment for a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolProgram {
    pub pool_token: Address,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    /// Reward token base units emitted per second across the whole pool.
    pub reward_rate: u128,
    pub reserve_shares: Vec<ReserveShare>,
}

impl PoolProgram {
    /// Reward rate for a single reserve token, floored.
    ///
    /// Returns None if the reserve doesn't take part in the program.
    pub fn reserve_rate(&self, reserve_token: &Address) -> Option<u128> {
        self.reserve_shares
            .iter()
            .find(|s| &s.reserve_token == reserve_token)
            .map(|s| self.reward_rate / u128::from(PPM_RESOLUTION) * u128::from(s.share_ppm)
                + self.reward_rate % u128::from(PPM_RESOLUTION) * u128::from(s.share_ppm)
                    / u128::from(PPM_RESOLUTION))
    }

    pub fn reserve_tokens(&self) -> impl Iterator<Item = &Address> {
        self.reserve_shares.iter().map(|s| &s.reserve_token)
    }

    /// Program duration in seconds.
    pub fn duration(&self) -> u64 {
        self.end_time.seconds_since(self.start_time)
    }
}
