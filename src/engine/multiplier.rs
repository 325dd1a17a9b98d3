//! Loyalty multiplier for uninterrupted staking.
//!
//! The multiplier grows by 25% for every full week a stake is held without a
//! claim or removal, capped at 200% after four weeks. A week boundary belongs
//! to the lower bucket: exactly seven days still earns 100%.

use crate::domain::{Timestamp, PPM_RESOLUTION, SECONDS_PER_WEEK};

/// Multiplier gained per completed week, in PPM.
pub const MULTIPLIER_INCREMENT: u32 = PPM_RESOLUTION / 4;

/// Number of weekly steps after which the multiplier stops growing.
pub const MAX_MULTIPLIER_STEPS: u64 = 4;

/// Highest multiplier any stake can reach (200%).
pub const MAX_MULTIPLIER: u32 = PPM_RESOLUTION + MULTIPLIER_INCREMENT * MAX_MULTIPLIER_STEPS as u32;

/// Inputs for one position's multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplierInput {
    /// When the position (or staking) started.
    pub start_time: Timestamp,
    /// `min(program end, now)`.
    pub end_time: Timestamp,
    /// Latest claim or removal affecting the provider.
    pub last_reset_time: Timestamp,
}

impl MultiplierInput {
    /// Seconds of uninterrupted staking, clamped at zero.
    pub fn effective_duration(&self) -> u64 {
        let anchor = self.start_time.max(self.last_reset_time);
        self.end_time.seconds_since(anchor)
    }

    pub fn multiplier(&self) -> u32 {
        rewards_multiplier(self.effective_duration())
    }
}

/// Multiplier in PPM for a staking duration in seconds.
pub fn rewards_multiplier(duration: u64) -> u32 {
    let steps = duration.saturating_sub(1) / SECONDS_PER_WEEK;
    PPM_RESOLUTION + MULTIPLIER_INCREMENT * steps.min(MAX_MULTIPLIER_STEPS) as u32
}
