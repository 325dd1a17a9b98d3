//! Provider reward ledger entries.
//!
//! One flat record per (provider, pool, reserve). Base rewards accrue without
//! any multiplier; the multiplier is applied when the entry is valued. The
//! debt fields freeze the value of rewards earned before the multiplier clock
//! was last reset, so a reset never discounts what was already earned.

use super::accumulator::PoolReserve;
use super::math::{mul_div, REWARD_RATE_FACTOR};
use super::RewardsError;
use crate::domain::{Address, Timestamp, PPM_RESOLUTION};
use serde::{Deserialize, Serialize};

/// Composite key of a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RewardKey {
    pub provider: Address,
    pub pool_token: Address,
    pub reserve_token: Address,
}

impl RewardKey {
    pub fn new(provider: Address, pool_token: Address, reserve_token: Address) -> Self {
        Self {
            provider,
            pool_token,
            reserve_token,
        }
    }

    pub fn pool_reserve(&self) -> PoolReserve {
        PoolReserve::new(self.pool_token.clone(), self.reserve_token.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRewards {
    pub provider: Address,
    pub pool_token: Address,
    pub reserve_token: Address,
    /// Sum of the provider's live reserve amounts in this (pool, reserve).
    pub staked_amount: u128,
    pub reward_per_token_paid: u128,
    pub pending_base_rewards: u128,
    pub total_claimed_rewards: u128,
    /// Anchor of the multiplier clock; only moves forward.
    pub effective_staking_time: Timestamp,
    /// Portion of `pending_base_rewards` whose value is frozen.
    pub base_rewards_debt: u128,
    pub base_rewards_debt_multiplier: u32,
}

impl ProviderRewards {
    pub fn new(key: &RewardKey, reward_per_token: u128) -> Self {
        Self {
            provider: key.provider.clone(),
            pool_token: key.pool_token.clone(),
            reserve_token: key.reserve_token.clone(),
            staked_amount: 0,
            reward_per_token_paid: reward_per_token,
            pending_base_rewards: 0,
            total_claimed_rewards: 0,
            effective_staking_time: Timestamp::ZERO,
            base_rewards_debt: 0,
            base_rewards_debt_multiplier: 0,
        }
    }

    pub fn key(&self) -> RewardKey {
        RewardKey::new(
            self.provider.clone(),
            self.pool_token.clone(),
            self.reserve_token.clone(),
        )
    }

    /// Bring `pending_base_rewards` up to the accumulator value `reward_per_token`.
    pub fn sync(&mut self, reward_per_token: u128) -> Result<u128, RewardsError> {
        let delta = reward_per_token
            .checked_sub(self.reward_per_token_paid)
            .ok_or_else(|| {
                RewardsError::InvariantViolation(format!(
                    "reward per token for {}/{} went backwards: {} < {}",
                    self.pool_token, self.reserve_token, reward_per_token, self.reward_per_token_paid
                ))
            })?;
        let accrued = mul_div(self.staked_amount, delta, REWARD_RATE_FACTOR, "accrued rewards")?;
        self.credit(accrued)?;
        self.reward_per_token_paid = reward_per_token;
        Ok(self.pending_base_rewards)
    }

    /// Add base rewards that arrive outside the accumulator (committed epochs).
    pub fn credit(&mut self, amount: u128) -> Result<(), RewardsError> {
        self.pending_base_rewards = self
            .pending_base_rewards
            .checked_add(amount)
            .ok_or(RewardsError::Overflow("pending base rewards"))?;
        Ok(())
    }

    /// Value of pending rewards under `multiplier` (PPM).
    pub fn payable(&self, multiplier: u32) -> Result<u128, RewardsError> {
        let fresh = self
            .pending_base_rewards
            .checked_sub(self.base_rewards_debt)
            .ok_or_else(|| {
                RewardsError::InvariantViolation(format!(
                    "debt {} exceeds pending {} for {} in {}/{}",
                    self.base_rewards_debt,
                    self.pending_base_rewards,
                    self.provider,
                    self.pool_token,
                    self.reserve_token
                ))
            })?;
        let ppm = u128::from(PPM_RESOLUTION);
        let fresh_value = mul_div(fresh, u128::from(multiplier), ppm, "payable rewards")?;
        let debt_multiplier = multiplier.max(self.base_rewards_debt_multiplier);
        let debt_value = mul_div(
            self.base_rewards_debt,
            u128::from(debt_multiplier),
            ppm,
            "payable rewards",
        )?;
        fresh_value
            .checked_add(debt_value)
            .ok_or(RewardsError::Overflow("payable rewards"))
    }

    /// Freeze the current value of all pending rewards into the debt fields.
    ///
    /// Called right before the multiplier clock resets.
    pub fn rebase_debt(&mut self, multiplier: u32) -> Result<(), RewardsError> {
        if self.pending_base_rewards == 0 {
            self.base_rewards_debt = 0;
            self.base_rewards_debt_multiplier = 0;
            return Ok(());
        }
        let value = self.payable(multiplier)?;
        let blended = mul_div(
            value,
            u128::from(PPM_RESOLUTION),
            self.pending_base_rewards,
            "debt multiplier",
        )?;
        self.base_rewards_debt_multiplier =
            u32::try_from(blended).map_err(|_| RewardsError::Overflow("debt multiplier"))?;
        self.base_rewards_debt = self.pending_base_rewards;
        Ok(())
    }

    /// Zero pending state after `paid` has been handed out.
    pub fn settle(&mut self, paid: u128) -> Result<(), RewardsError> {
        self.pending_base_rewards = 0;
        self.base_rewards_debt = 0;
        self.base_rewards_debt_multiplier = 0;
        self.total_claimed_rewards = self
            .total_claimed_rewards
            .checked_add(paid)
            .ok_or(RewardsError::Overflow("total claimed rewards"))?;
        Ok(())
    }

    pub fn reset_staking_time(&mut self, now: Timestamp) {
        self.effective_staking_time = self.effective_staking_time.max(now);
    }

    /// Start the multiplier clock if it was never started.
    pub fn start_staking(&mut self, now: Timestamp) {
        if self.effective_staking_time.is_zero() {
            self.effective_staking_time = now;
        }
    }

    pub fn add_stake(&mut self, amount: u128) -> Result<(), RewardsError> {
        self.staked_amount = self
            .staked_amount
            .checked_add(amount)
            .ok_or(RewardsError::Overflow("provider stake"))?;
        Ok(())
    }

    pub fn remove_stake(&mut self, amount: u128) -> Result<(), RewardsError> {
        self.staked_amount = self.staked_amount.checked_sub(amount).ok_or_else(|| {
            RewardsError::InvariantViolation(format!(
                "removing {} from {} in {}/{} exceeds stake {}",
                amount, self.provider, self.pool_token, self.reserve_token, self.staked_amount
            ))
        })?;
        Ok(())
    }
}
