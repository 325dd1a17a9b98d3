//! Per-(pool, reserve) reward-per-token accumulator.

use super::math::reward_per_token_increment;
use super::RewardsError;
use crate::domain::{Address, Timestamp};
use serde::{Deserialize, Serialize};

/// Key of one accumulator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PoolReserve {
    pub pool_token: Address,
    pub reserve_token: Address,
}

impl PoolReserve {
    pub fn new(pool_token: Address, reserve_token: Address) -> Self {
        Self {
            pool_token,
            reserve_token,
        }
    }
}

/// The span during which a program pays a given reserve, and at what rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccrualWindow {
    pub start: Timestamp,
    /// `min(program end, removal time)`.
    pub end: Timestamp,
    pub rate: u128,
}

/// Running reward-per-token for one (pool, reserve).
///
/// `reward_per_token` is scaled by 1e18 and never decreases. Accrual between
/// two checkpoints covers `[max(last_update, start), min(now, end)]` and is
/// skipped while nothing is staked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardAccumulator {
    pub pool_token: Address,
    pub reserve_token: Address,
    pub last_update_time: Timestamp,
    pub reward_per_token: u128,
    pub total_staked: u128,
    pub total_claimed_rewards: u128,
}

impl RewardAccumulator {
    pub fn new(key: &PoolReserve, now: Timestamp) -> Self {
        Self {
            pool_token: key.pool_token.clone(),
            reserve_token: key.reserve_token.clone(),
            last_update_time: now,
            reward_per_token: 0,
            total_staked: 0,
            total_claimed_rewards: 0,
        }
    }

    pub fn key(&self) -> PoolReserve {
        PoolReserve::new(self.pool_token.clone(), self.reserve_token.clone())
    }

    /// Reward-per-token as of `now`, without advancing the checkpoint.
    pub fn reward_per_token_at(
        &self,
        window: Option<AccrualWindow>,
        now: Timestamp,
    ) -> Result<u128, RewardsError> {
        let Some(window) = window else {
            return Ok(self.reward_per_token);
        };
        let from = self.last_update_time.max(window.start);
        let to = now.min(window.end);
        if to <= from || self.total_staked == 0 {
            return Ok(self.reward_per_token);
        }
        let increment =
            reward_per_token_increment(window.rate, to.seconds_since(from), self.total_staked)?;
        self.reward_per_token
            .checked_add(increment)
            .ok_or(RewardsError::Overflow("reward per token"))
    }

    /// Fold accrual up to `now` into `reward_per_token` and advance the
    /// checkpoint. Returns the updated value.
    pub fn checkpoint(
        &mut self,
        window: Option<AccrualWindow>,
        now: Timestamp,
    ) -> Result<u128, RewardsError> {
        self.reward_per_token = self.reward_per_token_at(window, now)?;
        self.last_update_time = self.last_update_time.max(now);
        Ok(self.reward_per_token)
    }

    /// Don't accrue anything before `now`; used when a program is registered.
    pub fn hold_until(&mut self, now: Timestamp) {
        self.last_update_time = self.last_update_time.max(now);
    }

    pub fn add_stake(&mut self, amount: u128) -> Result<(), RewardsError> {
        self.total_staked = self
            .total_staked
            .checked_add(amount)
            .ok_or(RewardsError::Overflow("total staked"))?;
        Ok(())
    }

    pub fn remove_stake(&mut self, amount: u128) -> Result<(), RewardsError> {
        self.total_staked = self.total_staked.checked_sub(amount).ok_or_else(|| {
            RewardsError::InvariantViolation(format!(
                "removing {} from {}/{} exceeds total staked {}",
                amount, self.pool_token, self.reserve_token, self.total_staked
            ))
        })?;
        Ok(())
    }

    pub fn record_claim(&mut self, amount: u128) -> Result<(), RewardsError> {
        self.total_claimed_rewards = self
            .total_claimed_rewards
            .checked_add(amount)
            .ok_or(RewardsError::Overflow("total claimed rewards"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::math::REWARD_RATE_FACTOR;

    fn acc(now: u64) -> RewardAccumulator {
        let key = PoolReserve::new(
            Address::new("0xpool".to_string()),
            Address::new("0xr".to_string()),
        );
        RewardAccumulator::new(&key, Timestamp::new(now))
    }

    fn window(start: u64, end: u64, rate: u128) -> Option<AccrualWindow> {
        Some(AccrualWindow {
            start: Timestamp::new(start),
            end: Timestamp::new(end),
            rate,
        })
    }

    #[test]
    fn test_accrues_within_window() {
        let mut a = acc(0);
        a.add_stake(1_000).unwrap();
        let rpt = a.checkpoint(window(0, 1_000, 10), Timestamp::new(100)).unwrap();
        assert_eq!(rpt, REWARD_RATE_FACTOR);
        assert_eq!(a.last_update_time, Timestamp::new(100));
    }

    #[test]
    fn test_clamps_to_window_bounds() {
        let mut a = acc(0);
        a.add_stake(1_000).unwrap();
        // Window opens at 50 and closes at 150: only 100 seconds count.
        let rpt = a.checkpoint(window(50, 150, 10), Timestamp::new(400)).unwrap();
        assert_eq!(rpt, REWARD_RATE_FACTOR);

        // Nothing more after the end.
        let rpt = a.checkpoint(window(50, 150, 10), Timestamp::new(900)).unwrap();
        assert_eq!(rpt, REWARD_RATE_FACTOR);
    }

    #[test]
    fn test_skips_accrual_while_empty_but_advances() {
        let mut a = acc(0);
        let rpt = a.checkpoint(window(0, 1_000, 10), Timestamp::new(500)).unwrap();
        assert_eq!(rpt, 0);
        assert_eq!(a.last_update_time, Timestamp::new(500));

        a.add_stake(1_000).unwrap();
        let rpt = a.checkpoint(window(0, 1_000, 10), Timestamp::new(600)).unwrap();
        assert_eq!(rpt, REWARD_RATE_FACTOR);
    }

    #[test]
    fn test_no_window_freezes_value() {
        let mut a = acc(0);
        a.add_stake(10).unwrap();
        a.checkpoint(window(0, 100, 1), Timestamp::new(100)).unwrap();
        let before = a.reward_per_token;
        assert_eq!(a.checkpoint(None, Timestamp::new(200)).unwrap(), before);
    }

    #[test]
    fn test_view_does_not_advance() {
        let mut a = acc(0);
        a.add_stake(1_000).unwrap();
        let viewed = a.reward_per_token_at(window(0, 1_000, 10), Timestamp::new(100)).unwrap();
        assert_eq!(viewed, REWARD_RATE_FACTOR);
        assert_eq!(a.reward_per_token, 0);
        assert_eq!(a.last_update_time, Timestamp::new(0));
    }

    #[test]
    fn test_hold_until_skips_past_accrual() {
        let mut a = acc(0);
        a.add_stake(1_000).unwrap();
        a.hold_until(Timestamp::new(100));
        let rpt = a.checkpoint(window(0, 1_000, 10), Timestamp::new(200)).unwrap();
        assert_eq!(rpt, REWARD_RATE_FACTOR);
    }

    #[test]
    fn test_remove_stake_underflow_is_invariant_violation() {
        let mut a = acc(0);
        a.add_stake(5).unwrap();
        assert!(matches!(
            a.remove_stake(6),
            Err(RewardsError::InvariantViolation(_))
        ));
        assert_eq!(a.total_staked, 5);
    }
}
