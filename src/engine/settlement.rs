//! Claim and restake settlement.
//!
//! Settlement is the only place pending rewards are zeroed. All ledger and
//! accumulator changes are staged; external effects run next, and only when
//! they succeed is the staged state committed. A failed mint or restake leaves
//! the engine exactly as it was.

use super::epochs::PayoutCharge;
use super::error::require_address;
use super::ledger::RewardKey;
use super::rewards::{RewardsEngine, Staged};
use super::RewardsError;
use crate::domain::{Address, Position, PositionId, RewardEvent, Timestamp};
use serde::{Deserialize, Serialize};

/// Result of a restake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeOutcome {
    pub amount: u128,
    pub position_id: PositionId,
}

/// How the payout multiplier is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope<'a> {
    /// One pool; each entry uses its own multiplier.
    Pool(&'a Address),
    /// Every pool; one provider-level multiplier for all entries.
    Provider,
}

struct Settlement {
    staged: Staged,
    /// Every key of the provider.
    keys: Vec<RewardKey>,
    /// Keys being paid out and their amounts.
    payouts: Vec<(RewardKey, u128)>,
    total: u128,
    positions: Vec<Position>,
    charge: PayoutCharge,
    /// Clock start of the positions that set the payout multiplier.
    anchor: Timestamp,
}

impl RewardsEngine {
    /// Stage the payout of `provider`'s rewards in `scope`.
    fn prepare_settlement(
        &self,
        provider: &Address,
        scope: Scope<'_>,
        now: Timestamp,
    ) -> Result<Settlement, RewardsError> {
        let keys = self.provider_keys(provider);
        let selected: Vec<RewardKey> = match scope {
            Scope::Pool(pool) => keys.iter().filter(|k| &k.pool_token == pool).cloned().collect(),
            Scope::Provider => keys.clone(),
        };
        if selected.is_empty() {
            return Err(RewardsError::NoRewards);
        }
        let positions = self.live_positions(provider)?;

        let mut staged = Staged::default();
        for key in &selected {
            self.stage_entry(&mut staged, key, now)?;
        }

        let provider_m = match scope {
            Scope::Provider => Some(self.provider_multiplier_with(
                provider,
                &keys,
                |k| {
                    staged
                        .entries
                        .get(k)
                        .map_or(Timestamp::ZERO, |e| e.effective_staking_time)
                },
                &positions,
                now,
            )),
            Scope::Pool(_) => None,
        };

        let mut payouts = Vec::with_capacity(selected.len());
        let mut total: u128 = 0;
        for key in selected {
            let entry = staged.entry_mut(&key)?;
            let est = entry.effective_staking_time;
            let m = provider_m.unwrap_or_else(|| self.entry_multiplier(&key, est, &positions, now));
            let paid = staged.entry_mut(&key)?.payable(m)?;
            total = total
                .checked_add(paid)
                .ok_or(RewardsError::Overflow("settlement total"))?;
            payouts.push((key, paid));
        }
        if total == 0 {
            return Err(RewardsError::NoRewards);
        }
        let charge = self.distribution.charge(&payouts)?;

        let anchor_keys: Vec<RewardKey> = match scope {
            Scope::Provider => keys.clone(),
            Scope::Pool(_) => payouts.iter().map(|(k, _)| k.clone()).collect(),
        };
        let anchor = self.staking_anchor(
            &anchor_keys,
            |k| {
                staged
                    .entries
                    .get(k)
                    .map_or(Timestamp::ZERO, |e| e.effective_staking_time)
            },
            &positions,
            scope == Scope::Provider,
            now,
        );

        for (key, paid) in &payouts {
            staged.entry_mut(key)?.settle(*paid)?;
            staged.accumulator_mut(&key.pool_reserve())?.record_claim(*paid)?;
        }

        Ok(Settlement {
            staged,
            keys,
            payouts,
            total,
            positions,
            charge,
            anchor,
        })
    }

    /// Claim rewards for one pool.
    pub fn claim(&mut self, provider: &Address, pool_token: &Address) -> Result<u128, RewardsError> {
        self.claim_in(provider, Scope::Pool(pool_token))
    }

    /// Claim rewards across every pool at the provider-level multiplier.
    pub fn claim_all(&mut self, provider: &Address) -> Result<u128, RewardsError> {
        self.claim_in(provider, Scope::Provider)
    }

    fn claim_in(&mut self, provider: &Address, scope: Scope<'_>) -> Result<u128, RewardsError> {
        let now = self.now();
        let mut settlement = self.prepare_settlement(provider, scope, now)?;

        // A claim restarts the clock for every pool of the provider, so the
        // rewards left behind are frozen at their current value first.
        let settled: Vec<RewardKey> = settlement.payouts.iter().map(|(k, _)| k.clone()).collect();
        self.stage_reset(
            &mut settlement.staged,
            &settlement.keys,
            &settled,
            &settlement.positions,
            now,
        )?;

        let minter = self.collaborators.minter.clone();
        minter.mint(provider, settlement.total)?;
        if let Err(e) = self
            .collaborators
            .checkpoints
            .update_last_claim_time(provider, now)
        {
            if let Err(burn_err) = minter.burn(provider, settlement.total) {
                tracing::error!(provider = %provider, amount = settlement.total, error = %burn_err, "Failed to reverse claim mint");
            }
            return Err(e.into());
        }

        self.commit(settlement.staged);
        self.distribution.apply_charge(settlement.charge);
        for (key, amount) in &settlement.payouts {
            if *amount == 0 {
                continue;
            }
            self.emit(
                now,
                RewardEvent::RewardsClaimed {
                    provider: provider.clone(),
                    pool_token: key.pool_token.clone(),
                    reserve_token: key.reserve_token.clone(),
                    amount: *amount,
                },
            );
        }
        tracing::info!(provider = %provider, amount = settlement.total, "Rewards claimed");
        Ok(settlement.total)
    }

    /// Restake one pool's rewards into `target_pool`.
    pub fn stake(
        &mut self,
        provider: &Address,
        pool_token: &Address,
        target_pool: &Address,
    ) -> Result<StakeOutcome, RewardsError> {
        self.stake_in(provider, Scope::Pool(pool_token), target_pool)
    }

    /// Restake every pool's rewards into `target_pool` at the provider-level
    /// multiplier.
    pub fn stake_all(&mut self, provider: &Address, target_pool: &Address) -> Result<StakeOutcome, RewardsError> {
        self.stake_in(provider, Scope::Provider, target_pool)
    }

    fn stake_in(
        &mut self,
        provider: &Address,
        scope: Scope<'_>,
        target_pool: &Address,
    ) -> Result<StakeOutcome, RewardsError> {
        require_address("target pool", target_pool)?;
        let now = self.now();
        let mut settlement = self.prepare_settlement(provider, scope, now)?;
        let reward_token = self.reward_token();

        // The new position's weight is staged with the payout so both land
        // together. It inherits the clock of the rewards it is paid from.
        let target = RewardKey::new(provider.clone(), target_pool.clone(), reward_token.clone());
        self.stage_stake(
            &mut settlement.staged,
            &target,
            settlement.total,
            settlement.anchor,
            now,
        )?;

        let minter = self.collaborators.minter.clone();
        minter.mint(&self.intermediary, settlement.total)?;
        let position_id = match self.collaborators.liquidity.add_liquidity_for(
            provider,
            target_pool,
            &reward_token,
            settlement.total,
        ) {
            Ok(id) => id,
            Err(e) => {
                if let Err(burn_err) = minter.burn(&self.intermediary, settlement.total) {
                    tracing::error!(provider = %provider, amount = settlement.total, error = %burn_err, "Failed to reverse restake mint");
                }
                tracing::warn!(provider = %provider, target_pool = %target_pool, error = %e, "Restake rejected by liquidity sink");
                return Err(e.into());
            }
        };

        self.commit(settlement.staged);
        self.distribution.apply_charge(settlement.charge);
        self.restake_anchors.insert(position_id, settlement.anchor);
        for (key, amount) in &settlement.payouts {
            if *amount == 0 {
                continue;
            }
            self.emit(
                now,
                RewardEvent::RewardsStaked {
                    provider: provider.clone(),
                    pool_token: key.pool_token.clone(),
                    reserve_token: key.reserve_token.clone(),
                    target_pool: target_pool.clone(),
                    amount: *amount,
                    position_id,
                },
            );
        }
        tracing::info!(
            provider = %provider,
            target_pool = %target_pool,
            amount = settlement.total,
            position = %position_id,
            "Rewards restaked"
        );
        Ok(StakeOutcome {
            amount: settlement.total,
            position_id,
        })
    }
}
