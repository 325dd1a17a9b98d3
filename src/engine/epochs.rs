//! Epoch-committed seeding of historical rewards.
//!
//! A distributor pushes per-provider amounts for an epoch; the amounts can be
//! corrected until a supervisor commits the epoch, after which they are folded
//! into the provider ledger and never change again. Every write is checked
//! against the total and per-epoch ceilings before anything is applied.
//!
//! The total ceiling bounds every reward the engine hands out, accrued or
//! seeded. Its allocation is what was already paid out, plus seeded amounts
//! that are still owed: uncommitted epochs and committed amounts nobody has
//! claimed yet.

use super::error::require_address;
use super::ledger::RewardKey;
use super::RewardsError;
use crate::domain::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One seeded amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedEntry {
    pub provider: Address,
    pub pool_token: Address,
    pub reserve_token: Address,
    pub amount: u128,
}

impl SeedEntry {
    pub fn key(&self) -> RewardKey {
        RewardKey::new(
            self.provider.clone(),
            self.pool_token.clone(),
            self.reserve_token.clone(),
        )
    }

    /// Zip parallel columns into entries; all columns must have equal length.
    pub fn from_columns(
        providers: Vec<Address>,
        pool_tokens: Vec<Address>,
        reserve_tokens: Vec<Address>,
        amounts: Vec<u128>,
    ) -> Result<Vec<SeedEntry>, RewardsError> {
        let expected = providers.len();
        for actual in [pool_tokens.len(), reserve_tokens.len(), amounts.len()] {
            if actual != expected {
                return Err(RewardsError::LengthMismatch { expected, actual });
            }
        }
        Ok(providers
            .into_iter()
            .zip(pool_tokens)
            .zip(reserve_tokens)
            .zip(amounts)
            .map(|(((provider, pool_token), reserve_token), amount)| SeedEntry {
                provider,
                pool_token,
                reserve_token,
                amount,
            })
            .collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct EpochRewards {
    committed: bool,
    total: u128,
    amounts: BTreeMap<RewardKey, u128>,
}

/// Serializable form of one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochSnapshot {
    pub epoch: u64,
    pub committed: bool,
    pub entries: Vec<SeedEntry>,
}

/// Serializable form of the whole distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionSnapshot {
    pub max_rewards: u128,
    pub max_rewards_per_epoch: u128,
    pub epochs: Vec<EpochSnapshot>,
    #[serde(default)]
    pub distributed: u128,
    /// Committed seeded amounts not yet paid out.
    #[serde(default)]
    pub owed: Vec<SeedEntry>,
}

/// Result of committing an epoch: the amounts to credit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedEpoch {
    pub epoch: u64,
    pub total: u128,
    pub amounts: Vec<(RewardKey, u128)>,
}

/// Budget effect of a staged payout, applied once the payout went through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutCharge {
    distributed: u128,
    owed: Vec<(RewardKey, u128)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochDistribution {
    max_rewards: u128,
    max_rewards_per_epoch: u128,
    total_rewards: u128,
    epochs: BTreeMap<u64, EpochRewards>,
    distributed: u128,
    owed: BTreeMap<RewardKey, u128>,
}

impl Default for EpochDistribution {
    fn default() -> Self {
        Self {
            max_rewards: u128::MAX,
            max_rewards_per_epoch: u128::MAX,
            total_rewards: 0,
            epochs: BTreeMap::new(),
            distributed: 0,
            owed: BTreeMap::new(),
        }
    }
}

impl EpochDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_rewards(&self) -> u128 {
        self.max_rewards
    }

    pub fn max_rewards_per_epoch(&self) -> u128 {
        self.max_rewards_per_epoch
    }

    /// Sum of amounts across every epoch, committed or not.
    pub fn total_rewards(&self) -> u128 {
        self.total_rewards
    }

    /// Rewards paid out through claims and restakes.
    pub fn distributed(&self) -> u128 {
        self.distributed
    }

    /// Share of the total ceiling in use.
    pub fn allocated(&self) -> Result<u128, RewardsError> {
        let uncommitted = self
            .epochs
            .values()
            .filter(|e| !e.committed)
            .try_fold(0u128, |acc, e| acc.checked_add(e.total));
        let owed = self
            .owed
            .values()
            .try_fold(0u128, |acc, v| acc.checked_add(*v));
        uncommitted
            .zip(owed)
            .and_then(|(u, o)| u.checked_add(o))
            .and_then(|sum| sum.checked_add(self.distributed))
            .ok_or(RewardsError::Overflow("allocated rewards"))
    }

    pub fn epoch_total(&self, epoch: u64) -> u128 {
        self.epochs.get(&epoch).map_or(0, |e| e.total)
    }

    pub fn is_committed(&self, epoch: u64) -> bool {
        self.epochs.get(&epoch).is_some_and(|e| e.committed)
    }

    pub fn amount(&self, epoch: u64, key: &RewardKey) -> u128 {
        self.epochs
            .get(&epoch)
            .and_then(|e| e.amounts.get(key))
            .copied()
            .unwrap_or(0)
    }

    /// Replace the amounts for `entries` in an uncommitted epoch.
    ///
    /// Within one batch a later entry for the same key wins. A zero amount
    /// clears the key.
    pub fn set_rewards(&mut self, epoch: u64, entries: &[SeedEntry]) -> Result<(), RewardsError> {
        let current = self.epochs.get(&epoch).cloned().unwrap_or_default();
        if current.committed {
            return Err(RewardsError::AlreadyCommitted(epoch));
        }

        let mut next = current.clone();
        for entry in entries {
            require_address("provider", &entry.provider)?;
            require_address("pool token", &entry.pool_token)?;
            require_address("reserve token", &entry.reserve_token)?;
            if entry.amount == 0 {
                next.amounts.remove(&entry.key());
            } else {
                next.amounts.insert(entry.key(), entry.amount);
            }
        }
        next.total = next
            .amounts
            .values()
            .try_fold(0u128, |acc, v| acc.checked_add(*v))
            .ok_or(RewardsError::Overflow("epoch rewards"))?;

        if next.total > self.max_rewards_per_epoch {
            return Err(RewardsError::MaxRewardsPerEpochExceeded {
                epoch,
                requested: next.total,
                max: self.max_rewards_per_epoch,
            });
        }
        let total = (self.total_rewards - current.total)
            .checked_add(next.total)
            .ok_or(RewardsError::Overflow("total rewards"))?;
        let allocated = (self.allocated()? - current.total)
            .checked_add(next.total)
            .ok_or(RewardsError::Overflow("allocated rewards"))?;
        if allocated > self.max_rewards {
            return Err(RewardsError::MaxRewardsExceeded {
                requested: allocated,
                max: self.max_rewards,
            });
        }

        self.total_rewards = total;
        self.epochs.insert(epoch, next);
        Ok(())
    }

    /// Freeze an epoch and hand back its amounts. One-way.
    pub fn commit(&mut self, epoch: u64) -> Result<CommittedEpoch, RewardsError> {
        let record = self.epochs.entry(epoch).or_default();
        if record.committed {
            return Err(RewardsError::AlreadyCommitted(epoch));
        }
        record.committed = true;
        let committed = CommittedEpoch {
            epoch,
            total: record.total,
            amounts: record.amounts.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        };
        for (key, amount) in &committed.amounts {
            let owed = self.owed.entry(key.clone()).or_default();
            *owed = owed
                .checked_add(*amount)
                .ok_or(RewardsError::Overflow("owed rewards"))?;
        }
        Ok(committed)
    }

    /// Check `payouts` against the total ceiling.
    ///
    /// A payout first settles whatever seeded amount its key is still owed;
    /// that part was allocated when it was seeded. Only the rest draws new
    /// budget.
    pub fn charge(&self, payouts: &[(RewardKey, u128)]) -> Result<PayoutCharge, RewardsError> {
        let mut allocated = self.allocated()?;
        let mut distributed = self.distributed;
        let mut owed = Vec::new();
        for (key, paid) in payouts {
            let was_owed = self.owed.get(key).copied().unwrap_or(0);
            let seeded = was_owed.min(*paid);
            if was_owed > 0 {
                owed.push((key.clone(), was_owed - seeded));
            }
            allocated = allocated
                .checked_add(paid - seeded)
                .ok_or(RewardsError::Overflow("allocated rewards"))?;
            distributed = distributed
                .checked_add(*paid)
                .ok_or(RewardsError::Overflow("distributed rewards"))?;
        }
        if allocated > self.max_rewards {
            return Err(RewardsError::MaxRewardsExceeded {
                requested: allocated,
                max: self.max_rewards,
            });
        }
        Ok(PayoutCharge { distributed, owed })
    }

    pub fn apply_charge(&mut self, charge: PayoutCharge) {
        self.distributed = charge.distributed;
        for (key, left) in charge.owed {
            if left == 0 {
                self.owed.remove(&key);
            } else {
                self.owed.insert(key, left);
            }
        }
    }

    /// Update both ceilings; neither may drop below what is already allocated.
    pub fn set_max_rewards(
        &mut self,
        max_rewards: u128,
        max_rewards_per_epoch: u128,
    ) -> Result<(), RewardsError> {
        let allocated = self.allocated()?;
        if max_rewards < allocated {
            return Err(RewardsError::CeilingBelowAllocated {
                ceiling: max_rewards,
                allocated,
            });
        }
        let largest_epoch = self.epochs.values().map(|e| e.total).max().unwrap_or(0);
        if max_rewards_per_epoch < largest_epoch {
            return Err(RewardsError::CeilingBelowAllocated {
                ceiling: max_rewards_per_epoch,
                allocated: largest_epoch,
            });
        }
        self.max_rewards = max_rewards;
        self.max_rewards_per_epoch = max_rewards_per_epoch;
        Ok(())
    }

    pub fn snapshot(&self) -> DistributionSnapshot {
        DistributionSnapshot {
            max_rewards: self.max_rewards,
            max_rewards_per_epoch: self.max_rewards_per_epoch,
            epochs: self
                .epochs
                .iter()
                .map(|(epoch, record)| EpochSnapshot {
                    epoch: *epoch,
                    committed: record.committed,
                    entries: record
                        .amounts
                        .iter()
                        .map(|(key, amount)| SeedEntry {
                            provider: key.provider.clone(),
                            pool_token: key.pool_token.clone(),
                            reserve_token: key.reserve_token.clone(),
                            amount: *amount,
                        })
                        .collect(),
                })
                .collect(),
            distributed: self.distributed,
            owed: self
                .owed
                .iter()
                .map(|(key, amount)| SeedEntry {
                    provider: key.provider.clone(),
                    pool_token: key.pool_token.clone(),
                    reserve_token: key.reserve_token.clone(),
                    amount: *amount,
                })
                .collect(),
        }
    }

    pub fn from_snapshot(snapshot: DistributionSnapshot) -> Result<Self, RewardsError> {
        let mut epochs = BTreeMap::new();
        let mut total_rewards: u128 = 0;
        for epoch in snapshot.epochs {
            let mut record = EpochRewards {
                committed: epoch.committed,
                ..EpochRewards::default()
            };
            for entry in epoch.entries {
                record.total = record
                    .total
                    .checked_add(entry.amount)
                    .ok_or(RewardsError::Overflow("epoch rewards"))?;
                record.amounts.insert(entry.key(), entry.amount);
            }
            total_rewards = total_rewards
                .checked_add(record.total)
                .ok_or(RewardsError::Overflow("total rewards"))?;
            epochs.insert(epoch.epoch, record);
        }
        Ok(Self {
            max_rewards: snapshot.max_rewards,
            max_rewards_per_epoch: snapshot.max_rewards_per_epoch,
            total_rewards,
            epochs,
            distributed: snapshot.distributed,
            owed: snapshot
                .owed
                .into_iter()
                .map(|entry| (entry.key(), entry.amount))
                .collect(),
        })
    }
}
