//! Role-gated administration: programs, ceilings, epoch seeding and roles.

use super::access::Role;
use super::accumulator::PoolReserve;
use super::epochs::SeedEntry;
use super::error::require_address;
use super::rewards::{RewardsEngine, Staged};
use super::RewardsError;
use crate::domain::{Address, PoolProgram, RewardEvent};

impl RewardsEngine {
    fn require_role(&self, caller: &Address, role: Role, action: &str) -> Result<(), RewardsError> {
        if self.access.has_role(caller, role) {
            return Ok(());
        }
        tracing::warn!(caller = %caller, role = %role, action, "Access denied");
        Err(RewardsError::AccessDenied {
            caller: caller.clone(),
            reason: format!("{} requires the {} role", action, role),
        })
    }

    /// Register a reward program. Accrual starts no earlier than now.
    pub fn add_program(&mut self, caller: &Address, program: PoolProgram) -> Result<(), RewardsError> {
        self.require_role(caller, Role::Distributor, "add_program")?;
        self.programs.validate(&program)?;

        let now = self.now();
        let mut staged = Staged::default();
        for reserve in program.reserve_tokens() {
            let key = PoolReserve::new(program.pool_token.clone(), reserve.clone());
            self.stage_accumulator(&mut staged, &key, now)?.hold_until(now);
        }

        let event = RewardEvent::ProgramAdded {
            pool_token: program.pool_token.clone(),
            start_time: program.start_time,
            end_time: program.end_time,
            reward_rate: program.reward_rate,
        };
        tracing::info!(
            pool = %program.pool_token,
            start = %program.start_time,
            end = %program.end_time,
            rate = program.reward_rate,
            reserves = program.reserve_shares.len(),
            "Program added"
        );
        self.programs.add(program)?;
        self.commit(staged);
        self.emit(now, event);
        Ok(())
    }

    /// Stop a pool's program. Accrued rewards stay claimable.
    pub fn remove_program(&mut self, caller: &Address, pool_token: &Address) -> Result<(), RewardsError> {
        self.require_role(caller, Role::Distributor, "remove_program")?;
        let program = self
            .programs
            .program(pool_token)
            .cloned()
            .ok_or_else(|| RewardsError::ProgramNotFound(pool_token.clone()))?;

        let now = self.now();
        let mut staged = Staged::default();
        for reserve in program.reserve_tokens() {
            let key = PoolReserve::new(pool_token.clone(), reserve.clone());
            self.stage_accumulator(&mut staged, &key, now)?;
        }

        self.programs.remove(pool_token, now)?;
        self.commit(staged);
        self.emit(
            now,
            RewardEvent::ProgramRemoved {
                pool_token: pool_token.clone(),
            },
        );
        tracing::info!(pool = %pool_token, "Program removed");
        Ok(())
    }

    pub fn set_max_rewards(
        &mut self,
        caller: &Address,
        max_rewards: u128,
        max_rewards_per_epoch: u128,
    ) -> Result<(), RewardsError> {
        self.require_role(caller, Role::Supervisor, "set_max_rewards")?;
        self.distribution
            .set_max_rewards(max_rewards, max_rewards_per_epoch)?;
        let now = self.now();
        self.emit(
            now,
            RewardEvent::MaxRewardsUpdated {
                max_rewards,
                max_rewards_per_epoch,
            },
        );
        tracing::info!(max_rewards, max_rewards_per_epoch, "Reward ceilings updated");
        Ok(())
    }

    /// Seed (or correct) amounts for an uncommitted epoch. All or nothing.
    pub fn set_rewards(
        &mut self,
        caller: &Address,
        epoch: u64,
        entries: &[SeedEntry],
    ) -> Result<(), RewardsError> {
        self.require_role(caller, Role::Distributor, "set_rewards")?;
        self.distribution.set_rewards(epoch, entries)?;

        let now = self.now();
        for entry in entries {
            self.emit(
                now,
                RewardEvent::RewardsSet {
                    epoch,
                    provider: entry.provider.clone(),
                    pool_token: entry.pool_token.clone(),
                    reserve_token: entry.reserve_token.clone(),
                    amount: entry.amount,
                },
            );
        }
        tracing::info!(
            epoch,
            entries = entries.len(),
            epoch_total = self.distribution.epoch_total(epoch),
            "Epoch rewards set"
        );
        Ok(())
    }

    /// Commit an epoch and credit its amounts to the ledger. One-way.
    pub fn commit_epoch(&mut self, caller: &Address, epoch: u64) -> Result<u128, RewardsError> {
        self.require_role(caller, Role::Supervisor, "commit_epoch")?;

        let now = self.now();
        let mut distribution = self.distribution.clone();
        let committed = distribution.commit(epoch)?;

        let mut staged = Staged::default();
        for (key, amount) in &committed.amounts {
            let entry = self.stage_entry(&mut staged, key, now)?;
            entry.credit(*amount)?;
            entry.start_staking(now);
        }

        self.distribution = distribution;
        self.commit(staged);
        self.emit(
            now,
            RewardEvent::EpochCommitted {
                epoch,
                total: committed.total,
            },
        );
        tracing::info!(
            epoch,
            total = committed.total,
            providers = committed.amounts.len(),
            "Epoch committed"
        );
        Ok(committed.total)
    }

    pub fn grant_role(&mut self, caller: &Address, account: &Address, role: Role) -> Result<bool, RewardsError> {
        self.require_role(caller, Role::Supervisor, "grant_role")?;
        require_address("account", account)?;
        let granted = self.access.grant(account, role);
        if granted {
            let now = self.now();
            self.emit(
                now,
                RewardEvent::RoleGranted {
                    account: account.clone(),
                    role: role.to_string(),
                },
            );
            tracing::info!(account = %account, role = %role, "Role granted");
        }
        Ok(granted)
    }

    pub fn revoke_role(&mut self, caller: &Address, account: &Address, role: Role) -> Result<bool, RewardsError> {
        self.require_role(caller, Role::Supervisor, "revoke_role")?;
        let revoked = self.access.revoke(account, role);
        if revoked {
            let now = self.now();
            self.emit(
                now,
                RewardEvent::RoleRevoked {
                    account: account.clone(),
                    role: role.to_string(),
                },
            );
            tracing::info!(account = %account, role = %role, "Role revoked");
        }
        Ok(revoked)
    }
}
