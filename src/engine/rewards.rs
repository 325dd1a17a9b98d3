//! The rewards engine: accumulators, ledger entries and liquidity hooks.
//!
//! Every state change goes through a [`Staged`] working set: records are
//! copied out, checkpointed and modified there, and written back only when the
//! whole operation (external effects included) has succeeded.
//!
//! Multipliers are the minimum over a provider's live positions. A deposit
//! that would lower the minimum first freezes what the entry already earned.
//! Positions opened by a restake carry the clock of the rewards they were
//! paid from, so restaking never lowers a multiplier.

use super::access::{AccessPolicy, Role};
use super::accumulator::{PoolReserve, RewardAccumulator};
use super::clock::Clock;
use super::epochs::{DistributionSnapshot, EpochDistribution};
use super::error::require_address;
use super::ledger::{ProviderRewards, RewardKey};
use super::multiplier::MultiplierInput;
use super::registry::{ProgramRecord, ProgramRegistry};
use super::RewardsError;
use crate::domain::{
    Address, EventRecord, PoolProgram, Position, PositionId, RewardEvent, Timestamp,
    PPM_RESOLUTION,
};
use crate::external::{provider_positions, Collaborators, ExternalError};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Working copies of the records an operation touches.
#[derive(Debug, Default)]
pub(crate) struct Staged {
    pub(crate) accumulators: BTreeMap<PoolReserve, RewardAccumulator>,
    pub(crate) entries: BTreeMap<RewardKey, ProviderRewards>,
}

impl Staged {
    pub(crate) fn entry_mut(&mut self, key: &RewardKey) -> Result<&mut ProviderRewards, RewardsError> {
        self.entries.get_mut(key).ok_or_else(|| {
            RewardsError::InvariantViolation(format!(
                "entry {}/{}/{} was not staged",
                key.provider, key.pool_token, key.reserve_token
            ))
        })
    }

    pub(crate) fn accumulator_mut(
        &mut self,
        key: &PoolReserve,
    ) -> Result<&mut RewardAccumulator, RewardsError> {
        self.accumulators.get_mut(key).ok_or_else(|| {
            RewardsError::InvariantViolation(format!(
                "accumulator {}/{} was not staged",
                key.pool_token, key.reserve_token
            ))
        })
    }
}

/// Full engine state, for persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub programs: Vec<ProgramRecord>,
    pub accumulators: Vec<RewardAccumulator>,
    pub entries: Vec<ProviderRewards>,
    pub distribution: DistributionSnapshot,
    pub roles: Vec<(Address, Role)>,
    pub next_event_seq: u64,
    /// Clock start inherited by positions opened through a restake.
    #[serde(default)]
    pub restake_anchors: Vec<(PositionId, Timestamp)>,
}

pub struct RewardsEngine {
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) access: Box<dyn AccessPolicy>,
    pub(crate) collaborators: Collaborators,
    /// Account that receives restaked rewards before they are forwarded.
    pub(crate) intermediary: Address,
    pub(crate) programs: ProgramRegistry,
    pub(crate) accumulators: BTreeMap<PoolReserve, RewardAccumulator>,
    pub(crate) entries: BTreeMap<RewardKey, ProviderRewards>,
    pub(crate) distribution: EpochDistribution,
    pub(crate) restake_anchors: BTreeMap<PositionId, Timestamp>,
    events: Vec<EventRecord>,
    next_event_seq: u64,
    /// Bumped whenever committed records change value.
    revision: u64,
}

impl RewardsEngine {
    pub fn new(
        intermediary: Address,
        clock: Arc<dyn Clock>,
        access: Box<dyn AccessPolicy>,
        collaborators: Collaborators,
    ) -> Result<Self, RewardsError> {
        require_address("intermediary", &intermediary)?;
        require_address("reward token", &collaborators.minter.token())?;
        Ok(Self {
            clock,
            access,
            collaborators,
            intermediary,
            programs: ProgramRegistry::new(),
            accumulators: BTreeMap::new(),
            entries: BTreeMap::new(),
            distribution: EpochDistribution::new(),
            restake_anchors: BTreeMap::new(),
            events: Vec::new(),
            next_event_seq: 1,
            revision: 0,
        })
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn reward_token(&self) -> Address {
        self.collaborators.minter.token()
    }

    pub fn intermediary(&self) -> &Address {
        &self.intermediary
    }

    pub fn has_role(&self, account: &Address, role: Role) -> bool {
        self.access.has_role(account, role)
    }

    pub fn is_participating(&self, pool_token: &Address) -> bool {
        self.programs.is_participating(pool_token)
    }

    pub fn program(&self, pool_token: &Address) -> Option<&PoolProgram> {
        self.programs.program(pool_token)
    }

    pub fn programs(&self) -> impl Iterator<Item = &PoolProgram> {
        self.programs.active_programs()
    }

    /// Stored accumulator state, as of its last checkpoint.
    pub fn accumulator(&self, pool_token: &Address, reserve_token: &Address) -> Option<&RewardAccumulator> {
        self.accumulators
            .get(&PoolReserve::new(pool_token.clone(), reserve_token.clone()))
    }

    /// Stored ledger entry, as of its last sync.
    pub fn entry(&self, key: &RewardKey) -> Option<&ProviderRewards> {
        self.entries.get(key)
    }

    pub fn entries_for(&self, provider: &Address) -> impl Iterator<Item = &ProviderRewards> {
        let provider = provider.clone();
        self.entries.values().filter(move |e| e.provider == provider)
    }

    pub fn distribution(&self) -> &EpochDistribution {
        &self.distribution
    }

    /// Changes whenever accumulator or ledger state changes value. Reads that
    /// merely re-checkpoint to the same values leave it alone.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    // ---- staging ----

    /// Stage and checkpoint the accumulator for `key`.
    pub(crate) fn stage_accumulator<'s>(
        &self,
        staged: &'s mut Staged,
        key: &PoolReserve,
        now: Timestamp,
    ) -> Result<&'s mut RewardAccumulator, RewardsError> {
        match staged.accumulators.entry(key.clone()) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(slot) => {
                let mut acc = self
                    .accumulators
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| RewardAccumulator::new(key, now));
                let window = self
                    .programs
                    .accrual_window(&key.pool_token, &key.reserve_token);
                let before = acc.reward_per_token;
                acc.checkpoint(window, now)?;
                tracing::debug!(
                    pool = %key.pool_token,
                    reserve = %key.reserve_token,
                    from = before,
                    to = acc.reward_per_token,
                    "Accumulator checkpointed"
                );
                Ok(slot.insert(acc))
            }
        }
    }

    /// Stage the ledger entry for `key` and sync it with its accumulator.
    pub(crate) fn stage_entry<'s>(
        &self,
        staged: &'s mut Staged,
        key: &RewardKey,
        now: Timestamp,
    ) -> Result<&'s mut ProviderRewards, RewardsError> {
        let rpt = self
            .stage_accumulator(staged, &key.pool_reserve(), now)?
            .reward_per_token;
        let entry = match staged.entries.entry(key.clone()) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => slot.insert(
                self.entries
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| ProviderRewards::new(key, rpt)),
            ),
        };
        entry.sync(rpt)?;
        Ok(entry)
    }

    pub(crate) fn commit(&mut self, staged: Staged) {
        let moved = staged.accumulators.iter().any(|(key, acc)| {
            self.accumulators.get(key).map_or(true, |stored| {
                stored.reward_per_token != acc.reward_per_token
                    || stored.total_staked != acc.total_staked
                    || stored.total_claimed_rewards != acc.total_claimed_rewards
            })
        }) || staged
            .entries
            .iter()
            .any(|(key, entry)| self.entries.get(key) != Some(entry));
        if moved {
            self.revision = self.revision.wrapping_add(1);
        }
        self.accumulators.extend(staged.accumulators);
        self.entries.extend(staged.entries);
    }

    /// Keys of every ledger entry the provider has, in key order.
    pub(crate) fn provider_keys(&self, provider: &Address) -> Vec<RewardKey> {
        self.entries
            .keys()
            .filter(|k| &k.provider == provider)
            .cloned()
            .collect()
    }

    pub(crate) fn live_positions(&self, provider: &Address) -> Result<Vec<Position>, RewardsError> {
        Ok(provider_positions(
            self.collaborators.positions.as_ref(),
            provider,
        )?)
    }

    pub(crate) fn lookup_position(&self, id: PositionId) -> Result<Position, RewardsError> {
        if !self.collaborators.positions.position_exists(id) {
            return Err(RewardsError::PositionNotFound(id));
        }
        self.collaborators.positions.position(id).map_err(|e| match e {
            ExternalError::PositionNotFound(id) => RewardsError::PositionNotFound(id),
            other => RewardsError::External(other),
        })
    }

    pub(crate) fn emit(&mut self, time: Timestamp, event: RewardEvent) {
        let record = EventRecord::new(self.next_event_seq, time, event);
        self.next_event_seq += 1;
        self.events.push(record);
    }

    // ---- multiplier ----

    /// Where a position's multiplier clock starts.
    fn position_start(&self, position: &Position) -> Timestamp {
        self.restake_anchors
            .get(&position.id)
            .copied()
            .unwrap_or(position.start_time)
    }

    /// Multiplier for one position start under the entry's reset anchor.
    fn multiplier_for(&self, key: &RewardKey, est: Timestamp, start: Timestamp, now: Timestamp) -> u32 {
        let end = self
            .programs
            .accrual_end(&key.pool_token)
            .map_or(now, |end| end.min(now));
        let last_reset = self
            .collaborators
            .checkpoints
            .checkpoint(&key.provider)
            .max(est);
        MultiplierInput {
            start_time: start,
            end_time: end,
            last_reset_time: last_reset,
        }
        .multiplier()
    }

    /// Minimum multiplier over the provider's live positions in the entry's
    /// (pool, reserve), or the entry's own staking time if there are none.
    pub(crate) fn entry_multiplier(
        &self,
        key: &RewardKey,
        est: Timestamp,
        positions: &[Position],
        now: Timestamp,
    ) -> u32 {
        positions
            .iter()
            .filter(|p| p.stakes_in(&key.pool_token, &key.reserve_token))
            .map(|p| self.multiplier_for(key, est, self.position_start(p), now))
            .min()
            .unwrap_or_else(|| {
                let start = if est.is_zero() { now } else { est };
                self.multiplier_for(key, est, start, now)
            })
    }

    /// Minimum multiplier over all of the provider's live positions.
    ///
    /// `est_of` yields the staking time of the entry a position belongs to.
    pub(crate) fn provider_multiplier_with(
        &self,
        provider: &Address,
        keys: &[RewardKey],
        est_of: impl Fn(&RewardKey) -> Timestamp,
        positions: &[Position],
        now: Timestamp,
    ) -> u32 {
        if positions.is_empty() {
            return keys
                .iter()
                .map(|k| self.entry_multiplier(k, est_of(k), positions, now))
                .min()
                .unwrap_or(PPM_RESOLUTION);
        }
        positions
            .iter()
            .map(|p| {
                let key = RewardKey::new(
                    provider.clone(),
                    p.pool_token.clone(),
                    p.reserve_token.clone(),
                );
                self.multiplier_for(&key, est_of(&key), self.position_start(p), now)
            })
            .min()
            .unwrap_or(PPM_RESOLUTION)
    }

    /// Latest clock start among the positions (or, without positions, the
    /// entries) that set the multiplier a payout was valued at.
    ///
    /// `keys` are the paid entries, or every entry of the provider for a
    /// provider-level payout.
    pub(crate) fn staking_anchor(
        &self,
        keys: &[RewardKey],
        est_of: impl Fn(&RewardKey) -> Timestamp,
        positions: &[Position],
        provider_level: bool,
        now: Timestamp,
    ) -> Timestamp {
        let reset = |key: &RewardKey| {
            self.collaborators
                .checkpoints
                .checkpoint(&key.provider)
                .max(est_of(key))
        };
        let from_entry = |key: &RewardKey| {
            let est = est_of(key);
            let start = if est.is_zero() { now } else { est };
            start.max(reset(key))
        };
        let from_position = |key: &RewardKey, p: &Position| self.position_start(p).max(reset(key));

        if provider_level {
            if positions.is_empty() {
                return keys.iter().map(from_entry).max().unwrap_or(now);
            }
            return positions
                .iter()
                .map(|p| {
                    let key = RewardKey::new(
                        p.provider.clone(),
                        p.pool_token.clone(),
                        p.reserve_token.clone(),
                    );
                    from_position(&key, p)
                })
                .max()
                .unwrap_or(now);
        }
        keys.iter()
            .map(|key| {
                positions
                    .iter()
                    .filter(|p| p.stakes_in(&key.pool_token, &key.reserve_token))
                    .map(|p| from_position(key, p))
                    .max()
                    .unwrap_or_else(|| from_entry(key))
            })
            .max()
            .unwrap_or(now)
    }

    fn stored_est(&self, key: &RewardKey) -> Timestamp {
        self.entries
            .get(key)
            .map_or(Timestamp::ZERO, |e| e.effective_staking_time)
    }

    /// Current multiplier for a (provider, pool, reserve) entry.
    pub fn multiplier(
        &self,
        provider: &Address,
        pool_token: &Address,
        reserve_token: &Address,
    ) -> Result<u32, RewardsError> {
        let key = RewardKey::new(provider.clone(), pool_token.clone(), reserve_token.clone());
        let positions = self.live_positions(provider)?;
        Ok(self.entry_multiplier(&key, self.stored_est(&key), &positions, self.now()))
    }

    /// Provider-level multiplier used by `claim_all` and `stake_all`.
    pub fn provider_multiplier(&self, provider: &Address) -> Result<u32, RewardsError> {
        let keys = self.provider_keys(provider);
        let positions = self.live_positions(provider)?;
        Ok(self.provider_multiplier_with(
            provider,
            &keys,
            |k| self.stored_est(k),
            &positions,
            self.now(),
        ))
    }

    // ---- reads ----

    fn pool_keys(&self, provider: &Address, pool_token: &Address, reserve_token: Option<&Address>) -> Vec<RewardKey> {
        self.provider_keys(provider)
            .into_iter()
            .filter(|k| &k.pool_token == pool_token)
            .filter(|k| reserve_token.map_or(true, |r| &k.reserve_token == r))
            .collect()
    }

    /// Payable rewards in a pool (optionally one reserve) under the current
    /// multiplier. Checkpoints the touched accumulators.
    pub fn pending_rewards(
        &mut self,
        provider: &Address,
        pool_token: &Address,
        reserve_token: Option<&Address>,
    ) -> Result<u128, RewardsError> {
        let now = self.now();
        let keys = self.pool_keys(provider, pool_token, reserve_token);
        let positions = self.live_positions(provider)?;

        let mut staged = Staged::default();
        let mut total: u128 = 0;
        for key in &keys {
            let entry = self.stage_entry(&mut staged, key, now)?;
            let est = entry.effective_staking_time;
            let m = self.entry_multiplier(key, est, &positions, now);
            let payable = staged.entry_mut(key)?.payable(m)?;
            total = total
                .checked_add(payable)
                .ok_or(RewardsError::Overflow("pending rewards"))?;
        }
        self.commit(staged);
        Ok(total)
    }

    /// Unmultiplied rewards accrued in a pool (optionally one reserve).
    pub fn pending_base_rewards(
        &mut self,
        provider: &Address,
        pool_token: &Address,
        reserve_token: Option<&Address>,
    ) -> Result<u128, RewardsError> {
        let now = self.now();
        let keys = self.pool_keys(provider, pool_token, reserve_token);
        let mut staged = Staged::default();
        let mut total: u128 = 0;
        for key in &keys {
            let pending = self.stage_entry(&mut staged, key, now)?.pending_base_rewards;
            total = total
                .checked_add(pending)
                .ok_or(RewardsError::Overflow("pending rewards"))?;
        }
        self.commit(staged);
        Ok(total)
    }

    /// Payable rewards of the entry a position belongs to.
    pub fn pending_rewards_for_position(&mut self, id: PositionId) -> Result<u128, RewardsError> {
        let position = self.lookup_position(id)?;
        self.pending_rewards(
            &position.provider,
            &position.pool_token,
            Some(&position.reserve_token),
        )
    }

    /// Payable rewards across every pool, under the provider-level multiplier.
    pub fn total_pending_rewards(&mut self, provider: &Address) -> Result<u128, RewardsError> {
        let now = self.now();
        let keys = self.provider_keys(provider);
        let positions = self.live_positions(provider)?;
        let mut staged = Staged::default();
        for key in &keys {
            self.stage_entry(&mut staged, key, now)?;
        }
        let m = self.provider_multiplier_with(
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
        );
        let mut total: u128 = 0;
        for entry in staged.entries.values() {
            total = total
                .checked_add(entry.payable(m)?)
                .ok_or(RewardsError::Overflow("pending rewards"))?;
        }
        self.commit(staged);
        Ok(total)
    }

    // ---- liquidity hooks ----

    /// Called by the position ledger after it added `amount` to position `id`.
    pub fn on_liquidity_added(&mut self, id: PositionId, amount: u128) -> Result<(), RewardsError> {
        if amount == 0 {
            return Err(RewardsError::InvalidAmount(
                "added liquidity must be positive".to_string(),
            ));
        }
        let position = self.lookup_position(id)?;
        let now = self.now();
        let key = RewardKey::new(
            position.provider.clone(),
            position.pool_token.clone(),
            position.reserve_token.clone(),
        );
        // A freshly opened position restarts the entry's minimum; value what
        // the entry earned so far without it.
        let opened = position.reserve_amount == amount;
        let earlier: Vec<Position> = self
            .live_positions(&position.provider)?
            .into_iter()
            .filter(|p| !(opened && p.id == id))
            .collect();

        let mut staged = Staged::default();
        let est = self.stage_entry(&mut staged, &key, now)?.effective_staking_time;
        let prevailing = self.entry_multiplier(&key, est, &earlier, now);
        staged.entry_mut(&key)?.rebase_debt(prevailing)?;
        self.stage_stake(&mut staged, &key, amount, now, now)?;
        self.commit(staged);
        tracing::info!(
            provider = %position.provider,
            pool = %position.pool_token,
            reserve = %position.reserve_token,
            position = %id,
            amount,
            "Liquidity added"
        );
        Ok(())
    }

    /// Add stake weight to an entry. `staking_start` starts the entry's
    /// multiplier clock if it never ran.
    pub(crate) fn stage_stake(
        &self,
        staged: &mut Staged,
        key: &RewardKey,
        amount: u128,
        staking_start: Timestamp,
        now: Timestamp,
    ) -> Result<(), RewardsError> {
        let entry = self.stage_entry(staged, key, now)?;
        entry.add_stake(amount)?;
        entry.start_staking(staking_start);
        staged.accumulator_mut(&key.pool_reserve())?.add_stake(amount)?;
        Ok(())
    }

    /// Called by the position ledger before it removes `amount` from
    /// position `id` and records the removal checkpoint.
    ///
    /// Any removal, partial or full, freezes the value of every pending reward
    /// of the provider and restarts the multiplier clock.
    pub fn on_liquidity_removed(&mut self, id: PositionId, amount: u128) -> Result<(), RewardsError> {
        if amount == 0 {
            return Err(RewardsError::InvalidAmount(
                "removed liquidity must be positive".to_string(),
            ));
        }
        let position = self.lookup_position(id)?;
        if amount > position.reserve_amount {
            return Err(RewardsError::InvalidAmount(format!(
                "removing {} from position {} holding {}",
                amount, id, position.reserve_amount
            )));
        }
        let now = self.now();
        let provider = &position.provider;
        let positions = self.live_positions(provider)?;
        let key = RewardKey::new(
            provider.clone(),
            position.pool_token.clone(),
            position.reserve_token.clone(),
        );

        let mut keys = self.provider_keys(provider);
        if !keys.contains(&key) {
            keys.push(key.clone());
        }

        let mut staged = Staged::default();
        self.stage_reset(&mut staged, &keys, &[], &positions, now)?;
        staged.entry_mut(&key)?.remove_stake(amount)?;
        staged.accumulator_mut(&key.pool_reserve())?.remove_stake(amount)?;
        self.commit(staged);
        if amount == position.reserve_amount {
            self.restake_anchors.remove(&id);
        }

        tracing::info!(
            provider = %provider,
            pool = %position.pool_token,
            reserve = %position.reserve_token,
            position = %id,
            amount,
            "Liquidity removed, multiplier clock reset"
        );
        Ok(())
    }

    /// Rebase debt at the prevailing multiplier for every key not in
    /// `settled`, then restart the clock of every key.
    pub(crate) fn stage_reset(
        &self,
        staged: &mut Staged,
        keys: &[RewardKey],
        settled: &[RewardKey],
        positions: &[Position],
        now: Timestamp,
    ) -> Result<(), RewardsError> {
        for key in keys {
            let est = self.stage_entry(staged, key, now)?.effective_staking_time;
            if !settled.contains(key) {
                let m = self.entry_multiplier(key, est, positions, now);
                staged.entry_mut(key)?.rebase_debt(m)?;
            }
        }
        for key in keys {
            staged.entry_mut(key)?.reset_staking_time(now);
        }
        Ok(())
    }

    // ---- events and persistence ----

    /// Events not yet acknowledged, oldest first.
    pub fn pending_events(&self) -> &[EventRecord] {
        &self.events
    }

    /// Forget the oldest `count` events.
    pub fn ack_events(&mut self, count: usize) {
        let count = count.min(self.events.len());
        self.events.drain(..count);
    }

    pub fn drain_events(&mut self) -> Vec<EventRecord> {
        std::mem::take(&mut self.events)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            programs: self.programs.records().cloned().collect(),
            accumulators: self.accumulators.values().cloned().collect(),
            entries: self.entries.values().cloned().collect(),
            distribution: self.distribution.snapshot(),
            roles: self.access.members(),
            next_event_seq: self.next_event_seq,
            restake_anchors: self
                .restake_anchors
                .iter()
                .map(|(id, at)| (*id, *at))
                .collect(),
        }
    }

    /// Replace all state with `snapshot`. Unacknowledged events are dropped.
    pub fn restore(&mut self, snapshot: EngineSnapshot) -> Result<(), RewardsError> {
        let distribution = EpochDistribution::from_snapshot(snapshot.distribution)?;

        for (account, role) in self.access.members() {
            self.access.revoke(&account, role);
        }
        for (account, role) in &snapshot.roles {
            self.access.grant(account, *role);
        }

        self.programs = ProgramRegistry::from_records(snapshot.programs);
        self.accumulators = snapshot
            .accumulators
            .into_iter()
            .map(|a| (a.key(), a))
            .collect();
        self.entries = snapshot
            .entries
            .into_iter()
            .map(|e| (e.key(), e))
            .collect();
        self.distribution = distribution;
        self.restake_anchors = snapshot.restake_anchors.into_iter().collect();
        self.events.clear();
        self.revision = self.revision.wrapping_add(1);
        self.next_event_seq = snapshot.next_event_seq.max(1);
        tracing::info!(
            programs = self.programs.records().count(),
            entries = self.entries.len(),
            "Engine state restored"
        );
        Ok(())
    }
}
