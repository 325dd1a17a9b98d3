use crate::db::{Repository, StoredSnapshot};
use crate::domain::{Address, EventRecord, PoolProgram, Position, PositionId, Timestamp};
use crate::engine::{
    Clock, EngineSnapshot, RewardsEngine, RewardsError, Role, RoleRegistry, SeedEntry,
    StakeOutcome,
};
use crate::external::InMemoryLedger;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Everything needed to bring the service back after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub engine: EngineSnapshot,
    pub positions: Vec<Position>,
    pub last_position_id: u64,
    pub checkpoints: Vec<(Address, Timestamp)>,
    pub balances: Vec<(Address, u128)>,
}

/// Current reward ceilings and allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ceilings {
    pub max_rewards: u128,
    pub max_rewards_per_epoch: u128,
    pub total_rewards: u128,
    /// Paid out through claims and restakes.
    pub distributed: u128,
}

/// Async front of the rewards engine.
///
/// One mutex serializes every engine call together with the persistence of
/// its outcome, so settlements never interleave and the stored snapshot always
/// matches the last acknowledged operation.
pub struct RewardsService {
    engine: Mutex<RewardsEngine>,
    ledger: InMemoryLedger,
    repo: Repository,
    clock: Arc<dyn Clock>,
}

impl RewardsService {
    /// Build the service and restore the latest stored snapshot, if any.
    ///
    /// `supervisor` only seeds the role table of a fresh store; a restored
    /// snapshot brings its own roles.
    pub async fn open(
        repo: Repository,
        clock: Arc<dyn Clock>,
        reward_token: Address,
        intermediary: Address,
        supervisor: Address,
    ) -> Result<Self, ServiceError> {
        let ledger = InMemoryLedger::new(clock.clone(), reward_token);
        let mut engine = RewardsEngine::new(
            intermediary,
            clock.clone(),
            Box::new(RoleRegistry::new(supervisor)),
            ledger.collaborators(),
        )?;

        if let Some(stored) = repo.latest_snapshot().await? {
            let state: ServiceSnapshot = serde_json::from_str(&stored.state)?;
            engine.restore(state.engine)?;
            ledger.positions.restore(state.positions, state.last_position_id);
            ledger.checkpoints.restore(state.checkpoints);
            ledger.outbox.restore_balances(state.balances);
            tracing::info!(
                taken_at = %stored.taken_at,
                last_event_seq = stored.last_event_seq,
                "Service state restored from snapshot"
            );
        }

        Ok(Self {
            engine: Mutex::new(engine),
            ledger,
            repo,
            clock,
        })
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn ledger(&self) -> &InMemoryLedger {
        &self.ledger
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Run `op` under the engine lock and persist what it produced.
    ///
    /// Failed operations are persisted only when they left collaborator
    /// effects behind (a compensating burn, say).
    async fn run<T>(
        &self,
        op: impl FnOnce(&mut RewardsEngine) -> Result<T, RewardsError>,
    ) -> Result<T, ServiceError> {
        let mut engine = self.engine.lock().await;
        let result = op(&mut *engine);
        let has_effects =
            !engine.pending_events().is_empty() || !self.ledger.outbox.peek().is_empty();
        if result.is_ok() || has_effects {
            self.persist(&mut *engine).await?;
        }
        Ok(result?)
    }

    /// Run a read under the engine lock.
    ///
    /// Reads checkpoint accumulators, so they can move state; the snapshot is
    /// rewritten only when they did.
    async fn read<T>(
        &self,
        op: impl FnOnce(&mut RewardsEngine) -> Result<T, RewardsError>,
    ) -> Result<T, ServiceError> {
        let mut engine = self.engine.lock().await;
        let revision = engine.revision();
        let value = op(&mut *engine)?;
        if engine.revision() != revision {
            self.persist(&mut *engine).await?;
        }
        Ok(value)
    }

    async fn persist(&self, engine: &mut RewardsEngine) -> Result<(), ServiceError> {
        let records = engine.pending_events().to_vec();
        let mints = self.ledger.outbox.peek();
        let state = ServiceSnapshot {
            engine: engine.snapshot(),
            positions: self.ledger.positions.positions(),
            last_position_id: self.ledger.positions.last_id(),
            checkpoints: self.ledger.checkpoints.entries(),
            balances: self.ledger.outbox.balances(),
        };
        let snapshot = StoredSnapshot {
            taken_at: self.clock.now(),
            last_event_seq: state.engine.next_event_seq.saturating_sub(1),
            state: serde_json::to_string(&state)?,
        };

        let inserted = self.repo.record_commit(&records, &mints, &snapshot).await?;
        engine.ack_events(records.len());
        self.ledger.outbox.ack(mints.len());
        tracing::debug!(
            events = inserted,
            mints = mints.len(),
            last_event_seq = snapshot.last_event_seq,
            "Persisted engine state"
        );
        Ok(())
    }

    // ---- administration ----

    pub async fn add_program(&self, caller: &Address, program: PoolProgram) -> Result<(), ServiceError> {
        self.run(|engine| engine.add_program(caller, program)).await
    }

    pub async fn remove_program(&self, caller: &Address, pool_token: &Address) -> Result<(), ServiceError> {
        self.run(|engine| engine.remove_program(caller, pool_token))
            .await
    }

    pub async fn set_max_rewards(
        &self,
        caller: &Address,
        max_rewards: u128,
        max_rewards_per_epoch: u128,
    ) -> Result<(), ServiceError> {
        self.run(|engine| engine.set_max_rewards(caller, max_rewards, max_rewards_per_epoch))
            .await
    }

    pub async fn set_rewards(
        &self,
        caller: &Address,
        epoch: u64,
        entries: &[SeedEntry],
    ) -> Result<(), ServiceError> {
        self.run(|engine| engine.set_rewards(caller, epoch, entries))
            .await
    }

    pub async fn commit_epoch(&self, caller: &Address, epoch: u64) -> Result<u128, ServiceError> {
        self.run(|engine| engine.commit_epoch(caller, epoch)).await
    }

    pub async fn grant_role(&self, caller: &Address, account: &Address, role: Role) -> Result<bool, ServiceError> {
        self.run(|engine| engine.grant_role(caller, account, role))
            .await
    }

    pub async fn revoke_role(&self, caller: &Address, account: &Address, role: Role) -> Result<bool, ServiceError> {
        self.run(|engine| engine.revoke_role(caller, account, role))
            .await
    }

    // ---- liquidity ----

    /// Open a position and register its stake. The position is dropped again
    /// if the engine refuses it.
    pub async fn add_liquidity(
        &self,
        provider: &Address,
        pool_token: &Address,
        reserve_token: &Address,
        amount: u128,
    ) -> Result<Position, ServiceError> {
        let positions = &self.ledger.positions;
        self.run(|engine| {
            let position = positions.open(provider, pool_token, reserve_token, amount);
            if let Err(e) = engine.on_liquidity_added(position.id, amount) {
                positions.discard(position.id);
                return Err(e);
            }
            Ok(position)
        })
        .await
    }

    /// Withdraw from one of the caller's positions.
    ///
    /// The engine hook runs first, then the withdrawal, then the removal
    /// checkpoint. Returns the position after the withdrawal, None once it is
    /// closed.
    pub async fn remove_liquidity(
        &self,
        caller: &Address,
        id: PositionId,
        amount: u128,
    ) -> Result<Option<Position>, ServiceError> {
        let ledger = &self.ledger;
        self.run(|engine| {
            let position = engine.lookup_position(id)?;
            if &position.provider != caller {
                tracing::warn!(caller = %caller, position = %id, "Refused removal from foreign position");
                return Err(RewardsError::AccessDenied {
                    caller: caller.clone(),
                    reason: format!("position {} belongs to {}", id, position.provider),
                });
            }
            engine.on_liquidity_removed(id, amount)?;
            let remaining = ledger.positions.withdraw(id, amount)?;
            ledger.checkpoints.record_removal(caller, engine.now());
            Ok(remaining)
        })
        .await
    }

    pub fn positions(&self, provider: &Address) -> Vec<Position> {
        self.ledger
            .positions
            .positions()
            .into_iter()
            .filter(|p| &p.provider == provider)
            .collect()
    }

    pub fn balance_of(&self, account: &Address) -> u128 {
        self.ledger.outbox.balance_of(account)
    }

    // ---- settlement ----

    pub async fn claim(&self, provider: &Address, pool_token: &Address) -> Result<u128, ServiceError> {
        self.run(|engine| engine.claim(provider, pool_token)).await
    }

    pub async fn claim_all(&self, provider: &Address) -> Result<u128, ServiceError> {
        self.run(|engine| engine.claim_all(provider)).await
    }

    pub async fn stake(
        &self,
        provider: &Address,
        pool_token: &Address,
        target_pool: &Address,
    ) -> Result<StakeOutcome, ServiceError> {
        self.run(|engine| engine.stake(provider, pool_token, target_pool))
            .await
    }

    pub async fn stake_all(&self, provider: &Address, target_pool: &Address) -> Result<StakeOutcome, ServiceError> {
        self.run(|engine| engine.stake_all(provider, target_pool))
            .await
    }

    // ---- reads ----

    pub async fn pending_rewards(
        &self,
        provider: &Address,
        pool_token: &Address,
        reserve_token: Option<&Address>,
    ) -> Result<u128, ServiceError> {
        self.read(|engine| engine.pending_rewards(provider, pool_token, reserve_token))
            .await
    }

    pub async fn pending_base_rewards(
        &self,
        provider: &Address,
        pool_token: &Address,
        reserve_token: Option<&Address>,
    ) -> Result<u128, ServiceError> {
        self.read(|engine| engine.pending_base_rewards(provider, pool_token, reserve_token))
            .await
    }

    pub async fn pending_rewards_for_position(&self, id: PositionId) -> Result<u128, ServiceError> {
        self.read(|engine| engine.pending_rewards_for_position(id))
            .await
    }

    pub async fn total_pending_rewards(&self, provider: &Address) -> Result<u128, ServiceError> {
        self.read(|engine| engine.total_pending_rewards(provider))
            .await
    }

    pub async fn multiplier(
        &self,
        provider: &Address,
        pool_token: &Address,
        reserve_token: &Address,
    ) -> Result<u32, ServiceError> {
        let engine = self.engine.lock().await;
        Ok(engine.multiplier(provider, pool_token, reserve_token)?)
    }

    pub async fn provider_multiplier(&self, provider: &Address) -> Result<u32, ServiceError> {
        let engine = self.engine.lock().await;
        Ok(engine.provider_multiplier(provider)?)
    }

    pub async fn programs(&self) -> Vec<PoolProgram> {
        self.engine.lock().await.programs().cloned().collect()
    }

    pub async fn program(&self, pool_token: &Address) -> Option<PoolProgram> {
        self.engine.lock().await.program(pool_token).cloned()
    }

    pub async fn ceilings(&self) -> Ceilings {
        let engine = self.engine.lock().await;
        let distribution = engine.distribution();
        Ceilings {
            max_rewards: distribution.max_rewards(),
            max_rewards_per_epoch: distribution.max_rewards_per_epoch(),
            total_rewards: distribution.total_rewards(),
            distributed: distribution.distributed(),
        }
    }

    pub async fn has_role(&self, account: &Address, role: Role) -> bool {
        self.engine.lock().await.has_role(account, role)
    }

    /// Persisted events after `after_seq`.
    pub async fn events(
        &self,
        provider: Option<&Address>,
        after_seq: u64,
        limit: u32,
    ) -> Result<Vec<EventRecord>, ServiceError> {
        Ok(self.repo.query_events(provider, after_seq, limit).await?)
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Rewards(#[from] RewardsError),
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("snapshot encoding error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl ServiceError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::domain::{ReserveShare, SECONDS_PER_WEEK};
    use crate::engine::ManualClock;
    use tempfile::TempDir;

    fn addr(n: u8) -> Address {
        Address::new(format!("0x{:040x}", n))
    }

    async fn service(dir: &TempDir, clock: Arc<ManualClock>) -> RewardsService {
        let path = dir.path().join("test.db").to_string_lossy().to_string();
        let repo = Repository::new(init_db(&path).await.unwrap());
        RewardsService::open(repo, clock, addr(0xee), addr(0xaa), addr(0x01))
            .await
            .unwrap()
    }

    fn program(start: u64) -> PoolProgram {
        PoolProgram {
            pool_token: addr(0x10),
            start_time: Timestamp::new(start),
            end_time: Timestamp::new(start + 4 * SECONDS_PER_WEEK),
            reward_rate: 1_000,
            reserve_shares: vec![ReserveShare {
                reserve_token: addr(0x20),
                share_ppm: 1_000_000,
            }],
        }
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(Timestamp::new(1_000)));
        let svc = service(&dir, clock.clone()).await;
        svc.grant_role(&addr(0x01), &addr(0x02), Role::Distributor)
            .await
            .unwrap();
        svc.add_program(&addr(0x02), program(1_000)).await.unwrap();
        let position = svc
            .add_liquidity(&addr(0x30), &addr(0x10), &addr(0x20), 500)
            .await
            .unwrap();
        clock.advance(100);
        let before = svc
            .pending_base_rewards(&addr(0x30), &addr(0x10), None)
            .await
            .unwrap();
        assert_eq!(before, 100_000);
        drop(svc);

        let reopened = service(&dir, clock.clone()).await;
        assert_eq!(reopened.positions(&addr(0x30)), vec![position]);
        assert!(reopened.has_role(&addr(0x02), Role::Distributor).await);
        assert_eq!(
            reopened
                .pending_base_rewards(&addr(0x30), &addr(0x10), None)
                .await
                .unwrap(),
            before
        );

        let events = reopened.events(None, 0, 100).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.kind(), "role_granted");
        assert_eq!(events[1].event.kind(), "program_added");
    }

    #[tokio::test]
    async fn test_remove_liquidity_rejects_foreign_position() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(Timestamp::new(1_000)));
        let svc = service(&dir, clock).await;
        let position = svc
            .add_liquidity(&addr(0x30), &addr(0x10), &addr(0x20), 500)
            .await
            .unwrap();

        let err = svc
            .remove_liquidity(&addr(0x31), position.id, 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Rewards(RewardsError::AccessDenied { .. })
        ));
        assert_eq!(svc.positions(&addr(0x30)).len(), 1);
    }

    #[tokio::test]
    async fn test_add_liquidity_discards_refused_position() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(Timestamp::new(1_000)));
        let svc = service(&dir, clock).await;

        let err = svc
            .add_liquidity(&addr(0x30), &addr(0x10), &addr(0x20), 0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Rewards(RewardsError::InvalidAmount(_))
        ));
        assert!(svc.positions(&addr(0x30)).is_empty());
    }

    #[test]
    fn test_only_storage_errors_are_transient() {
        assert!(ServiceError::Storage(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!ServiceError::Rewards(RewardsError::NoRewards).is_transient());
    }
}
