//! In-memory collaborators, used by the service binary and in tests.

use super::{
    CheckpointSource, Collaborators, ExternalError, LiquiditySink, MintKind, MintRequest,
    PositionSource, RewardMinter,
};
use crate::domain::{Address, Position, PositionId, Timestamp};
use crate::engine::Clock;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct BookState {
    next_id: u64,
    positions: BTreeMap<PositionId, Position>,
    /// Every id a provider ever held, in creation order.
    by_provider: BTreeMap<Address, Vec<PositionId>>,
    fail_next_add: Option<String>,
}

/// Position ledger. Also acts as the liquidity sink for restakes.
pub struct PositionBook {
    clock: Arc<dyn Clock>,
    state: Mutex<BookState>,
}

impl PositionBook {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(BookState::default()),
        }
    }

    /// Open a new position at the current time.
    pub fn open(
        &self,
        provider: &Address,
        pool_token: &Address,
        reserve_token: &Address,
        amount: u128,
    ) -> Position {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let position = Position {
            id: PositionId::new(state.next_id),
            provider: provider.clone(),
            pool_token: pool_token.clone(),
            reserve_token: reserve_token.clone(),
            reserve_amount: amount,
            start_time: self.clock.now(),
        };
        state.positions.insert(position.id, position.clone());
        state
            .by_provider
            .entry(provider.clone())
            .or_default()
            .push(position.id);
        position
    }

    /// Withdraw `amount` from a position; the position disappears at zero.
    ///
    /// # Returns
    /// The position after the withdrawal, or None if it was closed.
    pub fn withdraw(&self, id: PositionId, amount: u128) -> Result<Option<Position>, ExternalError> {
        let mut state = lock(&self.state);
        let position = state
            .positions
            .get_mut(&id)
            .ok_or(ExternalError::PositionNotFound(id))?;
        position.reserve_amount = position.reserve_amount.checked_sub(amount).ok_or_else(|| {
            ExternalError::LiquidityFailed(format!(
                "withdrawal of {} exceeds position {} amount {}",
                amount, id, position.reserve_amount
            ))
        })?;
        if position.reserve_amount == 0 {
            state.positions.remove(&id);
            return Ok(None);
        }
        Ok(Some(position.clone()))
    }

    /// Drop a position outright, e.g. when the engine refused to register it.
    pub fn discard(&self, id: PositionId) {
        lock(&self.state).positions.remove(&id);
    }

    /// Make the next `add_liquidity_for` fail with `reason`.
    pub fn fail_next_add(&self, reason: &str) {
        lock(&self.state).fail_next_add = Some(reason.to_string());
    }

    pub fn positions(&self) -> Vec<Position> {
        lock(&self.state).positions.values().cloned().collect()
    }

    /// Highest id handed out so far.
    pub fn last_id(&self) -> u64 {
        lock(&self.state).next_id
    }

    /// Replace the book's contents with `positions`. Ids continue after
    /// `last_id` even if the positions holding them are gone.
    pub fn restore(&self, positions: Vec<Position>, last_id: u64) {
        let mut state = lock(&self.state);
        *state = BookState {
            next_id: last_id,
            ..BookState::default()
        };
        for position in positions {
            state.next_id = state.next_id.max(position.id.as_u64());
            state
                .by_provider
                .entry(position.provider.clone())
                .or_default()
                .push(position.id);
            state.positions.insert(position.id, position);
        }
    }
}

impl PositionSource for PositionBook {
    fn position_exists(&self, id: PositionId) -> bool {
        lock(&self.state).positions.contains_key(&id)
    }

    fn position(&self, id: PositionId) -> Result<Position, ExternalError> {
        lock(&self.state)
            .positions
            .get(&id)
            .cloned()
            .ok_or(ExternalError::PositionNotFound(id))
    }

    fn provider_positions_count(&self, provider: &Address) -> usize {
        lock(&self.state).by_provider.get(provider).map_or(0, Vec::len)
    }

    fn provider_position(&self, provider: &Address, index: usize) -> Option<PositionId> {
        lock(&self.state)
            .by_provider
            .get(provider)
            .and_then(|ids| ids.get(index))
            .copied()
    }
}

impl LiquiditySink for PositionBook {
    fn add_liquidity_for(
        &self,
        recipient: &Address,
        pool_token: &Address,
        reward_token: &Address,
        amount: u128,
    ) -> Result<PositionId, ExternalError> {
        if let Some(reason) = lock(&self.state).fail_next_add.take() {
            return Err(ExternalError::LiquidityFailed(reason));
        }
        Ok(self.open(recipient, pool_token, reward_token, amount).id)
    }
}

/// Per-provider removal and claim checkpoints.
#[derive(Debug, Default)]
pub struct CheckpointBook {
    checkpoints: Mutex<BTreeMap<Address, Timestamp>>,
}

impl CheckpointBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a liquidity removal. Checkpoints never move backwards.
    pub fn record_removal(&self, provider: &Address, at: Timestamp) {
        let mut checkpoints = lock(&self.checkpoints);
        let entry = checkpoints.entry(provider.clone()).or_default();
        *entry = (*entry).max(at);
    }

    pub fn entries(&self) -> Vec<(Address, Timestamp)> {
        lock(&self.checkpoints)
            .iter()
            .map(|(a, t)| (a.clone(), *t))
            .collect()
    }

    pub fn restore(&self, entries: Vec<(Address, Timestamp)>) {
        *lock(&self.checkpoints) = entries.into_iter().collect();
    }
}

impl CheckpointSource for CheckpointBook {
    fn checkpoint(&self, provider: &Address) -> Timestamp {
        lock(&self.checkpoints)
            .get(provider)
            .copied()
            .unwrap_or(Timestamp::ZERO)
    }

    fn update_last_claim_time(&self, provider: &Address, at: Timestamp) -> Result<(), ExternalError> {
        self.record_removal(provider, at);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct OutboxState {
    pending: Vec<MintRequest>,
    balances: BTreeMap<Address, u128>,
    fail_next_mint: Option<String>,
}

/// Reward token stand-in that records every mint and burn.
///
/// Requests queue up until acknowledged, so a caller can persist them before
/// forgetting them.
#[derive(Debug)]
pub struct MintOutbox {
    token: Address,
    state: Mutex<OutboxState>,
}

impl MintOutbox {
    pub fn new(token: Address) -> Self {
        Self {
            token,
            state: Mutex::new(OutboxState::default()),
        }
    }

    /// Make the next mint fail with `reason`.
    pub fn fail_next_mint(&self, reason: &str) {
        lock(&self.state).fail_next_mint = Some(reason.to_string());
    }

    pub fn balance_of(&self, account: &Address) -> u128 {
        lock(&self.state).balances.get(account).copied().unwrap_or(0)
    }

    /// Unacknowledged requests, oldest first.
    pub fn peek(&self) -> Vec<MintRequest> {
        lock(&self.state).pending.clone()
    }

    /// Forget the oldest `count` requests.
    pub fn ack(&self, count: usize) {
        let mut state = lock(&self.state);
        let count = count.min(state.pending.len());
        state.pending.drain(..count);
    }

    pub fn balances(&self) -> Vec<(Address, u128)> {
        lock(&self.state)
            .balances
            .iter()
            .map(|(a, b)| (a.clone(), *b))
            .collect()
    }

    pub fn restore_balances(&self, balances: Vec<(Address, u128)>) {
        lock(&self.state).balances = balances.into_iter().collect();
    }
}

impl RewardMinter for MintOutbox {
    fn token(&self) -> Address {
        self.token.clone()
    }

    fn mint(&self, to: &Address, amount: u128) -> Result<(), ExternalError> {
        let mut state = lock(&self.state);
        if let Some(reason) = state.fail_next_mint.take() {
            return Err(ExternalError::MintFailed(reason));
        }
        let balance = state.balances.entry(to.clone()).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| ExternalError::MintFailed("balance overflow".to_string()))?;
        state.pending.push(MintRequest {
            kind: MintKind::Mint,
            account: to.clone(),
            amount,
        });
        Ok(())
    }

    fn burn(&self, from: &Address, amount: u128) -> Result<(), ExternalError> {
        let mut state = lock(&self.state);
        let balance = state.balances.entry(from.clone()).or_default();
        *balance = balance.checked_sub(amount).ok_or_else(|| {
            ExternalError::BurnFailed(format!("{} holds less than {}", from, amount))
        })?;
        state.pending.push(MintRequest {
            kind: MintKind::Burn,
            account: from.clone(),
            amount,
        });
        Ok(())
    }
}

/// The three in-memory collaborators wired together.
#[derive(Clone)]
pub struct InMemoryLedger {
    pub positions: Arc<PositionBook>,
    pub checkpoints: Arc<CheckpointBook>,
    pub outbox: Arc<MintOutbox>,
}

impl InMemoryLedger {
    pub fn new(clock: Arc<dyn Clock>, reward_token: Address) -> Self {
        Self {
            positions: Arc::new(PositionBook::new(clock)),
            checkpoints: Arc::new(CheckpointBook::new()),
            outbox: Arc::new(MintOutbox::new(reward_token)),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            positions: self.positions.clone(),
            checkpoints: self.checkpoints.clone(),
            minter: self.outbox.clone(),
            liquidity: self.positions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ManualClock;
    use crate::external::provider_positions;

    fn addr(s: &str) -> Address {
        Address::new(s.to_string())
    }

    fn new_book() -> (Arc<ManualClock>, PositionBook) {
        let clock = Arc::new(ManualClock::new(Timestamp::new(100)));
        let book = PositionBook::new(clock.clone());
        (clock, book)
    }

    #[test]
    fn test_open_and_withdraw() {
        let (clock, book) = new_book();
        let p = book.open(&addr("0xp"), &addr("0xpool"), &addr("0xr"), 50);
        assert_eq!(p.id, PositionId::new(1));
        assert_eq!(p.start_time, Timestamp::new(100));

        clock.advance(10);
        let after = book.withdraw(p.id, 20).unwrap().unwrap();
        assert_eq!(after.reserve_amount, 30);
        assert!(book.withdraw(p.id, 31).is_err());

        assert_eq!(book.withdraw(p.id, 30).unwrap(), None);
        assert!(!book.position_exists(p.id));
        assert_eq!(
            book.position(p.id),
            Err(ExternalError::PositionNotFound(p.id))
        );
    }

    #[test]
    fn test_provider_positions_skips_closed() {
        let (_clock, book) = new_book();
        let a = book.open(&addr("0xp"), &addr("0xpool"), &addr("0xr"), 5);
        let b = book.open(&addr("0xp"), &addr("0xpool2"), &addr("0xr"), 7);
        book.withdraw(a.id, 5).unwrap();

        let live = provider_positions(&book, &addr("0xp")).unwrap();
        assert_eq!(live, vec![b]);
        assert!(provider_positions(&book, &addr("0xq")).unwrap().is_empty());
    }

    #[test]
    fn test_add_liquidity_failure_injection() {
        let (_clock, book) = new_book();
        book.fail_next_add("paused");
        assert_eq!(
            book.add_liquidity_for(&addr("0xp"), &addr("0xpool"), &addr("0xtkn"), 1),
            Err(ExternalError::LiquidityFailed("paused".to_string()))
        );
        let id = book
            .add_liquidity_for(&addr("0xp"), &addr("0xpool"), &addr("0xtkn"), 1)
            .unwrap();
        assert_eq!(book.position(id).unwrap().reserve_token, addr("0xtkn"));
    }

    #[test]
    fn test_restore_keeps_ids_monotonic() {
        let (_clock, book) = new_book();
        book.open(&addr("0xp"), &addr("0xpool"), &addr("0xr"), 5);
        let b = book.open(&addr("0xp"), &addr("0xpool"), &addr("0xr"), 5);
        book.withdraw(b.id, 5).unwrap();

        let (_clock2, other) = new_book();
        other.restore(book.positions(), book.last_id());
        let c = other.open(&addr("0xp"), &addr("0xpool"), &addr("0xr"), 5);
        assert!(c.id > b.id);
    }

    #[test]
    fn test_checkpoints_only_move_forward() {
        let cps = CheckpointBook::new();
        assert_eq!(cps.checkpoint(&addr("0xp")), Timestamp::ZERO);
        cps.record_removal(&addr("0xp"), Timestamp::new(50));
        cps.update_last_claim_time(&addr("0xp"), Timestamp::new(20)).unwrap();
        assert_eq!(cps.checkpoint(&addr("0xp")), Timestamp::new(50));
    }

    #[test]
    fn test_outbox_mint_burn_and_ack() {
        let outbox = MintOutbox::new(addr("0xtkn"));
        outbox.mint(&addr("0xp"), 10).unwrap();
        outbox.burn(&addr("0xp"), 4).unwrap();
        assert_eq!(outbox.balance_of(&addr("0xp")), 6);
        assert!(outbox.burn(&addr("0xp"), 7).is_err());

        let pending = outbox.peek();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[1].kind, MintKind::Burn);
        outbox.ack(1);
        assert_eq!(outbox.peek().len(), 1);

        outbox.fail_next_mint("paused");
        assert!(outbox.mint(&addr("0xp"), 1).is_err());
        assert_eq!(outbox.balance_of(&addr("0xp")), 6);
        outbox.mint(&addr("0xp"), 1).unwrap();
        assert_eq!(outbox.balance_of(&addr("0xp")), 7);
    }
}
