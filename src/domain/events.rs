//! Events emitted for off-chain observability and reconciliation.

use super::{Address, PositionId, Timestamp};
use serde::{Deserialize, Serialize};

/// Something the engine did that indexers need to know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RewardEvent {
    ProgramAdded {
        pool_token: Address,
        start_time: Timestamp,
        end_time: Timestamp,
        #[serde(with = "super::amount")]
        reward_rate: u128,
    },
    ProgramRemoved {
        pool_token: Address,
    },
    RewardsSet {
        epoch: u64,
        provider: Address,
        pool_token: Address,
        reserve_token: Address,
        #[serde(with = "super::amount")]
        amount: u128,
    },
    EpochCommitted {
        epoch: u64,
        #[serde(with = "super::amount")]
        total: u128,
    },
    RewardsClaimed {
        provider: Address,
        pool_token: Address,
        reserve_token: Address,
        #[serde(with = "super::amount")]
        amount: u128,
    },
    RewardsStaked {
        provider: Address,
        pool_token: Address,
        reserve_token: Address,
        target_pool: Address,
        #[serde(with = "super::amount")]
        amount: u128,
        position_id: PositionId,
    },
    MaxRewardsUpdated {
        #[serde(with = "super::amount")]
        max_rewards: u128,
        #[serde(with = "super::amount")]
        max_rewards_per_epoch: u128,
    },
    RoleGranted {
        account: Address,
        role: String,
    },
    RoleRevoked {
        account: Address,
        role: String,
    },
}

impl RewardEvent {
    /// Short kind label, used as an index column.
    pub fn kind(&self) -> &'static str {
        match self {
            RewardEvent::ProgramAdded { .. } => "program_added",
            RewardEvent::ProgramRemoved { .. } => "program_removed",
            RewardEvent::RewardsSet { .. } => "rewards_set",
            RewardEvent::EpochCommitted { .. } => "epoch_committed",
            RewardEvent::RewardsClaimed { .. } => "rewards_claimed",
            RewardEvent::RewardsStaked { .. } => "rewards_staked",
            RewardEvent::MaxRewardsUpdated { .. } => "max_rewards_updated",
            RewardEvent::RoleGranted { .. } => "role_granted",
            RewardEvent::RoleRevoked { .. } => "role_revoked",
        }
    }

    /// Provider the event concerns, if any.
    pub fn provider(&self) -> Option<&Address> {
        match self {
            RewardEvent::RewardsSet { provider, .. }
            | RewardEvent::RewardsClaimed { provider, .. }
            | RewardEvent::RewardsStaked { provider, .. } => Some(provider),
            _ => None,
        }
    }

    /// Pool the event concerns, if any.
    pub fn pool_token(&self) -> Option<&Address> {
        match self {
            RewardEvent::ProgramAdded { pool_token, .. }
            | RewardEvent::ProgramRemoved { pool_token }
            | RewardEvent::RewardsSet { pool_token, .. }
            | RewardEvent::RewardsClaimed { pool_token, .. }
            | RewardEvent::RewardsStaked { pool_token, .. } => Some(pool_token),
            _ => None,
        }
    }
}

/// A sequenced event with its stable key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub time: Timestamp,
    /// Stable unique identifier; downstream stores insert idempotently on it.
    pub event_key: String,
    pub event: RewardEvent,
}

impl EventRecord {
    pub fn new(seq: u64, time: Timestamp, event: RewardEvent) -> Self {
        let event_key = Self::compute_event_key(seq, time, &event);
        Self {
            seq,
            time,
            event_key,
            event,
        }
    }

    /// Hash of the sequence number, time and canonical JSON payload.
    ///
    /// Truncated to 128 bits; the sequence number already makes keys unique
    /// within one engine, the hash guards against replays from a restored
    /// snapshot that diverged.
    pub fn compute_event_key(seq: u64, time: Timestamp, event: &RewardEvent) -> String {
        use sha2::{Digest, Sha256};

        let payload = serde_json::to_string(event).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(seq.to_le_bytes());
        hasher.update(time.as_secs().to_le_bytes());
        hasher.update((payload.len() as u32).to_le_bytes());
        hasher.update(payload.as_bytes());

        let hash = hasher.finalize();
        format!("evt:{}", hex::encode(&hash[..16]))
    }
}
