//! Deterministic reward accounting core.
//!
//! The engine is synchronous and single-writer: every state change takes
//! `&mut self` and either commits completely or leaves no trace. Time comes
//! from an injected [`Clock`], permissions from an injected [`AccessPolicy`].

pub mod access;
pub mod accumulator;
mod admin;
pub mod clock;
pub mod epochs;
pub mod error;
pub mod ledger;
pub mod math;
pub mod multiplier;
pub mod registry;
pub mod rewards;
pub mod settlement;

pub use access::{AccessPolicy, Role, RoleRegistry};
pub use accumulator::{AccrualWindow, PoolReserve, RewardAccumulator};
pub use clock::{Clock, ManualClock, SystemClock};
pub use epochs::{CommittedEpoch, DistributionSnapshot, EpochDistribution, PayoutCharge, SeedEntry};
pub use error::RewardsError;
pub use ledger::{ProviderRewards, RewardKey};
pub use math::REWARD_RATE_FACTOR;
pub use multiplier::{rewards_multiplier, MultiplierInput, MAX_MULTIPLIER};
pub use registry::{ProgramRecord, ProgramRegistry};
pub use rewards::{EngineSnapshot, RewardsEngine};
pub use settlement::StakeOutcome;
