//! Domain types for the liquidity-mining rewards engine.
//!
//! This module provides:
//! - Domain primitives: Timestamp, Address, PositionId
//! - Reward programs and their per-reserve shares
//! - Positions as reported by the position ledger
//! - Events with stable keys for downstream reconciliation

pub mod amount;
pub mod events;
pub mod position;
pub mod primitives;
pub mod program;

pub use amount::parse_amount;
pub use events::{EventRecord, RewardEvent};
pub use position::Position;
pub use primitives::{
    Address, AddressParseError, PositionId, Timestamp, SECONDS_PER_DAY, SECONDS_PER_WEEK,
};
pub use program::{PoolProgram, ReserveShare, PPM_RESOLUTION};
