pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod external;
pub mod orchestration;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{Address, EventRecord, PoolProgram, Position, PositionId, RewardEvent, Timestamp};
pub use engine::{RewardsEngine, RewardsError};
pub use error::AppError;
pub use orchestration::{RewardsService, ServiceError};
