//! Async orchestration around the engine: the persisted service and the
//! seeding job.

pub mod seed;
pub mod service;

pub use seed::{parse_seed_csv, SeedError, SeedReport, SeedTarget, Seeder};
pub use service::{Ceilings, RewardsService, ServiceError, ServiceSnapshot};
