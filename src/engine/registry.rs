//! Program registry: one reward program per pool.

use super::accumulator::AccrualWindow;
use super::error::require_address;
use super::RewardsError;
use crate::domain::{Address, PoolProgram, Timestamp, PPM_RESOLUTION};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A program plus the time it was removed, if it was.
///
/// Removed programs are kept so their accumulators stay frozen at the removal
/// time and earned rewards remain claimable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramRecord {
    pub program: PoolProgram,
    pub removed_at: Option<Timestamp>,
}

impl ProgramRecord {
    /// Last second at which the program pays.
    pub fn accrual_end(&self) -> Timestamp {
        match self.removed_at {
            Some(removed) => removed.min(self.program.end_time),
            None => self.program.end_time,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramRegistry {
    records: BTreeMap<Address, ProgramRecord>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from previously exported records.
    pub fn from_records(records: Vec<ProgramRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|r| (r.program.pool_token.clone(), r))
                .collect(),
        }
    }

    /// Check a program definition without registering it.
    pub fn validate(&self, program: &PoolProgram) -> Result<(), RewardsError> {
        require_address("pool token", &program.pool_token)?;
        if self.is_participating(&program.pool_token) {
            return Err(RewardsError::DuplicateProgram(program.pool_token.clone()));
        }
        if program.start_time > program.end_time {
            return Err(RewardsError::InvalidWindow {
                start: program.start_time,
                end: program.end_time,
            });
        }
        if program.reward_rate == 0 {
            return Err(RewardsError::InvalidAmount(
                "reward rate must be positive".to_string(),
            ));
        }
        if program.reserve_shares.is_empty() {
            return Err(RewardsError::InvalidRewardShares(
                "at least one reserve token is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut total: u64 = 0;
        for share in &program.reserve_shares {
            require_address("reserve token", &share.reserve_token)?;
            if !seen.insert(&share.reserve_token) {
                return Err(RewardsError::InvalidRewardShares(format!(
                    "reserve {} listed more than once",
                    share.reserve_token
                )));
            }
            total += u64::from(share.share_ppm);
        }
        if total != u64::from(PPM_RESOLUTION) {
            return Err(RewardsError::InvalidRewardShares(format!(
                "shares sum to {} instead of {}",
                total, PPM_RESOLUTION
            )));
        }
        Ok(())
    }

    /// Register a program. A removed program for the same pool is replaced.
    pub fn add(&mut self, program: PoolProgram) -> Result<(), RewardsError> {
        self.validate(&program)?;
        self.records.insert(
            program.pool_token.clone(),
            ProgramRecord {
                program,
                removed_at: None,
            },
        );
        Ok(())
    }

    /// Mark the pool's program removed as of `now`.
    pub fn remove(&mut self, pool_token: &Address, now: Timestamp) -> Result<(), RewardsError> {
        match self.records.get_mut(pool_token) {
            Some(record) if record.removed_at.is_none() => {
                record.removed_at = Some(now);
                Ok(())
            }
            _ => Err(RewardsError::ProgramNotFound(pool_token.clone())),
        }
    }

    pub fn is_participating(&self, pool_token: &Address) -> bool {
        self.records
            .get(pool_token)
            .is_some_and(|r| r.removed_at.is_none())
    }

    /// The active program for a pool.
    pub fn program(&self, pool_token: &Address) -> Option<&PoolProgram> {
        self.records
            .get(pool_token)
            .filter(|r| r.removed_at.is_none())
            .map(|r| &r.program)
    }

    /// The program record for a pool, removed or not.
    pub fn record(&self, pool_token: &Address) -> Option<&ProgramRecord> {
        self.records.get(pool_token)
    }

    /// When and at what rate `(pool, reserve)` accrues, if ever.
    pub fn accrual_window(&self, pool_token: &Address, reserve_token: &Address) -> Option<AccrualWindow> {
        let record = self.records.get(pool_token)?;
        let rate = record.program.reserve_rate(reserve_token)?;
        Some(AccrualWindow {
            start: record.program.start_time,
            end: record.accrual_end(),
            rate,
        })
    }

    /// End time used by the multiplier for the pool.
    pub fn accrual_end(&self, pool_token: &Address) -> Option<Timestamp> {
        self.records.get(pool_token).map(ProgramRecord::accrual_end)
    }

    pub fn records(&self) -> impl Iterator<Item = &ProgramRecord> {
        self.records.values()
    }

    pub fn active_programs(&self) -> impl Iterator<Item = &PoolProgram> {
        self.records
            .values()
            .filter(|r| r.removed_at.is_none())
            .map(|r| &r.program)
    }
}
