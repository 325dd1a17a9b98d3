//! Batch seeding of historical epoch rewards from CSV.

use crate::domain::{parse_amount, Address};
use crate::engine::SeedEntry;
use crate::orchestration::service::{RewardsService, ServiceError};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Where seeded chunks go and where progress is remembered.
#[async_trait]
pub trait SeedTarget: Send + Sync {
    async fn submit(&self, caller: &Address, epoch: u64, entries: &[SeedEntry]) -> Result<(), ServiceError>;

    /// Index of the last chunk committed for `job`.
    async fn cursor(&self, job: &str) -> Result<Option<u64>, ServiceError>;

    async fn advance(&self, job: &str, chunk: u64) -> Result<(), ServiceError>;
}

#[async_trait]
impl SeedTarget for RewardsService {
    async fn submit(&self, caller: &Address, epoch: u64, entries: &[SeedEntry]) -> Result<(), ServiceError> {
        self.set_rewards(caller, epoch, entries).await
    }

    async fn cursor(&self, job: &str) -> Result<Option<u64>, ServiceError> {
        Ok(self.repo().get_seed_cursor(job).await?)
    }

    async fn advance(&self, job: &str, chunk: u64) -> Result<(), ServiceError> {
        Ok(self.repo().set_seed_cursor(job, chunk, self.now()).await?)
    }
}

/// One parsed CSV row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedRow {
    pub epoch: u64,
    pub entry: SeedEntry,
}

/// Entries of one epoch submitted together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedChunk {
    pub index: u64,
    pub epoch: u64,
    pub entries: Vec<SeedEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub chunks_total: usize,
    pub chunks_skipped: usize,
    pub chunks_submitted: usize,
    pub entries_submitted: usize,
}

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("csv parse error: {0}")]
    Csv(String),
    #[error("chunk {chunk} (epoch {epoch}) failed: {source}")]
    Chunk {
        chunk: u64,
        epoch: u64,
        #[source]
        source: ServiceError,
    },
    #[error(transparent)]
    Cursor(#[from] ServiceError),
}

/// Parse `epoch,provider,pool,reserve,amount` rows, with a header line.
pub fn parse_seed_csv(csv_bytes: &[u8]) -> Result<Vec<SeedRow>, SeedError> {
    #[derive(Debug, serde::Deserialize)]
    struct Row {
        epoch: u64,
        provider: String,
        pool: String,
        reserve: String,
        amount: String,
    }

    fn address(field: &str, value: &str) -> Result<Address, SeedError> {
        value
            .parse()
            .map_err(|e| SeedError::Csv(format!("invalid {} {:?}: {}", field, value, e)))
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(csv_bytes);

    let mut rows = Vec::new();
    for record in reader.deserialize::<Row>() {
        let row = record.map_err(|e| SeedError::Csv(e.to_string()))?;
        let amount = parse_amount(&row.amount)
            .map_err(|e| SeedError::Csv(format!("invalid amount {:?}: {}", row.amount, e)))?;
        rows.push(SeedRow {
            epoch: row.epoch,
            entry: SeedEntry {
                provider: address("provider", &row.provider)?,
                pool_token: address("pool", &row.pool)?,
                reserve_token: address("reserve", &row.reserve)?,
                amount,
            },
        });
    }
    Ok(rows)
}

/// Split rows into per-epoch chunks of at most `batch_size` entries.
///
/// Epochs are visited in ascending order and rows keep their file order
/// within an epoch, so the same file always yields the same chunk indices.
pub fn plan_chunks(rows: Vec<SeedRow>, batch_size: usize) -> Vec<SeedChunk> {
    let batch_size = batch_size.max(1);
    let mut by_epoch: BTreeMap<u64, Vec<SeedEntry>> = BTreeMap::new();
    for row in rows {
        by_epoch.entry(row.epoch).or_default().push(row.entry);
    }

    let mut chunks = Vec::new();
    for (epoch, entries) in by_epoch {
        for batch in entries.chunks(batch_size) {
            chunks.push(SeedChunk {
                index: chunks.len() as u64,
                epoch,
                entries: batch.to_vec(),
            });
        }
    }
    chunks
}

/// Resumable seeding job.
pub struct Seeder<'a, T: SeedTarget + ?Sized> {
    target: &'a T,
    job: String,
    caller: Address,
    batch_size: usize,
    backoff: ExponentialBackoff,
}

impl<'a, T: SeedTarget + ?Sized> Seeder<'a, T> {
    pub fn new(target: &'a T, job: impl Into<String>, caller: Address, batch_size: usize, max_elapsed: Duration) -> Self {
        Self {
            target,
            job: job.into(),
            caller,
            batch_size,
            backoff: ExponentialBackoff {
                max_elapsed_time: Some(max_elapsed),
                ..Default::default()
            },
        }
    }

    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Submit every chunk after the job's cursor, advancing the cursor as
    /// each chunk commits.
    ///
    /// # Errors
    /// Stops at the first chunk that fails permanently, or transiently for
    /// longer than the backoff allows. Earlier chunks stay committed and a
    /// rerun picks up at the failed chunk.
    pub async fn run(&self, rows: Vec<SeedRow>) -> Result<SeedReport, SeedError> {
        let chunks = plan_chunks(rows, self.batch_size);
        let cursor = self.target.cursor(&self.job).await?;
        let mut report = SeedReport {
            chunks_total: chunks.len(),
            ..SeedReport::default()
        };

        for chunk in &chunks {
            if cursor.is_some_and(|done| chunk.index <= done) {
                report.chunks_skipped += 1;
                continue;
            }
            self.submit_with_retry(chunk).await?;
            self.target.advance(&self.job, chunk.index).await?;
            report.chunks_submitted += 1;
            report.entries_submitted += chunk.entries.len();
            info!(
                job = %self.job,
                chunk = chunk.index,
                epoch = chunk.epoch,
                entries = chunk.entries.len(),
                "Seed chunk committed"
            );
        }

        info!(
            job = %self.job,
            submitted = report.chunks_submitted,
            skipped = report.chunks_skipped,
            "Seeding finished"
        );
        Ok(report)
    }

    async fn submit_with_retry(&self, chunk: &SeedChunk) -> Result<(), SeedError> {
        retry(self.backoff.clone(), || async {
            self.target
                .submit(&self.caller, chunk.epoch, &chunk.entries)
                .await
                .map_err(|e| {
                    if e.is_transient() {
                        warn!(job = %self.job, chunk = chunk.index, error = %e, "Seed chunk failed, retrying");
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
        })
        .await
        .map_err(|source| SeedError::Chunk {
            chunk: chunk.index,
            epoch: chunk.epoch,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &[u8] = b"epoch,provider,pool,reserve,amount
2,0x00000000000000000000000000000000000000a1,0x0000000000000000000000000000000000000010,0x0000000000000000000000000000000000000020,5
1,0x00000000000000000000000000000000000000a1,0x0000000000000000000000000000000000000010,0x0000000000000000000000000000000000000020,7
1,0x00000000000000000000000000000000000000a2,0x0000000000000000000000000000000000000010,0x0000000000000000000000000000000000000020,340282366920938463463374607431768211455
";

    #[test]
    fn test_parse_seed_csv() {
        let rows = parse_seed_csv(CSV).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].epoch, 2);
        assert_eq!(rows[2].entry.amount, u128::MAX);
        assert_eq!(
            rows[1].entry.provider.as_str(),
            "0x00000000000000000000000000000000000000a1"
        );
    }

    #[test]
    fn test_parse_seed_csv_rejects_bad_rows() {
        let bad_address = b"epoch,provider,pool,reserve,amount\n1,abc,0x0000000000000000000000000000000000000010,0x0000000000000000000000000000000000000020,5\n";
        assert!(matches!(parse_seed_csv(bad_address), Err(SeedError::Csv(_))));

        let bad_amount = b"epoch,provider,pool,reserve,amount\n1,0x00000000000000000000000000000000000000a1,0x0000000000000000000000000000000000000010,0x0000000000000000000000000000000000000020,-5\n";
        assert!(matches!(parse_seed_csv(bad_amount), Err(SeedError::Csv(_))));
    }

    #[test]
    fn test_plan_chunks_orders_epochs_and_splits_batches() {
        let rows = parse_seed_csv(CSV).unwrap();
        let chunks = plan_chunks(rows, 1);
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks.iter().map(|c| (c.index, c.epoch)).collect::<Vec<_>>(),
            vec![(0, 1), (1, 1), (2, 2)]
        );
        assert_eq!(chunks[0].entries[0].amount, 7);

        let rows = parse_seed_csv(CSV).unwrap();
        let chunks = plan_chunks(rows, 0);
        assert_eq!(chunks.len(), 3);

        let rows = parse_seed_csv(CSV).unwrap();
        let chunks = plan_chunks(rows, 100);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].entries.len(), 2);
    }
}
