//! Repository layer for database operations.
//!
//! Methods are organized across submodules:
//! - `events.rs` - reward events and mint requests
//! - `seeds.rs` - seeding job cursors

mod events;
mod seeds;

use crate::domain::{EventRecord, Timestamp};
use crate::external::MintRequest;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

pub use events::StoredMintRequest;

/// Serialized service state as stored in `engine_snapshots`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSnapshot {
    pub taken_at: Timestamp,
    pub last_event_seq: u64,
    /// JSON document.
    pub state: String,
}

/// Repository for database operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap round trip used by readiness checks.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Persist the outcome of one engine operation in a single transaction:
    /// its events (idempotent on `event_key`), its mint requests and the
    /// resulting state snapshot.
    ///
    /// Returns the number of newly inserted events.
    ///
    /// # Errors
    /// Returns an error if the transaction fails; nothing is written then.
    pub async fn record_commit(
        &self,
        records: &[EventRecord],
        mints: &[MintRequest],
        snapshot: &StoredSnapshot,
    ) -> Result<usize, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let mut inserted = 0usize;
        for record in records {
            if events::insert_event(&mut *tx, record).await? {
                inserted += 1;
            }
        }
        for mint in mints {
            events::insert_mint_request(&mut *tx, mint, snapshot.taken_at).await?;
        }

        sqlx::query(
            r#"
            INSERT INTO engine_snapshots (id, taken_at, last_event_seq, state)
            VALUES (1, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                taken_at = excluded.taken_at,
                last_event_seq = excluded.last_event_seq,
                state = excluded.state
            "#,
        )
        .bind(snapshot.taken_at.as_secs() as i64)
        .bind(snapshot.last_event_seq as i64)
        .bind(snapshot.state.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    /// The most recent state snapshot, if any operation was ever recorded.
    pub async fn latest_snapshot(&self) -> Result<Option<StoredSnapshot>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT taken_at, last_event_seq, state FROM engine_snapshots WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| StoredSnapshot {
            taken_at: Timestamp::new(r.get::<i64, _>("taken_at").max(0) as u64),
            last_event_seq: r.get::<i64, _>("last_event_seq").max(0) as u64,
            state: r.get("state"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::domain::{Address, RewardEvent};
    use crate::external::MintKind;
    use tempfile::TempDir;

    async fn repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db").to_string_lossy().to_string();
        let pool = init_db(&path).await.unwrap();
        (dir, Repository::new(pool))
    }

    fn claimed(seq: u64, amount: u128) -> EventRecord {
        EventRecord::new(
            seq,
            Timestamp::new(100 + seq),
            RewardEvent::RewardsClaimed {
                provider: Address::new("0xp".to_string()),
                pool_token: Address::new("0xpool".to_string()),
                reserve_token: Address::new("0xr".to_string()),
                amount,
            },
        )
    }

    fn snapshot(seq: u64, state: &str) -> StoredSnapshot {
        StoredSnapshot {
            taken_at: Timestamp::new(500),
            last_event_seq: seq,
            state: state.to_string(),
        }
    }

    #[tokio::test]
    async fn test_record_commit_is_idempotent_on_event_key() {
        let (_dir, repo) = repo().await;
        let events = vec![claimed(1, 10), claimed(2, 20)];
        let mints = vec![MintRequest {
            kind: MintKind::Mint,
            account: Address::new("0xp".to_string()),
            amount: 30,
        }];

        assert_eq!(repo.record_commit(&events, &mints, &snapshot(2, "{}")).await.unwrap(), 2);
        assert_eq!(repo.record_commit(&events, &[], &snapshot(2, "{}")).await.unwrap(), 0);

        let stored = repo.query_events(None, 0, 100).await.unwrap();
        assert_eq!(stored, events);
    }

    #[tokio::test]
    async fn test_snapshot_upserts_single_row() {
        let (_dir, repo) = repo().await;
        assert_eq!(repo.latest_snapshot().await.unwrap(), None);

        repo.record_commit(&[], &[], &snapshot(1, "{\"a\":1}")).await.unwrap();
        repo.record_commit(&[], &[], &snapshot(5, "{\"a\":2}")).await.unwrap();

        let latest = repo.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.last_event_seq, 5);
        assert_eq!(latest.state, "{\"a\":2}");

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM engine_snapshots")
            .fetch_one(repo.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn test_ping() {
        let (_dir, repo) = repo().await;
        repo.ping().await.unwrap();
    }
}
