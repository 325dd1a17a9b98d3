//! Reward event and mint request operations for the repository.

use crate::domain::{parse_amount, Address, EventRecord, RewardEvent, Timestamp};
use crate::external::{MintKind, MintRequest};
use serde::Serialize;
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;
use tracing::warn;

use super::Repository;

/// A persisted mint or burn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredMintRequest {
    pub id: i64,
    #[serde(flatten)]
    pub request: MintRequest,
    pub requested_at: Timestamp,
}

/// Insert an event unless its key is already stored.
pub(super) async fn insert_event(
    conn: &mut SqliteConnection,
    record: &EventRecord,
) -> Result<bool, sqlx::Error> {
    let payload = serde_json::to_string(&record.event)
        .map_err(|e| sqlx::Error::Protocol(format!("event payload: {}", e)))?;
    let result = sqlx::query(
        r#"
        INSERT INTO reward_events (event_key, seq, time_s, kind, provider, pool_token, payload)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(event_key) DO NOTHING
        "#,
    )
    .bind(record.event_key.as_str())
    .bind(record.seq as i64)
    .bind(record.time.as_secs() as i64)
    .bind(record.event.kind())
    .bind(record.event.provider().map(Address::as_str))
    .bind(record.event.pool_token().map(Address::as_str))
    .bind(payload)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(super) async fn insert_mint_request(
    conn: &mut SqliteConnection,
    request: &MintRequest,
    requested_at: Timestamp,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO mint_requests (kind, account, amount, requested_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(request.kind.as_str())
    .bind(request.account.as_str())
    .bind(request.amount.to_string())
    .bind(requested_at.as_secs() as i64)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

impl Repository {
    /// Query events after `after_seq`, optionally for one provider, in
    /// sequence order.
    ///
    /// # Errors
    /// Returns an error if the query fails. Rows whose payload no longer
    /// decodes are skipped with a warning.
    pub async fn query_events(
        &self,
        provider: Option<&Address>,
        after_seq: u64,
        limit: u32,
    ) -> Result<Vec<EventRecord>, sqlx::Error> {
        let rows = match provider {
            Some(provider) => {
                sqlx::query(
                    r#"
                    SELECT event_key, seq, time_s, payload
                    FROM reward_events
                    WHERE provider = ? AND seq > ?
                    ORDER BY seq ASC
                    LIMIT ?
                    "#,
                )
                .bind(provider.as_str())
                .bind(after_seq as i64)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT event_key, seq, time_s, payload
                    FROM reward_events
                    WHERE seq > ?
                    ORDER BY seq ASC
                    LIMIT ?
                    "#,
                )
                .bind(after_seq as i64)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .iter()
            .filter_map(|row| {
                let event_key: String = row.get("event_key");
                let payload: String = row.get("payload");
                let event: RewardEvent = match serde_json::from_str(&payload) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(event_key = %event_key, error = %e, "Failed to decode event payload, skipping");
                        return None;
                    }
                };
                Some(EventRecord {
                    seq: row.get::<i64, _>("seq").max(0) as u64,
                    time: Timestamp::new(row.get::<i64, _>("time_s").max(0) as u64),
                    event_key,
                    event,
                })
            })
            .collect())
    }

    /// Mint and burn requests, optionally for one account, oldest first.
    pub async fn query_mint_requests(
        &self,
        account: Option<&Address>,
    ) -> Result<Vec<StoredMintRequest>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, account, amount, requested_at
            FROM mint_requests
            WHERE (? IS NULL OR account = ?)
            ORDER BY id ASC
            "#,
        )
        .bind(account.map(Address::as_str))
        .bind(account.map(Address::as_str))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let id: i64 = row.get("id");
                let kind: String = row.get("kind");
                let amount_str: String = row.get("amount");
                let amount = match parse_amount(&amount_str) {
                    Ok(amount) => amount,
                    Err(e) => {
                        warn!(id, amount = %amount_str, error = %e, "Failed to parse mint amount, skipping");
                        return None;
                    }
                };
                let kind = if kind == "burn" { MintKind::Burn } else { MintKind::Mint };
                Some(StoredMintRequest {
                    id,
                    request: MintRequest {
                        kind,
                        account: Address::new(row.get("account")),
                        amount,
                    },
                    requested_at: Timestamp::new(row.get::<i64, _>("requested_at").max(0) as u64),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_db, StoredSnapshot};
    use tempfile::TempDir;

    fn addr(s: &str) -> Address {
        Address::new(s.to_string())
    }

    #[tokio::test]
    async fn test_query_events_filters_by_provider_and_seq() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db").to_string_lossy().to_string();
        let repo = Repository::new(init_db(&path).await.unwrap());

        let events = vec![
            EventRecord::new(
                1,
                Timestamp::new(10),
                RewardEvent::ProgramRemoved {
                    pool_token: addr("0xpool"),
                },
            ),
            EventRecord::new(
                2,
                Timestamp::new(11),
                RewardEvent::RewardsClaimed {
                    provider: addr("0xa"),
                    pool_token: addr("0xpool"),
                    reserve_token: addr("0xr"),
                    amount: 5,
                },
            ),
            EventRecord::new(
                3,
                Timestamp::new(12),
                RewardEvent::RewardsClaimed {
                    provider: addr("0xb"),
                    pool_token: addr("0xpool"),
                    reserve_token: addr("0xr"),
                    amount: 6,
                },
            ),
        ];
        let mints = vec![
            MintRequest {
                kind: MintKind::Mint,
                account: addr("0xa"),
                amount: u128::MAX,
            },
            MintRequest {
                kind: MintKind::Burn,
                account: addr("0xb"),
                amount: 1,
            },
        ];
        let snapshot = StoredSnapshot {
            taken_at: Timestamp::new(12),
            last_event_seq: 3,
            state: "{}".to_string(),
        };
        repo.record_commit(&events, &mints, &snapshot).await.unwrap();

        let for_b = repo.query_events(Some(&addr("0xb")), 0, 10).await.unwrap();
        assert_eq!(for_b, vec![events[2].clone()]);

        let after_one = repo.query_events(None, 1, 10).await.unwrap();
        assert_eq!(after_one.len(), 2);
        assert_eq!(after_one[0].seq, 2);

        let limited = repo.query_events(None, 0, 1).await.unwrap();
        assert_eq!(limited.len(), 1);

        let all_mints = repo.query_mint_requests(None).await.unwrap();
        assert_eq!(all_mints.len(), 2);
        assert_eq!(all_mints[0].request.amount, u128::MAX);

        let a_mints = repo.query_mint_requests(Some(&addr("0xa"))).await.unwrap();
        assert_eq!(a_mints.len(), 1);
        assert_eq!(a_mints[0].requested_at, Timestamp::new(12));
    }
}
