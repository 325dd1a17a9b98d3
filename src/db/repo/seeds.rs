//! Seeding job cursors for the repository.

use crate::domain::Timestamp;
use sqlx::Row;

use super::Repository;

impl Repository {
    /// Index of the last chunk the job committed, if it ever committed one.
    pub async fn get_seed_cursor(&self, job: &str) -> Result<Option<u64>, sqlx::Error> {
        let row = sqlx::query("SELECT last_chunk FROM seed_cursors WHERE job = ?")
            .bind(job)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("last_chunk").max(0) as u64))
    }

    /// Record `chunk` as committed. The cursor never moves backwards.
    pub async fn set_seed_cursor(&self, job: &str, chunk: u64, at: Timestamp) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO seed_cursors (job, last_chunk, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(job) DO UPDATE SET
                last_chunk = MAX(last_chunk, excluded.last_chunk),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(job)
        .bind(chunk as i64)
        .bind(at.as_secs() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_seed_cursor_roundtrip_and_monotonic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db").to_string_lossy().to_string();
        let repo = Repository::new(init_db(&path).await.unwrap());

        assert_eq!(repo.get_seed_cursor("job").await.unwrap(), None);
        repo.set_seed_cursor("job", 0, Timestamp::new(1)).await.unwrap();
        assert_eq!(repo.get_seed_cursor("job").await.unwrap(), Some(0));
        repo.set_seed_cursor("job", 3, Timestamp::new(2)).await.unwrap();
        repo.set_seed_cursor("job", 1, Timestamp::new(3)).await.unwrap();
        assert_eq!(repo.get_seed_cursor("job").await.unwrap(), Some(3));
        assert_eq!(repo.get_seed_cursor("other").await.unwrap(), None);
    }
}
