//! Opening the rewards store: connection pragmas and `schema.sql`.

use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::{debug, info};

/// Open (creating if needed) the rewards store and apply the schema.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(dir) = Path::new(db_path).parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).ok();
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _meta| Box::pin(async move { apply_pragmas(conn).await }))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await?;

    apply_schema(&pool).await?;
    info!(path = %db_path, "Rewards database ready");
    Ok(pool)
}

/// Every statement in `schema.sql` is `IF NOT EXISTS`, so reapplying is a no-op.
async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = include_str!("schema.sql")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let mut applied = 0usize;
    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
        applied += 1;
    }
    debug!(statements = applied, "Schema applied");
    Ok(())
}

/// Snapshot writes and event inserts share one file; WAL lets readers
/// proceed while a commit is in flight.
async fn apply_pragmas(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    for pragma in [
        "PRAGMA journal_mode = WAL",
        "PRAGMA busy_timeout = 5000",
        "PRAGMA synchronous = NORMAL",
    ] {
        sqlx::query(pragma).execute(&mut *conn).await?;
    }
    Ok(())
}
