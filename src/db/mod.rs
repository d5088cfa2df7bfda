use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::{path::Path, str::FromStr, time::Duration};

const MEMORY_DATABASE: &str = ":memory:";

pub async fn create_pool(database_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if database_path == MEMORY_DATABASE {
        return memory_pool().await;
    }

    if let Some(parent) = Path::new(database_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(database_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    SqlitePoolOptions::new()
        .max_connections(8)
        .acquire_timeout(Duration::from_secs(3))
        .connect_with(options)
        .await
}

/// Opens the database read only. Used for ad-hoc SQL reports so a typed-in
/// query can never modify data.
pub async fn create_read_only_pool(
    database_path: &str,
    pool: &SqlitePool,
) -> Result<SqlitePool, sqlx::Error> {
    // An in-memory database is private to its connection
    if database_path == MEMORY_DATABASE {
        return Ok(pool.clone());
    }

    let options = SqliteConnectOptions::new()
        .filename(database_path)
        .read_only(true);

    SqlitePoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(3))
        .connect_with(options)
        .await
}

async fn memory_pool() -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = memory_pool().await.expect("in-memory pool");
    run_migrations(&pool).await.expect("migrations");
    pool
}
