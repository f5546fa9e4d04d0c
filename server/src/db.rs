use std::time::Duration;

use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{Sqlite, SqlitePool, SqlitePoolOptions},
    Pool,
};

pub type DbPool = Pool<Sqlite>;

pub async fn ensure_database_file(url: &str) -> Result<(), sqlx::Error> {
    let exists = Sqlite::database_exists(url).await?;

    if !exists {
        Sqlite::create_database(url).await?;
    }

    Ok(())
}

pub async fn init_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let pool = if database_url.contains(":memory:") {
        // every connection to an in-memory database sees its own database,
        // so pin a single connection for the lifetime of the pool
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect(database_url)
            .await?
    } else {
        ensure_database_file(database_url).await?;
        SqlitePool::connect(database_url).await?
    };

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            key TEXT PRIMARY KEY,
            parent TEXT NOT NULL,
            value TEXT NOT NULL DEFAULT '',
            dir INTEGER NOT NULL DEFAULT 0,
            modified INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            ordinal INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL,
            value TEXT NOT NULL DEFAULT '',
            dir INTEGER NOT NULL DEFAULT 0,
            timestamp INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    Ok(pool)
}
