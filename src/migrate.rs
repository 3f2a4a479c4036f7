//! Idempotent schema creation.
//!
//! Every statement is `IF NOT EXISTS`, so `ldg init` can be re-run against
//! an existing corpus.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS emails (
            id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL UNIQUE,
            subject TEXT NOT NULL DEFAULT '',
            sender TEXT NOT NULL DEFAULT '',
            date TEXT NOT NULL DEFAULT '',
            in_reply_to TEXT NOT NULL DEFAULT '',
            references_json TEXT NOT NULL DEFAULT '[]',
            body TEXT NOT NULL DEFAULT '',
            raw_excerpt TEXT NOT NULL DEFAULT '',
            ingested_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS threads (
            id TEXT PRIMARY KEY,
            root_message_id TEXT NOT NULL UNIQUE,
            subject TEXT NOT NULL DEFAULT '',
            participant_count INTEGER NOT NULL DEFAULT 0,
            email_count INTEGER NOT NULL DEFAULT 0,
            first_post TEXT,
            last_post TEXT,
            tags_json TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS thread_emails (
            thread_id TEXT NOT NULL,
            email_id TEXT NOT NULL,
            PRIMARY KEY (thread_id, email_id),
            FOREIGN KEY (thread_id) REFERENCES threads(id),
            FOREIGN KEY (email_id) REFERENCES emails(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only; regeneration adds a row.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS summaries (
            id TEXT PRIMARY KEY,
            target_id TEXT NOT NULL,
            summary_type TEXT NOT NULL,
            tldr TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            model TEXT NOT NULL,
            generated_at TEXT NOT NULL,
            cache_key TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            cache_key TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            stored_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_emails_date ON emails(date)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_threads_last_post ON threads(last_post DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_threads_first_post ON threads(first_post)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_thread_emails_email ON thread_emails(email_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_summaries_target ON summaries(target_id, summary_type, generated_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
