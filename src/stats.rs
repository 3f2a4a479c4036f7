//! Corpus statistics.
//!
//! A quick overview of what has been ingested and summarized: email and
//! thread counts, summary coverage by type, cache size, and the most
//! recently ingested archive. Used by `ldg stats` to confirm that ingest
//! and summarization runs are doing what they should.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// Counts gathered by [`collect_stats`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct CorpusStats {
    pub emails: i64,
    pub threads: i64,
    /// Threads with more than one member.
    pub multi_email_threads: i64,
    pub cache_entries: i64,
    pub summaries: Vec<SummaryCount>,
    pub first_post: Option<String>,
    pub last_post: Option<String>,
    pub last_ingest_ts: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryCount {
    pub summary_type: String,
    pub rows: i64,
    pub targets: i64,
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<CorpusStats> {
    let emails: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM emails")
        .fetch_one(pool)
        .await?;
    let threads: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM threads")
        .fetch_one(pool)
        .await?;
    let multi_email_threads: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM threads WHERE email_count > 1")
            .fetch_one(pool)
            .await?;
    let cache_entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries")
        .fetch_one(pool)
        .await?;

    let span = sqlx::query(
        "SELECT MIN(first_post) AS first_post, MAX(last_post) AS last_post FROM threads",
    )
    .fetch_one(pool)
    .await?;
    let last_ingest_ts: Option<i64> = sqlx::query_scalar("SELECT MAX(ingested_at) FROM emails")
        .fetch_one(pool)
        .await?;

    let summary_rows = sqlx::query(
        r#"
        SELECT summary_type, COUNT(*) AS row_count, COUNT(DISTINCT target_id) AS target_count
        FROM summaries
        GROUP BY summary_type
        ORDER BY summary_type
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(CorpusStats {
        emails,
        threads,
        multi_email_threads,
        cache_entries,
        summaries: summary_rows
            .iter()
            .map(|row| SummaryCount {
                summary_type: row.get("summary_type"),
                rows: row.get("row_count"),
                targets: row.get("target_count"),
            })
            .collect(),
        first_post: span.get("first_post"),
        last_post: span.get("last_post"),
        last_ingest_ts,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("List Digest: Corpus Stats");
    println!("=========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Emails:      {}", stats.emails);
    println!(
        "  Threads:     {} ({} with replies)",
        stats.threads, stats.multi_email_threads
    );
    if let (Some(first), Some(last)) = (&stats.first_post, &stats.last_post) {
        println!("  Span:        {} .. {}", first, last);
    }
    println!(
        "  Last ingest: {}",
        stats
            .last_ingest_ts
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!("  Cache rows:  {}", stats.cache_entries);

    if !stats.summaries.is_empty() {
        println!();
        println!("  Summaries:");
        println!("  {:<10} {:>8} {:>8}", "TYPE", "ROWS", "TARGETS");
        println!("  {}", "-".repeat(28));
        for s in &stats.summaries {
            println!("  {:<10} {:>8} {:>8}", s.summary_type, s.rows, s.targets);
        }
        let summarized = stats
            .summaries
            .iter()
            .find(|s| s.summary_type == "thread")
            .map(|s| s.targets)
            .unwrap_or(0);
        println!();
        println!(
            "  Thread coverage: {} / {} ({}%)",
            summarized,
            stats.threads,
            if stats.threads > 0 {
                (summarized * 100) / stats.threads
            } else {
                0
            }
        );
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
