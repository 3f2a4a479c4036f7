//! Read helpers over the persisted corpus, plus summary persistence.
//!
//! These are the pass-through queries the rest of the crate and any read
//! API build on: by id, by thread, by time window.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{Email, Summary, SummaryFields, SummaryType, ThreadRecord};

const EMAIL_COLUMNS: &str =
    "e.message_id, e.subject, e.sender, e.date, e.in_reply_to, e.references_json, e.body, e.raw_excerpt";
const THREAD_COLUMNS: &str = "id, root_message_id, subject, participant_count, email_count, first_post, last_post, tags_json";

fn email_from_row(row: &SqliteRow) -> Email {
    let references_json: String = row.get("references_json");
    Email {
        message_id: row.get("message_id"),
        subject: row.get("subject"),
        sender: row.get("sender"),
        date: row.get("date"),
        in_reply_to: row.get("in_reply_to"),
        references: serde_json::from_str(&references_json).unwrap_or_default(),
        body: row.get("body"),
        raw_excerpt: row.get("raw_excerpt"),
    }
}

fn thread_from_row(row: &SqliteRow) -> ThreadRecord {
    let tags_json: String = row.get("tags_json");
    ThreadRecord {
        id: row.get("id"),
        root_message_id: row.get("root_message_id"),
        subject: row.get("subject"),
        participant_count: row.get("participant_count"),
        email_count: row.get("email_count"),
        first_post: row.get("first_post"),
        last_post: row.get("last_post"),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
    }
}

fn summary_from_row(row: &SqliteRow) -> Result<Summary> {
    let summary_type: String = row.get("summary_type");
    let payload_json: String = row.get("payload_json");
    let summary_type = SummaryType::parse(&summary_type)
        .ok_or_else(|| anyhow::anyhow!("unknown summary type in database: {}", summary_type))?;
    let fields: SummaryFields = serde_json::from_str(&payload_json).unwrap_or_default();

    Ok(Summary {
        target: row.get("target_id"),
        summary_type,
        tldr: row.get("tldr"),
        fields,
        model: row.get("model"),
        generated_at: row.get("generated_at"),
        cache_key: row.get("cache_key"),
        error: None,
    })
}

pub async fn get_email(pool: &SqlitePool, message_id: &str) -> Result<Option<Email>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM emails e WHERE e.message_id = ?",
        EMAIL_COLUMNS
    ))
    .bind(message_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(email_from_row))
}

pub async fn get_thread(pool: &SqlitePool, thread_id: &str) -> Result<Option<ThreadRecord>> {
    let row = sqlx::query(&format!("SELECT {} FROM threads WHERE id = ?", THREAD_COLUMNS))
        .bind(thread_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.as_ref().map(thread_from_row))
}

pub async fn get_thread_by_root(
    pool: &SqlitePool,
    root_message_id: &str,
) -> Result<Option<ThreadRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM threads WHERE root_message_id = ?",
        THREAD_COLUMNS
    ))
    .bind(root_message_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(thread_from_row))
}

/// Thread an email belongs to, if it has been linked.
pub async fn thread_for_email(pool: &SqlitePool, message_id: &str) -> Result<Option<ThreadRecord>> {
    let row = sqlx::query(
        r#"
        SELECT t.id, t.root_message_id, t.subject, t.participant_count, t.email_count,
               t.first_post, t.last_post, t.tags_json
        FROM threads t
        JOIN thread_emails te ON te.thread_id = t.id
        JOIN emails e ON e.id = te.email_id
        WHERE e.message_id = ?
        LIMIT 1
        "#,
    )
    .bind(message_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(thread_from_row))
}

/// Members of a thread in chronological order.
pub async fn thread_members(pool: &SqlitePool, thread_id: &str) -> Result<Vec<Email>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {}
        FROM emails e
        JOIN thread_emails te ON te.email_id = e.id
        WHERE te.thread_id = ?
        ORDER BY e.date ASC, e.message_id ASC
        "#,
        EMAIL_COLUMNS
    ))
    .bind(thread_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(email_from_row).collect())
}

/// Threads whose first post lies in `[start, end)`, oldest first.
pub async fn threads_in_window(
    pool: &SqlitePool,
    start: &str,
    end: &str,
) -> Result<Vec<ThreadRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM threads WHERE first_post >= ? AND first_post < ? ORDER BY first_post ASC, id ASC",
        THREAD_COLUMNS
    ))
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(thread_from_row).collect())
}

/// Threads with at least `min_emails` members and no thread summary yet,
/// most recently active first.
pub async fn threads_without_summary(
    pool: &SqlitePool,
    min_emails: i64,
    limit: i64,
) -> Result<Vec<ThreadRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT t.id, t.root_message_id, t.subject, t.participant_count, t.email_count,
               t.first_post, t.last_post, t.tags_json
        FROM threads t
        WHERE t.email_count >= ?
          AND NOT EXISTS (
              SELECT 1 FROM summaries s
              WHERE s.target_id = t.id AND s.summary_type = 'thread'
          )
        ORDER BY t.last_post DESC, t.id ASC
        LIMIT ?
        "#,
    )
    .bind(min_emails)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(thread_from_row).collect())
}

pub async fn latest_summary(
    pool: &SqlitePool,
    target_id: &str,
    summary_type: SummaryType,
) -> Result<Option<Summary>> {
    let row = sqlx::query(
        r#"
        SELECT target_id, summary_type, tldr, payload_json, model, generated_at, cache_key
        FROM summaries
        WHERE target_id = ? AND summary_type = ?
        ORDER BY generated_at DESC, rowid DESC
        LIMIT 1
        "#,
    )
    .bind(target_id)
    .bind(summary_type.as_str())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(summary_from_row).transpose()
}

/// Every stored summary for a target, newest first.
pub async fn summary_history(
    pool: &SqlitePool,
    target_id: &str,
    summary_type: SummaryType,
) -> Result<Vec<Summary>> {
    let rows = sqlx::query(
        r#"
        SELECT target_id, summary_type, tldr, payload_json, model, generated_at, cache_key
        FROM summaries
        WHERE target_id = ? AND summary_type = ?
        ORDER BY generated_at DESC, rowid DESC
        "#,
    )
    .bind(target_id)
    .bind(summary_type.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(summary_from_row).collect()
}

/// Append a summary row. Rows are never updated.
pub async fn insert_summary(pool: &SqlitePool, summary: &Summary) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let payload_json = serde_json::to_string(&summary.fields)?;

    sqlx::query(
        r#"
        INSERT INTO summaries (id, target_id, summary_type, tldr, payload_json, model, generated_at, cache_key)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&summary.target)
    .bind(summary.summary_type.as_str())
    .bind(&summary.tldr)
    .bind(&payload_json)
    .bind(&summary.model)
    .bind(&summary.generated_at)
    .bind(&summary.cache_key)
    .execute(pool)
    .await?;

    Ok(id)
}
