//! Idempotent ingestion of normalized emails.
//!
//! Data flow for one archive:
//!
//! ```text
//! bytes ──▶ normalize ──▶ insert_email (each) ──▶ resolve_threads
//!                                               ──▶ insert_thread / link (per thread)
//!                                               ──▶ refresh aggregates from links
//! ```
//!
//! Every write is scoped to one record: an email insert is one statement, a
//! thread with its links runs in one transaction. A failing record is
//! recorded in the [`IngestManifest`] and the batch continues. Duplicate
//! identities are absorbed: the existing row's id is returned and nothing is
//! rewritten, so ingesting overlapping archives converges.
//!
//! After linking, `email_count`, `participant_count`, and the post bounds
//! are recomputed from `thread_emails`, which keeps `email_count` equal to
//! the number of links regardless of what earlier batches recorded.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::archive;
use crate::config::Config;
use crate::db;
use crate::error::PersistenceError;
use crate::models::{Email, IngestManifest, RecordFailure, ThreadMeta};
use crate::normalize::{self, ArchiveFormat, NormalizeOptions};
use crate::progress::{should_report, ProgressEvent, ProgressReporter};
use crate::thread::{get_thread_metadata, resolve_threads};

/// Insert an email unless its `message_id` is already stored.
///
/// Returns the row id and whether a row was created. A duplicate returns the
/// pre-existing id.
pub async fn insert_email(
    conn: &mut SqliteConnection,
    email: &Email,
) -> Result<(String, bool), PersistenceError> {
    if email.message_id.trim().is_empty() {
        return Err(PersistenceError::InvalidRecord(
            "email has an empty message_id".to_string(),
        ));
    }

    let id = Uuid::new_v4().to_string();
    let references_json = serde_json::to_string(&email.references)?;

    let result = sqlx::query(
        r#"
        INSERT INTO emails (id, message_id, subject, sender, date, in_reply_to, references_json, body, raw_excerpt, ingested_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(message_id) DO NOTHING
        "#,
    )
    .bind(&id)
    .bind(&email.message_id)
    .bind(&email.subject)
    .bind(&email.sender)
    .bind(&email.date)
    .bind(&email.in_reply_to)
    .bind(&references_json)
    .bind(&email.body)
    .bind(&email.raw_excerpt)
    .bind(Utc::now().timestamp())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 1 {
        return Ok((id, true));
    }

    let existing: String = sqlx::query_scalar("SELECT id FROM emails WHERE message_id = ?")
        .bind(&email.message_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok((existing, false))
}

/// Insert a thread or merge aggregates into the existing row for the same root.
///
/// Returns the row id and whether a row was created. On conflict the
/// subject and tags are filled only if still empty, `email_count` never
/// shrinks, and the post bounds widen.
pub async fn insert_thread(
    conn: &mut SqliteConnection,
    meta: &ThreadMeta,
) -> Result<(String, bool), PersistenceError> {
    if meta.root_message_id.trim().is_empty() {
        return Err(PersistenceError::InvalidRecord(
            "thread has an empty root_message_id".to_string(),
        ));
    }

    let existing_id: Option<String> =
        sqlx::query_scalar("SELECT id FROM threads WHERE root_message_id = ?")
            .bind(&meta.root_message_id)
            .fetch_optional(&mut *conn)
            .await?;
    let created = existing_id.is_none();
    let thread_id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let tags_json = serde_json::to_string(&meta.tags)?;
    let now = Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO threads (id, root_message_id, subject, participant_count, email_count, first_post, last_post, tags_json, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(root_message_id) DO UPDATE SET
            subject = CASE WHEN threads.subject = '' THEN excluded.subject ELSE threads.subject END,
            tags_json = CASE WHEN threads.tags_json = '[]' THEN excluded.tags_json ELSE threads.tags_json END,
            participant_count = MAX(threads.participant_count, excluded.participant_count),
            email_count = MAX(threads.email_count, excluded.email_count),
            first_post = CASE
                WHEN threads.first_post IS NULL THEN excluded.first_post
                WHEN excluded.first_post IS NULL THEN threads.first_post
                ELSE MIN(threads.first_post, excluded.first_post) END,
            last_post = CASE
                WHEN threads.last_post IS NULL THEN excluded.last_post
                WHEN excluded.last_post IS NULL THEN threads.last_post
                ELSE MAX(threads.last_post, excluded.last_post) END,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&thread_id)
    .bind(&meta.root_message_id)
    .bind(&meta.subject)
    .bind(meta.participant_count)
    .bind(meta.email_count)
    .bind(&meta.first_post)
    .bind(&meta.last_post)
    .bind(&tags_json)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok((thread_id, created))
}

/// Link an email to a thread. Returns false when the link already existed.
pub async fn link(
    conn: &mut SqliteConnection,
    thread_id: &str,
    email_id: &str,
) -> Result<bool, PersistenceError> {
    let result = sqlx::query(
        "INSERT INTO thread_emails (thread_id, email_id) VALUES (?, ?) ON CONFLICT(thread_id, email_id) DO NOTHING",
    )
    .bind(thread_id)
    .bind(email_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Recompute a thread's aggregates from its links.
pub async fn refresh_thread_aggregates(
    conn: &mut SqliteConnection,
    thread_id: &str,
) -> Result<(), PersistenceError> {
    sqlx::query(
        r#"
        UPDATE threads SET
            email_count = (SELECT COUNT(*) FROM thread_emails WHERE thread_id = ?),
            participant_count = (
                SELECT COUNT(DISTINCT e.sender) FROM thread_emails te
                JOIN emails e ON e.id = te.email_id
                WHERE te.thread_id = ? AND e.sender != ''
            ),
            first_post = (
                SELECT MIN(e.date) FROM thread_emails te
                JOIN emails e ON e.id = te.email_id
                WHERE te.thread_id = ? AND e.date != ''
            ),
            last_post = (
                SELECT MAX(e.date) FROM thread_emails te
                JOIN emails e ON e.id = te.email_id
                WHERE te.thread_id = ? AND e.date != ''
            ),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(thread_id)
    .bind(thread_id)
    .bind(thread_id)
    .bind(thread_id)
    .bind(Utc::now().timestamp())
    .bind(thread_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Thread linked to the stored email `message_id`, if any.
async fn thread_holding(
    conn: &mut SqliteConnection,
    message_id: &str,
) -> Result<Option<String>, PersistenceError> {
    let found: Option<String> = sqlx::query_scalar(
        r#"
        SELECT te.thread_id FROM thread_emails te
        JOIN emails e ON e.id = te.email_id
        WHERE e.message_id = ?
        ORDER BY te.thread_id
        LIMIT 1
        "#,
    )
    .bind(message_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(found)
}

/// Thread holding a stored reply to `message_id`.
async fn thread_holding_reply_to(
    conn: &mut SqliteConnection,
    message_id: &str,
) -> Result<Option<String>, PersistenceError> {
    let found: Option<String> = sqlx::query_scalar(
        r#"
        SELECT te.thread_id FROM thread_emails te
        JOIN emails e ON e.id = te.email_id
        WHERE e.in_reply_to = ?
        ORDER BY te.thread_id
        LIMIT 1
        "#,
    )
    .bind(message_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(found)
}

/// Thread that already holds `email` or one of its ancestors.
///
/// Lets a reply whose parent arrived in an earlier archive join that thread
/// instead of becoming a new root.
async fn existing_thread_for(
    conn: &mut SqliteConnection,
    email: &Email,
) -> Result<Option<String>, PersistenceError> {
    let mut candidates: Vec<&str> = vec![email.message_id.as_str()];
    if !email.in_reply_to.is_empty() {
        candidates.push(&email.in_reply_to);
    }
    candidates.extend(email.references.iter().map(String::as_str));

    for candidate in candidates {
        if let Some(found) = thread_holding(conn, candidate).await? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

/// Where a batch thread lands in the stored corpus.
enum Placement {
    /// The root or one of its ancestors is already threaded.
    Existing(String),
    /// A later message of the conversation was threaded first, under an
    /// orphan root; the batch root takes over that thread.
    Adopt(String),
    New,
}

/// Find the stored thread a resolved batch thread belongs to.
///
/// Checks the root's own ancestry first, then every member, then stored
/// replies to any member. Members are never linked into a second thread.
async fn place_thread(
    conn: &mut SqliteConnection,
    root: &str,
    members: &[Email],
) -> Result<Placement, PersistenceError> {
    if let Some(email) = members.iter().find(|e| e.message_id == root) {
        if let Some(id) = existing_thread_for(conn, email).await? {
            return Ok(Placement::Existing(id));
        }
    }
    for member in members {
        if let Some(id) = thread_holding(conn, &member.message_id).await? {
            return Ok(Placement::Adopt(id));
        }
    }
    for member in members {
        if let Some(id) = thread_holding_reply_to(conn, &member.message_id).await? {
            return Ok(Placement::Adopt(id));
        }
    }
    Ok(Placement::New)
}

/// Move an orphan thread onto the root that has since arrived.
async fn reroot_thread(
    conn: &mut SqliteConnection,
    thread_id: &str,
    meta: &ThreadMeta,
) -> Result<(), PersistenceError> {
    let tags_json = serde_json::to_string(&meta.tags)?;
    sqlx::query(
        r#"
        UPDATE OR IGNORE threads SET
            root_message_id = ?,
            subject = ?,
            tags_json = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&meta.root_message_id)
    .bind(&meta.subject)
    .bind(&tags_json)
    .bind(Utc::now().timestamp())
    .bind(thread_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

struct ThreadOutcome {
    created: bool,
    links: u64,
}

async fn persist_thread(
    pool: &SqlitePool,
    root: &str,
    members: &[Email],
    email_ids: &HashMap<&str, String>,
) -> Result<ThreadOutcome, PersistenceError> {
    let mut tx = pool.begin().await?;

    let meta = get_thread_metadata(root, members);
    let (thread_id, created) = match place_thread(&mut tx, root, members).await? {
        Placement::Existing(id) => (id, false),
        Placement::Adopt(id) => {
            info!(thread = %id, root = %root, "earlier message arrived; re-rooting thread");
            reroot_thread(&mut tx, &id, &meta).await?;
            (id, false)
        }
        Placement::New => insert_thread(&mut tx, &meta).await?,
    };

    let mut links = 0u64;
    for member in members {
        let Some(email_id) = email_ids.get(member.message_id.as_str()) else {
            continue;
        };
        match thread_holding(&mut tx, &member.message_id).await? {
            Some(owner) if owner != thread_id => {
                warn!(
                    message_id = %member.message_id,
                    thread = %owner,
                    "email already belongs to another thread; not relinked"
                );
            }
            _ => {
                if link(&mut tx, &thread_id, email_id).await? {
                    links += 1;
                }
            }
        }
    }
    refresh_thread_aggregates(&mut tx, &thread_id).await?;

    tx.commit().await?;
    Ok(ThreadOutcome { created, links })
}

/// Persist a normalized batch. Never fails as a whole.
pub async fn ingest_batch(
    pool: &SqlitePool,
    source: &str,
    emails: &[Email],
    progress: &dyn ProgressReporter,
) -> IngestManifest {
    let mut manifest = IngestManifest::default();
    let mut email_ids: HashMap<&str, String> = HashMap::with_capacity(emails.len());
    let total = emails.len() as u64;

    for (i, email) in emails.iter().enumerate() {
        let outcome = match pool.acquire().await {
            Ok(mut conn) => insert_email(&mut conn, email).await,
            Err(e) => Err(PersistenceError::from(e)),
        };
        match outcome {
            Ok((id, true)) => {
                debug!(message_id = %email.message_id, "email inserted");
                manifest.emails_inserted += 1;
                email_ids.insert(email.message_id.as_str(), id);
            }
            Ok((id, false)) => {
                debug!(message_id = %email.message_id, "email already stored");
                manifest.emails_duplicate += 1;
                email_ids.insert(email.message_id.as_str(), id);
            }
            Err(e) => {
                warn!(message_id = %email.message_id, error = %e, "email insert failed");
                manifest.errors.push(RecordFailure {
                    record: email.message_id.clone(),
                    reason: e.to_string(),
                });
            }
        }
        let n = i as u64 + 1;
        if should_report(n, total, 100) {
            progress.report(ProgressEvent::Storing {
                source: source.to_string(),
                n,
                total,
            });
        }
    }

    let partition = resolve_threads(emails);
    let thread_total = partition.threads.len() as u64;

    for (i, (root, members)) in partition.threads.iter().enumerate() {
        match persist_thread(pool, root, members, &email_ids).await {
            Ok(outcome) => {
                if outcome.created {
                    manifest.threads_created += 1;
                } else {
                    manifest.threads_updated += 1;
                }
                manifest.links_created += outcome.links;
            }
            Err(e) => {
                warn!(root = %root, error = %e, "thread persist failed");
                manifest.errors.push(RecordFailure {
                    record: format!("thread {}", root),
                    reason: e.to_string(),
                });
            }
        }
        let n = i as u64 + 1;
        if should_report(n, thread_total, 50) {
            progress.report(ProgressEvent::Threading {
                source: source.to_string(),
                n,
                total: thread_total,
            });
        }
    }

    manifest
}

/// Normalize and persist one archive payload.
///
/// Gzip payloads are recognised by their magic bytes and decompressed
/// first. Only an unreadable container or a corrupt gzip stream fails the
/// call; bad entries and failed records land in the manifest.
pub async fn ingest_bytes(
    pool: &SqlitePool,
    config: &Config,
    bytes: &[u8],
    format: ArchiveFormat,
    progress: &dyn ProgressReporter,
) -> Result<IngestManifest> {
    let source = format!("{:?}", format).to_lowercase();
    let payload = archive::decompress_if_gzip(bytes).context("Failed to decompress archive")?;

    progress.report(ProgressEvent::Parsing {
        source: source.clone(),
    });

    let options = NormalizeOptions {
        raw_excerpt_chars: config.ingest.raw_excerpt_chars,
    };
    let normalized = normalize::normalize(&payload, format, &options)
        .with_context(|| format!("Unreadable {} archive", source))?;
    debug!(format = %source, entries = normalized.entry_count(), "archive normalized");
    let batch = normalized.collect_batch();

    let mut manifest = ingest_batch(pool, &source, &batch.emails, progress).await;
    manifest.format_errors = batch.errors.len() as u64;

    info!(
        format = %source,
        inserted = manifest.emails_inserted,
        duplicates = manifest.emails_duplicate,
        threads_created = manifest.threads_created,
        threads_updated = manifest.threads_updated,
        format_errors = manifest.format_errors,
        record_errors = manifest.errors.len(),
        "ingest complete"
    );
    Ok(manifest)
}

/// `ldg ingest <path>`: read a file and ingest it.
pub async fn run_ingest(
    config: &Config,
    path: &Path,
    format: Option<ArchiveFormat>,
    progress: &dyn ProgressReporter,
) -> Result<IngestManifest> {
    let format = match format.or_else(|| ArchiveFormat::from_path(path)) {
        Some(f) => f,
        None => anyhow::bail!(
            "Cannot detect archive format of {}; pass --format mbox|atom|eml",
            path.display()
        ),
    };
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let pool = db::connect(config).await?;
    let result = ingest_bytes(&pool, config, &bytes, format, progress).await;
    pool.close().await;
    result
}

pub fn print_manifest(label: &str, manifest: &IngestManifest) {
    println!("ingest {}", label);
    println!("  emails inserted:   {}", manifest.emails_inserted);
    println!("  emails duplicate:  {}", manifest.emails_duplicate);
    println!("  threads created:   {}", manifest.threads_created);
    println!("  threads updated:   {}", manifest.threads_updated);
    println!("  links created:     {}", manifest.links_created);
    println!("  format errors:     {}", manifest.format_errors);
    println!("  record errors:     {}", manifest.errors.len());
    for failure in manifest.errors.iter().take(10) {
        println!("    {}: {}", failure.record, failure.reason);
    }
    println!("ok");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use crate::progress::NoProgress;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqlitePool) {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_db_path(tmp.path().join("data/ldg.sqlite"));
        let pool = db::connect(&config).await.unwrap();
        migrate::migrate_pool(&pool).await.unwrap();
        (tmp, pool)
    }

    fn email(id: &str, subject: &str, reply_to: &str, sender: &str, date: &str) -> Email {
        Email {
            message_id: id.to_string(),
            subject: subject.to_string(),
            sender: sender.to_string(),
            date: date.to_string(),
            in_reply_to: reply_to.to_string(),
            references: if reply_to.is_empty() {
                Vec::new()
            } else {
                vec![reply_to.to_string()]
            },
            body: "body".to_string(),
            raw_excerpt: String::new(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_returns_existing_id() {
        let (_tmp, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        let e = email("a@x", "hi", "", "A", "2024-01-01T00:00:00Z");

        let (first, created) = insert_email(&mut conn, &e).await.unwrap();
        assert!(created);
        let (second, created) = insert_email(&mut conn, &e).await.unwrap();
        assert!(!created);
        assert_eq!(first, second);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM emails")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_empty_identity_is_invalid() {
        let (_tmp, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        let e = email("", "hi", "", "A", "");
        assert!(matches!(
            insert_email(&mut conn, &e).await,
            Err(PersistenceError::InvalidRecord(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_record_is_reported_and_batch_continues() {
        let (_tmp, pool) = setup().await;
        let batch = vec![
            email("a@x", "[PATCH] fix", "", "A", "2024-01-01T00:00:00Z"),
            email("", "no id", "", "C", "2024-01-01T00:30:00Z"),
            email("b@x", "Re: [PATCH] fix", "a@x", "B", "2024-01-01T01:00:00Z"),
            email("c@x", "unrelated", "", "C", "2024-01-01T02:00:00Z"),
        ];

        let manifest = ingest_batch(&pool, "test", &batch, &NoProgress).await;
        assert_eq!(manifest.errors.len(), 1);
        assert!(manifest.errors[0].reason.contains("empty message_id"));
        assert_eq!(manifest.emails_inserted, 3);
        assert_eq!(manifest.threads_created, 2);
        assert_eq!(manifest.links_created, 3);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM emails")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_thread_upsert_merges() {
        let (_tmp, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut meta = ThreadMeta {
            root_message_id: "a@x".into(),
            subject: "[PATCH] fix".into(),
            participant_count: 1,
            email_count: 1,
            first_post: Some("2024-01-02T00:00:00Z".into()),
            last_post: Some("2024-01-02T00:00:00Z".into()),
            tags: vec!["PATCH".into()],
        };
        let (id, created) = insert_thread(&mut conn, &meta).await.unwrap();
        assert!(created);

        meta.email_count = 3;
        meta.first_post = Some("2024-01-01T00:00:00Z".into());
        meta.last_post = Some("2024-01-05T00:00:00Z".into());
        let (again, created) = insert_thread(&mut conn, &meta).await.unwrap();
        assert!(!created);
        assert_eq!(id, again);

        let row: (i64, String, String) = sqlx::query_as(
            "SELECT email_count, first_post, last_post FROM threads WHERE id = ?",
        )
        .bind(&id)
        .fetch_one(&mut *conn)
        .await
        .unwrap();
        assert_eq!(row.0, 3);
        assert_eq!(row.1, "2024-01-01T00:00:00Z");
        assert_eq!(row.2, "2024-01-05T00:00:00Z");
    }

    #[tokio::test]
    async fn test_link_is_idempotent() {
        let (_tmp, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        let (email_id, _) = insert_email(&mut conn, &email("a@x", "s", "", "A", ""))
            .await
            .unwrap();
        let meta = get_thread_metadata("a@x", &[email("a@x", "s", "", "A", "")]);
        let (thread_id, _) = insert_thread(&mut conn, &meta).await.unwrap();

        assert!(link(&mut conn, &thread_id, &email_id).await.unwrap());
        assert!(!link(&mut conn, &thread_id, &email_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_twice_converges() {
        let (_tmp, pool) = setup().await;
        let batch = vec![
            email("a@x", "[PATCH] fix", "", "Alice", "2024-01-01T00:00:00Z"),
            email("b@x", "Re: [PATCH] fix", "a@x", "Bob", "2024-01-01T01:00:00Z"),
            email("c@x", "other", "", "Carol", "2024-01-01T02:00:00Z"),
        ];

        let first = ingest_batch(&pool, "test", &batch, &NoProgress).await;
        assert_eq!(first.emails_inserted, 3);
        assert_eq!(first.threads_created, 2);
        assert_eq!(first.links_created, 3);

        let second = ingest_batch(&pool, "test", &batch, &NoProgress).await;
        assert_eq!(second.emails_inserted, 0);
        assert_eq!(second.emails_duplicate, 3);
        assert_eq!(second.threads_created, 0);
        assert_eq!(second.threads_updated, 2);
        assert_eq!(second.links_created, 0);

        let threads: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM threads")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(threads, 2);
        let count: i64 =
            sqlx::query_scalar("SELECT email_count FROM threads WHERE root_message_id = 'a@x'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_reply_in_later_batch_joins_existing_thread() {
        let (_tmp, pool) = setup().await;
        let day_one = vec![email("a@x", "topic", "", "Alice", "2024-01-01T00:00:00Z")];
        let day_two = vec![email("b@x", "Re: topic", "a@x", "Bob", "2024-01-02T00:00:00Z")];

        ingest_batch(&pool, "d1", &day_one, &NoProgress).await;
        let manifest = ingest_batch(&pool, "d2", &day_two, &NoProgress).await;
        assert_eq!(manifest.threads_created, 0);
        assert_eq!(manifest.links_created, 1);

        let row: (i64, i64, String) = sqlx::query_as(
            "SELECT email_count, participant_count, last_post FROM threads WHERE root_message_id = 'a@x'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(row, (2, 2, "2024-01-02T00:00:00Z".to_string()));
    }

    #[tokio::test]
    async fn test_ingest_bytes_counts_format_errors() {
        let (_tmp, pool) = setup().await;
        let config = Config::with_db_path("unused.sqlite");
        let feed = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
<entry><id>urn:uuid:good</id><title>ok</title><author><name>A</name></author>
<updated>2024-10-18T10:00:00Z</updated><content>hello</content></entry>
<entry><id>urn:uuid:cut</id><title>trun"#;

        let manifest = ingest_bytes(&pool, &config, feed.as_bytes(), ArchiveFormat::Atom, &NoProgress)
            .await
            .unwrap();
        assert_eq!(manifest.emails_inserted, 1);
        assert_eq!(manifest.format_errors, 1);
        assert_eq!(manifest.threads_created, 1);
    }

    #[tokio::test]
    async fn test_unreadable_container_fails() {
        let (_tmp, pool) = setup().await;
        let config = Config::with_db_path("unused.sqlite");
        let result = ingest_bytes(
            &pool,
            &config,
            b"<html>checking your browser</html>",
            ArchiveFormat::Atom,
            &NoProgress,
        )
        .await;
        assert!(result.is_err());
    }
}
