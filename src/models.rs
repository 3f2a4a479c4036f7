//! Core data models used throughout the pipeline.
//!
//! These types represent the canonical emails, reconstructed threads, and
//! generated summaries that flow from archive bytes into the corpus.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical message record produced by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    /// RFC 3339 in UTC when the Date header parsed, the raw header otherwise.
    pub date: String,
    /// Parent identity, empty when the message is not a reply.
    pub in_reply_to: String,
    /// Ancestor identities, oldest first.
    pub references: Vec<String>,
    pub body: String,
    pub raw_excerpt: String,
}

/// Aggregate fields describing one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMeta {
    pub root_message_id: String,
    pub subject: String,
    pub participant_count: i64,
    pub email_count: i64,
    pub first_post: Option<String>,
    pub last_post: Option<String>,
    pub tags: Vec<String>,
}

/// A persisted thread row.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadRecord {
    pub id: String,
    pub root_message_id: String,
    pub subject: String,
    pub participant_count: i64,
    pub email_count: i64,
    pub first_post: Option<String>,
    pub last_post: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryType {
    Email,
    Thread,
    Daily,
    Weekly,
}

impl SummaryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryType::Email => "email",
            SummaryType::Thread => "thread",
            SummaryType::Daily => "daily",
            SummaryType::Weekly => "weekly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(SummaryType::Email),
            "thread" => Some(SummaryType::Thread),
            "daily" => Some(SummaryType::Daily),
            "weekly" => Some(SummaryType::Weekly),
            _ => None,
        }
    }
}

impl fmt::Display for SummaryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured fields parsed out of a model response.
///
/// Known fields are typed; anything else the model returns (discussion
/// narrative, action items, per-subsystem breakdowns) lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryFields {
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default)]
    pub subsystems: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A generated summary. Never mutated once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Email message id, thread id, or digest window label.
    pub target: String,
    pub summary_type: SummaryType,
    pub tldr: String,
    #[serde(default)]
    pub fields: SummaryFields,
    pub model: String,
    pub generated_at: String,
    pub cache_key: String,
    /// Set on error summaries; `tldr` carries the same reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Summary {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// One record that failed to persist during an ingest run.
#[derive(Debug, Clone, Serialize)]
pub struct RecordFailure {
    pub record: String,
    pub reason: String,
}

/// Counts reported by an ingest run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestManifest {
    pub emails_inserted: u64,
    pub emails_duplicate: u64,
    pub threads_created: u64,
    pub threads_updated: u64,
    pub links_created: u64,
    pub format_errors: u64,
    pub errors: Vec<RecordFailure>,
}
