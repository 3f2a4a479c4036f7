//! Summarization orchestrator.
//!
//! Every request (email, thread, or digest window) runs the same pipeline:
//!
//! ```text
//! CHECK_CACHE ─hit──▶ return cached summary
//!     │miss
//!     ▼
//! TRUNCATE ──▶ RATE_LIMIT_WAIT ──▶ CALL_WITH_RETRY ──▶ PARSE_RESPONSE ──▶ STORE (cache + summaries row)
//!                                        │terminal            │malformed
//!                                        └────────────────────┴──▶ error summary (not cached, not stored)
//! ```
//!
//! The cache key covers the target identity, summary type, and model. A
//! thread's identity is its ordered member message ids, so a thread that
//! grows gets a new key. `force` skips the cache lookup; the regenerated
//! summary is appended to history rather than replacing the old row.
//!
//! Callers always get a [`Summary`]. Failures produce an error summary whose
//! `tldr` carries the reason, so digests can assemble from partial results.
//!
//! Each retry attempt passes through the rate limiter, so retries count
//! against the per-model window like any other request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{Days, NaiveDate, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::cache::{self, cache_key, SummaryCache};
use crate::config::{Config, LlmConfig, ProviderConfig};
use crate::error::ProviderError;
use crate::llm::{self, GenerationOptions, LlmProvider};
use crate::models::{Email, Summary, SummaryFields, SummaryType, ThreadRecord};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::prompt::{self, DigestItem};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::store;
use crate::truncate::TokenBudget;

/// Pipeline stage, recorded on error summaries as `failed_stage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CollectThreads,
    CallWithRetry,
    ParseResponse,
    Store,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::CollectThreads => "collect_threads",
            Stage::CallWithRetry => "call_with_retry",
            Stage::ParseResponse => "parse_response",
            Stage::Store => "store",
        }
    }
}

/// How a summary was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Cached,
    Generated,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub summary: Summary,
    pub kind: OutcomeKind,
    pub estimated_cost_usd: f64,
}

/// Totals from [`SummarizationOrchestrator::summarize_pending`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct SummaryRunReport {
    pub succeeded: u64,
    pub failed: u64,
    pub cached: u64,
    pub cancelled: bool,
    pub estimated_cost_usd: f64,
}

impl SummaryRunReport {
    fn record(&mut self, outcome: &Outcome) {
        match outcome.kind {
            OutcomeKind::Cached => self.cached += 1,
            OutcomeKind::Generated => self.succeeded += 1,
            OutcomeKind::Failed => self.failed += 1,
        }
        self.estimated_cost_usd += outcome.estimated_cost_usd;
    }
}

/// A daily or weekly digest window starting at midnight UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestWindow {
    pub kind: SummaryType,
    pub start: NaiveDate,
}

impl DigestWindow {
    pub fn daily(start: NaiveDate) -> Self {
        Self {
            kind: SummaryType::Daily,
            start,
        }
    }

    pub fn weekly(start: NaiveDate) -> Self {
        Self {
            kind: SummaryType::Weekly,
            start,
        }
    }

    pub fn days(&self) -> u64 {
        match self.kind {
            SummaryType::Weekly => 7,
            _ => 1,
        }
    }

    /// `[start, end)` as RFC 3339 UTC strings, comparable with stored dates.
    pub fn bounds(&self) -> (String, String) {
        let end = self
            .start
            .checked_add_days(Days::new(self.days()))
            .unwrap_or(NaiveDate::MAX);
        (
            format!("{}T00:00:00Z", self.start.format("%Y-%m-%d")),
            format!("{}T00:00:00Z", end.format("%Y-%m-%d")),
        )
    }

    /// Summary target, e.g. `daily:2024-10-18`.
    pub fn target(&self) -> String {
        format!("{}:{}", self.kind, self.start.format("%Y-%m-%d"))
    }
}

enum Content {
    Email(Email),
    Thread { subject: String, members: Vec<Email> },
    Digest { label: String, items: Vec<DigestItem> },
}

struct Request {
    target: String,
    summary_type: SummaryType,
    identity: String,
    content: Content,
}

/// Settings the orchestrator reads from `[llm]`.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub options: GenerationOptions,
    pub budget: TokenBudget,
    pub retry: RetryPolicy,
    pub requests_per_minute: usize,
}

impl OrchestratorSettings {
    pub fn from_llm_config(llm: &LlmConfig) -> Self {
        Self {
            options: GenerationOptions {
                temperature: llm.temperature,
                max_output_tokens: llm.max_output_tokens,
            },
            budget: TokenBudget::from_config(llm),
            retry: RetryPolicy::new(llm.max_retries, Duration::from_secs(llm.backoff_base_secs)),
            requests_per_minute: llm.requests_per_minute,
        }
    }
}

pub struct SummarizationOrchestrator {
    pool: SqlitePool,
    provider: Box<dyn LlmProvider>,
    cache: SummaryCache,
    limiter: Arc<RateLimiter>,
    settings: OrchestratorSettings,
    cancel: Arc<AtomicBool>,
}

impl SummarizationOrchestrator {
    pub fn new(
        pool: SqlitePool,
        provider: Box<dyn LlmProvider>,
        cache: SummaryCache,
        settings: OrchestratorSettings,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::per_minute(settings.requests_per_minute));
        Self {
            pool,
            provider,
            cache,
            limiter,
            settings,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Orchestrator for the configured provider and cache backend.
    pub fn from_config(config: &Config, pool: SqlitePool) -> Result<Self> {
        if !config.llm.is_enabled() {
            bail!("llm.provider is 'disabled'; set [llm] provider and model to summarize");
        }
        let provider_config = ProviderConfig::from_llm_config(&config.llm)?;
        let provider = llm::create_provider(&provider_config)?;
        let cache = SummaryCache::new(cache::open_store(config, &pool)?);
        Ok(Self::new(
            pool,
            provider,
            cache,
            OrchestratorSettings::from_llm_config(&config.llm),
        ))
    }

    /// Flag checked before each unit of work in batch operations.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn model(&self) -> &str {
        self.provider.model_name()
    }

    // ============ Operations ============

    pub async fn summarize_email(&self, message_id: &str, force: bool) -> Result<Outcome> {
        let Some(email) = store::get_email(&self.pool, message_id).await? else {
            bail!("email not found: {}", message_id);
        };
        Ok(self.summarize_email_record(email, force).await)
    }

    pub async fn summarize_email_record(&self, email: Email, force: bool) -> Outcome {
        let request = Request {
            target: email.message_id.clone(),
            summary_type: SummaryType::Email,
            identity: email.message_id.clone(),
            content: Content::Email(email),
        };
        self.run(request, force).await
    }

    pub async fn summarize_thread(&self, thread_id: &str, force: bool) -> Result<Outcome> {
        let Some(thread) = store::get_thread(&self.pool, thread_id).await? else {
            bail!("thread not found: {}", thread_id);
        };
        let members = store::thread_members(&self.pool, &thread.id).await?;
        Ok(self.summarize_thread_members(&thread, members, force).await)
    }

    /// Summarize `members` (chronological) as thread `thread`.
    pub async fn summarize_thread_members(
        &self,
        thread: &ThreadRecord,
        members: Vec<Email>,
        force: bool,
    ) -> Outcome {
        let identity = members
            .iter()
            .map(|e| e.message_id.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let request = Request {
            target: thread.id.clone(),
            summary_type: SummaryType::Thread,
            identity,
            content: Content::Thread {
                subject: thread.subject.clone(),
                members,
            },
        };
        self.run(request, force).await
    }

    /// Digest over threads first posted in `window`.
    ///
    /// Threads without a summary are summarized first; ones that fail are
    /// left out of the digest.
    pub async fn generate_digest(&self, window: DigestWindow, force: bool) -> Result<Outcome> {
        let (start, end) = window.bounds();
        let threads = store::threads_in_window(&self.pool, &start, &end).await?;
        info!(window = %window.target(), threads = threads.len(), "building digest");

        let mut items = Vec::new();
        let mut identity = vec![window.target()];
        for thread in &threads {
            if self.cancelled() {
                bail!("digest cancelled");
            }
            let summary = match store::latest_summary(&self.pool, &thread.id, SummaryType::Thread).await? {
                Some(existing) => existing,
                None => {
                    let members = store::thread_members(&self.pool, &thread.id).await?;
                    let outcome = self.summarize_thread_members(thread, members, false).await;
                    if outcome.kind == OutcomeKind::Failed {
                        warn!(thread = %thread.id, reason = %outcome.summary.tldr, "thread left out of digest");
                        continue;
                    }
                    outcome.summary
                }
            };
            identity.push(format!("{}:{}", thread.id, summary.cache_key));
            items.push(DigestItem {
                subject: thread.subject.clone(),
                email_count: thread.email_count,
                tldr: summary.tldr.clone(),
                importance: summary
                    .fields
                    .importance
                    .clone()
                    .unwrap_or_else(|| "medium".to_string()),
                subsystems: summary.fields.subsystems.clone(),
            });
        }

        items.sort_by(|a, b| {
            importance_rank(&a.importance)
                .cmp(&importance_rank(&b.importance))
                .then(b.email_count.cmp(&a.email_count))
        });

        let empty = items.is_empty();
        let request = Request {
            target: window.target(),
            summary_type: window.kind,
            identity: identity.join("\n"),
            content: Content::Digest {
                label: format!("{} {}", window.kind, window.start.format("%Y-%m-%d")),
                items,
            },
        };
        if empty {
            // Nothing to digest: report it without a model call or a stored row.
            let reason = if threads.is_empty() {
                "no threads in window".to_string()
            } else {
                format!("none of the {} threads in window could be summarized", threads.len())
            };
            let model = self.provider.model_name();
            let key = cache_key(&request.identity, request.summary_type, model);
            return Ok(self.failure(&request, model, &key, Stage::CollectThreads, &reason));
        }
        Ok(self.run(request, force).await)
    }

    /// Summarize threads that have no thread summary yet, most recently
    /// active first, one at a time.
    pub async fn summarize_pending(
        &self,
        limit: i64,
        min_emails: i64,
        progress: &dyn ProgressReporter,
    ) -> Result<SummaryRunReport> {
        let threads = store::threads_without_summary(&self.pool, min_emails, limit).await?;
        let total = threads.len() as u64;
        let mut report = SummaryRunReport::default();

        for (i, thread) in threads.iter().enumerate() {
            if self.cancelled() {
                info!(done = i, total, "summarization cancelled");
                report.cancelled = true;
                break;
            }
            progress.report(ProgressEvent::Summarizing {
                target: thread.subject.clone(),
                n: i as u64 + 1,
                total,
            });
            let members = store::thread_members(&self.pool, &thread.id).await?;
            let outcome = self.summarize_thread_members(thread, members, false).await;
            report.record(&outcome);
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            cached = report.cached,
            cost_usd = report.estimated_cost_usd,
            "pending summaries done"
        );
        Ok(report)
    }

    // ============ Pipeline ============

    async fn run(&self, request: Request, force: bool) -> Outcome {
        let model = self.provider.model_name().to_string();
        let key = cache_key(&request.identity, request.summary_type, &model);

        // CHECK_CACHE
        if !force {
            if let Some(summary) = self.lookup(&request, &key).await {
                debug!(target_id = %request.target, "summary served from cache");
                return Outcome {
                    summary,
                    kind: OutcomeKind::Cached,
                    estimated_cost_usd: 0.0,
                };
            }
        }

        // TRUNCATE
        let prompt = self.build_prompt(&request.content);

        // RATE_LIMIT_WAIT + CALL_WITH_RETRY
        let limiter = self.limiter.as_ref();
        let provider = self.provider.as_ref();
        let options = &self.settings.options;
        let (model_ref, prompt_ref) = (model.as_str(), prompt.as_str());
        let call = self
            .settings
            .retry
            .run("llm generate", move || async move {
                let waited = limiter.acquire(model_ref).await;
                if !waited.is_zero() {
                    debug!(model = model_ref, waited_ms = waited.as_millis() as u64, "rate limited");
                }
                provider.generate(prompt_ref, options).await
            })
            .await;
        let text = match call {
            Ok(text) => text,
            Err(e) => return self.failure(&request, &model, &key, Stage::CallWithRetry, &e),
        };
        let cost = llm::estimate_cost(
            &model,
            prompt.chars().count(),
            text.chars().count(),
            self.settings.budget.chars_per_token,
        );

        // PARSE_RESPONSE
        let (tldr, fields) = match parse_summary(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                let mut outcome = self.failure(&request, &model, &key, Stage::ParseResponse, &e);
                outcome.estimated_cost_usd = cost;
                return outcome;
            }
        };

        let summary = Summary {
            target: request.target.clone(),
            summary_type: request.summary_type,
            tldr,
            fields,
            model,
            generated_at: now_rfc3339(),
            cache_key: key.clone(),
            error: None,
        };

        // STORE
        self.cache.put(&key, &summary).await;
        if let Err(e) = store::insert_summary(&self.pool, &summary).await {
            warn!(target_id = %summary.target, stage = Stage::Store.as_str(), error = %e, "summary not persisted");
        }
        info!(
            target_id = %summary.target,
            summary_type = %summary.summary_type,
            cost_usd = cost,
            "summary generated"
        );

        Outcome {
            summary,
            kind: OutcomeKind::Generated,
            estimated_cost_usd: cost,
        }
    }

    /// Cache first; then the latest stored row if it was produced for the
    /// same key (covers cache backends that do not outlive the process).
    async fn lookup(&self, request: &Request, key: &str) -> Option<Summary> {
        if let Some(summary) = self.cache.get(key).await {
            return Some(summary);
        }
        match store::latest_summary(&self.pool, &request.target, request.summary_type).await {
            Ok(Some(stored)) if stored.cache_key == key => {
                self.cache.put(key, &stored).await;
                Some(stored)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(target_id = %request.target, error = %e, "summary history lookup failed");
                None
            }
        }
    }

    fn build_prompt(&self, content: &Content) -> String {
        let budget = &self.settings.budget;
        match content {
            Content::Email(email) => {
                let selection = budget.select(std::slice::from_ref(email));
                match selection.emails.first() {
                    Some(clipped) => prompt::email_prompt(clipped),
                    None => prompt::email_prompt(email),
                }
            }
            Content::Thread { subject, members } => {
                let selection = budget.select(members);
                if selection.truncated() {
                    info!(
                        subject = %subject,
                        kept = selection.emails.len(),
                        omitted = selection.omitted,
                        clipped = selection.clipped,
                        "thread truncated to fit token budget"
                    );
                }
                prompt::thread_prompt(subject, members.len(), &selection.emails, selection.omitted)
            }
            Content::Digest { label, items } => prompt::digest_prompt(label, items),
        }
    }

    fn failure(
        &self,
        request: &Request,
        model: &str,
        key: &str,
        stage: Stage,
        error: &dyn std::fmt::Display,
    ) -> Outcome {
        warn!(
            target_id = %request.target,
            summary_type = %request.summary_type,
            stage = stage.as_str(),
            error = %error,
            "summarization failed"
        );
        Outcome {
            summary: error_summary(request, model, key, stage, error),
            kind: OutcomeKind::Failed,
            estimated_cost_usd: 0.0,
        }
    }
}

fn error_summary(
    request: &Request,
    model: &str,
    key: &str,
    stage: Stage,
    error: &dyn std::fmt::Display,
) -> Summary {
    let mut fields = SummaryFields::default();
    fields
        .extra
        .insert("failed_stage".to_string(), Value::from(stage.as_str()));
    Summary {
        target: request.target.clone(),
        summary_type: request.summary_type,
        tldr: format!("Error generating summary: {}", error),
        fields,
        model: model.to_string(),
        generated_at: now_rfc3339(),
        cache_key: key.to_string(),
        error: Some(error.to_string()),
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn importance_rank(importance: &str) -> u8 {
    match importance.to_ascii_lowercase().as_str() {
        "critical" => 0,
        "high" => 1,
        "medium" => 2,
        "low" => 3,
        _ => 4,
    }
}

fn string_list(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s],
        _ => Vec::new(),
    }
}

fn optional_string(value: Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

/// Validate a model reply: one JSON object with a non-empty `tldr`.
pub fn parse_summary(text: &str) -> Result<(String, SummaryFields), ProviderError> {
    let mut map = llm::parse_json_response(text)?;

    let tldr = match map.remove("tldr") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => {
            return Err(ProviderError::MalformedResponse(
                "response has no tldr".to_string(),
            ))
        }
    };

    let mut key_points = string_list(map.remove("key_points"));
    if key_points.is_empty() {
        key_points = string_list(map.remove("highlights"));
    }
    let fields = SummaryFields {
        key_points,
        resolution: optional_string(map.remove("resolution")),
        subsystems: string_list(map.remove("subsystems")),
        importance: optional_string(map.remove("importance")),
        extra: map,
    };
    Ok((tldr, fields))
}

/// `ldg summarize` / `ldg digest` output.
pub fn print_outcome(outcome: &Outcome) {
    let summary = &outcome.summary;
    println!(
        "{} summary for {} ({:?}, model {})",
        summary.summary_type,
        summary.target,
        outcome.kind,
        summary.model
    );
    println!("  tldr: {}", summary.tldr);
    for point in &summary.fields.key_points {
        println!("  - {}", point);
    }
    if let Some(resolution) = &summary.fields.resolution {
        println!("  resolution: {}", resolution);
    }
    if !summary.fields.subsystems.is_empty() {
        println!("  subsystems: {}", summary.fields.subsystems.join(", "));
    }
    if let Some(importance) = &summary.fields.importance {
        println!("  importance: {}", importance);
    }
    println!("  generated: {}", summary.generated_at);
    if outcome.estimated_cost_usd > 0.0 {
        println!("  estimated cost: ${:.6}", outcome.estimated_cost_usd);
    }
}
