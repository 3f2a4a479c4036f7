//! Ingest and summarization progress reporting.
//!
//! Long runs (`ldg ingest`, `ldg fetch`, `ldg summarize pending`) report
//! what they are doing and how much is left. Progress goes to **stderr** so
//! stdout stays parseable for scripts.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Container validated, entries being parsed. Total unknown.
    Parsing { source: String },
    /// Emails being persisted: `n` of `total`.
    Storing { source: String, n: u64, total: u64 },
    /// Threads being upserted and linked: `n` of `total`.
    Threading { source: String, n: u64, total: u64 },
    /// Summaries being generated: `n` of `total`, currently `target`.
    Summarizing { target: String, n: u64, total: u64 },
}

/// Receives progress events. Implementations write to stderr.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress: "ingest 2024-10-18.mbox  storing  1,234 / 5,000 emails".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Parsing { source } => format!("ingest {}  parsing...\n", source),
            ProgressEvent::Storing { source, n, total } => format!(
                "ingest {}  storing  {} / {} emails\n",
                source,
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Threading { source, n, total } => format!(
                "ingest {}  threading  {} / {} threads\n",
                source,
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Summarizing { target, n, total } => format!(
                "summarize  {} / {}  {}\n",
                format_number(*n),
                format_number(*total),
                target
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Parsing { source } => serde_json::json!({
                "event": "progress",
                "source": source,
                "phase": "parsing"
            }),
            ProgressEvent::Storing { source, n, total } => serde_json::json!({
                "event": "progress",
                "source": source,
                "phase": "storing",
                "n": n,
                "total": total
            }),
            ProgressEvent::Threading { source, n, total } => serde_json::json!({
                "event": "progress",
                "source": source,
                "phase": "threading",
                "n": n,
                "total": total
            }),
            ProgressEvent::Summarizing { target, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "summarizing",
                "target": target,
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Report every `step` items, plus the last one.
pub(crate) fn should_report(n: u64, total: u64, step: u64) -> bool {
    n == total || (step > 0 && n % step == 0)
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
