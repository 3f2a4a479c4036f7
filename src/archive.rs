//! Archive source: per-day mbox archives and the Atom feed over HTTP.
//!
//! Public-inbox mirrors sit behind anti-bot proxies that answer with an HTML
//! challenge page and HTTP 200. Payload validity is therefore decided by
//! content: a day archive must start with the gzip magic bytes, a feed must
//! look like XML. Downloads run under the same [`RetryPolicy`] as LLM calls,
//! and only timeouts, 5xx responses, and connection failures are retried.

use std::borrow::Cow;
use std::io::Read;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use flate2::read::MultiGzDecoder;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::error::FetchError;
use crate::ingest;
use crate::models::IngestManifest;
use crate::normalize::ArchiveFormat;
use crate::progress::ProgressReporter;
use crate::retry::RetryPolicy;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Decompress gzip payloads; pass anything else through untouched.
pub fn decompress_if_gzip(bytes: &[u8]) -> std::io::Result<Cow<'_, [u8]>> {
    if !is_gzip(bytes) {
        return Ok(Cow::Borrowed(bytes));
    }
    let mut out = Vec::with_capacity(bytes.len() * 4);
    MultiGzDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(Cow::Owned(out))
}

/// Check a downloaded day archive and return the decompressed mbox.
pub fn unpack_day_archive(bytes: &[u8]) -> Result<Vec<u8>, FetchError> {
    if !is_gzip(bytes) {
        let head: Vec<String> = bytes.iter().take(8).map(|b| format!("{:02x}", b)).collect();
        return Err(FetchError::NotGzip(head.join(" ")));
    }
    let mut out = Vec::with_capacity(bytes.len() * 4);
    MultiGzDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(out)
}

/// Check that a downloaded feed is XML rather than a challenge page.
pub fn check_feed(bytes: &[u8]) -> Result<(), FetchError> {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let head = &bytes[start..bytes.len().min(start + 512)];
    let lowered = String::from_utf8_lossy(head).to_ascii_lowercase();
    if lowered.starts_with("<?xml") || lowered.starts_with("<feed") {
        Ok(())
    } else {
        Err(FetchError::NotXml)
    }
}

pub fn day_archive_url(base_url: &str, date: NaiveDate) -> String {
    format!(
        "{}/{}/mbox.gz",
        base_url.trim_end_matches('/'),
        date.format("%Y-%m-%d")
    )
}

pub fn atom_feed_url(base_url: &str) -> String {
    format!("{}/new.atom", base_url.trim_end_matches('/'))
}

fn client(config: &Config) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.archive.timeout_secs))
        .user_agent(concat!("list-digest/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| FetchError::Connection(e.to_string()))
}

fn policy(config: &Config) -> RetryPolicy {
    RetryPolicy::new(config.archive.max_retries, Duration::from_secs(2))
}

async fn get_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, FetchError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if status.is_server_error() || status.as_u16() == 429 {
        return Err(FetchError::Server(status.as_u16()));
    }
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }
    Ok(response.bytes().await?.to_vec())
}

/// Download one day's archive and return the decompressed mbox bytes.
pub async fn fetch_day_archive(config: &Config, date: NaiveDate) -> Result<Vec<u8>, FetchError> {
    let url = day_archive_url(&config.archive.base_url, date);
    let client = client(config)?;
    info!(%url, "downloading day archive");

    let bytes = policy(config)
        .run("archive download", || get_bytes(&client, &url))
        .await?;
    unpack_day_archive(&bytes)
}

/// Download the current Atom feed.
pub async fn fetch_atom_feed(config: &Config) -> Result<Vec<u8>, FetchError> {
    let url = atom_feed_url(&config.archive.base_url);
    let client = client(config)?;
    info!(%url, "downloading atom feed");

    let bytes = policy(config)
        .run("feed download", || get_bytes(&client, &url))
        .await?;
    check_feed(&bytes)?;
    Ok(bytes)
}

/// `ldg fetch <date>`: download and ingest one day.
pub async fn run_fetch_day(
    config: &Config,
    date: NaiveDate,
    progress: &dyn ProgressReporter,
) -> Result<IngestManifest> {
    let mbox = fetch_day_archive(config, date)
        .await
        .with_context(|| format!("Failed to fetch archive for {}", date))?;
    let pool = db::connect(config).await?;
    let result = ingest::ingest_bytes(&pool, config, &mbox, ArchiveFormat::Mbox, progress).await;
    pool.close().await;
    result
}

/// `ldg fetch-atom`: download and ingest the latest feed.
pub async fn run_fetch_atom(
    config: &Config,
    progress: &dyn ProgressReporter,
) -> Result<IngestManifest> {
    let feed = fetch_atom_feed(config)
        .await
        .context("Failed to fetch atom feed")?;
    let pool = db::connect(config).await?;
    let result = ingest::ingest_bytes(&pool, config, &feed, ArchiveFormat::Atom, progress).await;
    pool.close().await;
    result
}
