//! TOML configuration parsing and validation.
//!
//! Every section except `[db]` is optional and falls back to defaults. The
//! LLM section is turned into an explicit [`ProviderConfig`] when a provider
//! is constructed; nothing here reads process-global state after load.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_raw_excerpt_chars")]
    pub raw_excerpt_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            raw_excerpt_chars: default_raw_excerpt_chars(),
        }
    }
}

fn default_raw_excerpt_chars() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    #[serde(default = "default_archive_url")]
    pub base_url: String,
    #[serde(default = "default_archive_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: default_archive_url(),
            timeout_secs: default_archive_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_archive_url() -> String {
    "https://lore.kernel.org/lkml".to_string()
}
fn default_archive_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_safe_input_tokens")]
    pub safe_input_tokens: usize,
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
    /// Patch/RFC submissions kept when a thread is truncated.
    #[serde(default = "default_keep")]
    pub keep_submissions: usize,
    /// Trailing messages kept when a thread is truncated.
    #[serde(default = "default_keep")]
    pub keep_tail: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            api_key_env: None,
            base_url: None,
            timeout_secs: default_llm_timeout(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            requests_per_minute: default_requests_per_minute(),
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base_secs(),
            safe_input_tokens: default_safe_input_tokens(),
            chars_per_token: default_chars_per_token(),
            keep_submissions: default_keep(),
            keep_tail: default_keep(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Environment variable consulted for the API key.
    pub fn key_env(&self) -> &str {
        match (&self.api_key_env, self.provider.as_str()) {
            (Some(name), _) => name,
            (None, "openai") => "OPENAI_API_KEY",
            (None, _) => "GEMINI_API_KEY",
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_output_tokens() -> u32 {
    2048
}
fn default_requests_per_minute() -> usize {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_secs() -> u64 {
    2
}
fn default_safe_input_tokens() -> usize {
    900_000
}
fn default_chars_per_token() -> usize {
    4
}
fn default_keep() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_backend")]
    pub backend: String,
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            dir: None,
        }
    }
}

fn default_cache_backend() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

/// Resolved settings handed to an LLM provider at construction.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl ProviderConfig {
    /// Resolve the API key from the configured environment variable.
    pub fn from_llm_config(llm: &LlmConfig) -> Result<Self> {
        let model = llm
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for provider '{}'", llm.provider))?;
        let api_key = std::env::var(llm.key_env())
            .with_context(|| format!("{} environment variable not set", llm.key_env()))?;

        Ok(Self {
            provider: llm.provider.clone(),
            model,
            api_key,
            base_url: llm.base_url.clone(),
            timeout_secs: llm.timeout_secs,
        })
    }
}

impl Config {
    /// Configuration with a database path and defaults everywhere else.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            ingest: IngestConfig::default(),
            archive: ArchiveConfig::default(),
            llm: LlmConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let llm = &config.llm;

    if llm.safe_input_tokens == 0 {
        bail!("llm.safe_input_tokens must be > 0");
    }
    if llm.chars_per_token == 0 {
        bail!("llm.chars_per_token must be > 0");
    }
    if llm.requests_per_minute == 0 {
        bail!("llm.requests_per_minute must be > 0");
    }
    if !(0.0..=2.0).contains(&llm.temperature) {
        bail!("llm.temperature must be in [0.0, 2.0]");
    }

    match llm.provider.as_str() {
        "disabled" | "gemini" | "openai" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled, gemini, or openai.",
            other
        ),
    }
    if llm.is_enabled() && llm.model.is_none() {
        bail!(
            "llm.model must be specified when provider is '{}'",
            llm.provider
        );
    }

    match config.cache.backend.as_str() {
        "memory" | "sqlite" => {}
        "files" => {
            if config.cache.dir.is_none() {
                bail!("cache.dir must be set when cache.backend is 'files'");
            }
        }
        other => bail!(
            "Unknown cache backend: '{}'. Must be memory, sqlite, or files.",
            other
        ),
    }

    match config.logging.format.as_str() {
        "pretty" | "compact" | "json" => {}
        other => bail!("Unknown logging format: '{}'", other),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"/tmp/ldg.sqlite\"\n").unwrap();
        assert_eq!(config.ingest.raw_excerpt_chars, 1000);
        assert_eq!(config.llm.provider, "disabled");
        assert_eq!(config.llm.max_retries, 3);
        assert_eq!(config.llm.backoff_base_secs, 2);
        assert_eq!(config.cache.backend, "sqlite");
        assert!(!config.llm.is_enabled());
    }

    #[test]
    fn test_enabled_provider_requires_model() {
        let err = parse("[db]\npath = \"x\"\n[llm]\nprovider = \"gemini\"\n").unwrap_err();
        assert!(err.to_string().contains("llm.model"));
    }

    #[test]
    fn test_unknown_cache_backend_rejected() {
        let err = parse("[db]\npath = \"x\"\n[cache]\nbackend = \"redis\"\n").unwrap_err();
        assert!(err.to_string().contains("redis"));
    }

    #[test]
    fn test_files_backend_requires_dir() {
        assert!(parse("[db]\npath = \"x\"\n[cache]\nbackend = \"files\"\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[cache]\nbackend = \"files\"\ndir = \"/tmp/c\"\n").is_ok());
    }

    #[test]
    fn test_key_env_defaults_per_provider() {
        let mut llm = LlmConfig::default();
        llm.provider = "openai".to_string();
        assert_eq!(llm.key_env(), "OPENAI_API_KEY");
        llm.provider = "gemini".to_string();
        assert_eq!(llm.key_env(), "GEMINI_API_KEY");
        llm.api_key_env = Some("MY_KEY".to_string());
        assert_eq!(llm.key_env(), "MY_KEY");
    }
}
