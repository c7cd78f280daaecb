//! Configuration for harvest.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (HARVEST_HOME)
//! 2. Config file (.harvest/config.yaml)
//! 3. Defaults (~/.harvest)
//!
//! Config file discovery:
//! - Searches the current directory and its parents for .harvest/config.yaml
//! - `paths.home` in the config file is relative to the .harvest/ directory
//!
//! Settings are resolved once in `main` and passed down by reference.

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::collector::CollectorSettings;
use crate::core::processor::ProcessorSettings;
use crate::core::RetryPolicy;
use crate::domain::QuotaLimits;
use crate::stages::StageSettings;

use self::paths::DataPaths;

/// Environment variable overriding the home directory
pub const HOME_ENV: &str = "HARVEST_HOME";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub collect: CollectConfig,
    #[serde(default)]
    pub subtitles: SubtitleConfig,
    #[serde(default)]
    pub asr: AsrConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to the .harvest/ directory)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectConfig {
    pub page_size: u32,
    pub page_delay_ms: u64,
    pub bucket_delay_ms: u64,
    pub retry_delay_ms: u64,
    pub max_page_retries: u32,
    pub stop_threshold: u32,
    pub request_timeout_secs: u64,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            page_delay_ms: 1500,
            bucket_delay_ms: 1000,
            retry_delay_ms: 3000,
            max_page_retries: 5,
            stop_threshold: 3,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubtitleConfig {
    /// Look up platform subtitles before speech-to-text
    pub enabled: bool,
    pub item_delay_ms: u64,
    /// Pause between the parts of a multi-part item
    pub part_delay_ms: u64,
    pub checkpoint_every: usize,
    pub retry: RetryPolicy,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            item_delay_ms: 1000,
            part_delay_ms: 500,
            checkpoint_every: 50,
            retry: RetryPolicy {
                initial_delay_ms: 10000,
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AsrConfig {
    pub base_url: String,
    pub model: String,
    pub language: Option<String>,
    pub hourly_limit_secs: f64,
    pub daily_limit_secs: f64,
    pub max_duration_secs: u64,
    pub max_payload_mb: u64,
    pub fetch_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub item_delay_ms: u64,
    pub checkpoint_every: u32,
    pub failure_streak_limit: u32,
    /// Netscape cookie file handed to the downloader
    pub cookies_file: Option<PathBuf>,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "whisper-large-v3-turbo".to_string(),
            language: Some("zh".to_string()),
            hourly_limit_secs: 6000.0,
            daily_limit_secs: 25000.0,
            max_duration_secs: 1800,
            max_payload_mb: 24,
            fetch_timeout_secs: 120,
            request_timeout_secs: 300,
            item_delay_ms: 4000,
            checkpoint_every: 20,
            failure_streak_limit: 10,
            cookies_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub filter_model: String,
    pub polish_model: String,
    pub filter_timeout_secs: u64,
    pub polish_timeout_secs: u64,
    pub filter_delay_ms: u64,
    pub polish_delay_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            filter_model: "gpt-4o-mini".to_string(),
            polish_model: "gpt-4o".to_string(),
            filter_timeout_secs: 30,
            polish_timeout_secs: 300,
            filter_delay_ms: 300,
            polish_delay_ms: 2000,
            retry: RetryPolicy::default(),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct Settings {
    /// State directory
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub collect: CollectConfig,
    pub subtitles: SubtitleConfig,
    pub asr: AsrConfig,
    pub llm: LlmConfig,
}

impl Settings {
    /// Resolve from the current directory and the process environment
    pub fn load() -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        let default_home = dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(".harvest");

        Self::load_from(&cwd, std::env::var(HOME_ENV).ok(), default_home)
    }

    /// Resolve with explicit inputs
    pub fn load_from(start_dir: &Path, env_home: Option<String>, default_home: PathBuf) -> Result<Self> {
        let config_file = find_config_file(start_dir);

        let config = match &config_file {
            Some(path) => load_config_file(path)?,
            None => ConfigFile::default(),
        };

        let home = if let Some(env_home) = env_home.filter(|h| !h.is_empty()) {
            PathBuf::from(env_home)
        } else if let (Some(config_path), Some(home_path)) = (&config_file, &config.paths.home) {
            let harvest_dir = config_path.parent().unwrap_or(Path::new("."));
            resolve_path(harvest_dir, home_path)
        } else {
            default_home
        };

        Ok(Self {
            home,
            config_file,
            collect: config.collect,
            subtitles: config.subtitles,
            asr: config.asr,
            llm: config.llm,
        })
    }

    pub fn paths(&self) -> DataPaths {
        DataPaths::new(&self.home)
    }

    pub fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings {
            page_delay: Duration::from_millis(self.collect.page_delay_ms),
            bucket_delay: Duration::from_millis(self.collect.bucket_delay_ms),
            retry_delay: Duration::from_millis(self.collect.retry_delay_ms),
            max_page_retries: self.collect.max_page_retries.max(1),
            stop_threshold: self.collect.stop_threshold.max(1),
        }
    }

    pub fn quota_limits(&self) -> QuotaLimits {
        QuotaLimits {
            hourly: self.asr.hourly_limit_secs,
            daily: self.asr.daily_limit_secs,
        }
    }

    pub fn processor_settings(&self, limit: Option<usize>) -> ProcessorSettings {
        ProcessorSettings {
            max_payload_bytes: self.asr.max_payload_mb.saturating_mul(1024 * 1024),
            fetch_timeout: Duration::from_secs(self.asr.fetch_timeout_secs),
            failure_streak_limit: self.asr.failure_streak_limit.max(1),
            checkpoint_every: self.asr.checkpoint_every.max(1),
            item_delay: Duration::from_millis(self.asr.item_delay_ms),
            max_duration_secs: self.asr.max_duration_secs,
            limit,
        }
    }

    pub fn subtitle_stage(&self) -> StageSettings {
        StageSettings {
            retry: self.subtitles.retry.clone(),
            checkpoint_every: self.subtitles.checkpoint_every.max(1),
            item_delay: Duration::from_millis(self.subtitles.item_delay_ms),
        }
    }

    pub fn filter_stage(&self) -> StageSettings {
        StageSettings {
            retry: self.llm.retry.clone(),
            item_delay: Duration::from_millis(self.llm.filter_delay_ms),
            ..Default::default()
        }
    }

    pub fn polish_stage(&self) -> StageSettings {
        StageSettings {
            retry: self.llm.retry.clone(),
            item_delay: Duration::from_millis(self.llm.polish_delay_ms),
            ..Default::default()
        }
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".harvest").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    // An empty file is a valid "all defaults" config
    if content.trim().is_empty() {
        return Ok(ConfigFile::default());
    }

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}
