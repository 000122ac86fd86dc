//! Runtime configuration.
//!
//! Sources, later wins: built-in defaults, an optional TOML file, then
//! `RELCRM_*` environment variables (a `.env` file is loaded first when
//! present).
//!
//! # Invariants
//! - The encryption key is held as a `SecretString` and never formatted
//!   into errors or logs.
//! - Every numeric tunable is range-checked before use.

use crate::codec::{CodecError, FieldCodec};
use crate::db::DEFAULT_LOCK_WAIT;
use crate::logging::{default_log_level, LoggingOptions};
use crate::service::duplicates::{
    ScanOptions, DEFAULT_BLOCKING_THRESHOLD, DEFAULT_MAX_SCAN_CANDIDATES, DEFAULT_SCAN_PAGE_SIZE,
};
use crate::service::similarity::{ScorerConfig, DEFAULT_LEGAL_SUFFIXES, DEFAULT_NAME_THRESHOLD};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const ENV_PREFIX: &str = "RELCRM_";
const MAX_LOCK_WAIT_MS: u64 = 10 * 60 * 1000;
const MAX_SCAN_PAGE_SIZE: u32 = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid `{field}`: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
    #[error("encryption key is not configured (set RELCRM_ENCRYPTION_KEY)")]
    MissingKey,
    #[error("invalid encryption key: {0}")]
    Key(CodecError),
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            message: message.into(),
        }
    }
}

/// File layout; every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    database_path: Option<PathBuf>,
    log_level: Option<String>,
    log_dir: Option<PathBuf>,
    log_to_stderr: Option<bool>,
    encryption_key: Option<String>,
    lock_wait_ms: Option<u64>,
    scan_page_size: Option<u32>,
    max_scan_candidates: Option<usize>,
    blocking_threshold: Option<usize>,
    name_similarity_threshold: Option<f64>,
    legal_suffixes: Option<Vec<String>>,
    bind_address: Option<String>,
}

#[derive(Debug)]
pub struct CrmConfig {
    pub database_path: PathBuf,
    pub log_level: String,
    pub log_dir: PathBuf,
    pub log_to_stderr: bool,
    pub encryption_key: Option<SecretString>,
    pub lock_wait_ms: u64,
    pub scan_page_size: u32,
    pub max_scan_candidates: usize,
    pub blocking_threshold: usize,
    pub name_similarity_threshold: f64,
    pub legal_suffixes: Vec<String>,
    pub bind_address: String,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("relcrm.sqlite3"),
            log_level: default_log_level().to_string(),
            log_dir: PathBuf::from("logs"),
            log_to_stderr: false,
            encryption_key: None,
            lock_wait_ms: u64::try_from(DEFAULT_LOCK_WAIT.as_millis()).unwrap_or(5_000),
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
            max_scan_candidates: DEFAULT_MAX_SCAN_CANDIDATES,
            blocking_threshold: DEFAULT_BLOCKING_THRESHOLD,
            name_similarity_threshold: DEFAULT_NAME_THRESHOLD,
            legal_suffixes: DEFAULT_LEGAL_SUFFIXES
                .iter()
                .map(|suffix| suffix.to_string())
                .collect(),
            bind_address: "127.0.0.1:8080".to_string(),
        }
    }
}

impl CrmConfig {
    /// Loads `.env`, the optional file at `path`, then process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let file_text = match path {
            Some(path) => Some(std::fs::read_to_string(path).map_err(|source| {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            })?),
            None => None,
        };
        Self::from_sources(file_text.as_deref(), |name| std::env::var(name).ok())
    }

    /// Builds a config from file text and an environment lookup.
    pub fn from_sources(
        file_text: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(text) = file_text {
            let file: FileConfig = toml::from_str(text)?;
            config.apply_file(file);
        }
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(value) = file.database_path {
            self.database_path = value;
        }
        if let Some(value) = file.log_level {
            self.log_level = value;
        }
        if let Some(value) = file.log_dir {
            self.log_dir = value;
        }
        if let Some(value) = file.log_to_stderr {
            self.log_to_stderr = value;
        }
        if let Some(value) = file.encryption_key {
            self.encryption_key = Some(SecretString::from(value));
        }
        if let Some(value) = file.lock_wait_ms {
            self.lock_wait_ms = value;
        }
        if let Some(value) = file.scan_page_size {
            self.scan_page_size = value;
        }
        if let Some(value) = file.max_scan_candidates {
            self.max_scan_candidates = value;
        }
        if let Some(value) = file.blocking_threshold {
            self.blocking_threshold = value;
        }
        if let Some(value) = file.name_similarity_threshold {
            self.name_similarity_threshold = value;
        }
        if let Some(value) = file.legal_suffixes {
            self.legal_suffixes = value;
        }
        if let Some(value) = file.bind_address {
            self.bind_address = value;
        }
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let var = |name: &str| {
            env(&format!("{ENV_PREFIX}{name}")).filter(|value| !value.trim().is_empty())
        };

        if let Some(value) = var("DATABASE_PATH") {
            self.database_path = PathBuf::from(value);
        }
        if let Some(value) = var("LOG_LEVEL") {
            self.log_level = value;
        }
        if let Some(value) = var("LOG_DIR") {
            self.log_dir = PathBuf::from(value);
        }
        if let Some(value) = var("LOG_TO_STDERR") {
            self.log_to_stderr = parse_bool("log_to_stderr", &value)?;
        }
        if let Some(value) = var("ENCRYPTION_KEY") {
            self.encryption_key = Some(SecretString::from(value));
        }
        if let Some(value) = var("LOCK_WAIT_MS") {
            self.lock_wait_ms = parse_number("lock_wait_ms", &value)?;
        }
        if let Some(value) = var("SCAN_PAGE_SIZE") {
            self.scan_page_size = parse_number("scan_page_size", &value)?;
        }
        if let Some(value) = var("MAX_SCAN_CANDIDATES") {
            self.max_scan_candidates = parse_number("max_scan_candidates", &value)?;
        }
        if let Some(value) = var("BLOCKING_THRESHOLD") {
            self.blocking_threshold = parse_number("blocking_threshold", &value)?;
        }
        if let Some(value) = var("NAME_SIMILARITY_THRESHOLD") {
            self.name_similarity_threshold = parse_number("name_similarity_threshold", &value)?;
        }
        if let Some(value) = var("LEGAL_SUFFIXES") {
            self.legal_suffixes = value
                .split(',')
                .map(|suffix| suffix.trim().to_lowercase())
                .filter(|suffix| !suffix.is_empty())
                .collect();
        }
        if let Some(value) = var("BIND_ADDRESS") {
            self.bind_address = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("database_path", "must not be empty"));
        }
        if self.lock_wait_ms == 0 || self.lock_wait_ms > MAX_LOCK_WAIT_MS {
            return Err(ConfigError::invalid(
                "lock_wait_ms",
                format!("must be within 1..={MAX_LOCK_WAIT_MS}"),
            ));
        }
        if self.scan_page_size == 0 || self.scan_page_size > MAX_SCAN_PAGE_SIZE {
            return Err(ConfigError::invalid(
                "scan_page_size",
                format!("must be within 1..={MAX_SCAN_PAGE_SIZE}"),
            ));
        }
        if self.max_scan_candidates == 0 {
            return Err(ConfigError::invalid("max_scan_candidates", "must be positive"));
        }
        if !(self.name_similarity_threshold > 0.0 && self.name_similarity_threshold <= 1.0) {
            return Err(ConfigError::invalid(
                "name_similarity_threshold",
                "must be within (0, 1]",
            ));
        }
        if self.bind_address.trim().is_empty() {
            return Err(ConfigError::invalid("bind_address", "must not be empty"));
        }
        Ok(())
    }

    /// Builds the field codec; fails when no key is configured.
    pub fn build_codec(&self) -> Result<FieldCodec, ConfigError> {
        let key = self.encryption_key.as_ref().ok_or(ConfigError::MissingKey)?;
        FieldCodec::from_base64_key(key).map_err(ConfigError::Key)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    pub fn scorer_config(&self) -> ScorerConfig {
        ScorerConfig {
            name_threshold: self.name_similarity_threshold,
            legal_suffixes: self.legal_suffixes.clone(),
        }
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            page_size: self.scan_page_size,
            max_candidates: self.max_scan_candidates,
            blocking_threshold: self.blocking_threshold,
        }
    }

    /// Logging options with `log_dir` resolved against the working directory.
    pub fn logging_options(&self) -> Result<LoggingOptions, ConfigError> {
        let log_dir = if self.log_dir.is_absolute() {
            self.log_dir.clone()
        } else {
            std::env::current_dir()
                .map_err(|err| ConfigError::invalid("log_dir", err.to_string()))?
                .join(&self.log_dir)
        };
        Ok(LoggingOptions {
            level: self.log_level.clone(),
            log_dir,
            to_stderr: self.log_to_stderr,
        })
    }
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::invalid(field, format!("expected a boolean, got `{other}`"))),
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err: T::Err| ConfigError::invalid(field, format!("`{}`: {err}", value.trim())))
}
