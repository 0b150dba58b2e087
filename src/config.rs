//! Configuration loader and validator for the document assembly service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub cache: Cache,
    pub workers: Workers,
    pub timeouts: Timeouts,
    pub retry: Retry,
    pub catalog: CatalogSource,
    pub converters: Converters,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct App {
    /// Shared output store; rendered files land here as `{key}.{ext}`.
    pub output_dir: String,
    /// Scratch space and on-disk asset cache.
    pub working_dir: String,
    /// Fraction of unavailable resources above which a job fails right after
    /// lookup. `1.0` fails only when nothing resolves.
    #[serde(default = "default_unavailable_ratio")]
    pub max_unavailable_ratio: f64,
    /// How long a finished job stays pollable before it is forgotten.
    #[serde(default = "default_job_retention")]
    pub job_retention_seconds: u64,
}

fn default_unavailable_ratio() -> f64 {
    1.0
}

fn default_job_retention() -> u64 {
    3600
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cache {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workers {
    pub fetch_concurrency: usize,
    pub job_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timeouts {
    pub fetch_seconds: u64,
    pub convert_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Retry {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

/// Where the resource catalog comes from. Exactly one of `path`/`url`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogSource {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Converters {
    pub pdf: ConverterCommand,
    pub epub: ConverterCommand,
    pub docx: ConverterCommand,
    #[serde(default = "default_convert_attempts")]
    pub max_attempts: u32,
}

fn default_convert_attempts() -> u32 {
    2
}

/// External program invocation. `{input}` and `{output}` in `args` are
/// replaced with the HTML source and the target file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConverterCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Config {
    /// Ensure required directories exist (creates output and working dirs).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.app.output_dir)?;
        fs::create_dir_all(&self.app.working_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.app.output_dir)
    }

    pub fn working_dir(&self) -> PathBuf {
        PathBuf::from(&self.app.working_dir)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.fetch_seconds)
    }

    pub fn convert_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.convert_seconds)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.app.job_retention_seconds)
    }

    /// Apply environment overrides: `OUTPUT_DIR`, `WORKING_DIR`,
    /// `ASSET_CACHING_ENABLED`, `CATALOG_URL`.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, get: F) {
        if let Some(v) = get("OUTPUT_DIR").filter(|v| !v.trim().is_empty()) {
            self.app.output_dir = v;
        }
        if let Some(v) = get("WORKING_DIR").filter(|v| !v.trim().is_empty()) {
            self.app.working_dir = v;
        }
        if let Some(v) = get("ASSET_CACHING_ENABLED") {
            match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.cache.enabled = true,
                "0" | "false" | "no" | "off" => self.cache.enabled = false,
                _ => {}
            }
        }
        if let Some(v) = get("CATALOG_URL").filter(|v| !v.trim().is_empty()) {
            self.catalog.url = Some(v);
            self.catalog.path = None;
        }
    }
}

/// Load configuration from a YAML file, apply environment overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env();
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.output_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.output_dir must be non-empty"));
    }
    if cfg.app.working_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.working_dir must be non-empty"));
    }
    if !(0.0..=1.0).contains(&cfg.app.max_unavailable_ratio) {
        return Err(ConfigError::Invalid(
            "app.max_unavailable_ratio must be within 0.0..=1.0",
        ));
    }

    if cfg.workers.fetch_concurrency == 0 {
        return Err(ConfigError::Invalid("workers.fetch_concurrency must be > 0"));
    }
    if cfg.workers.job_concurrency == 0 {
        return Err(ConfigError::Invalid("workers.job_concurrency must be > 0"));
    }

    if cfg.timeouts.fetch_seconds == 0 {
        return Err(ConfigError::Invalid("timeouts.fetch_seconds must be > 0"));
    }
    if cfg.timeouts.convert_seconds == 0 {
        return Err(ConfigError::Invalid("timeouts.convert_seconds must be > 0"));
    }

    if cfg.retry.max_attempts == 0 {
        return Err(ConfigError::Invalid("retry.max_attempts must be > 0"));
    }
    if cfg.retry.max_backoff_ms < cfg.retry.base_backoff_ms {
        return Err(ConfigError::Invalid(
            "retry.max_backoff_ms must be >= retry.base_backoff_ms",
        ));
    }

    let has_path = cfg.catalog.path.as_deref().is_some_and(|p| !p.trim().is_empty());
    let has_url = cfg.catalog.url.as_deref().is_some_and(|u| !u.trim().is_empty());
    if has_path == has_url {
        return Err(ConfigError::Invalid(
            "exactly one of catalog.path or catalog.url must be set",
        ));
    }

    for (cmd, msg) in [
        (&cfg.converters.pdf, "converters.pdf.program must be non-empty"),
        (&cfg.converters.epub, "converters.epub.program must be non-empty"),
        (&cfg.converters.docx, "converters.docx.program must be non-empty"),
    ] {
        if cmd.program.trim().is_empty() {
            return Err(ConfigError::Invalid(msg));
        }
    }
    if cfg.converters.max_attempts == 0 {
        return Err(ConfigError::Invalid("converters.max_attempts must be > 0"));
    }

    Ok(())
}

/// Returns a complete example configuration.
pub fn example() -> &'static str {
    r#"app:
  output_dir: "./output"
  working_dir: "./working"
  max_unavailable_ratio: 1.0
  job_retention_seconds: 3600

cache:
  enabled: true

workers:
  fetch_concurrency: 8
  job_concurrency: 4

timeouts:
  fetch_seconds: 120
  convert_seconds: 600

retry:
  max_attempts: 3
  base_backoff_ms: 500
  max_backoff_ms: 8000

catalog:
  path: "./catalog.json"

converters:
  max_attempts: 2
  pdf:
    program: "wkhtmltopdf"
    args: ["--enable-internal-links", "--keep-relative-links", "{input}", "{output}"]
  epub:
    program: "ebook-convert"
    args: ["{input}", "{output}"]
  docx:
    program: "pandoc"
    args: ["{input}", "-o", "{output}"]
"#
}
