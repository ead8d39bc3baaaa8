//! Configuration structures for vecbulk.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags.

use crate::chunk::BulkFileType;
use crate::schema::{CollectionSchema, FieldSpec, FunctionSpec};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Local writer configuration
    #[serde(default)]
    pub writer: WriterConfig,

    /// Stage upload configuration; absent for local-only writes
    #[serde(default)]
    pub remote: Option<RemoteConfig>,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// Collection schema
    pub schema: SchemaConfig,
}

/// Chunk buffering configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WriterConfig {
    /// Root directory for temporary chunk files
    #[serde(default = "default_local_path")]
    pub local_path: PathBuf,

    /// Buffered bytes that trigger a flush once exceeded
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: usize,

    /// Chunk file format
    #[serde(default)]
    pub file_type: BulkFileType,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            local_path: default_local_path(),
            chunk_size_bytes: default_chunk_size_bytes(),
            file_type: BulkFileType::default(),
        }
    }
}

/// Stage upload configuration.
#[derive(Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    /// Control plane base URL
    pub endpoint: String,

    /// API key sent as a bearer token
    pub api_key: String,

    /// Stage to upload into
    pub stage_name: String,

    /// Path within the stage; each writer adds its own subdirectory
    #[serde(default)]
    pub remote_path: String,

    /// Maximum concurrent PUTs
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Attempts per file, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// HTTP request timeout for the control plane
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("stage_name", &self.stage_name)
            .field("remote_path", &self.remote_path)
            .field("concurrency", &self.concurrency)
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

/// Collection schema as declared in configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchemaConfig {
    /// Fields in order
    pub fields: Vec<FieldSpec>,

    /// Fold undeclared keys into `$meta`
    #[serde(default)]
    pub enable_dynamic_field: bool,

    /// Server-side functions
    #[serde(default)]
    pub functions: Vec<FunctionSpec>,
}

impl SchemaConfig {
    /// Build and check the collection schema.
    pub fn build(&self) -> crate::Result<CollectionSchema> {
        Ok(CollectionSchema::new(
            self.fields.clone(),
            self.enable_dynamic_field,
            self.functions.clone(),
        )?)
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Plain text format (default)
    #[default]
    Text,
}

// Default value functions
fn default_local_path() -> PathBuf {
    PathBuf::from("./bulk_writer")
}
fn default_chunk_size_bytes() -> usize {
    128 * 1024 * 1024
}
fn default_concurrency() -> usize {
    crate::upload::DEFAULT_CONCURRENCY
}
fn default_max_attempts() -> u32 {
    crate::upload::DEFAULT_MAX_ATTEMPTS
}
fn default_retry_delay_ms() -> u64 {
    crate::upload::DEFAULT_RETRY_DELAY.as_millis() as u64
}
fn default_request_timeout_seconds() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.writer.chunk_size_bytes == 0 {
            return Err(crate::Error::Config(
                "chunk_size_bytes must be greater than zero".into(),
            ));
        }

        if self.writer.local_path.as_os_str().is_empty() {
            return Err(crate::Error::Config("local_path is required".into()));
        }

        if self.writer.chunk_size_bytes < 1024 * 1024 {
            tracing::warn!(
                chunk_size_bytes = self.writer.chunk_size_bytes,
                "Small chunk size will produce many files"
            );
        }

        if let Some(remote) = &self.remote {
            if remote.endpoint.is_empty() {
                return Err(crate::Error::Config("Remote endpoint is required".into()));
            }
            if remote.api_key.is_empty() {
                return Err(crate::Error::Config("Remote api_key is required".into()));
            }
            if remote.stage_name.is_empty() {
                return Err(crate::Error::Config("Stage name is required".into()));
            }
            if remote.concurrency == 0 {
                return Err(crate::Error::Config(
                    "Upload concurrency must be at least 1".into(),
                ));
            }
            if remote.max_attempts == 0 {
                return Err(crate::Error::Config(
                    "max_attempts must be at least 1".into(),
                ));
            }
        }

        self.schema.build()?;
        Ok(())
    }
}
