//! Configuration management for Pieceflow
//!
//! Loads configuration from `pieceflow.config.json` (or `.yaml`), applies
//! environment overrides and validates the result. A missing file yields the
//! defaults.

use crate::constants::{
    CONFIG_FILE_NAME, DEFAULT_MIGRATION_BATCH_SIZE, DEFAULT_PIECES_TIMEOUT_SECS,
    DEFAULT_POLLING_CRON, DEFAULT_SQLITE_DSN, DEFAULT_TIMEZONE, DEFAULT_WEBHOOK_BASE_URL,
    ENV_LOG_LEVEL, ENV_PIECES_URL, ENV_STORAGE_DRIVER, ENV_STORAGE_DSN,
};
use crate::{PieceFlowError, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::fs;
use std::path::Path;

/// Complete Pieceflow configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub pieces: PiecesConfig,

    #[serde(default)]
    pub triggers: TriggersConfig,

    #[serde(default)]
    pub migrations: MigrationsConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Driver name (sqlite, memory)
    pub driver: String,

    /// Data source name; a file path or `:memory:` for sqlite
    #[serde(default)]
    pub dsn: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            driver: "sqlite".to_string(),
            dsn: DEFAULT_SQLITE_DSN.to_string(),
        }
    }
}

/// Where piece metadata comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PiecesConfig {
    /// memory, file or remote
    #[serde(default = "default_pieces_source")]
    pub source: String,

    /// JSON/YAML file of piece metadata (`file` source)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Base URL of the piece registry (`remote` source)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_pieces_timeout")]
    pub timeout_secs: u64,
}

impl Default for PiecesConfig {
    fn default() -> Self {
        Self {
            source: default_pieces_source(),
            path: None,
            url: None,
            timeout_secs: default_pieces_timeout(),
        }
    }
}

/// Trigger scheduling defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggersConfig {
    #[serde(default = "default_polling_cron")]
    pub polling_cron_expression: String,

    #[serde(default = "default_timezone")]
    pub polling_timezone: String,

    #[serde(default = "default_webhook_base_url")]
    pub webhook_base_url: String,
}

impl Default for TriggersConfig {
    fn default() -> Self {
        Self {
            polling_cron_expression: default_polling_cron(),
            polling_timezone: default_timezone(),
            webhook_base_url: default_webhook_base_url(),
        }
    }
}

/// Job backfill settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationsConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level or filter directive (debug, info, pieceflow=trace, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// text (default) or json
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl LogConfig {
    pub fn is_json(&self) -> bool {
        self.format.as_deref() == Some("json")
    }
}

fn default_pieces_source() -> String {
    "memory".to_string()
}

fn default_pieces_timeout() -> u64 {
    DEFAULT_PIECES_TIMEOUT_SECS
}

fn default_polling_cron() -> String {
    DEFAULT_POLLING_CRON.to_string()
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_webhook_base_url() -> String {
    DEFAULT_WEBHOOK_BASE_URL.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_MIGRATION_BATCH_SIZE
}

impl Config {
    /// Load `pieceflow.config.json` from the working directory
    pub fn load() -> Result<Self> {
        Self::load_from_path(CONFIG_FILE_NAME)
    }

    /// Load configuration from a specific path
    ///
    /// `.yaml`/`.yml` files are parsed as YAML, everything else as JSON.
    /// Both are checked against the config schema before deserializing.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let raw: Value = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(|e| {
                PieceFlowError::config(format!("Failed to parse YAML config: {}", e))
            })?,
            _ => serde_json::from_str(&content).map_err(|e| {
                PieceFlowError::config(format!("Failed to parse JSON config: {}", e))
            })?,
        };

        validate_config(&raw)?;
        let config: Config = serde_json::from_value(raw)
            .map_err(|e| PieceFlowError::config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration, as YAML for `.yaml`/`.yml` paths and JSON otherwise
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let content = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::to_string(self)?,
            _ => serde_json::to_string_pretty(self)?,
        };
        fs::write(path, content)?;
        Ok(())
    }

    /// Apply `PIECEFLOW_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(driver) = lookup(ENV_STORAGE_DRIVER) {
            self.storage.driver = driver;
        }
        if let Some(dsn) = lookup(ENV_STORAGE_DSN) {
            self.storage.dsn = dsn;
        }
        if let Some(url) = lookup(ENV_PIECES_URL) {
            self.pieces.source = "remote".to_string();
            self.pieces.url = Some(url);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log.level = Some(level);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match self.storage.driver.as_str() {
            "memory" => {}
            "sqlite" => {
                if self.storage.dsn.is_empty() {
                    return Err(PieceFlowError::config(
                        "storage.dsn is required for the sqlite driver",
                    ));
                }
            }
            other => {
                return Err(PieceFlowError::config(format!(
                    "Unsupported storage driver: '{}'. Supported: sqlite, memory",
                    other
                )));
            }
        }

        match self.pieces.source.as_str() {
            "memory" => {}
            "file" => {
                if self.pieces.path.as_deref().is_none_or(str::is_empty) {
                    return Err(PieceFlowError::config(
                        "pieces.path is required when using the file source",
                    ));
                }
            }
            "remote" => {
                let url = self.pieces.url.as_deref().unwrap_or_default();
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(PieceFlowError::config(format!(
                        "pieces.url '{}' must start with http:// or https://",
                        url
                    )));
                }
            }
            other => {
                return Err(PieceFlowError::config(format!(
                    "Unsupported pieces source: '{}'. Supported: memory, file, remote",
                    other
                )));
            }
        }
        if self.pieces.timeout_secs == 0 {
            return Err(PieceFlowError::config(
                "pieces.timeoutSecs must be greater than 0",
            ));
        }

        crate::trigger::parse_cron(&self.triggers.polling_cron_expression).map_err(|e| {
            PieceFlowError::config(format!("triggers.pollingCronExpression: {}", e))
        })?;
        if self.triggers.polling_timezone.trim().is_empty() {
            return Err(PieceFlowError::config(
                "triggers.pollingTimezone cannot be empty",
            ));
        }
        let base = &self.triggers.webhook_base_url;
        if !base.starts_with("http://") && !base.starts_with("https://") {
            return Err(PieceFlowError::config(format!(
                "Invalid triggers.webhookBaseUrl '{}': must start with http:// or https://",
                base
            )));
        }

        if self.migrations.batch_size == 0 {
            return Err(PieceFlowError::config(
                "migrations.batchSize must be greater than 0",
            ));
        }

        if let Some(format) = self.log.format.as_deref()
            && !matches!(format, "text" | "json")
        {
            return Err(PieceFlowError::config(format!(
                "Unsupported log format: '{}'. Supported: text, json",
                format
            )));
        }

        Ok(())
    }
}

static CONFIG_SCHEMA: Lazy<jsonschema::Validator> = Lazy::new(|| {
    let schema_json = serde_json::json!({
        "type": "object",
        "properties": {
            "storage": {
                "type": "object",
                "required": ["driver"],
                "properties": {
                    "driver": {"type": "string", "minLength": 1},
                    "dsn": {"type": "string"}
                }
            },
            "pieces": {
                "type": "object",
                "properties": {
                    "source": {"enum": ["memory", "file", "remote"]},
                    "path": {"type": "string"},
                    "url": {"type": "string"},
                    "timeoutSecs": {"type": "integer", "minimum": 1}
                }
            },
            "triggers": {
                "type": "object",
                "properties": {
                    "pollingCronExpression": {"type": "string", "minLength": 1},
                    "pollingTimezone": {"type": "string", "minLength": 1},
                    "webhookBaseUrl": {"type": "string", "minLength": 1}
                }
            },
            "migrations": {
                "type": "object",
                "properties": {
                    "batchSize": {"type": "integer", "minimum": 1}
                }
            },
            "log": {
                "type": "object",
                "properties": {
                    "level": {"type": "string"},
                    "format": {"enum": ["text", "json"]}
                }
            }
        }
    });

    jsonschema::validator_for(&schema_json).expect("Failed to compile config schema")
});

/// Validate a raw configuration document against the config schema
pub fn validate_config(raw: &Value) -> Result<()> {
    if !CONFIG_SCHEMA.is_valid(raw) {
        let error_messages: Vec<String> = CONFIG_SCHEMA
            .iter_errors(raw)
            .map(|e| format!("{}: {}", e.instance_path, e))
            .collect();

        return Err(PieceFlowError::config(format!(
            "Config validation failed:\n  - {}",
            error_messages.join("\n  - ")
        )));
    }
    Ok(())
}
