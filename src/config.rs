//! Configuration loader and validator for the document→relational sync.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
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
    pub source: Source,
    pub sink: Sink,
    pub entities: Vec<Entity>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Document-store API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    pub timeout_seconds: u64,
    pub batch_size: u32,
}

/// Relational sink settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sink {
    pub database_url: String,
}

/// One logical entity kept in sync between source and sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entity {
    pub name: String,
    /// Sink table; defaults to the entity name.
    #[serde(default)]
    pub table: Option<String>,
    /// Natural key column, when the entity has one. Reconciliation counts
    /// distinct keys on the sink side for keyed entities.
    #[serde(default)]
    pub natural_key: Option<String>,
    /// Fields whose array values are expanded by the flattener.
    #[serde(default)]
    pub nested_fields: Vec<String>,
}

impl Entity {
    pub fn table(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.source.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("source.base_url must be non-empty"));
    }
    if cfg.source.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("source.timeout_seconds must be > 0"));
    }
    if cfg.source.batch_size == 0 {
        return Err(ConfigError::Invalid("source.batch_size must be > 0"));
    }

    if cfg.sink.database_url.trim().is_empty() {
        return Err(ConfigError::Invalid("sink.database_url must be non-empty"));
    }

    if cfg.entities.is_empty() {
        return Err(ConfigError::Invalid("entities must list at least one entity"));
    }
    for entity in &cfg.entities {
        if entity.name.trim().is_empty() {
            return Err(ConfigError::Invalid("entities[].name must be non-empty"));
        }
        if entity.nested_fields.iter().any(|f| f.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "entities[].nested_fields entries must be non-empty",
            ));
        }
    }
    let mut names: Vec<&str> = cfg.entities.iter().map(|e| e.name.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    if names.len() != cfg.entities.len() {
        return Err(ConfigError::Invalid("entities[].name values must be unique"));
    }

    Ok(())
}

/// Example YAML configuration, kept parseable by the tests.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

source:
  base_url: "http://localhost:9200/"
  token: "YOUR_SOURCE_API_TOKEN"
  timeout_seconds: 30
  batch_size: 1000

sink:
  database_url: "sqlite://./data/booksync.db"

entities:
  - name: "books"
    table: "books"
    natural_key: "book_id"
    nested_fields:
      - "authors"
      - "tags"
  - name: "ratings"
  - name: "to_read"
"#
}
