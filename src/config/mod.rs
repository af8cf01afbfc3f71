//! Unified configuration for the geotweets binaries.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (geotweets.toml)
//! ```toml
//! [ingest]
//! database = "tweets.db"
//! pragmas = "high-throughput"
//! commit_interval = 50000
//!
//! [chunk]
//! output_dir = "chunks"
//! pattern = "{place.country_code}/{date}"
//! compress = true
//! jobs = 4
//! ```
//!
//! Environment variables use the `GEOTWEETS_` prefix and `__` between
//! section and key, e.g. `GEOTWEETS_CHUNK__PATTERN={lang}`.

mod defaults;

pub use defaults::*;

use crate::router::{RouterOptions, ShardPattern};
use crate::schema::PragmaProfile;
use crate::store::SqliteOptions;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeotweetsConfig {
    pub ingest: IngestConfig,
    pub chunk: ChunkConfig,
}

impl GeotweetsConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    pub fn load(
        config_path: Option<&Path>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(GeotweetsConfig::default()));

        if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError {
                    message: format!("config file {} not found", path.display()),
                });
            }
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("GEOTWEETS_").split("__"));
        figment = figment.merge(Serialized::defaults(overrides));

        let config: Self = figment.extract().map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment and optional config file only (no CLI overrides)
    pub fn from_env(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest.commit_interval == 0 {
            return Err(ConfigError::new("ingest.commit_interval must be at least 1"));
        }
        if self.chunk.jobs == 0 {
            return Err(ConfigError::new("chunk.jobs must be at least 1"));
        }
        self.chunk.shard_pattern().map(|_| ())
    }
}

/// Ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// SQLite database file; created when missing.
    pub database: Option<PathBuf>,
    pub pragmas: PragmaProfile,
    pub commit_interval: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database: None,
            pragmas: PragmaProfile::default(),
            commit_interval: DEFAULT_COMMIT_INTERVAL,
        }
    }
}

impl IngestConfig {
    pub fn sqlite_options(&self) -> SqliteOptions {
        SqliteOptions {
            pragmas: self.pragmas,
            commit_interval: self.commit_interval,
        }
    }
}

/// Chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    pub output_dir: PathBuf,
    pub pattern: String,
    pub compress: bool,
    pub jobs: usize,
    /// Parent of the per-job partition directories.
    pub temp_dir: PathBuf,
    pub keep_temporary_files: bool,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            pattern: DEFAULT_PATTERN.to_string(),
            compress: DEFAULT_COMPRESS,
            jobs: DEFAULT_JOBS,
            temp_dir: PathBuf::from(DEFAULT_TEMP_DIR),
            keep_temporary_files: false,
        }
    }
}

impl ChunkConfig {
    pub fn shard_pattern(&self) -> Result<ShardPattern, ConfigError> {
        ShardPattern::parse(&self.pattern).map_err(|err| ConfigError::new(err.to_string()))
    }

    pub fn router_options(&self) -> Result<RouterOptions, ConfigError> {
        Ok(RouterOptions {
            output_dir: self.output_dir.clone(),
            pattern: self.shard_pattern()?,
            compress: self.compress,
        })
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingest: Option<IngestOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<ChunkOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pragmas: Option<PragmaProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_interval: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compress: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_temporary_files: Option<bool>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}
