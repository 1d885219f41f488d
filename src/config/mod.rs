//! Configuration management for ragdesk
//!
//! Settings are read from a TOML file, then `RAGDESK_SECTION__KEY`
//! environment variables are applied on top, then the result is validated.

use crate::error::{RagError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Schema version written by `config init`
pub const SCHEMA_VERSION: &str = "1.0.0";

const ENV_PREFIX: &str = "RAGDESK_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub maintenance: MaintenanceConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of all persisted state; collections live in `collections/`
    pub data_dir: PathBuf,
    /// Idle collections kept open before the least recently used is closed
    #[serde(default = "default_max_open_collections")]
    pub max_open_collections: usize,
}

fn default_max_open_collections() -> usize {
    crate::index::DEFAULT_MAX_OPEN_COLLECTIONS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Window length in characters
    pub chunk_size: usize,
    /// Characters shared by consecutive windows
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: String, // "fastembed" or "hashing"
    pub model: String,
    /// Output dimension; only used by the hashing provider
    pub dimension: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

/// Answer generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub enabled: bool,
    /// OpenAI-compatible chat completions URL
    pub endpoint: String,
    pub api_key_env: String,
    pub model: String,
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

/// Background maintenance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Chat messages older than this are removed by the retention sweep
    pub chat_retention_minutes: u64,
    pub interval_secs: u64,
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.chat_retention_minutes as i64)
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RagError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RagError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: RAGDESK_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply `(name, value)` overrides; names without the prefix are ignored
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix(ENV_PREFIX) {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            "STORAGE__MAX_OPEN_COLLECTIONS" => {
                self.storage.max_open_collections = parse_value(path, value)?
            }
            "CHUNKING__CHUNK_SIZE" => self.chunking.chunk_size = parse_value(path, value)?,
            "CHUNKING__CHUNK_OVERLAP" => self.chunking.chunk_overlap = parse_value(path, value)?,
            "RETRIEVAL__TOP_K" => self.retrieval.top_k = parse_value(path, value)?,
            "EMBEDDING__PROVIDER" => self.embedding.provider = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__DIMENSION" => self.embedding.dimension = parse_value(path, value)?,
            "EMBEDDING__BATCH_SIZE" => self.embedding.batch_size = parse_value(path, value)?,
            "EMBEDDING__TIMEOUT_SECS" => self.embedding.timeout_secs = parse_value(path, value)?,
            "GENERATION__ENABLED" => self.generation.enabled = parse_value(path, value)?,
            "GENERATION__ENDPOINT" => self.generation.endpoint = value.to_string(),
            "GENERATION__API_KEY_ENV" => self.generation.api_key_env = value.to_string(),
            "GENERATION__MODEL" => self.generation.model = value.to_string(),
            "GENERATION__MAX_NEW_TOKENS" => {
                self.generation.max_new_tokens = parse_value(path, value)?
            }
            "GENERATION__TEMPERATURE" => self.generation.temperature = parse_value(path, value)?,
            "GENERATION__TIMEOUT_SECS" => self.generation.timeout_secs = parse_value(path, value)?,
            "MAINTENANCE__CHAT_RETENTION_MINUTES" => {
                self.maintenance.chat_retention_minutes = parse_value(path, value)?
            }
            "MAINTENANCE__INTERVAL_SECS" => {
                self.maintenance.interval_secs = parse_value(path, value)?
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Directory holding every owner's collection
    pub fn collections_dir(&self) -> PathBuf {
        expand_path(&self.storage.data_dir).join("collections")
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            RagError::InvalidConfiguration("Cannot determine config directory".to_string())
        })?;

        Ok(config_dir.join("ragdesk").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir().ok_or_else(|| {
            RagError::InvalidConfiguration("Cannot determine home directory".to_string())
        })?;

        Ok(home_dir.join(".ragdesk"))
    }
}

fn parse_value<T: FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| RagError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.ragdesk"),
                max_open_collections: default_max_open_collections(),
            },
            chunking: ChunkingConfig {
                chunk_size: crate::chunking::DEFAULT_CHUNK_SIZE,
                chunk_overlap: crate::chunking::DEFAULT_CHUNK_OVERLAP,
            },
            retrieval: RetrievalConfig {
                top_k: crate::retrieval::DEFAULT_TOP_K,
            },
            embedding: EmbeddingConfig {
                provider: "fastembed".to_string(),
                model: "all-MiniLM-L6-v2".to_string(),
                dimension: 384,
                batch_size: 32,
                timeout_secs: 60,
            },
            generation: GenerationConfig {
                enabled: true,
                endpoint: "https://router.huggingface.co/v1/chat/completions".to_string(),
                api_key_env: "HF_TOKEN".to_string(),
                model: "meta-llama/Llama-3.1-8B-Instruct".to_string(),
                max_new_tokens: 200,
                temperature: 0.5,
                timeout_secs: 60,
            },
            maintenance: MaintenanceConfig {
                chat_retention_minutes: 1,
                interval_secs: 60,
            },
        }
    }
}
