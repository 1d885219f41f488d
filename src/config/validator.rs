use crate::config::{Config, SCHEMA_VERSION};
use crate::error::{RagError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem found
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_generation(config, &mut errors);
        Self::validate_maintenance(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RagError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }
        if config.storage.max_open_collections == 0 {
            errors.push(ValidationError::new(
                "storage.max_open_collections",
                "At least one collection must be allowed open",
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        let chunking = &config.chunking;
        if chunking.chunk_size == 0 {
            errors.push(ValidationError::new(
                "chunking.chunk_size",
                "Chunk size must be greater than 0",
            ));
        } else if chunking.chunk_overlap >= chunking.chunk_size {
            errors.push(ValidationError::new(
                "chunking.chunk_overlap",
                format!(
                    "Overlap ({}) must be smaller than chunk size ({})",
                    chunking.chunk_overlap, chunking.chunk_size
                ),
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.retrieval.top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k",
                "top_k must be greater than 0",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let provider = config.embedding.provider.as_str();
        let valid_providers = ["fastembed", "hashing"];
        if !valid_providers.contains(&provider) {
            errors.push(ValidationError::new(
                "embedding.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    valid_providers, provider
                ),
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Dimension must be greater than 0",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "embedding.timeout_secs",
                "Timeout must be greater than 0",
            ));
        }
    }

    fn validate_generation(config: &Config, errors: &mut Vec<ValidationError>) {
        let generation = &config.generation;

        let temp = generation.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "generation.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        if generation.max_new_tokens == 0 {
            errors.push(ValidationError::new(
                "generation.max_new_tokens",
                "max_new_tokens must be greater than 0",
            ));
        }

        if generation.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "generation.timeout_secs",
                "Timeout must be greater than 0",
            ));
        }

        if generation.enabled {
            if !(generation.endpoint.starts_with("http://")
                || generation.endpoint.starts_with("https://"))
            {
                errors.push(ValidationError::new(
                    "generation.endpoint",
                    format!("Endpoint must be an http(s) URL, got '{}'", generation.endpoint),
                ));
            }
            if generation.api_key_env.is_empty() {
                errors.push(ValidationError::new(
                    "generation.api_key_env",
                    "API key variable name cannot be empty",
                ));
            }
            if generation.model.is_empty() {
                errors.push(ValidationError::new(
                    "generation.model",
                    "Model name cannot be empty",
                ));
            }
        }
    }

    fn validate_maintenance(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.maintenance.interval_secs == 0 {
            errors.push(ValidationError::new(
                "maintenance.interval_secs",
                "Sweep interval must be greater than 0",
            ));
        }
    }
}
