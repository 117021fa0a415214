use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    if config.work_directory.trim().is_empty() || config.data_directory.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "work_directory and data_directory must not be empty".to_string(),
        });
    }

    let v = &config.validation;
    if !(v.low_threshold > 0.0 && v.low_threshold <= v.high_threshold && v.high_threshold <= 1.0)
    {
        return Err(ConfigError::Validation {
            message: format!(
                "Validation thresholds must satisfy 0 < low <= high <= 1 (low={}, high={})",
                v.low_threshold, v.high_threshold
            ),
        });
    }

    if v.tie_epsilon < 0.0 {
        return Err(ConfigError::Validation {
            message: "tie_epsilon must not be negative".to_string(),
        });
    }

    if !config.renderer.session_enabled && config.renderer.soffice_path.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "No render strategy available: session disabled and soffice_path empty"
                .to_string(),
        });
    }

    Ok(())
}
