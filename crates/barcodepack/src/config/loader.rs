use std::path::Path;

use crate::config::schema::{CompressionMode, Config};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

/// Parses and validates a config document, then applies `BARCODES_*`
/// environment overrides from the process environment.
pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    load_config_with_env(content, |name| std::env::var(name).ok())
}

pub fn load_config_with_env<F>(content: &str, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let mut config: Config = serde_json::from_value(json_value)?;

    apply_env_overrides(&mut config, lookup)?;

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

/// Applies deployment overrides on top of the file configuration.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("BARCODES_OUTPUT_DIR") {
        config.output_directory = v;
    }
    if let Some(v) = lookup("BARCODES_CHUNK_SIZE") {
        config.chunk_size = parse_number("BARCODES_CHUNK_SIZE", &v)?;
    }
    if let Some(v) = lookup("BARCODES_MAKE_PDF") {
        config.enable_pdf = parse_bool("BARCODES_MAKE_PDF", &v)?;
    }
    if let Some(v) = lookup("BARCODES_MAKE_EPS") {
        config.enable_eps = parse_bool("BARCODES_MAKE_EPS", &v)?;
    }
    if let Some(v) = lookup("BARCODES_MAKE_EAN13") {
        config.make_ean13 = parse_bool("BARCODES_MAKE_EAN13", &v)?;
    }
    if let Some(v) = lookup("BARCODES_ZIP_COMPRESSION") {
        config.archive.compression = match v.trim().to_ascii_lowercase().as_str() {
            "store" | "copy" => CompressionMode::Store,
            "deflate" => CompressionMode::Deflate,
            _ => {
                return Err(ConfigError::EnvOverride {
                    name: "BARCODES_ZIP_COMPRESSION".to_string(),
                    value: v,
                    reason: "expected 'store' or 'deflate'".to_string(),
                })
            }
        };
    }
    if let Some(v) = lookup("BARCODES_ZIP_LEVEL") {
        config.archive.level = parse_number("BARCODES_ZIP_LEVEL", &v)?;
    }
    if let Some(v) = lookup("BARCODES_ARCHIVE_CACHE_DAYS") {
        config.archive.cache_days = parse_number("BARCODES_ARCHIVE_CACHE_DAYS", &v)?;
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::EnvOverride {
            name: name.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::EnvOverride {
            name: name.to_string(),
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.output_directory.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "output_directory must not be empty".to_string(),
        });
    }

    if config.chunk_size == 0 {
        return Err(ConfigError::Validation {
            message: "chunk_size must be greater than zero".to_string(),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be greater than zero".to_string(),
        });
    }

    if config.archive.level > 9 {
        return Err(ConfigError::Validation {
            message: format!("archive.level must be 0-9, got {}", config.archive.level),
        });
    }

    if config.worker.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "worker.max_attempts must be at least 1".to_string(),
        });
    }

    Ok(())
}
