use super::schema::{EventConfig, REQUIRED_KEYS};
use crate::normalizer::{FormatError, normalize_clock};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable a host can use to point at the config file.
pub const CONFIG_PATH_ENV: &str = "FORMPILOT_CONFIG_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to parse config file as YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config root must be a mapping")]
    NotAMapping,
    #[error("Missing required config keys: {}", .0.join(", "))]
    MissingKeys(Vec<String>),
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

impl From<FormatError> for ConfigError {
    fn from(err: FormatError) -> Self {
        let key = match &err {
            FormatError::NotANumber { field, .. } | FormatError::OutOfRange { field, .. } => {
                field.clone()
            }
            FormatError::Date(_) => "date".to_string(),
        };
        ConfigError::InvalidValue {
            key,
            reason: err.to_string(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Pick the config file:
    /// 1. explicit path
    /// 2. `$FORMPILOT_CONFIG_PATH`
    /// 3. ./config.json
    /// 4. ~/.formpilot/config.json
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }

        if let Ok(env_path) = std::env::var(CONFIG_PATH_ENV)
            && !env_path.trim().is_empty()
        {
            return PathBuf::from(env_path);
        }

        let local = PathBuf::from("./config.json");
        if local.exists() {
            return local;
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".formpilot").join("config.json");
            if home_config.exists() {
                return home_config;
            }
        }

        local
    }

    pub async fn load_from(path: &Path) -> Result<EventConfig, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&content, is_yaml(path))
    }

    /// Parse, check required keys, and normalize clock values.
    pub fn parse(content: &str, yaml: bool) -> Result<EventConfig, ConfigError> {
        let raw: Value = if yaml {
            serde_yaml::from_str(content)?
        } else {
            serde_json::from_str(content)?
        };

        let missing = missing_required_keys(&raw)?;
        if !missing.is_empty() {
            return Err(ConfigError::MissingKeys(missing));
        }

        if let Some(genres) = raw.get("genres")
            && !genres.is_null()
            && !genres.is_array()
        {
            return Err(ConfigError::InvalidValue {
                key: "genres".to_string(),
                reason: "must be a list".to_string(),
            });
        }

        let mut config: EventConfig = serde_json::from_value(raw)?;
        config.start_hour = normalize_clock("start_hour", &config.start_hour, 23)?;
        config.end_hour = normalize_clock("end_hour", &config.end_hour, 23)?;
        config.start_minute = normalize_clock("start_minute", &config.start_minute, 59)?;
        config.end_minute = normalize_clock("end_minute", &config.end_minute, 59)?;
        Ok(config)
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Every required key that is absent, null, or blank.
pub fn missing_required_keys(raw: &Value) -> Result<Vec<String>, ConfigError> {
    let map = raw.as_object().ok_or(ConfigError::NotAMapping)?;
    Ok(REQUIRED_KEYS
        .iter()
        .filter(|key| match map.get(**key) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        })
        .map(|key| key.to_string())
        .collect())
}
