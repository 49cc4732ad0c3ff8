//! Client configuration.
//!
//! Resolution order, lowest to highest:
//! 1. Compiled defaults
//! 2. TOML config file (when a path is given)
//! 3. `GRIEVANCE_*` environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::capabilities::ValidatedUrl;
use crate::classification::ConfidenceThreshold;
use crate::geolocation::GeolocationOptions;
use crate::image_processing::CompressionLimits;
use crate::retry::RetryPolicy;
use crate::{AUTOSAVE_DEBOUNCE_MS, DRAFT_TTL_MS};

pub const ENV_API_URL: &str = "GRIEVANCE_API_URL";
pub const ENV_SOCKET_URL: &str = "GRIEVANCE_SOCKET_URL";
pub const ENV_LANGUAGE: &str = "GRIEVANCE_LANGUAGE";
pub const ENV_CONFIDENCE_THRESHOLD: &str = "GRIEVANCE_CONFIDENCE_THRESHOLD";
pub const ENV_DATA_DIR: &str = "GRIEVANCE_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("invalid config file: {0}")]
    Parse(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_base_url: String,
    /// Notification channel base. Carried for shells that open one; the
    /// core itself never connects.
    pub socket_url: String,
    pub preferred_language: String,
    pub confidence_threshold: ConfidenceThreshold,
    pub autosave_debounce_ms: u64,
    pub draft_ttl_ms: u64,
    pub geolocation: GeolocationOptions,
    pub compression: CompressionLimits,
    /// Bounds on user-triggered classification and location retries.
    pub user_retry: RetryPolicy,
    /// Backoff for redelivering queued complaints.
    pub sync_retry: RetryPolicy,
    /// Where the native shell keeps its SQLite store.
    pub data_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".into(),
            socket_url: "http://localhost:5000".into(),
            preferred_language: "en".into(),
            confidence_threshold: ConfidenceThreshold::default(),
            autosave_debounce_ms: AUTOSAVE_DEBOUNCE_MS,
            draft_ttl_ms: DRAFT_TTL_MS,
            geolocation: GeolocationOptions::default(),
            compression: CompressionLimits::default(),
            user_retry: RetryPolicy::user_initiated(),
            sync_retry: RetryPolicy::default(),
            data_dir: None,
        }
    }
}

impl ClientConfig {
    /// Defaults, then the file if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Overrides from `GRIEVANCE_*` variables. `lookup` stands in for
    /// `std::env::var` so tests do not touch the process environment.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get(ENV_API_URL) {
            self.api_base_url = url;
        }
        if let Some(url) = get(ENV_SOCKET_URL) {
            self.socket_url = url;
        }
        if let Some(language) = get(ENV_LANGUAGE) {
            self.preferred_language = language;
        }
        if let Some(raw) = get(ENV_CONFIDENCE_THRESHOLD) {
            let value: f32 = raw
                .parse()
                .map_err(|_| ConfigError::invalid("confidence_threshold", format!("not a number: {raw}")))?;
            self.confidence_threshold = ConfidenceThreshold::new(value)
                .map_err(|e| ConfigError::invalid("confidence_threshold", e.to_string()))?;
        }
        if let Some(dir) = get(ENV_DATA_DIR) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ValidatedUrl::new(self.api_base_url.as_str())
            .map_err(|e| ConfigError::invalid("api_base_url", e.to_string()))?;
        ValidatedUrl::new(self.socket_url.as_str())
            .map_err(|e| ConfigError::invalid("socket_url", e.to_string()))?;

        let lang = self.preferred_language.as_str();
        if lang.is_empty()
            || lang.len() > 12
            || !lang.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ConfigError::invalid("preferred_language", format!("'{lang}' is not a language tag")));
        }

        if self.autosave_debounce_ms == 0 {
            return Err(ConfigError::invalid("autosave_debounce_ms", "must be positive"));
        }
        if self.draft_ttl_ms == 0 {
            return Err(ConfigError::invalid("draft_ttl_ms", "must be positive"));
        }
        if self.geolocation.timeout_ms == 0 {
            return Err(ConfigError::invalid("geolocation.timeout_ms", "must be positive"));
        }

        let c = &self.compression;
        if c.max_output_bytes == 0 || c.max_dimension == 0 {
            return Err(ConfigError::invalid("compression", "limits must be positive"));
        }
        if c.min_quality == 0 || c.min_quality > c.initial_quality || c.initial_quality > 100 {
            return Err(ConfigError::invalid(
                "compression",
                format!("quality range {}..={} is invalid", c.min_quality, c.initial_quality),
            ));
        }

        if self.user_retry.max_attempts == 0 {
            return Err(ConfigError::invalid("user_retry.max_attempts", "must allow one attempt"));
        }
        if self.sync_retry.max_attempts == 0 {
            return Err(ConfigError::invalid("sync_retry.max_attempts", "must allow one attempt"));
        }
        Ok(())
    }
}
