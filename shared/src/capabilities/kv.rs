use serde::{Deserialize, Serialize};
use thiserror::Error;

use crux_kv::error::KeyValueError;

use crate::{AppError, ErrorKind};

pub const MAX_KEY_LENGTH: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KvKey {
    namespace: KeyNamespace,
    key: String,
}

impl KvKey {
    pub fn new(namespace: KeyNamespace, key: impl Into<String>) -> Result<Self, KvError> {
        let key = key.into();
        Self::validate_key(&key)?;
        Ok(Self { namespace, key })
    }

    /// The single autosaved wizard draft.
    #[must_use]
    pub fn draft_slot() -> Self {
        Self {
            namespace: KeyNamespace::Draft,
            key: "current".to_string(),
        }
    }

    /// The offline submission queue.
    #[must_use]
    pub fn offline_queue() -> Self {
        Self {
            namespace: KeyNamespace::Queue,
            key: "complaints".to_string(),
        }
    }

    /// Where a stored queue that could not be read is set aside.
    #[must_use]
    pub fn quarantined_queue() -> Self {
        Self {
            namespace: KeyNamespace::Queue,
            key: "quarantine".to_string(),
        }
    }

    #[must_use]
    pub fn raw(&self) -> String {
        format!("{}:{}", self.namespace.prefix(), self.key)
    }

    #[must_use]
    pub fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    fn validate_key(key: &str) -> Result<(), KvError> {
        let reason = if key.trim().is_empty() {
            Some("key cannot be empty".to_string())
        } else if key.len() > MAX_KEY_LENGTH {
            Some(format!("key exceeds maximum length of {MAX_KEY_LENGTH} bytes"))
        } else if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            Some("key cannot contain path traversal sequences".to_string())
        } else if key.chars().any(char::is_control) {
            Some("key contains control characters".to_string())
        } else {
            None
        };

        match reason {
            Some(reason) => Err(KvError::InvalidKey {
                key: key.chars().take(50).collect(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyNamespace {
    Draft,
    Queue,
    Settings,
    Custom(String),
}

impl KeyNamespace {
    #[must_use]
    pub fn prefix(&self) -> &str {
        match self {
            Self::Draft => "draft",
            Self::Queue => "queue",
            Self::Settings => "settings",
            Self::Custom(s) => s.as_str(),
        }
    }
}

/// What every key-value callback receives: the stored (or previous) value.
pub type KvResult = Result<Option<Vec<u8>>, KeyValueError>;

impl From<KvError> for AppError {
    fn from(e: KvError) -> Self {
        AppError::new(ErrorKind::Validation, e.to_string())
    }
}

impl From<KeyValueError> for AppError {
    fn from(e: KeyValueError) -> Self {
        AppError::new(ErrorKind::Storage, e.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },
}
