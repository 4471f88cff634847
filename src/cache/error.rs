use std::path::PathBuf;

use thiserror::Error;

use crate::domain::error::DomainError;
use crate::domain::keys::RootKey;

/// Failure reported by a backing store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backing store unavailable: {message}")]
    Unavailable { message: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Outcome of a source resolver that did not produce a value.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No computation exists for this key. A legitimate no-op, not a failure.
    #[error("no computation defined for `{key}`")]
    NotDefined { key: RootKey },
    #[error("resolving `{key}` failed: {message}")]
    Failed { key: RootKey, message: String },
}

impl ResolveError {
    pub fn not_defined(key: RootKey) -> Self {
        Self::NotDefined { key }
    }

    pub fn failed(key: RootKey, message: impl Into<String>) -> Self {
        Self::Failed {
            key,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("filesystem operation on `{path}` failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
