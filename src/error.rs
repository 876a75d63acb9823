//! Error types for the cache store.

use crate::types::{ConnectionKey, StoreKey};
use std::fmt;
use thiserror::Error;

/// Which part of a binding collided with an existing one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindingConflict {
    Port(String),
    Path(String),
    Key(String),
}

impl fmt::Display for BindingConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingConflict::Port(port) => write!(f, "port {}", port),
            BindingConflict::Path(path) => write!(f, "path {}", path),
            BindingConflict::Key(key) => write!(f, "key {}", key),
        }
    }
}

/// Main error type for store, cache and publisher operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache already exists: {0}")]
    DuplicateKey(StoreKey),

    #[error("Cache not found: {0}")]
    NotFound(StoreKey),

    #[error("Type mismatch for cache {key}: expected {expected}, got {found}")]
    TypeMismatch {
        key: StoreKey,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Reducer failed: {0}")]
    ReducerFailure(String),

    #[error("Binding already exists with {0}")]
    DuplicateBinding(BindingConflict),

    #[error("Binding path cannot be empty")]
    EmptyPath,

    #[error("Connection already registered: {0}")]
    DuplicateConnection(ConnectionKey),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Publisher is shut down")]
    Shutdown,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
