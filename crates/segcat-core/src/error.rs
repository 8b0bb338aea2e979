use thiserror::Error;

/// Canonical error type for catalog operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Entity was not found in the inventory or the metadata store.
    #[error("{entity} `{id}` was not found")]
    NotFound {
        /// Entity type name (e.g. `"datasource"`).
        entity: &'static str,
        /// Identifier of the missing entity.
        id: String,
    },

    /// Entity already exists and cannot be created again.
    #[error("{entity} `{id}` already exists")]
    AlreadyExists {
        /// Entity type name (e.g. `"segment"`).
        entity: &'static str,
        /// Identifier that conflicts.
        id: String,
    },

    /// A segment could not be encoded into its payload.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// A persisted segment payload could not be decoded.
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Metadata store connectivity or query failure.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Rejected input: a bad table name, interval or instant.
    #[error("validation error: {0}")]
    ValidationError(String),
}

impl CoreError {
    /// Creates a `NotFound` variant.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates an `AlreadyExists` variant.
    #[must_use]
    pub fn already_exists(entity: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.into(),
        }
    }

    /// Creates a `StorageError` variant.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageError(message.into())
    }

    /// Returns `true` when the error is a `NotFound` variant.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            Self::SerializationError(err.to_string())
        } else {
            Self::DeserializationError(err.to_string())
        }
    }
}

/// Convenient result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
