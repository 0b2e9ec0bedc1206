// ⚠️ Error taxonomy for the record layer
//
// Lookup/resolution errors propagate to the immediate caller and are never
// retried. Store constraint violations surface as `Storage`.

use crate::value::Key;

/// Result type alias for record-layer operations
pub type Result<T> = std::result::Result<T, RecordError>;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// Key or name lookup matched no row
    #[error("No {entity} found for {query}")]
    NotFound { entity: &'static str, query: String },

    /// Read of an unset field on an unsaved entity
    #[error("Field {entity}.{field} is not set")]
    FieldUnset {
        entity: &'static str,
        field: &'static str,
    },

    /// Mutation attempted on a persisted entity
    #[error("Cannot set {entity}.{field} of stored record {key}")]
    AlreadyLoadedImmutable {
        entity: &'static str,
        field: &'static str,
        key: Key,
    },

    /// Free text matched neither a canonical name nor a shortcut
    #[error("Unknown {kind} alias: {text:?}")]
    UnknownAlias { kind: &'static str, text: String },

    /// Tagging/linking (or referencing) an item that has not been saved yet
    #[error("Association precondition failed: {0}")]
    AssociationPrecondition(String),

    #[error("No store connection configured")]
    ConnectionNotConfigured,

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Invalid {entity} record: {message}")]
    InvalidRecord {
        entity: &'static str,
        message: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl RecordError {
    pub fn not_found(entity: &'static str, query: impl std::fmt::Display) -> Self {
        RecordError::NotFound {
            entity,
            query: query.to_string(),
        }
    }

    pub fn invalid(entity: &'static str, message: impl Into<String>) -> Self {
        RecordError::InvalidRecord {
            entity,
            message: message.into(),
        }
    }

    /// True for the per-row errors import tooling accumulates instead of aborting
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            RecordError::UnknownAlias { .. }
                | RecordError::FieldUnset { .. }
                | RecordError::InvalidRecord { .. }
                | RecordError::NotFound { .. }
        )
    }
}
