use std::time::Duration;
use thiserror::Error;

use crate::models::EntityKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures raised by a `DocumentStore`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("document codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("store call on {collection} timed out after {after:?}")]
    Timeout { collection: String, after: Duration },

    #[error("no document in {collection} matches {filter}")]
    NotMatched { collection: String, filter: String },

    #[error("store unavailable for {op} on {collection}")]
    Unavailable { op: &'static str, collection: String },

    #[error("store lock poisoned")]
    Poisoned,

    #[error("could not prepare store location: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{entity}: invalid or missing field(s): {}", fields.join(", "))]
    Validation {
        entity: EntityKind,
        fields: Vec<String>,
    },

    #[error("Job Requisition '{id}' is not posted")]
    RequisitionNotPosted { id: i64 },

    #[error("{entity} with ID '{id}' not found")]
    NotFound { entity: EntityKind, id: i64 },

    #[error("{entity} ID {body_id} in payload does not match target ID {path_id}")]
    IdMismatch {
        entity: EntityKind,
        path_id: i64,
        body_id: i64,
    },

    #[error("{entity} conflict: {reason}")]
    Conflict { entity: EntityKind, reason: String },

    #[error("consistency fault during {operation}: {reason}")]
    Consistency { operation: String, reason: String },

    #[error("{operation} of {id} aborted after {completed} of {total} application(s): {source}")]
    CascadeAborted {
        operation: &'static str,
        id: i64,
        completed: usize,
        total: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("{entity} cache lock poisoned")]
    LockPoisoned { entity: EntityKind },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    pub fn validation(entity: EntityKind, fields: Vec<&str>) -> Self {
        Error::Validation {
            entity,
            fields: fields.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn not_found(entity: EntityKind, id: i64) -> Self {
        Error::NotFound { entity, id }
    }

    pub fn conflict(entity: EntityKind, reason: impl Into<String>) -> Self {
        Error::Conflict {
            entity,
            reason: reason.into(),
        }
    }

    pub fn consistency(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Consistency {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// True when the caller sent something the engine refused; nothing was mutated.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Validation { .. }
                | Error::RequisitionNotPosted { .. }
                | Error::NotFound { .. }
                | Error::IdMismatch { .. }
                | Error::Conflict { .. }
        )
    }
}
