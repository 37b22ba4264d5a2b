//! Cascades as ordered store writes, each paired with the write that undoes it.

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::{Error, Result, StoreError};
use crate::store::{DocumentStore, Filter, Patch};

/// One store write. Used both as a forward step and as a compensation.
#[derive(Debug, Clone)]
pub(crate) enum Write {
    Insert {
        collection: &'static str,
        doc: Value,
    },
    Update {
        collection: &'static str,
        filter: Filter,
        patch: Patch,
    },
    Delete {
        collection: &'static str,
        filter: Filter,
    },
}

impl Write {
    /// Updates and deletes that match nothing fail with `NotMatched`.
    pub fn apply(&self, store: &dyn DocumentStore) -> Result<()> {
        let (collection, filter, matched) = match self {
            Write::Insert { collection, doc } => {
                store.insert_one(collection, doc.clone())?;
                return Ok(());
            }
            Write::Update {
                collection,
                filter,
                patch,
            } => (collection, filter, store.update_one(collection, filter, patch)?),
            Write::Delete { collection, filter } => {
                (collection, filter, store.delete_one(collection, filter)?)
            }
        };
        if matched == 0 {
            return Err(StoreError::NotMatched {
                collection: collection.to_string(),
                filter: filter.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

pub(crate) struct Saga<'s> {
    operation: String,
    store: &'s dyn DocumentStore,
    compensations: Vec<(String, Write)>,
}

impl<'s> Saga<'s> {
    pub fn new(operation: impl Into<String>, store: &'s dyn DocumentStore) -> Self {
        Self {
            operation: operation.into(),
            store,
            compensations: Vec::new(),
        }
    }

    pub fn store(&self) -> &'s dyn DocumentStore {
        self.store
    }

    /// Applies `forward`. On success `compensate` is remembered; on failure
    /// every remembered compensation runs, newest first.
    pub fn step(
        &mut self,
        label: impl Into<String>,
        forward: Write,
        compensate: Option<Write>,
    ) -> Result<()> {
        let label = label.into();
        match forward.apply(self.store) {
            Ok(()) => {
                if let Some(undo) = compensate {
                    self.compensations.push((label, undo));
                }
                Ok(())
            }
            Err(cause) => Err(self.abort(&label, cause)),
        }
    }

    /// Rolls back and returns the error to surface: `cause` when every
    /// compensation held, a consistency fault otherwise.
    pub fn abort(&mut self, failed_step: &str, cause: Error) -> Error {
        if self.compensations.is_empty() {
            return cause;
        }
        warn!(
            operation = %self.operation,
            step = failed_step,
            error = %cause,
            "cascade step failed, compensating"
        );
        while let Some((label, undo)) = self.compensations.pop() {
            if let Err(e) = undo.apply(self.store) {
                error!(
                    operation = %self.operation,
                    step = %label,
                    error = %e,
                    "compensation failed; store inconsistent until next refresh"
                );
                return Error::consistency(
                    self.operation.clone(),
                    format!("undoing '{label}' failed ({e}) after '{failed_step}' failed ({cause})"),
                );
            }
        }
        cause
    }

    pub fn commit(self) {
        debug!(
            operation = %self.operation,
            steps = self.compensations.len(),
            "cascade committed"
        );
    }
}
