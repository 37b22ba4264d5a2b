use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::StoreError;
use crate::store::{merge, project, DocumentStore, Filter, Patch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Find,
    Insert,
    Update,
    Delete,
}

impl StoreOp {
    fn name(self) -> &'static str {
        match self {
            StoreOp::Find => "find",
            StoreOp::Insert => "insert",
            StoreOp::Update => "update",
            StoreOp::Delete => "delete",
        }
    }
}

#[derive(Debug)]
struct Fault {
    op: StoreOp,
    collection: String,
    skip: usize,
}

/// In-process document store. Faults are one-shot and fire in registration order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Value>>>,
    faults: Mutex<Vec<Fault>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `op` on `collection` fails with `StoreError::Unavailable`.
    pub fn fail_next(&self, op: StoreOp, collection: &str) {
        self.fail_after(op, collection, 0);
    }

    /// Lets `skip` matching calls succeed, then fails the one after.
    pub fn fail_after(&self, op: StoreOp, collection: &str, skip: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push(Fault {
                op,
                collection: collection.to_string(),
                skip,
            });
        }
    }

    /// Raw documents of a collection, unprojected.
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.collections
            .lock()
            .map(|c| c.get(collection).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn check(&self, op: StoreOp, collection: &str) -> Result<(), StoreError> {
        let mut faults = self.faults.lock().map_err(|_| StoreError::Poisoned)?;
        let Some(idx) = faults
            .iter()
            .position(|f| f.op == op && f.collection == collection)
        else {
            return Ok(());
        };
        if faults[idx].skip > 0 {
            faults[idx].skip -= 1;
            return Ok(());
        }
        faults.remove(idx);
        Err(StoreError::Unavailable {
            op: op.name(),
            collection: collection.to_string(),
        })
    }
}

impl DocumentStore for MemoryStore {
    fn find_all(&self, collection: &str, projection: &[&str]) -> Result<Vec<Value>, StoreError> {
        self.check(StoreOp::Find, collection)?;
        let collections = self.collections.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().map(|d| project(d.clone(), projection)).collect())
            .unwrap_or_default())
    }

    fn insert_one(&self, collection: &str, doc: Value) -> Result<(), StoreError> {
        self.check(StoreOp::Insert, collection)?;
        let mut collections = self.collections.lock().map_err(|_| StoreError::Poisoned)?;
        collections.entry(collection.to_string()).or_default().push(doc);
        Ok(())
    }

    fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        patch: &Patch,
    ) -> Result<u64, StoreError> {
        self.check(StoreOp::Update, collection)?;
        let mut collections = self.collections.lock().map_err(|_| StoreError::Poisoned)?;
        let doc = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| filter.matches(d)));
        match doc {
            Some(doc) => {
                merge(doc, patch);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn delete_one(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        self.check(StoreOp::Delete, collection)?;
        let mut collections = self.collections.lock().map_err(|_| StoreError::Poisoned)?;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        match docs.iter().position(|d| filter.matches(d)) {
            Some(idx) => {
                docs.remove(idx);
                Ok(1)
            }
            None => Ok(0),
        }
    }
}
