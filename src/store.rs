use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Config;
use crate::error::StoreError;

/// `$set`-style patch: top-level fields overwrite the stored document's fields.
pub type Patch = Map<String, Value>;

/// Equality filter on one top-level document field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn id(id: i64) -> Self {
        Self::eq("ID", id)
    }

    pub fn matches(&self, doc: &Value) -> bool {
        doc.get(&self.field) == Some(&self.value)
    }

    fn json_path(&self) -> String {
        format!("$.\"{}\"", self.field)
    }

    fn sql_value(&self) -> SqlValue {
        match &self.value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(*b as i64),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.field, self.value)
    }
}

/// Collection-scoped document persistence. Every call is blocking and self-contained.
pub trait DocumentStore: Send + Sync {
    fn find_all(&self, collection: &str, projection: &[&str]) -> Result<Vec<Value>, StoreError>;

    fn insert_one(&self, collection: &str, doc: Value) -> Result<(), StoreError>;

    /// Merges `patch` into the first document matching `filter`. Returns the match count.
    fn update_one(&self, collection: &str, filter: &Filter, patch: &Patch)
    -> Result<u64, StoreError>;

    /// Removes the first document matching `filter`. Returns the match count.
    fn delete_one(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;
}

// --- Document helpers shared by the stores ---

pub fn project(doc: Value, projection: &[&str]) -> Value {
    match doc {
        Value::Object(mut map) if !projection.is_empty() => {
            map.retain(|key, _| projection.contains(&key.as_str()));
            Value::Object(map)
        }
        other => other,
    }
}

pub fn merge(doc: &mut Value, patch: &Patch) {
    if let Value::Object(map) = doc {
        for (key, value) in patch {
            map.insert(key.clone(), value.clone());
        }
    }
}

pub fn to_document<T: Serialize>(entity: &T) -> Result<Value, StoreError> {
    Ok(serde_json::to_value(entity)?)
}

/// Every field except `ID`, which is immutable once assigned.
pub fn to_patch<T: Serialize>(entity: &T) -> Result<Patch, StoreError> {
    match serde_json::to_value(entity)? {
        Value::Object(mut map) => {
            map.remove("ID");
            Ok(map)
        }
        _ => Ok(Patch::new()),
    }
}

pub fn field_patch(field: &str, value: Value) -> Patch {
    let mut patch = Patch::new();
    patch.insert(field.to_string(), value);
    patch
}

// --- SQLite backend ---

/// One JSON document per row. A connection is opened per call and dropped on every exit path.
pub struct SqliteStore {
    path: PathBuf,
    timeout: Duration,
}

impl SqliteStore {
    pub fn open(config: &Config) -> Result<Self, StoreError> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self {
            path: config.db_path.clone(),
            timeout: config.store_timeout,
        };
        store.init()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn init(&self) -> Result<(), StoreError> {
        self.with_connection("documents", |conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS documents (
                    collection TEXT NOT NULL,
                    body TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
                "#,
            )?;
            Ok(())
        })
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.timeout)?;
        Ok(conn)
    }

    fn with_connection<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.connect().map_err(|e| self.classify(e, collection))?;
        f(&mut conn).map_err(|e| self.classify(e, collection))
    }

    fn classify(&self, err: StoreError, collection: &str) -> StoreError {
        match err {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                StoreError::Timeout {
                    collection: collection.to_string(),
                    after: self.timeout,
                }
            }
            other => other,
        }
    }
}

impl DocumentStore for SqliteStore {
    fn find_all(&self, collection: &str, projection: &[&str]) -> Result<Vec<Value>, StoreError> {
        self.with_connection(collection, |conn| {
            let mut stmt =
                conn.prepare("SELECT body FROM documents WHERE collection = ?1 ORDER BY rowid")?;
            let rows = stmt.query_map([collection], |row| row.get::<_, String>(0))?;

            let mut docs = Vec::new();
            for body in rows {
                let doc: Value = serde_json::from_str(&body?)?;
                docs.push(project(doc, projection));
            }
            Ok(docs)
        })
    }

    fn insert_one(&self, collection: &str, doc: Value) -> Result<(), StoreError> {
        self.with_connection(collection, |conn| {
            conn.execute(
                "INSERT INTO documents (collection, body) VALUES (?1, ?2)",
                params![collection, doc.to_string()],
            )?;
            Ok(())
        })
    }

    fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        patch: &Patch,
    ) -> Result<u64, StoreError> {
        // IMMEDIATE takes the write lock up front, so a competing writer
        // waits on the busy timeout instead of failing the lock upgrade.
        self.with_connection(collection, |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let found: Option<(i64, String)> = tx
                .query_row(
                    "SELECT rowid, body FROM documents
                     WHERE collection = ?1 AND json_extract(body, ?2) = ?3
                     ORDER BY rowid LIMIT 1",
                    params![collection, filter.json_path(), filter.sql_value()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((rowid, body)) = found else {
                return Ok(0);
            };

            let mut doc: Value = serde_json::from_str(&body)?;
            merge(&mut doc, patch);
            tx.execute(
                "UPDATE documents SET body = ?1 WHERE rowid = ?2",
                params![doc.to_string(), rowid],
            )?;
            tx.commit()?;
            Ok(1)
        })
    }

    fn delete_one(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        self.with_connection(collection, |conn| {
            let removed = conn.execute(
                "DELETE FROM documents WHERE rowid = (
                    SELECT rowid FROM documents
                    WHERE collection = ?1 AND json_extract(body, ?2) = ?3
                    ORDER BY rowid LIMIT 1
                 )",
                params![collection, filter.json_path(), filter.sql_value()],
            )?;
            Ok(removed as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(Some(dir.path().join("nested/hire.db")), Some(500));
        let store = SqliteStore::open(&config).unwrap();
        (dir, store)
    }

    #[test]
    fn insert_then_find_projects_fields() {
        let (_dir, store) = temp_store();
        store
            .insert_one("Countries", json!({"ID": 1, "Name": "Brazil", "Code": "BR", "Extra": 9}))
            .unwrap();
        store
            .insert_one("Tags", json!({"ID": 1, "Label": "senior"}))
            .unwrap();

        let docs = store.find_all("Countries", &["ID", "Name", "Code"]).unwrap();
        assert_eq!(docs, vec![json!({"ID": 1, "Name": "Brazil", "Code": "BR"})]);
    }

    #[test]
    fn update_merges_patch_into_first_match() {
        let (_dir, store) = temp_store();
        store
            .insert_one("Requisitions", json!({"ID": 4, "Title": "Old", "PostingStatus": false}))
            .unwrap();

        let patch = field_patch("Title", json!("New"));
        assert_eq!(store.update_one("Requisitions", &Filter::id(4), &patch).unwrap(), 1);
        assert_eq!(store.update_one("Requisitions", &Filter::id(5), &patch).unwrap(), 0);

        let docs = store.find_all("Requisitions", &[]).unwrap();
        assert_eq!(docs[0]["Title"], json!("New"));
        assert_eq!(docs[0]["PostingStatus"], json!(false));
    }

    #[test]
    fn filters_match_strings_and_booleans() {
        let (_dir, store) = temp_store();
        store
            .insert_one("Counters", json!({"Collection": "Tags", "Last": 3}))
            .unwrap();
        store
            .insert_one("Requisitions", json!({"ID": 1, "PostingStatus": true}))
            .unwrap();

        let patch = field_patch("Last", json!(4));
        let matched = store
            .update_one("Counters", &Filter::eq("Collection", "Tags"), &patch)
            .unwrap();
        assert_eq!(matched, 1);
        let removed = store
            .delete_one("Requisitions", &Filter::eq("PostingStatus", true))
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[test]
    fn delete_removes_only_one_document() {
        let (_dir, store) = temp_store();
        store.insert_one("Tags", json!({"ID": 1, "Label": "a"})).unwrap();
        store.insert_one("Tags", json!({"ID": 2, "Label": "b"})).unwrap();

        assert_eq!(store.delete_one("Tags", &Filter::id(1)).unwrap(), 1);
        assert_eq!(store.delete_one("Tags", &Filter::id(1)).unwrap(), 0);
        assert_eq!(store.find_all("Tags", &[]).unwrap().len(), 1);
    }

    #[test]
    fn busy_database_is_a_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(Some(dir.path().join("hire.db")), Some(100));
        let store = SqliteStore::open(&config).unwrap();

        let holder = Connection::open(store.path()).unwrap();
        holder.execute_batch("BEGIN EXCLUSIVE").unwrap();

        match store.find_all("Tags", &[]) {
            Err(StoreError::Timeout { collection, after }) => {
                assert_eq!(collection, "Tags");
                assert_eq!(after, Duration::from_millis(100));
            }
            other => panic!("expected timeout, got {other:?}"),
        }

        holder.execute_batch("ROLLBACK").unwrap();
        assert!(store.find_all("Tags", &[]).unwrap().is_empty());
    }

    #[test]
    fn to_patch_drops_id() {
        let patch = to_patch(&json!({"ID": 3, "Name": "x"})).unwrap();
        assert!(!patch.contains_key("ID"));
        assert_eq!(patch["Name"], json!("x"));
    }
}
