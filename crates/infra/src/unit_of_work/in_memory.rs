//! In-memory transactional backend for tests/dev.
//!
//! Data lives in named tables of JSON documents. Writes made while a transaction is open are
//! staged on the connection and only applied when the transaction commits; a rollback (or an
//! abandoned transaction) discards them. Writes outside a transaction apply immediately.
//!
//! Failure injection (`fail_next_*`) lets tests drive the unit of work down its error paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use super::r#trait::{Database, DatabaseError};

pub type Table = BTreeMap<String, JsonValue>;

#[derive(Debug, Clone)]
enum Write {
    Put {
        table: String,
        key: String,
        value: JsonValue,
    },
    Delete {
        table: String,
        key: String,
    },
}

impl Write {
    fn target(&self) -> (&str, &str) {
        match self {
            Write::Put { table, key, .. } | Write::Delete { table, key } => (table, key),
        }
    }

    fn apply(self, tables: &mut HashMap<String, Table>) {
        match self {
            Write::Put { table, key, value } => {
                tables.entry(table).or_default().insert(key, value);
            }
            Write::Delete { table, key } => {
                if let Some(t) = tables.get_mut(&table) {
                    t.remove(&key);
                }
            }
        }
    }
}

/// Counters exposed for assertions.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct InMemoryStats {
    pub connections_opened: u64,
    pub transactions_begun: u64,
    pub commits: u64,
    pub rollbacks: u64,
    pub abandoned: u64,
}

#[derive(Debug, Default)]
struct Inner {
    tables: RwLock<HashMap<String, Table>>,
    next_tx: AtomicU64,
    connections_opened: AtomicU64,
    transactions_begun: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    abandoned: AtomicU64,
    fail_connect: AtomicBool,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
    fail_write: AtomicBool,
}

/// Shared in-memory database. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    inner: Arc<Inner>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> InMemoryStats {
        InMemoryStats {
            connections_opened: self.inner.connections_opened.load(Ordering::SeqCst),
            transactions_begun: self.inner.transactions_begun.load(Ordering::SeqCst),
            commits: self.inner.commits.load(Ordering::SeqCst),
            rollbacks: self.inner.rollbacks.load(Ordering::SeqCst),
            abandoned: self.inner.abandoned.load(Ordering::SeqCst),
        }
    }

    /// Committed contents of a table.
    pub fn table(&self, name: &str) -> Option<Table> {
        self.inner.tables.read().ok()?.get(name).cloned()
    }

    pub fn fail_next_connect(&self) {
        self.inner.fail_connect.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_commit(&self) {
        self.inner.fail_commit.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_rollback(&self) {
        self.inner.fail_rollback.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_write(&self) {
        self.inner.fail_write.store(true, Ordering::SeqCst);
    }

    fn apply(&self, writes: Vec<Write>) -> Result<(), DatabaseError> {
        let mut tables = self
            .inner
            .tables
            .write()
            .map_err(|_| DatabaseError::Poisoned)?;
        for write in writes {
            write.apply(&mut tables);
        }
        Ok(())
    }
}

/// One connection to an [`InMemoryDatabase`].
#[derive(Debug)]
pub struct InMemoryConnection {
    db: InMemoryDatabase,
    staged: Option<Vec<Write>>,
}

impl InMemoryConnection {
    pub fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }

    /// Read a document, seeing this connection's own uncommitted writes.
    pub fn get(&self, table: &str, key: &str) -> Result<Option<JsonValue>, DatabaseError> {
        if let Some(write) = self.latest_staged(table, key) {
            return Ok(match write {
                Write::Put { value, .. } => Some(value.clone()),
                Write::Delete { .. } => None,
            });
        }

        let tables = self
            .db
            .inner
            .tables
            .read()
            .map_err(|_| DatabaseError::Poisoned)?;
        Ok(tables.get(table).and_then(|t| t.get(key)).cloned())
    }

    pub fn get_as<T: DeserializeOwned>(
        &self,
        table: &str,
        key: &str,
    ) -> Result<Option<T>, DatabaseError> {
        self.get(table, key)?
            .map(|value| {
                serde_json::from_value(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
            })
            .transpose()
    }

    /// All documents of a table matching `predicate`, including uncommitted writes.
    pub fn find(
        &self,
        table: &str,
        predicate: impl Fn(&JsonValue) -> bool,
    ) -> Result<Vec<(String, JsonValue)>, DatabaseError> {
        let mut view = {
            let tables = self
                .db
                .inner
                .tables
                .read()
                .map_err(|_| DatabaseError::Poisoned)?;
            tables.get(table).cloned().unwrap_or_default()
        };

        if let Some(staged) = &self.staged {
            let mut overlay = HashMap::new();
            overlay.insert(table.to_string(), view);
            for write in staged.iter().filter(|w| w.target().0 == table) {
                write.clone().apply(&mut overlay);
            }
            view = overlay.remove(table).unwrap_or_default();
        }

        Ok(view.into_iter().filter(|(_, v)| predicate(v)).collect())
    }

    pub fn put(
        &mut self,
        table: &str,
        key: &str,
        value: JsonValue,
    ) -> Result<(), DatabaseError> {
        self.write(Write::Put {
            table: table.to_string(),
            key: key.to_string(),
            value,
        })
    }

    pub fn put_as<T: Serialize>(
        &mut self,
        table: &str,
        key: &str,
        value: &T,
    ) -> Result<(), DatabaseError> {
        let value =
            serde_json::to_value(value).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.put(table, key, value)
    }

    pub fn delete(&mut self, table: &str, key: &str) -> Result<(), DatabaseError> {
        self.write(Write::Delete {
            table: table.to_string(),
            key: key.to_string(),
        })
    }

    fn write(&mut self, write: Write) -> Result<(), DatabaseError> {
        if self.db.inner.fail_write.swap(false, Ordering::SeqCst) {
            let (table, _) = write.target();
            return Err(DatabaseError::operation(
                "write",
                format!("injected failure writing to `{table}`"),
            ));
        }

        match &mut self.staged {
            Some(staged) => {
                staged.push(write);
                Ok(())
            }
            None => self.db.apply(vec![write]),
        }
    }

    fn latest_staged(&self, table: &str, key: &str) -> Option<&Write> {
        self.staged
            .as_ref()?
            .iter()
            .rev()
            .find(|w| w.target() == (table, key))
    }
}

/// Handle for an open in-memory transaction.
#[derive(Debug)]
pub struct InMemoryTransaction {
    id: u64,
}

impl InMemoryTransaction {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    type Connection = InMemoryConnection;
    type Transaction = InMemoryTransaction;

    fn name(&self) -> &'static str {
        "in_memory"
    }

    async fn connect(&self) -> Result<InMemoryConnection, DatabaseError> {
        if self.inner.fail_connect.swap(false, Ordering::SeqCst) {
            return Err(DatabaseError::Connection("injected failure".to_string()));
        }
        self.inner.connections_opened.fetch_add(1, Ordering::SeqCst);
        Ok(InMemoryConnection {
            db: self.clone(),
            staged: None,
        })
    }

    async fn begin(
        &self,
        conn: &mut InMemoryConnection,
    ) -> Result<InMemoryTransaction, DatabaseError> {
        if conn.staged.is_some() {
            return Err(DatabaseError::operation(
                "begin",
                "connection already has an open transaction",
            ));
        }
        conn.staged = Some(Vec::new());
        self.inner.transactions_begun.fetch_add(1, Ordering::SeqCst);
        Ok(InMemoryTransaction {
            id: self.inner.next_tx.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    async fn commit(
        &self,
        conn: &mut InMemoryConnection,
        tx: InMemoryTransaction,
    ) -> Result<(), DatabaseError> {
        let writes = conn.staged.take().unwrap_or_default();
        if self.inner.fail_commit.swap(false, Ordering::SeqCst) {
            return Err(DatabaseError::operation(
                "commit",
                format!("injected failure in transaction {}", tx.id),
            ));
        }
        self.apply(writes)?;
        self.inner.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(
        &self,
        conn: &mut InMemoryConnection,
        tx: InMemoryTransaction,
    ) -> Result<(), DatabaseError> {
        conn.staged = None;
        if self.inner.fail_rollback.swap(false, Ordering::SeqCst) {
            return Err(DatabaseError::operation(
                "rollback",
                format!("injected failure in transaction {}", tx.id),
            ));
        }
        self.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn abandon(&self, mut conn: InMemoryConnection) {
        let discarded = conn.staged.take().map_or(0, |w| w.len());
        self.inner.abandoned.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(discarded, "abandoned transaction discarded");
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        name: String,
    }

    #[tokio::test]
    async fn reads_see_own_staged_writes_only() {
        let db = InMemoryDatabase::new();
        let mut writer = db.connect().await.unwrap();
        let reader = db.connect().await.unwrap();

        let tx = db.begin(&mut writer).await.unwrap();
        writer
            .put_as("docs", "1", &Doc { name: "draft".into() })
            .unwrap();

        assert_eq!(
            writer.get_as::<Doc>("docs", "1").unwrap(),
            Some(Doc { name: "draft".into() })
        );
        assert_eq!(reader.get("docs", "1").unwrap(), None);

        db.commit(&mut writer, tx).await.unwrap();
        assert!(reader.get("docs", "1").unwrap().is_some());
    }

    #[tokio::test]
    async fn find_merges_committed_and_staged_documents() {
        let db = InMemoryDatabase::new();
        let mut conn = db.connect().await.unwrap();
        conn.put("users", "a", json!({"email": "a@x.io"})).unwrap();
        conn.put("users", "b", json!({"email": "b@x.io"})).unwrap();

        let _tx = db.begin(&mut conn).await.unwrap();
        conn.delete("users", "a").unwrap();
        conn.put("users", "c", json!({"email": "a@x.io"})).unwrap();

        let found = conn.find("users", |v| v["email"] == "a@x.io").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "c");
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let db = InMemoryDatabase::new();
        db.fail_next_connect();
        assert!(matches!(db.connect().await, Err(DatabaseError::Connection(_))));

        let mut conn = db.connect().await.unwrap();
        db.fail_next_write();
        assert!(conn.put("t", "k", json!(1)).is_err());
        assert!(conn.put("t", "k", json!(1)).is_ok());
        assert_eq!(db.table("t").unwrap().len(), 1);
    }
}
