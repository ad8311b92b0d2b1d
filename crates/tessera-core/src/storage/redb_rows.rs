//! # redb-backed Row Store
//!
//! A disk-backed [`RowStore`] using the redb embedded database: one redb
//! table per logical table, rows serialized as JSON documents.
//!
//! Gateway transactions are staged in memory exactly like the volatile
//! backend and applied inside a single redb write transaction at commit,
//! so the staged write set is atomic and crash-safe. List queries load the
//! table and evaluate through the shared gateway helpers; row documents
//! are small and tables are graph-sized, not analytics-sized.

use crate::error::StoreError;
use crate::gateway::{
    Filter, Row, RowPage, RowStore, StagedOp, apply_selection, evaluate_filters, expansion_fields,
};
use crate::types::{RowId, TableId, TransactionId};
use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, TableError};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

fn table_def(name: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(name)
}

/// A disk-backed row store.
pub struct RedbRowStore {
    db: Database,
    relations: BTreeMap<String, TableId>,
    staged: Mutex<BTreeMap<String, Vec<StagedOp>>>,
}

impl std::fmt::Debug for RedbRowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbRowStore")
            .field("relations", &self.relations)
            .finish_non_exhaustive()
    }
}

impl RedbRowStore {
    /// Open or create a row database at the given path, pre-creating the
    /// named tables.
    pub fn open(path: impl AsRef<Path>, tables: &[TableId]) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(StoreError::storage)?;
        {
            let write_txn = db.begin_write().map_err(StoreError::storage)?;
            for table in tables {
                let _ = write_txn
                    .open_table(table_def(table.as_str()))
                    .map_err(StoreError::storage)?;
            }
            write_txn.commit().map_err(StoreError::storage)?;
        }
        Ok(Self {
            db,
            relations: BTreeMap::new(),
            staged: Mutex::new(BTreeMap::new()),
        })
    }

    /// Enable one-hop `field.*` expansion for the given relation fields.
    #[must_use]
    pub fn with_relations(mut self, relations: BTreeMap<String, TableId>) -> Self {
        self.relations = relations;
        self
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), StoreError> {
        self.db.compact().map_err(StoreError::storage)?;
        Ok(())
    }

    fn lock_staged(&self) -> MutexGuard<'_, BTreeMap<String, Vec<StagedOp>>> {
        self.staged.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn decode_row(bytes: &[u8]) -> Result<Row, StoreError> {
        serde_json::from_slice(bytes).map_err(StoreError::serialization)
    }

    fn encode_row(row: &Row) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(row).map_err(StoreError::serialization)
    }

    /// Fetch a committed row, tolerating tables that were never created.
    fn committed_row(&self, table: &TableId, id: &RowId) -> Result<Option<Row>, StoreError> {
        let read_txn = self.db.begin_read().map_err(StoreError::storage)?;
        let handle = match read_txn.open_table(table_def(table.as_str())) {
            Ok(handle) => handle,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(StoreError::storage(err)),
        };
        match handle.get(id.as_str()).map_err(StoreError::storage)? {
            Some(guard) => Self::decode_row(guard.value()).map(Some),
            None => Ok(None),
        }
    }

    /// Whether a row is visible to the staged op list: committed, or
    /// created earlier under the same transaction.
    fn visible_row(
        &self,
        ops: &[StagedOp],
        table: &TableId,
        id: &RowId,
    ) -> Result<Option<Row>, StoreError> {
        for op in ops.iter().rev() {
            if let StagedOp::Create { table: t, row } = op {
                if t == table && &row.id == id {
                    return Ok(Some(row.clone()));
                }
            }
        }
        self.committed_row(table, id)
    }

    fn apply_op(write_txn: &redb::WriteTransaction, op: &StagedOp) -> Result<(), StoreError> {
        match op {
            StagedOp::Create { table, row } => {
                let mut handle = write_txn
                    .open_table(table_def(table.as_str()))
                    .map_err(StoreError::storage)?;
                let exists = handle
                    .get(row.id.as_str())
                    .map_err(StoreError::storage)?
                    .is_some();
                if exists {
                    return Err(StoreError::Conflict {
                        table: table.clone(),
                        id: row.id.clone(),
                    });
                }
                let bytes = Self::encode_row(row)?;
                handle
                    .insert(row.id.as_str(), bytes.as_slice())
                    .map_err(StoreError::storage)?;
                Ok(())
            }
            StagedOp::Update {
                table,
                id,
                data,
                permissions,
                updated_at,
            } => {
                let mut handle = write_txn
                    .open_table(table_def(table.as_str()))
                    .map_err(StoreError::storage)?;
                let mut row = match handle.get(id.as_str()).map_err(StoreError::storage)? {
                    Some(guard) => Self::decode_row(guard.value())?,
                    None => {
                        return Err(StoreError::NotFound {
                            table: table.clone(),
                            id: id.clone(),
                        });
                    }
                };
                if let Some(data) = data {
                    row.data = data.clone();
                }
                if let Some(permissions) = permissions {
                    row.permissions = permissions.clone();
                }
                row.updated_at = *updated_at;
                let bytes = Self::encode_row(&row)?;
                handle
                    .insert(id.as_str(), bytes.as_slice())
                    .map_err(StoreError::storage)?;
                Ok(())
            }
            StagedOp::Delete { table, id } => {
                let mut handle = write_txn
                    .open_table(table_def(table.as_str()))
                    .map_err(StoreError::storage)?;
                let removed = handle.remove(id.as_str()).map_err(StoreError::storage)?;
                if removed.is_none() {
                    return Err(StoreError::NotFound {
                        table: table.clone(),
                        id: id.clone(),
                    });
                }
                Ok(())
            }
        }
    }

    /// Apply a single op in its own write transaction.
    fn apply_direct(&self, op: &StagedOp) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write().map_err(StoreError::storage)?;
        Self::apply_op(&write_txn, op)?;
        write_txn.commit().map_err(StoreError::storage)?;
        Ok(())
    }
}

impl RowStore for RedbRowStore {
    async fn get_row(&self, table: &TableId, id: &RowId) -> Result<Row, StoreError> {
        self.committed_row(table, id)?
            .ok_or_else(|| StoreError::NotFound {
                table: table.clone(),
                id: id.clone(),
            })
    }

    async fn list_rows(&self, table: &TableId, filters: &[Filter]) -> Result<RowPage, StoreError> {
        let read_txn = self.db.begin_read().map_err(StoreError::storage)?;
        let rows = match read_txn.open_table(table_def(table.as_str())) {
            Ok(handle) => {
                let mut rows = Vec::new();
                for entry in handle.iter().map_err(StoreError::storage)? {
                    let (_, value) = entry.map_err(StoreError::storage)?;
                    rows.push(Self::decode_row(value.value())?);
                }
                rows
            }
            Err(TableError::TableDoesNotExist(_)) => Vec::new(),
            Err(err) => return Err(StoreError::storage(err)),
        };

        let mut page = evaluate_filters(rows, filters);

        for field in expansion_fields(filters) {
            let Some(target) = self.relations.get(&field) else {
                continue;
            };
            let handle = match read_txn.open_table(table_def(target.as_str())) {
                Ok(handle) => handle,
                Err(TableError::TableDoesNotExist(_)) => continue,
                Err(err) => return Err(StoreError::storage(err)),
            };
            for row in &mut page.rows {
                let rel_id = match row.data.get(&field) {
                    Some(Value::String(id)) => id.clone(),
                    _ => continue,
                };
                if let Some(guard) = handle.get(rel_id.as_str()).map_err(StoreError::storage)? {
                    let related = Self::decode_row(guard.value())?;
                    let mut embedded = related.data;
                    embedded.insert("$id".into(), Value::String(related.id.0));
                    row.data.insert(field.clone(), Value::Object(embedded));
                }
            }
        }
        apply_selection(&mut page.rows, filters);
        Ok(page)
    }

    async fn create_row(
        &self,
        table: &TableId,
        id: Option<RowId>,
        data: Map<String, Value>,
        permissions: Vec<String>,
        txn: Option<&TransactionId>,
    ) -> Result<Row, StoreError> {
        let id = id.unwrap_or_else(|| RowId::new(uuid::Uuid::new_v4().to_string()));
        let row = Row::new(id, data, permissions);
        let op = StagedOp::Create {
            table: table.clone(),
            row: row.clone(),
        };

        match txn {
            None => {
                self.apply_direct(&op)?;
                Ok(row)
            }
            Some(txn) => {
                let mut staged = self.lock_staged();
                let ops = staged
                    .get_mut(txn.as_str())
                    .ok_or_else(|| StoreError::UnknownTransaction(txn.to_string()))?;
                if self.visible_row(ops, table, &row.id)?.is_some() {
                    return Err(StoreError::Conflict {
                        table: table.clone(),
                        id: row.id,
                    });
                }
                ops.push(op);
                Ok(row)
            }
        }
    }

    async fn update_row(
        &self,
        table: &TableId,
        id: &RowId,
        data: Option<Map<String, Value>>,
        permissions: Option<Vec<String>>,
        txn: Option<&TransactionId>,
    ) -> Result<Row, StoreError> {
        let now = Utc::now();
        match txn {
            None => {
                let op = StagedOp::Update {
                    table: table.clone(),
                    id: id.clone(),
                    data: data.clone(),
                    permissions: permissions.clone(),
                    updated_at: now,
                };
                self.apply_direct(&op)?;
                self.committed_row(table, id)?
                    .ok_or_else(|| StoreError::NotFound {
                        table: table.clone(),
                        id: id.clone(),
                    })
            }
            Some(txn) => {
                let mut staged = self.lock_staged();
                let ops = staged
                    .get_mut(txn.as_str())
                    .ok_or_else(|| StoreError::UnknownTransaction(txn.to_string()))?;
                let mut preview =
                    self.visible_row(ops, table, id)?
                        .ok_or_else(|| StoreError::NotFound {
                            table: table.clone(),
                            id: id.clone(),
                        })?;
                if let Some(data) = &data {
                    preview.data = data.clone();
                }
                if let Some(permissions) = &permissions {
                    preview.permissions = permissions.clone();
                }
                preview.updated_at = now;
                ops.push(StagedOp::Update {
                    table: table.clone(),
                    id: id.clone(),
                    data,
                    permissions,
                    updated_at: now,
                });
                Ok(preview)
            }
        }
    }

    async fn delete_row(
        &self,
        table: &TableId,
        id: &RowId,
        txn: Option<&TransactionId>,
    ) -> Result<(), StoreError> {
        let op = StagedOp::Delete {
            table: table.clone(),
            id: id.clone(),
        };
        match txn {
            None => self.apply_direct(&op),
            Some(txn) => {
                let mut staged = self.lock_staged();
                let ops = staged
                    .get_mut(txn.as_str())
                    .ok_or_else(|| StoreError::UnknownTransaction(txn.to_string()))?;
                if self.visible_row(ops, table, id)?.is_none() {
                    return Err(StoreError::NotFound {
                        table: table.clone(),
                        id: id.clone(),
                    });
                }
                ops.push(op);
                Ok(())
            }
        }
    }

    async fn begin_transaction(&self) -> Result<TransactionId, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.lock_staged().insert(id.clone(), Vec::new());
        Ok(TransactionId::new(id))
    }

    async fn commit_transaction(&self, txn: &TransactionId) -> Result<(), StoreError> {
        let ops = self
            .lock_staged()
            .remove(txn.as_str())
            .ok_or_else(|| StoreError::UnknownTransaction(txn.to_string()))?;

        // one redb write transaction for the whole staged set; an error
        // drops the transaction unfinished, which aborts it
        let write_txn = self.db.begin_write().map_err(StoreError::storage)?;
        for op in &ops {
            Self::apply_op(&write_txn, op)?;
        }
        write_txn.commit().map_err(StoreError::storage)?;
        Ok(())
    }

    async fn rollback_transaction(&self, txn: &TransactionId) -> Result<(), StoreError> {
        self.lock_staged()
            .remove(txn.as_str())
            .map(|_| ())
            .ok_or_else(|| StoreError::UnknownTransaction(txn.to_string()))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn tables() -> Vec<TableId> {
        vec![TableId::new("entities"), TableId::new("claims")]
    }

    fn data(label: &str) -> Map<String, Value> {
        let Value::Object(map) = json!({"label": label}) else {
            panic!("object literal")
        };
        map
    }

    #[tokio::test]
    async fn basic_operations() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("rows.redb");
        let store = RedbRowStore::open(&db_path, &tables()).expect("open db");
        let table = TableId::new("entities");

        let row = store
            .create_row(&table, None, data("Paris"), Vec::new(), None)
            .await
            .expect("create");
        let fetched = store.get_row(&table, &row.id).await.expect("get");
        assert_eq!(fetched.data.get("label"), Some(&json!("Paris")));

        let updated = store
            .update_row(&table, &row.id, Some(data("Lutetia")), None, None)
            .await
            .expect("update");
        assert_eq!(updated.data.get("label"), Some(&json!("Lutetia")));

        store.delete_row(&table, &row.id, None).await.expect("delete");
        assert!(
            store
                .get_row(&table, &row.id)
                .await
                .expect_err("gone")
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn persistence_across_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("rows.redb");
        let table = TableId::new("entities");

        let id = {
            let store = RedbRowStore::open(&db_path, &tables()).expect("open db");
            store
                .create_row(&table, None, data("Paris"), vec!["read(\"any\")".into()], None)
                .await
                .expect("create")
                .id
        };

        let store = RedbRowStore::open(&db_path, &tables()).expect("reopen db");
        let row = store.get_row(&table, &id).await.expect("get after reopen");
        assert_eq!(row.data.get("label"), Some(&json!("Paris")));
        assert_eq!(row.permissions, vec!["read(\"any\")".to_string()]);
    }

    #[tokio::test]
    async fn staged_writes_commit_atomically() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("rows.redb");
        let store = RedbRowStore::open(&db_path, &tables()).expect("open db");
        let table = TableId::new("entities");

        let txn = store.begin_transaction().await.expect("begin");
        let staged = store
            .create_row(&table, None, data("staged"), Vec::new(), Some(&txn))
            .await
            .expect("stage");
        assert!(
            store
                .get_row(&table, &staged.id)
                .await
                .expect_err("invisible before commit")
                .is_not_found()
        );

        store.commit_transaction(&txn).await.expect("commit");
        assert!(store.get_row(&table, &staged.id).await.is_ok());
    }

    #[tokio::test]
    async fn conflicting_commit_lands_nothing() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("rows.redb");
        let store = RedbRowStore::open(&db_path, &tables()).expect("open db");
        let table = TableId::new("entities");

        let keeper = store
            .create_row(&table, Some(RowId::new("keeper")), data("x"), Vec::new(), None)
            .await
            .expect("seed");

        let txn = store.begin_transaction().await.expect("begin");
        store
            .delete_row(&table, &keeper.id, Some(&txn))
            .await
            .expect("stage delete");
        store
            .create_row(&table, Some(RowId::new("late")), data("y"), Vec::new(), Some(&txn))
            .await
            .expect("stage create");

        // a concurrent actor deletes the row before commit
        store
            .delete_row(&table, &keeper.id, None)
            .await
            .expect("concurrent delete");

        let err = store
            .commit_transaction(&txn)
            .await
            .expect_err("conflicted commit");
        assert!(err.is_not_found());
        assert!(
            store
                .get_row(&table, &RowId::new("late"))
                .await
                .expect_err("aborted create")
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("rows.redb");
        let store = RedbRowStore::open(&db_path, &tables()).expect("open db");
        let table = TableId::new("entities");

        let txn = store.begin_transaction().await.expect("begin");
        let staged = store
            .create_row(&table, None, data("ghost"), Vec::new(), Some(&txn))
            .await
            .expect("stage");
        store.rollback_transaction(&txn).await.expect("rollback");
        assert!(
            store
                .get_row(&table, &staged.id)
                .await
                .expect_err("discarded")
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn list_rows_filters_and_expands() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("rows.redb");
        let entities = TableId::new("entities");
        let claims = TableId::new("claims");
        let store = RedbRowStore::open(&db_path, &tables())
            .expect("open db")
            .with_relations(BTreeMap::from([("subject".to_string(), entities.clone())]));

        store
            .create_row(&entities, Some(RowId::new("q1")), data("Paris"), Vec::new(), None)
            .await
            .expect("entity");
        let Value::Object(claim_data) = json!({"subject": "q1", "datatype": "number"}) else {
            panic!("object literal")
        };
        store
            .create_row(&claims, None, claim_data, Vec::new(), None)
            .await
            .expect("claim");

        let page = store
            .list_rows(
                &claims,
                &[
                    Filter::equal("subject", "q1"),
                    Filter::select(vec!["subject.*".into(), "datatype".into()]),
                ],
            )
            .await
            .expect("list");
        assert_eq!(page.total, 1);
        let expanded = page.rows[0].data.get("subject").expect("expanded");
        assert_eq!(expanded.get("label"), Some(&json!("Paris")));
    }

    #[tokio::test]
    async fn listing_a_never_created_table_is_empty() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("rows.redb");
        let store = RedbRowStore::open(&db_path, &tables()).expect("open db");

        let page = store
            .list_rows(&TableId::new("qualifiers"), &[])
            .await
            .expect("list");
        assert_eq!(page.total, 0);
    }
}
