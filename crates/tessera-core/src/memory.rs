//! # In-Memory Row Store
//!
//! A volatile [`RowStore`] backend over `BTreeMap` tables. Used as the
//! reference backend in tests and as the default for ephemeral sessions.
//!
//! `BTreeMap` keeps listing order deterministic. Transactional writes are
//! staged per handle and applied in one atomic step on commit: the commit
//! applies every staged operation to a copy of the table state and swaps it
//! in only if all of them succeed.

use crate::error::StoreError;
use crate::gateway::{
    Filter, Row, RowPage, RowStore, StagedOp, apply_selection, evaluate_filters, expansion_fields,
};
use crate::types::{RowId, TableId, TransactionId};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

type Tables = BTreeMap<TableId, BTreeMap<RowId, Row>>;

/// Volatile row store backend.
#[derive(Debug, Default)]
pub struct MemoryRowStore {
    tables: Mutex<Tables>,
    staged: Mutex<BTreeMap<String, Vec<StagedOp>>>,
    relations: BTreeMap<String, TableId>,
}

impl MemoryRowStore {
    /// Create an empty store with no relation map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that can expand the given relation fields in
    /// `field.*` selection terms.
    #[must_use]
    pub fn with_relations(relations: BTreeMap<String, TableId>) -> Self {
        Self {
            tables: Mutex::new(BTreeMap::new()),
            staged: Mutex::new(BTreeMap::new()),
            relations,
        }
    }

    /// Number of committed rows in a table.
    #[must_use]
    pub fn row_count(&self, table: &TableId) -> usize {
        self.lock_tables().get(table).map_or(0, BTreeMap::len)
    }

    fn lock_tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_staged(&self) -> MutexGuard<'_, BTreeMap<String, Vec<StagedOp>>> {
        self.staged.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a row exists in committed state or was created earlier in
    /// the given staged op list.
    fn visible_row(tables: &Tables, ops: &[StagedOp], table: &TableId, id: &RowId) -> Option<Row> {
        for op in ops.iter().rev() {
            if let StagedOp::Create { table: t, row } = op {
                if t == table && &row.id == id {
                    return Some(row.clone());
                }
            }
        }
        tables.get(table).and_then(|rows| rows.get(id)).cloned()
    }

    fn apply_create(tables: &mut Tables, table: &TableId, row: Row) -> Result<(), StoreError> {
        let rows = tables.entry(table.clone()).or_default();
        if rows.contains_key(&row.id) {
            return Err(StoreError::Conflict {
                table: table.clone(),
                id: row.id,
            });
        }
        rows.insert(row.id.clone(), row);
        Ok(())
    }

    fn apply_update(
        tables: &mut Tables,
        table: &TableId,
        id: &RowId,
        data: Option<Map<String, Value>>,
        permissions: Option<Vec<String>>,
        updated_at: DateTime<Utc>,
    ) -> Result<Row, StoreError> {
        let row = tables
            .get_mut(table)
            .and_then(|rows| rows.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                table: table.clone(),
                id: id.clone(),
            })?;
        if let Some(data) = data {
            row.data = data;
        }
        if let Some(permissions) = permissions {
            row.permissions = permissions;
        }
        row.updated_at = updated_at;
        Ok(row.clone())
    }

    fn apply_delete(tables: &mut Tables, table: &TableId, id: &RowId) -> Result<(), StoreError> {
        let removed = tables.get_mut(table).and_then(|rows| rows.remove(id));
        if removed.is_none() {
            return Err(StoreError::NotFound {
                table: table.clone(),
                id: id.clone(),
            });
        }
        Ok(())
    }

    fn apply_op(tables: &mut Tables, op: StagedOp) -> Result<(), StoreError> {
        match op {
            StagedOp::Create { table, row } => Self::apply_create(tables, &table, row),
            StagedOp::Update {
                table,
                id,
                data,
                permissions,
                updated_at,
            } => Self::apply_update(tables, &table, &id, data, permissions, updated_at).map(|_| ()),
            StagedOp::Delete { table, id } => Self::apply_delete(tables, &table, &id),
        }
    }

    fn expand_and_select(&self, tables: &Tables, page: &mut RowPage, filters: &[Filter]) {
        for field in expansion_fields(filters) {
            let Some(target) = self.relations.get(&field) else {
                continue;
            };
            for row in &mut page.rows {
                let Some(Value::String(rel_id)) = row.data.get(&field) else {
                    continue;
                };
                let rel_id = RowId::new(rel_id.clone());
                if let Some(related) = tables.get(target).and_then(|rows| rows.get(&rel_id)) {
                    let mut embedded = related.data.clone();
                    embedded.insert("$id".into(), Value::String(related.id.0.clone()));
                    row.data.insert(field.clone(), Value::Object(embedded));
                }
            }
        }
        apply_selection(&mut page.rows, filters);
    }
}

impl RowStore for MemoryRowStore {
    async fn get_row(&self, table: &TableId, id: &RowId) -> Result<Row, StoreError> {
        self.lock_tables()
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                table: table.clone(),
                id: id.clone(),
            })
    }

    async fn list_rows(&self, table: &TableId, filters: &[Filter]) -> Result<RowPage, StoreError> {
        let tables = self.lock_tables();
        let rows: Vec<Row> = tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        let mut page = evaluate_filters(rows, filters);
        self.expand_and_select(&tables, &mut page, filters);
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

        match txn {
            None => {
                Self::apply_create(&mut self.lock_tables(), table, row.clone())?;
                Ok(row)
            }
            Some(txn) => {
                let tables = self.lock_tables();
                let mut staged = self.lock_staged();
                let ops = staged
                    .get_mut(txn.as_str())
                    .ok_or_else(|| StoreError::UnknownTransaction(txn.to_string()))?;
                if Self::visible_row(&tables, ops, table, &row.id).is_some() {
                    return Err(StoreError::Conflict {
                        table: table.clone(),
                        id: row.id,
                    });
                }
                ops.push(StagedOp::Create {
                    table: table.clone(),
                    row: row.clone(),
                });
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
            None => Self::apply_update(
                &mut self.lock_tables(),
                table,
                id,
                data,
                permissions,
                now,
            ),
            Some(txn) => {
                let tables = self.lock_tables();
                let mut staged = self.lock_staged();
                let ops = staged
                    .get_mut(txn.as_str())
                    .ok_or_else(|| StoreError::UnknownTransaction(txn.to_string()))?;
                let mut preview =
                    Self::visible_row(&tables, ops, table, id).ok_or_else(|| {
                        StoreError::NotFound {
                            table: table.clone(),
                            id: id.clone(),
                        }
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
        match txn {
            None => Self::apply_delete(&mut self.lock_tables(), table, id),
            Some(txn) => {
                let tables = self.lock_tables();
                let mut staged = self.lock_staged();
                let ops = staged
                    .get_mut(txn.as_str())
                    .ok_or_else(|| StoreError::UnknownTransaction(txn.to_string()))?;
                if Self::visible_row(&tables, ops, table, id).is_none() {
                    return Err(StoreError::NotFound {
                        table: table.clone(),
                        id: id.clone(),
                    });
                }
                ops.push(StagedOp::Delete {
                    table: table.clone(),
                    id: id.clone(),
                });
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

        let mut tables = self.lock_tables();
        // all-or-nothing: apply to a copy, swap in only on full success
        let mut next = tables.clone();
        for op in ops {
            Self::apply_op(&mut next, op)?;
        }
        *tables = next;
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

    fn table() -> TableId {
        TableId::new("entities")
    }

    fn data(label: &str) -> Map<String, Value> {
        let Value::Object(map) = json!({"label": label}) else {
            panic!("object literal")
        };
        map
    }

    #[tokio::test]
    async fn create_get_update_delete_round_trip() {
        let store = MemoryRowStore::new();

        let row = store
            .create_row(&table(), None, data("Paris"), vec!["read(\"any\")".into()], None)
            .await
            .expect("create");
        assert!(!row.id.as_str().is_empty());

        let fetched = store.get_row(&table(), &row.id).await.expect("get");
        assert_eq!(fetched.data.get("label"), Some(&json!("Paris")));
        assert_eq!(fetched.permissions, vec!["read(\"any\")".to_string()]);

        let updated = store
            .update_row(&table(), &row.id, Some(data("Lutetia")), None, None)
            .await
            .expect("update");
        assert_eq!(updated.data.get("label"), Some(&json!("Lutetia")));

        store
            .delete_row(&table(), &row.id, None)
            .await
            .expect("delete");
        assert!(
            store
                .get_row(&table(), &row.id)
                .await
                .expect_err("gone")
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn explicit_id_conflict_is_rejected() {
        let store = MemoryRowStore::new();
        let id = RowId::new("fixed");
        store
            .create_row(&table(), Some(id.clone()), data("a"), Vec::new(), None)
            .await
            .expect("first create");
        let err = store
            .create_row(&table(), Some(id), data("b"), Vec::new(), None)
            .await
            .expect_err("duplicate");
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn staged_writes_invisible_until_commit() {
        let store = MemoryRowStore::new();
        let txn = store.begin_transaction().await.expect("begin");

        let row = store
            .create_row(&table(), None, data("staged"), Vec::new(), Some(&txn))
            .await
            .expect("stage create");
        assert_eq!(store.row_count(&table()), 0);

        store.commit_transaction(&txn).await.expect("commit");
        assert_eq!(store.row_count(&table()), 1);
        assert!(store.get_row(&table(), &row.id).await.is_ok());
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let store = MemoryRowStore::new();
        let txn = store.begin_transaction().await.expect("begin");
        store
            .create_row(&table(), None, data("ghost"), Vec::new(), Some(&txn))
            .await
            .expect("stage create");
        store.rollback_transaction(&txn).await.expect("rollback");
        assert_eq!(store.row_count(&table()), 0);

        // the handle is gone after resolution
        let err = store
            .commit_transaction(&txn)
            .await
            .expect_err("resolved handle");
        assert!(matches!(err, StoreError::UnknownTransaction(_)));
    }

    #[tokio::test]
    async fn commit_is_atomic_across_staged_ops() {
        let store = MemoryRowStore::new();
        let keeper = store
            .create_row(&table(), Some(RowId::new("keeper")), data("x"), Vec::new(), None)
            .await
            .expect("seed");

        let txn = store.begin_transaction().await.expect("begin");
        store
            .delete_row(&table(), &keeper.id, Some(&txn))
            .await
            .expect("stage delete");
        store
            .create_row(&table(), Some(RowId::new("late")), data("y"), Vec::new(), Some(&txn))
            .await
            .expect("stage create");

        // another actor wins the race and removes the row first
        store
            .delete_row(&table(), &keeper.id, None)
            .await
            .expect("concurrent delete");

        let err = store.commit_transaction(&txn).await.expect_err("conflicted");
        assert!(err.is_not_found());
        // the staged create did not land either
        assert!(
            store
                .get_row(&table(), &RowId::new("late"))
                .await
                .expect_err("late row absent")
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn staged_update_previews_merged_state() {
        let store = MemoryRowStore::new();
        let row = store
            .create_row(&table(), None, data("before"), Vec::new(), None)
            .await
            .expect("seed");

        let txn = store.begin_transaction().await.expect("begin");
        let preview = store
            .update_row(&table(), &row.id, Some(data("after")), None, Some(&txn))
            .await
            .expect("stage update");
        assert_eq!(preview.data.get("label"), Some(&json!("after")));

        // committed state unchanged until commit
        let committed = store.get_row(&table(), &row.id).await.expect("get");
        assert_eq!(committed.data.get("label"), Some(&json!("before")));

        store.commit_transaction(&txn).await.expect("commit");
        let committed = store.get_row(&table(), &row.id).await.expect("get");
        assert_eq!(committed.data.get("label"), Some(&json!("after")));
    }

    #[tokio::test]
    async fn one_hop_expansion_embeds_related_row() {
        let entities = TableId::new("entities");
        let claims = TableId::new("claims");
        let store = MemoryRowStore::with_relations(BTreeMap::from([(
            "subject".to_string(),
            entities.clone(),
        )]));

        let subject = store
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
                &[Filter::select(vec!["subject.*".into(), "datatype".into()])],
            )
            .await
            .expect("list");
        assert_eq!(page.rows.len(), 1);
        let expanded = page.rows[0].data.get("subject").expect("expanded subject");
        assert_eq!(expanded.get("label"), Some(&json!("Paris")));
        assert_eq!(expanded.get("$id"), Some(&json!(subject.id.as_str())));
    }
}
