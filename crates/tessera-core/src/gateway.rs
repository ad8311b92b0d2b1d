//! # Row Store Gateway
//!
//! The contract over an external row-oriented document database. The core
//! depends on this trait for CRUD, filtered listing, and atomic multi-row
//! transaction primitives; backends stage transactional writes and apply
//! them in one atomic step on commit.
//!
//! Two backends ship with the crate: [`crate::memory::MemoryRowStore`]
//! (volatile, test-friendly) and [`crate::storage::RedbRowStore`]
//! (disk-backed). Both evaluate list queries through the shared helpers in
//! this module so filter semantics cannot drift between backends.
//!
//! ## Isolation
//!
//! Reads are never isolated from concurrent writers: `get_row` and
//! `list_rows` observe committed state only, and a row created by another
//! actor between an enumeration read and a transaction commit is not seen
//! by that transaction. Atomicity applies to the staged write set alone.

use crate::error::StoreError;
use crate::types::{RowId, TableId, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

// =============================================================================
// ROW
// =============================================================================

/// One row of a logical table.
///
/// `data` is the document payload; id, timestamps, and permission
/// descriptors are transport fields carried next to it, never inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub id: RowId,
    pub data: Map<String, Value>,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Row {
    /// Create a fresh row stamped with the current time.
    #[must_use]
    pub fn new(id: RowId, data: Map<String, Value>, permissions: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            data,
            permissions,
            created_at: now,
            updated_at: now,
        }
    }

    /// The document payload as a JSON value (for audit snapshots).
    #[must_use]
    pub fn snapshot(&self) -> Value {
        Value::Object(self.data.clone())
    }

    /// Look up a field for filter evaluation.
    ///
    /// `$id`, `$createdAt`, and `$updatedAt` address transport fields;
    /// anything else addresses the document payload.
    #[must_use]
    pub fn field_value(&self, field: &str) -> Option<Value> {
        match field {
            "$id" => Some(Value::String(self.id.0.clone())),
            "$createdAt" => Some(Value::String(self.created_at.to_rfc3339())),
            "$updatedAt" => Some(Value::String(self.updated_at.to_rfc3339())),
            _ => self.data.get(field).cloned(),
        }
    }
}

/// One page of a list query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowPage {
    /// Number of rows matching the predicates, before offset/limit.
    pub total: usize,
    pub rows: Vec<Row>,
}

// =============================================================================
// FILTERS
// =============================================================================

/// A list-query clause.
///
/// `Equal`, `Contains`, and `Or` are predicates; the rest shape the result
/// (ordering, paging, field selection). A `Select` term of the form
/// `field.*` requests one-hop expansion of a relation field, resolved by
/// the backend through its relation map.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Equal { field: String, value: Value },
    Contains { field: String, value: String },
    Or(Vec<Filter>),
    OrderAsc(String),
    OrderDesc(String),
    Limit(usize),
    Offset(usize),
    Select(Vec<String>),
}

impl Filter {
    /// Equality predicate.
    #[must_use]
    pub fn equal(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equal {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Substring predicate. Matches string fields containing `value`, or
    /// string-array fields with any element containing it.
    #[must_use]
    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Contains {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Logical OR over predicate clauses.
    #[must_use]
    pub fn any(filters: Vec<Filter>) -> Self {
        Self::Or(filters)
    }

    /// Ascending order by field.
    #[must_use]
    pub fn order_asc(field: impl Into<String>) -> Self {
        Self::OrderAsc(field.into())
    }

    /// Descending order by field.
    #[must_use]
    pub fn order_desc(field: impl Into<String>) -> Self {
        Self::OrderDesc(field.into())
    }

    /// Field selection; `field.*` terms request one-hop expansion.
    #[must_use]
    pub fn select(fields: Vec<String>) -> Self {
        Self::Select(fields)
    }

    fn is_predicate(&self) -> bool {
        matches!(self, Self::Equal { .. } | Self::Contains { .. } | Self::Or(_))
    }
}

// =============================================================================
// ROW STORE TRAIT
// =============================================================================

/// The row store contract.
///
/// Mutating operations accept an optional transaction handle. With a
/// handle, the write is staged and becomes visible only when the
/// transaction commits; without one, it applies immediately. Staged writes
/// of one transaction apply atomically — a commit either lands all of them
/// or none.
#[allow(async_fn_in_trait)]
pub trait RowStore {
    /// Fetch one row by id.
    async fn get_row(&self, table: &TableId, id: &RowId) -> Result<Row, StoreError>;

    /// List rows matching the given filters (committed state only).
    async fn list_rows(&self, table: &TableId, filters: &[Filter]) -> Result<RowPage, StoreError>;

    /// Create a row. With `id` unset the backend generates one.
    async fn create_row(
        &self,
        table: &TableId,
        id: Option<RowId>,
        data: Map<String, Value>,
        permissions: Vec<String>,
        txn: Option<&TransactionId>,
    ) -> Result<Row, StoreError>;

    /// Update a row. `data` replaces the whole document when set;
    /// `permissions` replaces the descriptor list when set.
    async fn update_row(
        &self,
        table: &TableId,
        id: &RowId,
        data: Option<Map<String, Value>>,
        permissions: Option<Vec<String>>,
        txn: Option<&TransactionId>,
    ) -> Result<Row, StoreError>;

    /// Delete a row.
    async fn delete_row(
        &self,
        table: &TableId,
        id: &RowId,
        txn: Option<&TransactionId>,
    ) -> Result<(), StoreError>;

    /// Begin a transaction and return its handle.
    async fn begin_transaction(&self) -> Result<TransactionId, StoreError>;

    /// Atomically apply every write staged under the handle.
    async fn commit_transaction(&self, txn: &TransactionId) -> Result<(), StoreError>;

    /// Discard every write staged under the handle.
    async fn rollback_transaction(&self, txn: &TransactionId) -> Result<(), StoreError>;

    /// Batched create; backends may override with a native batch call.
    async fn create_rows(
        &self,
        table: &TableId,
        rows: Vec<(Option<RowId>, Map<String, Value>)>,
        permissions: Vec<String>,
        txn: Option<&TransactionId>,
    ) -> Result<Vec<Row>, StoreError> {
        let mut created = Vec::with_capacity(rows.len());
        for (id, data) in rows {
            created.push(
                self.create_row(table, id, data, permissions.clone(), txn)
                    .await?,
            );
        }
        Ok(created)
    }

    /// Batched update.
    async fn update_rows(
        &self,
        table: &TableId,
        items: Vec<(RowId, Map<String, Value>)>,
        txn: Option<&TransactionId>,
    ) -> Result<Vec<Row>, StoreError> {
        let mut updated = Vec::with_capacity(items.len());
        for (id, data) in items {
            updated.push(self.update_row(table, &id, Some(data), None, txn).await?);
        }
        Ok(updated)
    }

    /// Batched delete.
    async fn delete_rows(
        &self,
        table: &TableId,
        ids: &[RowId],
        txn: Option<&TransactionId>,
    ) -> Result<(), StoreError> {
        for id in ids {
            self.delete_row(table, id, txn).await?;
        }
        Ok(())
    }
}

// =============================================================================
// STAGED OPERATIONS (shared by backends)
// =============================================================================

/// A write staged under a transaction, applied at commit.
#[derive(Debug, Clone)]
pub(crate) enum StagedOp {
    Create {
        table: TableId,
        row: Row,
    },
    Update {
        table: TableId,
        id: RowId,
        data: Option<Map<String, Value>>,
        permissions: Option<Vec<String>>,
        updated_at: DateTime<Utc>,
    },
    Delete {
        table: TableId,
        id: RowId,
    },
}

// =============================================================================
// QUERY EVALUATION (shared by backends)
// =============================================================================

/// Evaluate predicates, ordering, and paging over a table snapshot.
///
/// Selection/expansion is applied separately (see [`apply_selection`] and
/// [`expansion_fields`]) because expansion needs backend reads.
#[must_use]
pub fn evaluate_filters(rows: Vec<Row>, filters: &[Filter]) -> RowPage {
    let mut matched: Vec<Row> = rows
        .into_iter()
        .filter(|row| {
            filters
                .iter()
                .filter(|f| f.is_predicate())
                .all(|f| matches_filter(row, f))
        })
        .collect();

    // apply orderings in reverse so the first-specified order ends up
    // dominant (stable sorts make later passes the primary key)
    for filter in filters.iter().rev() {
        match filter {
            Filter::OrderAsc(field) => {
                matched.sort_by(|a, b| compare_fields(a, b, field));
            }
            Filter::OrderDesc(field) => {
                matched.sort_by(|a, b| compare_fields(b, a, field));
            }
            _ => {}
        }
    }

    let total = matched.len();
    let offset = filters
        .iter()
        .find_map(|f| match f {
            Filter::Offset(n) => Some(*n),
            _ => None,
        })
        .unwrap_or(0);
    let limit = filters.iter().find_map(|f| match f {
        Filter::Limit(n) => Some(*n),
        _ => None,
    });

    let mut rows: Vec<Row> = matched.into_iter().skip(offset).collect();
    if let Some(limit) = limit {
        rows.truncate(limit);
    }

    RowPage { total, rows }
}

/// Relation fields named by `field.*` selection terms.
#[must_use]
pub fn expansion_fields(filters: &[Filter]) -> Vec<String> {
    selection_terms(filters)
        .iter()
        .filter_map(|term| term.strip_suffix(".*").map(str::to_string))
        .collect()
}

/// Project each row's payload down to the selected fields.
///
/// No-op without a `Select` filter. Expansion terms keep their base field.
pub fn apply_selection(rows: &mut [Row], filters: &[Filter]) {
    let terms = selection_terms(filters);
    if terms.is_empty() {
        return;
    }
    let keep: Vec<&str> = terms
        .iter()
        .map(|t| t.strip_suffix(".*").unwrap_or(t))
        .collect();
    for row in rows {
        row.data.retain(|key, _| keep.contains(&key.as_str()));
    }
}

fn selection_terms(filters: &[Filter]) -> Vec<String> {
    let mut terms = Vec::new();
    for filter in filters {
        if let Filter::Select(fields) = filter {
            terms.extend(fields.iter().cloned());
        }
    }
    terms
}

fn matches_filter(row: &Row, filter: &Filter) -> bool {
    match filter {
        Filter::Equal { field, value } => row.field_value(field).as_ref() == Some(value),
        Filter::Contains { field, value } => match row.field_value(field) {
            Some(Value::String(s)) => s.contains(value.as_str()),
            Some(Value::Array(items)) => items
                .iter()
                .any(|item| matches!(item, Value::String(s) if s.contains(value.as_str()))),
            _ => false,
        },
        Filter::Or(filters) => filters.iter().any(|f| matches_filter(row, f)),
        // result-shaping clauses do not constrain rows
        _ => true,
    }
}

fn compare_fields(a: &Row, b: &Row, field: &str) -> Ordering {
    match (a.field_value(field), b.field_value(field)) {
        (Some(x), Some(y)) => compare_values(&x, &y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
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

    fn row(id: &str, data: Value) -> Row {
        let Value::Object(map) = data else {
            panic!("test rows must be objects")
        };
        Row::new(RowId::new(id), map, Vec::new())
    }

    fn sample_rows() -> Vec<Row> {
        vec![
            row("r1", json!({"label": "Paris", "rank": 3, "aliases": ["Lutetia"]})),
            row("r2", json!({"label": "Rome", "rank": 1})),
            row("r3", json!({"label": "Berlin", "rank": 2})),
        ]
    }

    #[test]
    fn equal_predicate_matches_payload_and_id() {
        let page = evaluate_filters(sample_rows(), &[Filter::equal("label", "Rome")]);
        assert_eq!(page.total, 1);
        assert_eq!(page.rows[0].id, RowId::new("r2"));

        let page = evaluate_filters(sample_rows(), &[Filter::equal("$id", "r3")]);
        assert_eq!(page.total, 1);
    }

    #[test]
    fn contains_predicate_searches_strings_and_arrays() {
        let page = evaluate_filters(sample_rows(), &[Filter::contains("label", "er")]);
        assert_eq!(page.total, 1);
        assert_eq!(page.rows[0].id, RowId::new("r3"));

        let page = evaluate_filters(sample_rows(), &[Filter::contains("aliases", "Lutet")]);
        assert_eq!(page.total, 1);
        assert_eq!(page.rows[0].id, RowId::new("r1"));
    }

    #[test]
    fn or_predicate_unions_clauses() {
        let page = evaluate_filters(
            sample_rows(),
            &[Filter::any(vec![
                Filter::equal("label", "Rome"),
                Filter::equal("label", "Berlin"),
            ])],
        );
        assert_eq!(page.total, 2);
    }

    #[test]
    fn ordering_and_paging() {
        let page = evaluate_filters(
            sample_rows(),
            &[Filter::order_asc("rank"), Filter::Offset(1), Filter::Limit(1)],
        );
        assert_eq!(page.total, 3);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].id, RowId::new("r3"));

        let page = evaluate_filters(sample_rows(), &[Filter::order_desc("rank")]);
        assert_eq!(page.rows[0].id, RowId::new("r1"));
    }

    #[test]
    fn selection_projects_fields_and_keeps_expansion_base() {
        let filters = vec![Filter::select(vec!["label".into(), "subject.*".into()])];
        assert_eq!(expansion_fields(&filters), vec!["subject".to_string()]);

        let mut rows = vec![row(
            "r1",
            json!({"label": "x", "rank": 9, "subject": "q1"}),
        )];
        apply_selection(&mut rows, &filters);
        assert_eq!(rows[0].data.get("label"), Some(&json!("x")));
        assert_eq!(rows[0].data.get("subject"), Some(&json!("q1")));
        assert_eq!(rows[0].data.get("rank"), None);
    }

    #[test]
    fn limit_zero_returns_no_rows() {
        let page = evaluate_filters(sample_rows(), &[Filter::Limit(0)]);
        assert_eq!(page.total, 3);
        assert!(page.rows.is_empty());
    }
}
