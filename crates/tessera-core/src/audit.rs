//! # Audit & Rollback Engine
//!
//! Records one append-only [`AuditEntry`] per mutation and can invert a
//! recorded mutation. Audit history is immutable: a rollback always
//! *appends* a new entry pointing at the one it reverts, and review only
//! flips `status` — the underlying mutation is never re-applied or undone
//! by review.
//!
//! Auditing is best-effort observability: with no audit table configured,
//! [`AuditEngine::record`] no-ops and mutations proceed unaudited. Once
//! configured, an audit write failure fails the surrounding transaction —
//! a committed mutation is never silently unaudited.
//!
//! `before`/`after` snapshots hold row contents with transport-only fields
//! (`$`-prefixed: id, timestamps, permission descriptors, table/database
//! identifiers) stripped, never live references.

use crate::error::StoreError;
use crate::gateway::{Filter, Row, RowStore};
use crate::identity::{IdentityProvider, review_permissions};
use crate::journal::Journal;
use crate::txn::{UnitOfWork, run_with_transaction};
use crate::types::{
    AuditConfig, ChangeRecord, RowId, TableId, TransactionId, UserId, from_object, to_object,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// AUDIT TYPES
// =============================================================================

/// The audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuditAction {
    Create,
    Update,
    UpdatePermissions,
    Delete,
    BulkCreate,
    BulkUpdate,
    BulkDelete,
    Rollback,
}

impl AuditAction {
    /// The wire tag for this action.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::UpdatePermissions => "updatePermissions",
            Self::Delete => "delete",
            Self::BulkCreate => "bulkCreate",
            Self::BulkUpdate => "bulkUpdate",
            Self::BulkDelete => "bulkDelete",
            Self::Rollback => "rollback",
        }
    }

    /// Whether the engine knows how to invert this action. Bulk entries
    /// and prior rollbacks are deliberately not invertible.
    #[must_use]
    pub fn is_invertible(&self) -> bool {
        matches!(
            self,
            Self::Create | Self::Update | Self::UpdatePermissions | Self::Delete
        )
    }
}

/// Review state of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

/// One append-only audit log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    #[serde(skip)]
    pub id: RowId,
    pub action: AuditAction,
    #[serde(rename = "tableId")]
    pub table: TableId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<RowId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
    #[serde(default)]
    pub status: AuditStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub changes: Vec<ChangeRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_audit_id: Option<RowId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl AuditEntry {
    /// Build an entry from its audit-table row.
    pub fn from_row(row: &Row) -> Result<Self, StoreError> {
        let mut entry: Self = from_object(&row.data)?;
        entry.id = row.id.clone();
        Ok(entry)
    }

    /// Serialize the entry into a row document.
    pub fn to_data(&self) -> Result<Map<String, Value>, StoreError> {
        to_object(self)
    }
}

/// Input for recording one audit entry.
#[derive(Debug, Clone, Default)]
pub struct AuditDraft {
    pub action: Option<AuditAction>,
    pub table: Option<TableId>,
    pub row_id: Option<RowId>,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub transaction_id: Option<String>,
    pub changes: Vec<ChangeRecord>,
    pub count: Option<usize>,
    pub note: Option<String>,
    pub related_audit_id: Option<RowId>,
}

impl AuditDraft {
    /// Draft describing an action on one row.
    #[must_use]
    pub fn for_row(action: AuditAction, table: TableId, row_id: RowId) -> Self {
        Self {
            action: Some(action),
            table: Some(table),
            row_id: Some(row_id),
            ..Self::default()
        }
    }

    /// Draft summarizing a bulk action (`count` = attempted rows).
    #[must_use]
    pub fn bulk(action: AuditAction, table: TableId, count: usize) -> Self {
        Self {
            action: Some(action),
            table: Some(table),
            count: Some(count),
            ..Self::default()
        }
    }

    /// Attach the pre-mutation snapshot.
    #[must_use]
    pub fn with_before(mut self, before: Value) -> Self {
        self.before = Some(before);
        self
    }

    /// Attach the post-mutation snapshot.
    #[must_use]
    pub fn with_after(mut self, after: Value) -> Self {
        self.after = Some(after);
        self
    }

    /// Attach the change accumulator.
    #[must_use]
    pub fn with_changes(mut self, changes: Vec<ChangeRecord>) -> Self {
        self.changes = changes;
        self
    }

    /// Attach the enclosing transaction id.
    #[must_use]
    pub fn with_transaction(mut self, txn: &TransactionId) -> Self {
        self.transaction_id = Some(txn.to_string());
        self
    }

    /// Attach a caller note.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Strip transport-only fields (every `$`-prefixed key) from a snapshot.
#[must_use]
pub fn strip_transport_fields(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !key.starts_with('$'))
                .map(|(key, v)| (key.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// The audit engine, borrowing the gateway, identity provider, and audit
/// configuration of its statement store.
#[derive(Debug)]
pub struct AuditEngine<'a, S, I> {
    rows: &'a S,
    identity: &'a I,
    config: &'a AuditConfig,
}

// manual impls: the engine only holds references, so it is Copy no matter
// what the backends are (a derive would demand S: Copy, I: Copy)
impl<S, I> Clone for AuditEngine<'_, S, I> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, I> Copy for AuditEngine<'_, S, I> {}

impl<'a, S: RowStore, I: IdentityProvider> AuditEngine<'a, S, I> {
    /// Create an engine over the given collaborators.
    #[must_use]
    pub fn new(rows: &'a S, identity: &'a I, config: &'a AuditConfig) -> Self {
        Self {
            rows,
            identity,
            config,
        }
    }

    fn table(&self) -> Result<&'a TableId, StoreError> {
        self.config
            .table
            .as_ref()
            .ok_or_else(|| StoreError::Validation("auditing is not configured".into()))
    }

    /// Record one audit entry.
    ///
    /// Returns `Ok(None)` without touching the row store when auditing is
    /// not configured — auditing never gates a mutation. Snapshots are
    /// stripped of transport fields; the acting identity is resolved and
    /// stamped; review-team permission descriptors are attached when a
    /// reviewing team is configured.
    pub async fn record(
        &self,
        draft: AuditDraft,
        txn: Option<&TransactionId>,
    ) -> Result<Option<AuditEntry>, StoreError> {
        let Some(table) = &self.config.table else {
            tracing::trace!("audit not configured, skipping entry");
            return Ok(None);
        };
        let (Some(action), Some(target_table)) = (draft.action, draft.table.clone()) else {
            return Err(StoreError::Validation(
                "audit draft must name an action and a table".into(),
            ));
        };

        let user = self.identity.current_user().await?;
        let entry = AuditEntry {
            id: RowId::default(),
            action,
            table: target_table,
            row_id: draft.row_id,
            before: draft.before.as_ref().map(strip_transport_fields),
            after: draft.after.as_ref().map(strip_transport_fields),
            status: AuditStatus::Pending,
            transaction_id: draft.transaction_id,
            changes: draft.changes,
            count: draft.count,
            user_id: Some(user.id),
            user_email: user.email,
            note: draft.note,
            related_audit_id: draft.related_audit_id,
            reviewed_at: None,
        };

        let permissions = self
            .config
            .review_team
            .as_ref()
            .map(review_permissions)
            .unwrap_or_default();
        let row = self
            .rows
            .create_row(table, None, entry.to_data()?, permissions, txn)
            .await?;
        tracing::debug!(action = action.as_str(), audit_id = %row.id, "audit entry recorded");
        AuditEntry::from_row(&row).map(Some)
    }

    /// Fetch one audit entry.
    pub async fn get(&self, id: &RowId) -> Result<AuditEntry, StoreError> {
        let row = self.rows.get_row(self.table()?, id).await?;
        AuditEntry::from_row(&row)
    }

    /// List the audit history of one row, newest first.
    pub async fn list_for_row(&self, row_id: &RowId) -> Result<Vec<AuditEntry>, StoreError> {
        let page = self
            .rows
            .list_rows(
                self.table()?,
                &[
                    Filter::equal("rowId", row_id.as_str()),
                    Filter::order_desc("$createdAt"),
                ],
            )
            .await?;
        page.rows.iter().map(AuditEntry::from_row).collect()
    }

    /// Approve an entry. Flips `status` and stamps the review timestamp;
    /// never touches snapshots and never re-applies the mutation.
    /// Idempotent.
    pub async fn approve(&self, id: &RowId, note: Option<String>) -> Result<AuditEntry, StoreError> {
        self.review(id, AuditStatus::Approved, note).await
    }

    /// Reject an entry. Same contract as [`Self::approve`].
    pub async fn reject(&self, id: &RowId, note: Option<String>) -> Result<AuditEntry, StoreError> {
        self.review(id, AuditStatus::Rejected, note).await
    }

    async fn review(
        &self,
        id: &RowId,
        status: AuditStatus,
        note: Option<String>,
    ) -> Result<AuditEntry, StoreError> {
        let table = self.table()?;
        let row = self.rows.get_row(table, id).await?;
        let mut entry = AuditEntry::from_row(&row)?;
        entry.status = status;
        entry.reviewed_at = Some(Utc::now());
        if note.is_some() {
            entry.note = note;
        }
        let updated = self
            .rows
            .update_row(table, id, Some(entry.to_data()?), None, None)
            .await?;
        AuditEntry::from_row(&updated)
    }

    /// Invert a recorded mutation.
    ///
    /// Dispatches on the entry's action: `create` deletes the row,
    /// `update`/`updatePermissions` restore the `before` snapshot, `delete`
    /// re-creates the row from it. Anything else — bulk entries, prior
    /// rollbacks — is refused. The inversion runs in its own transaction
    /// and appends a new `rollback` entry with swapped snapshots and
    /// `related_audit_id` pointing at `entry`, so rollback is itself an
    /// audited mutation.
    pub async fn rollback(
        &self,
        journal: &Journal,
        entry: &AuditEntry,
        note: Option<String>,
    ) -> Result<AuditEntry, StoreError> {
        self.table()?;
        if !entry.action.is_invertible() {
            return Err(StoreError::RollbackUnsupported(
                entry.action.as_str().to_string(),
            ));
        }
        let row_id = entry
            .row_id
            .clone()
            .ok_or_else(|| StoreError::Validation("audit entry names no row".into()))?;
        if matches!(
            entry.action,
            AuditAction::Update | AuditAction::UpdatePermissions | AuditAction::Delete
        ) && entry.before.is_none()
        {
            return Err(StoreError::MissingSnapshot(entry.id.clone()));
        }

        let engine = *self;
        run_with_transaction(self.rows, journal, "audit.rollback", |txn| async move {
            let change = match entry.action {
                AuditAction::Create => {
                    engine
                        .rows
                        .delete_row(&entry.table, &row_id, Some(&txn))
                        .await?;
                    ChangeRecord::delete(entry.table.clone(), row_id.clone())
                }
                AuditAction::Update => {
                    let data = snapshot_object(entry.before.as_ref(), &entry.id)?;
                    engine
                        .rows
                        .update_row(&entry.table, &row_id, Some(data), None, Some(&txn))
                        .await?;
                    ChangeRecord::update(entry.table.clone(), row_id.clone())
                }
                AuditAction::UpdatePermissions => {
                    let permissions = permissions_from_snapshot(entry.before.as_ref(), &entry.id)?;
                    engine
                        .rows
                        .update_row(&entry.table, &row_id, None, Some(permissions), Some(&txn))
                        .await?;
                    ChangeRecord::update(entry.table.clone(), row_id.clone())
                }
                AuditAction::Delete => {
                    let data = snapshot_object(entry.before.as_ref(), &entry.id)?;
                    // permission descriptors were stripped from the
                    // snapshot; the row returns without them
                    engine
                        .rows
                        .create_row(&entry.table, Some(row_id.clone()), data, Vec::new(), Some(&txn))
                        .await?;
                    ChangeRecord::create(entry.table.clone(), row_id.clone())
                }
                other => {
                    return Err(StoreError::RollbackUnsupported(other.as_str().to_string()));
                }
            };

            let mut draft =
                AuditDraft::for_row(AuditAction::Rollback, entry.table.clone(), row_id.clone());
            draft.before = entry.after.clone();
            draft.after = entry.before.clone();
            draft.transaction_id = Some(txn.to_string());
            draft.changes = vec![change.clone()];
            draft.note = note;
            draft.related_audit_id = Some(entry.id.clone());

            let Some(recorded) = engine.record(draft, Some(&txn)).await? else {
                return Err(StoreError::Validation("auditing is not configured".into()));
            };
            Ok(UnitOfWork::new(recorded, vec![change]))
        })
        .await
    }
}

fn snapshot_object(
    snapshot: Option<&Value>,
    entry_id: &RowId,
) -> Result<Map<String, Value>, StoreError> {
    match snapshot {
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(StoreError::Validation(format!(
            "snapshot is not a row document: {other}"
        ))),
        None => Err(StoreError::MissingSnapshot(entry_id.clone())),
    }
}

fn permissions_from_snapshot(
    snapshot: Option<&Value>,
    entry_id: &RowId,
) -> Result<Vec<String>, StoreError> {
    let map = snapshot_object(snapshot, entry_id)?;
    let value = map.get("permissions").cloned().unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(value).map_err(StoreError::serialization)
}

// =============================================================================
// TESTS
// =============================================================================
