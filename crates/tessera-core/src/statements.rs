//! # Statement Store API
//!
//! The public surface consumed by UI callers: typed create/update/delete
//! for entities, claims, qualifiers, and references; permission-update
//! variants; bulk row operations; and reads with dependent-list expansion.
//!
//! Every mutation follows one pattern: read the "before" state (for
//! update/delete), perform the row mutations — through the cascade planner
//! when deletion implies dependents — record one audit entry describing the
//! net change, and return the mutated record, all inside a single
//! orchestrated transaction. Oversized literal values are offloaded to
//! object storage *before* the transaction opens (object storage is not
//! transactional) and stored as pointer envelopes.

use crate::audit::{AuditAction, AuditDraft, AuditEntry, AuditEngine};
use crate::cascade::DeletePlan;
use crate::error::StoreError;
use crate::gateway::{Filter, Row, RowStore};
use crate::identity::{IdentityProvider, team_full};
use crate::journal::{DEFAULT_JOURNAL_CAPACITY, Journal};
use crate::objects::ObjectStore;
use crate::registry::ValueRegistry;
use crate::txn::{UnitOfWork, run_with_transaction};
use crate::types::{
    ChangeRecord, Claim, ClaimDraft, CoreConfig, Entity, EntityDraft, FilePointer, Qualifier,
    QualifierDraft, Reference, ReferenceDraft, RowId, TableId, TeamId, ValueEnvelope,
};
use serde_json::{Map, Value, json};

// =============================================================================
// BULK TYPES
// =============================================================================

/// Options for bulk row operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct BulkOptions {
    /// With `true`, items run independently and per-item failures are
    /// collected; with `false`, the first failure aborts the whole batch
    /// atomically.
    pub continue_on_error: bool,
}

/// One collected per-item failure.
#[derive(Debug)]
pub struct BulkError {
    pub index: usize,
    pub error: StoreError,
}

/// Outcome of a bulk row operation. Deletes report through `errors` and
/// the audit change list only; `results` stays empty for them.
#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub results: Vec<Row>,
    pub errors: Vec<BulkError>,
}

// =============================================================================
// STATEMENT STORE
// =============================================================================

/// The statement store facade, generic over its three external
/// collaborators: the row store gateway, object storage, and the identity
/// service.
#[derive(Debug)]
pub struct StatementStore<S, O, I> {
    rows: S,
    objects: O,
    identity: I,
    registry: ValueRegistry,
    config: CoreConfig,
    journal: Journal,
}

impl<S, O, I> StatementStore<S, O, I>
where
    S: RowStore,
    O: ObjectStore,
    I: IdentityProvider,
{
    /// Create a store with the built-in value registry.
    #[must_use]
    pub fn new(rows: S, objects: O, identity: I, config: CoreConfig) -> Self {
        let journal = Journal::new(config.journal_capacity.unwrap_or(DEFAULT_JOURNAL_CAPACITY));
        Self {
            rows,
            objects,
            identity,
            registry: ValueRegistry::with_builtins(),
            config,
            journal,
        }
    }

    /// Replace the value registry (resolved plugin set).
    #[must_use]
    pub fn with_registry(mut self, registry: ValueRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// The underlying row store.
    #[must_use]
    pub fn rows(&self) -> &S {
        &self.rows
    }

    /// The local operation journal.
    #[must_use]
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// The resolved value registry.
    #[must_use]
    pub fn registry(&self) -> &ValueRegistry {
        &self.registry
    }

    /// The store configuration.
    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    fn audit_engine(&self) -> AuditEngine<'_, S, I> {
        AuditEngine::new(&self.rows, &self.identity, &self.config.audit)
    }

    // =========================================================================
    // ENTITIES
    // =========================================================================

    /// Create an entity.
    pub async fn create_entity(
        &self,
        draft: EntityDraft,
        team: Option<&TeamId>,
    ) -> Result<Entity, StoreError> {
        draft.validate()?;
        let row = self
            .create_record(
                &self.config.tables.entities,
                draft.to_data()?,
                team.map(team_full).unwrap_or_default(),
                "entity.create",
            )
            .await?;
        Entity::from_row(&row)
    }

    /// Fetch one entity.
    pub async fn get_entity(&self, id: &RowId) -> Result<Entity, StoreError> {
        let row = self.rows.get_row(&self.config.tables.entities, id).await?;
        Entity::from_row(&row)
    }

    /// List entities matching the given filters.
    pub async fn list_entities(&self, filters: &[Filter]) -> Result<Vec<Entity>, StoreError> {
        let page = self
            .rows
            .list_rows(&self.config.tables.entities, filters)
            .await?;
        page.rows.iter().map(Entity::from_row).collect()
    }

    /// Replace an entity's label/description/aliases.
    pub async fn update_entity(
        &self,
        id: &RowId,
        draft: EntityDraft,
    ) -> Result<Entity, StoreError> {
        draft.validate()?;
        let row = self
            .update_record(
                &self.config.tables.entities,
                id,
                draft.to_data()?,
                "entity.update",
            )
            .await?;
        Entity::from_row(&row)
    }

    /// Delete an entity and, through the cascade planner, every claim whose
    /// subject it is plus those claims' qualifiers and references.
    pub async fn delete_entity(&self, id: &RowId) -> Result<Entity, StoreError> {
        let tables = &self.config.tables;
        let plan = DeletePlan::for_entity(&self.rows, tables, id).await?;
        let before = self
            .delete_record(&tables.entities, id, plan, "entity.delete")
            .await?;
        Entity::from_row(&before)
    }

    /// Replace an entity's permission descriptors, preserving its data.
    pub async fn update_entity_permissions(
        &self,
        id: &RowId,
        permissions: Vec<String>,
    ) -> Result<Entity, StoreError> {
        let row = self
            .update_permissions_record(
                &self.config.tables.entities,
                id,
                permissions,
                "entity.permissions",
            )
            .await?;
        Entity::from_row(&row)
    }

    // =========================================================================
    // CLAIMS
    // =========================================================================

    /// Create a claim. The subject, property, and any relation target must
    /// already exist; cascade ordering is what keeps the graph closed, not
    /// a backend foreign key.
    pub async fn create_claim(
        &self,
        mut draft: ClaimDraft,
        team: Option<&TeamId>,
    ) -> Result<Claim, StoreError> {
        draft.validate()?;
        let tables = &self.config.tables;
        self.rows.get_row(&tables.entities, &draft.subject).await?;
        self.rows.get_row(&tables.entities, &draft.property).await?;
        if let Some(target) = &draft.value_relation {
            self.rows.get_row(&tables.entities, target).await?;
        }
        draft.value = self.prepare_value(draft.value.take(), team).await?;
        let row = self
            .create_record(
                &tables.claims,
                draft.to_data()?,
                team.map(team_full).unwrap_or_default(),
                "claim.create",
            )
            .await?;
        Claim::from_row(&row)
    }

    /// Fetch one claim together with its qualifier and reference lists.
    pub async fn get_claim(&self, id: &RowId) -> Result<Claim, StoreError> {
        let tables = &self.config.tables;
        let row = self.rows.get_row(&tables.claims, id).await?;
        let mut claim = Claim::from_row(&row)?;
        let filter = [Filter::equal("claim", id.as_str())];
        let qualifiers = self.rows.list_rows(&tables.qualifiers, &filter).await?;
        claim.qualifiers = qualifiers
            .rows
            .iter()
            .map(Qualifier::from_row)
            .collect::<Result<_, _>>()?;
        let references = self.rows.list_rows(&tables.references, &filter).await?;
        claim.references = references
            .rows
            .iter()
            .map(Reference::from_row)
            .collect::<Result<_, _>>()?;
        Ok(claim)
    }

    /// List the claims whose subject is the given entity (dependent lists
    /// not expanded).
    pub async fn list_claims_for_subject(
        &self,
        subject: &RowId,
    ) -> Result<Vec<Claim>, StoreError> {
        let page = self
            .rows
            .list_rows(
                &self.config.tables.claims,
                &[Filter::equal("subject", subject.as_str())],
            )
            .await?;
        page.rows.iter().map(Claim::from_row).collect()
    }

    /// Replace a claim's property/datatype/value.
    pub async fn update_claim(
        &self,
        id: &RowId,
        mut draft: ClaimDraft,
        team: Option<&TeamId>,
    ) -> Result<Claim, StoreError> {
        draft.validate()?;
        let tables = &self.config.tables;
        self.rows.get_row(&tables.entities, &draft.subject).await?;
        self.rows.get_row(&tables.entities, &draft.property).await?;
        if let Some(target) = &draft.value_relation {
            self.rows.get_row(&tables.entities, target).await?;
        }
        draft.value = self.prepare_value(draft.value.take(), team).await?;
        let row = self
            .update_record(&tables.claims, id, draft.to_data()?, "claim.update")
            .await?;
        Claim::from_row(&row)
    }

    /// Delete a claim and its qualifiers and references.
    pub async fn delete_claim(&self, id: &RowId) -> Result<Claim, StoreError> {
        let tables = &self.config.tables;
        let plan = DeletePlan::for_claim(&self.rows, tables, id).await?;
        let before = self
            .delete_record(&tables.claims, id, plan, "claim.delete")
            .await?;
        Claim::from_row(&before)
    }

    /// Replace a claim's permission descriptors, preserving its data.
    pub async fn update_claim_permissions(
        &self,
        id: &RowId,
        permissions: Vec<String>,
    ) -> Result<Claim, StoreError> {
        let row = self
            .update_permissions_record(
                &self.config.tables.claims,
                id,
                permissions,
                "claim.permissions",
            )
            .await?;
        Claim::from_row(&row)
    }

    // =========================================================================
    // QUALIFIERS
    // =========================================================================

    /// Create a qualifier on an existing claim.
    pub async fn create_qualifier(
        &self,
        mut draft: QualifierDraft,
        team: Option<&TeamId>,
    ) -> Result<Qualifier, StoreError> {
        draft.validate()?;
        let tables = &self.config.tables;
        self.rows.get_row(&tables.claims, &draft.claim).await?;
        draft.value = self.prepare_value(draft.value.take(), team).await?;
        let row = self
            .create_record(
                &tables.qualifiers,
                draft.to_data()?,
                team.map(team_full).unwrap_or_default(),
                "qualifier.create",
            )
            .await?;
        Qualifier::from_row(&row)
    }

    /// Replace a qualifier.
    pub async fn update_qualifier(
        &self,
        id: &RowId,
        mut draft: QualifierDraft,
        team: Option<&TeamId>,
    ) -> Result<Qualifier, StoreError> {
        draft.validate()?;
        draft.value = self.prepare_value(draft.value.take(), team).await?;
        let row = self
            .update_record(
                &self.config.tables.qualifiers,
                id,
                draft.to_data()?,
                "qualifier.update",
            )
            .await?;
        Qualifier::from_row(&row)
    }

    /// Delete a qualifier.
    pub async fn delete_qualifier(&self, id: &RowId) -> Result<Qualifier, StoreError> {
        let table = &self.config.tables.qualifiers;
        let plan = DeletePlan::single(table.clone(), id.clone());
        let before = self
            .delete_record(table, id, plan, "qualifier.delete")
            .await?;
        Qualifier::from_row(&before)
    }

    /// Replace a qualifier's permission descriptors.
    pub async fn update_qualifier_permissions(
        &self,
        id: &RowId,
        permissions: Vec<String>,
    ) -> Result<Qualifier, StoreError> {
        let row = self
            .update_permissions_record(
                &self.config.tables.qualifiers,
                id,
                permissions,
                "qualifier.permissions",
            )
            .await?;
        Qualifier::from_row(&row)
    }

    // =========================================================================
    // REFERENCES
    // =========================================================================

    /// Create a reference on an existing claim.
    pub async fn create_reference(
        &self,
        draft: ReferenceDraft,
        team: Option<&TeamId>,
    ) -> Result<Reference, StoreError> {
        draft.validate()?;
        let tables = &self.config.tables;
        self.rows.get_row(&tables.claims, &draft.claim).await?;
        if let Some(target) = &draft.reference {
            self.rows.get_row(&tables.entities, target).await?;
        }
        let row = self
            .create_record(
                &tables.references,
                draft.to_data()?,
                team.map(team_full).unwrap_or_default(),
                "reference.create",
            )
            .await?;
        Reference::from_row(&row)
    }

    /// Replace a reference.
    pub async fn update_reference(
        &self,
        id: &RowId,
        draft: ReferenceDraft,
    ) -> Result<Reference, StoreError> {
        draft.validate()?;
        let row = self
            .update_record(
                &self.config.tables.references,
                id,
                draft.to_data()?,
                "reference.update",
            )
            .await?;
        Reference::from_row(&row)
    }

    /// Delete a reference.
    pub async fn delete_reference(&self, id: &RowId) -> Result<Reference, StoreError> {
        let table = &self.config.tables.references;
        let plan = DeletePlan::single(table.clone(), id.clone());
        let before = self
            .delete_record(table, id, plan, "reference.delete")
            .await?;
        Reference::from_row(&before)
    }

    /// Replace a reference's permission descriptors.
    pub async fn update_reference_permissions(
        &self,
        id: &RowId,
        permissions: Vec<String>,
    ) -> Result<Reference, StoreError> {
        let row = self
            .update_permissions_record(
                &self.config.tables.references,
                id,
                permissions,
                "reference.permissions",
            )
            .await?;
        Reference::from_row(&row)
    }

    // =========================================================================
    // BULK OPERATIONS
    // =========================================================================

    /// Bulk-create rows. An item map may carry an explicit `$id`.
    ///
    /// Exactly one summary audit entry records the action and the number of
    /// *attempted* rows, never one entry per row.
    pub async fn create_rows_bulk(
        &self,
        table: &TableId,
        rows: Vec<Map<String, Value>>,
        team: Option<&TeamId>,
        options: BulkOptions,
    ) -> Result<BulkOutcome, StoreError> {
        let permissions = team.map(team_full).unwrap_or_default();
        let attempted = rows.len();
        let audit = self.audit_engine();

        if options.continue_on_error {
            let mut outcome = BulkOutcome::default();
            for (index, mut data) in rows.into_iter().enumerate() {
                let id = extract_explicit_id(&mut data);
                match self
                    .rows
                    .create_row(table, id, data, permissions.clone(), None)
                    .await
                {
                    Ok(row) => outcome.results.push(row),
                    Err(error) => outcome.errors.push(BulkError { index, error }),
                }
            }
            let changes: Vec<ChangeRecord> = outcome
                .results
                .iter()
                .map(|row| ChangeRecord::create(table.clone(), row.id.clone()))
                .collect();
            run_with_transaction(&self.rows, &self.journal, "rows.bulkCreate", |txn| async move {
                audit
                    .record(
                        AuditDraft::bulk(AuditAction::BulkCreate, table.clone(), attempted)
                            .with_changes(changes.clone())
                            .with_transaction(&txn),
                        Some(&txn),
                    )
                    .await?;
                Ok(UnitOfWork::new((), changes))
            })
            .await?;
            return Ok(outcome);
        }

        run_with_transaction(&self.rows, &self.journal, "rows.bulkCreate", |txn| async move {
            let mut results = Vec::with_capacity(attempted);
            for mut data in rows {
                let id = extract_explicit_id(&mut data);
                results.push(
                    self.rows
                        .create_row(table, id, data, permissions.clone(), Some(&txn))
                        .await?,
                );
            }
            let changes: Vec<ChangeRecord> = results
                .iter()
                .map(|row| ChangeRecord::create(table.clone(), row.id.clone()))
                .collect();
            audit
                .record(
                    AuditDraft::bulk(AuditAction::BulkCreate, table.clone(), attempted)
                        .with_changes(changes.clone())
                        .with_transaction(&txn),
                    Some(&txn),
                )
                .await?;
            Ok(UnitOfWork::new(
                BulkOutcome {
                    results,
                    errors: Vec::new(),
                },
                changes,
            ))
        })
        .await
    }

    /// Bulk-update rows (whole-document replacement per item).
    pub async fn update_rows_bulk(
        &self,
        table: &TableId,
        items: Vec<(RowId, Map<String, Value>)>,
        options: BulkOptions,
    ) -> Result<BulkOutcome, StoreError> {
        let attempted = items.len();
        let audit = self.audit_engine();

        if options.continue_on_error {
            let mut outcome = BulkOutcome::default();
            for (index, (id, data)) in items.into_iter().enumerate() {
                match self
                    .rows
                    .update_row(table, &id, Some(data), None, None)
                    .await
                {
                    Ok(row) => outcome.results.push(row),
                    Err(error) => outcome.errors.push(BulkError { index, error }),
                }
            }
            let changes: Vec<ChangeRecord> = outcome
                .results
                .iter()
                .map(|row| ChangeRecord::update(table.clone(), row.id.clone()))
                .collect();
            run_with_transaction(&self.rows, &self.journal, "rows.bulkUpdate", |txn| async move {
                audit
                    .record(
                        AuditDraft::bulk(AuditAction::BulkUpdate, table.clone(), attempted)
                            .with_changes(changes.clone())
                            .with_transaction(&txn),
                        Some(&txn),
                    )
                    .await?;
                Ok(UnitOfWork::new((), changes))
            })
            .await?;
            return Ok(outcome);
        }

        run_with_transaction(&self.rows, &self.journal, "rows.bulkUpdate", |txn| async move {
            let mut results = Vec::with_capacity(attempted);
            for (id, data) in items {
                results.push(
                    self.rows
                        .update_row(table, &id, Some(data), None, Some(&txn))
                        .await?,
                );
            }
            let changes: Vec<ChangeRecord> = results
                .iter()
                .map(|row| ChangeRecord::update(table.clone(), row.id.clone()))
                .collect();
            audit
                .record(
                    AuditDraft::bulk(AuditAction::BulkUpdate, table.clone(), attempted)
                        .with_changes(changes.clone())
                        .with_transaction(&txn),
                    Some(&txn),
                )
                .await?;
            Ok(UnitOfWork::new(
                BulkOutcome {
                    results,
                    errors: Vec::new(),
                },
                changes,
            ))
        })
        .await
    }

    /// Bulk-delete rows by id.
    pub async fn delete_rows_bulk(
        &self,
        table: &TableId,
        ids: Vec<RowId>,
        options: BulkOptions,
    ) -> Result<BulkOutcome, StoreError> {
        let attempted = ids.len();
        let audit = self.audit_engine();

        if options.continue_on_error {
            let mut outcome = BulkOutcome::default();
            let mut changes = Vec::new();
            for (index, id) in ids.into_iter().enumerate() {
                match self.rows.delete_row(table, &id, None).await {
                    Ok(()) => changes.push(ChangeRecord::delete(table.clone(), id)),
                    Err(error) => outcome.errors.push(BulkError { index, error }),
                }
            }
            run_with_transaction(&self.rows, &self.journal, "rows.bulkDelete", |txn| async move {
                audit
                    .record(
                        AuditDraft::bulk(AuditAction::BulkDelete, table.clone(), attempted)
                            .with_changes(changes.clone())
                            .with_transaction(&txn),
                        Some(&txn),
                    )
                    .await?;
                Ok(UnitOfWork::new((), changes))
            })
            .await?;
            return Ok(outcome);
        }

        run_with_transaction(&self.rows, &self.journal, "rows.bulkDelete", |txn| async move {
            let mut changes = Vec::with_capacity(attempted);
            for id in ids {
                self.rows.delete_row(table, &id, Some(&txn)).await?;
                changes.push(ChangeRecord::delete(table.clone(), id));
            }
            audit
                .record(
                    AuditDraft::bulk(AuditAction::BulkDelete, table.clone(), attempted)
                        .with_changes(changes.clone())
                        .with_transaction(&txn),
                    Some(&txn),
                )
                .await?;
            Ok(UnitOfWork::new(
                BulkOutcome::default(),
                changes,
            ))
        })
        .await
    }

    // =========================================================================
    // AUDIT SURFACE
    // =========================================================================

    /// Fetch one audit entry.
    pub async fn get_audit_entry(&self, id: &RowId) -> Result<AuditEntry, StoreError> {
        self.audit_engine().get(id).await
    }

    /// Audit history of one row, newest first.
    pub async fn audit_history(&self, row_id: &RowId) -> Result<Vec<AuditEntry>, StoreError> {
        self.audit_engine().list_for_row(row_id).await
    }

    /// Invert the mutation recorded by an audit entry (see
    /// [`AuditEngine::rollback`]).
    pub async fn rollback_audit_entry(
        &self,
        id: &RowId,
        note: Option<String>,
    ) -> Result<AuditEntry, StoreError> {
        let engine = self.audit_engine();
        let entry = engine.get(id).await?;
        engine.rollback(&self.journal, &entry, note).await
    }

    /// Approve an audit entry (status flip only; idempotent).
    pub async fn approve_audit_entry(
        &self,
        id: &RowId,
        note: Option<String>,
    ) -> Result<AuditEntry, StoreError> {
        self.audit_engine().approve(id, note).await
    }

    /// Reject an audit entry (status flip only; idempotent).
    pub async fn reject_audit_entry(
        &self,
        id: &RowId,
        note: Option<String>,
    ) -> Result<AuditEntry, StoreError> {
        self.audit_engine().reject(id, note).await
    }

    // =========================================================================
    // SHARED MUTATION ENVELOPES
    // =========================================================================

    async fn create_record(
        &self,
        table: &TableId,
        data: Map<String, Value>,
        permissions: Vec<String>,
        label: &str,
    ) -> Result<Row, StoreError> {
        let audit = self.audit_engine();
        run_with_transaction(&self.rows, &self.journal, label, |txn| async move {
            let row = self
                .rows
                .create_row(table, None, data, permissions, Some(&txn))
                .await?;
            let changes = vec![ChangeRecord::create(table.clone(), row.id.clone())];
            audit
                .record(
                    AuditDraft::for_row(AuditAction::Create, table.clone(), row.id.clone())
                        .with_after(row.snapshot())
                        .with_changes(changes.clone())
                        .with_transaction(&txn),
                    Some(&txn),
                )
                .await?;
            Ok(UnitOfWork::new(row, changes))
        })
        .await
    }

    async fn update_record(
        &self,
        table: &TableId,
        id: &RowId,
        data: Map<String, Value>,
        label: &str,
    ) -> Result<Row, StoreError> {
        let before = self.rows.get_row(table, id).await?;
        let audit = self.audit_engine();
        run_with_transaction(&self.rows, &self.journal, label, |txn| async move {
            let row = self
                .rows
                .update_row(table, id, Some(data), None, Some(&txn))
                .await?;
            let changes = vec![ChangeRecord::update(table.clone(), id.clone())];
            audit
                .record(
                    AuditDraft::for_row(AuditAction::Update, table.clone(), id.clone())
                        .with_before(before.snapshot())
                        .with_after(row.snapshot())
                        .with_changes(changes.clone())
                        .with_transaction(&txn),
                    Some(&txn),
                )
                .await?;
            Ok(UnitOfWork::new(row, changes))
        })
        .await
    }

    async fn delete_record(
        &self,
        table: &TableId,
        id: &RowId,
        plan: DeletePlan,
        label: &str,
    ) -> Result<Row, StoreError> {
        let before = self.rows.get_row(table, id).await?;
        let audit = self.audit_engine();
        run_with_transaction(&self.rows, &self.journal, label, |txn| async move {
            let changes = plan.execute(&self.rows, &txn).await?;
            audit
                .record(
                    AuditDraft::for_row(AuditAction::Delete, table.clone(), id.clone())
                        .with_before(before.snapshot())
                        .with_changes(changes.clone())
                        .with_transaction(&txn),
                    Some(&txn),
                )
                .await?;
            Ok(UnitOfWork::new(before, changes))
        })
        .await
    }

    async fn update_permissions_record(
        &self,
        table: &TableId,
        id: &RowId,
        permissions: Vec<String>,
        label: &str,
    ) -> Result<Row, StoreError> {
        let before = self.rows.get_row(table, id).await?;
        let audit = self.audit_engine();
        run_with_transaction(&self.rows, &self.journal, label, |txn| async move {
            let row = self
                .rows
                .update_row(table, id, None, Some(permissions), Some(&txn))
                .await?;
            let changes = vec![ChangeRecord::update(table.clone(), id.clone())];
            audit
                .record(
                    AuditDraft::for_row(
                        AuditAction::UpdatePermissions,
                        table.clone(),
                        id.clone(),
                    )
                    .with_before(json!({"permissions": before.permissions}))
                    .with_after(json!({"permissions": row.permissions}))
                    .with_changes(changes.clone())
                    .with_transaction(&txn),
                    Some(&txn),
                )
                .await?;
            Ok(UnitOfWork::new(row, changes))
        })
        .await
    }

    /// Offload an oversized literal to its plugin's bucket, replacing it
    /// with a pointer envelope. Inline values pass through untouched.
    async fn prepare_value(
        &self,
        value: Option<ValueEnvelope>,
        team: Option<&TeamId>,
    ) -> Result<Option<ValueEnvelope>, StoreError> {
        let Some(envelope) = value else {
            return Ok(None);
        };
        let Some(policy) = self
            .registry
            .offload_policy(&envelope.datatype, &envelope.data)
        else {
            return Ok(Some(envelope));
        };
        let bytes = serde_json::to_vec(&envelope.data).map_err(StoreError::serialization)?;
        let file_id = uuid::Uuid::new_v4().to_string();
        let permissions = team.map(team_full).unwrap_or_default();
        let stored = self
            .objects
            .create_file(&policy.bucket, &file_id, bytes, permissions)
            .await?;
        let url = self.objects.file_view_url(&policy.bucket, &stored.id);
        tracing::debug!(
            datatype = %envelope.datatype,
            bucket = %policy.bucket,
            file = %stored.id,
            "oversized value offloaded to bucket"
        );
        Ok(Some(ValueEnvelope::pointer(
            envelope.datatype,
            FilePointer {
                file_id: stored.id,
                bucket_id: policy.bucket.clone(),
                url,
            },
        )))
    }
}

fn extract_explicit_id(data: &mut Map<String, Value>) -> Option<RowId> {
    match data.remove("$id") {
        Some(Value::String(id)) => Some(RowId::new(id)),
        _ => None,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentity;
    use crate::memory::MemoryRowStore;
    use crate::objects::MemoryObjectStore;
    use crate::types::{Datatype, GraphTables};
    use serde_json::json;

    type TestStore = StatementStore<MemoryRowStore, MemoryObjectStore, StaticIdentity>;

    fn store() -> TestStore {
        let config = CoreConfig::default();
        let rows = MemoryRowStore::with_relations(config.tables.relation_map());
        StatementStore::new(
            rows,
            MemoryObjectStore::new(),
            StaticIdentity::new("u1", None),
            config,
        )
    }

    #[tokio::test]
    async fn claim_requires_existing_subject() {
        let store = store();
        let property = store
            .create_entity(EntityDraft::new("population"), None)
            .await
            .expect("property");

        let draft = ClaimDraft::literal(
            RowId::new("missing"),
            property.id,
            ValueEnvelope::new(Datatype::Number, json!(1)),
        );
        let err = store.create_claim(draft, None).await.expect_err("subject");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn invalid_draft_short_circuits_before_any_write() {
        let store = store();
        let err = store
            .create_entity(EntityDraft::new("  "), None)
            .await
            .expect_err("blank label");
        assert!(matches!(err, StoreError::Validation(_)));
        // no transaction was begun, so the journal stayed empty
        assert!(store.journal().is_empty());
    }

    #[tokio::test]
    async fn permission_update_preserves_data() {
        let store = store();
        let entity = store
            .create_entity(EntityDraft::new("Paris"), None)
            .await
            .expect("entity");

        let updated = store
            .update_entity_permissions(&entity.id, vec!["read(\"any\")".into()])
            .await
            .expect("permissions");
        assert_eq!(updated.label, "Paris");

        let tables = GraphTables::default();
        let row = store
            .rows()
            .get_row(&tables.entities, &entity.id)
            .await
            .expect("row");
        assert_eq!(row.permissions, vec!["read(\"any\")".to_string()]);
    }
}
