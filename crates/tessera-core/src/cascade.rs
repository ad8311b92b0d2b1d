//! # Cascade Planner
//!
//! The backing row store has no referential-integrity cascade; the
//! application is the only enforcement point. Deletion of an entity or a
//! claim therefore runs in two explicit phases:
//!
//! 1. **plan** — enumerate every dependent row through read queries,
//!    producing a leaves-first [`DeletePlan`] *before any delete is issued*
//! 2. **execute** — stage the planned deletes inside the caller's
//!    transaction and return the change accumulator for the audit entry
//!
//! The two phases are separately testable. A dependent row created by a
//! concurrent actor after enumeration but before commit is not part of the
//! plan and survives as an orphan; the backend transaction only makes the
//! staged write set atomic.

use crate::error::StoreError;
use crate::gateway::{Filter, RowStore};
use crate::types::{ChangeRecord, GraphTables, RowId, TableId};

/// One planned row deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDelete {
    pub table: TableId,
    pub row_id: RowId,
}

/// An ordered, leaves-first set of deletions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeletePlan {
    deletions: Vec<PlannedDelete>,
}

impl DeletePlan {
    /// Plan deleting one row with no dependents (qualifiers, references).
    #[must_use]
    pub fn single(table: TableId, row_id: RowId) -> Self {
        Self {
            deletions: vec![PlannedDelete { table, row_id }],
        }
    }

    /// Plan the cascade for deleting an entity: for each claim whose
    /// subject is the entity, that claim's qualifiers and references, then
    /// the claim; finally the entity row itself.
    pub async fn for_entity<S: RowStore>(
        rows: &S,
        tables: &GraphTables,
        entity: &RowId,
    ) -> Result<Self, StoreError> {
        let mut plan = Self::default();
        let claims = rows
            .list_rows(&tables.claims, &[Filter::equal("subject", entity.as_str())])
            .await?;
        for claim in &claims.rows {
            plan.push_claim_dependents(rows, tables, &claim.id).await?;
            plan.push(tables.claims.clone(), claim.id.clone());
        }
        plan.push(tables.entities.clone(), entity.clone());
        Ok(plan)
    }

    /// Plan the cascade for deleting a single claim: its qualifiers and
    /// references, then the claim itself.
    pub async fn for_claim<S: RowStore>(
        rows: &S,
        tables: &GraphTables,
        claim: &RowId,
    ) -> Result<Self, StoreError> {
        let mut plan = Self::default();
        plan.push_claim_dependents(rows, tables, claim).await?;
        plan.push(tables.claims.clone(), claim.clone());
        Ok(plan)
    }

    async fn push_claim_dependents<S: RowStore>(
        &mut self,
        rows: &S,
        tables: &GraphTables,
        claim: &RowId,
    ) -> Result<(), StoreError> {
        let filter = [Filter::equal("claim", claim.as_str())];
        let qualifiers = rows.list_rows(&tables.qualifiers, &filter).await?;
        for qualifier in &qualifiers.rows {
            self.push(tables.qualifiers.clone(), qualifier.id.clone());
        }
        let references = rows.list_rows(&tables.references, &filter).await?;
        for reference in &references.rows {
            self.push(tables.references.clone(), reference.id.clone());
        }
        Ok(())
    }

    fn push(&mut self, table: TableId, row_id: RowId) {
        self.deletions.push(PlannedDelete { table, row_id });
    }

    /// The planned deletions, leaves first.
    #[must_use]
    pub fn deletions(&self) -> &[PlannedDelete] {
        &self.deletions
    }

    /// Number of planned deletions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deletions.len()
    }

    /// Whether the plan is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty()
    }

    /// Stage every planned delete in the given transaction, returning one
    /// change record per deletion in plan order.
    pub async fn execute<S: RowStore>(
        &self,
        rows: &S,
        txn: &crate::types::TransactionId,
    ) -> Result<Vec<ChangeRecord>, StoreError> {
        let mut changes = Vec::with_capacity(self.deletions.len());
        for deletion in &self.deletions {
            rows.delete_row(&deletion.table, &deletion.row_id, Some(txn))
                .await?;
            changes.push(ChangeRecord::delete(
                deletion.table.clone(),
                deletion.row_id.clone(),
            ));
        }
        Ok(changes)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::memory::MemoryRowStore;
    use serde_json::{Map, Value, json};

    fn object(value: Value) -> Map<String, Value> {
        let Value::Object(map) = value else {
            panic!("object literal")
        };
        map
    }

    /// Seed one entity with `claims` claims, each carrying `qualifiers`
    /// qualifiers and `references` references. Returns the entity id.
    async fn seed_graph(
        store: &MemoryRowStore,
        tables: &GraphTables,
        claims: usize,
        qualifiers: usize,
        references: usize,
    ) -> RowId {
        let entity = store
            .create_row(
                &tables.entities,
                None,
                object(json!({"label": "Paris"})),
                Vec::new(),
                None,
            )
            .await
            .expect("entity");
        for c in 0..claims {
            let claim = store
                .create_row(
                    &tables.claims,
                    None,
                    object(json!({"subject": entity.id.as_str(), "datatype": "number"})),
                    Vec::new(),
                    None,
                )
                .await
                .expect("claim");
            for q in 0..qualifiers {
                store
                    .create_row(
                        &tables.qualifiers,
                        None,
                        object(json!({"claim": claim.id.as_str(), "datatype": "text", "n": q})),
                        Vec::new(),
                        None,
                    )
                    .await
                    .expect("qualifier");
            }
            for r in 0..references {
                store
                    .create_row(
                        &tables.references,
                        None,
                        object(json!({"claim": claim.id.as_str(), "details": format!("src {c}/{r}")})),
                        Vec::new(),
                        None,
                    )
                    .await
                    .expect("reference");
            }
        }
        entity.id
    }

    #[tokio::test]
    async fn entity_plan_is_total_and_leaves_first() {
        let store = MemoryRowStore::new();
        let tables = GraphTables::default();
        let entity = seed_graph(&store, &tables, 2, 3, 1).await;

        let plan = DeletePlan::for_entity(&store, &tables, &entity)
            .await
            .expect("plan");

        // 1 entity + 2 claims + 2*3 qualifiers + 2*1 references
        assert_eq!(plan.len(), 1 + 2 + 6 + 2);

        // the entity row comes last, and every claim comes after its
        // dependents
        let deletions = plan.deletions();
        assert_eq!(deletions.last().expect("last").table, tables.entities);
        for (index, deletion) in deletions.iter().enumerate() {
            if deletion.table == tables.claims {
                let dependents_before: usize = deletions[..index]
                    .iter()
                    .filter(|d| d.table == tables.qualifiers || d.table == tables.references)
                    .count();
                assert!(dependents_before >= 4, "claim planned before its leaves");
            }
        }
    }

    #[tokio::test]
    async fn claim_plan_covers_only_that_claim() {
        let store = MemoryRowStore::new();
        let tables = GraphTables::default();
        let entity = seed_graph(&store, &tables, 2, 1, 1).await;

        let claims = store
            .list_rows(
                &tables.claims,
                &[Filter::equal("subject", entity.as_str())],
            )
            .await
            .expect("claims");
        let claim_id = claims.rows[0].id.clone();

        let plan = DeletePlan::for_claim(&store, &tables, &claim_id)
            .await
            .expect("plan");
        // 1 qualifier + 1 reference + the claim
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.deletions().last().expect("last").row_id, claim_id);
    }

    #[tokio::test]
    async fn execute_removes_every_planned_row_atomically() {
        let store = MemoryRowStore::new();
        let tables = GraphTables::default();
        let entity = seed_graph(&store, &tables, 3, 2, 2).await;

        let plan = DeletePlan::for_entity(&store, &tables, &entity)
            .await
            .expect("plan");

        let txn = store.begin_transaction().await.expect("begin");
        let changes = plan.execute(&store, &txn).await.expect("execute");
        assert_eq!(changes.len(), plan.len());

        // nothing visible until commit
        assert_eq!(store.row_count(&tables.entities), 1);
        store.commit_transaction(&txn).await.expect("commit");

        assert_eq!(store.row_count(&tables.entities), 0);
        assert_eq!(store.row_count(&tables.claims), 0);
        assert_eq!(store.row_count(&tables.qualifiers), 0);
        assert_eq!(store.row_count(&tables.references), 0);
    }

    #[tokio::test]
    async fn entity_without_claims_plans_only_itself() {
        let store = MemoryRowStore::new();
        let tables = GraphTables::default();
        let entity = seed_graph(&store, &tables, 0, 0, 0).await;

        let plan = DeletePlan::for_entity(&store, &tables, &entity)
            .await
            .expect("plan");
        assert_eq!(plan.len(), 1);
        assert!(!plan.is_empty());
    }
}
