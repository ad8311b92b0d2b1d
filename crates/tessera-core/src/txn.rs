//! # Transaction Orchestrator
//!
//! Wraps a unit of work in a begin/commit/rollback envelope against the row
//! store and mirrors the outcome into the bounded local journal.
//!
//! Every statement-store mutation — however many cascaded deletes or audit
//! writes it needs — executes inside exactly one orchestrated unit, so a
//! partial cascade is never observable. On failure the rollback is
//! best-effort: a rollback error is logged and the *original* error is the
//! one surfaced to the caller.

use crate::error::StoreError;
use crate::gateway::RowStore;
use crate::journal::{Journal, JournalEntry};
use crate::types::{ChangeRecord, TransactionId};

/// The outcome of a unit of work: the caller-facing result plus the change
/// accumulator handed to the journal.
#[derive(Debug)]
pub struct UnitOfWork<T> {
    pub result: T,
    pub changes: Vec<ChangeRecord>,
}

impl<T> UnitOfWork<T> {
    /// Bundle a result with its recorded changes.
    #[must_use]
    pub fn new(result: T, changes: Vec<ChangeRecord>) -> Self {
        Self { result, changes }
    }
}

/// Run `work` inside one row-store transaction.
///
/// - success: commit, journal a `committed` entry with the unit's changes,
///   return the result
/// - failure (work or commit): attempt rollback, journal a `rolledback`
///   entry with no changes, re-raise the original error
pub async fn run_with_transaction<S, T, F, Fut>(
    rows: &S,
    journal: &Journal,
    label: &str,
    work: F,
) -> Result<T, StoreError>
where
    S: RowStore,
    F: FnOnce(TransactionId) -> Fut,
    Fut: Future<Output = Result<UnitOfWork<T>, StoreError>>,
{
    let txn = rows.begin_transaction().await?;
    tracing::debug!(label, txn = %txn, "transaction begun");

    let outcome = match work(txn.clone()).await {
        Ok(unit) => match rows.commit_transaction(&txn).await {
            Ok(()) => Ok(unit),
            Err(err) => Err(err),
        },
        Err(err) => Err(err),
    };

    match outcome {
        Ok(unit) => {
            journal.record(JournalEntry::committed(label, unit.changes));
            tracing::debug!(label, txn = %txn, "transaction committed");
            Ok(unit.result)
        }
        Err(err) => {
            if let Err(rollback_err) = rows.rollback_transaction(&txn).await {
                // never mask the original error with a cleanup failure
                tracing::warn!(
                    label,
                    txn = %txn,
                    error = %rollback_err,
                    "transaction rollback failed"
                );
            }
            journal.record(JournalEntry::rolled_back(label));
            tracing::debug!(label, txn = %txn, error = %err, "transaction rolled back");
            Err(err)
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
