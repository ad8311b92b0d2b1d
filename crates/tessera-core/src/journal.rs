//! # Local Operation Journal
//!
//! A bounded, client-local mirror of recent transactions. The journal is
//! best-effort observability for the owning session: it is **not**
//! authoritative, not synchronized with the backend audit table, and not
//! persisted. The bound is enforced append-then-trim.

use crate::types::ChangeRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Default number of entries retained by a journal.
pub const DEFAULT_JOURNAL_CAPACITY: usize = 200;

/// Terminal state of a journaled unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalStatus {
    Committed,
    Rolledback,
}

/// One journaled unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: String,
    pub label: String,
    pub status: JournalStatus,
    pub created_at: DateTime<Utc>,
    pub changes: Vec<ChangeRecord>,
}

impl JournalEntry {
    /// Entry for a committed unit of work.
    #[must_use]
    pub fn committed(label: impl Into<String>, changes: Vec<ChangeRecord>) -> Self {
        Self::new(label, JournalStatus::Committed, changes)
    }

    /// Entry for a rolled-back unit of work. Rolled-back units record no
    /// changes: nothing became visible.
    #[must_use]
    pub fn rolled_back(label: impl Into<String>) -> Self {
        Self::new(label, JournalStatus::Rolledback, Vec::new())
    }

    fn new(label: impl Into<String>, status: JournalStatus, changes: Vec<ChangeRecord>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.into(),
            status,
            created_at: Utc::now(),
            changes,
        }
    }
}

/// The bounded journal, owned by a statement store instance.
#[derive(Debug)]
pub struct Journal {
    entries: Mutex<VecDeque<JournalEntry>>,
    capacity: usize,
}

impl Default for Journal {
    fn default() -> Self {
        Self::new(DEFAULT_JOURNAL_CAPACITY)
    }
}

impl Journal {
    /// Create a journal retaining at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Append an entry, trimming the oldest entries past capacity.
    pub fn record(&self, entry: JournalEntry) {
        let mut entries = self.lock();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Snapshot of the retained entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.lock().iter().cloned().collect()
    }

    /// Drop all retained entries.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the journal is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// The configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<JournalEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::{RowId, TableId};

    #[test]
    fn append_then_trim_at_capacity() {
        let journal = Journal::new(3);
        for i in 0..5 {
            journal.record(JournalEntry::committed(format!("unit-{i}"), Vec::new()));
        }
        assert_eq!(journal.len(), 3);
        let labels: Vec<String> = journal.entries().into_iter().map(|e| e.label).collect();
        assert_eq!(labels, vec!["unit-2", "unit-3", "unit-4"]);
    }

    #[test]
    fn rolled_back_entries_carry_no_changes() {
        let journal = Journal::default();
        journal.record(JournalEntry::committed(
            "claim.create",
            vec![ChangeRecord::create(TableId::new("claims"), RowId::new("c1"))],
        ));
        journal.record(JournalEntry::rolled_back("claim.delete"));

        let entries = journal.entries();
        assert_eq!(entries[0].status, JournalStatus::Committed);
        assert_eq!(entries[0].changes.len(), 1);
        assert_eq!(entries[1].status, JournalStatus::Rolledback);
        assert!(entries[1].changes.is_empty());
    }

    #[test]
    fn clear_resets_lifecycle() {
        let journal = Journal::new(10);
        journal.record(JournalEntry::committed("x", Vec::new()));
        assert!(!journal.is_empty());
        journal.clear();
        assert!(journal.is_empty());
        assert_eq!(journal.capacity(), 10);
    }
}
