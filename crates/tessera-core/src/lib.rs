//! # tessera-core
//!
//! The graph statement store for tessera — THE CORE.
//!
//! This crate implements the transactional heart of a Wikidata-style
//! knowledge base: typed entities connected by claims that carry
//! qualifiers and source references, with cascading deletes, an
//! audit/rollback engine, and a typed-value rendering/storage-offload
//! registry.
//!
//! ## Component order (leaf-first)
//!
//! 1. `registry` — static typed-value registry: datatype tags resolved to
//!    render/preview handlers and storage-offload policies at startup
//! 2. `gateway` — the row store contract (CRUD, filtered list, atomic
//!    staged transactions), with `memory` and `storage` backends
//! 3. `cascade` — two-phase delete planner (plan, then execute); the
//!    application is the only referential-integrity enforcement point
//! 4. `txn` + `journal` — begin/commit/rollback envelope and the bounded
//!    local operation journal
//! 5. `audit` — append-only before/after log with action-dispatched
//!    rollback and an idempotent review workflow
//! 6. `statements` — the public API surface consumed by UI callers
//!
//! ## Architectural Constraints
//!
//! - Every mutation runs inside exactly one gateway transaction and emits
//!   at most one audit entry; partial cascades are never observable.
//! - Auditing is best-effort observability: unconfigured auditing never
//!   blocks a mutation, but once configured an audit write failure rolls
//!   the mutation back.
//! - Audit history is append-only; rollback appends, review flips status.
//! - No retries, no timeouts, no background work: suspension points are
//!   exactly the calls to the row store, object storage, and identity
//!   service.

// =============================================================================
// MODULES
// =============================================================================

pub mod audit;
pub mod cascade;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod journal;
pub mod memory;
pub mod objects;
pub mod registry;
pub mod statements;
pub mod storage;
pub mod txn;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use error::StoreError;
pub use types::{
    AuditConfig, BucketId, ChangeAction, ChangeRecord, Claim, ClaimDraft, CoreConfig, Datatype,
    Entity, EntityDraft, FilePointer, GraphTables, Qualifier, QualifierDraft, Reference,
    ReferenceDraft, RowId, TableId, TeamId, TransactionId, UserId, ValueEnvelope,
};

// =============================================================================
// RE-EXPORTS: Gateway & Backends
// =============================================================================

pub use gateway::{Filter, Row, RowPage, RowStore};
pub use memory::MemoryRowStore;
pub use objects::{MemoryObjectStore, ObjectStore, StoredFile};
pub use storage::RedbRowStore;

// =============================================================================
// RE-EXPORTS: Engine Components
// =============================================================================

pub use audit::{AuditAction, AuditDraft, AuditEngine, AuditEntry, AuditStatus};
pub use cascade::{DeletePlan, PlannedDelete};
pub use identity::{IdentityProvider, StaticIdentity, UserIdentity};
pub use journal::{DEFAULT_JOURNAL_CAPACITY, Journal, JournalEntry, JournalStatus};
pub use registry::{
    DEFAULT_INLINE_LIMIT, RenderDescriptor, StoragePolicy, ValueHandler, ValuePlugin,
    ValueRegistry, ValueRegistryBuilder,
};
pub use statements::{BulkError, BulkOptions, BulkOutcome, StatementStore};
pub use txn::{UnitOfWork, run_with_transaction};
