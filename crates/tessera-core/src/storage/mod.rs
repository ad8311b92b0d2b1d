//! # Persistent Storage Backends
//!
//! Disk-backed implementations of the row store gateway.

mod redb_rows;

pub use redb_rows::RedbRowStore;
