//! # Object Storage Boundary
//!
//! Contract over the external object-storage service. The core touches it
//! only when the value registry's storage policy signals offload: oversized
//! literals are written as files and replaced by pointer envelopes.

use crate::error::StoreError;
use crate::types::BucketId;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Metadata of a stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub id: String,
    pub bucket: BucketId,
    pub size: usize,
}

/// The object-storage contract.
#[allow(async_fn_in_trait)]
pub trait ObjectStore {
    /// Store a file under the given bucket and id.
    async fn create_file(
        &self,
        bucket: &BucketId,
        id: &str,
        bytes: Vec<u8>,
        permissions: Vec<String>,
    ) -> Result<StoredFile, StoreError>;

    /// Fetch a file's bytes.
    async fn get_file(&self, bucket: &BucketId, id: &str) -> Result<Vec<u8>, StoreError>;

    /// Delete a file.
    async fn delete_file(&self, bucket: &BucketId, id: &str) -> Result<(), StoreError>;

    /// URL for viewing the file inline.
    fn file_view_url(&self, bucket: &BucketId, id: &str) -> String;

    /// URL for downloading the file.
    fn file_download_url(&self, bucket: &BucketId, id: &str) -> String;
}

/// Volatile object store used in tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    files: Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored files across all buckets.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<(String, String), Vec<u8>>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ObjectStore for MemoryObjectStore {
    async fn create_file(
        &self,
        bucket: &BucketId,
        id: &str,
        bytes: Vec<u8>,
        _permissions: Vec<String>,
    ) -> Result<StoredFile, StoreError> {
        let size = bytes.len();
        self.lock()
            .insert((bucket.0.clone(), id.to_string()), bytes);
        Ok(StoredFile {
            id: id.to_string(),
            bucket: bucket.clone(),
            size,
        })
    }

    async fn get_file(&self, bucket: &BucketId, id: &str) -> Result<Vec<u8>, StoreError> {
        self.lock()
            .get(&(bucket.0.clone(), id.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::FileNotFound {
                bucket: bucket.clone(),
                id: id.to_string(),
            })
    }

    async fn delete_file(&self, bucket: &BucketId, id: &str) -> Result<(), StoreError> {
        self.lock()
            .remove(&(bucket.0.clone(), id.to_string()))
            .map(|_| ())
            .ok_or_else(|| StoreError::FileNotFound {
                bucket: bucket.clone(),
                id: id.to_string(),
            })
    }

    fn file_view_url(&self, bucket: &BucketId, id: &str) -> String {
        format!("memory://{bucket}/{id}/view")
    }

    fn file_download_url(&self, bucket: &BucketId, id: &str) -> String {
        format!("memory://{bucket}/{id}/download")
    }
}

// =============================================================================
// TESTS
// =============================================================================
