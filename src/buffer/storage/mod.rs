//! # Storage Managers
//!
//! A storage manager persists batches for many tuple sources, keyed by
//! `(tuple source, begin_row)`. Lookup is exact-match only: a batch can be
//! fetched only with the begin row it was stored under. Tuple buffers keep the
//! authoritative begin row of every batch they store, so storage never needs
//! interval search.
//!
//! ## Tiers
//!
//! | Type | Implementation | Holds |
//! |------|----------------|-------|
//! | Memory | `MemoryStorageManager` | `Arc<TupleBatch>` in a per-source map |
//! | File | `FileStorageManager` | serialized batches in spill files |
//! | Database / Remote | external | classification only |
//!
//! The type is a classification tag; callers see the same contract from every
//! tier. The buffer manager keeps one manager per type.
//!
//! ## Isolation
//!
//! Batches of different tuple sources never collide: every key includes the
//! tuple source id. `remove_batches` for one source leaves all others intact.

mod file;
mod memory;

pub use file::FileStorageManager;
pub use memory::MemoryStorageManager;

use std::sync::Arc;

use eyre::Result;

use super::{TupleBatch, TupleSourceId};
use crate::types::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    Memory,
    File,
    Database,
    Remote,
}

impl StorageType {
    pub fn name(&self) -> &'static str {
        match self {
            StorageType::Memory => "memory",
            StorageType::File => "file",
            StorageType::Database => "database",
            StorageType::Remote => "remote",
        }
    }
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub trait StorageManager: Send + Sync {
    fn storage_type(&self) -> StorageType;

    /// Stores `batch` under its begin row. Replaces an existing batch with the
    /// same begin row.
    fn add_batch(
        &self,
        tuple_source: &TupleSourceId,
        batch: Arc<TupleBatch>,
        types: &[DataType],
    ) -> Result<()>;

    /// Fetches the batch stored under exactly `begin_row`. Fails with
    /// `TupleSourceNotFound` for an unknown source or begin row.
    fn get_batch(
        &self,
        tuple_source: &TupleSourceId,
        begin_row: i64,
        types: &[DataType],
    ) -> Result<Arc<TupleBatch>>;

    fn remove_batch(&self, tuple_source: &TupleSourceId, begin_row: i64) -> Result<()>;

    /// Drops every batch of the source. No error if nothing is stored.
    fn remove_batches(&self, tuple_source: &TupleSourceId) -> Result<()>;

    fn shutdown(&self) -> Result<()>;
}
