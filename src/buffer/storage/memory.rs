//! Memory tier: batches stay as shared `Arc<TupleBatch>` values.

use std::collections::BTreeMap;
use std::sync::Arc;

use eyre::{bail, Result};
use hashbrown::HashMap;
use parking_lot::RwLock;

use super::{StorageManager, StorageType};
use crate::buffer::{BufferError, TupleBatch, TupleSourceId};
use crate::types::DataType;

#[derive(Default)]
pub struct MemoryStorageManager {
    sources: RwLock<HashMap<TupleSourceId, BTreeMap<i64, Arc<TupleBatch>>>>,
}

impl MemoryStorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_count(&self, tuple_source: &TupleSourceId) -> usize {
        self.sources
            .read()
            .get(tuple_source)
            .map_or(0, |batches| batches.len())
    }
}

impl StorageManager for MemoryStorageManager {
    fn storage_type(&self) -> StorageType {
        StorageType::Memory
    }

    fn add_batch(
        &self,
        tuple_source: &TupleSourceId,
        batch: Arc<TupleBatch>,
        _types: &[DataType],
    ) -> Result<()> {
        self.sources
            .write()
            .entry(tuple_source.clone())
            .or_default()
            .insert(batch.begin_row(), batch);
        Ok(())
    }

    fn get_batch(
        &self,
        tuple_source: &TupleSourceId,
        begin_row: i64,
        _types: &[DataType],
    ) -> Result<Arc<TupleBatch>> {
        let sources = self.sources.read();
        let Some(batches) = sources.get(tuple_source) else {
            bail!(BufferError::not_found(tuple_source));
        };
        match batches.get(&begin_row) {
            Some(batch) => Ok(Arc::clone(batch)),
            None => bail!(BufferError::batch_not_found(tuple_source, begin_row)),
        }
    }

    fn remove_batch(&self, tuple_source: &TupleSourceId, begin_row: i64) -> Result<()> {
        let mut sources = self.sources.write();
        if let Some(batches) = sources.get_mut(tuple_source) {
            batches.remove(&begin_row);
            if batches.is_empty() {
                sources.remove(tuple_source);
            }
        }
        Ok(())
    }

    fn remove_batches(&self, tuple_source: &TupleSourceId) -> Result<()> {
        self.sources.write().remove(tuple_source);
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        self.sources.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn batch(begin_row: i64, n: usize) -> Arc<TupleBatch> {
        let rows = (0..n)
            .map(|i| vec![Value::Long(begin_row + i as i64)])
            .collect();
        Arc::new(TupleBatch::new(begin_row, rows))
    }

    #[test]
    fn exact_begin_row_lookup() {
        let storage = MemoryStorageManager::new();
        let id = TupleSourceId::new("1", None);
        storage.add_batch(&id, batch(1, 3), &[]).unwrap();
        storage.add_batch(&id, batch(4, 3), &[]).unwrap();

        assert_eq!(storage.get_batch(&id, 4, &[]).unwrap().begin_row(), 4);

        let err = storage.get_batch(&id, 5, &[]).unwrap_err();
        assert!(BufferError::is_not_found(&err));
    }

    #[test]
    fn sources_are_isolated() {
        let storage = MemoryStorageManager::new();
        let a = TupleSourceId::new("a", None);
        let b = TupleSourceId::new("b", None);
        storage.add_batch(&a, batch(1, 2), &[]).unwrap();
        storage.add_batch(&b, batch(1, 5), &[]).unwrap();

        storage.remove_batches(&a).unwrap();
        assert!(storage.get_batch(&a, 1, &[]).is_err());
        assert_eq!(storage.get_batch(&b, 1, &[]).unwrap().row_count(), 5);
    }

    #[test]
    fn removal_is_idempotent() {
        let storage = MemoryStorageManager::new();
        let id = TupleSourceId::new("1", None);
        storage.add_batch(&id, batch(1, 1), &[]).unwrap();
        storage.remove_batch(&id, 1).unwrap();
        storage.remove_batch(&id, 1).unwrap();
        storage.remove_batches(&id).unwrap();
        storage.remove_batches(&id).unwrap();
        assert_eq!(storage.batch_count(&id), 0);
    }
}
