//! State shared by the buffer manager and every tuple buffer it creates:
//! the memory budget, per-group usage, the registered storage managers and
//! the LOB reclaim queue. LOB reference ids come from one process-wide
//! counter, so buffers built outside a manager never collide either.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{bail, Result};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

use super::lob::LobReclaimQueue;
use super::storage::{MemoryStorageManager, StorageManager, StorageType};
use super::BufferError;
use crate::memory::{MemoryBudget, Pool};

static NEXT_LOB_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct BufferContext {
    budget: MemoryBudget,
    session_limit: usize,
    storage: RwLock<HashMap<StorageType, Arc<dyn StorageManager>>>,
    group_usage: Mutex<HashMap<String, usize>>,
    lob_reclaim: Arc<LobReclaimQueue>,
}

impl BufferContext {
    pub(crate) fn new(budget: MemoryBudget, session_use_percentage: usize) -> Self {
        let session_limit =
            (budget.total_limit() as u128 * session_use_percentage as u128 / 100) as usize;
        let mut storage: HashMap<StorageType, Arc<dyn StorageManager>> = HashMap::new();
        storage.insert(StorageType::Memory, Arc::new(MemoryStorageManager::new()));

        Self {
            budget,
            session_limit,
            storage: RwLock::new(storage),
            group_usage: Mutex::new(HashMap::new()),
            lob_reclaim: Arc::new(LobReclaimQueue::default()),
        }
    }

    pub(crate) fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    pub(crate) fn lob_reclaim(&self) -> &Arc<LobReclaimQueue> {
        &self.lob_reclaim
    }

    pub(crate) fn add_storage_manager(&self, manager: Arc<dyn StorageManager>) {
        self.storage.write().insert(manager.storage_type(), manager);
    }

    pub(crate) fn storage(&self, storage_type: StorageType) -> Option<Arc<dyn StorageManager>> {
        self.storage.read().get(&storage_type).cloned()
    }

    pub(crate) fn storage_or_err(&self, storage_type: StorageType) -> Result<Arc<dyn StorageManager>> {
        match self.storage(storage_type) {
            Some(manager) => Ok(manager),
            None => bail!("no {} storage manager registered", storage_type),
        }
    }

    pub(crate) fn storage_managers(&self) -> Vec<Arc<dyn StorageManager>> {
        self.storage.read().values().cloned().collect()
    }

    /// LOB reference ids, unique for the life of the process.
    pub(crate) fn mint_lob_reference(&self) -> String {
        NEXT_LOB_ID.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Charges `bytes` of memory-tier batches to `group`. Returns false when the
    /// group's share or the total budget would be exceeded.
    pub(crate) fn reserve_batch_memory(&self, group: &str, bytes: usize) -> bool {
        let mut usage = self.group_usage.lock();
        let used = usage.get(group).copied().unwrap_or(0);
        if used + bytes > self.session_limit {
            return false;
        }
        if !self.budget.try_allocate(Pool::Batches, bytes) {
            return false;
        }
        *usage.entry(group.to_string()).or_insert(0) += bytes;
        true
    }

    pub(crate) fn release_batch_memory(&self, group: &str, bytes: usize) {
        if bytes == 0 {
            return;
        }
        self.budget.release(Pool::Batches, bytes);
        let mut usage = self.group_usage.lock();
        if let Some(used) = usage.get_mut(group) {
            *used = used.saturating_sub(bytes);
            if *used == 0 {
                usage.remove(group);
            }
        }
    }

    pub(crate) fn reserve_pinned_memory(&self, bytes: usize) -> Result<()> {
        if !self.budget.try_allocate(Pool::Pinned, bytes) {
            bail!(BufferError::MemoryNotAvailable {
                requested: bytes,
                available: self.budget.available(),
            });
        }
        Ok(())
    }

    pub(crate) fn group_usage(&self, group: &str) -> usize {
        self.group_usage.lock().get(group).copied().unwrap_or(0)
    }
}
