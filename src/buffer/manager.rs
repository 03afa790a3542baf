//! # Buffer Manager
//!
//! Factory and registry for tuple buffers. The manager owns:
//!
//! - the memory budget and per-group shares (through the shared context)
//! - the storage managers, one per storage type
//! - the batch-size policy (connector vs processor sources)
//! - thread-scoped pin bookkeeping
//! - LOB body buffers and their reclaim queue
//!
//! ## Initialization
//!
//! `BufferManager::new(config)` validates the config, sizes the budget and
//! registers the memory tier. When the config names a storage directory a
//! `FileStorageManager` is registered as the spill tier. More storage managers
//! can be added afterwards with `add_storage_manager`; one per type is kept.
//!
//! ## Status
//!
//! A tuple source is `Active` while rows are still being produced and `Full`
//! once finalized. `set_status(id, Full)` closes the buffer; a full source
//! cannot be made active again.
//!
//! ## Pins
//!
//! `pin_tuple_batch` keeps a saved batch resident and records the pin under
//! the calling thread. `release_pinned_batches` releases every pin the calling
//! thread still holds and leaves other threads' pins alone. It is meant to be
//! called at the end of a unit of work.
//!
//! ## Active Memory Management
//!
//! `manage_memory` runs when the budget is above the active threshold: it
//! drops cached payloads of spilled batches and moves unpinned memory-tier
//! batches to the file tier until usage is back under the threshold. Appends
//! trigger it at most once per `management_interval`.
//!
//! ## LOB Bodies
//!
//! ```text
//!   create_lob_buffer(group) ──> write_lob(id, bytes)* ──> finish_lob(id) ──> LobValue
//!                                                                              │
//!   cleanup_lobs() <── reclaim queue <── last LobBody clone dropped ───────────┘
//! ```
//!
//! A LOB body is a tuple source of `Varbinary` chunk rows. `finish_lob` closes
//! it and hands out a `LobValue` whose handles share one body. Once no handle
//! is left the body's source id is queued, and `cleanup_lobs` removes at most
//! `lob_cleanup_batch` queued sources per call.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Instant;

use eyre::{bail, ensure, Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::context::BufferContext;
use super::lob::LobBody;
use super::storage::{FileStorageManager, StorageManager, StorageType};
use super::{BufferError, TupleBatch, TupleBuffer, TupleCursor, TupleSourceId};
use crate::config::{BufferConfig, MemoryLimit, LOB_CHUNK_BATCH_SIZE, LOB_CHUNK_SIZE};
use crate::memory::{BudgetStats, MemoryBudget};
use crate::types::{DataType, LobData, LobValue, Tuple, Value};

/// Who produces the rows of a tuple source; picks its batch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TupleSourceKind {
    /// Intermediate results produced inside the engine.
    Processor,
    /// Rows ingested from a connector.
    Connector,
    /// Chunks of one LOB body.
    Lob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TupleSourceStatus {
    Active,
    Full,
}

/// A batch pinned by the calling thread.
#[derive(Debug, Clone)]
pub struct PinnedBatch {
    pub tuple_source: TupleSourceId,
    pub begin_row: i64,
    pub batch: Arc<TupleBatch>,
}

struct SourceEntry {
    buffer: Arc<TupleBuffer>,
    kind: TupleSourceKind,
}

pub struct BufferManager {
    config: BufferConfig,
    context: Arc<BufferContext>,
    sources: RwLock<HashMap<TupleSourceId, SourceEntry>>,
    next_id: AtomicU64,
    pins: Mutex<HashMap<ThreadId, Vec<(TupleSourceId, i64)>>>,
    last_management: Mutex<Instant>,
    last_stats_log: Mutex<Instant>,
    stopped: AtomicBool,
}

impl BufferManager {
    pub fn new(config: BufferConfig) -> Result<Self> {
        config.validate().wrap_err("invalid buffer configuration")?;

        let budget = match config.get_memory_limit() {
            MemoryLimit::Bytes(bytes) => MemoryBudget::with_limit(bytes),
            MemoryLimit::Auto => MemoryBudget::auto_detect(),
        };
        let context = BufferContext::new(budget, config.get_session_use_percentage());

        if let Some(directory) = config.get_storage_directory() {
            context.add_storage_manager(Arc::new(FileStorageManager::new(
                directory,
                config.get_max_open_files(),
                config.get_max_file_size(),
            )));
        }

        info!(
            memory_limit = context.budget().total_limit(),
            session_use_percentage = config.get_session_use_percentage(),
            spill_directory = ?config.get_storage_directory(),
            "buffer manager initialized"
        );

        let now = Instant::now();
        Ok(Self {
            config,
            context: Arc::new(context),
            sources: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            pins: Mutex::new(HashMap::new()),
            last_management: Mutex::new(now),
            last_stats_log: Mutex::new(now),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Registers a storage manager for its storage type, replacing any
    /// previous one of the same type.
    pub fn add_storage_manager(&self, manager: Arc<dyn StorageManager>) {
        debug!(storage_type = %manager.storage_type(), "storage manager registered");
        self.context.add_storage_manager(manager);
    }

    pub fn connector_batch_size(&self) -> usize {
        self.config.get_connector_batch_size()
    }

    pub fn processor_batch_size(&self) -> usize {
        self.config.get_processor_batch_size()
    }

    fn check_running(&self) -> Result<()> {
        ensure!(
            !self.stopped.load(Ordering::Acquire),
            "buffer manager has been stopped"
        );
        Ok(())
    }

    pub fn create_tuple_source(
        &self,
        schema: Vec<DataType>,
        group: &str,
        kind: TupleSourceKind,
    ) -> Result<TupleSourceId> {
        self.check_running()?;

        let batch_size = match kind {
            TupleSourceKind::Processor => self.processor_batch_size(),
            TupleSourceKind::Connector => self.connector_batch_size(),
            TupleSourceKind::Lob => LOB_CHUNK_BATCH_SIZE,
        };
        let id = TupleSourceId::new(
            self.next_id.fetch_add(1, Ordering::Relaxed).to_string(),
            self.config.get_location(),
        );
        let buffer = TupleBuffer::with_context(
            id.clone(),
            schema,
            group,
            batch_size,
            Arc::clone(&self.context),
        );

        self.sources.write().insert(
            id.clone(),
            SourceEntry {
                buffer: Arc::new(buffer),
                kind,
            },
        );

        debug!(tuple_source = %id, group, ?kind, batch_size, "tuple source created");
        Ok(id)
    }

    pub fn tuple_buffer(&self, id: &TupleSourceId) -> Result<Arc<TupleBuffer>> {
        match self.sources.read().get(id) {
            Some(entry) => Ok(Arc::clone(&entry.buffer)),
            None => bail!(BufferError::not_found(id)),
        }
    }

    pub fn tuple_source_kind(&self, id: &TupleSourceId) -> Result<TupleSourceKind> {
        match self.sources.read().get(id) {
            Some(entry) => Ok(entry.kind),
            None => bail!(BufferError::not_found(id)),
        }
    }

    pub fn tuple_source_count(&self) -> usize {
        self.sources.read().len()
    }

    pub fn add_tuple(&self, id: &TupleSourceId, row: Tuple) -> Result<()> {
        self.tuple_buffer(id)?.add_tuple(row)?;
        self.maybe_manage();
        Ok(())
    }

    pub fn add_tuple_batch(&self, id: &TupleSourceId, rows: Vec<Tuple>) -> Result<()> {
        self.tuple_buffer(id)?.add_tuple_batch(rows)?;
        self.maybe_manage();
        Ok(())
    }

    pub fn set_status(&self, id: &TupleSourceId, status: TupleSourceStatus) -> Result<()> {
        let buffer = self.tuple_buffer(id)?;
        match status {
            TupleSourceStatus::Full => buffer.close(),
            TupleSourceStatus::Active => {
                if buffer.is_final() {
                    bail!(BufferError::TupleSourceClosed {
                        tuple_source: id.clone(),
                    });
                }
                Ok(())
            }
        }
    }

    pub fn status(&self, id: &TupleSourceId) -> Result<TupleSourceStatus> {
        Ok(if self.tuple_buffer(id)?.is_final() {
            TupleSourceStatus::Full
        } else {
            TupleSourceStatus::Active
        })
    }

    pub fn row_count(&self, id: &TupleSourceId) -> Result<i64> {
        Ok(self.tuple_buffer(id)?.row_count())
    }

    pub fn get_batch(&self, id: &TupleSourceId, row: i64) -> Result<Arc<TupleBatch>> {
        self.tuple_buffer(id)?.get_batch(row)
    }

    pub fn cursor(&self, id: &TupleSourceId) -> Result<TupleCursor> {
        Ok(TupleCursor::new(self.tuple_buffer(id)?))
    }

    pub fn pin_tuple_batch(&self, id: &TupleSourceId, row: i64) -> Result<PinnedBatch> {
        let batch = self.tuple_buffer(id)?.pin_batch(row)?;
        let begin_row = batch.begin_row();

        self.pins
            .lock()
            .entry(std::thread::current().id())
            .or_default()
            .push((id.clone(), begin_row));

        Ok(PinnedBatch {
            tuple_source: id.clone(),
            begin_row,
            batch,
        })
    }

    pub fn unpin_tuple_batch(&self, id: &TupleSourceId, begin_row: i64) -> Result<()> {
        let thread = std::thread::current().id();
        {
            let mut pins = self.pins.lock();
            let Some(held) = pins.get_mut(&thread) else {
                bail!("batch {} of {} is not pinned by this thread", begin_row, id);
            };
            let Some(position) = held
                .iter()
                .position(|(source, row)| source == id && *row == begin_row)
            else {
                bail!("batch {} of {} is not pinned by this thread", begin_row, id);
            };
            held.swap_remove(position);
            if held.is_empty() {
                pins.remove(&thread);
            }
        }
        self.tuple_buffer(id)?.unpin_batch(begin_row)
    }

    /// Releases every pin held by the calling thread. Returns how many.
    pub fn release_pinned_batches(&self) -> usize {
        let held = self
            .pins
            .lock()
            .remove(&std::thread::current().id())
            .unwrap_or_default();

        for (id, begin_row) in &held {
            // The source may have been removed since; its pins went with it.
            if let Ok(buffer) = self.tuple_buffer(id) {
                if let Err(e) = buffer.unpin_batch(*begin_row) {
                    warn!(tuple_source = %id, begin_row, error = %e, "failed to release pin");
                }
            }
        }
        held.len()
    }

    /// Removes a tuple source and drops its batches from every tier.
    ///
    /// Removing an id this manager handed out is idempotent; an id it never
    /// minted fails with `TupleSourceNotFound`.
    pub fn remove_tuple_source(&self, id: &TupleSourceId) -> Result<()> {
        let entry = self.sources.write().remove(id);
        match entry {
            Some(entry) => {
                self.pins
                    .lock()
                    .values_mut()
                    .for_each(|held| held.retain(|(source, _)| source != id));
                entry.buffer.remove()
            }
            None if self.was_minted(id) => Ok(()),
            None => bail!(BufferError::not_found(id)),
        }
    }

    fn was_minted(&self, id: &TupleSourceId) -> bool {
        id.id_value()
            .parse::<u64>()
            .is_ok_and(|n| n >= 1 && n < self.next_id.load(Ordering::Relaxed))
    }

    /// Removes every tuple source created for `group`. Returns how many.
    pub fn remove_tuple_sources(&self, group: &str) -> Result<usize> {
        let ids: Vec<TupleSourceId> = self
            .sources
            .read()
            .iter()
            .filter(|(_, entry)| entry.buffer.group() == group)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &ids {
            self.remove_tuple_source(id)?;
        }
        if !ids.is_empty() {
            debug!(group, count = ids.len(), "tuple sources removed for group");
        }
        Ok(ids.len())
    }

    pub fn memory_stats(&self) -> BudgetStats {
        self.context.budget().stats()
    }

    /// Bytes `group` currently holds on the memory tier.
    pub fn group_memory(&self, group: &str) -> usize {
        self.context.group_usage(group)
    }

    /// Spills until usage is under the active threshold. Returns bytes freed.
    pub fn manage_memory(&self) -> Result<usize> {
        let threshold = self.config.get_active_memory_threshold();
        let budget = self.context.budget();
        if !budget.is_above(threshold) {
            return Ok(0);
        }

        let buffers: Vec<Arc<TupleBuffer>> = self
            .sources
            .read()
            .values()
            .map(|entry| Arc::clone(&entry.buffer))
            .collect();

        let mut reclaimed = 0;
        let mut freed = 0;
        for buffer in &buffers {
            reclaimed += buffer.reclaim_cached();
        }
        for buffer in &buffers {
            let excess = budget.excess_over(threshold);
            if excess == 0 {
                break;
            }
            freed += buffer.spill_unpinned(excess)?;
        }

        debug!(
            freed,
            reclaimed,
            used = budget.total_used(),
            limit = budget.total_limit(),
            "memory management pass"
        );
        if budget.is_above(threshold) {
            warn!(
                used = budget.total_used(),
                threshold,
                "memory still above active threshold after management"
            );
        }
        Ok(freed)
    }

    fn maybe_manage(&self) {
        let now = Instant::now();
        {
            let mut last = self.last_management.lock();
            if now.duration_since(*last) >= self.config.get_management_interval() {
                *last = now;
                drop(last);
                if let Err(e) = self.manage_memory() {
                    warn!(error = %e, "memory management failed");
                }
            }
        }

        if let Some(interval) = self.config.get_log_stats_interval() {
            let mut last = self.last_stats_log.lock();
            if now.duration_since(*last) >= interval {
                *last = now;
                self.log_stats();
            }
        }
    }

    pub fn log_stats(&self) {
        let stats = self.memory_stats();
        info!(
            tuple_sources = self.tuple_source_count(),
            pending_lob_cleanups = self.context.lob_reclaim().len(),
            "{}",
            stats
        );
    }

    /// Creates the chunk source for one LOB body.
    pub fn create_lob_buffer(&self, group: &str) -> Result<TupleSourceId> {
        self.create_tuple_source(vec![DataType::Varbinary], group, TupleSourceKind::Lob)
    }

    /// Appends bytes to a LOB body in chunks of at most `LOB_CHUNK_SIZE`.
    pub fn write_lob(&self, id: &TupleSourceId, bytes: &[u8]) -> Result<()> {
        ensure!(
            self.tuple_source_kind(id)? == TupleSourceKind::Lob,
            "tuple source {} is not a LOB buffer",
            id
        );
        let rows = bytes
            .chunks(LOB_CHUNK_SIZE)
            .map(|chunk| vec![Value::Varbinary(chunk.to_vec())])
            .collect();
        self.add_tuple_batch(id, rows)
    }

    /// Closes a LOB body and returns a value sharing it.
    pub fn finish_lob(&self, id: &TupleSourceId) -> Result<LobValue> {
        ensure!(
            self.tuple_source_kind(id)? == TupleSourceKind::Lob,
            "tuple source {} is not a LOB buffer",
            id
        );
        let buffer = self.tuple_buffer(id)?;
        buffer.close()?;

        let length = buffer
            .saved_batches()?
            .iter()
            .flat_map(|batch| batch.tuples())
            .map(|row| match row.first() {
                Some(Value::Varbinary(chunk)) => chunk.len() as u64,
                _ => 0,
            })
            .sum();

        let body = LobBody::new(id.clone(), length, Arc::clone(self.context.lob_reclaim()));
        Ok(LobValue::buffered(body))
    }

    /// Reads a LOB's full payload.
    pub fn read_lob(&self, lob: &LobValue) -> Result<Vec<u8>> {
        match &lob.data {
            Some(LobData::Inline(bytes)) => Ok(bytes.to_vec()),
            Some(LobData::Buffered(body)) => {
                let mut cursor = self.cursor(body.tuple_source())?;
                let mut out = Vec::with_capacity(body.length() as usize);
                while let Some(row) = cursor.next_tuple()? {
                    match row.first() {
                        Some(Value::Varbinary(chunk)) => out.extend_from_slice(chunk),
                        _ => bail!(BufferError::Corrupted(format!(
                            "LOB buffer {} holds a non-binary chunk",
                            body.tuple_source()
                        ))),
                    }
                }
                Ok(out)
            }
            None => bail!(
                "LOB {} has no payload",
                lob.reference_id.as_deref().unwrap_or("<unnamed>")
            ),
        }
    }

    /// Removes LOB bodies nothing refers to anymore, at most
    /// `lob_cleanup_batch` per call. Returns how many were removed.
    pub fn cleanup_lobs(&self) -> Result<usize> {
        let pending = self
            .context
            .lob_reclaim()
            .drain(self.config.get_lob_cleanup_batch());

        for id in &pending {
            self.remove_tuple_source(id)?;
        }
        if !pending.is_empty() {
            debug!(
                removed = pending.len(),
                remaining = self.context.lob_reclaim().len(),
                "LOB buffers cleaned up"
            );
        }
        Ok(pending.len())
    }

    /// Removes every tuple source and shuts down the storage managers.
    /// Calling it again is a no-op.
    pub fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let entries: Vec<SourceEntry> = self.sources.write().drain().map(|(_, e)| e).collect();
        for entry in &entries {
            entry.buffer.remove()?;
        }
        self.pins.lock().clear();
        drop(entries);

        // Bodies whose last handle went with the buffers above.
        self.context.lob_reclaim().drain(usize::MAX);

        for storage in self.context.storage_managers() {
            storage
                .shutdown()
                .wrap_err_with(|| format!("failed to shut down {} storage", storage.storage_type()))?;
        }
        info!("buffer manager stopped");
        Ok(())
    }

    /// Whether `storage_type` has a registered storage manager.
    pub fn has_storage(&self, storage_type: StorageType) -> bool {
        self.context.storage(storage_type).is_some()
    }
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManager")
            .field("tuple_sources", &self.tuple_source_count())
            .field("stats", &self.memory_stats())
            .finish()
    }
}
