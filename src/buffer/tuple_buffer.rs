//! # Tuple Buffer
//!
//! The append-only, batch-oriented row sequence behind one tuple source.
//!
//! ## Layout
//!
//! ```text
//!  rows:    1 .. 500 | 501 .. 1000 | 1001 .. 1234
//!           ─────────┼─────────────┼──────────────
//!  where:   ManagedBatch  ManagedBatch  accumulator (not yet saved)
//!           (file tier)   (memory tier)
//! ```
//!
//! Rows go into the accumulator. When it holds `batch_size` rows it is saved
//! as a batch: LOB values are given reference ids, a tier is chosen, the batch
//! is handed to that tier's storage manager and a `ManagedBatch` is recorded
//! under its begin row. `close()` saves whatever is left (possibly nothing) as
//! the final batch, so every buffer ends with exactly one batch that carries
//! the termination flag.
//!
//! ## State Machine
//!
//! ```text
//!   OPEN ──close() / save_batch(true)──> CLOSED
//! ```
//!
//! Appends to a CLOSED buffer fail with `TupleSourceClosed`. `remove()` drops
//! every batch from storage; afterwards all calls fail with
//! `TupleSourceNotFound` except `remove()` itself.
//!
//! ## Reads
//!
//! `get_batch(row)`:
//! - `row > row_count`: a synthetic empty batch, terminated iff the buffer is
//!   closed (end of data vs not produced yet)
//! - `row` inside the accumulator: a batch view over the accumulated rows,
//!   rebuilt only after the accumulator changed
//! - otherwise: the managed batch found by floor lookup on begin row, fetched
//!   from its tier when the cached payload was reclaimed
//!
//! ## Tiers
//!
//! A batch is kept on the memory tier while the group's share and the total
//! budget allow it; otherwise it goes to the file tier if one is registered,
//! and the save fails with `MemoryNotAvailable` if not. Memory-tier batches can
//! later be moved to the file tier by `spill_unpinned`.
//!
//! ## LOB References
//!
//! On save, every LOB value without a reference id gets a fresh one and is
//! registered in this buffer's reference map. A LOB value that has an id but
//! no payload (read back from storage, or copied from another row) takes the
//! payload registered under that id. The first occurrence owns the payload
//! and later occurrences share it.
//!
//! ## Concurrency
//!
//! One producer appends while any number of cursors read. The accumulator and
//! counters sit behind an `RwLock`; the batch map is a separate
//! `RwLock<BTreeMap>` and the reference map a `Mutex<HashMap>`. A save holds
//! the accumulator lock until the new batch is visible in the batch map, so a
//! reader never sees a row that is in neither.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::context::BufferContext;
use super::managed_batch::ManagedBatch;
use super::storage::{StorageManager, StorageType};
use super::{BufferError, TupleBatch, TupleSourceId};
use crate::memory::{MemoryBudget, Pool};
use crate::types::{DataType, LobValue, Tuple};

struct Accumulator {
    rows: Vec<Tuple>,
    row_count: i64,
    is_final: bool,
    removed: bool,
}

pub struct TupleBuffer {
    id: TupleSourceId,
    schema: Arc<[DataType]>,
    group: String,
    batch_size: usize,
    lob_columns: SmallVec<[usize; 4]>,
    inner: RwLock<Accumulator>,
    batches: RwLock<BTreeMap<i64, ManagedBatch>>,
    lob_references: Mutex<HashMap<String, LobValue>>,
    lob_bytes: AtomicUsize,
    /// Last batch view handed out over the accumulator.
    accumulator_view: Mutex<Option<Arc<TupleBatch>>>,
    context: Arc<BufferContext>,
}

impl TupleBuffer {
    pub(crate) fn with_context(
        id: TupleSourceId,
        schema: Vec<DataType>,
        group: &str,
        batch_size: usize,
        context: Arc<BufferContext>,
    ) -> Self {
        let lob_columns = schema
            .iter()
            .enumerate()
            .filter(|(_, data_type)| data_type.is_lob())
            .map(|(column, _)| column)
            .collect();

        Self {
            id,
            schema: schema.into(),
            group: group.to_string(),
            batch_size: batch_size.max(1),
            lob_columns,
            inner: RwLock::new(Accumulator {
                rows: Vec::with_capacity(batch_size),
                row_count: 0,
                is_final: false,
                removed: false,
            }),
            batches: RwLock::new(BTreeMap::new()),
            lob_references: Mutex::new(HashMap::new()),
            lob_bytes: AtomicUsize::new(0),
            accumulator_view: Mutex::new(None),
            context,
        }
    }

    /// A buffer outside any manager, keeping its batches in `storage`.
    pub fn new(
        id: TupleSourceId,
        schema: Vec<DataType>,
        batch_size: usize,
        storage: Arc<dyn StorageManager>,
    ) -> Self {
        let context = BufferContext::new(MemoryBudget::with_limit(usize::MAX / 2), 100);
        context.add_storage_manager(storage);
        Self::with_context(id, schema, "", batch_size, Arc::new(context))
    }

    pub fn id(&self) -> &TupleSourceId {
        &self.id
    }

    pub fn schema(&self) -> &[DataType] {
        &self.schema
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn row_count(&self) -> i64 {
        self.inner.read().row_count
    }

    pub fn is_final(&self) -> bool {
        self.inner.read().is_final
    }

    pub fn is_removed(&self) -> bool {
        self.inner.read().removed
    }

    fn check_row(&self, row: &Tuple) -> Result<()> {
        if row.len() != self.schema.len() {
            bail!(BufferError::Corrupted(format!(
                "tuple with {} values added to a source with {} columns",
                row.len(),
                self.schema.len()
            )));
        }
        for (column, (value, expected)) in row.iter().zip(self.schema.iter()).enumerate() {
            if !value.is_null() && value.data_type() != *expected {
                bail!(BufferError::TypeMismatch {
                    column,
                    expected: *expected,
                    actual: value.data_type(),
                });
            }
        }
        Ok(())
    }

    fn check_open(&self, inner: &Accumulator) -> Result<()> {
        if inner.removed {
            bail!(BufferError::not_found(&self.id));
        }
        if inner.is_final {
            bail!(BufferError::TupleSourceClosed {
                tuple_source: self.id.clone(),
            });
        }
        Ok(())
    }

    pub fn add_tuple(&self, row: Tuple) -> Result<()> {
        self.check_row(&row)?;

        let mut inner = self.inner.write();
        self.check_open(&inner)?;

        inner.rows.push(row);
        inner.row_count += 1;
        if inner.rows.len() >= self.batch_size {
            self.save_locked(&mut inner, false)?;
        }
        Ok(())
    }

    /// Rows are validated up front, so one bad row rejects the whole call.
    /// When a save fails partway the remaining rows still join the
    /// accumulator: `row_count` covers the whole call and the next append or
    /// save retries the unsaved rows.
    pub fn add_tuple_batch(&self, rows: Vec<Tuple>) -> Result<()> {
        for row in &rows {
            self.check_row(row)?;
        }

        let mut inner = self.inner.write();
        self.check_open(&inner)?;

        let mut rows = rows.into_iter();
        while let Some(row) = rows.next() {
            inner.rows.push(row);
            inner.row_count += 1;
            if inner.rows.len() >= self.batch_size {
                if let Err(e) = self.save_locked(&mut inner, false) {
                    inner.row_count += rows.len() as i64;
                    inner.rows.extend(rows);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Saves the accumulated rows as a batch. With `is_final` the batch is
    /// saved even when empty and the buffer becomes CLOSED.
    pub fn save_batch(&self, is_final: bool) -> Result<()> {
        let mut inner = self.inner.write();
        self.check_open(&inner)?;
        self.save_locked(&mut inner, is_final)
    }

    /// Saves the final batch. Closing a CLOSED buffer is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.removed {
            bail!(BufferError::not_found(&self.id));
        }
        if inner.is_final {
            return Ok(());
        }
        self.save_locked(&mut inner, true)
    }

    fn save_locked(&self, inner: &mut Accumulator, is_final: bool) -> Result<()> {
        if inner.rows.is_empty() && !is_final {
            return Ok(());
        }

        *self.accumulator_view.lock() = None;
        let begin_row = inner.row_count - inner.rows.len() as i64 + 1;
        let mut rows = std::mem::take(&mut inner.rows);
        self.register_lobs(&mut rows);

        let batch = Arc::new(TupleBatch::new(begin_row, rows).with_termination(is_final));
        if let Err(e) = self.store_batch(Arc::clone(&batch)) {
            // Keep the rows so that a later save can retry.
            inner.rows = match Arc::try_unwrap(batch) {
                Ok(batch) => batch.into_tuples(),
                Err(shared) => shared.tuples().to_vec(),
            };
            return Err(e);
        }

        inner.rows = Vec::with_capacity(self.batch_size);
        if is_final {
            inner.is_final = true;
            debug!(
                tuple_source = %self.id,
                row_count = inner.row_count,
                "tuple source closed"
            );
        }
        Ok(())
    }

    fn store_batch(&self, batch: Arc<TupleBatch>) -> Result<()> {
        let bytes = batch.size_bytes();
        let (tier, accounted) = if self.context.reserve_batch_memory(&self.group, bytes) {
            (StorageType::Memory, bytes)
        } else if self.context.storage(StorageType::File).is_some() {
            (StorageType::File, 0)
        } else {
            bail!(BufferError::MemoryNotAvailable {
                requested: bytes,
                available: self.context.budget().available(),
            });
        };

        let stored = self
            .context
            .storage_or_err(tier)
            .and_then(|storage| storage.add_batch(&self.id, Arc::clone(&batch), &self.schema));
        if let Err(e) = stored {
            self.context.release_batch_memory(&self.group, accounted);
            return Err(e);
        }

        trace!(
            tuple_source = %self.id,
            begin_row = batch.begin_row(),
            rows = batch.row_count(),
            tier = %tier,
            "batch saved"
        );

        let mut managed = ManagedBatch::new(Arc::clone(&batch), tier, accounted);
        if tier == StorageType::File {
            managed.reclaim();
        }
        self.batches.write().insert(batch.begin_row(), managed);
        Ok(())
    }

    fn register_lobs(&self, rows: &mut [Tuple]) {
        if self.lob_columns.is_empty() {
            return;
        }

        let mut references = self.lob_references.lock();
        for row in rows.iter_mut() {
            for &column in &self.lob_columns {
                let Some(lob) = row.get_mut(column).and_then(|v| v.as_lob_mut()) else {
                    continue;
                };

                match (&lob.reference_id, lob.has_data()) {
                    (None, _) => {
                        let reference_id = self.context.mint_lob_reference();
                        lob.reference_id = Some(reference_id.clone());
                        if let Some(len) = lob.inline_bytes().map(|b| b.len()) {
                            if self.context.budget().try_allocate(Pool::Lob, len) {
                                self.lob_bytes.fetch_add(len, Ordering::Relaxed);
                            }
                        }
                        references.insert(reference_id, lob.clone());
                    }
                    (Some(reference_id), false) => {
                        if let Some(registered) = references.get(reference_id) {
                            lob.data = registered.data.clone();
                        }
                    }
                    (Some(reference_id), true) => {
                        if !references.contains_key(reference_id) {
                            references.insert(reference_id.clone(), lob.clone());
                        }
                    }
                }
            }
        }
    }

    /// Restores LOB payloads on a batch read back from storage.
    fn resolve_lobs(&self, batch: Arc<TupleBatch>) -> Arc<TupleBatch> {
        if self.lob_columns.is_empty() {
            return batch;
        }

        let needs_resolution = batch.tuples().iter().any(|row| {
            self.lob_columns.iter().any(|&column| {
                row.get(column)
                    .and_then(|v| v.as_lob())
                    .is_some_and(|lob| !lob.has_data())
            })
        });
        if !needs_resolution {
            return batch;
        }

        let references = self.lob_references.lock();
        let mut rows = batch.tuples().to_vec();
        for row in rows.iter_mut() {
            for &column in &self.lob_columns {
                if let Some(lob) = row.get_mut(column).and_then(|v| v.as_lob_mut()) {
                    if let Some(registered) = lob
                        .reference_id
                        .as_ref()
                        .and_then(|reference_id| references.get(reference_id))
                    {
                        lob.data = registered.data.clone();
                    }
                }
            }
        }

        let mut resolved = TupleBatch::new(batch.begin_row(), rows).with_termination(batch.is_last());
        if let Some(hint) = batch.size_hint() {
            resolved = resolved.with_size_hint(hint);
        }
        Arc::new(resolved)
    }

    /// The LOB registered under `reference_id`, with its payload.
    pub fn lob_reference(&self, reference_id: &str) -> Option<LobValue> {
        self.lob_references.lock().get(reference_id).cloned()
    }

    pub fn get_batch(&self, row: i64) -> Result<Arc<TupleBatch>> {
        ensure!(row >= 1, "row numbers start at 1, got {}", row);

        {
            let inner = self.inner.read();
            if inner.removed {
                bail!(BufferError::not_found(&self.id));
            }
            if row > inner.row_count {
                return Ok(Arc::new(TupleBatch::empty(row, inner.is_final)));
            }
            let accumulator_begin = inner.row_count - inner.rows.len() as i64 + 1;
            if !inner.rows.is_empty() && row >= accumulator_begin {
                let mut view = self.accumulator_view.lock();
                if let Some(batch) = view.as_ref() {
                    if batch.begin_row() == accumulator_begin
                        && batch.row_count() == inner.rows.len()
                    {
                        return Ok(Arc::clone(batch));
                    }
                }
                let batch = Arc::new(TupleBatch::new(accumulator_begin, inner.rows.clone()));
                *view = Some(Arc::clone(&batch));
                return Ok(batch);
            }
        }

        {
            let batches = self.batches.read();
            let managed = self.locate(&batches, row)?;
            if let Some(batch) = managed.batch() {
                return Ok(batch);
            }
        }

        let mut batches = self.batches.write();
        let begin_row = self.locate(&batches, row)?.begin_row();
        self.load_locked(&mut batches, begin_row)
    }

    fn locate<'a>(
        &self,
        batches: &'a BTreeMap<i64, ManagedBatch>,
        row: i64,
    ) -> Result<&'a ManagedBatch> {
        match batches.range(..=row).next_back() {
            Some((_, managed)) if managed.contains_row(row) => Ok(managed),
            _ => bail!(BufferError::batch_not_found(&self.id, row)),
        }
    }

    fn load_locked(
        &self,
        batches: &mut BTreeMap<i64, ManagedBatch>,
        begin_row: i64,
    ) -> Result<Arc<TupleBatch>> {
        let Some(managed) = batches.get_mut(&begin_row) else {
            bail!(BufferError::batch_not_found(&self.id, begin_row));
        };
        if let Some(batch) = managed.batch() {
            return Ok(batch);
        }

        let storage = self.context.storage_or_err(managed.tier())?;
        let batch = self.resolve_lobs(storage.get_batch(&self.id, begin_row, &self.schema)?);
        managed.set_batch_reference(Arc::clone(&batch));
        Ok(batch)
    }

    /// Every saved batch in row order, loading reclaimed payloads.
    pub fn saved_batches(&self) -> Result<Vec<Arc<TupleBatch>>> {
        if self.is_removed() {
            bail!(BufferError::not_found(&self.id));
        }
        let mut batches = self.batches.write();
        let begin_rows: Vec<i64> = batches.keys().copied().collect();
        begin_rows
            .into_iter()
            .map(|begin_row| self.load_locked(&mut batches, begin_row))
            .collect()
    }

    /// Keeps the saved batch containing `row` resident until unpinned.
    ///
    /// Rows that are not in a saved batch yet report `Blocked`. Pinning a
    /// spilled batch charges the pinned pool and fails with
    /// `MemoryNotAvailable` when the budget cannot cover it.
    pub fn pin_batch(&self, row: i64) -> Result<Arc<TupleBatch>> {
        ensure!(row >= 1, "row numbers start at 1, got {}", row);
        {
            let inner = self.inner.read();
            if inner.removed {
                bail!(BufferError::not_found(&self.id));
            }
            let saved_rows = inner.row_count - inner.rows.len() as i64;
            if row > saved_rows {
                if inner.is_final {
                    bail!(BufferError::batch_not_found(&self.id, row));
                }
                bail!(BufferError::Blocked {
                    tuple_source: self.id.clone(),
                    row,
                });
            }
        }

        let mut batches = self.batches.write();
        let begin_row = self.locate(&batches, row)?.begin_row();
        let needs_reservation = batches
            .get(&begin_row)
            .is_some_and(|m| m.tier() != StorageType::Memory && !m.is_pinned());

        let batch = self.load_locked(&mut batches, begin_row)?;
        if needs_reservation {
            let bytes = batch.size_bytes();
            self.context.reserve_pinned_memory(bytes)?;
            if let Some(managed) = batches.get_mut(&begin_row) {
                managed.set_pinned_bytes(bytes);
            }
        }
        if let Some(managed) = batches.get_mut(&begin_row) {
            managed.pin();
        }
        Ok(batch)
    }

    pub fn unpin_batch(&self, begin_row: i64) -> Result<()> {
        let mut batches = self.batches.write();
        let Some(managed) = batches.get_mut(&begin_row) else {
            bail!(BufferError::batch_not_found(&self.id, begin_row));
        };
        match managed.unpin() {
            Some(0) => {
                let pinned = managed.pinned_bytes();
                managed.set_pinned_bytes(0);
                self.context.budget().release(Pool::Pinned, pinned);
            }
            Some(_) => {}
            None => debug!(
                tuple_source = %self.id,
                begin_row,
                "unpin of a batch that is not pinned"
            ),
        }
        Ok(())
    }

    /// Moves unpinned memory-tier batches to the file tier, oldest first, until
    /// at least `target_bytes` were released. Returns the bytes released.
    pub fn spill_unpinned(&self, target_bytes: usize) -> Result<usize> {
        let Some(file) = self.context.storage(StorageType::File) else {
            return Ok(0);
        };
        let memory = self.context.storage_or_err(StorageType::Memory)?;

        let mut released = 0;
        let mut batches = self.batches.write();
        for managed in batches.values_mut() {
            if released >= target_bytes {
                break;
            }
            if managed.tier() != StorageType::Memory
                || managed.is_pinned()
                || managed.row_count() == 0
            {
                continue;
            }

            let batch = match managed.batch() {
                Some(batch) => batch,
                None => memory.get_batch(&self.id, managed.begin_row(), &self.schema)?,
            };
            file.add_batch(&self.id, batch, &self.schema)?;
            memory.remove_batch(&self.id, managed.begin_row())?;

            let bytes = managed.accounted_bytes();
            self.context.release_batch_memory(&self.group, bytes);
            managed.set_accounted_bytes(0);
            managed.set_tier(StorageType::File);
            managed.reclaim();
            released += bytes;
        }

        if released > 0 {
            debug!(tuple_source = %self.id, bytes = released, "spilled batches to file tier");
        }
        Ok(released)
    }

    /// Drops cached payloads of unpinned spilled batches. Returns how many.
    pub fn reclaim_cached(&self) -> usize {
        self.batches
            .write()
            .values_mut()
            .filter(|managed| managed.tier() != StorageType::Memory)
            .map(|managed| managed.reclaim())
            .filter(|reclaimed| *reclaimed)
            .count()
    }

    /// Bytes of this buffer currently charged to the memory tier.
    pub fn memory_bytes(&self) -> usize {
        self.batches
            .read()
            .values()
            .map(ManagedBatch::accounted_bytes)
            .sum()
    }

    /// Tier of the saved batch beginning at `begin_row`.
    pub fn batch_tier(&self, begin_row: i64) -> Option<StorageType> {
        self.batches.read().get(&begin_row).map(ManagedBatch::tier)
    }

    /// Drops every batch and LOB reference. Calling it again is a no-op.
    pub fn remove(&self) -> Result<()> {
        let batches = {
            let mut inner = self.inner.write();
            if inner.removed {
                return Ok(());
            }
            inner.removed = true;
            inner.rows.clear();
            *self.accumulator_view.lock() = None;
            std::mem::take(&mut *self.batches.write())
        };

        for managed in batches.values() {
            self.context
                .release_batch_memory(&self.group, managed.accounted_bytes());
            self.context
                .budget()
                .release(Pool::Pinned, managed.pinned_bytes());
        }
        for storage in self.context.storage_managers() {
            storage.remove_batches(&self.id)?;
        }

        self.lob_references.lock().clear();
        self.context
            .budget()
            .release(Pool::Lob, self.lob_bytes.swap(0, Ordering::Relaxed));

        debug!(tuple_source = %self.id, batches = batches.len(), "tuple source removed");
        Ok(())
    }
}

impl std::fmt::Debug for TupleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("TupleBuffer")
            .field("id", &self.id)
            .field("group", &self.group)
            .field("batch_size", &self.batch_size)
            .field("row_count", &inner.row_count)
            .field("is_final", &inner.is_final)
            .finish()
    }
}
