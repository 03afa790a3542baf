//! # Tuple Cursor
//!
//! Pull-based iteration over one tuple buffer with mark/reset and absolute
//! seek. Reads never wait: a row that is not produced yet on an open buffer
//! fails with `BufferError::Blocked`, and the caller retries once the producer
//! has advanced. On a closed buffer the same position reports end of data.
//!
//! The cursor caches the last batch it touched and only goes back to the
//! buffer when the requested row falls outside that batch. Rows inside a batch
//! never change, so the cache is always safe to serve from.

use std::sync::Arc;

use eyre::{bail, ensure, Result};

use super::{BufferError, TupleBatch, TupleBuffer};
use crate::types::{DataType, Tuple};

pub struct TupleCursor {
    buffer: Arc<TupleBuffer>,
    current_row: i64,
    mark: i64,
    cached: Option<Arc<TupleBatch>>,
    closed: bool,
}

impl TupleCursor {
    pub fn new(buffer: Arc<TupleBuffer>) -> Self {
        Self {
            buffer,
            current_row: 1,
            mark: 1,
            cached: None,
            closed: false,
        }
    }

    /// The row the next `next_tuple` call returns (1-based).
    pub fn current_row(&self) -> i64 {
        self.current_row
    }

    pub fn schema(&self) -> &[DataType] {
        self.buffer.schema()
    }

    /// Returns the next row, `None` at end of data, or `Blocked`.
    pub fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        let row = self.current_row;
        let Some(batch) = self.batch_at(row)? else {
            return Ok(None);
        };
        let tuple = batch.tuple(row).clone();
        self.current_row += 1;
        Ok(Some(tuple))
    }

    /// Lookahead without consuming; same `Blocked` contract as `next_tuple`.
    pub fn has_next(&mut self) -> Result<bool> {
        Ok(self.batch_at(self.current_row)?.is_some())
    }

    pub fn mark(&mut self) {
        self.mark = self.current_row;
    }

    pub fn reset(&mut self) {
        self.current_row = self.mark;
    }

    pub fn set_position(&mut self, row: i64) -> Result<()> {
        ensure!(row >= 1, "cursor position must be at least 1, got {}", row);
        self.current_row = row;
        Ok(())
    }

    /// Drops the cached batch; later reads fail.
    pub fn close(&mut self) {
        self.cached = None;
        self.closed = true;
    }

    fn batch_at(&mut self, row: i64) -> Result<Option<Arc<TupleBatch>>> {
        if self.closed {
            bail!("cursor over {} is closed", self.buffer.id());
        }

        if let Some(cached) = &self.cached {
            if cached.contains_row(row) {
                return Ok(Some(Arc::clone(cached)));
            }
        }

        let batch = self.buffer.get_batch(row)?;
        if !batch.contains_row(row) {
            if batch.is_last() {
                return Ok(None);
            }
            bail!(BufferError::Blocked {
                tuple_source: self.buffer.id().clone(),
                row,
            });
        }

        self.cached = Some(Arc::clone(&batch));
        Ok(Some(batch))
    }
}

impl std::fmt::Debug for TupleCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TupleCursor")
            .field("tuple_source", self.buffer.id())
            .field("current_row", &self.current_row)
            .field("mark", &self.mark)
            .finish()
    }
}
