//! # Tuple Buffer Subsystem
//!
//! Memory-bounded, spillable, cursor-readable sequences of query result rows.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     BufferManager                        │
//! │  sources: TupleSourceId -> TupleBuffer, pins per thread  │
//! └───────────────┬──────────────────────────┬───────────────┘
//!                 │                          │
//!        ┌────────▼────────┐        ┌────────▼────────┐
//!        │   TupleBuffer   │◄───────│   TupleCursor   │
//!        │ accumulator +   │        │ current row,    │
//!        │ ManagedBatches  │        │ mark, cache     │
//!        └────────┬────────┘        └─────────────────┘
//!                 │ add_batch / get_batch (exact begin row)
//!        ┌────────▼───────────────────────────────┐
//!        │ StorageManager: Memory | File (spill)  │
//!        └────────────────────────────────────────┘
//! ```
//!
//! ## Row Addressing
//!
//! Rows are numbered from 1 in append order. A batch covers
//! `[begin_row, begin_row + len - 1]`. Storage managers look batches up by the
//! exact begin row they were stored with; the tuple buffer keeps the
//! authoritative begin rows in its `ManagedBatch` map and does the floor
//! lookup itself.
//!
//! ## Reading Ahead of the Producer
//!
//! A read past the last produced row of an open buffer fails with
//! `BufferError::Blocked`. It is a retry signal, not a failure: the caller
//! schedules something else and comes back. On a closed buffer the same read
//! is end of data.
//!
//! ## Memory
//!
//! Saved batches stay on the memory tier while the group's share and the
//! total budget allow it and go to the file tier otherwise. Cached payloads of
//! spilled batches can be dropped at any time and are fetched again by begin
//! row; pinned batches keep theirs.

mod batch;
mod codec;
mod context;
mod cursor;
mod error;
mod lob;
mod managed_batch;
mod manager;
pub mod storage;
mod tuple_buffer;
mod tuple_source_id;

pub use batch::TupleBatch;
pub use codec::{BatchSerializer, BATCH_HEADER_SIZE};
pub use cursor::TupleCursor;
pub use error::BufferError;
pub use lob::LobBody;
pub use managed_batch::ManagedBatch;
pub use manager::{BufferManager, PinnedBatch, TupleSourceKind, TupleSourceStatus};
pub use storage::{FileStorageManager, MemoryStorageManager, StorageManager, StorageType};
pub use tuple_buffer::TupleBuffer;
pub use tuple_source_id::TupleSourceId;
