//! # querybuf - Tuple Buffering and Query Rewriting
//!
//! querybuf is the intermediate-result layer of a federated relational query
//! engine. It owns two things:
//!
//! - **Tuple buffers**: append-only, batch-oriented row sequences that live in
//!   memory while the budget allows and spill to files when it does not. Readers
//!   pull rows through cursors that never block an OS thread; reading past the
//!   rows produced so far yields a `Blocked` signal instead.
//! - **The query rewriter**: a recursive pass that puts a resolved command tree
//!   into canonical form before planning (three-valued criteria simplification,
//!   compound flattening, constant folding, algebraic inversion of comparisons,
//!   view DML expansion and semi-join conversion).
//!
//! ## Quick Start
//!
//! ```ignore
//! use querybuf::buffer::{BufferManager, TupleSourceKind, TupleSourceStatus};
//! use querybuf::config::BufferConfig;
//! use querybuf::types::{DataType, Value};
//!
//! let manager = BufferManager::new(BufferConfig::default())?;
//! let id = manager.create_tuple_source(
//!     vec![DataType::Integer, DataType::String],
//!     "session-1",
//!     TupleSourceKind::Processor,
//! )?;
//!
//! manager.add_tuple(&id, vec![Value::Integer(1), Value::from("a")])?;
//! manager.set_status(&id, TupleSourceStatus::Full)?;
//!
//! let mut cursor = manager.cursor(&id)?;
//! while let Some(row) = cursor.next_tuple()? {
//!     println!("{:?}", row);
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │   QueryRewriter (rewrite)                 │  command tree -> canonical tree
//! ├──────────────────────────────────────────┤
//! │   BufferManager                           │  registry, pins, memory policy
//! ├─────────────────────┬────────────────────┤
//! │   TupleBuffer       │   TupleCursor       │  batches, LOB refs / reads
//! ├─────────────────────┴────────────────────┤
//! │   StorageManager (memory tier | file tier)│
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`config`]: defaults and the `BufferConfig` configuration set
//! - [`memory`]: atomic memory budget accounting
//! - [`types`]: `DataType`, `Value` and conversions
//! - [`buffer`]: batches, storage managers, tuple buffers, cursors, manager
//! - [`rewrite`]: command tree, evaluator, metadata and the rewriter

pub mod buffer;
pub mod config;
pub mod memory;
pub mod rewrite;
pub mod types;

pub use buffer::{
    BufferError, BufferManager, TupleBatch, TupleBuffer, TupleCursor, TupleSourceId,
    TupleSourceKind, TupleSourceStatus,
};
pub use config::BufferConfig;
pub use rewrite::{QueryRewriter, RewriteError};
pub use types::{DataType, Value};
