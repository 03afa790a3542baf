//! # querybuf Configuration Constants
//!
//! Defaults for the buffer subsystem, co-located so that values which depend
//! on each other are changed together.
//!
//! ## Dependency Graph
//!
//! ```text
//! DEFAULT_MEMORY_AVAILABLE (128 MB)
//!       │
//!       ├─> DEFAULT_SESSION_USE_PERCENTAGE (share of the budget one group may hold)
//!       │
//!       └─> DEFAULT_ACTIVE_MEMORY_THRESHOLD (percent that triggers spilling)
//!             Must be <= 100, otherwise management never runs.
//!
//! DEFAULT_PROCESSOR_BATCH_SIZE (500 rows)
//! DEFAULT_CONNECTOR_BATCH_SIZE (1000 rows)
//!       Both must be > 0; a zero batch size would flush on every row and
//!       produce an unbounded number of zero-length batches on close.
//!       Both must be <= MAX_BATCH_ROWS, the most rows a decoder accepts for
//!       a batch whose rows take no bytes.
//!
//! DEFAULT_MAX_FILE_SIZE (2 GB)
//!       │
//!       └─> SPILL_RECORD_HEADER_SIZE (every spilled batch carries one)
//! ```
//!
//! ## Critical Invariants
//!
//! 1. Percentages are within 1..=100
//! 2. Batch sizes are non-zero
//! 3. A spill record header fits many times in the smallest allowed file

// ============================================================================
// MEMORY CONFIGURATION
// ============================================================================

/// Default total memory budget for buffered batches (128 MB).
pub const DEFAULT_MEMORY_AVAILABLE: usize = 128 * 1024 * 1024;

/// Smallest budget the manager accepts (1 MB).
pub const MIN_MEMORY_AVAILABLE: usize = 1024 * 1024;

/// Default budget as a percentage of system RAM when `auto` is requested.
pub const DEFAULT_AUTO_BUDGET_PERCENT: usize = 25;

/// Percentage of the total budget a single group (session) may occupy.
pub const DEFAULT_SESSION_USE_PERCENTAGE: usize = 100;

/// Usage percentage above which active memory management spills batches.
pub const DEFAULT_ACTIVE_MEMORY_THRESHOLD: usize = 75;

/// Minimum time between two active management scans, in milliseconds.
pub const DEFAULT_MANAGEMENT_INTERVAL_MS: u64 = 1000;

const _: () = assert!(
    DEFAULT_SESSION_USE_PERCENTAGE > 0 && DEFAULT_SESSION_USE_PERCENTAGE <= 100,
    "session use percentage must be within 1..=100"
);

const _: () = assert!(
    DEFAULT_ACTIVE_MEMORY_THRESHOLD > 0 && DEFAULT_ACTIVE_MEMORY_THRESHOLD <= 100,
    "active memory threshold must be within 1..=100"
);

const _: () = assert!(
    DEFAULT_MEMORY_AVAILABLE >= MIN_MEMORY_AVAILABLE,
    "default budget below the accepted minimum"
);

// ============================================================================
// BATCH SIZING
// ============================================================================

/// Rows per batch for tuple sources produced inside the query processor.
pub const DEFAULT_PROCESSOR_BATCH_SIZE: usize = 500;

/// Rows per batch for tuple sources fed by connectors.
pub const DEFAULT_CONNECTOR_BATCH_SIZE: usize = 1000;

/// Upper bound on configured batch sizes, and on the row count of a decoded
/// zero-column batch.
pub const MAX_BATCH_ROWS: usize = 1 << 24;

/// Estimated in-memory bytes per value when a batch has no size hint.
pub const ESTIMATED_VALUE_SIZE: usize = 32;

/// Estimated fixed overhead per row.
pub const ESTIMATED_ROW_OVERHEAD: usize = 24;

const _: () = assert!(
    DEFAULT_PROCESSOR_BATCH_SIZE > 0 && DEFAULT_CONNECTOR_BATCH_SIZE > 0,
    "batch sizes must be non-zero"
);

const _: () = assert!(
    DEFAULT_PROCESSOR_BATCH_SIZE <= MAX_BATCH_ROWS && DEFAULT_CONNECTOR_BATCH_SIZE <= MAX_BATCH_ROWS,
    "default batch sizes must not exceed MAX_BATCH_ROWS"
);

// ============================================================================
// SPILL FILES
// ============================================================================

/// Maximum number of spill file handles held open at once.
pub const DEFAULT_MAX_OPEN_FILES: usize = 10;

/// Lowest accepted value for the open file limit.
pub const MIN_MAX_OPEN_FILES: usize = 1;

/// Size at which a spill file rolls over to a new file (2 GB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2048 * 1024 * 1024;

/// Lowest accepted value for the file size limit (64 KB).
pub const MIN_MAX_FILE_SIZE: u64 = 64 * 1024;

/// Header written in front of every spilled batch: payload length (u32) and a
/// CRC64 of the payload (u64).
pub const SPILL_RECORD_HEADER_SIZE: usize = 12;

/// Extension of spill files.
pub const SPILL_FILE_EXTENSION: &str = "spill";

const _: () = assert!(
    (SPILL_RECORD_HEADER_SIZE as u64) * 1024 <= MIN_MAX_FILE_SIZE,
    "spill header too large relative to the minimum file size"
);

// ============================================================================
// LOB CLEANUP AND STATS
// ============================================================================

/// Reclaimed LOB buffers processed per cleanup call.
pub const DEFAULT_LOB_CLEANUP_BATCH: usize = 16;

/// Rows of chunk data a LOB body buffer holds per batch.
pub const LOB_CHUNK_BATCH_SIZE: usize = 64;

/// Bytes per LOB chunk row.
pub const LOB_CHUNK_SIZE: usize = 8 * 1024;

/// Stats logging interval in milliseconds (0 disables it).
pub const DEFAULT_LOG_STATS_INTERVAL_MS: u64 = 0;
