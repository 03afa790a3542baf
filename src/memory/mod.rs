//! # Memory Budget Management
//!
//! Tracks how many bytes of batch data the buffer subsystem holds in memory and
//! refuses allocations that would exceed the configured budget.
//!
//! ## Pools
//!
//! ```text
//! +----------------------------------------------------------+
//! |                  Total Memory Budget                      |
//! |        (default: 128 MB, or 25% of RAM with `auto`)       |
//! +----------------------------------------------------------+
//! |  Batches: memory-tier batches owned by tuple buffers     |
//! |  Pinned:  spilled batches held resident by a pin         |
//! |  Lob:     inline LOB payloads registered by buffers      |
//! +----------------------------------------------------------+
//! ```
//!
//! Pools share one limit; the split exists for reporting and so that releases
//! are attributed to the right subsystem.
//!
//! ## Enforcement Model
//!
//! Hard limits: an allocation that would exceed the budget fails with a
//! [`MemoryError`]. The buffer manager reacts by choosing the file tier or by
//! reporting `MemoryNotAvailable` to the caller of a pin.

mod budget;

pub use budget::{BudgetStats, MemoryBudget, MemoryError, Pool};
