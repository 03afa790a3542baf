//! # Buffer Error Conditions
//!
//! Conditions a caller of the buffer layer must be able to tell apart. They are
//! bailed into an `eyre::Report` like any other error and recovered with
//! `downcast_ref`:
//!
//! ```ignore
//! match cursor.next_tuple() {
//!     Ok(row) => ...,
//!     Err(e) if BufferError::is_blocked(&e) => reschedule(),
//!     Err(e) => return Err(e),
//! }
//! ```
//!
//! | Condition | Meaning | Retry? |
//! |-----------|---------|--------|
//! | Blocked | rows not produced yet, buffer still open | yes, later |
//! | TupleSourceNotFound | unknown or removed source / begin row | no |
//! | MemoryNotAvailable | pin cannot be satisfied under the budget | by a higher layer |
//! | TupleSourceClosed | append after the buffer became final | no |
//! | InvalidTupleSourceId | malformed external id | no |
//! | TypeMismatch | value or payload disagrees with the column type | no |
//! | Corrupted | stored batch failed validation | no |

use eyre::Report;

use super::TupleSourceId;
use crate::types::DataType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    Blocked {
        tuple_source: TupleSourceId,
        row: i64,
    },
    TupleSourceNotFound {
        tuple_source: String,
        begin_row: Option<i64>,
    },
    MemoryNotAvailable {
        requested: usize,
        available: usize,
    },
    TupleSourceClosed {
        tuple_source: TupleSourceId,
    },
    InvalidTupleSourceId(String),
    TypeMismatch {
        column: usize,
        expected: DataType,
        actual: DataType,
    },
    Corrupted(String),
}

impl BufferError {
    pub fn not_found(tuple_source: &TupleSourceId) -> Self {
        BufferError::TupleSourceNotFound {
            tuple_source: tuple_source.string_id(),
            begin_row: None,
        }
    }

    pub fn batch_not_found(tuple_source: &TupleSourceId, begin_row: i64) -> Self {
        BufferError::TupleSourceNotFound {
            tuple_source: tuple_source.string_id(),
            begin_row: Some(begin_row),
        }
    }

    pub fn is_blocked(report: &Report) -> bool {
        matches!(
            report.downcast_ref::<BufferError>(),
            Some(BufferError::Blocked { .. })
        )
    }

    pub fn is_not_found(report: &Report) -> bool {
        matches!(
            report.downcast_ref::<BufferError>(),
            Some(BufferError::TupleSourceNotFound { .. })
        )
    }

    pub fn is_memory_not_available(report: &Report) -> bool {
        matches!(
            report.downcast_ref::<BufferError>(),
            Some(BufferError::MemoryNotAvailable { .. })
        )
    }

    pub fn is_closed(report: &Report) -> bool {
        matches!(
            report.downcast_ref::<BufferError>(),
            Some(BufferError::TupleSourceClosed { .. })
        )
    }
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferError::Blocked { tuple_source, row } => {
                write!(f, "tuple source {} blocked at row {}", tuple_source, row)
            }
            BufferError::TupleSourceNotFound {
                tuple_source,
                begin_row: None,
            } => write!(f, "tuple source {} not found", tuple_source),
            BufferError::TupleSourceNotFound {
                tuple_source,
                begin_row: Some(begin_row),
            } => write!(
                f,
                "batch beginning at row {} not found for tuple source {}",
                begin_row, tuple_source
            ),
            BufferError::MemoryNotAvailable {
                requested,
                available,
            } => write!(
                f,
                "memory not available: requested {} bytes, {} available",
                requested, available
            ),
            BufferError::TupleSourceClosed { tuple_source } => {
                write!(f, "tuple source {} is closed", tuple_source)
            }
            BufferError::InvalidTupleSourceId(id) => {
                write!(f, "invalid tuple source id '{}'", id)
            }
            BufferError::TypeMismatch {
                column,
                expected,
                actual,
            } => write!(
                f,
                "type mismatch in column {}: expected {}, found {}",
                column, expected, actual
            ),
            BufferError::Corrupted(message) => write!(f, "corrupted batch: {}", message),
        }
    }
}

impl std::error::Error for BufferError {}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::{bail, Result};

    fn blocked() -> Result<()> {
        bail!(BufferError::Blocked {
            tuple_source: TupleSourceId::new("1", None),
            row: 3,
        })
    }

    #[test]
    fn classifies_reports() {
        let err = blocked().unwrap_err();
        assert!(BufferError::is_blocked(&err));
        assert!(!BufferError::is_not_found(&err));
        assert_eq!(err.to_string(), "tuple source 1 blocked at row 3");
    }

    #[test]
    fn classification_survives_context() {
        use eyre::WrapErr;

        let err = blocked().wrap_err("reading next tuple").unwrap_err();
        assert!(BufferError::is_blocked(&err));
    }

    #[test]
    fn plain_errors_are_unclassified() {
        let err = eyre::eyre!("boom");
        assert!(!BufferError::is_memory_not_available(&err));
    }
}
