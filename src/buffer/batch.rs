//! # Tuple Batches
//!
//! A `TupleBatch` is a contiguous, immutable chunk of rows addressed by
//! absolute 1-based row numbers:
//!
//! ```text
//! begin_row = 4, rows = [r4, r5, r6]      end_row = 6
//! begin_row = 7, rows = []                end_row = 6 (empty)
//! ```
//!
//! `end_row` is always `begin_row + row_count - 1`. The last batch of a tuple
//! source carries the termination flag; it may be empty when the rows ran out
//! exactly at a batch boundary.
//!
//! Batches are shared as `Arc<TupleBatch>` between the tuple buffer, the
//! storage tiers and cursors.

use crate::config::{ESTIMATED_ROW_OVERHEAD, ESTIMATED_VALUE_SIZE};
use crate::types::Tuple;

#[derive(Debug, Clone, PartialEq)]
pub struct TupleBatch {
    begin_row: i64,
    rows: Vec<Tuple>,
    is_last: bool,
    size_hint: Option<usize>,
}

impl TupleBatch {
    pub fn new(begin_row: i64, rows: Vec<Tuple>) -> Self {
        debug_assert!(begin_row >= 1, "row numbers start at 1, got {}", begin_row);
        Self {
            begin_row,
            rows,
            is_last: false,
            size_hint: None,
        }
    }

    /// Zero-row batch positioned at `begin_row`.
    pub fn empty(begin_row: i64, is_last: bool) -> Self {
        Self::new(begin_row, Vec::new()).with_termination(is_last)
    }

    pub fn with_termination(mut self, is_last: bool) -> Self {
        self.is_last = is_last;
        self
    }

    pub fn with_size_hint(mut self, bytes: usize) -> Self {
        self.size_hint = Some(bytes);
        self
    }

    pub fn begin_row(&self) -> i64 {
        self.begin_row
    }

    pub fn end_row(&self) -> i64 {
        self.begin_row + self.rows.len() as i64 - 1
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_last(&self) -> bool {
        self.is_last
    }

    pub fn size_hint(&self) -> Option<usize> {
        self.size_hint
    }

    /// Size hint if one was supplied, otherwise an estimate from the values.
    pub fn size_bytes(&self) -> usize {
        self.size_hint.unwrap_or_else(|| {
            self.rows
                .iter()
                .map(|row| {
                    ESTIMATED_ROW_OVERHEAD
                        + row
                            .iter()
                            .map(|v| v.estimated_size().max(ESTIMATED_VALUE_SIZE))
                            .sum::<usize>()
                })
                .sum()
        })
    }

    pub fn contains_row(&self, row: i64) -> bool {
        row >= self.begin_row && row <= self.end_row()
    }

    /// Row at absolute position `row`.
    ///
    /// # Panics
    ///
    /// Panics if `row` lies outside `[begin_row, end_row]`.
    pub fn tuple(&self, row: i64) -> &Tuple {
        assert!(
            self.contains_row(row),
            "row {} outside batch [{}, {}]",
            row,
            self.begin_row,
            self.end_row()
        );
        &self.rows[(row - self.begin_row) as usize]
    }

    pub fn tuples(&self) -> &[Tuple] {
        &self.rows
    }

    pub fn into_tuples(self) -> Vec<Tuple> {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn rows(values: &[i32]) -> Vec<Tuple> {
        values.iter().map(|v| vec![Value::Integer(*v)]).collect()
    }

    #[test]
    fn derived_bounds() {
        let batch = TupleBatch::new(4, rows(&[4, 5, 6]));
        assert_eq!(batch.begin_row(), 4);
        assert_eq!(batch.end_row(), 6);
        assert_eq!(batch.row_count(), 3);
        assert!(!batch.is_last());
        assert_eq!(batch.tuple(5), &vec![Value::Integer(5)]);
    }

    #[test]
    fn empty_batch_ends_before_it_begins() {
        let batch = TupleBatch::empty(7, true);
        assert_eq!(batch.end_row(), 6);
        assert!(batch.is_last());
        assert!(!batch.contains_row(7));
    }

    #[test]
    #[should_panic(expected = "outside batch")]
    fn tuple_out_of_range_panics() {
        let batch = TupleBatch::new(1, rows(&[1, 2]));
        batch.tuple(3);
    }

    #[test]
    fn size_hint_overrides_estimate() {
        let batch = TupleBatch::new(1, rows(&[1, 2]));
        assert!(batch.size_bytes() > 0);
        assert_eq!(batch.with_size_hint(10).size_bytes(), 10);
    }
}
