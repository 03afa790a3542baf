//! # Memory Budget Implementation
//!
//! Lock-free accounting of buffered bytes against a hard limit.
//!
//! ## Design Principles
//!
//! 1. **Hard Limits**: Allocations that would exceed the budget fail immediately
//! 2. **One Limit, Several Counters**: Pools are reporting buckets over a single total
//! 3. **Thread Safety**: All counters use atomics with CAS loops
//!
//! ## Estimates
//!
//! Batch sizes come from the batch's size hint or from a per-value estimate
//! (see `config::ESTIMATED_VALUE_SIZE`). The goal is to bound memory held by
//! intermediate results, not to account for every allocation precisely.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use eyre::{bail, Result};
use sysinfo::System;

use crate::config::{DEFAULT_AUTO_BUDGET_PERCENT, MIN_MEMORY_AVAILABLE};

static SYSTEM_TOTAL_MEMORY: OnceLock<usize> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pool {
    Batches,
    Pinned,
    Lob,
}

impl Pool {
    pub fn name(&self) -> &'static str {
        match self {
            Pool::Batches => "batches",
            Pool::Pinned => "pinned",
            Pool::Lob => "lob",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BudgetStats {
    pub total_limit: usize,
    pub total_used: usize,
    pub batches_used: usize,
    pub pinned_used: usize,
    pub lob_used: usize,
}

impl BudgetStats {
    pub fn available(&self) -> usize {
        self.total_limit.saturating_sub(self.total_used)
    }

    pub fn utilization_percent(&self) -> f64 {
        if self.total_limit == 0 {
            return 0.0;
        }
        (self.total_used as f64 / self.total_limit as f64) * 100.0
    }
}

impl std::fmt::Display for BudgetStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "batches:{},pinned:{},lob:{},total:{}/{}",
            self.batches_used, self.pinned_used, self.lob_used, self.total_used, self.total_limit
        )
    }
}

#[derive(Debug)]
pub struct MemoryError {
    pub pool: Pool,
    pub requested: usize,
    pub available: usize,
}

impl std::fmt::Display for MemoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "memory budget exceeded: {} pool requested {} bytes but only {} available",
            self.pool.name(),
            self.requested,
            self.available
        )
    }
}

impl std::error::Error for MemoryError {}

#[derive(Debug)]
pub struct MemoryBudget {
    total_limit: usize,
    batches_used: AtomicUsize,
    pinned_used: AtomicUsize,
    lob_used: AtomicUsize,
}

impl MemoryBudget {
    /// Sizes the budget as a share of system RAM.
    pub fn auto_detect() -> Self {
        let total_memory = *SYSTEM_TOTAL_MEMORY.get_or_init(|| {
            let mut sys = System::new();
            sys.refresh_memory();
            sys.total_memory() as usize
        });

        Self::with_limit((total_memory * DEFAULT_AUTO_BUDGET_PERCENT) / 100)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            total_limit: limit.max(MIN_MEMORY_AVAILABLE),
            batches_used: AtomicUsize::new(0),
            pinned_used: AtomicUsize::new(0),
            lob_used: AtomicUsize::new(0),
        }
    }

    pub fn total_limit(&self) -> usize {
        self.total_limit
    }

    pub fn total_used(&self) -> usize {
        self.batches_used.load(Ordering::Acquire)
            + self.pinned_used.load(Ordering::Acquire)
            + self.lob_used.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.total_limit.saturating_sub(self.total_used())
    }

    pub fn pool_used(&self, pool: Pool) -> usize {
        self.pool_counter(pool).load(Ordering::Acquire)
    }

    fn pool_counter(&self, pool: Pool) -> &AtomicUsize {
        match pool {
            Pool::Batches => &self.batches_used,
            Pool::Pinned => &self.pinned_used,
            Pool::Lob => &self.lob_used,
        }
    }

    pub fn can_allocate(&self, bytes: usize) -> bool {
        self.available() >= bytes
    }

    /// True when usage exceeds `percent` of the limit.
    pub fn is_above(&self, percent: usize) -> bool {
        self.total_used() as u128 * 100 > self.total_limit as u128 * percent as u128
    }

    /// Bytes that must be released to get back to `percent` of the limit.
    pub fn excess_over(&self, percent: usize) -> usize {
        let target = (self.total_limit as u128 * percent as u128 / 100) as usize;
        self.total_used().saturating_sub(target)
    }

    pub fn allocate(&self, pool: Pool, bytes: usize) -> Result<()> {
        if bytes == 0 {
            return Ok(());
        }

        let counter = self.pool_counter(pool);

        loop {
            let current_pool_used = counter.load(Ordering::Acquire);
            let current_total_used = self.total_used();

            if current_total_used + bytes > self.total_limit {
                bail!(MemoryError {
                    pool,
                    requested: bytes,
                    available: self.total_limit.saturating_sub(current_total_used),
                });
            }

            match counter.compare_exchange_weak(
                current_pool_used,
                current_pool_used + bytes,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(_) => continue,
            }
        }
    }

    pub fn try_allocate(&self, pool: Pool, bytes: usize) -> bool {
        self.allocate(pool, bytes).is_ok()
    }

    pub fn release(&self, pool: Pool, bytes: usize) {
        if bytes == 0 {
            return;
        }

        let counter = self.pool_counter(pool);

        loop {
            let current = counter.load(Ordering::Acquire);
            let new_value = current.saturating_sub(bytes);

            match counter.compare_exchange_weak(
                current,
                new_value,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(_) => continue,
            }
        }
    }

    pub fn stats(&self) -> BudgetStats {
        let batches_used = self.batches_used.load(Ordering::Acquire);
        let pinned_used = self.pinned_used.load(Ordering::Acquire);
        let lob_used = self.lob_used.load(Ordering::Acquire);

        BudgetStats {
            total_limit: self.total_limit,
            total_used: batches_used + pinned_used + lob_used,
            batches_used,
            pinned_used,
            lob_used,
        }
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::auto_detect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 4 * 1024 * 1024;

    #[test]
    fn test_auto_detect_respects_floor() {
        let budget = MemoryBudget::auto_detect();
        assert!(budget.total_limit() >= MIN_MEMORY_AVAILABLE);
    }

    #[test]
    fn test_with_limit_respects_floor() {
        let budget = MemoryBudget::with_limit(1000);
        assert_eq!(budget.total_limit(), MIN_MEMORY_AVAILABLE);
    }

    #[test]
    fn test_allocate_and_release() {
        let budget = MemoryBudget::with_limit(LIMIT);
        budget.allocate(Pool::Batches, 256 * 1024).unwrap();
        assert_eq!(budget.pool_used(Pool::Batches), 256 * 1024);

        budget.release(Pool::Batches, 128 * 1024);
        assert_eq!(budget.pool_used(Pool::Batches), 128 * 1024);
    }

    #[test]
    fn test_allocate_exceeds_total_budget() {
        let budget = MemoryBudget::with_limit(LIMIT);
        budget.allocate(Pool::Batches, LIMIT - 10).unwrap();

        let err = budget.allocate(Pool::Pinned, 11).unwrap_err();
        let memory_error = err.downcast_ref::<MemoryError>().unwrap();
        assert_eq!(memory_error.pool, Pool::Pinned);
        assert_eq!(memory_error.available, 10);
    }

    #[test]
    fn test_release_underflow_protection() {
        let budget = MemoryBudget::with_limit(LIMIT);
        budget.release(Pool::Lob, 1000);
        assert_eq!(budget.pool_used(Pool::Lob), 0);
    }

    #[test]
    fn test_threshold_checks() {
        let budget = MemoryBudget::with_limit(LIMIT);
        budget.allocate(Pool::Batches, LIMIT / 2).unwrap();

        assert!(budget.is_above(40));
        assert!(!budget.is_above(50));
        assert_eq!(budget.excess_over(25), LIMIT / 4);
        assert_eq!(budget.excess_over(75), 0);
    }

    #[test]
    fn test_stats_accuracy() {
        let budget = MemoryBudget::with_limit(LIMIT);
        budget.allocate(Pool::Batches, 100_000).unwrap();
        budget.allocate(Pool::Lob, 50_000).unwrap();

        let stats = budget.stats();
        assert_eq!(stats.batches_used, 100_000);
        assert_eq!(stats.lob_used, 50_000);
        assert_eq!(stats.total_used, 150_000);
        assert_eq!(stats.available(), LIMIT - 150_000);
        assert!(stats.to_string().contains("batches:100000"));
    }

    #[test]
    fn test_zero_allocation() {
        let budget = MemoryBudget::with_limit(LIMIT);
        assert!(budget.allocate(Pool::Batches, 0).is_ok());
        assert_eq!(budget.total_used(), 0);
    }
}
