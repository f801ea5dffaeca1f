//! Speculative table growth
//!
//! While a window is being planned the table is not touched. Instead the
//! controller doubles a hypothetical bucket count each time the projected
//! number of distinct keys would cross the current max-load threshold, so the
//! memory estimate already pays for the resize that insertion will trigger.
//! The projection is driven only by globally reduced quantities, so every rank
//! takes the same trajectory for the same table state.

use crate::table::LocalContainer;

/// Hypothetical capacity of the local table during planning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowthController {
    orig_buckets: u64,
    buckets: u64,
    max_load: u64,
    load_factor: f64,
    doubling: bool,
}

impl GrowthController {
    /// Start from the container's current capacity
    pub fn from_container<M: LocalContainer + ?Sized>(local: &M) -> Self {
        let buckets = local.bucket_count() as u64;
        let doubling = local.grows_by_doubling();
        let load_factor = if doubling { local.max_load_factor() } else { 1.0 };
        Self::new(buckets, load_factor, doubling)
    }

    /// Start from an explicit bucket count
    pub fn new(buckets: u64, load_factor: f64, doubling: bool) -> Self {
        Self {
            orig_buckets: buckets,
            buckets,
            max_load: (load_factor * buckets as f64) as u64,
            load_factor,
            doubling,
        }
    }

    /// Double buckets and max load until `projected_distinct` stays below max load
    ///
    /// An empty table is treated as having one bucket. Containers that do not
    /// grow by doubling are left unchanged.
    pub fn project(&mut self, projected_distinct: u64) {
        if !self.doubling {
            return;
        }
        if self.max_load == 0 {
            self.buckets = self.buckets.max(1);
            self.max_load = ((self.load_factor * self.buckets as f64) as u64).max(1);
        }
        while projected_distinct >= self.max_load && self.max_load < u64::MAX {
            self.max_load = self.max_load.saturating_mul(2);
            self.buckets = self.buckets.saturating_mul(2);
        }
    }

    /// True once the projection exceeds the starting capacity
    pub fn grew(&self) -> bool {
        self.buckets > self.orig_buckets
    }

    /// Bytes of the resized table, or zero if no resize is projected
    pub fn growth_cost(&self, entry_bytes: u64) -> u64 {
        if self.grew() {
            self.buckets.saturating_mul(entry_bytes)
        } else {
            0
        }
    }

    /// True if the container grows by doubling
    pub fn doubles(&self) -> bool {
        self.doubling
    }

    /// Projected bucket count
    pub fn buckets(&self) -> u64 {
        self.buckets
    }

    /// Bucket count the projection started from
    pub fn orig_buckets(&self) -> u64 {
        self.orig_buckets
    }

    /// Projected max-load threshold
    pub fn max_load(&self) -> u64 {
        self.max_load
    }
}
