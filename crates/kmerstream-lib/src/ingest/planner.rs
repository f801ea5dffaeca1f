//! Batch planner
//!
//! Picks the next window of input files `[start, end)` whose projected memory
//! use stays within this round's budget. Per candidate file the estimate adds
//!
//! ```text
//! elements  = ceil(file_bytes / ranks) / chars_per_element
//! mem_use  += elements * STAGING_FACTOR * staged_bytes + ceil(file_bytes / ranks) * IO_FACTOR
//! ```
//!
//! plus the projected table cost: the doubled table for hash containers once
//! growth is projected, or the merged array for sorted containers.
//!
//! Both stop conditions are reduced with `any_of` before anyone acts on them,
//! so all ranks end the window at the same file:
//! - `mem_use > free_mem` on any rank: stop before the file (hard stop);
//! - `mem_use > usable_mem` on any rank: stop after the file (soft stop).

use std::io;
use std::path::Path;

use tracing::debug;

use super::growth::GrowthController;
use crate::comm::Communicator;
use crate::constants::{IO_FACTOR, STAGING_FACTOR};
use crate::error::{agree, ConfigError, IngestError, Result};
use crate::memory::MemoryBudget;
use crate::table::LocalContainer;

/// Looks up input file sizes; only rank 0 is asked
pub trait FileSizer {
    /// Size of `path` in bytes
    fn file_bytes(&mut self, path: &Path) -> io::Result<u64>;
}

/// File sizes from the filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsFileSizer;

impl FileSizer for FsFileSizer {
    fn file_bytes(&mut self, path: &Path) -> io::Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }
}

/// Each rank's share of a file: rank 0's `ceil(size / ranks)`, broadcast
pub fn file_share<C, S>(comm: &C, sizer: &mut S, path: &Path) -> Result<u64>
where
    C: Communicator,
    S: FileSizer + ?Sized,
{
    let local = if comm.rank() == 0 {
        sizer
            .file_bytes(path)
            .map_err(|e| IngestError::io("stat", path, e))
    } else {
        Ok(0)
    };
    let size = agree(comm, "stat", path, local)?;
    let share = size.div_ceil(comm.size() as u64);
    Ok(comm.broadcast_u64(share, 0))
}

/// Sizes that turn element counts into bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryModel {
    /// Bytes per staged element
    pub staged_bytes: u64,
    /// Bytes per table slot
    pub entry_bytes: u64,
    /// Entries already in the local table
    pub local_entries: u64,
}

impl MemoryModel {
    /// Model for `table` holding keys staged as `u64`
    pub fn for_container<M: LocalContainer + ?Sized>(table: &M) -> Self {
        Self {
            staged_bytes: std::mem::size_of::<u64>() as u64,
            entry_bytes: table.entry_bytes() as u64,
            local_entries: table.len() as u64,
        }
    }

    /// Bytes for staging `elements` elements read from `share` bytes of input
    pub fn file_cost(&self, elements: u64, share: u64) -> u64 {
        elements
            .saturating_mul(STAGING_FACTOR * self.staged_bytes)
            .saturating_add(share.saturating_mul(IO_FACTOR))
    }

    /// Bytes for the table after `delta_distinct` new keys
    pub fn table_cost(&self, growth: &GrowthController, delta_distinct: u64) -> u64 {
        if growth.doubles() {
            growth.growth_cost(self.entry_bytes)
        } else {
            (self.local_entries + delta_distinct).saturating_mul(self.entry_bytes)
        }
    }
}

/// Quantities carried from one round to the next
///
/// All three derive from global reductions, so they are identical on every rank.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannerState {
    /// Input bytes per extracted element
    pub chars_per_element: f64,
    /// New distinct keys per inserted element in the last round
    pub distinct_ratio: f64,
    /// Global distinct keys divided by the number of ranks
    pub avg_distinct: u64,
}

impl PlannerState {
    /// State before the first round
    pub fn new(chars_per_element: f64) -> Self {
        Self {
            chars_per_element,
            distinct_ratio: 1.0,
            avg_distinct: 0,
        }
    }

    /// Replace the estimates with what the last round measured
    ///
    /// `global_bytes` and `global_elements` are run-wide cumulative totals;
    /// `avg_distinct_after` and `avg_inserted` are per-rank averages. A round
    /// that inserted nothing leaves the estimates unchanged.
    pub fn refine(
        &mut self,
        global_bytes: u64,
        global_elements: u64,
        avg_distinct_after: u64,
        avg_inserted: u64,
    ) {
        if global_elements > 0 {
            self.chars_per_element = global_bytes as f64 / global_elements as f64;
        }
        if avg_inserted > 0 {
            let delta = avg_distinct_after.saturating_sub(self.avg_distinct);
            self.distinct_ratio = delta as f64 / avg_inserted as f64;
        }
        self.avg_distinct = avg_distinct_after;
    }
}

/// Why a window ended where it did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No input files left
    Exhausted,
    /// The next file would not fit in free memory on some rank
    Hard,
    /// The last file pushed some rank past its usable memory
    Soft,
}

/// Files to read in one round and what they are expected to cost
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    /// First file index
    pub start: usize,
    /// One past the last file index
    pub end: usize,
    /// Projected memory use on this rank
    pub mem_use_est: u64,
    /// Projected elements on this rank
    pub element_estimate: u64,
    /// Sum of this rank's file shares
    pub file_bytes: u64,
    /// Projected new distinct keys on this rank
    pub delta_distinct: u64,
    /// Projected table capacity after the window
    pub growth: GrowthController,
    /// Why the window stopped
    pub stop: StopReason,
}

impl Window {
    /// Number of files in the window
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// True if the window holds no file
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Plan the window starting at `start` (collective)
///
/// Fails with [`ConfigError::InsufficientMemory`] on every rank if the first
/// candidate alone does not fit in free memory on some rank.
#[allow(clippy::too_many_arguments)]
pub fn plan_window<C, S, P>(
    comm: &C,
    sizer: &mut S,
    files: &[P],
    start: usize,
    budget: &MemoryBudget,
    state: &PlannerState,
    model: &MemoryModel,
    growth: GrowthController,
) -> Result<Window>
where
    C: Communicator,
    S: FileSizer + ?Sized,
    P: AsRef<Path>,
{
    let mut window = Window {
        start,
        end: start,
        mem_use_est: 0,
        element_estimate: 0,
        file_bytes: 0,
        delta_distinct: 0,
        growth,
        stop: StopReason::Exhausted,
    };
    let mut files_mem = 0u64;

    while window.end < files.len() {
        let path = files[window.end].as_ref();
        let share = file_share(comm, sizer, path)?;
        let elements = (share as f64 / state.chars_per_element) as u64;

        let candidate_files_mem = files_mem.saturating_add(model.file_cost(elements, share));
        let delta = window.delta_distinct + (state.distinct_ratio * elements as f64) as u64;
        let mut growth = window.growth;
        growth.project(state.avg_distinct + delta);
        let mem_use = candidate_files_mem.saturating_add(model.table_cost(&growth, delta));

        if comm.rank() == 0 {
            debug!(
                "SYSTEM STATS free_mem {} usable_mem {} mem_use_est {}",
                budget.free_mem, budget.usable_mem, mem_use
            );
            debug!(
                "FILE STAT file_size {} elements_est {} delta_distinct {} avg_distinct {} max_load {} buckets {}",
                share,
                elements,
                delta,
                state.avg_distinct,
                growth.max_load(),
                growth.buckets()
            );
        }

        let too_much = mem_use > budget.free_mem;
        let iter_done = mem_use > budget.usable_mem;

        if comm.any_of(too_much) {
            window.stop = StopReason::Hard;
            if window.is_empty() {
                return Err(ConfigError::InsufficientMemory {
                    file: path.display().to_string(),
                    needed: mem_use,
                    free_mem: budget.free_mem,
                }
                .into());
            }
            break;
        }

        files_mem = candidate_files_mem;
        window.end += 1;
        window.mem_use_est = mem_use;
        window.element_estimate += elements;
        window.file_bytes += share;
        window.delta_distinct = delta;
        window.growth = growth;

        if comm.any_of(iter_done) {
            window.stop = StopReason::Soft;
            break;
        }
    }

    Ok(window)
}
