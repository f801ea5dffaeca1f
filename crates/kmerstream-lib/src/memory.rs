//! Per-rank memory budget
//!
//! Node-wide free memory is split evenly among the ranks on that node, then
//! reduced to the minimum over the whole run so that every rank plans against
//! the most constrained participant. Recomputed every round: the table grows
//! between rounds and so does the pressure on the node.

use sysinfo::System;
use tracing::info;

use crate::comm::{Communicator, ReduceOp};
use crate::error::ConfigError;

/// Source of node-wide free memory in bytes
pub trait FreeMemorySource {
    /// Free bytes on this node right now
    fn free_bytes(&mut self) -> u64;
}

/// Free memory as reported by the operating system
pub struct SystemMemory {
    system: System,
}

impl SystemMemory {
    /// Create a probe over the current machine
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeMemorySource for SystemMemory {
    fn free_bytes(&mut self) -> u64 {
        self.system.refresh_memory();
        self.system.free_memory()
    }
}

/// A fixed amount of free memory, for tests and dry runs
#[derive(Debug, Clone, Copy)]
pub struct FixedMemory(pub u64);

impl FreeMemorySource for FixedMemory {
    fn free_bytes(&mut self) -> u64 {
        self.0
    }
}

/// Memory available to each rank for the next round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBudget {
    /// Minimum over all ranks of node free memory / ranks on the node
    pub free_mem: u64,
    /// `free_mem` minus the slack reservation
    pub usable_mem: u64,
    /// Mean per-rank free memory over all ranks (diagnostic only)
    pub mean_free_mem: u64,
    /// Number of ranks sharing this rank's node
    pub local_procs: usize,
}

impl MemoryBudget {
    /// Build a budget from an already-reduced `free_mem`
    ///
    /// The slack is the smaller of `free_mem / 4` and this rank's share of
    /// the run-wide reservation.
    pub fn from_free(free_mem: u64, global_reserve: u64, size: usize) -> Self {
        let slack = (global_reserve / size.max(1) as u64).min(free_mem / 4);
        Self {
            free_mem,
            usable_mem: free_mem - slack,
            mean_free_mem: free_mem,
            local_procs: 1,
        }
    }
}

/// This rank's share of node memory, rejecting values that are not positive
fn per_proc_share(free_mem: u64, local_procs: usize) -> Result<u64, ConfigError> {
    if local_procs < 1 {
        return Err(ConfigError::NonPositiveProbe("number of local processes on same node"));
    }
    if free_mem < 1 {
        return Err(ConfigError::NonPositiveProbe("free memory on the node"));
    }
    match free_mem / local_procs as u64 {
        0 => Err(ConfigError::NonPositiveProbe("free memory per process")),
        share => Ok(share),
    }
}

/// Free memory per rank, reduced to the run-wide minimum (collective)
///
/// Fails on every rank if any rank sees no usable memory.
pub fn free_mem_per_proc<C, S>(
    comm: &C,
    source: &mut S,
    global_reserve: u64,
) -> Result<MemoryBudget, ConfigError>
where
    C: Communicator,
    S: FreeMemorySource + ?Sized,
{
    let free_mem = source.free_bytes();
    let local_procs = comm.split_shared().size();
    let local = per_proc_share(free_mem, local_procs);

    // every rank must leave together or the reductions below never complete
    let peer_failed = comm.any_of(local.is_err());
    let mem_per_p = match local {
        Ok(_) if peer_failed => {
            return Err(ConfigError::NonPositiveProbe("free memory on another rank"))
        }
        Ok(share) => share,
        Err(e) => return Err(e),
    };
    let mean = comm.all_reduce_u64(mem_per_p, ReduceOp::Sum) / comm.size() as u64;
    let min = comm.all_reduce_u64(mem_per_p, ReduceOp::Min);

    if comm.rank() == 0 {
        info!(
            "estimate available mem on node={} bytes, p={}, per proc min={} bytes, mean={} bytes",
            free_mem, local_procs, min, mean
        );
    }

    let mut budget = MemoryBudget::from_free(min, global_reserve, comm.size());
    budget.mean_free_mem = mean;
    budget.local_procs = local_procs;
    Ok(budget)
}
