//! Round loop: probe, plan, grow, read, measure, insert
//!
//! Every rank runs the same loop and reaches the same collectives in the same
//! order. The only values that decide control flow (window ends, round count)
//! come out of reductions, so no rank can take an extra round on its own.

use std::path::Path;

use tracing::{debug, info};

use super::config::IngestConfiguration;
use super::growth::GrowthController;
use super::planner::{plan_window, FileSizer, MemoryModel, PlannerState};
use super::stats::{IngestReport, Phase, RoundTimings};
use crate::comm::{Communicator, ReduceOp};
use crate::error::{agree, Result};
use crate::hasher::DeterministicHasher;
use crate::hyperloglog::HyperLogLog64;
use crate::kmer::KmerSpec;
use crate::memory::{free_mem_per_proc, FreeMemorySource};
use crate::reader::read_kmers;
use crate::table::{DistributedCountTable, LocalContainer};

/// Register estimator over staged k-mers
pub type KmerSketch = HyperLogLog64<u64, DeterministicHasher>;

/// Merge every rank's registers and estimate the global distinct count (collective)
pub fn global_estimate<C: Communicator>(comm: &C, sketch: &KmerSketch) -> Result<f64> {
    let mut merged = sketch.clone();
    for registers in comm.all_gather_bytes(sketch.registers()) {
        merged.merge_registers(&registers)?;
    }
    Ok(merged.estimate())
}

/// Memory-bounded streaming ingest into a distributed count table
pub struct StreamingIngest<'a, C> {
    config: &'a IngestConfiguration,
    comm: &'a C,
    spec: KmerSpec,
}

impl<'a, C: Communicator> StreamingIngest<'a, C> {
    /// Validate `config` and prepare an ingest on `comm`
    pub fn new(config: &'a IngestConfiguration, comm: &'a C) -> Result<Self> {
        config.validate()?;
        let spec = config.kmer_spec()?;
        Ok(Self { config, comm, spec })
    }

    /// Read every file in `files` into `table`, one memory-bounded window per round
    pub fn run<M, P>(
        &self,
        files: &[P],
        table: &mut DistributedCountTable<M>,
        memory: &mut dyn FreeMemorySource,
        sizer: &mut dyn FileSizer,
    ) -> Result<IngestReport>
    where
        M: LocalContainer,
        P: AsRef<Path>,
    {
        let comm = self.comm;
        let ranks = comm.size() as u64;
        let lead = comm.rank() == 0;

        if lead {
            info!("filename count {}", files.len());
            debug!("lower threshold {} is not applied", self.config.lower_threshold);
        }

        let mut state = PlannerState::new(self.config.initial_chars_per_element());
        let mut timings = RoundTimings::default();
        let mut sketch = KmerSketch::with_hasher(
            self.config.hll_precision,
            DeterministicHasher::new(!self.config.seed),
        )?;

        let mut next = 0;
        let mut rounds = 0;
        let mut kmer_total = 0u64;
        let mut file_total = 0u64;
        let mut global_elements = 0u64;
        let mut global_bytes = 0u64;
        let mut estimated_distinct = 0.0;

        while next < files.len() {
            let (budget, window) = timings.time(Phase::Estimate, || -> Result<_> {
                let budget =
                    free_mem_per_proc(comm, &mut *memory, self.config.global_reserve_bytes)?;
                let growth = GrowthController::from_container(table.local());
                let model = MemoryModel::for_container(table.local());
                let window =
                    plan_window(comm, &mut *sizer, files, next, &budget, &state, &model, growth)?;
                Ok((budget, window))
            })?;

            let delta_distinct = (state.distinct_ratio * window.element_estimate as f64) as u64;
            timings.time(Phase::Grow, || {
                let local = table.local_mut();
                let target = if local.grows_by_doubling() {
                    state.avg_distinct + delta_distinct
                } else {
                    local.len() as u64 + window.element_estimate
                };
                local.resize(target as usize);
            });
            if lead {
                info!(
                    "round {} files [{}, {}) stop {:?}: resized from {} to {} distinct, buckets {}",
                    rounds,
                    window.start,
                    window.end,
                    window.stop,
                    state.avg_distinct,
                    state.avg_distinct + delta_distinct,
                    table.local().bucket_count()
                );
            }

            let mut staged: Vec<u64> = timings.time(Phase::Reserve, || {
                Vec::with_capacity((window.file_bytes as f64 / state.chars_per_element) as usize)
            });

            let read = timings.time(Phase::Read, || -> Result<()> {
                for path in &files[window.start..window.end] {
                    read_kmers(path.as_ref(), self.config.reader, &self.spec, comm, &mut staged)?;
                }
                Ok(())
            });
            agree(comm, "read", files[window.start].as_ref(), read)?;
            next = window.end;

            let avg_inserted = timings.time(Phase::Measure, || -> Result<u64> {
                let local_elements = staged.len() as u64;
                kmer_total += local_elements;
                file_total += window.file_bytes;
                let avg_inserted = comm.all_reduce_u64(local_elements, ReduceOp::Sum) / ranks;
                global_elements = comm.all_reduce_u64(kmer_total, ReduceOp::Sum);
                global_bytes = comm.all_reduce_u64(file_total, ReduceOp::Sum);

                for key in &staged {
                    sketch.update(key);
                }
                estimated_distinct = global_estimate(comm, &sketch)?;
                Ok(avg_inserted)
            })?;

            timings.time(Phase::Insert, || {
                table.insert(&staged, comm);
            });
            drop(staged);

            let avg_before = state.avg_distinct;
            let ratio_before = state.distinct_ratio;
            timings.time(Phase::Measure, || {
                let avg_after = table.size(comm) / ranks;
                state.refine(global_bytes, global_elements, avg_after, avg_inserted);
            });
            rounds += 1;

            if lead {
                info!(
                    "SYSTEM STATS free_mem {} usable_mem {} mean free_mem {} mem_use_est {}",
                    budget.free_mem, budget.usable_mem, budget.mean_free_mem, window.mem_use_est
                );
                info!(
                    "FILE STAT chars_per_element {:.4} distinct_ratio {:.4} (was {:.4}) avg round file size {} total file size {}",
                    state.chars_per_element,
                    state.distinct_ratio,
                    ratio_before,
                    window.file_bytes,
                    global_bytes
                );
                info!(
                    "INSERT STATS element total {} rounds {} pre-insert estimate {} avg inserted {} prev distinct {} distinct {} estimated distinct {:.0} buckets {} after {}",
                    global_elements,
                    rounds,
                    window.element_estimate,
                    avg_inserted,
                    avg_before,
                    state.avg_distinct,
                    estimated_distinct,
                    window.growth.buckets(),
                    table.local().bucket_count()
                );
            }
        }

        let distinct = table.size(comm);
        let read_secs = timings.get(Phase::Read).as_secs_f64();
        let mean_read_secs = comm.all_reduce_f64_sum(read_secs) / ranks as f64;
        Ok(IngestReport {
            rounds,
            total_elements: global_elements,
            distinct,
            local_distinct: table.local_size(),
            total_file_bytes: global_bytes,
            chars_per_element: state.chars_per_element,
            distinct_ratio: state.distinct_ratio,
            estimated_distinct,
            mean_read_secs,
            timings,
        })
    }
}
