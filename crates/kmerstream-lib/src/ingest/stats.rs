//! Per-round timing and the final ingest report

use std::time::{Duration, Instant};

use tracing::info;

/// Phases of one ingest round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Memory probe and window planning
    Estimate,
    /// Resizing the local table ahead of insertion
    Grow,
    /// Allocating the staging buffer
    Reserve,
    /// Reading and parsing the window's files
    Read,
    /// Global reductions over what was read
    Measure,
    /// Routing and counting the staged keys
    Insert,
}

impl Phase {
    const ALL: [Phase; 6] = [
        Phase::Estimate,
        Phase::Grow,
        Phase::Reserve,
        Phase::Read,
        Phase::Measure,
        Phase::Insert,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Phase::Estimate => "estimate",
            Phase::Grow => "grow",
            Phase::Reserve => "reserve",
            Phase::Read => "read",
            Phase::Measure => "measure",
            Phase::Insert => "insert",
        }
    }
}

/// Wall time accumulated per phase over all rounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundTimings {
    totals: [Duration; 6],
}

impl RoundTimings {
    /// Run `f` and charge its wall time to `phase`
    pub fn time<T>(&mut self, phase: Phase, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.add(phase, start.elapsed());
        out
    }

    /// Add `elapsed` to `phase`
    pub fn add(&mut self, phase: Phase, elapsed: Duration) {
        self.totals[phase.index()] += elapsed;
    }

    /// Time spent in `phase`
    pub fn get(&self, phase: Phase) -> Duration {
        self.totals[phase.index()]
    }

    /// Time spent in all phases
    pub fn total(&self) -> Duration {
        self.totals.iter().sum()
    }

    /// Log one line per phase
    pub fn report(&self) {
        for phase in Phase::ALL {
            info!("  {:<8} {:>10.3} s", phase.name(), self.get(phase).as_secs_f64());
        }
        info!("  {:<8} {:>10.3} s", "total", self.total().as_secs_f64());
    }
}

/// Outcome of a full ingest, identical on every rank unless noted
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    /// Rounds executed
    pub rounds: usize,
    /// Elements inserted over all ranks
    pub total_elements: u64,
    /// Distinct keys in the table over all ranks
    pub distinct: u64,
    /// Distinct keys held by this rank
    pub local_distinct: usize,
    /// Input bytes planned over all ranks
    pub total_file_bytes: u64,
    /// Final input bytes per element
    pub chars_per_element: f64,
    /// Final distinct keys per inserted element
    pub distinct_ratio: f64,
    /// Register estimate of the distinct count, merged over ranks
    pub estimated_distinct: f64,
    /// Read time averaged over ranks, in seconds
    pub mean_read_secs: f64,
    /// Phase timings on this rank
    pub timings: RoundTimings,
}

impl IngestReport {
    /// Log the report
    pub fn print(&self) {
        info!("Ingest Complete");
        info!("  rounds = {}", self.rounds);
        info!("  elements inserted = {}", self.total_elements);
        info!("  distinct keys = {}", self.distinct);
        info!("  estimated distinct = {:.0}", self.estimated_distinct);
        info!("  input bytes = {}", self.total_file_bytes);
        info!("  chars per element = {:.4}", self.chars_per_element);
        info!("  distinct ratio = {:.4}", self.distinct_ratio);
        info!("  mean read time over ranks = {:.3} s", self.mean_read_secs);
        info!("Round timings (rank 0):");
        self.timings.report();
    }
}
