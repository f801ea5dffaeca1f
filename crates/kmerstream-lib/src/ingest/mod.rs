//! Memory-bounded streaming ingest
//!
//! Input files are consumed in windows. Each round re-probes free memory,
//! plans the largest window whose projected cost fits, grows the table ahead of
//! time, reads the window, inserts it, and refines the bytes-per-element and
//! distinct-ratio estimates used to plan the next round.

pub mod config;
pub mod driver;
pub mod growth;
pub mod planner;
pub mod stats;

pub use config::IngestConfiguration;
pub use driver::{global_estimate, KmerSketch, StreamingIngest};
pub use growth::GrowthController;
pub use planner::{
    file_share, plan_window, FileSizer, FsFileSizer, MemoryModel, PlannerState, StopReason,
    Window,
};
pub use stats::{IngestReport, Phase, RoundTimings};
