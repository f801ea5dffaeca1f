// kmerstream: memory-bounded distributed k-mer counting
//
// Streams sequence files into a sharded count table in rounds sized to the
// free memory of every rank, then writes the table with one of several
// parallel output strategies.

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod comm;
pub mod constants;
pub mod encoding;
pub mod error;
pub mod hasher;
pub mod hyperloglog;
pub mod ingest;
pub mod kmer;
pub mod memory;
pub mod output;
pub mod reader;
pub mod record;
pub mod table;

// Re-export common types at crate root
pub use comm::{run_ranks, Communicator, ReduceOp, SelfComm, ThreadComm};
pub use error::{ConfigError, IngestError, Result};
pub use hyperloglog::HyperLogLog64;
pub use ingest::{IngestConfiguration, IngestReport, StreamingIngest};
pub use kmer::KmerSpec;
pub use memory::{FreeMemorySource, SystemMemory};
pub use output::{write_blob, write_table, OutputConfig, WriteStrategy};
pub use reader::ReaderStrategy;
pub use record::CountRecord;
pub use table::{DistributedCountTable, HashCounter, LocalContainer, SortedCounter, TableKind};

/// Version information
pub fn version() -> (u8, u8, u8) {
    constants::VERSION
}
