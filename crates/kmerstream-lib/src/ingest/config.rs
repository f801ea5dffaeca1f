//! Run configuration for streaming k-mer counting
//!
//! One value shared by every rank. The binary builds it from the command line;
//! tests build it with struct update syntax over `Default`.

use std::path::PathBuf;

use crate::constants::{
    DEFAULT_BLOCK_SIZE, DEFAULT_CHUNK_BYTES, DEFAULT_GLOBAL_RESERVE_BYTES, DEFAULT_HLL_PRECISION,
    DEFAULT_SEED,
};
use crate::error::ConfigError;
use crate::hyperloglog::{MAX_PRECISION, MIN_PRECISION};
use crate::kmer::KmerSpec;
use crate::output::{OutputConfig, WriteStrategy};
use crate::reader::ReaderStrategy;
use crate::table::TableKind;

/// Configuration parameters for one ingest-then-write run
#[derive(Debug, Clone)]
pub struct IngestConfiguration {
    /// K-mer length (1 to 32)
    pub k: usize,

    /// Count a k-mer and its reverse complement as the same key
    pub canonical: bool,

    /// Inputs are FASTQ (about twice the bytes per k-mer of FASTA)
    pub fastq: bool,

    /// How input files are read
    pub reader: ReaderStrategy,

    /// How the table is written out
    pub writer: WriteStrategy,

    /// Local container behind the distributed table
    pub table: TableKind,

    /// Output file, or base name for per-rank output files
    pub output: PathBuf,

    /// Lower bound on counts to keep. Parsed and reported; no filtering is applied.
    pub lower_threshold: u32,

    /// Seed for key ownership and the register estimator
    pub seed: u64,

    /// Register estimator precision
    pub hll_precision: u8,

    /// Memory held back from planning, summed over the whole run
    pub global_reserve_bytes: u64,

    /// Device block size for direct I/O
    pub block_size: usize,

    /// Largest single write call
    pub chunk_bytes: usize,

    /// Open direct-I/O outputs with `O_DIRECT`
    pub open_direct: bool,

    /// Ranks in the run
    pub num_ranks: usize,

    /// Ranks sharing one node
    pub ranks_per_node: usize,
}

impl Default for IngestConfiguration {
    fn default() -> Self {
        Self {
            k: 31,
            canonical: false,
            fastq: false,
            reader: ReaderStrategy::Posix,
            writer: WriteStrategy::Disabled,
            table: TableKind::Hash,
            output: PathBuf::from("./counts.bin"),
            lower_threshold: 0,
            seed: DEFAULT_SEED,
            hll_precision: DEFAULT_HLL_PRECISION,
            global_reserve_bytes: DEFAULT_GLOBAL_RESERVE_BYTES,
            block_size: DEFAULT_BLOCK_SIZE,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            open_direct: true,
            num_ranks: 1,
            ranks_per_node: 1,
        }
    }
}

impl IngestConfiguration {
    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.kmer_spec()?;

        if !(MIN_PRECISION..=MAX_PRECISION).contains(&self.hll_precision) {
            return Err(ConfigError::InvalidPrecision {
                precision: self.hll_precision,
                max: MAX_PRECISION,
            });
        }
        if self.num_ranks == 0 {
            return Err(ConfigError::InvalidTopology(
                "at least one rank is required".into(),
            ));
        }
        if self.ranks_per_node == 0 {
            return Err(ConfigError::InvalidTopology(
                "ranks per node must be positive".into(),
            ));
        }

        self.output_config().validate()
    }

    /// Shape of the k-mers to count
    pub fn kmer_spec(&self) -> Result<KmerSpec, ConfigError> {
        KmerSpec::new(self.k, self.canonical).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Input bytes per k-mer assumed before anything has been read
    pub fn initial_chars_per_element(&self) -> f64 {
        let mut chars = 1.0;
        if self.fastq {
            chars *= 2.0;
        }
        if self.canonical {
            chars *= 2.0;
        }
        chars
    }

    /// Settings for the output engine
    pub fn output_config(&self) -> OutputConfig {
        OutputConfig {
            base_name: self.output.clone(),
            strategy: self.writer,
            block_size: self.block_size,
            chunk_bytes: self.chunk_bytes,
            open_direct: self.open_direct,
        }
    }

    /// Log configuration parameters via tracing
    pub fn print(&self) {
        tracing::info!("Ingest Configuration:");
        tracing::info!("  k = {}", self.k);
        tracing::info!("  canonical = {}", self.canonical);
        tracing::debug!("  fastq = {}", self.fastq);
        tracing::info!("  reader = {} ({})", self.reader, self.reader.id());
        tracing::info!("  writer = {} ({})", self.writer, self.writer.id());
        tracing::info!("  table = {}", self.table);
        tracing::info!("  output = {:?}", self.output);
        tracing::info!("  lower_threshold = {} (not applied)", self.lower_threshold);
        tracing::debug!("  seed = {}", self.seed);
        tracing::debug!("  hll_precision = {}", self.hll_precision);
        tracing::debug!("  global_reserve_bytes = {}", self.global_reserve_bytes);
        tracing::debug!("  block_size = {}", self.block_size);
        tracing::debug!("  chunk_bytes = {}", self.chunk_bytes);
        tracing::debug!("  open_direct = {}", self.open_direct);
        tracing::info!(
            "  ranks = {} ({} per node)",
            self.num_ranks,
            self.ranks_per_node
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IngestConfiguration::default();
        assert_eq!(config.k, 31);
        assert_eq!(config.reader, ReaderStrategy::Posix);
        assert_eq!(config.writer, WriteStrategy::Disabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_k_out_of_range() {
        let config = IngestConfiguration { k: 33, ..IngestConfiguration::default() };
        assert!(config.validate().is_err());

        let config = IngestConfiguration { k: 0, ..IngestConfiguration::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_precision() {
        let config = IngestConfiguration { hll_precision: 3, ..IngestConfiguration::default() };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidPrecision { precision: 3, max: 16 })
        );
    }

    #[test]
    fn test_validate_block_size() {
        let config = IngestConfiguration { block_size: 500, ..IngestConfiguration::default() };
        assert_eq!(config.validate(), Err(ConfigError::InvalidBlockSize(500)));
    }

    #[test]
    fn test_validate_empty_output() {
        let config = IngestConfiguration {
            output: PathBuf::new(),
            ..IngestConfiguration::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptyFileName(_))));
    }

    #[test]
    fn test_validate_topology() {
        let config = IngestConfiguration { num_ranks: 0, ..IngestConfiguration::default() };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTopology(_))));
    }

    #[test]
    fn test_initial_chars_per_element() {
        let base = IngestConfiguration::default();
        assert_eq!(base.initial_chars_per_element(), 1.0);
        let fastq = IngestConfiguration { fastq: true, ..base.clone() };
        assert_eq!(fastq.initial_chars_per_element(), 2.0);
        let both = IngestConfiguration { fastq: true, canonical: true, ..base };
        assert_eq!(both.initial_chars_per_element(), 4.0);
    }
}
