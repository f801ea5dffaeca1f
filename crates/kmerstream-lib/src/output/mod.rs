//! Parallel output engine
//!
//! Flattens each rank's share of the table into fixed-stride records and writes
//! it with one of several strategies. Per-rank strategies write `base_name`
//! followed by the rank number; the mapped and collective strategies write one
//! shared file at `base_name` with rank-ordered offsets.
//!
//! | id | strategy |
//! |----|----------|
//! | 0  | disabled |
//! | 2  | memory-mapped, copies serialized per node |
//! | 3  | memory-mapped |
//! | 5  | buffered, serialized per node |
//! | 6  | buffered |
//! | 7  | direct, serialized per node |
//! | 8  | direct |
//! | 10 | collective positioned writes |

use std::borrow::Cow;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::comm::{Communicator, ReduceOp};
use crate::constants::{DEFAULT_BLOCK_SIZE, DEFAULT_CHUNK_BYTES};
use crate::error::{agree, ConfigError, Result};
use crate::record::RecordWriter;
use crate::table::{DistributedCountTable, LocalContainer};

pub mod aligned;
mod collective;
pub mod mmap;
mod posix;

pub use aligned::AlignedBuffer;

/// How the table is written out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    /// No output
    Disabled,
    /// Shared file through memory maps
    Mmap {
        /// Copy into the map one node-local rank at a time
        serialized: bool,
    },
    /// Per-rank files through the page cache
    Posix {
        /// Write one node-local rank at a time
        serialized: bool,
    },
    /// Per-rank files in whole device blocks
    Direct {
        /// Write one node-local rank at a time
        serialized: bool,
    },
    /// Shared file through lock-step positioned writes
    Collective,
}

impl WriteStrategy {
    /// Numeric id used on the command line
    pub fn id(self) -> u32 {
        match self {
            WriteStrategy::Disabled => 0,
            WriteStrategy::Mmap { serialized: true } => 2,
            WriteStrategy::Mmap { serialized: false } => 3,
            WriteStrategy::Posix { serialized: true } => 5,
            WriteStrategy::Posix { serialized: false } => 6,
            WriteStrategy::Direct { serialized: true } => 7,
            WriteStrategy::Direct { serialized: false } => 8,
            WriteStrategy::Collective => 10,
        }
    }

    /// True if all ranks write into one file
    pub fn shared_file(self) -> bool {
        matches!(self, WriteStrategy::Mmap { .. } | WriteStrategy::Collective)
    }
}

impl TryFrom<u32> for WriteStrategy {
    type Error = ConfigError;

    fn try_from(id: u32) -> std::result::Result<Self, Self::Error> {
        Ok(match id {
            0 => WriteStrategy::Disabled,
            2 => WriteStrategy::Mmap { serialized: true },
            3 => WriteStrategy::Mmap { serialized: false },
            5 => WriteStrategy::Posix { serialized: true },
            6 => WriteStrategy::Posix { serialized: false },
            7 => WriteStrategy::Direct { serialized: true },
            8 => WriteStrategy::Direct { serialized: false },
            10 => WriteStrategy::Collective,
            other => return Err(ConfigError::UnknownWriter(other)),
        })
    }
}

impl fmt::Display for WriteStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteStrategy::Disabled => "disabled",
            WriteStrategy::Mmap { serialized: true } => "mmap-node-serialized",
            WriteStrategy::Mmap { serialized: false } => "mmap",
            WriteStrategy::Posix { serialized: true } => "posix-node-serialized",
            WriteStrategy::Posix { serialized: false } => "posix",
            WriteStrategy::Direct { serialized: true } => "direct-node-serialized",
            WriteStrategy::Direct { serialized: false } => "direct",
            WriteStrategy::Collective => "collective",
        };
        f.write_str(name)
    }
}

/// Output engine settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    /// Shared output file, or base name of per-rank files
    pub base_name: PathBuf,
    /// Write strategy
    pub strategy: WriteStrategy,
    /// Device block size for direct writes (power of two)
    pub block_size: usize,
    /// Largest single write call
    pub chunk_bytes: usize,
    /// Open direct outputs with `O_DIRECT`
    pub open_direct: bool,
}

impl OutputConfig {
    /// Settings with default block and chunk sizes
    pub fn new(base_name: impl Into<PathBuf>, strategy: WriteStrategy) -> Self {
        Self {
            base_name: base_name.into(),
            strategy,
            block_size: DEFAULT_BLOCK_SIZE,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            open_direct: true,
        }
    }

    /// Reject settings no strategy can run with
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.base_name.as_os_str().is_empty() {
            return Err(ConfigError::EmptyFileName("output"));
        }
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(ConfigError::InvalidBlockSize(self.block_size));
        }
        if self.chunk_bytes == 0 {
            return Err(ConfigError::InvalidChunkSize(self.chunk_bytes));
        }
        Ok(())
    }

    /// File written by `rank`
    pub fn target_path(&self, rank: usize) -> PathBuf {
        if self.strategy.shared_file() {
            self.base_name.clone()
        } else {
            rank_path(&self.base_name, rank)
        }
    }
}

/// `base` with the rank number appended, e.g. `counts.bin3`
pub fn rank_path(base: &Path, rank: usize) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(rank.to_string());
    PathBuf::from(name)
}

/// Run `f` on one node-local rank at a time (collective over `comm`)
///
/// Every rank takes as many turns as the largest node has ranks, with a world
/// barrier after each, so nodes of different sizes stay in step. A failure in
/// `f` is held until the loop ends.
pub(crate) fn node_turns<C: Communicator>(
    comm: &C,
    f: &mut dyn FnMut() -> Result<u64>,
) -> Result<u64> {
    let node = comm.split_shared();
    let turns = comm.all_reduce_u64(node.size() as u64, ReduceOp::Max);
    let mut outcome = Ok(0);
    for turn in 0..turns as usize {
        if turn == node.rank() {
            outcome = f();
        }
        comm.barrier();
    }
    outcome
}

/// Serialize `local` into the fixed-stride record layout
///
/// Array-backed containers are borrowed as-is; others are walked into a new
/// buffer.
pub fn flatten<M: LocalContainer + ?Sized>(local: &M) -> Result<Cow<'_, [u8]>> {
    if let Some(bytes) = local.contiguous_bytes() {
        return Ok(Cow::Borrowed(bytes));
    }
    let mut writer = RecordWriter::with_records(local.len());
    let mut pushed = Ok(());
    local.for_each_entry(&mut |key, count| {
        if pushed.is_ok() {
            pushed = writer.push(key, count);
        }
    });
    pushed?;
    Ok(Cow::Owned(writer.finish()?))
}

/// Write this rank's `blob` with the configured strategy (collective)
///
/// Returns the bytes this rank wrote. Fails on every rank if any rank fails.
pub fn write_blob<C: Communicator>(blob: &[u8], comm: &C, config: &OutputConfig) -> Result<u64> {
    config.validate()?;
    let path = config.target_path(comm.rank());
    let total = comm.all_reduce_u64(blob.len() as u64, ReduceOp::Sum);
    if comm.rank() == 0 {
        match config.strategy {
            WriteStrategy::Disabled => info!("WRITE DISABLED."),
            strategy => info!(
                "writing {} bytes via {} ({}) to {}",
                total,
                strategy,
                strategy.id(),
                config.base_name.display()
            ),
        }
    }

    let chunk = config.chunk_bytes;
    let written = match config.strategy {
        WriteStrategy::Disabled => return Ok(0),
        WriteStrategy::Mmap { serialized } => return mmap::write_mapped(&path, blob, comm, serialized),
        WriteStrategy::Collective => return collective::write_collective(&path, blob, comm, chunk),
        WriteStrategy::Posix { serialized } => {
            let mut write = || posix::write_buffered(&path, blob, chunk);
            if serialized {
                node_turns(comm, &mut write)
            } else {
                write()
            }
        }
        WriteStrategy::Direct { serialized } => {
            let mut write = || {
                posix::write_direct(&path, blob, config.block_size, chunk, config.open_direct)
            };
            if serialized {
                node_turns(comm, &mut write)
            } else {
                write()
            }
        }
    };
    let written = agree(comm, "write", &path, written)?;
    debug!("rank {} wrote {} bytes to {}", comm.rank(), written, path.display());
    Ok(written)
}

/// Flatten this rank's share of `table` and write it (collective)
pub fn write_table<C, M>(table: &DistributedCountTable<M>, comm: &C, config: &OutputConfig) -> Result<u64>
where
    C: Communicator,
    M: LocalContainer,
{
    if config.strategy == WriteStrategy::Disabled {
        return write_blob(&[], comm, config);
    }
    let blob = flatten(table.local())?;
    write_blob(&blob, comm, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SelfComm;
    use crate::record::{decode_records, CountRecord};
    use crate::table::{HashCounter, SortedCounter};
    use tempfile::tempdir;

    const ALL_IDS: [u32; 8] = [0, 2, 3, 5, 6, 7, 8, 10];

    #[test]
    fn test_strategy_ids_round_trip() {
        for id in ALL_IDS {
            assert_eq!(WriteStrategy::try_from(id).unwrap().id(), id);
        }
        assert_eq!(WriteStrategy::try_from(4), Err(ConfigError::UnknownWriter(4)));
    }

    #[test]
    fn test_rank_path_appends_digits() {
        assert_eq!(rank_path(Path::new("out/counts.bin"), 3), PathBuf::from("out/counts.bin3"));
        let cfg = OutputConfig::new("x.bin", WriteStrategy::Collective);
        assert_eq!(cfg.target_path(5), PathBuf::from("x.bin"));
        let cfg = OutputConfig::new("x.bin", WriteStrategy::Direct { serialized: false });
        assert_eq!(cfg.target_path(12), PathBuf::from("x.bin12"));
    }

    #[test]
    fn test_validate() {
        let mut cfg = OutputConfig::new("", WriteStrategy::Collective);
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyFileName("output")));
        cfg.base_name = "a".into();
        cfg.block_size = 500;
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidBlockSize(500)));
        cfg.block_size = 4096;
        cfg.chunk_bytes = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidChunkSize(0)));
        cfg.chunk_bytes = 1;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_flatten_hash_and_sorted_agree() {
        let keys = [5u64, 9, 5, 1, 9, 5];
        let mut hash = HashCounter::new(1);
        hash.count_all(&keys);
        let mut sorted = SortedCounter::default();
        sorted.count_all(&keys);

        let mut from_hash = decode_records(&flatten(&hash).unwrap()).unwrap();
        from_hash.sort_by_key(|r| r.key);
        let from_sorted = decode_records(&flatten(&sorted).unwrap()).unwrap();
        let expected = vec![CountRecord::new(1, 1), CountRecord::new(5, 3), CountRecord::new(9, 2)];
        assert_eq!(from_hash, expected);
        assert_eq!(from_sorted, expected);
        assert!(matches!(flatten(&sorted).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_disabled_writes_nothing() {
        let dir = tempdir().unwrap();
        let cfg = OutputConfig::new(dir.path().join("none.bin"), WriteStrategy::Disabled);
        assert_eq!(write_blob(b"abc", &SelfComm, &cfg).unwrap(), 0);
        assert!(!dir.path().join("none.bin").exists());
        assert!(!dir.path().join("none.bin0").exists());
    }

    #[test]
    fn test_every_strategy_single_rank() {
        let dir = tempdir().unwrap();
        let blob: Vec<u8> = (0..777u32).map(|i| (i % 256) as u8).collect();
        for id in ALL_IDS.into_iter().filter(|&id| id != 0) {
            let strategy = WriteStrategy::try_from(id).unwrap();
            let cfg = OutputConfig {
                chunk_bytes: 100,
                open_direct: false,
                ..OutputConfig::new(dir.path().join(format!("w{id}.bin")), strategy)
            };
            assert_eq!(write_blob(&blob, &SelfComm, &cfg).unwrap(), 777);
            let written = std::fs::read(cfg.target_path(0)).unwrap();
            assert_eq!(written, blob, "strategy {strategy}");
        }
    }
}
