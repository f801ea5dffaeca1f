//! Sequence file readers
//!
//! Every strategy parses FASTA or FASTQ (gzip is detected transparently) and
//! keeps the records whose ordinal is congruent to this rank modulo the number
//! of ranks, so each record is counted by exactly one rank. The strategies
//! differ only in how the bytes get into memory.

use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use memmap2::Mmap;
use needletail::parse_fastx_reader;
use tracing::{debug, info};

use crate::comm::Communicator;
use crate::error::{agree, ConfigError, IngestError, Result};
use crate::kmer::KmerSpec;

/// How input files are brought into memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderStrategy {
    /// Read the whole file into a buffer (id 2)
    FileLoader,
    /// Map the file read-only (id 5)
    Mmap,
    /// Stream through ordinary reads (id 7)
    Posix,
    /// Rank 0 reads the file and broadcasts its bytes (id 10)
    Collective,
}

impl ReaderStrategy {
    /// Numeric id used on the command line
    pub fn id(self) -> u32 {
        match self {
            ReaderStrategy::FileLoader => 2,
            ReaderStrategy::Mmap => 5,
            ReaderStrategy::Posix => 7,
            ReaderStrategy::Collective => 10,
        }
    }
}

impl TryFrom<u32> for ReaderStrategy {
    type Error = ConfigError;

    fn try_from(id: u32) -> std::result::Result<Self, Self::Error> {
        match id {
            2 => Ok(ReaderStrategy::FileLoader),
            5 => Ok(ReaderStrategy::Mmap),
            7 => Ok(ReaderStrategy::Posix),
            10 => Ok(ReaderStrategy::Collective),
            other => Err(ConfigError::UnknownReader(other)),
        }
    }
}

impl fmt::Display for ReaderStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReaderStrategy::FileLoader => "fileloader",
            ReaderStrategy::Mmap => "mmap",
            ReaderStrategy::Posix => "posix",
            ReaderStrategy::Collective => "collective",
        };
        write!(f, "{name}")
    }
}

/// What one call to [`read_kmers`] produced on this rank
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Records parsed in the whole file
    pub records_seen: u64,
    /// Records assigned to this rank
    pub records_kept: u64,
    /// K-mers appended to the staging buffer
    pub kmers: u64,
}

/// Call `f` with every sequence this rank is responsible for
///
/// Collective only for [`ReaderStrategy::Collective`]; the other strategies
/// touch no communicator state and may be called with [`crate::comm::SelfComm`].
pub fn for_each_sequence<C, F>(
    path: &Path,
    strategy: ReaderStrategy,
    comm: &C,
    mut f: F,
) -> Result<ReadStats>
where
    C: Communicator,
    F: FnMut(&[u8]),
{
    let source = open_source(path, strategy, comm)?;
    let mut stats = ReadStats::default();
    let Some(source) = source else {
        return Ok(stats);
    };

    let mut reader = parse_fastx_reader(source).map_err(|e| IngestError::Parse {
        file: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let (rank, size) = (comm.rank() as u64, comm.size() as u64);
    while let Some(record) = reader.next() {
        let record = record.map_err(|e| IngestError::Parse {
            file: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let ordinal = stats.records_seen;
        stats.records_seen += 1;
        if ordinal % size != rank {
            continue;
        }
        stats.records_kept += 1;
        f(&record.seq());
    }
    Ok(stats)
}

/// Append the k-mers of this rank's share of `path` to `out`
pub fn read_kmers<C: Communicator>(
    path: &Path,
    strategy: ReaderStrategy,
    spec: &KmerSpec,
    comm: &C,
    out: &mut Vec<u64>,
) -> Result<ReadStats> {
    if comm.rank() == 0 {
        info!("reading {} via {}", path.display(), strategy);
    }
    let before = out.len();
    let mut stats = for_each_sequence(path, strategy, comm, |seq| out.extend(spec.kmers(seq)))?;
    stats.kmers = (out.len() - before) as u64;
    debug!(
        "rank {} kept {}/{} records, {} k-mers from {}",
        comm.rank(),
        stats.records_kept,
        stats.records_seen,
        stats.kmers,
        path.display()
    );
    Ok(stats)
}

type Source = Box<dyn Read + Send>;

/// Bytes of `path` as a reader, or `None` for an empty file
fn open_source<C: Communicator>(
    path: &Path,
    strategy: ReaderStrategy,
    comm: &C,
) -> Result<Option<Source>> {
    match strategy {
        ReaderStrategy::FileLoader => {
            let bytes = std::fs::read(path).map_err(|e| IngestError::io("read", path, e))?;
            Ok(non_empty(bytes))
        }
        ReaderStrategy::Mmap => {
            let file = File::open(path).map_err(|e| IngestError::io("open", path, e))?;
            let len = file
                .metadata()
                .map_err(|e| IngestError::io("stat", path, e))?
                .len();
            if len == 0 {
                return Ok(None);
            }
            // SAFETY: the input is not modified while the run reads it
            let map = unsafe { Mmap::map(&file) }.map_err(|e| IngestError::io("mmap", path, e))?;
            Ok(Some(Box::new(Cursor::new(map))))
        }
        ReaderStrategy::Posix => {
            let file = File::open(path).map_err(|e| IngestError::io("open", path, e))?;
            let len = file
                .metadata()
                .map_err(|e| IngestError::io("stat", path, e))?
                .len();
            if len == 0 {
                return Ok(None);
            }
            Ok(Some(Box::new(file)))
        }
        ReaderStrategy::Collective => {
            let loaded = if comm.rank() == 0 {
                std::fs::read(path).map_err(|e| IngestError::io("read", path, e))
            } else {
                Ok(Vec::new())
            };
            let local = agree(comm, "read", path, loaded)?;
            Ok(non_empty(comm.broadcast_bytes(local, 0)))
        }
    }
}

fn non_empty(bytes: Vec<u8>) -> Option<Source> {
    if bytes.is_empty() {
        None
    } else {
        Some(Box::new(Cursor::new(bytes)))
    }
}
