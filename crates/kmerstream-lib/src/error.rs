//! Error types
//!
//! Nothing in the library recovers from these locally. A rank that sees one
//! returns it up to the binary, which logs it and terminates the run.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::comm::Communicator;

/// Invalid configuration or environment, detected at the point of use
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Register estimator precision outside the supported range
    #[error("precision for hyperloglog must be in [4, {max}], got {precision}")]
    InvalidPrecision {
        /// Requested precision
        precision: u8,
        /// Largest precision allowed for this hash
        max: u8,
    },
    /// Direct I/O block size is zero or not a power of two
    #[error("bad block size: {0}")]
    InvalidBlockSize(usize),
    /// Output chunk size is zero
    #[error("bad chunk size: {0}")]
    InvalidChunkSize(usize),
    /// A file name was empty
    #[error("bad file name for {0}")]
    EmptyFileName(&'static str),
    /// The memory probe produced a zero value
    #[error("evaluated {0} to be 0 or less")]
    NonPositiveProbe(&'static str),
    /// Unknown writer strategy id
    #[error("unknown writer strategy id {0} (valid: 0, 2, 3, 5, 6, 7, 8, 10)")]
    UnknownWriter(u32),
    /// Unknown reader strategy id
    #[error("unknown reader strategy id {0} (valid: 2, 5, 7, 10)")]
    UnknownReader(u32),
    /// Rank count or node grouping is not usable
    #[error("invalid topology: {0}")]
    InvalidTopology(String),
    /// Not even the next single file fits in free memory
    #[error(
        "not enough memory to load {file}: estimated {needed} bytes, {free_mem} bytes free per rank"
    )]
    InsufficientMemory {
        /// First file of the window that could not be planned
        file: String,
        /// Estimated bytes needed for that file alone
        needed: u64,
        /// Free bytes per rank
        free_mem: u64,
    },
    /// Any other invalid parameter
    #[error("{0}")]
    Invalid(String),
}

/// Errors raised while ingesting or writing
#[derive(Error, Debug)]
pub enum IngestError {
    /// Configuration or environment error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An OS file call failed
    #[error("{op} failed on [{}]: {source}", file.display())]
    Io {
        /// Operation name (open, seek, write, mmap, stretch, ...)
        op: &'static str,
        /// Target file
        file: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// A collective file operation failed; `detail` is the communicator's decoding
    #[error("collective I/O on rank {rank}: {op} {}: {detail}", file.display())]
    Collective {
        /// Rank reporting the failure
        rank: usize,
        /// Operation name
        op: &'static str,
        /// Shared file
        file: PathBuf,
        /// Error class and description as decoded by the communicator
        detail: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Another rank failed a step that every rank must pass together
    #[error("{op} on [{}] failed on another rank", file.display())]
    PeerFailed {
        /// Operation name
        op: &'static str,
        /// File involved
        file: PathBuf,
    },

    /// A write returned fewer bytes than requested
    #[error("{op} on [{}]: requested {requested} bytes, wrote {written}", file.display())]
    ShortWrite {
        /// Operation name
        op: &'static str,
        /// Target file
        file: PathBuf,
        /// Bytes requested
        requested: usize,
        /// Bytes actually written
        written: usize,
    },

    /// Aligned staging allocation failed
    #[error("failed to allocate {size} bytes aligned to {align}")]
    Alloc {
        /// Requested size
        size: usize,
        /// Requested alignment
        align: usize,
    },

    /// Malformed sequence input
    #[error("failed to parse {}: {message}", file.display())]
    Parse {
        /// Input file
        file: PathBuf,
        /// Parser message
        message: String,
    },

    /// A record did not match the fixed output layout
    #[error("record layout violation: {0}")]
    Layout(String),
}

impl IngestError {
    /// Wrap an OS error with the operation and file it came from
    pub fn io(op: &'static str, file: impl Into<PathBuf>, source: io::Error) -> Self {
        IngestError::Io {
            op,
            file: file.into(),
            source,
        }
    }
}

/// Result alias for fallible library operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Make a local outcome symmetric across ranks
///
/// Every rank learns whether any rank failed. A rank that failed returns its own
/// error; the others return [`IngestError::PeerFailed`]. No rank moves on to the
/// next collective while a peer is about to bail out.
pub fn agree<T, C: Communicator>(
    comm: &C,
    op: &'static str,
    file: &Path,
    local: Result<T>,
) -> Result<T> {
    let failed = comm.any_of(local.is_err());
    match local {
        Err(err) => Err(err),
        Ok(_) if failed => Err(IngestError::PeerFailed {
            op,
            file: file.to_path_buf(),
        }),
        Ok(value) => Ok(value),
    }
}
