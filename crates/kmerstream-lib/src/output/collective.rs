//! Shared-file writer with lock-step positioned writes
//!
//! Rank 0 creates and truncates the file, every rank opens it, and each rank
//! writes its blob at its exclusive prefix-sum offset. All ranks run the same
//! number of iterations (the global maximum chunk count), and every iteration
//! ends in a collective, so a rank with less data keeps stepping with empty
//! writes until the longest rank finishes.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use tracing::debug;

use crate::comm::{Communicator, ReduceOp};
use crate::error::{agree, ConfigError, IngestError, Result};

fn collective_err<C: Communicator>(
    comm: &C,
    op: &'static str,
    path: &Path,
    source: io::Error,
) -> IngestError {
    IngestError::Collective {
        rank: comm.rank(),
        op,
        file: path.to_path_buf(),
        detail: comm.describe_error(&source),
        source,
    }
}

fn write_chunk<C: Communicator>(
    comm: &C,
    file: &File,
    path: &Path,
    chunk: &[u8],
    offset: u64,
) -> Result<()> {
    let written = file
        .write_at(chunk, offset)
        .map_err(|e| collective_err(comm, "write_at", path, e))?;
    if written < chunk.len() {
        return Err(IngestError::ShortWrite {
            op: "write_at",
            file: path.to_path_buf(),
            requested: chunk.len(),
            written,
        });
    }
    Ok(())
}

/// Write every rank's `data` into one shared file at rank-ordered offsets (collective)
pub(crate) fn write_collective<C: Communicator>(
    path: &Path,
    data: &[u8],
    comm: &C,
    chunk_bytes: usize,
) -> Result<u64> {
    // same value on every rank, so every rank returns here together
    if chunk_bytes == 0 {
        return Err(ConfigError::InvalidChunkSize(chunk_bytes).into());
    }
    let created = if comm.rank() == 0 {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map(drop)
            .map_err(|e| collective_err(comm, "create", path, e))
    } else {
        Ok(())
    };
    agree(comm, "create", path, created)?;

    let opened = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| collective_err(comm, "open", path, e));
    let file = agree(comm, "open", path, opened)?;

    let len = data.len() as u64;
    let offset = comm.exclusive_scan_u64(len);
    let chunks = data.len().div_ceil(chunk_bytes) as u64;
    let iterations = comm.all_reduce_u64(chunks, ReduceOp::Max);

    let mut pieces = data.chunks(chunk_bytes);
    let mut position = offset;
    for _ in 0..iterations {
        let outcome = match pieces.next() {
            Some(chunk) => {
                write_chunk(comm, &file, path, chunk, position).map(|_| chunk.len() as u64)
            }
            None => Ok(0),
        };
        position += agree(comm, "write_at", path, outcome)?;
    }

    debug!(
        "rank {} wrote {} bytes at offset {} of {} in {} iterations",
        comm.rank(),
        len,
        offset,
        path.display(),
        iterations
    );
    Ok(len)
}
