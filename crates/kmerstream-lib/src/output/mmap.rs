//! Shared-file writer through memory maps
//!
//! The highest rank stretches the file to the global total, then every rank
//! maps its own byte range (page-aligned start, pointer corrected by the skew),
//! copies its blob in place, syncs, and unmaps.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use memmap2::{MmapMut, MmapOptions};
use tracing::debug;

use super::node_turns;
use crate::comm::{Communicator, ReduceOp};
use crate::constants::round_down_pow2;
use crate::error::{agree, IngestError, Result};

const FALLBACK_PAGE_SIZE: u64 = 4096;

/// OS page size, the granularity of map offsets
pub fn page_size() -> u64 {
    // SAFETY: sysconf has no preconditions
    let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if raw > 0 {
        raw as u64
    } else {
        FALLBACK_PAGE_SIZE
    }
}

/// Create or truncate `path` and extend it to `total` bytes
fn stretch(path: &Path, total: u64) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| IngestError::io("open", path, e))?;
    if total > 0 {
        file.seek(SeekFrom::Start(total - 1))
            .map_err(|e| IngestError::io("seek", path, e))?;
        file.write_all(&[0])
            .map_err(|e| IngestError::io("stretch", path, e))?;
    }
    Ok(())
}

/// Writable map of `[offset, offset + len)` plus the leading skew
struct RangeMap {
    map: MmapMut,
    skew: usize,
}

impl RangeMap {
    fn open(path: &Path, offset: u64, len: usize, page: u64) -> Result<Self> {
        let file: File = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| IngestError::io("open", path, e))?;
        let aligned = round_down_pow2(offset, page);
        let skew = (offset - aligned) as usize;
        // SAFETY: each rank maps a disjoint range of a file no one truncates
        // until every rank has unmapped
        let map = unsafe {
            MmapOptions::new()
                .offset(aligned)
                .len(len + skew)
                .map_mut(&file)
        }
        .map_err(|e| IngestError::io("mmap", path, e))?;
        Ok(Self { map, skew })
    }

    fn target(&mut self) -> &mut [u8] {
        &mut self.map[self.skew..]
    }
}

/// Write every rank's `data` into one shared file at rank-ordered offsets (collective)
pub(crate) fn write_mapped<C: Communicator>(
    path: &Path,
    data: &[u8],
    comm: &C,
    serialized: bool,
) -> Result<u64> {
    let len = data.len() as u64;
    let offset = comm.exclusive_scan_u64(len);
    let total = comm.all_reduce_u64(len, ReduceOp::Sum);

    let last = comm.size() - 1;
    let stretched = if comm.rank() == last {
        stretch(path, total)
    } else {
        Ok(())
    };
    agree(comm, "stretch", path, stretched)?;
    comm.barrier();

    let mapped = if data.is_empty() {
        Ok(None)
    } else {
        RangeMap::open(path, offset, data.len(), page_size()).map(Some)
    };
    let mut mapping = agree(comm, "mmap", path, mapped)?;

    let mut copy = || -> Result<u64> {
        if let Some(range) = mapping.as_mut() {
            range.target().copy_from_slice(data);
        }
        Ok(0)
    };
    if serialized {
        node_turns(comm, &mut copy)?;
    } else {
        copy()?;
    }

    let synced = match mapping.as_ref() {
        Some(range) => range
            .map
            .flush()
            .map_err(|e| IngestError::io("msync", path, e)),
        None => Ok(()),
    };
    agree(comm, "msync", path, synced)?;
    drop(mapping);
    comm.barrier();

    debug!(
        "rank {} mapped {} bytes at offset {} of {}",
        comm.rank(),
        len,
        offset,
        path.display()
    );
    Ok(len)
}
