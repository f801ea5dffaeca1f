//! Per-rank file writers: buffered and direct
//!
//! Both split the blob into at most `chunk_bytes` per `write` call. The direct
//! writer issues only whole device blocks from a block-aligned buffer; the last
//! partial block is copied into a zeroed scratch block, and the file is then
//! truncated back to the exact blob length.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use tracing::debug;

use super::aligned::AlignedBuffer;
use crate::error::{ConfigError, IngestError, Result};

/// Issue one `write` call and insist that it wrote everything
fn write_once(file: &mut File, chunk: &[u8], op: &'static str, path: &Path) -> Result<()> {
    let written = file.write(chunk).map_err(|e| IngestError::io(op, path, e))?;
    if written < chunk.len() {
        return Err(IngestError::ShortWrite {
            op,
            file: path.to_path_buf(),
            requested: chunk.len(),
            written,
        });
    }
    Ok(())
}

fn create(path: &Path, direct: bool) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(target_os = "linux")]
    if direct {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_DIRECT);
    }
    #[cfg(not(target_os = "linux"))]
    let _ = direct;
    options.open(path).map_err(|e| IngestError::io("open", path, e))
}

/// Write `data` to `path` through the page cache
pub(crate) fn write_buffered(path: &Path, data: &[u8], chunk_bytes: usize) -> Result<u64> {
    if chunk_bytes == 0 {
        return Err(ConfigError::InvalidChunkSize(chunk_bytes).into());
    }
    let mut file = create(path, false)?;
    for chunk in data.chunks(chunk_bytes) {
        write_once(&mut file, chunk, "write", path)?;
    }
    debug!("wrote {} bytes to {}", data.len(), path.display());
    Ok(data.len() as u64)
}

/// Write `data` to `path` in whole `block_size` blocks
///
/// With `open_direct` the file is opened with `O_DIRECT`; without it the same
/// block-granular writes go through the page cache.
pub(crate) fn write_direct(
    path: &Path,
    data: &[u8],
    block_size: usize,
    chunk_bytes: usize,
    open_direct: bool,
) -> Result<u64> {
    if block_size == 0 || !block_size.is_power_of_two() {
        return Err(ConfigError::InvalidBlockSize(block_size).into());
    }
    let mut file = create(path, open_direct)?;

    let remainder = data.len() % block_size;
    let blocked = data.len() - remainder;
    let step = (chunk_bytes / block_size).max(1) * block_size;

    if blocked > 0 {
        let staging = AlignedBuffer::from_slice(&data[..blocked], block_size)?;
        for chunk in staging.as_slice().chunks(step) {
            write_once(&mut file, chunk, "write direct", path)?;
        }
    }

    if remainder > 0 {
        let mut scratch = AlignedBuffer::zeroed(block_size, block_size)?;
        scratch.as_mut_slice()[..remainder].copy_from_slice(&data[blocked..]);
        write_once(&mut file, scratch.as_slice(), "write direct remainder", path)?;
        file.set_len(data.len() as u64)
            .map_err(|e| IngestError::io("truncate", path, e))?;
    }

    debug!(
        "wrote {} bytes to {} in {}-byte blocks",
        data.len(),
        path.display(),
        block_size
    );
    Ok(data.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn test_buffered_spans_chunks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let data = pattern(1000);
        assert_eq!(write_buffered(&path, &data, 64).unwrap(), 1000);
        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[test]
    fn test_buffered_truncates_previous_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, vec![7u8; 5000]).unwrap();
        write_buffered(&path, b"abc", 1024).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
    }

    #[test]
    fn test_direct_pads_then_truncates() {
        let dir = tempdir().unwrap();
        for len in [0usize, 1, 511, 512, 513, 3000] {
            let path = dir.path().join(format!("direct{len}.bin"));
            let data = pattern(len);
            write_direct(&path, &data, 512, 1024, false).unwrap();
            assert_eq!(std::fs::read(&path).unwrap(), data, "length {len}");
        }
    }

    #[test]
    fn test_direct_through_o_direct() {
        // tmpfs and some overlay filesystems refuse O_DIRECT, so stay on the
        // filesystem holding the crate
        let dir = tempfile::tempdir_in(env!("CARGO_MANIFEST_DIR")).unwrap();
        for len in [0usize, 1, 511, 512, 4097, 10000] {
            let path = dir.path().join(format!("o_direct{len}.bin"));
            let data = pattern(len);
            match write_direct(&path, &data, 4096, 8192, true) {
                Ok(written) => assert_eq!(written, len as u64),
                Err(IngestError::Io { source, .. })
                    if source.raw_os_error() == Some(libc::EINVAL) =>
                {
                    return;
                }
                Err(e) => panic!("length {len}: {e}"),
            }
            assert_eq!(std::fs::read(&path).unwrap(), data, "length {len}");
        }
    }

    #[test]
    fn test_zero_sizes_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        assert!(matches!(
            write_buffered(&path, b"abc", 0),
            Err(IngestError::Config(ConfigError::InvalidChunkSize(0)))
        ));
        assert!(matches!(
            write_direct(&path, b"abc", 0, 1024, false),
            Err(IngestError::Config(ConfigError::InvalidBlockSize(0)))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_open_failure_names_file() {
        let err = write_buffered(Path::new("/nonexistent/dir/out.bin"), b"x", 16).unwrap_err();
        assert!(matches!(err, IngestError::Io { op: "open", .. }));
        assert!(err.to_string().contains("/nonexistent/dir/out.bin"));
    }
}
