//! Volume reader — §4.1.
//!
//! Opens a device-or-image path, reports its byte size, and yields
//! fixed-size blocks in position order. The trailing block is zero-padded
//! to full width if the device size is not block-aligned, so every
//! downstream consumer (hasher, sink) sees uniform `block_size` buffers —
//! no special-casing the last block.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Transient I/O error classes that are worth a bounded retry.
const MAX_READ_RETRIES: u32 = 3;

pub struct VolumeReader {
    file: File,
    path: PathBuf,
    pub size_bytes: u64,
    pub block_size: u64,
    next_position: u64,
    done: bool,
}

impl VolumeReader {
    /// Open `path`, stat its size, and prepare to stream blocks of
    /// `block_size` bytes starting at position 0.
    pub fn open<P: AsRef<Path>>(path: P, block_size: u64) -> io::Result<Self> {
        let path = path.as_ref().to_owned();
        let file = File::open(&path)?;
        let size_bytes = file.metadata()?.len();
        Ok(Self {
            file,
            path,
            size_bytes,
            block_size,
            next_position: 0,
            done: false,
        })
    }

    /// Total number of blocks this device will yield, including a padded
    /// trailing block if `size_bytes` is not block-aligned. §3's invariant:
    /// `total_blocks * block_size >= size_bytes > (total_blocks - 1) * block_size`.
    pub fn total_blocks(&self) -> u64 {
        if self.size_bytes == 0 {
            return 0;
        }
        (self.size_bytes + self.block_size - 1) / self.block_size
    }

    fn read_exact_with_retry(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0usize;
        let mut retries = 0u32;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break, // EOF — caller zero-pads the remainder
                Ok(n) => {
                    filled += n;
                    retries = 0;
                }
                Err(e) if is_transient(&e) && retries < MAX_READ_RETRIES => {
                    retries += 1;
                    continue;
                }
                Err(e) => {
                    return Err(io::Error::new(
                        e.kind(),
                        format!("short read on {}: {e}", self.path.display()),
                    ))
                }
            }
        }
        Ok(filled)
    }

    /// Read the next block, or `None` once every block (including the
    /// zero-padded trailing one) has been yielded.
    pub fn next_block(&mut self) -> io::Result<Option<(u64, Vec<u8>)>> {
        if self.done {
            return Ok(None);
        }
        let position = self.next_position;
        let start_byte = position * self.block_size;
        if start_byte >= self.size_bytes {
            self.done = true;
            return Ok(None);
        }

        let mut buf = vec![0u8; self.block_size as usize];
        let n = self.read_exact_with_retry(&mut buf)?;
        // Zero-pad: `buf` was already zero-initialized, so a short final
        // read just leaves the tail as zeros — nothing further to do.
        let _ = n;

        self.next_position += 1;
        if start_byte + self.block_size >= self.size_bytes {
            self.done = true;
        }
        Ok(Some((position, buf)))
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn yields_aligned_blocks_unpadded() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[1u8; 8]).unwrap();
        f.write_all(&[2u8; 8]).unwrap();
        f.flush().unwrap();

        let mut r = VolumeReader::open(f.path(), 8).unwrap();
        assert_eq!(r.total_blocks(), 2);
        let (pos0, b0) = r.next_block().unwrap().unwrap();
        assert_eq!(pos0, 0);
        assert_eq!(b0, vec![1u8; 8]);
        let (pos1, b1) = r.next_block().unwrap().unwrap();
        assert_eq!(pos1, 1);
        assert_eq!(b1, vec![2u8; 8]);
        assert!(r.next_block().unwrap().is_none());
    }

    #[test]
    fn zero_pads_trailing_block() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[7u8; 5]).unwrap();
        f.flush().unwrap();

        let mut r = VolumeReader::open(f.path(), 8).unwrap();
        assert_eq!(r.total_blocks(), 1);
        let (_, block) = r.next_block().unwrap().unwrap();
        assert_eq!(block, vec![7, 7, 7, 7, 7, 0, 0, 0]);
        assert!(r.next_block().unwrap().is_none());
    }

    #[test]
    fn repeated_reads_are_identical() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
        f.write_all(&data).unwrap();
        f.flush().unwrap();

        let collect = || {
            let mut r = VolumeReader::open(f.path(), 512).unwrap();
            let mut out = Vec::new();
            while let Some((_, b)) = r.next_block().unwrap() {
                out.push(b);
            }
            out
        };
        assert_eq!(collect(), collect());
    }
}
