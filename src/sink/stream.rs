//! Stream sink — §4.7, §6.
//!
//! Novel blocks are framed as `hash(32) || size(4, big-endian) || payload`
//! and appended to a single file. A forward scan over those frames is how
//! both this sink and [`crate::restore`] locate a block's payload when the
//! output format is `stream` rather than `file`.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::Sink;
use crate::hashing::BlockHash;

pub struct StreamSink {
    path: PathBuf,
    file: File,
    /// hash -> (payload offset, payload length), built by scanning existing
    /// frames on open so re-runs against an existing stream stay idempotent.
    index: HashMap<BlockHash, (u64, u32)>,
}

impl StreamSink {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_owned();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let index = scan_frames(&mut file)?;
        Ok(Self { path, file, index })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn scan_frames(file: &mut File) -> io::Result<HashMap<BlockHash, (u64, u32)>> {
    file.seek(SeekFrom::Start(0))?;
    let mut index = HashMap::new();
    loop {
        let frame_start = file.stream_position()?;
        let mut hash_bytes = [0u8; 32];
        match file.read_exact(&mut hash_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        let size = file.read_u32::<BigEndian>()?;
        let payload_offset = frame_start + 32 + 4;
        index.insert(BlockHash(hash_bytes), (payload_offset, size));
        file.seek(SeekFrom::Start(payload_offset + size as u64))?;
    }
    Ok(index)
}

impl Sink for StreamSink {
    fn write_block(&mut self, hash: &BlockHash, bytes: &[u8]) -> io::Result<()> {
        if self.index.contains_key(hash) {
            return Ok(()); // idempotent re-encounter, matches the directory sink
        }
        self.file.seek(SeekFrom::End(0))?;
        let frame_start = self.file.stream_position()?;
        self.file.write_all(hash.as_bytes())?;
        self.file.write_u32::<BigEndian>(bytes.len() as u32)?;
        self.file.write_all(bytes)?;
        self.file.sync_all()?;

        let payload_offset = frame_start + 32 + 4;
        self.index.insert(*hash, (payload_offset, bytes.len() as u32));
        Ok(())
    }

    fn read_block(&self, hash: &BlockHash) -> io::Result<Vec<u8>> {
        let &(offset, size) = self.index.get(hash).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("block {hash} not in stream"))
        })?;
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; size as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}
