//! Directory sink — §4.7.
//!
//! `<output_dir>/<hex(hash)>`, one file per distinct block content across
//! all backups. Writes go to `<hex(hash)>.tmp`, are fsynced, then renamed
//! into place — the same write-then-rename-then-fsync discipline the
//! reference codebase uses when patching its whole-archive superblock in
//! place, generalized here to per-block temp files.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use super::Sink;
use crate::hashing::BlockHash;

pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn open<P: AsRef<Path>>(dir: P) -> io::Result<Self> {
        let dir = dir.as_ref().to_owned();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn block_path(&self, hash: &BlockHash) -> PathBuf {
        self.dir.join(hash.to_hex())
    }
}

impl Sink for DirectorySink {
    fn write_block(&mut self, hash: &BlockHash, bytes: &[u8]) -> io::Result<()> {
        let final_path = self.block_path(hash);
        if final_path.exists() {
            // Re-encountering an existing file is a no-op (§4.7).
            return Ok(());
        }

        let tmp_path = self.dir.join(format!("{}.tmp", hash.to_hex()));
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(bytes)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    fn read_block(&self, hash: &BlockHash) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        File::open(self.block_path(hash))?.read_to_end(&mut buf)?;
        Ok(buf)
    }
}
