//! Run configuration and validation — §6 External Interfaces / §7.1.
//!
//! `Config` is the single struct threaded through the orchestrator. It is
//! intentionally flat: every field enumerated in §6 is a public field with
//! no builder indirection, matching the reference codebase's `PackOptions`.

use std::path::PathBuf;

use crate::error::ConfigError;

/// Output sink selection (§4.7 / §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One file per novel block, named by hex(hash), under `output_directory`.
    File,
    /// Concatenated `hash(32) || size(4 BE) || payload` records in one file.
    Stream,
}

impl OutputFormat {
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "file" => Some(OutputFormat::File),
            "stream" => Some(OutputFormat::Stream),
            _ => None,
        }
    }
}

/// Default block size: 1 MiB, per §6.
pub const DEFAULT_BLOCK_SIZE: u64 = 1024 * 1024;
/// Default pipeline buffer capacity — small, per §4.5's "default small, e.g. 4".
pub const DEFAULT_BLOCK_BUFFER_SIZE: usize = 4;
/// Default catalog path, per §6.
pub const DEFAULT_CATALOG_PATH: &str = "backups.db";

#[derive(Debug, Clone)]
pub struct Config {
    pub device_path: PathBuf,
    pub output_format: OutputFormat,
    pub output_directory: Option<PathBuf>,
    /// Single aggregate file used when `output_format == Stream`.
    pub output_stream_path: Option<PathBuf>,
    pub block_size: u64,
    pub block_buffer_size: usize,
    pub catalog_path: PathBuf,
}

impl Config {
    /// Validate before any catalog mutation — §7's configuration error is
    /// fatal "before any catalog mutation".
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDevicePath);
        }
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(ConfigError::InvalidBlockSize(self.block_size));
        }
        if self.block_buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize);
        }
        match self.output_format {
            OutputFormat::File if self.output_directory.is_none() => {
                return Err(ConfigError::MissingOutputDirectory);
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            device_path: PathBuf::from("/dev/null"),
            output_format: OutputFormat::File,
            output_directory: Some(PathBuf::from("/tmp/out")),
            output_stream_path: None,
            block_size: DEFAULT_BLOCK_SIZE,
            block_buffer_size: DEFAULT_BLOCK_BUFFER_SIZE,
            catalog_path: PathBuf::from(DEFAULT_CATALOG_PATH),
        }
    }

    #[test]
    fn accepts_defaults() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_block_size() {
        let mut c = base_config();
        c.block_size = 1000;
        assert!(matches!(c.validate(), Err(ConfigError::InvalidBlockSize(1000))));
    }

    #[test]
    fn rejects_zero_buffer() {
        let mut c = base_config();
        c.block_buffer_size = 0;
        assert!(matches!(c.validate(), Err(ConfigError::InvalidBufferSize)));
    }

    #[test]
    fn rejects_missing_output_directory_for_file_sink() {
        let mut c = base_config();
        c.output_directory = None;
        assert!(matches!(c.validate(), Err(ConfigError::MissingOutputDirectory)));
    }

    #[test]
    fn rejects_empty_device_path() {
        let mut c = base_config();
        c.device_path = PathBuf::new();
        assert!(matches!(c.validate(), Err(ConfigError::EmptyDevicePath)));
    }
}
