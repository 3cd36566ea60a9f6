use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use blockvault::catalog::Catalog;
use blockvault::config::{Config, OutputFormat, DEFAULT_BLOCK_BUFFER_SIZE, DEFAULT_BLOCK_SIZE, DEFAULT_CATALOG_PATH};
use blockvault::error::BackupError;
use blockvault::orchestrator;
use blockvault::pipeline::CancellationToken;
use blockvault::restore;
use blockvault::sink::{DirectorySink, StreamSink};

#[derive(Parser)]
#[command(name = "blockvault", version = "1.0.0", about = "Content-addressed block-level backup engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up a device or image file, deduplicating against the catalog
    Backup {
        device: PathBuf,
        #[arg(long, default_value = DEFAULT_CATALOG_PATH)]
        catalog: PathBuf,
        #[arg(long, default_value = "file")]
        output_format: String,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        output_stream: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: u64,
        #[arg(long, default_value_t = DEFAULT_BLOCK_BUFFER_SIZE)]
        buffer: usize,
    },
    /// Reconstruct a device's bytes from the catalog and sink
    Restore {
        device: PathBuf,
        #[arg(long, default_value = DEFAULT_CATALOG_PATH)]
        catalog: PathBuf,
        #[arg(long, default_value = "file")]
        output_format: String,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        output_stream: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
        /// Restore a specific backup id instead of the device's latest completed backup
        #[arg(long)]
        backup_id: Option<i64>,
    },
    /// List backups recorded in the catalog
    List {
        device: Option<PathBuf>,
        #[arg(long, default_value = DEFAULT_CATALOG_PATH)]
        catalog: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Commands::Backup {
            device,
            catalog,
            output_format,
            output_dir,
            output_stream,
            block_size,
            buffer,
        } => run_backup(device, catalog, output_format, output_dir, output_stream, block_size, buffer),

        Commands::Restore {
            device,
            catalog,
            output_format,
            output_dir,
            output_stream,
            out,
            backup_id,
        } => run_restore(device, catalog, output_format, output_dir, output_stream, out, backup_id),

        Commands::List { device, catalog } => run_list(device, catalog),
    }
}

fn parse_output_format(name: &str) -> Result<OutputFormat, ExitCode> {
    OutputFormat::from_name(name).ok_or_else(|| {
        eprintln!("unknown --output-format {name:?}, expected \"file\" or \"stream\"");
        ExitCode::from(2)
    })
}

#[allow(clippy::too_many_arguments)]
fn run_backup(
    device: PathBuf,
    catalog: PathBuf,
    output_format: String,
    output_dir: Option<PathBuf>,
    output_stream: Option<PathBuf>,
    block_size: u64,
    buffer: usize,
) -> ExitCode {
    let output_format = match parse_output_format(&output_format) {
        Ok(f) => f,
        Err(code) => return code,
    };
    let config = Config {
        device_path: device,
        output_format,
        output_directory: output_dir,
        output_stream_path: output_stream,
        block_size,
        block_buffer_size: buffer,
        catalog_path: catalog,
    };

    match orchestrator::run_backup(&config, CancellationToken::new()) {
        Ok((backup_type, outcome)) => {
            println!(
                "{} backup of {}: {} blocks ({} novel), {} bytes",
                backup_type,
                config.device_path.display(),
                outcome.total_blocks,
                outcome.novel_blocks,
                outcome.size_in_bytes
            );
            ExitCode::SUCCESS
        }
        Err(err) => fail(&err),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_restore(
    device: PathBuf,
    catalog: PathBuf,
    output_format: String,
    output_dir: Option<PathBuf>,
    output_stream: Option<PathBuf>,
    out: PathBuf,
    backup_id: Option<i64>,
) -> ExitCode {
    let output_format = match parse_output_format(&output_format) {
        Ok(f) => f,
        Err(code) => return code,
    };

    let cat = match Catalog::open(&catalog) {
        Ok(c) => c,
        Err(e) => return fail(&BackupError::Catalog(e)),
    };

    let device_name = device.to_string_lossy().into_owned();
    let result = match output_format {
        OutputFormat::File => {
            let dir = match output_dir {
                Some(d) => d,
                None => {
                    eprintln!("--output-dir is required with --output-format file");
                    return ExitCode::from(2);
                }
            };
            let sink = match DirectorySink::open(&dir) {
                Ok(s) => s,
                Err(e) => return fail(&BackupError::Sink(e)),
            };
            restore_with(&cat, &device_name, backup_id, &sink, &out)
        }
        OutputFormat::Stream => {
            let path = output_stream.unwrap_or_else(|| catalog.with_extension("stream"));
            let sink = match StreamSink::open(&path) {
                Ok(s) => s,
                Err(e) => return fail(&BackupError::Sink(e)),
            };
            restore_with(&cat, &device_name, backup_id, &sink, &out)
        }
    };

    match result {
        Ok(written) => {
            println!("restored {} bytes to {}", written, out.display());
            ExitCode::SUCCESS
        }
        Err(err) => fail(&err),
    }
}

fn restore_with(
    cat: &Catalog,
    device_name: &str,
    backup_id: Option<i64>,
    sink: &dyn blockvault::sink::Sink,
    out: &PathBuf,
) -> Result<u64, BackupError> {
    match backup_id {
        Some(id) => restore::reconstruct_into(cat, id, sink, out),
        None => restore::reconstruct_latest(cat, device_name, sink, out),
    }
}

fn run_list(device: Option<PathBuf>, catalog: PathBuf) -> ExitCode {
    let cat = match Catalog::open(&catalog) {
        Ok(c) => c,
        Err(e) => return fail(&BackupError::Catalog(e)),
    };

    let device = match device {
        Some(d) => d,
        None => {
            eprintln!("listing all devices is not supported; pass a device path");
            return ExitCode::from(2);
        }
    };

    match cat.backups_for_device(&device.to_string_lossy()) {
        Ok(rows) => {
            println!(
                "{:>6} {:<12} {:>12} {:>10} {:>14} {:<10}",
                "id", "type", "blocks", "size", "created", "completed"
            );
            for row in rows {
                println!(
                    "{:>6} {:<12} {:>12} {:>10} {:>14} {:<10}",
                    row.id,
                    row.backup_type,
                    row.total_blocks,
                    row.size_in_bytes,
                    row.created_at,
                    row.completed_at.as_deref().unwrap_or("(aborted)")
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(&BackupError::Catalog(e)),
    }
}

fn fail(err: &BackupError) -> ExitCode {
    log::error!("{err}");
    eprintln!("error: {err}");
    ExitCode::from(err.exit_code() as u8)
}
