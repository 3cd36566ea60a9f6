//! End-to-end scenarios, shapes matching the five acceptance scenarios of
//! the backup engine's testable properties: full backup, an immediate
//! no-change differential, a differential with a changed block, an aborted
//! run, and buffer-size invariance. The literal SHA-256 constants of the
//! original 50 MiB fixture image aren't reproducible here (that image isn't
//! part of this workspace), so these assert the same *shape* against
//! synthetic fixtures built at test time.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use tempfile::tempdir;

use blockvault::catalog::{BackupType, Catalog};
use blockvault::config::{Config, OutputFormat};
use blockvault::orchestrator;
use blockvault::pipeline::CancellationToken;
use blockvault::restore;
use blockvault::sink::DirectorySink;

const BLOCK_SIZE: u64 = 4096;

fn write_image(path: &Path, blocks: &[&[u8]]) {
    let mut f = File::create(path).unwrap();
    for block in blocks {
        assert_eq!(block.len(), BLOCK_SIZE as usize);
        f.write_all(block).unwrap();
    }
    f.flush().unwrap();
}

fn block(byte: u8) -> Vec<u8> {
    vec![byte; BLOCK_SIZE as usize]
}

fn sha256_of(path: &Path) -> [u8; 32] {
    let mut buf = Vec::new();
    File::open(path).unwrap().read_to_end(&mut buf).unwrap();
    let digest = Sha256::digest(&buf);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

fn config(device: &Path, catalog: &Path, out_dir: &Path, buffer: usize) -> Config {
    Config {
        device_path: device.to_path_buf(),
        output_format: OutputFormat::File,
        output_directory: Some(out_dir.to_path_buf()),
        output_stream_path: None,
        block_size: BLOCK_SIZE,
        block_buffer_size: buffer,
        catalog_path: catalog.to_path_buf(),
    }
}

/// Scenario 1: a full backup of a 10-block image with two repeated blocks
/// (so distinct-block count is strictly less than total_blocks).
#[test]
fn full_backup_labels_and_dedups_correctly() {
    let dir = tempdir().unwrap();
    let device = dir.path().join("device.img");
    let blocks: Vec<Vec<u8>> = (0..10u8).map(|i| block(if i == 9 { 0 } else { i })).collect();
    let refs: Vec<&[u8]> = blocks.iter().map(|b| b.as_slice()).collect();
    write_image(&device, &refs);

    let catalog_path = dir.path().join("catalog.db");
    let out_dir = dir.path().join("blocks");
    let config = config(&device, &catalog_path, &out_dir, 10);

    let (backup_type, outcome) = orchestrator::run_backup(&config, CancellationToken::new()).unwrap();
    assert_eq!(backup_type, BackupType::Full);
    assert_eq!(outcome.total_blocks, 10);
    // block 0 and block 9 are identical, so 9 distinct blocks.
    assert_eq!(outcome.novel_blocks, 9);

    let cat = Catalog::open(&catalog_path).unwrap();
    assert_eq!(cat.total_distinct_blocks().unwrap(), 9);
}

/// Scenario 2: an immediate rerun against an unchanged device is labeled
/// differential, adds zero novel blocks, and reconstructs identically.
#[test]
fn differential_rerun_with_no_changes_adds_nothing_new() {
    let dir = tempdir().unwrap();
    let device = dir.path().join("device.img");
    let blocks: Vec<Vec<u8>> = (0..10u8).map(block).collect();
    let refs: Vec<&[u8]> = blocks.iter().map(|b| b.as_slice()).collect();
    write_image(&device, &refs);

    let catalog_path = dir.path().join("catalog.db");
    let out_dir = dir.path().join("blocks");

    let config_wide = config(&device, &catalog_path, &out_dir, 10);
    let (_, first) = orchestrator::run_backup(&config_wide, CancellationToken::new()).unwrap();

    let config_narrow = config(&device, &catalog_path, &out_dir, 1);
    let (backup_type, second) = orchestrator::run_backup(&config_narrow, CancellationToken::new()).unwrap();

    assert_eq!(backup_type, BackupType::Differential);
    assert_eq!(second.total_blocks, first.total_blocks);
    assert_eq!(second.novel_blocks, 0);

    let cat = Catalog::open(&catalog_path).unwrap();
    let sink = DirectorySink::open(&out_dir).unwrap();
    let first_id = cat.backups_for_device(&device.to_string_lossy()).unwrap()[1].id;
    let second_id = cat.backups_for_device(&device.to_string_lossy()).unwrap()[0].id;

    let out1 = dir.path().join("restored1.img");
    let out2 = dir.path().join("restored2.img");
    restore::reconstruct_into(&cat, first_id, &sink, &out1).unwrap();
    restore::reconstruct_into(&cat, second_id, &sink, &out2).unwrap();
    assert_eq!(sha256_of(&out1), sha256_of(&out2));
    assert_eq!(sha256_of(&out1), sha256_of(&device));
}

/// Scenario 3: a differential run against a device with exactly one changed
/// block introduces exactly one new distinct block.
#[test]
fn differential_with_one_changed_block_adds_exactly_one_novel_block() {
    let dir = tempdir().unwrap();
    let device = dir.path().join("device.img");
    let blocks: Vec<Vec<u8>> = (0..10u8).map(block).collect();
    let refs: Vec<&[u8]> = blocks.iter().map(|b| b.as_slice()).collect();
    write_image(&device, &refs);

    let catalog_path = dir.path().join("catalog.db");
    let out_dir = dir.path().join("blocks");
    let config1 = config(&device, &catalog_path, &out_dir, 10);
    orchestrator::run_backup(&config1, CancellationToken::new()).unwrap();

    let mut changed: Vec<Vec<u8>> = (0..10u8).map(block).collect();
    changed[3] = vec![0xFFu8; BLOCK_SIZE as usize];
    let changed_refs: Vec<&[u8]> = changed.iter().map(|b| b.as_slice()).collect();
    write_image(&device, &changed_refs);

    let config2 = config(&device, &catalog_path, &out_dir, 7);
    let (backup_type, outcome) = orchestrator::run_backup(&config2, CancellationToken::new()).unwrap();

    assert_eq!(backup_type, BackupType::Differential);
    assert_eq!(outcome.total_blocks, 10);
    assert_eq!(outcome.novel_blocks, 1);

    let cat = Catalog::open(&catalog_path).unwrap();
    let sink = DirectorySink::open(&out_dir).unwrap();
    let latest_id = cat.latest_completed_backup(&device.to_string_lossy()).unwrap().unwrap();
    let out = dir.path().join("restored.img");
    restore::reconstruct_into(&cat, latest_id, &sink, &out).unwrap();
    assert_eq!(sha256_of(&out), sha256_of(&device));
}

/// Scenario 4: an aborted run leaves no completed backup, and the planner
/// still treats the previous completed run as the latest parent.
#[test]
fn aborted_run_leaves_no_completed_backup() {
    let dir = tempdir().unwrap();
    let device = dir.path().join("device.img");
    let blocks: Vec<Vec<u8>> = (0..10u8).map(block).collect();
    let refs: Vec<&[u8]> = blocks.iter().map(|b| b.as_slice()).collect();
    write_image(&device, &refs);

    let catalog_path = dir.path().join("catalog.db");
    let out_dir = dir.path().join("blocks");
    let config1 = config(&device, &catalog_path, &out_dir, 10);
    orchestrator::run_backup(&config1, CancellationToken::new()).unwrap();
    let cat = Catalog::open(&catalog_path).unwrap();
    let completed_id = cat.latest_completed_backup(&device.to_string_lossy()).unwrap().unwrap();

    // Directly drive a second run that is cancelled before finalize, bypassing
    // the orchestrator's full pipeline spawn so the abort is deterministic.
    let mut cat = Catalog::open(&catalog_path).unwrap();
    let backup_id = cat
        .create_backup(&device.to_string_lossy(), BackupType::Differential, BLOCK_SIZE)
        .unwrap();
    {
        let tx = cat.begin_backup_transaction().unwrap();
        let hash = blockvault::hash_block(b"partial write before abort");
        let (block_id, _) = blockvault::catalog::upsert_block(&tx, &hash, 4).unwrap();
        blockvault::catalog::insert_position(&tx, backup_id, 0, block_id).unwrap();
        // tx dropped without commit — simulates a cancelled run.
    }

    assert_eq!(cat.backup_row(backup_id).unwrap().completed_at, None);
    assert_eq!(
        cat.latest_completed_backup(&device.to_string_lossy()).unwrap(),
        Some(completed_id)
    );
    assert_eq!(cat.find_positions_by_backup(backup_id).unwrap().len(), 0);
}

/// Scenario 5: buffer size is a performance knob, not a correctness input —
/// a tiny buffer must produce the same catalog outcome as a generous one.
#[test]
fn tiny_buffer_matches_generous_buffer_outcome() {
    let dir = tempdir().unwrap();
    let device = dir.path().join("device.img");
    let blocks: Vec<Vec<u8>> = (0..20u8).map(|i| block(i % 6)).collect();
    let refs: Vec<&[u8]> = blocks.iter().map(|b| b.as_slice()).collect();
    write_image(&device, &refs);

    let wide_dir = tempdir().unwrap();
    let wide_catalog = wide_dir.path().join("catalog.db");
    let wide_out = wide_dir.path().join("blocks");
    let (_, wide_outcome) =
        orchestrator::run_backup(&config(&device, &wide_catalog, &wide_out, 16), CancellationToken::new())
            .unwrap();

    let tiny_dir = tempdir().unwrap();
    let tiny_catalog = tiny_dir.path().join("catalog.db");
    let tiny_out = tiny_dir.path().join("blocks");
    let (_, tiny_outcome) =
        orchestrator::run_backup(&config(&device, &tiny_catalog, &tiny_out, 1), CancellationToken::new())
            .unwrap();

    assert_eq!(wide_outcome.total_blocks, tiny_outcome.total_blocks);
    assert_eq!(wide_outcome.novel_blocks, tiny_outcome.novel_blocks);
    assert_eq!(wide_outcome.size_in_bytes, tiny_outcome.size_in_bytes);
}

/// A device whose size isn't a multiple of `block_size` is zero-padded in
/// the trailing block (§4.1), but `size_in_bytes` and the restored file must
/// reflect the true device size, not the padded block count.
#[test]
fn non_aligned_device_restores_without_the_trailing_zero_padding() {
    let dir = tempdir().unwrap();
    let device = dir.path().join("device.img");
    let mut data: Vec<u8> = Vec::new();
    for b in 0..2u8 {
        data.extend(std::iter::repeat(b).take(BLOCK_SIZE as usize));
    }
    data.extend(std::iter::repeat(0xAAu8).take(100)); // partial trailing block
    File::create(&device).unwrap().write_all(&data).unwrap();

    let catalog_path = dir.path().join("catalog.db");
    let out_dir = dir.path().join("blocks");
    let config = config(&device, &catalog_path, &out_dir, 4);

    let (_, outcome) = orchestrator::run_backup(&config, CancellationToken::new()).unwrap();
    assert_eq!(outcome.total_blocks, 3);
    assert_eq!(outcome.size_in_bytes, data.len() as u64);

    let cat = Catalog::open(&catalog_path).unwrap();
    let sink = DirectorySink::open(&out_dir).unwrap();
    let latest_id = cat.latest_completed_backup(&device.to_string_lossy()).unwrap().unwrap();
    let out_path = dir.path().join("restored.img");
    let written = restore::reconstruct_into(&cat, latest_id, &sink, &out_path).unwrap();
    assert_eq!(written, data.len() as u64);

    let mut restored = Vec::new();
    File::open(&out_path).unwrap().read_to_end(&mut restored).unwrap();
    assert_eq!(restored, data);
    assert_eq!(sha256_of(&out_path), sha256_of(&device));
}
