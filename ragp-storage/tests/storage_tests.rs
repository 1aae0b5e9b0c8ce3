//! Storage integration tests: cold boot, consolidate fixpoint, CRC-guarded
//! replay, and legacy rechunking.

use ragp_storage::format::{IndexEntry, ManifestHeader, HEADER_LEN, INDEX_ENTRY_LEN};
use ragp_storage::{
    merge_delta, ChunkedBase, DeltaLog, NodeKind, StorageError, Synapse, BASE_FILE, DELTA_FILE,
};
use std::fs;
use std::io::Write;
use tempfile::TempDir;

const SPAN: u32 = 100;

fn open_store(dir: &TempDir) -> (ChunkedBase, DeltaLog) {
    let base = ChunkedBase::open(dir.path(), SPAN, 1).expect("open base");
    let (delta, _) = DeltaLog::open(&dir.path().join(DELTA_FILE)).expect("open delta");
    (base, delta)
}

#[test]
fn test_cold_boot_empty_store() {
    let dir = TempDir::new().expect("tempdir");
    let (mut base, delta) = open_store(&dir);
    base.install_nodes(
        &[
            (1, NodeKind::Sensor),
            (2, NodeKind::Context),
            (3, NodeKind::Action),
        ],
        1,
    )
    .expect("install nodes");

    assert_eq!(base.node_count(), 3);
    assert_eq!(base.chunk_count(), 0, "no chunk files without edges");
    assert_eq!(delta.records(), 0);
    assert_eq!(base.read_outgoing(1).expect("known node"), Vec::new());
    assert!(matches!(
        base.read_outgoing(99),
        Err(StorageError::UnknownNode(99))
    ));
}

#[test]
fn test_write_reread_and_consolidate_fixpoint() {
    let dir = TempDir::new().expect("tempdir");
    let (mut base, mut delta) = open_store(&dir);
    base.install_nodes(&[(1, NodeKind::Sensor), (2, NodeKind::Context)], 1)
        .expect("install nodes");

    delta.append(1, 2, 0.5, 1).expect("append");
    delta.sync().expect("sync");

    merge_delta(&mut base, &delta, 0.0).expect("merge");
    delta.truncate().expect("truncate");

    assert_eq!(
        base.read_outgoing(1).expect("read"),
        vec![Synapse::new(2, 0.5, 1)]
    );
    assert_eq!(delta.records(), 0);
    assert_eq!(fs::metadata(dir.path().join(DELTA_FILE)).expect("stat").len(), 0);
    assert_eq!(base.chunk_count(), 1);

    // Consolidate idempotence: a second merge with an empty delta must not
    // touch a single byte on disk.
    let manifest_before = fs::read(dir.path().join(BASE_FILE)).expect("manifest");
    let chunk_before = fs::read(dir.path().join("base_0_99.bin")).expect("chunk");
    merge_delta(&mut base, &delta, 0.0).expect("second merge");
    assert_eq!(
        fs::read(dir.path().join(BASE_FILE)).expect("manifest"),
        manifest_before
    );
    assert_eq!(
        fs::read(dir.path().join("base_0_99.bin")).expect("chunk"),
        chunk_before
    );

    // Cold restart reads the same state.
    drop(base);
    let base = ChunkedBase::open(dir.path(), SPAN, 1).expect("reopen");
    assert_eq!(
        base.read_outgoing(1).expect("read after reopen"),
        vec![Synapse::new(2, 0.5, 1)]
    );
}

#[test]
fn test_tombstone_and_prune_on_merge() {
    let dir = TempDir::new().expect("tempdir");
    let (mut base, mut delta) = open_store(&dir);
    base.install_nodes(
        &[
            (1, NodeKind::Sensor),
            (2, NodeKind::Context),
            (3, NodeKind::Context),
        ],
        1,
    )
    .expect("install nodes");

    delta.append(1, 2, 0.5, 1).expect("append");
    delta.append(1, 3, 0.005, 2).expect("append faint edge");
    delta.append(1, 2, 0.0, 3).expect("tombstone");
    merge_delta(&mut base, &delta, 0.01).expect("merge");
    delta.truncate().expect("truncate");

    assert_eq!(
        base.read_outgoing(1).expect("read"),
        Vec::new(),
        "tombstoned and sub-threshold edges are gone"
    );
    assert_eq!(base.chunk_count(), 0, "empty chunk file removed");
}

#[test]
fn test_crc_mismatch_truncates_tail() {
    let dir = TempDir::new().expect("tempdir");
    {
        let (_, mut delta) = open_store(&dir);
        delta.append(1, 2, 0.5, 1).expect("append");
        delta.append(1, 3, 0.7, 2).expect("append");
        delta.sync().expect("sync");
    }

    // A third record with one payload byte flipped after the CRC was
    // computed: replay must stop at its offset.
    let path = dir.path().join(DELTA_FILE);
    let valid_len = fs::metadata(&path).expect("stat").len();
    let mut raw = ragp_storage::format::encode_delta_record(1, 4, 0.9, 3).to_vec();
    raw[10] ^= 0xff;
    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(&path)
        .expect("open for corruption");
    file.write_all(&raw).expect("write corrupt tail");
    file.sync_all().expect("sync");
    drop(file);

    let (delta, summary) = DeltaLog::open(&path).expect("reopen");
    assert_eq!(summary.records, 2, "two valid records replayed");
    assert!(summary.truncated_bytes > 0);
    assert_eq!(delta.records(), 2);
    assert_eq!(
        fs::metadata(&path).expect("stat").len(),
        valid_len,
        "log truncated to the end of the last valid record"
    );
    let overlay = delta.overlay_for(1).expect("sender present");
    assert_eq!(overlay.get(&2), Some(&(0.5, 1)));
    assert_eq!(overlay.get(&3), Some(&(0.7, 2)));
    assert_eq!(overlay.get(&4), None);
}

#[test]
fn test_delta_replay_is_last_write_wins() {
    let dir = TempDir::new().expect("tempdir");
    {
        let (_, mut delta) = open_store(&dir);
        delta.append(1, 2, 0.3, 5).expect("append");
        delta.append(1, 2, 0.9, 7).expect("append newer");
        delta.sync().expect("sync");
    }
    let (delta, summary) = DeltaLog::open(&dir.path().join(DELTA_FILE)).expect("reopen");
    assert_eq!(summary.records, 2);
    assert_eq!(
        delta.overlay_for(1).and_then(|m| m.get(&2)),
        Some(&(0.9, 7))
    );
}

#[test]
fn test_legacy_monolithic_base_rechunks_on_open() {
    let dir = TempDir::new().expect("tempdir");
    fs::create_dir_all(dir.path()).expect("mkdir");

    // Hand-written v1 layout: header + index + records inline, offsets
    // absolute into base.bin.
    let header = ManifestHeader {
        format_version: 1,
        chunk_span: SPAN,
        node_count: 2,
        registry_version: 1,
    };
    let records_at = (HEADER_LEN + 2 * INDEX_ENTRY_LEN) as u64;
    let mut raw = Vec::new();
    raw.extend_from_slice(&header.encode());
    raw.extend_from_slice(
        &IndexEntry {
            node_id: 1,
            chunk_file_index: 0,
            offset: records_at,
            out_degree: 2,
            kind: NodeKind::Sensor,
        }
        .encode(),
    );
    raw.extend_from_slice(&IndexEntry::empty(2, NodeKind::Action).encode());
    raw.extend_from_slice(&ragp_storage::format::encode_chunk_record(&Synapse::new(
        2, 0.4, 3,
    )));
    raw.extend_from_slice(&ragp_storage::format::encode_chunk_record(&Synapse::new(
        150, 0.6, 4,
    )));
    fs::write(dir.path().join(BASE_FILE), &raw).expect("write legacy base");

    let base = ChunkedBase::open(dir.path(), SPAN, 1).expect("open migrates");
    assert_eq!(base.node_count(), 2);
    assert_eq!(base.chunk_count(), 1);
    assert_eq!(
        base.read_outgoing(1).expect("read"),
        vec![Synapse::new(2, 0.4, 3), Synapse::new(150, 0.6, 4)]
    );
    assert!(dir.path().join("base_0_99.bin").exists());

    // The rewritten manifest is current-format; a reopen takes the fast path.
    let reopened = ChunkedBase::open(dir.path(), SPAN, 1).expect("reopen");
    assert_eq!(reopened.read_outgoing(1).expect("read").len(), 2);
}

#[test]
fn test_max_tick_spans_base_and_delta() {
    let dir = TempDir::new().expect("tempdir");
    let (mut base, mut delta) = open_store(&dir);
    base.install_nodes(&[(1, NodeKind::Sensor), (2, NodeKind::Context)], 1)
        .expect("install nodes");
    delta.append(1, 2, 0.5, 9).expect("append");
    merge_delta(&mut base, &delta, 0.0).expect("merge");
    delta.truncate().expect("truncate");
    assert_eq!(base.max_tick().expect("max tick"), 9);
    delta.append(1, 2, 0.6, 12).expect("append");
    assert_eq!(delta.max_tick(), 12);
}
