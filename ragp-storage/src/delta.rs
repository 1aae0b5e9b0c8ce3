// ragp-storage/src/delta.rs
// Append-only, CRC-protected delta log with replay-on-open

use crate::error::StorageResult;
use crate::format::{self, DELTA_RECORD_LEN};
use crate::types::{NodeId, Tick};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Outcome of the startup replay.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaySummary {
    /// Records replayed into the in-memory index.
    pub records: u64,
    /// Bytes cut off the tail at the first CRC mismatch.
    pub truncated_bytes: u64,
}

/// The append-only record of recent weight/edge updates.
///
/// Appends are buffered in the OS; `sync` makes them durable. On open the
/// log is replayed from the start and truncated at the first record whose
/// CRC disagrees with its payload, so a torn tail is tolerated. The replayed
/// records feed `sender → receiver → (weight, tick)`, last-write-wins by
/// tick.
pub struct DeltaLog {
    file: File,
    records: u64,
    index: HashMap<NodeId, BTreeMap<NodeId, (f32, Tick)>>,
}

impl DeltaLog {
    pub fn open(path: &Path) -> StorageResult<(Self, ReplaySummary)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let raw = std::fs::read(path)?;
        let mut index: HashMap<NodeId, BTreeMap<NodeId, (f32, Tick)>> = HashMap::new();
        let mut pos = 0usize;
        let mut records = 0u64;
        while pos < raw.len() {
            match format::decode_delta_record(&raw[pos..]) {
                Some(rec) => {
                    apply(&mut index, rec.sender, rec.receiver, rec.weight, rec.tick);
                    pos += DELTA_RECORD_LEN;
                    records += 1;
                }
                None => break,
            }
        }

        let truncated = raw.len() as u64 - pos as u64;
        if truncated > 0 {
            warn!(
                offset = pos,
                truncated_bytes = truncated,
                "delta log tail failed CRC validation, truncating"
            );
            file.set_len(pos as u64)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(pos as u64))?;

        debug!(records, truncated_bytes = truncated, "delta log replayed");
        Ok((
            Self {
                file,
                records,
                index,
            },
            ReplaySummary {
                records,
                truncated_bytes: truncated,
            },
        ))
    }

    /// Append one record. Durability is deferred to [`DeltaLog::sync`].
    pub fn append(
        &mut self,
        sender: NodeId,
        receiver: NodeId,
        weight: f32,
        tick: Tick,
    ) -> StorageResult<()> {
        let buf = format::encode_delta_record(sender, receiver, weight, tick);
        self.file.write_all(&buf)?;
        self.records += 1;
        apply(&mut self.index, sender, receiver, weight, tick);
        Ok(())
    }

    /// Flush appended records to disk.
    pub fn sync(&mut self) -> StorageResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Reset the log to zero length. Called after a consolidation commit.
    pub fn truncate(&mut self) -> StorageResult<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.sync_all()?;
        self.records = 0;
        self.index.clear();
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Pending overlay for one sender, if any.
    pub fn overlay_for(&self, sender: NodeId) -> Option<&BTreeMap<NodeId, (f32, Tick)>> {
        self.index.get(&sender)
    }

    /// Full pending overlay, keyed by sender.
    pub fn index(&self) -> &HashMap<NodeId, BTreeMap<NodeId, (f32, Tick)>> {
        &self.index
    }

    /// Highest tick among pending records.
    pub fn max_tick(&self) -> Tick {
        self.index
            .values()
            .flat_map(|m| m.values())
            .map(|&(_, tick)| tick)
            .max()
            .unwrap_or(0)
    }
}

fn apply(
    index: &mut HashMap<NodeId, BTreeMap<NodeId, (f32, Tick)>>,
    sender: NodeId,
    receiver: NodeId,
    weight: f32,
    tick: Tick,
) {
    let per_sender = index.entry(sender).or_default();
    match per_sender.get(&receiver) {
        Some(&(_, existing)) if existing > tick => {}
        _ => {
            per_sender.insert(receiver, (weight, tick));
        }
    }
}
