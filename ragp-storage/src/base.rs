// ragp-storage/src/base.rs
// Chunked base store: manifest + node index + per-range synapse chunk files

use crate::error::{StorageError, StorageResult};
use crate::format::{
    self, IndexEntry, ManifestHeader, CHUNK_RECORD_LEN, FORMAT_VERSION, HEADER_LEN,
    INDEX_ENTRY_LEN, LEGACY_FORMAT_VERSION, NO_CHUNK,
};
use crate::types::{NodeId, NodeKind, Synapse, Tick};
use crate::BASE_FILE;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Persistent, random-access outgoing-synapse table.
///
/// The manifest (`base.bin`) holds the header and a fixed-width node index;
/// each chunk file (`base_<lo>_<hi>.bin`) holds the records of all senders
/// whose IDs fall in `[lo, hi]`, sorted by `(sender, receiver)`. Writes go
/// through temporary files and atomic renames; the manifest rename is the
/// commit point.
pub struct ChunkedBase {
    dir: PathBuf,
    chunk_span: u32,
    registry_version: u16,
    index: BTreeMap<NodeId, IndexEntry>,
    /// Chunk ranges `(lo, hi)` in ascending order; positions are the
    /// `chunk_file_index` values stored in the node index.
    chunks: Vec<(NodeId, NodeId)>,
}

impl ChunkedBase {
    /// Open the base store under `dir`, creating an empty one when no
    /// manifest exists. A legacy monolithic base is rechunked on open.
    pub fn open(dir: &Path, chunk_span: u32, initial_registry_version: u16) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        let manifest = dir.join(BASE_FILE);
        if !manifest.exists() {
            let base = Self {
                dir: dir.to_path_buf(),
                chunk_span,
                registry_version: initial_registry_version,
                index: BTreeMap::new(),
                chunks: Vec::new(),
            };
            return Ok(base);
        }

        let raw = fs::read(&manifest)?;
        let header = ManifestHeader::decode(&raw)?;
        match header.format_version {
            FORMAT_VERSION => {}
            LEGACY_FORMAT_VERSION => {
                return Self::migrate_legacy(dir, chunk_span, &raw, header);
            }
            other => return Err(StorageError::UnsupportedVersion(other)),
        }

        let mut index = BTreeMap::new();
        let mut pos = HEADER_LEN;
        for _ in 0..header.node_count {
            let entry = IndexEntry::decode(&raw[pos..])?;
            pos += INDEX_ENTRY_LEN;
            index.insert(entry.node_id, entry);
        }

        let mut base = Self {
            dir: dir.to_path_buf(),
            chunk_span: header.chunk_span,
            registry_version: header.registry_version,
            index,
            chunks: Vec::new(),
        };
        base.rebuild_chunk_table();
        debug!(
            nodes = base.index.len(),
            chunks = base.chunks.len(),
            registry_version = base.registry_version,
            "opened base store"
        );
        Ok(base)
    }

    pub fn node_count(&self) -> usize {
        self.index.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn registry_version(&self) -> u16 {
        self.registry_version
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.index.contains_key(&node)
    }

    pub fn node_kind(&self, node: NodeId) -> Option<NodeKind> {
        self.index.get(&node).map(|e| e.kind)
    }

    /// All registry nodes currently in the index, with their kinds.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, NodeKind)> + '_ {
        self.index.iter().map(|(id, e)| (*id, e.kind))
    }

    /// Read the outgoing synapses of `sender` from its chunk.
    pub fn read_outgoing(&self, sender: NodeId) -> StorageResult<Vec<Synapse>> {
        let entry = self
            .index
            .get(&sender)
            .ok_or(StorageError::UnknownNode(sender))?;
        if entry.out_degree == 0 || entry.chunk_file_index == NO_CHUNK {
            return Ok(Vec::new());
        }
        let (lo, hi) = *self
            .chunks
            .get(entry.chunk_file_index as usize)
            .ok_or_else(|| {
                StorageError::CorruptManifest(format!(
                    "node {} references missing chunk {}",
                    sender, entry.chunk_file_index
                ))
            })?;

        let mut file = File::open(self.chunk_path(lo, hi))?;
        file.seek(SeekFrom::Start(entry.offset))?;
        let mut buf = vec![0u8; entry.out_degree as usize * CHUNK_RECORD_LEN];
        file.read_exact(&mut buf)?;

        let mut out = Vec::with_capacity(entry.out_degree as usize);
        for rec in buf.chunks_exact(CHUNK_RECORD_LEN) {
            out.push(format::decode_chunk_record(rec)?);
        }
        Ok(out)
    }

    /// Highest tick stored in any chunk record. Scanned once at open so the
    /// engine can resume its monotonic tick after a restart.
    pub fn max_tick(&self) -> StorageResult<Tick> {
        let mut max = 0;
        for &(lo, hi) in &self.chunks {
            let raw = fs::read(self.chunk_path(lo, hi))?;
            for rec in raw.chunks_exact(CHUNK_RECORD_LEN) {
                let syn = format::decode_chunk_record(rec)?;
                max = max.max(syn.tick);
            }
        }
        Ok(max)
    }

    /// Register nodes that are missing from the index, without touching any
    /// synapse data. Persists the manifest when something changed.
    pub fn install_nodes(
        &mut self,
        defs: &[(NodeId, NodeKind)],
        registry_version: u16,
    ) -> StorageResult<bool> {
        let mut changed = self.registry_version != registry_version;
        self.registry_version = registry_version;
        for &(id, kind) in defs {
            match self.index.get_mut(&id) {
                Some(entry) if entry.kind != kind => {
                    entry.kind = kind;
                    changed = true;
                }
                Some(_) => {}
                None => {
                    self.index.insert(id, IndexEntry::empty(id, kind));
                    changed = true;
                }
            }
        }
        if changed {
            self.write_manifest()?;
        }
        Ok(changed)
    }

    /// Rewrite the outgoing lists of the given senders. Used only by
    /// consolidation and migration; an empty list drops the sender's edges.
    ///
    /// Every affected chunk is rebuilt into a temporary file and swapped by
    /// rename; the manifest rename afterwards is the commit point, and the
    /// directory is fsynced last.
    pub fn rewrite_senders(
        &mut self,
        updates: &BTreeMap<NodeId, Vec<Synapse>>,
    ) -> StorageResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        for sender in updates.keys() {
            if !self.index.contains_key(sender) {
                return Err(StorageError::UnknownNode(*sender));
            }
        }

        let span = self.chunk_span as u64;
        let mut by_range: BTreeMap<NodeId, BTreeMap<NodeId, Vec<Synapse>>> = BTreeMap::new();
        for (&sender, list) in updates {
            let lo = (sender / span) * span;
            by_range.entry(lo).or_default().insert(sender, list.clone());
        }

        // Pull the untouched senders of each affected range in before the
        // chunk files are replaced.
        for (&lo, senders) in by_range.iter_mut() {
            let hi = lo + span - 1;
            let in_range: Vec<NodeId> = self
                .index
                .range(lo..=hi)
                .map(|(id, _)| *id)
                .collect();
            for id in in_range {
                if !senders.contains_key(&id) {
                    let existing = self.read_outgoing(id)?;
                    if !existing.is_empty() {
                        senders.insert(id, existing);
                    }
                }
            }
        }

        let mut empty_chunks = Vec::new();
        for (&lo, senders) in &by_range {
            let hi = lo + span - 1;
            if senders.values().all(|l| l.is_empty()) {
                for (&id, _) in senders {
                    if let Some(entry) = self.index.get_mut(&id) {
                        entry.chunk_file_index = NO_CHUNK;
                        entry.offset = 0;
                        entry.out_degree = 0;
                    }
                }
                empty_chunks.push(self.chunk_path(lo, hi));
                continue;
            }
            self.write_chunk(lo, hi, senders)?;
        }

        self.rebuild_chunk_table();
        self.write_manifest()?;

        // Orphaned chunk files only go away once the new manifest is durable.
        for path in empty_chunks {
            if path.exists() {
                let _ = fs::remove_file(&path);
            }
        }
        Ok(())
    }

    /// Replace the whole store: new node set, new registry version, new edge
    /// table. Used by registry migration. Chunk files that no longer exist
    /// in the new layout are removed after the manifest commit.
    pub fn rebuild(
        &mut self,
        defs: &[(NodeId, NodeKind)],
        registry_version: u16,
        edges: &BTreeMap<NodeId, Vec<Synapse>>,
    ) -> StorageResult<()> {
        let old_chunks: Vec<PathBuf> = self
            .chunks
            .iter()
            .map(|&(lo, hi)| self.chunk_path(lo, hi))
            .collect();

        self.index = defs
            .iter()
            .map(|&(id, kind)| (id, IndexEntry::empty(id, kind)))
            .collect();
        self.registry_version = registry_version;
        self.chunks.clear();

        let span = self.chunk_span as u64;
        let mut by_range: BTreeMap<NodeId, BTreeMap<NodeId, Vec<Synapse>>> = BTreeMap::new();
        for (&sender, list) in edges {
            if list.is_empty() || !self.index.contains_key(&sender) {
                continue;
            }
            let lo = (sender / span) * span;
            by_range.entry(lo).or_default().insert(sender, list.clone());
        }
        let mut kept = Vec::new();
        for (&lo, senders) in &by_range {
            let hi = lo + span - 1;
            self.write_chunk(lo, hi, senders)?;
            kept.push(self.chunk_path(lo, hi));
        }

        self.rebuild_chunk_table();
        self.write_manifest()?;

        for path in old_chunks {
            if !kept.contains(&path) && path.exists() {
                let _ = fs::remove_file(&path);
            }
        }
        Ok(())
    }

    /// Write one chunk file and update the index entries of its senders.
    fn write_chunk(
        &mut self,
        lo: NodeId,
        hi: NodeId,
        senders: &BTreeMap<NodeId, Vec<Synapse>>,
    ) -> StorageResult<()> {
        let mut buf = Vec::new();
        let mut offsets: Vec<(NodeId, u64, u32)> = Vec::new();
        for (&sender, list) in senders {
            if list.is_empty() {
                offsets.push((sender, 0, 0));
                continue;
            }
            let mut sorted = list.clone();
            sorted.sort_by_key(|s| s.receiver);
            offsets.push((sender, buf.len() as u64, sorted.len() as u32));
            for syn in &sorted {
                buf.extend_from_slice(&format::encode_chunk_record(syn));
            }
        }

        let path = self.chunk_path(lo, hi);
        let tmp = path.with_extension("bin.tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &path)?;

        for (sender, offset, out_degree) in offsets {
            if let Some(entry) = self.index.get_mut(&sender) {
                entry.offset = offset;
                entry.out_degree = out_degree;
                // chunk_file_index is assigned by rebuild_chunk_table once
                // the full set of non-empty ranges is known.
            }
        }
        Ok(())
    }

    /// Recompute the chunk table from the index and restamp every entry's
    /// `chunk_file_index`. Ranges are ordered ascending, so the assignment
    /// is deterministic across processes.
    fn rebuild_chunk_table(&mut self) {
        let span = self.chunk_span as u64;
        let mut ranges: Vec<(NodeId, NodeId)> = Vec::new();
        for (id, entry) in &self.index {
            if entry.out_degree == 0 {
                continue;
            }
            let lo = (id / span) * span;
            let range = (lo, lo + span - 1);
            if ranges.last() != Some(&range) {
                ranges.push(range);
            }
        }
        self.chunks = ranges;
        for (id, entry) in self.index.iter_mut() {
            if entry.out_degree == 0 {
                entry.chunk_file_index = NO_CHUNK;
                continue;
            }
            let lo = (id / span) * span;
            if let Ok(pos) = self.chunks.binary_search(&(lo, lo + span - 1)) {
                entry.chunk_file_index = pos as u32;
            }
        }
    }

    fn write_manifest(&self) -> StorageResult<()> {
        let header = ManifestHeader {
            format_version: FORMAT_VERSION,
            chunk_span: self.chunk_span,
            node_count: self.index.len() as u32,
            registry_version: self.registry_version,
        };
        let mut buf = Vec::with_capacity(HEADER_LEN + self.index.len() * INDEX_ENTRY_LEN);
        buf.extend_from_slice(&header.encode());
        for entry in self.index.values() {
            buf.extend_from_slice(&entry.encode());
        }

        let path = self.dir.join(BASE_FILE);
        let tmp = self.dir.join("base.bin.tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &path)?;
        sync_dir(&self.dir)?;
        Ok(())
    }

    fn chunk_path(&self, lo: NodeId, hi: NodeId) -> PathBuf {
        self.dir.join(format!("base_{}_{}.bin", lo, hi))
    }

    /// Rechunk a legacy monolithic base: header + index + records appended in
    /// one file, entry offsets absolute into `base.bin`.
    fn migrate_legacy(
        dir: &Path,
        chunk_span: u32,
        raw: &[u8],
        header: ManifestHeader,
    ) -> StorageResult<Self> {
        info!(
            nodes = header.node_count,
            "legacy monolithic base detected, rechunking"
        );
        let mut index = BTreeMap::new();
        let mut pos = HEADER_LEN;
        for _ in 0..header.node_count {
            let entry = IndexEntry::decode(&raw[pos..])?;
            pos += INDEX_ENTRY_LEN;
            index.insert(entry.node_id, entry);
        }

        let mut edges: BTreeMap<NodeId, Vec<Synapse>> = BTreeMap::new();
        let defs: Vec<(NodeId, NodeKind)> = index.iter().map(|(id, e)| (*id, e.kind)).collect();
        for (id, entry) in &index {
            if entry.out_degree == 0 {
                continue;
            }
            let start = entry.offset as usize;
            let end = start + entry.out_degree as usize * CHUNK_RECORD_LEN;
            if end > raw.len() {
                return Err(StorageError::CorruptManifest(format!(
                    "legacy record range for node {} exceeds file",
                    id
                )));
            }
            let mut list = Vec::with_capacity(entry.out_degree as usize);
            for rec in raw[start..end].chunks_exact(CHUNK_RECORD_LEN) {
                list.push(format::decode_chunk_record(rec)?);
            }
            edges.insert(*id, list);
        }

        let mut base = Self {
            dir: dir.to_path_buf(),
            chunk_span,
            registry_version: header.registry_version,
            index: BTreeMap::new(),
            chunks: Vec::new(),
        };
        base.rebuild(&defs, header.registry_version, &edges)?;
        info!(
            nodes = base.index.len(),
            chunks = base.chunks.len(),
            "legacy base rechunked"
        );
        Ok(base)
    }
}

fn sync_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}
