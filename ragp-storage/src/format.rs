// ragp-storage/src/format.rs
// On-disk record layout: little-endian, fixed-width, versioned header

use crate::error::{StorageError, StorageResult};
use crate::types::{NodeId, NodeKind, Synapse, Tick};

/// Manifest magic bytes.
pub const MAGIC: [u8; 4] = *b"RAGP";

/// Current base format version (chunked layout).
pub const FORMAT_VERSION: u16 = 2;

/// Legacy format version: monolithic base.bin with inline synapse records.
pub const LEGACY_FORMAT_VERSION: u16 = 1;

/// Manifest header: magic (4) + format version (2) + chunk span (4) +
/// node count (4) + registry version (2).
pub const HEADER_LEN: usize = 16;

/// Node index entry: node_id (8) + chunk_file_index (4) + offset (8) +
/// out_degree (4) + kind (1).
pub const INDEX_ENTRY_LEN: usize = 25;

/// Chunk record: receiver (8) + weight (4) + tick (4).
pub const CHUNK_RECORD_LEN: usize = 16;

/// Delta payload: sender (8) + receiver (8) + weight (4) + tick (4).
pub const DELTA_PAYLOAD_LEN: usize = 24;

/// Full delta record on disk: len prefix (4) + payload (24) + crc32 (4).
pub const DELTA_RECORD_LEN: usize = 4 + DELTA_PAYLOAD_LEN + 4;

/// Sentinel chunk index for nodes with no outgoing synapses.
pub const NO_CHUNK: u32 = u32::MAX;

/// Decoded manifest header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestHeader {
    pub format_version: u16,
    pub chunk_span: u32,
    pub node_count: u32,
    pub registry_version: u16,
}

impl ManifestHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..6].copy_from_slice(&self.format_version.to_le_bytes());
        buf[6..10].copy_from_slice(&self.chunk_span.to_le_bytes());
        buf[10..14].copy_from_slice(&self.node_count.to_le_bytes());
        buf[14..16].copy_from_slice(&self.registry_version.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> StorageResult<Self> {
        if buf.len() < HEADER_LEN {
            return Err(StorageError::CorruptManifest(format!(
                "manifest too short: {} bytes",
                buf.len()
            )));
        }
        if buf[0..4] != MAGIC {
            return Err(StorageError::CorruptManifest("bad magic".into()));
        }
        let format_version = u16::from_le_bytes([buf[4], buf[5]]);
        let chunk_span = u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]);
        let node_count = u32::from_le_bytes([buf[10], buf[11], buf[12], buf[13]]);
        let registry_version = u16::from_le_bytes([buf[14], buf[15]]);
        if chunk_span == 0 {
            return Err(StorageError::CorruptManifest("zero chunk span".into()));
        }
        Ok(Self {
            format_version,
            chunk_span,
            node_count,
            registry_version,
        })
    }
}

/// Node index entry as stored in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub node_id: NodeId,
    pub chunk_file_index: u32,
    pub offset: u64,
    pub out_degree: u32,
    pub kind: NodeKind,
}

impl IndexEntry {
    /// A registry node with no outgoing synapses yet.
    pub fn empty(node_id: NodeId, kind: NodeKind) -> Self {
        Self {
            node_id,
            chunk_file_index: NO_CHUNK,
            offset: 0,
            out_degree: 0,
            kind,
        }
    }

    pub fn encode(&self) -> [u8; INDEX_ENTRY_LEN] {
        let mut buf = [0u8; INDEX_ENTRY_LEN];
        buf[0..8].copy_from_slice(&self.node_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.chunk_file_index.to_le_bytes());
        buf[12..20].copy_from_slice(&self.offset.to_le_bytes());
        buf[20..24].copy_from_slice(&self.out_degree.to_le_bytes());
        buf[24] = self.kind.as_u8();
        buf
    }

    pub fn decode(buf: &[u8]) -> StorageResult<Self> {
        if buf.len() < INDEX_ENTRY_LEN {
            return Err(StorageError::CorruptManifest(
                "truncated node index entry".into(),
            ));
        }
        let node_id = u64::from_le_bytes(buf[0..8].try_into().unwrap_or_default());
        let chunk_file_index = u32::from_le_bytes(buf[8..12].try_into().unwrap_or_default());
        let offset = u64::from_le_bytes(buf[12..20].try_into().unwrap_or_default());
        let out_degree = u32::from_le_bytes(buf[20..24].try_into().unwrap_or_default());
        let kind = NodeKind::from_u8(buf[24]).ok_or_else(|| {
            StorageError::CorruptManifest(format!("invalid node kind {} for node {}", buf[24], node_id))
        })?;
        Ok(Self {
            node_id,
            chunk_file_index,
            offset,
            out_degree,
            kind,
        })
    }
}

/// Encode one chunk record.
pub fn encode_chunk_record(syn: &Synapse) -> [u8; CHUNK_RECORD_LEN] {
    let mut buf = [0u8; CHUNK_RECORD_LEN];
    buf[0..8].copy_from_slice(&syn.receiver.to_le_bytes());
    buf[8..12].copy_from_slice(&syn.weight.to_le_bytes());
    buf[12..16].copy_from_slice(&syn.tick.to_le_bytes());
    buf
}

/// Decode one chunk record.
pub fn decode_chunk_record(buf: &[u8]) -> StorageResult<Synapse> {
    if buf.len() < CHUNK_RECORD_LEN {
        return Err(StorageError::CorruptManifest("truncated chunk record".into()));
    }
    Ok(Synapse {
        receiver: u64::from_le_bytes(buf[0..8].try_into().unwrap_or_default()),
        weight: f32::from_le_bytes(buf[8..12].try_into().unwrap_or_default()),
        tick: u32::from_le_bytes(buf[12..16].try_into().unwrap_or_default()),
    })
}

/// Encode a delta record with its length prefix and CRC32 over the payload.
pub fn encode_delta_record(
    sender: NodeId,
    receiver: NodeId,
    weight: f32,
    tick: Tick,
) -> [u8; DELTA_RECORD_LEN] {
    let mut payload = [0u8; DELTA_PAYLOAD_LEN];
    payload[0..8].copy_from_slice(&sender.to_le_bytes());
    payload[8..16].copy_from_slice(&receiver.to_le_bytes());
    payload[16..20].copy_from_slice(&weight.to_le_bytes());
    payload[20..24].copy_from_slice(&tick.to_le_bytes());
    let crc = crc32fast::hash(&payload);

    let mut buf = [0u8; DELTA_RECORD_LEN];
    buf[0..4].copy_from_slice(&((DELTA_PAYLOAD_LEN + 4) as u32).to_le_bytes());
    buf[4..4 + DELTA_PAYLOAD_LEN].copy_from_slice(&payload);
    buf[4 + DELTA_PAYLOAD_LEN..].copy_from_slice(&crc.to_le_bytes());
    buf
}

/// A delta record decoded during replay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaRecord {
    pub sender: NodeId,
    pub receiver: NodeId,
    pub weight: f32,
    pub tick: Tick,
}

/// Try to decode the delta record starting at `buf`. Returns `None` when the
/// framing or CRC disagrees; the caller truncates the log at that point.
pub fn decode_delta_record(buf: &[u8]) -> Option<DeltaRecord> {
    if buf.len() < DELTA_RECORD_LEN {
        return None;
    }
    let len = u32::from_le_bytes(buf[0..4].try_into().ok()?) as usize;
    if len != DELTA_PAYLOAD_LEN + 4 {
        return None;
    }
    let payload = &buf[4..4 + DELTA_PAYLOAD_LEN];
    let stored_crc = u32::from_le_bytes(buf[4 + DELTA_PAYLOAD_LEN..DELTA_RECORD_LEN].try_into().ok()?);
    if crc32fast::hash(payload) != stored_crc {
        return None;
    }
    Some(DeltaRecord {
        sender: u64::from_le_bytes(payload[0..8].try_into().ok()?),
        receiver: u64::from_le_bytes(payload[8..16].try_into().ok()?),
        weight: f32::from_le_bytes(payload[16..20].try_into().ok()?),
        tick: u32::from_le_bytes(payload[20..24].try_into().ok()?),
    })
}
