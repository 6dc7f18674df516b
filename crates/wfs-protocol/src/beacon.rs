//! Binary tracking-beacon decoder (PSN-style chunked packets).
//!
//! Trackers announce themselves over multicast UDP with a little-endian
//! chunk tree: a root data-packet chunk containing a packet header and a
//! tracker-list chunk, which in turn holds one chunk per tracker id with
//! position and orientation subchunks. Only the subset this rig consumes
//! (position + orientation) is decoded; unknown chunks are skipped.
//!
//! Chunk header (4 bytes LE): id:u16, then data_len:15 bits and a
//! has-subchunks flag in the top bit.

/// Root chunk id of a beacon data packet
pub const CHUNK_DATA_PACKET: u16 = 0x6755;
/// Subchunks of the data packet
pub const CHUNK_PACKET_HEADER: u16 = 0x0000;
pub const CHUNK_TRACKER_LIST: u16 = 0x0001;
/// Subchunks of each tracker entry
pub const CHUNK_TRACKER_POS: u16 = 0x0000;
pub const CHUNK_TRACKER_ORI: u16 = 0x0002;

#[derive(Debug, Clone, PartialEq)]
pub struct BeaconTracker {
    pub id: u16,
    pub pos: Option<[f32; 3]>,
    pub ori: Option<[f32; 3]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeaconPacket {
    pub timestamp_us: u64,
    pub frame_id: u8,
    pub trackers: Vec<BeaconTracker>,
}

struct ChunkHeader {
    id: u16,
    data_len: usize,
    has_subchunks: bool,
}

fn read_header(data: &[u8], offset: usize) -> Option<(ChunkHeader, usize)> {
    if offset + 4 > data.len() {
        return None;
    }
    let id = u16::from_le_bytes([data[offset], data[offset + 1]]);
    let raw = u16::from_le_bytes([data[offset + 2], data[offset + 3]]);
    let header = ChunkHeader {
        id,
        data_len: (raw & 0x7FFF) as usize,
        has_subchunks: raw & 0x8000 != 0,
    };
    Some((header, offset + 4))
}

fn read_f32_le(data: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn decode_tracker(id: u16, data: &[u8]) -> BeaconTracker {
    let mut tracker = BeaconTracker {
        id,
        pos: None,
        ori: None,
    };

    let mut offset = 0;
    while let Some((header, body)) = read_header(data, offset) {
        let end = body + header.data_len;
        if end > data.len() {
            break;
        }
        match header.id {
            CHUNK_TRACKER_POS if header.data_len >= 12 => {
                tracker.pos = Some([
                    read_f32_le(data, body),
                    read_f32_le(data, body + 4),
                    read_f32_le(data, body + 8),
                ]);
            }
            CHUNK_TRACKER_ORI if header.data_len >= 12 => {
                tracker.ori = Some([
                    read_f32_le(data, body),
                    read_f32_le(data, body + 4),
                    read_f32_le(data, body + 8),
                ]);
            }
            _ => {}
        }
        offset = end;
    }

    tracker
}

fn decode_tracker_list(data: &[u8], trackers: &mut Vec<BeaconTracker>) {
    let mut offset = 0;
    while let Some((header, body)) = read_header(data, offset) {
        let end = body + header.data_len;
        if end > data.len() {
            break;
        }
        if header.has_subchunks {
            trackers.push(decode_tracker(header.id, &data[body..end]));
        }
        offset = end;
    }
}

/// Decode one beacon datagram. Returns None on anything that is not a
/// well-formed data packet; a malformed tracker entry only loses itself.
pub fn decode_packet(data: &[u8]) -> Option<BeaconPacket> {
    let (root, body) = read_header(data, 0)?;
    if root.id != CHUNK_DATA_PACKET || !root.has_subchunks {
        return None;
    }
    let root_end = body + root.data_len;
    if root_end > data.len() {
        return None;
    }

    let mut packet = BeaconPacket {
        timestamp_us: 0,
        frame_id: 0,
        trackers: Vec::new(),
    };

    let mut offset = body;
    while let Some((header, chunk_body)) = read_header(data, offset) {
        let end = chunk_body + header.data_len;
        if end > root_end {
            break;
        }
        match header.id {
            CHUNK_PACKET_HEADER if header.data_len >= 12 => {
                packet.timestamp_us = u64::from_le_bytes([
                    data[chunk_body],
                    data[chunk_body + 1],
                    data[chunk_body + 2],
                    data[chunk_body + 3],
                    data[chunk_body + 4],
                    data[chunk_body + 5],
                    data[chunk_body + 6],
                    data[chunk_body + 7],
                ]);
                packet.frame_id = data[chunk_body + 10];
            }
            CHUNK_TRACKER_LIST => {
                decode_tracker_list(&data[chunk_body..end], &mut packet.trackers);
            }
            _ => {}
        }
        offset = end;
    }

    Some(packet)
}

// ── Encoding (test tooling and the flood generator) ─────────────────────

fn write_header(buf: &mut Vec<u8>, id: u16, data_len: usize, has_subchunks: bool) {
    buf.extend_from_slice(&id.to_le_bytes());
    let mut raw = (data_len as u16) & 0x7FFF;
    if has_subchunks {
        raw |= 0x8000;
    }
    buf.extend_from_slice(&raw.to_le_bytes());
}

pub fn encode_packet(packet: &BeaconPacket) -> Vec<u8> {
    // Header chunk body: timestamp(8) + version(2) + frame_id(1) + frame_count(1)
    let mut header_body = Vec::with_capacity(12);
    header_body.extend_from_slice(&packet.timestamp_us.to_le_bytes());
    header_body.push(2);
    header_body.push(0);
    header_body.push(packet.frame_id);
    header_body.push(1);

    let mut list_body = Vec::new();
    for tracker in &packet.trackers {
        let mut tracker_body = Vec::new();
        if let Some(pos) = tracker.pos {
            write_header(&mut tracker_body, CHUNK_TRACKER_POS, 12, false);
            for axis in pos {
                tracker_body.extend_from_slice(&axis.to_le_bytes());
            }
        }
        if let Some(ori) = tracker.ori {
            write_header(&mut tracker_body, CHUNK_TRACKER_ORI, 12, false);
            for axis in ori {
                tracker_body.extend_from_slice(&axis.to_le_bytes());
            }
        }
        write_header(&mut list_body, tracker.id, tracker_body.len(), true);
        list_body.extend_from_slice(&tracker_body);
    }

    let root_len = 4 + header_body.len() + 4 + list_body.len();
    let mut buf = Vec::with_capacity(4 + root_len);
    write_header(&mut buf, CHUNK_DATA_PACKET, root_len, true);
    write_header(&mut buf, CHUNK_PACKET_HEADER, header_body.len(), false);
    buf.extend_from_slice(&header_body);
    write_header(&mut buf, CHUNK_TRACKER_LIST, list_body.len(), true);
    buf.extend_from_slice(&list_body);
    buf
}
