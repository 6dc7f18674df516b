//! OSC 1.0-subset wire codec.
//!
//! Supported argument types: int32 (`i`), float32 (`f`), string (`s`),
//! blob (`b`) and the argument-less booleans (`T`/`F`). Everything is
//! big-endian and padded so each field starts on a 4-byte boundary.
//! Unsupported type tags with a known payload size are skipped so the
//! remaining arguments keep their positions; a tag whose size cannot be
//! known stops argument extraction for that message.

use thiserror::Error;

/// Leading 8 bytes of every OSC bundle
pub const BUNDLE_MAGIC: &[u8; 8] = b"#bundle\0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed OSC address")]
    MalformedAddress,
    #[error("packet truncated")]
    Truncated,
}

/// A single typed OSC argument.
#[derive(Debug, Clone, PartialEq)]
pub enum OscValue {
    Int(i32),
    Float(f32),
    Str(String),
    Blob(Vec<u8>),
    Bool(bool),
}

impl OscValue {
    /// Numeric coercion: peers send int32 or float32 interchangeably.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            OscValue::Int(v) => Some(*v as f32),
            OscValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            OscValue::Int(v) => Some(*v),
            OscValue::Float(v) => Some(*v as i32),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OscValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub addr: String,
    pub args: Vec<OscValue>,
}

impl OscMessage {
    pub fn new(addr: impl Into<String>, args: Vec<OscValue>) -> Self {
        Self {
            addr: addr.into(),
            args,
        }
    }
}

/// An ordered group of messages and/or nested bundles. The time tag is
/// carried verbatim; no scheduling is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct OscBundle {
    pub time_tag: u64,
    pub content: Vec<OscPacket>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OscPacket {
    Message(OscMessage),
    Bundle(OscBundle),
}

// ── Encoding ────────────────────────────────────────────────────────────

fn write_padded_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

pub fn encode_message(msg: &OscMessage) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    write_padded_str(&mut buf, &msg.addr);

    let mut tags = String::with_capacity(msg.args.len() + 1);
    tags.push(',');
    for arg in &msg.args {
        tags.push(match arg {
            OscValue::Int(_) => 'i',
            OscValue::Float(_) => 'f',
            OscValue::Str(_) => 's',
            OscValue::Blob(_) => 'b',
            OscValue::Bool(true) => 'T',
            OscValue::Bool(false) => 'F',
        });
    }
    write_padded_str(&mut buf, &tags);

    for arg in &msg.args {
        match arg {
            OscValue::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
            OscValue::Float(v) => buf.extend_from_slice(&v.to_be_bytes()),
            OscValue::Str(s) => write_padded_str(&mut buf, s),
            OscValue::Blob(b) => {
                buf.extend_from_slice(&(b.len() as i32).to_be_bytes());
                buf.extend_from_slice(b);
                while buf.len() % 4 != 0 {
                    buf.push(0);
                }
            }
            // T/F carry no argument bytes
            OscValue::Bool(_) => {}
        }
    }

    buf
}

pub fn encode_bundle(bundle: &OscBundle) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128);
    buf.extend_from_slice(BUNDLE_MAGIC);
    buf.extend_from_slice(&bundle.time_tag.to_be_bytes());
    for element in &bundle.content {
        let bytes = encode_packet(element);
        buf.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
        buf.extend_from_slice(&bytes);
    }
    buf
}

pub fn encode_packet(packet: &OscPacket) -> Vec<u8> {
    match packet {
        OscPacket::Message(msg) => encode_message(msg),
        OscPacket::Bundle(bundle) => encode_bundle(bundle),
    }
}

// ── Decoding ────────────────────────────────────────────────────────────

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).ok_or(CodecError::Truncated)?;
        if end > self.data.len() {
            return Err(CodecError::Truncated);
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_i32(&mut self) -> Result<i32, CodecError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_f32(&mut self) -> Result<f32, CodecError> {
        let b = self.take(4)?;
        Ok(f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Advance to the next 4-byte boundary (relative to the packet start).
    fn align(&mut self) -> Result<(), CodecError> {
        let aligned = (self.pos + 3) & !3;
        if aligned > self.data.len() {
            return Err(CodecError::Truncated);
        }
        self.pos = aligned;
        Ok(())
    }

    /// Read a NUL-terminated, 4-byte-padded string as raw bytes.
    fn read_str_bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::Truncated)?;
        let bytes = &rest[..nul];
        self.pos += nul + 1;
        self.align()?;
        Ok(bytes)
    }
}

fn validate_address(bytes: &[u8]) -> Result<String, CodecError> {
    let addr = std::str::from_utf8(bytes).map_err(|_| CodecError::MalformedAddress)?;
    if !addr.starts_with('/') || addr.len() < 2 {
        return Err(CodecError::MalformedAddress);
    }
    Ok(addr.to_string())
}

pub fn decode_message(data: &[u8]) -> Result<OscMessage, CodecError> {
    let mut r = Reader::new(data);

    let addr = validate_address(r.read_str_bytes()?)?;

    // Legacy peers omit the type tag string entirely
    if r.at_end() {
        return Ok(OscMessage { addr, args: vec![] });
    }

    let tag_bytes = r.read_str_bytes()?;
    let mut args = Vec::new();

    // A tag string not starting with ',' carries no extractable arguments
    if tag_bytes.first() != Some(&b',') {
        return Ok(OscMessage { addr, args });
    }

    for &tag in &tag_bytes[1..] {
        match tag {
            b'i' => args.push(OscValue::Int(r.read_i32()?)),
            b'f' => args.push(OscValue::Float(r.read_f32()?)),
            b's' => {
                let bytes = r.read_str_bytes()?;
                args.push(OscValue::Str(String::from_utf8_lossy(bytes).to_string()));
            }
            b'b' => {
                let len = r.read_i32()?;
                if len < 0 {
                    return Err(CodecError::Truncated);
                }
                let bytes = r.take(len as usize)?.to_vec();
                r.align()?;
                args.push(OscValue::Blob(bytes));
            }
            b'T' => args.push(OscValue::Bool(true)),
            b'F' => args.push(OscValue::Bool(false)),
            // Unsupported tags with a known payload size: skip the bytes,
            // omit the argument, keep later argument positions intact
            b'h' | b't' | b'd' => {
                r.read_u64()?;
            }
            b'c' | b'r' | b'm' => {
                r.read_i32()?;
            }
            b'S' => {
                r.read_str_bytes()?;
            }
            b'N' | b'I' | b'[' | b']' => {}
            // Unknown size: stop extracting, deliver what we have
            _ => break,
        }
    }

    Ok(OscMessage { addr, args })
}

pub fn decode_bundle(data: &[u8]) -> Result<OscBundle, CodecError> {
    let mut r = Reader::new(data);

    let magic = r.take(8)?;
    if magic != BUNDLE_MAGIC {
        return Err(CodecError::MalformedAddress);
    }
    let time_tag = r.read_u64()?;

    let mut content = Vec::new();
    while !r.at_end() {
        let size = r.read_i32()?;
        if size < 0 {
            return Err(CodecError::Truncated);
        }
        let element = r.take(size as usize)?;
        content.push(decode_packet(element)?);
    }

    Ok(OscBundle { time_tag, content })
}

/// Decode a self-delimiting packet, sniffing the bundle magic.
pub fn decode_packet(data: &[u8]) -> Result<OscPacket, CodecError> {
    if data.len() >= 8 && &data[..8] == BUNDLE_MAGIC {
        Ok(OscPacket::Bundle(decode_bundle(data)?))
    } else {
        Ok(OscPacket::Message(decode_message(data)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_roundtrip_all_types() {
        let msg = OscMessage::new(
            "/wfs/input/positionX",
            vec![
                OscValue::Int(3),
                OscValue::Float(1.25),
                OscValue::Str("label".to_string()),
                OscValue::Blob(vec![0xDE, 0xAD, 0xBE]),
                OscValue::Bool(true),
                OscValue::Bool(false),
            ],
        );

        let bytes = encode_message(&msg);
        assert_eq!(bytes.len() % 4, 0);

        let decoded = decode_message(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_message_no_args() {
        let msg = OscMessage::new("/remoteInput/disconnect", vec![]);
        let bytes = encode_message(&msg);
        let decoded = decode_message(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_decode_known_bytes() {
        // "/test" + ",i" + int32 42, canonical padding
        let bytes = b"/test\0\0\0,i\0\0\0\0\0\x2a";
        let msg = decode_message(bytes).unwrap();
        assert_eq!(msg.addr, "/test");
        assert_eq!(msg.args, vec![OscValue::Int(42)]);
    }

    #[test]
    fn test_reject_bad_address() {
        let msg = OscMessage::new("nope", vec![]);
        let bytes = encode_message(&msg);
        assert_eq!(decode_message(&bytes), Err(CodecError::MalformedAddress));

        let root_only = encode_message(&OscMessage::new("/", vec![]));
        assert_eq!(
            decode_message(&root_only),
            Err(CodecError::MalformedAddress)
        );
    }

    #[test]
    fn test_reject_truncated() {
        let msg = OscMessage::new("/wfs/input/gain", vec![OscValue::Int(1), OscValue::Float(0.5)]);
        let bytes = encode_message(&msg);

        for cut in 1..bytes.len() {
            let result = decode_message(&bytes[..bytes.len() - cut]);
            // Every prefix either fails or yields fewer args, never garbage
            if let Ok(m) = result {
                assert_eq!(m.addr, "/wfs/input/gain");
                assert!(m.args.len() < 2 || m == msg);
            }
        }

        // Declared blob larger than the buffer
        let blob = encode_message(&OscMessage::new("/b", vec![OscValue::Blob(vec![1, 2, 3, 4])]));
        assert_eq!(
            decode_message(&blob[..blob.len() - 4]),
            Err(CodecError::Truncated)
        );
    }

    #[test]
    fn test_unknown_tag_skipped_by_size() {
        // ",hif": 'h' (int64) is unsupported but has a known 8-byte payload;
        // the int and float after it must decode at their right positions.
        let mut bytes = Vec::new();
        write_padded_str(&mut bytes, "/trk");
        write_padded_str(&mut bytes, ",hif");
        bytes.extend_from_slice(&77u64.to_be_bytes());
        bytes.extend_from_slice(&5i32.to_be_bytes());
        bytes.extend_from_slice(&2.5f32.to_be_bytes());

        let msg = decode_message(&bytes).unwrap();
        assert_eq!(msg.args, vec![OscValue::Int(5), OscValue::Float(2.5)]);
    }

    #[test]
    fn test_unknowable_tag_stops_extraction() {
        let mut bytes = Vec::new();
        write_padded_str(&mut bytes, "/x");
        write_padded_str(&mut bytes, ",i?i");
        bytes.extend_from_slice(&1i32.to_be_bytes());
        bytes.extend_from_slice(&2i32.to_be_bytes());
        bytes.extend_from_slice(&3i32.to_be_bytes());

        let msg = decode_message(&bytes).unwrap();
        assert_eq!(msg.args, vec![OscValue::Int(1)]);
    }

    #[test]
    fn test_bundle_roundtrip() {
        let bundle = OscBundle {
            time_tag: 0x0123_4567_89AB_CDEF,
            content: vec![
                OscPacket::Message(OscMessage::new(
                    "/wfs/input/gain",
                    vec![OscValue::Int(2), OscValue::Float(-6.0)],
                )),
                OscPacket::Message(OscMessage::new("/wfs/masterGain", vec![OscValue::Float(0.0)])),
            ],
        };

        let bytes = encode_bundle(&bundle);
        assert_eq!(&bytes[..8], BUNDLE_MAGIC);

        let decoded = decode_bundle(&bytes).unwrap();
        assert_eq!(decoded, bundle);
    }

    #[test]
    fn test_nested_bundle_roundtrip() {
        let inner = OscBundle {
            time_tag: 1,
            content: vec![OscPacket::Message(OscMessage::new(
                "/wfs/input/mute",
                vec![OscValue::Int(0), OscValue::Bool(true)],
            ))],
        };
        let outer = OscBundle {
            time_tag: 2,
            content: vec![
                OscPacket::Bundle(inner),
                OscPacket::Message(OscMessage::new("/wfs/stageWidth", vec![OscValue::Float(24.0)])),
            ],
        };

        let bytes = encode_bundle(&outer);
        let decoded = decode_bundle(&bytes).unwrap();
        assert_eq!(decoded, outer);
    }

    #[test]
    fn test_packet_sniffs_bundle_magic() {
        let msg_bytes = encode_message(&OscMessage::new("/a/b", vec![]));
        assert!(matches!(
            decode_packet(&msg_bytes).unwrap(),
            OscPacket::Message(_)
        ));

        let bundle_bytes = encode_bundle(&OscBundle {
            time_tag: 0,
            content: vec![],
        });
        assert!(matches!(
            decode_packet(&bundle_bytes).unwrap(),
            OscPacket::Bundle(_)
        ));
    }

    #[test]
    fn test_truncated_bundle_element() {
        let mut bytes = encode_bundle(&OscBundle {
            time_tag: 0,
            content: vec![OscPacket::Message(OscMessage::new("/a/b", vec![]))],
        });
        // Lie about the element size (low byte of the big-endian size field)
        bytes[19] = 0x7F;
        assert_eq!(decode_bundle(&bytes), Err(CodecError::Truncated));
    }
}
