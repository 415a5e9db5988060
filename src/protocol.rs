//! Wire protocol codec (C3, spec §4.3).
//!
//! Two fixed-size packet layouts, distinguished solely by the received
//! byte length. Ported from `ProtocolPacketV1`/`ProtocolPacketV2` in
//! `original_source/renderd.py`.
//!
//! Integers are encoded/decoded in the host's native byte order, matching
//! the reference implementation (which packs native `int32`s). This is
//! the spot to switch to `to_le_bytes`/`from_le_bytes` if this daemon
//! ever needs to interoperate across hosts of differing endianness
//! (spec §9 "Endianness").

use std::io;
use std::sync::Arc;

use crate::coord::TileCoord;
use crate::error::{RenderdError, RenderdResult};

/// V1 packet size: 5 native `i32`s.
pub const V1_LEN: usize = 20;
/// V2 packet size: 5 native `i32`s + 41-byte style field + 3 bytes padding.
pub const V2_LEN: usize = 64;
/// Style field width on the wire (NUL-terminated/padded); the reference's
/// `struct` format is `"5i41sxxx"` — 41 bytes for the name, not 40 as the
/// summary in spec §4.3 rounds it to (40-byte *content* limit + NUL).
const STYLE_FIELD_LEN: usize = 41;
/// Maximum printable style name length (spec §3).
pub const MAX_STYLE_LEN: usize = 40;

pub const DEFAULT_STYLE: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Command {
    Ignore = 0,
    Render = 1,
    Dirty = 2,
    Done = 3,
    NotDone = 4,
}

impl Command {
    fn from_i32(v: i32) -> RenderdResult<Self> {
        match v {
            0 => Ok(Command::Ignore),
            1 => Ok(Command::Render),
            2 => Ok(Command::Dirty),
            3 => Ok(Command::Done),
            4 => Ok(Command::NotDone),
            other => Err(RenderdError::Protocol(format!("unknown command {other}"))),
        }
    }
}

/// Protocol variant a packet was decoded as — responses echo the same
/// variant as the request (spec §4.3 "Outbound rule").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    V1,
    V2,
}

/// A socket a response can be written back to. Implemented over the real
/// `UnixStream` by the server; a request holds this as a handle, never
/// as owned state (spec §9 "Cyclic ownership" — origin socket is a weak
/// reference).
pub trait ResponseSink: Send + Sync {
    fn write_response(&self, bytes: &[u8]) -> io::Result<()>;
}

/// A decoded request, ready for scheduler admission.
pub struct Request {
    pub variant: Variant,
    pub command: Command,
    pub coord: TileCoord,
    pub style: String,
    pub origin: Arc<dyn ResponseSink>,
}

impl Request {
    pub fn metatile_key(&self) -> crate::coord::MetatileKey {
        self.coord.metatile_key(&self.style)
    }

    pub fn is_bad_request(&self) -> bool {
        self.coord.is_bad_request()
    }

    /// Send a `Done`/`NotDone` response, in this request's own variant.
    /// Errors writing to a peer that already closed the socket are
    /// swallowed (spec §4.3 "Outbound rule" / §7).
    pub fn respond(&self, status: Command) {
        let bytes = encode_response(self.variant, status, &self.coord, &self.style);
        if let Err(e) = self.origin.write_response(&bytes) {
            if !is_broken_pipe(&e) {
                eprintln!("[PROTOCOL] write error on response: {e}");
            }
        }
    }
}

fn is_broken_pipe(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected | io::ErrorKind::InvalidInput
    )
}

/// Decode a packet of exactly `V1_LEN` or `V2_LEN` bytes. Any other length
/// is a malformed packet — the caller should close the connection.
pub fn decode(data: &[u8], origin: Arc<dyn ResponseSink>) -> RenderdResult<Option<Request>> {
    match data.len() {
        V1_LEN => decode_v1(data, origin).map(Some),
        V2_LEN => decode_v2(data, origin).map(Some),
        0 => Ok(None),
        other => Err(RenderdError::Protocol(format!(
            "invalid packet length {other}"
        ))),
    }
}

fn read_i32(data: &[u8], offset: usize) -> i32 {
    i32::from_ne_bytes(data[offset..offset + 4].try_into().unwrap())
}

fn decode_v1(data: &[u8], origin: Arc<dyn ResponseSink>) -> RenderdResult<Request> {
    let version = read_i32(data, 0);
    if version != 1 {
        return Err(RenderdError::Protocol(format!(
            "V1 packet with incorrect version {version}"
        )));
    }
    let command = Command::from_i32(read_i32(data, 4))?;
    let x = read_i32(data, 8) as i64;
    let y = read_i32(data, 12) as i64;
    let z = read_i32(data, 16) as u32;

    Ok(Request {
        variant: Variant::V1,
        command,
        coord: TileCoord::new(z, x, y),
        style: DEFAULT_STYLE.to_string(),
        origin,
    })
}

fn decode_v2(data: &[u8], origin: Arc<dyn ResponseSink>) -> RenderdResult<Request> {
    let version = read_i32(data, 0);
    if version != 2 {
        return Err(RenderdError::Protocol(format!(
            "V2 packet with incorrect version {version}"
        )));
    }
    let command = Command::from_i32(read_i32(data, 4))?;
    let x = read_i32(data, 8) as i64;
    let y = read_i32(data, 12) as i64;
    let z = read_i32(data, 16) as u32;

    let style_bytes = &data[20..20 + STYLE_FIELD_LEN];
    let nul = style_bytes.iter().position(|&b| b == 0).unwrap_or(style_bytes.len());
    let style = String::from_utf8_lossy(&style_bytes[..nul]).into_owned();

    Ok(Request {
        variant: Variant::V2,
        command,
        coord: TileCoord::new(z, x, y),
        style,
        origin,
    })
}

/// Encode a response packet in the given variant.
pub fn encode_response(
    variant: Variant,
    status: Command,
    coord: &TileCoord,
    style: &str,
) -> Vec<u8> {
    match variant {
        Variant::V1 => encode_v1(status, coord),
        Variant::V2 => encode_v2(status, coord, style),
    }
}

fn encode_v1(status: Command, coord: &TileCoord) -> Vec<u8> {
    let mut out = Vec::with_capacity(V1_LEN);
    out.extend_from_slice(&1i32.to_ne_bytes());
    out.extend_from_slice(&(status as i32).to_ne_bytes());
    out.extend_from_slice(&(coord.x as i32).to_ne_bytes());
    out.extend_from_slice(&(coord.y as i32).to_ne_bytes());
    out.extend_from_slice(&(coord.z as i32).to_ne_bytes());
    out
}

fn encode_v2(status: Command, coord: &TileCoord, style: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(V2_LEN);
    out.extend_from_slice(&2i32.to_ne_bytes());
    out.extend_from_slice(&(status as i32).to_ne_bytes());
    out.extend_from_slice(&(coord.x as i32).to_ne_bytes());
    out.extend_from_slice(&(coord.y as i32).to_ne_bytes());
    out.extend_from_slice(&(coord.z as i32).to_ne_bytes());

    let mut style_field = [0u8; STYLE_FIELD_LEN];
    let name_bytes = style.as_bytes();
    let n = name_bytes.len().min(STYLE_FIELD_LEN - 1);
    style_field[..n].copy_from_slice(&name_bytes[..n]);
    out.extend_from_slice(&style_field);
    out.extend_from_slice(&[0u8; 3]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink(Mutex<Vec<u8>>);
    impl ResponseSink for RecordingSink {
        fn write_response(&self, bytes: &[u8]) -> io::Result<()> {
            self.0.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        }
    }

    fn encode_v1_request(command: Command, x: i32, y: i32, z: i32) -> Vec<u8> {
        let mut out = Vec::with_capacity(V1_LEN);
        out.extend_from_slice(&1i32.to_ne_bytes());
        out.extend_from_slice(&(command as i32).to_ne_bytes());
        out.extend_from_slice(&x.to_ne_bytes());
        out.extend_from_slice(&y.to_ne_bytes());
        out.extend_from_slice(&z.to_ne_bytes());
        out
    }

    #[test]
    fn decodes_v1_with_default_style() {
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let data = encode_v1_request(Command::Render, 511, 340, 10);
        let req = decode(&data, sink).unwrap().unwrap();
        assert_eq!(req.variant, Variant::V1);
        assert_eq!(req.command, Command::Render);
        assert_eq!(req.style, "default");
        assert_eq!(req.coord.x, 511);
        assert_eq!(req.coord.y, 340);
        assert_eq!(req.coord.z, 10);
    }

    #[test]
    fn decodes_v2_with_style_name() {
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let data = encode_v2(Command::Render, &TileCoord::new(3, 5, 5), "alt");
        assert_eq!(data.len(), V2_LEN);
        let req = decode(&data, sink).unwrap().unwrap();
        assert_eq!(req.variant, Variant::V2);
        assert_eq!(req.style, "alt");
    }

    #[test]
    fn zero_length_is_clean_close() {
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        assert!(decode(&[], sink).unwrap().is_none());
    }

    #[test]
    fn bad_length_is_error() {
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        assert!(decode(&[0u8; 7], sink).is_err());
    }

    #[test]
    fn respond_writes_same_variant() {
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let data = encode_v1_request(Command::Render, 1, 2, 3);
        let req = decode(&data, sink.clone()).unwrap().unwrap();
        req.respond(Command::Done);
        let written = sink.0.lock().unwrap().clone();
        assert_eq!(written.len(), V1_LEN);
        assert_eq!(read_i32(&written, 4), Command::Done as i32);
    }
}
