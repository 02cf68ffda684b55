// Helpers for length-prefixed gateway frames.
//
// Wire layout: [len: u32 BE][payload: len bytes]. Application payloads are
// [command: u32 BE][protobuf body].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;

use super::command::Command;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const LEN_PREFIX: usize = 4;
pub const COMMAND_LEN: usize = 4;

/// Largest payload accepted in either direction.
pub const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    TooLarge(usize),
}

// -----------------------------------------------------------------------------
// ----- Encode ----------------------------------------------------------------

/// Prefix `payload` with its big-endian length. Callers keep payloads within
/// `MAX_FRAME_LEN`; `FramedTransport::send` refuses anything larger.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    debug_assert!(payload.len() <= MAX_FRAME_LEN);
    let mut buf = BytesMut::with_capacity(LEN_PREFIX + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(payload);
    buf.freeze()
}

/// Build an application payload: command code followed by the encoded body.
pub fn pack(command: Command, body: &impl Message) -> Bytes {
    let mut buf = BytesMut::with_capacity(COMMAND_LEN + body.encoded_len());
    buf.put_u32(command.code());
    // BytesMut grows on demand, encoding cannot run out of room.
    let _ = body.encode(&mut buf);
    buf.freeze()
}

/// Application payload with an empty body.
pub fn pack_empty(command: Command) -> Bytes {
    Bytes::copy_from_slice(&command.code().to_be_bytes())
}

// -----------------------------------------------------------------------------
// ----- Decode ----------------------------------------------------------------

/// Split one complete frame off the front of `buf`, returning its payload.
/// Returns `Ok(None)` while the frame is still incomplete.
pub fn try_decode_frame(buf: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
    if buf.len() < LEN_PREFIX {
        return Ok(None);
    }

    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }

    if buf.len() < LEN_PREFIX + len {
        buf.reserve(LEN_PREFIX + len - buf.len());
        return Ok(None);
    }

    buf.advance(LEN_PREFIX);
    Ok(Some(buf.split_to(len).freeze()))
}

/// Read the leading command code of an application payload.
pub fn peek_command(payload: &[u8]) -> Option<u32> {
    if payload.len() < COMMAND_LEN {
        return None;
    }
    Some(u32::from_be_bytes([
        payload[0], payload[1], payload[2], payload[3],
    ]))
}

/// Split an application payload into its command code and body.
pub fn unpack(payload: &Bytes) -> Option<(u32, Bytes)> {
    let code = peek_command(payload)?;
    Some((code, payload.slice(COMMAND_LEN..)))
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------
