// Wire header for cross-host stream traffic: `(magic, stream_id,
// from_worker, to_worker, num_items, first_item_offset, typecode?,
// payload_len, payload)` per spec §4.5/§6. A zero-length payload with
// `num_items == 0` is the terminator that closes a `(stream_id,
// from_worker)` queue at the receiver.

use crate::error::ThrillError;
use crate::Result;

pub const STREAM_MAGIC: u32 = 0x5448_524c; // "THRL"

#[derive(Debug, Clone, Copy)]
pub struct WireHeader {
    pub stream_id: u64,
    pub from_worker: u32,
    pub to_worker: u32,
    pub num_items: u64,
    pub first_item_offset: u32,
    pub payload_len: u32,
    pub typecode: Option<u8>,
}

pub fn encode_frame(header: &WireHeader, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32 + payload.len());
    buf.extend_from_slice(&STREAM_MAGIC.to_le_bytes());
    buf.extend_from_slice(&header.stream_id.to_le_bytes());
    buf.extend_from_slice(&header.from_worker.to_le_bytes());
    buf.extend_from_slice(&header.to_worker.to_le_bytes());
    buf.extend_from_slice(&header.num_items.to_le_bytes());
    buf.extend_from_slice(&header.first_item_offset.to_le_bytes());
    buf.extend_from_slice(&header.payload_len.to_le_bytes());
    match header.typecode {
        Some(t) => {
            buf.push(1);
            buf.push(t);
        }
        None => {
            buf.push(0);
            buf.push(0);
        }
    }
    buf.extend_from_slice(payload);
    buf
}

/// Decodes the header prefix of `frame`, returning the header and a slice
/// over the remaining payload bytes.
pub fn decode_frame(frame: &[u8]) -> Result<(WireHeader, &[u8])> {
    const HEADER_LEN: usize = 4 + 8 + 4 + 4 + 8 + 4 + 4 + 2;
    if frame.len() < HEADER_LEN {
        return Err(ThrillError::Stream("frame shorter than header".into()));
    }
    let mut pos = 0;
    let mut take = |n: usize| {
        let s = &frame[pos..pos + n];
        pos += n;
        s
    };
    let magic = u32::from_le_bytes(take(4).try_into().unwrap());
    if magic != STREAM_MAGIC {
        return Err(ThrillError::Stream(format!("bad frame magic {magic:#x}")));
    }
    let stream_id = u64::from_le_bytes(take(8).try_into().unwrap());
    let from_worker = u32::from_le_bytes(take(4).try_into().unwrap());
    let to_worker = u32::from_le_bytes(take(4).try_into().unwrap());
    let num_items = u64::from_le_bytes(take(8).try_into().unwrap());
    let first_item_offset = u32::from_le_bytes(take(4).try_into().unwrap());
    let payload_len = u32::from_le_bytes(take(4).try_into().unwrap());
    let has_typecode = take(1)[0] != 0;
    let typecode_byte = take(1)[0];
    let typecode = if has_typecode { Some(typecode_byte) } else { None };

    let payload = &frame[pos..];
    if payload.len() != payload_len as usize {
        return Err(ThrillError::Stream("payload_len mismatch".into()));
    }

    Ok((
        WireHeader {
            stream_id,
            from_worker,
            to_worker,
            num_items,
            first_item_offset,
            payload_len,
            typecode,
        },
        payload,
    ))
}
