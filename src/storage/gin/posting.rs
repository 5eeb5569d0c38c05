//! Compressed posting lists.
//!
//! A list is a run of segments. Each segment stores its first heap pointer
//! verbatim, then the byte length of the varint deltas that follow. Deltas are
//! taken between consecutive pointers in their packed `block << 11 | offset`
//! form, so every delta of a well-formed list is positive.

use crate::primitives::bytes::{buf::Cursor, var};
use crate::types::{GinError, HeapPointer, Result, HEAP_POINTER_LEN, MAX_HEAP_OFFSET};

/// Bytes of a segment header: first pointer plus delta byte count.
pub const SEGMENT_HEADER_LEN: usize = HEAP_POINTER_LEN + 2;

/// Default cap on the encoded size of one segment.
pub const DEFAULT_SEGMENT_BYTES: usize = 256;

/// Encodes a strictly increasing list of heap pointers into segments whose
/// encoded size stays within `max_segment_bytes`.
pub fn encode(items: &[HeapPointer], max_segment_bytes: usize) -> Result<Vec<u8>> {
    if max_segment_bytes < SEGMENT_HEADER_LEN {
        return Err(GinError::Invalid("segment size smaller than its header"));
    }
    // Wider offsets would spill into the block bits of the packed form.
    if items.iter().any(|item| item.offset > MAX_HEAP_OFFSET) {
        return Err(GinError::Invalid("heap pointer offset exceeds the packed width"));
    }
    let mut out = Vec::new();
    let mut idx = 0;
    while idx < items.len() {
        let first = items[idx];
        let seg_start = out.len();
        out.extend_from_slice(&[0u8; SEGMENT_HEADER_LEN]);
        first.encode(&mut out[seg_start..seg_start + HEAP_POINTER_LEN]);
        let mut prev = first.to_packed();
        let mut deltas = 0usize;
        idx += 1;
        while idx < items.len() {
            let next = items[idx].to_packed();
            if next <= prev {
                return Err(GinError::Invalid("posting list must be strictly increasing"));
            }
            let delta = next - prev;
            let len = var::encoded_len(delta);
            if SEGMENT_HEADER_LEN + deltas + len > max_segment_bytes || deltas + len > u16::MAX as usize
            {
                break;
            }
            var::encode_u64(delta, &mut out);
            deltas += len;
            prev = next;
            idx += 1;
        }
        let nbytes = deltas as u16;
        out[seg_start + HEAP_POINTER_LEN..seg_start + SEGMENT_HEADER_LEN]
            .copy_from_slice(&nbytes.to_be_bytes());
    }
    Ok(out)
}

/// Decodes every segment in `src`.
///
/// The decoder checks framing only; ordering and pointer validity are left to
/// the caller so that it can report them against page positions.
pub fn decode(src: &[u8]) -> Result<Vec<HeapPointer>> {
    let mut out = Vec::new();
    let mut cursor = Cursor::new(src);
    while cursor.remaining() > 0 {
        let first = HeapPointer::decode(cursor.take(HEAP_POINTER_LEN, "posting segment truncated")?)?;
        let nbytes = cursor.read_u16("posting segment truncated")? as usize;
        let body = cursor.take(nbytes, "posting segment deltas truncated")?;
        out.push(first);
        let mut packed = first.to_packed();
        let mut deltas = Cursor::new(body);
        while deltas.remaining() > 0 {
            let delta = deltas.read_var_u64("posting delta truncated")?;
            packed = packed
                .checked_add(delta)
                .ok_or(GinError::Corruption("posting delta overflows"))?;
            out.push(HeapPointer::from_packed(packed)?);
        }
    }
    Ok(out)
}
