//! Frame-set packets (panic-free).
//!
//! A frame set is an ordered list of opaque byte frames. On a link it is
//! written as one packet:
//!
//! ```text
//! u16 frame_count | (u32 len | bytes) * frame_count
//! ```
//!
//! Links prefix each packet with its own `u32` length; that prefix is not
//! part of this codec.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CourierError, Result};

/// Ordered frames of one routed message.
pub type Frames = Vec<Bytes>;

pub fn encode_frames(frames: &[Bytes]) -> Result<Bytes> {
    let count = u16::try_from(frames.len())
        .map_err(|_| CourierError::MalformedEnvelope(format!("{} frames", frames.len())))?;

    let body: usize = frames.iter().map(|f| 4 + f.len()).sum();
    let mut buf = BytesMut::with_capacity(2 + body);
    buf.put_u16(count);
    for f in frames {
        let len = u32::try_from(f.len())
            .map_err(|_| CourierError::MalformedEnvelope("frame exceeds u32".into()))?;
        buf.put_u32(len);
        buf.put_slice(f);
    }
    Ok(buf.freeze())
}

pub fn decode_frames(mut buf: Bytes) -> Result<Frames> {
    if buf.remaining() < 2 {
        return Err(CourierError::MalformedEnvelope("packet too short".into()));
    }

    let count = buf.get_u16() as usize;
    let mut frames = Vec::with_capacity(count);
    for i in 0..count {
        if buf.remaining() < 4 {
            return Err(CourierError::MalformedEnvelope(format!(
                "frame {i}: missing length"
            )));
        }
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(CourierError::MalformedEnvelope(format!(
                "frame {i}: declared {len} bytes, {} left",
                buf.remaining()
            )));
        }
        frames.push(buf.split_to(len));
    }

    if buf.has_remaining() {
        return Err(CourierError::MalformedEnvelope(format!(
            "{} trailing bytes",
            buf.remaining()
        )));
    }
    Ok(frames)
}
