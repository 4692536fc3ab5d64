//! Routed envelope: an owned view of one frame list.
//!
//! Wire order is `stack ++ [payload] ++ return_path ++ [header]`. The header
//! cursor tells where the stack ends, so the payload sits at index `cursor`.
//! Every hop rebuilds the frame list from an owned `Envelope`; nothing is
//! mutated in place across tasks.

use bytes::Bytes;

use crate::error::{CourierError, Result};
use crate::protocol::frames::Frames;
use crate::protocol::header::Header;

/// Identity of a relay, leaf client or logical address on a route.
pub type HopId = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Hops still to be consumed, next hop first.
    pub stack: Vec<HopId>,
    pub payload: Bytes,
    /// Hops back to the sender, nearest first. Only grows on reply-expected sends.
    pub return_path: Vec<HopId>,
    pub header: Header,
}

impl Envelope {
    /// Build an outbound envelope. `header.cursor` is forced to `stack.len()`.
    pub fn new(stack: Vec<HopId>, payload: Bytes, header: Header) -> Result<Self> {
        let mut header = header;
        header.cursor = u8::try_from(stack.len()).map_err(|_| {
            CourierError::InvalidRoute(format!("stack of {} hops exceeds 255", stack.len()))
        })?;
        Ok(Self {
            stack,
            payload,
            return_path: Vec::new(),
            header,
        })
    }

    pub fn from_frames(mut frames: Frames) -> Result<Self> {
        let raw_header = frames
            .pop()
            .ok_or_else(|| CourierError::MalformedEnvelope("empty frame set".into()))?;
        let header = Header::decode(&raw_header)?;

        let cursor = header.cursor as usize;
        if frames.len() <= cursor {
            return Err(CourierError::MalformedEnvelope(format!(
                "cursor {cursor} points past {} frames",
                frames.len()
            )));
        }

        let mut rest = frames.split_off(cursor);
        let return_frames = rest.split_off(1);
        let payload = rest
            .pop()
            .ok_or_else(|| CourierError::MalformedEnvelope("missing payload".into()))?;

        Ok(Self {
            stack: hop_ids(frames)?,
            payload,
            return_path: hop_ids(return_frames)?,
            header,
        })
    }

    pub fn into_frames(self) -> Frames {
        let mut frames = Vec::with_capacity(self.stack.len() + self.return_path.len() + 2);
        frames.extend(self.stack.into_iter().map(Bytes::from));
        frames.push(self.payload);
        frames.extend(self.return_path.into_iter().map(Bytes::from));
        frames.push(self.header.encode());
        frames
    }

    /// Pop every leading `identity` from the stack, one cursor step each.
    /// Returns how many entries were stripped.
    pub fn strip_self(&mut self, identity: &str) -> usize {
        let n = self
            .stack
            .iter()
            .take_while(|hop| hop.as_str() == identity)
            .count();
        if n > 0 {
            self.stack.drain(..n);
            self.header.cursor = self.header.cursor.saturating_sub(n as u8);
        }
        n
    }

    pub fn next_hop(&self) -> Option<&str> {
        self.stack.first().map(String::as_str)
    }

    pub fn arrived(&self) -> bool {
        self.header.cursor == 0
    }
}

fn hop_ids(frames: Frames) -> Result<Vec<HopId>> {
    frames
        .into_iter()
        .map(|f| {
            String::from_utf8(f.to_vec())
                .map_err(|_| CourierError::MalformedEnvelope("hop id is not utf-8".into()))
        })
        .collect()
}
