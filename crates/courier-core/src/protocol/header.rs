//! Envelope header (fixed 4 bytes, panic-free).
//!
//! Layout: `[cursor, hop_budget, encoding, flags]`.
//!
//! - `cursor`: stack entries still to be consumed before the payload arrives.
//! - `hop_budget`: forwards left before the envelope is dropped.
//! - `encoding`: payload encoding tag (see [`Encoding`]).
//! - `flags`: one bit per [`Flags`] constant.

use std::ops::BitOr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CourierError, Result};

/// Encoded header length in bytes.
pub const HEADER_LEN: usize = 4;

/// Hop budget used when the sender does not pick one.
pub const DEFAULT_HOP_BUDGET: u8 = 16;

/// Payload encoding tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Encoding {
    #[default]
    Unknown = 0,
    Utf8 = 1,
    Json = 2,
    /// Compact binary serde encoding (postcard).
    Packed = 3,
    Protobuf = 4,
}

impl Encoding {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Encoding::Unknown),
            1 => Some(Encoding::Utf8),
            2 => Some(Encoding::Json),
            3 => Some(Encoding::Packed),
            4 => Some(Encoding::Protobuf),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Unknown => "unknown",
            Encoding::Utf8 => "utf8",
            Encoding::Json => "json",
            Encoding::Packed => "binary-packed",
            Encoding::Protobuf => "protobuf",
        }
    }
}

/// Header flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    /// Receivers append the sender to the return path.
    pub const REPLY_EXPECTED: Flags = Flags(0x01);
    /// The destination decodes the payload before surfacing it.
    pub const AUTO_DECODE: Flags = Flags(0x02);
    pub const IS_RESPONSE: Flags = Flags(0x04);
    pub const DESTINATION_REACHED: Flags = Flags(0x08);
    pub const PAYLOAD_MODIFIED: Flags = Flags(0x10);
    pub const PAYLOAD_CORRUPTED: Flags = Flags(0x20);
    pub const PAYLOAD_ENCRYPTED: Flags = Flags(0x40);
    pub const IGNORE: Flags = Flags(0x80);

    pub const fn from_bits(bits: u8) -> Self {
        Flags(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// Routing header carried as the last frame of every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub cursor: u8,
    pub hop_budget: u8,
    pub encoding: Encoding,
    pub flags: Flags,
}

impl Header {
    pub fn new(cursor: u8, hop_budget: u8, encoding: Encoding, flags: Flags) -> Self {
        Self {
            cursor,
            hop_budget,
            encoding,
            flags,
        }
    }

    /// Default header for a stack of `len` hops.
    pub fn for_stack(len: usize) -> Result<Self> {
        let cursor = u8::try_from(len)
            .map_err(|_| CourierError::InvalidRoute(format!("stack of {len} hops exceeds 255")))?;
        Ok(Self::new(
            cursor,
            DEFAULT_HOP_BUDGET,
            Encoding::Unknown,
            Flags::NONE,
        ))
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags.insert(flags);
        self
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        buf.put_u8(self.cursor);
        buf.put_u8(self.hop_budget);
        buf.put_u8(self.encoding as u8);
        buf.put_u8(self.flags.bits());
        buf.freeze()
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() != HEADER_LEN {
            return Err(CourierError::MalformedHeader(format!(
                "expected {HEADER_LEN} bytes, got {}",
                buf.remaining()
            )));
        }

        let cursor = buf.get_u8();
        let hop_budget = buf.get_u8();
        let tag = buf.get_u8();
        let encoding = Encoding::from_u8(tag)
            .ok_or_else(|| CourierError::MalformedHeader(format!("unknown encoding tag {tag}")))?;
        let flags = Flags::from_bits(buf.get_u8());

        Ok(Self::new(cursor, hop_budget, encoding, flags))
    }
}
