//! Frame Reassembler
//!
//! Rebuilds complete protocol messages from BLE notification chunks. Each
//! [`Channel`] carries at most one message under reassembly.
//!
//! # Packet headers
//!
//! ```text
//! byte 0 bit 7    : continuation flag. Set => rest of the chunk is payload.
//! byte 0 bits 6-5 : header variant for a new message
//!   00 General : length = byte0[4:0]                    (1 header byte, <= 31)
//!   01 Ext13   : length = byte0[4:0] << 8 | byte1       (2 header bytes, <= 8191)
//!   10 Ext16   : length = byte1 << 8 | byte2            (3 header bytes, <= 65535)
//!   11 reserved
//! ```

use crate::error::ProtocolError;
use crate::infrastructure::bluetooth::protocol::Channel;
use bytes::{BufMut, BytesMut};
use std::collections::HashMap;
use tracing::{trace, warn};

const CONTINUATION_MASK: u8 = 0b1000_0000;
const HEADER_MASK: u8 = 0b0110_0000;
const LENGTH_MASK: u8 = 0b0001_1111;

pub const MAX_GENERAL_LENGTH: usize = 31;
pub const MAX_EXT13_LENGTH: usize = 8191;
pub const MAX_EXT16_LENGTH: usize = 65535;

/// Header variant selected by bits 6-5 of the first byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    General,
    Extended13,
    Extended16,
}

impl HeaderKind {
    fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        match (byte & HEADER_MASK) >> 5 {
            0b00 => Ok(Self::General),
            0b01 => Ok(Self::Extended13),
            0b10 => Ok(Self::Extended16),
            _ => Err(ProtocolError::ReservedHeader(byte)),
        }
    }

    fn header_len(self) -> usize {
        match self {
            Self::General => 1,
            Self::Extended13 => 2,
            Self::Extended16 => 3,
        }
    }

    /// Smallest header able to declare `len` payload bytes
    pub fn for_length(len: usize) -> Option<Self> {
        match len {
            0..=MAX_GENERAL_LENGTH => Some(Self::General),
            0..=MAX_EXT13_LENGTH => Some(Self::Extended13),
            0..=MAX_EXT16_LENGTH => Some(Self::Extended16),
            _ => None,
        }
    }
}

/// Decode the header of a start chunk into (declared length, header size)
fn parse_header(chunk: &[u8]) -> Result<(usize, usize), ProtocolError> {
    let kind = HeaderKind::from_byte(chunk[0])?;
    let header_len = kind.header_len();
    if chunk.len() < header_len {
        return Err(ProtocolError::Truncated {
            needed: header_len,
            available: chunk.len(),
        });
    }

    let length = match kind {
        HeaderKind::General => (chunk[0] & LENGTH_MASK) as usize,
        HeaderKind::Extended13 => (((chunk[0] & LENGTH_MASK) as usize) << 8) | chunk[1] as usize,
        HeaderKind::Extended16 => ((chunk[1] as usize) << 8) | chunk[2] as usize,
    };
    Ok((length, header_len))
}

#[derive(Debug)]
struct PendingMessage {
    buffer: BytesMut,
    bytes_remaining: usize,
}

/// Per-channel reassembly state
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: HashMap<Channel, PendingMessage>,
    discarded_partials: HashMap<Channel, u64>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one notification chunk.
    ///
    /// Returns the complete message payload once the declared length has been
    /// received, `None` while more chunks are needed. Any error resets the
    /// channel; the caller should simply wait for the next start chunk.
    pub fn accumulate(
        &mut self,
        channel: Channel,
        chunk: &[u8],
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        let Some(&first) = chunk.first() else {
            return Ok(None);
        };

        let payload = if first & CONTINUATION_MASK != 0 {
            if !self.pending.contains_key(&channel) {
                warn!(
                    "Dropping {} byte continuation on {:?}: no message in progress",
                    chunk.len(),
                    channel
                );
                return Ok(None);
            }
            &chunk[1..]
        } else {
            if let Some(previous) = self.pending.remove(&channel) {
                *self.discarded_partials.entry(channel).or_default() += 1;
                warn!(
                    "New message on {:?} while {} bytes were still outstanding; partial message discarded",
                    channel, previous.bytes_remaining
                );
            }
            let (length, header_len) = parse_header(chunk)?;
            self.pending.insert(
                channel,
                PendingMessage {
                    buffer: BytesMut::with_capacity(length),
                    bytes_remaining: length,
                },
            );
            &chunk[header_len..]
        };

        let Some(message) = self.pending.get_mut(&channel) else {
            return Ok(None);
        };

        if payload.len() > message.bytes_remaining {
            let extra = payload.len() - message.bytes_remaining;
            self.pending.remove(&channel);
            return Err(ProtocolError::Overrun { extra });
        }

        message.buffer.put_slice(payload);
        message.bytes_remaining -= payload.len();
        trace!(
            "{:?}: +{} bytes, {} remaining",
            channel,
            payload.len(),
            message.bytes_remaining
        );

        if message.bytes_remaining == 0 {
            Ok(self
                .pending
                .remove(&channel)
                .map(|done| done.buffer.to_vec()))
        } else {
            Ok(None)
        }
    }

    /// Bytes still expected on `channel`, if a message is in progress
    pub fn bytes_remaining(&self, channel: Channel) -> Option<usize> {
        self.pending.get(&channel).map(|m| m.bytes_remaining)
    }

    /// How many partial messages were dropped because a new start chunk arrived
    pub fn discarded_partials(&self, channel: Channel) -> u64 {
        self.discarded_partials.get(&channel).copied().unwrap_or(0)
    }

    pub fn reset(&mut self, channel: Channel) {
        self.pending.remove(&channel);
    }

    pub fn reset_all(&mut self) {
        self.pending.clear();
    }
}

/// Split `payload` into notification-sized chunks with the smallest header
/// that can declare its length. Continuation chunks carry a 4-bit counter.
pub fn encode_frames(payload: &[u8], mtu: usize) -> Result<Vec<Vec<u8>>, ProtocolError> {
    let kind = HeaderKind::for_length(payload.len()).ok_or(ProtocolError::Overrun {
        extra: payload.len() - MAX_EXT16_LENGTH,
    })?;
    let mtu = mtu.max(4);
    let len = payload.len();

    let mut first = match kind {
        HeaderKind::General => vec![len as u8],
        HeaderKind::Extended13 => vec![0x20 | (len >> 8) as u8, len as u8],
        HeaderKind::Extended16 => vec![0x40, (len >> 8) as u8, len as u8],
    };
    let take = (mtu - first.len()).min(len);
    first.extend_from_slice(&payload[..take]);

    let mut frames = vec![first];
    for (counter, rest) in payload[take..].chunks(mtu - 1).enumerate() {
        let mut frame = Vec::with_capacity(rest.len() + 1);
        frame.push(CONTINUATION_MASK | (counter as u8 & 0x0F));
        frame.extend_from_slice(rest);
        frames.push(frame);
    }
    Ok(frames)
}
