//! Error types shared by the protocol engine.
//!
//! Protocol errors are local to one message and are recovered by discarding
//! it. Transport errors drive the session back to `Disconnected`. Neither is
//! ever surfaced to the user as anything worse than "Not Connected".

use crate::infrastructure::bluetooth::protocol::Channel;
use std::time::Duration;
use thiserror::Error;

/// Malformed bytes on the wire. Always fatal to the message being built.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Header bits 6-5 were `0b11`.
    #[error("reserved header variant in byte 0x{0:02X}")]
    ReservedHeader(u8),

    /// A length field claims more bytes than are available.
    #[error("truncated message: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes the length field asked for.
        needed: usize,
        /// Bytes actually left.
        available: usize,
    },

    /// More payload arrived than the header declared.
    #[error("message overrun: {extra} bytes past the declared length")]
    Overrun {
        /// Surplus bytes.
        extra: usize,
    },
}

/// Failures reported by (or while waiting on) the platform BLE stack.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("scan failed: {0}")]
    Scan(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("service discovery failed: {0}")]
    Discover(String),

    #[error("characteristic read failed: {0}")]
    Read(String),

    #[error("characteristic write failed: {0}")]
    Write(String),

    #[error("enabling notifications failed: {0}")]
    Notify(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("no connected camera")]
    NotConnected,
}

/// Errors returned by the session/command engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The camera did not answer on `channel` within the deadline.
    #[error("no response on {channel:?} channel within {timeout:?}")]
    CorrelationTimeout { channel: Channel, timeout: Duration },

    /// The session was torn down while the operation was waiting.
    #[error("session disconnected")]
    Disconnected,

    /// The response arrived but did not have the expected shape.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}
