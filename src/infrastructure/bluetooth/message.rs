//! Message Decoder
//!
//! Turns a reassembled payload into a typed response. The layout is decided by
//! the channel the payload arrived on:
//!
//! ```text
//! byte 0      : command / query id
//! byte 1      : status (0 = success)
//! Complex     : (len, value[len])*          command and setting responses
//! Query       : (id, len, value[len])*      query responses
//! ```

use crate::error::ProtocolError;
use crate::infrastructure::bluetooth::protocol::Channel;
use std::collections::BTreeMap;

/// Command acknowledgement: an ordered list of parameter blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexResponse {
    pub id: u8,
    pub status: u8,
    pub values: Vec<Vec<u8>>,
}

/// Settings or status dump keyed by id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    pub id: u8,
    pub status: u8,
    pub values: BTreeMap<u8, Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Complex(ComplexResponse),
    Query(QueryResponse),
}

impl Message {
    pub fn decode(channel: Channel, buf: &[u8]) -> Result<Self, ProtocolError> {
        match channel {
            Channel::Command | Channel::Setting => decode_complex(buf).map(Self::Complex),
            Channel::Query => decode_query(buf).map(Self::Query),
        }
    }

    pub fn id(&self) -> u8 {
        match self {
            Self::Complex(r) => r.id,
            Self::Query(r) => r.id,
        }
    }

    pub fn status(&self) -> u8 {
        match self {
            Self::Complex(r) => r.status,
            Self::Query(r) => r.status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == 0
    }
}

fn split_header(buf: &[u8]) -> Result<(u8, u8, &[u8]), ProtocolError> {
    match buf {
        [id, status, rest @ ..] => Ok((*id, *status, rest)),
        _ => Err(ProtocolError::Truncated {
            needed: 2,
            available: buf.len(),
        }),
    }
}

fn take(rest: &[u8], len: usize) -> Result<(&[u8], &[u8]), ProtocolError> {
    if rest.len() < len {
        return Err(ProtocolError::Truncated {
            needed: len,
            available: rest.len(),
        });
    }
    Ok(rest.split_at(len))
}

pub fn decode_complex(buf: &[u8]) -> Result<ComplexResponse, ProtocolError> {
    let (id, status, mut rest) = split_header(buf)?;
    let mut values = Vec::new();

    while let Some((&len, tail)) = rest.split_first() {
        let (value, tail) = take(tail, len as usize)?;
        values.push(value.to_vec());
        rest = tail;
    }

    Ok(ComplexResponse { id, status, values })
}

pub fn decode_query(buf: &[u8]) -> Result<QueryResponse, ProtocolError> {
    let (id, status, mut rest) = split_header(buf)?;
    let mut values = BTreeMap::new();

    while !rest.is_empty() {
        let (header, tail) = take(rest, 2)?;
        let (value, tail) = take(tail, header[1] as usize)?;
        values.insert(header[0], value.to_vec());
        rest = tail;
    }

    Ok(QueryResponse { id, status, values })
}

/// Inverse of [`decode_query`], used to build framed test traffic
pub fn encode_query(response: &QueryResponse) -> Vec<u8> {
    let mut buf = vec![response.id, response.status];
    for (id, value) in &response.values {
        buf.push(*id);
        buf.push(value.len() as u8);
        buf.extend_from_slice(value);
    }
    buf
}
