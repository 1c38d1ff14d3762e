//! Positional parser for the digest queries.
//!
//! The camera answers a targeted query with its ids in ascending order, so a
//! response of known shape can be read at fixed offsets instead of walking
//! the TLV triples. Status digest on a HERO11+:
//!
//! ```text
//! offset  0  1  2  3  4    5  6  7    8  9  10..13   14 15 16
//!        13 00 08 01 busy 0A 01 enc  23 04 vid_time 46 01 battery
//! ```
//!
//! A response whose length or id bytes do not match is handed back to the
//! caller, which resets the generation and decodes it the slow way.

use crate::domain::generation::Generation;
use crate::infrastructure::bluetooth::protocol::{command_id, CameraCommand};
use std::collections::BTreeMap;

const STATUS_BUSY: u8 = 8;
const STATUS_ENCODING: u8 = 10;
const STATUS_VIDEO_TIME_REMAINING: u8 = 35;
const STATUS_BATTERY_LEVEL: u8 = 70;
const SETTING_RESOLUTION: u8 = 2;

/// Expected `(id, value width)` slots of a digest response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastPathLayout {
    command: CameraCommand,
    response_id: u8,
    slots: Vec<(u8, usize)>,
}

impl FastPathLayout {
    fn new(command: CameraCommand, response_id: u8, mut slots: Vec<(u8, usize)>) -> Self {
        slots.sort_by_key(|(id, _)| *id);
        Self {
            command,
            response_id,
            slots,
        }
    }

    pub fn status_digest() -> Self {
        Self::new(
            CameraCommand::StatusDigest,
            command_id::GET_STATUS,
            vec![
                (STATUS_BUSY, 1),
                (STATUS_ENCODING, 1),
                (STATUS_VIDEO_TIME_REMAINING, 4),
                (STATUS_BATTERY_LEVEL, 1),
            ],
        )
    }

    pub fn settings_digest(generation: Generation) -> Self {
        let (fps_id, lens_id) = generation.digest_setting_ids();
        Self::new(
            CameraCommand::SettingsDigest { fps_id, lens_id },
            command_id::GET_SETTINGS,
            vec![(SETTING_RESOLUTION, 1), (fps_id, 1), (lens_id, 1)],
        )
    }

    /// The query that produces this layout
    pub fn command(&self) -> CameraCommand {
        self.command
    }

    pub fn response_id(&self) -> u8 {
        self.response_id
    }

    /// Total buffer length, header included
    pub fn expected_len(&self) -> usize {
        2 + self.slots.iter().map(|(_, width)| 2 + width).sum::<usize>()
    }

    /// Read the values at their fixed offsets.
    /// `None` when the buffer is not exactly this layout.
    pub fn parse(&self, buf: &[u8]) -> Option<BTreeMap<u8, Vec<u8>>> {
        if buf.len() != self.expected_len() || buf[0] != self.response_id {
            return None;
        }

        let mut values = BTreeMap::new();
        let mut offset = 2;
        for &(id, width) in &self.slots {
            if buf[offset] != id || buf[offset + 1] as usize != width {
                return None;
            }
            let start = offset + 2;
            values.insert(id, buf[start..start + width].to_vec());
            offset = start + width;
        }
        Some(values)
    }
}

/// The four statuses polled while recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusDigest {
    pub busy: bool,
    pub encoding: bool,
    pub video_time_remaining: u32,
    pub battery_level: u8,
}

impl StatusDigest {
    pub fn from_values(values: &BTreeMap<u8, Vec<u8>>) -> Option<Self> {
        let flag = |id: u8| values.get(&id).and_then(|v| v.first()).map(|b| *b != 0);
        let video_time = values.get(&STATUS_VIDEO_TIME_REMAINING)?;
        let video_time: [u8; 4] = video_time.as_slice().try_into().ok()?;

        Some(Self {
            busy: flag(STATUS_BUSY)?,
            encoding: flag(STATUS_ENCODING)?,
            video_time_remaining: u32::from_be_bytes(video_time),
            battery_level: *values.get(&STATUS_BATTERY_LEVEL)?.first()?,
        })
    }
}
