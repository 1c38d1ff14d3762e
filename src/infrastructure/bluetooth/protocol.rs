//! GoPro BLE Protocol
//!
//! This module contains the GATT identifiers and the fixed command opcodes
//! for the camera's control-and-query service.

use crate::domain::time_sync::CameraClock;
use uuid::Uuid;

/// 16-bit GoPro service advertised by every camera (0xFEA6 on the BT base UUID)
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_fea6_0000_1000_8000_0080_5f9b_34fb);

/// Camera WiFi AP SSID. Readable only once the link is encrypted.
pub const WIFI_AP_SSID_UUID: Uuid = gopro_uuid(0x0002);

/// Camera WiFi AP password. Reading it triggers pairing on a fresh link.
pub const WIFI_AP_PASSWORD_UUID: Uuid = gopro_uuid(0x0003);

pub const COMMAND_UUID: Uuid = gopro_uuid(0x0072);
pub const COMMAND_RESPONSE_UUID: Uuid = gopro_uuid(0x0073);
pub const SETTING_UUID: Uuid = gopro_uuid(0x0074);
pub const SETTING_RESPONSE_UUID: Uuid = gopro_uuid(0x0075);
pub const QUERY_UUID: Uuid = gopro_uuid(0x0076);
pub const QUERY_RESPONSE_UUID: Uuid = gopro_uuid(0x0077);

/// Every proprietary characteristic is `b5f9XXXX-aa8d-11e3-9046-0002a5d5c51b`
const fn gopro_uuid(short: u16) -> Uuid {
    Uuid::from_u128(0xb5f9_0000_aa8d_11e3_9046_0002_a5d5_c51b | ((short as u128) << 96))
}

/// Command ids echoed back as byte 0 of a response
pub mod command_id {
    pub const SET_DATE_TIME: u8 = 0x0D;
    pub const GET_DATE_TIME: u8 = 0x0E;
    pub const GET_SETTINGS: u8 = 0x12;
    pub const GET_STATUS: u8 = 0x13;
}

/// A logical request/response characteristic pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Command,
    Setting,
    Query,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Command, Channel::Setting, Channel::Query];

    /// Characteristic the host writes requests to
    pub fn write_uuid(self) -> Uuid {
        match self {
            Self::Command => COMMAND_UUID,
            Self::Setting => SETTING_UUID,
            Self::Query => QUERY_UUID,
        }
    }

    /// Characteristic the camera notifies responses on
    pub fn response_uuid(self) -> Uuid {
        match self {
            Self::Command => COMMAND_RESPONSE_UUID,
            Self::Setting => SETTING_RESPONSE_UUID,
            Self::Query => QUERY_RESPONSE_UUID,
        }
    }

    /// Map a notifying characteristic back to its channel.
    /// Returns `None` for anything outside the GoPro service (e.g. battery).
    pub fn from_response_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.response_uuid() == uuid)
    }
}

/// Camera control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraCommand {
    /// Start encoding
    ShutterOn,
    /// Stop encoding
    ShutterOff,
    /// Tag the current moment in the clip
    AddHighlight,
    /// Put the camera to sleep
    PowerOff,
    /// Prevent the camera from dropping an idle link
    KeepAlive,
    /// Dump every setting
    GetSettings,
    /// Dump every status
    GetStatus,
    GetTime,
    SetTime(CameraClock),
    SetSetting { setting_id: u8, option_code: u8 },
    /// Camera busy, encoding, video time remaining, battery level
    StatusDigest,
    /// Resolution, fps and lens. The fps and lens ids depend on the generation.
    SettingsDigest { fps_id: u8, lens_id: u8 },
}

impl CameraCommand {
    /// Get the raw bytes for this command
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::ShutterOn => vec![0x03, 0x01, 0x01, 0x01],
            Self::ShutterOff => vec![0x03, 0x01, 0x01, 0x00],
            Self::AddHighlight => vec![0x01, 0x18],
            Self::PowerOff => vec![0x01, 0x05],
            Self::KeepAlive => vec![0x03, 0x5B, 0x01, 0x42],
            Self::GetSettings => vec![0x01, command_id::GET_SETTINGS],
            Self::GetStatus => vec![0x01, command_id::GET_STATUS],
            Self::GetTime => vec![0x01, command_id::GET_DATE_TIME],
            Self::SetTime(clock) => {
                let [year_hi, year_lo] = clock.year.to_be_bytes();
                vec![
                    0x09,
                    command_id::SET_DATE_TIME,
                    0x07,
                    year_hi,
                    year_lo,
                    clock.month,
                    clock.day,
                    clock.hour,
                    clock.minute,
                    clock.second,
                ]
            }
            Self::SetSetting {
                setting_id,
                option_code,
            } => vec![0x03, *setting_id, 0x01, *option_code],
            Self::StatusDigest => vec![0x05, command_id::GET_STATUS, 0x08, 0x0A, 0x23, 0x46],
            Self::SettingsDigest { fps_id, lens_id } => {
                vec![0x04, command_id::GET_SETTINGS, 0x02, *fps_id, *lens_id]
            }
        }
    }

    /// Id the camera echoes in byte 0 of the matching response
    pub fn response_id(&self) -> u8 {
        self.encode()[1]
    }

    /// Channel the command is written to
    pub fn channel(&self) -> Channel {
        match self {
            Self::ShutterOn
            | Self::ShutterOff
            | Self::AddHighlight
            | Self::PowerOff
            | Self::GetTime
            | Self::SetTime(_) => Channel::Command,
            Self::KeepAlive | Self::SetSetting { .. } => Channel::Setting,
            Self::GetSettings
            | Self::GetStatus
            | Self::StatusDigest
            | Self::SettingsDigest { .. } => Channel::Query,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_characteristic_uuids() {
        assert_eq!(
            COMMAND_UUID.to_string(),
            "b5f90072-aa8d-11e3-9046-0002a5d5c51b"
        );
        assert_eq!(
            WIFI_AP_PASSWORD_UUID.to_string(),
            "b5f90003-aa8d-11e3-9046-0002a5d5c51b"
        );
        assert_eq!(
            SERVICE_UUID.to_string(),
            "0000fea6-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_response_channel_lookup() {
        assert_eq!(
            Channel::from_response_uuid(QUERY_RESPONSE_UUID),
            Some(Channel::Query)
        );
        assert_eq!(Channel::from_response_uuid(QUERY_UUID), None);
    }

    #[test]
    fn test_command_bytes() {
        assert_eq!(CameraCommand::ShutterOn.encode(), [0x03, 0x01, 0x01, 0x01]);
        assert_eq!(CameraCommand::ShutterOff.encode(), [0x03, 0x01, 0x01, 0x00]);
        assert_eq!(CameraCommand::AddHighlight.encode(), [0x01, 0x18]);
        assert_eq!(CameraCommand::PowerOff.encode(), [0x01, 0x05]);
        assert_eq!(CameraCommand::KeepAlive.encode(), [0x03, 0x5B, 0x01, 0x42]);
        assert_eq!(CameraCommand::KeepAlive.channel(), Channel::Setting);
        assert_eq!(CameraCommand::GetStatus.encode(), [0x01, 0x13]);
        assert_eq!(CameraCommand::GetTime.channel(), Channel::Command);
        assert_eq!(CameraCommand::GetTime.response_id(), command_id::GET_DATE_TIME);
        assert_eq!(CameraCommand::StatusDigest.response_id(), command_id::GET_STATUS);
    }

    #[test]
    fn test_set_time_is_big_endian_year() {
        let clock = CameraClock {
            year: 2024,
            month: 6,
            day: 1,
            hour: 12,
            minute: 30,
            second: 5,
        };
        assert_eq!(
            CameraCommand::SetTime(clock).encode(),
            [0x09, 0x0D, 0x07, 0x07, 0xE8, 6, 1, 12, 30, 5]
        );
    }
}
