use crate::domain::generation::Generation;
use crate::domain::media::MediaAction;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub enum AppEvent {
    ConnectionStatus(ConnectionStatus),
    DeviceFound(ScannedDevice),
    GenerationDetected(Generation),
    /// A settings or status response was applied to the snapshot
    CameraUpdated,
    LogMessage(StatusMessage),
}

/// Commands accepted by the session supervisor
#[derive(Debug, Clone)]
pub enum RemoteCommand {
    StartRecording,
    StopRecording { power_off_after: bool },
    AddHighlight,
    /// Power off when connected, wake and reconnect otherwise
    TogglePower,
    ApplySettings(BTreeMap<String, String>),
    SetTarget(String),
    Media(MediaAction),
    Disconnect,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    DiscoveringCharacteristics,
    Ready,
    AwaitingResponse,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Ready | Self::AwaitingResponse)
    }
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedDevice {
    pub name: String,
    pub address: u64,
    pub signal_strength: i16,
}

/// Raw and formatted camera state as last reported
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraSnapshot {
    pub generation: Generation,
    pub settings: BTreeMap<String, String>,
    pub statuses: BTreeMap<String, String>,
}

impl CameraSnapshot {
    pub fn is_encoding(&self) -> bool {
        self.statuses.get("encoding").map(String::as_str) == Some("true")
    }
}
