//! In-memory transport for tests and dry runs.
//!
//! Records every write and answers scripted requests with framed
//! notifications, so the whole engine can run without a radio.

use crate::domain::models::ScannedDevice;
use crate::error::{ProtocolError, TransportError};
use crate::infrastructure::bluetooth::protocol::{self, CameraCommand};
use crate::infrastructure::bluetooth::reassembler::encode_frames;
use crate::infrastructure::bluetooth::transport::{BleTransport, TransportEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Notification MTU used when framing scripted replies
pub const MOCK_MTU: usize = 20;

const MOCK_WIFI_PASSWORD: &[u8] = b"mock-pass";

#[derive(Default)]
struct MockState {
    devices: Vec<ScannedDevice>,
    characteristics: Vec<Uuid>,
    reads: HashMap<Uuid, Vec<u8>>,
    replies: HashMap<Vec<u8>, (Uuid, Vec<Vec<u8>>)>,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    writes: Vec<(Uuid, Vec<u8>)>,
    notifications_enabled: Vec<Uuid>,
    connect_attempts: Vec<u64>,
    fail_writes: bool,
    scanning: bool,
}

pub struct MockTransport {
    state: Mutex<MockState>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A camera-less transport exposing the full GoPro characteristic set
    pub fn new() -> Self {
        let state = MockState {
            characteristics: vec![
                protocol::WIFI_AP_SSID_UUID,
                protocol::WIFI_AP_PASSWORD_UUID,
                protocol::COMMAND_UUID,
                protocol::COMMAND_RESPONSE_UUID,
                protocol::SETTING_UUID,
                protocol::SETTING_RESPONSE_UUID,
                protocol::QUERY_UUID,
                protocol::QUERY_RESPONSE_UUID,
            ],
            reads: HashMap::from([(protocol::WIFI_AP_PASSWORD_UUID, MOCK_WIFI_PASSWORD.to_vec())]),
            ..MockState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn with_device(self, name: &str, address: u64) -> Self {
        self.lock().devices.push(ScannedDevice {
            name: name.to_string(),
            address,
            signal_strength: -60,
        });
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Answer every future write of `command` with `payload`, framed at [`MOCK_MTU`]
    pub fn reply_to(&self, command: CameraCommand, payload: &[u8]) -> Result<(), ProtocolError> {
        let frames = encode_frames(payload, MOCK_MTU)?;
        self.reply_with_frames(command, frames);
        Ok(())
    }

    /// Answer every future write of `command` with raw notification chunks
    pub fn reply_with_frames(&self, command: CameraCommand, frames: Vec<Vec<u8>>) {
        let uuid = command.channel().response_uuid();
        self.lock().replies.insert(command.encode(), (uuid, frames));
    }

    /// Push a notification chunk as if the camera sent it
    pub fn notify(&self, characteristic: Uuid, value: &[u8]) {
        if let Some(events) = &self.lock().events {
            let _ = events.send(TransportEvent::Notification {
                characteristic,
                value: value.to_vec(),
            });
        }
    }

    /// Simulate the camera dropping the link
    pub fn drop_link(&self) {
        if let Some(events) = self.lock().events.take() {
            let _ = events.send(TransportEvent::Disconnected);
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn remove_characteristic(&self, characteristic: Uuid) {
        self.lock().characteristics.retain(|c| *c != characteristic);
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.lock().writes.clone()
    }

    /// Written payloads only, in order
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().writes.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    pub fn notifications_enabled(&self) -> Vec<Uuid> {
        self.lock().notifications_enabled.clone()
    }

    pub fn connect_attempts(&self) -> Vec<u64> {
        self.lock().connect_attempts.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().events.is_some()
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().scanning
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    async fn start_scan(
        &self,
        sink: mpsc::UnboundedSender<ScannedDevice>,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.scanning = true;
        for device in &state.devices {
            let _ = sink.send(device.clone());
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.lock().scanning = false;
        Ok(())
    }

    async fn connect(
        &self,
        address: u64,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError> {
        let mut state = self.lock();
        state.connect_attempts.push(address);
        if !state.devices.iter().any(|d| d.address == address) {
            return Err(TransportError::Connect(format!(
                "no device at {:#X}",
                address
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.events = Some(tx);
        state.notifications_enabled.clear();
        Ok(rx)
    }

    async fn discover_services(&self) -> Result<Vec<Uuid>, TransportError> {
        let state = self.lock();
        if state.events.is_none() {
            return Err(TransportError::NotConnected);
        }
        Ok(state.characteristics.clone())
    }

    async fn read_characteristic(&self, characteristic: Uuid) -> Result<Vec<u8>, TransportError> {
        self.lock()
            .reads
            .get(&characteristic)
            .cloned()
            .ok_or_else(|| TransportError::Read(format!("{} is not readable", characteristic)))
    }

    async fn write_characteristic(
        &self,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.events.is_none() {
            return Err(TransportError::NotConnected);
        }
        if state.fail_writes {
            return Err(TransportError::Write("write rejected".to_string()));
        }
        state.writes.push((characteristic, value.to_vec()));

        if let Some((uuid, frames)) = state.replies.get(value) {
            if let Some(events) = &state.events {
                for frame in frames {
                    let _ = events.send(TransportEvent::Notification {
                        characteristic: *uuid,
                        value: frame.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn enable_notification(&self, characteristic: Uuid) -> Result<(), TransportError> {
        let mut state = self.lock();
        if !state.characteristics.contains(&characteristic) {
            return Err(TransportError::Notify(format!("{} not found", characteristic)));
        }
        state.notifications_enabled.push(characteristic);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(events) = self.lock().events.take() {
            let _ = events.send(TransportEvent::Disconnected);
        }
        Ok(())
    }
}
