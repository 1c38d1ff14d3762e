//! Camera Session
//!
//! Owns one link to one camera and turns high-level operations into framed
//! writes, then correlates the notifications that come back.
//!
//! ```text
//! Disconnected -> Connecting -> DiscoveringCharacteristics -> Ready
//!                                                             |  ^
//!                                              request written v  | response / timeout
//!                                                        AwaitingResponse
//! ```
//!
//! Any transport failure drops the session back to `Disconnected` and fails
//! every waiter. At most one request is outstanding per channel: operations
//! are serialized by an async lock, so a response can always be matched to
//! the request on its channel.

use crate::domain::dictionary::{self, SettingsTable};
use crate::domain::generation::{self, Generation, ResponseShape};
use crate::domain::models::{
    AppEvent, CameraSnapshot, ConnectionStatus, MessageSeverity, ScannedDevice, StatusMessage,
};
use crate::domain::settings::BleTimings;
use crate::domain::time_sync::{CameraClock, TimeCheck};
use crate::error::{EngineError, ProtocolError, TransportError};
use crate::infrastructure::bluetooth::fast_path::{FastPathLayout, StatusDigest};
use crate::infrastructure::bluetooth::message::{Message, QueryResponse};
use crate::infrastructure::bluetooth::protocol::{self, command_id, CameraCommand, Channel};
use crate::infrastructure::bluetooth::reassembler::Reassembler;
use crate::infrastructure::bluetooth::transport::{BleTransport, TransportEvent};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Setting id / option code written when a name or label is not in the tables
pub const FALLBACK_CODE: u8 = 0x01;

/// Characteristics a camera must expose before the session is usable
const REQUIRED_CHARACTERISTICS: [Uuid; 6] = [
    protocol::WIFI_AP_PASSWORD_UUID,
    protocol::COMMAND_UUID,
    protocol::COMMAND_RESPONSE_UUID,
    protocol::SETTING_UUID,
    protocol::QUERY_UUID,
    protocol::QUERY_RESPONSE_UUID,
];

/// Response characteristics subscribed after pairing
const NOTIFY_CHARACTERISTICS: [Uuid; 2] =
    [protocol::COMMAND_RESPONSE_UUID, protocol::QUERY_RESPONSE_UUID];

/// Timeouts applied to each transport step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    pub discover_timeout: Duration,
    pub pairing_timeout: Duration,
    pub notify_timeout: Duration,
    pub write_timeout: Duration,
    pub response_timeout: Duration,
}

impl SessionConfig {
    pub fn from_timings(timings: &BleTimings) -> Self {
        Self {
            connect_timeout: Duration::from_millis(timings.connect_timeout_ms),
            discover_timeout: Duration::from_millis(timings.discover_timeout_ms),
            pairing_timeout: Duration::from_millis(timings.pairing_timeout_ms),
            notify_timeout: Duration::from_millis(timings.notify_timeout_ms),
            write_timeout: Duration::from_millis(timings.write_timeout_ms),
            response_timeout: Duration::from_millis(timings.response_timeout_ms),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_timings(&BleTimings::default())
    }
}

struct PendingRequest {
    response_id: u8,
    layout: Option<FastPathLayout>,
    reply: oneshot::Sender<Message>,
}

#[derive(Default)]
struct SessionState {
    status: ConnectionStatus,
    device: Option<ScannedDevice>,
    generation: Generation,
    reassembler: Reassembler,
    raw_settings: BTreeMap<u8, Vec<u8>>,
    raw_statuses: BTreeMap<u8, Vec<u8>>,
    snapshot: CameraSnapshot,
    last_time_check: Option<TimeCheck>,
    pending: HashMap<Channel, PendingRequest>,
}

impl SessionState {
    /// Table used to name setting ids. Falls back to the dump markers while
    /// the generation is still unknown.
    fn settings_table(&self) -> SettingsTable {
        if self.generation.is_known() {
            return self.generation.settings_table();
        }
        SettingsTable::from_dump_ids(self.raw_settings.keys().copied())
            .unwrap_or(SettingsTable::Legacy)
    }
}

pub struct CameraSession {
    transport: Arc<dyn BleTransport>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    operation: tokio::sync::Mutex<()>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

async fn with_timeout<T, F>(
    operation: &'static str,
    timeout: Duration,
    future: F,
) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout { operation, timeout }),
    }
}

fn expect_query(message: Message) -> Result<QueryResponse, EngineError> {
    match message {
        Message::Query(response) => Ok(response),
        Message::Complex(response) => Err(EngineError::UnexpectedResponse(format!(
            "command response {:#04X} on the query channel",
            response.id
        ))),
    }
}

/// Pause after writing a setting before the next one is accepted
pub fn settle_delay(name: &str, value: &str) -> Duration {
    if name == "resolution" && value.starts_with('5') {
        Duration::from_millis(1000)
    } else {
        Duration::from_millis(300)
    }
}

impl CameraSession {
    pub fn new(
        transport: Arc<dyn BleTransport>,
        config: SessionConfig,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            transport,
            config,
            state: Mutex::new(SessionState::default()),
            operation: tokio::sync::Mutex::new(()),
            event_sender,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: AppEvent) {
        let _ = self.event_sender.send(event);
    }

    fn send_log(&self, message: impl Into<String>, severity: MessageSeverity) {
        self.emit(AppEvent::LogMessage(StatusMessage {
            message: message.into(),
            severity,
        }));
    }

    fn set_status(&self, status: ConnectionStatus) {
        let previous = std::mem::replace(&mut self.lock_state().status, status);
        if previous != status {
            debug!("Session {:?} -> {:?}", previous, status);
            self.emit(AppEvent::ConnectionStatus(status));
        }
    }

    /// AwaitingResponse -> Ready, leaving any other state alone
    fn settle_ready(&self) {
        let settled = {
            let mut state = self.lock_state();
            let settled = state.status == ConnectionStatus::AwaitingResponse;
            if settled {
                state.status = ConnectionStatus::Ready;
            }
            settled
        };
        if settled {
            self.emit(AppEvent::ConnectionStatus(ConnectionStatus::Ready));
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.lock_state().status
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    pub fn generation(&self) -> Generation {
        self.lock_state().generation
    }

    pub fn snapshot(&self) -> CameraSnapshot {
        self.lock_state().snapshot.clone()
    }

    pub fn device(&self) -> Option<ScannedDevice> {
        self.lock_state().device.clone()
    }

    pub fn last_time_check(&self) -> Option<TimeCheck> {
        self.lock_state().last_time_check
    }

    /// Partial messages thrown away on `channel` because a new start chunk arrived
    pub fn discarded_partials(&self, channel: Channel) -> u64 {
        self.lock_state().reassembler.discarded_partials(channel)
    }

    /// Open the link, pair and subscribe. The returned receiver must be fed to
    /// [`CameraSession::run_events`] for responses to be delivered.
    pub async fn connect(
        &self,
        device: &ScannedDevice,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, EngineError> {
        let _operation = self.operation.lock().await;
        info!("Connecting to {} ({:#X})", device.name, device.address);
        self.send_log(format!("Connecting to {}...", device.name), MessageSeverity::Info);
        self.set_status(ConnectionStatus::Connecting);

        match self.establish(device).await {
            Ok(events) => {
                {
                    let mut state = self.lock_state();
                    state.device = Some(device.clone());
                    state.generation = Generation::Unknown;
                    state.reassembler.reset_all();
                }
                self.set_status(ConnectionStatus::Ready);
                info!("Connected to {}", device.name);
                self.send_log(format!("Connected to {}", device.name), MessageSeverity::Success);
                Ok(events)
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", device.name, e);
                let _ = self.transport.disconnect().await;
                self.mark_disconnected();
                self.send_log(format!("Connection failed: {}", e), MessageSeverity::Error);
                Err(e.into())
            }
        }
    }

    async fn establish(
        &self,
        device: &ScannedDevice,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError> {
        // Step 1: Open the link
        let events = with_timeout(
            "connect",
            self.config.connect_timeout,
            self.transport.connect(device.address),
        )
        .await?;

        // Step 2: Discover the GoPro service
        self.set_status(ConnectionStatus::DiscoveringCharacteristics);
        let found = with_timeout(
            "service discovery",
            self.config.discover_timeout,
            self.transport.discover_services(),
        )
        .await?;
        let missing: Vec<String> = REQUIRED_CHARACTERISTICS
            .iter()
            .filter(|uuid| !found.contains(*uuid))
            .map(Uuid::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(TransportError::Discover(format!(
                "missing characteristics: {}",
                missing.join(", ")
            )));
        }

        // Step 3: The WiFi password is encrypted, reading it makes the OS pair
        info!("Reading WiFi password to trigger pairing...");
        with_timeout(
            "pairing read",
            self.config.pairing_timeout,
            self.transport.read_characteristic(protocol::WIFI_AP_PASSWORD_UUID),
        )
        .await?;

        // Step 4: Subscribe to responses
        for uuid in NOTIFY_CHARACTERISTICS {
            with_timeout(
                "enable notification",
                self.config.notify_timeout,
                self.transport.enable_notification(uuid),
            )
            .await?;
        }

        Ok(events)
    }

    /// Deliver transport events until the link closes, then tear the session down
    pub async fn run_events(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Notification {
                    characteristic,
                    value,
                } => self.handle_notification(characteristic, &value),
                TransportEvent::Disconnected => break,
            }
        }
        if self.status() != ConnectionStatus::Disconnected {
            info!("Camera link closed");
            self.mark_disconnected();
            self.send_log("Disconnected from camera", MessageSeverity::Info);
        }
    }

    /// Feed one notification chunk through reassembly, decoding and the snapshot
    pub fn handle_notification(&self, characteristic: Uuid, value: &[u8]) {
        let Some(channel) = Channel::from_response_uuid(characteristic) else {
            trace!("Ignoring notification from {}", characteristic);
            return;
        };
        trace!("{:?} <- {:02X?}", channel, value);

        let mut state = self.lock_state();
        let buffer = match state.reassembler.accumulate(channel, value) {
            Ok(Some(buffer)) => buffer,
            Ok(None) => return,
            Err(e) => {
                warn!("Dropping {:?} message: {}", channel, e);
                return;
            }
        };

        let layout = state
            .pending
            .get(&channel)
            .and_then(|pending| pending.layout.clone());
        let message = match self.interpret(&mut state, channel, &buffer, layout.as_ref()) {
            Ok(message) => message,
            Err(e) => {
                warn!("Undecodable {:?} message {:02X?}: {}", channel, buffer, e);
                return;
            }
        };

        if !message.is_success() {
            warn!(
                "{:?} response {:#04X} reported status {}",
                channel,
                message.id(),
                message.status()
            );
        }

        let matches = state
            .pending
            .get(&channel)
            .is_some_and(|pending| pending.response_id == message.id());
        if matches {
            if let Some(pending) = state.pending.remove(&channel) {
                let _ = pending.reply.send(message);
            }
        } else {
            debug!("Unsolicited {:?} response {:#04X}", channel, message.id());
        }
    }

    fn interpret(
        &self,
        state: &mut SessionState,
        channel: Channel,
        buffer: &[u8],
        layout: Option<&FastPathLayout>,
    ) -> Result<Message, ProtocolError> {
        if let Some(layout) = layout {
            if let Some(values) = layout.parse(buffer) {
                let response = QueryResponse {
                    id: buffer[0],
                    status: buffer[1],
                    values,
                };
                self.apply_query(state, &response);
                return Ok(Message::Query(response));
            }
        }

        let message = Message::decode(channel, buffer);
        if let Some(layout) = layout.filter(|l| buffer.first() == Some(&l.response_id())) {
            // A full dump sharing the digest's id is a late answer, not a new camera
            let full_dump = matches!(
                &message,
                Ok(Message::Query(response))
                    if ResponseShape::from_query_ids(response.values.keys().copied()).is_full_dump()
            );
            if full_dump {
                debug!("Full dump arrived while a digest was pending");
            } else {
                warn!(
                    "Fast-path response of {} bytes, expected {}; decoding in full",
                    buffer.len(),
                    layout.expected_len()
                );
                self.apply_detection(state, ResponseShape::FastPathMismatch);
            }
        }

        let message = message?;
        match &message {
            Message::Query(response) => self.apply_query(state, response),
            Message::Complex(response) => debug!(
                "{:?} response {:#04X} with {} blocks",
                channel,
                response.id,
                response.values.len()
            ),
        }
        Ok(message)
    }

    /// Merge a query answer into the snapshot. Full dumps replace, partial
    /// answers (digests, targeted queries) merge.
    fn apply_query(&self, state: &mut SessionState, response: &QueryResponse) {
        let shape = ResponseShape::from_query_ids(response.values.keys().copied());
        match shape {
            ResponseShape::SettingsDump { .. } => state.raw_settings = response.values.clone(),
            ResponseShape::StatusDump { .. } => state.raw_statuses = response.values.clone(),
            _ if response.id == command_id::GET_SETTINGS => state
                .raw_settings
                .extend(response.values.iter().map(|(k, v)| (*k, v.clone()))),
            _ if response.id == command_id::GET_STATUS => state
                .raw_statuses
                .extend(response.values.iter().map(|(k, v)| (*k, v.clone()))),
            _ => {
                debug!("Unclassified query response {:#04X}", response.id);
                return;
            }
        }

        self.apply_detection(state, shape);
        state.snapshot = CameraSnapshot {
            generation: state.generation,
            settings: dictionary::format_settings(&state.raw_settings, state.settings_table()),
            statuses: dictionary::format_statuses(&state.raw_statuses),
        };
        self.emit(AppEvent::CameraUpdated);
    }

    fn apply_detection(&self, state: &mut SessionState, shape: ResponseShape) {
        let detection = generation::detect(&shape, state.generation);
        if detection.changed {
            info!(
                "Camera generation {} -> {}",
                state.generation.label(),
                detection.generation.label()
            );
            state.generation = detection.generation;
            state.snapshot.generation = detection.generation;
            self.emit(AppEvent::GenerationDetected(detection.generation));
        }
    }

    /// Drop all per-link state and fail every waiter
    pub fn mark_disconnected(&self) {
        {
            let mut state = self.lock_state();
            // Dropping the senders wakes the waiters with Disconnected
            state.pending.clear();
            state.reassembler.reset_all();
            state.generation = Generation::Unknown;
            state.raw_settings.clear();
            state.raw_statuses.clear();
            state.snapshot = CameraSnapshot::default();
            state.device = None;
        }
        self.set_status(ConnectionStatus::Disconnected);
    }

    pub async fn disconnect(&self) -> Result<(), EngineError> {
        info!("Disconnecting from camera");
        let result = self.transport.disconnect().await;
        self.mark_disconnected();
        result.map_err(EngineError::from)
    }

    fn transport_failed(&self, error: TransportError) -> EngineError {
        warn!("Transport failure: {}", error);
        self.mark_disconnected();
        EngineError::Transport(error)
    }

    async fn write(&self, command: CameraCommand) -> Result<(), EngineError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        let channel = command.channel();
        let bytes = command.encode();
        debug!("{:?} -> {:02X?}", channel, bytes);

        with_timeout(
            "write",
            self.config.write_timeout,
            self.transport
                .write_characteristic(channel.write_uuid(), &bytes),
        )
        .await
        .map_err(|e| self.transport_failed(e))
    }

    /// Write without waiting for the acknowledgement
    async fn fire(&self, command: CameraCommand) -> Result<(), EngineError> {
        let _operation = self.operation.lock().await;
        self.write(command).await
    }

    /// Write and wait for the matching response on the command's channel
    async fn request(
        &self,
        command: CameraCommand,
        layout: Option<FastPathLayout>,
    ) -> Result<Message, EngineError> {
        let _operation = self.operation.lock().await;
        let channel = command.channel();
        let (reply, response) = oneshot::channel();
        {
            let mut state = self.lock_state();
            if !state.status.is_connected() {
                return Err(TransportError::NotConnected.into());
            }
            // Registered before the write so a fast answer cannot be missed
            state.pending.insert(
                channel,
                PendingRequest {
                    response_id: command.response_id(),
                    layout,
                    reply,
                },
            );
        }
        self.set_status(ConnectionStatus::AwaitingResponse);

        if let Err(e) = self.write(command).await {
            self.lock_state().pending.remove(&channel);
            self.settle_ready();
            return Err(e);
        }

        match tokio::time::timeout(self.config.response_timeout, response).await {
            Ok(Ok(message)) => {
                self.settle_ready();
                Ok(message)
            }
            Ok(Err(_)) => Err(EngineError::Disconnected),
            Err(_) => {
                self.lock_state().pending.remove(&channel);
                self.settle_ready();
                warn!("No {:?} response to {:02X?}", channel, command.encode());
                Err(EngineError::CorrelationTimeout {
                    channel,
                    timeout: self.config.response_timeout,
                })
            }
        }
    }

    pub async fn start_recording(&self) -> Result<(), EngineError> {
        info!("Shutter on");
        self.fire(CameraCommand::ShutterOn).await
    }

    pub async fn stop_recording(&self) -> Result<(), EngineError> {
        info!("Shutter off");
        self.fire(CameraCommand::ShutterOff).await
    }

    pub async fn add_highlight(&self) -> Result<(), EngineError> {
        info!("Adding highlight");
        self.fire(CameraCommand::AddHighlight).await
    }

    pub async fn power_off(&self) -> Result<(), EngineError> {
        info!("Putting camera to sleep");
        self.fire(CameraCommand::PowerOff).await
    }

    pub async fn keep_alive(&self) -> Result<(), EngineError> {
        trace!("Keep-alive");
        self.fire(CameraCommand::KeepAlive).await
    }

    /// Write one setting by name and option label. Unknown names or labels
    /// are sent as [`FALLBACK_CODE`].
    pub async fn set_setting(&self, name: &str, value: &str) -> Result<(), EngineError> {
        let table = self.lock_state().settings_table();
        let setting_id = table.setting_id(name).unwrap_or_else(|| {
            warn!("Unknown setting '{}', sending id {:#04X}", name, FALLBACK_CODE);
            FALLBACK_CODE
        });
        let option_code = dictionary::option_code(name, value).unwrap_or_else(|| {
            warn!(
                "Unknown option '{}' for {}, sending {:#04X}",
                value, name, FALLBACK_CODE
            );
            FALLBACK_CODE
        });

        info!("Setting {} = {}", name, value);
        self.fire(CameraCommand::SetSetting {
            setting_id,
            option_code,
        })
        .await
    }

    /// Write every known setting in `settings`, resolution first.
    /// Returns how many were written.
    pub async fn apply_settings(
        &self,
        settings: &BTreeMap<String, String>,
    ) -> Result<usize, EngineError> {
        let mut ordered: Vec<(&String, &String)> = settings
            .iter()
            .filter(|(name, _)| dictionary::option_table(name).is_some())
            .collect();
        ordered.sort_by_key(|(name, _)| name.as_str() != "resolution");

        for (name, value) in &ordered {
            self.set_setting(name, value).await?;
            tokio::time::sleep(settle_delay(name, value)).await;
        }
        Ok(ordered.len())
    }

    /// Full settings dump, formatted
    pub async fn get_settings(&self) -> Result<BTreeMap<String, String>, EngineError> {
        let message = self.request(CameraCommand::GetSettings, None).await?;
        expect_query(message)?;
        Ok(self.snapshot().settings)
    }

    /// Full status dump, formatted
    pub async fn get_status(&self) -> Result<BTreeMap<String, String>, EngineError> {
        let message = self.request(CameraCommand::GetStatus, None).await?;
        expect_query(message)?;
        Ok(self.snapshot().statuses)
    }

    pub async fn query_status_digest(&self) -> Result<StatusDigest, EngineError> {
        let layout = FastPathLayout::status_digest();
        let message = self.request(layout.command(), Some(layout)).await?;
        let response = expect_query(message)?;
        StatusDigest::from_values(&response.values).ok_or_else(|| {
            EngineError::UnexpectedResponse(format!(
                "status digest without all fields: {:02X?}",
                response.values
            ))
        })
    }

    /// Resolution, fps and lens for the current generation, formatted
    pub async fn query_settings_digest(&self) -> Result<BTreeMap<String, String>, EngineError> {
        let layout = FastPathLayout::settings_digest(self.generation());
        let message = self.request(layout.command(), Some(layout)).await?;
        expect_query(message)?;
        Ok(self.snapshot().settings)
    }

    /// Compare the camera clock against `now` and resync when it drifted
    pub async fn check_time(&self, now: DateTime<Utc>) -> Result<TimeCheck, EngineError> {
        let message = self.request(CameraCommand::GetTime, None).await?;
        let Message::Complex(response) = message else {
            return Err(EngineError::UnexpectedResponse(
                "query response to get-time".to_string(),
            ));
        };

        let convention = self.generation().time_convention();
        let camera_epoch = CameraClock::from_response(&response.values)
            .and_then(|clock| clock.to_epoch_seconds(convention))
            .ok_or_else(|| {
                EngineError::UnexpectedResponse(format!(
                    "unreadable camera time {:02X?}",
                    response.values
                ))
            })?;

        let check = TimeCheck::new(camera_epoch, now.timestamp());
        self.lock_state().last_time_check = Some(check);
        if check.needs_resync() {
            info!("Camera clock is {} s off, resyncing", check.drift_secs);
            self.set_time(now).await?;
        } else {
            debug!("Camera clock within {} s", check.drift_secs);
        }
        Ok(check)
    }

    pub async fn set_time(&self, now: DateTime<Utc>) -> Result<(), EngineError> {
        let generation = self.generation();
        let clock = CameraClock::at(now, generation.time_convention());
        info!(
            "Setting camera time to {:?} ({:?} for {})",
            clock.to_naive(),
            generation.time_convention(),
            generation.label()
        );
        self.fire(CameraCommand::SetTime(clock)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::time_sync::TimeConvention;
    use crate::infrastructure::bluetooth::mock::MockTransport;
    use chrono::TimeZone;

    const ADDRESS: u64 = 0xD1_2A_3B_4C_5D_6E;

    fn device() -> ScannedDevice {
        ScannedDevice {
            name: "GoPro 1234".to_string(),
            address: ADDRESS,
            signal_strength: -55,
        }
    }

    fn transport() -> Arc<MockTransport> {
        Arc::new(MockTransport::new().with_device("GoPro 1234", ADDRESS))
    }

    fn new_session(
        transport: &Arc<MockTransport>,
    ) -> (Arc<CameraSession>, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(CameraSession::new(
            transport.clone(),
            SessionConfig::default(),
            tx,
        ));
        (session, rx)
    }

    async fn connected(
        transport: &Arc<MockTransport>,
    ) -> (Arc<CameraSession>, mpsc::UnboundedReceiver<AppEvent>) {
        let (session, rx) = new_session(transport);
        let events = session.connect(&device()).await.unwrap();
        let pump = session.clone();
        tokio::spawn(async move { pump.run_events(events).await });
        (session, rx)
    }

    fn statuses(rx: &mut mpsc::UnboundedReceiver<AppEvent>) -> Vec<ConnectionStatus> {
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AppEvent::ConnectionStatus(status) = event {
                seen.push(status);
            }
        }
        seen
    }

    // 5K, wide lens, 60 fps on the HERO13 table
    const HERO13_SETTINGS: [u8; 11] = [0x12, 0x00, 2, 1, 24, 229, 1, 4, 234, 1, 5];

    #[tokio::test]
    async fn test_connect_sequence() {
        let transport = transport();
        let (session, mut rx) = connected(&transport).await;

        assert_eq!(session.status(), ConnectionStatus::Ready);
        assert_eq!(session.generation(), Generation::Unknown);
        assert_eq!(session.device(), Some(device()));
        assert_eq!(
            statuses(&mut rx),
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::DiscoveringCharacteristics,
                ConnectionStatus::Ready
            ]
        );
        assert_eq!(
            transport.notifications_enabled(),
            vec![protocol::COMMAND_RESPONSE_UUID, protocol::QUERY_RESPONSE_UUID]
        );
    }

    #[tokio::test]
    async fn test_connect_fails_without_characteristics() {
        let transport = transport();
        transport.remove_characteristic(protocol::QUERY_UUID);
        let (session, _rx) = new_session(&transport);

        let err = session.connect(&device()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Transport(TransportError::Discover(_))
        ));
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_connect_unknown_address() {
        let transport = Arc::new(MockTransport::new());
        let (session, _rx) = new_session(&transport);

        assert!(session.connect(&device()).await.is_err());
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_commands_require_connection() {
        let transport = transport();
        let (session, _rx) = new_session(&transport);

        assert_eq!(
            session.start_recording().await.unwrap_err(),
            EngineError::Transport(TransportError::NotConnected)
        );
        assert!(transport.written().is_empty());
    }

    #[tokio::test]
    async fn test_fire_and_forget_commands() {
        let transport = transport();
        let (session, _rx) = connected(&transport).await;

        session.start_recording().await.unwrap();
        session.add_highlight().await.unwrap();
        session.stop_recording().await.unwrap();
        session.keep_alive().await.unwrap();
        session.power_off().await.unwrap();

        assert_eq!(
            transport.written(),
            vec![
                vec![0x03, 0x01, 0x01, 0x01],
                vec![0x01, 0x18],
                vec![0x03, 0x01, 0x01, 0x00],
                vec![0x03, 0x5B, 0x01, 0x42],
                vec![0x01, 0x05],
            ]
        );
        let (uuid, _) = &transport.writes()[3];
        assert_eq!(*uuid, protocol::SETTING_UUID);
    }

    #[tokio::test]
    async fn test_get_settings_detects_hero13() {
        let transport = transport();
        transport
            .reply_to(CameraCommand::GetSettings, &HERO13_SETTINGS)
            .unwrap();
        let (session, mut rx) = connected(&transport).await;

        let settings = session.get_settings().await.unwrap();
        assert_eq!(session.generation(), Generation::Hero13Plus);
        assert_eq!(settings.get("resolution").map(String::as_str), Some("5K"));
        assert_eq!(settings.get("fps").map(String::as_str), Some("60"));
        assert_eq!(session.status(), ConnectionStatus::Ready);

        let mut detected = false;
        while let Ok(event) = rx.try_recv() {
            detected |= matches!(event, AppEvent::GenerationDetected(Generation::Hero13Plus));
        }
        assert!(detected);
    }

    #[tokio::test]
    async fn test_get_status_detects_hero10() {
        let transport = transport();
        transport
            .reply_to(
                CameraCommand::GetStatus,
                &[0x13, 0x00, 10, 1, 1, 17, 1, 1, 70, 1, 80, 99, 1, 0],
            )
            .unwrap();
        let (session, _rx) = connected(&transport).await;

        let statuses = session.get_status().await.unwrap();
        assert_eq!(session.generation(), Generation::Hero10);
        assert_eq!(statuses.get("encoding").map(String::as_str), Some("true"));
        assert!(session.snapshot().is_encoding());
    }

    #[tokio::test]
    async fn test_multi_chunk_response_is_reassembled() {
        let transport = transport();
        let mut dump = vec![0x13, 0x00, 17, 1, 1];
        for id in 30..45u8 {
            dump.extend_from_slice(&[id, 1, 0]);
        }
        transport.reply_to(CameraCommand::GetStatus, &dump).unwrap();
        let (session, _rx) = connected(&transport).await;

        session.get_status().await.unwrap();
        assert_eq!(session.generation(), Generation::Hero11Plus);
        assert_eq!(session.discarded_partials(Channel::Query), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_request_times_out() {
        let transport = transport();
        let (session, _rx) = connected(&transport).await;

        let err = session.get_settings().await.unwrap_err();
        assert_eq!(
            err,
            EngineError::CorrelationTimeout {
                channel: Channel::Query,
                timeout: Duration::from_secs(5)
            }
        );
        assert_eq!(session.status(), ConnectionStatus::Ready);
    }

    #[tokio::test]
    async fn test_write_failure_disconnects() {
        let transport = transport();
        let (session, _rx) = connected(&transport).await;
        transport.set_fail_writes(true);

        let err = session.start_recording().await.unwrap_err();
        assert!(matches!(err, EngineError::Transport(TransportError::Write(_))));
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert_eq!(session.generation(), Generation::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_fails_waiter() {
        let transport = transport();
        let (session, _rx) = connected(&transport).await;

        let waiting = session.clone();
        let request = tokio::spawn(async move { waiting.get_status().await });
        for _ in 0..10 {
            if session.status() == ConnectionStatus::AwaitingResponse {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(session.status(), ConnectionStatus::AwaitingResponse);

        session.disconnect().await.unwrap();
        assert_eq!(request.await.unwrap(), Err(EngineError::Disconnected));
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_link_loss_resets_session() {
        let transport = transport();
        transport
            .reply_to(CameraCommand::GetSettings, &HERO13_SETTINGS)
            .unwrap();
        let (session, _rx) = connected(&transport).await;
        session.get_settings().await.unwrap();

        transport.drop_link();
        for _ in 0..10 {
            if session.status() == ConnectionStatus::Disconnected {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert_eq!(session.generation(), Generation::Unknown);
        assert!(session.snapshot().settings.is_empty());
    }

    #[tokio::test]
    async fn test_set_setting_encodes_and_falls_back() {
        let transport = transport();
        let (session, _rx) = connected(&transport).await;

        session.set_setting("resolution", "5K").await.unwrap();
        session.set_setting("resolution", "8K").await.unwrap();
        session.set_setting("warp_drive", "on").await.unwrap();

        assert_eq!(
            transport.written(),
            vec![
                vec![0x03, 0x02, 0x01, 0x18],
                vec![0x03, 0x02, 0x01, 0x01],
                vec![0x03, 0x01, 0x01, 0x01],
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_settings_writes_resolution_first() {
        let transport = transport();
        let (session, _rx) = connected(&transport).await;

        let settings = BTreeMap::from([
            ("fps".to_string(), "30".to_string()),
            ("resolution".to_string(), "4K".to_string()),
            ("unknown".to_string(), "x".to_string()),
        ]);
        let written = session.apply_settings(&settings).await.unwrap();

        assert_eq!(written, 2);
        let writes = transport.written();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0][1], 2);
        assert_eq!(writes[1][1], 3);
    }

    #[test]
    fn test_settle_delay() {
        assert_eq!(settle_delay("resolution", "5.3K"), Duration::from_millis(1000));
        assert_eq!(settle_delay("resolution", "4K"), Duration::from_millis(300));
        assert_eq!(settle_delay("fps", "50"), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_status_digest_fast_path() {
        let transport = transport();
        transport
            .reply_to(
                CameraCommand::StatusDigest,
                &[
                    0x13, 0x00, 0x08, 0x01, 0x00, 0x0A, 0x01, 0x01, 0x23, 0x04, 0x00, 0x00, 0x01,
                    0x2C, 0x46, 0x01, 0x4B,
                ],
            )
            .unwrap();
        let (session, _rx) = connected(&transport).await;

        let digest = session.query_status_digest().await.unwrap();
        assert!(digest.encoding);
        assert_eq!(digest.video_time_remaining, 300);
        assert_eq!(digest.battery_level, 75);
        assert!(session.snapshot().is_encoding());
    }

    #[tokio::test]
    async fn test_fast_path_mismatch_resets_generation() {
        let transport = transport();
        transport
            .reply_to(
                CameraCommand::GetStatus,
                &[0x13, 0x00, 10, 1, 0, 17, 1, 1],
            )
            .unwrap();
        // One byte short of the 17-byte layout
        transport
            .reply_to(
                CameraCommand::StatusDigest,
                &[
                    0x13, 0x00, 0x08, 0x01, 0x00, 0x0A, 0x01, 0x01, 0x23, 0x03, 0x00, 0x01, 0x2C,
                    0x46, 0x01, 0x4B,
                ],
            )
            .unwrap();
        let (session, _rx) = connected(&transport).await;

        session.get_status().await.unwrap();
        assert_eq!(session.generation(), Generation::Hero11Plus);

        assert!(session.query_status_digest().await.is_err());
        assert_eq!(session.generation(), Generation::Unknown);
        // The slow decode still landed in the snapshot
        assert_eq!(
            session.snapshot().statuses.get("battery_level").map(String::as_str),
            Some("75")
        );
    }

    fn time_reply(clock: CameraClock) -> Vec<u8> {
        let year = clock.year.to_be_bytes();
        vec![
            0x0E, 0x00, 0x07, year[0], year[1], clock.month, clock.day, clock.hour, clock.minute,
            clock.second,
        ]
    }

    #[tokio::test]
    async fn test_check_time_within_threshold() {
        let transport = transport();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let clock = CameraClock::at(now - chrono::Duration::seconds(2), TimeConvention::Local);
        transport
            .reply_to(CameraCommand::GetTime, &time_reply(clock))
            .unwrap();
        let (session, _rx) = connected(&transport).await;

        let check = session.check_time(now).await.unwrap();
        assert_eq!(check.drift_secs, 1);
        assert!(!check.needs_resync());
        assert_eq!(transport.written(), vec![vec![0x01, 0x0E]]);
        assert_eq!(session.last_time_check(), Some(check));
    }

    #[tokio::test]
    async fn test_check_time_resyncs_drifted_clock() {
        let transport = transport();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let clock = CameraClock::at(now - chrono::Duration::seconds(60), TimeConvention::Local);
        transport
            .reply_to(CameraCommand::GetTime, &time_reply(clock))
            .unwrap();
        let (session, _rx) = connected(&transport).await;

        let check = session.check_time(now).await.unwrap();
        assert_eq!(check.drift_secs, 59);

        let writes = transport.written();
        assert_eq!(writes.len(), 2);
        assert_eq!(
            writes[1],
            CameraCommand::SetTime(CameraClock::at(now, TimeConvention::Local)).encode()
        );
    }

    #[tokio::test]
    async fn test_full_dump_during_digest_keeps_generation() {
        let transport = transport();
        transport
            .reply_to(CameraCommand::GetSettings, &HERO13_SETTINGS)
            .unwrap();
        // A complete status dump answering the digest request
        transport
            .reply_to(
                CameraCommand::StatusDigest,
                &[
                    0x13, 0x00, 8, 1, 0, 10, 1, 1, 17, 1, 0, 35, 4, 0, 0, 1, 44, 70, 1, 75,
                ],
            )
            .unwrap();
        let (session, _rx) = connected(&transport).await;

        session.get_settings().await.unwrap();
        assert_eq!(session.generation(), Generation::Hero13Plus);

        let digest = session.query_status_digest().await.unwrap();
        assert_eq!(digest.battery_level, 75);
        assert_eq!(session.generation(), Generation::Hero13Plus);
        assert!(session.snapshot().is_encoding());
    }

    #[tokio::test]
    async fn test_unsolicited_response_is_ignored() {
        let transport = transport();
        let (session, _rx) = connected(&transport).await;

        // A late shutter acknowledgement must not be mistaken for anything
        session.handle_notification(protocol::COMMAND_RESPONSE_UUID, &[0x02, 0x01, 0x00]);
        session.handle_notification(protocol::SETTING_UUID, &[0x02, 0x01, 0x00]);
        assert_eq!(session.status(), ConnectionStatus::Ready);
        assert_eq!(session.snapshot(), CameraSnapshot::default());
    }
}
