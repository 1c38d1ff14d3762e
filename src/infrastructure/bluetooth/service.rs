//! Bluetooth Service Module
//!
//! Supervises the camera link: finds and connects the target camera, runs the
//! per-connection loops (notification pump, polling, keep-alive, time check)
//! and turns remote commands into session operations.
//!
//! ```text
//! RemoteCommand ──► SessionSupervisor ──► CameraSession ──► BleTransport
//!                        │   ▲
//!        reconnect tick ─┘   └─ loop task exit (link lost)
//! ```

use crate::domain::media::{CameraIntent, MediaSession, NowPlaying, RecordingIndicator};
use crate::domain::models::{AppEvent, MessageSeverity, RemoteCommand, ScannedDevice, StatusMessage};
use crate::domain::settings::{BleTimings, SettingsService};
use crate::infrastructure::bluetooth::scanner::{is_any_camera, names_match, FoundDevices};
use crate::infrastructure::bluetooth::session::{CameraSession, SessionConfig};
use crate::infrastructure::bluetooth::transport::BleTransport;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// User-facing recording state shared with the polling task
#[derive(Debug, Default)]
struct RemoteState {
    indicator: RecordingIndicator,
    /// Powered off on purpose: no reconnect until a wake request
    asleep: bool,
    /// Disconnected by the user: no reconnect until the next command
    held: bool,
    /// A start arrived while disconnected and is re-issued after connect
    pending_start: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Everything a per-connection loop needs
#[derive(Clone)]
struct LinkContext {
    session: Arc<CameraSession>,
    remote: Arc<Mutex<RemoteState>>,
    media: Arc<dyn MediaSession>,
    timings: BleTimings,
    fast_path: bool,
}

impl LinkContext {
    /// Mirror the snapshot into the media session
    fn publish(&self) {
        let (asleep, indicator) = {
            let remote = lock(&self.remote);
            (remote.asleep, remote.indicator)
        };
        let snapshot = self.session.snapshot();
        let now_playing = NowPlaying::compose(&snapshot.settings, &snapshot.statuses, indicator);
        if !asleep || indicator == RecordingIndicator::Sleeping {
            self.media.update(&now_playing);
            self.media
                .set_playing(indicator == RecordingIndicator::Recording);
        }
    }

    fn set_indicator(&self, indicator: RecordingIndicator) {
        lock(&self.remote).indicator = indicator;
        self.publish();
    }

    fn is_recording(&self) -> bool {
        matches!(
            lock(&self.remote).indicator,
            RecordingIndicator::Starting | RecordingIndicator::Recording
        )
    }

    /// One status + settings round
    async fn poll_once(&self) {
        let interval = self.timings.poll_interval(self.is_recording());
        let fast_path = self.fast_path && self.session.generation().is_known();

        let status = if fast_path {
            self.session.query_status_digest().await.map(|_| ())
        } else {
            self.session.get_status().await.map(|_| ())
        };
        if let Err(e) = status {
            debug!("Status poll failed: {}", e);
        }

        tokio::time::sleep(interval / 2).await;
        if !self.session.is_connected() {
            return;
        }

        let settings = if fast_path {
            self.session.query_settings_digest().await
        } else {
            self.session.get_settings().await
        };
        if let Err(e) = settings {
            debug!("Settings poll failed: {}", e);
        }

        let settled = {
            let mut remote = lock(&self.remote);
            if remote.asleep {
                None
            } else {
                remote.indicator = remote
                    .indicator
                    .after_poll(self.session.snapshot().is_encoding());
                Some(remote.indicator)
            }
        };
        if settled.is_some() {
            self.publish();
        }

        tokio::time::sleep(interval / 2).await;
    }

    async fn poll_loop(self) {
        while self.session.is_connected() {
            self.poll_once().await;
        }
        debug!("Poll loop finished");
    }

    async fn keep_alive_loop(self) {
        let every = Duration::from_millis(self.timings.keep_alive_interval_ms);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        loop {
            ticker.tick().await;
            if !self.session.is_connected() {
                break;
            }
            if let Err(e) = self.session.keep_alive().await {
                debug!("Keep-alive failed: {}", e);
            }
        }
    }

    async fn time_loop(self) {
        tokio::time::sleep(Duration::from_millis(self.timings.time_check_delay_ms)).await;
        while self.session.is_connected() {
            if let Err(e) = self.session.check_time(chrono::Utc::now()).await {
                debug!("Time check failed: {}", e);
            }
            tokio::time::sleep(Duration::from_millis(self.timings.time_check_interval_ms)).await;
        }
    }
}

async fn next_task_exit(tasks: &mut Option<JoinSet<()>>) {
    match tasks {
        Some(set) if !set.is_empty() => {
            if let Some(Err(e)) = set.join_next().await {
                if e.is_panic() {
                    warn!("Connection task panicked: {}", e);
                }
            }
        }
        _ => std::future::pending().await,
    }
}

/// Main service coordinating the camera link
pub struct SessionSupervisor {
    transport: Arc<dyn BleTransport>,
    session: Arc<CameraSession>,
    settings: Arc<Mutex<SettingsService>>,
    media: Arc<dyn MediaSession>,
    remote: Arc<Mutex<RemoteState>>,
    found: FoundDevices,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    tasks: Option<JoinSet<()>>,
}

impl SessionSupervisor {
    pub fn new(
        transport: Arc<dyn BleTransport>,
        settings: Arc<Mutex<SettingsService>>,
        media: Arc<dyn MediaSession>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let timings = lock(&settings).get().ble_timings.clone();
        let session = Arc::new(CameraSession::new(
            transport.clone(),
            SessionConfig::from_timings(&timings),
            event_sender.clone(),
        ));
        Self {
            transport,
            session,
            settings,
            media,
            remote: Arc::new(Mutex::new(RemoteState::default())),
            found: FoundDevices::new(Duration::from_millis(timings.device_prune_after_ms)),
            event_sender,
            tasks: None,
        }
    }

    /// Handle to the engine, for status queries from outside the loop
    pub fn session(&self) -> Arc<CameraSession> {
        self.session.clone()
    }

    pub fn indicator(&self) -> RecordingIndicator {
        lock(&self.remote).indicator
    }

    pub fn is_asleep(&self) -> bool {
        lock(&self.remote).asleep
    }

    /// Cameras heard within the prune window, strongest first
    pub fn found_devices(&mut self) -> Vec<ScannedDevice> {
        self.found.prune(Instant::now());
        self.found.snapshot()
    }

    fn timings(&self) -> BleTimings {
        lock(&self.settings).get().ble_timings.clone()
    }

    fn context(&self) -> LinkContext {
        let (timings, fast_path) = {
            let settings = lock(&self.settings);
            let s = settings.get();
            (s.ble_timings.clone(), s.fast_path_polling)
        };
        LinkContext {
            session: self.session.clone(),
            remote: self.remote.clone(),
            media: self.media.clone(),
            timings,
            fast_path,
        }
    }

    fn send_log(&self, message: impl Into<String>, severity: MessageSeverity) {
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: message.into(),
            severity,
        }));
    }

    /// Run until `Shutdown` arrives or the command channel closes
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<RemoteCommand>) {
        info!("Session supervisor started");
        let every = Duration::from_millis(self.timings().reconnect_interval_ms);
        let mut reconnect = tokio::time::interval(every);
        reconnect.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(RemoteCommand::Shutdown) => break,
                    Some(command) => self.handle_command(command).await,
                },
                _ = reconnect.tick() => self.reconnect_if_needed().await,
                _ = next_task_exit(&mut self.tasks) => self.on_task_exit().await,
            }
        }

        info!("Session supervisor stopping");
        self.drop_connection().await;
    }

    pub async fn handle_command(&mut self, command: RemoteCommand) {
        debug!("Remote command: {:?}", command);
        match command {
            RemoteCommand::StartRecording => self.start_recording().await,
            RemoteCommand::StopRecording { power_off_after } => {
                self.stop_recording(power_off_after).await
            }
            RemoteCommand::AddHighlight => self.add_highlight().await,
            RemoteCommand::TogglePower => self.toggle_power().await,
            RemoteCommand::ApplySettings(settings) => self.apply_settings(settings).await,
            RemoteCommand::SetTarget(name) => self.set_target(&name).await,
            RemoteCommand::Media(action) => match CameraIntent::from(action) {
                CameraIntent::StartRecording => self.start_recording().await,
                CameraIntent::StopRecording => {
                    let power_off_after = lock(&self.settings).get().power_off_after_stop;
                    self.stop_recording(power_off_after).await
                }
                CameraIntent::AddHighlight => self.add_highlight().await,
            },
            RemoteCommand::Disconnect => {
                lock(&self.remote).held = true;
                self.drop_connection().await;
                self.context().set_indicator(RecordingIndicator::NotConnected);
            }
            RemoteCommand::Shutdown => self.drop_connection().await,
        }
    }

    async fn start_recording(&mut self) {
        self.context().set_indicator(RecordingIndicator::Starting);
        if self.session.is_connected() {
            if let Err(e) = self.session.start_recording().await {
                warn!("Start recording failed: {}", e);
            }
            return;
        }

        info!("Camera not connected, queueing start");
        {
            let mut remote = lock(&self.remote);
            remote.pending_start = true;
            remote.asleep = false;
            remote.held = false;
        }
        self.connect_target().await;
    }

    async fn stop_recording(&mut self, power_off_after: bool) {
        lock(&self.remote).pending_start = false;
        if !self.session.is_connected() {
            debug!("Stop requested while disconnected");
            return;
        }

        let context = self.context();
        context.set_indicator(RecordingIndicator::Stopping);
        if let Err(e) = self.session.stop_recording().await {
            warn!("Stop recording failed: {}", e);
            return;
        }
        if !power_off_after {
            return;
        }

        tokio::time::sleep(Duration::from_millis(context.timings.power_off_delay_ms)).await;
        if let Err(e) = self.session.power_off().await {
            warn!("Power off failed: {}", e);
        }
        lock(&self.remote).asleep = true;
        self.drop_connection().await;
        context.set_indicator(RecordingIndicator::Sleeping);
        self.send_log("Camera is asleep", MessageSeverity::Info);
    }

    async fn add_highlight(&mut self) {
        if !self.session.is_connected() {
            debug!("Highlight requested while disconnected");
            return;
        }
        if let Err(e) = self.session.add_highlight().await {
            warn!("Add highlight failed: {}", e);
        }
    }

    async fn toggle_power(&mut self) {
        if self.session.is_connected() {
            self.stop_recording(true).await;
            return;
        }

        info!("Waking camera");
        {
            let mut remote = lock(&self.remote);
            remote.asleep = false;
            remote.held = false;
        }
        self.context().set_indicator(RecordingIndicator::WakingUp);
        self.connect_target().await;
    }

    async fn apply_settings(&mut self, settings: BTreeMap<String, String>) {
        let updated_on = Some(chrono::Utc::now().timestamp_millis());
        let stored = lock(&self.settings).update_camera_settings(&settings, updated_on);
        match stored {
            Ok(changed) => debug!("Stored {} changed camera settings", changed.len()),
            Err(e) => warn!("Failed to store camera settings: {}", e),
        }

        if !self.session.is_connected() {
            return;
        }
        match self.session.apply_settings(&settings).await {
            Ok(written) => info!("Applied {} camera settings", written),
            Err(e) => warn!("Applying camera settings failed: {}", e),
        }
    }

    async fn set_target(&mut self, name: &str) {
        if let Err(e) = lock(&self.settings).set_target_camera(name) {
            warn!("Failed to store target camera: {}", e);
        }
        lock(&self.remote).held = false;

        let mismatch = self
            .session
            .device()
            .is_some_and(|device| !is_any_camera(name) && !names_match(&device.name, name));
        if mismatch {
            info!("Target changed to {}, dropping current camera", name);
            self.drop_connection().await;
            self.context().set_indicator(RecordingIndicator::NotConnected);
        }
    }

    async fn reconnect_if_needed(&mut self) {
        let hold = {
            let remote = lock(&self.remote);
            remote.asleep || remote.held
        };
        if self.session.is_connected() || hold {
            return;
        }
        self.connect_target().await;
    }

    /// Connect to the cached camera when it is the target, otherwise scan for it
    async fn connect_target(&mut self) {
        let (target, cached) = {
            let settings = lock(&self.settings);
            let s = settings.get();
            let cached = match (s.last_connected_address, s.last_connected_name.clone()) {
                (Some(address), Some(name))
                    if is_any_camera(&s.target_camera) || names_match(&name, &s.target_camera) =>
                {
                    Some(ScannedDevice {
                        name,
                        address,
                        signal_strength: 0,
                    })
                }
                _ => None,
            };
            (s.target_camera.clone(), cached)
        };

        let cached_address = cached.as_ref().map(|device| device.address);
        if let Some(device) = cached {
            if self.connect_device(&device).await {
                return;
            }
            info!("Cached camera unreachable, scanning for {}", target);
        }

        self.found.prune(Instant::now());
        let recent = self
            .found
            .find_target(&target)
            .filter(|device| Some(device.address) != cached_address);
        if let Some(device) = recent {
            debug!("Trying recently heard {}", device.name);
            if self.connect_device(&device).await {
                return;
            }
        }

        match self.scan_for(&target).await {
            Some(device) => {
                self.connect_device(&device).await;
            }
            None => {
                info!("Camera '{}' not found", target);
                self.send_log(format!("Camera '{}' not found", target), MessageSeverity::Warning);
            }
        }
    }

    /// Scan until a camera matching `target` is heard or the scan times out
    async fn scan_for(&mut self, target: &str) -> Option<ScannedDevice> {
        let timeout = Duration::from_millis(self.timings().scan_timeout_ms);
        let (sink, mut found_rx) = mpsc::unbounded_channel();
        if let Err(e) = self.transport.start_scan(sink).await {
            warn!("Scan failed: {}", e);
            return None;
        }
        info!("Scanning for '{}'", target);

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let any = is_any_camera(target);
        let matched = loop {
            tokio::select! {
                device = found_rx.recv() => match device {
                    Some(device) => {
                        if self.found.record(device.clone(), Instant::now()) {
                            let _ = self.event_sender.send(AppEvent::DeviceFound(device.clone()));
                        }
                        if any || names_match(&device.name, target) {
                            break Some(device);
                        }
                    }
                    None => break None,
                },
                _ = &mut deadline => break None,
            }
        };

        if let Err(e) = self.transport.stop_scan().await {
            debug!("Stopping scan failed: {}", e);
        }
        self.found.prune(Instant::now());
        matched
    }

    /// Connect, settle the queued recording intent, push the stored camera
    /// settings and start the loops. Returns false when the connection failed.
    async fn connect_device(&mut self, device: &ScannedDevice) -> bool {
        self.drop_connection().await;
        let events = match self.session.connect(device).await {
            Ok(events) => events,
            Err(e) => {
                warn!("Could not connect to {}: {}", device.name, e);
                return false;
            }
        };

        {
            let mut settings = lock(&self.settings);
            if let Err(e) = settings.remember_device(device.address, &device.name) {
                warn!("Failed to remember camera: {}", e);
            }
            if let Err(e) = settings.set_target_camera(&device.name) {
                warn!("Failed to store target camera: {}", e);
            }
        }

        let context = self.context();
        let mut tasks = JoinSet::new();
        let session = self.session.clone();
        tasks.spawn(async move { session.run_events(events).await });

        // Settle the recording intent before the loops start queueing queries
        let pending_start = std::mem::take(&mut lock(&self.remote).pending_start);
        let intent = if pending_start {
            info!("Re-issuing queued start");
            self.session.start_recording().await
        } else {
            self.session.stop_recording().await
        };
        if let Err(e) = intent {
            warn!("Initial shutter command failed: {}", e);
        }
        context.set_indicator(if pending_start {
            RecordingIndicator::Starting
        } else {
            RecordingIndicator::Ready
        });

        let stored = lock(&self.settings).get().camera_settings.clone();
        match self.session.apply_settings(&stored).await {
            Ok(written) => info!("Applied {} stored camera settings", written),
            Err(e) => warn!("Applying stored camera settings failed: {}", e),
        }

        tasks.spawn(context.clone().poll_loop());
        tasks.spawn(context.clone().keep_alive_loop());
        tasks.spawn(context.time_loop());
        self.tasks = Some(tasks);
        true
    }

    async fn on_task_exit(&mut self) {
        if self.session.is_connected() {
            return;
        }
        info!("Camera connection lost");
        self.drop_connection().await;
        let indicator = if lock(&self.remote).asleep {
            RecordingIndicator::Sleeping
        } else {
            RecordingIndicator::NotConnected
        };
        self.context().set_indicator(indicator);
    }

    /// Stop the connection tasks and close the link
    async fn drop_connection(&mut self) {
        let had_tasks = match self.tasks.take() {
            Some(mut tasks) => {
                tasks.abort_all();
                true
            }
            None => false,
        };
        if had_tasks || self.session.device().is_some() {
            if let Err(e) = self.session.disconnect().await {
                debug!("Disconnect failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ConnectionStatus;
    use crate::infrastructure::bluetooth::mock::MockTransport;
    use crate::domain::dictionary;
    use crate::infrastructure::bluetooth::protocol::{self, CameraCommand};
    use std::path::PathBuf;

    const ADDRESS: u64 = 0xC0_FF_EE_00_12_34;

    #[derive(Default)]
    struct RecordingMedia {
        updates: Mutex<Vec<NowPlaying>>,
    }

    impl RecordingMedia {
        fn last_title(&self) -> Option<String> {
            lock(&self.updates).last().map(|n| n.title.clone())
        }
    }

    impl MediaSession for RecordingMedia {
        fn update(&self, now_playing: &NowPlaying) {
            lock(&self.updates).push(now_playing.clone());
        }

        fn set_playing(&self, _playing: bool) {}
    }

    fn settings_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "gopro_remote_service_{}_{}.json",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        path
    }

    struct Harness {
        transport: Arc<MockTransport>,
        media: Arc<RecordingMedia>,
        settings: Arc<Mutex<SettingsService>>,
        supervisor: SessionSupervisor,
    }

    fn harness(name: &str) -> Harness {
        let transport = Arc::new(MockTransport::new().with_device("GoPro 1234", ADDRESS));
        let media = Arc::new(RecordingMedia::default());
        let settings = Arc::new(Mutex::new(SettingsService::with_path(settings_path(name))));
        let (tx, _rx) = mpsc::unbounded_channel();
        let supervisor =
            SessionSupervisor::new(transport.clone(), settings.clone(), media.clone(), tx);
        Harness {
            transport,
            media,
            settings,
            supervisor,
        }
    }

    const SHUTTER_ON: [u8; 4] = [0x03, 0x01, 0x01, 0x01];
    const SHUTTER_OFF: [u8; 4] = [0x03, 0x01, 0x01, 0x00];

    #[tokio::test(start_paused = true)]
    async fn test_connect_sends_stop_and_remembers_camera() {
        let mut h = harness("connect");
        h.supervisor.reconnect_if_needed().await;

        assert!(h.supervisor.session().is_connected());
        assert_eq!(h.transport.written()[0], SHUTTER_OFF);
        assert_eq!(h.supervisor.indicator(), RecordingIndicator::Ready);
        assert_eq!(h.supervisor.found_devices().len(), 1);

        let settings = lock(&h.settings);
        assert_eq!(settings.get().last_connected_address, Some(ADDRESS));
        assert_eq!(settings.get().target_camera, "GoPro 1234");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_applies_stored_settings() {
        let mut h = harness("stored_settings");
        let stored = lock(&h.settings).get().camera_settings.clone();
        h.supervisor.reconnect_if_needed().await;

        let writes = h.transport.writes();
        assert_eq!(writes[0].1, SHUTTER_OFF);
        // Resolution goes first: 4K on the legacy table
        assert_eq!(
            writes[1],
            (protocol::SETTING_UUID, vec![0x03, 0x02, 0x01, 0x01])
        );
        let keep_alive = CameraCommand::KeepAlive.encode();
        let setting_writes = writes
            .iter()
            .filter(|(uuid, bytes)| *uuid == protocol::SETTING_UUID && *bytes != keep_alive)
            .count();
        let known = stored
            .keys()
            .filter(|name| dictionary::option_table(name).is_some())
            .count();
        assert_eq!(setting_writes, known);
        assert!(h.supervisor.session().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_stops_loops_and_reconnects() {
        let mut h = harness("link_loss");
        h.supervisor.reconnect_if_needed().await;
        assert!(h.supervisor.tasks.is_some());

        h.transport.drop_link();
        next_task_exit(&mut h.supervisor.tasks).await;
        h.supervisor.on_task_exit().await;

        assert!(h.supervisor.tasks.is_none());
        assert!(!h.supervisor.session().is_connected());
        assert_eq!(h.supervisor.indicator(), RecordingIndicator::NotConnected);
        assert_eq!(h.media.last_title().as_deref(), Some("Not Connected"));

        // Poll and keep-alive loops are gone
        h.transport.clear_writes();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.transport.written().is_empty());

        h.supervisor.reconnect_if_needed().await;
        assert!(h.supervisor.session().is_connected());
        assert_eq!(h.transport.connect_attempts(), vec![ADDRESS, ADDRESS]);
        assert!(h.supervisor.tasks.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_found_devices_forgets_stale_sightings() {
        let mut h = harness("stale_sightings");
        let now = Instant::now();
        let Some(long_ago) = now.checked_sub(Duration::from_secs(30)) else {
            return;
        };
        let camera = |name: &str, address| ScannedDevice {
            name: name.to_string(),
            address,
            signal_strength: -50,
        };
        h.supervisor.found.record(camera("GoPro 0001", 1), long_ago);
        h.supervisor.found.record(camera("GoPro 0002", 2), now);

        assert_eq!(h.supervisor.found_devices(), vec![camera("GoPro 0002", 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recently_heard_camera_is_tried_before_scanning() {
        let mut h = harness("recent");
        h.supervisor.found.record(
            ScannedDevice {
                name: "GoPro 1234".to_string(),
                address: ADDRESS,
                signal_strength: -40,
            },
            Instant::now(),
        );
        h.supervisor.reconnect_if_needed().await;

        assert!(h.supervisor.session().is_connected());
        assert_eq!(h.transport.connect_attempts(), vec![ADDRESS]);
        assert_eq!(
            h.supervisor.session().device().map(|d| d.signal_strength),
            Some(-40)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_disconnected_is_queued() {
        let mut h = harness("queued_start");
        h.supervisor
            .handle_command(RemoteCommand::StartRecording)
            .await;

        assert!(h.supervisor.session().is_connected());
        let writes = h.transport.written();
        assert_eq!(writes[0], SHUTTER_ON);
        assert!(!writes.contains(&SHUTTER_OFF.to_vec()));
        assert_eq!(h.supervisor.indicator(), RecordingIndicator::Starting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_camera_skips_scan() {
        let mut h = harness("cached");
        lock(&h.settings)
            .remember_device(ADDRESS, "GoPro 1234")
            .unwrap();
        h.supervisor.reconnect_if_needed().await;

        assert!(h.supervisor.session().is_connected());
        assert!(!h.transport.is_scanning());
        assert!(h.supervisor.found_devices().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_target_is_not_connected() {
        let mut h = harness("unknown_target");
        h.supervisor
            .handle_command(RemoteCommand::SetTarget("GoPro 9999".to_string()))
            .await;
        h.supervisor.reconnect_if_needed().await;

        assert!(!h.supervisor.session().is_connected());
        assert!(h.transport.connect_attempts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_with_power_off_sleeps() {
        let mut h = harness("power_off");
        h.supervisor.reconnect_if_needed().await;
        h.transport.clear_writes();

        h.supervisor
            .handle_command(RemoteCommand::StopRecording {
                power_off_after: true,
            })
            .await;

        let writes = h.transport.written();
        assert!(writes.contains(&SHUTTER_OFF.to_vec()));
        assert!(writes.contains(&CameraCommand::PowerOff.encode()));
        assert!(h.supervisor.is_asleep());
        assert_eq!(
            h.supervisor.session().status(),
            ConnectionStatus::Disconnected
        );
        assert_eq!(h.media.last_title().as_deref(), Some("In sleep"));

        // Asleep cameras are left alone by the reconnect tick
        h.supervisor.reconnect_if_needed().await;
        assert_eq!(h.transport.connect_attempts(), vec![ADDRESS]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_power_wakes_sleeping_camera() {
        let mut h = harness("wake");
        h.supervisor.reconnect_if_needed().await;
        h.supervisor
            .handle_command(RemoteCommand::TogglePower)
            .await;
        assert!(h.supervisor.is_asleep());

        h.supervisor
            .handle_command(RemoteCommand::TogglePower)
            .await;
        assert!(!h.supervisor.is_asleep());
        assert!(h.supervisor.session().is_connected());
        assert_eq!(h.transport.connect_attempts(), vec![ADDRESS, ADDRESS]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_disconnect_holds_reconnect() {
        let mut h = harness("hold");
        h.supervisor.reconnect_if_needed().await;
        h.supervisor.handle_command(RemoteCommand::Disconnect).await;
        assert!(!h.supervisor.session().is_connected());

        h.supervisor.reconnect_if_needed().await;
        assert_eq!(h.transport.connect_attempts(), vec![ADDRESS]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_settles_indicator_and_publishes() {
        let mut h = harness("poll");
        h.transport
            .reply_to(
                CameraCommand::GetStatus,
                &[0x13, 0x00, 10, 1, 1, 17, 1, 0, 70, 1, 90],
            )
            .unwrap();
        h.transport
            .reply_to(CameraCommand::GetSettings, &[0x12, 0x00, 2, 1, 1, 3, 1, 5, 134, 1, 0])
            .unwrap();
        h.supervisor
            .handle_command(RemoteCommand::StartRecording)
            .await;

        h.supervisor.context().poll_once().await;

        assert_eq!(h.supervisor.indicator(), RecordingIndicator::Recording);
        let updates = lock(&h.media.updates);
        let last = updates.last().unwrap();
        assert_eq!(last.title, "Recording");
        assert!(last.artist.starts_with("4K|-|60|90%"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_connects_and_shuts_down() {
        let h = harness("run");
        let transport = h.transport.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(h.supervisor.run(rx));

        for _ in 0..50 {
            if transport.written().contains(&SHUTTER_OFF.to_vec()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(transport.is_connected());

        tx.send(RemoteCommand::Shutdown).unwrap();
        handle.await.unwrap();
        assert!(!transport.is_connected());
    }
}
