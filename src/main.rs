use gopro_ble_remote::domain::media::{LoggingMediaSession, MediaAction};
use gopro_ble_remote::domain::models::{AppEvent, MessageSeverity, RemoteCommand};
use gopro_ble_remote::domain::settings::SettingsService;
use gopro_ble_remote::infrastructure::bluetooth::transport::BleTransport;
use gopro_ble_remote::infrastructure::bluetooth::{CameraSession, SessionSupervisor};
use gopro_ble_remote::infrastructure::logging;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[cfg(windows)]
fn platform_transport() -> anyhow::Result<Arc<dyn BleTransport>> {
    use gopro_ble_remote::infrastructure::bluetooth::winrt::WinRtTransport;
    Ok(Arc::new(WinRtTransport::new()))
}

#[cfg(not(windows))]
fn platform_transport() -> anyhow::Result<Arc<dyn BleTransport>> {
    anyhow::bail!("no BLE transport for this platform")
}

const HELP: &str = "commands: record | stop | off | power | highlight | play | pause | next \
                    | status | target <name> | disconnect | quit";

fn parse_command(line: &str) -> Option<RemoteCommand> {
    let (word, rest) = line.trim().split_once(' ').unwrap_or((line.trim(), ""));
    let command = match word.to_lowercase().as_str() {
        "record" | "start" => RemoteCommand::StartRecording,
        "stop" => RemoteCommand::StopRecording {
            power_off_after: false,
        },
        "off" => RemoteCommand::StopRecording {
            power_off_after: true,
        },
        "power" => RemoteCommand::TogglePower,
        "highlight" | "hilight" => RemoteCommand::AddHighlight,
        "play" => RemoteCommand::Media(MediaAction::Play),
        "pause" => RemoteCommand::Media(MediaAction::Pause),
        "next" => RemoteCommand::Media(MediaAction::SkipNext),
        "target" if !rest.trim().is_empty() => RemoteCommand::SetTarget(rest.trim().to_string()),
        "disconnect" => RemoteCommand::Disconnect,
        "quit" | "exit" => RemoteCommand::Shutdown,
        _ => return None,
    };
    Some(command)
}

fn print_status(session: &CameraSession) {
    let snapshot = session.snapshot();
    println!(
        "{:?} | {} | {}",
        session.status(),
        snapshot.generation.label(),
        session
            .device()
            .map(|d| d.name)
            .unwrap_or_else(|| "no camera".to_string())
    );
    for (name, value) in snapshot.settings.iter().chain(snapshot.statuses.iter()) {
        println!("  {:<28} {}", name, value);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let _logging_guard = logging::init_logger(&settings_service.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting GoPro BLE remote");

    let transport = match platform_transport() {
        Ok(transport) => transport,
        Err(e) => {
            error!("Cannot start: {}", e);
            return Err(e);
        }
    };

    let settings = Arc::new(Mutex::new(settings_service));
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    let supervisor = SessionSupervisor::new(
        transport,
        settings,
        Arc::new(LoggingMediaSession),
        event_tx,
    );
    let session = supervisor.session();
    let supervisor_task = tokio::spawn(supervisor.run(command_rx));

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                AppEvent::LogMessage(message) => match message.severity {
                    MessageSeverity::Warning | MessageSeverity::Error => {
                        warn!("{}", message.message)
                    }
                    _ => info!("{}", message.message),
                },
                AppEvent::DeviceFound(device) => {
                    info!("Camera nearby: {} ({} dBm)", device.name, device.signal_strength)
                }
                AppEvent::GenerationDetected(generation) => {
                    info!("Camera generation: {}", generation.label())
                }
                AppEvent::ConnectionStatus(_) | AppEvent::CameraUpdated => {}
            }
        }
    });

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().eq_ignore_ascii_case("status") {
            print_status(&session);
            continue;
        }
        match parse_command(&line) {
            Some(command) => {
                let shutdown = matches!(command, RemoteCommand::Shutdown);
                if command_tx.send(command).is_err() || shutdown {
                    break;
                }
            }
            None if line.trim().is_empty() => {}
            None => println!("{}", HELP),
        }
    }

    let _ = command_tx.send(RemoteCommand::Shutdown);
    if let Err(e) = supervisor_task.await {
        error!("Supervisor task failed: {}", e);
    }
    info!("Goodbye");
    Ok(())
}
