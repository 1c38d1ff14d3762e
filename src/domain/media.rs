//! Media-session bridge.
//!
//! Hardware media buttons (headset, watch, lock screen) drive the camera,
//! and the camera state is mirrored back as "now playing" text:
//!
//! ```text
//! artist: <resolution>|<lens>|<fps>|<battery>%|<disk free>
//! title : Not Connected | Ready | Starting | Recording | Stopping | In sleep | Waking up
//! ```

use std::collections::BTreeMap;
use tracing::info;

/// Button presses delivered by the OS media session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaAction {
    Play,
    Pause,
    SkipNext,
    SkipPrevious,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraIntent {
    StartRecording,
    StopRecording,
    AddHighlight,
}

impl From<MediaAction> for CameraIntent {
    fn from(action: MediaAction) -> Self {
        match action {
            MediaAction::Play => Self::StartRecording,
            MediaAction::Pause => Self::StopRecording,
            MediaAction::SkipNext | MediaAction::SkipPrevious => Self::AddHighlight,
        }
    }
}

/// Recording state as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingIndicator {
    #[default]
    NotConnected,
    Ready,
    Starting,
    Recording,
    Stopping,
    Sleeping,
    WakingUp,
}

impl RecordingIndicator {
    pub fn title(self) -> &'static str {
        match self {
            Self::NotConnected => "Not Connected",
            Self::Ready => "Ready",
            Self::Starting => "Starting",
            Self::Recording => "Recording",
            Self::Stopping => "Stopping",
            Self::Sleeping => "In sleep",
            Self::WakingUp => "Waking up",
        }
    }

    /// Settle a transition once the camera reports its encoding state.
    /// `Starting` holds until encoding begins, `Stopping` until it ends.
    pub fn after_poll(self, encoding: bool) -> Self {
        match (self, encoding) {
            (Self::Sleeping, _) => Self::Sleeping,
            (Self::Starting, false) => Self::Starting,
            (Self::Stopping, true) => Self::Stopping,
            (_, true) => Self::Recording,
            (_, false) => Self::Ready,
        }
    }
}

/// Text pushed to the media session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlaying {
    pub artist: String,
    pub title: String,
}

impl NowPlaying {
    pub fn compose(
        settings: &BTreeMap<String, String>,
        statuses: &BTreeMap<String, String>,
        indicator: RecordingIndicator,
    ) -> Self {
        let field = |map: &BTreeMap<String, String>, key: &str| {
            map.get(key).cloned().unwrap_or_else(|| "-".to_string())
        };

        let disk = statuses
            .get("camera_disk_space")
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(format_kb)
            .unwrap_or_else(|| "-".to_string());

        Self {
            artist: format!(
                "{}|{}|{}|{}%|{}",
                field(settings, "resolution"),
                field(settings, "lens"),
                field(settings, "fps"),
                field(statuses, "battery_level"),
                disk
            ),
            title: indicator.title().to_string(),
        }
    }
}

/// Human-readable size for a kilobyte count
pub fn format_kb(kilobytes: u64) -> String {
    if kilobytes < 1024 {
        format!("{} KB", kilobytes)
    } else if kilobytes < 1024 * 1024 {
        format!("{} MB", kilobytes / 1024)
    } else {
        let gb = kilobytes as f64 / (1024.0 * 1024.0);
        if gb > 10.0 {
            format!("{:.0} GB", gb)
        } else {
            format!("{:.1} GB", gb)
        }
    }
}

/// OS media session the camera state is mirrored into
pub trait MediaSession: Send + Sync {
    fn update(&self, now_playing: &NowPlaying);

    fn set_playing(&self, playing: bool);
}

/// Media session that only logs, for hosts without a media service
#[derive(Debug, Default)]
pub struct LoggingMediaSession;

impl MediaSession for LoggingMediaSession {
    fn update(&self, now_playing: &NowPlaying) {
        info!("Now playing: {} - {}", now_playing.title, now_playing.artist);
    }

    fn set_playing(&self, playing: bool) {
        info!("Media session {}", if playing { "playing" } else { "paused" });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_media_actions_map_to_intents() {
        assert_eq!(CameraIntent::from(MediaAction::Play), CameraIntent::StartRecording);
        assert_eq!(CameraIntent::from(MediaAction::Pause), CameraIntent::StopRecording);
        assert_eq!(CameraIntent::from(MediaAction::SkipNext), CameraIntent::AddHighlight);
        assert_eq!(
            CameraIntent::from(MediaAction::SkipPrevious),
            CameraIntent::AddHighlight
        );
    }

    #[test]
    fn test_format_kb() {
        assert_eq!(format_kb(512), "512 KB");
        assert_eq!(format_kb(2048), "2 MB");
        assert_eq!(format_kb(5 * 1024 * 1024 + 512 * 1024), "5.5 GB");
        assert_eq!(format_kb(64 * 1024 * 1024), "64 GB");
    }

    #[test]
    fn test_now_playing_text() {
        let settings = map(&[("resolution", "4K"), ("fps", "60"), ("lens", "w")]);
        let statuses = map(&[("battery_level", "85"), ("camera_disk_space", "2048")]);
        let now = NowPlaying::compose(&settings, &statuses, RecordingIndicator::Ready);
        assert_eq!(now.artist, "4K|w|60|85%|2 MB");
        assert_eq!(now.title, "Ready");

        let empty = NowPlaying::compose(
            &BTreeMap::new(),
            &BTreeMap::new(),
            RecordingIndicator::NotConnected,
        );
        assert_eq!(empty.artist, "-|-|-|-%|-");
        assert_eq!(empty.title, "Not Connected");
    }

    #[test]
    fn test_indicator_settles_on_encoding_state() {
        assert_eq!(
            RecordingIndicator::Ready.after_poll(true),
            RecordingIndicator::Recording
        );
        assert_eq!(
            RecordingIndicator::Starting.after_poll(false),
            RecordingIndicator::Starting
        );
        assert_eq!(
            RecordingIndicator::Starting.after_poll(true),
            RecordingIndicator::Recording
        );
        assert_eq!(
            RecordingIndicator::Stopping.after_poll(true),
            RecordingIndicator::Stopping
        );
        assert_eq!(
            RecordingIndicator::Stopping.after_poll(false),
            RecordingIndicator::Ready
        );
        assert_eq!(RecordingIndicator::Sleeping.title(), "In sleep");
    }
}
