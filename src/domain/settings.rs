use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "gopro_remote".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// BLE timeouts and loop intervals, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BleTimings {
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_ms: u64,
    #[serde(default = "default_link_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_link_timeout")]
    pub discover_timeout_ms: u64,
    #[serde(default = "default_link_timeout")]
    pub notify_timeout_ms: u64,
    // Reading the WiFi password triggers pairing, which waits on the user
    #[serde(default = "default_pairing_timeout")]
    pub pairing_timeout_ms: u64,
    #[serde(default = "default_io_timeout")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_io_timeout")]
    pub response_timeout_ms: u64,

    #[serde(default = "default_idle_poll_interval")]
    pub idle_poll_interval_ms: u64,
    #[serde(default = "default_recording_poll_interval")]
    pub recording_poll_interval_ms: u64,
    #[serde(default = "default_keep_alive_interval")]
    pub keep_alive_interval_ms: u64,
    #[serde(default = "default_time_check_delay")]
    pub time_check_delay_ms: u64,
    #[serde(default = "default_slow_interval")]
    pub time_check_interval_ms: u64,
    #[serde(default = "default_slow_interval")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_scan_timeout")]
    pub device_prune_after_ms: u64,
    #[serde(default = "default_power_off_delay")]
    pub power_off_delay_ms: u64,
}

impl Default for BleTimings {
    fn default() -> Self {
        Self {
            scan_timeout_ms: default_scan_timeout(),
            connect_timeout_ms: default_link_timeout(),
            discover_timeout_ms: default_link_timeout(),
            notify_timeout_ms: default_link_timeout(),
            pairing_timeout_ms: default_pairing_timeout(),
            write_timeout_ms: default_io_timeout(),
            response_timeout_ms: default_io_timeout(),
            idle_poll_interval_ms: default_idle_poll_interval(),
            recording_poll_interval_ms: default_recording_poll_interval(),
            keep_alive_interval_ms: default_keep_alive_interval(),
            time_check_delay_ms: default_time_check_delay(),
            time_check_interval_ms: default_slow_interval(),
            reconnect_interval_ms: default_slow_interval(),
            device_prune_after_ms: default_scan_timeout(),
            power_off_delay_ms: default_power_off_delay(),
        }
    }
}

impl BleTimings {
    /// Full status+settings poll cycle length
    pub fn poll_interval(&self, recording: bool) -> Duration {
        Duration::from_millis(if recording {
            self.recording_poll_interval_ms
        } else {
            self.idle_poll_interval_ms
        })
    }
}

fn default_scan_timeout() -> u64 {
    20_000
}
fn default_link_timeout() -> u64 {
    10_000
}
fn default_io_timeout() -> u64 {
    5_000
}
fn default_pairing_timeout() -> u64 {
    30_000
}
fn default_idle_poll_interval() -> u64 {
    3_000
}
fn default_recording_poll_interval() -> u64 {
    1_000
}
fn default_keep_alive_interval() -> u64 {
    3_000
}
fn default_time_check_delay() -> u64 {
    3_000
}
fn default_slow_interval() -> u64 {
    15_000
}
fn default_power_off_delay() -> u64 {
    2_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Desired camera settings by name, applied through the dictionary
    #[serde(default = "default_camera_settings")]
    pub camera_settings: BTreeMap<String, String>,
    /// Advertised camera name to connect to, or "any"
    #[serde(default = "default_target_camera")]
    pub target_camera: String,
    #[serde(default)]
    pub last_connected_address: Option<u64>,
    #[serde(default)]
    pub last_connected_name: Option<String>,
    /// Unix milliseconds of the last camera settings change
    #[serde(default)]
    pub updated_on: Option<i64>,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // BLE Settings
    #[serde(default)]
    pub ble_timings: BleTimings,
    #[serde(default = "default_true")]
    pub power_off_after_stop: bool,
    /// Poll with the short digest queries once the generation is known
    #[serde(default = "default_false")]
    pub fast_path_polling: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            camera_settings: default_camera_settings(),
            target_camera: default_target_camera(),
            last_connected_address: None,
            last_connected_name: None,
            updated_on: None,
            log_settings: LogSettings::default(),
            ble_timings: BleTimings::default(),
            power_off_after_stop: default_true(),
            fast_path_polling: default_false(),
        }
    }
}

fn default_camera_settings() -> BTreeMap<String, String> {
    [
        ("resolution", "4K"),
        ("fps", "120"),
        ("shutter_speed", "Auto"),
        ("iso_min", "100"),
        ("iso_max", "1600"),
        ("white_balance", "Auto"),
        ("color", "Flat"),
        ("sharpness", "Low"),
        ("exposure", "-0.5"),
        ("lens", "n"),
        ("bitrate", "Standard"),
        ("lcd_brightness", "100%"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_target_camera() -> String {
    "any".to_string()
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults when it is missing or invalid
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("GoProRemote");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Merge new camera settings. Keys that are not already known are ignored.
    /// Returns the entries that actually changed.
    pub fn update_camera_settings(
        &mut self,
        new_settings: &BTreeMap<String, String>,
        updated_on: Option<i64>,
    ) -> anyhow::Result<BTreeMap<String, String>> {
        let mut changed = BTreeMap::new();
        for (key, value) in self.settings.camera_settings.iter_mut() {
            if let Some(new_value) = new_settings.get(key) {
                if value != new_value {
                    *value = new_value.clone();
                    changed.insert(key.clone(), new_value.clone());
                }
            }
        }
        if updated_on.is_some() {
            self.settings.updated_on = updated_on;
        }
        self.save()?;
        Ok(changed)
    }

    pub fn set_target_camera(&mut self, name: &str) -> anyhow::Result<()> {
        if self.settings.target_camera != name {
            self.settings.target_camera = name.to_string();
            self.save()?;
        }
        Ok(())
    }

    pub fn remember_device(&mut self, address: u64, name: &str) -> anyhow::Result<()> {
        self.settings.last_connected_address = Some(address);
        self.settings.last_connected_name = Some(name.to_string());
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_settings_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "gopro_remote_{}_{}_settings.json",
            name,
            std::process::id()
        ));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.target_camera, "any");
        assert_eq!(
            settings.camera_settings.get("resolution").map(String::as_str),
            Some("4K")
        );
        assert_eq!(settings.camera_settings.len(), 12);
        assert_eq!(settings.ble_timings.pairing_timeout_ms, 30_000);
        assert_eq!(
            settings.ble_timings.poll_interval(true),
            Duration::from_millis(1000)
        );
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{ "target_camera": "GoPro 1234", "ble_timings": { "scan_timeout_ms": 5000 } }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.target_camera, "GoPro 1234");
        assert_eq!(settings.ble_timings.scan_timeout_ms, 5000);
        assert_eq!(settings.ble_timings.response_timeout_ms, 5000);
        assert_eq!(settings.log_settings.file_name_prefix, "gopro_remote");
        assert!(settings.power_off_after_stop);
    }

    #[test]
    fn test_update_only_known_keys() {
        let path = temp_settings_path("update");
        let mut service = SettingsService::with_path(path.clone());

        let update: BTreeMap<String, String> = [("resolution", "5K"), ("bogus", "1"), ("fps", "120")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let changed = service.update_camera_settings(&update, Some(42)).unwrap();

        assert_eq!(changed.len(), 1);
        assert_eq!(changed.get("resolution").map(String::as_str), Some("5K"));
        assert!(!service.get().camera_settings.contains_key("bogus"));

        let reloaded = SettingsService::with_path(path.clone());
        assert_eq!(
            reloaded.get().camera_settings.get("resolution").map(String::as_str),
            Some("5K")
        );
        assert_eq!(reloaded.get().updated_on, Some(42));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_remember_device() {
        let path = temp_settings_path("remember");
        let mut service = SettingsService::with_path(path.clone());
        service.remember_device(0xAABB, "GoPro 0001").unwrap();

        let reloaded = SettingsService::with_path(path.clone());
        assert_eq!(reloaded.get().last_connected_address, Some(0xAABB));
        assert_eq!(
            reloaded.get().last_connected_name.as_deref(),
            Some("GoPro 0001")
        );
        let _ = fs::remove_file(path);
    }
}
