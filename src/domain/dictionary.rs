//! Protocol dictionary: numeric setting/status ids and option codes to
//! human-readable names.
//!
//! Every lookup takes an explicit [`SettingsTable`]. There is no global table
//! selector; callers derive the table from the detected camera generation.
//! Misses are returned as `None` and dropped from formatted output.

use std::collections::BTreeMap;
use tracing::trace;

/// Setting id present only in HERO13+ settings dumps (fps)
pub const HERO13_SETTINGS_MARKER: u8 = 234;

/// Setting id present in every pre-HERO13 settings dump
pub const LEGACY_SETTINGS_MARKER: u8 = 134;

/// Status id present in every status dump (wifi_enabled)
pub const STATUS_DUMP_MARKER: u8 = 17;

/// Settings id table. The generations disagree on the fps and lens ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsTable {
    /// HERO12 and below
    Legacy,
    Hero13Plus,
}

const LEGACY_SETTINGS: &[(u8, &str)] = &[
    (2, "resolution"),
    (3, "fps"),
    (145, "shutter_speed"),
    (102, "iso_min"),
    (13, "iso_max"),
    (115, "white_balance"),
    (116, "color"),
    (117, "sharpness"),
    (118, "exposure"),
    (121, "lens"),
    (124, "bitrate"),
    (88, "lcd_brightness"),
    (144, "mode"),
    (30, "ssid"),
];

const HERO13_SETTINGS: &[(u8, &str)] = &[
    (2, "resolution"),
    (234, "fps"),
    (145, "shutter_speed"),
    (102, "iso_min"),
    (13, "iso_max"),
    (115, "white_balance"),
    (116, "color"),
    (117, "sharpness"),
    (118, "exposure"),
    (229, "lens"),
    (124, "bitrate"),
    (88, "lcd_brightness"),
    (144, "mode"),
    (30, "ssid"),
];

impl SettingsTable {
    /// Pick the table from the ids of a settings dump.
    /// Returns `None` when the ids do not look like a settings dump.
    pub fn from_dump_ids<I: IntoIterator<Item = u8>>(ids: I) -> Option<Self> {
        let mut legacy = false;
        for id in ids {
            if id == HERO13_SETTINGS_MARKER {
                return Some(Self::Hero13Plus);
            }
            legacy |= id == LEGACY_SETTINGS_MARKER;
        }
        legacy.then_some(Self::Legacy)
    }

    pub fn entries(self) -> &'static [(u8, &'static str)] {
        match self {
            Self::Legacy => LEGACY_SETTINGS,
            Self::Hero13Plus => HERO13_SETTINGS,
        }
    }

    pub fn setting_name(self, id: u8) -> Option<&'static str> {
        self.entries()
            .iter()
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, name)| *name)
    }

    pub fn setting_id(self, name: &str) -> Option<u8> {
        self.entries()
            .iter()
            .find(|(_, entry_name)| *entry_name == name)
            .map(|(id, _)| *id)
    }
}

/// Bidirectional option table (code <-> label) for one setting
#[derive(Debug)]
pub struct OptionTable {
    pub name: &'static str,
    entries: &'static [(u8, &'static str)],
}

impl OptionTable {
    pub fn label(&self, code: u64) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|(c, _)| *c as u64 == code)
            .map(|(_, label)| *label)
    }

    pub fn code(&self, label: &str) -> Option<u8> {
        self.entries
            .iter()
            .find(|(_, l)| *l == label)
            .map(|(code, _)| *code)
    }

    pub fn labels(&self) -> impl Iterator<Item = &'static str> {
        self.entries.iter().map(|(_, label)| *label)
    }
}

pub static RESOLUTION: OptionTable = OptionTable {
    name: "resolution",
    entries: &[
        (1, "4K"),
        (4, "2.7K"),
        (6, "2.7K4:3"),
        (7, "1440"),
        (9, "1080p"),
        (18, "4K4:3"),
        (24, "5K"),
        (25, "5K4:3"),
        (100, "5.3K"),
    ],
};

pub static FPS: OptionTable = OptionTable {
    name: "fps",
    entries: &[
        (0, "240"),
        (1, "120"),
        (2, "100"),
        (5, "60"),
        (6, "50"),
        (8, "30"),
        (9, "25"),
        (10, "24"),
        (13, "200"),
    ],
};

pub static SHUTTER_SPEED: OptionTable = OptionTable {
    name: "shutter_speed",
    entries: &[
        (0, "Auto"),
        (3, "1/24"),
        (4, "1/25"),
        (5, "1/30"),
        (6, "1/48"),
        (7, "1/50"),
        (8, "1/60"),
        (11, "1/96"),
        (12, "1/100"),
        (13, "1/120"),
        (16, "1/192"),
        (17, "1/200"),
        (18, "1/240"),
        (25, "1/384"),
        (21, "1/400"),
        (22, "1/480"),
        (28, "1/800"),
        (23, "1/960"),
        (29, "1/1600"),
        (24, "1/1920"),
        (30, "1/3200"),
        (31, "1/3840"),
    ],
};

const ISO_ENTRIES: &[(u8, &str)] = &[
    (0, "6400"),
    (3, "3200"),
    (1, "1600"),
    (4, "800"),
    (2, "400"),
    (7, "200"),
    (8, "100"),
];

pub static ISO_MIN: OptionTable = OptionTable {
    name: "iso_min",
    entries: ISO_ENTRIES,
};

pub static ISO_MAX: OptionTable = OptionTable {
    name: "iso_max",
    entries: ISO_ENTRIES,
};

pub static WHITE_BALANCE: OptionTable = OptionTable {
    name: "white_balance",
    entries: &[
        (3, "6500K"),
        (7, "6000K"),
        (2, "5500K"),
        (12, "5000K"),
        (11, "4500K"),
        (0, "Auto"),
        (4, "Native"),
        (5, "4000K"),
        (10, "3200K"),
        (9, "2800K"),
        (8, "2300K"),
    ],
};

pub static COLOR: OptionTable = OptionTable {
    name: "color",
    entries: &[(1, "Flat"), (2, "Natural"), (100, "Vibrant")],
};

pub static SHARPNESS: OptionTable = OptionTable {
    name: "sharpness",
    entries: &[(0, "High"), (1, "Medium"), (2, "Low")],
};

pub static EXPOSURE: OptionTable = OptionTable {
    name: "exposure",
    entries: &[
        (8, "-2.0"),
        (7, "-1.5"),
        (6, "-1.0"),
        (5, "-0.5"),
        (4, "0.0"),
        (3, "0.5"),
        (2, "1.0"),
        (1, "1.5"),
        (0, "2.0"),
    ],
};

pub static LENS: OptionTable = OptionTable {
    name: "lens",
    entries: &[
        (10, "loc"),
        (7, "msv"),
        (3, "sv"),
        (0, "w"),
        (4, "l"),
        (8, "lev"),
        (2, "n"),
    ],
};

pub static BITRATE: OptionTable = OptionTable {
    name: "bitrate",
    entries: &[(1, "High"), (100, "Standard")],
};

pub static LCD_BRIGHTNESS: OptionTable = OptionTable {
    name: "lcd_brightness",
    entries: &[
        (10, "10%"),
        (20, "20%"),
        (30, "30%"),
        (40, "40%"),
        (50, "50%"),
        (60, "60%"),
        (70, "70%"),
        (80, "80%"),
        (90, "90%"),
        (100, "100%"),
    ],
};

pub static MODE: OptionTable = OptionTable {
    name: "mode",
    entries: &[
        (12, "Video"),
        (15, "Looping"),
        (16, "Photo"),
        (17, "Burst Photo"),
        (18, "Night Photo"),
        (19, "Time Lapse Video"),
        (20, "Time Lapse Photo"),
        (21, "Night Lapse Photo"),
        (24, "Time Warp Video"),
        (25, "Live Burst"),
        (26, "Night Lapse Video"),
        (27, "Slo-Mo"),
    ],
};

pub static PRESET: OptionTable = OptionTable {
    name: "preset",
    entries: &[(0, "standard"), (1, "activity"), (2, "cinematic")],
};

static OPTION_TABLES: &[&OptionTable] = &[
    &RESOLUTION,
    &FPS,
    &SHUTTER_SPEED,
    &ISO_MIN,
    &ISO_MAX,
    &WHITE_BALANCE,
    &COLOR,
    &SHARPNESS,
    &EXPOSURE,
    &LENS,
    &BITRATE,
    &LCD_BRIGHTNESS,
    &MODE,
    &PRESET,
];

/// Option table for a setting name, if the setting has enumerated options
pub fn option_table(setting_name: &str) -> Option<&'static OptionTable> {
    OPTION_TABLES
        .iter()
        .copied()
        .find(|table| table.name == setting_name)
}

pub fn option_code(setting_name: &str, label: &str) -> Option<u8> {
    option_table(setting_name)?.code(label)
}

pub fn option_label(setting_name: &str, code: u64) -> Option<&'static str> {
    option_table(setting_name)?.label(code)
}

/// How a status value is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Int,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusDescriptor {
    pub id: u8,
    pub name: &'static str,
    pub value_type: ValueType,
}

const fn status(id: u8, name: &'static str, value_type: ValueType) -> StatusDescriptor {
    StatusDescriptor {
        id,
        name,
        value_type,
    }
}

pub static STATUSES: &[StatusDescriptor] = &[
    status(1, "battery_present", ValueType::Bool),
    status(6, "camera_hot", ValueType::Bool),
    status(8, "camera_busy", ValueType::Bool),
    status(9, "quick_capture", ValueType::Bool),
    status(10, "encoding", ValueType::Bool),
    status(11, "lcd_locked", ValueType::Bool),
    status(13, "current_video_duration", ValueType::Int),
    status(17, "wifi_enabled", ValueType::Bool),
    status(19, "pairing_state", ValueType::Int),
    status(29, "wlan_connected_name", ValueType::String),
    status(31, "devices_connected_count", ValueType::Int),
    status(32, "preview_stream_enabled", ValueType::Bool),
    status(33, "sd_card_status", ValueType::Int),
    status(35, "video_time_remaining", ValueType::Int),
    status(39, "videos_on_sd_card", ValueType::Int),
    status(54, "camera_disk_space", ValueType::Int),
    status(55, "preview_stream_allowed", ValueType::Bool),
    status(56, "wlan_connected_strength", ValueType::Int),
    status(59, "last_highlight_time", ValueType::Int),
    status(60, "status_updates_interval", ValueType::Int),
    status(69, "ap_mode", ValueType::Bool),
    status(70, "battery_level", ValueType::Int),
    status(75, "zoom", ValueType::Int),
    status(76, "wifi_band", ValueType::Int),
    status(81, "5ghz_available", ValueType::Bool),
    status(82, "system_ready", ValueType::Bool),
    status(86, "orientation", ValueType::Int),
    status(105, "lens_type", ValueType::Int),
    status(111, "sd_card_meets_requirements", ValueType::Bool),
    status(112, "sd_card_errors_count", ValueType::Int),
    status(114, "camera_control_status", ValueType::Int),
    status(115, "usb_connected", ValueType::Bool),
    status(116, "usb_control_enabled", ValueType::Bool),
];

pub fn status_descriptor(id: u8) -> Option<&'static StatusDescriptor> {
    STATUSES.iter().find(|s| s.id == id)
}

pub fn status_id(name: &str) -> Option<u8> {
    STATUSES.iter().find(|s| s.name == name).map(|s| s.id)
}

/// Interpret raw value bytes as a big-endian unsigned integer.
/// Empty values and values wider than 8 bytes do not parse.
pub fn parse_be(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() || bytes.len() > 8 {
        return None;
    }
    Some(bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
}

pub fn format_status_value(value_type: ValueType, bytes: &[u8]) -> Option<String> {
    match value_type {
        ValueType::Bool => parse_be(bytes).map(|v| (v != 0).to_string()),
        ValueType::Int => parse_be(bytes).map(|v| v.to_string()),
        ValueType::String => {
            let end = bytes
                .iter()
                .rposition(|b| *b != 0)
                .map(|i| i + 1)
                .unwrap_or(0);
            Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
        }
    }
}

/// Render a settings snapshot as `name -> option label`
pub fn format_settings(
    values: &BTreeMap<u8, Vec<u8>>,
    table: SettingsTable,
) -> BTreeMap<String, String> {
    let mut formatted = BTreeMap::new();
    for (id, raw) in values {
        let Some(name) = table.setting_name(*id) else {
            trace!("No setting {} in {:?} table", id, table);
            continue;
        };
        match parse_be(raw).and_then(|code| option_label(name, code)) {
            Some(label) => {
                formatted.insert(name.to_string(), label.to_string());
            }
            None => trace!("No label for {} = {:02X?}", name, raw),
        }
    }
    formatted
}

/// Render a status snapshot as `name -> value`
pub fn format_statuses(values: &BTreeMap<u8, Vec<u8>>) -> BTreeMap<String, String> {
    let mut formatted = BTreeMap::new();
    for (id, raw) in values {
        let Some(descriptor) = status_descriptor(*id) else {
            trace!("Unknown status {}", id);
            continue;
        };
        if let Some(value) = format_status_value(descriptor.value_type, raw) {
            formatted.insert(descriptor.name.to_string(), value);
        }
    }
    formatted
}
