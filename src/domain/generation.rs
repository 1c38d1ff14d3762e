//! Camera generation detection.
//!
//! The cameras never report a model over BLE, so the generation is inferred
//! from what the responses contain:
//!
//! ```text
//! settings dump with 234         -> HERO13+
//! status dump with status 99     -> HERO10
//! status dump without status 99  -> HERO11+ (unless already HERO13+)
//! fast-path length mismatch      -> Unknown (re-detect from full dumps)
//! ```

use crate::domain::dictionary::{self, SettingsTable};
use crate::domain::time_sync::TimeConvention;

/// Status only HERO10 firmware reports
pub const HERO10_ONLY_STATUS: u8 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Generation {
    #[default]
    Unknown,
    Hero10,
    Hero11Plus,
    Hero13Plus,
}

impl Generation {
    pub fn settings_table(self) -> SettingsTable {
        match self {
            Self::Hero13Plus => SettingsTable::Hero13Plus,
            _ => SettingsTable::Legacy,
        }
    }

    /// HERO10 keeps UTC; everything newer (and the unknown default) keeps local time
    pub fn time_convention(self) -> TimeConvention {
        match self {
            Self::Hero10 => TimeConvention::Utc,
            _ => TimeConvention::Local,
        }
    }

    /// Setting ids requested by the settings digest query: (fps, lens)
    pub fn digest_setting_ids(self) -> (u8, u8) {
        let table = self.settings_table();
        match (table.setting_id("fps"), table.setting_id("lens")) {
            (Some(fps), Some(lens)) => (fps, lens),
            _ => (3, 121),
        }
    }

    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Hero10 => "HERO10",
            Self::Hero11Plus => "HERO11+",
            Self::Hero13Plus => "HERO13+",
        }
    }
}

/// What a decoded response tells us about the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    SettingsDump { table: SettingsTable },
    StatusDump { has_hero10_status: bool },
    /// A positional response whose length did not match the expected layout
    FastPathMismatch,
    /// Partial query answers, command acks and the like
    Other,
}

impl ResponseShape {
    pub fn is_full_dump(&self) -> bool {
        matches!(self, Self::SettingsDump { .. } | Self::StatusDump { .. })
    }

    /// Classify a query response by the ids it carries
    pub fn from_query_ids<I: IntoIterator<Item = u8> + Clone>(ids: I) -> Self {
        if let Some(table) = SettingsTable::from_dump_ids(ids.clone()) {
            return Self::SettingsDump { table };
        }

        let mut is_status = false;
        let mut has_hero10_status = false;
        for id in ids {
            is_status |= id == dictionary::STATUS_DUMP_MARKER;
            has_hero10_status |= id == HERO10_ONLY_STATUS;
        }
        if is_status {
            Self::StatusDump { has_hero10_status }
        } else {
            Self::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub generation: Generation,
    pub changed: bool,
}

/// Infer the generation after a response of `shape` while `current` is known
pub fn detect(shape: &ResponseShape, current: Generation) -> Detection {
    let generation = match *shape {
        ResponseShape::SettingsDump {
            table: SettingsTable::Hero13Plus,
        } => Generation::Hero13Plus,
        ResponseShape::SettingsDump {
            table: SettingsTable::Legacy,
        } => match current {
            Generation::Hero13Plus => Generation::Hero11Plus,
            other => other,
        },
        ResponseShape::StatusDump { has_hero10_status } => match current {
            Generation::Hero13Plus => Generation::Hero13Plus,
            _ if has_hero10_status => Generation::Hero10,
            _ => Generation::Hero11Plus,
        },
        ResponseShape::FastPathMismatch => Generation::Unknown,
        ResponseShape::Other => current,
    };

    Detection {
        generation,
        changed: generation != current,
    }
}
