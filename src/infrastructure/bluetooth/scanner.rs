//! BLE Scanner Module
//!
//! Keeps the cameras heard in recent advertisements and picks the one that
//! matches the configured target name.

use crate::domain::models::ScannedDevice;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Target name that accepts whichever camera is found first
pub const ANY_CAMERA: &str = "any";

/// Compare camera names ignoring case and whitespace
pub fn names_match(a: &str, b: &str) -> bool {
    let normalize = |s: &str| -> String {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect()
    };
    normalize(a) == normalize(b)
}

pub fn is_any_camera(target: &str) -> bool {
    names_match(target, ANY_CAMERA)
}

#[derive(Debug, Clone)]
struct Sighting {
    device: ScannedDevice,
    last_seen: Instant,
}

/// Cameras seen by the scanner, forgotten after `prune_after` of silence
#[derive(Debug)]
pub struct FoundDevices {
    devices: HashMap<u64, Sighting>,
    prune_after: Duration,
}

impl FoundDevices {
    pub fn new(prune_after: Duration) -> Self {
        Self {
            devices: HashMap::new(),
            prune_after,
        }
    }

    /// Record an advertisement. Returns true the first time an address is seen.
    pub fn record(&mut self, device: ScannedDevice, now: Instant) -> bool {
        let is_new = !self.devices.contains_key(&device.address);
        if is_new {
            info!(
                "Found camera {} ({:#X}, {} dBm)",
                device.name, device.address, device.signal_strength
            );
        }
        self.devices.insert(
            device.address,
            Sighting {
                device,
                last_seen: now,
            },
        );
        is_new
    }

    /// Drop cameras not heard from recently and return them
    pub fn prune(&mut self, now: Instant) -> Vec<ScannedDevice> {
        let prune_after = self.prune_after;
        let mut removed = Vec::new();
        self.devices.retain(|_, sighting| {
            let fresh = now.saturating_duration_since(sighting.last_seen) < prune_after;
            if !fresh {
                removed.push(sighting.device.clone());
            }
            fresh
        });
        for device in &removed {
            debug!("Forgetting camera {} ({:#X})", device.name, device.address);
        }
        removed
    }

    /// Known cameras, strongest signal first
    pub fn snapshot(&self) -> Vec<ScannedDevice> {
        let mut devices: Vec<ScannedDevice> =
            self.devices.values().map(|s| s.device.clone()).collect();
        devices.sort_by(|a, b| {
            b.signal_strength
                .cmp(&a.signal_strength)
                .then_with(|| a.address.cmp(&b.address))
        });
        devices
    }

    /// Camera to connect to for `target`: the strongest one for "any",
    /// otherwise the first whose name matches
    pub fn find_target(&self, target: &str) -> Option<ScannedDevice> {
        let any = is_any_camera(target);
        self.snapshot()
            .into_iter()
            .find(|device| any || names_match(&device.name, target))
    }
}
