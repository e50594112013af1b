//! Data structures for device events and sensor samples.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder for identity fields the platform cannot resolve.
pub const UNKNOWN_FIELD: &str = "Unknown";

/// Kind of a detected USB device transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceEventKind {
    /// Device newly present
    Added,
    /// Device newly absent
    Removed,
}

impl DeviceEventKind {
    /// Wire/storage representation of the event kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceEventKind::Added => "add",
            DeviceEventKind::Removed => "remove",
        }
    }

    /// Parse the storage representation back into a kind.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "add" => Some(DeviceEventKind::Added),
            "remove" => Some(DeviceEventKind::Removed),
            _ => None,
        }
    }
}

/// A detected USB attach/detach transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceEvent {
    /// Instant the transition was detected
    pub timestamp: DateTime<Utc>,
    /// Attach or detach
    pub kind: DeviceEventKind,
    /// Reported vendor, or "Unknown"
    pub vendor: String,
    /// Reported serial number, or "Unknown"
    pub serial: String,
    /// Reported UUID, or "Unknown"
    pub uuid: String,
}

impl DeviceEvent {
    /// Build an event from a device identity at the current wall-clock time.
    pub fn from_identity(kind: DeviceEventKind, identity: &DeviceIdentity) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            vendor: identity.vendor.clone(),
            serial: identity.serial.clone(),
            uuid: identity.uuid.clone(),
        }
    }
}

/// Identity of an attached device, used for in-memory set membership.
///
/// Two devices are the same only if all four fields match. The `device_id`
/// is a platform-native path or identifier; it is never persisted.
/// Unresolvable fields hold the literal "Unknown", so genuinely different
/// devices with fully unresolvable identities cannot be told apart. That is
/// an accepted resolution limit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    /// Platform-native device path or identifier
    pub device_id: String,
    pub vendor: String,
    pub serial: String,
    pub uuid: String,
}

impl DeviceIdentity {
    /// Create an identity, substituting "Unknown" for absent fields.
    pub fn new(
        device_id: impl Into<String>,
        vendor: Option<String>,
        serial: Option<String>,
        uuid: Option<String>,
    ) -> Self {
        let or_unknown = |field: Option<String>| field.unwrap_or_else(|| UNKNOWN_FIELD.to_string());
        Self {
            device_id: device_id.into(),
            vendor: or_unknown(vendor),
            serial: or_unknown(serial),
            uuid: or_unknown(uuid),
        }
    }
}

/// Battery health classification derived from the charge level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BatteryHealth {
    Good,
    Fair,
    Poor,
    Critical,
    /// No battery present on this host
    NoBattery,
    /// Battery state could not be read
    Unknown,
}

impl BatteryHealth {
    /// Classify a battery charge level.
    ///
    /// Pure threshold mapping: >= 80 Good, >= 50 Fair, >= 20 Poor,
    /// otherwise Critical. The `NoBattery` and `Unknown` sentinels are
    /// assigned by the sampler, not derived from a level.
    pub fn from_level(level: u8) -> Self {
        match level {
            80..=u8::MAX => BatteryHealth::Good,
            50..=79 => BatteryHealth::Fair,
            20..=49 => BatteryHealth::Poor,
            _ => BatteryHealth::Critical,
        }
    }

    /// Storage representation of the health value.
    pub fn as_str(&self) -> &'static str {
        match self {
            BatteryHealth::Good => "Good",
            BatteryHealth::Fair => "Fair",
            BatteryHealth::Poor => "Poor",
            BatteryHealth::Critical => "Critical",
            BatteryHealth::NoBattery => "NoBattery",
            BatteryHealth::Unknown => "Unknown",
        }
    }

    /// Parse the storage representation back into a health value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Good" => Some(BatteryHealth::Good),
            "Fair" => Some(BatteryHealth::Fair),
            "Poor" => Some(BatteryHealth::Poor),
            "Critical" => Some(BatteryHealth::Critical),
            "NoBattery" => Some(BatteryHealth::NoBattery),
            "Unknown" => Some(BatteryHealth::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for BatteryHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One composite reading of CPU/GPU temperature and battery state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorSample {
    /// Instant the sampling tick began
    pub timestamp: DateTime<Utc>,
    /// CPU temperature in degrees Celsius
    pub cpu_temp_c: f32,
    /// GPU temperature in degrees Celsius; `None` when no GPU subsystem is
    /// present, never conflated with a real 0.0 reading
    pub gpu_temp_c: Option<f32>,
    /// Battery charge level, 0-100
    pub battery_level: u8,
    /// Health classification for the battery
    pub battery_health: BatteryHealth,
}
