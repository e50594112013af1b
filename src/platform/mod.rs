//! Platform capability interfaces and host detection.
//!
//! Each concern the monitoring engine needs from the host (device
//! enumeration, device-change push notifications, temperature reads, GPU
//! probing, battery status) is a narrow trait. The concrete set of
//! capabilities is selected once at startup based on the host OS; the
//! monitoring core only ever sees the traits. A capability that is missing
//! on a host is never fatal: the engine degrades to simulated or default
//! readings instead.

pub mod probe;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "windows")]
pub mod windows;

use std::collections::HashSet;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::monitor::data::{DeviceEventKind, DeviceIdentity};

/// Enumerate the devices currently attached to the host.
pub trait DeviceEnumerator: Send {
    /// One full scan of attached devices. A failed scan returns an error;
    /// it must not return a partial set as if it were complete.
    fn enumerate(&mut self) -> Result<HashSet<DeviceIdentity>>;
}

/// One entry from a push-based device-change subscription.
#[derive(Debug, Clone)]
pub struct DeviceChange {
    pub kind: DeviceEventKind,
    pub identity: DeviceIdentity,
}

/// Receiver half of an optional push-based device-change subscription.
///
/// A platform backend that can observe attach/detach natively feeds one of
/// these channels; hosts without the capability simply leave it absent and
/// the tracker falls back to poll-diffing.
pub type DeviceChangeStream = mpsc::Receiver<DeviceChange>;

/// A single source of CPU temperature readings.
///
/// Sources are arranged in an ordered fallback chain; a source that errors
/// or reports a non-positive value is skipped and the chain proceeds.
pub trait TemperatureSource: Send {
    /// Short source name for logs.
    fn name(&self) -> &'static str;

    /// Read a temperature in degrees Celsius.
    fn read_temp_c(&mut self) -> Result<f32>;
}

/// Optional GPU temperature capability.
pub trait GpuProbe: Send {
    /// `Ok(None)` means no GPU subsystem is present, which is distinct from
    /// a real 0.0 degree reading.
    fn read_temp_c(&mut self) -> Result<Option<f32>>;
}

/// Battery level capability.
pub trait BatteryProbe: Send {
    /// Charge level 0-100, or `Ok(None)` when the host has no battery.
    fn read_level(&mut self) -> Result<Option<u8>>;
}

/// The full set of host capabilities consumed by the monitoring engine.
pub struct PlatformCapabilities {
    /// Full-scan device enumeration (always available, possibly simulated)
    pub device_enumerator: Box<dyn DeviceEnumerator>,
    /// Push-based device notifications, where the platform supports them
    pub device_changes: Option<DeviceChangeStream>,
    /// CPU temperature fallback chain, tried in order each tick
    pub cpu_sources: Vec<Box<dyn TemperatureSource>>,
    /// GPU temperature probe, absent when no GPU subsystem was found
    pub gpu_probe: Option<Box<dyn GpuProbe>>,
    /// Battery status probe
    pub battery_probe: Box<dyn BatteryProbe>,
    /// True when device enumeration is simulation-quality; the tracker
    /// polls on a coarser interval in that case
    pub simulated_devices: bool,
}

impl PlatformCapabilities {
    /// Select capabilities for the current host.
    pub fn detect() -> Self {
        #[cfg(target_os = "linux")]
        {
            linux::capabilities()
        }

        #[cfg(target_os = "macos")]
        {
            probe::macos_capabilities()
        }

        #[cfg(target_os = "windows")]
        {
            windows::capabilities()
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            tracing::warn!("No native platform support for this host, running simulated");
            Self::simulated()
        }
    }

    /// Fully simulated capabilities for unsupported hosts and tests.
    pub fn simulated() -> Self {
        Self {
            device_enumerator: Box::new(probe::SimulatedDeviceEnumerator::default()),
            device_changes: None,
            cpu_sources: vec![Box::new(probe::SimulatedTemperatureSource::default())],
            gpu_probe: None,
            battery_probe: Box::new(probe::SimulatedBatteryProbe::default()),
            simulated_devices: true,
        }
    }
}
