//! Generic, command-line, and simulated capability implementations.
//!
//! These back the lower rungs of the sensor fallback chains and the
//! degraded modes used on hosts without native support.

use std::collections::HashSet;
use std::process::Command;

use rand::Rng;
use sysinfo::Components;

use crate::error::{MonitorError, Result};
use crate::monitor::data::DeviceIdentity;
use crate::platform::{BatteryProbe, DeviceEnumerator, GpuProbe, TemperatureSource};

/// CPU temperature via sysinfo's component aggregation.
///
/// Generic OS sensor interface; works wherever sysinfo exposes thermal
/// components, which varies a lot by host. Prefers a component whose label
/// looks CPU-related, otherwise takes the first one.
pub struct ComponentTemperatureSource {
    components: Components,
}

impl ComponentTemperatureSource {
    pub fn new() -> Self {
        Self {
            components: Components::new_with_refreshed_list(),
        }
    }
}

impl Default for ComponentTemperatureSource {
    fn default() -> Self {
        Self::new()
    }
}

const CPU_LABEL_HINTS: [&str; 4] = ["cpu", "core", "tctl", "package"];

impl TemperatureSource for ComponentTemperatureSource {
    fn name(&self) -> &'static str {
        "sysinfo-components"
    }

    fn read_temp_c(&mut self) -> Result<f32> {
        self.components.refresh();

        let pick = self
            .components
            .iter()
            .find(|c| {
                let label = c.label().to_ascii_lowercase();
                CPU_LABEL_HINTS.iter().any(|hint| label.contains(hint))
            })
            .or_else(|| self.components.iter().next());

        match pick {
            Some(component) => Ok(component.temperature()),
            None => Err(MonitorError::capability_error(
                "no thermal components reported by sysinfo",
            )),
        }
    }
}

/// Map a macOS `machdep.xcpm.cpu_thermal_level` reading to an estimated
/// temperature. Rough estimate, not a calibrated value.
pub fn thermal_level_to_temp(level: i64) -> f32 {
    45.0 + (level as f32 * 5.0)
}

/// CPU temperature via the macOS `sysctl` thermal-level probe.
pub struct SysctlThermalSource;

impl TemperatureSource for SysctlThermalSource {
    fn name(&self) -> &'static str {
        "sysctl-thermal-level"
    }

    fn read_temp_c(&mut self) -> Result<f32> {
        let output = Command::new("sysctl")
            .args(["-n", "machdep.xcpm.cpu_thermal_level"])
            .output()?;
        if !output.status.success() {
            return Err(MonitorError::capability_error("sysctl probe failed"));
        }
        let level = String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<i64>()
            .map_err(|err| MonitorError::parse_error(format!("sysctl thermal level: {err}")))?;
        Ok(thermal_level_to_temp(level))
    }
}

/// Randomized-within-range simulated temperature, the terminal rung of
/// every CPU fallback chain.
pub struct SimulatedTemperatureSource {
    low: f32,
    high: f32,
}

impl SimulatedTemperatureSource {
    pub fn new(low: f32, high: f32) -> Self {
        Self { low, high }
    }
}

impl Default for SimulatedTemperatureSource {
    fn default() -> Self {
        Self::new(50.0, 55.0)
    }
}

impl TemperatureSource for SimulatedTemperatureSource {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn read_temp_c(&mut self) -> Result<f32> {
        Ok(rand::thread_rng().gen_range(self.low..self.high))
    }
}

/// GPU temperature via `nvidia-smi`.
pub struct NvidiaSmiProbe;

impl NvidiaSmiProbe {
    fn query() -> Result<Option<f32>> {
        let output = Command::new("nvidia-smi")
            .args(["--query-gpu=temperature.gpu", "--format=csv,noheader,nounits"])
            .output()?;
        if !output.status.success() {
            return Err(MonitorError::capability_error("nvidia-smi query failed"));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.lines().next().map(str::trim) {
            Some(line) if !line.is_empty() => {
                let temp = line.parse::<f32>().map_err(|err| {
                    MonitorError::parse_error(format!("nvidia-smi temperature: {err}"))
                })?;
                Ok(Some(temp))
            }
            _ => Ok(None),
        }
    }

    /// Probe once at startup; hosts without a working `nvidia-smi` get no
    /// GPU capability at all.
    pub fn detect() -> Option<Self> {
        match Self::query() {
            Ok(Some(_)) => Some(Self),
            Ok(None) => None,
            Err(err) => {
                tracing::debug!("GPU probe unavailable: {}", err);
                None
            }
        }
    }
}

impl GpuProbe for NvidiaSmiProbe {
    fn read_temp_c(&mut self) -> Result<Option<f32>> {
        Self::query()
    }
}

/// Simulation-quality device enumeration for hosts without native support.
///
/// Reports a fixed device set (empty by default), so it never produces
/// spurious attach/detach transitions.
#[derive(Default)]
pub struct SimulatedDeviceEnumerator {
    devices: HashSet<DeviceIdentity>,
}

impl SimulatedDeviceEnumerator {
    pub fn with_devices(devices: HashSet<DeviceIdentity>) -> Self {
        Self { devices }
    }
}

impl DeviceEnumerator for SimulatedDeviceEnumerator {
    fn enumerate(&mut self) -> Result<HashSet<DeviceIdentity>> {
        Ok(self.devices.clone())
    }
}

/// Extract the charge percentage from `pmset -g batt` output.
///
/// The battery line looks like
/// ` -InternalBattery-0 (id=1234)  85%; discharging; 4:22 remaining`.
/// Output with no `%` anywhere means the host has no battery (desktops
/// report only the power source line).
pub fn parse_pmset_level(output: &str) -> Result<Option<u8>> {
    for line in output.lines() {
        let Some(pos) = line.find('%') else {
            continue;
        };
        let token = line[..pos].rsplit(char::is_whitespace).next().unwrap_or("");
        let level = token
            .parse::<u8>()
            .map_err(|err| MonitorError::parse_error(format!("pmset battery level: {err}")))?;
        return Ok(Some(level.min(100)));
    }
    Ok(None)
}

/// Battery level via the macOS `pmset` power-management tool.
pub struct PmsetBatteryProbe;

impl BatteryProbe for PmsetBatteryProbe {
    fn read_level(&mut self) -> Result<Option<u8>> {
        let output = Command::new("pmset").args(["-g", "batt"]).output()?;
        if !output.status.success() {
            return Err(MonitorError::capability_error("pmset probe failed"));
        }
        parse_pmset_level(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Battery probe for hosts where no battery interface is exposed.
pub struct NoBatteryProbe;

impl BatteryProbe for NoBatteryProbe {
    fn read_level(&mut self) -> Result<Option<u8>> {
        Ok(None)
    }
}

/// Fixed-level battery probe for simulated hosts and tests.
pub struct SimulatedBatteryProbe {
    level: u8,
}

impl SimulatedBatteryProbe {
    pub fn new(level: u8) -> Self {
        Self { level: level.min(100) }
    }
}

impl Default for SimulatedBatteryProbe {
    fn default() -> Self {
        Self::new(100)
    }
}

impl BatteryProbe for SimulatedBatteryProbe {
    fn read_level(&mut self) -> Result<Option<u8>> {
        Ok(Some(self.level))
    }
}

/// Capabilities for a macOS host.
#[cfg(target_os = "macos")]
pub fn macos_capabilities() -> crate::platform::PlatformCapabilities {
    crate::platform::PlatformCapabilities {
        device_enumerator: Box::new(SimulatedDeviceEnumerator::default()),
        device_changes: None,
        cpu_sources: vec![
            Box::new(SysctlThermalSource),
            Box::new(ComponentTemperatureSource::new()),
            Box::new(SimulatedTemperatureSource::default()),
        ],
        gpu_probe: NvidiaSmiProbe::detect().map(|p| Box::new(p) as Box<dyn GpuProbe>),
        battery_probe: Box::new(PmsetBatteryProbe),
        simulated_devices: true,
    }
}
