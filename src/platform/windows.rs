//! Windows capability implementations backed by WMI.
//!
//! COM apartments are per-thread and WMI connections are not `Send`, so
//! each probe opens a short-lived connection on the calling thread rather
//! than holding one across ticks.

use std::collections::HashSet;

use serde::Deserialize;
use wmi::{COMLibrary, WMIConnection};

use crate::error::{MonitorError, Result};
use crate::monitor::data::DeviceIdentity;
use crate::platform::{
    probe, BatteryProbe, DeviceEnumerator, GpuProbe, PlatformCapabilities, TemperatureSource,
};

fn wmi_error(err: wmi::WMIError) -> MonitorError {
    MonitorError::system_error(format!("WMI: {err}"))
}

fn connect(namespace: Option<&str>) -> Result<WMIConnection> {
    let com = COMLibrary::new().map_err(wmi_error)?;
    match namespace {
        Some(path) => WMIConnection::with_namespace_path(path, com).map_err(wmi_error),
        None => WMIConnection::new(com).map_err(wmi_error),
    }
}

/// The final segment of a PnP instance id is the serial number when the
/// device reports one; generated bus positions contain `&` instead.
pub fn serial_from_instance_id(instance_id: &str) -> Option<String> {
    let tail = instance_id.rsplit('\\').next()?;
    if tail.is_empty() || tail.contains('&') {
        None
    } else {
        Some(tail.to_string())
    }
}

#[derive(Deserialize)]
#[serde(rename = "Win32_USBHub")]
#[serde(rename_all = "PascalCase")]
struct UsbHub {
    device_id: String,
    name: Option<String>,
}

/// USB device enumeration via the `Win32_USBHub` WMI class.
///
/// WMI exposes no stable UUID for USB devices, so that field stays
/// "Unknown", same as the sysfs enumerator.
pub struct WmiUsbEnumerator;

impl DeviceEnumerator for WmiUsbEnumerator {
    fn enumerate(&mut self) -> Result<HashSet<DeviceIdentity>> {
        let conn = connect(None)?;
        let hubs: Vec<UsbHub> = conn.query().map_err(wmi_error)?;
        Ok(hubs
            .into_iter()
            .map(|hub| {
                let serial = serial_from_instance_id(&hub.device_id);
                DeviceIdentity::new(hub.device_id, hub.name, serial, None)
            })
            .collect())
    }
}

/// ACPI thermal zones report tenths of a kelvin.
pub fn decikelvin_to_celsius(raw: u32) -> f32 {
    raw as f32 / 10.0 - 273.15
}

#[derive(Deserialize)]
#[serde(rename = "MSAcpi_ThermalZoneTemperature")]
#[serde(rename_all = "PascalCase")]
struct ThermalZoneTemperature {
    current_temperature: u32,
}

/// CPU temperature from the ACPI thermal zones in the `root\WMI` namespace.
///
/// Takes the first zone with a positive celsius reading; not every board
/// populates the class, in which case the chain falls through to sysinfo.
pub struct WmiThermalSource;

impl TemperatureSource for WmiThermalSource {
    fn name(&self) -> &'static str {
        "wmi-thermal-zone"
    }

    fn read_temp_c(&mut self) -> Result<f32> {
        let conn = connect(Some("root\\WMI"))?;
        let zones: Vec<ThermalZoneTemperature> = conn.query().map_err(wmi_error)?;
        zones
            .iter()
            .map(|zone| decikelvin_to_celsius(zone.current_temperature))
            .find(|temp| *temp > 0.0)
            .ok_or_else(|| {
                MonitorError::capability_error("no ACPI thermal zone yielded a positive reading")
            })
    }
}

#[derive(Deserialize)]
#[serde(rename = "Win32_Battery")]
#[serde(rename_all = "PascalCase")]
struct Battery {
    estimated_charge_remaining: Option<u16>,
}

/// Battery level via the `Win32_Battery` WMI class.
pub struct WmiBatteryProbe;

impl BatteryProbe for WmiBatteryProbe {
    fn read_level(&mut self) -> Result<Option<u8>> {
        let conn = connect(None)?;
        let batteries: Vec<Battery> = conn.query().map_err(wmi_error)?;
        Ok(batteries
            .iter()
            .find_map(|battery| battery.estimated_charge_remaining)
            .map(|level| level.min(100) as u8))
    }
}

/// Capabilities for a Windows host.
pub fn capabilities() -> PlatformCapabilities {
    PlatformCapabilities {
        device_enumerator: Box::new(WmiUsbEnumerator),
        device_changes: None,
        cpu_sources: vec![
            Box::new(WmiThermalSource),
            Box::new(probe::ComponentTemperatureSource::new()),
            Box::new(probe::SimulatedTemperatureSource::default()),
        ],
        gpu_probe: probe::NvidiaSmiProbe::detect().map(|p| Box::new(p) as Box<dyn GpuProbe>),
        battery_probe: Box::new(WmiBatteryProbe),
        simulated_devices: false,
    }
}
