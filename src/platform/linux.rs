//! Linux capability implementations backed by sysfs.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::process::Command;

use tokio::sync::mpsc;

use crate::error::{MonitorError, Result};
use crate::monitor::data::{DeviceEventKind, DeviceIdentity};
use crate::platform::{
    probe, BatteryProbe, DeviceChange, DeviceChangeStream, DeviceEnumerator, GpuProbe,
    PlatformCapabilities, TemperatureSource,
};

/// USB device enumeration via `/sys/bus/usb/devices`.
///
/// Entries carrying an `idVendor` attribute are devices; interface entries
/// lack it and are skipped. The sysfs entry name serves as the
/// platform-native device id. sysfs exposes no UUID, so that field stays
/// "Unknown".
pub struct SysfsUsbEnumerator {
    root: PathBuf,
}

impl SysfsUsbEnumerator {
    pub fn new() -> Self {
        Self::with_root("/sys/bus/usb/devices")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for SysfsUsbEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a single-line sysfs attribute, if present.
fn read_attr(dir: &Path, name: &str) -> Option<String> {
    fs::read_to_string(dir.join(name))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Build a device identity from a sysfs device directory.
fn identity_from_dir(name: &str, dir: &Path) -> DeviceIdentity {
    let vendor = read_attr(dir, "manufacturer").or_else(|| read_attr(dir, "idVendor"));
    let serial = read_attr(dir, "serial");
    DeviceIdentity::new(name, vendor, serial, None)
}

impl DeviceEnumerator for SysfsUsbEnumerator {
    fn enumerate(&mut self) -> Result<HashSet<DeviceIdentity>> {
        let entries = fs::read_dir(&self.root).map_err(|err| {
            MonitorError::capability_error(format!(
                "cannot read {}: {err}",
                self.root.display()
            ))
        })?;

        let mut devices = HashSet::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::debug!("Skipping unreadable sysfs entry: {}", err);
                    continue;
                }
            };
            let dir = entry.path();
            if !dir.join("idVendor").exists() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            devices.insert(identity_from_dir(&name, &dir));
        }
        Ok(devices)
    }
}

/// Raw socket on the kernel's uevent multicast group.
///
/// Group 1 carries kernel-origin events only; udevd re-broadcasts on a
/// separate group with its own framing, which this deliberately skips.
struct UeventSocket {
    fd: OwnedFd,
}

impl UeventSocket {
    fn bind() -> Result<Self> {
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                libc::NETLINK_KOBJECT_UEVENT,
            )
        };
        if raw < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        addr.nl_groups = 1;
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(Self { fd })
    }

    /// Block until the next uevent datagram arrives.
    fn recv(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; 8192];
        let len = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        };
        if len < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        buf.truncate(len as usize);
        Ok(buf)
    }
}

/// One parsed kernel uevent.
#[derive(Debug, PartialEq)]
struct Uevent {
    action: String,
    devpath: String,
    subsystem: Option<String>,
    devtype: Option<String>,
}

/// Parse a kernel uevent datagram: an `action@devpath` header followed by
/// NUL-separated `KEY=value` pairs. Datagrams without the header form
/// (udevd's re-broadcast framing) yield `None`.
fn parse_uevent(raw: &[u8]) -> Option<Uevent> {
    let mut fields = raw.split(|byte| *byte == 0);
    let header = String::from_utf8_lossy(fields.next()?);
    let (action, devpath) = header.split_once('@')?;

    let mut subsystem = None;
    let mut devtype = None;
    for field in fields {
        let field = String::from_utf8_lossy(field);
        match field.split_once('=') {
            Some(("SUBSYSTEM", value)) => subsystem = Some(value.to_string()),
            Some(("DEVTYPE", value)) => devtype = Some(value.to_string()),
            _ => {}
        }
    }
    Some(Uevent {
        action: action.to_string(),
        devpath: devpath.to_string(),
        subsystem,
        devtype,
    })
}

/// Snapshot of currently attached devices, keyed by sysfs entry name.
fn attached_snapshot(root: &Path) -> HashMap<String, DeviceIdentity> {
    let mut attached = HashMap::new();
    let Ok(entries) = fs::read_dir(root) else {
        return attached;
    };
    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.join("idVendor").exists() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        attached.insert(name.clone(), identity_from_dir(&name, &dir));
    }
    attached
}

/// Turn a uevent into a device change, maintaining the attached map.
///
/// Identity attributes vanish from sysfs the moment a device detaches, so
/// they are captured at attach time and replayed on remove. A remove for a
/// device that was never seen attached falls back to a bare identity.
fn translate_uevent(
    event: &Uevent,
    sysfs_root: &Path,
    attached: &mut HashMap<String, DeviceIdentity>,
) -> Option<DeviceChange> {
    if event.subsystem.as_deref() != Some("usb") || event.devtype.as_deref() != Some("usb_device")
    {
        return None;
    }
    let name = event.devpath.rsplit('/').next().unwrap_or(&event.devpath);
    match event.action.as_str() {
        "add" => {
            let identity = identity_from_dir(name, &sysfs_root.join(name));
            attached.insert(name.to_string(), identity.clone());
            Some(DeviceChange {
                kind: DeviceEventKind::Added,
                identity,
            })
        }
        "remove" => {
            let identity = attached
                .remove(name)
                .unwrap_or_else(|| DeviceIdentity::new(name, None, None, None));
            Some(DeviceChange {
                kind: DeviceEventKind::Removed,
                identity,
            })
        }
        _ => None,
    }
}

fn feeder_loop(socket: UeventSocket, sysfs_root: PathBuf, tx: mpsc::Sender<DeviceChange>) {
    let mut attached = attached_snapshot(&sysfs_root);
    loop {
        let raw = match socket.recv() {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!("uevent read failed, subscription ends: {}", err);
                return;
            }
        };
        let Some(event) = parse_uevent(&raw) else {
            continue;
        };
        let Some(change) = translate_uevent(&event, &sysfs_root, &mut attached) else {
            continue;
        };
        if tx.blocking_send(change).is_err() {
            // Receiver dropped: monitoring stopped.
            return;
        }
    }
}

/// Start the push-based attach/detach subscription, if the host allows it.
///
/// Returns `None` when the netlink socket cannot be opened (common in
/// containers), leaving the tracker on poll-diffing.
pub fn spawn_uevent_feeder(sysfs_root: impl Into<PathBuf>) -> Option<DeviceChangeStream> {
    let socket = match UeventSocket::bind() {
        Ok(socket) => socket,
        Err(err) => {
            tracing::warn!("uevent subscription unavailable, polling instead: {}", err);
            return None;
        }
    };
    let root = sysfs_root.into();
    let (tx, rx) = mpsc::channel(64);
    let spawned = std::thread::Builder::new()
        .name("uevent-feeder".into())
        .spawn(move || feeder_loop(socket, root, tx));
    match spawned {
        Ok(_) => Some(rx),
        Err(err) => {
            tracing::warn!("uevent feeder thread failed to start: {}", err);
            None
        }
    }
}

/// CPU temperature from the kernel thermal-zone interface.
///
/// Scans `thermal_zone0` through `thermal_zone9` and returns the first
/// positive reading, matching the zone layout on most boards.
pub struct ThermalZoneSource {
    base: PathBuf,
}

impl ThermalZoneSource {
    pub fn new() -> Self {
        Self::with_base("/sys/class/thermal")
    }

    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl Default for ThermalZoneSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TemperatureSource for ThermalZoneSource {
    fn name(&self) -> &'static str {
        "thermal-zone"
    }

    fn read_temp_c(&mut self) -> Result<f32> {
        for zone in 0..10 {
            let path = self.base.join(format!("thermal_zone{zone}/temp"));
            let Ok(raw) = fs::read_to_string(&path) else {
                continue;
            };
            let Ok(millicelsius) = raw.trim().parse::<i64>() else {
                tracing::debug!("Unparseable thermal zone reading in {}", path.display());
                continue;
            };
            let temp = millicelsius as f32 / 1000.0;
            if temp > 0.0 {
                return Ok(temp);
            }
        }
        Err(MonitorError::capability_error(
            "no thermal zone yielded a positive reading",
        ))
    }
}

/// Parse the output of `vcgencmd measure_temp`, e.g. `temp=48.3'C`.
pub fn parse_vcgencmd_temp(output: &str) -> Option<f32> {
    output
        .trim()
        .strip_prefix("temp=")?
        .strip_suffix("'C")?
        .parse::<f32>()
        .ok()
}

/// CPU temperature via the Raspberry Pi `vcgencmd` firmware tool.
pub struct VcgencmdSource;

impl TemperatureSource for VcgencmdSource {
    fn name(&self) -> &'static str {
        "vcgencmd"
    }

    fn read_temp_c(&mut self) -> Result<f32> {
        let output = Command::new("vcgencmd").arg("measure_temp").output()?;
        if !output.status.success() {
            return Err(MonitorError::capability_error("vcgencmd probe failed"));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_vcgencmd_temp(&stdout).ok_or_else(|| {
            MonitorError::parse_error(format!("unexpected vcgencmd output: {}", stdout.trim()))
        })
    }
}

/// Battery level from `/sys/class/power_supply`.
pub struct SysfsBatteryProbe {
    root: PathBuf,
}

impl SysfsBatteryProbe {
    pub fn new() -> Self {
        Self::with_root("/sys/class/power_supply")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for SysfsBatteryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl BatteryProbe for SysfsBatteryProbe {
    fn read_level(&mut self) -> Result<Option<u8>> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            // No power-supply class at all means no battery, not a failure.
            return Ok(None);
        };
        for entry in entries.flatten() {
            let dir = entry.path();
            let is_battery = read_attr(&dir, "type")
                .map(|kind| kind.eq_ignore_ascii_case("battery"))
                .unwrap_or(false);
            if !is_battery {
                continue;
            }
            let raw = read_attr(&dir, "capacity").ok_or_else(|| {
                MonitorError::capability_error(format!(
                    "battery {} has no readable capacity",
                    dir.display()
                ))
            })?;
            let level = raw
                .parse::<u8>()
                .map_err(|err| MonitorError::parse_error(format!("battery capacity: {err}")))?;
            return Ok(Some(level.min(100)));
        }
        Ok(None)
    }
}

/// Capabilities for a Linux host.
pub fn capabilities() -> PlatformCapabilities {
    PlatformCapabilities {
        device_enumerator: Box::new(SysfsUsbEnumerator::new()),
        device_changes: spawn_uevent_feeder("/sys/bus/usb/devices"),
        cpu_sources: vec![
            Box::new(ThermalZoneSource::new()),
            Box::new(probe::ComponentTemperatureSource::new()),
            Box::new(VcgencmdSource),
            Box::new(probe::SimulatedTemperatureSource::default()),
        ],
        gpu_probe: probe::NvidiaSmiProbe::detect().map(|p| Box::new(p) as Box<dyn GpuProbe>),
        battery_probe: Box::new(SysfsBatteryProbe::new()),
        simulated_devices: false,
    }
}
