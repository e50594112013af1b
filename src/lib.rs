//! # dockwatch - USB & Hardware Sensor Monitoring Engine
//!
//! A monitoring engine that watches a host's attached USB devices and its
//! thermal/power sensors, turns raw platform-specific readings into discrete
//! events and samples, persists them to an append-only store, and republishes
//! them to subscribers.
//!
//! ## Features
//!
//! - **Device-presence tracking**: attach/detach detection via set diffing
//!   or a native change subscription
//! - **Sensor sampling**: CPU/GPU temperature and battery state through
//!   layered fallback chains with error backoff
//! - **Durable history**: SQLite-backed append-only logs with range queries
//! - **Platform abstraction**: narrow capability traits selected at startup;
//!   missing capabilities degrade, never fail
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dockwatch::{MonitoringService, PlatformCapabilities, TimeSeriesStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(TimeSeriesStore::open("dockwatch.db")?);
//!     let mut service = MonitoringService::new(store, PlatformCapabilities::detect());
//!     service.start()?;
//!     tokio::signal::ctrl_c().await?;
//!     service.stop().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod monitor;
pub mod platform;
pub mod store;

// Re-export public API
pub use error::{MonitorError, Result};
pub use monitor::{
    data::{BatteryHealth, DeviceEvent, DeviceEventKind, DeviceIdentity, SensorSample},
    sampler::SensorSampler,
    service::{MonitorConfig, MonitorObserver, MonitoringService},
    tracker::DeviceTracker,
};
pub use platform::PlatformCapabilities;
pub use store::{DeviceEventRecord, SensorSampleRecord, TimeSeriesStore};

/// The default sensor sampling interval in milliseconds
pub const DEFAULT_SENSOR_INTERVAL_MS: u64 = 5_000;

/// The default device polling interval in milliseconds
pub const DEFAULT_DEVICE_INTERVAL_MS: u64 = 2_000;

/// Coarser device polling interval used with simulation-quality enumeration
pub const SIMULATED_DEVICE_INTERVAL_MS: u64 = 5_000;

/// How long `stop()` waits for each background task, in milliseconds
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 3_000;

/// The default on-disk database file
pub const DEFAULT_DB_PATH: &str = "dockwatch.db";
