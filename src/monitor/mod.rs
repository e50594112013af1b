//! Device-presence tracking, sensor sampling, and service orchestration.
//!
//! The tracker and sampler are independent periodic tasks; the service
//! wires them to the store and to registered observers.

pub mod data;
pub mod sampler;
pub mod service;
pub mod tracker;

// Re-export commonly used items
pub use data::{BatteryHealth, DeviceEvent, DeviceEventKind, DeviceIdentity, SensorSample};
pub use sampler::SensorSampler;
pub use service::{MonitorConfig, MonitorObserver, MonitoringService};
pub use tracker::DeviceTracker;
