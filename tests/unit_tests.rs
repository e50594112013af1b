use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use dockwatch::platform::probe::{
    SimulatedBatteryProbe, SimulatedDeviceEnumerator, SimulatedTemperatureSource,
};
use dockwatch::platform::{DeviceChange, GpuProbe};
use dockwatch::{
    BatteryHealth, DeviceEvent, DeviceEventKind, DeviceIdentity, MonitorConfig, MonitorObserver,
    MonitoringService, PlatformCapabilities, SensorSample, TimeSeriesStore,
    DEFAULT_DEVICE_INTERVAL_MS, DEFAULT_SENSOR_INTERVAL_MS,
};

/// Test DeviceEvent serialization and deserialization
#[test]
fn test_device_event_serialization() {
    let event = DeviceEvent {
        timestamp: Utc::now(),
        kind: DeviceEventKind::Added,
        vendor: "Acme Corp".to_string(),
        serial: "SN-1234".to_string(),
        uuid: "Unknown".to_string(),
    };

    let json = serde_json::to_string_pretty(&event).expect("Should serialize to JSON");
    assert!(json.contains("Acme Corp"));
    assert!(json.contains("Added"));

    let deserialized: DeviceEvent =
        serde_json::from_str(&json).expect("Should deserialize from JSON");
    assert_eq!(deserialized, event);
}

/// Test SensorSample serialization, including the no-GPU sentinel
#[test]
fn test_sensor_sample_serialization() {
    let sample = SensorSample {
        timestamp: Utc::now(),
        cpu_temp_c: 47.5,
        gpu_temp_c: None,
        battery_level: 62,
        battery_health: BatteryHealth::Fair,
    };

    let json = serde_json::to_string(&sample).expect("Should serialize");
    let value: serde_json::Value = serde_json::from_str(&json).expect("Should parse JSON");
    assert!(value.get("timestamp").is_some());
    assert_eq!(value["cpu_temp_c"], 47.5);
    assert!(value["gpu_temp_c"].is_null());
    assert_eq!(value["battery_level"], 62);

    let deserialized: SensorSample = serde_json::from_str(&json).expect("Should deserialize");
    assert_eq!(deserialized, sample);
}

/// Test MonitorConfig defaults and builder
#[test]
fn test_monitor_config() {
    let config = MonitorConfig::default();
    assert_eq!(config.sensor_interval_ms, DEFAULT_SENSOR_INTERVAL_MS);
    assert_eq!(config.device_interval_ms, DEFAULT_DEVICE_INTERVAL_MS);

    let config = config
        .with_sensor_interval_ms(100)
        .with_device_interval_ms(200)
        .with_stop_timeout_ms(500);
    assert_eq!(config.sensor_interval_ms, 100);
    assert_eq!(config.device_interval_ms, 200);
    assert_eq!(config.stop_timeout_ms, 500);
}

/// Observer that collects everything it is notified about.
#[derive(Default)]
struct CollectingObserver {
    events: Mutex<Vec<DeviceEvent>>,
    samples: Mutex<Vec<SensorSample>>,
}

impl MonitorObserver for CollectingObserver {
    fn on_device_event(&self, event: &DeviceEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn on_sensor_sample(&self, sample: &SensorSample) {
        self.samples.lock().unwrap().push(sample.clone());
    }
}

struct FixedGpu(f32);

impl GpuProbe for FixedGpu {
    fn read_temp_c(&mut self) -> dockwatch::Result<Option<f32>> {
        Ok(Some(self.0))
    }
}

fn capabilities_with_changes(
    changes: Option<tokio::sync::mpsc::Receiver<DeviceChange>>,
) -> PlatformCapabilities {
    PlatformCapabilities {
        device_enumerator: Box::new(SimulatedDeviceEnumerator::default()),
        device_changes: changes,
        cpu_sources: vec![Box::new(SimulatedTemperatureSource::default())],
        gpu_probe: Some(Box::new(FixedGpu(58.0))),
        battery_probe: Box::new(SimulatedBatteryProbe::new(85)),
        simulated_devices: false,
    }
}

/// End-to-end: changes and samples flow through the service into both the
/// store and the observers, and stop() is clean and bounded.
#[tokio::test]
async fn test_monitoring_pipeline_end_to_end() {
    let (tx, rx) = tokio::sync::mpsc::channel(16);
    let store = Arc::new(TimeSeriesStore::open_in_memory().unwrap());
    let observer = Arc::new(CollectingObserver::default());

    let mut service =
        MonitoringService::new(Arc::clone(&store), capabilities_with_changes(Some(rx)))
            .with_config(
                MonitorConfig::default()
                    .with_sensor_interval_ms(10)
                    .with_device_interval_ms(10)
                    .with_stop_timeout_ms(1_000),
            );
    service.subscribe(observer.clone());
    service.start().unwrap();

    tx.send(DeviceChange {
        kind: DeviceEventKind::Added,
        identity: DeviceIdentity::new("dock-7", Some("Acme".to_string()), None, None),
    })
    .await
    .unwrap();
    tx.send(DeviceChange {
        kind: DeviceEventKind::Removed,
        identity: DeviceIdentity::new("dock-7", Some("Acme".to_string()), None, None),
    })
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    service.stop().await;

    // Device transitions were persisted and forwarded in order.
    let stored_events = store.device_events(None, None).unwrap();
    assert_eq!(stored_events.len(), 2);
    assert_eq!(stored_events[0].event.kind, DeviceEventKind::Removed);
    assert_eq!(stored_events[1].event.kind, DeviceEventKind::Added);
    let seen_events = observer.events.lock().unwrap();
    assert_eq!(seen_events.len(), 2);
    assert_eq!(seen_events[0].kind, DeviceEventKind::Added);

    // Samples carry the simulated CPU reading, the GPU probe value, and the
    // derived battery health.
    let samples = store.sensor_samples(None, None).unwrap();
    assert!(!samples.is_empty());
    for record in &samples {
        assert!((50.0..55.0).contains(&record.sample.cpu_temp_c));
        assert_eq!(record.sample.gpu_temp_c, Some(58.0));
        assert_eq!(record.sample.battery_level, 85);
        assert_eq!(record.sample.battery_health, BatteryHealth::Good);
    }
    assert_eq!(observer.samples.lock().unwrap().len(), samples.len());

    // latest-N agrees with the range query.
    let latest = store.latest_device_events(1).unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].event.kind, DeviceEventKind::Removed);
}

/// The seed scan never emits events: a host with devices attached at
/// startup starts quiet.
#[tokio::test]
async fn test_initial_devices_do_not_emit_events() {
    let mut devices = HashSet::new();
    devices.insert(DeviceIdentity::new("hub-0", Some("Acme".to_string()), None, None));
    devices.insert(DeviceIdentity::new("kbd-1", Some("KeyCo".to_string()), None, None));

    let capabilities = PlatformCapabilities {
        device_enumerator: Box::new(SimulatedDeviceEnumerator::with_devices(devices)),
        device_changes: None,
        cpu_sources: vec![Box::new(SimulatedTemperatureSource::default())],
        gpu_probe: None,
        battery_probe: Box::new(SimulatedBatteryProbe::new(85)),
        simulated_devices: false,
    };

    let store = Arc::new(TimeSeriesStore::open_in_memory().unwrap());
    let mut service = MonitoringService::new(Arc::clone(&store), capabilities).with_config(
        MonitorConfig::default()
            .with_sensor_interval_ms(10)
            .with_device_interval_ms(10)
            .with_stop_timeout_ms(1_000),
    );
    service.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    service.stop().await;

    assert!(store.device_events(None, None).unwrap().is_empty());
}

/// Simulated hosts never fail outright: a full sample still comes through.
#[test]
fn test_simulated_capabilities_produce_complete_samples() {
    let capabilities = PlatformCapabilities::simulated();
    let mut sampler = dockwatch::SensorSampler::new(
        capabilities.cpu_sources,
        capabilities.gpu_probe,
        capabilities.battery_probe,
    );
    let sample = sampler.sample_once().unwrap();
    assert!(sample.cpu_temp_c > 0.0);
    assert_eq!(sample.gpu_temp_c, None);
    assert_eq!(sample.battery_health, BatteryHealth::Good);
}
