//! Monitoring lifecycle, wiring, and persist-then-notify fan-out.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::error::{MonitorError, Result};
use crate::monitor::data::{DeviceEvent, SensorSample};
use crate::monitor::sampler::SensorSampler;
use crate::monitor::tracker::DeviceTracker;
use crate::platform::PlatformCapabilities;
use crate::store::TimeSeriesStore;

/// Callback interface for the presentation layer.
///
/// Both methods fire on whichever background task produced the data; the
/// observer is responsible for marshaling onto its own execution context.
pub trait MonitorObserver: Send + Sync {
    fn on_device_event(&self, event: &DeviceEvent);
    fn on_sensor_sample(&self, sample: &SensorSample);
}

type ObserverList = Arc<RwLock<Vec<Arc<dyn MonitorObserver>>>>;

fn read_observers(observers: &ObserverList) -> std::sync::RwLockReadGuard<'_, Vec<Arc<dyn MonitorObserver>>> {
    match observers.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Shared emission path for both background tasks.
///
/// Every event is persisted before observers are notified, so a crash
/// between the two loses only the live update, never the durable record.
/// A record the store rejects is dropped entirely: observers must never
/// see something a query cannot return.
#[derive(Clone)]
pub(crate) struct EventSink {
    store: Arc<TimeSeriesStore>,
    observers: ObserverList,
}

impl EventSink {
    pub(crate) fn new(store: Arc<TimeSeriesStore>, observers: ObserverList) -> Self {
        Self { store, observers }
    }

    pub(crate) fn publish_device_event(&self, event: &DeviceEvent) {
        match self.store.append_device_event(event) {
            Ok(id) => {
                debug!("Persisted device event {} ({})", id, event.kind.as_str());
                for observer in read_observers(&self.observers).iter() {
                    observer.on_device_event(event);
                }
            }
            Err(err) => {
                warn!("Storage unavailable, dropping device event: {}", err);
            }
        }
    }

    pub(crate) fn publish_sensor_sample(&self, sample: &SensorSample) {
        match self.store.append_sensor_sample(sample) {
            Ok(id) => {
                debug!("Persisted sensor sample {}", id);
                for observer in read_observers(&self.observers).iter() {
                    observer.on_sensor_sample(sample);
                }
            }
            Err(err) => {
                warn!("Storage unavailable, dropping sensor sample: {}", err);
            }
        }
    }
}

/// Configuration for the monitoring service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Sensor sampling interval in milliseconds
    pub sensor_interval_ms: u64,
    /// Device polling interval in milliseconds
    pub device_interval_ms: u64,
    /// How long `stop()` waits for each background task
    pub stop_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sensor_interval_ms: crate::DEFAULT_SENSOR_INTERVAL_MS,
            device_interval_ms: crate::DEFAULT_DEVICE_INTERVAL_MS,
            stop_timeout_ms: crate::DEFAULT_STOP_TIMEOUT_MS,
        }
    }
}

impl MonitorConfig {
    /// Set the sensor sampling interval.
    pub fn with_sensor_interval_ms(mut self, interval: u64) -> Self {
        self.sensor_interval_ms = interval;
        self
    }

    /// Set the device polling interval.
    pub fn with_device_interval_ms(mut self, interval: u64) -> Self {
        self.device_interval_ms = interval;
        self
    }

    /// Set the per-task stop timeout.
    pub fn with_stop_timeout_ms(mut self, timeout: u64) -> Self {
        self.stop_timeout_ms = timeout;
        self
    }
}

struct RunningTasks {
    stop_tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

/// Orchestrates the device tracker and sensor sampler as independent
/// background tasks, persisting and republishing everything they emit.
///
/// The service owns lifecycle only; monitoring behavior lives in
/// [`DeviceTracker`] and [`SensorSampler`]. `start()` must be called from
/// within a tokio runtime.
pub struct MonitoringService {
    store: Arc<TimeSeriesStore>,
    config: MonitorConfig,
    capabilities: Option<PlatformCapabilities>,
    observers: ObserverList,
    running: Option<RunningTasks>,
}

impl MonitoringService {
    pub fn new(store: Arc<TimeSeriesStore>, capabilities: PlatformCapabilities) -> Self {
        Self {
            store,
            config: MonitorConfig::default(),
            capabilities: Some(capabilities),
            observers: Arc::new(RwLock::new(Vec::new())),
            running: None,
        }
    }

    pub fn with_config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    /// The store backing this service, for query access.
    pub fn store(&self) -> Arc<TimeSeriesStore> {
        Arc::clone(&self.store)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Register an observer notified once per persisted event and sample.
    pub fn subscribe(&self, observer: Arc<dyn MonitorObserver>) {
        let mut observers = match self.observers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        observers.push(observer);
    }

    /// Start both monitoring tasks. A no-op if already running.
    ///
    /// The platform capabilities are consumed on first start; a service
    /// that has been stopped cannot be started again.
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            debug!("Monitoring service already running");
            return Ok(());
        }
        let capabilities = self.capabilities.take().ok_or_else(|| {
            MonitorError::system_error("monitoring service cannot be restarted after stop")
        })?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let sink = EventSink::new(Arc::clone(&self.store), Arc::clone(&self.observers));

        // Simulation-quality enumeration polls on a coarser interval.
        let device_interval_ms = if capabilities.simulated_devices {
            self.config
                .device_interval_ms
                .max(crate::SIMULATED_DEVICE_INTERVAL_MS)
        } else {
            self.config.device_interval_ms
        };

        let tracker = DeviceTracker::new(capabilities.device_enumerator);
        let tracker_task = tokio::spawn(tracker.run(
            capabilities.device_changes,
            sink.clone(),
            stop_rx.clone(),
            Duration::from_millis(device_interval_ms),
        ));

        let sampler = SensorSampler::new(
            capabilities.cpu_sources,
            capabilities.gpu_probe,
            capabilities.battery_probe,
        );
        let sampler_task = tokio::spawn(sampler.run(
            sink,
            stop_rx,
            Duration::from_millis(self.config.sensor_interval_ms),
        ));

        self.running = Some(RunningTasks {
            stop_tx,
            tasks: vec![
                ("device tracker", tracker_task),
                ("sensor sampler", sampler_task),
            ],
        });
        info!(
            "Monitoring started (sensors every {}ms, devices every {}ms)",
            self.config.sensor_interval_ms, device_interval_ms
        );
        Ok(())
    }

    /// Request cooperative termination and wait, bounded, for both tasks.
    ///
    /// Once this returns no further store writes or observer notifications
    /// occur. A task that misses the deadline is reported as leaked; it is
    /// never force-killed.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.stop_tx.send(true);
        let timeout = Duration::from_millis(self.config.stop_timeout_ms);
        for (name, handle) in running.tasks {
            match time::timeout(timeout, handle).await {
                Ok(Ok(())) => debug!("{} task stopped", name),
                Ok(Err(err)) => warn!("{} task failed during shutdown: {}", name, err),
                Err(_) => warn!(
                    "{} task did not observe stop within {:?}, leaking it",
                    name, timeout
                ),
            }
        }
        info!("Monitoring service stopped");
    }
}
