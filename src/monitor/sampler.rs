//! Periodic sensor sampling with layered fallback reads.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::monitor::data::{BatteryHealth, SensorSample};
use crate::monitor::service::EventSink;
use crate::platform::{BatteryProbe, GpuProbe, TemperatureSource};

/// Fixed default emitted when the whole CPU fallback chain fails.
pub const DEFAULT_CPU_TEMP_C: f32 = 50.0;

/// Produces one composite [`SensorSample`] per tick.
///
/// No single sensor API is available or reliable across host
/// configurations, so every metric goes through a fallback strategy: the
/// CPU chain tries its sources in order, the GPU probe is optional, and a
/// battery read failure degrades to sentinels instead of propagating.
pub struct SensorSampler {
    cpu_sources: Vec<Box<dyn TemperatureSource>>,
    gpu_probe: Option<Box<dyn GpuProbe>>,
    battery_probe: Box<dyn BatteryProbe>,
}

impl SensorSampler {
    pub fn new(
        cpu_sources: Vec<Box<dyn TemperatureSource>>,
        gpu_probe: Option<Box<dyn GpuProbe>>,
        battery_probe: Box<dyn BatteryProbe>,
    ) -> Self {
        Self {
            cpu_sources,
            gpu_probe,
            battery_probe,
        }
    }

    /// Take one composite reading at the current instant.
    pub fn sample_once(&mut self) -> Result<SensorSample> {
        let timestamp = Utc::now();
        let cpu_temp_c = self.read_cpu_temp();
        let gpu_temp_c = self.read_gpu_temp();
        let (battery_level, battery_health) = self.read_battery();
        Ok(SensorSample {
            timestamp,
            cpu_temp_c,
            gpu_temp_c,
            battery_level,
            battery_health,
        })
    }

    /// Walk the CPU fallback chain; the first positive, well-formed reading
    /// wins. Source failures are swallowed and the chain proceeds.
    fn read_cpu_temp(&mut self) -> f32 {
        for source in &mut self.cpu_sources {
            match source.read_temp_c() {
                Ok(temp) if temp > 0.0 => {
                    trace!("CPU temperature {:.1}C from {}", temp, source.name());
                    return temp;
                }
                Ok(temp) => {
                    debug!(
                        "Ignoring non-positive reading {:.1} from {}",
                        temp,
                        source.name()
                    );
                }
                Err(err) => {
                    debug!("CPU temperature source {} failed: {}", source.name(), err);
                }
            }
        }
        warn!(
            "All CPU temperature sources failed, reporting default {:.1}C",
            DEFAULT_CPU_TEMP_C
        );
        DEFAULT_CPU_TEMP_C
    }

    /// `None` when no GPU capability exists or the probe fails; a real
    /// reading of 0.0 would still be `Some`.
    fn read_gpu_temp(&mut self) -> Option<f32> {
        let probe = self.gpu_probe.as_mut()?;
        match probe.read_temp_c() {
            Ok(temp) => temp,
            Err(err) => {
                debug!("GPU probe failed: {}", err);
                None
            }
        }
    }

    fn read_battery(&mut self) -> (u8, BatteryHealth) {
        match self.battery_probe.read_level() {
            Ok(Some(level)) => {
                let level = level.min(100);
                (level, BatteryHealth::from_level(level))
            }
            Ok(None) => (0, BatteryHealth::NoBattery),
            Err(err) => {
                warn!("Battery read failed: {}", err);
                (0, BatteryHealth::Unknown)
            }
        }
    }

    /// Sampling loop: emit one sample per interval until the stop signal.
    ///
    /// A tick that errors skips emission and doubles the wait once; the
    /// normal cadence resumes after the next successful tick. Stop is
    /// cooperative and observed between ticks only.
    pub(crate) async fn run(
        mut self,
        sink: EventSink,
        mut stop: watch::Receiver<bool>,
        interval: Duration,
    ) {
        debug!("Sensor sampler started with {:?} interval", interval);
        loop {
            if *stop.borrow() {
                break;
            }
            let delay = match self.sample_once() {
                Ok(sample) => {
                    sink.publish_sensor_sample(&sample);
                    interval
                }
                Err(err) => {
                    warn!("Sensor tick failed, backing off: {}", err);
                    error_backoff(interval)
                }
            };
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = stop.changed() => break,
            }
        }
        debug!("Sensor sampler stopped");
    }
}

/// Wait applied after a failed tick: double the interval, once.
fn error_backoff(interval: Duration) -> Duration {
    interval * 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;

    struct FixedSource(f32);

    impl TemperatureSource for FixedSource {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn read_temp_c(&mut self) -> Result<f32> {
            Ok(self.0)
        }
    }

    struct FailingSource;

    impl TemperatureSource for FailingSource {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn read_temp_c(&mut self) -> Result<f32> {
            Err(MonitorError::capability_error("probe exploded"))
        }
    }

    struct FixedGpu(Option<f32>);

    impl GpuProbe for FixedGpu {
        fn read_temp_c(&mut self) -> Result<Option<f32>> {
            Ok(self.0)
        }
    }

    struct FailingGpu;

    impl GpuProbe for FailingGpu {
        fn read_temp_c(&mut self) -> Result<Option<f32>> {
            Err(MonitorError::capability_error("gpu probe failed"))
        }
    }

    struct FixedBattery(Option<u8>);

    impl BatteryProbe for FixedBattery {
        fn read_level(&mut self) -> Result<Option<u8>> {
            Ok(self.0)
        }
    }

    struct FailingBattery;

    impl BatteryProbe for FailingBattery {
        fn read_level(&mut self) -> Result<Option<u8>> {
            Err(MonitorError::capability_error("battery read failed"))
        }
    }

    fn sampler(
        cpu: Vec<Box<dyn TemperatureSource>>,
        gpu: Option<Box<dyn GpuProbe>>,
        battery: Box<dyn BatteryProbe>,
    ) -> SensorSampler {
        SensorSampler::new(cpu, gpu, battery)
    }

    #[test]
    fn test_fallback_chain_skips_failed_source() {
        let mut sampler = sampler(
            vec![Box::new(FailingSource), Box::new(FixedSource(42.0))],
            None,
            Box::new(FixedBattery(Some(90))),
        );
        let sample = sampler.sample_once().unwrap();
        assert_eq!(sample.cpu_temp_c, 42.0);
    }

    #[test]
    fn test_fallback_chain_skips_non_positive_reading() {
        let mut sampler = sampler(
            vec![
                Box::new(FixedSource(0.0)),
                Box::new(FixedSource(-3.0)),
                Box::new(FixedSource(47.5)),
            ],
            None,
            Box::new(FixedBattery(Some(90))),
        );
        assert_eq!(sampler.sample_once().unwrap().cpu_temp_c, 47.5);
    }

    #[test]
    fn test_exhausted_chain_reports_default() {
        let mut sampler = sampler(
            vec![Box::new(FailingSource), Box::new(FixedSource(0.0))],
            None,
            Box::new(FixedBattery(Some(90))),
        );
        assert_eq!(sampler.sample_once().unwrap().cpu_temp_c, DEFAULT_CPU_TEMP_C);
    }

    #[test]
    fn test_gpu_absent_and_failing_report_none() {
        let mut no_gpu = sampler(
            vec![Box::new(FixedSource(40.0))],
            None,
            Box::new(FixedBattery(Some(90))),
        );
        assert_eq!(no_gpu.sample_once().unwrap().gpu_temp_c, None);

        let mut broken_gpu = sampler(
            vec![Box::new(FixedSource(40.0))],
            Some(Box::new(FailingGpu)),
            Box::new(FixedBattery(Some(90))),
        );
        assert_eq!(broken_gpu.sample_once().unwrap().gpu_temp_c, None);
    }

    #[test]
    fn test_gpu_zero_reading_is_not_conflated_with_absence() {
        let mut sampler = sampler(
            vec![Box::new(FixedSource(40.0))],
            Some(Box::new(FixedGpu(Some(0.0)))),
            Box::new(FixedBattery(Some(90))),
        );
        assert_eq!(sampler.sample_once().unwrap().gpu_temp_c, Some(0.0));
    }

    #[test]
    fn test_battery_present_derives_health() {
        let mut sampler = sampler(
            vec![Box::new(FixedSource(40.0))],
            None,
            Box::new(FixedBattery(Some(35))),
        );
        let sample = sampler.sample_once().unwrap();
        assert_eq!(sample.battery_level, 35);
        assert_eq!(sample.battery_health, BatteryHealth::Poor);
    }

    #[test]
    fn test_battery_absent_reports_sentinel() {
        let mut sampler = sampler(
            vec![Box::new(FixedSource(40.0))],
            None,
            Box::new(FixedBattery(None)),
        );
        let sample = sampler.sample_once().unwrap();
        assert_eq!(sample.battery_level, 0);
        assert_eq!(sample.battery_health, BatteryHealth::NoBattery);
    }

    #[test]
    fn test_battery_error_reports_unknown() {
        let mut sampler = sampler(
            vec![Box::new(FixedSource(40.0))],
            None,
            Box::new(FailingBattery),
        );
        let sample = sampler.sample_once().unwrap();
        assert_eq!(sample.battery_level, 0);
        assert_eq!(sample.battery_health, BatteryHealth::Unknown);
    }

    #[test]
    fn test_error_backoff_doubles_interval() {
        assert_eq!(
            error_backoff(Duration::from_secs(5)),
            Duration::from_secs(10)
        );
    }
}
