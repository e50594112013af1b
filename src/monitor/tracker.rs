//! Device-presence tracking via set diffing or native change subscription.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::monitor::data::{DeviceEvent, DeviceEventKind, DeviceIdentity};
use crate::monitor::service::EventSink;
use crate::platform::{DeviceChange, DeviceChangeStream, DeviceEnumerator};

/// Fixed wait applied after a failed poll before retrying.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Tracks the set of currently-present devices and emits Added/Removed
/// transitions.
///
/// The known-device set is owned exclusively by the tracker; nothing else
/// mutates it. Presence is binary, so the tracker never reports the same
/// transition twice without an intervening opposite transition.
pub struct DeviceTracker {
    enumerator: Box<dyn DeviceEnumerator>,
    known: HashSet<DeviceIdentity>,
}

impl DeviceTracker {
    /// Create a tracker and seed the known set with one full enumeration.
    ///
    /// The seed set never generates events: devices attached at startup are
    /// not "plug" transitions. A failed initial scan seeds empty, so the
    /// first successful poll will report everything as newly added.
    pub fn new(mut enumerator: Box<dyn DeviceEnumerator>) -> Self {
        let known = match enumerator.enumerate() {
            Ok(devices) => devices,
            Err(err) => {
                warn!("Initial device enumeration failed, seeding empty: {}", err);
                HashSet::new()
            }
        };
        info!("Device tracker seeded with {} attached devices", known.len());
        Self { enumerator, known }
    }

    /// Number of devices currently believed present.
    pub fn known_count(&self) -> usize {
        self.known.len()
    }

    /// Re-enumerate and emit one event per presence transition.
    ///
    /// `removed = known - current` then `added = current - known`; the
    /// known set is replaced with the fresh scan afterwards. A failed scan
    /// leaves the known set untouched.
    pub fn poll_diff(&mut self) -> Result<Vec<DeviceEvent>> {
        let current = self.enumerator.enumerate()?;
        let mut events = Vec::new();
        for device in self.known.difference(&current) {
            events.push(DeviceEvent::from_identity(DeviceEventKind::Removed, device));
        }
        for device in current.difference(&self.known) {
            events.push(DeviceEvent::from_identity(DeviceEventKind::Added, device));
        }
        self.known = current;
        Ok(events)
    }

    /// Apply one entry from a native change subscription.
    ///
    /// The known set is updated incrementally. An entry that does not
    /// change presence state (duplicate add, remove of an unknown device)
    /// emits nothing.
    pub fn apply_change(&mut self, change: DeviceChange) -> Option<DeviceEvent> {
        let changed = match change.kind {
            DeviceEventKind::Added => self.known.insert(change.identity.clone()),
            DeviceEventKind::Removed => self.known.remove(&change.identity),
        };
        if changed {
            Some(DeviceEvent::from_identity(change.kind, &change.identity))
        } else {
            debug!(
                "Ignoring redundant {} for {}",
                change.kind.as_str(),
                change.identity.device_id
            );
            None
        }
    }

    /// Tracking loop; consumes a native subscription when one is available,
    /// otherwise polls on the given interval.
    pub(crate) async fn run(
        self,
        changes: Option<DeviceChangeStream>,
        sink: EventSink,
        stop: watch::Receiver<bool>,
        interval: Duration,
    ) {
        match changes {
            Some(stream) => self.run_subscription(stream, sink, stop).await,
            None => self.run_poll(sink, stop, interval).await,
        }
    }

    async fn run_poll(
        mut self,
        sink: EventSink,
        mut stop: watch::Receiver<bool>,
        interval: Duration,
    ) {
        debug!("Device tracker polling every {:?}", interval);
        let mut delay = interval;
        loop {
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = stop.changed() => break,
            }
            if *stop.borrow() {
                break;
            }
            match self.poll_diff() {
                Ok(events) => {
                    for event in &events {
                        sink.publish_device_event(event);
                    }
                    delay = interval;
                }
                Err(err) => {
                    warn!("Device poll failed, retrying after backoff: {}", err);
                    delay = POLL_ERROR_BACKOFF;
                }
            }
        }
        debug!("Device tracker stopped");
    }

    async fn run_subscription(
        mut self,
        mut stream: DeviceChangeStream,
        sink: EventSink,
        mut stop: watch::Receiver<bool>,
    ) {
        debug!("Device tracker consuming native change subscription");
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                change = stream.recv() => match change {
                    Some(change) => {
                        if let Some(event) = self.apply_change(change) {
                            sink.publish_device_event(&event);
                        }
                    }
                    None => {
                        warn!("Device change subscription ended");
                        break;
                    }
                },
            }
        }
        debug!("Device tracker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;
    use std::collections::VecDeque;

    /// Scripted enumerator: returns queued snapshots in order, then repeats
    /// the last one.
    struct ScriptedEnumerator {
        snapshots: VecDeque<Result<HashSet<DeviceIdentity>>>,
        last: HashSet<DeviceIdentity>,
    }

    impl ScriptedEnumerator {
        fn new(snapshots: Vec<Result<HashSet<DeviceIdentity>>>) -> Self {
            Self {
                snapshots: snapshots.into(),
                last: HashSet::new(),
            }
        }
    }

    impl DeviceEnumerator for ScriptedEnumerator {
        fn enumerate(&mut self) -> Result<HashSet<DeviceIdentity>> {
            match self.snapshots.pop_front() {
                Some(Ok(devices)) => {
                    self.last = devices.clone();
                    Ok(devices)
                }
                Some(Err(err)) => Err(err),
                None => Ok(self.last.clone()),
            }
        }
    }

    fn device(name: &str) -> DeviceIdentity {
        DeviceIdentity::new(name, Some(format!("{name}-vendor")), None, None)
    }

    fn set(names: &[&str]) -> HashSet<DeviceIdentity> {
        names.iter().map(|name| device(name)).collect()
    }

    #[test]
    fn test_seed_generates_no_events_and_tracks_initial_devices() {
        let enumerator = ScriptedEnumerator::new(vec![Ok(set(&["a", "b", "c"]))]);
        let tracker = DeviceTracker::new(Box::new(enumerator));
        // Seeding is silent regardless of how many devices are present.
        assert_eq!(tracker.known_count(), 3);
    }

    #[test]
    fn test_poll_diff_scenario() {
        // Snapshots {A}, {A,B}, {B}: nothing after seed, Added(B) after
        // tick 2, Removed(A) after tick 3.
        let enumerator = ScriptedEnumerator::new(vec![
            Ok(set(&["a"])),
            Ok(set(&["a", "b"])),
            Ok(set(&["b"])),
        ]);
        let mut tracker = DeviceTracker::new(Box::new(enumerator));

        let tick2 = tracker.poll_diff().unwrap();
        assert_eq!(tick2.len(), 1);
        assert_eq!(tick2[0].kind, DeviceEventKind::Added);
        assert_eq!(tick2[0].vendor, "b-vendor");

        let tick3 = tracker.poll_diff().unwrap();
        assert_eq!(tick3.len(), 1);
        assert_eq!(tick3[0].kind, DeviceEventKind::Removed);
        assert_eq!(tick3[0].vendor, "a-vendor");

        assert_eq!(tracker.known_count(), 1);
    }

    #[test]
    fn test_unchanged_snapshot_emits_nothing() {
        let enumerator =
            ScriptedEnumerator::new(vec![Ok(set(&["a", "b"])), Ok(set(&["a", "b"]))]);
        let mut tracker = DeviceTracker::new(Box::new(enumerator));
        assert!(tracker.poll_diff().unwrap().is_empty());
        // Repeated last snapshot: still nothing.
        assert!(tracker.poll_diff().unwrap().is_empty());
    }

    #[test]
    fn test_failed_poll_leaves_known_set_untouched() {
        let enumerator = ScriptedEnumerator::new(vec![
            Ok(set(&["a"])),
            Err(MonitorError::capability_error("scan failed")),
            Ok(set(&["a", "b"])),
        ]);
        let mut tracker = DeviceTracker::new(Box::new(enumerator));
        assert!(tracker.poll_diff().is_err());
        assert_eq!(tracker.known_count(), 1);

        let events = tracker.poll_diff().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DeviceEventKind::Added);
    }

    #[test]
    fn test_failed_seed_reports_devices_as_added_later() {
        let enumerator = ScriptedEnumerator::new(vec![
            Err(MonitorError::capability_error("initial scan failed")),
            Ok(set(&["a"])),
        ]);
        let mut tracker = DeviceTracker::new(Box::new(enumerator));
        assert_eq!(tracker.known_count(), 0);
        let events = tracker.poll_diff().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DeviceEventKind::Added);
    }

    #[test]
    fn test_apply_change_updates_incrementally() {
        let enumerator = ScriptedEnumerator::new(vec![Ok(set(&[]))]);
        let mut tracker = DeviceTracker::new(Box::new(enumerator));

        let added = tracker.apply_change(DeviceChange {
            kind: DeviceEventKind::Added,
            identity: device("a"),
        });
        assert_eq!(added.unwrap().kind, DeviceEventKind::Added);
        assert_eq!(tracker.known_count(), 1);

        let removed = tracker.apply_change(DeviceChange {
            kind: DeviceEventKind::Removed,
            identity: device("a"),
        });
        assert_eq!(removed.unwrap().kind, DeviceEventKind::Removed);
        assert_eq!(tracker.known_count(), 0);
    }

    #[test]
    fn test_apply_change_ignores_redundant_transitions() {
        let enumerator = ScriptedEnumerator::new(vec![Ok(set(&["a"]))]);
        let mut tracker = DeviceTracker::new(Box::new(enumerator));

        // Duplicate add for a present device
        assert!(tracker
            .apply_change(DeviceChange {
                kind: DeviceEventKind::Added,
                identity: device("a"),
            })
            .is_none());
        // Remove for a device that was never present
        assert!(tracker
            .apply_change(DeviceChange {
                kind: DeviceEventKind::Removed,
                identity: device("b"),
            })
            .is_none());
        assert_eq!(tracker.known_count(), 1);
    }
}
