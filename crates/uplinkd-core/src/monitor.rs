//! The connection monitor: watches adopted connections for drops and
//! reconnects them with bounded retries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::radio::Radio;
use crate::status::StatusBoard;
use crate::worker::sleep_while_running;

/// Internal retry policy for one reconnect invocation.
const RECONNECT_ATTEMPTS: u32 = 2;
const RECONNECT_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Called with (interface, success) after a reconnect or a give-up.
type Subscriber = Box<dyn Fn(&str, bool) + Send + Sync>;

struct WatchEntry {
    radio: Arc<Radio>,
    failures: u32,
}

pub struct ConnectionMonitor {
    watched: Mutex<HashMap<String, WatchEntry>>,
    subscribers: Mutex<Vec<Subscriber>>,
    status: Arc<StatusBoard>,
    check_interval: Duration,
    max_attempts: u32,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionMonitor {
    pub fn new(config: &MonitorConfig, status: Arc<StatusBoard>) -> Arc<ConnectionMonitor> {
        Arc::new(ConnectionMonitor {
            watched: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            status,
            check_interval: Duration::from_secs(config.check_interval_secs),
            max_attempts: config.max_attempts,
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        })
    }

    /// Add a radio to the watchlist. Idempotent; an existing entry keeps its
    /// failure counter.
    pub fn watch(&self, radio: Arc<Radio>) {
        let mut watched = self.watched.lock().expect("watchlist poisoned");
        watched
            .entry(radio.name().to_string())
            .or_insert(WatchEntry { radio, failures: 0 });
    }

    pub fn unwatch(&self, name: &str) {
        self.watched.lock().expect("watchlist poisoned").remove(name);
    }

    pub fn watched(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .watched
            .lock()
            .expect("watchlist poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Register a subscriber for reconnect and give-up notifications.
    pub fn subscribe(&self, subscriber: impl Fn(&str, bool) + Send + Sync + 'static) {
        self.subscribers
            .lock()
            .expect("subscribers poisoned")
            .push(Box::new(subscriber));
    }

    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.status.set_monitoring_active(true);
        let monitor = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("monitor".to_string())
            .spawn(move || {
                while monitor.running.load(Ordering::SeqCst) {
                    monitor.tick();
                    sleep_while_running(&monitor.running, monitor.check_interval);
                }
            })
            .expect("failed to spawn monitor thread");
        *self.handle.lock().expect("monitor handle poisoned") = Some(handle);
        info!("monitor started");
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.handle.lock().expect("monitor handle poisoned").take() {
            let _ = handle.join();
        }
        self.status.set_monitoring_active(false);
        info!("monitor stopped");
    }

    /// One monitoring pass over the watchlist. The lock is held only to
    /// copy the entries out and to write counters back; association checks
    /// and reconnects happen outside it.
    pub(crate) fn tick(&self) {
        let entries: Vec<(String, Arc<Radio>, u32)> = {
            let watched = self.watched.lock().expect("watchlist poisoned");
            watched
                .iter()
                .map(|(name, entry)| (name.clone(), Arc::clone(&entry.radio), entry.failures))
                .collect()
        };

        for (name, radio, failures) in entries {
            let Some(expected) = radio.last_association() else {
                debug!("{}: no cached association, dropping from watchlist", name);
                self.unwatch(&name);
                continue;
            };

            let healthy = radio.is_associated()
                && radio.associated_ssid().as_deref() == Some(expected.ap.ssid.as_str());
            if healthy {
                self.set_failures(&name, 0);
                continue;
            }

            let failures = failures + 1;
            self.set_failures(&name, failures);
            warn!(
                "{}: association with '{}' lost ({}/{})",
                name, expected.ap.ssid, failures, self.max_attempts
            );

            if failures < self.max_attempts {
                match radio.reconnect(RECONNECT_ATTEMPTS, RECONNECT_BACKOFF_BASE) {
                    Ok(()) => {
                        info!("{}: reconnected to '{}'", name, expected.ap.ssid);
                        self.set_failures(&name, 0);
                        self.status.record_reconnect();
                        self.notify(&name, true);
                    }
                    Err(e) => {
                        debug!("{}: reconnect failed: {}", name, e);
                    }
                }
            } else {
                warn!(
                    "{}: giving up on '{}' after {} failures",
                    name, expected.ap.ssid, failures
                );
                radio.clear_last_association();
                self.unwatch(&name);
                self.status.record_gave_up();
                self.notify(&name, false);
            }
        }
    }

    fn set_failures(&self, name: &str, failures: u32) {
        let mut watched = self.watched.lock().expect("watchlist poisoned");
        if let Some(entry) = watched.get_mut(name) {
            entry.failures = failures;
        }
    }

    fn notify(&self, name: &str, success: bool) {
        let subscribers = self.subscribers.lock().expect("subscribers poisoned");
        for subscriber in subscribers.iter() {
            subscriber(name, success);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterfacesConfig;
    use crate::pool::RadioPool;
    use crate::registry::RoleRegistry;
    use crate::testutil::{ap_open, MockHostOps};

    struct Fixture {
        ops: MockHostOps,
        monitor: Arc<ConnectionMonitor>,
        status: Arc<StatusBoard>,
        radio: Arc<Radio>,
        events: Arc<Mutex<Vec<(String, bool)>>>,
    }

    fn fixture() -> Fixture {
        let ops = MockHostOps::new();
        ops.add_interface("wlan0", true);
        ops.add_interface("wlan1", true);

        let registry = Arc::new(RoleRegistry::new(None));
        let pool = RadioPool::enumerate(&InterfacesConfig::default(), ops.shared(), registry);
        let radio = pool.find("wlan1").unwrap();
        radio
            .associate(&ap_open("Cafe", "00:11:22:33:44:55", 90), None)
            .unwrap();

        let status = Arc::new(StatusBoard::new());
        let monitor = ConnectionMonitor::new(&MonitorConfig::default(), Arc::clone(&status));
        monitor.watch(Arc::clone(&radio));

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        monitor.subscribe(move |name, success| {
            sink.lock().unwrap().push((name.to_string(), success));
        });

        Fixture {
            ops,
            monitor,
            status,
            radio,
            events,
        }
    }

    #[test]
    fn watch_is_idempotent() {
        let f = fixture();
        f.monitor.watch(Arc::clone(&f.radio));
        assert_eq!(f.monitor.watched(), vec!["wlan1".to_string()]);
    }

    #[test]
    fn healthy_ticks_keep_the_counter_at_zero() {
        let f = fixture();
        for _ in 0..3 {
            f.monitor.tick();
        }
        assert!(f.events.lock().unwrap().is_empty());
        assert_eq!(f.monitor.watched(), vec!["wlan1".to_string()]);
        assert_eq!(f.status.snapshot().reconnects, 0);
    }

    #[test]
    fn drop_triggers_reconnect_and_resets_counter() {
        let f = fixture();
        f.monitor.tick();

        // One dropped tick: reconnect succeeds immediately.
        f.ops.drop_link("wlan1");
        f.monitor.tick();

        assert!(f.radio.is_associated());
        assert_eq!(
            f.events.lock().unwrap().as_slice(),
            &[("wlan1".to_string(), true)]
        );
        assert_eq!(f.status.snapshot().reconnects, 1);

        // Healthy again: no further events.
        f.monitor.tick();
        assert_eq!(f.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn persistent_failure_gives_up_after_max_attempts() {
        let f = fixture();
        f.ops.drop_link("wlan1");
        f.ops.fail_associations_to("Cafe");

        for _ in 0..5 {
            f.monitor.tick();
        }

        assert_eq!(
            f.events.lock().unwrap().as_slice(),
            &[("wlan1".to_string(), false)]
        );
        assert!(f.monitor.watched().is_empty());
        assert!(f.radio.last_association().is_none());
        assert_eq!(f.status.snapshot().gave_up, 1);

        // Further ticks are no-ops.
        f.monitor.tick();
        assert_eq!(f.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn ssid_mismatch_counts_as_a_drop() {
        let f = fixture();
        // The radio roamed somewhere unexpected: associated, wrong SSID.
        f.ops
            .shared()
            .associate(
                "wlan1",
                "Other",
                "ff:ee:dd:cc:bb:aa",
                None,
                Duration::from_secs(1),
            )
            .unwrap();

        f.monitor.tick();
        // The reconnect put it back on the cached SSID.
        assert_eq!(f.radio.associated_ssid().as_deref(), Some("Cafe"));
        assert_eq!(
            f.events.lock().unwrap().as_slice(),
            &[("wlan1".to_string(), true)]
        );
    }

    #[test]
    fn watch_without_cached_association_is_dropped() {
        let f = fixture();
        f.radio.clear_last_association();
        f.monitor.tick();
        assert!(f.monitor.watched().is_empty());
        assert!(f.events.lock().unwrap().is_empty());
    }
}
