use crate::debug_if_enabled;
use crate::events::WindowId;
use crate::services::window_system::WindowSystem;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Called with `(window, is_active)` when a window's owner gains or loses the foreground.
pub type ActivityCallback = Arc<dyn Fn(WindowId, bool) + Send + Sync>;

struct ActivityInner {
    window_system: Arc<dyn WindowSystem>,
    poll_interval: Duration,
    tracked: DashMap<WindowId, bool>,
    callback: RwLock<Option<ActivityCallback>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    // serializes timer polls with out-of-band checks
    check_gate: tokio::sync::Mutex<()>,
}

/// Tracks whether each monitored window belongs to the frontmost application.
///
/// Polls on its own task, independent of the window lifecycle monitor. Windows start out
/// active so nothing is throttled before the first real check, and the callback only fires
/// on transitions.
#[derive(Clone)]
pub struct WindowActivityMonitor {
    inner: Arc<ActivityInner>,
}

impl WindowActivityMonitor {
    pub fn new(window_system: Arc<dyn WindowSystem>, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(ActivityInner {
                window_system,
                poll_interval,
                tracked: DashMap::new(),
                callback: RwLock::new(None),
                poll_task: Mutex::new(None),
                check_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.poll_task.lock().is_some()
    }

    /// Last known state of a tracked window.
    pub fn is_active(&self, window_id: WindowId) -> Option<bool> {
        self.inner.tracked.get(&window_id).map(|entry| *entry)
    }

    pub fn tracked_count(&self) -> usize {
        self.inner.tracked.len()
    }

    /// Starts polling. Does nothing if already running.
    pub fn start(&self, windows: &[WindowId], on_activity_change: ActivityCallback) {
        let mut poll_task = self.inner.poll_task.lock();
        if poll_task.is_some() {
            debug!("Activity monitor already running");
            return;
        }

        for &window_id in windows {
            self.inner.tracked.insert(window_id, true);
        }
        *self.inner.callback.write() = Some(on_activity_change);

        info!(
            "Starting activity monitor for {} windows (every {:?})",
            windows.len(),
            self.inner.poll_interval
        );

        let weak: Weak<ActivityInner> = Arc::downgrade(&self.inner);
        let period = self.inner.poll_interval;
        *poll_task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                Self::check(&inner).await;
            }
        }));
    }

    /// Tracks another window, initially active, and checks it right away.
    pub fn add_window(&self, window_id: WindowId) {
        self.inner.tracked.entry(window_id).or_insert(true);

        if self.is_running() {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                Self::check(&inner).await;
            });
        }
    }

    pub fn remove_window(&self, window_id: WindowId) {
        self.inner.tracked.remove(&window_id);
    }

    /// Stops polling and forgets all windows and the callback. Safe to call repeatedly.
    pub fn stop(&self) {
        if let Some(handle) = self.inner.poll_task.lock().take() {
            handle.abort();
            info!("Activity monitor stopped");
        }
        self.inner.tracked.clear();
        *self.inner.callback.write() = None;
    }

    /// Runs one activity check immediately.
    pub async fn check_now(&self) {
        Self::check(&self.inner).await;
    }

    async fn check(inner: &ActivityInner) {
        let _gate = inner.check_gate.lock().await;

        let window_ids: Vec<WindowId> = inner.tracked.iter().map(|entry| *entry.key()).collect();
        if window_ids.is_empty() {
            return;
        }

        let frontmost = match inner.window_system.frontmost_process().await {
            Ok(pid) => pid,
            Err(e) => {
                debug!("Activity check skipped, frontmost query failed: {}", e);
                return;
            }
        };
        let owners = match inner.window_system.window_owners(&window_ids).await {
            Ok(owners) => owners,
            Err(e) => {
                debug!("Activity check skipped, window owner query failed: {}", e);
                return;
            }
        };

        let mut transitions = Vec::new();
        for window_id in window_ids {
            // closed windows are left alone until they are removed explicitly
            let Some(&owner) = owners.get(&window_id) else {
                continue;
            };
            let active = frontmost == Some(owner);
            if let Some(mut state) = inner.tracked.get_mut(&window_id) {
                if *state != active {
                    *state = active;
                    transitions.push((window_id, active));
                }
            }
        }

        if transitions.is_empty() {
            return;
        }

        let callback = inner.callback.read().clone();
        if let Some(callback) = callback {
            for (window_id, active) in transitions {
                debug_if_enabled!(
                    "Window {} is now {}",
                    window_id,
                    if active { "active" } else { "inactive" }
                );
                callback(window_id, active);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AppIdentity, WindowFrame};
    use crate::services::window_system::SimulatedWindowSystem;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (ActivityCallback, Arc<Mutex<Vec<(WindowId, bool)>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let callback: ActivityCallback = Arc::new(move |window_id, active| {
            sink.lock().push((window_id, active));
        });
        (callback, log)
    }

    fn setup() -> (Arc<SimulatedWindowSystem>, WindowId) {
        let ws = Arc::new(SimulatedWindowSystem::new());
        let editor = AppIdentity::new(10, "org.editor", "Editor");
        let id = ws.open_window(&editor, "main.rs", WindowFrame::new(0.0, 0.0, 800.0, 600.0));
        (ws, id)
    }

    #[tokio::test(start_paused = true)]
    async fn callback_fires_only_on_transitions() {
        let (ws, window) = setup();
        let monitor = WindowActivityMonitor::new(ws.clone(), Duration::from_secs(3600));
        let (callback, log) = recorder();
        monitor.start(&[window], callback);
        assert_eq!(monitor.is_active(window), Some(true));

        for frontmost in [20, 10, 20, 20, 20] {
            ws.set_frontmost(Some(frontmost));
            monitor.check_now().await;
        }

        assert_eq!(
            *log.lock(),
            vec![(window, false), (window, true), (window, false)]
        );
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn closed_windows_are_skipped() {
        let (ws, window) = setup();
        let monitor = WindowActivityMonitor::new(ws.clone(), Duration::from_secs(3600));
        let (callback, log) = recorder();
        monitor.start(&[window], callback);

        ws.close_window(window);
        ws.set_frontmost(Some(99));
        monitor.check_now().await;

        assert!(log.lock().is_empty());
        assert_eq!(monitor.is_active(window), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_interval() {
        let (ws, window) = setup();
        let monitor = WindowActivityMonitor::new(ws.clone(), Duration::from_millis(500));
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        monitor.start(
            &[window],
            Arc::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        ws.set_frontmost(Some(20));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.is_active(window), Some(false));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn added_window_is_checked_immediately() {
        let (ws, window) = setup();
        let monitor = WindowActivityMonitor::new(ws.clone(), Duration::from_secs(3600));
        let (callback, log) = recorder();
        monitor.start(&[], callback);

        ws.set_frontmost(Some(20));
        monitor.add_window(window);
        assert_eq!(monitor.is_active(window), Some(true));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(*log.lock(), vec![(window, false)]);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_clears_state() {
        let (ws, window) = setup();
        let monitor = WindowActivityMonitor::new(ws, Duration::from_millis(500));
        let (callback, _log) = recorder();

        monitor.start(&[window], callback.clone());
        monitor.start(&[WindowId(999)], callback);
        assert_eq!(monitor.tracked_count(), 1);

        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());
        assert_eq!(monitor.tracked_count(), 0);
    }
}
