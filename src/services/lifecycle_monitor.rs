//! Periodic reconciliation of sessions against the window system.
//!
//! Each tick takes one window snapshot and one running-application list before locking the
//! registry, then runs four passes under the lock:
//!
//! 1. Streaming sessions with a live lease are diffed against the snapshot. Newly on-screen
//!    windows produce `NewWindow`, vanished streamed windows produce `WindowClosed` and enter
//!    cooldown, and an application with no windows that is no longer running produces
//!    `AppTerminated`.
//! 2. Cooldowns past their deadline produce `CooldownExpired`.
//! 3. Sessions whose lease ran out are removed with `ReservationExpired`.
//! 4. With no sessions left the task detaches its handle and exits.
//!
//! A failed query skips the whole tick so no pass sees a partial view.

use crate::debug_if_enabled;
use crate::error::Result;
use crate::events::{AppKey, LifecycleEvent, RunningApp, WindowId, WindowInfo};
use crate::services::session::StreamSession;
use crate::services::session_registry::{RegistryInner, RegistrySettings};
use crate::services::tab_groups::capturable_windows;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Running reconciliation loop owned by the registry state.
pub(crate) struct MonitorHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub(crate) fn stop(self) {
        let _ = self.stop_tx.send(true);
        self.task.abort();
        info!("Window lifecycle monitor stopped");
    }
}

#[derive(Debug, PartialEq, Eq)]
enum TickOutcome {
    Continue,
    Idle,
}

/// Starts the reconciliation loop. The first tick runs immediately.
pub(crate) fn spawn(inner: &Arc<RegistryInner>) -> MonitorHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let weak: Weak<RegistryInner> = Arc::downgrade(inner);
    let period = inner.settings.tick_interval;

    info!("Window lifecycle monitor started (every {:?})", period);

    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            if *stop_rx.borrow() {
                break;
            }
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if run_tick(&inner).await == TickOutcome::Idle {
                info!("No sessions left, window lifecycle monitor going idle");
                break;
            }
        }
    });

    MonitorHandle { stop_tx, task }
}

/// Window system state captured once per tick, before the registry lock is taken.
struct TickSnapshot {
    windows: Vec<WindowInfo>,
    running: Vec<RunningApp>,
}

impl TickSnapshot {
    async fn capture(inner: &RegistryInner) -> Result<Self> {
        let windows = inner.window_system.snapshot().await?;
        let running = inner.window_system.running_applications().await?;
        let settings = &inner.settings;
        Ok(Self {
            windows: capturable_windows(
                windows,
                settings.min_window_width,
                settings.min_window_height,
            ),
            running,
        })
    }

    fn is_running(&self, app_id: &str) -> bool {
        self.running.iter().any(|app| app.matches(app_id))
    }
}

async fn run_tick(inner: &RegistryInner) -> TickOutcome {
    let any_streaming = {
        let state = inner.state.lock().await;
        state.sessions.values().any(StreamSession::is_streaming)
    };

    let snapshot = if any_streaming {
        match TickSnapshot::capture(inner).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Window system query failed, skipping lifecycle tick: {}", e);
                return TickOutcome::Continue;
            }
        }
    } else {
        None
    };

    let now = Instant::now();
    let mut state = inner.state.lock().await;
    let mut events = Vec::new();

    if let Some(snapshot) = &snapshot {
        // sessions whose lease ran out are only reported as expired below
        let live = state
            .sessions
            .values_mut()
            .filter(|s| s.is_streaming() && !s.reservation_expired_at(now));
        for session in live {
            detect_window_changes(session, snapshot, &inner.settings, now, &mut events);
        }
    }

    for session in state.sessions.values_mut() {
        for window_id in session.expired_cooldowns_at(now) {
            session.windows_in_cooldown.remove(&window_id);
            events.push(LifecycleEvent::CooldownExpired {
                app_id: session.app_id.clone(),
                window_id,
            });
        }
    }

    let expired: Vec<AppKey> = state
        .sessions
        .iter()
        .filter(|(_, session)| session.reservation_expired_at(now))
        .map(|(key, _)| key.clone())
        .collect();
    for key in expired {
        if let Some(session) = state.sessions.remove(&key) {
            info!("Reservation expired, removed {}", session);
            events.push(LifecycleEvent::ReservationExpired {
                app_id: session.app_id,
            });
        }
    }

    for event in events {
        inner.notify(event);
    }

    if state.sessions.is_empty() {
        // the handle belongs to this task; dropping it detaches without aborting
        state.monitor = None;
        return TickOutcome::Idle;
    }

    TickOutcome::Continue
}

fn detect_window_changes(
    session: &mut StreamSession,
    snapshot: &TickSnapshot,
    settings: &RegistrySettings,
    now: Instant,
    events: &mut Vec<LifecycleEvent>,
) {
    let windows: Vec<&WindowInfo> = snapshot
        .windows
        .iter()
        .filter(|window| window.belongs_to(&session.app_id))
        .collect();
    let valid: HashSet<WindowId> = windows.iter().map(|window| window.id).collect();

    debug_if_enabled!(
        "{}: {} valid windows, {} streaming",
        session.app_id,
        valid.len(),
        session.window_streams.len()
    );

    if valid.is_empty() && session.has_active_windows() && !snapshot.is_running(&session.app_id) {
        info!("{} terminated while streaming", session.app_id);
        session.window_streams.clear();
        events.push(LifecycleEvent::AppTerminated {
            app_id: session.app_id.clone(),
        });
        return;
    }

    for window in &windows {
        if window.is_on_screen && session.known_window_ids.insert(window.id) {
            debug!("New window {} for {}", window, session.app_id);
            events.push(LifecycleEvent::NewWindow {
                app_id: session.app_id.clone(),
                window_id: window.id,
            });
        }
    }

    let mut closed: Vec<WindowId> = session
        .window_streams
        .keys()
        .filter(|window_id| !valid.contains(window_id))
        .copied()
        .collect();
    closed.sort_unstable();

    for window_id in closed {
        session.end_window_stream(window_id, now + settings.window_cooldown);
        events.push(LifecycleEvent::WindowClosed {
            app_id: session.app_id.clone(),
            window_id,
        });
    }
}
