use crate::error::{MirageError, Result};
use crate::events::{AppIdentity, RunningApp, WindowFrame, WindowId, WindowInfo, WindowMetadata};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::info;

use super::r#trait::WindowSystem;

#[derive(Default)]
struct SimulatedState {
    windows: Vec<WindowInfo>,
    running: Vec<RunningApp>,
    frontmost: Option<u32>,
    failures_remaining: u32,
}

/// In-memory window system for dry runs and tests.
///
/// Windows and processes are mutated directly; queries read the current state.
pub struct SimulatedWindowSystem {
    state: RwLock<SimulatedState>,
    snapshots: AtomicU64,
    next_window_id: AtomicU32,
}

impl Default for SimulatedWindowSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedWindowSystem {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SimulatedState::default()),
            snapshots: AtomicU64::new(0),
            next_window_id: AtomicU32::new(1),
        }
    }

    pub fn launch(&self, app: &AppIdentity) {
        let mut state = self.state.write();
        if !state.running.iter().any(|running| running.pid == app.pid) {
            state.running.push(RunningApp::from(app));
        }
    }

    /// Removes the process and every window it owns.
    pub fn terminate(&self, pid: u32) {
        let mut state = self.state.write();
        state.running.retain(|app| app.pid != pid);
        state.windows.retain(|window| window.owner_pid() != Some(pid));
        if state.frontmost == Some(pid) {
            state.frontmost = None;
        }
    }

    /// Inserts or replaces a window. The owning application is launched if needed.
    pub fn put_window(&self, window: WindowInfo) {
        if let Some(app) = &window.application {
            self.launch(app);
        }
        let mut state = self.state.write();
        match state.windows.iter_mut().find(|existing| existing.id == window.id) {
            Some(existing) => *existing = window,
            None => state.windows.push(window),
        }
    }

    pub fn open_window(&self, app: &AppIdentity, title: &str, frame: WindowFrame) -> WindowId {
        let id = WindowId(self.next_window_id.fetch_add(1, Ordering::Relaxed));
        self.put_window(
            WindowInfo::new(id, title)
                .with_application(app.clone())
                .with_frame(frame),
        );
        id
    }

    pub fn close_window(&self, id: WindowId) {
        self.state.write().windows.retain(|window| window.id != id);
    }

    pub fn set_on_screen(&self, id: WindowId, is_on_screen: bool) {
        if let Some(window) = self.state.write().windows.iter_mut().find(|w| w.id == id) {
            window.is_on_screen = is_on_screen;
        }
    }

    pub fn set_frontmost(&self, pid: Option<u32>) {
        self.state.write().frontmost = pid;
    }

    /// The next `count` queries fail with a window system error.
    pub fn fail_next(&self, count: u32) {
        self.state.write().failures_remaining = count;
    }

    pub fn snapshot_count(&self) -> u64 {
        self.snapshots.load(Ordering::Relaxed)
    }

    fn check_failure(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return MirageError::window_system("simulated query failure");
        }
        Ok(())
    }

    /// Scripted scenario for dry runs: windows open, hide, reappear and close, focus moves
    /// between two applications, and the terminal is relaunched every cycle.
    pub async fn run_script(self: Arc<Self>, step: Duration) {
        info!("Dry-run: simulated window system running scripted scenario");

        let terminal = AppIdentity::new(4100, "org.mirage.terminal", "Terminal");
        let browser = AppIdentity::new(4200, "org.mirage.browser", "Browser");
        let mut ticker = interval(step);
        let mut cycle = 0u32;

        loop {
            cycle += 1;
            ticker.tick().await;
            let main = self.open_window(
                &terminal,
                "Terminal - dry_run",
                WindowFrame::new(0.0, 0.0, 1024.0, 768.0),
            );
            self.set_frontmost(Some(terminal.pid));
            info!("Dry-run cycle {}: opened terminal window {}", cycle, main);

            ticker.tick().await;
            let second = self.open_window(
                &terminal,
                "Terminal 2 - dry_run",
                WindowFrame::new(40.0, 40.0, 900.0, 600.0),
            );
            self.set_on_screen(second, false);
            self.open_window(
                &browser,
                "Browser - dry_run",
                WindowFrame::new(100.0, 50.0, 1280.0, 800.0),
            );
            self.set_frontmost(Some(browser.pid));

            ticker.tick().await;
            self.set_on_screen(second, true);
            self.set_frontmost(Some(terminal.pid));

            ticker.tick().await;
            self.close_window(main);

            ticker.tick().await;
            self.terminate(terminal.pid);
            info!("Dry-run cycle {}: terminal terminated", cycle);
        }
    }
}

#[async_trait::async_trait]
impl WindowSystem for SimulatedWindowSystem {
    async fn snapshot(&self) -> Result<Vec<WindowInfo>> {
        self.check_failure()?;
        self.snapshots.fetch_add(1, Ordering::Relaxed);
        Ok(self.state.read().windows.clone())
    }

    async fn window_metadata(&self, ids: &[WindowId]) -> Result<HashMap<WindowId, WindowMetadata>> {
        self.check_failure()?;
        let state = self.state.read();
        Ok(state
            .windows
            .iter()
            .filter(|window| ids.contains(&window.id))
            .map(|window| {
                let metadata = WindowMetadata {
                    alpha: 1.0,
                    is_on_screen: window.is_on_screen,
                };
                (window.id, metadata)
            })
            .collect())
    }

    async fn frontmost_process(&self) -> Result<Option<u32>> {
        self.check_failure()?;
        Ok(self.state.read().frontmost)
    }

    async fn window_owners(&self, ids: &[WindowId]) -> Result<HashMap<WindowId, u32>> {
        self.check_failure()?;
        let state = self.state.read();
        Ok(state
            .windows
            .iter()
            .filter(|window| ids.contains(&window.id))
            .filter_map(|window| window.owner_pid().map(|pid| (window.id, pid)))
            .collect())
    }

    async fn running_applications(&self) -> Result<Vec<RunningApp>> {
        self.check_failure()?;
        Ok(self.state.read().running.clone())
    }
}
