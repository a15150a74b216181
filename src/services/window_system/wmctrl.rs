use crate::error::Result;
use crate::events::{AppIdentity, AppKey, RunningApp, WindowFrame, WindowId, WindowInfo, WindowMetadata};
use crate::mirage_error;
use procfs::process::{all_processes, Process};
use std::collections::{HashMap, HashSet};
use tokio::process::Command;
use tracing::debug;

use super::r#trait::WindowSystem;

/// X11 window system backed by `wmctrl`, `xprop`, `xdotool` and procfs.
pub struct WmctrlWindowSystem;

impl WmctrlWindowSystem {
    pub fn new() -> Result<Self> {
        if std::env::var_os("DISPLAY").is_none() {
            return Err(mirage_error!(
                service_unavailable,
                "DISPLAY is not set; the wmctrl backend needs an X11 session"
            ));
        }
        Ok(Self)
    }

    async fn run(program: &str, args: &[&str]) -> Result<String> {
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| mirage_error!(window_system, "{} not available: {}", program, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(mirage_error!(window_system, "{} failed: {}", program, stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn current_desktop() -> Result<Option<i64>> {
        let stdout = Self::run("wmctrl", &["-d"]).await?;
        Ok(parse_current_desktop(&stdout))
    }

    /// Minimized windows stay on their desktop in `wmctrl` output; only the EWMH state tells.
    async fn is_minimized(id: WindowId) -> bool {
        let window = format!("0x{:08x}", id.0);
        match Self::run("xprop", &["-id", &window, "_NET_WM_STATE"]).await {
            Ok(stdout) => parse_wm_state_hidden(&stdout),
            Err(e) => {
                debug!("No window state for {}: {}", window, e);
                false
            }
        }
    }

    /// On-screen flag per row: on the current desktop (or sticky) and not minimized.
    async fn visibility(rows: &[WmctrlRow], current_desktop: Option<i64>) -> HashMap<WindowId, bool> {
        let mut visible = HashMap::with_capacity(rows.len());
        for row in rows {
            let on_screen = is_visible_on(row, current_desktop) && !Self::is_minimized(row.id).await;
            visible.insert(row.id, on_screen);
        }
        visible
    }

    async fn process_identities(pids: HashSet<u32>) -> Result<HashMap<u32, AppIdentity>> {
        tokio::task::spawn_blocking(move || {
            pids.into_iter()
                .filter_map(|pid| {
                    let process = Process::new(pid as i32).ok()?;
                    Some((pid, process_identity(&process)?))
                })
                .collect::<HashMap<u32, AppIdentity>>()
        })
        .await
        .map_err(|e| mirage_error!(internal, "process lookup task failed: {}", e))
    }
}

fn process_identity(process: &Process) -> Option<AppIdentity> {
    let cmdline = process.cmdline().ok()?;
    let stat = process.stat().ok()?;
    identity_from(process.pid() as u32, &stat.comm, &cmdline)
}

/// Kernel threads have an empty command line and never present as applications.
fn identity_from(pid: u32, comm: &str, cmdline: &[String]) -> Option<AppIdentity> {
    let name = comm.trim();
    if name.is_empty() || cmdline.is_empty() {
        return None;
    }
    Some(AppIdentity::new(pid, AppKey::new(name).into_string(), name))
}

fn scan_running_applications() -> Result<Vec<RunningApp>> {
    let processes = all_processes()
        .map_err(|e| mirage_error!(window_system, "cannot list processes: {}", e))?;

    Ok(processes
        .filter_map(|process| process.ok())
        .filter_map(|process| process_identity(&process))
        .map(|identity| RunningApp::from(&identity))
        .collect())
}

/// A row of `wmctrl -lpG`: id, desktop, pid, x, y, width, height, host, title.
#[derive(Debug, Clone, PartialEq)]
struct WmctrlRow {
    id: WindowId,
    desktop: i64,
    pid: u32,
    frame: WindowFrame,
    title: String,
}

fn parse_window_rows(stdout: &str) -> Vec<WmctrlRow> {
    stdout.lines().filter_map(parse_window_row).collect()
}

fn parse_window_row(line: &str) -> Option<WmctrlRow> {
    let mut parts = line.split_whitespace();
    let id = u32::from_str_radix(parts.next()?.trim_start_matches("0x"), 16).ok()?;
    let desktop = parts.next()?.parse().ok()?;
    let pid = parts.next()?.parse().ok()?;
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    let width = parts.next()?.parse().ok()?;
    let height = parts.next()?.parse().ok()?;
    let _host = parts.next()?;
    let title = parts.collect::<Vec<_>>().join(" ");

    Some(WmctrlRow {
        id: WindowId(id),
        desktop,
        pid,
        frame: WindowFrame::new(x, y, width, height),
        title,
    })
}

/// The desktop marked with `*` in `wmctrl -d`.
fn parse_current_desktop(stdout: &str) -> Option<i64> {
    stdout.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let index = parts.next()?.parse().ok()?;
        (parts.next()? == "*").then_some(index)
    })
}

/// True when `xprop` lists `_NET_WM_STATE_HIDDEN`. A missing property means a normal window.
fn parse_wm_state_hidden(stdout: &str) -> bool {
    stdout.split_once('=').map_or(false, |(_, atoms)| {
        atoms.split(',').any(|atom| atom.trim() == "_NET_WM_STATE_HIDDEN")
    })
}

/// Sticky windows (desktop -1) are visible on every desktop.
fn is_visible_on(row: &WmctrlRow, current_desktop: Option<i64>) -> bool {
    row.desktop == -1 || current_desktop.map_or(true, |desktop| desktop == row.desktop)
}

#[async_trait::async_trait]
impl WindowSystem for WmctrlWindowSystem {
    async fn snapshot(&self) -> Result<Vec<WindowInfo>> {
        let rows = parse_window_rows(&Self::run("wmctrl", &["-lpG"]).await?);
        let current_desktop = Self::current_desktop().await?;
        let visible = Self::visibility(&rows, current_desktop).await;

        // pid 0 means the client did not set _NET_WM_PID
        let pids: HashSet<u32> = rows.iter().map(|row| row.pid).filter(|pid| *pid != 0).collect();
        let identities = Self::process_identities(pids).await?;

        let mut windows = Vec::with_capacity(rows.len());
        for row in rows {
            let mut window = WindowInfo::new(row.id, row.title)
                .with_frame(row.frame)
                .with_on_screen(visible.get(&row.id).copied().unwrap_or(false));
            window.application = identities.get(&row.pid).cloned();
            windows.push(window);
        }

        debug!("wmctrl snapshot: {} windows", windows.len());
        Ok(windows)
    }

    async fn window_metadata(&self, ids: &[WindowId]) -> Result<HashMap<WindowId, WindowMetadata>> {
        let rows = parse_window_rows(&Self::run("wmctrl", &["-lpG"]).await?);
        let current_desktop = Self::current_desktop().await?;
        let wanted: HashSet<WindowId> = ids.iter().copied().collect();
        let rows: Vec<WmctrlRow> = rows.into_iter().filter(|row| wanted.contains(&row.id)).collect();
        let visible = Self::visibility(&rows, current_desktop).await;

        Ok(rows
            .iter()
            .map(|row| {
                let metadata = WindowMetadata {
                    alpha: 1.0,
                    is_on_screen: visible.get(&row.id).copied().unwrap_or(false),
                };
                (row.id, metadata)
            })
            .collect())
    }

    async fn frontmost_process(&self) -> Result<Option<u32>> {
        let stdout = match Self::run("xdotool", &["getactivewindow", "getwindowpid"]).await {
            Ok(stdout) => stdout,
            Err(e) => {
                // xdotool fails when no window has focus (e.g. the desktop is focused)
                debug!("No frontmost window: {}", e);
                return Ok(None);
            }
        };
        Ok(stdout.trim().parse().ok())
    }

    async fn window_owners(&self, ids: &[WindowId]) -> Result<HashMap<WindowId, u32>> {
        let rows = parse_window_rows(&Self::run("wmctrl", &["-lpG"]).await?);
        let wanted: HashSet<WindowId> = ids.iter().copied().collect();

        Ok(rows
            .into_iter()
            .filter(|row| row.pid != 0 && wanted.contains(&row.id))
            .map(|row| (row.id, row.pid))
            .collect())
    }

    async fn running_applications(&self) -> Result<Vec<RunningApp>> {
        tokio::task::spawn_blocking(scan_running_applications)
            .await
            .map_err(|e| mirage_error!(internal, "process scan task failed: {}", e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_window_rows() {
        let stdout = "0x03a00003  0 12345  10   40   800  600  laptop Mail - Inbox\n\
                      0x04000007 -1 222    0    0    1920 32   laptop panel\n\
                      garbage line\n";

        let rows = parse_window_rows(stdout);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, WindowId(0x03a00003));
        assert_eq!(rows[0].pid, 12345);
        assert_eq!(rows[0].frame, WindowFrame::new(10.0, 40.0, 800.0, 600.0));
        assert_eq!(rows[0].title, "Mail - Inbox");
        assert_eq!(rows[1].desktop, -1);
    }

    #[test]
    fn parses_current_desktop() {
        let stdout = "0  - DG: 1920x1080  VP: N/A  WA: 0,0 1920x1080  One\n\
                      1  * DG: 1920x1080  VP: 0,0  WA: 0,0 1920x1080  Two\n";
        assert_eq!(parse_current_desktop(stdout), Some(1));
        assert_eq!(parse_current_desktop(""), None);
    }

    #[test]
    fn sticky_windows_are_always_visible() {
        let row = parse_window_row("0x1 -1 1 0 0 10 10 host t").unwrap();
        assert!(is_visible_on(&row, Some(3)));

        let row = parse_window_row("0x2 2 1 0 0 10 10 host t").unwrap();
        assert!(!is_visible_on(&row, Some(3)));
        assert!(is_visible_on(&row, Some(2)));
    }

    #[test]
    fn minimized_state_is_detected() {
        assert!(parse_wm_state_hidden(
            "_NET_WM_STATE(ATOM) = _NET_WM_STATE_SKIP_TASKBAR, _NET_WM_STATE_HIDDEN\n"
        ));
        assert!(!parse_wm_state_hidden(
            "_NET_WM_STATE(ATOM) = _NET_WM_STATE_MAXIMIZED_VERT, _NET_WM_STATE_MAXIMIZED_HORZ\n"
        ));
        assert!(!parse_wm_state_hidden("_NET_WM_STATE:  not found.\n"));
        assert!(!parse_wm_state_hidden(""));
    }

    #[test]
    fn kernel_threads_are_not_applications() {
        assert!(identity_from(2, "kthreadd", &[]).is_none());
        assert!(identity_from(7, "  ", &["/usr/bin/x".to_string()]).is_none());

        let identity = identity_from(4242, "Firefox", &["/usr/lib/firefox/firefox".to_string()]).unwrap();
        assert_eq!(identity.bundle_id, "firefox");
        assert_eq!(identity.name, "Firefox");
        assert_eq!(identity.pid, 4242);
    }

    #[test]
    fn running_applications_include_this_process() {
        let apps = scan_running_applications().unwrap();
        let own = apps.iter().find(|app| app.pid == std::process::id()).unwrap();
        assert!(!own.bundle_id.is_empty());
    }
}
