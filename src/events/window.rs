use serde::{Deserialize, Serialize};
use std::fmt;

/// Window identifier handed out by the window system.
///
/// This is a reference to a window the OS owns, never an ownership handle. Ids are only
/// meaningful while the window exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId(pub u32);

impl WindowId {
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Window frame in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WindowFrame {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl WindowFrame {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// True when every component differs by less than `tolerance`.
    pub fn nearly_equals(&self, other: &WindowFrame, tolerance: f64) -> bool {
        (self.x - other.x).abs() < tolerance
            && (self.y - other.y).abs() < tolerance
            && (self.width - other.width).abs() < tolerance
            && (self.height - other.height).abs() < tolerance
    }
}

/// Case-normalized application identifier. Every comparison between application ids goes
/// through this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppKey(String);

impl AppKey {
    pub fn new(app_id: &str) -> Self {
        Self(app_id.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The process that owns a window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppIdentity {
    pub pid: u32,
    pub bundle_id: String,
    pub name: String,
}

impl AppIdentity {
    pub fn new(pid: u32, bundle_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            pid,
            bundle_id: bundle_id.into(),
            name: name.into(),
        }
    }

    /// Case-insensitive match against an application identifier.
    pub fn matches(&self, app_id: &str) -> bool {
        AppKey::new(&self.bundle_id) == AppKey::new(app_id)
    }
}

/// One capturable window as reported by the window system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub id: WindowId,
    pub title: String,
    pub application: Option<AppIdentity>,
    pub frame: WindowFrame,
    pub is_on_screen: bool,
    pub layer: i32,
    /// Number of native tabs collapsed into this window; 1 for an ordinary window.
    pub tab_count: usize,
}

impl WindowInfo {
    pub fn new(id: WindowId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            application: None,
            frame: WindowFrame::default(),
            is_on_screen: true,
            layer: 0,
            tab_count: 1,
        }
    }

    pub fn with_application(mut self, application: AppIdentity) -> Self {
        self.application = Some(application);
        self
    }

    pub fn with_frame(mut self, frame: WindowFrame) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_on_screen(mut self, is_on_screen: bool) -> Self {
        self.is_on_screen = is_on_screen;
        self
    }

    pub fn with_layer(mut self, layer: i32) -> Self {
        self.layer = layer;
        self
    }

    pub fn owner_pid(&self) -> Option<u32> {
        self.application.as_ref().map(|app| app.pid)
    }

    pub fn belongs_to(&self, app_id: &str) -> bool {
        self.application
            .as_ref()
            .is_some_and(|app| app.matches(app_id))
    }
}

impl fmt::Display for WindowInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.application {
            Some(app) => write!(f, "{} \"{}\" ({})", self.id, self.title, app.bundle_id),
            None => write!(f, "{} \"{}\"", self.id, self.title),
        }
    }
}

/// Lightweight per-window metadata, cheaper to fetch than a full snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowMetadata {
    pub alpha: f64,
    pub is_on_screen: bool,
}

/// A running process with a user-facing application identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunningApp {
    pub pid: u32,
    pub bundle_id: String,
    pub name: String,
}

impl RunningApp {
    pub fn matches(&self, app_id: &str) -> bool {
        AppKey::new(&self.bundle_id) == AppKey::new(app_id)
    }
}

impl From<&AppIdentity> for RunningApp {
    fn from(app: &AppIdentity) -> Self {
        Self {
            pid: app.pid,
            bundle_id: app.bundle_id.clone(),
            name: app.name.clone(),
        }
    }
}
