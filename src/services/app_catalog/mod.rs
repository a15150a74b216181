//! Installed applications: the catalog collaborator interface and the cache in front of it.

mod cache;
mod desktop_entries;

pub use self::cache::InstalledAppsCache;
pub use self::desktop_entries::DesktopEntryCatalog;

use crate::error::Result;
use crate::events::AppKey;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// An installed application with its live status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub bundle_id: String,
    pub name: String,
    pub icon: Option<String>,
    pub is_running: bool,
    pub is_streaming: bool,
}

impl AppInfo {
    pub fn new(bundle_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            name: name.into(),
            icon: None,
            is_running: false,
            is_streaming: false,
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }
}

impl fmt::Display for AppInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.bundle_id)
    }
}

/// Application discovery collaborator.
///
/// `running` and `streaming` hold lowercased application identifiers.
#[async_trait::async_trait]
pub trait AppCatalog: Send + Sync {
    /// Full scan of installed applications.
    async fn scan_installed_apps(
        &self,
        include_icons: bool,
        running: &HashSet<String>,
        streaming: &HashSet<String>,
    ) -> Result<Vec<AppInfo>>;

    /// Refreshes the running/streaming flags of a previous scan.
    fn update_status(
        &self,
        apps: Vec<AppInfo>,
        running: &HashSet<String>,
        streaming: &HashSet<String>,
    ) -> Vec<AppInfo> {
        apps.into_iter()
            .map(|mut app| {
                let key = AppKey::new(&app.bundle_id).into_string();
                app.is_running = running.contains(&key);
                app.is_streaming = streaming.contains(&key);
                app
            })
            .collect()
    }
}
