use super::{AppCatalog, AppInfo};
use crate::error::Result;
use crate::events::AppKey;
use crate::mirage_error;
use freedesktop_desktop_entry::{self as desktop_entry, DesktopEntry, ExecError};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use tracing::debug;

const LOCALES: &[&str] = &["en"];

/// Catalog built from freedesktop `.desktop` entries in the XDG data directories.
///
/// The application identifier is the lowercased basename of the `Exec` binary, which lines up
/// with process names reported by the window system.
#[derive(Default)]
pub struct DesktopEntryCatalog {
    directories: Option<Vec<PathBuf>>,
}

impl DesktopEntryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_directories(directories: Vec<PathBuf>) -> Self {
        Self {
            directories: Some(directories),
        }
    }

    fn scan(directories: Option<Vec<PathBuf>>, include_icons: bool) -> Vec<AppInfo> {
        let paths: Vec<PathBuf> = match directories {
            Some(directories) => desktop_entry::Iter::new(directories.into_iter()).collect(),
            None => desktop_entry::Iter::new(desktop_entry::default_paths()).collect(),
        };

        let mut apps = BTreeMap::new();
        for path in paths {
            let entry = match DesktopEntry::from_path(path.clone(), Some(LOCALES)) {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping desktop entry {:?}: {}", path, e);
                    continue;
                }
            };
            if let Some(app) = application_from_entry(&entry, include_icons) {
                // earlier directories take precedence (user entries shadow system ones)
                apps.entry(AppKey::new(&app.bundle_id)).or_insert(app);
            }
        }

        let mut apps: Vec<AppInfo> = apps.into_values().collect();
        apps.sort_by_key(|app| app.name.to_lowercase());
        apps
    }
}

fn application_from_entry(entry: &DesktopEntry, include_icons: bool) -> Option<AppInfo> {
    if entry.desktop_entry("Type") != Some("Application") {
        return None;
    }
    let flagged = |key: &str| entry.desktop_entry(key) == Some("true");
    if flagged("NoDisplay") || flagged("Hidden") {
        return None;
    }

    let args = match entry.parse_exec() {
        Ok(args) => args,
        Err(ExecError::ExecFieldNotFound) | Err(ExecError::ExecFieldIsEmpty) => return None,
        Err(ExecError::WrongFormat(e)) => {
            debug!("Malformed Exec in {}: {}", entry.id(), e);
            return None;
        }
    };
    let binary = args
        .iter()
        .find(|arg| arg.as_str() != "env" && !arg.contains('='))?
        .rsplit('/')
        .next()?;
    if binary.is_empty() {
        return None;
    }

    let name = entry.name(LOCALES)?;
    let mut app = AppInfo::new(AppKey::new(binary).into_string(), name.into_owned());
    if include_icons {
        app.icon = entry.icon().map(str::to_string);
    }
    Some(app)
}

#[async_trait::async_trait]
impl AppCatalog for DesktopEntryCatalog {
    async fn scan_installed_apps(
        &self,
        include_icons: bool,
        running: &HashSet<String>,
        streaming: &HashSet<String>,
    ) -> Result<Vec<AppInfo>> {
        let directories = self.directories.clone();
        let apps = tokio::task::spawn_blocking(move || Self::scan(directories, include_icons))
            .await
            .map_err(|e| mirage_error!(app_catalog, "desktop entry scan aborted: {}", e))?;
        Ok(self.update_status(apps, running, streaming))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    const FIREFOX: &str = "[Desktop Entry]\n\
        Type=Application\n\
        Name=Firefox\n\
        Exec=env MOZ_ENABLE_WAYLAND=1 /usr/lib/firefox/firefox %u\n\
        Icon=firefox\n\
        \n\
        [Desktop Action new-window]\n\
        Name=New Window\n\
        Exec=firefox --new-window\n";

    fn write_entry(dir: &Path, file: &str, contents: &str) {
        fs::write(dir.join(file), contents).unwrap();
    }

    fn no_apps() -> HashSet<String> {
        HashSet::new()
    }

    #[tokio::test]
    async fn scans_application_entries() {
        let dir = tempfile::tempdir().unwrap();
        write_entry(dir.path(), "firefox.desktop", FIREFOX);
        write_entry(
            dir.path(),
            "term.desktop",
            "[Desktop Entry]\nType=Application\nName=alacritty\nExec=Alacritty -e htop\n",
        );
        write_entry(dir.path(), "notes.txt", "not an entry");

        let catalog = DesktopEntryCatalog::with_directories(vec![dir.path().to_path_buf()]);
        let running: HashSet<String> = ["alacritty".to_string()].into();
        let apps = catalog.scan_installed_apps(true, &running, &no_apps()).await.unwrap();

        let ids: Vec<&str> = apps.iter().map(|app| app.bundle_id.as_str()).collect();
        assert_eq!(ids, vec!["alacritty", "firefox"]);
        assert!(apps[0].is_running);
        assert!(!apps[1].is_running);
        assert_eq!(apps[1].name, "Firefox");
        assert_eq!(apps[1].icon.as_deref(), Some("firefox"));

        let apps = catalog.scan_installed_apps(false, &no_apps(), &no_apps()).await.unwrap();
        assert!(apps.iter().all(|app| app.icon.is_none()));
    }

    #[tokio::test]
    async fn skips_hidden_and_non_application_entries() {
        let dir = tempfile::tempdir().unwrap();
        write_entry(
            dir.path(),
            "helper.desktop",
            "[Desktop Entry]\nType=Application\nName=Helper\nExec=helper\nNoDisplay=true\n",
        );
        write_entry(
            dir.path(),
            "gone.desktop",
            "[Desktop Entry]\nType=Application\nName=Gone\nExec=gone\nHidden=true\n",
        );
        write_entry(
            dir.path(),
            "docs.desktop",
            "[Desktop Entry]\nType=Link\nName=Docs\nURL=https://example.com\n",
        );
        write_entry(dir.path(), "noexec.desktop", "[Desktop Entry]\nType=Application\nName=Broken\n");

        let catalog = DesktopEntryCatalog::with_directories(vec![dir.path().to_path_buf()]);
        assert!(catalog.scan_installed_apps(false, &no_apps(), &no_apps()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn earlier_directories_shadow_later_ones() {
        let user = tempfile::tempdir().unwrap();
        let system = tempfile::tempdir().unwrap();
        write_entry(
            user.path(),
            "editor.desktop",
            "[Desktop Entry]\nType=Application\nName=My Editor\nExec=/opt/editor/editor\n",
        );
        write_entry(
            system.path(),
            "editor.desktop",
            "[Desktop Entry]\nType=Application\nName=Editor\nExec=editor %F\n",
        );

        let catalog = DesktopEntryCatalog::with_directories(vec![
            user.path().to_path_buf(),
            system.path().to_path_buf(),
        ]);
        let apps = catalog.scan_installed_apps(false, &no_apps(), &no_apps()).await.unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].name, "My Editor");
    }

    #[tokio::test]
    async fn missing_directories_yield_empty_catalog() {
        let catalog = DesktopEntryCatalog::with_directories(vec![PathBuf::from("/nonexistent/apps")]);
        assert!(catalog.scan_installed_apps(true, &no_apps(), &no_apps()).await.unwrap().is_empty());
    }
}
