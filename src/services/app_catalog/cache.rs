use super::{AppCatalog, AppInfo};
use crate::error::Result;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, info};

struct CachedApps {
    apps: Vec<AppInfo>,
    fetched_at: Instant,
}

/// One cache variant (with or without icons).
struct AppListSlot {
    ttl: Duration,
    cached: Mutex<Option<CachedApps>>,
    // held for the duration of a scan; later callers wait here and reuse its result
    scan_gate: tokio::sync::Mutex<()>,
}

impl AppListSlot {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cached: Mutex::new(None),
            scan_gate: tokio::sync::Mutex::new(()),
        }
    }

    fn fresh(&self) -> Option<Vec<AppInfo>> {
        let cached = self.cached.lock();
        cached
            .as_ref()
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.apps.clone())
    }
}

/// TTL cache in front of an [`AppCatalog`].
///
/// The icon and icon-less lists expire independently. Concurrent callers during a scan share
/// that scan instead of starting another one, so at most one scan per variant is in flight.
pub struct InstalledAppsCache {
    catalog: Arc<dyn AppCatalog>,
    plain: AppListSlot,
    with_icons: AppListSlot,
    generation: AtomicU64,
}

impl InstalledAppsCache {
    pub fn new(catalog: Arc<dyn AppCatalog>, ttl: Duration, icon_ttl: Duration) -> Self {
        Self {
            catalog,
            plain: AppListSlot::new(ttl),
            with_icons: AppListSlot::new(icon_ttl),
            generation: AtomicU64::new(0),
        }
    }

    fn slot(&self, include_icons: bool) -> &AppListSlot {
        if include_icons {
            &self.with_icons
        } else {
            &self.plain
        }
    }

    /// Installed applications with running/streaming flags from the given live sets.
    pub async fn get(
        &self,
        include_icons: bool,
        running: &HashSet<String>,
        streaming: &HashSet<String>,
    ) -> Result<Vec<AppInfo>> {
        let slot = self.slot(include_icons);

        if let Some(apps) = slot.fresh() {
            return Ok(self.catalog.update_status(apps, running, streaming));
        }

        let _scan = slot.scan_gate.lock().await;

        // another caller may have finished a scan while we waited
        if let Some(apps) = slot.fresh() {
            debug!("Installed app list shared with concurrent scan");
            return Ok(self.catalog.update_status(apps, running, streaming));
        }

        let generation = self.generation.load(Ordering::Acquire);
        let apps = self
            .catalog
            .scan_installed_apps(include_icons, running, streaming)
            .await?;
        info!("Scanned {} installed apps (icons: {})", apps.len(), include_icons);

        // an invalidation during the scan means this result may already be stale
        if self.generation.load(Ordering::Acquire) == generation {
            *slot.cached.lock() = Some(CachedApps {
                apps: apps.clone(),
                fetched_at: Instant::now(),
            });
        }

        Ok(apps)
    }

    /// Drops both cached lists.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        *self.plain.cached.lock() = None;
        *self.with_icons.cached.lock() = None;
        debug!("Installed app cache invalidated");
    }
}
