//! Session registry: exclusive streaming reservations per application.
//!
//! The registry is the only writer of the session map. Client operations and the lifecycle
//! monitor both go through one async mutex, so an availability check and the reconciliation
//! loop never observe each other half-way.

use crate::config::Config;
use crate::error::{MirageError, Result};
use crate::mirage_error;
use crate::events::{AppKey, LifecycleEvent, WindowId};
use crate::services::app_catalog::{AppCatalog, AppInfo, InstalledAppsCache};
use crate::services::lifecycle_monitor::{self, MonitorHandle};
use crate::services::session::{SessionState, StreamSession, WindowStream};
use crate::services::window_system::WindowSystem;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Timing and filtering knobs the registry and its monitor need from [`Config`].
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub tick_interval: Duration,
    pub reservation_ttl: Duration,
    pub window_cooldown: Duration,
    pub min_window_width: f64,
    pub min_window_height: f64,
}

impl From<&Config> for RegistrySettings {
    fn from(config: &Config) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            reservation_ttl: config.reservation_ttl(),
            window_cooldown: config.window_cooldown(),
            min_window_width: config.monitor.min_window_width,
            min_window_height: config.monitor.min_window_height,
        }
    }
}

pub(crate) struct RegistryState {
    pub(crate) sessions: HashMap<AppKey, StreamSession>,
    pub(crate) monitor: Option<MonitorHandle>,
}

pub(crate) struct RegistryInner {
    pub(crate) state: Mutex<RegistryState>,
    pub(crate) window_system: Arc<dyn WindowSystem>,
    pub(crate) settings: RegistrySettings,
    events: mpsc::UnboundedSender<LifecycleEvent>,
    apps: InstalledAppsCache,
}

impl RegistryInner {
    pub(crate) fn notify(&self, event: LifecycleEvent) {
        debug!("Lifecycle event: {}", event);
        if self.events.send(event).is_err() {
            debug!("Lifecycle event dropped, no listener");
        }
    }
}

/// Owner of all streaming sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Creates a registry and the channel its lifecycle notifications are delivered on.
    pub fn new(
        config: &Config,
        window_system: Arc<dyn WindowSystem>,
        catalog: Arc<dyn AppCatalog>,
    ) -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let apps = InstalledAppsCache::new(
            catalog,
            config.app_cache_ttl(false),
            config.app_cache_ttl(true),
        );

        let registry = Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState {
                    sessions: HashMap::new(),
                    monitor: None,
                }),
                window_system,
                settings: RegistrySettings::from(config),
                events,
                apps,
            }),
        };

        (registry, receiver)
    }

    fn ensure_monitor(&self, state: &mut RegistryState) {
        if state.monitor.is_none() {
            state.monitor = Some(lifecycle_monitor::spawn(&self.inner));
        }
    }

    fn stop_monitor(state: &mut RegistryState) {
        if let Some(monitor) = state.monitor.take() {
            monitor.stop();
        }
    }

    /// Reserves `app_id` for `client_id`.
    ///
    /// The holder re-reserving renews its lease. Another client gets
    /// [`MirageError::AlreadyReserved`] until the lease expires; an expired session is
    /// replaced.
    pub async fn reserve(&self, app_id: &str, app_name: &str, client_id: &str) -> Result<StreamSession> {
        let key = AppKey::new(app_id);
        let now = Instant::now();
        let expiry = now + self.inner.settings.reservation_ttl;
        let mut state = self.inner.state.lock().await;

        if let Some(existing) = state.sessions.get_mut(&key) {
            if !existing.reservation_expired_at(now) {
                if existing.client_id != client_id {
                    return Err(MirageError::AlreadyReserved {
                        app: app_id.to_string(),
                        client: existing.client_id.clone(),
                    });
                }
                existing.reservation_expiry = expiry;
                debug!("Reservation for {} renewed by {}", key, client_id);
                return Ok(existing.clone());
            }
            info!(
                "Replacing expired reservation of {} held by {}",
                key, existing.client_id
            );
        }

        let session = StreamSession::new(client_id, app_id, app_name, expiry);
        info!("Reserved {} for client {}", session.app_name, client_id);
        state.sessions.insert(key, session.clone());
        self.ensure_monitor(&mut state);

        Ok(session)
    }

    /// Extends the lease of a live reservation held by `client_id`.
    pub async fn renew_reservation(&self, app_id: &str, client_id: &str) -> Result<Instant> {
        let now = Instant::now();
        let mut state = self.inner.state.lock().await;
        let session = Self::owned_session(&mut state, app_id, client_id, now)?;
        session.reservation_expiry = now + self.inner.settings.reservation_ttl;
        Ok(session.reservation_expiry)
    }

    /// Moves a reservation into the streaming phase.
    pub async fn begin_streaming(&self, app_id: &str, client_id: &str) -> Result<()> {
        let now = Instant::now();
        let mut state = self.inner.state.lock().await;
        let session = Self::owned_session(&mut state, app_id, client_id, now)?;
        if session.state != SessionState::Streaming {
            session.state = SessionState::Streaming;
            info!("Streaming started for {}", session);
        }
        Ok(())
    }

    /// Records that a window is being delivered to the client. A reserved session becomes
    /// streaming.
    pub async fn attach_window(&self, app_id: &str, window_id: WindowId, title: &str) -> Result<()> {
        let now = Instant::now();
        let mut state = self.inner.state.lock().await;
        let session = Self::live_session(&mut state, app_id, now)?;

        session.state = SessionState::Streaming;
        session.known_window_ids.insert(window_id);
        session.windows_in_cooldown.remove(&window_id);
        session.window_streams.insert(
            window_id,
            WindowStream {
                window_id,
                title: title.to_string(),
                started_at: now,
            },
        );
        debug!("Window {} attached to {}", window_id, session.app_id);
        Ok(())
    }

    /// Stops delivering a window; it enters cooldown. Returns false if it was not streaming.
    pub async fn detach_window(&self, app_id: &str, window_id: WindowId) -> Result<bool> {
        let now = Instant::now();
        let cooldown_until = now + self.inner.settings.window_cooldown;
        let mut state = self.inner.state.lock().await;
        let session = Self::live_session(&mut state, app_id, now)?;
        Ok(session.end_window_stream(window_id, cooldown_until))
    }

    /// Ends the reservation. The returned session is marked released.
    pub async fn release(&self, app_id: &str, client_id: &str) -> Result<StreamSession> {
        let now = Instant::now();
        let key = AppKey::new(app_id);
        let mut state = self.inner.state.lock().await;
        Self::owned_session(&mut state, app_id, client_id, now)?;

        let mut session = state
            .sessions
            .remove(&key)
            .ok_or_else(|| mirage_error!(session_not_found, "{}", app_id))?;
        session.state = SessionState::Released;
        info!("Released {}", session);

        if state.sessions.is_empty() {
            Self::stop_monitor(&mut state);
        }
        Ok(session)
    }

    /// True when nobody holds a live reservation for the application. Expired reservations
    /// count as available even before the monitor removes them.
    pub async fn is_available_for_streaming(&self, app_id: &str) -> bool {
        let now = Instant::now();
        let state = self.inner.state.lock().await;
        state
            .sessions
            .get(&AppKey::new(app_id))
            .map_or(true, |session| session.reservation_expired_at(now))
    }

    /// Client holding a live reservation for the application.
    pub async fn client_streaming_app(&self, app_id: &str) -> Option<String> {
        let now = Instant::now();
        let state = self.inner.state.lock().await;
        state
            .sessions
            .get(&AppKey::new(app_id))
            .filter(|session| !session.reservation_expired_at(now))
            .map(|session| session.client_id.clone())
    }

    /// Snapshot of a session as stored, including one whose lease has expired but which
    /// has not been cleaned up yet.
    pub async fn session(&self, app_id: &str) -> Option<StreamSession> {
        let state = self.inner.state.lock().await;
        state.sessions.get(&AppKey::new(app_id)).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.inner.state.lock().await.sessions.len()
    }

    /// Applications with a live reservation.
    pub async fn active_app_ids(&self) -> Vec<String> {
        let now = Instant::now();
        let state = self.inner.state.lock().await;
        let mut ids: Vec<String> = state
            .sessions
            .values()
            .filter(|session| !session.reservation_expired_at(now))
            .map(|session| session.app_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn is_monitor_running(&self) -> bool {
        self.inner.state.lock().await.monitor.is_some()
    }

    /// Installed applications with running and streaming status.
    pub async fn get_installed_apps(&self, include_icons: bool) -> Result<Vec<AppInfo>> {
        let running: HashSet<String> = match self.inner.window_system.running_applications().await {
            Ok(apps) => apps
                .into_iter()
                .map(|app| AppKey::new(&app.bundle_id).into_string())
                .collect(),
            Err(e) => {
                warn!("Running application query failed, reporting none as running: {}", e);
                HashSet::new()
            }
        };

        let streaming: HashSet<String> = {
            let state = self.inner.state.lock().await;
            state.sessions.keys().map(|key| key.as_str().to_string()).collect()
        };

        self.inner.apps.get(include_icons, &running, &streaming).await
    }

    /// Drops cached application lists, e.g. after an install or uninstall.
    pub fn invalidate_app_cache(&self) {
        self.inner.apps.invalidate();
    }

    /// Stops the lifecycle monitor. Sessions are kept.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        Self::stop_monitor(&mut state);
    }

    fn live_session<'a>(
        state: &'a mut RegistryState,
        app_id: &str,
        now: Instant,
    ) -> Result<&'a mut StreamSession> {
        state
            .sessions
            .get_mut(&AppKey::new(app_id))
            .filter(|session| !session.reservation_expired_at(now))
            .ok_or_else(|| mirage_error!(session_not_found, "{}", app_id))
    }

    fn owned_session<'a>(
        state: &'a mut RegistryState,
        app_id: &str,
        client_id: &str,
        now: Instant,
    ) -> Result<&'a mut StreamSession> {
        let session = Self::live_session(state, app_id, now)?;
        if session.client_id != client_id {
            return Err(MirageError::NotOwner {
                app: app_id.to_string(),
                client: client_id.to_string(),
            });
        }
        Ok(session)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::window_system::SimulatedWindowSystem;

    pub(crate) struct StaticCatalog(pub Vec<AppInfo>);

    #[async_trait::async_trait]
    impl AppCatalog for StaticCatalog {
        async fn scan_installed_apps(
            &self,
            _include_icons: bool,
            running: &HashSet<String>,
            streaming: &HashSet<String>,
        ) -> Result<Vec<AppInfo>> {
            Ok(self.update_status(self.0.clone(), running, streaming))
        }
    }

    pub(crate) fn registry_with(
        config: &Config,
    ) -> (
        SessionRegistry,
        mpsc::UnboundedReceiver<LifecycleEvent>,
        Arc<SimulatedWindowSystem>,
    ) {
        let ws = Arc::new(SimulatedWindowSystem::new());
        let catalog = Arc::new(StaticCatalog(vec![
            AppInfo::new("org.editor", "Editor"),
            AppInfo::new("org.mail", "Mail"),
        ]));
        let (registry, events) = SessionRegistry::new(config, ws.clone(), catalog);
        (registry, events, ws)
    }

    fn slow_monitor_config() -> Config {
        let mut config = Config::default();
        config.monitor.tick_interval_ms = 3_600_000;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn reservation_is_exclusive() {
        let (registry, _events, _ws) = registry_with(&Config::default());

        registry.reserve("org.editor", "Editor", "alice").await.unwrap();
        let err = registry.reserve("ORG.EDITOR", "Editor", "bob").await.unwrap_err();
        assert!(matches!(err, MirageError::AlreadyReserved { ref client, .. } if client == "alice"));

        assert!(!registry.is_available_for_streaming("org.Editor").await);
        assert_eq!(registry.client_streaming_app("org.editor").await.as_deref(), Some("alice"));
        assert!(registry.is_available_for_streaming("org.mail").await);
        assert_eq!(registry.client_streaming_app("org.mail").await, None);
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn same_client_renews_lease() {
        let (registry, _events, _ws) = registry_with(&slow_monitor_config());

        let first = registry.reserve("org.editor", "Editor", "alice").await.unwrap();
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(30)).await;
        let second = registry.reserve("org.editor", "Editor", "alice").await.unwrap();
        assert!(second.reservation_expiry > first.reservation_expiry);

        tokio::time::advance(Duration::from_secs(45)).await;
        let renewed = registry.renew_reservation("org.editor", "alice").await.unwrap();
        assert_eq!(renewed, Instant::now() + Duration::from_secs(60));
        assert!(!registry.is_available_for_streaming("org.editor").await);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_reservation_is_available_before_cleanup() {
        let (registry, _events, _ws) = registry_with(&slow_monitor_config());

        registry.reserve("org.editor", "Editor", "alice").await.unwrap();
        // let the monitor take its immediate first tick before the clock jumps
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(registry.is_available_for_streaming("org.editor").await);
        assert_eq!(registry.client_streaming_app("org.editor").await, None);
        assert!(registry.active_app_ids().await.is_empty());
        // still physically present until the next monitor tick
        assert_eq!(registry.session_count().await, 1);

        let taken = registry.reserve("org.editor", "Editor", "bob").await.unwrap();
        assert_eq!(taken.client_id, "bob");
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn only_owner_may_release() {
        let (registry, _events, _ws) = registry_with(&Config::default());
        registry.reserve("org.editor", "Editor", "alice").await.unwrap();

        assert!(matches!(
            registry.release("org.editor", "bob").await,
            Err(MirageError::NotOwner { .. })
        ));
        assert!(matches!(
            registry.release("org.mail", "alice").await,
            Err(MirageError::SessionNotFound(_))
        ));

        let released = registry.release("org.editor", "alice").await.unwrap();
        assert_eq!(released.state, SessionState::Released);
        assert!(registry.is_available_for_streaming("org.editor").await);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_follows_session_set() {
        let (registry, _events, _ws) = registry_with(&Config::default());
        assert!(!registry.is_monitor_running().await);

        registry.reserve("org.editor", "Editor", "alice").await.unwrap();
        registry.reserve("org.mail", "Mail", "alice").await.unwrap();
        assert!(registry.is_monitor_running().await);

        registry.release("org.editor", "alice").await.unwrap();
        assert!(registry.is_monitor_running().await);

        registry.release("org.mail", "alice").await.unwrap();
        assert!(!registry.is_monitor_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn attach_and_detach_windows() {
        let (registry, _events, _ws) = registry_with(&Config::default());
        registry.reserve("org.editor", "Editor", "alice").await.unwrap();

        registry.attach_window("org.editor", WindowId(4), "main.rs").await.unwrap();
        let session = registry.session("org.editor").await.unwrap();
        assert_eq!(session.state, SessionState::Streaming);
        assert!(session.has_active_windows());
        assert!(session.known_window_ids.contains(&WindowId(4)));

        assert!(registry.detach_window("org.editor", WindowId(4)).await.unwrap());
        assert!(!registry.detach_window("org.editor", WindowId(4)).await.unwrap());
        let session = registry.session("org.editor").await.unwrap();
        assert!(!session.has_active_windows());
        assert!(session.windows_in_cooldown.contains_key(&WindowId(4)));

        assert!(registry.attach_window("org.mail", WindowId(5), "inbox").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn installed_apps_report_status() {
        let (registry, _events, ws) = registry_with(&Config::default());
        ws.launch(&crate::events::AppIdentity::new(10, "org.mail", "Mail"));
        registry.reserve("Org.Editor", "Editor", "alice").await.unwrap();

        let apps = registry.get_installed_apps(false).await.unwrap();
        let editor = apps.iter().find(|app| app.bundle_id == "org.editor").unwrap();
        let mail = apps.iter().find(|app| app.bundle_id == "org.mail").unwrap();

        assert!(editor.is_streaming && !editor.is_running);
        assert!(mail.is_running && !mail.is_streaming);

        registry.invalidate_app_cache();
        assert_eq!(registry.get_installed_apps(true).await.unwrap().len(), 2);
    }
}
