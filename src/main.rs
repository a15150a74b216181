use anyhow::Result;
use clap::Parser;
use dashmap::DashMap;
use mirage_host::config::{Config, LoggingConfig};
use mirage_host::events::{AppKey, CapturedFrame, LifecycleEvent, SendHandle, WindowId};
use mirage_host::services::window_system::SimulatedWindowSystem;
use mirage_host::services::{
    create_window_system, enumerate_windows, ActivityCallback, DesktopEntryCatalog, FrameSink,
    SessionRegistry, VideoStream, WindowActivityMonitor, WindowSystem,
};
use mirage_host::{trace_if_enabled, MirageError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

/// Application streamed by default in dry-run mode; matches the scripted terminal.
const DRY_RUN_APP: &str = "org.mirage.terminal";

#[derive(Parser, Debug)]
#[command(name = "mirage-host")]
#[command(about = "Host daemon that arbitrates per-application window streaming")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "mirage.toml")]
    config: String,

    /// Use the simulated window system with a scripted scenario
    #[arg(long)]
    dry_run: bool,

    /// Overrides the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Reserve and stream this application for the local client
    #[arg(long)]
    stream: Option<String>,

    /// Client identifier used for reservations
    #[arg(long, default_value = "local")]
    client: String,
}

/// Capture buffers cross from the capture callback thread into the drain task.
type Frame = SendHandle<Vec<u8>>;

/// Frame sink that only logs; stands in for a real encoder.
#[derive(Default)]
struct LoggingSink {
    frames: AtomicU64,
}

#[async_trait::async_trait]
impl FrameSink<Frame> for LoggingSink {
    async fn encode(&self, frame: CapturedFrame<Frame>) -> mirage_host::Result<()> {
        let n = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        trace_if_enabled!("Encoded frame #{} ({} bytes)", n, frame.buffer.len());
        Ok(())
    }

    async fn update_frame_rate(&self, fps: u32) -> mirage_host::Result<()> {
        debug!("Encoder frame rate set to {}", fps);
        Ok(())
    }
}

struct ActiveStream {
    app_key: AppKey,
    stream: VideoStream<Frame>,
}

/// Glue between lifecycle notifications, per-window streams and the activity monitor.
#[derive(Clone)]
struct Host {
    config: Arc<Config>,
    registry: SessionRegistry,
    window_system: Arc<dyn WindowSystem>,
    activity: WindowActivityMonitor,
    streams: Arc<DashMap<WindowId, ActiveStream>>,
    sink: Arc<LoggingSink>,
    client_id: String,
}

impl Host {
    async fn handle_event(&self, event: LifecycleEvent) {
        info!("Lifecycle: {}", event);
        match event {
            LifecycleEvent::NewWindow { app_id, window_id } => {
                self.start_window(&app_id, window_id).await;
            }
            LifecycleEvent::WindowClosed { window_id, .. } => {
                self.stop_window(window_id);
            }
            LifecycleEvent::AppTerminated { app_id } => {
                self.stop_app_windows(&app_id);
                match self.registry.release(&app_id, &self.client_id).await {
                    Ok(session) => info!("Session ended: {}", session),
                    Err(e) => warn!("Failed to release {}: {}", app_id, e),
                }
            }
            LifecycleEvent::ReservationExpired { app_id } => {
                self.stop_app_windows(&app_id);
            }
            LifecycleEvent::CooldownExpired { .. } => {}
        }
    }

    async fn window_title(&self, window_id: WindowId) -> String {
        match self.window_system.snapshot().await {
            Ok(windows) => windows
                .into_iter()
                .find(|window| window.id == window_id)
                .map(|window| window.title)
                .unwrap_or_default(),
            Err(e) => {
                debug!("Title lookup for {} failed: {}", window_id, e);
                String::new()
            }
        }
    }

    async fn start_window(&self, app_id: &str, window_id: WindowId) {
        let title = self.window_title(window_id).await;
        if let Err(e) = self.registry.attach_window(app_id, window_id, &title).await {
            warn!("Cannot attach window {}: {}", window_id, e);
            return;
        }

        let capture = &self.config.capture;
        let stream = VideoStream::new(
            window_id,
            self.sink.clone(),
            capture.inbox_capacity,
            capture.active_fps,
            capture.inactive_fps,
        );
        self.streams.insert(
            window_id,
            ActiveStream {
                app_key: AppKey::new(app_id),
                stream,
            },
        );
        info!("Streaming window {} \"{}\" of {}", window_id, title, app_id);

        if self.activity.is_running() {
            self.activity.add_window(window_id);
        } else {
            self.activity.start(&[window_id], self.activity_callback());
        }
    }

    fn activity_callback(&self) -> ActivityCallback {
        let streams = Arc::clone(&self.streams);
        Arc::new(move |window_id, active| {
            let Some(stream) = streams.get(&window_id).map(|entry| entry.stream.clone()) else {
                return;
            };
            tokio::spawn(async move {
                let _ = stream.set_active(active).await;
            });
        })
    }

    fn stop_window(&self, window_id: WindowId) {
        if let Some((_, active)) = self.streams.remove(&window_id) {
            active.stream.stop();
            let metrics = active.stream.take_metrics();
            info!("Window {} stream closed ({:?})", window_id, metrics);
            if active.stream.is_draining() {
                debug!("Window {} still finishing an encode", window_id);
            }
        }
        self.activity.remove_window(window_id);
        if self.streams.is_empty() {
            self.activity.stop();
        }
    }

    fn stop_app_windows(&self, app_id: &str) {
        let key = AppKey::new(app_id);
        let windows: Vec<WindowId> = self
            .streams
            .iter()
            .filter(|entry| entry.app_key == key)
            .map(|entry| *entry.key())
            .collect();
        for window_id in windows {
            self.stop_window(window_id);
        }
    }

    /// Reserves the application and keeps the lease alive. A session lost to termination or
    /// expiry is reserved again on the next heartbeat.
    async fn hold_reservation(self, app_id: String) {
        let mut heartbeat = interval(self.config.reservation_ttl() / 3);
        loop {
            heartbeat.tick().await;
            match self.registry.renew_reservation(&app_id, &self.client_id).await {
                Ok(_) => {}
                Err(MirageError::SessionNotFound(_)) => {
                    if let Err(e) = self.reserve(&app_id).await {
                        warn!("Cannot reserve {}: {}", app_id, e);
                    }
                }
                Err(e) => warn!("Lease renewal for {} failed: {}", app_id, e),
            }
        }
    }

    async fn reserve(&self, app_id: &str) -> mirage_host::Result<()> {
        let app_name = match self.registry.get_installed_apps(false).await {
            Ok(apps) => {
                let key = AppKey::new(app_id);
                apps.into_iter()
                    .find(|app| AppKey::new(&app.bundle_id) == key)
                    .map(|app| app.name)
            }
            Err(e) => {
                warn!("Installed app lookup failed: {}", e);
                None
            }
        };
        let app_name = app_name.unwrap_or_else(|| app_id.to_string());

        let session = self.registry.reserve(app_id, &app_name, &self.client_id).await?;
        self.registry.begin_streaming(app_id, &self.client_id).await?;
        info!("Reserved {}", session);

        match enumerate_windows(self.window_system.as_ref(), &self.config).await {
            Ok(windows) => {
                for window in windows.iter().filter(|window| window.belongs_to(app_id)) {
                    info!("  {} ({} tabs)", window, window.tab_count);
                }
            }
            Err(e) => debug!("Window enumeration failed: {}", e),
        }
        Ok(())
    }

    /// Synthetic capture for dry runs: pushes a blank frame to every stream at the active rate.
    async fn produce_frames(self) {
        let mut ticker = interval(self.config.frame_period());
        loop {
            ticker.tick().await;
            for entry in self.streams.iter() {
                // SAFETY: a Vec<u8> is Send; the handle only mirrors the OS buffer path.
                let buffer = unsafe { SendHandle::new(vec![0u8; 64]) };
                entry.stream.push(CapturedFrame::new(buffer));
            }
        }
    }

    async fn report_metrics(self) {
        let mut ticker = interval(Duration::from_secs(5));
        loop {
            ticker.tick().await;
            for entry in self.streams.iter() {
                let metrics = entry.stream.take_metrics();
                if metrics.enqueued > 0 {
                    info!(
                        "Window {}: {} frames in, {} encoded, {} dropped",
                        entry.key(),
                        metrics.enqueued,
                        metrics.encoded,
                        metrics.dropped
                    );
                }
            }
        }
    }

    async fn shutdown(&self) {
        self.activity.stop();
        let windows: Vec<WindowId> = self.streams.iter().map(|entry| *entry.key()).collect();
        for window_id in windows {
            self.stop_window(window_id);
        }

        for app_id in self.registry.active_app_ids().await {
            if let Err(e) = self.registry.release(&app_id, &self.client_id).await {
                debug!("Not releasing {}: {}", app_id, e);
            }
        }
        self.registry.shutdown().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Arc::new(Config::load(&args.config)?);
    init_tracing(&config.logging, args.log_level.as_deref())?;

    info!("Starting mirage-host v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {}", args.config);

    let window_system: Arc<dyn WindowSystem> = if args.dry_run {
        warn!("Dry-run mode: using the simulated window system");
        let simulated = Arc::new(SimulatedWindowSystem::new());
        tokio::spawn(simulated.clone().run_script(Duration::from_secs(2)));
        simulated
    } else {
        create_window_system(&config, false)?
    };

    let catalog = Arc::new(DesktopEntryCatalog::new());
    let (registry, mut events) = SessionRegistry::new(&config, window_system.clone(), catalog);
    let activity = WindowActivityMonitor::new(window_system.clone(), config.activity_poll_interval());

    let host = Host {
        config: config.clone(),
        registry,
        window_system,
        activity,
        streams: Arc::new(DashMap::new()),
        sink: Arc::new(LoggingSink::default()),
        client_id: args.client.clone(),
    };

    match host.registry.get_installed_apps(false).await {
        Ok(apps) => info!("Found {} installed applications", apps.len()),
        Err(e) => warn!("Installed application scan failed: {}", e),
    }

    let event_host = host.clone();
    let event_handle = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            event_host.handle_event(event).await;
        }
    });

    let mut handles = vec![tokio::spawn(host.clone().report_metrics())];
    if args.dry_run {
        handles.push(tokio::spawn(host.clone().produce_frames()));
    }

    let stream_app = args
        .stream
        .clone()
        .or_else(|| args.dry_run.then(|| DRY_RUN_APP.to_string()));
    if let Some(app_id) = stream_app {
        handles.push(tokio::spawn(host.clone().hold_reservation(app_id)));
    }

    info!("All services started");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal (Ctrl+C)");
        }
        Err(err) => {
            error!("Failed to wait for shutdown signal: {}", err);
        }
    }

    info!("Shutting down...");

    for handle in &handles {
        handle.abort();
    }
    host.shutdown().await;
    event_handle.abort();

    let shutdown_timeout = Duration::from_secs(5);
    let shutdown_result = tokio::time::timeout(shutdown_timeout, async {
        for handle in handles {
            let _ = handle.await;
        }
        let _ = event_handle.await;
    })
    .await;

    match shutdown_result {
        Ok(_) => info!("All services stopped"),
        Err(_) => warn!("Timed out waiting for services to stop"),
    }

    info!("mirage-host stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig, level_override: Option<&str>) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let directives = match level_override {
        Some(level) => level.to_string(),
        None => format!("{},{}", logging.level, logging.filter),
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(directives))?;

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "full" {
        registry.with(fmt::layer()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }

    Ok(())
}
