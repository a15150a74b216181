use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound for both capture frame rates.
pub const MAX_FPS: u32 = 240;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub monitor: MonitorConfig,
    pub activity: ActivityConfig,
    pub session: SessionConfig,
    pub apps: AppsConfig,
    pub capture: CaptureConfig,
    pub window_system: WindowSystemConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub filter: String,
}

/// Window lifecycle reconciliation loop.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    pub tick_interval_ms: u64,
    pub min_window_width: f64,
    pub min_window_height: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActivityConfig {
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    pub reservation_ttl_secs: u64,
    pub window_cooldown_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppsConfig {
    pub cache_ttl_secs: u64,
    pub icon_cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    pub inbox_capacity: usize,
    pub tab_frame_tolerance: f64,
    pub active_fps: u32,
    pub inactive_fps: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WindowSystemConfig {
    pub backend: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "compact".to_string(),
                filter: "mirage_host=info".to_string(),
            },
            monitor: MonitorConfig {
                tick_interval_ms: 500,
                min_window_width: 200.0,
                min_window_height: 150.0,
            },
            activity: ActivityConfig {
                poll_interval_ms: 500,
            },
            session: SessionConfig {
                reservation_ttl_secs: 60,
                window_cooldown_ms: 3000,
            },
            apps: AppsConfig {
                cache_ttl_secs: 30,
                icon_cache_ttl_secs: 300,
            },
            capture: CaptureConfig {
                inbox_capacity: 3,
                tab_frame_tolerance: 5.0,
                active_fps: 60,
                inactive_fps: 10,
            },
            window_system: WindowSystemConfig {
                backend: "wmctrl".to_string(),
            },
        }
    }
}

impl Config {
    /// Defaults, overlaid by the TOML file (if present) and `MIRAGE_` environment variables.
    /// Nested keys use a double underscore: `MIRAGE_MONITOR__TICK_INTERVAL_MS=250`.
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("MIRAGE_").split("__"));

        let config: Config = figment
            .extract()
            .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}", self.logging.level),
        }

        match self.logging.format.as_str() {
            "compact" | "full" => {}
            _ => anyhow::bail!("Invalid log format: {}", self.logging.format),
        }

        if self.monitor.tick_interval_ms < 50 {
            anyhow::bail!("monitor.tick_interval_ms must be at least 50");
        }

        if self.monitor.min_window_width < 0.0 || self.monitor.min_window_height < 0.0 {
            anyhow::bail!("monitor minimum window size cannot be negative");
        }

        if self.activity.poll_interval_ms < 50 {
            anyhow::bail!("activity.poll_interval_ms must be at least 50");
        }

        if self.session.reservation_ttl_secs == 0 {
            anyhow::bail!("session.reservation_ttl_secs must be greater than 0");
        }

        if self.capture.inbox_capacity == 0 {
            anyhow::bail!("capture.inbox_capacity must be at least 1");
        }

        if !(self.capture.tab_frame_tolerance >= 0.0) {
            anyhow::bail!(
                "capture.tab_frame_tolerance must be non-negative: {}",
                self.capture.tab_frame_tolerance
            );
        }

        if self.capture.active_fps == 0 || self.capture.inactive_fps == 0 {
            anyhow::bail!("capture frame rates must be at least 1");
        }

        if self.capture.active_fps > MAX_FPS {
            anyhow::bail!(
                "capture.active_fps ({}) cannot exceed {}",
                self.capture.active_fps,
                MAX_FPS
            );
        }

        if self.capture.inactive_fps > self.capture.active_fps {
            anyhow::bail!(
                "capture.inactive_fps ({}) cannot exceed capture.active_fps ({})",
                self.capture.inactive_fps,
                self.capture.active_fps
            );
        }

        match self.window_system.backend.as_str() {
            "wmctrl" | "simulated" => {}
            _ => anyhow::bail!("Unknown window system backend: {}", self.window_system.backend),
        }

        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.monitor.tick_interval_ms)
    }

    pub fn activity_poll_interval(&self) -> Duration {
        Duration::from_millis(self.activity.poll_interval_ms)
    }

    pub fn reservation_ttl(&self) -> Duration {
        Duration::from_secs(self.session.reservation_ttl_secs)
    }

    pub fn window_cooldown(&self) -> Duration {
        Duration::from_millis(self.session.window_cooldown_ms)
    }

    /// Interval between frames at the active capture rate.
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs(1) / self.capture.active_fps.clamp(1, MAX_FPS)
    }

    pub fn app_cache_ttl(&self, include_icons: bool) -> Duration {
        if include_icons {
            Duration::from_secs(self.apps.icon_cache_ttl_secs)
        } else {
            Duration::from_secs(self.apps.cache_ttl_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let mut config = Config::default();
        config.capture.inbox_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_frame_rates() {
        let mut config = Config::default();
        config.capture.active_fps = 15;
        config.capture.inactive_fps = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_frame_rate_cap() {
        let mut config = Config::default();
        config.capture.active_fps = MAX_FPS;
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_period(), Duration::from_nanos(4_166_666));

        config.capture.active_fps = 2000;
        assert!(config.validate().is_err());
        assert!(config.frame_period() > Duration::ZERO);

        config.capture.active_fps = 60;
        assert_eq!(config.frame_period(), Duration::from_nanos(16_666_666));
    }

    #[test]
    fn test_rejects_unknown_backend() {
        let mut config = Config::default();
        config.window_system.backend = "quartz".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load("/nonexistent/mirage.toml").unwrap();
        assert_eq!(config.monitor.tick_interval_ms, 500);
        assert_eq!(config.capture.inbox_capacity, 3);
        assert_eq!(config.tick_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_cache_ttl_per_variant() {
        let config = Config::default();
        assert_eq!(config.app_cache_ttl(false), Duration::from_secs(30));
        assert_eq!(config.app_cache_ttl(true), Duration::from_secs(300));
    }
}
