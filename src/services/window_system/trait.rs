use crate::config::Config;
use crate::error::Result;
use crate::events::{RunningApp, WindowId, WindowInfo, WindowMetadata};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Queries against the platform window system.
///
/// Every call is a point-in-time read; implementations keep no state that the caller relies on.
#[async_trait::async_trait]
pub trait WindowSystem: Send + Sync {
    /// Full snapshot of on-screen and off-screen windows.
    async fn snapshot(&self) -> Result<Vec<WindowInfo>>;

    /// Alpha and on-screen flag for the given windows. Unknown ids are omitted.
    async fn window_metadata(&self, ids: &[WindowId]) -> Result<HashMap<WindowId, WindowMetadata>>;

    /// Process id of the frontmost application, if any.
    async fn frontmost_process(&self) -> Result<Option<u32>>;

    /// Owning process of each given window. Windows that no longer exist are omitted.
    async fn window_owners(&self, ids: &[WindowId]) -> Result<HashMap<WindowId, u32>>;

    /// Processes that currently present as applications.
    async fn running_applications(&self) -> Result<Vec<RunningApp>>;
}

/// Factory function to create the window system backend selected by config or the dry_run flag
pub fn create_window_system(config: &Config, dry_run: bool) -> Result<Arc<dyn WindowSystem>> {
    if dry_run || config.window_system.backend == "simulated" {
        info!("Using simulated window system");
        Ok(Arc::new(super::simulated::SimulatedWindowSystem::new()))
    } else {
        info!("Using wmctrl window system");
        Ok(Arc::new(super::wmctrl::WmctrlWindowSystem::new()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_backend_selected_by_config_or_dry_run() {
        let mut config = Config::default();
        config.window_system.backend = "simulated".to_string();
        let ws = create_window_system(&config, false).unwrap();
        assert!(ws.snapshot().await.unwrap().is_empty());

        let ws = create_window_system(&Config::default(), true).unwrap();
        assert_eq!(ws.frontmost_process().await.unwrap(), None);
    }
}
