pub mod activity_monitor;
pub mod app_catalog;
pub mod frame_inbox;
mod lifecycle_monitor;
pub mod session;
pub mod session_registry;
pub mod tab_groups;
pub mod video_stream;
pub mod window_system;

pub use activity_monitor::{ActivityCallback, WindowActivityMonitor};
pub use app_catalog::{AppCatalog, AppInfo, DesktopEntryCatalog, InstalledAppsCache};
pub use frame_inbox::FrameInbox;
pub use session::{SessionState, StreamSession};
pub use session_registry::SessionRegistry;
pub use tab_groups::{collapse_tab_groups, enumerate_windows};
pub use video_stream::{FrameSink, StreamMetrics, VideoStream};
pub use window_system::{create_window_system, WindowSystem};
