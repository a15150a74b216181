pub mod frame;
pub mod lifecycle;
pub mod window;

pub use frame::{CapturedFrame, SendHandle};
pub use lifecycle::LifecycleEvent;
pub use window::{AppIdentity, AppKey, RunningApp, WindowFrame, WindowId, WindowInfo, WindowMetadata};
