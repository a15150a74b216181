//! Window system access: responsibility and boundaries
//!
//! This module only answers questions about windows and processes (snapshots, metadata,
//! frontmost process, running applications). It MUST NOT keep session state or decide what
//! is streamed; that belongs to the session registry and its lifecycle monitor.

mod simulated;
mod wmctrl;
mod r#trait;

pub use self::r#trait::{create_window_system, WindowSystem};
pub use self::simulated::SimulatedWindowSystem;
pub use self::wmctrl::WmctrlWindowSystem;
