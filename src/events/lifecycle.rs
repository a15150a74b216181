use super::window::WindowId;
use std::fmt;

/// Notification emitted by the window lifecycle monitor for one streaming application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    NewWindow { app_id: String, window_id: WindowId },
    WindowClosed { app_id: String, window_id: WindowId },
    AppTerminated { app_id: String },
    CooldownExpired { app_id: String, window_id: WindowId },
    ReservationExpired { app_id: String },
}

impl LifecycleEvent {
    pub fn app_id(&self) -> &str {
        match self {
            LifecycleEvent::NewWindow { app_id, .. }
            | LifecycleEvent::WindowClosed { app_id, .. }
            | LifecycleEvent::AppTerminated { app_id }
            | LifecycleEvent::CooldownExpired { app_id, .. }
            | LifecycleEvent::ReservationExpired { app_id } => app_id,
        }
    }

    pub fn window_id(&self) -> Option<WindowId> {
        match self {
            LifecycleEvent::NewWindow { window_id, .. }
            | LifecycleEvent::WindowClosed { window_id, .. }
            | LifecycleEvent::CooldownExpired { window_id, .. } => Some(*window_id),
            LifecycleEvent::AppTerminated { .. } | LifecycleEvent::ReservationExpired { .. } => None,
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::NewWindow { app_id, window_id } => {
                write!(f, "new window {} for {}", window_id, app_id)
            }
            LifecycleEvent::WindowClosed { app_id, window_id } => {
                write!(f, "window {} closed for {}", window_id, app_id)
            }
            LifecycleEvent::AppTerminated { app_id } => write!(f, "{} terminated", app_id),
            LifecycleEvent::CooldownExpired { app_id, window_id } => {
                write!(f, "cooldown expired for window {} of {}", window_id, app_id)
            }
            LifecycleEvent::ReservationExpired { app_id } => {
                write!(f, "reservation for {} expired", app_id)
            }
        }
    }
}
