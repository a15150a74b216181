use crate::events::WindowId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tokio::time::Instant;

/// Lifecycle phase of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Reserved for a client; no window is being delivered yet.
    Reserved,
    /// At least one window has been requested; the lifecycle monitor tracks its windows.
    Streaming,
    /// Released by the client. Only seen on the value returned from a release.
    Released,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowStream {
    pub window_id: WindowId,
    pub title: String,
    pub started_at: Instant,
}

/// Exclusive streaming reservation of one application by one client.
#[derive(Debug, Clone)]
pub struct StreamSession {
    pub client_id: String,
    pub app_id: String,
    pub app_name: String,
    pub state: SessionState,
    pub reservation_expiry: Instant,
    pub window_streams: HashMap<WindowId, WindowStream>,
    /// Every window ever seen on-screen for this session. Only grows.
    pub known_window_ids: HashSet<WindowId>,
    pub windows_in_cooldown: HashMap<WindowId, Instant>,
}

impl StreamSession {
    pub fn new(
        client_id: impl Into<String>,
        app_id: impl Into<String>,
        app_name: impl Into<String>,
        reservation_expiry: Instant,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            app_id: app_id.into(),
            app_name: app_name.into(),
            state: SessionState::Reserved,
            reservation_expiry,
            window_streams: HashMap::new(),
            known_window_ids: HashSet::new(),
            windows_in_cooldown: HashMap::new(),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.state == SessionState::Streaming
    }

    pub fn reservation_expired_at(&self, now: Instant) -> bool {
        now > self.reservation_expiry
    }

    pub fn has_active_windows(&self) -> bool {
        !self.window_streams.is_empty()
    }

    /// Windows whose cooldown deadline has passed, in id order.
    pub fn expired_cooldowns_at(&self, now: Instant) -> Vec<WindowId> {
        let mut expired: Vec<WindowId> = self
            .windows_in_cooldown
            .iter()
            .filter(|(_, deadline)| now > **deadline)
            .map(|(window_id, _)| *window_id)
            .collect();
        expired.sort_unstable();
        expired
    }

    /// Moves a window from active streaming into cooldown. Returns false if it was not
    /// streaming.
    pub fn end_window_stream(&mut self, window_id: WindowId, cooldown_until: Instant) -> bool {
        if self.window_streams.remove(&window_id).is_none() {
            return false;
        }
        self.windows_in_cooldown.insert(window_id, cooldown_until);
        true
    }
}

impl fmt::Display for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) for client {} [{:?}, {} windows]",
            self.app_name,
            self.app_id,
            self.client_id,
            self.state,
            self.window_streams.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn reservation_expires_strictly_after_deadline() {
        let now = Instant::now();
        let session = StreamSession::new("client", "org.app", "App", now + Duration::from_secs(1));

        assert!(!session.reservation_expired_at(now + Duration::from_secs(1)));
        assert!(session.reservation_expired_at(now + Duration::from_millis(1001)));
    }

    #[tokio::test(start_paused = true)]
    async fn ending_a_stream_starts_cooldown() {
        let now = Instant::now();
        let mut session = StreamSession::new("client", "org.app", "App", now);
        session.window_streams.insert(
            WindowId(3),
            WindowStream {
                window_id: WindowId(3),
                title: "main".to_string(),
                started_at: now,
            },
        );
        assert!(session.has_active_windows());

        assert!(session.end_window_stream(WindowId(3), now + Duration::from_secs(2)));
        assert!(!session.end_window_stream(WindowId(3), now));
        assert!(!session.has_active_windows());

        assert!(session.expired_cooldowns_at(now + Duration::from_secs(1)).is_empty());
        assert_eq!(
            session.expired_cooldowns_at(now + Duration::from_secs(3)),
            vec![WindowId(3)]
        );
    }
}
