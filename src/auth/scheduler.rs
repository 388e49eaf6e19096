// Proactive refresh timer
// A single cancellable one-shot task; arming a new one cancels the previous

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default lead time before expiry at which the session is refreshed
pub const DEFAULT_REFRESH_LEAD: Duration = Duration::from_secs(300);

/// Time to wait before refreshing: `expires_at - now - lead`, floored at zero
pub fn refresh_delay(expires_at: DateTime<Utc>, now: DateTime<Utc>, lead: Duration) -> Duration {
    let remaining = expires_at - now;
    let lead = chrono::Duration::from_std(lead).unwrap_or_else(|_| chrono::Duration::zero());
    (remaining - lead).to_std().unwrap_or(Duration::ZERO)
}

/// Handle to the currently armed refresh task
#[derive(Default)]
pub struct RefreshTimer {
    handle: Option<JoinHandle<()>>,
}

impl RefreshTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `handle`, aborting whatever was armed before
    pub fn replace(&mut self, handle: JoinHandle<()>) {
        if let Some(previous) = self.handle.replace(handle) {
            previous.abort();
        }
    }

    /// Abort the armed task, if any
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::debug!("Cancelled scheduled token refresh");
        }
    }

    /// True while a task is armed and has not finished
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
