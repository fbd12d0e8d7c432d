//! Transient user-facing notifications.
//!
//! [`NotificationBus`] is a small fan-out sink. Every subscriber receives each
//! [`BusEvent`] exactly once, in publish order. A notification stays in
//! [`NotificationBus::active`] until its duration elapses or it is dismissed.
//!
//! Expiry runs on Tokio time, so tests driven by a paused clock see
//! notifications expire on `tokio::time::advance`.
//!
//! ```rust,ignore
//! use freddie::notify::{NotificationBus, Severity};
//!
//! let bus = NotificationBus::new();
//! let mut rx = bus.subscribe();
//! bus.publish("Download started", Severity::Info, None);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

/// Lifetime of a notification published without an explicit duration.
pub const DEFAULT_DURATION_MS: u64 = 5_000;

/// Identifier assigned to each published notification. Monotonic per bus.
pub type NotificationId = u64;

/// Notification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Lowercase label used in log lines and CLI output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    pub message: String,
    pub severity: Severity,
    pub duration: Duration,
    pub expires_at: Instant,
}

/// Event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// A new notification was published.
    Published(Notification),
    /// The notification's duration elapsed.
    Expired(NotificationId),
    /// The notification was dismissed before it expired.
    Dismissed(NotificationId),
}

#[derive(Debug, Default)]
struct BusState {
    next_id: NotificationId,
    active: Vec<Notification>,
    subscribers: Vec<mpsc::UnboundedSender<BusEvent>>,
}

impl BusState {
    fn broadcast(&mut self, event: &BusEvent) {
        // Closed receivers are pruned here.
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn expire_due(&mut self, now: Instant) {
        let mut expired = Vec::new();
        self.active.retain(|n| {
            if n.expires_at <= now {
                expired.push(n.id);
                false
            } else {
                true
            }
        });
        for id in expired {
            self.broadcast(&BusEvent::Expired(id));
        }
    }

    fn expire(&mut self, id: NotificationId) {
        let before = self.active.len();
        self.active.retain(|n| n.id != id);
        if self.active.len() != before {
            self.broadcast(&BusEvent::Expired(id));
        }
    }
}

/// Fan-out sink for transient notifications. Cheap to clone.
#[derive(Debug, Clone)]
pub struct NotificationBus {
    state: Arc<Mutex<BusState>>,
    default_duration: Duration,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBus {
    /// Create a bus using [`DEFAULT_DURATION_MS`].
    pub fn new() -> Self {
        Self::with_default_duration(Duration::from_millis(DEFAULT_DURATION_MS))
    }

    /// Create a bus with a custom default lifetime.
    pub fn with_default_duration(default_duration: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                next_id: 1,
                ..BusState::default()
            })),
            default_duration,
        }
    }

    /// Lifetime applied when `publish` is called without a duration.
    pub fn default_duration(&self) -> Duration {
        self.default_duration
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a subscriber. It sees every event published after this call.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<BusEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }

    /// Publish a notification. `None` uses the bus default duration.
    pub fn publish(
        &self,
        message: impl Into<String>,
        severity: Severity,
        duration: Option<Duration>,
    ) -> NotificationId {
        let duration = duration.unwrap_or(self.default_duration);
        let now = Instant::now();
        let notification = {
            let mut state = self.lock();
            state.expire_due(now);

            let id = state.next_id;
            state.next_id = state.next_id.saturating_add(1);
            let notification = Notification {
                id,
                message: message.into(),
                severity,
                duration,
                expires_at: now + duration,
            };
            state.active.push(notification.clone());
            state.broadcast(&BusEvent::Published(notification.clone()));
            notification
        };

        debug!(
            id = notification.id,
            severity = %severity,
            message = %notification.message,
            "notification published"
        );
        self.schedule_expiry(notification.id, notification.expires_at);
        notification.id
    }

    /// Publish with [`Severity::Success`] and the default duration.
    pub fn success(&self, message: impl Into<String>) -> NotificationId {
        self.publish(message, Severity::Success, None)
    }

    /// Publish with [`Severity::Info`] and the default duration.
    pub fn info(&self, message: impl Into<String>) -> NotificationId {
        self.publish(message, Severity::Info, None)
    }

    /// Publish with [`Severity::Warning`] and the default duration.
    pub fn warning(&self, message: impl Into<String>) -> NotificationId {
        self.publish(message, Severity::Warning, None)
    }

    /// Publish with [`Severity::Error`] and the default duration.
    pub fn error(&self, message: impl Into<String>) -> NotificationId {
        self.publish(message, Severity::Error, None)
    }

    /// Dismiss an active notification. Returns `false` if it already expired,
    /// was dismissed before, or never existed.
    pub fn dismiss(&self, id: NotificationId) -> bool {
        let mut state = self.lock();
        state.expire_due(Instant::now());
        let before = state.active.len();
        state.active.retain(|n| n.id != id);
        if state.active.len() == before {
            return false;
        }
        state.broadcast(&BusEvent::Dismissed(id));
        true
    }

    /// Unexpired, undismissed notifications in publish order.
    pub fn active(&self) -> Vec<Notification> {
        let mut state = self.lock();
        state.expire_due(Instant::now());
        state.active.clone()
    }

    fn schedule_expiry(&self, id: NotificationId, deadline: Instant) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // No runtime: `active()` filters lazily instead.
            return;
        };
        let weak: Weak<Mutex<BusState>> = Arc::downgrade(&self.state);
        handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(state) = weak.upgrade() {
                let mut state = state
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                state.expire(id);
            }
        });
    }
}
