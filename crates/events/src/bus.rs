//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the hub for [`AuthEvent`]s: the session controller
//! publishes, and any number of listeners (log, UI, tests) subscribe.
//! It is designed to be shared via `Arc<EventBus>`.

use brankas_core::types::{Timestamp, UserId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// AuthEvent
// ---------------------------------------------------------------------------

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEventKind {
    Registered,
    RegistrationRejected,
    LoggedIn,
    LoginFailed,
    LoggedOut,
    TokenRefreshed,
    RefreshFailed,
}

impl AuthEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::RegistrationRejected => "registration_rejected",
            Self::LoggedIn => "logged_in",
            Self::LoginFailed => "login_failed",
            Self::LoggedOut => "logged_out",
            Self::TokenRefreshed => "token_refreshed",
            Self::RefreshFailed => "refresh_failed",
        }
    }
}

/// A session outcome, as seen by the notification surface.
///
/// Constructed via [`AuthEvent::new`] and enriched with
/// [`with_user`](AuthEvent::with_user) and
/// [`with_reason`](AuthEvent::with_reason). Never carries passwords or tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthEvent {
    pub kind: AuthEventKind,

    /// Id of the user involved, when known.
    pub user_id: Option<UserId>,

    /// Username (or the login string that was attempted).
    pub username: Option<String>,

    /// Short machine-readable cause, e.g. `"refresh_failed"` on a logout.
    pub reason: Option<String>,

    /// When the event was created (UTC).
    pub timestamp: Timestamp,
}

impl AuthEvent {
    /// Create a new event with only the required `kind`.
    pub fn new(kind: AuthEventKind) -> Self {
        Self {
            kind,
            user_id: None,
            username: None,
            reason: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the user the event concerns.
    pub fn with_user(mut self, user_id: impl Into<UserId>, username: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self.username = Some(username.into());
        self
    }

    /// Attach the attempted login when no user record is known.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Whether this is a failure signal for the UI.
    pub fn is_failure(&self) -> bool {
        matches!(
            self.kind,
            AuthEventKind::RegistrationRejected
                | AuthEventKind::LoginFailed
                | AuthEventKind::RefreshFailed
        )
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`AuthEvent`].
///
/// # Usage
///
/// ```rust
/// use brankas_events::bus::{AuthEvent, AuthEventKind, EventBus};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(AuthEvent::new(AuthEventKind::LoggedOut));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<AuthEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: AuthEvent) {
        // Ignore the SendError -- it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
