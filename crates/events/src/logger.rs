//! Log sink for authentication events.
//!
//! [`EventLogger`] subscribes to the [`EventBus`](crate::bus::EventBus) and
//! writes every [`AuthEvent`] through `tracing`. Failures are logged at
//! `warn`, everything else at `info`. It shuts down when the bus is dropped.

use tokio::sync::broadcast;

use crate::bus::AuthEvent;

/// Background service that logs authentication events.
pub struct EventLogger;

impl EventLogger {
    /// Run the logging loop until the channel closes.
    ///
    /// Returns the number of events logged.
    pub async fn run(mut receiver: broadcast::Receiver<AuthEvent>) -> u64 {
        let mut logged = 0;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    Self::log(&event);
                    logged += 1;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event logger lagged, some events were not logged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, event logger shutting down");
                    break;
                }
            }
        }
        logged
    }

    fn log(event: &AuthEvent) {
        let kind = event.kind.as_str();
        let user_id = event.user_id.as_deref().unwrap_or("-");
        let username = event.username.as_deref().unwrap_or("-");
        let reason = event.reason.as_deref().unwrap_or("-");

        if event.is_failure() {
            tracing::warn!(kind, user_id, username, reason, "Authentication event");
        } else {
            tracing::info!(kind, user_id, username, reason, "Authentication event");
        }
    }
}
