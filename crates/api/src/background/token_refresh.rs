//! Periodic revalidation of the session's access token.
//!
//! While a session is authenticated, [`TokenRefresher`] runs
//! [`SessionController::check_token_validity`] once immediately and then on a
//! fixed interval (5 minutes by default). The loop exits on its own when a
//! check leaves the session anonymous; [`TokenRefresher::supervise`] starts
//! and stops it as the session changes.
//!
//! A check that is already running when the loop is cancelled is allowed to
//! finish. Its result still goes through the session actor, so it can never
//! resurrect a session that was logged out meanwhile.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::auth::session::SessionController;

/// Default time between checks.
pub const REVALIDATE_INTERVAL: Duration = Duration::from_secs(300); // 5 minutes

/// Owns at most one running revalidation loop.
pub struct TokenRefresher {
    controller: SessionController,
    interval: Duration,
    running: Mutex<Option<RunningLoop>>,
}

struct RunningLoop {
    cancel: CancellationToken,
    task_handle: JoinHandle<()>,
}

impl TokenRefresher {
    pub fn new(controller: SessionController, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            controller,
            interval,
            running: Mutex::new(None),
        })
    }

    /// Spawn the loop. Returns `false` if one is already running.
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if running
            .as_ref()
            .is_some_and(|current| !current.task_handle.is_finished())
        {
            return false;
        }

        let cancel = CancellationToken::new();
        let task_handle = tokio::spawn(revalidate_loop(
            self.controller.clone(),
            self.interval,
            cancel.clone(),
        ));
        *running = Some(RunningLoop {
            cancel,
            task_handle,
        });
        true
    }

    /// Cancel the loop and wait for it to exit. No-op if not running.
    pub async fn stop(&self) {
        let running = self.running.lock().await.take();
        if let Some(running) = running {
            running.cancel.cancel();
            if let Err(e) = running.task_handle.await {
                tracing::error!(error = %e, "Token revalidation task failed");
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|current| !current.task_handle.is_finished())
    }

    /// Keep the loop running exactly while the session is authenticated.
    ///
    /// A session with a new refresh token gets a fresh loop and so an
    /// immediate check, even when the logout before it was coalesced away.
    ///
    /// Returns once `cancel` fires (or the controller goes away), after
    /// stopping the loop.
    pub async fn supervise(self: Arc<Self>, cancel: CancellationToken) {
        let mut snapshots = self.controller.subscribe();
        let mut covered: Option<String> = None;

        loop {
            let session = snapshots.borrow_and_update().session.clone();
            if !session.is_authenticated {
                self.stop().await;
                covered = None;
            } else if covered.is_some() && session.refresh_token != covered {
                tracing::debug!("New session, restarting token revalidation");
                self.stop().await;
                self.start().await;
                covered = session.refresh_token;
            } else {
                self.start().await;
                covered = session.refresh_token;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.stop().await;
        tracing::info!("Token refresher supervisor stopped");
    }
}

async fn revalidate_loop(
    controller: SessionController,
    period: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        interval_secs = period.as_secs(),
        "Token revalidation loop started"
    );

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Token revalidation loop stopping");
                break;
            }
            _ = interval.tick() => {
                match controller.check_token_validity().await {
                    Ok(outcome) => tracing::debug!(?outcome, "Periodic token check"),
                    Err(e) => tracing::error!(error = %e, "Periodic token check failed"),
                }
                if !controller.is_authenticated() {
                    tracing::info!("Session ended, token revalidation loop exiting");
                    break;
                }
            }
        }
    }
}
