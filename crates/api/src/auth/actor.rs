//! Single writer for the session.
//!
//! [`SessionActor`] owns the [`Session`] and applies [`Command`]s strictly in
//! arrival order. Every applied mutation is persisted and then published as a
//! [`SessionSnapshot`] on a `watch` channel, so observers only ever see whole
//! states.

use std::sync::Arc;

use brankas_core::session::{Session, SessionStatus};
use brankas_core::user::User;
use brankas_store::persisted;
use brankas_store::{KeyValueStore, StoreError};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};

use crate::auth::jwt::TokenPair;

/// What observers of the controller see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session: Session,
    pub status: SessionStatus,
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

/// Which logouts the actor honours.
pub(crate) enum LogoutScope {
    /// User-initiated: always clears.
    Unconditional,
    /// Clears only while the session still holds this refresh token, so a
    /// stale failed check cannot log out a newer session.
    IfRefreshTokenIs(Option<String>),
}

#[derive(Debug)]
pub(crate) enum LogoutResult {
    Cleared(Session),
    AlreadyAnonymous,
    Superseded,
}

pub(crate) enum Command {
    /// Enter a transient status (`Authenticating` / `Refreshing`).
    Begin(SessionStatus),
    /// Leave any transient status.
    Settle,
    /// Replies with the session it committed.
    Login {
        user: User,
        tokens: TokenPair,
        reply: Reply<Session>,
    },
    Logout {
        scope: LogoutScope,
        reply: Reply<LogoutResult>,
    },
    /// A new access token minted from `refresh_token`. Dropped unless the
    /// session still holds that refresh token.
    RefreshResult {
        refresh_token: String,
        access_token: String,
        reply: Reply<bool>,
    },
}

pub(crate) struct SessionActor {
    session: Session,
    status: SessionStatus,
    store: Arc<dyn KeyValueStore>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl SessionActor {
    pub(crate) fn new(
        session: Session,
        store: Arc<dyn KeyValueStore>,
    ) -> (Self, watch::Receiver<SessionSnapshot>) {
        let status = SessionStatus::settled(&session);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot {
            session: session.clone(),
            status,
        });
        let actor = Self {
            session,
            status,
            store,
            snapshot_tx,
        };
        (actor, snapshot_rx)
    }

    /// Apply commands until every sender is dropped.
    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }
        tracing::debug!("Session actor stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Begin(status) => self.set_status(status),
            Command::Settle => self.set_status(SessionStatus::settled(&self.session)),
            Command::Login {
                user,
                tokens,
                reply,
            } => {
                let next = Session::authenticated(user, tokens.access_token, tokens.refresh_token);
                let _ = reply.send(self.commit(next.clone()).map(|()| next));
            }
            Command::Logout { scope, reply } => {
                let _ = reply.send(self.logout(scope));
            }
            Command::RefreshResult {
                refresh_token,
                access_token,
                reply,
            } => {
                if !self.session.is_authenticated
                    || self.session.refresh_token.as_deref() != Some(refresh_token.as_str())
                {
                    tracing::debug!("Session changed during refresh, discarding new access token");
                    let _ = reply.send(Ok(false));
                    return;
                }
                let next = Session {
                    access_token: Some(access_token),
                    ..self.session.clone()
                };
                let _ = reply.send(self.commit(next).map(|()| true));
            }
        }
    }

    /// Persist first, then swap in `next`; a failed write keeps the old state.
    fn commit(&mut self, next: Session) -> Result<(), StoreError> {
        persisted::save_session(self.store.as_ref(), &next)?;
        self.status = SessionStatus::settled(&next);
        self.session = next;
        self.publish();
        Ok(())
    }

    /// Clears in memory even when the write fails; the error is still reported.
    fn logout(&mut self, scope: LogoutScope) -> Result<LogoutResult, StoreError> {
        if let LogoutScope::IfRefreshTokenIs(expected) = &scope {
            if self.session.refresh_token != *expected {
                return Ok(LogoutResult::Superseded);
            }
        }
        if self.session.is_anonymous() {
            return Ok(LogoutResult::AlreadyAnonymous);
        }

        let previous = std::mem::take(&mut self.session);
        self.status = SessionStatus::Anonymous;
        self.publish();
        persisted::save_session(self.store.as_ref(), &self.session)?;
        Ok(LogoutResult::Cleared(previous))
    }

    fn set_status(&mut self, status: SessionStatus) {
        if self.status != status {
            self.status = status;
            self.publish();
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(SessionSnapshot {
            session: self.session.clone(),
            status: self.status,
        });
    }
}
