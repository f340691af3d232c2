//! The auth session controller.
//!
//! [`SessionController`] is a cheap, cloneable handle. All session mutations
//! are sent to a single [`SessionActor`](super::actor::SessionActor) task, so
//! a logout can never be undone by a refresh that was already in flight, and
//! two refreshes can never interleave their writes.
//!
//! Slow work (password hashing, token signing) happens on the caller's task;
//! only the final state change goes through the actor.

use std::future::Future;
use std::sync::Arc;

use brankas_core::error::CoreError;
use brankas_core::session::{Session, SessionStatus};
use brankas_core::user::{CredentialRecord, User};
use brankas_events::{AuthEvent, AuthEventKind, EventBus};
use brankas_store::persisted;
use brankas_store::{KeyValueStore, UserDirectory};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use super::actor::{Command, LogoutResult, LogoutScope, Reply, SessionActor, SessionSnapshot};
use super::jwt::{self, TokenService};
use super::password::{hash_password_blocking, verify_password_blocking};

const COMMAND_BUFFER: usize = 64;

/// Outcome of [`SessionController::check_token_validity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheck {
    /// The access token has not expired.
    Valid,
    /// The access token had expired and a new one was installed.
    Refreshed,
    /// The session was cleared (or already was).
    LoggedOut,
    /// The session changed while the check ran; nothing was applied.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogoutReason {
    UserRequested,
    MissingTokens,
    RefreshFailed,
}

impl LogoutReason {
    fn as_str(self) -> &'static str {
        match self {
            LogoutReason::UserRequested => "user_requested",
            LogoutReason::MissingTokens => "missing_tokens",
            LogoutReason::RefreshFailed => "refresh_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshOutcome {
    Refreshed,
    Rejected,
    Superseded,
}

#[derive(Clone)]
pub struct SessionController {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    tokens: Arc<TokenService>,
    directory: Arc<dyn UserDirectory>,
    events: Arc<EventBus>,
}

impl SessionController {
    /// Rehydrate the session from `store` and start the actor.
    ///
    /// A stored blob that cannot be read as a session starts anonymous. I/O
    /// errors are returned.
    pub fn spawn(
        store: Arc<dyn KeyValueStore>,
        directory: Arc<dyn UserDirectory>,
        tokens: Arc<TokenService>,
        events: Arc<EventBus>,
    ) -> Result<Self, CoreError> {
        let session = persisted::load_session(store.as_ref())?.unwrap_or_default();
        if let Some(user) = &session.user {
            tracing::info!(user_id = %user.id, "Rehydrated stored session");
        }

        let (actor, snapshot) = SessionActor::new(session, store);
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(actor.run(receiver));

        Ok(Self {
            commands,
            snapshot,
            tokens,
            directory,
            events,
        })
    }

    /// [`spawn`](Self::spawn), then validate any rehydrated tokens once.
    pub async fn start(
        store: Arc<dyn KeyValueStore>,
        directory: Arc<dyn UserDirectory>,
        tokens: Arc<TokenService>,
        events: Arc<EventBus>,
    ) -> Result<Self, CoreError> {
        let controller = Self::spawn(store, directory, tokens, events)?;
        if !controller.session().is_anonymous() {
            let outcome = controller.check_token_validity().await?;
            tracing::info!(?outcome, "Checked rehydrated session");
        }
        Ok(controller)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn session(&self) -> Session {
        self.snapshot.borrow().session.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.snapshot.borrow().status
    }

    pub fn is_authenticated(&self) -> bool {
        self.snapshot.borrow().session.is_authenticated
    }

    /// Watch every committed state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Create an account and log it in.
    ///
    /// Returns `Ok(false)` if the username or email is already taken; the
    /// directory and session are unchanged in that case.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<bool, CoreError> {
        Ok(self
            .register_session(username, email, password)
            .await?
            .is_some())
    }

    /// [`register`](Self::register), returning the session this call committed.
    pub async fn register_session(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Option<Session>, CoreError> {
        self.in_phase(
            SessionStatus::Authenticating,
            self.register_inner(username, email, password),
        )
        .await
    }

    async fn register_inner(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Option<Session>, CoreError> {
        if self.directory.find_conflicting(username, email).is_some() {
            self.reject_registration(username);
            return Ok(None);
        }

        let password_hash = hash_password_blocking(password.to_string()).await?;
        let record = CredentialRecord {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
        };
        let user = record.user();

        match self.directory.insert(record) {
            Ok(()) => {}
            // Lost a race with a concurrent registration for the same name.
            Err(CoreError::Conflict(_)) => {
                self.reject_registration(username);
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        tracing::info!(user_id = %user.id, username = %user.username, "User registered");
        self.events
            .publish(AuthEvent::new(AuthEventKind::Registered).with_user(&user.id, &user.username));

        self.login(user).await.map(Some)
    }

    fn reject_registration(&self, username: &str) {
        tracing::info!(username, "Registration rejected: username or email taken");
        self.events.publish(
            AuthEvent::new(AuthEventKind::RegistrationRejected)
                .with_username(username)
                .with_reason("conflict"),
        );
    }

    /// Log in by username or email.
    ///
    /// Returns `Ok(false)` for an unknown login or a wrong password, without
    /// saying which, and leaves the session unchanged.
    pub async fn authenticate(&self, login: &str, password: &str) -> Result<bool, CoreError> {
        Ok(self.authenticate_session(login, password).await?.is_some())
    }

    /// [`authenticate`](Self::authenticate), returning the session this call
    /// committed.
    pub async fn authenticate_session(
        &self,
        login: &str,
        password: &str,
    ) -> Result<Option<Session>, CoreError> {
        self.in_phase(
            SessionStatus::Authenticating,
            self.authenticate_inner(login, password),
        )
        .await
    }

    async fn authenticate_inner(
        &self,
        login: &str,
        password: &str,
    ) -> Result<Option<Session>, CoreError> {
        let Some(record) = self.directory.find_by_login(login) else {
            self.reject_login(login);
            return Ok(None);
        };

        let verified =
            verify_password_blocking(password.to_string(), record.password_hash.clone()).await?;
        if !verified {
            self.reject_login(login);
            return Ok(None);
        }

        self.login(record.user()).await.map(Some)
    }

    fn reject_login(&self, login: &str) {
        tracing::info!(login, "Authentication failed");
        self.events.publish(
            AuthEvent::new(AuthEventKind::LoginFailed)
                .with_username(login)
                .with_reason("invalid_credentials"),
        );
    }

    /// Mint a fresh token pair for `user` and make it the current session.
    ///
    /// Returns the session as committed. Callers that answer with tokens
    /// should use this value; the current session may already be a later one.
    pub async fn login(&self, user: User) -> Result<Session, CoreError> {
        let tokens = self
            .tokens
            .generate_token_pair(&user.id, &user.username, &user.email)?;

        let committed = user.clone();
        let session = self
            .call(|reply| Command::Login {
                user: committed,
                tokens,
                reply,
            })
            .await?;

        tracing::info!(user_id = %user.id, "Session authenticated");
        self.events
            .publish(AuthEvent::new(AuthEventKind::LoggedIn).with_user(&user.id, &user.username));
        Ok(session)
    }

    /// Clear the session. Idempotent.
    pub async fn logout(&self) -> Result<(), CoreError> {
        let result = self
            .call(|reply| Command::Logout {
                scope: LogoutScope::Unconditional,
                reply,
            })
            .await?;
        self.announce_logout(result, LogoutReason::UserRequested);
        Ok(())
    }

    /// Make sure the current session still has a usable access token.
    ///
    /// Missing tokens log out. An expired access token triggers a silent
    /// refresh; if that is rejected the session is logged out.
    pub async fn check_token_validity(&self) -> Result<TokenCheck, CoreError> {
        let session = self.session();
        let Some((access_token, refresh_token)) = session.token_pair() else {
            return self
                .expire(session.refresh_token.clone(), LogoutReason::MissingTokens)
                .await;
        };

        if !jwt::is_expired(access_token) {
            tracing::debug!("Access token still valid");
            return Ok(TokenCheck::Valid);
        }

        tracing::debug!("Access token expired, attempting silent refresh");
        match self.refresh_with(refresh_token).await? {
            RefreshOutcome::Refreshed => Ok(TokenCheck::Refreshed),
            RefreshOutcome::Superseded => Ok(TokenCheck::Superseded),
            RefreshOutcome::Rejected => {
                self.expire(Some(refresh_token.to_string()), LogoutReason::RefreshFailed)
                    .await
            }
        }
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// Returns `Ok(true)` only if the new token was installed. Never logs out.
    pub async fn refresh_auth_token(&self) -> Result<bool, CoreError> {
        let session = self.session();
        let Some(refresh_token) = session.refresh_token.as_deref() else {
            tracing::debug!("No refresh token to refresh with");
            return Ok(false);
        };
        Ok(self.refresh_with(refresh_token).await? == RefreshOutcome::Refreshed)
    }

    async fn refresh_with(&self, refresh_token: &str) -> Result<RefreshOutcome, CoreError> {
        if jwt::is_expired(refresh_token) {
            self.reject_refresh("refresh_token_expired");
            return Ok(RefreshOutcome::Rejected);
        }

        self.in_phase(SessionStatus::Refreshing, self.install_refreshed(refresh_token))
            .await
    }

    async fn install_refreshed(&self, refresh_token: &str) -> Result<RefreshOutcome, CoreError> {
        let access_token = match self.tokens.refresh_access_token(refresh_token) {
            Ok(token) => token,
            Err(e) if e.is_rejection() => {
                tracing::warn!(error = %e, "Refresh token rejected");
                self.reject_refresh("refresh_token_rejected");
                return Ok(RefreshOutcome::Rejected);
            }
            Err(e) => return Err(e.into()),
        };

        let applied = self
            .call(|reply| Command::RefreshResult {
                refresh_token: refresh_token.to_string(),
                access_token,
                reply,
            })
            .await?;
        if !applied {
            return Ok(RefreshOutcome::Superseded);
        }

        let user = self.session().user;
        tracing::info!(
            user_id = user.as_ref().map(|u| u.id.as_str()).unwrap_or("-"),
            "Access token refreshed"
        );
        let mut event = AuthEvent::new(AuthEventKind::TokenRefreshed);
        if let Some(user) = user {
            event = event.with_user(user.id, user.username);
        }
        self.events.publish(event);
        Ok(RefreshOutcome::Refreshed)
    }

    fn reject_refresh(&self, reason: &str) {
        let mut event = AuthEvent::new(AuthEventKind::RefreshFailed).with_reason(reason);
        if let Some(user) = self.session().user {
            event = event.with_user(user.id, user.username);
        }
        self.events.publish(event);
    }

    /// Log out, but only the session that still holds `refresh_token`.
    async fn expire(
        &self,
        refresh_token: Option<String>,
        reason: LogoutReason,
    ) -> Result<TokenCheck, CoreError> {
        let result = self
            .call(|reply| Command::Logout {
                scope: LogoutScope::IfRefreshTokenIs(refresh_token),
                reply,
            })
            .await?;
        if self.announce_logout(result, reason) {
            Ok(TokenCheck::LoggedOut)
        } else {
            Ok(TokenCheck::Superseded)
        }
    }

    /// Returns false if the logout was superseded.
    fn announce_logout(&self, result: LogoutResult, reason: LogoutReason) -> bool {
        match result {
            LogoutResult::Cleared(previous) => {
                tracing::info!(reason = reason.as_str(), "Session cleared");
                let mut event =
                    AuthEvent::new(AuthEventKind::LoggedOut).with_reason(reason.as_str());
                if let Some(user) = previous.user {
                    event = event.with_user(user.id, user.username);
                }
                self.events.publish(event);
                true
            }
            LogoutResult::AlreadyAnonymous => true,
            LogoutResult::Superseded => {
                tracing::debug!(
                    reason = reason.as_str(),
                    "Session changed before logout applied, skipping"
                );
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Actor plumbing
    // -----------------------------------------------------------------------

    /// Run `work` with the status set to `phase`, then settle it.
    ///
    /// The status is settled even if the returned future is dropped early.
    async fn in_phase<T>(
        &self,
        phase: SessionStatus,
        work: impl Future<Output = Result<T, CoreError>>,
    ) -> Result<T, CoreError> {
        self.send(Command::Begin(phase)).await?;
        let guard = PhaseGuard::new(self.commands.clone());
        let result = work.await;
        guard.settle().await?;
        result
    }

    async fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, CoreError> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply)).await?;
        let result = response.await.map_err(|_| actor_gone())?;
        Ok(result?)
    }

    async fn send(&self, command: Command) -> Result<(), CoreError> {
        self.commands.send(command).await.map_err(|_| actor_gone())
    }
}

fn actor_gone() -> CoreError {
    CoreError::Internal("Session actor is not running".into())
}

/// Sends [`Command::Settle`] when a phase ends, including by cancellation.
struct PhaseGuard {
    commands: mpsc::Sender<Command>,
    armed: bool,
}

impl PhaseGuard {
    fn new(commands: mpsc::Sender<Command>) -> Self {
        Self {
            commands,
            armed: true,
        }
    }

    async fn settle(mut self) -> Result<(), CoreError> {
        let sent = self.commands.send(Command::Settle).await;
        self.armed = false;
        sent.map_err(|_| actor_gone())
    }
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.commands.try_send(Command::Settle) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(command)) => {
                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    tracing::warn!("No runtime to settle an abandoned session phase");
                    return;
                };
                let commands = self.commands.clone();
                runtime.spawn(async move {
                    let _ = commands.send(command).await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::JwtConfig;
    use assert_matches::assert_matches;
    use brankas_store::{InMemoryUserDirectory, MemoryStore};

    struct Harness {
        controller: SessionController,
        store: Arc<MemoryStore>,
        directory: Arc<InMemoryUserDirectory>,
        events: Arc<EventBus>,
    }

    fn config(access_mins: i64, refresh_days: i64) -> JwtConfig {
        JwtConfig {
            access_token_expiry_mins: access_mins,
            refresh_token_expiry_days: refresh_days,
            ..JwtConfig::new("session-test-secret")
        }
    }

    fn harness_with(config: JwtConfig, store: Arc<MemoryStore>) -> Harness {
        let directory = Arc::new(InMemoryUserDirectory::new());
        let events = Arc::new(EventBus::default());
        let controller = SessionController::spawn(
            store.clone(),
            directory.clone(),
            Arc::new(TokenService::new(config)),
            events.clone(),
        )
        .unwrap();
        Harness {
            controller,
            store,
            directory,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(config(15, 7), Arc::new(MemoryStore::new()))
    }

    fn stored(store: &MemoryStore) -> Session {
        persisted::load_session(store).unwrap().unwrap_or_default()
    }

    #[tokio::test]
    async fn register_logs_in_and_persists() {
        let h = harness();
        assert!(h.controller.register("bob", "b@x.com", "pw1").await.unwrap());

        let session = h.controller.session();
        assert!(session.is_authenticated);
        assert_eq!(session.user.as_ref().unwrap().username, "bob");
        assert!(session.token_pair().is_some());
        assert_eq!(h.controller.status(), SessionStatus::Authenticated);
        assert_eq!(stored(&h.store), session);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected_without_changes() {
        let h = harness();
        assert!(h.controller.register("alice", "a@x.com", "pw1").await.unwrap());
        h.controller.logout().await.unwrap();

        assert!(!h.controller.register("alice", "a2@x.com", "pw2").await.unwrap());
        assert!(!h.controller.register("alicia", "a@x.com", "pw2").await.unwrap());
        assert_eq!(h.directory.count(), 1);
        assert!(h.controller.session().is_anonymous());
    }

    #[tokio::test]
    async fn duplicate_registration_keeps_current_session() {
        let h = harness();
        assert!(h.controller.register("alice", "a@x.com", "pw1").await.unwrap());
        let before = h.controller.session();

        assert!(!h.controller.register("alice", "a2@x.com", "pw2").await.unwrap());
        assert_eq!(h.controller.session(), before);
        assert_eq!(h.controller.status(), SessionStatus::Authenticated);
        assert_eq!(stored(&h.store), before);
        assert_eq!(h.directory.count(), 1);
    }

    #[tokio::test]
    async fn register_returns_the_session_it_committed() {
        let h = harness();
        let session = h
            .controller
            .register_session("alice", "a@x.com", "pw1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.user.as_ref().unwrap().username, "alice");
        assert_eq!(h.controller.session(), session);

        assert_eq!(
            h.controller
                .register_session("alice", "a2@x.com", "pw2")
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn concurrent_logins_each_get_their_own_session() {
        let h = harness();
        h.controller.register("alice", "a@x.com", "pw-a").await.unwrap();
        h.controller.register("bob", "b@x.com", "pw-b").await.unwrap();
        h.controller.logout().await.unwrap();

        let (alice, bob) = tokio::join!(
            h.controller.authenticate_session("alice", "pw-a"),
            h.controller.authenticate_session("bob", "pw-b"),
        );
        let alice = alice.unwrap().unwrap();
        let bob = bob.unwrap().unwrap();

        assert_eq!(alice.user.as_ref().unwrap().username, "alice");
        assert_eq!(bob.user.as_ref().unwrap().username, "bob");
        assert_ne!(alice.access_token, bob.access_token);
        let current = h.controller.session();
        assert!(current == alice || current == bob);
    }

    #[tokio::test]
    async fn abandoned_registration_settles_status() {
        let h = harness();
        let mut snapshots = h.controller.subscribe();

        let mut register = Box::pin(h.controller.register("alice", "a@x.com", "pw1"));
        tokio::select! {
            biased;
            seen = snapshots.wait_for(|s| s.status == SessionStatus::Authenticating) => {
                seen.unwrap();
            }
            _ = &mut register => panic!("registration finished before it could be abandoned"),
        }
        drop(register);

        let settled = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            snapshots.wait_for(|s| s.status == SessionStatus::Anonymous),
        )
        .await
        .expect("status settles after the caller goes away")
        .unwrap()
        .clone();
        assert!(settled.session.is_anonymous());
        assert_eq!(h.controller.status(), SessionStatus::Anonymous);
    }

    #[tokio::test]
    async fn authenticate_accepts_username_or_email() {
        let h = harness();
        h.controller.register("bob", "b@x.com", "pw1").await.unwrap();
        h.controller.logout().await.unwrap();

        assert!(h.controller.authenticate("b@x.com", "pw1").await.unwrap());
        assert_eq!(h.controller.session().user.unwrap().username, "bob");

        h.controller.logout().await.unwrap();
        assert!(h.controller.authenticate("bob", "pw1").await.unwrap());
    }

    #[tokio::test]
    async fn register_logout_authenticate_round_trip() {
        let h = harness();
        assert!(h.controller.register("bob", "bob@x.com", "Passw0rd1").await.unwrap());
        let user_id = h.controller.session().user.unwrap().id;

        h.controller.logout().await.unwrap();
        assert!(h.controller.session().is_anonymous());

        assert!(!h.controller.authenticate("bob", "wrongpass").await.unwrap());
        assert!(h.controller.session().is_anonymous());
        assert_eq!(h.controller.status(), SessionStatus::Anonymous);

        assert!(h.controller.authenticate("bob", "Passw0rd1").await.unwrap());
        let session = h.controller.session();
        assert!(session.is_authenticated);
        assert_eq!(session.user.unwrap().id, user_id);
    }

    #[tokio::test]
    async fn bad_credentials_leave_session_unchanged() {
        let h = harness();
        h.controller.register("bob", "b@x.com", "pw1").await.unwrap();
        let before = h.controller.session();

        assert!(!h.controller.authenticate("bob", "wrong").await.unwrap());
        assert!(!h.controller.authenticate("nobody", "pw1").await.unwrap());
        assert_eq!(h.controller.session(), before);
        assert_eq!(h.controller.status(), SessionStatus::Authenticated);
    }

    #[tokio::test]
    async fn logout_is_idempotent_and_persists_anonymous_state() {
        let h = harness();
        h.controller.register("bob", "b@x.com", "pw1").await.unwrap();

        h.controller.logout().await.unwrap();
        h.controller.logout().await.unwrap();

        assert!(h.controller.session().is_anonymous());
        assert_eq!(h.controller.status(), SessionStatus::Anonymous);
        assert_eq!(stored(&h.store), Session::anonymous());
    }

    #[tokio::test]
    async fn check_keeps_valid_tokens() {
        let h = harness();
        h.controller.register("bob", "b@x.com", "pw1").await.unwrap();
        let before = h.controller.session();

        assert_eq!(
            h.controller.check_token_validity().await.unwrap(),
            TokenCheck::Valid
        );
        assert_eq!(h.controller.session(), before);
    }

    #[tokio::test]
    async fn check_refreshes_expired_access_token() {
        // Access tokens expire the moment they are issued.
        let h = harness_with(config(0, 7), Arc::new(MemoryStore::new()));
        h.controller.register("bob", "b@x.com", "pw1").await.unwrap();
        let before = h.controller.session();

        assert_eq!(
            h.controller.check_token_validity().await.unwrap(),
            TokenCheck::Refreshed
        );
        let after = h.controller.session();
        assert!(after.is_authenticated);
        assert_ne!(after.access_token, before.access_token);
        assert_eq!(after.refresh_token, before.refresh_token);
        assert_eq!(stored(&h.store), after);
    }

    #[tokio::test]
    async fn check_logs_out_when_refresh_token_expired() {
        let h = harness_with(config(0, 0), Arc::new(MemoryStore::new()));
        h.controller.register("bob", "b@x.com", "pw1").await.unwrap();

        assert_eq!(
            h.controller.check_token_validity().await.unwrap(),
            TokenCheck::LoggedOut
        );
        assert!(h.controller.session().is_anonymous());
        assert_eq!(stored(&h.store), Session::anonymous());
    }

    #[tokio::test]
    async fn check_on_anonymous_session_logs_out() {
        let h = harness();
        assert_eq!(
            h.controller.check_token_validity().await.unwrap(),
            TokenCheck::LoggedOut
        );
        assert!(h.controller.session().is_anonymous());
    }

    #[tokio::test]
    async fn refresh_without_session_is_false() {
        let h = harness();
        assert!(!h.controller.refresh_auth_token().await.unwrap());
    }

    #[tokio::test]
    async fn refresh_with_foreign_token_fails_without_logout() {
        let h = harness();
        let user = User {
            id: "u1".into(),
            username: "bob".into(),
            email: "b@x.com".into(),
        };
        let foreign = TokenService::new(JwtConfig::new("someone-else"))
            .generate_token_pair("u1", "bob", "b@x.com")
            .unwrap();
        let session = Session::authenticated(user, foreign.access_token, foreign.refresh_token);
        persisted::save_session(h.store.as_ref(), &session).unwrap();

        let h = harness_with(config(15, 7), h.store);
        assert!(!h.controller.refresh_auth_token().await.unwrap());
        assert_eq!(h.controller.session(), session);
    }

    #[tokio::test]
    async fn spawn_rehydrates_stored_session() {
        let first = harness();
        first.controller.register("bob", "b@x.com", "pw1").await.unwrap();
        let session = first.controller.session();

        let second = harness_with(config(15, 7), first.store.clone());
        assert_eq!(second.controller.session(), session);
        assert_eq!(second.controller.status(), SessionStatus::Authenticated);
    }

    #[tokio::test]
    async fn start_clears_rehydrated_session_with_dead_tokens() {
        let first = harness_with(config(0, 0), Arc::new(MemoryStore::new()));
        first.controller.register("bob", "b@x.com", "pw1").await.unwrap();

        let controller = SessionController::start(
            first.store.clone(),
            Arc::new(InMemoryUserDirectory::new()),
            Arc::new(TokenService::new(config(0, 0))),
            Arc::new(EventBus::default()),
        )
        .await
        .unwrap();
        assert!(controller.session().is_anonymous());
        assert_eq!(stored(&first.store), Session::anonymous());
    }

    #[tokio::test]
    async fn corrupt_storage_starts_anonymous() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(persisted::AUTH_STORAGE_KEY, "{not json")
            .unwrap();
        let h = harness_with(config(15, 7), store);
        assert!(h.controller.session().is_anonymous());
    }

    #[tokio::test]
    async fn operations_publish_events() {
        let h = harness();
        let mut events = h.events.subscribe();

        h.controller.register("bob", "b@x.com", "pw1").await.unwrap();
        h.controller.authenticate("bob", "nope").await.unwrap();
        h.controller.logout().await.unwrap();

        let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                AuthEventKind::Registered,
                AuthEventKind::LoggedIn,
                AuthEventKind::LoginFailed,
                AuthEventKind::LoggedOut,
            ]
        );
    }

    #[tokio::test]
    async fn logout_during_refresh_wins() {
        let h = harness_with(config(0, 7), Arc::new(MemoryStore::new()));
        h.controller.register("bob", "b@x.com", "pw1").await.unwrap();

        let checker = h.controller.clone();
        let check = tokio::spawn(async move { checker.check_token_validity().await });
        h.controller.logout().await.unwrap();
        let outcome = check.await.unwrap().unwrap();

        // Whichever order the actor saw, the logout is final.
        assert_matches!(
            outcome,
            TokenCheck::Refreshed | TokenCheck::Superseded | TokenCheck::LoggedOut
        );
        assert!(h.controller.session().is_anonymous());
        assert_eq!(stored(&h.store), Session::anonymous());
    }
}
