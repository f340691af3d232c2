//! The current-user session and its lifecycle status.

use serde::{Deserialize, Serialize};

use crate::user::User;

/// Who is logged in, and with which token pair.
///
/// The serialized form (camelCase) is the `state` object written under the
/// `auth-storage` key. An anonymous session has every field empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user: Option<User>,
    pub is_authenticated: bool,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl Session {
    /// The logged-out session.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A fully authenticated session for `user`.
    pub fn authenticated(user: User, access_token: String, refresh_token: String) -> Self {
        Self {
            user: Some(user),
            is_authenticated: true,
            access_token: Some(access_token),
            refresh_token: Some(refresh_token),
        }
    }

    /// True when every field is empty.
    pub fn is_anonymous(&self) -> bool {
        *self == Self::anonymous()
    }

    /// The access/refresh pair, only when both are present.
    pub fn token_pair(&self) -> Option<(&str, &str)> {
        match (&self.access_token, &self.refresh_token) {
            (Some(access), Some(refresh)) => Some((access.as_str(), refresh.as_str())),
            _ => None,
        }
    }
}

/// Lifecycle state of the session controller.
///
/// `Authenticating` and `Refreshing` are transient: they last only while a
/// login/registration or a silent refresh is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Anonymous,
    Authenticating,
    Authenticated,
    Refreshing,
}

impl SessionStatus {
    /// The resting status implied by `session`.
    pub fn settled(session: &Session) -> Self {
        if session.is_authenticated {
            Self::Authenticated
        } else {
            Self::Anonymous
        }
    }
}
