//! Versioned on-disk layout of the session under the `auth-storage` key.
//!
//! ```text
//! {"state": {"user": {...} | null, "isAuthenticated": bool,
//!            "accessToken": string | null, "refreshToken": string | null},
//!  "version": 1}
//! ```
//!
//! Loading is fail-closed: anything that does not decode to a known schema
//! version is treated as "no stored session".

use brankas_core::session::Session;
use brankas_core::user::User;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::kv::KeyValueStore;

/// Storage key for the persisted session.
pub const AUTH_STORAGE_KEY: &str = "auth-storage";

/// Schema version written by [`save_session`].
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize)]
struct Envelope<'a> {
    state: &'a Session,
    version: u32,
}

#[derive(Deserialize)]
struct RawEnvelope {
    state: serde_json::Value,
    #[serde(default)]
    version: u32,
}

/// Version 0 stored only the user and the flag, never the tokens.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionV0 {
    user: Option<User>,
    is_authenticated: bool,
}

impl From<SessionV0> for Session {
    fn from(v0: SessionV0) -> Self {
        Session {
            user: v0.user,
            is_authenticated: v0.is_authenticated,
            access_token: None,
            refresh_token: None,
        }
    }
}

/// Read the stored session, if any.
///
/// Storage failures are returned; undecodable contents yield `Ok(None)`.
pub fn load_session(store: &dyn KeyValueStore) -> Result<Option<Session>, StoreError> {
    let Some(raw) = store.get(AUTH_STORAGE_KEY)? else {
        return Ok(None);
    };
    Ok(decode_session(&raw))
}

/// Write `session` under [`AUTH_STORAGE_KEY`] at the current schema version.
pub fn save_session(store: &dyn KeyValueStore, session: &Session) -> Result<(), StoreError> {
    let body = serde_json::to_string(&Envelope {
        state: session,
        version: SCHEMA_VERSION,
    })?;
    store.set(AUTH_STORAGE_KEY, &body)
}

/// Decode a stored document, migrating older versions forward.
pub fn decode_session(raw: &str) -> Option<Session> {
    let envelope: RawEnvelope = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(error = %e, "Stored session is not a valid envelope, ignoring it");
            return None;
        }
    };

    let decoded = match envelope.version {
        SCHEMA_VERSION => serde_json::from_value::<Session>(envelope.state),
        0 => serde_json::from_value::<SessionV0>(envelope.state).map(Session::from),
        other => {
            tracing::warn!(
                version = other,
                expected = SCHEMA_VERSION,
                "Stored session has an unsupported schema version, ignoring it"
            );
            return None;
        }
    };

    match decoded {
        Ok(session) => Some(session),
        Err(e) => {
            tracing::warn!(
                error = %e,
                version = envelope.version,
                "Stored session does not match its schema, ignoring it"
            );
            None
        }
    }
}
