//! User identity and the mock directory's credential record.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// Public identity of a registered user.
///
/// This is the shape held by the session and written to persisted state; it
/// never carries password material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
}

/// A user directory entry: identity plus the PHC-formatted password hash.
///
/// Owned exclusively by the user directory. `Debug` output redacts the hash.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

impl CredentialRecord {
    /// The public identity for this record.
    pub fn user(&self) -> User {
        User {
            id: self.id.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
        }
    }

    /// Whether `login` names this record by username or by email.
    ///
    /// Both comparisons are exact and case-sensitive.
    pub fn matches_login(&self, login: &str) -> bool {
        self.username == login || self.email == login
    }

    /// Whether this record would collide with a new `username` or `email`.
    pub fn conflicts_with(&self, username: &str, email: &str) -> bool {
        self.username == username || self.email == email
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password_hash", &"<redacted>")
            .finish()
    }
}
