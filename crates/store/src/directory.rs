//! The mock user directory of credential records.
//!
//! Populated only through registration. Username and email are each unique
//! across all records; [`UserDirectory::insert`] enforces that atomically.

use std::sync::{PoisonError, RwLock};

use brankas_core::error::CoreError;
use brankas_core::user::CredentialRecord;

/// Lookup and insertion over credential records.
pub trait UserDirectory: Send + Sync {
    /// Return the first record matching `predicate`.
    fn find(&self, predicate: &dyn Fn(&CredentialRecord) -> bool) -> Option<CredentialRecord>;

    /// Store a new record.
    ///
    /// Fails with [`CoreError::Conflict`] if the username or email is taken;
    /// the directory is unchanged in that case.
    fn insert(&self, record: CredentialRecord) -> Result<(), CoreError>;

    /// Number of stored records.
    fn count(&self) -> usize;

    /// Find the record whose username OR email equals `login`.
    fn find_by_login(&self, login: &str) -> Option<CredentialRecord> {
        self.find(&|r: &CredentialRecord| r.matches_login(login))
    }

    /// Find a record that would collide with `username` or `email`.
    fn find_conflicting(&self, username: &str, email: &str) -> Option<CredentialRecord> {
        self.find(&|r: &CredentialRecord| r.conflicts_with(username, email))
    }
}

/// Process-local directory, initially empty.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    records: RwLock<Vec<CredentialRecord>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn find(&self, predicate: &dyn Fn(&CredentialRecord) -> bool) -> Option<CredentialRecord> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.iter().find(|r| predicate(r)).cloned()
    }

    fn insert(&self, record: CredentialRecord) -> Result<(), CoreError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records
            .iter()
            .any(|r| r.conflicts_with(&record.username, &record.email))
        {
            return Err(CoreError::Conflict(
                "Username or email is already registered".into(),
            ));
        }
        tracing::debug!(user_id = %record.id, "Credential record inserted");
        records.push(record);
        Ok(())
    }

    fn count(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
