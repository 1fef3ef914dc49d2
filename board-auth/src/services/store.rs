//! Persistence collaborators. Services take these as `Arc<dyn ...>` so the
//! MongoDB and in-memory backends are interchangeable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::ServiceError;
use crate::models::{NewSession, PasswordReset, Session, User};

/// Outcome of a full-record session replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Modified,
    Unchanged,
    Missing,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<User>, ServiceError>;

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, ServiceError>;

    /// `UserAlreadyExists` on an email or name collision.
    async fn insert(&self, user: &User) -> Result<(), ServiceError>;

    // Writes touch only the fields they name so a request holding an older
    // copy of the user cannot undo a concurrent change to other fields.
    // The setters fail with `UserNotFound` when the user is gone.

    async fn set_password_hash(&self, user_id: &str, hash: &str) -> Result<(), ServiceError>;

    async fn set_totp_secret(&self, user_id: &str, secret: &str) -> Result<(), ServiceError>;

    /// Turns two-factor on only if it is still off and `secret` is still the
    /// pending secret. `false` when either condition no longer holds.
    async fn enable_mfa(
        &self,
        user_id: &str,
        secret: &str,
        duration_seconds: i64,
        recovery_codes: &[String],
    ) -> Result<bool, ServiceError>;

    /// `false` when two-factor was already off.
    async fn disable_mfa(&self, user_id: &str) -> Result<bool, ServiceError>;

    async fn set_recovery_codes(&self, user_id: &str, codes: &[String])
        -> Result<(), ServiceError>;

    /// Removes `code` from the user's recovery codes if it is still there.
    /// Exactly one of any number of concurrent callers sees `true`.
    async fn redeem_recovery_code(&self, user_id: &str, code: &str) -> Result<bool, ServiceError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists the session and returns the generated id.
    async fn insert(&self, session: NewSession) -> Result<String, ServiceError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Session>, ServiceError>;

    /// Sessions for `user_id` created strictly after `created_after`,
    /// newest first. Ties on `created_at` are broken deterministically so
    /// repeated listings agree on positions.
    async fn find_by_user(
        &self,
        user_id: &str,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<Session>, ServiceError>;

    async fn replace(&self, session: &Session) -> Result<ReplaceOutcome, ServiceError>;

    /// `true` if a record was removed.
    async fn delete(&self, id: &str) -> Result<bool, ServiceError>;

    /// Number of sessions removed.
    async fn delete_by_user(&self, user_id: &str) -> Result<u64, ServiceError>;

    async fn ping(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[async_trait]
pub trait PasswordResetStore: Send + Sync {
    /// Inserts `reset` unless an unexpired reset already exists for the same
    /// user, in which case `ResetAlreadyRequested`. Expired resets for the
    /// user are discarded. The check and insert are atomic.
    async fn insert_exclusive(
        &self,
        reset: &PasswordReset,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<PasswordReset>, ServiceError>;

    /// Removes and returns the reset in one step, so a token is consumed once.
    async fn take(&self, id: &str) -> Result<Option<PasswordReset>, ServiceError>;
}
