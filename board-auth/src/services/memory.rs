//! In-process stores for local development and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::store::{PasswordResetStore, ReplaceOutcome, SessionStore, UserStore};
use super::ServiceError;
use crate::models::{session::generate_session_id, NewSession, PasswordReset, Session, User};

fn poisoned(what: &str, e: impl std::fmt::Display) -> ServiceError {
    ServiceError::Internal(anyhow::anyhow!("{} mutex poisoned: {}", what, e))
}

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<String, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` on the stored user while the lock is held.
    fn modify<T>(&self, user_id: &str, f: impl FnOnce(&mut User) -> T) -> Result<T, ServiceError> {
        let mut users = self.users.lock().map_err(|e| poisoned("User store", e))?;
        users
            .get_mut(user_id)
            .map(f)
            .ok_or(ServiceError::UserNotFound)
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<User>, ServiceError> {
        let users = self.users.lock().map_err(|e| poisoned("User store", e))?;
        Ok(users.get(id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        let users = self.users.lock().map_err(|e| poisoned("User store", e))?;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn insert(&self, user: &User) -> Result<(), ServiceError> {
        let mut users = self.users.lock().map_err(|e| poisoned("User store", e))?;
        if users
            .values()
            .any(|u| u.id == user.id || u.email == user.email || u.name == user.name)
        {
            return Err(ServiceError::UserAlreadyExists);
        }
        users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn set_password_hash(&self, user_id: &str, hash: &str) -> Result<(), ServiceError> {
        self.modify(user_id, |u| u.password_hash = hash.to_string())
    }

    async fn set_totp_secret(&self, user_id: &str, secret: &str) -> Result<(), ServiceError> {
        self.modify(user_id, |u| u.totp_secret = Some(secret.to_string()))
    }

    async fn enable_mfa(
        &self,
        user_id: &str,
        secret: &str,
        duration_seconds: i64,
        recovery_codes: &[String],
    ) -> Result<bool, ServiceError> {
        self.modify(user_id, |u| {
            if u.has_2fa_enabled || u.totp_secret.as_deref() != Some(secret) {
                return false;
            }
            u.has_2fa_enabled = true;
            u.auth_duration_seconds = duration_seconds;
            u.recovery_codes = recovery_codes.to_vec();
            true
        })
    }

    async fn disable_mfa(&self, user_id: &str) -> Result<bool, ServiceError> {
        self.modify(user_id, |u| std::mem::replace(&mut u.has_2fa_enabled, false))
    }

    async fn set_recovery_codes(
        &self,
        user_id: &str,
        codes: &[String],
    ) -> Result<(), ServiceError> {
        self.modify(user_id, |u| u.recovery_codes = codes.to_vec())
    }

    async fn redeem_recovery_code(&self, user_id: &str, code: &str) -> Result<bool, ServiceError> {
        self.modify(user_id, |u| match u.recovery_codes.iter().position(|c| c == code) {
            Some(pos) => {
                u.recovery_codes.remove(pos);
                true
            }
            None => false,
        })
    }
}

#[derive(Default)]
struct SessionTable {
    next_seq: u64,
    rows: HashMap<String, (u64, Session)>,
}

#[derive(Default)]
pub struct MemorySessionStore {
    table: Mutex<SessionTable>,
    unavailable: AtomicBool,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a backend outage: every call fails until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), ServiceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::StoreUnavailable(
                "session store is unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: NewSession) -> Result<String, ServiceError> {
        self.check_available()?;
        let mut table = self.table.lock().map_err(|e| poisoned("Session store", e))?;

        let id = generate_session_id();
        table.next_seq += 1;
        let seq = table.next_seq;
        table
            .rows
            .insert(id.clone(), (seq, session.into_session(id.clone())));
        Ok(id)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Session>, ServiceError> {
        self.check_available()?;
        let table = self.table.lock().map_err(|e| poisoned("Session store", e))?;
        Ok(table.rows.get(id).map(|(_, s)| s.clone()))
    }

    async fn find_by_user(
        &self,
        user_id: &str,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<Session>, ServiceError> {
        self.check_available()?;
        let table = self.table.lock().map_err(|e| poisoned("Session store", e))?;

        let mut rows: Vec<&(u64, Session)> = table
            .rows
            .values()
            .filter(|(_, s)| s.user_id == user_id && s.created_at > created_after)
            .collect();
        rows.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });

        Ok(rows.into_iter().map(|(_, s)| s.clone()).collect())
    }

    async fn replace(&self, session: &Session) -> Result<ReplaceOutcome, ServiceError> {
        self.check_available()?;
        let mut table = self.table.lock().map_err(|e| poisoned("Session store", e))?;

        match table.rows.get_mut(&session.id) {
            None => Ok(ReplaceOutcome::Missing),
            Some((_, existing)) if existing == session => Ok(ReplaceOutcome::Unchanged),
            Some((_, existing)) => {
                *existing = session.clone();
                Ok(ReplaceOutcome::Modified)
            }
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, ServiceError> {
        self.check_available()?;
        let mut table = self.table.lock().map_err(|e| poisoned("Session store", e))?;
        Ok(table.rows.remove(id).is_some())
    }

    async fn delete_by_user(&self, user_id: &str) -> Result<u64, ServiceError> {
        self.check_available()?;
        let mut table = self.table.lock().map_err(|e| poisoned("Session store", e))?;
        let before = table.rows.len();
        table.rows.retain(|_, (_, s)| s.user_id != user_id);
        Ok((before - table.rows.len()) as u64)
    }

    async fn ping(&self) -> Result<(), ServiceError> {
        self.check_available()
    }
}

#[derive(Default)]
pub struct MemoryPasswordResetStore {
    resets: Mutex<HashMap<String, PasswordReset>>,
}

impl MemoryPasswordResetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PasswordResetStore for MemoryPasswordResetStore {
    async fn insert_exclusive(
        &self,
        reset: &PasswordReset,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        // Check and insert under one guard.
        let mut resets = self
            .resets
            .lock()
            .map_err(|e| poisoned("Password reset store", e))?;

        resets.retain(|_, r| r.user_id != reset.user_id || !r.is_expired_at(now));
        if resets.values().any(|r| r.user_id == reset.user_id) {
            return Err(ServiceError::ResetAlreadyRequested);
        }

        resets.insert(reset.id.clone(), reset.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<PasswordReset>, ServiceError> {
        let resets = self
            .resets
            .lock()
            .map_err(|e| poisoned("Password reset store", e))?;
        Ok(resets.get(id).cloned())
    }

    async fn take(&self, id: &str) -> Result<Option<PasswordReset>, ServiceError> {
        let mut resets = self
            .resets
            .lock()
            .map_err(|e| poisoned("Password reset store", e))?;
        Ok(resets.remove(id))
    }
}
