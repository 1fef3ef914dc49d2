use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use super::store::{ReplaceOutcome, SessionStore};
use super::ServiceError;
use crate::models::{session::short_id, NewSession, Session, User};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Only sessions younger than this are listed to the user.
    pub list_max_age_seconds: i64,
    /// MFA window used when the user has no duration of their own.
    pub default_mfa_duration_seconds: i64,
}

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn SessionStore>,
    settings: SessionSettings,
}

impl SessionService {
    pub fn new(store: Arc<dyn SessionStore>, settings: SessionSettings) -> Self {
        Self { store, settings }
    }

    pub async fn create(&self, user: &User, ip: &str, user_agent: &str) -> Result<String, ServiceError> {
        self.create_at(user, ip, user_agent, Utc::now()).await
    }

    pub async fn create_at(
        &self,
        user: &User,
        ip: &str,
        user_agent: &str,
        now: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        let duration = user.auth_duration_or(self.settings.default_mfa_duration_seconds);

        let id = self
            .store
            .insert(NewSession {
                user_id: user.id.clone(),
                ip: ip.to_string(),
                user_agent: user_agent.to_string(),
                created_at: now,
                mfa_expires_at: now + Duration::seconds(duration),
            })
            .await?;

        tracing::info!(user_id = %user.id, session = %short_id(&id), "Session created");
        Ok(id)
    }

    pub async fn find(&self, id: &str) -> Result<Option<Session>, ServiceError> {
        self.store.find_by_id(id).await
    }

    pub async fn get(&self, id: &str) -> Result<Session, ServiceError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(ServiceError::SessionNotFound)
    }

    /// Sessions inside the listing window, newest first.
    pub async fn get_by_user(&self, user_id: &str) -> Result<Vec<Session>, ServiceError> {
        self.get_by_user_at(user_id, Utc::now()).await
    }

    pub async fn get_by_user_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, ServiceError> {
        let cutoff = now - Duration::seconds(self.settings.list_max_age_seconds);
        self.store.find_by_user(user_id, cutoff).await
    }

    /// Session at `index` in the `get_by_user` ordering.
    pub async fn get_by_index(&self, user_id: &str, index: usize) -> Result<Session, ServiceError> {
        self.get_by_index_at(user_id, index, Utc::now()).await
    }

    pub async fn get_by_index_at(
        &self,
        user_id: &str,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<Session, ServiceError> {
        self.get_by_user_at(user_id, now)
            .await?
            .into_iter()
            .nth(index)
            .ok_or(ServiceError::SessionNotFound)
    }

    /// Returns the session that was removed.
    pub async fn destroy_by_index(&self, user_id: &str, index: usize) -> Result<Session, ServiceError> {
        self.destroy_by_index_at(user_id, index, Utc::now()).await
    }

    pub async fn destroy_by_index_at(
        &self,
        user_id: &str,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<Session, ServiceError> {
        let session = self.get_by_index_at(user_id, index, now).await?;
        self.destroy(&session.id).await?;
        Ok(session)
    }

    /// Fails with `SessionNotFound` when nothing was deleted.
    pub async fn destroy(&self, id: &str) -> Result<(), ServiceError> {
        if !self.store.delete(id).await? {
            return Err(ServiceError::SessionNotFound);
        }
        tracing::info!(session = %short_id(id), "Session destroyed");
        Ok(())
    }

    pub async fn destroy_all_for_user(&self, user_id: &str) -> Result<u64, ServiceError> {
        let removed = self.store.delete_by_user(user_id).await?;
        tracing::info!(user_id = %user_id, removed, "Revoked all sessions for user");
        Ok(removed)
    }

    /// Owning user id if the session exists. `Ok(None)` is a stale or forged
    /// id, not a failure.
    pub async fn authenticate(&self, id: &str) -> Result<Option<String>, ServiceError> {
        Ok(self.store.find_by_id(id).await?.map(|s| s.user_id))
    }

    /// Full replace. An unchanged record is fine; a vanished one is not.
    pub async fn update(&self, session: &Session) -> Result<(), ServiceError> {
        match self.store.replace(session).await? {
            ReplaceOutcome::Modified | ReplaceOutcome::Unchanged => Ok(()),
            ReplaceOutcome::Missing => Err(ServiceError::SessionVanished),
        }
    }

    /// Moves the MFA deadline on the stored session, leaving its other
    /// fields as they are now rather than as the caller last saw them.
    pub async fn set_mfa_expiry(
        &self,
        session_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut session = self.get(session_id).await?;
        session.mfa_expires_at = expires_at;
        self.update(&session).await
    }

    /// Forces every other session of the user through the code challenge.
    pub async fn expire_mfa_except(
        &self,
        user_id: &str,
        keep_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let sessions = self
            .store
            .find_by_user(user_id, DateTime::<Utc>::MIN_UTC)
            .await?;

        for mut session in sessions.into_iter().filter(|s| s.id != keep_id) {
            if session.mfa_expires_at > now {
                session.mfa_expires_at = now;
                match self.update(&session).await {
                    // Signed out concurrently; nothing to expire.
                    Err(ServiceError::SessionVanished) => {}
                    other => other?,
                }
            }
        }
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), ServiceError> {
        self.store.ping().await
    }

    pub async fn add_flash(&self, session_id: &str, message: &str) -> Result<(), ServiceError> {
        let mut session = self.get(session_id).await?;
        session.flash = Some(message.to_string());
        self.update(&session).await?;
        tracing::debug!(session = %short_id(session_id), "Flash message added");
        Ok(())
    }

    /// Returns and clears the pending flash message.
    pub async fn take_flash(&self, session_id: &str) -> Result<Option<String>, ServiceError> {
        let mut session = self.get(session_id).await?;
        let flash = session.flash.take();
        if flash.is_some() {
            self.update(&session).await?;
        }
        Ok(flash)
    }
}
