use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

use super::email::EmailProvider;
use super::session::SessionService;
use super::store::{PasswordResetStore, UserStore};
use super::ServiceError;
use crate::models::{PasswordReset, User};
use crate::utils::{hash_password, parse_user_agent, Password};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct PasswordResetService {
    users: Arc<dyn UserStore>,
    resets: Arc<dyn PasswordResetStore>,
    sessions: SessionService,
    email: Arc<dyn EmailProvider>,
    token_key: Arc<Vec<u8>>,
}

impl PasswordResetService {
    pub fn new(
        users: Arc<dyn UserStore>,
        resets: Arc<dyn PasswordResetStore>,
        sessions: SessionService,
        email: Arc<dyn EmailProvider>,
        token_key: Vec<u8>,
    ) -> Self {
        Self {
            users,
            resets,
            sessions,
            email,
            token_key: Arc::new(token_key),
        }
    }

    /// Keyed hash of the issuance instant and user id, hex encoded.
    fn derive_token(&self, user_id: &str, now: DateTime<Utc>) -> Result<String, ServiceError> {
        let mut mac = HmacSha256::new_from_slice(&self.token_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Invalid token key: {}", e)))?;
        mac.update(now.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes());
        mac.update(user_id.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub async fn request_reset(
        &self,
        user: &User,
        browser: &str,
        os: &str,
    ) -> Result<String, ServiceError> {
        self.request_reset_at(user, browser, os, Utc::now()).await
    }

    /// Issues a one-hour token. `ResetAlreadyRequested` while an earlier
    /// token for the user is still live.
    pub async fn request_reset_at(
        &self,
        user: &User,
        browser: &str,
        os: &str,
        now: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        let token = self.derive_token(&user.id, now)?;
        let reset = PasswordReset::new(
            token.clone(),
            user.id.clone(),
            browser.to_string(),
            os.to_string(),
            now,
        );

        self.resets.insert_exclusive(&reset, now).await?;

        tracing::info!(user_id = %user.id, browser = %browser, os = %os, "Password reset requested");
        Ok(token)
    }

    /// Forgot-password entry point. Succeeds whether or not the address
    /// belongs to an account, so the caller can answer identically either way.
    pub async fn request_reset_for_email(
        &self,
        email: &str,
        user_agent: &str,
    ) -> Result<(), ServiceError> {
        let Some(user) = self.users.get_by_email(email).await? else {
            tracing::info!("Password reset requested for unknown address");
            return Ok(());
        };

        let agent = parse_user_agent(user_agent);
        let token = match self.request_reset(&user, &agent.browser, &agent.os).await {
            Ok(token) => token,
            Err(ServiceError::ResetAlreadyRequested) => {
                tracing::warn!(user_id = %user.id, "Password reset already outstanding");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self.email.send_password_reset_email(&user.email, &token).await {
            tracing::error!(user_id = %user.id, error = %e, "Failed to send password reset email");
        }

        Ok(())
    }

    pub async fn validate_token(&self, token: &str) -> Result<bool, ServiceError> {
        self.validate_token_at(token, Utc::now()).await
    }

    pub async fn validate_token_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        Ok(self
            .resets
            .find_by_id(token)
            .await?
            .is_some_and(|r| !r.is_expired_at(now)))
    }

    pub async fn consume(&self, token: &str, new_password: &Password) -> Result<(), ServiceError> {
        self.consume_at(token, new_password, Utc::now()).await
    }

    /// Replaces the user's password and revokes every session they hold.
    /// The token is removed before anything else so it works at most once.
    pub async fn consume_at(
        &self,
        token: &str,
        new_password: &Password,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        if new_password.is_empty() {
            return Err(ServiceError::ValidationError(
                "Password must not be empty".to_string(),
            ));
        }

        let reset = self
            .resets
            .take(token)
            .await?
            .ok_or(ServiceError::InvalidOrExpiredToken)?;
        if reset.is_expired_at(now) {
            return Err(ServiceError::InvalidOrExpiredToken);
        }

        let user = self
            .users
            .get_by_id(&reset.user_id)
            .await?
            .ok_or(ServiceError::InvalidOrExpiredToken)?;

        let password_hash = hash_password(new_password).map_err(|e| {
            ServiceError::Internal(anyhow::anyhow!("Password hashing error: {}", e))
        })?;
        self.users
            .set_password_hash(&user.id, password_hash.as_str())
            .await?;

        self.sessions.destroy_all_for_user(&user.id).await?;

        tracing::info!(user_id = %user.id, "Password reset successful");
        Ok(())
    }
}
