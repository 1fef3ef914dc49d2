use std::sync::{Arc, OnceLock};

use super::session::SessionService;
use super::store::UserStore;
use super::ServiceError;
use crate::models::User;
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

/// Hash checked when the email is unknown, so both failure paths cost one
/// Argon2 verification.
fn dummy_hash() -> Option<&'static PasswordHashString> {
    static DUMMY: OnceLock<Option<PasswordHashString>> = OnceLock::new();
    DUMMY
        .get_or_init(|| hash_password(&Password::new("unused-dummy-password".into())).ok())
        .as_ref()
}

/// Credential check and session issuance.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    sessions: SessionService,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserStore>, sessions: SessionService) -> Self {
        Self { users, sessions }
    }

    /// Returns the new session id and the signed-in user. Unknown email and
    /// wrong password are indistinguishable to the caller.
    pub async fn sign_in(
        &self,
        email: &str,
        password: &Password,
        ip: &str,
        user_agent: &str,
    ) -> Result<(String, User), ServiceError> {
        let Some(user) = self.users.get_by_email(email).await? else {
            if let Some(hash) = dummy_hash() {
                let _ = verify_password(password, hash);
            }
            tracing::warn!("Sign-in for unknown email");
            return Err(ServiceError::InvalidCredentials);
        };

        let matches = verify_password(
            password,
            &PasswordHashString::new(user.password_hash.clone()),
        )
        .map_err(|e| {
            tracing::error!(user_id = %user.id, error = %e, "Stored password hash is unreadable");
            ServiceError::InvalidCredentials
        })?;

        if !matches {
            tracing::warn!(user_id = %user.id, "Sign-in with incorrect password");
            return Err(ServiceError::InvalidCredentials);
        }

        let session_id = self.sessions.create(&user, ip, user_agent).await?;
        tracing::info!(user_id = %user.id, "User signed in");

        Ok((session_id, user))
    }
}
