use service_core::error::AppError;
use thiserror::Error;

use super::cookie::CookieError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User already exists")]
    UserAlreadyExists,

    #[error("User not found")]
    UserNotFound,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session was removed during update")]
    SessionVanished,

    #[error("A password reset has already been requested for this account")]
    ResetAlreadyRequested,

    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("Two-factor authentication is already enabled")]
    MfaAlreadyEnabled,

    #[error("Two-factor authentication is not enabled")]
    MfaNotEnabled,

    #[error("Two-factor enrollment has not been started")]
    MfaNotProvisioned,

    #[error("Invalid authentication code")]
    InvalidMfaCode,

    #[error("Cookie error: {0}")]
    Cookie(#[from] CookieError),

    #[error("Email error: {0}")]
    EmailError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Database(e) => AppError::DatabaseError(e.into()),
            ServiceError::StoreUnavailable(e) => AppError::DatabaseError(anyhow::anyhow!(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::InvalidCredentials => {
                AppError::AuthError(anyhow::anyhow!("Invalid credentials supplied"))
            }
            ServiceError::UserAlreadyExists => {
                AppError::Conflict(anyhow::anyhow!("User already exists"))
            }
            ServiceError::UserNotFound => AppError::NotFound(anyhow::anyhow!("User not found")),
            ServiceError::SessionNotFound => {
                AppError::NotFound(anyhow::anyhow!("Session not found"))
            }
            ServiceError::SessionVanished => {
                AppError::InternalError(anyhow::anyhow!("Session was removed during update"))
            }
            ServiceError::ResetAlreadyRequested => AppError::Conflict(anyhow::anyhow!(
                "A password reset has already been requested for this account"
            )),
            ServiceError::InvalidOrExpiredToken => {
                AppError::BadRequest(anyhow::anyhow!("Invalid or expired token"))
            }
            ServiceError::MfaAlreadyEnabled => AppError::Conflict(anyhow::anyhow!(
                "Two-factor authentication is already enabled"
            )),
            ServiceError::MfaNotEnabled => AppError::BadRequest(anyhow::anyhow!(
                "Two-factor authentication is not enabled"
            )),
            ServiceError::MfaNotProvisioned => AppError::BadRequest(anyhow::anyhow!(
                "Two-factor enrollment has not been started"
            )),
            ServiceError::InvalidMfaCode => {
                AppError::BadRequest(anyhow::anyhow!("Invalid authentication code"))
            }
            ServiceError::Cookie(e) => AppError::InternalError(e.into()),
            ServiceError::EmailError(e) => AppError::EmailError(e),
            ServiceError::ValidationError(e) => AppError::BadRequest(anyhow::anyhow!(e)),
        }
    }
}
