use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{
        two_factor::{
            ConfirmTwoFactorRequest, EnrollmentResponse, EnterCodeRequest, EnterCodeResponse,
            RecoveryCodesResponse,
        },
        MessageResponse,
    },
    middleware::{AuthSession, AuthUser},
    services::ServiceError,
    utils::ValidatedJson,
    AppState,
};

const ENABLED_MESSAGE: &str = "Two-factor authentication has been enabled";
const DISABLED_MESSAGE: &str = "Two-factor authentication has been disabled";

/// `GET /two-factor/enable`. Provisions a new secret each time it is called.
pub async fn begin_two_factor(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<EnrollmentResponse>, AppError> {
    let enrollment = state.mfa.begin_enrollment(&user).await?;

    Ok(Json(EnrollmentResponse {
        secret: enrollment.secret,
        qr_code: enrollment.qr_code,
        otpauth_url: enrollment.otpauth_url,
        duration_options: state.mfa.duration_options().to_vec(),
    }))
}

/// `POST /two-factor/enable`
pub async fn confirm_two_factor(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AuthSession(session): AuthSession,
    ValidatedJson(req): ValidatedJson<ConfirmTwoFactorRequest>,
) -> Result<Json<RecoveryCodesResponse>, AppError> {
    let codes = state
        .mfa
        .confirm_enrollment(&user, &session, &req.code, req.duration_seconds)
        .await?;

    state.sessions.add_flash(&session.id, ENABLED_MESSAGE).await?;

    Ok(Json(RecoveryCodesResponse {
        message: Some(ENABLED_MESSAGE.to_string()),
        recovery_codes: codes,
    }))
}

/// `POST /two-factor/disable`
pub async fn disable_two_factor(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AuthSession(session): AuthSession,
) -> Result<Response, AppError> {
    state.mfa.disable(&user).await?;
    state.sessions.add_flash(&session.id, DISABLED_MESSAGE).await?;
    Ok(Redirect::to("/me").into_response())
}

/// `GET /recovery-codes`
pub async fn get_recovery_codes(
    AuthUser(user): AuthUser,
) -> Result<Json<RecoveryCodesResponse>, AppError> {
    if !user.has_2fa_enabled {
        return Err(ServiceError::MfaNotEnabled.into());
    }

    Ok(Json(RecoveryCodesResponse {
        message: None,
        recovery_codes: user.recovery_codes,
    }))
}

/// `POST /recovery-codes`. Replaces every existing code.
pub async fn regenerate_recovery_codes(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<RecoveryCodesResponse>, AppError> {
    if !user.has_2fa_enabled {
        return Err(ServiceError::MfaNotEnabled.into());
    }

    let codes = state.mfa.generate_recovery_codes(&user).await?;
    Ok(Json(RecoveryCodesResponse {
        message: Some("New recovery codes generated".to_string()),
        recovery_codes: codes,
    }))
}

/// `GET /enter-code`. Only meaningful while a challenge is actually due.
pub async fn enter_code_page(
    AuthUser(user): AuthUser,
    AuthSession(session): AuthSession,
) -> Result<Response, AppError> {
    if !user.has_2fa_enabled {
        return Err(ServiceError::MfaNotEnabled.into());
    }

    if !session.has_mfa_expired() {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Two-factor authentication is not currently required"
        )));
    }

    Ok((
        StatusCode::OK,
        Json(MessageResponse::new("Enter your authentication code")),
    )
        .into_response())
}

/// `POST /enter-code`. Accepts a TOTP code or an unused recovery code.
pub async fn submit_code(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AuthSession(session): AuthSession,
    ValidatedJson(req): ValidatedJson<EnterCodeRequest>,
) -> Result<Json<EnterCodeResponse>, AppError> {
    let outcome = state
        .mfa
        .verify_challenge(&user, &session, &req.code)
        .await?;

    Ok(Json(EnterCodeResponse {
        used_recovery_code: outcome.used_recovery_code,
        remaining_recovery_codes: outcome.remaining_recovery_codes,
    }))
}
