use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use service_core::error::AppError;

use super::user_agent;
use crate::{
    dtos::{
        auth::{ForgotPasswordRequest, ResetPasswordRequest, ResetTokenQuery, ResetTokenResponse},
        MessageResponse,
    },
    services::ServiceError,
    utils::{Password, ValidatedJson},
    AppState,
};

/// `POST /forgot`. The answer is the same whether or not the account exists.
pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .password_reset
        .request_reset_for_email(&req.email, &user_agent(&headers))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to process password reset request");
            e
        })?;

    Ok(Json(MessageResponse::new(format!(
        "An email was sent to {:?} if an account with that email address exists.",
        req.email
    ))))
}

/// `GET /reset-password?token=`
pub async fn reset_password_page(
    State(state): State<AppState>,
    Query(query): Query<ResetTokenQuery>,
) -> Result<Json<ResetTokenResponse>, AppError> {
    if query.token.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!("Missing reset token")));
    }

    if !state.password_reset.validate_token(&query.token).await? {
        return Err(ServiceError::InvalidOrExpiredToken.into());
    }

    Ok(Json(ResetTokenResponse { valid: true }))
}

/// `POST /reset-password`
pub async fn reset_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> Result<Response, AppError> {
    if req.password1.is_empty() || req.password2.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Both password fields are required"
        )));
    }
    if req.password1 != req.password2 {
        return Err(AppError::BadRequest(anyhow::anyhow!("Passwords do not match")));
    }

    state
        .password_reset
        .consume(&req.token, &Password::new(req.password1))
        .await?;

    Ok(Redirect::to("/sign-in").into_response())
}
