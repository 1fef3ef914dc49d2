use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use super::{user_agent, ClientIp};
use crate::{
    dtos::auth::SignInRequest,
    middleware::{auth::authenticated_user_id, AuthSession},
    services::ServiceError,
    utils::{Password, ValidatedJson},
    AppState,
};

/// `POST /sign-in`
pub async fn sign_in(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<SignInRequest>,
) -> Result<Response, AppError> {
    if authenticated_user_id(&state, &jar).await?.is_some() {
        return Ok(Redirect::temporary("/").into_response());
    }

    let (session_id, _user) = state
        .auth_service
        .sign_in(
            &req.email,
            &Password::new(req.password),
            &ip,
            &user_agent(&headers),
        )
        .await?;

    let cookie = state
        .cookies
        .session_cookie(&session_id)
        .map_err(ServiceError::from)?;

    Ok((jar.add(cookie), Redirect::to("/")).into_response())
}

/// `GET /sign-out`
pub async fn sign_out(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    jar: CookieJar,
) -> Result<Response, AppError> {
    match state.sessions.destroy(&session.id).await {
        // Already revoked elsewhere; the cookie still has to go.
        Ok(()) | Err(ServiceError::SessionNotFound) => {}
        Err(e) => return Err(e.into()),
    }

    tracing::info!(user_id = %session.user_id, "User signed out");
    Ok((jar.add(state.cookies.expired_cookie()), Redirect::to("/sign-in")).into_response())
}
