use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use crate::{
    dtos::ErrorResponse,
    models::{session::short_id, Session, User},
    services::ServiceError,
    AppState,
};

pub const SIGN_IN_PATH: &str = "/sign-in";
pub const ENTER_CODE_PATH: &str = "/enter-code";

/// Identity resolved by [`session_auth_middleware`], read-only downstream.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub session: Session,
}

/// Resolves cookie, then session, then user. No cookie or an unknown
/// session sends the client to sign in; an unknown session also clears the
/// cookie so it is not presented again.
pub async fn session_auth_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(cookie) = jar.get(state.cookies.name()) else {
        return Ok(Redirect::to(SIGN_IN_PATH).into_response());
    };

    let session_id = match state.cookies.decode(cookie.value()) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "Session cookie failed to decode");
            let jar = jar.add(state.cookies.expired_cookie());
            return Ok((jar, AppError::from(ServiceError::Cookie(e))).into_response());
        }
    };

    let Some(session) = state.sessions.find(&session_id).await? else {
        tracing::info!(session = %short_id(&session_id), "Cookie references unknown session");
        let jar = jar.add(state.cookies.expired_cookie());
        return Ok((jar, Redirect::to(SIGN_IN_PATH)).into_response());
    };

    let user = state.users.get_by_id(&session.user_id).await?.ok_or_else(|| {
        tracing::error!(user_id = %session.user_id, "Session owner no longer exists");
        AppError::InternalError(anyhow::anyhow!("Session owner not found"))
    })?;

    req.extensions_mut().insert(AuthContext { user, session });
    Ok(next.run(req).await)
}

/// Layered inside [`session_auth_middleware`] on routes that need a fresh
/// second factor.
pub async fn require_mfa_middleware(req: Request, next: Next) -> Result<Response, AppError> {
    let ctx = req.extensions().get::<AuthContext>().ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!("Auth context missing from request extensions"))
    })?;

    if ctx.user.has_2fa_enabled && ctx.session.has_mfa_expired() {
        tracing::debug!(user_id = %ctx.user.id, "Two-factor window expired; challenge required");
        return Ok(Redirect::to(ENTER_CODE_PATH).into_response());
    }

    Ok(next.run(req).await)
}

/// User id behind the request's cookie, if it names a live session. Used by
/// routes outside the gate such as sign-in.
pub async fn authenticated_user_id(
    state: &AppState,
    jar: &CookieJar,
) -> Result<Option<String>, AppError> {
    let Some(cookie) = jar.get(state.cookies.name()) else {
        return Ok(None);
    };
    let Ok(session_id) = state.cookies.decode(cookie.value()) else {
        return Ok(None);
    };
    Ok(state.sessions.authenticate(&session_id).await?)
}

fn missing_context() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "Auth context missing from request extensions".to_string(),
        }),
    )
}

pub struct AuthUser(pub User);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ctx = parts
            .extensions
            .get::<AuthContext>()
            .ok_or_else(missing_context)?;
        Ok(AuthUser(ctx.user.clone()))
    }
}

pub struct AuthSession(pub Session);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthSession
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ctx = parts
            .extensions
            .get::<AuthContext>()
            .ok_or_else(missing_context)?;
        Ok(AuthSession(ctx.session.clone()))
    }
}
