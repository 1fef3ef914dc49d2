use axum::{
    extract::{Path, State},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use crate::{
    dtos::session::{MeResponse, SessionView, SessionsResponse},
    middleware::{AuthSession, AuthUser},
    utils::{obfuscate_email, parse_user_agent},
    AppState,
};

/// `GET /me`. Consumes the pending flash message.
pub async fn me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AuthSession(session): AuthSession,
) -> Result<Json<MeResponse>, AppError> {
    let flash = state.sessions.take_flash(&session.id).await?;
    Ok(Json(MeResponse {
        user: user.sanitized(),
        flash,
    }))
}

/// `GET /me/sessions`
pub async fn list_sessions(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AuthSession(current): AuthSession,
) -> Result<Json<SessionsResponse>, AppError> {
    let sessions = state
        .sessions
        .get_by_user(&user.id)
        .await?
        .into_iter()
        .enumerate()
        .map(|(index, s)| {
            let agent = parse_user_agent(&s.user_agent);
            SessionView {
                index,
                is_current: s.id == current.id,
                ip: s.ip,
                browser: agent.browser,
                os: agent.os,
                created_at: s.created_at,
            }
        })
        .collect();

    Ok(Json(SessionsResponse {
        account: obfuscate_email(&user.email),
        sessions,
    }))
}

/// `POST /me/sessions/:index/revoke`. Revoking the current session signs
/// the caller out.
pub async fn revoke_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AuthSession(current): AuthSession,
    Path(index): Path<usize>,
    jar: CookieJar,
) -> Result<Response, AppError> {
    let target = state.sessions.destroy_by_index(&user.id, index).await?;
    tracing::info!(user_id = %user.id, index, "Session revoked");

    if target.id == current.id {
        return Ok((jar.add(state.cookies.expired_cookie()), Redirect::to("/sign-in")).into_response());
    }

    state.sessions.add_flash(&current.id, "Session revoked").await?;
    Ok(Redirect::to("/me/sessions").into_response())
}
