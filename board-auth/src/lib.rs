pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    rate_limit::{ip_rate_limit_middleware, ClientIpSource, IpRateLimit},
    security_headers::{security_headers_middleware, SecurityHeaders},
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::BoardAuthConfig;
use crate::services::{
    AuthService, CookieCodec, EmailProvider, MfaService, MfaSettings, PasswordResetService,
    PasswordResetStore, ServiceError, SessionService, SessionSettings, SessionStore, UserStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BoardAuthConfig>,
    pub cookies: Arc<CookieCodec>,
    pub users: Arc<dyn UserStore>,
    pub sessions: SessionService,
    pub mfa: MfaService,
    pub password_reset: PasswordResetService,
    pub auth_service: AuthService,
    pub client_ip_source: ClientIpSource,
    pub sign_in_rate_limiter: IpRateLimit,
    pub forgot_rate_limiter: IpRateLimit,
    pub security_headers: Arc<SecurityHeaders>,
}

impl AppState {
    /// Wires every service from one configuration and the injected stores.
    pub fn new(
        config: BoardAuthConfig,
        users: Arc<dyn UserStore>,
        session_store: Arc<dyn SessionStore>,
        reset_store: Arc<dyn PasswordResetStore>,
        email: Arc<dyn EmailProvider>,
    ) -> Result<Self, AppError> {
        let cookies = CookieCodec::from_config(&config.cookie).map_err(ServiceError::from)?;

        let sessions = SessionService::new(
            session_store,
            SessionSettings {
                list_max_age_seconds: config.session.list_max_age_seconds,
                default_mfa_duration_seconds: config.two_factor.default_duration_seconds,
            },
        );

        let mfa = MfaService::new(
            users.clone(),
            sessions.clone(),
            MfaSettings {
                issuer: config.two_factor.issuer.clone(),
                default_duration_seconds: config.two_factor.default_duration_seconds,
                duration_options: config.two_factor.duration_options.clone(),
            },
        );

        let password_reset = PasswordResetService::new(
            users.clone(),
            reset_store,
            sessions.clone(),
            email,
            config.cookie.primary_hash_key()?,
        );

        let auth_service = AuthService::new(users.clone(), sessions.clone());

        let security_headers = SecurityHeaders::new(&config.security.csp)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid CSP source: {}", e)))?;

        let client_ip_source = ClientIpSource::from_trust_proxy(config.security.trust_proxy);

        Ok(Self {
            client_ip_source,
            sign_in_rate_limiter: IpRateLimit::new(
                config.rate_limit.sign_in_attempts,
                config.rate_limit.sign_in_window_seconds,
                client_ip_source,
            ),
            forgot_rate_limiter: IpRateLimit::new(
                config.rate_limit.forgot_attempts,
                config.rate_limit.forgot_window_seconds,
                client_ip_source,
            ),
            config: Arc::new(config),
            cookies: Arc::new(cookies),
            users,
            sessions,
            mfa,
            password_reset,
            auth_service,
            security_headers: Arc::new(security_headers),
        })
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        // Credentialed CORS cannot use a wildcard origin.
        .filter(|o| o.as_str() != "*")
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(REQUEST_ID_HEADER)])
        .allow_credentials(true)
}

pub fn build_router(state: AppState) -> Router {
    let sign_in_route = Router::new()
        .route("/sign-in", post(handlers::sign_in))
        .layer(from_fn_with_state(
            state.sign_in_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let forgot_route = Router::new()
        .route("/forgot", post(handlers::forgot_password))
        .layer(from_fn_with_state(
            state.forgot_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    // Session required, a pending two-factor challenge is fine.
    let session_routes = Router::new()
        .route(
            "/two-factor/enable",
            get(handlers::begin_two_factor).post(handlers::confirm_two_factor),
        )
        .route(
            "/enter-code",
            get(handlers::enter_code_page).post(handlers::submit_code),
        );

    // Session and a current second factor required.
    let protected_routes = Router::new()
        .route("/sign-out", get(handlers::sign_out))
        .route("/me", get(handlers::me))
        .route("/me/sessions", get(handlers::list_sessions))
        .route("/me/sessions/:index/revoke", post(handlers::revoke_session))
        .route("/two-factor/disable", post(handlers::disable_two_factor))
        .route(
            "/recovery-codes",
            get(handlers::get_recovery_codes).post(handlers::regenerate_recovery_codes),
        )
        .layer(from_fn(middleware::require_mfa_middleware));

    let gated = session_routes
        .merge(protected_routes)
        .layer(from_fn_with_state(
            state.clone(),
            middleware::session_auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/reset-password",
            get(handlers::reset_password_page).post(handlers::reset_password),
        )
        .merge(sign_in_route)
        .merge(forgot_route)
        .merge(gated)
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn_with_state(
            state.security_headers.clone(),
            security_headers_middleware,
        ))
        .layer(cors_layer(&state.config.security.allowed_origins))
}

/// Service health check; fails when the session store is unreachable.
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.sessions.ping().await.map_err(|e| {
        tracing::error!(error = %e, "Session store health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
    })))
}
