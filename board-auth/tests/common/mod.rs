//! Shared setup for board-auth integration tests: in-memory stores, a
//! recording mailer and helpers for driving the router.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use board_auth::{
    build_router,
    config::BoardAuthConfig,
    models::{Session, User},
    services::{
        MemoryPasswordResetStore, MemorySessionStore, MemoryUserStore, MockEmailService, UserStore,
    },
    utils::{hash_password, Password},
    AppState,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
use tower::ServiceExt;

pub const PASSWORD: &str = "correct horse battery";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub users: Arc<MemoryUserStore>,
    pub session_store: Arc<MemorySessionStore>,
    pub mail: MockEmailService,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(BoardAuthConfig::for_tests())
    }

    pub fn with_config(config: BoardAuthConfig) -> Self {
        let users = Arc::new(MemoryUserStore::new());
        let session_store = Arc::new(MemorySessionStore::new());
        let mail = MockEmailService::new();

        let state = AppState::new(
            config,
            users.clone(),
            session_store.clone(),
            Arc::new(MemoryPasswordResetStore::new()),
            Arc::new(mail.clone()),
        )
        .expect("test state");

        Self {
            router: build_router(state.clone()),
            state,
            users,
            session_store,
            mail,
        }
    }

    pub async fn create_user(&self, email: &str, name: &str) -> User {
        let hash = hash_password(&Password::new(PASSWORD.to_string())).unwrap();
        let user = User::new(email.to_string(), name.to_string(), hash.into_string());
        self.users.insert(&user).await.unwrap();
        user
    }

    pub async fn reload(&self, user: &User) -> User {
        self.users.get_by_id(&user.id).await.unwrap().unwrap()
    }

    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.unwrap()
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, cookie: Option<&str>, body: Value) -> Response<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(
                header::USER_AGENT,
                "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
            );
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn post_empty(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Signs in through the HTTP endpoint and returns the `Cookie` header value.
    pub async fn sign_in(&self, email: &str) -> String {
        let res = self
            .post_json(
                "/sign-in",
                None,
                serde_json::json!({ "email": email, "password": PASSWORD }),
            )
            .await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        session_cookie(&res).expect("sign-in sets the session cookie")
    }

    /// `Cookie` header value naming an arbitrary session id.
    pub fn cookie_for(&self, session_id: &str) -> String {
        format!(
            "{}={}",
            self.state.cookies.name(),
            self.state.cookies.encode(session_id).unwrap()
        )
    }

    pub fn session_id(&self, cookie: &str) -> String {
        let value = cookie.split_once('=').unwrap().1;
        self.state.cookies.decode(value).unwrap()
    }

    pub async fn session(&self, cookie: &str) -> Session {
        self.state.sessions.get(&self.session_id(cookie)).await.unwrap()
    }

    /// Puts the cookie's session past its two-factor window.
    pub async fn expire_mfa(&self, cookie: &str) {
        let mut session = self.session(cookie).await;
        session.mfa_expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        self.state.sessions.update(&session).await.unwrap();
    }

    /// Enrolls `user` in two-factor through the HTTP endpoints and returns the
    /// issued recovery codes.
    pub async fn enable_two_factor(&self, user: &User, cookie: &str) -> Vec<String> {
        let res = self.get("/two-factor/enable", Some(cookie)).await;
        assert_eq!(res.status(), StatusCode::OK);

        let code = current_code(&self.reload(user).await);
        let res = self
            .post_json(
                "/two-factor/enable",
                Some(cookie),
                serde_json::json!({ "code": code }),
            )
            .await;
        assert_eq!(res.status(), StatusCode::OK);

        json_body(res).await["recovery_codes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c.as_str().unwrap().to_string())
            .collect()
    }
}

/// `name=value` from the response's `Set-Cookie`, if any.
pub fn session_cookie(res: &Response<Body>) -> Option<String> {
    res.headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_string())
}

pub fn set_cookie_header(res: &Response<Body>) -> Option<String> {
    res.headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

pub fn location(res: &Response<Body>) -> Option<&str> {
    res.headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
}

pub async fn json_body(res: Response<Body>) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn current_code(user: &User) -> String {
    let secret = Secret::Encoded(user.totp_secret.clone().expect("enrollment started"))
        .to_bytes()
        .unwrap();
    TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        secret,
        Some("board".to_string()),
        user.email.clone(),
    )
    .unwrap()
    .generate_current()
    .unwrap()
}
