mod common;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
};
use board_auth::config::BoardAuthConfig;
use common::{json_body, location, session_cookie, TestApp, PASSWORD};
use serde_json::json;
use std::net::SocketAddr;

#[tokio::test]
async fn test_sign_in_sets_session_cookie() {
    let app = TestApp::new();
    app.create_user("alice@example.com", "alice").await;

    let res = app
        .post_json(
            "/sign-in",
            None,
            json!({ "email": "alice@example.com", "password": PASSWORD }),
        )
        .await;

    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), Some("/"));
    let cookie = session_cookie(&res).unwrap();
    assert!(cookie.starts_with("sid="));

    let res = app.get("/me", Some(&cookie)).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_bad_credentials_are_indistinguishable() {
    let app = TestApp::new();
    app.create_user("alice@example.com", "alice").await;

    let wrong_password = app
        .post_json(
            "/sign-in",
            None,
            json!({ "email": "alice@example.com", "password": "nope" }),
        )
        .await;
    let unknown_user = app
        .post_json(
            "/sign-in",
            None,
            json!({ "email": "bob@example.com", "password": PASSWORD }),
        )
        .await;

    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_user.status(), StatusCode::UNAUTHORIZED);
    assert!(session_cookie(&wrong_password).is_none());
    assert_eq!(json_body(wrong_password).await, json_body(unknown_user).await);
}

#[tokio::test]
async fn test_malformed_sign_in_rejected() {
    let app = TestApp::new();

    let res = app
        .post_json("/sign-in", None, json!({ "email": "not-an-email", "password": "x" }))
        .await;

    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_sign_in_when_already_signed_in() {
    let app = TestApp::new();
    let user = app.create_user("alice@example.com", "alice").await;
    let cookie = app.sign_in("alice@example.com").await;

    let res = app
        .post_json(
            "/sign-in",
            Some(&cookie),
            json!({ "email": "alice@example.com", "password": PASSWORD }),
        )
        .await;

    assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&res), Some("/"));
    assert_eq!(
        app.state.sessions.get_by_user(&user.id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_sign_out_revokes_session() {
    let app = TestApp::new();
    let user = app.create_user("alice@example.com", "alice").await;
    let cookie = app.sign_in("alice@example.com").await;

    let res = app.get("/sign-out", Some(&cookie)).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), Some("/sign-in"));
    assert!(app.state.sessions.get_by_user(&user.id).await.unwrap().is_empty());

    let res = app.get("/me", Some(&cookie)).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), Some("/sign-in"));
}

#[tokio::test]
async fn test_sign_in_rate_limited_per_ip() {
    let mut config = BoardAuthConfig::for_tests();
    config.rate_limit.sign_in_attempts = 2;
    let app = TestApp::with_config(config);

    // One peer rotating X-Forwarded-For still shares a single budget.
    let attempt = |forwarded_for: &str| {
        let mut req = Request::builder()
            .method("POST")
            .uri("/sign-in")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", forwarded_for)
            .body(Body::from(
                json!({ "email": "alice@example.com", "password": "nope" }).to_string(),
            ))
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([203, 0, 113, 9], 50000))));
        req
    };

    assert_eq!(
        app.send(attempt("198.51.100.1")).await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        app.send(attempt("198.51.100.2")).await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        app.send(attempt("198.51.100.3")).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}
