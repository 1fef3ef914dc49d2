mod common;

use axum::http::StatusCode;
use common::{json_body, location, session_cookie, TestApp, PASSWORD};
use serde_json::json;

const NEW_PASSWORD: &str = "a brand new passphrase";

async fn request_reset(app: &TestApp, email: &str) -> StatusCode {
    app.post_json("/forgot", None, json!({ "email": email }))
        .await
        .status()
}

#[tokio::test]
async fn test_forgot_is_neutral() {
    let app = TestApp::new();
    app.create_user("alice@example.com", "alice").await;

    let known = app
        .post_json("/forgot", None, json!({ "email": "alice@example.com" }))
        .await;
    let unknown = app
        .post_json("/forgot", None, json!({ "email": "nobody@example.com" }))
        .await;

    assert_eq!(known.status(), StatusCode::OK);
    assert_eq!(unknown.status(), StatusCode::OK);
    assert_eq!(
        json_body(unknown).await["message"],
        "An email was sent to \"nobody@example.com\" if an account with that email address exists."
    );

    let sent = app.mail.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "alice@example.com");
}

#[tokio::test]
async fn test_repeat_forgot_sends_one_email() {
    let app = TestApp::new();
    app.create_user("alice@example.com", "alice").await;

    assert_eq!(request_reset(&app, "alice@example.com").await, StatusCode::OK);
    assert_eq!(request_reset(&app, "alice@example.com").await, StatusCode::OK);

    assert_eq!(app.mail.sent().len(), 1);
}

#[tokio::test]
async fn test_reset_page_validates_token() {
    let app = TestApp::new();
    app.create_user("alice@example.com", "alice").await;
    request_reset(&app, "alice@example.com").await;
    let token = app.mail.sent()[0].reset_token.clone();

    let res = app
        .get(&format!("/reset-password?token={}", token), None)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["valid"], true);

    let res = app.get("/reset-password?token=bogus", None).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app.get("/reset-password", None).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reset_password_end_to_end() {
    let app = TestApp::new();
    let user = app.create_user("alice@example.com", "alice").await;
    let cookie = app.sign_in("alice@example.com").await;
    request_reset(&app, "alice@example.com").await;
    let token = app.mail.sent()[0].reset_token.clone();

    let res = app
        .post_json(
            "/reset-password",
            None,
            json!({ "token": token, "password1": NEW_PASSWORD, "password2": NEW_PASSWORD }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), Some("/sign-in"));

    // Every session was revoked.
    assert!(app.state.sessions.get_by_user(&user.id).await.unwrap().is_empty());
    assert_eq!(location(&app.get("/me", Some(&cookie)).await), Some("/sign-in"));

    let old = app
        .post_json(
            "/sign-in",
            None,
            json!({ "email": "alice@example.com", "password": PASSWORD }),
        )
        .await;
    assert_eq!(old.status(), StatusCode::UNAUTHORIZED);

    let new = app
        .post_json(
            "/sign-in",
            None,
            json!({ "email": "alice@example.com", "password": NEW_PASSWORD }),
        )
        .await;
    assert_eq!(new.status(), StatusCode::SEE_OTHER);
    assert!(session_cookie(&new).is_some());

    // Single use.
    let res = app
        .post_json(
            "/reset-password",
            None,
            json!({ "token": token, "password1": NEW_PASSWORD, "password2": NEW_PASSWORD }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reset_password_mismatch_keeps_token() {
    let app = TestApp::new();
    app.create_user("alice@example.com", "alice").await;
    request_reset(&app, "alice@example.com").await;
    let token = app.mail.sent()[0].reset_token.clone();

    let res = app
        .post_json(
            "/reset-password",
            None,
            json!({ "token": token, "password1": "one", "password2": "two" }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app
        .post_json("/reset-password", None, json!({ "token": token, "password1": "" }))
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app
        .get(&format!("/reset-password?token={}", token), None)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_new_request_allowed_after_reset() {
    let app = TestApp::new();
    app.create_user("alice@example.com", "alice").await;
    request_reset(&app, "alice@example.com").await;
    let token = app.mail.sent()[0].reset_token.clone();

    app.post_json(
        "/reset-password",
        None,
        json!({ "token": token, "password1": NEW_PASSWORD, "password2": NEW_PASSWORD }),
    )
    .await;
    request_reset(&app, "alice@example.com").await;

    let sent = app.mail.sent();
    assert_eq!(sent.len(), 2);
    assert_ne!(sent[0].reset_token, sent[1].reset_token);
}
