mod common;

use axum::http::StatusCode;
use common::test_app;
use serde_json::json;

#[tokio::test]
async fn register_then_use_the_session() {
    let app = test_app().await;
    let alice = app.register("alice").await;

    let (status, body) = app.get("/account/profile", Some(&alice.token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "alice");
    assert!(body["data"].get("passwd_hash").is_none());

    let uri = format!("/account/profile?api_key={}", alice.api_key);
    let (status, body) = app.get(&uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], alice.id);

    let (status, _) = app.get("/account/profile", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.get("/account/profile?api_key=nope", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn duplicate_names_are_rejected() {
    let app = test_app().await;
    app.register("alice").await;
    let (status, body) = app
        .post(
            "/account/register",
            None,
            json!({
                "fullname": "Other Alice",
                "name": "alice",
                "email_addr": "other@example.com",
                "password": "secret",
                "confirm": "secret",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn signin_errors() {
    let app = test_app().await;
    app.register("alice").await;

    let (status, body) = app
        .post(
            "/account/signin",
            None,
            json!({"email": "alice@example.com", "password": "wrong"}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Ooops, Incorrect email/password");

    let (status, body) = app
        .post(
            "/account/signin",
            None,
            json!({"email": "nobody@example.com", "password": "wrong"}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        body["message"],
        "Ooops, we didn't find you in the system, did you sign up?"
    );

    let (status, body) = app
        .post(
            "/account/signin",
            None,
            json!({"email": "alice@example.com", "password": "p4ssw0rd"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["token"].is_string());
}

#[tokio::test]
async fn api_key_reset_is_owner_only() {
    let app = test_app().await;
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;

    let (status, _) = app.post("/account/alice/resetapikey", None, json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app
        .post("/account/alice/resetapikey", Some(&bob.token), json!({}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app
        .post("/account/nobody/resetapikey", Some(&bob.token), json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .post("/account/alice/resetapikey", Some(&alice.token), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(body["data"], alice.api_key);
}

#[tokio::test]
async fn reset_password_needs_a_valid_key() {
    let app = test_app().await;
    app.register("alice").await;

    let (status, _) = app
        .post(
            "/account/reset-password",
            None,
            json!({"key": "garbage", "new_password": "n3w", "confirm": "n3w"}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.get("/account/register/confirmation", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn public_profiles() {
    let app = test_app().await;
    app.register("alice").await;

    let (status, body) = app.get("/account/alice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["name"], "alice");
    assert_eq!(body["data"]["signup_method"], "local");
    assert!(body["data"]["user"].get("email_addr").is_none());

    let (status, _) = app.get("/account/nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.get("/account", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 2);
}
