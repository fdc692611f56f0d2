mod common;

use actix_web::{test, App};
use serde_json::{json, Value};

use common::*;
use finds_server::api::configure_routes;

#[actix_web::test]
async fn test_register_validation_and_success() {
    let state = test_state();
    let app = test::init_service(
        App::new().app_data(state.clone()).configure(configure_routes),
    )
    .await;

    // short username, short password, bad email
    for payload in [
        json!({ "username": "ab", "email": "a@b.com", "password": "password123" }),
        json!({ "username": "alice", "email": "a@b.com", "password": "short" }),
        json!({ "username": "alice", "email": "not-an-email", "password": "password123" }),
    ] {
        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(payload)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);
    }

    let req = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({ "username": "alice", "email": "alice@example.com", "password": "password123" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["data"]["token"].as_str().unwrap().len() > 20);
    assert_eq!(body["data"]["user"]["username"], "alice");
    // password hash never leaves the server
    assert!(body["data"]["user"].get("password_hash").is_none());

    // duplicate username
    let req = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({ "username": "alice", "email": "other@example.com", "password": "password123" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);
}

#[actix_web::test]
async fn test_login_and_me() {
    let state = test_state();
    let app = test::init_service(
        App::new().app_data(state.clone()).configure(configure_routes),
    )
    .await;
    create_user(&state, "alice");

    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "username": "alice", "password": "wrong" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "username": "alice", "password": "password123" }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["success"], true);
    let token = body["data"]["token"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .insert_header(bearer(&token))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["username"], "alice");

    let req = test::TestRequest::get().uri("/api/auth/me").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .insert_header(("Authorization", "Bearer garbage"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);
}

#[actix_web::test]
async fn test_profile_picture_update_is_materialized() {
    let state = test_state();
    let app = test::init_service(
        App::new().app_data(state.clone()).configure(configure_routes),
    )
    .await;
    let (_, token) = create_user(&state, "alice");

    let req = test::TestRequest::patch()
        .uri("/api/auth/me")
        .insert_header(bearer(&token))
        .set_json(json!({ "profilePictureUrl": "avatars/alice.webp" }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(
        body["data"]["profile_picture_url"],
        "/api/media/avatars/alice.webp"
    );
}
