mod common;

use actix_web::{test, App};
use serde_json::{json, Value};

use common::*;
use finds_server::api::configure_routes;
use finds_server::models::NotificationType;

#[actix_web::test]
async fn test_create_and_list_comments() {
    let state = test_state();
    let app = test::init_service(
        App::new().app_data(state.clone()).configure(configure_routes),
    )
    .await;

    let (owner, _) = create_user(&state, "owner");
    let (_, commenter_token) = create_user(&state, "commenter");
    let find = create_find_at(&state, &owner.id, "spot", true, BRUSSELS.0, BRUSSELS.1);

    let req = test::TestRequest::post()
        .uri(&format!("/api/finds/{}/comments", find.id))
        .insert_header(bearer(&commenter_token))
        .set_json(json!({ "content": "  lovely place  " }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let body: Value = test::read_body_json(resp).await;
    // content is stored trimmed
    assert_eq!(body["data"]["content"], "lovely place");
    assert_eq!(body["data"]["user"]["username"], "commenter");

    let req = test::TestRequest::get()
        .uri(&format!("/api/finds/{}/comments", find.id))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let comments = body["data"].as_array().unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0]["content"], "lovely place");
}

#[actix_web::test]
async fn test_comment_validation() {
    let state = test_state();
    let app = test::init_service(
        App::new().app_data(state.clone()).configure(configure_routes),
    )
    .await;

    let (owner, token) = create_user(&state, "owner");
    let find = create_find_at(&state, &owner.id, "spot", true, BRUSSELS.0, BRUSSELS.1);

    let req = test::TestRequest::post()
        .uri(&format!("/api/finds/{}/comments", find.id))
        .insert_header(bearer(&token))
        .set_json(json!({ "content": "   " }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::post()
        .uri(&format!("/api/finds/{}/comments", find.id))
        .insert_header(bearer(&token))
        .set_json(json!({ "content": "x".repeat(501) }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    // exactly at the limit is fine
    let req = test::TestRequest::post()
        .uri(&format!("/api/finds/{}/comments", find.id))
        .insert_header(bearer(&token))
        .set_json(json!({ "content": "x".repeat(500) }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);
}

#[actix_web::test]
async fn test_comment_notifies_owner_but_not_self() {
    let state = test_state();
    let app = test::init_service(
        App::new().app_data(state.clone()).configure(configure_routes),
    )
    .await;

    let (owner, owner_token) = create_user(&state, "owner");
    let (_, commenter_token) = create_user(&state, "commenter");
    let find = create_find_at(&state, &owner.id, "spot", true, BRUSSELS.0, BRUSSELS.1);

    let req = test::TestRequest::post()
        .uri(&format!("/api/finds/{}/comments", find.id))
        .insert_header(bearer(&owner_token))
        .set_json(json!({ "content": "my own note" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);
    assert!(state
        .store
        .list_notifications(&owner.id, 50, 0, false)
        .unwrap()
        .is_empty());

    let req = test::TestRequest::post()
        .uri(&format!("/api/finds/{}/comments", find.id))
        .insert_header(bearer(&commenter_token))
        .set_json(json!({ "content": "nice one" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let notifications = state.store.list_notifications(&owner.id, 50, 0, false).unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(
        notifications[0].notification_type,
        NotificationType::FindCommented
    );
}

#[actix_web::test]
async fn test_delete_comment_authorization() {
    let state = test_state();
    let app = test::init_service(
        App::new().app_data(state.clone()).configure(configure_routes),
    )
    .await;

    let (owner, owner_token) = create_user(&state, "owner");
    let (_, author_token) = create_user(&state, "author");
    let (_, stranger_token) = create_user(&state, "stranger");
    let find = create_find_at(&state, &owner.id, "spot", true, BRUSSELS.0, BRUSSELS.1);

    let req = test::TestRequest::post()
        .uri(&format!("/api/finds/{}/comments", find.id))
        .insert_header(bearer(&author_token))
        .set_json(json!({ "content": "hello" }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let comment_id = body["data"]["id"].as_str().unwrap().to_string();

    // a bystander cannot delete
    let req = test::TestRequest::delete()
        .uri(&format!("/api/comments/{}", comment_id))
        .insert_header(bearer(&stranger_token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    // the author can
    let req = test::TestRequest::delete()
        .uri(&format!("/api/comments/{}", comment_id))
        .insert_header(bearer(&author_token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    // the find owner can moderate someone else's comment
    let req = test::TestRequest::post()
        .uri(&format!("/api/finds/{}/comments", find.id))
        .insert_header(bearer(&author_token))
        .set_json(json!({ "content": "hello again" }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let comment_id = body["data"]["id"].as_str().unwrap().to_string();
    let req = test::TestRequest::delete()
        .uri(&format!("/api/comments/{}", comment_id))
        .insert_header(bearer(&owner_token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    assert!(state.store.list_comments(&find.id).unwrap().is_empty());
}
