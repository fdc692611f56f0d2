mod common;

use actix_web::{test, App};
use serde_json::{json, Value};

use common::*;
use finds_server::api::configure_routes;
use finds_server::models::NotificationType;

#[actix_web::test]
async fn test_friend_request_accept_flow() {
    let state = test_state();
    let app = test::init_service(
        App::new().app_data(state.clone()).configure(configure_routes),
    )
    .await;

    let (alice, alice_token) = create_user(&state, "alice");
    let (bob, bob_token) = create_user(&state, "bob");

    let req = test::TestRequest::post()
        .uri("/api/friends")
        .insert_header(bearer(&alice_token))
        .set_json(json!({ "friendId": bob.id }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let body: Value = test::read_body_json(resp).await;
    let friendship_id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["status"], "pending");

    // bob sees the request under received
    let req = test::TestRequest::get()
        .uri("/api/friends?type=received")
        .insert_header(bearer(&bob_token))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let received = body["data"].as_array().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["friendUsername"], "alice");

    let req = test::TestRequest::patch()
        .uri(&format!("/api/friends/{}", friendship_id))
        .insert_header(bearer(&bob_token))
        .set_json(json!({ "action": "accept" }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["status"], "accepted");

    // both sides now list each other as friends
    for (token, expected) in [(&alice_token, "bob"), (&bob_token, "alice")] {
        let req = test::TestRequest::get()
            .uri("/api/friends")
            .insert_header(bearer(token))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let friends = body["data"].as_array().unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0]["friendUsername"], expected);
    }

    assert_eq!(state.store.friend_ids_of(&alice.id).unwrap(), vec![bob.id]);
}

#[actix_web::test]
async fn test_only_recipient_can_respond() {
    let state = test_state();
    let app = test::init_service(
        App::new().app_data(state.clone()).configure(configure_routes),
    )
    .await;

    let (_, alice_token) = create_user(&state, "alice");
    let (bob, bob_token) = create_user(&state, "bob");

    let req = test::TestRequest::post()
        .uri("/api/friends")
        .insert_header(bearer(&alice_token))
        .set_json(json!({ "friendId": bob.id }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let friendship_id = body["data"]["id"].as_str().unwrap().to_string();

    // the sender cannot accept their own request
    let req = test::TestRequest::patch()
        .uri(&format!("/api/friends/{}", friendship_id))
        .insert_header(bearer(&alice_token))
        .set_json(json!({ "action": "accept" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    // declining ends the request; it cannot be accepted afterwards
    let req = test::TestRequest::patch()
        .uri(&format!("/api/friends/{}", friendship_id))
        .insert_header(bearer(&bob_token))
        .set_json(json!({ "action": "decline" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let req = test::TestRequest::patch()
        .uri(&format!("/api/friends/{}", friendship_id))
        .insert_header(bearer(&bob_token))
        .set_json(json!({ "action": "accept" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);
}

#[actix_web::test]
async fn test_duplicate_request_conflicts_in_both_directions() {
    let state = test_state();
    let app = test::init_service(
        App::new().app_data(state.clone()).configure(configure_routes),
    )
    .await;

    let (alice, alice_token) = create_user(&state, "alice");
    let (bob, bob_token) = create_user(&state, "bob");

    let req = test::TestRequest::post()
        .uri("/api/friends")
        .insert_header(bearer(&alice_token))
        .set_json(json!({ "friendId": bob.id }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let req = test::TestRequest::post()
        .uri("/api/friends")
        .insert_header(bearer(&alice_token))
        .set_json(json!({ "friendId": bob.id }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);

    // the reverse direction is the same pair
    let req = test::TestRequest::post()
        .uri("/api/friends")
        .insert_header(bearer(&bob_token))
        .set_json(json!({ "friendId": alice.id }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);
}

#[actix_web::test]
async fn test_cannot_friend_self_or_unknown_user() {
    let state = test_state();
    let app = test::init_service(
        App::new().app_data(state.clone()).configure(configure_routes),
    )
    .await;
    let (alice, alice_token) = create_user(&state, "alice");

    let req = test::TestRequest::post()
        .uri("/api/friends")
        .insert_header(bearer(&alice_token))
        .set_json(json!({ "friendId": alice.id }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::post()
        .uri("/api/friends")
        .insert_header(bearer(&alice_token))
        .set_json(json!({ "friendId": "no-such-user" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn test_friend_request_and_accept_notifications() {
    let state = test_state();
    let app = test::init_service(
        App::new().app_data(state.clone()).configure(configure_routes),
    )
    .await;

    let (alice, alice_token) = create_user(&state, "alice");
    let (bob, bob_token) = create_user(&state, "bob");

    let req = test::TestRequest::post()
        .uri("/api/friends")
        .insert_header(bearer(&alice_token))
        .set_json(json!({ "friendId": bob.id }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let friendship_id = body["data"]["id"].as_str().unwrap().to_string();

    let bob_notifications = state.store.list_notifications(&bob.id, 50, 0, false).unwrap();
    assert_eq!(bob_notifications.len(), 1);
    assert_eq!(
        bob_notifications[0].notification_type,
        NotificationType::FriendRequest
    );

    let req = test::TestRequest::patch()
        .uri(&format!("/api/friends/{}", friendship_id))
        .insert_header(bearer(&bob_token))
        .set_json(json!({ "action": "accept" }))
        .to_request();
    test::call_service(&app, req).await;

    let alice_notifications = state.store.list_notifications(&alice.id, 50, 0, false).unwrap();
    assert_eq!(alice_notifications.len(), 1);
    assert_eq!(
        alice_notifications[0].notification_type,
        NotificationType::FriendAccepted
    );
}

#[actix_web::test]
async fn test_user_search_annotates_friendship() {
    let state = test_state();
    let app = test::init_service(
        App::new().app_data(state.clone()).configure(configure_routes),
    )
    .await;

    let (_, alice_token) = create_user(&state, "alice");
    let (bob, _) = create_user(&state, "bobby");
    create_user(&state, "bobcat");

    let req = test::TestRequest::post()
        .uri("/api/friends")
        .insert_header(bearer(&alice_token))
        .set_json(json!({ "friendId": bob.id }))
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::get()
        .uri("/api/users?q=bob")
        .insert_header(bearer(&alice_token))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let results = body["data"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    for result in results {
        if result["username"] == "bobby" {
            assert_eq!(result["friendshipStatus"], "pending");
        } else {
            assert!(result.get("friendshipStatus").is_none());
        }
    }

    // too-short queries are rejected
    let req = test::TestRequest::get()
        .uri("/api/users?q=b")
        .insert_header(bearer(&alice_token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}
