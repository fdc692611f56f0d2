mod common;

use actix_web::{test, App};
use serde_json::{json, Value};

use common::*;
use finds_server::api::configure_routes;

#[actix_web::test]
async fn test_preferences_default_to_all_enabled() {
    let state = test_state();
    let app = test::init_service(
        App::new().app_data(state.clone()).configure(configure_routes),
    )
    .await;
    let (_, token) = create_user(&state, "alice");

    let req = test::TestRequest::get()
        .uri("/api/notifications/preferences")
        .insert_header(bearer(&token))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let prefs = &body["data"];
    assert_eq!(prefs["push_enabled"], true);
    assert_eq!(prefs["friend_requests"], true);
    assert_eq!(prefs["find_liked"], true);
}

#[actix_web::test]
async fn test_disabled_preference_suppresses_notification() {
    let state = test_state();
    let app = test::init_service(
        App::new().app_data(state.clone()).configure(configure_routes),
    )
    .await;

    let (owner, owner_token) = create_user(&state, "owner");
    let (_, liker_token) = create_user(&state, "liker");
    let find = create_find_at(&state, &owner.id, "spot", true, BRUSSELS.0, BRUSSELS.1);

    let req = test::TestRequest::put()
        .uri("/api/notifications/preferences")
        .insert_header(bearer(&owner_token))
        .set_json(json!({ "findLiked": false }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["find_liked"], false);

    let req = test::TestRequest::post()
        .uri(&format!("/api/finds/{}/like", find.id))
        .insert_header(bearer(&liker_token))
        .to_request();
    // the like succeeds even though the notification is suppressed
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    assert!(state
        .store
        .list_notifications(&owner.id, 50, 0, false)
        .unwrap()
        .is_empty());

    // an unrelated type still gets through
    let (_, bob_token) = create_user(&state, "bob");
    let req = test::TestRequest::post()
        .uri("/api/friends")
        .insert_header(bearer(&bob_token))
        .set_json(json!({ "friendId": owner.id }))
        .to_request();
    test::call_service(&app, req).await;
    assert_eq!(
        state
            .store
            .list_notifications(&owner.id, 50, 0, false)
            .unwrap()
            .len(),
        1
    );
}

#[actix_web::test]
async fn test_list_and_mark_read() {
    let state = test_state();
    let app = test::init_service(
        App::new().app_data(state.clone()).configure(configure_routes),
    )
    .await;

    let (owner, owner_token) = create_user(&state, "owner");
    let find = create_find_at(&state, &owner.id, "spot", true, BRUSSELS.0, BRUSSELS.1);
    for name in ["u1", "u2"] {
        let (_, token) = create_user(&state, name);
        let req = test::TestRequest::post()
            .uri(&format!("/api/finds/{}/like", find.id))
            .insert_header(bearer(&token))
            .to_request();
        test::call_service(&app, req).await;
    }

    let req = test::TestRequest::get()
        .uri("/api/notifications")
        .insert_header(bearer(&owner_token))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["unreadCount"], 2);
    let notifications = body["data"]["notifications"].as_array().unwrap();
    assert_eq!(notifications.len(), 2);
    let first_id = notifications[0]["id"].as_str().unwrap().to_string();

    // mark one specific notification read
    let req = test::TestRequest::post()
        .uri("/api/notifications/read")
        .insert_header(bearer(&owner_token))
        .set_json(json!({ "ids": [first_id] }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    assert_eq!(state.store.unread_notification_count(&owner.id).unwrap(), 1);

    // unread filter returns only the remaining one
    let req = test::TestRequest::get()
        .uri("/api/notifications?unreadOnly=true")
        .insert_header(bearer(&owner_token))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["notifications"].as_array().unwrap().len(), 1);

    let req = test::TestRequest::get()
        .uri("/api/notifications/count")
        .insert_header(bearer(&owner_token))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["count"], 1);

    // then mark everything read
    let req = test::TestRequest::post()
        .uri("/api/notifications/read")
        .insert_header(bearer(&owner_token))
        .set_json(json!({ "all": true }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    assert_eq!(state.store.unread_notification_count(&owner.id).unwrap(), 0);
}

#[actix_web::test]
async fn test_delete_notification_is_owner_scoped() {
    let state = test_state();
    let app = test::init_service(
        App::new().app_data(state.clone()).configure(configure_routes),
    )
    .await;

    let (owner, owner_token) = create_user(&state, "owner");
    let (_, liker_token) = create_user(&state, "liker");
    let (_, other_token) = create_user(&state, "other");
    let find = create_find_at(&state, &owner.id, "spot", true, BRUSSELS.0, BRUSSELS.1);

    let req = test::TestRequest::post()
        .uri(&format!("/api/finds/{}/like", find.id))
        .insert_header(bearer(&liker_token))
        .to_request();
    test::call_service(&app, req).await;

    let notification_id = state
        .store
        .list_notifications(&owner.id, 50, 0, false)
        .unwrap()[0]
        .id
        .clone();

    // someone else's delete does not find the row
    let req = test::TestRequest::delete()
        .uri(&format!("/api/notifications/{}", notification_id))
        .insert_header(bearer(&other_token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/notifications/{}", notification_id))
        .insert_header(bearer(&owner_token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    assert!(state
        .store
        .list_notifications(&owner.id, 50, 0, false)
        .unwrap()
        .is_empty());
}

#[actix_web::test]
async fn test_push_subscribe_is_endpoint_upsert() {
    let state = test_state();
    let app = test::init_service(
        App::new().app_data(state.clone()).configure(configure_routes),
    )
    .await;
    let (user, token) = create_user(&state, "alice");

    for key in ["key-one", "key-two"] {
        let req = test::TestRequest::post()
            .uri("/api/notifications/subscribe")
            .insert_header(bearer(&token))
            .set_json(json!({
                "endpoint": "https://push.example.com/device-1",
                "p256dh": key,
                "auth": "auth-secret"
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 201);
    }

    let subs = state.store.active_push_subscriptions(&user.id).unwrap();
    assert_eq!(subs.len(), 1, "same endpoint does not duplicate");
    assert_eq!(subs[0].p256dh_key, "key-two");

    let req = test::TestRequest::delete()
        .uri("/api/notifications/subscribe")
        .insert_header(bearer(&token))
        .set_json(json!({ "endpoint": "https://push.example.com/device-1" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    assert!(state.store.active_push_subscriptions(&user.id).unwrap().is_empty());
}
