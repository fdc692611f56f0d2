#![allow(dead_code)]

use actix_web::web;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

use finds_server::api::AppState;
use finds_server::auth::AuthService;
use finds_server::media::MediaUrls;
use finds_server::models::{Find, User};
use finds_server::notify::{HttpPushSender, NotificationService};
use finds_server::storage::FsObjectStorage;
use finds_server::store::Store;

pub fn test_state() -> web::Data<AppState> {
    test_state_with_media_root(std::env::temp_dir())
}

pub fn test_state_with_media_root(media_root: PathBuf) -> web::Data<AppState> {
    let store = Arc::new(Store::in_memory().unwrap());
    let auth_service = Arc::new(AuthService::new("test-secret".to_string()));
    let notifications = Arc::new(NotificationService::new(
        store.clone(),
        Arc::new(HttpPushSender::new()),
    ));
    web::Data::new(AppState {
        store,
        auth_service,
        notifications,
        media_urls: MediaUrls::proxy(),
        storage: Arc::new(FsObjectStorage::new(media_root)),
    })
}

/// Create a user directly in the store and return it with a valid token.
pub fn create_user(state: &AppState, username: &str) -> (User, String) {
    let mut user = User {
        id: String::new(),
        username: username.to_string(),
        email: format!("{}@example.com", username),
        password_hash: state.auth_service.hash_password("password123").unwrap(),
        profile_picture_url: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    state.store.create_user(&mut user).unwrap();
    let token = state.auth_service.generate_token(&user.id).unwrap();
    (user, token)
}

/// Create a find at the given coordinates directly in the store.
pub fn create_find_at(
    state: &AppState,
    user_id: &str,
    title: &str,
    is_public: bool,
    lat: f64,
    lng: f64,
) -> Find {
    let mut find = Find {
        id: String::new(),
        user_id: user_id.to_string(),
        title: title.to_string(),
        description: None,
        latitude: lat,
        longitude: lng,
        location_name: None,
        category: None,
        is_public,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    state.store.create_find(&mut find).unwrap();
    find
}

/// Brussels city centre, the default test location.
pub const BRUSSELS: (f64, f64) = (50.8503, 4.3517);
/// Antwerp, roughly 41 km from Brussels.
pub const ANTWERP: (f64, f64) = (51.2194, 4.4025);

pub fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", token))
}
