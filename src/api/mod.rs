use actix_web::{web, HttpResponse};
use log::warn;
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::{AuthService, AuthUser, Viewer};
use crate::media::MediaUrls;
use crate::models::*;
use crate::notify::NotificationService;
use crate::storage::{self, ObjectStorage, StorageError};
use crate::store::{FeedQuery, Store, StoreError};

/// Shared application state
pub struct AppState {
    pub store: Arc<Store>,
    pub auth_service: Arc<AuthService>,
    pub notifications: Arc<NotificationService>,
    pub media_urls: MediaUrls,
    pub storage: Arc<dyn ObjectStorage>,
}

fn store_error(e: StoreError) -> HttpResponse {
    match e {
        StoreError::NotFound(msg) => HttpResponse::NotFound().json(ApiResponse::<()>::error(msg)),
        StoreError::Conflict(msg) => HttpResponse::Conflict().json(ApiResponse::<()>::error(msg)),
        StoreError::Validation(msg) => {
            HttpResponse::BadRequest().json(ApiResponse::<()>::error(msg))
        }
        e => {
            warn!("Store error: {}", e);
            HttpResponse::InternalServerError().json(ApiResponse::<()>::error("Internal error"))
        }
    }
}

fn forbidden(msg: &str) -> HttpResponse {
    HttpResponse::Forbidden().json(ApiResponse::<()>::error(msg))
}

// URL materialization happens at this boundary, the store only knows
// storage-relative paths.

fn materialize_summary(urls: &MediaUrls, user: &mut UserSummary) {
    user.profile_picture_url = urls.materialize_opt(user.profile_picture_url.as_deref());
}

fn materialize_find(urls: &MediaUrls, find: &mut FindView) {
    materialize_summary(urls, &mut find.user);
    for media in &mut find.media {
        media.url = urls.materialize(&media.url);
        media.thumbnail_url = urls.materialize_opt(media.thumbnail_url.as_deref());
    }
}

fn materialize_user(urls: &MediaUrls, user: &mut User) {
    user.profile_picture_url = urls.materialize_opt(user.profile_picture_url.as_deref());
}

// ==================== Health ====================

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

// ==================== Auth ====================

async fn register(state: web::Data<AppState>, req: web::Json<RegisterRequest>) -> HttpResponse {
    let username = req.username.trim();
    if username.len() < 3 {
        return HttpResponse::BadRequest().json(ApiResponse::<()>::error(
            "Username must be at least 3 characters",
        ));
    }
    if req.password.len() < 8 {
        return HttpResponse::BadRequest().json(ApiResponse::<()>::error(
            "Password must be at least 8 characters",
        ));
    }
    if !req.email.contains('@') {
        return HttpResponse::BadRequest().json(ApiResponse::<()>::error("Invalid email address"));
    }

    let password_hash = match state.auth_service.hash_password(&req.password) {
        Ok(hash) => hash,
        Err(e) => {
            warn!("Password hashing failed: {}", e);
            return HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("Internal error"));
        }
    };

    let mut user = User {
        id: String::new(),
        username: username.to_string(),
        email: req.email.trim().to_string(),
        password_hash,
        profile_picture_url: None,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    if let Err(e) = state.store.create_user(&mut user) {
        return store_error(e);
    }

    let token = match state.auth_service.generate_token(&user.id) {
        Ok(token) => token,
        Err(e) => {
            warn!("Token generation failed: {}", e);
            return HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("Internal error"));
        }
    };
    HttpResponse::Created().json(ApiResponse::success(LoginResponse { token, user }))
}

async fn login(state: web::Data<AppState>, req: web::Json<LoginRequest>) -> HttpResponse {
    let user = match state.store.get_user_by_username(req.username.trim()) {
        Ok(user) => user,
        Err(StoreError::NotFound(_)) => {
            return HttpResponse::Unauthorized()
                .json(ApiResponse::<()>::error("Invalid username or password"));
        }
        Err(e) => return store_error(e),
    };

    match state
        .auth_service
        .verify_password(&req.password, &user.password_hash)
    {
        Ok(true) => {}
        Ok(false) => {
            return HttpResponse::Unauthorized()
                .json(ApiResponse::<()>::error("Invalid username or password"));
        }
        Err(e) => {
            warn!("Password verification failed: {}", e);
            return HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("Internal error"));
        }
    }

    let token = match state.auth_service.generate_token(&user.id) {
        Ok(token) => token,
        Err(e) => {
            warn!("Token generation failed: {}", e);
            return HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("Internal error"));
        }
    };
    let mut user = user;
    materialize_user(&state.media_urls, &mut user);
    HttpResponse::Ok().json(ApiResponse::success(LoginResponse { token, user }))
}

async fn me(state: web::Data<AppState>, auth: AuthUser) -> HttpResponse {
    match state.store.get_user(&auth.user_id) {
        Ok(mut user) => {
            materialize_user(&state.media_urls, &mut user);
            HttpResponse::Ok().json(ApiResponse::success(user))
        }
        Err(e) => store_error(e),
    }
}

async fn update_me(
    state: web::Data<AppState>,
    auth: AuthUser,
    req: web::Json<UpdateProfileRequest>,
) -> HttpResponse {
    if let Err(e) = state
        .store
        .update_profile_picture(&auth.user_id, req.profile_picture_url.as_deref())
    {
        return store_error(e);
    }
    match state.store.get_user(&auth.user_id) {
        Ok(mut user) => {
            materialize_user(&state.media_urls, &mut user);
            HttpResponse::Ok().json(ApiResponse::success(user))
        }
        Err(e) => store_error(e),
    }
}

// ==================== Finds ====================

#[derive(Debug, Deserialize)]
pub struct FeedParams {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    /// Search radius in km, defaults to 10.
    pub radius: Option<f64>,
    #[serde(rename = "includePrivate", default)]
    pub include_private: bool,
    #[serde(rename = "includeFriends", default)]
    pub include_friends: bool,
    /// "asc" for oldest first, anything else is newest first.
    pub order: Option<String>,
}

async fn list_finds(
    state: web::Data<AppState>,
    viewer: Viewer,
    params: web::Query<FeedParams>,
) -> HttpResponse {
    if params.lat.is_some() != params.lng.is_some() {
        return HttpResponse::BadRequest().json(ApiResponse::<()>::error(
            "lat and lng must be provided together",
        ));
    }

    let query = FeedQuery {
        lat: params.lat,
        lng: params.lng,
        radius_km: params.radius.unwrap_or(10.0).clamp(0.1, 500.0),
        include_private: params.include_private,
        include_friends: params.include_friends,
        ascending: params.order.as_deref() == Some("asc"),
    };

    match state.store.list_feed(viewer.user_id(), &query) {
        Ok(mut finds) => {
            for find in &mut finds {
                materialize_find(&state.media_urls, find);
            }
            HttpResponse::Ok().json(ApiResponse::success(finds))
        }
        Err(e) => store_error(e),
    }
}

async fn create_find(
    state: web::Data<AppState>,
    auth: AuthUser,
    req: web::Json<CreateFindRequest>,
) -> HttpResponse {
    let title = req.title.trim();
    if title.is_empty() {
        return HttpResponse::BadRequest().json(ApiResponse::<()>::error("Title is required"));
    }
    if title.chars().count() > 100 {
        return HttpResponse::BadRequest()
            .json(ApiResponse::<()>::error("Title too long (max 100 characters)"));
    }
    if let Some(description) = &req.description {
        if description.chars().count() > 500 {
            return HttpResponse::BadRequest().json(ApiResponse::<()>::error(
                "Description too long (max 500 characters)",
            ));
        }
    }
    if !(-90.0..=90.0).contains(&req.latitude) || !(-180.0..=180.0).contains(&req.longitude) {
        return HttpResponse::BadRequest().json(ApiResponse::<()>::error("Invalid coordinates"));
    }

    let mut find = Find {
        id: String::new(),
        user_id: auth.user_id.clone(),
        title: title.to_string(),
        description: req.description.clone(),
        latitude: req.latitude,
        longitude: req.longitude,
        location_name: req.location_name.clone(),
        category: req.category.clone(),
        is_public: req.is_public,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    let mut media: Vec<FindMedia> = req
        .media
        .iter()
        .enumerate()
        .map(|(index, media_req)| FindMedia {
            id: String::new(),
            find_id: String::new(),
            media_type: media_req.media_type.clone(),
            url: media_req.url.clone(),
            thumbnail_url: media_req.thumbnail_url.clone(),
            order_index: index as i32,
            created_at: chrono::Utc::now(),
        })
        .collect();
    if let Err(e) = state.store.create_find_with_media(&mut find, &mut media) {
        return store_error(e);
    }

    match state.store.get_find_view(&find.id, Some(&auth.user_id)) {
        Ok(mut view) => {
            materialize_find(&state.media_urls, &mut view);
            HttpResponse::Created().json(ApiResponse::success(view))
        }
        Err(e) => store_error(e),
    }
}

async fn get_find(
    state: web::Data<AppState>,
    viewer: Viewer,
    path: web::Path<String>,
) -> HttpResponse {
    let find_id = path.into_inner();
    let view = match state.store.get_find_view(&find_id, viewer.user_id()) {
        Ok(view) => view,
        Err(e) => return store_error(e),
    };

    // Private details are owner-only; friends only see private finds
    // through the feed's includeFriends scope.
    if !view.is_public && viewer.user_id() != Some(view.user.id.as_str()) {
        return forbidden("This find is private");
    }

    let mut view = view;
    materialize_find(&state.media_urls, &mut view);
    HttpResponse::Ok().json(ApiResponse::success(view))
}

async fn update_find(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
    req: web::Json<UpdateFindRequest>,
) -> HttpResponse {
    let find_id = path.into_inner();
    let mut find = match state.store.get_find(&find_id) {
        Ok(find) => find,
        Err(e) => return store_error(e),
    };
    if find.user_id != auth.user_id {
        return forbidden("Only the owner can edit a find");
    }

    if let Some(title) = &req.title {
        let title = title.trim();
        if title.is_empty() {
            return HttpResponse::BadRequest()
                .json(ApiResponse::<()>::error("Title cannot be empty"));
        }
        if title.chars().count() > 100 {
            return HttpResponse::BadRequest()
                .json(ApiResponse::<()>::error("Title too long (max 100 characters)"));
        }
        find.title = title.to_string();
    }
    if let Some(description) = &req.description {
        find.description = Some(description.clone());
    }
    if let Some(location_name) = &req.location_name {
        find.location_name = Some(location_name.clone());
    }
    if let Some(category) = &req.category {
        find.category = Some(category.clone());
    }
    if let Some(is_public) = req.is_public {
        find.is_public = is_public;
    }

    if let Err(e) = state.store.update_find(&mut find) {
        return store_error(e);
    }
    match state.store.get_find_view(&find_id, Some(&auth.user_id)) {
        Ok(mut view) => {
            materialize_find(&state.media_urls, &mut view);
            HttpResponse::Ok().json(ApiResponse::success(view))
        }
        Err(e) => store_error(e),
    }
}

async fn delete_find(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> HttpResponse {
    let find_id = path.into_inner();
    let find = match state.store.get_find(&find_id) {
        Ok(find) => find,
        Err(e) => return store_error(e),
    };
    if find.user_id != auth.user_id {
        return forbidden("Only the owner can delete a find");
    }

    let paths = match state.store.delete_find_cascade(&find_id) {
        Ok(paths) => paths,
        Err(e) => return store_error(e),
    };

    // Rows are gone; object removal is best-effort
    for object_path in paths {
        match state.storage.delete(&object_path) {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(e) => warn!("Failed to delete media object {}: {}", object_path, e),
        }
    }
    HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({ "deleted": true })))
}

// ==================== Likes ====================

async fn like_find(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> HttpResponse {
    let find_id = path.into_inner();
    let find = match state.store.get_find(&find_id) {
        Ok(find) => find,
        Err(e) => return store_error(e),
    };

    if let Err(e) = state.store.create_like(&find_id, &auth.user_id) {
        return store_error(e);
    }
    let like_count = match state.store.count_likes(&find_id) {
        Ok(count) => count,
        Err(e) => return store_error(e),
    };

    if find.user_id != auth.user_id {
        if let Ok(liker) = state.store.get_user(&auth.user_id) {
            state
                .notifications
                .find_liked(&find.user_id, &liker.username, &find_id, &find.title)
                .await;
        }
    }

    HttpResponse::Ok().json(ApiResponse::success(LikeState {
        is_liked: true,
        like_count,
    }))
}

async fn unlike_find(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> HttpResponse {
    let find_id = path.into_inner();
    if let Err(e) = state.store.get_find(&find_id) {
        return store_error(e);
    }
    if let Err(e) = state.store.delete_like(&find_id, &auth.user_id) {
        return store_error(e);
    }
    let like_count = match state.store.count_likes(&find_id) {
        Ok(count) => count,
        Err(e) => return store_error(e),
    };
    HttpResponse::Ok().json(ApiResponse::success(LikeState {
        is_liked: false,
        like_count,
    }))
}

// ==================== Comments ====================

async fn list_comments(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let find_id = path.into_inner();
    if let Err(e) = state.store.get_find(&find_id) {
        return store_error(e);
    }
    match state.store.list_comments(&find_id) {
        Ok(mut comments) => {
            for comment in &mut comments {
                materialize_summary(&state.media_urls, &mut comment.user);
            }
            HttpResponse::Ok().json(ApiResponse::success(comments))
        }
        Err(e) => store_error(e),
    }
}

async fn create_comment(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
    req: web::Json<CreateCommentRequest>,
) -> HttpResponse {
    let find_id = path.into_inner();
    let find = match state.store.get_find(&find_id) {
        Ok(find) => find,
        Err(e) => return store_error(e),
    };

    let mut comment = FindComment {
        id: String::new(),
        find_id: find_id.clone(),
        user_id: auth.user_id.clone(),
        content: req.content.clone(),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    if let Err(e) = state.store.create_comment(&mut comment) {
        return store_error(e);
    }

    let commenter = match state.store.get_user(&auth.user_id) {
        Ok(user) => user,
        Err(e) => return store_error(e),
    };

    if find.user_id != auth.user_id {
        state
            .notifications
            .find_commented(&find.user_id, &commenter.username, &find_id, &find.title)
            .await;
    }

    let mut view = CommentView {
        id: comment.id,
        find_id: comment.find_id,
        content: comment.content,
        created_at: comment.created_at,
        user: UserSummary {
            id: commenter.id,
            username: commenter.username,
            profile_picture_url: commenter.profile_picture_url,
        },
    };
    materialize_summary(&state.media_urls, &mut view.user);
    HttpResponse::Created().json(ApiResponse::success(view))
}

async fn delete_comment(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> HttpResponse {
    let comment_id = path.into_inner();
    let comment = match state.store.get_comment(&comment_id) {
        Ok(comment) => comment,
        Err(e) => return store_error(e),
    };

    // the comment author or the find owner may delete
    let allowed = if comment.user_id == auth.user_id {
        true
    } else {
        match state.store.get_find(&comment.find_id) {
            Ok(find) => find.user_id == auth.user_id,
            Err(_) => false,
        }
    };
    if !allowed {
        return forbidden("Not allowed to delete this comment");
    }

    match state.store.delete_comment(&comment_id) {
        Ok(()) => {
            HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({ "deleted": true })))
        }
        Err(e) => store_error(e),
    }
}

// ==================== Users ====================

#[derive(Debug, Deserialize)]
pub struct UserSearchParams {
    pub q: String,
}

async fn search_users(
    state: web::Data<AppState>,
    auth: AuthUser,
    params: web::Query<UserSearchParams>,
) -> HttpResponse {
    let query = params.q.trim();
    if query.len() < 2 {
        return HttpResponse::BadRequest().json(ApiResponse::<()>::error(
            "Search query must be at least 2 characters",
        ));
    }
    match state.store.search_users(query, &auth.user_id, 20) {
        Ok(mut results) => {
            for result in &mut results {
                result.profile_picture_url = state
                    .media_urls
                    .materialize_opt(result.profile_picture_url.as_deref());
            }
            HttpResponse::Ok().json(ApiResponse::success(results))
        }
        Err(e) => store_error(e),
    }
}

// ==================== Friends ====================

#[derive(Debug, Deserialize)]
pub struct FriendListParams {
    /// "friends" (default), "sent" or "received".
    #[serde(rename = "type")]
    pub list_type: Option<String>,
    pub status: Option<String>,
}

async fn list_friends(
    state: web::Data<AppState>,
    auth: AuthUser,
    params: web::Query<FriendListParams>,
) -> HttpResponse {
    let list_type = params.list_type.as_deref().unwrap_or("friends");
    let default_status = if list_type == "friends" {
        FriendshipStatus::Accepted
    } else {
        FriendshipStatus::Pending
    };
    let status = params
        .status
        .as_deref()
        .and_then(FriendshipStatus::parse)
        .unwrap_or(default_status);

    match state.store.list_friendships(&auth.user_id, list_type, status) {
        Ok(mut friendships) => {
            for friendship in &mut friendships {
                friendship.friend_profile_picture_url = state
                    .media_urls
                    .materialize_opt(friendship.friend_profile_picture_url.as_deref());
            }
            HttpResponse::Ok().json(ApiResponse::success(friendships))
        }
        Err(e) => store_error(e),
    }
}

async fn create_friend_request(
    state: web::Data<AppState>,
    auth: AuthUser,
    req: web::Json<CreateFriendRequest>,
) -> HttpResponse {
    if req.friend_id == auth.user_id {
        return HttpResponse::BadRequest()
            .json(ApiResponse::<()>::error("Cannot friend yourself"));
    }
    if let Err(e) = state.store.get_user(&req.friend_id) {
        return store_error(e);
    }

    let mut friendship = Friendship {
        id: String::new(),
        user_id: auth.user_id.clone(),
        friend_id: req.friend_id.clone(),
        status: FriendshipStatus::Pending,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    if let Err(e) = state.store.create_friendship(&mut friendship) {
        return store_error(e);
    }

    if let Ok(requester) = state.store.get_user(&auth.user_id) {
        state
            .notifications
            .friend_request(&req.friend_id, &requester.username)
            .await;
    }
    HttpResponse::Created().json(ApiResponse::success(friendship))
}

async fn update_friendship(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
    req: web::Json<UpdateFriendshipRequest>,
) -> HttpResponse {
    let friendship_id = path.into_inner();
    let friendship = match state.store.get_friendship(&friendship_id) {
        Ok(friendship) => friendship,
        Err(e) => return store_error(e),
    };

    // only the recipient responds to a request
    if friendship.friend_id != auth.user_id {
        return forbidden("Only the recipient can respond to a friend request");
    }
    if friendship.status != FriendshipStatus::Pending {
        return HttpResponse::Conflict()
            .json(ApiResponse::<()>::error("Friend request already handled"));
    }

    let status = match req.action.as_str() {
        "accept" => FriendshipStatus::Accepted,
        "decline" => FriendshipStatus::Declined,
        "block" => FriendshipStatus::Blocked,
        other => {
            return HttpResponse::BadRequest()
                .json(ApiResponse::<()>::error(format!("Unknown action: {}", other)));
        }
    };

    let updated = match state.store.update_friendship_status(&friendship_id, status) {
        Ok(updated) => updated,
        Err(e) => return store_error(e),
    };

    if status == FriendshipStatus::Accepted {
        if let Ok(recipient) = state.store.get_user(&auth.user_id) {
            state
                .notifications
                .friend_accepted(&friendship.user_id, &recipient.username)
                .await;
        }
    }
    HttpResponse::Ok().json(ApiResponse::success(updated))
}

async fn delete_friendship(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> HttpResponse {
    let friendship_id = path.into_inner();
    let friendship = match state.store.get_friendship(&friendship_id) {
        Ok(friendship) => friendship,
        Err(e) => return store_error(e),
    };
    if friendship.user_id != auth.user_id && friendship.friend_id != auth.user_id {
        return forbidden("Not part of this friendship");
    }
    match state.store.delete_friendship(&friendship_id) {
        Ok(()) => {
            HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({ "deleted": true })))
        }
        Err(e) => store_error(e),
    }
}

// ==================== Notifications ====================

#[derive(Debug, Deserialize)]
pub struct NotificationParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    #[serde(rename = "unreadOnly", default)]
    pub unread_only: bool,
}

async fn list_notifications(
    state: web::Data<AppState>,
    auth: AuthUser,
    params: web::Query<NotificationParams>,
) -> HttpResponse {
    let limit = params.limit.unwrap_or(50).clamp(1, 100);
    let offset = params.offset.unwrap_or(0).max(0);

    let notifications = match state.store.list_notifications(
        &auth.user_id,
        limit,
        offset,
        params.unread_only,
    ) {
        Ok(notifications) => notifications,
        Err(e) => return store_error(e),
    };
    let unread_count = match state.store.unread_notification_count(&auth.user_id) {
        Ok(count) => count,
        Err(e) => return store_error(e),
    };

    HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
        "notifications": notifications,
        "unreadCount": unread_count,
    })))
}

async fn unread_count(state: web::Data<AppState>, auth: AuthUser) -> HttpResponse {
    match state.store.unread_notification_count(&auth.user_id) {
        Ok(count) => {
            HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({ "count": count })))
        }
        Err(e) => store_error(e),
    }
}

async fn mark_notifications_read(
    state: web::Data<AppState>,
    auth: AuthUser,
    req: web::Json<MarkReadRequest>,
) -> HttpResponse {
    let result = if req.all {
        state.store.mark_all_notifications_read(&auth.user_id)
    } else {
        state.store.mark_notifications_read(&auth.user_id, &req.ids)
    };
    match result {
        Ok(()) => {
            HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({ "marked": true })))
        }
        Err(e) => store_error(e),
    }
}

async fn delete_notification(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> HttpResponse {
    match state
        .store
        .delete_notification(&path.into_inner(), &auth.user_id)
    {
        Ok(()) => {
            HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({ "deleted": true })))
        }
        Err(e) => store_error(e),
    }
}

async fn get_preferences(state: web::Data<AppState>, auth: AuthUser) -> HttpResponse {
    match state.store.get_notification_preferences(&auth.user_id) {
        Ok(prefs) => {
            let prefs =
                prefs.unwrap_or_else(|| NotificationPreferences::defaults(&auth.user_id));
            HttpResponse::Ok().json(ApiResponse::success(prefs))
        }
        Err(e) => store_error(e),
    }
}

async fn update_preferences(
    state: web::Data<AppState>,
    auth: AuthUser,
    req: web::Json<UpdatePreferencesRequest>,
) -> HttpResponse {
    let mut prefs = match state.store.get_notification_preferences(&auth.user_id) {
        Ok(prefs) => prefs.unwrap_or_else(|| NotificationPreferences::defaults(&auth.user_id)),
        Err(e) => return store_error(e),
    };

    if let Some(v) = req.push_enabled {
        prefs.push_enabled = v;
    }
    if let Some(v) = req.friend_requests {
        prefs.friend_requests = v;
    }
    if let Some(v) = req.friend_accepted {
        prefs.friend_accepted = v;
    }
    if let Some(v) = req.find_liked {
        prefs.find_liked = v;
    }
    if let Some(v) = req.find_commented {
        prefs.find_commented = v;
    }

    match state.store.upsert_notification_preferences(&prefs) {
        Ok(()) => HttpResponse::Ok().json(ApiResponse::success(prefs)),
        Err(e) => store_error(e),
    }
}

async fn subscribe_push(
    state: web::Data<AppState>,
    auth: AuthUser,
    req: web::Json<SubscribeRequest>,
) -> HttpResponse {
    if req.endpoint.trim().is_empty() {
        return HttpResponse::BadRequest().json(ApiResponse::<()>::error("Endpoint is required"));
    }

    let mut sub = PushSubscription {
        id: String::new(),
        user_id: auth.user_id.clone(),
        endpoint: req.endpoint.clone(),
        p256dh_key: req.p256dh.clone(),
        auth_key: req.auth.clone(),
        user_agent: req.user_agent.clone(),
        is_active: true,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    match state.store.upsert_push_subscription(&mut sub) {
        Ok(()) => HttpResponse::Created().json(ApiResponse::success(sub)),
        Err(e) => store_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub endpoint: String,
}

async fn unsubscribe_push(
    state: web::Data<AppState>,
    auth: AuthUser,
    req: web::Json<UnsubscribeRequest>,
) -> HttpResponse {
    match state
        .store
        .remove_push_subscription(&auth.user_id, &req.endpoint)
    {
        Ok(()) => {
            HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({ "deleted": true })))
        }
        Err(e) => store_error(e),
    }
}

// ==================== Media proxy ====================

async fn serve_media(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let object_path = path.into_inner();
    match state.storage.read(&object_path) {
        Ok(bytes) => HttpResponse::Ok()
            .content_type(storage::content_type_for(&object_path))
            .insert_header(("Cache-Control", "public, max-age=31536000, immutable"))
            .body(bytes),
        Err(StorageError::NotFound(_)) => {
            HttpResponse::NotFound().json(ApiResponse::<()>::error("Media not found"))
        }
        Err(StorageError::InvalidPath(_)) => {
            HttpResponse::BadRequest().json(ApiResponse::<()>::error("Invalid media path"))
        }
        Err(e) => {
            warn!("Media read failed: {}", e);
            HttpResponse::InternalServerError().json(ApiResponse::<()>::error("Internal error"))
        }
    }
}

// ==================== Routes ====================

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health)).service(
        web::scope("/api")
            .route("/auth/register", web::post().to(register))
            .route("/auth/login", web::post().to(login))
            .route("/auth/me", web::get().to(me))
            .route("/auth/me", web::patch().to(update_me))
            .route("/finds", web::get().to(list_finds))
            .route("/finds", web::post().to(create_find))
            .route("/finds/{id}", web::get().to(get_find))
            .route("/finds/{id}", web::put().to(update_find))
            .route("/finds/{id}", web::patch().to(update_find))
            .route("/finds/{id}", web::delete().to(delete_find))
            .route("/finds/{id}/like", web::post().to(like_find))
            .route("/finds/{id}/like", web::delete().to(unlike_find))
            .route("/finds/{id}/comments", web::get().to(list_comments))
            .route("/finds/{id}/comments", web::post().to(create_comment))
            .route("/comments/{id}", web::delete().to(delete_comment))
            .route("/users", web::get().to(search_users))
            .route("/friends", web::get().to(list_friends))
            .route("/friends", web::post().to(create_friend_request))
            .route("/friends/{id}", web::put().to(update_friendship))
            .route("/friends/{id}", web::patch().to(update_friendship))
            .route("/friends/{id}", web::delete().to(delete_friendship))
            .route("/notifications", web::get().to(list_notifications))
            .route("/notifications/count", web::get().to(unread_count))
            .route("/notifications/read", web::put().to(mark_notifications_read))
            .route("/notifications/read", web::post().to(mark_notifications_read))
            .route(
                "/notifications/preferences",
                web::get().to(get_preferences),
            )
            .route(
                "/notifications/preferences",
                web::put().to(update_preferences),
            )
            .route("/notifications/subscribe", web::post().to(subscribe_push))
            .route(
                "/notifications/subscribe",
                web::delete().to(unsubscribe_push),
            )
            .route("/notifications/{id}", web::delete().to(delete_notification))
            .route("/media/{path:.*}", web::get().to(serve_media)),
    );
}
