use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// User account. Profile pictures are stored as storage-relative paths and
/// rewritten to fetchable URLs at the API boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub profile_picture_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Find is a post anchored to a geographic point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Find {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub location_name: Option<String>,
    /// e.g. "cafe", "restaurant", "park", "landmark"
    pub category: Option<String>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ordered media attachment belonging to exactly one Find.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindMedia {
    pub id: String,
    pub find_id: String,
    /// 'photo' or 'video'
    #[serde(rename = "type")]
    pub media_type: String,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub order_index: i32,
    pub created_at: DateTime<Utc>,
}

/// Join row: at most one like per (find, user) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindLike {
    pub id: String,
    pub find_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindComment {
    pub id: String,
    pub find_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Directed friendship request. At most one row exists per unordered user
/// pair; the symmetric "friends" relation is derived from accepted rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Friendship {
    pub id: String,
    pub user_id: String,
    pub friend_id: String,
    pub status: FriendshipStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FriendshipStatus {
    Pending,
    Accepted,
    Declined,
    Blocked,
}

impl FriendshipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendshipStatus::Pending => "pending",
            FriendshipStatus::Accepted => "accepted",
            FriendshipStatus::Declined => "declined",
            FriendshipStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FriendshipStatus::Pending),
            "accepted" => Some(FriendshipStatus::Accepted),
            "declined" => Some(FriendshipStatus::Declined),
            "blocked" => Some(FriendshipStatus::Blocked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, serde_json::Value>>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    FriendRequest,
    FriendAccepted,
    FindLiked,
    FindCommented,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::FriendRequest => "friend_request",
            NotificationType::FriendAccepted => "friend_accepted",
            NotificationType::FindLiked => "find_liked",
            NotificationType::FindCommented => "find_commented",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "friend_request" => Some(NotificationType::FriendRequest),
            "friend_accepted" => Some(NotificationType::FriendAccepted),
            "find_liked" => Some(NotificationType::FindLiked),
            "find_commented" => Some(NotificationType::FindCommented),
            _ => None,
        }
    }
}

/// Per-user opt-in flags. A missing row means everything defaults to true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub user_id: String,
    pub push_enabled: bool,
    pub friend_requests: bool,
    pub friend_accepted: bool,
    pub find_liked: bool,
    pub find_commented: bool,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreferences {
    pub fn defaults(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            push_enabled: true,
            friend_requests: true,
            friend_accepted: true,
            find_liked: true,
            find_commented: true,
            updated_at: Utc::now(),
        }
    }

    pub fn allows(&self, notification_type: NotificationType) -> bool {
        if !self.push_enabled {
            return false;
        }
        match notification_type {
            NotificationType::FriendRequest => self.friend_requests,
            NotificationType::FriendAccepted => self.friend_accepted,
            NotificationType::FindLiked => self.find_liked,
            NotificationType::FindCommented => self.find_commented,
        }
    }
}

/// Web push subscription for one browser/device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSubscription {
    pub id: String,
    pub user_id: String,
    pub endpoint: String,
    pub p256dh_key: String,
    pub auth_key: String,
    pub user_agent: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==================== View / payload types ====================

/// Owner summary embedded in find payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    #[serde(rename = "profilePictureUrl")]
    pub profile_picture_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaView {
    pub id: String,
    #[serde(rename = "findId")]
    pub find_id: String,
    #[serde(rename = "type")]
    pub media_type: String,
    pub url: String,
    #[serde(rename = "thumbnailUrl")]
    pub thumbnail_url: Option<String>,
    #[serde(rename = "orderIndex")]
    pub order_index: i32,
}

/// Feed/detail payload for a single find, evaluated for one viewer.
/// `is_liked_by_user` is viewer-relative and never cached across viewers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FindView {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "locationName")]
    pub location_name: Option<String>,
    pub category: Option<String>,
    #[serde(rename = "isPublic")]
    pub is_public: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub user: UserSummary,
    #[serde(rename = "likeCount")]
    pub like_count: i64,
    #[serde(rename = "isLikedByUser")]
    pub is_liked_by_user: bool,
    #[serde(rename = "isFromFriend")]
    pub is_from_friend: bool,
    pub media: Vec<MediaView>,
    #[serde(rename = "commentCount", skip_serializing_if = "Option::is_none")]
    pub comment_count: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommentView {
    pub id: String,
    #[serde(rename = "findId")]
    pub find_id: String,
    pub content: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub user: UserSummary,
}

/// One friendship row as listed to the current user, annotated with the
/// other party's identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FriendshipView {
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "friendId")]
    pub friend_id: String,
    pub status: FriendshipStatus,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "friendUsername")]
    pub friend_username: String,
    #[serde(rename = "friendProfilePictureUrl")]
    pub friend_profile_picture_url: Option<String>,
}

/// Like state of one find for one viewer, returned by like and unlike and
/// used to reconcile optimistic updates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LikeState {
    #[serde(rename = "isLiked")]
    pub is_liked: bool,
    #[serde(rename = "likeCount")]
    pub like_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSearchResult {
    pub id: String,
    pub username: String,
    #[serde(rename = "profilePictureUrl")]
    pub profile_picture_url: Option<String>,
    #[serde(rename = "friendshipStatus", skip_serializing_if = "Option::is_none")]
    pub friendship_status: Option<FriendshipStatus>,
}

// ==================== Request/response types for API ====================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    /// Storage-relative path of the new picture; null clears it.
    #[serde(rename = "profilePictureUrl")]
    pub profile_picture_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMediaRequest {
    #[serde(rename = "type")]
    pub media_type: String,
    pub url: String,
    #[serde(rename = "thumbnailUrl")]
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateFindRequest {
    pub title: String,
    pub description: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "locationName")]
    pub location_name: Option<String>,
    pub category: Option<String>,
    #[serde(rename = "isPublic", default = "default_public")]
    pub is_public: bool,
    #[serde(default)]
    pub media: Vec<CreateMediaRequest>,
}

fn default_public() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct UpdateFindRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "locationName")]
    pub location_name: Option<String>,
    pub category: Option<String>,
    #[serde(rename = "isPublic")]
    pub is_public: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateFriendRequest {
    #[serde(rename = "friendId")]
    pub friend_id: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFriendshipRequest {
    /// 'accept', 'decline', 'block'
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePreferencesRequest {
    #[serde(rename = "pushEnabled")]
    pub push_enabled: Option<bool>,
    #[serde(rename = "friendRequests")]
    pub friend_requests: Option<bool>,
    #[serde(rename = "friendAccepted")]
    pub friend_accepted: Option<bool>,
    #[serde(rename = "findLiked")]
    pub find_liked: Option<bool>,
    #[serde(rename = "findCommented")]
    pub find_commented: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    #[serde(rename = "userAgent")]
    pub user_agent: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    /// Specific notification ids, or empty with `all = true`.
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
