//! Notification creation and push fan-out.
//!
//! Every qualifying mutation produces exactly one notification row for the
//! recipient, then a best-effort push to each of their active subscriptions.
//! Push failures are logged and never propagated to the caller; a push
//! endpoint answering 404 or 410 is deactivated so it is not retried
//! forever.

use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{Notification, NotificationPreferences, NotificationType, PushSubscription};
use crate::store::{Store, StoreResult};

/// Payload sent to a push endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug)]
pub enum PushError {
    /// The endpoint is permanently gone; the subscription should be dropped.
    Gone,
    Failed(String),
}

impl std::fmt::Display for PushError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushError::Gone => write!(f, "endpoint gone"),
            PushError::Failed(msg) => write!(f, "{}", msg),
        }
    }
}

/// Delivers one message to one subscription endpoint. Object-safe so tests
/// can substitute a recording sender.
pub trait PushSender: Send + Sync {
    fn send<'a>(
        &'a self,
        subscription: &'a PushSubscription,
        message: &'a PushMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), PushError>> + Send + 'a>>;
}

/// Sends push payloads as JSON POSTs to the subscription endpoint.
pub struct HttpPushSender {
    client: reqwest::Client,
}

impl HttpPushSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpPushSender {
    fn default() -> Self {
        Self::new()
    }
}

impl PushSender for HttpPushSender {
    fn send<'a>(
        &'a self,
        subscription: &'a PushSubscription,
        message: &'a PushMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), PushError>> + Send + 'a>> {
        Box::pin(async move {
            let response = self
                .client
                .post(&subscription.endpoint)
                .json(message)
                .send()
                .await
                .map_err(|e| PushError::Failed(e.to_string()))?;

            let status = response.status();
            match status.as_u16() {
                404 | 410 => Err(PushError::Gone),
                _ if status.is_success() => Ok(()),
                code => Err(PushError::Failed(format!("push endpoint returned {}", code))),
            }
        })
    }
}

/// Creates notification rows and fans them out to push subscriptions.
pub struct NotificationService {
    store: Arc<Store>,
    push: Arc<dyn PushSender>,
}

impl NotificationService {
    pub fn new(store: Arc<Store>, push: Arc<dyn PushSender>) -> Self {
        Self { store, push }
    }

    fn preferences_for(&self, user_id: &str) -> StoreResult<NotificationPreferences> {
        Ok(self
            .store
            .get_notification_preferences(user_id)?
            .unwrap_or_else(|| NotificationPreferences::defaults(user_id)))
    }

    /// Notify `recipient` unless their preferences suppress this type.
    /// Returns the stored notification, or None when suppressed.
    pub async fn notify(
        &self,
        recipient: &str,
        notification_type: NotificationType,
        title: &str,
        message: &str,
        data: Option<HashMap<String, serde_json::Value>>,
    ) -> StoreResult<Option<Notification>> {
        let prefs = self.preferences_for(recipient)?;
        if !prefs.allows(notification_type) {
            info!(
                "Notification {} suppressed for user {} by preferences",
                notification_type.as_str(),
                recipient
            );
            return Ok(None);
        }

        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            user_id: recipient.to_string(),
            notification_type,
            title: title.to_string(),
            message: message.to_string(),
            data,
            is_read: false,
            created_at: Utc::now(),
        };
        self.store.create_notification(&notification)?;

        self.push_to_subscriptions(recipient, &notification).await;
        Ok(Some(notification))
    }

    /// Deliver to every active subscription. Failures never bubble up; the
    /// triggering request already succeeded by the time we get here.
    async fn push_to_subscriptions(&self, recipient: &str, notification: &Notification) {
        let subscriptions = match self.store.active_push_subscriptions(recipient) {
            Ok(subs) => subs,
            Err(e) => {
                warn!("Failed to load push subscriptions for {}: {}", recipient, e);
                return;
            }
        };

        let url = notification
            .data
            .as_ref()
            .and_then(|d| d.get("url"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let message = PushMessage {
            title: notification.title.clone(),
            body: notification.message.clone(),
            url,
        };

        for subscription in &subscriptions {
            match self.push.send(subscription, &message).await {
                Ok(()) => {}
                Err(PushError::Gone) => {
                    info!(
                        "Push endpoint gone, deactivating subscription {}",
                        subscription.id
                    );
                    if let Err(e) = self
                        .store
                        .deactivate_push_subscription(&subscription.endpoint)
                    {
                        warn!("Failed to deactivate subscription: {}", e);
                    }
                }
                Err(e) => {
                    warn!(
                        "Push delivery failed for subscription {}: {}",
                        subscription.id, e
                    );
                }
            }
        }
    }

    // Convenience wrappers for the events the API raises.

    pub async fn friend_request(&self, recipient: &str, from_username: &str) {
        let mut data = HashMap::new();
        data.insert(
            "url".to_string(),
            serde_json::Value::String("/friends".to_string()),
        );
        if let Err(e) = self
            .notify(
                recipient,
                NotificationType::FriendRequest,
                "New friend request",
                &format!("{} sent you a friend request", from_username),
                Some(data),
            )
            .await
        {
            warn!("Failed to create friend request notification: {}", e);
        }
    }

    pub async fn friend_accepted(&self, recipient: &str, by_username: &str) {
        let mut data = HashMap::new();
        data.insert(
            "url".to_string(),
            serde_json::Value::String("/friends".to_string()),
        );
        if let Err(e) = self
            .notify(
                recipient,
                NotificationType::FriendAccepted,
                "Friend request accepted",
                &format!("{} accepted your friend request", by_username),
                Some(data),
            )
            .await
        {
            warn!("Failed to create friend accepted notification: {}", e);
        }
    }

    pub async fn find_liked(&self, owner: &str, liker_username: &str, find_id: &str, title: &str) {
        let mut data = HashMap::new();
        data.insert(
            "url".to_string(),
            serde_json::Value::String(format!("/finds/{}", find_id)),
        );
        data.insert(
            "findId".to_string(),
            serde_json::Value::String(find_id.to_string()),
        );
        if let Err(e) = self
            .notify(
                owner,
                NotificationType::FindLiked,
                "Your find was liked",
                &format!("{} liked \"{}\"", liker_username, title),
                Some(data),
            )
            .await
        {
            warn!("Failed to create like notification: {}", e);
        }
    }

    pub async fn find_commented(
        &self,
        owner: &str,
        commenter_username: &str,
        find_id: &str,
        title: &str,
    ) {
        let mut data = HashMap::new();
        data.insert(
            "url".to_string(),
            serde_json::Value::String(format!("/finds/{}", find_id)),
        );
        data.insert(
            "findId".to_string(),
            serde_json::Value::String(find_id.to_string()),
        );
        if let Err(e) = self
            .notify(
                owner,
                NotificationType::FindCommented,
                "New comment on your find",
                &format!("{} commented on \"{}\"", commenter_username, title),
                Some(data),
            )
            .await
        {
            warn!("Failed to create comment notification: {}", e);
        }
    }
}
