pub mod emitter;

use serde::Serialize;
use spin_sdk::http::{Request, Response};

use crate::auth::require_auth;
use crate::config::{notification_key, notifications_key, NOTIFICATIONS_PER_PAGE};
use crate::core::errors::ApiError;
use crate::core::helpers::{json_response, message_response, now_iso, require_uuid};
use crate::core::kv::{KvStore, KvStoreExt};
use crate::core::query_params::{get_string, paged_json, parse_query_params, Pagination};
use crate::models::models::{Notification, NotificationType, UserSummary};
use crate::users::load_user;

pub use emitter::{deliver_pending, NotificationDraft, NotificationEmitter, OutboxEmitter};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationView {
    #[serde(flatten)]
    notification: Notification,
    sender: Option<UserSummary>,
}

/// All notifications for `user_id`, newest first.
pub fn load_notifications(store: &dyn KvStore, user_id: &str) -> anyhow::Result<Vec<Notification>> {
    let mut out = Vec::new();
    for id in store.get_list(&notifications_key(user_id))? {
        if let Some(n) = store.get_json::<Notification>(&notification_key(&id))? {
            out.push(n);
        }
    }
    Ok(out)
}

fn owned_notification(store: &dyn KvStore, user_id: &str, id: &str) -> Result<Notification, ApiError> {
    let id = require_uuid(id, "notification")?;
    let notification = store
        .get_json::<Notification>(&notification_key(id))?
        .ok_or_else(|| ApiError::not_found("Notification not found"))?;
    if notification.recipient_id != user_id {
        return Err(ApiError::forbidden("Not authorized to access this notification"));
    }
    Ok(notification)
}

// === HTTP Handlers ===

pub fn list_notifications(store: &dyn KvStore, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let params = parse_query_params(req.uri());

    let filter = match get_string(&params, "type").as_deref() {
        None | Some("all") => None,
        Some(raw) => Some(
            NotificationType::parse(raw)
                .ok_or_else(|| ApiError::bad_request("Unknown notification type"))?,
        ),
    };

    let notifications: Vec<Notification> = load_notifications(store, &user_id)?
        .into_iter()
        .filter(|n| filter.map_or(true, |kind| n.kind == kind))
        .collect();

    let (page, meta) = Pagination::from_params(&params, NOTIFICATIONS_PER_PAGE).apply(notifications);

    let mut views = Vec::with_capacity(page.len());
    for notification in page {
        let sender = load_user(store, &notification.sender_id)?.map(|u| UserSummary::from(&u));
        views.push(NotificationView { notification, sender });
    }

    json_response(200, &paged_json("notifications", &views, &meta))
}

pub fn mark_as_read(store: &dyn KvStore, req: &Request, id: &str) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let mut notification = owned_notification(store, &user_id, id)?;

    if !notification.is_read {
        notification.is_read = true;
        notification.read_at = Some(now_iso());
        store.set_json(&notification_key(&notification.id), &notification)?;
    }

    json_response(
        200,
        &serde_json::json!({
            "message": "Notification marked as read",
            "notification": notification,
        }),
    )
}

pub fn mark_all_as_read(store: &dyn KvStore, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let now = now_iso();
    for mut n in load_notifications(store, &user_id)? {
        if !n.is_read {
            n.is_read = true;
            n.read_at = Some(now.clone());
            store.set_json(&notification_key(&n.id), &n)?;
        }
    }
    message_response("All notifications marked as read")
}

pub fn delete_notification(store: &dyn KvStore, req: &Request, id: &str) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let notification = owned_notification(store, &user_id, id)?;

    store.delete(&notification_key(&notification.id))?;
    store.remove_from_list(&notifications_key(&user_id), &notification.id)?;

    message_response("Notification deleted successfully")
}

pub fn delete_all_notifications(store: &dyn KvStore, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    for id in store.get_list(&notifications_key(&user_id))? {
        store.delete(&notification_key(&id))?;
    }
    store.delete(&notifications_key(&user_id))?;
    message_response("All notifications deleted successfully")
}

pub fn unread_count(store: &dyn KvStore, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let count = load_notifications(store, &user_id)?
        .iter()
        .filter(|n| !n.is_read)
        .count();
    json_response(200, &serde_json::json!({ "unreadCount": count }))
}
