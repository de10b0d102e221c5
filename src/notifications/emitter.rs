//! Notification hand-off.
//!
//! Operations never write notifications themselves. They hand a
//! [`NotificationDraft`] to a [`NotificationEmitter`], which cannot fail from
//! the caller's point of view. The store-backed emitter parks drafts under
//! `notification_outbox:*`; [`deliver_pending`] later turns them into
//! notifications, off the triggering request's path.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{notification_key, notifications_key, outbox_key, NOTIFICATION_OUTBOX_PREFIX};
use crate::core::helpers::{new_id, now_iso};
use crate::core::kv::{KvStore, KvStoreExt};
use crate::models::models::{Notification, NotificationType};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDraft {
    pub recipient_id: String,
    pub sender_id: String,
    pub kind: NotificationType,
    pub post_id: Option<String>,
    pub comment_id: Option<String>,
    pub message_id: Option<String>,
}

impl NotificationDraft {
    pub fn new(kind: NotificationType, recipient: &str, sender: &str) -> Self {
        Self {
            recipient_id: recipient.to_string(),
            sender_id: sender.to_string(),
            kind,
            post_id: None,
            comment_id: None,
            message_id: None,
        }
    }

    pub fn with_post(mut self, post_id: &str) -> Self {
        self.post_id = Some(post_id.to_string());
        self
    }

    pub fn with_comment(mut self, comment_id: &str) -> Self {
        self.comment_id = Some(comment_id.to_string());
        self
    }

    pub fn with_message(mut self, message_id: &str) -> Self {
        self.message_id = Some(message_id.to_string());
        self
    }

    pub fn action(&self) -> &'static str {
        match self.kind {
            NotificationType::Like if self.comment_id.is_some() => "liked your comment",
            NotificationType::Like => "liked your post",
            NotificationType::Follow => "started following you",
            NotificationType::FollowRequest => "sent you a follow request",
            NotificationType::FollowAccept => "accepted your follow request",
            NotificationType::Comment => "commented on your post",
            NotificationType::Message => "sent you a message",
        }
    }
}

pub trait NotificationEmitter {
    /// Fire and forget. Failures are logged, never returned.
    fn emit(&self, draft: NotificationDraft);
}

pub struct OutboxEmitter<'a> {
    store: &'a dyn KvStore,
}

impl<'a> OutboxEmitter<'a> {
    pub fn new(store: &'a dyn KvStore) -> Self {
        Self { store }
    }
}

impl NotificationEmitter for OutboxEmitter<'_> {
    fn emit(&self, draft: NotificationDraft) {
        if draft.recipient_id == draft.sender_id {
            debug!(kind = ?draft.kind, "skipping self notification");
            return;
        }
        // Sortable prefix keeps delivery in emission order.
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let key = outbox_key(&format!("{:020}-{}", nanos, new_id()));
        if let Err(e) = self.store.set_json(&key, &draft) {
            warn!(error = %e, kind = ?draft.kind, recipient = %draft.recipient_id, "failed to enqueue notification");
        }
    }
}

fn persist(store: &dyn KvStore, draft: NotificationDraft) -> anyhow::Result<Notification> {
    let notification = Notification {
        id: new_id(),
        action: draft.action().to_string(),
        recipient_id: draft.recipient_id,
        sender_id: draft.sender_id,
        kind: draft.kind,
        post_id: draft.post_id,
        comment_id: draft.comment_id,
        message_id: draft.message_id,
        is_read: false,
        read_at: None,
        created_at: now_iso(),
    };
    store.set_json(&notification_key(&notification.id), &notification)?;
    store.prepend(&notifications_key(&notification.recipient_id), &notification.id)?;
    Ok(notification)
}

/// Drain the outbox into stored notifications. Returns how many were delivered.
///
/// A draft that cannot be decoded or written is dropped with a warning; only a
/// failure to list the outbox itself is returned.
pub fn deliver_pending(store: &dyn KvStore) -> anyhow::Result<usize> {
    let mut delivered = 0;
    for key in store.scan_keys(NOTIFICATION_OUTBOX_PREFIX)? {
        let bytes = match store.take(&key) {
            Ok(Some(bytes)) => bytes,
            // Claimed by a concurrent drain
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, %key, "failed to claim outbox entry");
                continue;
            }
        };
        let draft: NotificationDraft = match serde_json::from_slice(&bytes) {
            Ok(draft) => draft,
            Err(e) => {
                warn!(error = %e, %key, "dropping malformed outbox entry");
                continue;
            }
        };
        match persist(store, draft) {
            Ok(n) => {
                debug!(id = %n.id, kind = ?n.kind, recipient = %n.recipient_id, "notification delivered");
                delivered += 1;
            }
            Err(e) => warn!(error = %e, %key, "dropping undeliverable notification"),
        }
    }
    Ok(delivered)
}
