//! Direct messages between mutually-following accounts.
//!
//! Each pair shares one ordered id list at `conversation:{lo}:{hi}` (oldest
//! first); `conversations:{user}` indexes the accounts a user has talked to.

use serde::{Deserialize, Serialize};
use spin_sdk::http::{Request, Response};
use tracing::{debug, info};

use crate::auth::require_auth;
use crate::config::*;
use crate::core::errors::ApiError;
use crate::core::helpers::{json_response, message_response, new_id, now_iso, parse_body, require_uuid, sanitize_text};
use crate::core::kv::{KvStore, KvStoreExt};
use crate::core::query_params::{paged_json, Pagination};
use crate::graph::ensure_can_message;
use crate::models::models::{Message, MessageType, NotificationType, UserSummary};
use crate::notifications::{NotificationDraft, NotificationEmitter, OutboxEmitter};
use crate::users::load_user;

fn load_message(store: &dyn KvStore, id: &str) -> anyhow::Result<Option<Message>> {
    store.get_json(&message_key(id))
}

fn require_message(store: &dyn KvStore, id: &str) -> Result<Message, ApiError> {
    let id = require_uuid(id, "message")?;
    load_message(store, id)?.ok_or_else(|| ApiError::not_found("Message not found"))
}

/// Messages between `a` and `b`, oldest first, as `a` sees them.
fn conversation_messages(store: &dyn KvStore, a: &str, b: &str) -> anyhow::Result<Vec<Message>> {
    let mut out = Vec::new();
    for id in store.get_list(&conversation_key(a, b))? {
        if let Some(m) = load_message(store, &id)? {
            if m.visible_to(a) {
                out.push(m);
            }
        }
    }
    Ok(out)
}

fn clean_content(raw: &str) -> Result<String, ApiError> {
    let content = sanitize_text(raw.trim());
    if content.is_empty() {
        return Err(ApiError::bad_request("Message content is required"));
    }
    if content.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Message too long (max {} chars)",
            MAX_MESSAGE_LENGTH
        )));
    }
    Ok(content)
}

pub fn send_message(
    store: &dyn KvStore,
    emitter: &dyn NotificationEmitter,
    sender: &str,
    receiver: &str,
    content: &str,
    message_type: MessageType,
) -> Result<Message, ApiError> {
    ensure_can_message(store, sender, receiver)?;
    let content = clean_content(content)?;

    let message = Message {
        id: new_id(),
        sender_id: sender.to_string(),
        receiver_id: receiver.to_string(),
        content,
        message_type,
        is_read: false,
        read_at: None,
        is_edited: false,
        edited_at: None,
        deleted_for: Vec::new(),
        created_at: now_iso(),
    };

    store.set_json(&message_key(&message.id), &message)?;
    store.push_unique(&conversation_key(sender, receiver), &message.id)?;
    store.push_unique(&conversation_partners_key(sender), receiver)?;
    store.push_unique(&conversation_partners_key(receiver), sender)?;

    emitter.emit(NotificationDraft::new(NotificationType::Message, receiver, sender).with_message(&message.id));
    info!(message_id = %message.id, sender, receiver, "message sent");
    Ok(message)
}

/// Mark the messages addressed to `reader` among `messages` as read, in place.
fn mark_read(store: &dyn KvStore, reader: &str, messages: &mut [Message]) -> anyhow::Result<usize> {
    let now = now_iso();
    let mut changed = 0;
    for m in messages.iter_mut() {
        if m.receiver_id == reader && !m.is_read {
            m.is_read = true;
            m.read_at = Some(now.clone());
            store.set_json(&message_key(&m.id), m)?;
            changed += 1;
        }
    }
    Ok(changed)
}

/// Mark everything `from` sent to `reader` as read. Returns how many changed.
pub fn mark_conversation_read(store: &dyn KvStore, reader: &str, from: &str) -> anyhow::Result<usize> {
    let mut messages = conversation_messages(store, reader, from)?;
    mark_read(store, reader, &mut messages)
}

/// What happened to a message on delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    ForEveryone,
    ForSelf,
}

pub fn remove_message(store: &dyn KvStore, user_id: &str, message_id: &str) -> Result<Deletion, ApiError> {
    let mut message = require_message(store, message_id)?;

    if message.sender_id == user_id {
        store.delete(&message_key(&message.id))?;
        store.remove_from_list(&conversation_key(&message.sender_id, &message.receiver_id), &message.id)?;
        info!(message_id = %message.id, "message deleted for everyone");
        return Ok(Deletion::ForEveryone);
    }
    if message.receiver_id == user_id {
        if message.visible_to(user_id) {
            message.deleted_for.push(user_id.to_string());
            store.set_json(&message_key(&message.id), &message)?;
        }
        debug!(message_id = %message.id, user_id, "message hidden for receiver");
        return Ok(Deletion::ForSelf);
    }
    Err(ApiError::forbidden("Not authorized to delete this message"))
}

pub fn unread_total(store: &dyn KvStore, user_id: &str) -> anyhow::Result<usize> {
    let mut total = 0;
    for partner in store.get_list(&conversation_partners_key(user_id))? {
        total += conversation_messages(store, user_id, &partner)?
            .iter()
            .filter(|m| m.receiver_id == user_id && !m.is_read)
            .count();
    }
    Ok(total)
}

// === HTTP Handlers ===

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct NewMessage {
    #[serde(default)]
    receiver_id: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    message_type: MessageType,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageView {
    #[serde(flatten)]
    message: Message,
    sender: Option<UserSummary>,
}

fn message_view(store: &dyn KvStore, message: Message) -> anyhow::Result<MessageView> {
    let sender = load_user(store, &message.sender_id)?.map(|u| UserSummary::from(&u));
    Ok(MessageView { message, sender })
}

pub fn handle_send_message(store: &dyn KvStore, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let new: NewMessage = parse_body(req)?;
    let receiver_id = require_uuid(new.receiver_id.trim(), "receiver")?;

    let message = send_message(
        store,
        &OutboxEmitter::new(store),
        &user_id,
        receiver_id,
        &new.content,
        new.message_type,
    )?;

    json_response(
        201,
        &serde_json::json!({
            "message": "Message sent successfully",
            "data": message_view(store, message)?,
        }),
    )
}

pub fn get_conversation(store: &dyn KvStore, req: &Request, other_id: &str) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let other_id = require_uuid(other_id, "user")?;
    ensure_can_message(store, &user_id, other_id)?;

    let mut messages = conversation_messages(store, &user_id, other_id)?;
    messages.reverse();
    let (mut page, meta) = Pagination::from_uri(req.uri(), MESSAGES_PER_PAGE).apply(messages);
    // Newest page first, but each page reads top to bottom.
    page.reverse();

    // Only what the client actually receives counts as read.
    mark_read(store, &user_id, &mut page)?;

    let mut views = Vec::with_capacity(page.len());
    for m in page {
        views.push(message_view(store, m)?);
    }
    json_response(200, &paged_json("messages", &views, &meta))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConversationSummary {
    user: UserSummary,
    last_message: Message,
    unread_count: usize,
}

pub fn get_conversations(store: &dyn KvStore, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;

    let mut conversations = Vec::new();
    for partner_id in store.get_list(&conversation_partners_key(&user_id))? {
        let Some(partner) = load_user(store, &partner_id)? else {
            continue;
        };
        let messages = conversation_messages(store, &user_id, &partner_id)?;
        let unread_count = messages
            .iter()
            .filter(|m| m.receiver_id == user_id && !m.is_read)
            .count();
        let Some(last_message) = messages.into_iter().last() else {
            continue;
        };
        conversations.push(ConversationSummary {
            user: UserSummary::from(&partner),
            last_message,
            unread_count,
        });
    }
    conversations.sort_by(|a, b| b.last_message.created_at.cmp(&a.last_message.created_at));

    json_response(200, &serde_json::json!({ "conversations": conversations }))
}

pub fn handle_mark_read(store: &dyn KvStore, req: &Request, other_id: &str) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let other_id = require_uuid(other_id, "user")?;
    ensure_can_message(store, &user_id, other_id)?;
    let updated = mark_conversation_read(store, &user_id, other_id)?;

    json_response(
        200,
        &serde_json::json!({ "message": "Messages marked as read", "updated": updated }),
    )
}

#[derive(Deserialize)]
struct MessageEdit {
    #[serde(default)]
    content: String,
}

pub fn edit_message(store: &dyn KvStore, req: &Request, message_id: &str) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let mut message = require_message(store, message_id)?;
    if message.sender_id != user_id {
        return Err(ApiError::forbidden("You can only edit your own messages"));
    }
    let edit: MessageEdit = parse_body(req)?;

    message.content = clean_content(&edit.content)?;
    message.is_edited = true;
    message.edited_at = Some(now_iso());
    store.set_json(&message_key(&message.id), &message)?;

    json_response(
        200,
        &serde_json::json!({
            "message": "Message updated successfully",
            "data": message_view(store, message)?,
        }),
    )
}

pub fn delete_message(store: &dyn KvStore, req: &Request, message_id: &str) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    match remove_message(store, &user_id, message_id)? {
        Deletion::ForEveryone => message_response("Message deleted for everyone"),
        Deletion::ForSelf => message_response("Message deleted for you"),
    }
}

pub fn unread_count(store: &dyn KvStore, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    json_response(200, &serde_json::json!({ "unreadCount": unread_total(store, &user_id)? }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kv::MemoryStore;
    use crate::follow::toggle_follow;
    use crate::notifications::{deliver_pending, load_notifications};
    use crate::users::tests::insert_user;

    fn mutual_pair(store: &MemoryStore) -> (String, String) {
        let a = insert_user(store, "a", false);
        let b = insert_user(store, "b", false);
        toggle_follow(store, &OutboxEmitter::new(store), &a, &b).unwrap();
        (a, b)
    }

    #[test]
    fn strangers_cannot_message() {
        let store = MemoryStore::new();
        let a = insert_user(&store, "a", false);
        let b = insert_user(&store, "b", false);
        let err = send_message(&store, &OutboxEmitter::new(&store), &a, &b, "hi", MessageType::Text).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[test]
    fn send_indexes_both_sides_and_notifies() {
        let store = MemoryStore::new();
        let (a, b) = mutual_pair(&store);
        deliver_pending(&store).unwrap();

        let m = send_message(&store, &OutboxEmitter::new(&store), &a, &b, " <p>hey</p> ", MessageType::Text).unwrap();
        assert_eq!(m.content, "hey");
        assert_eq!(store.get_list(&conversation_partners_key(&a)).unwrap(), vec![b.clone()]);
        assert_eq!(store.get_list(&conversation_partners_key(&b)).unwrap(), vec![a.clone()]);
        assert_eq!(unread_total(&store, &b).unwrap(), 1);
        assert_eq!(unread_total(&store, &a).unwrap(), 0);

        deliver_pending(&store).unwrap();
        let kinds: Vec<_> = load_notifications(&store, &b).unwrap().into_iter().map(|n| n.kind).collect();
        assert_eq!(kinds, vec![NotificationType::Message, NotificationType::Follow]);

        assert_eq!(mark_conversation_read(&store, &b, &a).unwrap(), 1);
        assert_eq!(unread_total(&store, &b).unwrap(), 0);
    }

    #[test]
    fn reading_a_conversation_marks_only_the_returned_page() {
        let store = MemoryStore::new();
        let (a, b) = mutual_pair(&store);
        for i in 0..3 {
            send_message(&store, &OutboxEmitter::new(&store), &a, &b, &format!("m{}", i), MessageType::Text).unwrap();
        }

        let token = crate::auth::issue_token(&store, &b).unwrap();
        let req = Request::builder()
            .method(spin_sdk::http::Method::Get)
            .uri(format!("/api/messages/conversation/{}?limit=2", a))
            .header("Authorization", format!("Bearer {}", token))
            .body(Vec::new())
            .build();
        let resp = get_conversation(&store, &req, &a).unwrap();
        assert_eq!(*resp.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        let contents: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["content"].as_str().unwrap())
            .collect();
        assert_eq!(contents, vec!["m1", "m2"]);
        assert_eq!(body["hasNextPage"], true);

        // The oldest message was never shown.
        assert_eq!(unread_total(&store, &b).unwrap(), 1);
    }

    #[test]
    fn mark_read_requires_mutual_follow() {
        let store = MemoryStore::new();
        let a = insert_user(&store, "a", false);
        let b = insert_user(&store, "b", false);
        let token = crate::auth::issue_token(&store, &b).unwrap();
        let req = Request::builder()
            .method(spin_sdk::http::Method::Put)
            .uri(format!("/api/messages/{}/read", a))
            .header("Authorization", format!("Bearer {}", token))
            .body(Vec::new())
            .build();
        assert!(matches!(handle_mark_read(&store, &req, &a).unwrap_err(), ApiError::Forbidden(_)));
    }

    #[test]
    fn receiver_delete_only_hides_for_receiver() {
        let store = MemoryStore::new();
        let (a, b) = mutual_pair(&store);
        let stranger = insert_user(&store, "c", false);
        let m = send_message(&store, &OutboxEmitter::new(&store), &a, &b, "hi", MessageType::Text).unwrap();

        assert!(matches!(
            remove_message(&store, &stranger, &m.id).unwrap_err(),
            ApiError::Forbidden(_)
        ));
        assert_eq!(remove_message(&store, &b, &m.id).unwrap(), Deletion::ForSelf);
        assert!(conversation_messages(&store, &b, &a).unwrap().is_empty());
        assert_eq!(conversation_messages(&store, &a, &b).unwrap().len(), 1);

        assert_eq!(remove_message(&store, &a, &m.id).unwrap(), Deletion::ForEveryone);
        assert!(conversation_messages(&store, &a, &b).unwrap().is_empty());
    }

    #[test]
    fn content_limits() {
        assert!(clean_content("").is_err());
        assert!(clean_content(&"y".repeat(MAX_MESSAGE_LENGTH + 1)).is_err());
        assert_eq!(clean_content(" ok ").unwrap(), "ok");
    }

    #[test]
    fn content_limit_counts_characters() {
        assert!(clean_content(&"你".repeat(1000)).is_ok());
        assert!(clean_content(&"你".repeat(MAX_MESSAGE_LENGTH)).is_ok());
        assert!(clean_content(&"你".repeat(MAX_MESSAGE_LENGTH + 1)).is_err());
    }
}
