//! Follow / follow-request workflow.
//!
//! ```text
//! None ──toggle (public)──▶ Mutual ──toggle──▶ None
//! None ──toggle (private)─▶ Requested ──accept──▶ requester follows target
//!                           Requested ──reject / cancel──▶ None
//! ```

use serde::Deserialize;
use spin_sdk::http::{Request, Response};
use tracing::info;

use crate::auth::require_auth;
use crate::core::errors::ApiError;
use crate::core::helpers::{json_response, message_response, parse_body, require_uuid};
use crate::core::kv::KvStore;
use crate::graph::{FollowDecision, RelationshipStore};
use crate::models::models::{NotificationType, PublicUser};
use crate::notifications::{NotificationDraft, NotificationEmitter, OutboxEmitter};
use crate::users::{load_user, require_account};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOutcome {
    Followed,
    Unfollowed,
    Requested,
    /// A request was already pending; nothing changed.
    AlreadyRequested,
}

pub fn toggle_follow(
    store: &dyn KvStore,
    emitter: &dyn NotificationEmitter,
    actor: &str,
    target: &str,
) -> Result<FollowOutcome, ApiError> {
    let target_user = require_account(store, target)?;
    if actor == target {
        return Err(ApiError::bad_request("Cannot follow yourself"));
    }
    let graph = RelationshipStore::new(store);

    if graph.is_following(actor, target)? {
        graph.sever(actor, target)?;
        info!(actor_id = actor, target_id = target, "unfollowed");
        return Ok(FollowOutcome::Unfollowed);
    }

    if target_user.is_private {
        if !graph.add_follow_request(target, actor)? {
            return Ok(FollowOutcome::AlreadyRequested);
        }
        emitter.emit(NotificationDraft::new(NotificationType::FollowRequest, target, actor));
        info!(actor_id = actor, target_id = target, "follow requested");
        return Ok(FollowOutcome::Requested);
    }

    graph.follow_mutually(actor, target)?;
    emitter.emit(NotificationDraft::new(NotificationType::Follow, target, actor));
    info!(actor_id = actor, target_id = target, "followed");
    Ok(FollowOutcome::Followed)
}

pub fn respond_to_follow_request(
    store: &dyn KvStore,
    emitter: &dyn NotificationEmitter,
    target: &str,
    requester: &str,
    decision: FollowDecision,
) -> Result<(), ApiError> {
    RelationshipStore::new(store).resolve_follow_request(target, requester, decision)?;
    if decision == FollowDecision::Accept {
        emitter.emit(NotificationDraft::new(NotificationType::FollowAccept, requester, target));
    }
    info!(target_id = target, requester_id = requester, ?decision, "follow request answered");
    Ok(())
}

/// Withdraw the actor's own pending request.
pub fn cancel_follow_request(store: &dyn KvStore, actor: &str, target: &str) -> Result<bool, ApiError> {
    RelationshipStore::new(store).cancel_follow_request(target, actor)
}

// === HTTP Handlers ===

pub fn handle_toggle_follow(store: &dyn KvStore, req: &Request, target_id: &str) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let target_id = require_uuid(target_id, "user")?;

    let body = match toggle_follow(store, &OutboxEmitter::new(store), &user_id, target_id)? {
        FollowOutcome::Followed => serde_json::json!({ "message": "User followed", "following": true }),
        FollowOutcome::Unfollowed => serde_json::json!({ "message": "User unfollowed", "following": false }),
        FollowOutcome::Requested | FollowOutcome::AlreadyRequested => {
            serde_json::json!({ "message": "Follow request sent", "followRequest": true })
        }
    };
    json_response(200, &body)
}

pub fn list_follow_requests(store: &dyn KvStore, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let edges = RelationshipStore::new(store).edges(&user_id)?;

    let mut requests = Vec::new();
    for id in edges.follow_requests {
        if let Some(u) = load_user(store, &id)? {
            requests.push(PublicUser::from(&u));
        }
    }
    json_response(200, &serde_json::json!({ "followRequests": requests }))
}

#[derive(Deserialize)]
struct FollowRequestAnswer {
    action: String,
}

pub fn handle_respond_to_request(store: &dyn KvStore, req: &Request, requester_id: &str) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let requester_id = require_uuid(requester_id, "user")?;
    let answer: FollowRequestAnswer = parse_body(req)?;

    let decision = match answer.action.as_str() {
        "accept" => FollowDecision::Accept,
        "reject" => FollowDecision::Reject,
        _ => return Err(ApiError::bad_request("Invalid action")),
    };

    respond_to_follow_request(store, &OutboxEmitter::new(store), &user_id, requester_id, decision)?;

    match decision {
        FollowDecision::Accept => message_response("Follow request accepted"),
        FollowDecision::Reject => message_response("Follow request rejected"),
    }
}

pub fn handle_cancel_request(store: &dyn KvStore, req: &Request, target_id: &str) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let target_id = require_uuid(target_id, "user")?;

    if !cancel_follow_request(store, &user_id, target_id)? {
        return Err(ApiError::not_found("No pending follow request"));
    }
    message_response("Follow request cancelled")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::notifications_key;
    use crate::core::kv::{KvStoreExt, MemoryStore};
    use crate::graph::{can_message, can_view, RelationState};
    use crate::notifications::{deliver_pending, load_notifications};
    use crate::users::tests::{insert_user, load};

    fn kinds(store: &MemoryStore, user: &str) -> Vec<NotificationType> {
        deliver_pending(store).unwrap();
        load_notifications(store, user)
            .unwrap()
            .into_iter()
            .map(|n| n.kind)
            .collect()
    }

    #[test]
    fn public_follow_is_mutual_in_one_step() {
        let store = MemoryStore::new();
        let emitter = OutboxEmitter::new(&store);
        let u = insert_user(&store, "u", false);
        let v = insert_user(&store, "v", false);
        let graph = RelationshipStore::new(&store);

        assert_eq!(toggle_follow(&store, &emitter, &u, &v).unwrap(), FollowOutcome::Followed);
        assert_eq!(graph.relation_state(&u, &v).unwrap(), RelationState::Mutual);
        assert!(can_message(&graph, &u, &v).unwrap());
        assert_eq!(kinds(&store, &v), vec![NotificationType::Follow]);
        assert!(kinds(&store, &u).is_empty());
    }

    #[test]
    fn unfollow_removes_both_directions_silently() {
        let store = MemoryStore::new();
        let emitter = OutboxEmitter::new(&store);
        let u = insert_user(&store, "u", false);
        let v = insert_user(&store, "v", false);
        let graph = RelationshipStore::new(&store);

        toggle_follow(&store, &emitter, &u, &v).unwrap();
        assert_eq!(toggle_follow(&store, &emitter, &u, &v).unwrap(), FollowOutcome::Unfollowed);
        assert_eq!(graph.relation_state(&u, &v).unwrap(), RelationState::None);
        assert!(!can_message(&graph, &u, &v).unwrap());
        assert_eq!(kinds(&store, &v), vec![NotificationType::Follow]);
    }

    #[test]
    fn private_request_is_idempotent_and_notifies_once() {
        let store = MemoryStore::new();
        let emitter = OutboxEmitter::new(&store);
        let u = insert_user(&store, "u", false);
        let p = insert_user(&store, "p", true);
        let graph = RelationshipStore::new(&store);

        assert_eq!(toggle_follow(&store, &emitter, &u, &p).unwrap(), FollowOutcome::Requested);
        assert_eq!(
            toggle_follow(&store, &emitter, &u, &p).unwrap(),
            FollowOutcome::AlreadyRequested
        );
        assert_eq!(graph.edges(&p).unwrap().follow_requests, vec![u.clone()]);
        assert_eq!(graph.relation_state(&u, &p).unwrap(), RelationState::Requested);
        assert_eq!(kinds(&store, &p), vec![NotificationType::FollowRequest]);
    }

    #[test]
    fn private_account_scenario() {
        let store = MemoryStore::new();
        let emitter = OutboxEmitter::new(&store);
        let u = insert_user(&store, "u", false);
        let p = insert_user(&store, "p", true);
        let graph = RelationshipStore::new(&store);

        assert!(!can_view(&graph, Some(&u), &load(&store, &p)).unwrap());

        toggle_follow(&store, &emitter, &u, &p).unwrap();
        respond_to_follow_request(&store, &emitter, &p, &u, FollowDecision::Accept).unwrap();

        assert!(graph.is_follower(&p, &u).unwrap());
        assert!(graph.is_following(&u, &p).unwrap());
        assert!(!graph.is_follower(&u, &p).unwrap());
        assert!(graph.edges(&p).unwrap().follow_requests.is_empty());
        assert!(!can_message(&graph, &u, &p).unwrap());
        assert_eq!(kinds(&store, &u), vec![NotificationType::FollowAccept]);

        // P follows back; u is public so this is immediate.
        toggle_follow(&store, &emitter, &p, &u).unwrap();
        assert!(can_message(&graph, &u, &p).unwrap());
        assert!(can_view(&graph, Some(&u), &load(&store, &p)).unwrap());
    }

    #[test]
    fn reject_and_cancel_leave_no_edges() {
        let store = MemoryStore::new();
        let emitter = OutboxEmitter::new(&store);
        let u = insert_user(&store, "u", false);
        let p = insert_user(&store, "p", true);
        let graph = RelationshipStore::new(&store);

        toggle_follow(&store, &emitter, &u, &p).unwrap();
        respond_to_follow_request(&store, &emitter, &p, &u, FollowDecision::Reject).unwrap();
        assert_eq!(graph.relation_state(&u, &p).unwrap(), RelationState::None);
        assert!(!cancel_follow_request(&store, &u, &p).unwrap());

        toggle_follow(&store, &emitter, &u, &p).unwrap();
        assert!(cancel_follow_request(&store, &u, &p).unwrap());
        assert!(matches!(
            respond_to_follow_request(&store, &emitter, &p, &u, FollowDecision::Accept).unwrap_err(),
            ApiError::Forbidden(_)
        ));

        // Only the two follow_request notifications, nothing for the requester.
        assert!(store.get_list(&notifications_key(&u)).unwrap().is_empty());
        assert_eq!(kinds(&store, &p).len(), 2);
    }

    #[test]
    fn self_and_missing_targets() {
        let store = MemoryStore::new();
        let emitter = OutboxEmitter::new(&store);
        let u = insert_user(&store, "u", false);

        assert!(matches!(
            toggle_follow(&store, &emitter, &u, &u).unwrap_err(),
            ApiError::BadRequest(_)
        ));
        let ghost = crate::core::helpers::new_id();
        assert!(matches!(
            toggle_follow(&store, &emitter, &u, &ghost).unwrap_err(),
            ApiError::NotFound(_)
        ));
    }
}
