use crate::core::errors::ApiError;
use crate::core::kv::KvStore;
use crate::graph::store::RelationshipStore;
use crate::models::models::User;
use crate::users::load_user;

/// Messaging eligibility.
///
/// Both accounts' `followers` and `following` sets are consulted on their own;
/// all four memberships must hold. An account can never message itself.
pub fn can_message(graph: &RelationshipStore, a: &str, b: &str) -> anyhow::Result<bool> {
    if a == b {
        return Ok(false);
    }
    let rel = graph.load(a, b)?;
    let (side_a, side_b) = (rel.side(a), rel.side(b));

    let a_in_b_followers = side_b.follower;
    let a_in_b_following = side_b.following;
    let b_in_a_followers = side_a.follower;
    let b_in_a_following = side_a.following;

    Ok(a_in_b_followers && a_in_b_following && b_in_a_followers && b_in_a_following)
}

/// Authorize `sender` to talk to `receiver`, returning the receiver account.
///
/// Unknown receiver is NotFound, self-messaging is a bad request, and anything
/// short of a full mutual follow is Forbidden.
pub fn ensure_can_message(store: &dyn KvStore, sender: &str, receiver: &str) -> Result<User, ApiError> {
    let receiver_user =
        load_user(store, receiver)?.ok_or_else(|| ApiError::not_found("User not found"))?;
    if sender == receiver {
        return Err(ApiError::bad_request("Cannot send message to yourself"));
    }
    if !can_message(&RelationshipStore::new(store), sender, receiver)? {
        return Err(ApiError::forbidden(
            "You can only chat with users who follow you back.",
        ));
    }
    Ok(receiver_user)
}
