use spin_sdk::http::{Request, Response};
use tracing::{error, warn};

use crate::core::errors::ApiError;
use crate::core::helpers::json_response;
use crate::core::kv::KvStore;
use crate::users::EdgeList;
use crate::{auth, comments, follow, messages, notifications, posts, users};

/// Dispatch a request to its handler and turn any error into a JSON response.
///
/// Shared by the Spin component and the native dev server.
pub fn route(store: &dyn KvStore, req: &Request) -> Response {
    let method = req.method().to_string();
    let path = req.path().to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let result = match (method.as_str(), segments.as_slice()) {
        ("GET", []) => banner(),

        // Auth
        ("POST", ["api", "auth", "register"]) => auth::register_user(store, req),
        ("POST", ["api", "auth", "login"]) => auth::login_user(store, req),
        ("POST", ["api", "auth", "logout"]) => auth::logout_user(store, req),
        ("GET", ["api", "auth", "me"]) => auth::get_me(store, req),

        // Users and the follow graph
        ("GET", ["api", "users", "search"]) => users::search_users(store, req),
        ("GET", ["api", "users", "suggested"]) => users::suggested_users(store, req),
        ("GET", ["api", "users", "follow-requests"]) => follow::list_follow_requests(store, req),
        ("POST", ["api", "users", "follow-requests", requester]) => {
            follow::handle_respond_to_request(store, req, requester)
        }
        ("GET", ["api", "users", "profile", username]) => users::get_user_profile(store, req, username),
        ("PUT", ["api", "users", "profile"]) => users::update_profile(store, req),
        ("POST", ["api", "users", id, "follow"]) => follow::handle_toggle_follow(store, req, id),
        ("DELETE", ["api", "users", id, "follow-request"]) => follow::handle_cancel_request(store, req, id),
        ("GET", ["api", "users", username, "followers"]) => {
            users::list_edges(store, req, username, EdgeList::Followers)
        }
        ("GET", ["api", "users", username, "following"]) => {
            users::list_edges(store, req, username, EdgeList::Following)
        }

        // Posts
        ("POST", ["api", "posts"]) => posts::create_post(store, req),
        ("GET", ["api", "posts"]) => posts::get_feed(store, req),
        ("GET", ["api", "posts", "explore"]) => posts::explore_posts(store, req),
        ("GET", ["api", "posts", "user", username]) => posts::user_posts(store, req, username),
        ("GET", ["api", "posts", id]) => posts::get_post(store, req, id),
        ("POST", ["api", "posts", id, "like"]) => posts::handle_toggle_like(store, req, id),
        ("PUT", ["api", "posts", id]) => posts::edit_post(store, req, id),
        ("DELETE", ["api", "posts", id]) => posts::delete_post(store, req, id),

        // Comments
        ("POST", ["api", "comments", "posts", post_id]) => comments::handle_add_comment(store, req, post_id),
        ("GET", ["api", "comments", "posts", post_id]) => comments::list_comments(store, req, post_id),
        ("GET", ["api", "comments", id, "replies"]) => comments::list_replies(store, req, id),
        ("POST", ["api", "comments", id, "like"]) => comments::handle_toggle_comment_like(store, req, id),
        ("PUT", ["api", "comments", id]) => comments::update_comment(store, req, id),
        ("DELETE", ["api", "comments", id]) => comments::delete_comment(store, req, id),

        // Messages
        ("POST", ["api", "messages"]) => messages::handle_send_message(store, req),
        ("GET", ["api", "messages", "conversations"]) => messages::get_conversations(store, req),
        ("GET", ["api", "messages", "unread", "count"]) => messages::unread_count(store, req),
        ("GET", ["api", "messages", "conversation", user_id]) => messages::get_conversation(store, req, user_id),
        ("PUT", ["api", "messages", user_id, "read"]) => messages::handle_mark_read(store, req, user_id),
        ("PUT", ["api", "messages", id]) => messages::edit_message(store, req, id),
        ("DELETE", ["api", "messages", id]) => messages::delete_message(store, req, id),

        // Notifications
        ("GET", ["api", "notifications"]) => notifications::list_notifications(store, req),
        ("DELETE", ["api", "notifications"]) => notifications::delete_all_notifications(store, req),
        ("PUT", ["api", "notifications", "read-all"]) => notifications::mark_all_as_read(store, req),
        ("GET", ["api", "notifications", "unread", "count"]) => notifications::unread_count(store, req),
        ("PUT", ["api", "notifications", id, "read"]) => notifications::mark_as_read(store, req, id),
        ("DELETE", ["api", "notifications", id]) => notifications::delete_notification(store, req, id),

        _ => Err(ApiError::not_found("No route found")),
    };

    match result {
        Ok(resp) => resp,
        Err(err) => {
            match &err {
                ApiError::InternalError(detail) => {
                    error!(%method, %path, error = %detail, "request failed")
                }
                ApiError::NotFound(_) | ApiError::Unauthorized => {}
                other => warn!(%method, %path, status = other.status(), "{}", other),
            }
            err.into()
        }
    }
}

fn banner() -> Result<Response, ApiError> {
    json_response(
        200,
        &serde_json::json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "status": "ok",
        }),
    )
}
