use serde::{Deserialize, Serialize};
use spin_sdk::http::{Request, Response};

use crate::auth::require_auth;
use crate::config::*;
use crate::core::errors::ApiError;
use crate::core::helpers::{json_response, message_response, new_id, now_iso, parse_body, require_uuid, sanitize_text};
use crate::core::kv::{KvStore, KvStoreExt};
use crate::core::query_params::{paged_json, Pagination};
use crate::graph::{can_view_post, RelationshipStore};
use crate::models::models::{Comment, NotificationType, Post, UserSummary};
use crate::notifications::{NotificationDraft, NotificationEmitter, OutboxEmitter};
use crate::posts::{load_post, require_post};
use crate::users::load_user;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommentView {
    #[serde(flatten)]
    comment: Comment,
    author: Option<UserSummary>,
    like_count: usize,
    reply_count: usize,
}

fn load_comment(store: &dyn KvStore, id: &str) -> anyhow::Result<Option<Comment>> {
    store.get_json(&comment_key(id))
}

fn require_comment(store: &dyn KvStore, id: &str) -> Result<Comment, ApiError> {
    let id = require_uuid(id, "comment")?;
    load_comment(store, id)?.ok_or_else(|| ApiError::not_found("Comment not found"))
}

/// All comments on a post, oldest first, replies included.
fn post_comments(store: &dyn KvStore, post_id: &str) -> anyhow::Result<Vec<Comment>> {
    let mut out = Vec::new();
    for id in store.get_list(&post_comments_key(post_id))? {
        if let Some(c) = load_comment(store, &id)? {
            out.push(c);
        }
    }
    Ok(out)
}

/// The post must be readable by `user_id` before its comments are.
fn ensure_post_readable(store: &dyn KvStore, user_id: &str, post_id: &str) -> Result<Post, ApiError> {
    let post = require_post(store, post_id)?;
    let author = load_user(store, &post.author_id)?.ok_or_else(|| ApiError::not_found("Post not found"))?;
    if !can_view_post(&RelationshipStore::new(store), Some(user_id), &post, &author)? {
        return Err(ApiError::forbidden("You don't have permission to view this post"));
    }
    Ok(post)
}

fn comment_views(store: &dyn KvStore, comments: Vec<Comment>, all: &[Comment]) -> anyhow::Result<Vec<CommentView>> {
    let mut views = Vec::with_capacity(comments.len());
    for comment in comments {
        let reply_count = all
            .iter()
            .filter(|c| c.parent_comment_id.as_deref() == Some(comment.id.as_str()))
            .count();
        views.push(CommentView {
            author: load_user(store, &comment.author_id)?.map(|u| UserSummary::from(&u)),
            like_count: comment.likes.len(),
            reply_count,
            comment,
        });
    }
    Ok(views)
}

fn clean_content(raw: &str) -> Result<String, ApiError> {
    let content = sanitize_text(raw.trim());
    if content.is_empty() {
        return Err(ApiError::bad_request("Comment content is required"));
    }
    if content.chars().count() > MAX_COMMENT_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Comment too long (max {} chars)",
            MAX_COMMENT_LENGTH
        )));
    }
    Ok(content)
}

pub fn add_comment(
    store: &dyn KvStore,
    emitter: &dyn NotificationEmitter,
    user_id: &str,
    post_id: &str,
    content: &str,
    parent_comment_id: Option<&str>,
) -> Result<Comment, ApiError> {
    let post = ensure_post_readable(store, user_id, post_id)?;
    let content = clean_content(content)?;

    if let Some(parent_id) = parent_comment_id {
        let parent = require_comment(store, parent_id)?;
        if parent.post_id != post.id {
            return Err(ApiError::bad_request("Parent comment belongs to another post"));
        }
    }

    let comment = Comment {
        id: new_id(),
        post_id: post.id.clone(),
        author_id: user_id.to_string(),
        content,
        parent_comment_id: parent_comment_id.map(str::to_string),
        likes: Vec::new(),
        is_edited: false,
        created_at: now_iso(),
    };
    store.set_json(&comment_key(&comment.id), &comment)?;
    store.push_unique(&post_comments_key(&post.id), &comment.id)?;

    if post.author_id != user_id {
        emitter.emit(
            NotificationDraft::new(NotificationType::Comment, &post.author_id, user_id)
                .with_post(&post.id)
                .with_comment(&comment.id),
        );
    }
    tracing::debug!(comment_id = %comment.id, post_id = %post.id, "comment added");
    Ok(comment)
}

/// Flip `user_id`'s like on a comment. Returns whether it is now liked.
pub fn toggle_comment_like(
    store: &dyn KvStore,
    emitter: &dyn NotificationEmitter,
    user_id: &str,
    comment_id: &str,
) -> Result<(bool, usize), ApiError> {
    let mut comment = require_comment(store, comment_id)?;
    ensure_post_readable(store, user_id, &comment.post_id)?;

    let liked = match comment.likes.iter().position(|id| id == user_id) {
        Some(idx) => {
            comment.likes.remove(idx);
            false
        }
        None => {
            comment.likes.push(user_id.to_string());
            true
        }
    };
    store.set_json(&comment_key(&comment.id), &comment)?;

    if liked && comment.author_id != user_id {
        emitter.emit(
            NotificationDraft::new(NotificationType::Like, &comment.author_id, user_id)
                .with_post(&comment.post_id)
                .with_comment(&comment.id),
        );
    }
    Ok((liked, comment.likes.len()))
}

/// Remove a comment and its replies. Allowed for the comment author and the post owner.
pub fn remove_comment(store: &dyn KvStore, user_id: &str, comment_id: &str) -> Result<usize, ApiError> {
    let comment = require_comment(store, comment_id)?;
    let post_owner = load_post(store, &comment.post_id)?.map(|p| p.author_id);
    if comment.author_id != user_id && post_owner.as_deref() != Some(user_id) {
        return Err(ApiError::forbidden("Not authorized to delete this comment"));
    }

    let list_key = post_comments_key(&comment.post_id);
    let all = post_comments(store, &comment.post_id)?;
    // Walk the whole reply subtree; replies can nest.
    let mut doomed = vec![comment.id.clone()];
    let mut next = 0;
    while next < doomed.len() {
        let parent = doomed[next].clone();
        for c in &all {
            if c.parent_comment_id.as_deref() == Some(parent.as_str()) && !doomed.contains(&c.id) {
                doomed.push(c.id.clone());
            }
        }
        next += 1;
    }
    for id in &doomed {
        store.delete(&comment_key(id))?;
        store.remove_from_list(&list_key, id)?;
    }
    tracing::debug!(comment_id = %comment.id, removed = doomed.len(), "comment deleted");
    Ok(doomed.len())
}

// === HTTP Handlers ===

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct NewComment {
    #[serde(default)]
    content: String,
    parent_comment_id: Option<String>,
}

pub fn handle_add_comment(store: &dyn KvStore, req: &Request, post_id: &str) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let post_id = require_uuid(post_id, "post")?;
    let new: NewComment = parse_body(req)?;

    let comment = add_comment(
        store,
        &OutboxEmitter::new(store),
        &user_id,
        post_id,
        &new.content,
        new.parent_comment_id.as_deref().filter(|id| !id.is_empty()),
    )?;
    let all = post_comments(store, post_id)?;
    let view = comment_views(store, vec![comment], &all)?;

    json_response(
        201,
        &serde_json::json!({
            "message": "Comment added successfully",
            "comment": view.first(),
        }),
    )
}

pub fn list_comments(store: &dyn KvStore, req: &Request, post_id: &str) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let post_id = require_uuid(post_id, "post")?;
    ensure_post_readable(store, &user_id, post_id)?;

    let all = post_comments(store, post_id)?;
    let mut top_level: Vec<Comment> = all
        .iter()
        .filter(|c| c.parent_comment_id.is_none())
        .cloned()
        .collect();
    // Newest first
    top_level.reverse();

    let (page, meta) = Pagination::from_uri(req.uri(), COMMENTS_PER_PAGE).apply(top_level);
    let views = comment_views(store, page, &all)?;
    json_response(200, &paged_json("comments", &views, &meta))
}

pub fn list_replies(store: &dyn KvStore, req: &Request, comment_id: &str) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let parent = require_comment(store, comment_id)?;
    ensure_post_readable(store, &user_id, &parent.post_id)?;

    let all = post_comments(store, &parent.post_id)?;
    let replies: Vec<Comment> = all
        .iter()
        .filter(|c| c.parent_comment_id.as_deref() == Some(parent.id.as_str()))
        .cloned()
        .collect();

    let (page, meta) = Pagination::from_uri(req.uri(), REPLIES_PER_PAGE).apply(replies);
    let views = comment_views(store, page, &all)?;
    json_response(200, &paged_json("replies", &views, &meta))
}

pub fn handle_toggle_comment_like(store: &dyn KvStore, req: &Request, comment_id: &str) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let (liked, like_count) = toggle_comment_like(store, &OutboxEmitter::new(store), &user_id, comment_id)?;

    json_response(
        200,
        &serde_json::json!({
            "message": if liked { "Comment liked" } else { "Comment unliked" },
            "liked": liked,
            "likeCount": like_count,
        }),
    )
}

#[derive(Deserialize)]
struct CommentUpdate {
    #[serde(default)]
    content: String,
}

pub fn update_comment(store: &dyn KvStore, req: &Request, comment_id: &str) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let mut comment = require_comment(store, comment_id)?;
    if comment.author_id != user_id {
        return Err(ApiError::forbidden("Not authorized to edit this comment"));
    }
    let update: CommentUpdate = parse_body(req)?;

    comment.content = clean_content(&update.content)?;
    comment.is_edited = true;
    store.set_json(&comment_key(&comment.id), &comment)?;

    json_response(
        200,
        &serde_json::json!({
            "message": "Comment updated successfully",
            "comment": comment,
        }),
    )
}

pub fn delete_comment(store: &dyn KvStore, req: &Request, comment_id: &str) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    remove_comment(store, &user_id, comment_id)?;
    message_response("Comment deleted successfully")
}
