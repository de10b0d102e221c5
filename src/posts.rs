use serde::{Deserialize, Serialize};
use spin_sdk::http::{Request, Response};

use crate::auth::{require_auth, validate_token};
use crate::config::*;
use crate::core::errors::ApiError;
use crate::core::helpers::{json_response, message_response, new_id, now_iso, parse_body, require_uuid, sanitize_text};
use crate::core::kv::{KvStore, KvStoreExt};
use crate::core::query_params::{paged_json, Pagination};
use crate::graph::{can_view_post, ensure_can_view, RelationshipStore};
use crate::models::models::{NotificationType, Post, UserSummary};
use crate::notifications::{NotificationDraft, NotificationEmitter, OutboxEmitter};
use crate::users::{find_by_username, load_user};

/// Post as returned to clients.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    #[serde(flatten)]
    post: Post,
    author: Option<UserSummary>,
    like_count: usize,
    comment_count: usize,
    is_liked: bool,
}

fn post_view(store: &dyn KvStore, post: Post, viewer: Option<&str>) -> anyhow::Result<PostView> {
    let author = load_user(store, &post.author_id)?.map(|u| UserSummary::from(&u));
    let comment_count = store.get_list(&post_comments_key(&post.id))?.len();
    Ok(PostView {
        like_count: post.likes.len(),
        is_liked: viewer.is_some_and(|v| post.likes.iter().any(|id| id == v)),
        author,
        comment_count,
        post,
    })
}

pub fn load_post(store: &dyn KvStore, post_id: &str) -> anyhow::Result<Option<Post>> {
    store.get_json(&post_key(post_id))
}

pub fn require_post(store: &dyn KvStore, post_id: &str) -> Result<Post, ApiError> {
    load_post(store, post_id)?.ok_or_else(|| ApiError::not_found("Post not found"))
}

/// Every post in the global feed, newest first. Stale ids are skipped.
fn all_posts(store: &dyn KvStore) -> anyhow::Result<Vec<Post>> {
    let mut posts = Vec::new();
    for id in store.get_list(FEED_KEY)? {
        if let Some(p) = load_post(store, &id)? {
            posts.push(p);
        }
    }
    Ok(posts)
}

pub fn count_public_posts(store: &dyn KvStore, author_id: &str) -> anyhow::Result<usize> {
    Ok(all_posts(store)?
        .iter()
        .filter(|p| p.author_id == author_id && p.is_public)
        .count())
}

/// Keep the posts `viewer` may see, in order.
fn visible_posts(store: &dyn KvStore, viewer: Option<&str>, posts: Vec<Post>) -> anyhow::Result<Vec<Post>> {
    let graph = RelationshipStore::new(store);
    let mut out = Vec::with_capacity(posts.len());
    for post in posts {
        let Some(author) = load_user(store, &post.author_id)? else {
            continue;
        };
        if can_view_post(&graph, viewer, &post, &author)? {
            out.push(post);
        }
    }
    Ok(out)
}

fn paged_posts(store: &dyn KvStore, req: &Request, viewer: Option<&str>, posts: Vec<Post>) -> Result<Response, ApiError> {
    let (page, meta) = Pagination::from_uri(req.uri(), POSTS_PER_PAGE).apply(posts);
    let mut views = Vec::with_capacity(page.len());
    for post in page {
        views.push(post_view(store, post, viewer)?);
    }
    json_response(200, &paged_json("posts", &views, &meta))
}

fn clean_tags(tags: Vec<String>) -> Result<Vec<String>, ApiError> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = sanitize_text(tag.trim().trim_start_matches('#')).to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    if out.len() > MAX_TAGS {
        return Err(ApiError::bad_request(format!("At most {} tags allowed", MAX_TAGS)));
    }
    Ok(out)
}

fn clean_caption(caption: &str) -> Result<String, ApiError> {
    let caption = sanitize_text(caption.trim());
    if caption.chars().count() > MAX_CAPTION_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Caption too long (max {} chars)",
            MAX_CAPTION_LENGTH
        )));
    }
    Ok(caption)
}

fn clean_location(location: &str) -> Result<String, ApiError> {
    let location = sanitize_text(location.trim());
    if location.chars().count() > MAX_LOCATION_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Location too long (max {} chars)",
            MAX_LOCATION_LENGTH
        )));
    }
    Ok(location)
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct NewPost {
    #[serde(default)]
    image: String,
    #[serde(default)]
    caption: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    location: String,
    is_public: Option<bool>,
}

// === HTTP Handlers ===

pub fn create_post(store: &dyn KvStore, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let new: NewPost = parse_body(req)?;

    let image = new.image.trim();
    if image.is_empty() {
        return Err(ApiError::bad_request("Image URL is required"));
    }

    let post = Post {
        id: new_id(),
        author_id: user_id.clone(),
        image: image.to_string(),
        caption: clean_caption(&new.caption)?,
        tags: clean_tags(new.tags)?,
        location: clean_location(&new.location)?,
        is_public: new.is_public.unwrap_or(true),
        likes: Vec::new(),
        view_count: 0,
        created_at: now_iso(),
        updated_at: None,
    };

    store.set_json(&post_key(&post.id), &post)?;
    store.prepend(FEED_KEY, &post.id)?;
    tracing::info!(post_id = %post.id, author_id = %user_id, "post created");

    json_response(
        201,
        &serde_json::json!({
            "message": "Post created successfully",
            "post": post_view(store, post, Some(&user_id))?,
        }),
    )
}

/// Own posts plus those of followed accounts.
pub fn get_feed(store: &dyn KvStore, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let following = RelationshipStore::new(store).edges(&user_id)?.following;

    let candidates: Vec<Post> = all_posts(store)?
        .into_iter()
        .filter(|p| p.author_id == user_id || following.contains(&p.author_id))
        .collect();
    let mut posts = visible_posts(store, Some(&user_id), candidates)?;
    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    paged_posts(store, req, Some(&user_id), posts)
}

pub fn explore_posts(store: &dyn KvStore, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let candidates: Vec<Post> = all_posts(store)?
        .into_iter()
        .filter(|p| p.author_id != user_id)
        .collect();
    let posts = visible_posts(store, Some(&user_id), candidates)?;
    paged_posts(store, req, Some(&user_id), posts)
}

pub fn user_posts(store: &dyn KvStore, req: &Request, username: &str) -> Result<Response, ApiError> {
    let viewer = validate_token(store, req);
    let author = find_by_username(store, username)?.ok_or_else(|| ApiError::not_found("User not found"))?;
    ensure_can_view(&RelationshipStore::new(store), viewer.as_deref(), &author)?;

    let candidates: Vec<Post> = all_posts(store)?
        .into_iter()
        .filter(|p| p.author_id == author.id)
        .collect();
    let posts = visible_posts(store, viewer.as_deref(), candidates)?;
    paged_posts(store, req, viewer.as_deref(), posts)
}

pub fn get_post(store: &dyn KvStore, req: &Request, post_id: &str) -> Result<Response, ApiError> {
    let viewer = validate_token(store, req);
    let post_id = require_uuid(post_id, "post")?;
    let mut post = require_post(store, post_id)?;
    let author = load_user(store, &post.author_id)?.ok_or_else(|| ApiError::not_found("Post not found"))?;

    if !can_view_post(&RelationshipStore::new(store), viewer.as_deref(), &post, &author)? {
        return Err(ApiError::forbidden("You don't have permission to view this post"));
    }

    post.view_count += 1;
    store.set_json(&post_key(&post.id), &post)?;

    json_response(200, &serde_json::json!({ "post": post_view(store, post, viewer.as_deref())? }))
}

/// Flip `user_id`'s like on the post. Returns whether it is now liked.
pub fn toggle_like(
    store: &dyn KvStore,
    emitter: &dyn NotificationEmitter,
    user_id: &str,
    post_id: &str,
) -> Result<(bool, usize), ApiError> {
    let mut post = require_post(store, post_id)?;
    let author = load_user(store, &post.author_id)?.ok_or_else(|| ApiError::not_found("Post not found"))?;
    if !can_view_post(&RelationshipStore::new(store), Some(user_id), &post, &author)? {
        return Err(ApiError::forbidden("You don't have permission to view this post"));
    }

    let liked = match post.likes.iter().position(|id| id == user_id) {
        Some(idx) => {
            post.likes.remove(idx);
            false
        }
        None => {
            post.likes.push(user_id.to_string());
            true
        }
    };
    store.set_json(&post_key(&post.id), &post)?;

    if liked && post.author_id != user_id {
        emitter.emit(NotificationDraft::new(NotificationType::Like, &post.author_id, user_id).with_post(&post.id));
    }
    Ok((liked, post.likes.len()))
}

pub fn handle_toggle_like(store: &dyn KvStore, req: &Request, post_id: &str) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let post_id = require_uuid(post_id, "post")?;
    let (liked, like_count) = toggle_like(store, &OutboxEmitter::new(store), &user_id, post_id)?;

    json_response(
        200,
        &serde_json::json!({
            "message": if liked { "Post liked" } else { "Post unliked" },
            "liked": liked,
            "likeCount": like_count,
        }),
    )
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct PostUpdate {
    caption: Option<String>,
    tags: Option<Vec<String>>,
    location: Option<String>,
    is_public: Option<bool>,
}

fn owned_post(store: &dyn KvStore, user_id: &str, post_id: &str) -> Result<Post, ApiError> {
    let post_id = require_uuid(post_id, "post")?;
    let post = require_post(store, post_id)?;
    if post.author_id != user_id {
        return Err(ApiError::forbidden("Not authorized to modify this post"));
    }
    Ok(post)
}

pub fn edit_post(store: &dyn KvStore, req: &Request, post_id: &str) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let mut post = owned_post(store, &user_id, post_id)?;
    let update: PostUpdate = parse_body(req)?;

    if let Some(caption) = update.caption.as_deref() {
        post.caption = clean_caption(caption)?;
    }
    if let Some(tags) = update.tags {
        post.tags = clean_tags(tags)?;
    }
    if let Some(location) = update.location.as_deref() {
        post.location = clean_location(location)?;
    }
    if let Some(is_public) = update.is_public {
        post.is_public = is_public;
    }
    post.updated_at = Some(now_iso());
    store.set_json(&post_key(&post.id), &post)?;

    json_response(
        200,
        &serde_json::json!({
            "message": "Post updated successfully",
            "post": post_view(store, post, Some(&user_id))?,
        }),
    )
}

pub fn delete_post(store: &dyn KvStore, req: &Request, post_id: &str) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let post = owned_post(store, &user_id, post_id)?;

    for comment_id in store.get_list(&post_comments_key(&post.id))? {
        store.delete(&comment_key(&comment_id))?;
    }
    store.delete(&post_comments_key(&post.id))?;
    store.delete(&post_key(&post.id))?;
    store.remove_from_list(FEED_KEY, &post.id)?;
    tracing::info!(post_id = %post.id, "post deleted");

    message_response("Post deleted successfully")
}
