use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use spin_sdk::http::{Request, Response};
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::auth::{require_auth, validate_token};
use crate::config::*;
use crate::core::errors::ApiError;
use crate::core::helpers::{hash_password, json_response, new_id, now_iso, parse_body, sanitize_text};
use crate::core::kv::{KvStore, KvStoreExt};
use crate::core::query_params::{get_int, get_string, paged_json, parse_query_params, Pagination};
use crate::graph::{ensure_can_view, RelationState, RelationshipStore};
use crate::models::models::{PublicUser, User};
use crate::posts::count_public_posts;

fn username_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.]+$").expect("Regex should compile"))
}

fn email_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Regex should compile")
    })
}

// === Account records ===

pub fn load_user(store: &dyn KvStore, user_id: &str) -> anyhow::Result<Option<User>> {
    store.get_json(&user_key(user_id))
}

pub fn require_account(store: &dyn KvStore, user_id: &str) -> Result<User, ApiError> {
    load_user(store, user_id)?.ok_or_else(|| ApiError::not_found("User not found"))
}

pub fn save_user(store: &dyn KvStore, user: &User) -> anyhow::Result<()> {
    store.set_json(&user_key(&user.id), user)
}

pub fn all_users(store: &dyn KvStore) -> anyhow::Result<Vec<User>> {
    let mut users = Vec::new();
    for id in store.get_list(USERS_LIST_KEY)? {
        if let Some(u) = load_user(store, &id)? {
            users.push(u);
        }
    }
    Ok(users)
}

pub fn find_by_username(store: &dyn KvStore, username: &str) -> anyhow::Result<Option<User>> {
    Ok(all_users(store)?.into_iter().find(|u| u.username == username))
}

pub fn find_by_email(store: &dyn KvStore, email: &str) -> anyhow::Result<Option<User>> {
    let email = email.trim().to_lowercase();
    Ok(all_users(store)?.into_iter().find(|u| u.email == email))
}

/// Fields accepted at registration.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub is_private: Option<bool>,
}

pub fn create_account(store: &dyn KvStore, new: NewAccount) -> Result<User, ApiError> {
    let username = new.username.trim();
    let name = sanitize_text(new.name.trim());
    let email = new.email.trim().to_lowercase();

    if username.is_empty() || name.is_empty() || email.is_empty() || new.password.is_empty() {
        return Err(ApiError::bad_request(
            "Username, name, email and password are required",
        ));
    }
    let username_chars = username.chars().count();
    if username_chars < MIN_USERNAME_LENGTH || username_chars > MAX_USERNAME_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Username must be {}-{} characters",
            MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH
        )));
    }
    if !username_regex().is_match(username) {
        return Err(ApiError::bad_request(
            "Username may only contain letters, numbers, underscores and dots",
        ));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(ApiError::bad_request("Name is too long"));
    }
    if !email_regex().is_match(&email) {
        return Err(ApiError::bad_request("Please enter a valid email"));
    }
    if new.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    // Check duplicate email / username
    for u in all_users(store)? {
        if u.email == email {
            return Err(ApiError::Conflict("Email already exists".to_string()));
        }
        if u.username == username {
            return Err(ApiError::Conflict("Username already exists".to_string()));
        }
    }

    let user = User {
        id: new_id(),
        username: username.to_string(),
        name,
        email,
        password: hash_password(&new.password)?,
        bio: None,
        location: None,
        website: None,
        avatar: None,
        is_private: new.is_private.unwrap_or(false),
        created_at: now_iso(),
        last_seen: None,
    };

    save_user(store, &user)?;
    store.push_unique(USERS_LIST_KEY, &user.id)?;
    tracing::info!(user_id = %user.id, username = %user.username, "account created");

    Ok(user)
}

/// Profile for the account owner, email included.
pub fn self_profile_json(user: &User) -> Result<serde_json::Value, ApiError> {
    let mut value = serde_json::to_value(PublicUser::from(user)).map_err(anyhow::Error::from)?;
    value["email"] = serde_json::Value::String(user.email.clone());
    Ok(value)
}

fn user_by_username(store: &dyn KvStore, username: &str) -> Result<User, ApiError> {
    find_by_username(store, username)?.ok_or_else(|| ApiError::not_found("User not found"))
}

// === HTTP Handlers ===

pub fn get_user_profile(store: &dyn KvStore, req: &Request, username: &str) -> Result<Response, ApiError> {
    let viewer = validate_token(store, req);
    let user = user_by_username(store, username)?;
    let graph = RelationshipStore::new(store);

    ensure_can_view(&graph, viewer.as_deref(), &user)?;

    let edges = graph.edges(&user.id)?;
    let relation = match viewer.as_deref() {
        Some(v) => graph.relation_state(v, &user.id)?,
        None => RelationState::None,
    };

    let mut profile = serde_json::to_value(PublicUser::from(&user)).map_err(anyhow::Error::from)?;
    profile["postCount"] = count_public_posts(store, &user.id)?.into();
    profile["followersCount"] = edges.followers.len().into();
    profile["followingCount"] = edges.following.len().into();
    profile["relation"] = serde_json::to_value(relation).map_err(anyhow::Error::from)?;
    profile["isOwnProfile"] = (viewer.as_deref() == Some(user.id.as_str())).into();

    json_response(200, &serde_json::json!({ "user": profile }))
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct ProfileUpdate {
    name: Option<String>,
    bio: Option<String>,
    location: Option<String>,
    website: Option<String>,
    avatar: Option<String>,
    is_private: Option<bool>,
}

fn optional_text(value: &str, max: usize, field: &str) -> Result<Option<String>, ApiError> {
    let clean = sanitize_text(value.trim());
    if clean.chars().count() > max {
        return Err(ApiError::bad_request(format!(
            "{} too long (max {} chars)",
            field, max
        )));
    }
    Ok(if clean.is_empty() { None } else { Some(clean) })
}

pub fn update_profile(store: &dyn KvStore, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let mut user = require_account(store, &user_id)?;
    let update: ProfileUpdate = parse_body(req)?;

    if let Some(name) = update.name.as_deref() {
        let name = optional_text(name, MAX_NAME_LENGTH, "Name")?;
        // An empty name keeps the current one.
        if let Some(name) = name {
            user.name = name;
        }
    }
    if let Some(bio) = update.bio.as_deref() {
        user.bio = optional_text(bio, MAX_BIO_LENGTH, "Bio")?;
    }
    if let Some(location) = update.location.as_deref() {
        user.location = optional_text(location, MAX_LOCATION_LENGTH, "Location")?;
    }
    if let Some(website) = update.website.as_deref() {
        user.website = optional_text(website, MAX_WEBSITE_LENGTH, "Website")?;
    }
    if let Some(avatar) = update.avatar.as_deref() {
        user.avatar = optional_text(avatar, MAX_WEBSITE_LENGTH, "Avatar URL")?;
    }
    if let Some(is_private) = update.is_private {
        if is_private != user.is_private {
            tracing::info!(user_id = %user.id, is_private, "account privacy changed");
        }
        user.is_private = is_private;
    }

    save_user(store, &user)?;

    json_response(
        200,
        &serde_json::json!({
            "message": "Profile updated successfully",
            "user": self_profile_json(&user)?,
        }),
    )
}

pub fn search_users(store: &dyn KvStore, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let params = parse_query_params(req.uri());
    let q = get_string(&params, "q").ok_or_else(|| ApiError::bad_request("Search query is required"))?;

    let matcher = RegexBuilder::new(&regex::escape(q.trim()))
        .case_insensitive(true)
        .build()
        .map_err(anyhow::Error::from)?;

    let matches: Vec<PublicUser> = all_users(store)?
        .iter()
        .filter(|u| u.id != user_id)
        .filter(|u| matcher.is_match(&u.username) || matcher.is_match(&u.name))
        .map(PublicUser::from)
        .collect();

    let (page, meta) = Pagination::from_params(&params, SEARCH_PER_PAGE).apply(matches);
    json_response(200, &paged_json("users", &page, &meta))
}

pub fn suggested_users(store: &dyn KvStore, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let params = parse_query_params(req.uri());
    let limit = get_int(&params, "limit", SUGGESTED_USERS).min(MAX_PAGE_LIMIT);
    let graph = RelationshipStore::new(store);
    let following: HashSet<String> = graph.edges(&user_id)?.following.into_iter().collect();
    let follower_counts = graph.follower_counts()?;

    let mut candidates = Vec::new();
    for user in all_users(store)? {
        if user.id == user_id || following.contains(&user.id) {
            continue;
        }
        let followers = follower_counts.get(&user.id).copied().unwrap_or(0);
        candidates.push((followers, user));
    }
    // Most followed first
    candidates.sort_by(|a, b| b.0.cmp(&a.0));

    let suggested: Vec<PublicUser> = candidates
        .iter()
        .take(limit)
        .map(|(_, u)| PublicUser::from(u))
        .collect();

    json_response(200, &serde_json::json!({ "suggestedUsers": suggested }))
}

#[derive(Clone, Copy)]
pub enum EdgeList {
    Followers,
    Following,
}

pub fn list_edges(store: &dyn KvStore, req: &Request, username: &str, which: EdgeList) -> Result<Response, ApiError> {
    let viewer = require_auth(store, req)?;
    let user = user_by_username(store, username)?;
    let graph = RelationshipStore::new(store);
    ensure_can_view(&graph, Some(&viewer), &user)?;

    let edges = graph.edges(&user.id)?;
    let (ids, field) = match which {
        EdgeList::Followers => (edges.followers, "followers"),
        EdgeList::Following => (edges.following, "following"),
    };

    let mut accounts = Vec::new();
    for id in ids {
        if let Some(u) = load_user(store, &id)? {
            accounts.push(PublicUser::from(&u));
        }
    }

    let (page, meta) = Pagination::from_uri(req.uri(), USERS_PER_PAGE).apply(accounts);
    json_response(200, &paged_json(field, &page, &meta))
}
