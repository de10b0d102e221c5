use serde::Deserialize;
use spin_sdk::http::{Request, Response};
use uuid::Uuid;

use crate::config::{token_expiration_hours, token_key};
use crate::core::errors::ApiError;
use crate::core::helpers::{json_response, message_response, now_iso, parse_body, verify_password};
use crate::core::kv::{KvStore, KvStoreExt};
use crate::models::models::TokenData;
use crate::users::{create_account, find_by_email, load_user, require_account, save_user, self_profile_json, NewAccount};

pub(crate) fn issue_token(store: &dyn KvStore, user_id: &str) -> anyhow::Result<String> {
    let token = Uuid::new_v4().to_string();
    let data = TokenData {
        user_id: user_id.to_string(),
        created_at: now_iso(),
    };
    store.set_json(&token_key(&token), &data)?;
    Ok(token)
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.header("Authorization")?
        .as_str()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve the caller from the bearer token, if any.
pub fn validate_token(store: &dyn KvStore, req: &Request) -> Option<String> {
    let token = bearer_token(req)?;
    let data = store.get_json::<TokenData>(&token_key(token)).ok()??;

    // Check if token is expired
    if let Ok(created) = chrono::DateTime::parse_from_rfc3339(&data.created_at) {
        let age_hours = (chrono::Utc::now() - created.with_timezone(&chrono::Utc)).num_hours();
        if age_hours > token_expiration_hours() {
            tracing::debug!(user_id = %data.user_id, "expired token rejected");
            return None;
        }
    }
    // Check if user still exists
    load_user(store, &data.user_id).ok()??;
    Some(data.user_id)
}

pub fn require_auth(store: &dyn KvStore, req: &Request) -> Result<String, ApiError> {
    validate_token(store, req).ok_or(ApiError::Unauthorized)
}

pub fn register_user(store: &dyn KvStore, req: &Request) -> Result<Response, ApiError> {
    let new: NewAccount = parse_body(req)?;
    let user = create_account(store, new)?;
    let token = issue_token(store, &user.id)?;

    json_response(
        201,
        &serde_json::json!({
            "message": "User registered successfully",
            "token": token,
            "user": self_profile_json(&user)?,
        }),
    )
}

#[derive(Deserialize)]
struct Credentials {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

pub fn login_user(store: &dyn KvStore, req: &Request) -> Result<Response, ApiError> {
    let creds: Credentials = parse_body(req)?;

    let Some(mut user) = find_by_email(store, &creds.email)? else {
        tracing::info!("login with unknown email");
        return Err(ApiError::Unauthorized);
    };
    if !verify_password(&creds.password, &user.password) {
        tracing::info!(user_id = %user.id, "login with wrong password");
        return Err(ApiError::Unauthorized);
    }

    user.last_seen = Some(now_iso());
    save_user(store, &user)?;
    let token = issue_token(store, &user.id)?;

    json_response(
        200,
        &serde_json::json!({
            "message": "Login successful",
            "token": token,
            "user": self_profile_json(&user)?,
        }),
    )
}

pub fn get_me(store: &dyn KvStore, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    let user = require_account(store, &user_id)?;
    json_response(200, &serde_json::json!({ "user": self_profile_json(&user)? }))
}

pub fn logout_user(store: &dyn KvStore, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_auth(store, req)?;
    if let Some(token) = bearer_token(req) {
        store.delete(&token_key(token))?;
    }
    if let Some(mut user) = load_user(store, &user_id)? {
        user.last_seen = Some(now_iso());
        save_user(store, &user)?;
    }
    message_response("Logged out successfully")
}
