pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 30;
pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MAX_NAME_LENGTH: usize = 50;
pub const MAX_BIO_LENGTH: usize = 150;
pub const MAX_WEBSITE_LENGTH: usize = 200;
pub const MAX_CAPTION_LENGTH: usize = 2000;
pub const MAX_LOCATION_LENGTH: usize = 100;
pub const MAX_TAGS: usize = 30;
pub const MAX_COMMENT_LENGTH: usize = 1000;
pub const MAX_MESSAGE_LENGTH: usize = 2000;

pub const MAX_PAGE_LIMIT: usize = 100;
pub const POSTS_PER_PAGE: usize = 10;
pub const USERS_PER_PAGE: usize = 20;
pub const SEARCH_PER_PAGE: usize = 10;
pub const COMMENTS_PER_PAGE: usize = 10;
pub const REPLIES_PER_PAGE: usize = 5;
pub const MESSAGES_PER_PAGE: usize = 20;
pub const NOTIFICATIONS_PER_PAGE: usize = 20;
pub const SUGGESTED_USERS: usize = 10;

pub const USERS_LIST_KEY: &str = "users_list";
pub const FEED_KEY: &str = "feed";
pub const NOTIFICATION_OUTBOX_PREFIX: &str = "notification_outbox:";
pub const RELATIONSHIP_PREFIX: &str = "relationship:";

pub fn user_key(id: &str) -> String {
    format!("user:{}", id)
}

pub fn token_key(token: &str) -> String {
    format!("token:{}", token)
}

pub fn post_key(id: &str) -> String {
    format!("post:{}", id)
}

pub fn comment_key(id: &str) -> String {
    format!("comment:{}", id)
}

pub fn post_comments_key(post_id: &str) -> String {
    format!("post_comments:{}", post_id)
}

pub fn message_key(id: &str) -> String {
    format!("message:{}", id)
}

pub fn notification_key(id: &str) -> String {
    format!("notification:{}", id)
}

pub fn notifications_key(user_id: &str) -> String {
    format!("notifications:{}", user_id)
}

pub fn conversation_partners_key(user_id: &str) -> String {
    format!("conversations:{}", user_id)
}

pub fn outbox_key(id: &str) -> String {
    format!("{}{}", NOTIFICATION_OUTBOX_PREFIX, id)
}

/// Order a pair of ids so both directions map to the same key.
pub fn ordered_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

pub fn relationship_key(a: &str, b: &str) -> String {
    let (low, high) = ordered_pair(a, b);
    format!("{}{}:{}", RELATIONSHIP_PREFIX, low, high)
}

/// The two account ids encoded in a relationship key.
pub fn relationship_pair(key: &str) -> Option<(&str, &str)> {
    key.strip_prefix(RELATIONSHIP_PREFIX)?.split_once(':')
}

pub fn conversation_key(a: &str, b: &str) -> String {
    let (low, high) = ordered_pair(a, b);
    format!("conversation:{}:{}", low, high)
}

pub fn token_expiration_hours() -> i64 {
    std::env::var("SOCIAL_TOKEN_EXPIRATION_HOURS")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(24 * 30)
}

/// Runtime settings read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub seed_demo_data: bool,
    pub token_expiration_hours: i64,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("SOCIAL_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            seed_demo_data: std::env::var("SOCIAL_SEED_DEMO_DATA")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            token_expiration_hours: token_expiration_hours(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_keys_ignore_direction() {
        assert_eq!(relationship_key("b", "a"), relationship_key("a", "b"));
        assert_eq!(relationship_key("a", "b"), "relationship:a:b");
        assert_eq!(relationship_pair("relationship:a:b"), Some(("a", "b")));
        assert_eq!(relationship_pair("conversation:a:b"), None);
        assert_eq!(conversation_key("z", "y"), "conversation:y:z");
    }
}
