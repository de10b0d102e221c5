use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub name: String,
    pub email: String,
    /// argon2 PHC string; never serialized into responses (see [`PublicUser`]).
    pub password: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    pub created_at: String,
    #[serde(default)]
    pub last_seen: Option<String>,
}

/// Profile fields safe to show other accounts.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub username: String,
    pub name: String,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub avatar: Option<String>,
    pub is_private: bool,
    pub created_at: String,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            name: user.name.clone(),
            bio: user.bio.clone(),
            location: user.location.clone(),
            website: user.website.clone(),
            avatar: user.avatar.clone(),
            is_private: user.is_private,
            created_at: user.created_at.clone(),
        }
    }
}

/// The `username name avatar` projection embedded in posts, comments and messages.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub name: String,
    pub avatar: Option<String>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            name: user.name.clone(),
            avatar: user.avatar.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub image: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub location: String,
    pub is_public: bool,
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(default)]
    pub view_count: u64,
    pub created_at: String,
    pub updated_at: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub content: String,
    pub parent_comment_id: Option<String>,
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(default)]
    pub is_edited: bool,
    pub created_at: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub is_read: bool,
    pub read_at: Option<String>,
    #[serde(default)]
    pub is_edited: bool,
    pub edited_at: Option<String>,
    /// Accounts that soft-deleted this message for themselves.
    #[serde(default)]
    pub deleted_for: Vec<String>,
    pub created_at: String,
}

impl Message {
    pub fn visible_to(&self, user_id: &str) -> bool {
        !self.deleted_for.iter().any(|id| id == user_id)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Like,
    Follow,
    FollowRequest,
    FollowAccept,
    Comment,
    Message,
}

impl NotificationType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "like" => Some(Self::Like),
            "follow" => Some(Self::Follow),
            "follow_request" => Some(Self::FollowRequest),
            "follow_accept" => Some(Self::FollowAccept),
            "comment" => Some(Self::Comment),
            "message" => Some(Self::Message),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub sender_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub post_id: Option<String>,
    pub comment_id: Option<String>,
    pub message_id: Option<String>,
    pub action: String,
    #[serde(default)]
    pub is_read: bool,
    pub read_at: Option<String>,
    pub created_at: String,
}

#[derive(Serialize, Deserialize)]
pub struct TokenData {
    pub user_id: String,
    pub created_at: String,
}
