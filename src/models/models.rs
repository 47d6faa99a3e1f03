use chrono::serde::{ts_microseconds, ts_microseconds_option};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored user record. Missing optional fields decode to their defaults here,
/// so the rest of the crate never looks at raw documents.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    #[serde(default)]
    pub about_me: String,
    #[serde(default, with = "ts_microseconds_option")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, with = "ts_microseconds_option")]
    pub token_expiration: Option<DateTime<Utc>>,
    #[serde(default, with = "ts_microseconds_option")]
    pub last_message_read_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Post {
    #[serde(rename = "_id")]
    pub id: String,
    pub author_id: String,
    pub body: String,
    #[serde(with = "ts_microseconds")]
    pub timestamp: DateTime<Utc>,
}

/// One directed edge: `follower_id` receives `followee_id`'s posts.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FollowEdge {
    #[serde(rename = "_id")]
    pub id: String,
    pub follower_id: String,
    pub followee_id: String,
    #[serde(with = "ts_microseconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Seconds since the epoch.
    pub timestamp: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub body: String,
    #[serde(with = "ts_microseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Author metadata joined onto feed entries.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct AuthorDisplay {
    pub id: String,
    pub username: String,
    pub avatar: String,
}

/// A post with its author joined in.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct FeedItem {
    pub post: Post,
    pub author: AuthorDisplay,
}

/// Public view of a user, with the follow relation projected as lists.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct UserView {
    pub id: String,
    pub username: String,
    pub about_me: String,
    pub avatar: String,
    #[serde(with = "ts_microseconds_option")]
    pub last_seen: Option<DateTime<Utc>>,
    pub followers: Vec<String>,
    pub following: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sparse_user_documents_decode_with_defaults() {
        let user: User = serde_json::from_value(json!({
            "_id": "u1",
            "username": "alice",
            "email": "alice@example.com",
            "password_hash": "$argon2id$..."
        }))
        .unwrap();
        assert_eq!(user.about_me, "");
        assert!(user.last_seen.is_none());
        assert!(user.token.is_none());
        assert!(user.last_message_read_time.is_none());
    }

    #[test]
    fn post_timestamps_are_integer_micros() {
        let ts = DateTime::<Utc>::from_timestamp(1_700_000_000, 123_456_000).unwrap();
        let post = Post {
            id: "p1".into(),
            author_id: "u1".into(),
            body: "hi".into(),
            timestamp: ts,
        };
        let doc = serde_json::to_value(&post).unwrap();
        assert_eq!(doc["timestamp"], json!(1_700_000_000_123_456i64));
        assert_eq!(doc["_id"], "p1");
    }

    #[test]
    fn user_missing_username_is_rejected() {
        let res = serde_json::from_value::<User>(json!({"_id": "u1", "email": "x", "password_hash": "h"}));
        assert!(res.is_err());
    }
}
