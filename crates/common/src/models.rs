//! Domain types shared by the producer, the fan-out pipeline and the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// A post as it travels on the queue and lands in follower feeds.
///
/// The JSON form is the wire format: `id`, `author_id`, `body`, `created`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Post identifier.
    pub id: String,
    /// Identifier of the author whose followers receive the post.
    pub author_id: String,
    /// Author-supplied text.
    pub body: String,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
}

impl Post {
    /// Decode a post event payload.
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Encode this post as an event payload.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// A post submission before an id and timestamp are assigned.
#[derive(Debug, Clone, Validate, Deserialize)]
pub struct NewPost {
    /// Author of the post.
    #[validate(length(min = 1, message = "author_id must not be empty"))]
    pub author_id: String,
    /// Post text.
    #[validate(length(min = 1, max = 1000, message = "post body must be 1-1000 characters"))]
    pub body: String,
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User identifier.
    pub id: String,
    /// Unique username.
    pub username: String,
}

/// A follow edge: `user_id` follows `followee_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Follow {
    /// The follower.
    pub user_id: String,
    /// The user being followed.
    pub followee_id: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_post() -> Post {
        Post {
            id: "p1".to_string(),
            author_id: "author".to_string(),
            body: "Hello followers!".to_string(),
            created: Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_post_wire_field_names() {
        let encoded = sample_post().encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(value["id"], "p1");
        assert_eq!(value["author_id"], "author");
        assert_eq!(value["body"], "Hello followers!");
        assert_eq!(value["created"], "2025-01-01T12:00:00Z");
    }

    #[test]
    fn test_decode_producer_payload() {
        let payload = serde_json::json!({
            "id": "42",
            "author_id": "7",
            "body": "hi",
            "created": "2025-03-04T05:06:07.123456789+02:00",
        });
        let post = Post::decode(&serde_json::to_vec(&payload).unwrap()).unwrap();

        assert_eq!(post.id, "42");
        assert_eq!(post.author_id, "7");
        let expected = Utc.with_ymd_and_hms(2025, 3, 4, 3, 6, 7).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        assert_eq!(post.created, expected);
    }

    #[test]
    fn test_decode_rejects_malformed_payload() {
        assert!(Post::decode(b"{not valid json}").is_err());
        assert!(Post::decode(br#"{"id":"1","body":"missing author"}"#).is_err());
    }

    #[test]
    fn test_new_post_validation() {
        let ok = NewPost {
            author_id: "u1".to_string(),
            body: "hello".to_string(),
        };
        assert!(ok.validate().is_ok());

        let empty = NewPost {
            author_id: "u1".to_string(),
            body: String::new(),
        };
        assert!(empty.validate().is_err());

        let too_long = NewPost {
            author_id: "u1".to_string(),
            body: "x".repeat(1001),
        };
        assert!(too_long.validate().is_err());
    }
}
