//! ID generation utilities.

use ulid::Ulid;
use uuid::Uuid;

/// ID generator for users, follow edges and feed entries.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a new ULID-based ID.
    ///
    /// ULIDs sort by creation time, which keeps feed entries written for the
    /// same follower in insertion order.
    #[must_use]
    pub fn generate(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }

    /// Generate a post ID in the form producers put on the wire (UUID v4).
    #[must_use]
    pub fn generate_post_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
