//! Store interface consumed by the fan-out pipeline and its `PostgreSQL`
//! implementation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use feedline_common::{AppResult, IdGenerator, Post};
use sea_orm::{DatabaseConnection, Set};
use tracing::{debug, info, warn};

use crate::entities::{feed_entry, following, post, user};
use crate::repositories::{FeedRepository, FollowingRepository, PostRepository, UserRepository};

/// Persistent store for users, follow edges, posts and feeds.
///
/// Implementations must be safe for concurrent use: every processing worker
/// and every fan-out task shares one instance.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// IDs of the users following `author_id`. Duplicates are passed through.
    async fn get_followers(&self, author_id: &str) -> AppResult<Vec<String>>;

    /// Append `post` to the feed of `user_id`.
    async fn add_to_feed(&self, user_id: &str, post: &Post) -> AppResult<()>;

    /// Record the author's own copy of `post`.
    async fn add_post(&self, post: &Post) -> AppResult<()>;

    /// Create a user, or return the existing ID if the username is taken.
    async fn create_user(&self, username: &str) -> AppResult<String>;

    /// Look up a user ID by username.
    async fn get_user_id_by_username(&self, username: &str) -> AppResult<Option<String>>;

    /// Make `user_id` a follower of `followee_id`. Following twice is a no-op.
    async fn create_follow(&self, user_id: &str, followee_id: &str) -> AppResult<()>;

    /// Read up to `limit` feed entries of `user_id`, newest first.
    async fn get_feed(&self, user_id: &str, limit: u64) -> AppResult<Vec<Post>>;

    /// Release the underlying connections. Failures are logged, not returned.
    async fn close(&self);
}

/// Shared handle to a store.
pub type SharedFeedStore = Arc<dyn FeedStore>;

/// `FeedStore` backed by `PostgreSQL` through sea-orm.
#[derive(Clone)]
pub struct PostgresFeedStore {
    db: Arc<DatabaseConnection>,
    users: UserRepository,
    following: FollowingRepository,
    posts: PostRepository,
    feeds: FeedRepository,
    id_gen: IdGenerator,
}

impl PostgresFeedStore {
    /// Create a store over an established connection pool.
    #[must_use]
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            users: UserRepository::new(Arc::clone(&db)),
            following: FollowingRepository::new(Arc::clone(&db)),
            posts: PostRepository::new(Arc::clone(&db)),
            feeds: FeedRepository::new(Arc::clone(&db)),
            id_gen: IdGenerator::new(),
            db,
        }
    }
}

fn feed_entry_to_post(entry: feed_entry::Model) -> Post {
    Post {
        id: entry.post_id,
        author_id: entry.author_id,
        body: entry.body,
        created: entry.created_at.with_timezone(&Utc),
    }
}

#[async_trait]
impl FeedStore for PostgresFeedStore {
    async fn get_followers(&self, author_id: &str) -> AppResult<Vec<String>> {
        let ids = self.following.find_follower_ids(author_id).await?;
        debug!(author_id, count = ids.len(), "Fetched followers");
        Ok(ids)
    }

    async fn add_to_feed(&self, user_id: &str, post: &Post) -> AppResult<()> {
        self.feeds
            .append(feed_entry::ActiveModel {
                id: Set(self.id_gen.generate()),
                user_id: Set(user_id.to_string()),
                post_id: Set(post.id.clone()),
                author_id: Set(post.author_id.clone()),
                body: Set(post.body.clone()),
                created_at: Set(post.created.into()),
            })
            .await
    }

    async fn add_post(&self, post: &Post) -> AppResult<()> {
        self.posts
            .create(post::ActiveModel {
                id: Set(post.id.clone()),
                author_id: Set(post.author_id.clone()),
                body: Set(post.body.clone()),
                created_at: Set(post.created.into()),
            })
            .await?;
        Ok(())
    }

    async fn create_user(&self, username: &str) -> AppResult<String> {
        if let Some(existing) = self.users.find_by_username(username).await? {
            return Ok(existing.id);
        }

        let model = user::ActiveModel {
            id: Set(self.id_gen.generate()),
            username: Set(username.to_string()),
            ..Default::default()
        };

        match self.users.create(model).await {
            Ok(created) => {
                info!(user_id = %created.id, "User created");
                Ok(created.id)
            }
            Err(e) => {
                // Lost a race on the unique username index
                match self.users.find_by_username(username).await? {
                    Some(existing) => Ok(existing.id),
                    None => Err(e),
                }
            }
        }
    }

    async fn get_user_id_by_username(&self, username: &str) -> AppResult<Option<String>> {
        Ok(self.users.find_by_username(username).await?.map(|u| u.id))
    }

    async fn create_follow(&self, user_id: &str, followee_id: &str) -> AppResult<()> {
        if self.following.is_following(user_id, followee_id).await? {
            return Ok(());
        }

        self.following
            .create(following::ActiveModel {
                id: Set(self.id_gen.generate()),
                follower_id: Set(user_id.to_string()),
                followee_id: Set(followee_id.to_string()),
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    async fn get_feed(&self, user_id: &str, limit: u64) -> AppResult<Vec<Post>> {
        let entries = self.feeds.find_by_user(user_id, limit).await?;
        Ok(entries.into_iter().map(feed_entry_to_post).collect())
    }

    async fn close(&self) {
        match self.db.close_by_ref().await {
            Ok(()) => info!("Database connection pool closed"),
            Err(e) => warn!(error = %e, "Failed to close database connection pool"),
        }
    }
}
