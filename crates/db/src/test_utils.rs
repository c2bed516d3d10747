//! Test utilities for store-dependent code.
//!
//! [`MemoryFeedStore`] keeps everything in process memory and can be told to
//! fail or slow down specific operations, which is what pipeline tests need
//! to exercise lookup failures, write failures and in-flight cancellation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use feedline_common::{AppError, AppResult, IdGenerator, Post};
use tokio::sync::RwLock;

use crate::store::FeedStore;

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<String, String>,
    followers: HashMap<String, Vec<String>>,
    feeds: HashMap<String, Vec<Post>>,
    posts: HashMap<String, Post>,
    fail_followers_for: HashSet<String>,
    fail_feed_for: HashSet<String>,
}

/// In-memory [`FeedStore`] with failure injection.
#[derive(Clone, Default)]
pub struct MemoryFeedStore {
    state: Arc<RwLock<MemoryState>>,
    feed_latency: Arc<RwLock<Option<Duration>>>,
    add_to_feed_calls: Arc<AtomicUsize>,
    completed_feed_writes: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    id_gen: IdGenerator,
}

impl MemoryFeedStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the follower list of `author_id` verbatim, duplicates included.
    pub async fn set_followers(&self, author_id: &str, followers: Vec<String>) {
        self.state
            .write()
            .await
            .followers
            .insert(author_id.to_string(), followers);
    }

    /// Make `get_followers` fail for `author_id`.
    pub async fn fail_followers_for(&self, author_id: &str) {
        self.state
            .write()
            .await
            .fail_followers_for
            .insert(author_id.to_string());
    }

    /// Make `add_to_feed` fail for `user_id`.
    pub async fn fail_feed_for(&self, user_id: &str) {
        self.state
            .write()
            .await
            .fail_feed_for
            .insert(user_id.to_string());
    }

    /// Delay every `add_to_feed` call by `latency`.
    pub async fn set_feed_latency(&self, latency: Duration) {
        *self.feed_latency.write().await = Some(latency);
    }

    /// Number of `add_to_feed` calls started, successful or not.
    #[must_use]
    pub fn add_to_feed_calls(&self) -> usize {
        self.add_to_feed_calls.load(Ordering::SeqCst)
    }

    /// Number of `add_to_feed` calls that ran to completion.
    #[must_use]
    pub fn completed_feed_writes(&self) -> usize {
        self.completed_feed_writes.load(Ordering::SeqCst)
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Snapshot of a feed in insertion order.
    pub async fn feed_snapshot(&self, user_id: &str) -> Vec<Post> {
        self.state
            .read()
            .await
            .feeds
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of a recorded post.
    pub async fn post(&self, post_id: &str) -> Option<Post> {
        self.state.read().await.posts.get(post_id).cloned()
    }
}

#[async_trait]
impl FeedStore for MemoryFeedStore {
    async fn get_followers(&self, author_id: &str) -> AppResult<Vec<String>> {
        let state = self.state.read().await;
        if state.fail_followers_for.contains(author_id) {
            return Err(AppError::Database(format!(
                "follower lookup failed for {author_id}"
            )));
        }
        Ok(state.followers.get(author_id).cloned().unwrap_or_default())
    }

    async fn add_to_feed(&self, user_id: &str, post: &Post) -> AppResult<()> {
        self.add_to_feed_calls.fetch_add(1, Ordering::SeqCst);

        let latency = *self.feed_latency.read().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.write().await;
        if state.fail_feed_for.contains(user_id) {
            return Err(AppError::Database(format!("feed write failed for {user_id}")));
        }
        state
            .feeds
            .entry(user_id.to_string())
            .or_default()
            .push(post.clone());
        drop(state);

        self.completed_feed_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add_post(&self, post: &Post) -> AppResult<()> {
        self.state
            .write()
            .await
            .posts
            .insert(post.id.clone(), post.clone());
        Ok(())
    }

    async fn create_user(&self, username: &str) -> AppResult<String> {
        let mut state = self.state.write().await;
        if let Some((id, _)) = state.users.iter().find(|(_, name)| *name == username) {
            return Ok(id.clone());
        }
        let id = self.id_gen.generate();
        state.users.insert(id.clone(), username.to_string());
        Ok(id)
    }

    async fn get_user_id_by_username(&self, username: &str) -> AppResult<Option<String>> {
        Ok(self
            .state
            .read()
            .await
            .users
            .iter()
            .find(|(_, name)| *name == username)
            .map(|(id, _)| id.clone()))
    }

    async fn create_follow(&self, user_id: &str, followee_id: &str) -> AppResult<()> {
        let mut state = self.state.write().await;
        let followers = state.followers.entry(followee_id.to_string()).or_default();
        if !followers.iter().any(|f| f == user_id) {
            followers.push(user_id.to_string());
        }
        Ok(())
    }

    async fn get_feed(&self, user_id: &str, limit: u64) -> AppResult<Vec<Post>> {
        let state = self.state.read().await;
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(state
            .feeds
            .get(user_id)
            .map(|feed| feed.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
