//! Feed repository.

use std::sync::Arc;

use crate::entities::{FeedEntry, feed_entry};
use feedline_common::{AppError, AppResult};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};

/// Feed repository: per-user materialized timelines.
#[derive(Clone)]
pub struct FeedRepository {
    db: Arc<DatabaseConnection>,
}

impl FeedRepository {
    /// Create a new feed repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Append an entry to a user's feed.
    pub async fn append(&self, model: feed_entry::ActiveModel) -> AppResult<()> {
        FeedEntry::insert(model)
            .exec_without_returning(self.db.as_ref())
            .await
            .map(|_| ())
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get a user's feed, newest post first.
    pub async fn find_by_user(
        &self,
        user_id: &str,
        limit: u64,
    ) -> AppResult<Vec<feed_entry::Model>> {
        FeedEntry::find()
            .filter(feed_entry::Column::UserId.eq(user_id))
            .order_by_desc(feed_entry::Column::CreatedAt)
            .order_by_desc(feed_entry::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
