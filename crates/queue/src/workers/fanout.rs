//! Bounded-concurrency fan-out of one post to its followers.

use std::sync::Arc;

use feedline_common::Post;
use feedline_db::SharedFeedStore;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// What happened to one post's fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Feed writes started.
    pub dispatched: usize,
    /// Feed writes that succeeded.
    pub delivered: usize,
    /// Feed writes that failed.
    pub failed: usize,
    /// Followers never dispatched because cancellation fired first.
    pub skipped: usize,
}

/// Append `post` to every follower's feed, at most `limit` writes at a time.
///
/// Followers are dispatched in order and one write is started per entry, so
/// a duplicated ID is written twice. Failed writes are logged and not
/// retried. Once `cancel` fires no further writes start, but every write
/// already started runs to completion before this returns.
pub async fn fan_out(
    store: &SharedFeedStore,
    post: Arc<Post>,
    followers: Vec<String>,
    limit: usize,
    cancel: &CancellationToken,
) -> FanOutReport {
    let permits = Arc::new(Semaphore::new(limit.clamp(1, Semaphore::MAX_PERMITS)));
    let mut writes = JoinSet::new();
    let mut report = FanOutReport::default();
    let total = followers.len();

    for follower_id in followers {
        if cancel.is_cancelled() {
            break;
        }

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let store = Arc::clone(store);
        let post = Arc::clone(&post);
        report.dispatched += 1;

        writes.spawn(async move {
            let _permit = permit;
            match store.add_to_feed(&follower_id, &post).await {
                Ok(()) => true,
                Err(e) => {
                    error!(
                        follower_id = %follower_id,
                        post_id = %post.id,
                        error = %e,
                        "Failed to add post to feed"
                    );
                    false
                }
            }
        });
    }

    report.skipped = total - report.dispatched;
    if report.skipped > 0 {
        debug!(post_id = %post.id, skipped = report.skipped, "Fan-out cut short by shutdown");
    }

    while let Some(joined) = writes.join_next().await {
        match joined {
            Ok(true) => report.delivered += 1,
            Ok(false) => report.failed += 1,
            Err(e) => {
                error!(post_id = %post.id, error = %e, "Feed write task panicked");
                report.failed += 1;
            }
        }
    }

    report
}
