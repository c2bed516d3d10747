//! Processing worker: job buffer to follower feeds.

use std::sync::Arc;

use feedline_common::Post;
use feedline_db::SharedFeedStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::JobReceiver;
use crate::stats::PipelineStats;

use super::fanout::fan_out;

/// Shared state for processing workers.
#[derive(Clone)]
pub struct ProcessContext {
    /// Feed store shared by all workers and fan-out tasks.
    pub store: SharedFeedStore,
    /// Consumer half of the job buffer.
    pub jobs: JobReceiver,
    /// Concurrent feed writes per post.
    pub fanout_limit: usize,
    /// Pipeline counters.
    pub stats: Arc<PipelineStats>,
}

/// Take payloads from the job buffer and distribute each one until the
/// buffer is closed and drained, or `cancel` fires while idle.
///
/// A payload that does not decode, or whose author's followers cannot be
/// fetched, is logged and skipped.
pub async fn process_loop(ctx: ProcessContext, cancel: CancellationToken) {
    loop {
        let payload = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            job = ctx.jobs.recv() => match job {
                Some(payload) => payload,
                None => break,
            },
        };

        process_payload(&ctx, &payload, &cancel).await;
    }

    debug!("Processing worker stopped");
}

async fn process_payload(ctx: &ProcessContext, payload: &[u8], cancel: &CancellationToken) {
    let post = match Post::decode(payload) {
        Ok(post) => post,
        Err(e) => {
            ctx.stats.record_decode_failure();
            warn!(error = %e, bytes = payload.len(), "Discarding undecodable payload");
            return;
        }
    };

    let followers = match ctx.store.get_followers(&post.author_id).await {
        Ok(followers) => followers,
        Err(e) => {
            ctx.stats.record_lookup_failure();
            error!(
                post_id = %post.id,
                author_id = %post.author_id,
                error = %e,
                "Failed to fetch followers, skipping post"
            );
            return;
        }
    };

    let post = Arc::new(post);
    let report = fan_out(&ctx.store, Arc::clone(&post), followers, ctx.fanout_limit, cancel).await;
    ctx.stats.record_fan_out(&report);

    info!(
        post_id = %post.id,
        delivered = report.delivered,
        failed = report.failed,
        skipped = report.skipped,
        "Post distributed"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::buffer::JobBuffer;
    use bytes::Bytes;
    use chrono::Utc;
    use feedline_db::MemoryFeedStore;
    use std::time::Duration;

    fn encoded_post(id: &str, author_id: &str) -> Bytes {
        let post = Post {
            id: id.to_string(),
            author_id: author_id.to_string(),
            body: "hello".to_string(),
            created: Utc::now(),
        };
        Bytes::from(post.encode().unwrap())
    }

    fn context(memory: &MemoryFeedStore, jobs: JobReceiver) -> ProcessContext {
        ProcessContext {
            store: Arc::new(memory.clone()),
            jobs,
            fanout_limit: 20,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    const PUSH: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn test_drains_buffer_then_exits_on_close() {
        let memory = MemoryFeedStore::new();
        memory
            .set_followers("author", vec!["f1".to_string(), "f2".to_string()])
            .await;
        let (tx, rx) = JobBuffer::bounded(4);
        let ctx = context(&memory, rx);
        let cancel = CancellationToken::new();

        tx.push_timeout(encoded_post("p1", "author"), PUSH, &cancel).await;
        tx.push_timeout(Bytes::from_static(b"{not json"), PUSH, &cancel).await;
        tx.push_timeout(encoded_post("p2", "author"), PUSH, &cancel).await;
        tx.close();

        process_loop(ctx.clone(), cancel).await;

        let f1: Vec<String> = memory.feed_snapshot("f1").await.into_iter().map(|p| p.id).collect();
        assert_eq!(f1, vec!["p1", "p2"]);
        assert_eq!(memory.feed_snapshot("f2").await.len(), 2);

        let summary = ctx.stats.snapshot();
        assert_eq!(summary.decode_failures, 1);
        assert_eq!(summary.posts_distributed, 2);
        assert_eq!(summary.feed_writes, 4);
    }

    #[tokio::test]
    async fn test_lookup_failure_skips_post() {
        let memory = MemoryFeedStore::new();
        memory.set_followers("author", vec!["f1".to_string()]).await;
        memory.fail_followers_for("author").await;
        let (tx, rx) = JobBuffer::bounded(4);
        let ctx = context(&memory, rx);
        let cancel = CancellationToken::new();

        tx.push_timeout(encoded_post("p1", "author"), PUSH, &cancel).await;
        tx.close();
        process_loop(ctx.clone(), cancel).await;

        assert_eq!(memory.add_to_feed_calls(), 0);
        assert_eq!(ctx.stats.snapshot().lookup_failures, 1);
    }

    #[tokio::test]
    async fn test_idle_worker_exits_on_cancel() {
        let memory = MemoryFeedStore::new();
        let (_tx, rx) = JobBuffer::bounded(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), process_loop(context(&memory, rx), cancel))
            .await
            .unwrap();
    }
}
