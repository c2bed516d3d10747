//! Pipeline integration tests.
//!
//! These run the full pipeline against the in-memory queue and store.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use feedline_common::{AppError, NewPost, Post};
use feedline_db::{FeedStore, MemoryFeedStore};
use feedline_queue::{
    FeedWorker, MemoryQueue, PipelineSettings, PipelineState, PostPublisher, QueueError,
    RunSummary,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn post(id: &str, author_id: &str) -> Post {
    Post {
        id: id.to_string(),
        author_id: author_id.to_string(),
        body: format!("body of {id}"),
        created: Utc::now(),
    }
}

fn ids(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i}")).collect()
}

struct Harness {
    queue: MemoryQueue,
    store: MemoryFeedStore,
    worker: Arc<FeedWorker>,
    cancel: CancellationToken,
}

impl Harness {
    fn new(settings: PipelineSettings) -> Self {
        let queue = MemoryQueue::new();
        let store = MemoryFeedStore::new();
        let worker = Arc::new(FeedWorker::new(
            Arc::new(store.clone()),
            Arc::new(queue.clone()),
            settings,
        ));
        Self {
            queue,
            store,
            worker,
            cancel: CancellationToken::new(),
        }
    }

    fn start(&self) -> JoinHandle<RunSummary> {
        let worker = Arc::clone(&self.worker);
        let cancel = self.cancel.clone();
        tokio::spawn(async move { worker.run(cancel).await })
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(start_paused = true)]
async fn test_post_reaches_every_follower_once() {
    let h = Harness::new(PipelineSettings::resolve(Some(2), None, None));
    h.store
        .set_followers("author", vec!["u1".to_string(), "u2".to_string()])
        .await;
    h.queue.push_post(&post("p1", "author")).unwrap();

    let run = h.start();
    wait_until(|| h.store.completed_feed_writes() == 2).await;
    h.cancel.cancel();
    let summary = run.await.unwrap();

    for follower in ["u1", "u2"] {
        let feed = h.store.feed_snapshot(follower).await;
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].id, "p1");
    }
    assert_eq!(summary.posts_distributed, 1);
    assert_eq!(summary.feed_writes, 2);
    assert_eq!(h.worker.state(), PipelineState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_read_failures_back_off_then_recover() {
    let h = Harness::new(PipelineSettings::resolve(Some(1), None, None));
    h.store.set_followers("author", vec!["u1".to_string()]).await;
    h.queue.fail_next_reads(3);
    h.queue.push_post(&post("p1", "author")).unwrap();

    let run = h.start();
    wait_until(|| h.store.completed_feed_writes() == 1).await;
    h.cancel.cancel();
    run.await.unwrap();

    let reads = h.queue.read_instants();
    let waits: Vec<Duration> = reads.windows(2).take(3).map(|w| w[1] - w[0]).collect();
    assert_eq!(waits.len(), 3);
    assert!(waits.windows(2).all(|w| w[0] <= w[1]));
    assert!(waits.iter().all(|w| *w <= Duration::from_secs(1)));
    assert_eq!(h.store.feed_snapshot("u1").await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_payload_is_skipped() {
    let h = Harness::new(PipelineSettings::resolve(Some(1), None, None));
    h.store.set_followers("author", vec!["u1".to_string()]).await;
    h.queue.push(&b"{definitely not a post"[..]);
    h.queue.push_post(&post("p2", "author")).unwrap();

    let run = h.start();
    wait_until(|| h.store.completed_feed_writes() == 1).await;
    h.cancel.cancel();
    let summary = run.await.unwrap();

    assert_eq!(summary.decode_failures, 1);
    assert_eq!(h.store.add_to_feed_calls(), 1);
    let feed = h.store.feed_snapshot("u1").await;
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0].id, "p2");
}

#[tokio::test(start_paused = true)]
async fn test_follower_lookup_failure_writes_nothing() {
    let h = Harness::new(PipelineSettings::resolve(Some(1), None, None));
    h.store.set_followers("author", ids("u", 3)).await;
    h.store.fail_followers_for("author").await;
    h.queue.push_post(&post("p1", "author")).unwrap();

    let run = h.start();
    wait_until(|| h.worker.stats().lookup_failures == 1).await;
    h.cancel.cancel();
    let summary = run.await.unwrap();

    assert_eq!(summary.posts_distributed, 0);
    assert_eq!(h.store.add_to_feed_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_mid_fan_out_completes_started_writes() {
    let h = Harness::new(PipelineSettings::resolve(Some(1), None, Some(20)));
    h.store.set_followers("author", ids("u", 50)).await;
    h.store.set_feed_latency(Duration::from_millis(100)).await;
    h.queue.push_post(&post("p1", "author")).unwrap();

    let run = h.start();
    wait_until(|| h.store.add_to_feed_calls() == 20).await;
    h.cancel.cancel();
    let summary = run.await.unwrap();

    assert_eq!(h.store.add_to_feed_calls(), 20);
    assert_eq!(h.store.completed_feed_writes(), 20);
    assert_eq!(summary.feed_writes, 20);
    assert_eq!(summary.posts_distributed, 0);
    assert_eq!(summary.fan_outs_cut_short, 1);

    let reads_at_stop = h.queue.read_instants().len();
    h.queue.push_post(&post("p2", "author")).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.queue.read_instants().len(), reads_at_stop);
    assert_eq!(h.queue.pending(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_follower_ids_get_two_entries() {
    let h = Harness::new(PipelineSettings::resolve(Some(1), None, None));
    h.store
        .set_followers("author", vec!["u1".to_string(), "u1".to_string()])
        .await;
    h.queue.push_post(&post("p1", "author")).unwrap();

    let run = h.start();
    wait_until(|| h.store.completed_feed_writes() == 2).await;
    h.cancel.cancel();
    run.await.unwrap();

    assert_eq!(h.store.feed_snapshot("u1").await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_state_transitions() {
    let h = Harness::new(PipelineSettings::resolve(Some(1), None, None));
    let mut states = h.worker.subscribe_state();
    assert_eq!(*states.borrow(), PipelineState::Stopped);

    let run = h.start();
    states
        .wait_for(|s| *s == PipelineState::Running)
        .await
        .unwrap();

    h.cancel.cancel();
    run.await.unwrap();
    assert_eq!(h.worker.state(), PipelineState::Stopped);
}

#[tokio::test]
async fn test_close_attempts_both_resources() {
    let h = Harness::new(PipelineSettings::resolve(Some(1), None, None));
    h.queue.fail_close();

    let result = h.worker.close().await;

    assert!(matches!(result, Err(QueueError::Close(_))));
    assert!(h.queue.is_closed());
    assert!(h.store.is_closed());
}

#[tokio::test]
async fn test_close_succeeds() {
    let h = Harness::new(PipelineSettings::resolve(Some(1), None, None));

    h.worker.close().await.unwrap();

    assert!(h.queue.is_closed());
    assert!(h.store.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_published_post_flows_to_followers() {
    let h = Harness::new(PipelineSettings::resolve(Some(2), None, None));
    let author = h.store.create_user("author").await.unwrap();
    let follower = h.store.create_user("reader").await.unwrap();
    h.store.create_follow(&follower, &author).await.unwrap();

    let publisher = PostPublisher::new(Arc::new(h.queue.clone()), Arc::new(h.store.clone()));
    let published = publisher
        .publish(NewPost {
            author_id: author.clone(),
            body: "first post".to_string(),
        })
        .await
        .unwrap();
    assert!(h.store.post(&published.id).await.is_some());

    let run = h.start();
    wait_until(|| h.store.completed_feed_writes() == 1).await;
    h.cancel.cancel();
    run.await.unwrap();

    let feed = h.store.get_feed(&follower, 10).await.unwrap();
    assert_eq!(feed, vec![published]);
}

#[tokio::test]
async fn test_publish_rejects_invalid_post() {
    let queue = MemoryQueue::new();
    let store = MemoryFeedStore::new();
    let publisher = PostPublisher::new(Arc::new(queue.clone()), Arc::new(store));

    let result = publisher
        .publish(NewPost {
            author_id: "author".to_string(),
            body: "x".repeat(1001),
        })
        .await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    assert_eq!(queue.pending(), 0);
}
