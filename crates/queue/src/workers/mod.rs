//! Pipeline workers.

mod fanout;
mod ingest;
mod process;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub use fanout::{FanOutReport, fan_out};
pub use ingest::{IDLE_WAIT, PUSH_TIMEOUT, ingest_loop};
pub use process::{ProcessContext, process_loop};

/// Sleep for `delay` unless `cancel` fires first.
///
/// Returns `false` if cancelled.
pub(crate) async fn wait_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}
