//! Supervision of the node's background tasks.
//!
//! Every long-running piece (chain feeder, block sync, RPC servers) is
//! spawned on one shared tracker and watches one shared cancellation
//! token, so shutdown is a single cancel-then-wait with latency bounded
//! by the longest RPC timeout.

use std::future::Future;

use once_cell::sync::Lazy;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

struct Supervisor {
    tracker: TaskTracker,
    token: CancellationToken,
}

static SUPERVISOR: Lazy<Supervisor> = Lazy::new(|| Supervisor {
    tracker: TaskTracker::new(),
    token: CancellationToken::new(),
});

/// A handle on the shared shutdown signal.
pub fn new_cancellation_token() -> CancellationToken {
    SUPERVISOR.token.clone()
}

/// Spawns a supervised background task.
pub fn spawn<F>(fut: F)
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    SUPERVISOR.tracker.spawn(fut);
}

/// Signals shutdown to all tasks and waits until every one of them has
/// finished.
pub async fn cancel_tasks_and_wait_for_completion() {
    SUPERVISOR.token.cancel();
    SUPERVISOR.tracker.close();
    SUPERVISOR.tracker.wait().await;
}
