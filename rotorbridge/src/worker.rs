//! Worker lifecycle (§9 REDESIGN FLAGS: the original thread objects expose
//! `terminate()`/`join()`; here a `Worker` pairs a [`CancellationToken`] with
//! the spawned task's `JoinHandle` so callers can ask a background task to
//! stop and then wait for it to actually finish, without any polling).

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct Worker {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Spawns `task`, handing it a child [`CancellationToken`] it should
    /// select against in its own run loop.
    pub fn spawn<F, Fut>(name: &'static str, parent: &CancellationToken, task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let token = parent.child_token();
        let handle = tokio::spawn(task(token.clone()));
        Worker { name, token, handle }
    }

    /// Signals cancellation without waiting for the task to exit.
    pub fn terminate(&self) {
        self.token.cancel();
    }

    /// Signals cancellation and waits for the task to exit.
    pub async fn terminate_and_join(self) {
        self.token.cancel();
        self.join().await;
    }

    /// Waits for the task to exit, however it gets there.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            warn!("worker {} panicked: {e}", self.name);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn terminate_and_join_stops_a_looping_task() {
        let parent = CancellationToken::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();

        let worker = Worker::spawn("test", &parent, move |token| async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_millis(10)) => {
                        ran_clone.store(true, Ordering::SeqCst);
                    }
                }
            }
        });

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        worker.terminate_and_join().await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn parent_cancellation_propagates_to_children() {
        let parent = CancellationToken::new();
        let worker = Worker::spawn("test", &parent, |token| async move {
            token.cancelled().await;
        });
        parent.cancel();
        worker.join().await;
    }
}
