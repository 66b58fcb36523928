//! Trailing-edge debounce with last-request-wins cancellation.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Identifies one scheduled request. Only the most recent token is current.
#[derive(Debug, Clone)]
pub struct RequestToken {
    generation: u64,
    latest: Arc<AtomicU64>,
}

impl RequestToken {
    /// False once a newer request was scheduled or the debouncer cancelled.
    pub fn is_current(&self) -> bool {
        self.latest.load(Ordering::SeqCst) == self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Runs a task once its input has been quiet for `delay`.
///
/// Scheduling again within the window supersedes the pending task. A task
/// that already started keeps running, but its token stops being current so
/// its result can be discarded.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    latest: Arc<AtomicU64>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            latest: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, task: F) -> RequestToken
    where
        F: FnOnce(RequestToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let token = RequestToken {
            generation,
            latest: Arc::clone(&self.latest),
        };

        let delay = self.delay;
        let pending = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !pending.is_current() {
                return;
            }
            task(pending).await;
        });

        token
    }

    /// Invalidates every outstanding token.
    pub fn cancel(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
