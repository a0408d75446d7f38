//! Trailing-edge debounce for search-as-you-type lookups.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Runs only the last task scheduled within `wait` of the previous one.
pub struct Debouncer {
    wait: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            pending: Mutex::new(None),
        }
    }

    /// Schedules `task` after the wait, cancelling any task still waiting.
    pub fn call<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let wait = self.wait;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            task.await;
        });

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(prev) = pending.replace(handle) {
            prev.abort();
        }
    }

    pub fn cancel(&self) {
        if let Some(prev) = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take() {
            prev.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn only_last_call_in_burst_runs() {
        let debouncer = Debouncer::new(Duration::from_millis(300));
        let runs = Arc::new(Mutex::new(Vec::new()));

        for q in ["Zü", "Zür", "Züri"] {
            let runs = runs.clone();
            debouncer.call(async move {
                runs.lock().unwrap().push(q);
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*runs.lock().unwrap(), vec!["Züri"]);
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_calls_all_run() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = count.clone();
            debouncer.call(async move {
                count.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
