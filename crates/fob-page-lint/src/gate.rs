//! Quiescence detection.
//!
//! Browsers never say "no more errors are coming". Issues trickle in from
//! console events, network completions and background validator calls, so
//! the gate approximates the end of the stream with three phases, in order:
//!
//! 1. every page known to the session reaches network idle;
//! 2. a fixed settling delay admits errors from timers and deferred handlers;
//! 3. every registered pending task completes, including tasks registered
//!    while the drain is running.
//!
//! Phase 3 runs last because its tasks are spawned by events that can fire
//! all the way through phase 2.

use crate::error::{CollectorError, Result};
use crate::session::BrowserSession;
use futures::future::try_join_all;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

type PendingTask = JoinHandle<Result<()>>;

/// Tracks outstanding follow-up work and decides when collection is complete.
#[derive(Debug)]
pub struct CompletionGate {
    session: Arc<dyn BrowserSession>,
    settle_delay: Duration,
    pending: Mutex<Vec<PendingTask>>,
    // Serializes drains so a concurrent waiter can't see an empty set while
    // another waiter still holds the taken handles.
    drain_lock: tokio::sync::Mutex<()>,
}

impl CompletionGate {
    /// Creates a gate over `session`'s pages.
    pub fn new(session: Arc<dyn BrowserSession>, settle_delay: Duration) -> Self {
        Self {
            session,
            settle_delay,
            pending: Mutex::new(Vec::new()),
            drain_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Spawns `task` and records it as pending work.
    ///
    /// The task starts running immediately; the gate only waits for it.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn register<F>(&self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut pending = lock(&self.pending);
        pending.push(handle);
        debug!(pending = pending.len(), "registered pending collection task");
    }

    /// Number of tasks registered and not yet drained.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Runs all three phases.
    ///
    /// There is no timeout: a pending task that never finishes keeps this
    /// future pending. Wrap it in `tokio::time::timeout` for a deadline.
    ///
    /// # Errors
    ///
    /// Returns the first error from a page's idle wait or from a pending task.
    /// Tasks that have not completed stay registered, also when this future
    /// is dropped early, so a retry waits for them.
    pub async fn wait(&self) -> Result<()> {
        self.wait_for_network_idle().await?;

        debug!(delay = ?self.settle_delay, "network idle, settling");
        tokio::time::sleep(self.settle_delay).await;

        self.drain().await
    }

    async fn wait_for_network_idle(&self) -> Result<()> {
        let pages = self.session.pages().await?;
        debug!(pages = pages.len(), "waiting for network idle");

        try_join_all(pages.iter().map(|page| page.wait_for_network_idle())).await?;
        Ok(())
    }

    async fn drain(&self) -> Result<()> {
        let _guard = self.drain_lock.lock().await;

        loop {
            let mut batch = Requeue {
                pending: &self.pending,
                handles: std::mem::take(&mut *lock(&self.pending)).into(),
            };
            if batch.handles.is_empty() {
                return Ok(());
            }

            debug!(tasks = batch.handles.len(), "draining pending collection tasks");
            while let Some(handle) = batch.handles.front_mut() {
                let outcome = handle.await;
                batch.handles.pop_front();
                outcome.map_err(CollectorError::from).and_then(|r| r)?;
            }
        }
    }
}

fn lock(pending: &Mutex<Vec<PendingTask>>) -> MutexGuard<'_, Vec<PendingTask>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handles taken out for draining.
///
/// A task leaves the pending set only once it has completed: whatever is
/// still unawaited when the drain stops (error or cancellation) goes back.
struct Requeue<'a> {
    pending: &'a Mutex<Vec<PendingTask>>,
    handles: VecDeque<PendingTask>,
}

impl Drop for Requeue<'_> {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            lock(self.pending).extend(self.handles.drain(..));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{PageEvent, SessionPage};
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct NoPages;

    #[async_trait]
    impl BrowserSession for NoPages {
        async fn pages(&self) -> Result<Vec<Arc<dyn SessionPage>>> {
            Ok(Vec::new())
        }

        fn page_created(&self) -> BoxStream<'static, Arc<dyn SessionPage>> {
            Box::pin(stream::empty())
        }
    }

    fn gate() -> Arc<CompletionGate> {
        Arc::new(CompletionGate::new(Arc::new(NoPages), Duration::from_secs(2)))
    }

    /// A page whose network goes quiet after `idle_after`, or times out then.
    struct BusyPage {
        url: &'static str,
        idle_after: Duration,
        never_idle: bool,
    }

    #[async_trait]
    impl SessionPage for BusyPage {
        fn url(&self) -> String {
            self.url.to_string()
        }

        fn take_events(&self) -> Option<BoxStream<'static, PageEvent>> {
            None
        }

        async fn wait_for_network_idle(&self) -> Result<()> {
            tokio::time::sleep(self.idle_after).await;
            if self.never_idle {
                return Err(CollectorError::WaitTimeout {
                    condition: format!("network idle on {}", self.url),
                    timeout: self.idle_after,
                });
            }
            Ok(())
        }
    }

    struct Pages(Vec<Arc<dyn SessionPage>>);

    #[async_trait]
    impl BrowserSession for Pages {
        async fn pages(&self) -> Result<Vec<Arc<dyn SessionPage>>> {
            Ok(self.0.clone())
        }

        fn page_created(&self) -> BoxStream<'static, Arc<dyn SessionPage>> {
            Box::pin(stream::empty())
        }
    }

    fn busy(url: &'static str, idle_after_secs: u64) -> Arc<dyn SessionPage> {
        Arc::new(BusyPage {
            url,
            idle_after: Duration::from_secs(idle_after_secs),
            never_idle: false,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn settling_starts_after_every_page_is_idle() {
        let session = Pages(vec![
            busy("http://localhost:3456/", 1),
            busy("http://localhost:3456/popup", 4),
        ]);
        let gate = Arc::new(CompletionGate::new(Arc::new(session), Duration::from_secs(2)));
        gate.register(async { Ok(()) });

        let start = tokio::time::Instant::now();
        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { gate.wait().await }
        });

        // Popup idle at 4s, settled at 6s.
        tokio::time::sleep(Duration::from_millis(5_900)).await;
        assert!(!waiter.is_finished(), "wait returned before the slowest page settled");
        assert_eq!(gate.pending_count(), 1);

        waiter.await.unwrap().unwrap();
        assert!(start.elapsed() >= Duration::from_secs(6));
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_failure_aborts_before_drain() {
        let session = Pages(vec![
            busy("http://localhost:3456/", 1),
            Arc::new(BusyPage {
                url: "http://localhost:3456/stuck",
                idle_after: Duration::from_secs(3),
                never_idle: true,
            }),
        ]);
        let gate = CompletionGate::new(Arc::new(session), Duration::from_secs(2));
        gate.register(async { Ok(()) });

        let err = gate.wait().await.unwrap_err();
        assert!(
            matches!(err, CollectorError::WaitTimeout { ref condition, .. } if condition.ends_with("/stuck"))
        );
        assert_eq!(gate.pending_count(), 1, "drain must not run after an idle failure");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_keeps_unfinished_tasks() {
        let gate = gate();
        let done = Arc::new(AtomicBool::new(false));

        let flag = done.clone();
        gate.register(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        // Expires during the drain, after the 2s settle delay.
        let cancelled = tokio::time::timeout(Duration::from_secs(3), gate.wait()).await;
        assert!(cancelled.is_err());
        assert_eq!(gate.pending_count(), 1);

        gate.wait().await.unwrap();
        assert!(done.load(Ordering::SeqCst), "retry returned before the task completed");
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_registered_tasks() {
        let gate = gate();
        let done = Arc::new(AtomicUsize::new(0));

        for delay in [10, 3_000, 500] {
            let done = done.clone();
            gate.register(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        gate.wait().await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_tasks_registered_while_draining() {
        let gate = gate();
        let done = Arc::new(AtomicUsize::new(0));

        let inner_gate = gate.clone();
        let inner_done = done.clone();
        gate.register(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            let done = inner_done.clone();
            inner_gate.register(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            inner_done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        gate.wait().await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn settling_delay_elapses_before_drain() {
        let gate = gate();
        let start = tokio::time::Instant::now();

        gate.wait().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_task_aborts_wait() {
        let gate = gate();

        gate.register(async {
            Err(CollectorError::Validation {
                url: "http://h/".into(),
                reason: "checker unreachable".into(),
            })
        });
        gate.register(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        });

        let err = gate.wait().await.unwrap_err();
        assert!(matches!(err, CollectorError::Validation { .. }));

        // The slow task stays registered and the next wait picks it up.
        assert_eq!(gate.pending_count(), 1);
        gate.wait().await.unwrap();
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_task_surfaces_as_error() {
        let gate = gate();
        let explode = true;
        gate.register(async move {
            if explode {
                panic!("validator exploded");
            }
            Ok(())
        });

        let err = gate.wait().await.unwrap_err();
        assert!(matches!(err, CollectorError::TaskPanicked(_)));
    }
}
