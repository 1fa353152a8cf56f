//! Issue aggregation.
//!
//! `IssueCollector` owns a page → file → issues map for one browser session.
//! The map only grows: `add` appends, `dump` reads a snapshot once the
//! [`CompletionGate`] says collection is complete.
//!
//! # Design Rationale
//!
//! We use `Arc<Mutex<HashMap<..>>>` and take the lock only for the duration of
//! an insert or a snapshot, never across an `.await`. Every `add` is therefore
//! atomic with respect to every other `add`, whichever task it comes from.
//! Ordering is not taken from the map; `dump` sorts explicitly.

use crate::error::Result;
use crate::gate::CompletionGate;
use crate::issue::{Issue, IssueBody};
use crate::report::{FileReport, PageReport, Report};
use crate::session::BrowserSession;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

type FileIssues = HashMap<String, Vec<IssueBody>>;

/// Collects issues for one browser session and produces sorted reports.
///
/// This type is cheaply cloneable (Arc); clones share the same aggregation
/// and pending-work set, so event handlers can each hold one.
#[derive(Debug, Clone)]
pub struct IssueCollector {
    issues: Arc<Mutex<HashMap<String, FileIssues>>>,
    gate: Arc<CompletionGate>,
}

impl IssueCollector {
    /// Creates an empty collector bound to `session`.
    ///
    /// `settle_delay` is the pause between network idle and draining pending
    /// work; see [`CompletionGate`].
    pub fn new(session: Arc<dyn BrowserSession>, settle_delay: Duration) -> Self {
        Self {
            issues: Arc::new(Mutex::new(HashMap::new())),
            gate: Arc::new(CompletionGate::new(session, settle_delay)),
        }
    }

    /// Records one issue.
    ///
    /// Identical issues are kept as separate entries.
    pub fn add(&self, issue: Issue) {
        let mut issues = self.issues.lock().unwrap_or_else(PoisonError::into_inner);
        Self::insert(&mut issues, issue);
    }

    /// Records several issues under a single lock, in order.
    pub fn add_all(&self, batch: impl IntoIterator<Item = Issue>) {
        let mut issues = self.issues.lock().unwrap_or_else(PoisonError::into_inner);
        for issue in batch {
            Self::insert(&mut issues, issue);
        }
    }

    fn insert(issues: &mut HashMap<String, FileIssues>, issue: Issue) {
        let (page_url, file_url, body) = issue.into_parts();
        issues
            .entry(page_url)
            .or_default()
            .entry(file_url)
            .or_default()
            .push(body);
    }

    /// Registers asynchronous work whose issues must be in the report.
    ///
    /// `dump` and `wait_for_collection` won't resolve until the task has
    /// finished, and fail if it fails.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn register_pending_work<F>(&self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.gate.register(task);
    }

    /// Waits until every known page is idle, the settling delay has passed,
    /// and all pending work has finished.
    ///
    /// # Errors
    ///
    /// Returns the error of the first pending task that failed.
    pub async fn wait_for_collection(&self) -> Result<()> {
        self.gate.wait().await
    }

    /// Waits for collection to complete and returns a sorted snapshot.
    ///
    /// Safe to call repeatedly; each call waits again.
    ///
    /// # Errors
    ///
    /// Returns the error of the first pending task that failed. Issues already
    /// collected are kept for the next call.
    pub async fn dump(&self) -> Result<Report> {
        self.wait_for_collection().await?;

        let report = self.snapshot();
        debug!(
            pages = report.pages.len(),
            issues = report.issue_count(),
            "issue collection complete"
        );
        Ok(report)
    }

    /// Sorted snapshot of what has been collected so far, without waiting.
    #[must_use]
    pub fn snapshot(&self) -> Report {
        let issues = self.issues.lock().unwrap_or_else(PoisonError::into_inner);

        let pages = issues
            .iter()
            .map(|(page_url, files)| PageReport {
                url: page_url.clone(),
                files: files
                    .iter()
                    .map(|(file_url, issues)| FileReport {
                        url: file_url.clone(),
                        issues: issues.clone(),
                    })
                    .collect(),
            })
            .collect();

        Report::from_pages(pages)
    }

    /// Number of issues collected so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.issues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .flat_map(HashMap::values)
            .map(Vec::len)
            .sum()
    }

    /// Returns true if nothing has been collected yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
