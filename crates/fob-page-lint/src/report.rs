//! The finalized, sorted report returned by [`IssueCollector::dump`].
//!
//! [`IssueCollector::dump`]: crate::IssueCollector::dump

use crate::issue::{IssueBody, IssueCategory};
use serde::{Deserialize, Serialize};
use std::fmt;

/// All issues found on one resource of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    /// Resource URL
    pub url: String,
    /// Issues ordered by `(line.start, column.start, category)`
    pub issues: Vec<IssueBody>,
}

/// All issues attributed to one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageReport {
    /// Page URL
    pub url: String,
    /// Files ordered by URL
    pub files: Vec<FileReport>,
}

/// A page → file → issues snapshot, sorted at every level.
///
/// Serializes as a bare array of pages, which is the stable shape callers
/// persist or compare against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Report {
    /// Pages ordered by URL
    pub pages: Vec<PageReport>,
}

impl Report {
    /// Builds a report, applying the sort order at every level.
    ///
    /// Issue sorting is stable: fully tied issues keep their arrival order.
    #[must_use]
    pub fn from_pages(mut pages: Vec<PageReport>) -> Self {
        pages.sort_by(|a, b| a.url.cmp(&b.url));
        for page in &mut pages {
            page.files.sort_by(|a, b| a.url.cmp(&b.url));
            for file in &mut page.files {
                file.issues
                    .sort_by_key(|issue| (issue.line.start, issue.column.start, issue.category));
            }
        }
        Self { pages }
    }

    /// Total number of issues across all pages and files.
    #[must_use]
    pub fn issue_count(&self) -> usize {
        self.issues().count()
    }

    /// Number of issues in the given category.
    #[must_use]
    pub fn count_by(&self, category: IssueCategory) -> usize {
        self.issues().filter(|i| i.category == category).count()
    }

    /// Returns true if no issue was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issue_count() == 0
    }

    /// Looks up a page entry by URL.
    #[must_use]
    pub fn page(&self, url: &str) -> Option<&PageReport> {
        self.pages.iter().find(|p| p.url == url)
    }

    /// Iterates over every issue in report order.
    pub fn issues(&self) -> impl Iterator<Item = &IssueBody> {
        self.pages
            .iter()
            .flat_map(|p| p.files.iter())
            .flat_map(|f| f.issues.iter())
    }

    /// Serializes the report as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl PageReport {
    /// Looks up a file entry by URL.
    #[must_use]
    pub fn file(&self, url: &str) -> Option<&FileReport> {
        self.files.iter().find(|f| f.url == url)
    }
}

/// Lint-style summary, one block per page and file.
impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for page in &self.pages {
            writeln!(f, "{}", page.url)?;
            for file in &page.files {
                writeln!(f, "  {}", file.url)?;
                for issue in &file.issues {
                    let position = format!("{}:{}", issue.line.start, issue.column.start);
                    writeln!(
                        f,
                        "    {position:<6} {:<8} {}",
                        issue.category.as_str(),
                        issue.message
                    )?;
                }
            }
        }

        let total = self.issue_count();
        write!(
            f,
            "{total} {} ({} console, {} html, {} network)",
            if total == 1 { "issue" } else { "issues" },
            self.count_by(IssueCategory::Console),
            self.count_by(IssueCategory::Html),
            self.count_by(IssueCategory::Network),
        )
    }
}
