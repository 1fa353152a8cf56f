//! The normalized issue record.
//!
//! Every signal the adapter observes (console message, uncaught exception,
//! failed request, validator warning) is reduced to an [`Issue`]: the page it
//! belongs to, the resource it points at, a category, a message and a
//! line/column range.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an issue came from.
///
/// The declaration order is also the sort order used inside a report, which
/// matches the lexical order of the serialized names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueCategory {
    /// Console warnings and uncaught script errors.
    Console,
    /// Markup warnings returned by the HTML validator.
    Html,
    /// Failed requests and HTTP error statuses.
    Network,
}

impl IssueCategory {
    /// All categories, in report order.
    pub const ALL: [IssueCategory; 3] = [
        IssueCategory::Console,
        IssueCategory::Html,
        IssueCategory::Network,
    ];

    /// The lowercase name used in reports.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCategory::Console => "console",
            IssueCategory::Html => "html",
            IssueCategory::Network => "network",
        }
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inclusive `start..=end` span of lines or columns.
///
/// Point locations have `start == end`. Zero means "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    /// First line/column covered.
    pub start: u32,
    /// Last line/column covered.
    pub end: u32,
}

impl Span {
    /// Creates a span covering `start..=end`.
    #[must_use]
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// A single-position span.
    #[must_use]
    pub fn point(at: u32) -> Self {
        Self { start: at, end: at }
    }
}

/// The location-and-content part of an issue, without its page/file keys.
///
/// This is what the aggregation stores per file and what a report lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueBody {
    /// Which kind of source raised the issue
    pub category: IssueCategory,
    /// Trimmed, human-readable description
    pub message: String,
    /// Line range within the file
    pub line: Span,
    /// Column range within the file
    pub column: Span,
}

/// One diagnostic attributed to a page and a resource on that page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// URL of the page the issue is attributed to. Never empty.
    pub page_url: String,
    /// URL of the script, document or request target. Falls back to `page_url`.
    pub file_url: String,
    /// Which kind of source raised the issue
    pub category: IssueCategory,
    /// Trimmed, human-readable description
    pub message: String,
    /// Line range within the file
    pub line: Span,
    /// Column range within the file
    pub column: Span,
}

impl Issue {
    /// Creates an issue located at the top of the file (`0:0`).
    ///
    /// An empty `file_url` is replaced with `page_url`.
    #[must_use]
    pub fn new(
        page_url: impl Into<String>,
        file_url: impl Into<String>,
        category: IssueCategory,
        message: impl AsRef<str>,
    ) -> Self {
        let page_url = page_url.into();
        let mut file_url = file_url.into();
        if file_url.is_empty() {
            file_url.clone_from(&page_url);
        }

        Self {
            page_url,
            file_url,
            category,
            message: message.as_ref().trim().to_string(),
            line: Span::default(),
            column: Span::default(),
        }
    }

    /// Sets the location to a single `line:column` point.
    #[must_use]
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = Span::point(line);
        self.column = Span::point(column);
        self
    }

    /// Sets explicit line and column ranges.
    #[must_use]
    pub fn spanning(mut self, line: Span, column: Span) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    /// Splits the issue into its aggregation keys and body.
    #[must_use]
    pub fn into_parts(self) -> (String, String, IssueBody) {
        (
            self.page_url,
            self.file_url,
            IssueBody {
                category: self.category,
                message: self.message,
                line: self.line,
                column: self.column,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_order_matches_names() {
        let mut names: Vec<_> = IssueCategory::ALL.iter().map(IssueCategory::as_str).collect();
        names.sort_unstable();
        let ordered: Vec<_> = IssueCategory::ALL.iter().map(IssueCategory::as_str).collect();
        assert_eq!(names, ordered);
        assert!(IssueCategory::Console < IssueCategory::Html);
        assert!(IssueCategory::Html < IssueCategory::Network);
    }

    #[test]
    fn category_serializes_lowercase() {
        let json = serde_json::to_string(&IssueCategory::Network).unwrap();
        assert_eq!(json, "\"network\"");
    }

    #[test]
    fn empty_file_url_falls_back_to_page() {
        let issue = Issue::new("http://h/", "", IssueCategory::Console, "boom");
        assert_eq!(issue.file_url, "http://h/");
    }

    #[test]
    fn message_is_trimmed() {
        let issue = Issue::new("http://h/", "http://h/a.js", IssueCategory::Console, "  spaced \n");
        assert_eq!(issue.message, "spaced");
    }

    #[test]
    fn into_parts_keeps_location() {
        let (page, file, body) = Issue::new("p", "f", IssueCategory::Html, "m")
            .spanning(Span::new(3, 4), Span::new(5, 9))
            .into_parts();

        assert_eq!(page, "p");
        assert_eq!(file, "f");
        assert_eq!(body.line, Span::new(3, 4));
        assert_eq!(body.column, Span::new(5, 9));
    }
}
