//! HTML validation collaborator.
//!
//! The collector never checks markup itself. It hands a page URL to an
//! [`HtmlValidator`] and turns each returned [`HtmlWarning`] into an `html`
//! issue. [`NuHtmlChecker`] talks to a Nu HTML Checker (`vnu`) service over
//! its JSON API.

use crate::config::ValidatorConfig;
use crate::error::{CollectorError, Result};
use crate::issue::{Issue, IssueCategory, Span};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use tracing::debug;

/// A structural problem found in a document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HtmlWarning {
    /// Human-readable description
    pub message: String,
    /// First line of the offending markup, if it spans several
    #[serde(default)]
    pub first_line: Option<u32>,
    /// Last line of the offending markup
    #[serde(default)]
    pub last_line: u32,
    /// First column of the offending markup, if known
    #[serde(default)]
    pub first_column: Option<u32>,
    /// Last column of the offending markup
    #[serde(default)]
    pub last_column: u32,
}

impl HtmlWarning {
    /// Converts the warning into an `html` issue on `page_url`.
    ///
    /// Missing start positions fall back to the end positions.
    #[must_use]
    pub fn into_issue(self, page_url: &str) -> Issue {
        let line = Span::new(self.first_line.unwrap_or(self.last_line), self.last_line);
        let column = Span::new(
            self.first_column.unwrap_or(self.last_column),
            self.last_column,
        );

        Issue::new(page_url, page_url, IssueCategory::Html, &self.message).spanning(line, column)
    }
}

/// Something that can check the markup served at a URL.
#[async_trait]
pub trait HtmlValidator: Send + Sync {
    /// Returns the warnings for the document at `page_url`, in document order.
    async fn validate(&self, page_url: &str) -> Result<Vec<HtmlWarning>>;
}

impl fmt::Debug for dyn HtmlValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HtmlValidator").finish_non_exhaustive()
    }
}

/// Client for the Nu HTML Checker web service.
///
/// The checker fetches the document itself, so the page URL must be
/// reachable from wherever the service runs. For `localhost` fixtures, run a
/// local `vnu` servlet rather than the public instance.
#[derive(Debug, Clone)]
pub struct NuHtmlChecker {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct NuResponse {
    #[serde(default)]
    messages: Vec<NuMessage>,
}

#[derive(Debug, Deserialize)]
struct NuMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "subType", default)]
    sub_type: Option<String>,
    #[serde(flatten)]
    warning: HtmlWarning,
}

impl NuMessage {
    /// Errors and warnings count; plain info notes don't.
    fn is_reported(&self) -> bool {
        match self.kind.as_str() {
            "error" => true,
            "info" => self.sub_type.as_deref() == Some("warning"),
            _ => false,
        }
    }
}

impl NuHtmlChecker {
    /// Creates a client for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns `Http` if the HTTP client cannot be built.
    pub fn new(config: &ValidatorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("fob-page-lint/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    /// The checker's base URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl HtmlValidator for NuHtmlChecker {
    async fn validate(&self, page_url: &str) -> Result<Vec<HtmlWarning>> {
        debug!(page_url, endpoint = %self.endpoint, "validating document");

        let response: NuResponse = self
            .client
            .get(&self.endpoint)
            .query(&[("doc", page_url), ("out", "json")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // The checker reports its own fetch failures in-band.
        if let Some(failure) = response
            .messages
            .iter()
            .find(|m| m.kind == "non-document-error")
        {
            return Err(CollectorError::Validation {
                url: page_url.to_string(),
                reason: failure.warning.message.clone(),
            });
        }

        Ok(response
            .messages
            .into_iter()
            .filter(NuMessage::is_reported)
            .map(|m| m.warning)
            .collect())
    }
}
