//! The browser collaborator seen by the collector.
//!
//! fob-page-lint doesn't drive browsers itself; it consumes pages and their
//! events from anything implementing [`BrowserSession`]. The chromium backend
//! in [`crate::chromium`] is one implementation, the integration tests use an
//! in-memory one.
//!
//! The traits are object-safe so the collector can hold sessions and pages
//! behind `Arc<dyn ...>` without knowing the backend.

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;

/// Console API that produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsoleLevel {
    /// `console.log()`
    Log,
    /// `console.debug()`
    Debug,
    /// `console.info()`
    Info,
    /// `console.error()`
    Error,
    /// `console.warn()`
    Warning,
    /// `console.assert()` with a falsy condition
    Assert,
    /// `console.trace()`
    Trace,
    /// Catch-all for other console APIs
    Other,
}

impl ConsoleLevel {
    /// Returns true for the levels reported as issues.
    ///
    /// `Error` is excluded: every uncaught exception also shows up as an
    /// error-level console message on some engines, and it is already
    /// reported through [`PageEvent::PageError`].
    #[must_use]
    pub fn is_reported(&self) -> bool {
        matches!(
            self,
            ConsoleLevel::Warning | ConsoleLevel::Assert | ConsoleLevel::Trace
        )
    }
}

impl From<&str> for ConsoleLevel {
    fn from(s: &str) -> Self {
        match s {
            "log" => ConsoleLevel::Log,
            "debug" => ConsoleLevel::Debug,
            "info" => ConsoleLevel::Info,
            "error" => ConsoleLevel::Error,
            "warning" | "warn" => ConsoleLevel::Warning,
            "assert" => ConsoleLevel::Assert,
            "trace" => ConsoleLevel::Trace,
            _ => ConsoleLevel::Other,
        }
    }
}

/// Source position attached to a console message by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLocation {
    /// Script or document URL; empty when the engine didn't report one
    pub url: String,
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
}

/// A message logged through the console API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleEvent {
    /// Which console method was called
    pub level: ConsoleLevel,
    /// Formatted message; multiple arguments are joined with spaces
    pub text: String,
    /// Where the call happened
    pub location: SourceLocation,
}

/// An uncaught exception raised by a page script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    /// The error message, without the `Error: ` name prefix
    pub message: String,
    /// Raw engine stack trace, if one was captured
    pub stack: Option<String>,
}

/// A request that never completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedRequest {
    /// Request URL
    pub url: String,
    /// Engine-reported failure reason (e.g. `net::ERR_CONNECTION_REFUSED`)
    pub failure: Option<String>,
}

/// Status line of a finished request's response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseInfo {
    /// HTTP status code
    pub status: u16,
    /// HTTP reason phrase, possibly empty
    pub status_text: String,
}

impl ResponseInfo {
    /// Returns true for 4xx and 5xx statuses.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }
}

/// A request whose body finished downloading.
///
/// The response is fetched lazily because some backends only resolve it on
/// demand.
#[async_trait]
pub trait FinishedRequest: Send + Sync {
    /// Request URL.
    fn url(&self) -> &str;

    /// Response status, or `None` if the backend has no response for the
    /// request.
    async fn response(&self) -> Result<Option<ResponseInfo>>;
}

impl fmt::Debug for dyn FinishedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinishedRequest")
            .field("url", &self.url())
            .finish()
    }
}

/// Everything a page reports that the collector cares about.
#[derive(Debug, Clone)]
pub enum PageEvent {
    /// `console.*` call
    Console(ConsoleEvent),
    /// Uncaught exception
    PageError(ScriptError),
    /// Request failed before a response completed
    RequestFailed(FailedRequest),
    /// Request completed (with any status)
    RequestFinished(Arc<dyn FinishedRequest>),
}

/// One page (tab or popup) of a session.
#[async_trait]
pub trait SessionPage: Send + Sync {
    /// The URL currently displayed by the page.
    fn url(&self) -> String;

    /// Takes the page's event stream.
    ///
    /// Events raised before the stream is taken are buffered. The stream can
    /// be taken once; later calls return `None`.
    fn take_events(&self) -> Option<BoxStream<'static, PageEvent>>;

    /// Resolves once the page has had no in-flight network request for the
    /// backend's idle window.
    async fn wait_for_network_idle(&self) -> Result<()>;
}

impl fmt::Debug for dyn SessionPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPage")
            .field("url", &self.url())
            .finish()
    }
}

/// A browser context: a set of pages sharing one profile.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Pages currently open in the session.
    async fn pages(&self) -> Result<Vec<Arc<dyn SessionPage>>>;

    /// Stream of pages opened after this call, popups included.
    fn page_created(&self) -> BoxStream<'static, Arc<dyn SessionPage>>;
}

impl fmt::Debug for dyn BrowserSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowserSession").finish_non_exhaustive()
    }
}
