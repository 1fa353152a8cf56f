//! # fob-page-lint
//!
//! Collects problems a browser observes while pages load: uncaught script
//! errors, console warnings, failed or erroring network requests, and HTML
//! validation messages for the documents themselves.
//!
//! ## Architecture
//!
//! - **BrowserSession / SessionPage**: The browser seam. Pages announce
//!   themselves and hand over a stream of [`PageEvent`]s.
//! - **EventAdapter** (via [`init_collector`]): Converts page events into
//!   [`Issue`]s, deferring anything that needs a network round-trip.
//! - **IssueCollector**: Groups issues by page and file, and produces a
//!   sorted [`Report`] once collection is complete.
//! - **CompletionGate**: Decides when collection is complete: every page's
//!   network is idle, a settle delay has passed, and pending work is drained.
//! - **stack_trace**: Extracts a file location from V8 and Gecko style traces.
//! - **NuHtmlChecker**: Talks to a Nu HTML Checker (vnu) service.
//! - **chromium**: `BrowserSession` over chromiumoxide.
//!
//! ## Example Usage
//!
//! ```ignore
//! use fob_page_lint::{init_collector, ChromeConfig, ChromeSession, CollectorOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> fob_page_lint::Result<()> {
//!     let session = Arc::new(ChromeSession::launch(ChromeConfig::default()).await?);
//!     let options = CollectorOptions::load(None)?;
//!     let (collector, session) = init_collector(session, options)?;
//!
//!     let page = session.new_page().await?;
//!     page.goto("http://localhost:3456/").await?;
//!
//!     let report = collector.dump().await?;
//!     print!("{report}");
//!
//!     session.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Testing Strategy
//!
//! 1. **Unit tests**: Parsing, grouping, and gate logic with paused Tokio time
//! 2. **Integration tests**: An in-memory session drives the whole pipeline
//! 3. **Browser tests**: Real Chrome against a local fixture server
//!
//! Run with `cargo test` (unit and integration) or `cargo test -- --ignored`
//! (browser, requires Chrome installed).

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod adapter;
pub mod chromium;
pub mod collector;
pub mod config;
pub mod error;
pub mod gate;
pub mod issue;
pub mod report;
pub mod session;
pub mod stack_trace;
pub mod validator;
pub mod wait;

// Re-export main types for convenience
pub use adapter::{
    init_collector, init_collector_with_validator, MISSING_RESPONSE_MESSAGE,
    UNKNOWN_FAILURE_MESSAGE,
};
pub use chromium::{ChromeConfig, ChromePage, ChromeSession};
pub use collector::IssueCollector;
pub use config::{CollectorOptions, ValidatorConfig};
pub use error::{CollectorError, Result};
pub use gate::CompletionGate;
pub use issue::{Issue, IssueBody, IssueCategory, Span};
pub use report::{FileReport, PageReport, Report};
pub use session::{
    BrowserSession, ConsoleEvent, ConsoleLevel, FailedRequest, FinishedRequest, PageEvent,
    ResponseInfo, ScriptError, SessionPage, SourceLocation,
};
pub use stack_trace::{locate, TraceLocation};
pub use validator::{HtmlValidator, HtmlWarning, NuHtmlChecker};
pub use wait::{WaitConfig, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT};
