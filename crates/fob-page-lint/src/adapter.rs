//! Turns browser events into issues.
//!
//! [`init_collector`] subscribes to the session's page-created stream and,
//! for every page, spawns a task that converts its events:
//!
//! | event            | issue                                              |
//! |------------------|----------------------------------------------------|
//! | console warning, assert, trace | `console` at the call's location     |
//! | uncaught error   | `console` at the first non-anonymous stack frame   |
//! | request failed   | `network` with the failure reason                  |
//! | request finished | pending task: `network` on status ≥ 400, `html` for the document |
//!
//! Console errors are skipped: the same failure also arrives as a page error.

use crate::collector::IssueCollector;
use crate::config::CollectorOptions;
use crate::error::Result;
use crate::issue::{Issue, IssueCategory};
use crate::session::{
    BrowserSession, ConsoleEvent, FailedRequest, FinishedRequest, PageEvent, ScriptError,
    SessionPage,
};
use crate::stack_trace;
use crate::validator::{HtmlValidator, NuHtmlChecker};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Message used when a request fails without a reason.
pub const UNKNOWN_FAILURE_MESSAGE: &str = "Unexpected request failure";

/// Message used for a finished request without a response, when reported.
pub const MISSING_RESPONSE_MESSAGE: &str = "Unexpected failure on request";

/// Wires a collector to `session` using the Nu HTML Checker from `options`.
///
/// Only pages opened after this call are observed, so call it before
/// creating the first page. Returns the collector together with the session
/// handle for further driving.
///
/// # Errors
///
/// Returns `Http` if the validator client cannot be built.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
pub fn init_collector<S>(
    session: Arc<S>,
    options: CollectorOptions,
) -> Result<(IssueCollector, Arc<S>)>
where
    S: BrowserSession + 'static,
{
    let validator = NuHtmlChecker::new(&options.validator)?;
    Ok(init_collector_with_validator(
        session,
        options,
        Arc::new(validator),
    ))
}

/// Wires a collector to `session` with a custom HTML validator.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
pub fn init_collector_with_validator<S>(
    session: Arc<S>,
    options: CollectorOptions,
    validator: Arc<dyn HtmlValidator>,
) -> (IssueCollector, Arc<S>)
where
    S: BrowserSession + 'static,
{
    let collector = IssueCollector::new(session.clone(), options.settle_delay());
    let adapter = EventAdapter {
        collector: collector.clone(),
        validator,
        options: Arc::new(options),
    };

    let mut pages = session.page_created();
    tokio::spawn(async move {
        while let Some(page) = pages.next().await {
            adapter.attach(page);
        }
        debug!("session page stream closed");
    });

    (collector, session)
}

/// Per-session event conversion state, cloned into each page task.
#[derive(Clone)]
struct EventAdapter {
    collector: IssueCollector,
    validator: Arc<dyn HtmlValidator>,
    options: Arc<CollectorOptions>,
}

impl EventAdapter {
    fn attach(&self, page: Arc<dyn SessionPage>) {
        let Some(mut events) = page.take_events() else {
            warn!(url = %page.url(), "page events already taken, not collecting");
            return;
        };
        debug!(url = %page.url(), "collecting page events");

        let adapter = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                adapter.handle(&page, event);
            }
            debug!(url = %page.url(), "page event stream closed");
        });
    }

    fn handle(&self, page: &Arc<dyn SessionPage>, event: PageEvent) {
        match event {
            PageEvent::Console(event) => {
                if let Some(issue) = console_issue(&page.url(), event) {
                    self.collector.add(issue);
                }
            }
            PageEvent::PageError(error) => {
                self.collector.add(page_error_issue(&page.url(), &error));
            }
            PageEvent::RequestFailed(request) => {
                self.collector.add(request_failed_issue(&page.url(), request));
            }
            PageEvent::RequestFinished(request) => {
                let adapter = self.clone();
                let page = page.clone();
                self.collector.register_pending_work(async move {
                    adapter.request_finished(page, request).await
                });
            }
        }
    }

    async fn request_finished(
        self,
        page: Arc<dyn SessionPage>,
        request: Arc<dyn FinishedRequest>,
    ) -> Result<()> {
        // Right after navigation the page can still report about:blank.
        tokio::time::sleep(self.options.url_settle_delay()).await;

        let page_url = page.url();
        let request_url = request.url().to_string();

        match request.response().await? {
            Some(response) if response.is_error() => {
                let message = format!("{} {}", response.status, response.status_text);
                self.collector.add(network_issue(&page_url, &request_url, &message));
            }
            Some(_) => {}
            None if self.options.ignore_missing_response => {
                debug!(url = %request_url, "finished request has no response, ignoring");
                return Ok(());
            }
            None => {
                self.collector
                    .add(network_issue(&page_url, &request_url, MISSING_RESPONSE_MESSAGE));
            }
        }

        if self.options.html && page_url == request_url {
            let warnings = self.validator.validate(&page_url).await?;
            debug!(url = %page_url, warnings = warnings.len(), "document validated");
            self.collector
                .add_all(warnings.into_iter().map(|w| w.into_issue(&page_url)));
        }

        Ok(())
    }
}

fn console_issue(page_url: &str, event: ConsoleEvent) -> Option<Issue> {
    if !event.level.is_reported() {
        return None;
    }

    Some(
        Issue::new(page_url, event.location.url, IssueCategory::Console, &event.text)
            .at(event.location.line, event.location.column),
    )
}

fn page_error_issue(page_url: &str, error: &ScriptError) -> Issue {
    let location = error
        .stack
        .as_deref()
        .map(|stack| stack_trace::locate(stack, &error.message))
        .unwrap_or_default();

    Issue::new(
        page_url,
        location.file_url.unwrap_or_else(|| page_url.to_string()),
        IssueCategory::Console,
        &error.message,
    )
    .at(location.line, location.column)
}

fn request_failed_issue(page_url: &str, request: FailedRequest) -> Issue {
    let message = request
        .failure
        .filter(|reason| !reason.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_FAILURE_MESSAGE.to_string());

    network_issue(page_url, &request.url, &message)
}

fn network_issue(page_url: &str, request_url: &str, message: &str) -> Issue {
    Issue::new(page_url, request_url, IssueCategory::Network, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::Span;
    use crate::session::{ConsoleLevel, SourceLocation};

    const PAGE: &str = "http://localhost:3456/";

    fn console_event(level: ConsoleLevel, text: &str) -> ConsoleEvent {
        ConsoleEvent {
            level,
            text: text.to_string(),
            location: SourceLocation {
                url: "http://localhost:3456/app.js".into(),
                line: 4,
                column: 9,
            },
        }
    }

    #[test]
    fn console_warning_uses_event_location() {
        let issue = console_issue(PAGE, console_event(ConsoleLevel::Warning, " careful ")).unwrap();
        assert_eq!(issue.file_url, "http://localhost:3456/app.js");
        assert_eq!(issue.message, "careful");
        assert_eq!(issue.line, Span::point(4));
        assert_eq!(issue.column, Span::point(9));
    }

    #[test]
    fn console_errors_and_logs_are_skipped() {
        assert!(console_issue(PAGE, console_event(ConsoleLevel::Error, "boom")).is_none());
        assert!(console_issue(PAGE, console_event(ConsoleLevel::Log, "hi")).is_none());
    }

    #[test]
    fn console_without_url_falls_back_to_page() {
        let mut event = console_event(ConsoleLevel::Trace, "here");
        event.location = SourceLocation::default();
        let issue = console_issue(PAGE, event).unwrap();
        assert_eq!(issue.file_url, PAGE);
    }

    #[test]
    fn page_error_locates_frame() {
        let issue = page_error_issue(
            PAGE,
            &ScriptError {
                message: "This is a test error for playwright-errors.".into(),
                stack: Some(
                    "Error: This is a test error for playwright-errors.\n    at http://localhost:3456/:7:21"
                        .into(),
                ),
            },
        );

        assert_eq!(issue.category, IssueCategory::Console);
        assert_eq!(issue.file_url, PAGE);
        assert_eq!(issue.line, Span::point(7));
        assert_eq!(issue.column, Span::point(21));
    }

    #[test]
    fn page_error_without_stack_points_at_page() {
        let issue = page_error_issue(
            "http://localhost:3456/other",
            &ScriptError {
                message: "thrown string".into(),
                stack: None,
            },
        );

        assert_eq!(issue.file_url, "http://localhost:3456/other");
        assert_eq!(issue.line, Span::point(0));
    }

    #[test]
    fn failed_request_defaults_message() {
        let issue = request_failed_issue(
            PAGE,
            FailedRequest {
                url: "http://localhost:3456/gone.js".into(),
                failure: None,
            },
        );
        assert_eq!(issue.category, IssueCategory::Network);
        assert_eq!(issue.message, UNKNOWN_FAILURE_MESSAGE);
        assert_eq!(issue.line, Span::default());

        let issue = request_failed_issue(
            PAGE,
            FailedRequest {
                url: "http://localhost:3456/gone.js".into(),
                failure: Some("net::ERR_CONNECTION_REFUSED".into()),
            },
        );
        assert_eq!(issue.message, "net::ERR_CONNECTION_REFUSED");
    }
}
