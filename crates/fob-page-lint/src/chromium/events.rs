//! Translation of CDP events into [`PageEvent`]s.
//!
//! Console and exception events map one-to-one. Network events don't: CDP
//! reports a request in up to three messages (`requestWillBeSent`,
//! `responseReceived`, then `loadingFinished` or `loadingFailed`), so
//! [`NetworkTracker`] joins them by request id and also answers whether the
//! page's network is idle.
//!
//! CDP positions are 0-based; everything produced here is 1-based to match
//! stack trace text.

use crate::error::Result;
use crate::session::{
    ConsoleEvent, ConsoleLevel, FailedRequest, FinishedRequest, ResponseInfo, ScriptError,
    SourceLocation,
};
use async_trait::async_trait;
use chromiumoxide::cdp::js_protocol::runtime::{
    ConsoleApiCalledType, EventConsoleApiCalled, EventExceptionThrown, RemoteObject, StackTrace,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::time::Instant;

impl From<&EventConsoleApiCalled> for ConsoleLevel {
    /// Maps chromiumoxide's `ConsoleApiCalledType` onto our `ConsoleLevel`.
    ///
    /// We pattern match directly on the variants to avoid depending on the
    /// generated string conversions, which vary between chromiumoxide versions.
    fn from(event: &EventConsoleApiCalled) -> Self {
        match event.r#type {
            ConsoleApiCalledType::Log => ConsoleLevel::Log,
            ConsoleApiCalledType::Debug => ConsoleLevel::Debug,
            ConsoleApiCalledType::Info => ConsoleLevel::Info,
            ConsoleApiCalledType::Error => ConsoleLevel::Error,
            ConsoleApiCalledType::Warning => ConsoleLevel::Warning,
            ConsoleApiCalledType::Assert => ConsoleLevel::Assert,
            ConsoleApiCalledType::Trace => ConsoleLevel::Trace,
            _ => ConsoleLevel::Other,
        }
    }
}

/// Parses a CDP `Runtime.consoleAPICalled` into a [`ConsoleEvent`].
///
/// Arguments are formatted and joined with spaces; the location is the top
/// frame of the captured stack, if any.
pub(crate) fn parse_console_event(event: &EventConsoleApiCalled) -> ConsoleEvent {
    let text = event
        .args
        .iter()
        .map(format_remote_object)
        .collect::<Vec<_>>()
        .join(" ");

    let location = event
        .stack_trace
        .as_ref()
        .and_then(|trace| trace.call_frames.first())
        .map(|frame| SourceLocation {
            url: frame.url.clone(),
            line: one_based(frame.line_number),
            column: one_based(frame.column_number),
        })
        .unwrap_or_default();

    ConsoleEvent {
        level: ConsoleLevel::from(event),
        text,
        location,
    }
}

/// Parses a CDP `Runtime.exceptionThrown` into a [`ScriptError`].
///
/// For `Error` objects V8 puts `"<Name>: <message>\n    at ..."` in the
/// description; the name prefix is stripped from the message and the whole
/// description is kept as the stack. Thrown primitives have no description,
/// only a value.
pub(crate) fn parse_exception(event: &EventExceptionThrown) -> ScriptError {
    let details = &event.exception_details;
    let exception = details.exception.as_ref();
    let description = exception.and_then(|e| e.description.as_deref());

    let message = match (description, exception) {
        (Some(description), Some(exception)) => {
            let header = description.lines().next().unwrap_or_default();
            exception
                .class_name
                .as_deref()
                .and_then(|class| header.strip_prefix(class))
                .and_then(|rest| rest.strip_prefix(": "))
                .unwrap_or(header)
                .to_string()
        }
        (None, Some(exception)) => format_remote_object(exception),
        _ => details.text.clone(),
    };

    let stack = match description {
        Some(description) if description.contains('\n') => Some(description.to_string()),
        _ => details
            .stack_trace
            .as_ref()
            .map(|trace| synthesize_stack(&message, trace)),
    };

    ScriptError { message, stack }
}

/// Renders CDP call frames in V8's textual trace format.
fn synthesize_stack(message: &str, trace: &StackTrace) -> String {
    let mut stack = format!("Error: {message}");
    for frame in &trace.call_frames {
        let url = if frame.url.is_empty() {
            "<anonymous>"
        } else {
            frame.url.as_str()
        };
        stack.push_str(&format!(
            "\n    at {url}:{}:{}",
            one_based(frame.line_number),
            one_based(frame.column_number)
        ));
    }
    stack
}

fn format_remote_object(object: &RemoteObject) -> String {
    match &object.value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(value) => value.to_string(),
        None => object
            .description
            .clone()
            .unwrap_or_else(|| "<object>".to_string()),
    }
}

fn one_based(position: i64) -> u32 {
    u32::try_from(position.saturating_add(1)).unwrap_or(0)
}

/// Response status shared between the tracker and a finished request.
///
/// CDP events reach the page through separate listeners, so
/// `responseReceived` can be translated after `loadingFinished`.
type ResponseSlot = Arc<Mutex<Option<ResponseInfo>>>;

/// A request that reached `Network.loadingFinished`.
#[derive(Debug, Clone)]
pub(crate) struct ChromeFinishedRequest {
    url: String,
    response: ResponseSlot,
}

#[async_trait]
impl FinishedRequest for ChromeFinishedRequest {
    fn url(&self) -> &str {
        &self.url
    }

    async fn response(&self) -> Result<Option<ResponseInfo>> {
        Ok(self
            .response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

#[derive(Debug)]
struct InFlight {
    url: String,
    response: ResponseSlot,
}

/// In-flight request bookkeeping for one page.
#[derive(Debug)]
pub(crate) struct NetworkTracker {
    in_flight: HashMap<String, InFlight>,
    // Finished before their response was translated. Weak, so a slot goes
    // away with the last `ChromeFinishedRequest` that can read it.
    awaiting_response: HashMap<String, Weak<Mutex<Option<ResponseInfo>>>>,
    last_activity: Instant,
}

impl NetworkTracker {
    pub(crate) fn new() -> Self {
        Self {
            in_flight: HashMap::new(),
            awaiting_response: HashMap::new(),
            last_activity: Instant::now(),
        }
    }

    /// `Network.requestWillBeSent`. A redirect reuses the id and replaces the URL.
    pub(crate) fn request_started(&mut self, request_id: &str, url: &str) {
        self.last_activity = Instant::now();
        self.in_flight.insert(
            request_id.to_string(),
            InFlight {
                url: url.to_string(),
                response: ResponseSlot::default(),
            },
        );
    }

    /// `Network.responseReceived`.
    pub(crate) fn response_received(&mut self, request_id: &str, status: i64, status_text: &str) {
        self.last_activity = Instant::now();
        let slot = match self.in_flight.get(request_id) {
            Some(request) => Some(request.response.clone()),
            None => self
                .awaiting_response
                .remove(request_id)
                .and_then(|slot| slot.upgrade()),
        };

        if let Some(slot) = slot {
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(ResponseInfo {
                status: u16::try_from(status).unwrap_or(0),
                status_text: status_text.to_string(),
            });
        }
    }

    /// `Network.loadingFinished`. Returns `None` for ids we never saw start.
    pub(crate) fn finished(&mut self, request_id: &str) -> Option<ChromeFinishedRequest> {
        self.last_activity = Instant::now();
        let request = self.in_flight.remove(request_id)?;

        if request
            .response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
        {
            self.awaiting_response
                .retain(|_, slot| slot.strong_count() > 0);
            self.awaiting_response
                .insert(request_id.to_string(), Arc::downgrade(&request.response));
        }

        Some(ChromeFinishedRequest {
            url: request.url,
            response: request.response,
        })
    }

    /// `Network.loadingFailed`. Returns `None` for ids we never saw start.
    pub(crate) fn failed(&mut self, request_id: &str, error_text: &str) -> Option<FailedRequest> {
        self.last_activity = Instant::now();
        self.in_flight.remove(request_id).map(|request| FailedRequest {
            url: request.url,
            failure: Some(error_text.to_string()).filter(|text| !text.is_empty()),
        })
    }

    /// True once nothing has been in flight for at least `window`.
    pub(crate) fn is_idle(&self, window: Duration) -> bool {
        self.in_flight.is_empty() && self.last_activity.elapsed() >= window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn console_event(kind: &str, args: serde_json::Value) -> EventConsoleApiCalled {
        serde_json::from_value(json!({
            "type": kind,
            "args": args,
            "executionContextId": 1,
            "timestamp": 0.0,
            "stackTrace": {
                "callFrames": [{
                    "functionName": "",
                    "scriptId": "5",
                    "url": "http://localhost:3456/app.js",
                    "lineNumber": 3,
                    "columnNumber": 8
                }]
            }
        }))
        .unwrap()
    }

    fn exception_event(details: serde_json::Value) -> EventExceptionThrown {
        serde_json::from_value(json!({
            "timestamp": 0.0,
            "exceptionDetails": details,
        }))
        .unwrap()
    }

    #[test]
    fn console_levels_map_from_cdp() {
        let warn = console_event("warning", json!([]));
        let assert = console_event("assert", json!([]));
        let table = console_event("table", json!([]));
        assert_eq!(ConsoleLevel::from(&warn), ConsoleLevel::Warning);
        assert_eq!(ConsoleLevel::from(&assert), ConsoleLevel::Assert);
        assert_eq!(ConsoleLevel::from(&table), ConsoleLevel::Other);
    }

    #[test]
    fn console_event_text_and_location() {
        let event = console_event(
            "warning",
            json!([
                { "type": "string", "value": "count is" },
                { "type": "number", "value": 3, "description": "3" },
                { "type": "object", "description": "HTMLDivElement" }
            ]),
        );

        let parsed = parse_console_event(&event);
        assert_eq!(parsed.text, "count is 3 HTMLDivElement");
        assert_eq!(parsed.location.url, "http://localhost:3456/app.js");
        assert_eq!(parsed.location.line, 4);
        assert_eq!(parsed.location.column, 9);
    }

    #[test]
    fn exception_message_drops_error_name() {
        let event = exception_event(json!({
            "exceptionId": 1,
            "text": "Uncaught",
            "lineNumber": 6,
            "columnNumber": 20,
            "exception": {
                "type": "object",
                "subtype": "error",
                "className": "Error",
                "description": "Error: This is a test error for playwright-errors.\n    at http://localhost:3456/:7:21"
            }
        }));

        let error = parse_exception(&event);
        assert_eq!(error.message, "This is a test error for playwright-errors.");
        assert_eq!(
            error.stack.as_deref(),
            Some("Error: This is a test error for playwright-errors.\n    at http://localhost:3456/:7:21")
        );
    }

    #[test]
    fn thrown_primitive_uses_value_and_frames() {
        let event = exception_event(json!({
            "exceptionId": 2,
            "text": "Uncaught",
            "lineNumber": 1,
            "columnNumber": 4,
            "exception": { "type": "string", "value": "plain string" },
            "stackTrace": {
                "callFrames": [{
                    "functionName": "",
                    "scriptId": "9",
                    "url": "http://localhost:3456/app.js",
                    "lineNumber": 1,
                    "columnNumber": 4
                }]
            }
        }));

        let error = parse_exception(&event);
        assert_eq!(error.message, "plain string");
        assert_eq!(
            error.stack.as_deref(),
            Some("Error: plain string\n    at http://localhost:3456/app.js:2:5")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn tracker_joins_request_lifecycle() {
        let mut tracker = NetworkTracker::new();
        tracker.request_started("1", "http://localhost:3456/");
        tracker.request_started("2", "http://localhost:3456/missing.js");
        tracker.response_received("1", 200, "OK");
        tracker.response_received("2", 404, "Not Found");

        let document = tracker.finished("1").unwrap();
        assert_eq!(document.url(), "http://localhost:3456/");
        assert_eq!(document.response().await.unwrap().unwrap().status, 200);

        let missing = tracker.finished("2").unwrap();
        let response = missing.response().await.unwrap().unwrap();
        assert!(response.is_error());
        assert_eq!(response.status_text, "Not Found");

        assert!(tracker.finished("unknown").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn response_translated_after_finish_is_seen() {
        let mut tracker = NetworkTracker::new();
        tracker.request_started("3", "http://localhost:3456/missing.css");

        let finished = tracker.finished("3").unwrap();
        assert_eq!(finished.response().await.unwrap(), None);

        tracker.response_received("3", 404, "Not Found");
        assert_eq!(finished.response().await.unwrap().unwrap().status, 404);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_requests_are_forgotten_once_dropped() {
        let mut tracker = NetworkTracker::new();
        tracker.request_started("4", "http://localhost:3456/sw.js");
        tracker.request_started("5", "http://localhost:3456/cached.css");

        let first = tracker.finished("4").unwrap();
        drop(first);
        let _second = tracker.finished("5").unwrap();

        assert_eq!(tracker.awaiting_response.len(), 1);
        assert!(tracker.awaiting_response.contains_key("5"));

        // A late response for a dropped request is ignored.
        tracker.response_received("4", 200, "OK");
        assert_eq!(tracker.awaiting_response.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tracker_reports_failures() {
        let mut tracker = NetworkTracker::new();
        tracker.request_started("7", "http://localhost:1/");
        let failed = tracker.failed("7", "net::ERR_CONNECTION_REFUSED").unwrap();
        assert_eq!(failed.url, "http://localhost:1/");
        assert_eq!(failed.failure.as_deref(), Some("net::ERR_CONNECTION_REFUSED"));

        tracker.request_started("8", "http://localhost:1/x");
        assert_eq!(tracker.failed("8", "").unwrap().failure, None);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_requires_quiet_window() {
        let window = Duration::from_millis(500);
        let mut tracker = NetworkTracker::new();
        tracker.request_started("1", "http://h/");
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!tracker.is_idle(window), "request still in flight");

        tracker.finished("1");
        assert!(!tracker.is_idle(window), "window restarts on activity");

        tokio::time::advance(window).await;
        assert!(tracker.is_idle(window));
    }
}
