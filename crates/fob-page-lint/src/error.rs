//! Error types for issue collection.
//!
//! Parse ambiguity inside a single event never reaches this type; it degrades
//! to best-effort data instead. What does show up here is anything that
//! threatens the completeness of a report: a browser that failed to start, a
//! validator call that failed inside a pending task, a follow-up task that
//! panicked.

use std::time::Duration;
use thiserror::Error;

/// The main error type for collector and collaborator operations.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Failed to launch the browser process.
    ///
    /// This typically occurs when Chrome/Chromium is not installed,
    /// or when there are permission issues with the executable.
    #[error("failed to launch browser: {reason}")]
    LaunchFailed {
        /// Human-readable reason for the launch failure
        reason: String,
        /// Optional underlying error that caused the failure
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Failed to establish or use the Chrome DevTools Protocol connection.
    #[error("CDP connection failed: {0}")]
    ConnectionFailed(String),

    /// Navigation to a URL failed.
    #[error("navigation to '{url}' failed: {reason}")]
    NavigationFailed {
        /// The URL that failed to load
        url: String,
        /// Reason for the navigation failure
        reason: String,
    },

    /// A wait condition was not satisfied within the timeout.
    #[error("wait condition '{condition}' timed out after {timeout:?}")]
    WaitTimeout {
        /// Description of the condition that timed out
        condition: String,
        /// How long we waited before timing out
        timeout: Duration,
    },

    /// JavaScript execution in the page context failed.
    #[error("JavaScript execution failed: {0}")]
    ScriptExecutionFailed(String),

    /// An operation was attempted on a closed browser instance.
    #[error("browser instance is already closed")]
    AlreadyClosed,

    /// The HTML validator could not check a page.
    #[error("HTML validation of '{url}' failed: {reason}")]
    Validation {
        /// The page URL handed to the validator
        url: String,
        /// What the validator reported
        reason: String,
    },

    /// A registered follow-up task panicked or was cancelled before finishing.
    #[error("pending collection task did not complete: {0}")]
    TaskPanicked(#[from] tokio::task::JoinError),

    /// Configuration could not be loaded or had the wrong shape.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Wraps errors from the chromiumoxide library.
    #[error("chromiumoxide error: {0}")]
    ChromiumOxide(#[from] chromiumoxide::error::CdpError),

    /// Transport errors talking to the validator service.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for CollectorError {
    fn from(err: figment::Error) -> Self {
        CollectorError::Config(err.to_string())
    }
}

/// A specialized Result type for collector operations.
pub type Result<T> = std::result::Result<T, CollectorError>;
