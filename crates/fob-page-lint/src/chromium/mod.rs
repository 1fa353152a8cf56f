//! Chromium backend for the collector, built on chromiumoxide.
//!
//! [`ChromeSession`] implements [`BrowserSession`](crate::session::BrowserSession)
//! and [`ChromePage`] implements [`SessionPage`](crate::session::SessionPage).
//! Tests and alternative drivers can implement those traits directly instead.

mod browser;
mod events;
mod page;

pub use browser::{ChromeConfig, ChromeSession};
pub use page::{ChromePage, DEFAULT_IDLE_WINDOW};
