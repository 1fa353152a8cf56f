//! Collector options.
//!
//! Options are layered the same way the CLI layers its build config:
//! defaults, then an optional TOML file, then `FOB_LINT_*` environment
//! variables. Unknown keys are ignored at every layer.

use crate::error::Result;
use figment::{
    providers::{Env, Format as _, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for option overrides.
pub const ENV_PREFIX: &str = "FOB_LINT_";

/// Default delay after network idle before draining pending work.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Default delay before a finished request reads its page's URL.
pub const DEFAULT_URL_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Default Nu HTML Checker endpoint (a locally running `vnu` servlet).
pub const DEFAULT_VALIDATOR_ENDPOINT: &str = "http://localhost:8888/";

/// Options controlling what the collector reports and how long it waits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorOptions {
    /// Run the HTML validator on every loaded document.
    pub html: bool,

    /// Pause after every page reached network idle, in milliseconds.
    ///
    /// Admits errors raised by timers and deferred handlers.
    pub settle_delay_ms: u64,

    /// Pause before a finished request reads its page's URL, in milliseconds.
    ///
    /// Right after navigation the page may still report `about:blank`.
    pub url_settle_delay_ms: u64,

    /// Drop finished requests that have no response instead of reporting them.
    ///
    /// Some backends finish requests without ever exposing a response (e.g.
    /// service-worker or cached loads), which would otherwise surface as
    /// spurious network issues. An ignored request is not HTML-validated
    /// either. Turn off once the backend reports reliably.
    pub ignore_missing_response: bool,

    /// HTML validator connection settings.
    pub validator: ValidatorConfig,
}

impl CollectorOptions {
    /// Options with the HTML check toggled.
    #[must_use]
    pub fn with_html(mut self, html: bool) -> Self {
        self.html = html;
        self
    }

    /// Options with custom settle delays.
    #[must_use]
    pub fn with_delays(mut self, settle: Duration, url_settle: Duration) -> Self {
        self.settle_delay_ms = duration_ms(settle);
        self.url_settle_delay_ms = duration_ms(url_settle);
        self
    }

    /// Delay between network idle and the pending-work drain.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Delay before a finished request inspects its page.
    #[must_use]
    pub fn url_settle_delay(&self) -> Duration {
        Duration::from_millis(self.url_settle_delay_ms)
    }

    /// Loads options from defaults, an optional TOML file, and the environment.
    ///
    /// Nested keys use a double underscore in the environment, e.g.
    /// `FOB_LINT_VALIDATOR__ENDPOINT`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if a source has a value of the wrong type.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Ok(figment.extract()?)
    }
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            html: true,
            settle_delay_ms: duration_ms(DEFAULT_SETTLE_DELAY),
            url_settle_delay_ms: duration_ms(DEFAULT_URL_SETTLE_DELAY),
            ignore_missing_response: true,
            validator: ValidatorConfig::default(),
        }
    }
}

/// Where the Nu HTML Checker lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Base URL of the checker service
    pub endpoint: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl ValidatorConfig {
    /// Request timeout as a `Duration`.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_VALIDATOR_ENDPOINT.to_string(),
            timeout_ms: 30_000,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_enable_html() {
        let options = CollectorOptions::default();
        assert!(options.html);
        assert!(options.ignore_missing_response);
        assert_eq!(options.settle_delay(), Duration::from_secs(2));
        assert_eq!(options.url_settle_delay(), Duration::from_secs(1));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let options: CollectorOptions =
            serde_json::from_value(serde_json::json!({ "html": false, "color": "blue" })).unwrap();
        assert!(!options.html);
        assert_eq!(options.settle_delay_ms, 2_000);
    }

    #[test]
    fn load_merges_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "html = false\nsettle_delay_ms = 500\nunrelated = 1\n\n[validator]\nendpoint = \"http://vnu:9999/\""
        )
        .unwrap();

        let options = CollectorOptions::load(Some(file.path())).unwrap();
        assert!(!options.html);
        assert_eq!(options.settle_delay(), Duration::from_millis(500));
        assert_eq!(options.url_settle_delay(), DEFAULT_URL_SETTLE_DELAY);
        assert_eq!(options.validator.endpoint, "http://vnu:9999/");
    }

    #[test]
    fn load_rejects_wrong_types() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "html = \"sometimes\"").unwrap();

        assert!(CollectorOptions::load(Some(file.path())).is_err());
    }

    #[test]
    fn builder_helpers() {
        let options = CollectorOptions::default()
            .with_html(false)
            .with_delays(Duration::ZERO, Duration::from_millis(10));
        assert!(!options.html);
        assert_eq!(options.settle_delay(), Duration::ZERO);
        assert_eq!(options.url_settle_delay_ms, 10);
    }
}
