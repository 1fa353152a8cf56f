//! Browser lifecycle and page discovery.
//!
//! `ChromeSession` launches Chrome, keeps the CDP handler running, and
//! announces every page target it sees, whether opened through
//! [`ChromeSession::new_page`] or by the page itself (`window.open`,
//! `target="_blank"` links).
//!
//! # Resource Safety
//!
//! Dropping the session kills the browser process through chromiumoxide's
//! own Drop. Explicit cleanup via `close()` is preferred for graceful
//! shutdown.

use super::page::{ChromePage, DEFAULT_IDLE_WINDOW};
use crate::error::{CollectorError, Result};
use crate::session::{BrowserSession, SessionPage};
use crate::wait::{retry_until, WaitConfig};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::target::{
    EventTargetCreated, EventTargetDestroyed, TargetId,
};
use chromiumoxide::page::Page as CdpPage;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, broadcast::error::RecvError, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Configuration for launching Chrome.
///
/// Provides defaults for headless runs in CI containers.
#[derive(Debug, Clone)]
pub struct ChromeConfig {
    /// Run in headless mode (default: true).
    pub headless: bool,

    /// Browser window size (default: 1920x1080).
    pub window_size: (u32, u32),

    /// Additional Chrome arguments.
    pub args: Vec<String>,

    /// Chrome executable path (None = auto-detect).
    pub chrome_path: Option<String>,

    /// Quiet period that counts as network idle (default: 500ms).
    pub idle_window: Duration,

    /// Timeout and polling for network idle and page discovery.
    pub wait: WaitConfig,
}

impl ChromeConfig {
    /// Creates a new config with defaults for headless runs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shows the browser window, for debugging.
    #[must_use]
    pub fn visible(mut self) -> Self {
        self.headless = false;
        self
    }

    /// Uses a specific Chrome executable.
    #[must_use]
    pub fn with_chrome_path(mut self, path: impl Into<String>) -> Self {
        self.chrome_path = Some(path.into());
        self
    }

    /// Adds additional Chrome arguments.
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args.extend(args);
        self
    }

    /// Converts to chromiumoxide `BrowserConfig`.
    fn to_browser_config(&self) -> Result<BrowserConfig> {
        let mut config = BrowserConfig::builder();

        if self.headless {
            config = config.arg("--headless");
        }

        config = config.arg(format!(
            "--window-size={},{}",
            self.window_size.0, self.window_size.1
        ));

        // One profile per session; Chrome's ProcessSingleton lock rejects sharing.
        let user_data_dir =
            std::env::temp_dir().join(format!("fob-page-lint-{}", uuid::Uuid::new_v4()));
        config = config.arg(format!("--user-data-dir={}", user_data_dir.display()));

        for arg in &self.args {
            config = config.arg(arg.clone());
        }

        if let Some(path) = &self.chrome_path {
            config = config.chrome_executable(path.clone());
        }

        config.build().map_err(|e| CollectorError::LaunchFailed {
            reason: format!("invalid browser configuration: {e}"),
            source: None,
        })
    }
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_size: (1920, 1080),
            args: vec![
                // Required when user namespaces are unavailable (containers).
                // Never point a sandbox-less browser at untrusted content.
                "--no-sandbox".to_string(),
                // Prevents /dev/shm exhaustion in containerized environments
                "--disable-dev-shm-usage".to_string(),
            ],
            chrome_path: None,
            idle_window: DEFAULT_IDLE_WINDOW,
            wait: WaitConfig::default(),
        }
    }
}

/// Pages known to a session, keyed by CDP target.
#[derive(Debug)]
struct PageRegistry {
    pages: Mutex<HashMap<TargetId, Arc<ChromePage>>>,
    created: broadcast::Sender<Arc<dyn SessionPage>>,
    idle_window: Duration,
    idle_wait: WaitConfig,
}

impl PageRegistry {
    /// Returns the page for `page`'s target, attaching and announcing it on
    /// first sight.
    async fn adopt(&self, page: CdpPage) -> Result<Arc<ChromePage>> {
        let mut pages = self.pages.lock().await;
        let target_id = page.target_id().clone();
        if let Some(existing) = pages.get(&target_id) {
            return Ok(existing.clone());
        }

        let page = Arc::new(ChromePage::attach(page, self.idle_window, self.idle_wait).await?);
        pages.insert(target_id, page.clone());
        debug!(pages = pages.len(), url = %page.url(), "page attached");

        if self.created.send(page.clone()).is_err() {
            // Nobody will take the events; stop buffering them.
            debug!(url = %page.url(), "no collector subscribed, discarding page events");
            drop(page.take_events());
        }
        Ok(page)
    }

    async fn forget(&self, target_id: &TargetId) {
        if self.pages.lock().await.remove(target_id).is_some() {
            debug!("page closed");
        }
    }
}

enum TargetEvent {
    Created(Arc<EventTargetCreated>),
    Destroyed(Arc<EventTargetDestroyed>),
}

/// A Chrome instance whose pages feed an issue collector.
///
/// Pages opened while no collector is subscribed to [`page_created`] never
/// have their events buffered; only their network activity is tracked. Wire
/// the collector up before opening pages.
///
/// [`page_created`]: BrowserSession::page_created
///
/// # Example
///
/// ```ignore
/// let session = Arc::new(ChromeSession::launch(ChromeConfig::default()).await?);
/// let (collector, session) = init_collector(session, CollectorOptions::default())?;
/// let page = session.new_page().await?;
/// page.goto("http://localhost:3456/").await?;
/// let report = collector.dump().await?;
/// session.close().await?;
/// ```
pub struct ChromeSession {
    browser: Arc<Mutex<Option<Browser>>>,
    registry: Arc<PageRegistry>,
    handler_task: JoinHandle<()>,
    watcher_task: JoinHandle<()>,
}

impl ChromeSession {
    /// Launches Chrome and starts watching for page targets.
    ///
    /// # Errors
    ///
    /// Returns `LaunchFailed` if Chrome is not installed, not executable,
    /// or fails to start.
    pub async fn launch(config: ChromeConfig) -> Result<Self> {
        debug!("Launching browser with config: {:?}", config);

        let browser_config = config.to_browser_config()?;

        let (browser, mut handler) =
            Browser::launch(browser_config)
                .await
                .map_err(|e| CollectorError::LaunchFailed {
                    reason: "failed to launch Chrome process".to_string(),
                    source: Some(Box::new(e)),
                })?;

        // chromiumoxide only processes CDP messages while the handler is polled.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("Browser handler error: {}", e);
                }
            }
        });

        let targets = stream::select(
            browser
                .event_listener::<EventTargetCreated>()
                .await?
                .map(TargetEvent::Created),
            browser
                .event_listener::<EventTargetDestroyed>()
                .await?
                .map(TargetEvent::Destroyed),
        );

        let (created, _) = broadcast::channel(64);
        let registry = Arc::new(PageRegistry {
            pages: Mutex::new(HashMap::new()),
            created,
            idle_window: config.idle_window,
            idle_wait: config.wait,
        });
        let browser = Arc::new(Mutex::new(Some(browser)));

        let watcher_task = tokio::spawn(watch_targets(
            targets.boxed(),
            browser.clone(),
            registry.clone(),
            config.wait,
        ));

        debug!("Browser launched successfully");

        Ok(Self {
            browser,
            registry,
            handler_task,
            watcher_task,
        })
    }

    /// Opens a blank tab.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` if the browser has been closed.
    pub async fn new_page(&self) -> Result<Arc<ChromePage>> {
        let page = {
            let browser = self.browser.lock().await;
            let browser = browser.as_ref().ok_or(CollectorError::AlreadyClosed)?;
            browser
                .new_page("about:blank")
                .await
                .map_err(|e| CollectorError::ConnectionFailed(e.to_string()))?
        };

        self.registry.adopt(page).await
    }

    /// Closes the browser and kills the Chrome process.
    ///
    /// # Errors
    ///
    /// Returns an error if the browser fails to close gracefully.
    pub async fn close(&self) -> Result<()> {
        self.watcher_task.abort();

        let mut browser_guard = self.browser.lock().await;
        if let Some(mut browser) = browser_guard.take() {
            debug!("Closing browser gracefully");
            browser
                .close()
                .await
                .map_err(|e| CollectorError::ConnectionFailed(e.to_string()))?;
        }

        Ok(())
    }

    /// Returns true if the browser has been closed.
    pub async fn is_closed(&self) -> bool {
        self.browser.lock().await.is_none()
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        // The watcher holds the other Browser handle; once it is gone,
        // chromiumoxide's Browser Drop kills the process.
        self.watcher_task.abort();
        self.handler_task.abort();

        if self.browser.try_lock().is_ok_and(|browser| browser.is_some()) {
            warn!("ChromeSession dropped without explicit close() - forcing shutdown via Drop");
        }
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn pages(&self) -> Result<Vec<Arc<dyn SessionPage>>> {
        Ok(self
            .registry
            .pages
            .lock()
            .await
            .values()
            .map(|page| page.clone() as Arc<dyn SessionPage>)
            .collect())
    }

    fn page_created(&self) -> BoxStream<'static, Arc<dyn SessionPage>> {
        let rx = self.registry.created.subscribe();
        stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(page) => return Some((page, rx)),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "page announcements dropped, subscriber too slow");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

/// Adopts page targets as they appear and forgets them when they go away.
async fn watch_targets(
    mut targets: BoxStream<'static, TargetEvent>,
    browser: Arc<Mutex<Option<Browser>>>,
    registry: Arc<PageRegistry>,
    wait: WaitConfig,
) {
    while let Some(event) = targets.next().await {
        match event {
            TargetEvent::Created(event) if event.target_info.r#type == "page" => {
                let target_id = event.target_info.target_id.clone();
                // The handler attaches to new targets asynchronously.
                let page = retry_until(
                    || {
                        let browser = browser.clone();
                        let target_id = target_id.clone();
                        async move {
                            let browser = browser.lock().await;
                            let Some(browser) = browser.as_ref() else {
                                return Err(CollectorError::AlreadyClosed);
                            };
                            Ok(browser.get_page(target_id).await.ok())
                        }
                    },
                    wait,
                    "page target attached",
                )
                .await;

                match page {
                    Ok(page) => {
                        if let Err(e) = registry.adopt(page).await {
                            warn!("failed to attach to new page: {}", e);
                        }
                    }
                    Err(e) => warn!("new page target never became available: {}", e),
                }
            }
            TargetEvent::Created(_) => {}
            TargetEvent::Destroyed(event) => registry.forget(&event.target_id).await,
        }
    }
}
