//! Chrome pages as collector pages.
//!
//! A `ChromePage` subscribes to the CDP events the collector needs as soon
//! as it is attached, before any navigation, and buffers the translated
//! events until the adapter takes the stream.

use super::events::{parse_console_event, parse_exception, NetworkTracker};
use crate::error::{CollectorError, Result};
use crate::session::{PageEvent, SessionPage};
use crate::wait::{retry_until, wait_for, WaitConfig};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
};
use chromiumoxide::cdp::browser_protocol::page::EventFrameNavigated;
use chromiumoxide::cdp::js_protocol::runtime::{EventConsoleApiCalled, EventExceptionThrown};
use chromiumoxide::page::Page as CdpPage;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long a page must go without network traffic to count as idle.
///
/// Same window Playwright uses for its `networkidle` load state.
pub const DEFAULT_IDLE_WINDOW: Duration = Duration::from_millis(500);

/// The CDP events a page listens to, merged into one stream.
enum CdpEvent {
    Console(Arc<EventConsoleApiCalled>),
    Exception(Arc<EventExceptionThrown>),
    RequestWillBeSent(Arc<EventRequestWillBeSent>),
    ResponseReceived(Arc<EventResponseReceived>),
    LoadingFinished(Arc<EventLoadingFinished>),
    LoadingFailed(Arc<EventLoadingFailed>),
    FrameNavigated(Arc<EventFrameNavigated>),
}

#[derive(Debug)]
struct PageState {
    url: RwLock<String>,
    network: Mutex<NetworkTracker>,
}

/// A Chrome tab or popup observed by the collector.
#[derive(Debug)]
pub struct ChromePage {
    inner: CdpPage,
    state: Arc<PageState>,
    events: Mutex<Option<mpsc::UnboundedReceiver<PageEvent>>>,
    idle_window: Duration,
    idle_wait: WaitConfig,
    listener: JoinHandle<()>,
}

impl ChromePage {
    /// Subscribes to `page`'s events and starts translating them.
    ///
    /// This is called by `ChromeSession`; users don't construct pages
    /// directly.
    pub(crate) async fn attach(
        page: CdpPage,
        idle_window: Duration,
        idle_wait: WaitConfig,
    ) -> Result<Self> {
        let cdp = stream::select_all([
            page.event_listener::<EventConsoleApiCalled>()
                .await?
                .map(CdpEvent::Console)
                .boxed(),
            page.event_listener::<EventExceptionThrown>()
                .await?
                .map(CdpEvent::Exception)
                .boxed(),
            page.event_listener::<EventRequestWillBeSent>()
                .await?
                .map(CdpEvent::RequestWillBeSent)
                .boxed(),
            page.event_listener::<EventResponseReceived>()
                .await?
                .map(CdpEvent::ResponseReceived)
                .boxed(),
            page.event_listener::<EventLoadingFinished>()
                .await?
                .map(CdpEvent::LoadingFinished)
                .boxed(),
            page.event_listener::<EventLoadingFailed>()
                .await?
                .map(CdpEvent::LoadingFailed)
                .boxed(),
            page.event_listener::<EventFrameNavigated>()
                .await?
                .map(CdpEvent::FrameNavigated)
                .boxed(),
        ]);

        let url = page.url().await?.unwrap_or_else(|| "about:blank".to_string());
        let state = Arc::new(PageState {
            url: RwLock::new(url),
            network: Mutex::new(NetworkTracker::new()),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let listener = tokio::spawn(translate(cdp, state.clone(), tx));

        Ok(Self {
            inner: page,
            state,
            events: Mutex::new(Some(rx)),
            idle_window,
            idle_wait,
            listener,
        })
    }

    /// Navigates to an absolute URL and waits for the document to be ready.
    ///
    /// # Errors
    ///
    /// Returns `NavigationFailed` if the page fails to load, or `WaitTimeout`
    /// if it never becomes ready.
    pub async fn goto(&self, url: &str) -> Result<()> {
        self.inner
            .goto(url)
            .await
            .map_err(|e| CollectorError::NavigationFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        self.wait_for_load(WaitConfig::default()).await
    }

    /// Waits for `document.readyState` to be `"complete"`.
    ///
    /// # Errors
    ///
    /// Returns `WaitTimeout` if the document never completes.
    pub async fn wait_for_load(&self, config: WaitConfig) -> Result<()> {
        retry_until(
            || async {
                let state: String = self.evaluate("document.readyState").await?;
                Ok((state == "complete").then_some(()))
            },
            config,
            "document ready",
        )
        .await
    }

    /// Executes JavaScript in the page context and returns the result.
    ///
    /// Do not pass unsanitized input; this runs in the page's main world.
    ///
    /// # Errors
    ///
    /// Returns an error if script execution fails or the result cannot be deserialized.
    pub async fn evaluate<T>(&self, script: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let result = self
            .inner
            .evaluate(script)
            .await
            .map_err(|e| CollectorError::ScriptExecutionFailed(e.to_string()))?;

        result
            .into_value()
            .map_err(|e| CollectorError::ScriptExecutionFailed(e.to_string()))
    }

    /// Closes the tab. Events already delivered stay collected.
    ///
    /// # Errors
    ///
    /// Returns an error if closing the page fails.
    pub async fn close(&self) -> Result<()> {
        self.inner.clone().close().await?;
        Ok(())
    }
}

impl Drop for ChromePage {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[async_trait]
impl SessionPage for ChromePage {
    fn url(&self) -> String {
        self.state
            .url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_events(&self) -> Option<BoxStream<'static, PageEvent>> {
        let rx = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;

        Some(
            stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            })
            .boxed(),
        )
    }

    async fn wait_for_network_idle(&self) -> Result<()> {
        let state = self.state.clone();
        let window = self.idle_window;
        wait_for(
            move || network(&state).is_idle(window),
            self.idle_wait,
            &format!("network idle on {}", self.url()),
        )
        .await
    }
}

/// Drives one page's CDP events until the page goes away.
///
/// Network tracking continues after the event receiver is gone, so an
/// uncollected page still answers idle waits.
async fn translate(
    mut cdp: stream::SelectAll<BoxStream<'static, CdpEvent>>,
    state: Arc<PageState>,
    tx: mpsc::UnboundedSender<PageEvent>,
) {
    let mut tx = Some(tx);
    while let Some(event) = cdp.next().await {
        let Some(event) = apply(&state, event) else {
            continue;
        };
        if tx.as_ref().is_some_and(|sender| sender.send(event).is_err()) {
            debug!("page events unclaimed, no longer forwarding");
            tx = None;
        }
    }
    debug!("CDP event stream ended");
}

fn network(state: &PageState) -> MutexGuard<'_, NetworkTracker> {
    state.network.lock().unwrap_or_else(PoisonError::into_inner)
}

fn apply(state: &PageState, event: CdpEvent) -> Option<PageEvent> {
    match event {
        CdpEvent::Console(event) => Some(PageEvent::Console(parse_console_event(&event))),
        CdpEvent::Exception(event) => Some(PageEvent::PageError(parse_exception(&event))),
        CdpEvent::RequestWillBeSent(event) => {
            network(state).request_started(event.request_id.inner(), &event.request.url);
            None
        }
        CdpEvent::ResponseReceived(event) => {
            network(state).response_received(
                event.request_id.inner(),
                event.response.status,
                &event.response.status_text,
            );
            None
        }
        CdpEvent::LoadingFinished(event) => {
            let finished = network(state).finished(event.request_id.inner());
            if finished.is_none() {
                debug!(request_id = %event.request_id.inner(), "finished request was never started");
            }
            finished.map(|request| PageEvent::RequestFinished(Arc::new(request)))
        }
        CdpEvent::LoadingFailed(event) => {
            let failed = network(state).failed(event.request_id.inner(), &event.error_text);
            if failed.is_none() {
                warn!(request_id = %event.request_id.inner(), "failed request was never started");
            }
            failed.map(PageEvent::RequestFailed)
        }
        CdpEvent::FrameNavigated(event) => {
            if event.frame.parent_id.is_none() {
                *state.url.write().unwrap_or_else(PoisonError::into_inner) =
                    event.frame.url.clone();
            }
            None
        }
    }
}
