//! Browser strategy on top of `chromiumoxide`.
//!
//! One Chromium process is launched lazily on the first render and reused for
//! every later target; each target gets its own tab, closed afterwards.
//! Per tab: navigate, click through any consent overlay, wait for the list
//! selector, then read back the serialized DOM. All of that runs under the
//! render budget, and the tab is closed whether or not it finished in time.

use super::{BrowserDriver, BrowserError, RenderRequest, RenderedPage};
use crate::config::BrowserOptions;
use crate::template::is_xpath;
use crate::utils::user_agent;
use chromiumoxide::element::Element;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// What trying a single consent selector came to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClickOutcome {
    Missing,
    NotInteractable,
    Clicked,
}

/// Try consent `selectors` in declared order and stop at the first click that lands.
///
/// Returns the selector that was clicked, if any.
pub(crate) async fn click_first<'s, F, Fut>(selectors: &'s [String], mut try_click: F) -> Option<&'s str>
where
    F: FnMut(&'s str) -> Fut,
    Fut: Future<Output = ClickOutcome>,
{
    for selector in selectors {
        match try_click(selector).await {
            ClickOutcome::Clicked => {
                debug!(%selector, "Clicked consent control");
                return Some(selector);
            }
            ClickOutcome::NotInteractable => {
                debug!(%selector, "Consent control not interactable");
            }
            ClickOutcome::Missing => {}
        }
    }
    None
}

/// Run `render` under `budget`, then `close`, whatever the render came to.
async fn within_budget<T>(
    budget: Duration,
    render: impl Future<Output = Result<T, BrowserError>>,
    close: impl Future<Output = ()>,
) -> Result<T, BrowserError> {
    let result = match timeout(budget, render).await {
        Ok(result) => result,
        Err(_) => Err(BrowserError::BudgetExceeded(budget)),
    };
    close.await;
    result
}

struct Session {
    browser: Browser,
    handler: JoinHandle<()>,
}

/// Headless Chromium [`BrowserDriver`].
pub struct ChromiumDriver {
    options: BrowserOptions,
    session: Option<Session>,
}

impl ChromiumDriver {
    pub fn new(options: BrowserOptions) -> Self {
        Self {
            options,
            session: None,
        }
    }

    fn launch_config(&self) -> Result<BrowserConfig, String> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .request_timeout(self.options.navigation_timeout)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--lang=el-GR")
            .window_size(1366, 900);
        if !self.options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.options.chrome_path {
            builder = builder.chrome_executable(path);
        }
        builder.build()
    }

    async fn browser(&mut self) -> Result<&Browser, BrowserError> {
        if self.session.is_none() {
            let config = self.launch_config().map_err(BrowserError::Launch)?;
            let (browser, mut handler) = Browser::launch(config)
                .await
                .map_err(|e| BrowserError::Launch(e.to_string()))?;
            let handler = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });
            info!(headless = self.options.headless, "Browser session started");
            self.session = Some(Session { browser, handler });
        }
        match &self.session {
            Some(session) => Ok(&session.browser),
            None => Err(BrowserError::Launch("browser session missing".into())),
        }
    }

    async fn render_in(&self, page: &Page, request: &RenderRequest<'_>) -> Result<RenderedPage, BrowserError> {
        if let Err(e) = page.set_user_agent(user_agent()).await {
            debug!(error = %e, "Could not override user agent");
        }

        timeout(self.options.navigation_timeout, page.goto(request.url))
            .await
            .map_err(|_| {
                BrowserError::Navigation(format!(
                    "page load exceeded {:?}",
                    self.options.navigation_timeout
                ))
            })?
            .map_err(|e| BrowserError::Navigation(e.to_string()))?;

        let consent_dismissed = self.dismiss_consent(page, request.consent_selectors).await;
        self.wait_for(page, request.ready_selector).await?;

        let html = page
            .content()
            .await
            .map_err(|e| BrowserError::Navigation(format!("reading DOM failed: {e}")))?;
        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| request.url.to_string());

        Ok(RenderedPage {
            final_url,
            html,
            consent_dismissed,
        })
    }

    /// Click the first consent control, in declared order, that is present and interactable.
    ///
    /// Returns whether a click landed. Finding no control is not an error.
    async fn dismiss_consent(&self, page: &Page, selectors: &[String]) -> bool {
        let clicked = click_first(selectors, |selector| async move {
            let Some(element) = find(page, selector).await else {
                return ClickOutcome::Missing;
            };
            match element.click().await {
                Ok(_) => ClickOutcome::Clicked,
                Err(e) => {
                    debug!(%selector, error = %e, "Click failed");
                    ClickOutcome::NotInteractable
                }
            }
        })
        .await;

        match clicked {
            Some(selector) => {
                self.settle(page, selector).await;
                true
            }
            None => false,
        }
    }

    /// Wait for a clicked overlay to detach or collapse, up to the settle bound.
    async fn settle(&self, page: &Page, selector: &str) {
        let deadline = Instant::now() + self.options.consent_settle;
        while Instant::now() < deadline {
            match find(page, selector).await {
                None => return,
                Some(el) => match el.bounding_box().await {
                    Ok(bbox) if bbox.width == 0.0 || bbox.height == 0.0 => return,
                    Err(_) => return,
                    Ok(_) => {}
                },
            }
            sleep(POLL_INTERVAL).await;
        }
        debug!(%selector, "Consent overlay still present after settle wait");
    }

    async fn wait_for(&self, page: &Page, selector: &str) -> Result<(), BrowserError> {
        let deadline = Instant::now() + self.options.selector_wait;
        loop {
            if page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::SelectorTimeout(self.options.selector_wait));
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

async fn find(page: &Page, selector: &str) -> Option<Element> {
    let found = if is_xpath(selector) {
        page.find_xpath(selector).await
    } else {
        page.find_element(selector).await
    };
    found.ok()
}

impl BrowserDriver for ChromiumDriver {
    #[instrument(level = "info", skip_all, fields(url = %request.url))]
    async fn render(&mut self, request: &RenderRequest<'_>) -> Result<RenderedPage, BrowserError> {
        let page = self
            .browser()
            .await?
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Navigation(format!("opening tab failed: {e}")))?;

        let budget = self.options.render_budget();
        let tab = page.clone();
        let close = async move {
            if let Err(e) = tab.close().await {
                debug!(error = %e, "Closing tab failed");
            }
        };
        let result = within_budget(budget, self.render_in(&page, request), close).await;
        if let Err(BrowserError::BudgetExceeded(_)) = &result {
            warn!(?budget, "Render abandoned after exceeding its budget");
        }
        result
    }

    async fn shutdown(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if let Err(e) = session.browser.close().await {
            warn!(error = %e, "Browser did not close cleanly");
        }
        if let Err(e) = session.browser.wait().await {
            warn!(error = %e, "Waiting for browser exit failed");
        }
        session.handler.abort();
        info!("Browser session closed");
    }
}
