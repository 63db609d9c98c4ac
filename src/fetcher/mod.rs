//! Turning a [`Target`] into a rendered document.
//!
//! Two strategies are tried in a fixed order:
//!
//! 1. **Network**: a plain HTTP GET with browser-like headers ([`http::HttpClient`]).
//! 2. **Browser**: a headless Chromium render with consent-click handling
//!    ([`browser::ChromiumDriver`]), used when the network attempt ends in one
//!    of the statuses listed in [`ESCALATE_ON`] and the fallback is enabled.
//!
//! The policy lives in [`transition`]; [`Fetcher::fetch`] just walks it.
//!
//! | from      | status                      | browser allowed | next              |
//! |-----------|-----------------------------|-----------------|-------------------|
//! | network   | `http_error`/`timeout`/`empty` | yes          | browser           |
//! | network   | `http_error`/`timeout`/`empty` | no           | fail `blocked`    |
//! | network   | anything else               | -               | fail with status  |
//! | browser   | any failure                 | -               | fail `blocked`    |

pub mod browser;
pub mod http;

use crate::error::{FetchError, TeasyError};
use crate::models::{Document, FetchResult, FetchStatus, Strategy, Target};
use crate::template::Template;
use chrono::Utc;
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Statuses after which a network attempt escalates to the browser.
pub const ESCALATE_ON: &[FetchStatus] = &[
    FetchStatus::HttpError,
    FetchStatus::Timeout,
    FetchStatus::Empty,
];

/// Raw response from the network strategy, before classification.
#[derive(Debug, Clone)]
pub struct NetworkPage {
    pub final_url: String,
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkFailure {
    Timeout(String),
    Transport(String),
}

/// The network strategy: one GET per call, no state carried between calls.
pub trait NetworkClient {
    async fn get(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<NetworkPage, NetworkFailure>;
}

/// What the browser strategy needs for one target.
#[derive(Debug, Clone)]
pub struct RenderRequest<'a> {
    pub url: &'a str,
    pub ready_selector: &'a str,
    pub consent_selectors: &'a [String],
}

#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub final_url: String,
    pub html: String,
    pub consent_dismissed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserError {
    /// The browser process could not be started. Unrecoverable for the run.
    Launch(String),
    Navigation(String),
    /// The list selector never appeared within the wait bound.
    SelectorTimeout(Duration),
    /// The whole render, consent handling included, ran past its budget.
    BudgetExceeded(Duration),
}

/// The browser strategy. One session is reused across targets until [`BrowserDriver::shutdown`].
///
/// Implementations bound each render themselves and release whatever they
/// opened for it (a tab, say) before returning, on every path.
pub trait BrowserDriver {
    async fn render(&mut self, request: &RenderRequest<'_>) -> Result<RenderedPage, BrowserError>;

    /// Release the browser session. Safe to call more than once.
    async fn shutdown(&mut self);
}

/// Next step after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Escalate(Strategy),
    Fail(FetchStatus),
}

/// The escalation policy as a single function of (strategy, status, permission).
pub fn transition(from: Strategy, status: FetchStatus, browser_allowed: bool) -> Transition {
    let escalates = ESCALATE_ON.contains(&status);
    match (from, escalates, browser_allowed) {
        (Strategy::Network, true, true) => Transition::Escalate(Strategy::Browser),
        (Strategy::Network, true, false) => Transition::Fail(FetchStatus::Blocked),
        (Strategy::Network, false, _) => Transition::Fail(status),
        (Strategy::Browser, _, _) => Transition::Fail(FetchStatus::Blocked),
    }
}

/// Whether `selector` matches anything in `html`.
pub(crate) fn has_match(html: &str, selector: &Selector) -> bool {
    Html::parse_document(html).select(selector).next().is_some()
}

/// Classify a network response per the rules of the network strategy.
fn classify(page: NetworkPage, ready: &Selector) -> Result<Document, FetchError> {
    if !(200..300).contains(&page.status) {
        return Err(FetchError::new(
            FetchStatus::HttpError,
            Strategy::Network,
            format!("HTTP {}", page.status),
        ));
    }
    if page.body.trim().is_empty() {
        return Err(FetchError::new(
            FetchStatus::Empty,
            Strategy::Network,
            "empty response body",
        ));
    }
    if !has_match(&page.body, ready) {
        return Err(FetchError::new(
            FetchStatus::Empty,
            Strategy::Network,
            "list selector not found in response",
        ));
    }
    Ok(Document {
        final_url: page.final_url,
        html: page.body,
    })
}

/// Runs the network-first / browser-fallback state machine for one target at a time.
///
/// `browser` is `None` when the fallback is disabled for the run.
pub struct Fetcher<N, B> {
    network: N,
    browser: Option<B>,
}

impl<N, B> Fetcher<N, B>
where
    N: NetworkClient,
    B: BrowserDriver,
{
    pub fn new(network: N, browser: Option<B>) -> Self {
        Self { network, browser }
    }

    pub fn browser_enabled(&self) -> bool {
        self.browser.is_some()
    }

    fn initial_strategy(&self, template: &Template) -> Strategy {
        if template.js_required && self.browser_enabled() {
            Strategy::Browser
        } else {
            Strategy::Network
        }
    }

    /// Fetch `target`, escalating to the browser where the policy allows.
    ///
    /// Per-target failures come back as [`TeasyError::Fetch`] (or
    /// [`TeasyError::Config`] for a bad list selector); a browser that cannot
    /// start comes back as [`TeasyError::BrowserUnavailable`].
    #[instrument(level = "info", skip_all, fields(site = %target.site_id, url = %target.resolved_url))]
    pub async fn fetch(
        &mut self,
        target: &Target,
        template: &Template,
    ) -> Result<FetchResult, TeasyError> {
        let ready = crate::template::parse_css(&template.site_id, "item_selector", template.ready_selector())?;
        let mut strategy = self.initial_strategy(template);

        loop {
            let attempt = match strategy {
                Strategy::Network => self.try_network(target, template, &ready).await,
                Strategy::Browser => match self.try_browser(target, template).await {
                    Err(BrowserAttempt::Fault(e)) => return Err(e),
                    Err(BrowserAttempt::Failed(e)) => Err(e),
                    Ok(result) => Ok(result),
                },
            };

            let err = match attempt {
                Ok(result) => {
                    info!(strategy = %result.strategy_used, consent = result.consent_dismissed, "Fetched target");
                    return Ok(result);
                }
                Err(err) => err,
            };

            match transition(strategy, err.status, self.browser_enabled()) {
                Transition::Escalate(next) => {
                    warn!(status = %err.status, detail = %err.detail, next = %next, "Escalating fetch strategy");
                    strategy = next;
                }
                Transition::Fail(status) => {
                    warn!(status = %status, detail = %err.detail, "Fetch failed");
                    return Err(fail(status, err).into());
                }
            }
        }
    }

    /// Network strategy only, with the disabled-browser outcome applied.
    ///
    /// Takes `&self`, so several network-only targets can be in flight at once.
    #[instrument(level = "info", skip_all, fields(site = %target.site_id, url = %target.resolved_url))]
    pub async fn fetch_network_only(
        &self,
        target: &Target,
        template: &Template,
    ) -> Result<FetchResult, TeasyError> {
        let ready = crate::template::parse_css(&template.site_id, "item_selector", template.ready_selector())?;
        match self.try_network(target, template, &ready).await {
            Ok(result) => Ok(result),
            Err(err) => match transition(Strategy::Network, err.status, false) {
                Transition::Fail(status) => {
                    warn!(status = %status, detail = %err.detail, "Fetch failed");
                    Err(fail(status, err).into())
                }
                Transition::Escalate(_) => Err(err.into()),
            },
        }
    }

    async fn try_network(
        &self,
        target: &Target,
        template: &Template,
        ready: &Selector,
    ) -> Result<FetchResult, FetchError> {
        let page = self
            .network
            .get(&target.resolved_url, &template.headers)
            .await
            .map_err(|failure| match failure {
                NetworkFailure::Timeout(detail) => {
                    FetchError::new(FetchStatus::Timeout, Strategy::Network, detail)
                }
                NetworkFailure::Transport(detail) => {
                    FetchError::new(FetchStatus::HttpError, Strategy::Network, detail)
                }
            })?;
        debug!(status = page.status, bytes = page.body.len(), "Network response");

        let document = classify(page, ready)?;
        Ok(FetchResult {
            document,
            strategy_used: Strategy::Network,
            consent_dismissed: false,
            status: FetchStatus::Ok,
            fetched_at: Utc::now(),
        })
    }

    async fn try_browser(
        &mut self,
        target: &Target,
        template: &Template,
    ) -> Result<FetchResult, BrowserAttempt> {
        let Some(browser) = self.browser.as_mut() else {
            return Err(BrowserAttempt::Failed(FetchError::new(
                FetchStatus::Blocked,
                Strategy::Browser,
                "browser fallback disabled",
            )));
        };

        let request = RenderRequest {
            url: &target.resolved_url,
            ready_selector: template.ready_selector(),
            consent_selectors: &template.consent_selectors,
        };
        let rendered = match browser.render(&request).await {
            Ok(page) => page,
            Err(BrowserError::Launch(reason)) => {
                return Err(BrowserAttempt::Fault(TeasyError::BrowserUnavailable(reason)));
            }
            Err(BrowserError::Navigation(reason)) => {
                return Err(BrowserAttempt::Failed(FetchError::new(
                    FetchStatus::Blocked,
                    Strategy::Browser,
                    format!("navigation failed: {reason}"),
                )));
            }
            Err(BrowserError::SelectorTimeout(waited)) => {
                return Err(BrowserAttempt::Failed(FetchError::new(
                    FetchStatus::Blocked,
                    Strategy::Browser,
                    format!("list selector did not appear within {waited:?}"),
                )));
            }
            Err(BrowserError::BudgetExceeded(budget)) => {
                return Err(BrowserAttempt::Failed(FetchError::new(
                    FetchStatus::Blocked,
                    Strategy::Browser,
                    format!("render exceeded {budget:?}"),
                )));
            }
        };

        Ok(FetchResult {
            document: Document {
                final_url: rendered.final_url,
                html: rendered.html,
            },
            strategy_used: Strategy::Browser,
            consent_dismissed: rendered.consent_dismissed,
            status: FetchStatus::Ok,
            fetched_at: Utc::now(),
        })
    }

    /// Release the browser session, if one was started.
    pub async fn shutdown(&mut self) {
        if let Some(browser) = self.browser.as_mut() {
            browser.shutdown().await;
        }
    }
}

enum BrowserAttempt {
    Failed(FetchError),
    Fault(TeasyError),
}

fn fail(status: FetchStatus, cause: FetchError) -> FetchError {
    if status == cause.status {
        return cause;
    }
    FetchError::new(
        status,
        cause.strategy,
        format!("{} ({})", cause.detail, cause.status),
    )
}
