//! Resolved runtime settings handed from the CLI into the core.
//!
//! The browser-fallback toggle is read once when a run starts (`--demo` or
//! `TEASY_DEMO=1` disables it) and is never re-checked mid-run.

use crate::cli::Cli;
use std::path::PathBuf;
use std::time::Duration;

/// Network strategy bounds.
#[derive(Debug, Clone)]
pub struct NetworkOptions {
    /// Whole-request timeout for a single attempt.
    pub timeout: Duration,
    /// Extra attempts for 429/5xx and transport errors.
    pub retries: usize,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Random pause before each request, drawn from `min..=max`.
    pub politeness_min: Duration,
    pub politeness_max: Duration,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            retries: 2,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(8),
            politeness_min: Duration::from_millis(500),
            politeness_max: Duration::from_millis(1200),
        }
    }
}

/// Headless browser bounds.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
    pub navigation_timeout: Duration,
    /// How long to wait for the list selector to appear after navigation.
    pub selector_wait: Duration,
    /// How long to wait for a clicked consent overlay to go away.
    pub consent_settle: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            navigation_timeout: Duration::from_secs(30),
            selector_wait: Duration::from_secs(20),
            consent_settle: Duration::from_millis(1500),
        }
    }
}

impl BrowserOptions {
    /// Upper bound on one browser render, used to cap a hung target.
    pub fn render_budget(&self) -> Duration {
        self.navigation_timeout + self.selector_wait + self.consent_settle + Duration::from_secs(5)
    }
}

/// Orchestration settings.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Whether the browser fallback may be used at all.
    pub browser_enabled: bool,
    /// Parallel network-only targets; only applies when the browser is disabled.
    pub concurrency: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            browser_enabled: true,
            concurrency: 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub network: NetworkOptions,
    pub browser: BrowserOptions,
    pub run: RunOptions,
}

impl From<&Cli> for Settings {
    fn from(cli: &Cli) -> Self {
        Settings {
            network: NetworkOptions {
                timeout: Duration::from_secs(cli.network_timeout_secs),
                retries: cli.retries,
                ..NetworkOptions::default()
            },
            browser: BrowserOptions {
                chrome_path: cli.chrome_path.clone(),
                headless: !cli.headful,
                selector_wait: Duration::from_secs(cli.browser_wait_secs),
                ..BrowserOptions::default()
            },
            run: RunOptions {
                browser_enabled: !cli.demo,
                concurrency: cli.concurrency.max(1),
            },
        }
    }
}
