//! Run orchestration: plan every site/category target, then fetch, extract
//! and merge them one at a time, appending one [`RunLogEntry`] per target.
//!
//! A run moves `Pending -> Running -> {Completed, Aborted}`. Per-target
//! failures are logged and skipped; only cancellation (checked between
//! targets) or a browser that cannot start aborts the run. The browser
//! session is released when the run ends either way.
//!
//! When the browser fallback is disabled and `concurrency > 1`, fetch and
//! extract run through a buffered stream that keeps declared order, so merges
//! and log appends still happen target by target.

use crate::dedup::ResultSet;
use crate::error::{ConfigError, TeasyError};
use crate::extractor::extract;
use crate::fetcher::{BrowserDriver, Fetcher, NetworkClient};
use crate::models::{
    Category, EntryStatus, FetchResult, RunLogEntry, RunState, RunSummary, Strategy, Target,
    TeaserRecord,
};
use crate::resolver::resolve;
use crate::template::Template;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Cooperative cancellation flag shared between the caller and a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One site's share of a run.
#[derive(Debug, Clone)]
pub struct SiteJob {
    pub template: Template,
    pub categories: Vec<Category>,
    pub query_terms: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub jobs: Vec<SiteJob>,
    /// Records from a previous run to extend.
    pub resume_from: Option<ResultSet>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AbortReason {
    Cancelled,
    Fault(String),
}

/// Everything a run hands back to its caller.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: RunSummary,
    pub abort_reason: Option<AbortReason>,
    pub log: Vec<RunLogEntry>,
    #[serde(skip)]
    pub results: ResultSet,
}

/// A planned unit of work: either a resolved target or the resolution error for a site/category.
#[derive(Debug, Clone)]
pub enum Planned<'a> {
    Target {
        target: Target,
        template: &'a Template,
    },
    Unresolved {
        site_id: String,
        category: Category,
        error: ConfigError,
    },
}

/// Resolve every job's categories into targets, in declared order.
pub fn plan(jobs: &[SiteJob]) -> Vec<Planned<'_>> {
    let mut planned = Vec::new();
    for job in jobs {
        for &category in &job.categories {
            match resolve(&job.template, category, &job.query_terms) {
                Ok(targets) => planned.extend(targets.into_iter().map(|target| Planned::Target {
                    target,
                    template: &job.template,
                })),
                Err(error) => planned.push(Planned::Unresolved {
                    site_id: job.template.site_id.clone(),
                    category,
                    error,
                }),
            }
        }
    }
    planned
}

/// What happened to one target before merging.
struct Outcome {
    strategy_used: Option<Strategy>,
    consent_dismissed: bool,
    records: Result<Vec<TeaserRecord>, TeasyError>,
}

impl Outcome {
    fn unresolved(error: ConfigError) -> Self {
        Self {
            strategy_used: None,
            consent_dismissed: false,
            records: Err(error.into()),
        }
    }

    fn from_fetch(fetched: Result<FetchResult, TeasyError>, target: &Target, template: &Template) -> Self {
        match fetched {
            Ok(result) => Self {
                strategy_used: Some(result.strategy_used),
                consent_dismissed: result.consent_dismissed,
                records: extract(template, &result, &target.site_id, target.category),
            },
            Err(err) => Self {
                strategy_used: match &err {
                    TeasyError::Fetch(e) => Some(e.strategy),
                    TeasyError::BrowserUnavailable(_) => Some(Strategy::Browser),
                    _ => None,
                },
                consent_dismissed: false,
                records: Err(err),
            },
        }
    }
}

fn entry_status(err: &TeasyError) -> EntryStatus {
    match err {
        TeasyError::Config(_) => EntryStatus::ConfigError,
        TeasyError::Fetch(e) => e.status.into(),
        TeasyError::ExtractionEmpty { .. } => EntryStatus::ExtractionEmpty,
        _ => EntryStatus::Blocked,
    }
}

/// Drives runs over a [`Fetcher`].
pub struct Runner<N, B> {
    fetcher: Fetcher<N, B>,
    concurrency: usize,
    cancel: CancelToken,
    state: RunState,
}

impl<N, B> Runner<N, B>
where
    N: NetworkClient,
    B: BrowserDriver,
{
    pub fn new(fetcher: Fetcher<N, B>, concurrency: usize, cancel: CancelToken) -> Self {
        Self {
            fetcher,
            concurrency: concurrency.max(1),
            cancel,
            state: RunState::Pending,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Execute `request` to completion or abort.
    #[instrument(level = "info", skip_all, fields(sites = request.jobs.len()))]
    pub async fn run(&mut self, request: RunRequest) -> RunReport {
        let started_at = Utc::now();
        self.state = RunState::Running;

        let mut results = request.resume_from.unwrap_or_default();
        let resumed = results.len();
        let planned = plan(&request.jobs);
        info!(targets = planned.len(), resumed, "Run started");

        let mut log = Vec::with_capacity(planned.len());
        let abort = if !self.fetcher.browser_enabled() && self.concurrency > 1 {
            self.run_buffered(planned, &mut results, &mut log).await
        } else {
            self.run_sequential(planned, &mut results, &mut log).await
        };

        self.fetcher.shutdown().await;

        self.state = if abort.is_some() {
            RunState::Aborted
        } else {
            RunState::Completed
        };
        let summary = RunSummary::from_log(&log);
        info!(
            state = ?self.state,
            total_targets = summary.total_targets,
            failed_targets = summary.failed_targets,
            total_added = summary.total_added,
            records = results.len(),
            "Run finished"
        );

        RunReport {
            state: self.state,
            started_at,
            finished_at: Utc::now(),
            summary,
            abort_reason: abort,
            log,
            results,
        }
    }

    async fn run_sequential(
        &mut self,
        planned: Vec<Planned<'_>>,
        results: &mut ResultSet,
        log: &mut Vec<RunLogEntry>,
    ) -> Option<AbortReason> {
        for item in planned {
            if self.cancel.is_cancelled() {
                warn!(done = log.len(), "Run cancelled");
                return Some(AbortReason::Cancelled);
            }
            let started_at = Utc::now();
            let t0 = Instant::now();
            let outcome = match &item {
                Planned::Target { target, template } => {
                    let fetched = self.fetcher.fetch(target, template).await;
                    Outcome::from_fetch(fetched, target, template)
                }
                Planned::Unresolved { error, .. } => Outcome::unresolved(error.clone()),
            };
            let fault = record(&item, outcome, started_at, t0, results, log);
            if let Some(reason) = fault {
                error!(reason = %reason, "Aborting run on unrecoverable fault");
                return Some(AbortReason::Fault(reason));
            }
        }
        None
    }

    async fn run_buffered(
        &mut self,
        planned: Vec<Planned<'_>>,
        results: &mut ResultSet,
        log: &mut Vec<RunLogEntry>,
    ) -> Option<AbortReason> {
        let fetcher = &self.fetcher;
        info!(concurrency = self.concurrency, "Fetching network-only targets concurrently");

        drain_buffered(
            planned,
            self.concurrency,
            &self.cancel,
            |item| async move {
                let outcome = match &item {
                    Planned::Target { target, template } => {
                        let fetched = fetcher.fetch_network_only(target, template).await;
                        Outcome::from_fetch(fetched, target, template)
                    }
                    Planned::Unresolved { error, .. } => Outcome::unresolved(error.clone()),
                };
                (item, outcome)
            },
            results,
            log,
        )
        .await
    }
}

/// Run `work` over `planned` with up to `concurrency` items in flight, recording in declared order.
///
/// A fault stops new work through a flag local to this call; `cancel` is only read.
async fn drain_buffered<'a, W, Fut>(
    planned: Vec<Planned<'a>>,
    concurrency: usize,
    cancel: &CancelToken,
    work: W,
    results: &mut ResultSet,
    log: &mut Vec<RunLogEntry>,
) -> Option<AbortReason>
where
    W: Fn(Planned<'a>) -> Fut,
    Fut: Future<Output = (Planned<'a>, Outcome)>,
{
    let halted = AtomicBool::new(false);
    let halted = &halted;
    let work = &work;

    let mut done = stream::iter(planned)
        .map(|item| async move {
            if cancel.is_cancelled() || halted.load(Ordering::SeqCst) {
                return None;
            }
            let started_at = Utc::now();
            let t0 = Instant::now();
            let (item, outcome) = work(item).await;
            Some((item, outcome, started_at, t0))
        })
        .buffered(concurrency);

    let mut abort = None;
    while let Some(finished) = done.next().await {
        let Some((item, outcome, started_at, t0)) = finished else {
            abort.get_or_insert(AbortReason::Cancelled);
            continue;
        };
        if abort.is_some() {
            continue;
        }
        if let Some(reason) = record(&item, outcome, started_at, t0, results, log) {
            error!(reason = %reason, "Aborting run on unrecoverable fault");
            abort = Some(AbortReason::Fault(reason));
            halted.store(true, Ordering::SeqCst);
        }
    }
    if abort == Some(AbortReason::Cancelled) {
        warn!(done = log.len(), "Run cancelled");
    }
    abort
}

/// Merge one target's records and append its log entry. Returns the fault message if the run must stop.
fn record(
    item: &Planned<'_>,
    outcome: Outcome,
    started_at: DateTime<Utc>,
    t0: Instant,
    results: &mut ResultSet,
    log: &mut Vec<RunLogEntry>,
) -> Option<String> {
    let (site_id, category, url, query_term, page) = match item {
        Planned::Target { target, .. } => (
            target.site_id.clone(),
            target.category,
            Some(target.resolved_url.clone()),
            target.query_term.clone(),
            Some(target.page),
        ),
        Planned::Unresolved {
            site_id, category, ..
        } => (site_id.clone(), *category, None, None, None),
    };

    let mut fault = None;
    let (status, records_found, added, error) = match outcome.records {
        Ok(records) => {
            let found = records.len();
            let added = results.merge(records);
            (EntryStatus::Ok, found, added, None)
        }
        Err(err) => {
            if !err.is_per_target() {
                fault = Some(err.to_string());
            }
            (entry_status(&err), 0, 0, Some(err.to_string()))
        }
    };

    let entry = RunLogEntry {
        started_at,
        site_id,
        category,
        url,
        query_term,
        page,
        strategy_used: outcome.strategy_used,
        consent_dismissed: outcome.consent_dismissed,
        status,
        records_found,
        record_count_added: added,
        duration_ms: t0.elapsed().as_millis() as u64,
        error,
    };
    match &entry.error {
        None => info!(
            site = %entry.site_id,
            category = %entry.category,
            found = entry.records_found,
            added = entry.record_count_added,
            "Target done"
        ),
        Some(e) => warn!(
            site = %entry.site_id,
            category = %entry.category,
            status = ?entry.status,
            error = %e,
            "Target failed"
        ),
    }
    log.push(entry);
    fault
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::tests::record as teaser;
    use crate::fetcher::tests::{FakeBrowser, FakeNetwork, LISTING};
    use crate::fetcher::{NetworkFailure, NetworkPage};
    use crate::template::tests::sample;
    use std::cell::Cell;
    use std::collections::BTreeMap;

    fn site(id: &str) -> Template {
        let mut t = sample();
        t.site_id = id.to_string();
        t.categories.all.as_mut().unwrap().urls = vec![format!("https://{id}.example.com/latest")];
        t
    }

    fn job(id: &str, category: Category) -> SiteJob {
        SiteJob {
            template: site(id),
            categories: vec![category],
            query_terms: vec![],
        }
    }

    fn network() -> FakeNetwork {
        FakeNetwork::default()
            .with("https://a.example.com/latest", 200, LISTING)
            .with("https://b.example.com/latest", 200, LISTING)
            .with("https://c.example.com/latest", 200, LISTING)
    }

    fn runner(
        network: FakeNetwork,
        browser: Option<FakeBrowser>,
        concurrency: usize,
    ) -> Runner<FakeNetwork, FakeBrowser> {
        Runner::new(
            Fetcher::new(network, browser),
            concurrency,
            CancelToken::new(),
        )
    }

    #[tokio::test]
    async fn test_config_error_target_does_not_stop_the_run() {
        let mut r = runner(network(), Some(FakeBrowser::default()), 1);
        assert_eq!(r.state(), RunState::Pending);

        let report = r
            .run(RunRequest {
                jobs: vec![
                    job("a", Category::All),
                    job("b", Category::Opinion),
                    job("c", Category::All),
                ],
                resume_from: None,
            })
            .await;

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(r.state(), RunState::Completed);
        assert_eq!(report.log.len(), 3);
        assert_eq!(report.log[1].status, EntryStatus::ConfigError);
        assert_eq!(report.log[1].record_count_added, 0);
        assert!(report.log[1].url.is_none());
        assert!(report.log[1].error.as_deref().unwrap().contains("opinion"));
        assert_eq!(report.summary.total_targets, 3);
        assert_eq!(report.summary.failed_targets, 1);
        assert_eq!(report.summary.total_added, 4);
        assert_eq!(report.log[0].record_count_added + report.log[2].record_count_added, 4);
        assert_eq!(report.results.len(), 4);
    }

    #[tokio::test]
    async fn test_resume_only_counts_new_records() {
        let prior = ResultSet::from_records(vec![teaser("https://a.example.com/one/", "Old")]);
        let mut r = runner(network(), None, 1);

        let report = r
            .run(RunRequest {
                jobs: vec![job("a", Category::All)],
                resume_from: Some(prior),
            })
            .await;

        assert_eq!(report.log[0].records_found, 2);
        assert_eq!(report.log[0].record_count_added, 1);
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results.records()[0].title, "Old");
    }

    #[tokio::test]
    async fn test_fetch_failure_is_logged_with_status() {
        let network = FakeNetwork::default().with("https://a.example.com/latest", 403, "denied");
        let mut r = runner(network, None, 1);

        let report = r
            .run(RunRequest {
                jobs: vec![job("a", Category::All)],
                resume_from: None,
            })
            .await;

        assert_eq!(report.state, RunState::Completed);
        let entry = &report.log[0];
        assert_eq!(entry.status, EntryStatus::Blocked);
        assert_eq!(entry.strategy_used, Some(Strategy::Network));
        assert!(entry.error.as_deref().unwrap().contains("HTTP 403"));
    }

    #[tokio::test]
    async fn test_empty_extraction_is_a_soft_failure() {
        let page = r#"<ul><li class="teaser"><h3>no link</h3></li></ul>"#;
        let network = FakeNetwork::default().with("https://a.example.com/latest", 200, page);
        let mut r = runner(network, None, 1);

        let report = r
            .run(RunRequest {
                jobs: vec![job("a", Category::All), job("c", Category::All)],
                resume_from: None,
            })
            .await;

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.log[0].status, EntryStatus::ExtractionEmpty);
        assert_eq!(report.log[1].status, EntryStatus::Blocked);
    }

    #[tokio::test]
    async fn test_search_job_expands_terms() {
        let network = FakeNetwork::default()
            .with("https://example.com/search?q=climate%20policy", 200, LISTING)
            .with("https://example.com/search?q=floods", 200, LISTING);
        let mut r = runner(network, None, 1);

        let report = r
            .run(RunRequest {
                jobs: vec![SiteJob {
                    template: sample(),
                    categories: vec![Category::Search],
                    query_terms: vec!["climate policy".into(), "floods".into()],
                }],
                resume_from: None,
            })
            .await;

        let terms: Vec<_> = report.log.iter().map(|e| e.query_term.clone().unwrap()).collect();
        assert_eq!(terms, vec!["climate policy", "floods"]);
        assert_eq!(report.summary.total_added, 2);
    }

    #[tokio::test]
    async fn test_cancel_before_start_aborts_without_targets() {
        let mut r = runner(network(), None, 1);
        r.cancel.cancel();

        let report = r
            .run(RunRequest {
                jobs: vec![job("a", Category::All)],
                resume_from: None,
            })
            .await;

        assert_eq!(report.state, RunState::Aborted);
        assert_eq!(report.abort_reason, Some(AbortReason::Cancelled));
        assert!(report.log.is_empty());
    }

    /// Trips the token during the first request; that target still completes.
    struct CancellingNetwork {
        inner: FakeNetwork,
        token: CancelToken,
    }

    impl NetworkClient for CancellingNetwork {
        async fn get(
            &self,
            url: &str,
            headers: &BTreeMap<String, String>,
        ) -> Result<NetworkPage, NetworkFailure> {
            self.token.cancel();
            self.inner.get(url, headers).await
        }
    }

    #[tokio::test]
    async fn test_cancel_is_honoured_at_target_boundary() {
        let token = CancelToken::new();
        let network = CancellingNetwork {
            inner: network(),
            token: token.clone(),
        };
        let mut r: Runner<CancellingNetwork, FakeBrowser> = Runner::new(
            Fetcher::new(network, None),
            1,
            token,
        );

        let report = r
            .run(RunRequest {
                jobs: vec![job("a", Category::All), job("b", Category::All)],
                resume_from: None,
            })
            .await;

        assert_eq!(report.state, RunState::Aborted);
        assert_eq!(report.log.len(), 1);
        assert_eq!(report.log[0].status, EntryStatus::Ok);
        assert_eq!(report.summary.total_added, 2);
    }

    #[tokio::test]
    async fn test_browser_launch_failure_aborts_and_releases_session() {
        let network = FakeNetwork::default().with("https://a.example.com/latest", 403, "");
        let browser = FakeBrowser {
            launch_error: Some("no chrome".into()),
            ..FakeBrowser::default()
        };
        let shutdowns = browser.shutdowns.clone();
        let mut r = runner(network, Some(browser), 1);

        let report = r
            .run(RunRequest {
                jobs: vec![job("a", Category::All), job("b", Category::All)],
                resume_from: None,
            })
            .await;

        assert_eq!(report.state, RunState::Aborted);
        assert!(matches!(report.abort_reason, Some(AbortReason::Fault(_))));
        assert_eq!(report.log.len(), 1);
        assert_eq!(shutdowns.get(), 1);
    }

    #[tokio::test]
    async fn test_buffered_run_keeps_declared_order() {
        let mut r = runner(network(), None, 3);

        let report = r
            .run(RunRequest {
                jobs: vec![
                    job("c", Category::All),
                    job("a", Category::Opinion),
                    job("b", Category::All),
                    job("a", Category::All),
                ],
                resume_from: None,
            })
            .await;

        let sites: Vec<_> = report.log.iter().map(|e| e.site_id.as_str()).collect();
        assert_eq!(sites, vec!["c", "a", "b", "a"]);
        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.summary.total_added, 6);
        assert_eq!(report.results.records()[0].url, "https://c.example.com/one");
    }

    #[tokio::test]
    async fn test_buffered_fault_leaves_callers_token_alone() {
        let jobs = vec![job("a", Category::All), job("b", Category::All), job("c", Category::All)];
        let token = CancelToken::new();
        let calls = Cell::new(0);
        let mut results = ResultSet::new();
        let mut log = Vec::new();

        let abort = drain_buffered(
            plan(&jobs),
            1,
            &token,
            |item| {
                calls.set(calls.get() + 1);
                let outcome = Outcome {
                    strategy_used: None,
                    consent_dismissed: false,
                    records: Err(TeasyError::BrowserUnavailable("gone".into())),
                };
                std::future::ready((item, outcome))
            },
            &mut results,
            &mut log,
        )
        .await;

        assert!(matches!(abort, Some(AbortReason::Fault(_))));
        assert!(!token.is_cancelled());
        assert_eq!(calls.get(), 1);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_plan_reports_unresolved_categories() {
        let jobs = vec![SiteJob {
            template: sample(),
            categories: vec![Category::All, Category::Search],
            query_terms: vec![],
        }];
        let planned = plan(&jobs);
        assert_eq!(planned.len(), 2);
        assert!(matches!(planned[0], Planned::Target { .. }));
        assert!(matches!(
            planned[1],
            Planned::Unresolved {
                error: ConfigError::EmptyQueryTerms { .. },
                ..
            }
        ));
    }
}
