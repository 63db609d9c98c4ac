//! `teasy` command-line entry point.
//!
//! Loads templates, runs every selected site/category, then writes
//! `teasers.csv`, appends `run_log.csv` and drops a JSON run report into the
//! output directory.
//!
//! ```sh
//! teasy -t ./templates -c all -c search -q "Τέμπη" --resume
//! ```

use clap::Parser;
use std::error::Error;
use std::time::Instant;
use teasy::cli::Cli;
use teasy::config::Settings;
use teasy::fetcher::browser::ChromiumDriver;
use teasy::fetcher::http::HttpClient;
use teasy::fetcher::Fetcher;
use teasy::models::RunState;
use teasy::outputs::{self, tabular};
use teasy::runner::{AbortReason, CancelToken, Planned, RunRequest, Runner, SiteJob, plan};
use teasy::template::load_templates;
use teasy::utils::ensure_writable_dir;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = Instant::now();
    info!("teasy starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");
    let settings = Settings::from(&args);
    info!(
        browser_enabled = settings.run.browser_enabled,
        concurrency = settings.run.concurrency,
        "Settings resolved"
    );

    // ---- Templates ----
    let mut templates = load_templates(&args.templates).await?;
    if !args.sites.is_empty() {
        for site in &args.sites {
            if !templates.iter().any(|t| &t.site_id == site) {
                warn!(site = %site, "No template for requested site");
            }
        }
        templates.retain(|t| args.sites.contains(&t.site_id));
    }
    if templates.is_empty() {
        error!("No templates selected; nothing to do");
        return Err("no templates selected".into());
    }

    let jobs: Vec<SiteJob> = templates
        .into_iter()
        .map(|template| SiteJob {
            template,
            categories: args.categories.clone(),
            query_terms: args.queries.clone(),
        })
        .collect();

    if args.plan_only {
        for item in plan(&jobs) {
            match item {
                Planned::Target { target, .. } => println!(
                    "{}\t{}\t{}\t{}",
                    target.site_id,
                    target.category,
                    target.query_term.as_deref().unwrap_or("-"),
                    target.resolved_url
                ),
                Planned::Unresolved {
                    site_id,
                    category,
                    error,
                } => println!("{site_id}\t{category}\t-\tERROR: {error}"),
            }
        }
        return Ok(());
    }

    // Early check: ensure output dir is writable
    if let Err(e) = ensure_writable_dir(&args.output_dir).await {
        error!(
            path = %args.output_dir.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e.into());
    }

    let resume_from = if args.resume {
        Some(tabular::read_records(&outputs::records_path(&args.output_dir)).await?)
    } else {
        None
    };

    // ---- Cancellation on Ctrl-C ----
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; stopping after the current target");
                cancel.cancel();
            }
        });
    }

    // ---- Run ----
    let network = HttpClient::new(settings.network.clone())?;
    let browser = settings
        .run
        .browser_enabled
        .then(|| ChromiumDriver::new(settings.browser.clone()));
    let fetcher = Fetcher::new(network, browser);
    let mut runner = Runner::new(fetcher, settings.run.concurrency, cancel);

    let report = runner.run(RunRequest { jobs, resume_from }).await;

    if let Err(e) = outputs::persist(&report, &args.output_dir).await {
        error!(error = %e, "Failed to write outputs");
        return Err(e.into());
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        state = ?report.state,
        total_targets = report.summary.total_targets,
        failed_targets = report.summary.failed_targets,
        total_added = report.summary.total_added,
        records = report.results.len(),
        "Execution complete"
    );

    match (report.state, report.abort_reason) {
        (RunState::Aborted, Some(AbortReason::Fault(reason))) => Err(reason.into()),
        _ => Ok(()),
    }
}
