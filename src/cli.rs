//! Command-line interface definitions for teasy.
//!
//! All options can be given as flags; the ones that usually differ between
//! environments also read environment variables.

use crate::models::Category;
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for a scraping run.
///
/// # Examples
///
/// ```sh
/// # Latest teasers from every template in ./templates
/// teasy -t ./templates -c all
///
/// # Search two terms on one site, network only
/// teasy -t ./templates -c search -q "Τέμπη" -q "climate policy" --site dnews --demo
///
/// # Show what would be fetched
/// teasy -t ./templates -c all -c opinion --plan-only
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Template files or directories of `*.yaml` templates
    #[arg(short, long = "templates", required = true, num_args = 1..)]
    pub templates: Vec<PathBuf>,

    /// Categories to run for every selected site
    #[arg(short, long = "category", value_enum, default_values_t = [Category::All])]
    pub categories: Vec<Category>,

    /// Query terms for the `search` category
    #[arg(short, long = "query")]
    pub queries: Vec<String>,

    /// Restrict the run to these site ids
    #[arg(short, long = "site")]
    pub sites: Vec<String>,

    /// Directory for the records CSV, run log CSV and run reports
    #[arg(short, long, env = "TEASY_OUTPUT_DIR", default_value = "data/outputs")]
    pub output_dir: PathBuf,

    /// Start from the records already in the output directory
    #[arg(long)]
    pub resume: bool,

    /// Disable the headless-browser fallback (network only)
    #[arg(long, env = "TEASY_DEMO", action = clap::ArgAction::Set, value_parser = parse_flag, default_value = "false", num_args = 0..=1, default_missing_value = "true")]
    pub demo: bool,

    /// Per-request network timeout in seconds
    #[arg(long, default_value_t = 20)]
    pub network_timeout_secs: u64,

    /// How long the browser waits for the teaser list to appear, in seconds
    #[arg(long, default_value_t = 20)]
    pub browser_wait_secs: u64,

    /// Extra network attempts on 429/5xx and connection errors
    #[arg(long, default_value_t = 2)]
    pub retries: usize,

    /// Parallel network fetches (only used when the browser fallback is disabled)
    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,

    /// Chrome/Chromium executable for the browser fallback
    #[arg(long, env = "CHROME_BIN")]
    pub chrome_path: Option<PathBuf>,

    /// Show the browser window instead of running headless
    #[arg(long)]
    pub headful: bool,

    /// Print the resolved targets and exit without fetching
    #[arg(long)]
    pub plan_only: bool,
}

/// Accepts `1/0`, `true/false`, `yes/no`, `on/off` (as used by `TEASY_DEMO=1`).
fn parse_flag(s: &str) -> Result<bool, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(format!("expected a boolean, got `{other}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "teasy",
            "--templates",
            "./templates",
            "--category",
            "search",
            "--query",
            "climate policy",
        ]);

        assert_eq!(cli.templates, vec![PathBuf::from("./templates")]);
        assert_eq!(cli.categories, vec![Category::Search]);
        assert_eq!(cli.queries, vec!["climate policy".to_string()]);
        assert!(!cli.resume);
    }

    #[test]
    fn test_cli_short_flags_and_repeats() {
        let cli = Cli::parse_from([
            "teasy", "-t", "a.yaml", "b.yaml", "-c", "all", "-c", "opinion", "-s", "dnews", "-o",
            "/tmp/out",
        ]);

        assert_eq!(cli.templates.len(), 2);
        assert_eq!(cli.categories, vec![Category::All, Category::Opinion]);
        assert_eq!(cli.sites, vec!["dnews".to_string()]);
        assert_eq!(cli.output_dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_default_category_is_all() {
        let cli = Cli::parse_from(["teasy", "-t", "templates"]);
        assert_eq!(cli.categories, vec![Category::All]);
        assert!(!cli.demo);
    }

    #[test]
    fn test_demo_flag_values() {
        assert!(Cli::parse_from(["teasy", "-t", "x", "--demo"]).demo);
        assert!(!Cli::parse_from(["teasy", "-t", "x", "--demo=0"]).demo);
        assert!(parse_flag("1").unwrap());
        assert!(parse_flag("maybe").is_err());
    }
}
