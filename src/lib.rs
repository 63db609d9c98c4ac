//! # teasy
//!
//! Collects news "teasers" (title, link, date, section, summary) from
//! listing pages, driven by per-site YAML selector templates.
//!
//! ## Features
//!
//! - `all`, `opinion` and `search` categories per site, with query-term
//!   mapping (raw, greeklish, slug or an explicit term map) and pagination
//! - Network-first fetching with a headless Chromium fallback and
//!   cookie-consent dismissal
//! - Template-driven field extraction with relative-URL resolution and
//!   best-effort date parsing (Greek and English)
//! - URL-keyed deduplication across targets and across runs
//! - A structured per-target run log and run summary
//!
//! ## Architecture
//!
//! A run follows this pipeline for every site/category target, in order:
//! 1. **Resolve** ([`resolver`]): template + category + terms into [`models::Target`]s
//! 2. **Fetch** ([`fetcher`]): network GET, escalating to the browser where allowed
//! 3. **Extract** ([`extractor`]): selectors into [`models::TeaserRecord`]s
//! 4. **Merge** ([`dedup`]): first-seen-wins into the [`dedup::ResultSet`]
//! 5. **Log** ([`runner`]): one [`models::RunLogEntry`] per target
//!
//! [`outputs`] persists the result set, run log and run report as flat files.

pub mod cli;
pub mod config;
pub mod dates;
pub mod dedup;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod models;
pub mod outputs;
pub mod resolver;
pub mod runner;
pub mod template;
pub mod utils;
