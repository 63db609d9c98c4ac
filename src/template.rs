//! Per-site extraction templates.
//!
//! A [`Template`] describes where the teaser list lives on a site, how to read
//! each field out of a list item, which consent buttons to try, and how every
//! supported [`Category`] maps to listing URLs. Templates are written as YAML:
//!
//! ```yaml
//! site_id: dnews
//! base_url: https://www.dnews.gr
//! item_selector: "article.teaser"
//! fields:
//!   title: { query: "h3 a" }
//!   url: { query: "h3 a", attr: href }
//!   date: { query: "time", attr: datetime }
//! consent_selectors:
//!   - "#onetrust-accept-btn-handler"
//!   - "//button[contains(., 'ΣΥΜΦΩΝΩ')]"
//! categories:
//!   all:
//!     urls: ["https://www.dnews.gr/eidhseis"]
//!     pagination: { param: page, max_pages: 3 }
//!   search:
//!     pattern: "https://www.dnews.gr/search?q={s}"
//!     term_mode: greeklish
//!     term_map: { "Τέμπη": "tempi" }
//! ```
//!
//! Templates are validated when loaded and treated as immutable values for the
//! duration of a run.

use crate::error::{ConfigError, TeasyError};
use crate::models::Category;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument};
use url::Url;

/// A CSS selector plus the attribute to read (text content when absent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelector {
    pub query: String,
    #[serde(default)]
    pub attr: Option<String>,
}

impl FieldSelector {
    pub fn css(query: &str) -> Self {
        Self {
            query: query.to_string(),
            attr: None,
        }
    }

    pub fn attr(query: &str, attr: &str) -> Self {
        Self {
            query: query.to_string(),
            attr: Some(attr.to_string()),
        }
    }
}

/// Field selectors applied inside each list item. `title` and `url` are mandatory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelectors {
    pub title: FieldSelector,
    pub url: FieldSelector,
    #[serde(default)]
    pub date: Option<FieldSelector>,
    #[serde(default)]
    pub section: Option<FieldSelector>,
    #[serde(default)]
    pub summary: Option<FieldSelector>,
}

impl FieldSelectors {
    /// All declared selectors with their field names, mandatory ones first.
    pub fn named(&self) -> Vec<(&'static str, &FieldSelector)> {
        let mut out = vec![("title", &self.title), ("url", &self.url)];
        if let Some(s) = &self.date {
            out.push(("date", s));
        }
        if let Some(s) = &self.section {
            out.push(("section", s));
        }
        if let Some(s) = &self.summary {
            out.push(("summary", s));
        }
        out
    }
}

fn default_page_param() -> String {
    "page".to_string()
}

fn one() -> u32 {
    1
}

/// Fixed pagination over a listing or search URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page_param")]
    pub param: String,
    #[serde(default = "one")]
    pub first_page: u32,
    #[serde(default = "one")]
    pub max_pages: u32,
}

/// Upper bound on `max_pages` for a single rule.
pub const MAX_PAGES: u32 = 100;

impl Pagination {
    fn check(&self, site_id: &str) -> Result<(), ConfigError> {
        let reason = if self.param.trim().is_empty() {
            "param is empty".to_string()
        } else if !(1..=MAX_PAGES).contains(&self.max_pages) {
            format!("max_pages must be between 1 and {MAX_PAGES}, got {}", self.max_pages)
        } else if self.first_page.checked_add(self.max_pages).is_none() {
            format!("first_page {} is out of range", self.first_page)
        } else {
            return Ok(());
        };
        Err(ConfigError::InvalidPagination {
            site_id: site_id.to_string(),
            reason,
        })
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            param: default_page_param(),
            first_page: 1,
            max_pages: 1,
        }
    }
}

/// Static listing pages (`all`, `opinion`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRule {
    pub urls: Vec<String>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

/// How a free-text query term becomes the `{s}` value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermMode {
    #[default]
    Raw,
    Greeklish,
    Slug,
}

/// Search pages: a pattern with a `{s}` placeholder plus the slug mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRule {
    pub pattern: String,
    #[serde(default)]
    pub term_mode: TermMode,
    /// Exact term overrides, e.g. `Τέμπη` → `tempi`.
    #[serde(default)]
    pub term_map: BTreeMap<String, String>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

/// Per-category rules. Every field is optional; a run asking for a category
/// without a rule fails that target with [`ConfigError::MissingCategory`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRules {
    #[serde(default)]
    pub all: Option<ListingRule>,
    #[serde(default)]
    pub opinion: Option<ListingRule>,
    #[serde(default)]
    pub search: Option<SearchRule>,
}

/// Borrowed view of the rule for one category.
#[derive(Debug, Clone, Copy)]
pub enum CategoryRule<'a> {
    Listing(&'a ListingRule),
    Search(&'a SearchRule),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub site_id: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Narrows extraction to the first element matching this selector.
    #[serde(default)]
    pub container_selector: Option<String>,
    /// Matches one element per teaser; also the readiness signal for fetching.
    pub item_selector: String,
    pub fields: FieldSelectors,
    /// Tried in order; CSS, or XPath when the expression starts with `/` or `(`.
    #[serde(default)]
    pub consent_selectors: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Skip the network attempt and go straight to the browser when it is allowed.
    #[serde(default)]
    pub js_required: bool,
    #[serde(default)]
    pub categories: CategoryRules,
}

impl Template {
    pub fn rule(&self, category: Category) -> Option<CategoryRule<'_>> {
        match category {
            Category::All => self.categories.all.as_ref().map(CategoryRule::Listing),
            Category::Opinion => self.categories.opinion.as_ref().map(CategoryRule::Listing),
            Category::Search => self.categories.search.as_ref().map(CategoryRule::Search),
        }
    }

    /// Categories this template declares a rule for.
    pub fn categories(&self) -> Vec<Category> {
        [Category::All, Category::Search, Category::Opinion]
            .into_iter()
            .filter(|c| self.rule(*c).is_some())
            .collect()
    }

    /// The selector whose presence marks a rendered listing as usable.
    pub fn ready_selector(&self) -> &str {
        &self.item_selector
    }

    /// Check required fields, selector syntax and URL patterns.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.site_id.trim().is_empty() {
            return Err(ConfigError::MissingField("site_id"));
        }
        let site = self.site_id.as_str();

        parse_css(site, "item_selector", &self.item_selector)?;
        if let Some(container) = &self.container_selector {
            parse_css(site, "container_selector", container)?;
        }
        for (name, field) in self.fields.named() {
            parse_css(site, name, &field.query)?;
            if field.attr.as_deref().is_some_and(|a| a.trim().is_empty()) {
                return Err(ConfigError::EmptySelector {
                    site_id: site.to_string(),
                    field: format!("{name}.attr"),
                });
            }
        }
        for consent in &self.consent_selectors {
            if is_xpath(consent) {
                continue;
            }
            parse_css(site, "consent_selectors", consent)?;
        }

        if let Some(base) = &self.base_url {
            check_url(site, base)?;
        }
        for rule in [&self.categories.all, &self.categories.opinion]
            .into_iter()
            .flatten()
        {
            if rule.urls.is_empty() {
                return Err(ConfigError::MissingField("categories.*.urls"));
            }
            if let Some(p) = &rule.pagination {
                p.check(site)?;
            }
            for u in &rule.urls {
                if u.contains("{s}") {
                    return Err(ConfigError::InvalidUrl {
                        site_id: site.to_string(),
                        url: u.clone(),
                        reason: "{s} is only valid in search patterns".to_string(),
                    });
                }
                check_url(site, u)?;
            }
        }
        if let Some(search) = &self.categories.search {
            if !search.pattern.contains("{s}") {
                return Err(ConfigError::MissingPlaceholder {
                    site_id: site.to_string(),
                    pattern: search.pattern.clone(),
                });
            }
            check_url(site, &search.pattern)?;
            if let Some(p) = &search.pagination {
                p.check(site)?;
            }
        }
        Ok(())
    }

    /// Parse and validate a YAML template.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, TeasyError> {
        let template: Template = serde_yaml::from_str(yaml)?;
        template.validate()?;
        Ok(template)
    }

    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Self, TeasyError> {
        let text = fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Unreadable {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let template = Self::from_yaml_str(&text)?;
        debug!(site_id = %template.site_id, "Loaded template");
        Ok(template)
    }
}

/// Load templates from files and directories (`*.yaml` / `*.yml`, sorted by name).
#[instrument(level = "info", skip_all)]
pub async fn load_templates(paths: &[PathBuf]) -> Result<Vec<Template>, TeasyError> {
    let mut files = Vec::new();
    for path in paths {
        if fs::metadata(path).await?.is_dir() {
            let mut entries = fs::read_dir(path).await?;
            let mut found = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                let p = entry.path();
                if matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                ) {
                    found.push(p);
                }
            }
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }

    let mut templates = Vec::with_capacity(files.len());
    for file in &files {
        templates.push(Template::load(file).await?);
    }
    info!(count = templates.len(), "Loaded templates");
    Ok(templates)
}

pub(crate) fn is_xpath(expr: &str) -> bool {
    let e = expr.trim_start();
    e.starts_with('/') || e.starts_with('(')
}

pub(crate) fn parse_css(site_id: &str, field: &str, query: &str) -> Result<Selector, ConfigError> {
    if query.trim().is_empty() {
        return Err(ConfigError::EmptySelector {
            site_id: site_id.to_string(),
            field: field.to_string(),
        });
    }
    Selector::parse(query).map_err(|e| ConfigError::InvalidSelector {
        site_id: site_id.to_string(),
        field: field.to_string(),
        query: query.to_string(),
        reason: e.to_string(),
    })
}

fn check_url(site_id: &str, pattern: &str) -> Result<(), ConfigError> {
    let candidate = pattern.replace("{s}", "x").replace("{page}", "1");
    Url::parse(&candidate)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidUrl {
            site_id: site_id.to_string(),
            url: pattern.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r##"
site_id: example
base_url: https://example.com
item_selector: "li.teaser"
fields:
  title: { query: "h3" }
  url: { query: "a", attr: href }
  date: { query: "time" }
consent_selectors:
  - "#accept"
  - "//button[contains(., 'Agree')]"
categories:
  all:
    urls: ["https://example.com/latest"]
  search:
    pattern: "https://example.com/search?q={s}"
"##;

    pub(crate) fn sample() -> Template {
        Template::from_yaml_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_parse_sample_template() {
        let t = sample();
        assert_eq!(t.site_id, "example");
        assert_eq!(t.fields.url.attr.as_deref(), Some("href"));
        assert!(t.fields.summary.is_none());
        assert_eq!(t.categories(), vec![Category::All, Category::Search]);
        assert!(t.rule(Category::Opinion).is_none());
        assert_eq!(t.consent_selectors[0], "#accept");
        assert!(is_xpath(&t.consent_selectors[1]));
    }

    #[test]
    fn test_empty_title_selector_rejected() {
        let mut t = sample();
        t.fields.title.query = "  ".to_string();
        assert!(matches!(
            t.validate(),
            Err(ConfigError::EmptySelector { ref field, .. }) if field == "title"
        ));
    }

    #[test]
    fn test_invalid_css_rejected() {
        let mut t = sample();
        t.item_selector = "li[".to_string();
        assert!(matches!(t.validate(), Err(ConfigError::InvalidSelector { .. })));
    }

    #[test]
    fn test_search_pattern_requires_placeholder() {
        let mut t = sample();
        t.categories.search.as_mut().unwrap().pattern = "https://example.com/search".to_string();
        assert!(matches!(t.validate(), Err(ConfigError::MissingPlaceholder { .. })));
    }

    #[test]
    fn test_placeholder_outside_search_rejected() {
        let mut t = sample();
        t.categories.all.as_mut().unwrap().urls = vec!["https://example.com/?q={s}".to_string()];
        assert!(matches!(t.validate(), Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn test_pagination_bounds_are_checked() {
        let mut t = sample();
        let listing = t.categories.all.as_mut().unwrap();
        listing.pagination = Some(Pagination {
            max_pages: 0,
            ..Pagination::default()
        });
        assert!(matches!(t.validate(), Err(ConfigError::InvalidPagination { .. })));

        t.categories.all.as_mut().unwrap().pagination = Some(Pagination {
            first_page: u32::MAX,
            max_pages: 2,
            ..Pagination::default()
        });
        assert!(matches!(t.validate(), Err(ConfigError::InvalidPagination { .. })));

        t.categories.all.as_mut().unwrap().pagination = Some(Pagination {
            first_page: 0,
            max_pages: MAX_PAGES,
            ..Pagination::default()
        });
        assert!(t.validate().is_ok());

        t.categories.search.as_mut().unwrap().pagination = Some(Pagination {
            max_pages: MAX_PAGES + 1,
            ..Pagination::default()
        });
        assert!(matches!(t.validate(), Err(ConfigError::InvalidPagination { .. })));
    }

    #[test]
    fn test_missing_url_selector_fails_to_parse() {
        let yaml = r#"
site_id: x
item_selector: li
fields:
  title: { query: h3 }
"#;
        assert!(matches!(
            Template::from_yaml_str(yaml),
            Err(TeasyError::Yaml(_))
        ));
    }

    #[test]
    fn test_bundled_template_parses() {
        let t = Template::from_yaml_str(include_str!("../templates/example.yaml")).unwrap();
        assert_eq!(t.site_id, "example-news");
        assert_eq!(t.categories(), vec![Category::All, Category::Search, Category::Opinion]);
        assert_eq!(t.categories.search.as_ref().unwrap().term_mode, TermMode::Slug);
        assert_eq!(t.consent_selectors.len(), 3);
    }

    #[test]
    fn test_xpath_detection() {
        assert!(is_xpath("//button"));
        assert!(is_xpath("(//button)[1]"));
        assert!(!is_xpath("#accept"));
    }

    #[tokio::test]
    async fn test_load_templates_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("b.yaml"), SAMPLE.replace("example\n", "bsite\n"))
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("a.yml"), SAMPLE).await.unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), "ignored").await.unwrap();

        let templates = load_templates(&[dir.path().to_path_buf()]).await.unwrap();
        let ids: Vec<_> = templates.iter().map(|t| t.site_id.as_str()).collect();
        assert_eq!(ids, vec!["example", "bsite"]);
    }
}
