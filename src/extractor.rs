//! Template-driven teaser extraction from a rendered listing page.
//!
//! The list is located with the template's optional `container_selector`
//! (first match only) and its `item_selector`; each field selector is then
//! applied inside every item. Items without a title or a resolvable URL are
//! dropped. Output follows document order, and nothing in here depends on
//! the clock or randomness, so the same [`FetchResult`] always yields the
//! same records.

use crate::dates::parse_date;
use crate::error::{ConfigError, TeasyError};
use crate::models::{Category, FetchResult, TeaserRecord};
use crate::template::{FieldSelector, Template, parse_css};
use crate::utils::{tidy_text, truncate_for_log};
use chrono::Local;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::{debug, instrument};
use url::Url;

/// A field selector compiled once per extraction.
struct CompiledField<'a> {
    selector: Selector,
    attr: Option<&'a str>,
}

impl<'a> CompiledField<'a> {
    fn compile(site_id: &str, name: &str, field: &'a FieldSelector) -> Result<Self, ConfigError> {
        Ok(Self {
            selector: parse_css(site_id, name, &field.query)?,
            attr: field.attr.as_deref(),
        })
    }

    /// First match inside `item`: the attribute if one is configured, else its text.
    fn value(&self, item: ElementRef<'_>, default_attr: Option<&str>) -> Option<String> {
        let el = item.select(&self.selector).next()?;
        match self.attr.or(default_attr) {
            Some(attr) => el.value().attr(attr).and_then(tidy_text),
            None => tidy_text(&el.text().collect::<String>()),
        }
    }
}

fn compile_optional<'a>(
    site_id: &str,
    name: &str,
    field: &'a Option<FieldSelector>,
) -> Result<Option<CompiledField<'a>>, ConfigError> {
    field
        .as_ref()
        .map(|f| CompiledField::compile(site_id, name, f))
        .transpose()
}

/// The URL relative links are resolved against: `<base href>` if present, else the page URL.
fn base_url(document: &Html, final_url: &str) -> Option<Url> {
    let page = Url::parse(final_url).ok()?;
    let Ok(base_sel) = Selector::parse("base[href]") else {
        return Some(page);
    };
    document
        .select(&base_sel)
        .next()
        .and_then(|b| b.value().attr("href"))
        .and_then(|href| page.join(href).ok())
        .or(Some(page))
}

fn absolutize(base: Option<&Url>, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') || raw.starts_with("javascript:") {
        return None;
    }
    let url = match base {
        Some(base) => base.join(raw).ok()?,
        None => Url::parse(raw).ok()?,
    };
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

/// The elements to treat as teasers: items inside the first container match, or in the whole page.
fn items<'a>(
    document: &'a Html,
    container: Option<&Selector>,
    item: &Selector,
) -> Vec<ElementRef<'a>> {
    match container {
        Some(container) => document
            .select(container)
            .next()
            .map(|scope| scope.select(item).collect())
            .unwrap_or_default(),
        None => document.select(item).collect(),
    }
}

/// Extract teaser records from `result` using `template`.
///
/// # Arguments
///
/// * `template` - Site template providing list and field selectors
/// * `result` - The fetched page
/// * `site_id` - Stamped on every record
/// * `category` - Stamped on every record
///
/// # Returns
///
/// Records in document order, or [`TeasyError::ExtractionEmpty`] when no item
/// yields both a title and a URL.
#[instrument(level = "info", skip_all, fields(site = %site_id, url = %result.document.final_url))]
pub fn extract(
    template: &Template,
    result: &FetchResult,
    site_id: &str,
    category: Category,
) -> Result<Vec<TeaserRecord>, TeasyError> {
    let item_sel = parse_css(site_id, "item_selector", &template.item_selector)?;
    let container_sel = template
        .container_selector
        .as_deref()
        .map(|c| parse_css(site_id, "container_selector", c))
        .transpose()?;
    let fields = &template.fields;
    let title = CompiledField::compile(site_id, "title", &fields.title)?;
    let link = CompiledField::compile(site_id, "url", &fields.url)?;
    let date = compile_optional(site_id, "date", &fields.date)?;
    let section = compile_optional(site_id, "section", &fields.section)?;
    let summary = compile_optional(site_id, "summary", &fields.summary)?;

    let document = Html::parse_document(&result.document.html);
    let base = base_url(&document, &result.document.final_url);
    let now = result.fetched_at.with_timezone(&Local).naive_local();

    let found = items(&document, container_sel.as_ref(), &item_sel);
    let mut records = Vec::with_capacity(found.len());
    for item in &found {
        let Some(title) = title.value(*item, None) else {
            continue;
        };
        let Some(url) = link
            .value(*item, Some("href"))
            .and_then(|raw| absolutize(base.as_ref(), &raw))
        else {
            continue;
        };
        let date = date.as_ref().and_then(|f| f.value(*item, None));
        let published_at = date.as_deref().and_then(|d| parse_date(d, now));

        records.push(TeaserRecord {
            site_id: site_id.to_string(),
            category,
            title,
            url,
            date,
            published_at,
            section: section.as_ref().and_then(|f| f.value(*item, None)),
            summary: summary.as_ref().and_then(|f| f.value(*item, None)),
            fetched_at: result.fetched_at,
        });
    }

    if records.is_empty() {
        if let Ok(diag) = diagnose(template, &result.document.html) {
            debug!(
                ?diag,
                preview = %truncate_for_log(&result.document.html, 300),
                "Selector diagnostics"
            );
        }
        return Err(TeasyError::ExtractionEmpty {
            url: result.document.final_url.clone(),
            items: found.len(),
        });
    }
    debug!(count = records.len(), dropped = found.len() - records.len(), "Extracted teasers");
    Ok(records)
}

/// How a template's selectors fare against a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectorDiagnostics {
    /// `None` when the template declares no container.
    pub container_found: Option<bool>,
    pub item_count: usize,
    /// Per field: how many items have at least one match.
    pub field_hits: Vec<(String, usize)>,
}

/// Report container presence, item count and per-field hit counts for `html`.
pub fn diagnose(template: &Template, html: &str) -> Result<SelectorDiagnostics, ConfigError> {
    let site = template.site_id.as_str();
    let item_sel = parse_css(site, "item_selector", &template.item_selector)?;
    let container_sel = template
        .container_selector
        .as_deref()
        .map(|c| parse_css(site, "container_selector", c))
        .transpose()?;

    let document = Html::parse_document(html);
    let container_found = container_sel
        .as_ref()
        .map(|c| document.select(c).next().is_some());
    let found = items(&document, container_sel.as_ref(), &item_sel);

    let mut field_hits = Vec::new();
    for (name, field) in template.fields.named() {
        let sel = parse_css(site, name, &field.query)?;
        let hits = found
            .iter()
            .filter(|item| item.select(&sel).next().is_some())
            .count();
        field_hits.push((name.to_string(), hits));
    }

    Ok(SelectorDiagnostics {
        container_found,
        item_count: found.len(),
        field_hits,
    })
}
