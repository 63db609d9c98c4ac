//! Category resolution: turn a template category plus query terms into concrete [`Target`]s.
//!
//! `all` and `opinion` expand the rule's fixed URLs; `search` substitutes each
//! query term into the `{s}` pattern after applying the site's term mapping.
//! Both may multiply by a fixed page range. Resolution is pure: no I/O.

use crate::error::ConfigError;
use crate::models::{Category, Target};
use crate::template::{CategoryRule, Pagination, SearchRule, Template, TermMode};
use crate::utils::{greek_to_latin, slugify};
use itertools::Itertools;
use regex::Regex;
use std::ops::RangeInclusive;

/// Expand `category` of `template` into the targets to fetch, in declared order.
pub fn resolve(
    template: &Template,
    category: Category,
    query_terms: &[String],
) -> Result<Vec<Target>, ConfigError> {
    let rule = template
        .rule(category)
        .ok_or_else(|| ConfigError::MissingCategory {
            site_id: template.site_id.clone(),
            category,
        })?;

    let mut targets = Vec::new();
    match rule {
        CategoryRule::Listing(listing) => {
            for url in &listing.urls {
                for page in page_numbers(listing.pagination.as_ref()) {
                    targets.push(Target {
                        site_id: template.site_id.clone(),
                        category,
                        resolved_url: paged_url(url, listing.pagination.as_ref(), page),
                        query_term: None,
                        term_used: None,
                        page,
                    });
                }
            }
        }
        CategoryRule::Search(search) => {
            let terms = normalize_terms(query_terms);
            if terms.is_empty() {
                return Err(ConfigError::EmptyQueryTerms {
                    site_id: template.site_id.clone(),
                });
            }
            for term in terms {
                let used = map_term(search, &term);
                let url = search.pattern.replace("{s}", &used);
                for page in page_numbers(search.pagination.as_ref()) {
                    targets.push(Target {
                        site_id: template.site_id.clone(),
                        category,
                        resolved_url: paged_url(&url, search.pagination.as_ref(), page),
                        query_term: Some(term.clone()),
                        term_used: Some(used.clone()),
                        page,
                    });
                }
            }
        }
    }
    Ok(targets)
}

/// Trimmed, non-blank, first occurrence of each term.
fn normalize_terms(terms: &[String]) -> Vec<String> {
    terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .unique()
        .map(str::to_string)
        .collect()
}

/// The `{s}` value for one term: an exact `term_map` hit wins, then `term_mode`.
pub fn map_term(rule: &SearchRule, term: &str) -> String {
    if let Some(mapped) = rule.term_map.get(term) {
        return urlencoding::encode(mapped).into_owned();
    }
    match rule.term_mode {
        TermMode::Raw => urlencoding::encode(term).into_owned(),
        TermMode::Greeklish => urlencoding::encode(&greek_to_latin(term)).into_owned(),
        TermMode::Slug => slugify(term),
    }
}

fn page_numbers(pagination: Option<&Pagination>) -> RangeInclusive<u32> {
    match pagination {
        Some(p) => p.first_page..=p.first_page.saturating_add(p.max_pages.max(1) - 1),
        None => 1..=1,
    }
}

/// Place `page` into `url` according to `pagination`.
///
/// A `{page}` placeholder is filled directly. Otherwise the first page keeps
/// the URL as written unless the parameter is already present, and later
/// pages set (or append) the query parameter.
fn paged_url(url: &str, pagination: Option<&Pagination>, page: u32) -> String {
    let Some(p) = pagination else {
        return url.replace("{page}", &page.to_string());
    };
    if url.contains("{page}") {
        return url.replace("{page}", &page.to_string());
    }

    let (head, fragment) = match url.split_once('#') {
        Some((h, f)) => (h, Some(f)),
        None => (url, None),
    };
    let existing = Regex::new(&format!(r"([?&]){}=[^&]*", regex::escape(&p.param)))
        .map(|re| re.is_match(head).then_some(re))
        .ok()
        .flatten();

    let mut out = match existing {
        Some(re) => re
            .replace(head, format!("${{1}}{}={}", p.param, page).as_str())
            .into_owned(),
        None if page == p.first_page => head.to_string(),
        None => {
            let sep = if head.contains('?') { '&' } else { '?' };
            format!("{head}{sep}{}={page}", p.param)
        }
    };
    if let Some(f) = fragment {
        out.push('#');
        out.push_str(f);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::tests::sample;
    use crate::template::ListingRule;

    fn terms(ts: &[&str]) -> Vec<String> {
        ts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_all_resolves_to_single_target() {
        let targets = resolve(&sample(), Category::All, &[]).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].resolved_url, "https://example.com/latest");
        assert_eq!(targets[0].query_term, None);
        assert_eq!(targets[0].page, 1);
    }

    #[test]
    fn test_search_percent_encodes_raw_term() {
        let targets = resolve(&sample(), Category::Search, &terms(&["climate policy"])).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(
            targets[0].resolved_url,
            "https://example.com/search?q=climate%20policy"
        );
        assert_eq!(targets[0].query_term.as_deref(), Some("climate policy"));
    }

    #[test]
    fn test_search_one_target_per_distinct_term() {
        let targets = resolve(
            &sample(),
            Category::Search,
            &terms(&["a", " b ", "a", "  "]),
        )
        .unwrap();
        let urls: Vec<_> = targets.iter().map(|t| t.resolved_url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/search?q=a",
                "https://example.com/search?q=b"
            ]
        );
    }

    #[test]
    fn test_search_term_map_wins_over_mode() {
        let mut t = sample();
        let search = t.categories.search.as_mut().unwrap();
        search.term_mode = TermMode::Slug;
        search.term_map.insert("Τέμπη".into(), "tempi-trial".into());
        let targets = resolve(&t, Category::Search, &terms(&["Τέμπη", "Νέα Δημοκρατία"])).unwrap();
        assert_eq!(targets[0].resolved_url, "https://example.com/search?q=tempi-trial");
        assert_eq!(targets[1].resolved_url, "https://example.com/search?q=nea-dimokratia");
        assert_eq!(targets[1].term_used.as_deref(), Some("nea-dimokratia"));
    }

    #[test]
    fn test_search_greeklish_mode() {
        let mut t = sample();
        t.categories.search.as_mut().unwrap().term_mode = TermMode::Greeklish;
        let targets = resolve(&t, Category::Search, &terms(&["Τέμπη Λάρισα"])).unwrap();
        assert_eq!(targets[0].resolved_url, "https://example.com/search?q=tempi%20larisa");
    }

    #[test]
    fn test_search_without_terms_is_config_error() {
        let err = resolve(&sample(), Category::Search, &terms(&[" "])).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyQueryTerms { .. }));
    }

    #[test]
    fn test_missing_category_is_config_error() {
        let err = resolve(&sample(), Category::Opinion, &[]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingCategory {
                site_id: "example".into(),
                category: Category::Opinion
            }
        );
    }

    #[test]
    fn test_listing_pagination_appends_param_after_first_page() {
        let mut t = sample();
        t.categories.opinion = Some(ListingRule {
            urls: vec!["https://example.com/opinion?sort=new".into()],
            pagination: Some(Pagination {
                param: "page".into(),
                first_page: 1,
                max_pages: 3,
            }),
        });
        let urls: Vec<_> = resolve(&t, Category::Opinion, &[])
            .unwrap()
            .into_iter()
            .map(|t| (t.page, t.resolved_url))
            .collect();
        assert_eq!(
            urls,
            vec![
                (1, "https://example.com/opinion?sort=new".to_string()),
                (2, "https://example.com/opinion?sort=new&page=2".to_string()),
                (3, "https://example.com/opinion?sort=new&page=3".to_string()),
            ]
        );
    }

    #[test]
    fn test_page_range_stops_at_u32_max() {
        let p = Pagination {
            param: "page".into(),
            first_page: u32::MAX,
            max_pages: 3,
        };
        assert_eq!(page_numbers(Some(&p)).collect::<Vec<_>>(), vec![u32::MAX]);
        let unset = Pagination {
            max_pages: 0,
            ..Pagination::default()
        };
        assert_eq!(page_numbers(Some(&unset)).collect::<Vec<_>>(), vec![1]);
        assert_eq!(page_numbers(None).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_pagination_replaces_existing_param() {
        let p = Pagination {
            param: "page".into(),
            first_page: 1,
            max_pages: 2,
        };
        assert_eq!(
            paged_url("https://x.com/s?page=1&q=a", Some(&p), 2),
            "https://x.com/s?page=2&q=a"
        );
        assert_eq!(paged_url("https://x.com/news/{page}", Some(&p), 2), "https://x.com/news/2");
        assert_eq!(paged_url("https://x.com/s#top", Some(&p), 2), "https://x.com/s?page=2#top");
    }
}
