//! Deduplicated accumulation of teaser records.
//!
//! Records are keyed by a normalised form of their URL (see [`identity_key`]).
//! The first record seen for a key is kept; later copies of the same teaser
//! are discarded, so dates and summaries captured on first encounter stay put
//! across re-scrapes.

use crate::models::TeaserRecord;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use url::Url;

/// Query parameters that only carry campaign or click tracking.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "igshid", "_ga", "_gl", "yclid",
];

fn is_tracking_param(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("utm_") || TRACKING_PARAMS.contains(&lower.as_str())
}

/// Normalised absolute URL used as a record's identity.
///
/// Scheme and host are lowercased, default ports, fragments, tracking query
/// parameters and trailing slashes are dropped. Inputs that do not parse as
/// absolute URLs fall back to their trimmed text.
pub fn identity_key(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&path);

    let mut key = url.to_string();
    // An empty path still serialises as "/" for http(s) URLs.
    if url.query().is_none() && key.ends_with('/') {
        key.pop();
    }
    key
}

/// Append-only, insertion-ordered set of records keyed by [`identity_key`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    records: Vec<TeaserRecord>,
    index: HashMap<String, usize>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from prior output; duplicates in the input are folded first-seen-wins.
    pub fn from_records(records: impl IntoIterator<Item = TeaserRecord>) -> Self {
        let mut set = Self::new();
        set.merge(records);
        set
    }

    /// Insert every record whose key is new. Returns how many were inserted.
    pub fn merge(&mut self, records: impl IntoIterator<Item = TeaserRecord>) -> usize {
        let mut added = 0;
        for record in records {
            let key = identity_key(&record.url);
            if self.index.contains_key(&key) {
                continue;
            }
            self.index.insert(key, self.records.len());
            self.records.push(record);
            added += 1;
        }
        added
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.index.contains_key(&identity_key(url))
    }

    pub fn get(&self, url: &str) -> Option<&TeaserRecord> {
        self.index.get(&identity_key(url)).map(|&i| &self.records[i])
    }

    /// Records in insertion order, most recently added last.
    pub fn records(&self) -> &[TeaserRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<TeaserRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Fold `records` into `set`, returning the updated set and the number of new keys.
pub fn merge(mut set: ResultSet, records: Vec<TeaserRecord>) -> (ResultSet, usize) {
    let added = set.merge(records);
    (set, added)
}

impl Serialize for ResultSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.records.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ResultSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<TeaserRecord>::deserialize(deserializer).map(ResultSet::from_records)
    }
}
