//! Text helpers shared across the crate.
//!
//! - Greek-to-Latin transliteration and slugification for search terms
//! - Whitespace tidying for extracted teaser text
//! - Browser user-agent selection
//! - Log truncation and output directory checks

use crate::error::TeasyError;
use deunicode::deunicode;
use once_cell::sync::Lazy;
use rand::seq::IndexedRandom;
use regex::Regex;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0 Safari/537.36",
];

/// Pick one of a small set of current desktop browser user agents.
pub fn user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

fn greek_char(c: char) -> Option<&'static str> {
    let s = match c {
        'α' | 'ά' | 'Α' | 'Ά' => "a",
        'β' | 'Β' => "v",
        'γ' | 'Γ' => "g",
        'δ' | 'Δ' => "d",
        'ε' | 'έ' | 'Ε' | 'Έ' => "e",
        'ζ' | 'Ζ' => "z",
        'η' | 'ή' | 'Η' | 'Ή' => "i",
        'θ' | 'Θ' => "th",
        'ι' | 'ί' | 'ϊ' | 'ΐ' | 'Ι' | 'Ί' | 'Ϊ' => "i",
        'κ' | 'Κ' => "k",
        'λ' | 'Λ' => "l",
        'μ' | 'Μ' => "m",
        'ν' | 'Ν' => "n",
        'ξ' | 'Ξ' => "x",
        'ο' | 'ό' | 'Ο' | 'Ό' => "o",
        'π' | 'Π' => "p",
        'ρ' | 'Ρ' => "r",
        'σ' | 'ς' | 'Σ' => "s",
        'τ' | 'Τ' => "t",
        'υ' | 'ύ' | 'ϋ' | 'ΰ' | 'Υ' | 'Ύ' | 'Ϋ' => "y",
        'φ' | 'Φ' => "f",
        'χ' | 'Χ' => "x",
        'ψ' | 'Ψ' => "ps",
        'ω' | 'ώ' | 'Ω' | 'Ώ' => "o",
        _ => return None,
    };
    Some(s)
}

/// Transliterate Greek letters to lowercase Latin ("greeklish"); other characters pass through.
///
/// ```ignore
/// assert_eq!(greek_to_latin("Τέμπη"), "tempi");
/// ```
pub fn greek_to_latin(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match greek_char(c) {
            Some(latin) => out.push_str(latin),
            None => out.push(c),
        }
    }
    out
}

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Lowercase, transliterate, strip diacritics and hyphenate. Empty input gives `"search"`.
pub fn slugify(value: &str) -> String {
    let raw = value.trim();
    if raw.is_empty() {
        return "search".to_string();
    }
    let latin = deunicode(&greek_to_latin(raw)).to_lowercase();
    let slug = NON_ALNUM.replace_all(&latin, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "search".to_string()
    } else {
        slug.to_string()
    }
}

static ZERO_WIDTH: Lazy<Regex> = Lazy::new(|| Regex::new("[\u{200B}-\u{200D}\u{FEFF}]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static SPACE_BEFORE_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+([,.;:!?])").unwrap());

/// Collapse whitespace and drop NBSP/zero-width characters. Blank input gives `None`.
pub fn tidy_text(s: &str) -> Option<String> {
    let t = s.replace('\u{a0}', " ");
    let t = ZERO_WIDTH.replace_all(&t, "");
    let t = WHITESPACE.replace_all(&t, " ");
    let t = SPACE_BEFORE_PUNCT.replace_all(t.trim(), "$1");
    if t.is_empty() {
        None
    } else {
        Some(t.into_owned())
    }
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut at a character boundary at or below `max` bytes and
/// get `"…(+N bytes)"` appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a scratch file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), TeasyError> {
    fs::create_dir_all(path).await?;
    let scratch_path = path.join("..__write_check__");
    stdfs::File::create(&scratch_path)?;
    let _ = stdfs::remove_file(&scratch_path);
    info!("Output directory is writable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_string() {
        assert_eq!(truncate_for_log("Hello, world!", 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_multibyte() {
        // Each Greek letter is two bytes; byte 3 is mid-character.
        let result = truncate_for_log("αβγδ", 3);
        assert_eq!(result, "α…(+6 bytes)");
    }

    #[test]
    fn test_greek_to_latin() {
        assert_eq!(greek_to_latin("Τέμπη"), "tempi");
        assert_eq!(greek_to_latin("Ψυχή 2025"), "psyxi 2025");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Climate Policy"), "climate-policy");
        assert_eq!(slugify("  Τέμπη  "), "tempi");
        assert_eq!(slugify("Café Müller!"), "cafe-muller");
        assert_eq!(slugify("   "), "search");
        assert_eq!(slugify("???"), "search");
    }

    #[test]
    fn test_tidy_text() {
        assert_eq!(
            tidy_text("  Breaking\u{a0}news \n\t today , folks\u{200B} ").as_deref(),
            Some("Breaking news today, folks")
        );
        assert_eq!(tidy_text(" \n "), None);
    }

    #[test]
    fn test_user_agent_is_browser_like() {
        assert!(user_agent().starts_with("Mozilla/5.0"));
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        ensure_writable_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
    }
}
