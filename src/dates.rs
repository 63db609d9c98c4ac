//! Best-effort parsing of the date text shown next to teasers.
//!
//! Listing pages print dates in many shapes: numeric (`19/09/2025 - 20:00`,
//! `07:27 17/09/2025`, `19.09.25 13:41`), with month names in English or Greek
//! (`19 Σεπ 2025 10:24`, `Sep 19, 2025`), ISO 8601, or relative to now
//! (`5 minutes ago`, `πριν 3 ώρες`, `χθες`). [`parse_date`] recognises these
//! and returns `None` for anything else; the raw text is always kept alongside.

use crate::utils::greek_to_latin;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use deunicode::deunicode;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static ISO_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").unwrap());

static DAY_MONTH_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{1,2})[./-](\d{1,2})(?:[./-](\d{2,4}))?(?:\s*[-–—•·,|]?\s*(\d{1,2}):(\d{2})(?::(\d{2}))?)?\s*[•·|]?$",
    )
    .unwrap()
});

static TIME_DAY_MONTH_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2}):(\d{2})(?::(\d{2}))?\s*[,|•·]?\s*(\d{1,2})[./-](\d{1,2})(?:[./-](\d{2,4}))?$")
        .unwrap()
});

static DAY_NAME_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:\p{L}+,?\s+)?(\d{1,2}),?\s+([\p{L}.]+),?(?:\s+(\d{2,4}))?(?:\s*[-–—•·,|]?\s*(\d{1,2}):(\d{2})(?::(\d{2}))?)?$",
    )
    .unwrap()
});

static NAME_DAY_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([\p{L}.]+)\s+(\d{1,2}),?\s+(\d{4})(?:\s*[-–—•·,|]?\s*(\d{1,2}):(\d{2})(?::(\d{2}))?)?$",
    )
    .unwrap()
});

static TIME_DAY_NAME_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{1,2}):(\d{2})(?::(\d{2}))?,?\s+(?:\p{L}+,?\s+)?(\d{1,2})\s+([\p{L}.]+)(?:\s+(\d{2,4}))?$",
    )
    .unwrap()
});

static AGO_EN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+)\s*(seconds?|secs?|minutes?|mins?|hours?|hrs?|days?|weeks?|months?|years?)\s+ago")
        .unwrap()
});

static AGO_GR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"prin(?:\s+apo)?\s+(\d+)\s*(deyt\w*|lept\w*|or\w*|imer\w*|mer\w*|evdom\w*|min\w*|xron\w*)")
        .unwrap()
});

static DAY_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(today|simera|yesterday|xthes|khthes)(?:\W+(\d{1,2}):(\d{2}))?$").unwrap()
});

const MONTH_PREFIXES: &[(&str, u32)] = &[
    ("ioyn", 6),
    ("ioyl", 7),
    ("ian", 1),
    ("jan", 1),
    ("feb", 2),
    ("fev", 2),
    ("mar", 3),
    ("apr", 4),
    ("mai", 5),
    ("may", 5),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("avg", 8),
    ("ayg", 8),
    ("sep", 9),
    ("okt", 10),
    ("oct", 10),
    ("noe", 11),
    ("nov", 11),
    ("dek", 12),
    ("dec", 12),
];

/// Parse `text` into a local date-time, resolving relative and year-less forms against `now`.
pub fn parse_date(text: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }

    parse_iso(t)
        .or_else(|| parse_numeric(t, now))
        .or_else(|| parse_named_month(t, now))
        .or_else(|| parse_relative(t, now))
}

/// ISO forms only; chrono's `%Y` would otherwise read `28-09-23` as the year 28.
fn parse_iso(t: &str) -> Option<NaiveDateTime> {
    if !ISO_DATE.is_match(t) {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.naive_local());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(t, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn parse_numeric(t: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    if let Some(c) = DAY_MONTH_YEAR.captures(t) {
        return build(
            num(&c, 1)?,
            num(&c, 2)?,
            year(&c, 3, now),
            opt_num(&c, 4),
            opt_num(&c, 5),
            opt_num(&c, 6),
        );
    }
    if let Some(c) = TIME_DAY_MONTH_YEAR.captures(t) {
        return build(
            num(&c, 4)?,
            num(&c, 5)?,
            year(&c, 6, now),
            opt_num(&c, 1),
            opt_num(&c, 2),
            opt_num(&c, 3),
        );
    }
    None
}

fn parse_named_month(t: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    if let Some(c) = DAY_NAME_YEAR.captures(t) {
        if let Some(month) = month_number(&c[2]) {
            return build(
                num(&c, 1)?,
                month,
                year(&c, 3, now),
                opt_num(&c, 4),
                opt_num(&c, 5),
                opt_num(&c, 6),
            );
        }
    }
    if let Some(c) = NAME_DAY_YEAR.captures(t) {
        if let Some(month) = month_number(&c[1]) {
            return build(
                num(&c, 2)?,
                month,
                year(&c, 3, now),
                opt_num(&c, 4),
                opt_num(&c, 5),
                opt_num(&c, 6),
            );
        }
    }
    if let Some(c) = TIME_DAY_NAME_YEAR.captures(t) {
        if let Some(month) = month_number(&c[5]) {
            return build(
                num(&c, 4)?,
                month,
                year(&c, 6, now),
                opt_num(&c, 1),
                opt_num(&c, 2),
                opt_num(&c, 3),
            );
        }
    }
    None
}

fn parse_relative(t: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let norm = deunicode(&greek_to_latin(t)).to_lowercase();
    let norm = norm.trim();

    if let Some(c) = AGO_EN.captures(norm).or_else(|| AGO_GR.captures(norm)) {
        let n: i64 = c[1].parse().ok()?;
        return Some(now - unit_duration(&c[2], n)?);
    }

    if let Some(c) = DAY_WORD.captures(norm) {
        let day = match &c[1] {
            "today" | "simera" => now.date(),
            _ => now.date() - Duration::days(1),
        };
        let time = match (opt_num(&c, 2), opt_num(&c, 3)) {
            (Some(h), Some(m)) => NaiveTime::from_hms_opt(h, m, 0)?,
            _ => NaiveTime::from_hms_opt(0, 0, 0)?,
        };
        return Some(day.and_time(time));
    }
    None
}

fn unit_duration(unit: &str, n: i64) -> Option<Duration> {
    let d = if unit.starts_with("sec") || unit.starts_with("deyt") {
        Duration::seconds(n)
    } else if unit.starts_with("min") && !unit.starts_with("mine") && !unit.starts_with("mina") {
        Duration::minutes(n)
    } else if unit.starts_with("lept") {
        Duration::minutes(n)
    } else if unit.starts_with("h") || unit.starts_with("or") {
        Duration::hours(n)
    } else if unit.starts_with("day") || unit.starts_with("imer") || unit.starts_with("mer") {
        Duration::days(n)
    } else if unit.starts_with("week") || unit.starts_with("evdom") {
        Duration::weeks(n)
    } else if unit.starts_with("month") || unit.starts_with("min") {
        Duration::days(30 * n)
    } else if unit.starts_with("year") || unit.starts_with("xron") {
        Duration::days(365 * n)
    } else {
        return None;
    };
    Some(d)
}

fn month_number(token: &str) -> Option<u32> {
    let norm = deunicode(&greek_to_latin(token)).to_lowercase().replace('.', "");
    if norm.len() < 3 {
        return None;
    }
    MONTH_PREFIXES
        .iter()
        .find(|(prefix, _)| norm.starts_with(prefix))
        .map(|(_, m)| *m)
}

fn num(c: &Captures<'_>, i: usize) -> Option<u32> {
    c.get(i)?.as_str().parse().ok()
}

fn opt_num(c: &Captures<'_>, i: usize) -> Option<u32> {
    c.get(i).and_then(|m| m.as_str().parse().ok())
}

fn year(c: &Captures<'_>, i: usize, now: NaiveDateTime) -> i32 {
    match c.get(i).and_then(|m| m.as_str().parse::<i32>().ok()) {
        Some(y) if y < 100 => 2000 + y,
        Some(y) => y,
        None => now.year(),
    }
}

fn build(
    day: u32,
    month: u32,
    year: i32,
    hour: Option<u32>,
    minute: Option<u32>,
    second: Option<u32>,
) -> Option<NaiveDateTime> {
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_opt(hour.unwrap_or(0), minute.unwrap_or(0), second.unwrap_or(0))?;
    Some(date.and_time(time))
}
