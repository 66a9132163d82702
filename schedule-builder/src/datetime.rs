//! Turns the date/time text found on listing pages into [`Timestamp`]s.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Timelike};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::structs::Timestamp;

/// `YYYY-MM-DDTHH:MM`, optional seconds and fraction, then `Z` or a signed
/// offset.
static EXPLICIT_ZONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2})(:\d{2}(?:\.\d+)?)?(Z|[+-](?:\d{4}|\d{2}:\d{2}))$",
    )
    .unwrap()
});

static LEADING_WEEKDAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:mon|tue|wed|thu|fri|sat|sun)[a-z]*\.?,?\s+").unwrap()
});

static ORDINAL_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)\b").unwrap());
static CONNECTOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+(?:at|@|-)\s+").unwrap());
static DOTTED_AM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\ba\.\s?m\.?").unwrap());
static DOTTED_PM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bp\.\s?m\.?").unwrap());

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %I:%M %p",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%B %d, %Y %I:%M:%S %p",
    "%B %d, %Y %I:%M %p",
    "%B %d, %Y %H:%M:%S",
    "%B %d, %Y %H:%M",
    "%B %d %Y %I:%M %p",
    "%B %d %Y %H:%M:%S",
    "%B %d %Y %H:%M",
    "%d %B %Y %I:%M %p",
    "%d %B %Y %H:%M:%S",
    "%d %B %Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%B %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
    "%m/%d/%Y",
];

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%:z",
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%d %H:%M%:z",
    "%Y-%m-%d %H:%M %z",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not parse date/time {value:?}")]
pub struct UnparseableDate {
    pub value: String,
}

/// Result of normalizing one raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normalized {
    pub timestamp: Option<Timestamp>,
    pub explicit_timezone: bool,
}

impl Normalized {
    const EMPTY: Normalized = Normalized {
        timestamp: None,
        explicit_timezone: false,
    };

    fn from_timestamp(timestamp: Timestamp) -> Self {
        Self {
            timestamp: Some(timestamp),
            explicit_timezone: timestamp.is_utc(),
        }
    }
}

/// Converts date/time text into canonical timestamps.
///
/// Values carrying an offset in a format other than strict ISO-8601 are
/// shifted to the wall clock of `local`, the zone the page is read in.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    local: Tz,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

impl Normalizer {
    #[must_use]
    pub fn new(local: Tz) -> Self {
        Self { local }
    }

    /// Empty input yields an empty [`Normalized`]; input that is not empty but
    /// cannot be read in any known form is an error the caller reports.
    pub fn normalize(
        &self,
        raw: &str,
        fallback_date: Option<&str>,
    ) -> Result<Normalized, UnparseableDate> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Normalized::EMPTY);
        }

        if let Some(timestamp) = parse_explicit_zone(raw) {
            return Ok(Normalized::from_timestamp(timestamp));
        }

        if let Some(timestamp) = self.parse_general(raw) {
            return Ok(Normalized::from_timestamp(timestamp));
        }

        if let Some(date) = fallback_date.map(str::trim).filter(|d| !d.is_empty()) {
            let combined = format!("{date} {raw}");
            if let Some(timestamp) = self.parse_general(&combined) {
                return Ok(Normalized::from_timestamp(timestamp));
            }
        }

        self.parse_general(&lenient(raw))
            .map(Normalized::from_timestamp)
            .ok_or_else(|| UnparseableDate {
                value: raw.to_string(),
            })
    }

    fn parse_general(&self, value: &str) -> Option<Timestamp> {
        let value = collapse_whitespace(value);
        let value = LEADING_WEEKDAY.replace(&value, "");

        if let Ok(datetime) = DateTime::parse_from_rfc2822(&value) {
            return Some(self.to_local(datetime));
        }

        for format in OFFSET_FORMATS {
            if let Ok(datetime) = DateTime::parse_from_str(&value, format) {
                return Some(self.to_local(datetime));
            }
        }

        for format in DATETIME_FORMATS {
            if let Ok(datetime) = NaiveDateTime::parse_from_str(&value, format) {
                return Some(Timestamp::local(truncate(datetime)));
            }
        }

        for format in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(&value, format) {
                return Some(Timestamp::local(date.and_hms_opt(0, 0, 0)?));
            }
        }

        None
    }

    fn to_local(&self, datetime: DateTime<FixedOffset>) -> Timestamp {
        Timestamp::local(truncate(datetime.with_timezone(&self.local).naive_local()))
    }
}

fn parse_explicit_zone(raw: &str) -> Option<Timestamp> {
    let captures = EXPLICIT_ZONE.captures(raw)?;

    let offset = match &captures[3] {
        "Z" => "+00:00".to_string(),
        offset if offset.len() == 5 => format!("{}:{}", &offset[..3], &offset[3..]),
        offset => offset.to_string(),
    };

    let rfc3339 = format!(
        "{}{}{}",
        &captures[1],
        captures.get(2).map_or(":00", |m| m.as_str()),
        offset
    );

    let datetime = DateTime::parse_from_rfc3339(&rfc3339).ok()?;
    Some(Timestamp::utc(truncate(datetime.naive_utc())))
}

fn truncate(datetime: NaiveDateTime) -> NaiveDateTime {
    datetime.with_nanosecond(0).unwrap_or(datetime)
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Tidies up conversational forms such as `Tuesday, Oct 14th at 9:30 a.m.`.
fn lenient(value: &str) -> String {
    let value = ORDINAL_SUFFIX.replace_all(value, "$1");
    let value = CONNECTOR.replace_all(&value, " ");
    let value = DOTTED_AM.replace_all(&value, "AM");
    let value = DOTTED_PM.replace_all(&value, "PM");

    value
        .trim_end_matches(['.', ',', ';'])
        .replace(" ,", ",")
        .trim()
        .to_string()
}
