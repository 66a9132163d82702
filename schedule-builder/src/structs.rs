use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

const CANONICAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Where the zone of a timestamp came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimezoneKind {
    /// The source carried `Z` or an offset and the value was converted to UTC.
    ExplicitUtc,
    /// Wall-clock value, zone left to the calendar configuration.
    Unknown,
}

/// Canonical `YYYY-MM-DDTHH:MM:SS[Z]` timestamp.
///
/// The trailing `Z` is rendered if and only if the kind is
/// [`TimezoneKind::ExplicitUtc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp {
    datetime: NaiveDateTime,
    kind: TimezoneKind,
}

impl Timestamp {
    #[must_use]
    pub fn utc(datetime: NaiveDateTime) -> Self {
        Self {
            datetime,
            kind: TimezoneKind::ExplicitUtc,
        }
    }

    #[must_use]
    pub fn local(datetime: NaiveDateTime) -> Self {
        Self {
            datetime,
            kind: TimezoneKind::Unknown,
        }
    }

    #[must_use]
    pub fn datetime(&self) -> NaiveDateTime {
        self.datetime
    }

    #[must_use]
    pub fn kind(&self) -> TimezoneKind {
        self.kind
    }

    #[must_use]
    pub fn is_utc(&self) -> bool {
        self.kind == TimezoneKind::ExplicitUtc
    }

    /// Everything before the `T`.
    #[must_use]
    pub fn date_part(&self) -> String {
        self.datetime.format("%Y-%m-%d").to_string()
    }

    /// Everything after the `T`, including the `Z` marker.
    #[must_use]
    pub fn time_part(&self) -> String {
        let time = self.datetime.format("%H:%M:%S");
        if self.is_utc() {
            format!("{time}Z")
        } else {
            time.to_string()
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.datetime.format(CANONICAL_FORMAT))?;
        if self.is_utc() {
            f.write_str("Z")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("not a canonical timestamp: {0:?}")]
pub struct InvalidTimestamp(pub String);

impl FromStr for Timestamp {
    type Err = InvalidTimestamp;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (raw, utc) = match s.strip_suffix('Z') {
            Some(raw) => (raw, true),
            None => (s, false),
        };

        let datetime = NaiveDateTime::parse_from_str(raw, CANONICAL_FORMAT)
            .map_err(|_| InvalidTimestamp(s.to_string()))?;

        Ok(if utc {
            Timestamp::utc(datetime)
        } else {
            Timestamp::local(datetime)
        })
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One calendar-eligible item scraped from a listing page.
///
/// Serializes with the derived `startTimezoneKind` and `endTimezoneKind`
/// fields; they are ignored when reading an event back.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub summary: String,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    pub duration: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventJson<'a> {
    id: &'a str,
    summary: &'a str,
    start_time: Timestamp,
    end_time: Timestamp,
    start_timezone_kind: TimezoneKind,
    end_timezone_kind: TimezoneKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    link: Option<&'a str>,
    duration: &'a str,
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        EventJson {
            id: &self.id,
            summary: &self.summary,
            start_time: self.start_time,
            end_time: self.end_time,
            start_timezone_kind: self.start_timezone_kind(),
            end_timezone_kind: self.end_timezone_kind(),
            location: self.location.as_deref(),
            description: self.description.as_deref(),
            link: self.link.as_deref(),
            duration: &self.duration,
        }
        .serialize(serializer)
    }
}

impl Event {
    #[must_use]
    pub fn start_timezone_kind(&self) -> TimezoneKind {
        self.start_time.kind()
    }

    #[must_use]
    pub fn end_timezone_kind(&self) -> TimezoneKind {
        self.end_time.kind()
    }
}

/// `PT[nH][nM]` between two timestamps, floored to whole minutes.
///
/// Both values are compared as wall-clock times. A negative span renders as
/// bare `PT`.
#[must_use]
pub fn format_duration(start: &Timestamp, end: &Timestamp) -> String {
    const MS_PER_HOUR: i64 = 60 * 60 * 1000;
    const MS_PER_MINUTE: i64 = 60 * 1000;

    let millis = end
        .datetime()
        .signed_duration_since(start.datetime())
        .num_milliseconds();

    let mut duration = String::from("PT");
    if millis <= 0 {
        return duration;
    }

    let hours = millis / MS_PER_HOUR;
    let minutes = (millis % MS_PER_HOUR) / MS_PER_MINUTE;

    if hours > 0 {
        duration.push_str(&format!("{hours}H"));
    }
    if minutes > 0 {
        duration.push_str(&format!("{minutes}M"));
    }

    duration
}
