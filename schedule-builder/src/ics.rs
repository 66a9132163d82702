use chrono::{DateTime, Utc};
use ics::components::{Parameter, Property};
use ics::properties::{Description, DtEnd, DtStart, Location, Summary};
use ics::ICalendar;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::structs::{Event, Timestamp, TimezoneKind};
use crate::timezone::{is_utc, vtimezone};

pub const PRODUCT_ID: &str = "-//Schedule Builder//EN";
pub const CALENDAR_NAME: &str = "Selected Events";
const UID_DOMAIN: &str = "schedule-builder";

static FRACTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.\d+").unwrap());
static ICS_DATETIME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{8}T\d{6}Z?$").unwrap());

/// Renders `events` as an iCalendar document stamped with the current time.
///
/// Returns an empty string when no event can be encoded.
#[must_use]
pub fn encode(events: &[Event], timezone: &str) -> String {
    encode_at(events, timezone, Utc::now())
}

/// Like [`encode`], with `DTSTAMP` and zone offsets taken at `now`.
#[must_use]
pub fn encode_at(events: &[Event], timezone: &str, now: DateTime<Utc>) -> String {
    let timezone = match timezone.trim() {
        "" => "UTC",
        timezone => timezone,
    };
    let dtstamp = now.format("%Y%m%dT%H%M%SZ").to_string();

    let ics_events: Vec<_> = events
        .iter()
        .filter_map(|event| event.to_ics(timezone, &dtstamp))
        .collect();

    if ics_events.is_empty() {
        warn!("No valid events with required fields (title, startTime, endTime) to generate ICS");
        return String::new();
    }

    let mut icalendar = ICalendar::new("2.0", PRODUCT_ID);
    icalendar.push(Property::new("X-WR-CALNAME", CALENDAR_NAME));
    icalendar.push(Property::new("X-WR-TIMEZONE", timezone));
    icalendar.add_timezone(vtimezone(timezone, now));

    for ics_event in ics_events {
        icalendar.add_event(ics_event);
    }

    icalendar.to_string()
}

impl Event {
    /// The `VEVENT` for this event, or `None` if it cannot be encoded.
    #[must_use]
    pub fn to_ics<'a>(&'a self, timezone: &'a str, dtstamp: &str) -> Option<ics::Event<'a>> {
        if self.summary.is_empty() || self.id.is_empty() {
            warn!("Skipping event without required fields: {:?}", self.id);
            return None;
        }

        let (Some(start), Some(end)) = (
            DateProperty::new(&self.start_time, timezone),
            DateProperty::new(&self.end_time, timezone),
        ) else {
            warn!(
                "Skipping event with invalid date format: {} {}",
                self.id, self.summary
            );
            return None;
        };

        let mut ics_event = ics::Event::new(format!("{}@{UID_DOMAIN}", self.id), dtstamp.to_string());

        let mut dtstart = DtStart::new(start.value);
        let mut dtend = DtEnd::new(end.value);
        if let Some(tzid) = start.tzid {
            dtstart.add(Parameter::new("TZID", tzid));
        }
        if let Some(tzid) = end.tzid {
            dtend.add(Parameter::new("TZID", tzid));
        }
        ics_event.push(dtstart);
        ics_event.push(dtend);

        ics_event.push(Summary::new(escape_text(&self.summary)));
        ics_event.push(Location::new(escape_text(
            self.location.as_deref().unwrap_or_default(),
        )));

        let mut description = String::new();
        if let Some(link) = &self.link {
            description.push_str(link);
            description.push_str("\\n\\n");
        }
        description.push_str(&escape_text(
            self.description.as_deref().unwrap_or_default(),
        ));
        ics_event.push(Description::new(description));

        Some(ics_event)
    }
}

/// Value and optional `TZID` of a `DTSTART`/`DTEND` line.
struct DateProperty<'a> {
    value: String,
    tzid: Option<&'a str>,
}

impl<'a> DateProperty<'a> {
    fn new(timestamp: &Timestamp, timezone: &'a str) -> Option<Self> {
        let tzid = match timestamp.kind() {
            TimezoneKind::ExplicitUtc => None,
            TimezoneKind::Unknown if is_utc(timezone) => None,
            TimezoneKind::Unknown => Some(timezone),
        };

        Some(Self {
            value: ics_datetime(&timestamp.to_string(), tzid.is_none())?,
            tzid,
        })
    }
}

/// `2025-10-14T09:30:00.000Z` to `20251014T093000Z`, with the `Z` present
/// exactly when `utc` is set.
fn ics_datetime(timestamp: &str, utc: bool) -> Option<String> {
    let compact = timestamp.replace(['-', ':'], "");
    let compact = FRACTION.replace(&compact, "");
    let bare = compact.trim_end_matches('Z');

    let value = if utc {
        format!("{bare}Z")
    } else {
        bare.to_string()
    };

    ICS_DATETIME.is_match(&value).then_some(value)
}

/// Escapes a TEXT value: backslash first, then newline, comma and semicolon.
#[must_use]
pub fn escape_text(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace(',', "\\,")
        .replace(';', "\\;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 1, 8, 0, 0).unwrap()
    }

    fn event(summary: &str, start: &str, end: &str) -> Event {
        let start_time: Timestamp = start.parse().unwrap();
        let end_time: Timestamp = end.parse().unwrap();
        Event {
            id: crate::make_id(&start_time, summary, 1),
            summary: summary.into(),
            duration: crate::format_duration(&start_time, &end_time),
            start_time,
            end_time,
            location: None,
            description: None,
            link: None,
        }
    }

    fn lines(ics: &str) -> Vec<&str> {
        ics.split("\r\n").collect()
    }

    #[test]
    fn test_escape_text() {
        assert_eq!(escape_text("A,B;C\nD\\E"), "A\\,B\\;C\\nD\\\\E");
        assert_eq!(escape_text("plain"), "plain");
        assert_eq!(escape_text(""), "");
    }

    #[test]
    fn test_ics_datetime() {
        assert_eq!(
            ics_datetime("2025-10-14T09:30:00", false).as_deref(),
            Some("20251014T093000")
        );
        assert_eq!(
            ics_datetime("2025-10-14T09:30:00", true).as_deref(),
            Some("20251014T093000Z")
        );
        assert_eq!(
            ics_datetime("2025-10-14T09:30:00.123Z", false).as_deref(),
            Some("20251014T093000")
        );
        assert_eq!(ics_datetime("not a date", true), None);
    }

    #[test]
    fn test_document_layout() {
        let ics = encode_at(
            &[event("Keynote", "2025-10-14T09:30:00", "2025-10-14T10:30:00")],
            "Europe/Vienna",
            now(),
        );
        let lines = lines(&ics);

        assert_eq!(lines[0], "BEGIN:VCALENDAR");
        assert!(lines.contains(&"VERSION:2.0"));
        assert!(lines.contains(&"PRODID:-//Schedule Builder//EN"));
        assert!(lines.contains(&"X-WR-CALNAME:Selected Events"));
        assert!(lines.contains(&"X-WR-TIMEZONE:Europe/Vienna"));
        assert!(lines.contains(&"TZID:Europe/Vienna"));
        assert!(lines.contains(&"UID:2025-10-14-09:30:00-keynote-1@schedule-builder"));
        assert!(lines.contains(&"DTSTAMP:20251001T080000Z"));
        assert!(lines.contains(&"DTSTART;TZID=Europe/Vienna:20251014T093000"));
        assert!(lines.contains(&"DTEND;TZID=Europe/Vienna:20251014T103000"));
        assert!(lines.contains(&"SUMMARY:Keynote"));
        assert!(lines.contains(&"LOCATION:"));
        assert!(lines.contains(&"DESCRIPTION:"));
        assert!(ics.trim_end().ends_with("END:VCALENDAR"));

        let vtimezone = ics.find("BEGIN:VTIMEZONE").unwrap();
        let vevent = ics.find("BEGIN:VEVENT").unwrap();
        assert!(vtimezone < vevent);
        assert!(!ics.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn test_explicit_utc_is_bare() {
        let ics = encode_at(
            &[event("Call", "2025-10-14T13:30:00Z", "2025-10-14T14:00:00Z")],
            "America/New_York",
            now(),
        );
        let lines = lines(&ics);

        assert!(lines.contains(&"DTSTART:20251014T133000Z"));
        assert!(lines.contains(&"DTEND:20251014T140000Z"));
        assert!(!ics.contains("DTSTART;TZID"));
        assert!(lines.contains(&"TZID:America/New_York"));
    }

    #[test]
    fn test_utc_configured_zone_gets_z() {
        let ics = encode_at(
            &[event("Call", "2025-10-14T13:30:00", "2025-10-14T14:00:00")],
            "UTC",
            now(),
        );
        assert!(lines(&ics).contains(&"DTSTART:20251014T133000Z"));
    }

    #[test]
    fn test_mixed_provenance() {
        let ics = encode_at(
            &[event("Mixed", "2025-10-14T13:30:00Z", "2025-10-14T16:00:00")],
            "Europe/London",
            now(),
        );
        let lines = lines(&ics);
        assert!(lines.contains(&"DTSTART:20251014T133000Z"));
        assert!(lines.contains(&"DTEND;TZID=Europe/London:20251014T160000"));
    }

    #[test]
    fn test_long_summary_is_folded() {
        let summary = "a".repeat(100);
        let ics = encode_at(
            &[event(&summary, "2025-10-14T09:30:00", "2025-10-14T10:30:00")],
            "UTC",
            now(),
        );
        let lines = lines(&ics);

        let index = lines
            .iter()
            .position(|line| line.starts_with("SUMMARY:"))
            .unwrap();
        assert_eq!(lines[index].len(), 75);
        assert!(lines[index + 1].starts_with(' '));
        assert!(!lines[index + 1].starts_with("  "));
        assert_eq!(
            format!("{}{}", lines[index], &lines[index + 1][1..]),
            format!("SUMMARY:{summary}")
        );
    }

    #[test]
    fn test_short_lines_are_not_folded() {
        let summary = "b".repeat(67);
        let ics = encode_at(
            &[event(&summary, "2025-10-14T09:30:00", "2025-10-14T10:30:00")],
            "UTC",
            now(),
        );
        let line = format!("SUMMARY:{summary}");
        assert_eq!(line.len(), 75);
        assert!(lines(&ics).contains(&line.as_str()));
    }

    #[test]
    fn test_escaped_fields_and_link() {
        let mut event = event("A,B;C\nD\\E", "2025-10-14T09:30:00", "2025-10-14T10:30:00");
        event.location = Some("Room 1; Floor 2".into());
        event.description = Some("Bring laptops, chargers".into());
        event.link = Some("https://example.org/s/1".into());

        let ics = encode_at(&[event], "UTC", now());
        let lines = lines(&ics);

        assert!(lines.contains(&"SUMMARY:A\\,B\\;C\\nD\\\\E"));
        assert!(lines.contains(&"LOCATION:Room 1\\; Floor 2"));
        assert!(lines.contains(&"DESCRIPTION:https://example.org/s/1\\n\\nBring laptops\\, chargers"));
    }

    #[test]
    fn test_events_keep_input_order_and_share_dtstamp() {
        let ics = encode_at(
            &[
                event("Second", "2025-10-14T11:00:00", "2025-10-14T12:00:00"),
                event("First", "2025-10-14T09:00:00", "2025-10-14T10:00:00"),
            ],
            "UTC",
            now(),
        );

        assert!(ics.find("SUMMARY:Second").unwrap() < ics.find("SUMMARY:First").unwrap());
        assert_eq!(ics.matches("DTSTAMP:20251001T080000Z").count(), 2);
    }

    #[test]
    fn test_invalid_events_are_dropped() {
        let mut untitled = event("x", "2025-10-14T09:30:00", "2025-10-14T10:30:00");
        untitled.summary.clear();

        assert_eq!(encode_at(&[untitled.clone()], "UTC", now()), "");
        assert_eq!(encode_at(&[], "UTC", now()), "");

        let ics = encode_at(
            &[untitled, event("Kept", "2025-10-14T09:30:00", "2025-10-14T10:30:00")],
            "UTC",
            now(),
        );
        assert_eq!(ics.matches("BEGIN:VEVENT").count(), 1);
    }

    #[test]
    fn test_empty_timezone_defaults_to_utc() {
        let ics = encode_at(
            &[event("Call", "2025-10-14T13:30:00", "2025-10-14T14:00:00")],
            "",
            now(),
        );
        assert!(lines(&ics).contains(&"X-WR-TIMEZONE:UTC"));
        assert!(lines(&ics).contains(&"DTSTART:20251014T133000Z"));
    }
}
