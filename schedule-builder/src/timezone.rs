use std::str::FromStr;

use chrono::{DateTime, Offset, Utc};
use chrono_tz::Tz;
use ics::properties::{RRule, TzName};
use ics::{Daylight, Standard, TimeZone};

struct Transition {
    dtstart: &'static str,
    offset_from: &'static str,
    offset_to: &'static str,
    rrule: Option<&'static str>,
    name: Option<&'static str>,
}

struct ZoneRules {
    tzid: &'static str,
    standard: Transition,
    daylight: Option<Transition>,
}

const EU_STANDARD: &str = "FREQ=YEARLY;BYMONTH=10;BYDAY=-1SU";
const EU_DAYLIGHT: &str = "FREQ=YEARLY;BYMONTH=3;BYDAY=-1SU";
const US_STANDARD: &str = "FREQ=YEARLY;BYMONTH=11;BYDAY=1SU";
const US_DAYLIGHT: &str = "FREQ=YEARLY;BYMONTH=3;BYDAY=2SU";

const fn central_european(tzid: &'static str) -> ZoneRules {
    ZoneRules {
        tzid,
        standard: Transition {
            dtstart: "19701025T030000",
            offset_from: "+0200",
            offset_to: "+0100",
            rrule: Some(EU_STANDARD),
            name: Some("CET"),
        },
        daylight: Some(Transition {
            dtstart: "19700329T020000",
            offset_from: "+0100",
            offset_to: "+0200",
            rrule: Some(EU_DAYLIGHT),
            name: Some("CEST"),
        }),
    }
}

const fn north_american(
    tzid: &'static str,
    standard_offset: &'static str,
    daylight_offset: &'static str,
    names: (&'static str, &'static str),
) -> ZoneRules {
    ZoneRules {
        tzid,
        standard: Transition {
            dtstart: "20071104T020000",
            offset_from: daylight_offset,
            offset_to: standard_offset,
            rrule: Some(US_STANDARD),
            name: Some(names.0),
        },
        daylight: Some(Transition {
            dtstart: "20070311T020000",
            offset_from: standard_offset,
            offset_to: daylight_offset,
            rrule: Some(US_DAYLIGHT),
            name: Some(names.1),
        }),
    }
}

static KNOWN_ZONES: &[ZoneRules] = &[
    central_european("Europe/Vienna"),
    central_european("Europe/Berlin"),
    ZoneRules {
        tzid: "Europe/London",
        standard: Transition {
            dtstart: "19961027T020000",
            offset_from: "+0100",
            offset_to: "+0000",
            rrule: Some(EU_STANDARD),
            name: Some("GMT"),
        },
        daylight: Some(Transition {
            dtstart: "19960331T010000",
            offset_from: "+0000",
            offset_to: "+0100",
            rrule: Some(EU_DAYLIGHT),
            name: Some("BST"),
        }),
    },
    north_american("America/New_York", "-0500", "-0400", ("EST", "EDT")),
    north_american("America/Chicago", "-0600", "-0500", ("CST", "CDT")),
    north_american("America/Denver", "-0700", "-0600", ("MST", "MDT")),
    north_american("America/Los_Angeles", "-0800", "-0700", ("PST", "PDT")),
    ZoneRules {
        tzid: "UTC",
        standard: Transition {
            dtstart: "19700101T000000",
            offset_from: "+0000",
            offset_to: "+0000",
            rrule: None,
            name: None,
        },
        daylight: None,
    },
];

const FALLBACK_DTSTART: &str = "19700101T000000";
const ZERO_OFFSET: &str = "+0000";

/// The `VTIMEZONE` for `tzid`.
///
/// Zones outside the rule table get a single `STANDARD` block at the offset
/// they have at `now`, or `+0000` if the tz database does not know them.
#[must_use]
pub fn vtimezone(tzid: &str, now: DateTime<Utc>) -> TimeZone<'static> {
    if let Some(rules) = KNOWN_ZONES.iter().find(|rules| rules.tzid == tzid) {
        return rules.to_ics();
    }

    let offset = current_offset(tzid, now).unwrap_or_else(|| ZERO_OFFSET.to_string());
    let standard = Standard::new(FALLBACK_DTSTART.to_string(), offset.clone(), offset);
    TimeZone::standard(tzid.to_string(), standard)
}

/// Whether `tzid` names plain UTC.
#[must_use]
pub fn is_utc(tzid: &str) -> bool {
    ["UTC", "Etc/UTC", "Etc/UCT", "UCT", "Zulu", "Etc/Zulu"]
        .iter()
        .any(|name| name.eq_ignore_ascii_case(tzid))
}

fn current_offset(tzid: &str, now: DateTime<Utc>) -> Option<String> {
    let tz = Tz::from_str(tzid).ok()?;
    let seconds = now.with_timezone(&tz).offset().fix().local_minus_utc();

    let sign = if seconds < 0 { '-' } else { '+' };
    let minutes = seconds.unsigned_abs() / 60;
    Some(format!("{sign}{:02}{:02}", minutes / 60, minutes % 60))
}

impl ZoneRules {
    fn to_ics(&self) -> TimeZone<'static> {
        let standard = &self.standard;
        let mut ics_standard =
            Standard::new(standard.dtstart, standard.offset_from, standard.offset_to);
        if let Some(rrule) = standard.rrule {
            ics_standard.push(RRule::new(rrule));
        }
        if let Some(name) = standard.name {
            ics_standard.push(TzName::new(name));
        }

        let Some(daylight) = &self.daylight else {
            return TimeZone::standard(self.tzid, ics_standard);
        };

        let mut ics_daylight =
            Daylight::new(daylight.dtstart, daylight.offset_from, daylight.offset_to);
        if let Some(rrule) = daylight.rrule {
            ics_daylight.push(RRule::new(rrule));
        }
        if let Some(name) = daylight.name {
            ics_daylight.push(TzName::new(name));
        }

        let mut timezone = TimeZone::daylight(self.tzid, ics_daylight);
        timezone.add_standard(ics_standard);
        timezone
    }
}
