//! iCalendar (RFC 5545) feed writer.
//!
//! Produces `text/calendar` documents for shift subscriptions and exports.
//! Timed events are written as floating local times and the calendar carries
//! `X-WR-TIMEZONE`, which subscribing clients use to place them.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::config::{IcalConfig, ShiftHours};
use crate::models::ShiftType;

/// Maximum octets per content line, excluding the CRLF.
const MAX_LINE_OCTETS: usize = 75;

const PRODID: &str = "-//Schichtplan//Shift Calendar//DE";

/// Start or end of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTime {
    /// Local wall-clock time without zone
    Floating(NaiveDateTime),
    /// Whole day; as `DTEND` this is exclusive
    AllDay(NaiveDate),
}

impl EventTime {
    fn property(&self, name: &str) -> String {
        match self {
            EventTime::Floating(dt) => format!("{}:{}", name, dt.format("%Y%m%dT%H%M%S")),
            EventTime::AllDay(d) => format!("{};VALUE=DATE:{}", name, d.format("%Y%m%d")),
        }
    }
}

/// A single `VEVENT`.
#[derive(Debug, Clone, PartialEq)]
pub struct IcalEvent {
    pub uid: String,
    pub summary: String,
    pub description: Option<String>,
    pub categories: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub last_modified: Option<DateTime<Utc>>,
    /// Whether the event blocks time (`TRANSP:OPAQUE`)
    pub busy: bool,
}

impl IcalEvent {
    /// Event for one of the user's shift assignments.
    #[allow(clippy::too_many_arguments)]
    pub fn shift(
        shift_id: Uuid,
        date: NaiveDate,
        shift_type: ShiftType,
        hours: ShiftHours,
        partner: Option<&str>,
        note: Option<&str>,
        updated_at: Option<DateTime<Utc>>,
        uid_domain: &str,
    ) -> Self {
        let mut description = Vec::new();
        if let Some(partner) = partner {
            description.push(format!("Mit: {}", partner));
        }
        if let Some(note) = note.filter(|n| !n.trim().is_empty()) {
            description.push(note.to_string());
        }

        Self {
            uid: format!("shift-{}-{}@{}", shift_id, shift_type, uid_domain),
            summary: format!("Schicht {}", shift_type),
            description: (!description.is_empty()).then(|| description.join("\n")),
            categories: Some("Schicht".to_string()),
            start: EventTime::Floating(date.and_time(hours.start)),
            end: EventTime::Floating(date.and_time(hours.end)),
            last_modified: updated_at,
            busy: true,
        }
    }

    /// All-day event spanning an absence, `end` inclusive.
    pub fn absence(
        absence_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
        note: Option<&str>,
        uid_domain: &str,
    ) -> Self {
        Self {
            uid: format!("absence-{}@{}", absence_id, uid_domain),
            summary: "Abwesend".to_string(),
            description: note.filter(|n| !n.trim().is_empty()).map(str::to_string),
            categories: Some("Abwesenheit".to_string()),
            start: EventTime::AllDay(start),
            end: EventTime::AllDay(end + Duration::days(1)),
            last_modified: None,
            busy: false,
        }
    }

    /// Schreibdienst duty; without times it becomes an all-day event.
    pub fn schreibdienst(
        event_id: Uuid,
        date: NaiveDate,
        times: Option<(chrono::NaiveTime, chrono::NaiveTime)>,
        title: Option<&str>,
        note: Option<&str>,
        updated_at: Option<DateTime<Utc>>,
        uid_domain: &str,
    ) -> Self {
        let (start, end) = match times {
            Some((start, end)) => (
                EventTime::Floating(date.and_time(start)),
                EventTime::Floating(date.and_time(end)),
            ),
            None => (
                EventTime::AllDay(date),
                EventTime::AllDay(date + Duration::days(1)),
            ),
        };
        let summary = match title.filter(|t| !t.trim().is_empty()) {
            Some(title) => format!("Schreibdienst: {}", title),
            None => "Schreibdienst".to_string(),
        };

        Self {
            uid: format!("schreibdienst-{}@{}", event_id, uid_domain),
            summary,
            description: note.filter(|n| !n.trim().is_empty()).map(str::to_string),
            categories: Some("Schreibdienst".to_string()),
            start,
            end,
            last_modified: updated_at,
            busy: true,
        }
    }

    fn write(&self, out: &mut String, dtstamp: DateTime<Utc>) {
        push_line(out, "BEGIN:VEVENT");
        push_line(out, &format!("UID:{}", escape_text(&self.uid)));
        push_line(out, &format!("DTSTAMP:{}", format_utc(dtstamp)));
        push_line(out, &self.start.property("DTSTART"));
        push_line(out, &self.end.property("DTEND"));
        push_line(out, &format!("SUMMARY:{}", escape_text(&self.summary)));
        if let Some(description) = &self.description {
            push_line(out, &format!("DESCRIPTION:{}", escape_text(description)));
        }
        if let Some(categories) = &self.categories {
            push_line(out, &format!("CATEGORIES:{}", escape_text(categories)));
        }
        if let Some(modified) = self.last_modified {
            push_line(out, &format!("LAST-MODIFIED:{}", format_utc(modified)));
        }
        push_line(out, if self.busy { "TRANSP:OPAQUE" } else { "TRANSP:TRANSPARENT" });
        push_line(out, "END:VEVENT");
    }
}

/// A `VCALENDAR` document.
#[derive(Debug, Clone)]
pub struct IcalCalendar {
    pub name: String,
    pub timezone: String,
    pub events: Vec<IcalEvent>,
}

impl IcalCalendar {
    pub fn new(config: &IcalConfig, owner: Option<&str>) -> Self {
        let name = match owner {
            Some(owner) => format!("{} ({})", config.calendar_name, owner),
            None => config.calendar_name.clone(),
        };
        Self {
            name,
            timezone: config.timezone.clone(),
            events: Vec::new(),
        }
    }

    pub fn push(&mut self, event: IcalEvent) {
        self.events.push(event);
    }

    /// Serialize with CRLF line endings and folded lines.
    pub fn render(&self, dtstamp: DateTime<Utc>) -> String {
        let mut out = String::with_capacity(256 + self.events.len() * 320);
        push_line(&mut out, "BEGIN:VCALENDAR");
        push_line(&mut out, "VERSION:2.0");
        push_line(&mut out, &format!("PRODID:{}", PRODID));
        push_line(&mut out, "CALSCALE:GREGORIAN");
        push_line(&mut out, "METHOD:PUBLISH");
        push_line(&mut out, &format!("X-WR-CALNAME:{}", escape_text(&self.name)));
        push_line(&mut out, &format!("X-WR-TIMEZONE:{}", self.timezone));
        push_line(&mut out, "REFRESH-INTERVAL;VALUE=DURATION:PT1H");
        push_line(&mut out, "X-PUBLISHED-TTL:PT1H");
        for event in &self.events {
            event.write(&mut out, dtstamp);
        }
        push_line(&mut out, "END:VCALENDAR");
        out
    }
}

fn format_utc(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Escape a TEXT value.
pub fn escape_text(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            ';' => escaped.push_str("\\;"),
            ',' => escaped.push_str("\\,"),
            '\r' => {
                if chars.peek() != Some(&'\n') {
                    escaped.push_str("\\n");
                }
            }
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Append a content line, folding after 75 octets without splitting a character.
fn push_line(out: &mut String, line: &str) {
    let mut width = 0;
    for ch in line.chars() {
        let len = ch.len_utf8();
        if width + len > MAX_LINE_OCTETS {
            out.push_str("\r\n ");
            width = 1;
        }
        out.push(ch);
        width += len;
    }
    out.push_str("\r\n");
}
