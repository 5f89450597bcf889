//! iCalendar rendering for appointment events.

use chrono::{DateTime, Days, Utc};

use crate::types::{Appointment, Relevance, ReminderSpec};

/// RFC 5545 text escaping for SUMMARY/DESCRIPTION values.
fn escape_text(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace('\n', "\\n")
}

fn format_utc(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%dT%H%M%SZ").to_string()
}

fn build_valarms(summary: &str, reminders: &[ReminderSpec]) -> String {
    reminders
        .iter()
        .map(|r| {
            let desc = if r.description.is_empty() { summary } else { &r.description };
            format!(
                "BEGIN:VALARM\r\nTRIGGER:{}\r\nACTION:DISPLAY\r\nDESCRIPTION:{}\r\nEND:VALARM",
                r.trigger,
                escape_text(desc)
            )
        })
        .collect::<Vec<_>>()
        .join("\r\n")
}

/// Render a complete VCALENDAR for one appointment.
///
/// `attendee_names` are the participants resolved to display names. The
/// reasoning and source message ids travel in the DESCRIPTION so a user
/// looking at the event can see where it came from.
pub fn build_vcalendar(appt: &Appointment, uid: &str, attendee_names: &[String]) -> String {
    let summary = if appt.relevance == Relevance::AffectsMe {
        format!("[Info] {}", appt.title)
    } else {
        appt.title.clone()
    };

    let (dtstart, dtend) = if appt.all_day {
        let date = appt.date.unwrap_or_default();
        (
            format!("DTSTART;VALUE=DATE:{}", date.format("%Y%m%d")),
            format!(
                "DTEND;VALUE=DATE:{}",
                (date + Days::new(1)).format("%Y%m%d")
            ),
        )
    } else {
        let start = appt.start_utc.unwrap_or_else(Utc::now);
        let end = appt
            .end_utc
            .unwrap_or_else(|| start + chrono::Duration::hours(1));
        (
            format!("DTSTART:{}", format_utc(start)),
            format!("DTEND:{}", format_utc(end)),
        )
    };

    let mut description = String::from("Erkannt aus Familienchat");
    if !attendee_names.is_empty() {
        description.push_str(&format!("\nTeilnehmer: {}", attendee_names.join(", ")));
    }
    if !appt.reasoning.is_empty() {
        description.push_str(&format!(
            "\nBegründung: {}",
            crate::utils::truncate_str(&appt.reasoning, 400)
        ));
    }
    if !appt.source_message_ids.is_empty() {
        description.push_str(&format!(
            "\nQuell-Nachrichten: {}",
            appt.source_message_ids.join(", ")
        ));
    }

    let attendees = attendee_names
        .iter()
        .map(|name| format!("ATTENDEE;CN={}:urn:uuid:{}", escape_text(name), uid))
        .collect::<Vec<_>>()
        .join("\r\n");

    let reminders = if appt.reminders.is_empty() {
        ReminderSpec::defaults_for(appt.category, &appt.title)
    } else {
        appt.reminders.clone()
    };
    let valarms = build_valarms(&summary, &reminders);

    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//TerminRadar//TerminRadar//DE".to_string(),
        "BEGIN:VEVENT".to_string(),
        format!("UID:{}", uid),
        dtstart,
        dtend,
        format!("SUMMARY:{}", escape_text(&summary)),
        format!("DESCRIPTION:{}", escape_text(&description)),
    ];
    if !attendees.is_empty() {
        lines.push(attendees);
    }
    if !valarms.is_empty() {
        lines.push(valarms);
    }
    lines.push("END:VEVENT".to_string());
    lines.push("END:VCALENDAR".to_string());

    lines.join("\r\n")
}
