//! Resilient parsing of model output.
//!
//! Strategies are tried in order until one yields a usable reply:
//! whole-response JSON, first balanced object, first fenced code block,
//! and finally a natural-language salvage pass that synthesizes a single
//! low-confidence action from time + event signals.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::dates::{parse_when, ParsedWhen};
use crate::types::AppointmentAction;

/// Confidence assigned to salvaged actions; the validator additionally
/// caps any synthesized action at 0.4.
const FALLBACK_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone, Default)]
pub struct ParsedReply {
    pub actions: Vec<AppointmentAction>,
    pub reasoning: String,
}

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").unwrap());

static CLOCK_HIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{1,2}):(\d{2})\b").unwrap());

static SPOKEN_HOUR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:um|ab)\s+(\d{1,2})\s*uhr\b").unwrap());

static DATE_HIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{1,2})\.(\d{1,2})\.").unwrap());

static EVENT_NOUN_HIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(Termin|Training|Treffen|Wettkampf|Turnier|Geburtstag|Feier|Abholung|Ankunft|Schule|Hort|Kita|Arzt|Zahnarzt)\b",
    )
    .unwrap()
});

/// Parse a raw model response into actions. Returns `None` only when every
/// strategy failed; the cascade then advances to the next provider.
pub fn parse_llm_reply(raw: &str, today: NaiveDate) -> Option<ParsedReply> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    // 1. The whole response is JSON.
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(reply) = reply_from_value(&value) {
            return Some(reply);
        }
    }

    // 2. First balanced {...} substring.
    if let Some(candidate) = first_balanced_object(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            if let Some(reply) = reply_from_value(&value) {
                return Some(reply);
            }
        }
    }

    // 3. First fenced code block.
    if let Some(caps) = FENCED_BLOCK.captures(trimmed) {
        let inner = caps[1].trim();
        if let Ok(value) = serde_json::from_str::<Value>(inner) {
            if let Some(reply) = reply_from_value(&value) {
                return Some(reply);
            }
        }
    }

    // 4. Natural-language salvage.
    salvage_from_text(trimmed, today)
}

/// Accept either `{actions: [...], reasoning}` or a bare action array.
fn reply_from_value(value: &Value) -> Option<ParsedReply> {
    let (items, reasoning) = match value {
        Value::Object(obj) => {
            let actions = obj.get("actions")?.as_array()?;
            let reasoning = obj
                .get("reasoning")
                .and_then(|r| r.as_str())
                .unwrap_or_default()
                .to_string();
            (actions, reasoning)
        }
        Value::Array(items) => (items, String::new()),
        _ => return None,
    };

    // Individually deserialized so one malformed item doesn't void the rest.
    let actions: Vec<AppointmentAction> = items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(action) => Some(action),
            Err(e) => {
                debug!("dropping malformed action item: {}", e);
                None
            }
        })
        .collect();

    Some(ParsedReply { actions, reasoning })
}

/// Find the first balanced top-level `{...}` substring, string-aware.
/// Also used by the reflection agent's JSON recovery.
pub(crate) fn first_balanced_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Build one low-confidence action when the response has time/date hits and
/// an event noun but no parseable JSON.
fn salvage_from_text(text: &str, today: NaiveDate) -> Option<ParsedReply> {
    let noun = EVENT_NOUN_HIT.captures(text)?.get(1)?.as_str().to_string();

    let time = CLOCK_HIT
        .captures(text)
        .map(|c| (c[1].parse::<u32>().unwrap_or(0), c[2].parse::<u32>().unwrap_or(0)))
        .or_else(|| SPOKEN_HOUR.captures(text).map(|c| (c[1].parse::<u32>().unwrap_or(0), 0)));

    let date = DATE_HIT.captures(text).and_then(|c| {
        match parse_when(&format!("{}.{}.", &c[1], &c[2]), today) {
            Some(ParsedWhen::Date(date)) => Some(date),
            _ => None,
        }
    });

    if time.is_none() && date.is_none() {
        return None;
    }

    let (datetime, all_day) = match (date, time) {
        (Some(d), Some((h, min))) => (format!("{}T{:02}:{:02}", d, h, min), false),
        (None, Some((h, min))) => (format!("{}T{:02}:{:02}", today, h, min), false),
        (Some(d), None) => (d.to_string(), true),
        (None, None) => unreachable!(),
    };

    let action = AppointmentAction {
        title: noun,
        datetime: Some(datetime),
        all_day,
        confidence: Some(FALLBACK_CONFIDENCE),
        reasoning: "aus Zeit- und Ereignis-Signalen der Rohantwort rekonstruiert".to_string(),
        synthesized: true,
        ..Default::default()
    };

    Some(ParsedReply {
        actions: vec![action],
        reasoning: String::new(),
    })
}
