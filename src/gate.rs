//! Pre-filter deciding whether a message is worth an LLM call.
//!
//! The gate is deliberately generous: a false positive costs one extraction
//! call, a false negative silently loses an appointment. It never errors:
//! the regex families are compiled once at first use and are program
//! constants.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::IncomingMessage;

static EXPLICIT_DATE: Lazy<Regex> = Lazy::new(|| {
    // 14.02. (trailing dot required to distinguish from decimals)
    Regex::new(r"\d{1,2}\.\d{1,2}\.").unwrap()
});

static CLOCK_TIME: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{1,2}:\d{2}").unwrap());

static SPOKEN_TIME: Lazy<Regex> = Lazy::new(|| {
    // "um 10", "um 14 uhr", "ab 16 Uhr", "bis 18 uhr"
    Regex::new(r"(?i)\b(um|ab|bis)\s+\d{1,2}\s*(uhr)?\b").unwrap()
});

static WEEKDAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(montag|dienstag|mittwoch|donnerstag|freitag|samstag|sonntag)\b").unwrap()
});

static RELATIVE_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(heute|morgen|übermorgen|nächste[nr]?|kommende[nr]?|übernächste[nr]?)\b")
        .unwrap()
});

static MONTH_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(januar|februar|märz|april|mai|juni|juli|august|september|oktober|november|dezember)\b",
    )
    .unwrap()
});

static EVENT_NOUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(termin|treffen|verabredung|training|wettkampf|turnier|meisterschaft|geburtstag|feier|abholung|ankunft|abholen|hort|schule|kita|arzt|zahnarzt|kinderarzt|übergabe|ferien|urlaub)",
    )
    .unwrap()
});

static PREP_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(mitbring|kaufen|einkauf|besorgen|pack|vorbereiten|backen)").unwrap()
});

static BARE_TIME_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*\d{1,2}([:.]\d{2})?\s*(uhr)?\s*$").unwrap());

static BARE_DATE_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d{1,2}\.\d{1,2}\.?(\d{2,4})?\s*$").unwrap());

static QUESTION_CUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(wann genau|welche uhrzeit|wann)").unwrap());

/// True when the text alone carries date/time/event signals.
fn text_has_signal(text: &str) -> bool {
    EXPLICIT_DATE.is_match(text)
        || CLOCK_TIME.is_match(text)
        || SPOKEN_TIME.is_match(text)
        || WEEKDAY.is_match(text)
        || RELATIVE_PHRASE.is_match(text)
        || MONTH_NAME.is_match(text)
        || EVENT_NOUN.is_match(text)
        || PREP_CUE.is_match(text)
}

/// True when a preceding message reads as an open scheduling question.
fn window_has_question_cue(window: &[IncomingMessage]) -> bool {
    window.iter().rev().any(|m| {
        let t = m.text.trim();
        t.ends_with('?') && QUESTION_CUE.is_match(t)
    })
}

/// Decide whether `message` should go through extraction, given the
/// preceding conversation window (oldest-first).
pub fn should_extract(message: &IncomingMessage, window: &[IncomingMessage]) -> bool {
    let text = message.text.trim();
    if text.is_empty() {
        return false;
    }

    // A bare time or bare date is only meaningful as an answer: "13:45"
    // replying to "Wann morgen?". The window decides.
    if BARE_TIME_ONLY.is_match(text) || BARE_DATE_ONLY.is_match(text) {
        return window_has_question_cue(window);
    }

    // Too short to carry an appointment on its own ("ok", "ja gerne").
    if text.chars().count() < 10 {
        return false;
    }

    text_has_signal(text)
}
