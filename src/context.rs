//! Multi-layer context assembly for one extraction.
//!
//! Pulls the conversation window, the existing-appointments window, detected
//! person profiles, recalled memory and recent feedback examples together
//! into a `PromptContext`. The I/O-bound layers run concurrently, each with
//! its own timeout, so a slow store degrades the context instead of the
//! pipeline.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::config::{ExtractionConfig, FamilyConfig};
use crate::memory::{MemoryClient, MemoryContext};
use crate::persons::PersonStore;
use crate::traits::store_prelude::*;
use crate::types::{Appointment, FeedbackAction, IncomingMessage};

const DB_TIMEOUT: Duration = Duration::from_millis(500);

pub const WEEKDAYS_DE: [&str; 7] = [
    "Montag", "Dienstag", "Mittwoch", "Donnerstag", "Freitag", "Samstag", "Sonntag",
];

/// Everything the prompt builder needs, already windowed and rendered
/// where rendering is cheap.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub user_name: String,
    pub partner_name: String,
    pub children_names: Vec<String>,
    /// ISO date in the user's zone.
    pub today: NaiveDate,
    pub today_weekday: String,
    /// Relative phrase -> ISO date, shipped verbatim into the prompt so the
    /// model never does date arithmetic.
    pub calendar_lookup: Vec<(String, NaiveDate)>,
    /// Rendered "[YYYY-MM-DD HH:MM] sender: text" lines, oldest-first,
    /// excluding the message being analyzed.
    pub recent_messages: Vec<String>,
    pub existing_appointments: Vec<Appointment>,
    /// "[id] title @ local-time (status)" lines for the prompt.
    pub existing_rendered: Vec<String>,
    pub memory: MemoryContext,
    /// Rendered feedback example lines.
    pub feedback_examples: Vec<String>,
    /// Rendered profile fragments for the detected persons.
    pub persons: Vec<String>,
    /// Raw window texts, for the validator's cross-message rules.
    pub window_texts: Vec<String>,
    /// Names of detected persons, for relevance inference.
    pub detected_person_names: Vec<String>,
}

pub struct ContextAssembler {
    store: Arc<dyn StateStore>,
    persons: Arc<PersonStore>,
    memory: Option<Arc<MemoryClient>>,
    extraction: ExtractionConfig,
    family: FamilyConfig,
    tz: Tz,
}

impl ContextAssembler {
    pub fn new(
        store: Arc<dyn StateStore>,
        persons: Arc<PersonStore>,
        memory: Option<Arc<MemoryClient>>,
        extraction: ExtractionConfig,
        family: FamilyConfig,
        tz: Tz,
    ) -> Self {
        Self {
            store,
            persons,
            memory,
            extraction,
            family,
            tz,
        }
    }

    pub async fn assemble(&self, message: &IncomingMessage) -> PromptContext {
        let today = message.timestamp.with_timezone(&self.tz).date_naive();
        let window_size = self.extraction.conversation_window_size;

        // Existing appointments: [today - 7d, today - 7d + window_days].
        let from = utc_floor(today - Days::new(7), self.tz);
        let to = utc_floor(
            today - Days::new(7) + Days::new(self.extraction.existing_appointments_window_days as u64),
            self.tz,
        );

        // I/O layers, concurrently, individually bounded.
        let messages_fut = tokio::time::timeout(
            DB_TIMEOUT,
            self.store
                .recent_messages(&message.chat_id, message.timestamp, window_size),
        );
        let appointments_fut = tokio::time::timeout(
            DB_TIMEOUT,
            self.store.appointments_in_window(
                &message.chat_id,
                from,
                to,
                self.extraction.max_existing,
            ),
        );
        let feedback_fut = tokio::time::timeout(
            DB_TIMEOUT,
            self.store.recent_feedback(
                &message.chat_id,
                &[FeedbackAction::Rejected, FeedbackAction::Edited],
                self.extraction.feedback_examples,
            ),
        );
        let memory_fut = async {
            match &self.memory {
                // recall() carries its own timeout and never raises.
                Some(client) => {
                    let query = format!("Termine / Familienkontext: {}", message.text);
                    client.recall(&query, &message.chat_id, 10).await
                }
                None => MemoryContext::empty(),
            }
        };

        let (messages, appointments, feedback, memory) =
            tokio::join!(messages_fut, appointments_fut, feedback_fut, memory_fut);

        let window = match messages {
            Ok(Ok(m)) => m,
            Ok(Err(e)) => {
                warn!("conversation window load failed: {}", e);
                Vec::new()
            }
            Err(_) => {
                warn!("conversation window load timed out");
                Vec::new()
            }
        };
        let existing_appointments = match appointments {
            Ok(Ok(a)) => a,
            _ => {
                warn!("existing-appointments window unavailable");
                Vec::new()
            }
        };
        let feedback_rows = match feedback {
            Ok(Ok(f)) => f,
            _ => Vec::new(),
        };

        let window_texts: Vec<String> = window.iter().map(|m| m.text.clone()).collect();
        let detected = self.persons.detect(&message.text, &window_texts);

        PromptContext {
            user_name: self.family.user_name.clone(),
            partner_name: self.family.partner_name.clone(),
            children_names: self.family.children_names.clone(),
            today,
            today_weekday: WEEKDAYS_DE[today.weekday().num_days_from_monday() as usize].to_string(),
            calendar_lookup: build_calendar_lookup(today),
            recent_messages: window.iter().map(|m| self.render_message(m)).collect(),
            existing_rendered: existing_appointments
                .iter()
                .map(|a| self.render_appointment(a))
                .collect(),
            existing_appointments,
            memory,
            feedback_examples: feedback_rows
                .iter()
                .map(|(record, title)| render_feedback_example(record, title))
                .collect(),
            persons: detected.iter().map(|p| p.render_prompt_fragment()).collect(),
            detected_person_names: detected.iter().map(|p| p.name.clone()).collect(),
            window_texts,
        }
    }

    fn render_message(&self, message: &IncomingMessage) -> String {
        format!(
            "[{}] {}: {}",
            message.timestamp.with_timezone(&self.tz).format("%Y-%m-%d %H:%M"),
            message.sender,
            message.text
        )
    }

    fn render_appointment(&self, appt: &Appointment) -> String {
        let when = match (appt.start_utc, appt.date) {
            (Some(dt), _) => dt
                .with_timezone(&self.tz)
                .format("%Y-%m-%dT%H:%M")
                .to_string(),
            (None, Some(d)) => d.to_string(),
            (None, None) => "?".to_string(),
        };
        format!("[{}] {} @ {} ({})", appt.id, appt.title, when, appt.status.as_str())
    }
}

fn utc_floor(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_local_timezone(tz)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| DateTime::<Utc>::from_naive_utc_and_offset(
            date.and_hms_opt(0, 0, 0).unwrap_or_default(),
            Utc,
        ))
}

fn render_feedback_example(record: &crate::types::FeedbackRecord, title: &str) -> String {
    match record.action {
        FeedbackAction::Rejected => format!(
            "\"{}\" wurde ABGELEHNT: {}",
            title,
            record.reason.as_deref().unwrap_or("kein Grund angegeben")
        ),
        FeedbackAction::Edited => {
            let changes = record
                .correction
                .as_ref()
                .and_then(|c| c.as_object())
                .map(|obj| {
                    obj.iter()
                        .map(|(k, v)| format!("{}: {}", k, v))
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            format!("\"{}\" wurde KORRIGIERT: {}", title, changes)
        }
        _ => format!("\"{}\" ({})", title, record.action.as_str()),
    }
}

/// Relative phrase -> absolute date. Bare and "kommende" weekdays are the
/// next occurrence (1-7 days out); "nächste" adds a week, "übernächste"
/// two, so the table spans today..today+21d. The "übernächste" phrases
/// cannot be expressed inside a 14-day horizon; the full phrase set wins
/// over the shorter bound so the model never falls back to its own date
/// arithmetic.
pub fn build_calendar_lookup(today: NaiveDate) -> Vec<(String, NaiveDate)> {
    let mut table = vec![
        ("heute".to_string(), today),
        ("morgen".to_string(), today + Days::new(1)),
        ("übermorgen".to_string(), today + Days::new(2)),
    ];

    for (idx, name) in WEEKDAYS_DE.iter().enumerate() {
        let today_idx = today.weekday().num_days_from_monday() as usize;
        // Next occurrence, 1..=7 days ahead (never today itself).
        let ahead = ((idx + 7) - today_idx - 1) % 7 + 1;
        let next = today + Days::new(ahead as u64);
        table.push((name.to_string(), next));
        table.push((format!("kommenden {}", name), next));
        table.push((format!("nächsten {}", name), next + Days::new(7)));
        table.push((format!("übernächsten {}", name), next + Days::new(14)));
    }

    table
}
