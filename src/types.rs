//! Shared domain types for the extraction pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A chat message as written by the ingest collaborator. Read-only for us.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub message_id: String,
    pub chat_id: String,
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Appointment,
    Task,
    Milestone,
    Reminder,
}

impl Default for Category {
    fn default() -> Self {
        Category::Appointment
    }
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Appointment => "appointment",
            Category::Task => "task",
            Category::Milestone => "milestone",
            Category::Reminder => "reminder",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "task" => Category::Task,
            "milestone" => Category::Milestone,
            "reminder" => Category::Reminder,
            _ => Category::Appointment,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relevance {
    ForMe,
    Shared,
    PartnerOnly,
    AffectsMe,
}

impl Default for Relevance {
    fn default() -> Self {
        Relevance::Shared
    }
}

impl Relevance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relevance::ForMe => "for_me",
            Relevance::Shared => "shared",
            Relevance::PartnerOnly => "partner_only",
            Relevance::AffectsMe => "affects_me",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "for_me" => Relevance::ForMe,
            "partner_only" => Relevance::PartnerOnly,
            "affects_me" => Relevance::AffectsMe,
            _ => Relevance::Shared,
        }
    }
}

/// Appointment lifecycle.
///
/// `auto` and `suggested` are the two entry states, routed by confidence.
/// `rejected`, `cancelled` and `skipped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentStatus {
    Auto,
    Suggested,
    Confirmed,
    Rejected,
    Cancelled,
    Skipped,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Auto => "auto",
            AppointmentStatus::Suggested => "suggested",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Rejected => "rejected",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "auto" => AppointmentStatus::Auto,
            "confirmed" => AppointmentStatus::Confirmed,
            "rejected" => AppointmentStatus::Rejected,
            "cancelled" => AppointmentStatus::Cancelled,
            "skipped" => AppointmentStatus::Skipped,
            _ => AppointmentStatus::Suggested,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Rejected | AppointmentStatus::Cancelled | AppointmentStatus::Skipped
        )
    }

    /// State transition driven by user feedback. `None` means the state
    /// does not change (edited keeps its state by design).
    pub fn on_feedback(&self, action: FeedbackAction) -> Option<AppointmentStatus> {
        match action {
            FeedbackAction::Confirmed
                if matches!(self, AppointmentStatus::Auto | AppointmentStatus::Suggested) =>
            {
                Some(AppointmentStatus::Confirmed)
            }
            FeedbackAction::Rejected if !self.is_terminal() => Some(AppointmentStatus::Rejected),
            FeedbackAction::Skipped if *self == AppointmentStatus::Suggested => {
                Some(AppointmentStatus::Skipped)
            }
            _ => None,
        }
    }
}

/// A reminder the calendar event should carry, in iCal TRIGGER syntax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderSpec {
    pub trigger: String,
    #[serde(default)]
    pub description: String,
}

impl ReminderSpec {
    pub fn new(trigger: &str, description: &str) -> Self {
        Self {
            trigger: trigger.to_string(),
            description: description.to_string(),
        }
    }

    /// Category defaults when the model supplies no reminders.
    pub fn defaults_for(category: Category, title: &str) -> Vec<ReminderSpec> {
        match category {
            Category::Appointment | Category::Milestone => vec![
                ReminderSpec::new("-P5D", title),
                ReminderSpec::new("-P2D", title),
                ReminderSpec::new("-P1D", title),
                ReminderSpec::new("-PT2H", title),
            ],
            Category::Task | Category::Reminder => vec![
                ReminderSpec::new("-P1D", title),
                ReminderSpec::new("-PT1H", title),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Update,
    Cancel,
}

impl Default for ActionKind {
    fn default() -> Self {
        ActionKind::Create
    }
}

/// One action as emitted by the LLM, after parsing but before validation.
/// Datetime fields are still raw strings here; the validator normalizes them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentAction {
    #[serde(default)]
    pub action: ActionKind,
    #[serde(default)]
    pub updates_termin_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub datetime: Option<String>,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default)]
    pub end_datetime: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub relevance: Relevance,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reminders: Vec<ReminderSpec>,
    #[serde(default)]
    pub reasoning: String,
    /// Set when the action came from the natural-language fallback parser.
    #[serde(skip)]
    pub synthesized: bool,
}

/// An action that survived the validator: times resolved to UTC, invariants
/// enforced (exactly one of `start_utc` / `date` per `all_day`).
#[derive(Debug, Clone)]
pub struct ValidatedAction {
    pub action: ActionKind,
    pub updates_termin_id: Option<String>,
    pub title: String,
    pub start_utc: Option<DateTime<Utc>>,
    pub date: Option<NaiveDate>,
    pub all_day: bool,
    pub end_utc: Option<DateTime<Utc>>,
    pub participants: Vec<String>,
    pub category: Category,
    pub relevance: Relevance,
    pub confidence: f64,
    pub reminders: Vec<ReminderSpec>,
    pub reasoning: String,
}

/// A persisted appointment row. Owned by the AppointmentStore.
#[derive(Debug, Clone)]
pub struct Appointment {
    pub id: String,
    pub chat_id: String,
    pub title: String,
    pub start_utc: Option<DateTime<Utc>>,
    pub date: Option<NaiveDate>,
    pub all_day: bool,
    pub end_utc: Option<DateTime<Utc>>,
    pub participants: Vec<String>,
    pub category: Category,
    pub relevance: Relevance,
    pub status: AppointmentStatus,
    pub confidence: f64,
    pub source_message_ids: Vec<String>,
    pub calendar_uid: Option<String>,
    pub reminders: Vec<ReminderSpec>,
    pub reasoning: String,
    /// Set when a calendar write/delete failed and reconcile should repair it.
    pub pending_sync: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackAction {
    Confirmed,
    Rejected,
    Edited,
    Skipped,
}

impl FeedbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackAction::Confirmed => "confirmed",
            FeedbackAction::Rejected => "rejected",
            FeedbackAction::Edited => "edited",
            FeedbackAction::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmed" => Some(FeedbackAction::Confirmed),
            "rejected" => Some(FeedbackAction::Rejected),
            "edited" => Some(FeedbackAction::Edited),
            "skipped" => Some(FeedbackAction::Skipped),
            _ => None,
        }
    }
}

/// A user correction on an appointment.
#[derive(Debug, Clone)]
pub struct FeedbackRecord {
    pub id: String,
    pub appointment_id: String,
    pub action: FeedbackAction,
    /// Structured diff: {"field": new_value, ...}
    pub correction: Option<serde_json::Value>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Top-level result of running one message through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    /// DateGate said no, or the LLM found nothing.
    NoOp,
    /// N appointments were created or updated.
    Extracted(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            AppointmentStatus::Auto,
            AppointmentStatus::Suggested,
            AppointmentStatus::Confirmed,
            AppointmentStatus::Rejected,
            AppointmentStatus::Cancelled,
            AppointmentStatus::Skipped,
        ] {
            assert_eq!(AppointmentStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(AppointmentStatus::Rejected.is_terminal());
        assert!(AppointmentStatus::Cancelled.is_terminal());
        assert!(AppointmentStatus::Skipped.is_terminal());
        assert!(!AppointmentStatus::Auto.is_terminal());
        assert!(!AppointmentStatus::Suggested.is_terminal());
        assert!(!AppointmentStatus::Confirmed.is_terminal());
    }

    #[test]
    fn test_feedback_transitions() {
        assert_eq!(
            AppointmentStatus::Auto.on_feedback(FeedbackAction::Confirmed),
            Some(AppointmentStatus::Confirmed)
        );
        assert_eq!(
            AppointmentStatus::Suggested.on_feedback(FeedbackAction::Confirmed),
            Some(AppointmentStatus::Confirmed)
        );
        assert_eq!(
            AppointmentStatus::Suggested.on_feedback(FeedbackAction::Rejected),
            Some(AppointmentStatus::Rejected)
        );
        // Edited never changes state.
        assert_eq!(AppointmentStatus::Auto.on_feedback(FeedbackAction::Edited), None);
        assert_eq!(AppointmentStatus::Confirmed.on_feedback(FeedbackAction::Edited), None);
        // Terminal states absorb everything.
        assert_eq!(AppointmentStatus::Rejected.on_feedback(FeedbackAction::Confirmed), None);
        assert_eq!(AppointmentStatus::Cancelled.on_feedback(FeedbackAction::Rejected), None);
    }

    #[test]
    fn test_skipped_only_from_suggested() {
        assert_eq!(
            AppointmentStatus::Suggested.on_feedback(FeedbackAction::Skipped),
            Some(AppointmentStatus::Skipped)
        );
        assert_eq!(AppointmentStatus::Auto.on_feedback(FeedbackAction::Skipped), None);
        assert_eq!(AppointmentStatus::Confirmed.on_feedback(FeedbackAction::Skipped), None);
    }

    #[test]
    fn test_category_parse_unknown_defaults_to_appointment() {
        assert_eq!(Category::parse("appointment"), Category::Appointment);
        assert_eq!(Category::parse("birthday party"), Category::Appointment);
        assert_eq!(Category::parse("task"), Category::Task);
    }

    #[test]
    fn test_default_reminders_per_category() {
        let appt = ReminderSpec::defaults_for(Category::Appointment, "Arzt");
        assert_eq!(appt.len(), 4);
        assert_eq!(appt[0].trigger, "-P5D");
        assert_eq!(appt[3].trigger, "-PT2H");

        let task = ReminderSpec::defaults_for(Category::Task, "Packen");
        assert_eq!(task.len(), 2);
        assert_eq!(task[0].trigger, "-P1D");
        assert_eq!(task[1].trigger, "-PT1H");
    }

    #[test]
    fn test_action_deserializes_from_llm_json() {
        let json = r#"{
            "action": "create",
            "title": "Enno Training",
            "datetime": "2026-03-03T17:00",
            "all_day": false,
            "participants": ["Enno"],
            "category": "appointment",
            "relevance": "shared",
            "confidence": 0.9,
            "reasoning": "Training am Dienstag"
        }"#;
        let action: AppointmentAction = serde_json::from_str(json).unwrap();
        assert_eq!(action.action, ActionKind::Create);
        assert_eq!(action.title, "Enno Training");
        assert_eq!(action.datetime.as_deref(), Some("2026-03-03T17:00"));
        assert!(!action.synthesized);
    }

    #[test]
    fn test_action_tolerates_missing_fields() {
        let action: AppointmentAction = serde_json::from_str(r#"{"title": "X"}"#).unwrap();
        assert_eq!(action.action, ActionKind::Create);
        assert!(action.confidence.is_none());
        assert!(action.datetime.is_none());
    }
}
