use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{
    Appointment, AppointmentStatus, FeedbackAction, FeedbackRecord, IncomingMessage,
    ValidatedAction,
};

/// Result of the guarded appointment insert.
///
/// `Conflict` surfaces a unique-constraint hit on the dedup key; the caller
/// refreshes the existing window once and either retries or suppresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Conflict,
}

/// Read access to the ingest collaborator's `messages` table.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// The last `limit` messages of a chat strictly before `before`,
    /// returned oldest-first.
    async fn recent_messages(
        &self,
        chat_id: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<IncomingMessage>>;

    /// Messages in `[since, now]` across all chats, bounded. Used by the
    /// reflection agent and the bootstrap path.
    async fn messages_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<IncomingMessage>>;

    /// Messages the pipeline has not yet run on, oldest-first.
    async fn unprocessed_messages(&self, limit: usize) -> anyhow::Result<Vec<IncomingMessage>>;

    /// Record the pipeline outcome for a message so it is never re-run.
    async fn mark_processed(&self, message_id: &str, outcome: &str) -> anyhow::Result<()>;
}

/// Owned appointment rows and their lifecycle.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Insert, guarded by the dedup lock key derived from
    /// (chat_id, title hash, date bucket, 30-minute start slot).
    async fn insert_appointment(&self, appt: &Appointment) -> anyhow::Result<InsertOutcome>;

    async fn get_appointment(&self, id: &str) -> anyhow::Result<Option<Appointment>>;

    /// Appointments of one chat whose start falls in `[from, to]`, ordered
    /// by start, capped at `limit`.
    async fn appointments_in_window(
        &self,
        chat_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Appointment>>;

    /// Apply an LLM `update` action's supplied fields to an existing row.
    async fn apply_update(&self, id: &str, action: &ValidatedAction) -> anyhow::Result<()>;

    /// Apply a structured feedback correction diff to a row.
    async fn apply_correction(
        &self,
        id: &str,
        correction: &serde_json::Value,
    ) -> anyhow::Result<()>;

    async fn set_status(&self, id: &str, status: AppointmentStatus) -> anyhow::Result<()>;

    async fn set_calendar_uid(&self, id: &str, uid: Option<&str>) -> anyhow::Result<()>;

    async fn set_pending_sync(&self, id: &str, pending: bool) -> anyhow::Result<()>;

    /// Append a diagnostic note to the reasoning column.
    async fn append_reasoning(&self, id: &str, note: &str) -> anyhow::Result<()>;

    /// Suggested rows older than `cutoff` with no user action → `skipped`.
    /// Returns the expired rows so the caller can clean up remote events.
    async fn expire_stale_suggestions(
        &self,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Appointment>>;

    /// All non-terminal appointments, for the reconcile pass.
    async fn active_appointments(&self) -> anyhow::Result<Vec<Appointment>>;

    /// Appointments created in `[since, now]`, for reflection.
    async fn appointments_since(&self, since: DateTime<Utc>)
        -> anyhow::Result<Vec<Appointment>>;
}

/// Owned feedback rows.
#[async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn insert_feedback(&self, record: &FeedbackRecord) -> anyhow::Result<()>;

    /// Latest feedback of the given kinds for one chat, newest-first,
    /// joined with the appointment title for prompt rendering.
    async fn recent_feedback(
        &self,
        chat_id: &str,
        actions: &[FeedbackAction],
        limit: usize,
    ) -> anyhow::Result<Vec<(FeedbackRecord, String)>>;

    /// Feedback across all chats in `[since, now]`, for reflection.
    async fn feedback_since(
        &self,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<(FeedbackRecord, String)>>;
}

/// Facade supertrait used for trait objects wiring the whole store through
/// the pipeline.
pub trait StateStore: MessageStore + AppointmentStore + FeedbackStore {}

impl<T: MessageStore + AppointmentStore + FeedbackStore> StateStore for T {}
