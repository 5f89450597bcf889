use async_trait::async_trait;

use crate::types::Appointment;

/// Which of the two remote calendars an event lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarKind {
    Confirmed,
    Suggested,
}

/// Remote calendar writer. At most one remote event per appointment id per
/// calendar; moves between calendars are delete-then-write.
#[async_trait]
pub trait CalendarSink: Send + Sync {
    /// Create the remote event; returns the calendar UID.
    async fn write(&self, appt: &Appointment, kind: CalendarKind) -> anyhow::Result<String>;

    /// Overwrite the remote event in place (same UID, same calendar).
    async fn update(&self, appt: &Appointment, kind: CalendarKind) -> anyhow::Result<()>;

    /// Remove the remote event from the given calendar.
    async fn delete(&self, appt: &Appointment, kind: CalendarKind) -> anyhow::Result<()>;

    /// Whether the remote event currently exists. Used by reconcile.
    async fn exists(&self, appt: &Appointment, kind: CalendarKind) -> anyhow::Result<bool>;
}
