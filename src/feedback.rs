//! User feedback intake: persists the record, drives the appointment state
//! machine, mirrors the result to the remote calendar, and feeds the
//! person-profile learning loop.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{info, warn};
use uuid::Uuid;

use crate::calendar::kind_for_status;
use crate::persons::PersonStore;
use crate::traits::store_prelude::*;
use crate::traits::{CalendarKind, CalendarSink};
use crate::types::{Appointment, AppointmentStatus, FeedbackAction, FeedbackRecord};

#[derive(Debug, Clone)]
pub struct FeedbackInput {
    pub appointment_id: String,
    pub action: FeedbackAction,
    pub correction: Option<serde_json::Value>,
    pub reason: Option<String>,
}

pub struct FeedbackLoop {
    store: Arc<dyn StateStore>,
    sink: Option<Arc<dyn CalendarSink>>,
    persons: Arc<PersonStore>,
    tz: Tz,
}

impl FeedbackLoop {
    pub fn new(
        store: Arc<dyn StateStore>,
        sink: Option<Arc<dyn CalendarSink>>,
        persons: Arc<PersonStore>,
        tz: Tz,
    ) -> Self {
        Self {
            store,
            sink,
            persons,
            tz,
        }
    }

    /// Process one piece of user feedback. Errors writing the person
    /// profile surface to the caller; calendar errors only flag the row.
    pub async fn submit(&self, input: FeedbackInput) -> anyhow::Result<FeedbackRecord> {
        let Some(appt) = self.store.get_appointment(&input.appointment_id).await? else {
            anyhow::bail!("appointment {} not found", input.appointment_id);
        };

        let correction = input
            .correction
            .map(|c| self.normalize_correction(c));

        let record = FeedbackRecord {
            id: Uuid::new_v4().to_string(),
            appointment_id: input.appointment_id.clone(),
            action: input.action,
            correction,
            reason: input.reason,
            created_at: Utc::now(),
        };
        self.store.insert_feedback(&record).await?;

        match input.action {
            FeedbackAction::Confirmed => self.handle_confirmed(&appt).await?,
            FeedbackAction::Rejected => self.handle_rejected(&appt).await?,
            FeedbackAction::Skipped => {
                if let Some(next) = appt.status.on_feedback(FeedbackAction::Skipped) {
                    self.store.set_status(&appt.id, next).await?;
                }
            }
            FeedbackAction::Edited => self.handle_edited(&appt, &record).await?,
        }

        // Profile learning; a disk failure here aborts the whole submit so
        // the user sees it.
        self.persons.apply_feedback(&appt.title, &record).await?;

        info!(
            appointment = %appt.id,
            action = record.action.as_str(),
            "feedback processed"
        );
        Ok(record)
    }

    async fn handle_confirmed(&self, appt: &Appointment) -> anyhow::Result<()> {
        let Some(next) = appt.status.on_feedback(FeedbackAction::Confirmed) else {
            warn!(id = %appt.id, status = appt.status.as_str(), "confirm on non-confirmable state");
            return Ok(());
        };
        let was_suggested = appt.status == AppointmentStatus::Suggested;
        self.store.set_status(&appt.id, next).await?;

        // Suggested -> confirmed moves calendars: delete-then-write.
        if was_suggested && appt.calendar_uid.is_some() {
            if let Some(sink) = &self.sink {
                if let Err(e) = sink.delete(appt, CalendarKind::Suggested).await {
                    warn!(id = %appt.id, "suggested-calendar delete failed: {}", e);
                }
                match sink.write(appt, CalendarKind::Confirmed).await {
                    Ok(uid) => self.store.set_calendar_uid(&appt.id, Some(&uid)).await?,
                    Err(e) => {
                        warn!(id = %appt.id, "confirmed-calendar write failed, flagging: {}", e);
                        self.store.set_pending_sync(&appt.id, true).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_rejected(&self, appt: &Appointment) -> anyhow::Result<()> {
        let Some(next) = appt.status.on_feedback(FeedbackAction::Rejected) else {
            warn!(id = %appt.id, status = appt.status.as_str(), "reject on terminal state");
            return Ok(());
        };
        self.store.set_status(&appt.id, next).await?;

        if appt.calendar_uid.is_some() {
            if let (Some(sink), Some(kind)) = (&self.sink, kind_for_status(appt.status)) {
                match sink.delete(appt, kind).await {
                    Ok(()) => {
                        self.store.set_calendar_uid(&appt.id, None).await?;
                    }
                    Err(e) => {
                        warn!(id = %appt.id, "calendar delete failed, flagging: {}", e);
                        self.store.set_pending_sync(&appt.id, true).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_edited(
        &self,
        appt: &Appointment,
        record: &FeedbackRecord,
    ) -> anyhow::Result<()> {
        let Some(correction) = record.correction.as_ref() else {
            warn!(id = %appt.id, "edited feedback without correction, nothing to apply");
            return Ok(());
        };
        if appt.status.is_terminal() {
            // Product decision pending for this path; current behavior is
            // apply-and-keep-state.
            warn!(
                id = %appt.id,
                status = appt.status.as_str(),
                "applying edit to appointment in terminal state"
            );
        }
        self.store.apply_correction(&appt.id, correction).await?;

        if appt.calendar_uid.is_some() {
            if let (Some(sink), Some(kind)) = (&self.sink, kind_for_status(appt.status)) {
                if let Some(updated) = self.store.get_appointment(&appt.id).await? {
                    if let Err(e) = sink.update(&updated, kind).await {
                        warn!(id = %appt.id, "calendar update failed, flagging: {}", e);
                        self.store.set_pending_sync(&appt.id, true).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Corrections arrive with wall-clock datetimes; the store expects
    /// RFC 3339 UTC. Naive values are interpreted in the configured zone.
    fn normalize_correction(&self, mut correction: serde_json::Value) -> serde_json::Value {
        if let Some(fields) = correction.as_object_mut() {
            for key in ["datetime", "end_datetime"] {
                let Some(value) = fields.get(key).and_then(|v| v.as_str()) else {
                    continue;
                };
                if DateTime::parse_from_rfc3339(value).is_ok() {
                    continue;
                }
                let parsed = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M")
                    .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"));
                if let Ok(naive) = parsed {
                    if let Some(local) = self.tz.from_local_datetime(&naive).earliest() {
                        fields.insert(
                            key.to_string(),
                            serde_json::Value::String(
                                local.with_timezone(&Utc).to_rfc3339(),
                            ),
                        );
                    }
                }
            }
        }
        correction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SqliteStateStore;
    use crate::testing::{appointment, MockCalendarSink};
    use chrono::TimeZone;
    use chrono_tz::Europe::Berlin;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Arc<SqliteStateStore>, Arc<MockCalendarSink>, FeedbackLoop) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let store = Arc::new(SqliteStateStore::new(db_path.to_str().unwrap()).await.unwrap());
        let persons_dir = dir.path().join("persons");
        std::fs::create_dir_all(&persons_dir).unwrap();
        std::fs::write(persons_dir.join("enno.yaml"), "name: Enno\nrole: Sohn\n").unwrap();
        let persons = Arc::new(PersonStore::new(&persons_dir));
        let sink = Arc::new(MockCalendarSink::new());
        let feedback = FeedbackLoop::new(
            store.clone(),
            Some(sink.clone() as Arc<dyn CalendarSink>),
            persons,
            Berlin,
        );
        (dir, store, sink, feedback)
    }

    fn ts() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 17, 16, 0, 0).unwrap()
    }

    fn synced(id: &str, title: &str, status: AppointmentStatus) -> Appointment {
        let mut appt = appointment(id, title, ts());
        appt.status = status;
        appt.calendar_uid = Some(format!("uid-{}", id));
        appt
    }

    #[tokio::test]
    async fn test_rejected_reaches_terminal_and_remote_deleted() {
        let (_dir, store, sink, feedback) = setup().await;
        store
            .insert_appointment(&synced("a1", "Enno Training", AppointmentStatus::Suggested))
            .await
            .unwrap();

        feedback
            .submit(FeedbackInput {
                appointment_id: "a1".into(),
                action: FeedbackAction::Rejected,
                correction: None,
                reason: Some("doppelt erkannt".into()),
            })
            .await
            .unwrap();

        let appt = store.get_appointment("a1").await.unwrap().unwrap();
        assert_eq!(appt.status, AppointmentStatus::Rejected);
        assert!(appt.calendar_uid.is_none());
        assert_eq!(sink.delete_count(), 1);
    }

    #[tokio::test]
    async fn test_confirm_moves_suggested_to_confirmed_calendar() {
        let (_dir, store, sink, feedback) = setup().await;
        store
            .insert_appointment(&synced("a1", "Enno Training", AppointmentStatus::Suggested))
            .await
            .unwrap();

        feedback
            .submit(FeedbackInput {
                appointment_id: "a1".into(),
                action: FeedbackAction::Confirmed,
                correction: None,
                reason: None,
            })
            .await
            .unwrap();

        let appt = store.get_appointment("a1").await.unwrap().unwrap();
        assert_eq!(appt.status, AppointmentStatus::Confirmed);
        // delete from suggested, write to confirmed, new uid persisted
        assert_eq!(sink.delete_count(), 1);
        assert_eq!(sink.write_count(), 1);
        assert_eq!(appt.calendar_uid.as_deref(), Some("mock-uid-0"));
        let ops = sink.ops.lock().unwrap();
        assert!(ops[0].contains("Suggested"));
        assert!(ops[1].contains("Confirmed"));
    }

    #[tokio::test]
    async fn test_confirm_on_auto_keeps_calendar_untouched() {
        let (_dir, store, sink, feedback) = setup().await;
        store
            .insert_appointment(&synced("a1", "Enno Training", AppointmentStatus::Auto))
            .await
            .unwrap();

        feedback
            .submit(FeedbackInput {
                appointment_id: "a1".into(),
                action: FeedbackAction::Confirmed,
                correction: None,
                reason: None,
            })
            .await
            .unwrap();

        let appt = store.get_appointment("a1").await.unwrap().unwrap();
        assert_eq!(appt.status, AppointmentStatus::Confirmed);
        assert_eq!(sink.write_count(), 0);
        assert_eq!(sink.delete_count(), 0);
    }

    #[tokio::test]
    async fn test_edited_applies_correction_and_keeps_state() {
        let (_dir, store, sink, feedback) = setup().await;
        store
            .insert_appointment(&synced("a1", "Enno Training", AppointmentStatus::Auto))
            .await
            .unwrap();

        let input = FeedbackInput {
            appointment_id: "a1".into(),
            action: FeedbackAction::Edited,
            // Wall time, normalized to UTC internally.
            correction: Some(serde_json::json!({"datetime": "2026-02-17T17:30"})),
            reason: None,
        };
        feedback.submit(input.clone()).await.unwrap();

        let appt = store.get_appointment("a1").await.unwrap().unwrap();
        assert_eq!(appt.status, AppointmentStatus::Auto);
        // 17:30 Berlin = 16:30 UTC.
        assert_eq!(
            appt.start_utc,
            Some(Utc.with_ymd_and_hms(2026, 2, 17, 16, 30, 0).unwrap())
        );
        assert_eq!(sink.update_count(), 1);

        // Applying the same edit twice leaves the row identical.
        feedback.submit(input).await.unwrap();
        let again = store.get_appointment("a1").await.unwrap().unwrap();
        assert_eq!(again.start_utc, appt.start_utc);
        assert_eq!(again.title, appt.title);
    }

    #[tokio::test]
    async fn test_edited_on_rejected_applies_but_keeps_terminal_state() {
        let (_dir, store, _sink, feedback) = setup().await;
        store
            .insert_appointment(&synced("a1", "Enno Training", AppointmentStatus::Rejected))
            .await
            .unwrap();

        feedback
            .submit(FeedbackInput {
                appointment_id: "a1".into(),
                action: FeedbackAction::Edited,
                correction: Some(serde_json::json!({"title": "Enno Schwimmtraining"})),
                reason: None,
            })
            .await
            .unwrap();

        let appt = store.get_appointment("a1").await.unwrap().unwrap();
        assert_eq!(appt.status, AppointmentStatus::Rejected);
        assert_eq!(appt.title, "Enno Schwimmtraining");
    }

    #[tokio::test]
    async fn test_feedback_becomes_prompt_example() {
        let (_dir, store, _sink, feedback) = setup().await;
        store
            .insert_appointment(&synced("a1", "Enno Training", AppointmentStatus::Suggested))
            .await
            .unwrap();

        feedback
            .submit(FeedbackInput {
                appointment_id: "a1".into(),
                action: FeedbackAction::Rejected,
                correction: None,
                reason: Some("kein Termin".into()),
            })
            .await
            .unwrap();

        let examples = store
            .recent_feedback("family-chat", &[FeedbackAction::Rejected, FeedbackAction::Edited], 5)
            .await
            .unwrap();
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].1, "Enno Training");
    }

    #[tokio::test]
    async fn test_unknown_appointment_errors() {
        let (_dir, _store, _sink, feedback) = setup().await;
        let result = feedback
            .submit(FeedbackInput {
                appointment_id: "ghost".into(),
                action: FeedbackAction::Confirmed,
                correction: None,
                reason: None,
            })
            .await;
        assert!(result.is_err());
    }
}
