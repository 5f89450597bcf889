//! The per-message extraction pipeline.
//!
//! gate -> context assembly -> LLM cascade -> validation -> stores and
//! calendar, with a detached memorize at the end. The pipeline surfaces a
//! single outcome per message and never propagates errors to the poller.

mod cascade;
mod dates;
mod parse;
mod prompt;
mod validator;

pub use cascade::{CascadeProvider, LlmCascade, ProviderStatus};
pub(crate) use parse::first_balanced_object;
pub use validator::{DuplicateDecision, ValidationOutput, Validator};

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::context::{ContextAssembler, PromptContext};
use crate::gate;
use crate::memory::MemoryClient;
use crate::persons::PersonStore;
use crate::traits::store_prelude::*;
use crate::traits::{CalendarKind, CalendarSink, InsertOutcome};
use crate::types::{
    ActionKind, Appointment, AppointmentStatus, ExtractionOutcome, IncomingMessage, Relevance,
    ValidatedAction,
};

pub struct ExtractionPipeline {
    store: Arc<dyn StateStore>,
    assembler: ContextAssembler,
    cascade: LlmCascade,
    validator: Validator,
    sink: Option<Arc<dyn CalendarSink>>,
    memory: Option<Arc<MemoryClient>>,
    persons: Arc<PersonStore>,
    confidence_auto_threshold: f64,
    conversation_window_size: usize,
    tz: Tz,
}

impl ExtractionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn StateStore>,
        assembler: ContextAssembler,
        cascade: LlmCascade,
        validator: Validator,
        sink: Option<Arc<dyn CalendarSink>>,
        memory: Option<Arc<MemoryClient>>,
        persons: Arc<PersonStore>,
        confidence_auto_threshold: f64,
        conversation_window_size: usize,
        tz: Tz,
    ) -> Self {
        Self {
            store,
            assembler,
            cascade,
            validator,
            sink,
            memory,
            persons,
            confidence_auto_threshold,
            conversation_window_size,
            tz,
        }
    }

    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        self.cascade.status()
    }

    /// Run one message through the full pipeline.
    pub async fn handle_message(&self, message: &IncomingMessage) -> ExtractionOutcome {
        // Gate first: most messages are everyday chat and never reach the
        // LLM. The gate sees a short preceding window for Q/A cross-signals.
        let gate_window = tokio::time::timeout(
            Duration::from_millis(500),
            self.store.recent_messages(
                &message.chat_id,
                message.timestamp,
                self.conversation_window_size,
            ),
        )
        .await
        .ok()
        .and_then(|r| r.ok())
        .unwrap_or_default();

        if !gate::should_extract(message, &gate_window) {
            return ExtractionOutcome::NoOp;
        }

        let ctx = self.assembler.assemble(message).await;
        let reply = self.cascade.extract(&ctx, message).await;
        let validated = self.validator.validate(reply.actions, &ctx, message);

        for (appointment_id, note) in &validated.annotations {
            if let Err(e) = self.store.append_reasoning(appointment_id, note).await {
                warn!(id = %appointment_id, "failed to annotate appointment: {}", e);
            }
        }

        let mut applied = 0usize;
        for action in &validated.actions {
            match self.apply_action(action, &ctx, message).await {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(e) => error!(title = %action.title, "action application failed: {}", e),
            }
        }

        // Best-effort auxiliary index; the pipeline does not await it.
        if let Some(memory) = &self.memory {
            memory.memorize_detached(
                &message.chat_id,
                &message.sender,
                &message.text,
                message.timestamp,
                &message.message_id,
            );
        }

        if applied == 0 {
            info!(message_id = %message.message_id, "no-op");
            ExtractionOutcome::NoOp
        } else {
            info!(message_id = %message.message_id, "extracted: {} appointments", applied);
            ExtractionOutcome::Extracted(applied)
        }
    }

    async fn apply_action(
        &self,
        action: &ValidatedAction,
        ctx: &PromptContext,
        message: &IncomingMessage,
    ) -> anyhow::Result<bool> {
        match action.action {
            ActionKind::Create => self.apply_create(action, message).await,
            ActionKind::Update => self.apply_update(action).await,
            ActionKind::Cancel => self.apply_cancel(action, ctx).await,
        }
    }

    async fn apply_create(
        &self,
        action: &ValidatedAction,
        message: &IncomingMessage,
    ) -> anyhow::Result<bool> {
        let status = if action.confidence >= self.confidence_auto_threshold {
            AppointmentStatus::Auto
        } else {
            AppointmentStatus::Suggested
        };
        let now = Utc::now();
        let appt = Appointment {
            id: Uuid::new_v4().to_string(),
            chat_id: message.chat_id.clone(),
            title: action.title.clone(),
            start_utc: action.start_utc,
            date: action.date,
            all_day: action.all_day,
            end_utc: action.end_utc,
            participants: action.participants.clone(),
            category: action.category,
            relevance: action.relevance,
            status,
            confidence: action.confidence,
            source_message_ids: vec![message.message_id.clone()],
            calendar_uid: None,
            reminders: action.reminders.clone(),
            reasoning: action.reasoning.clone(),
            pending_sync: false,
            created_at: now,
            updated_at: now,
        };

        match self.store.insert_appointment(&appt).await? {
            InsertOutcome::Inserted => {}
            InsertOutcome::Conflict => {
                // A racing extraction won the lock for this (title, day,
                // slot). Refresh the window around the target start and
                // decide against the committed state.
                let anchor = action
                    .start_utc
                    .or_else(|| {
                        action
                            .date
                            .and_then(|d| d.and_hms_opt(0, 0, 0))
                            .map(|naive| Utc.from_utc_datetime(&naive))
                    })
                    .unwrap_or(now);
                let from = anchor - ChronoDuration::days(30);
                let to = anchor + ChronoDuration::days(30);
                let fresh = self
                    .store
                    .appointments_in_window(&message.chat_id, from, to, 100)
                    .await?;
                match self.validator.duplicate_decision(&fresh, action) {
                    DuplicateDecision::Update(id) => {
                        let update = ValidatedAction {
                            action: ActionKind::Update,
                            updates_termin_id: Some(id),
                            ..action.clone()
                        };
                        return self.apply_update(&update).await;
                    }
                    DuplicateDecision::Suppress => {
                        info!(title = %appt.title, "insert conflict resolved as duplicate-suppress");
                        return Ok(false);
                    }
                    DuplicateDecision::Distinct => {
                        // A key collision is a duplicate by construction
                        // (same title shape, day and 30-minute slot), so a
                        // Distinct verdict means the winning row is outside
                        // the refreshed window. One retry, then surface the
                        // failure rather than dropping the action silently.
                        if self.store.insert_appointment(&appt).await?
                            == InsertOutcome::Inserted
                        {
                            self.sync_created(&appt).await;
                            self.learn_from(&appt).await;
                            return Ok(true);
                        }
                        anyhow::bail!(
                            "insert for '{}' conflicted twice with no visible duplicate",
                            appt.title
                        );
                    }
                }
            }
        }

        self.sync_created(&appt).await;
        self.learn_from(&appt).await;
        Ok(true)
    }

    /// Push a freshly inserted appointment to the remote calendar.
    /// Partner-only rows stay local; sink failures flag the row for the
    /// reconcile pass instead of failing the pipeline.
    async fn sync_created(&self, appt: &Appointment) {
        if appt.relevance == Relevance::PartnerOnly {
            info!(title = %appt.title, "partner-only appointment, not synced");
            return;
        }
        let Some(sink) = &self.sink else {
            return;
        };
        let kind = match appt.status {
            AppointmentStatus::Auto => CalendarKind::Confirmed,
            _ => CalendarKind::Suggested,
        };
        match sink.write(appt, kind).await {
            Ok(uid) => {
                if let Err(e) = self.store.set_calendar_uid(&appt.id, Some(&uid)).await {
                    warn!(id = %appt.id, "failed to persist calendar uid: {}", e);
                }
            }
            Err(e) => {
                warn!(id = %appt.id, "calendar write failed, flagging for reconcile: {}", e);
                let _ = self.store.set_pending_sync(&appt.id, true).await;
            }
        }
    }

    /// Person profiles accumulate time observations from stored
    /// extractions; recurring patterns surface as termin hints.
    async fn learn_from(&self, appt: &Appointment) {
        if let Some(start) = appt.start_utc {
            let local = start.with_timezone(&self.tz).naive_local();
            if let Err(e) = self.persons.record_observation(&appt.title, local).await {
                warn!("pattern learning failed: {}", e);
            }
        }
    }

    async fn apply_update(&self, action: &ValidatedAction) -> anyhow::Result<bool> {
        let Some(id) = action.updates_termin_id.as_deref() else {
            anyhow::bail!("update action without target id");
        };
        self.store.apply_update(id, action).await?;
        if !action.reasoning.is_empty() {
            self.store.append_reasoning(id, &action.reasoning).await?;
        }

        if let (Some(sink), Some(updated)) = (&self.sink, self.store.get_appointment(id).await?) {
            if updated.relevance != Relevance::PartnerOnly && updated.calendar_uid.is_some() {
                let kind = match updated.status {
                    AppointmentStatus::Suggested => CalendarKind::Suggested,
                    _ => CalendarKind::Confirmed,
                };
                if let Err(e) = sink.update(&updated, kind).await {
                    warn!(id = %updated.id, "calendar update failed, flagging: {}", e);
                    let _ = self.store.set_pending_sync(id, true).await;
                }
            }
        }
        Ok(true)
    }

    async fn apply_cancel(
        &self,
        action: &ValidatedAction,
        ctx: &PromptContext,
    ) -> anyhow::Result<bool> {
        let Some(id) = action.updates_termin_id.as_deref() else {
            anyhow::bail!("cancel action without target id");
        };
        let Some(appt) = ctx.existing_appointments.iter().find(|a| a.id == id) else {
            // Unknown target: ignored rather than create-then-cancel.
            return Ok(false);
        };

        self.store.set_status(id, AppointmentStatus::Cancelled).await?;
        if let Some(sink) = &self.sink {
            if appt.calendar_uid.is_some() {
                let kind = match appt.status {
                    AppointmentStatus::Suggested => CalendarKind::Suggested,
                    _ => CalendarKind::Confirmed,
                };
                if let Err(e) = sink.delete(appt, kind).await {
                    warn!(id = %appt.id, "calendar delete failed, flagging: {}", e);
                    let _ = self.store.set_pending_sync(id, true).await;
                }
            }
        }
        Ok(true)
    }
}
