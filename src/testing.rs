//! Test infrastructure: mock LLM provider and fixture helpers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::providers::ProviderError;
use crate::traits::{ModelProvider, ProviderResponse, TokenUsage};
use crate::types::{Appointment, AppointmentStatus, Category, IncomingMessage, Relevance};

/// Mock LLM provider with a scripted behavior and a call counter.
pub struct MockProvider {
    behavior: Behavior,
    calls: AtomicUsize,
}

enum Behavior {
    Text(String),
    StatusError(u16),
    Delayed(String, Duration),
    /// FIFO of scripted replies; exhausted calls answer "no appointment".
    Sequence(std::sync::Mutex<std::collections::VecDeque<String>>),
}

impl MockProvider {
    pub fn with_text(text: &str) -> Self {
        Self {
            behavior: Behavior::Text(text.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_status_error(status: u16) -> Self {
        Self {
            behavior: Behavior::StatusError(status),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(text: &str, delay: Duration) -> Self {
        Self {
            behavior: Behavior::Delayed(text.to_string(), delay),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_sequence(texts: &[&str]) -> Self {
        Self {
            behavior: Behavior::Sequence(std::sync::Mutex::new(
                texts.iter().map(|s| s.to_string()).collect(),
            )),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn response(text: &str) -> ProviderResponse {
        ProviderResponse {
            content: Some(text.to_string()),
            usage: Some(TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
                model: "mock".to_string(),
            }),
        }
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn chat(
        &self,
        _model: &str,
        _system: &str,
        _user: &str,
    ) -> anyhow::Result<ProviderResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Text(text) => Ok(Self::response(text)),
            Behavior::StatusError(status) => {
                Err(ProviderError::from_status(*status, "mock error").into())
            }
            Behavior::Delayed(text, delay) => {
                tokio::time::sleep(*delay).await;
                Ok(Self::response(text))
            }
            Behavior::Sequence(queue) => {
                let next = queue
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .pop_front()
                    .unwrap_or_else(|| r#"{"actions": [], "reasoning": ""}"#.to_string());
                Ok(Self::response(&next))
            }
        }
    }
}

/// Mock calendar sink recording every operation.
pub struct MockCalendarSink {
    fail: bool,
    pub ops: std::sync::Mutex<Vec<String>>,
    uid_counter: AtomicUsize,
}

impl MockCalendarSink {
    pub fn new() -> Self {
        Self {
            fail: false,
            ops: std::sync::Mutex::new(Vec::new()),
            uid_counter: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::new() }
    }

    fn record(&self, op: &str, appt_id: &str, kind: crate::traits::CalendarKind) {
        self.ops
            .lock()
            .unwrap()
            .push(format!("{}:{}:{:?}", op, appt_id, kind));
    }

    pub fn write_count(&self) -> usize {
        self.ops.lock().unwrap().iter().filter(|o| o.starts_with("write:")).count()
    }

    pub fn delete_count(&self) -> usize {
        self.ops.lock().unwrap().iter().filter(|o| o.starts_with("delete:")).count()
    }

    pub fn update_count(&self) -> usize {
        self.ops.lock().unwrap().iter().filter(|o| o.starts_with("update:")).count()
    }
}

#[async_trait]
impl crate::traits::CalendarSink for MockCalendarSink {
    async fn write(
        &self,
        appt: &Appointment,
        kind: crate::traits::CalendarKind,
    ) -> anyhow::Result<String> {
        if self.fail {
            anyhow::bail!("mock calendar down");
        }
        self.record("write", &appt.id, kind);
        let n = self.uid_counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("mock-uid-{}", n))
    }

    async fn update(
        &self,
        appt: &Appointment,
        kind: crate::traits::CalendarKind,
    ) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("mock calendar down");
        }
        self.record("update", &appt.id, kind);
        Ok(())
    }

    async fn delete(
        &self,
        appt: &Appointment,
        kind: crate::traits::CalendarKind,
    ) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("mock calendar down");
        }
        self.record("delete", &appt.id, kind);
        Ok(())
    }

    async fn exists(
        &self,
        _appt: &Appointment,
        _kind: crate::traits::CalendarKind,
    ) -> anyhow::Result<bool> {
        if self.fail {
            anyhow::bail!("mock calendar down");
        }
        Ok(false)
    }
}

/// Fixture: an incoming message at a fixed instant.
pub fn message_at(text: &str, timestamp: DateTime<Utc>) -> IncomingMessage {
    IncomingMessage {
        message_id: uuid::Uuid::new_v4().to_string(),
        chat_id: "family-chat".to_string(),
        sender: "Marike".to_string(),
        text: text.to_string(),
        timestamp,
        reply_to: None,
    }
}

/// Fixture: a timed appointment.
pub fn appointment(id: &str, title: &str, start_utc: DateTime<Utc>) -> Appointment {
    Appointment {
        id: id.to_string(),
        chat_id: "family-chat".to_string(),
        title: title.to_string(),
        start_utc: Some(start_utc),
        date: None,
        all_day: false,
        end_utc: None,
        participants: Vec::new(),
        category: Category::Appointment,
        relevance: Relevance::Shared,
        status: AppointmentStatus::Suggested,
        confidence: 0.8,
        source_message_ids: Vec::new(),
        calendar_uid: None,
        reminders: Vec::new(),
        reasoning: String::new(),
        pending_sync: false,
        created_at: start_utc,
        updated_at: start_utc,
    }
}

/// Fixture: an all-day appointment.
pub fn all_day_appointment(id: &str, title: &str, date: NaiveDate) -> Appointment {
    let created = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap());
    Appointment {
        start_utc: None,
        date: Some(date),
        all_day: true,
        ..appointment(id, title, created)
    }
}
