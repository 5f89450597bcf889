//! CalDAV client for the two remote calendars.
//!
//! Events are upserted via PUT to `<base>/<calendar>/<uid>.ics` with basic
//! auth. The confirmed and suggested calendars are sibling collections;
//! a move between them is delete-then-write, best effort.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use super::ics::build_vcalendar;
use crate::config::CaldavConfig;
use crate::persons::PersonStore;
use crate::traits::{CalendarKind, CalendarSink};
use crate::types::Appointment;

pub struct CaldavSink {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    confirmed_calendar: String,
    suggested_calendar: String,
    persons: Arc<PersonStore>,
}

/// Percent-encode one URL path segment (calendar names contain spaces).
fn encode_segment(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

impl CaldavSink {
    /// Returns `None` when CalDAV is not configured; the pipeline then
    /// keeps appointments local-only.
    pub fn new(config: &CaldavConfig, persons: Arc<PersonStore>) -> anyhow::Result<Option<Self>> {
        if config.url.trim().is_empty() || config.username.trim().is_empty() {
            return Ok(None);
        }
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Some(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            confirmed_calendar: config.confirmed_calendar.clone(),
            suggested_calendar: config.suggested_calendar.clone(),
            persons,
        }))
    }

    fn calendar_name(&self, kind: CalendarKind) -> &str {
        match kind {
            CalendarKind::Confirmed => &self.confirmed_calendar,
            CalendarKind::Suggested => &self.suggested_calendar,
        }
    }

    fn event_url(&self, kind: CalendarKind, uid: &str) -> String {
        format!(
            "{}/{}/{}.ics",
            self.base_url,
            encode_segment(self.calendar_name(kind)),
            encode_segment(uid)
        )
    }

    /// Participant strings may be person keys; resolve those to names.
    fn attendee_names(&self, appt: &Appointment) -> Vec<String> {
        appt.participants
            .iter()
            .map(|p| {
                self.persons
                    .get(&p.to_lowercase())
                    .map(|person| person.name)
                    .unwrap_or_else(|| p.clone())
            })
            .collect()
    }

    async fn put_event(&self, appt: &Appointment, kind: CalendarKind, uid: &str) -> anyhow::Result<()> {
        let body = build_vcalendar(appt, uid, &self.attendee_names(appt));
        let resp = self
            .client
            .put(self.event_url(kind, uid))
            .basic_auth(&self.username, Some(&self.password))
            .header("Content-Type", "text/calendar; charset=utf-8")
            .body(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!(
                "calendar PUT failed with {} for '{}'",
                resp.status(),
                appt.title
            );
        }
        Ok(())
    }
}

#[async_trait]
impl CalendarSink for CaldavSink {
    async fn write(&self, appt: &Appointment, kind: CalendarKind) -> anyhow::Result<String> {
        let uid = format!("radar-{}@terminradar", uuid::Uuid::new_v4());
        self.put_event(appt, kind, &uid).await?;
        info!(
            calendar = self.calendar_name(kind),
            title = %appt.title,
            "calendar event created"
        );
        Ok(uid)
    }

    async fn update(&self, appt: &Appointment, kind: CalendarKind) -> anyhow::Result<()> {
        let Some(uid) = appt.calendar_uid.as_deref() else {
            anyhow::bail!("appointment {} has no calendar uid", appt.id);
        };
        // PUT upserts: a vanished event is recreated under the same uid.
        self.put_event(appt, kind, uid).await?;
        info!(calendar = self.calendar_name(kind), title = %appt.title, "calendar event updated");
        Ok(())
    }

    async fn delete(&self, appt: &Appointment, kind: CalendarKind) -> anyhow::Result<()> {
        let Some(uid) = appt.calendar_uid.as_deref() else {
            debug!("appointment {} has no calendar uid, nothing to delete", appt.id);
            return Ok(());
        };
        let resp = self
            .client
            .delete(self.event_url(kind, uid))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        // 404 means the goal state is already reached.
        if !resp.status().is_success() && resp.status().as_u16() != 404 {
            anyhow::bail!("calendar DELETE failed with {}", resp.status());
        }
        info!(calendar = self.calendar_name(kind), title = %appt.title, "calendar event deleted");
        Ok(())
    }

    async fn exists(&self, appt: &Appointment, kind: CalendarKind) -> anyhow::Result<bool> {
        let Some(uid) = appt.calendar_uid.as_deref() else {
            return Ok(false);
        };
        let resp = self
            .client
            .get(self.event_url(kind, uid))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        Ok(resp.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_sink_is_none() {
        let persons = Arc::new(PersonStore::new("does-not-matter"));
        let sink = CaldavSink::new(&CaldavConfig::default(), persons).unwrap();
        assert!(sink.is_none());
    }

    #[test]
    fn test_event_url_encodes_calendar_name() {
        let persons = Arc::new(PersonStore::new("does-not-matter"));
        let config = CaldavConfig {
            url: "https://caldav.example.com/jan/calendars".into(),
            username: "jan".into(),
            password: "secret".into(),
            confirmed_calendar: "TerminRadar".into(),
            suggested_calendar: "TerminRadar ?".into(),
        };
        let sink = CaldavSink::new(&config, persons).unwrap().unwrap();
        assert_eq!(
            sink.event_url(CalendarKind::Confirmed, "uid-1"),
            "https://caldav.example.com/jan/calendars/TerminRadar/uid-1.ics"
        );
        assert_eq!(
            sink.event_url(CalendarKind::Suggested, "uid-1"),
            "https://caldav.example.com/jan/calendars/TerminRadar%20%3F/uid-1.ics"
        );
    }

    #[test]
    fn test_encode_segment() {
        assert_eq!(encode_segment("abc-123"), "abc-123");
        assert_eq!(encode_segment("a b?"), "a%20b%3F");
        assert_eq!(encode_segment("Straße"), "Stra%C3%9Fe");
    }
}
