//! Autonomous profile reflection.
//!
//! A timer-driven batch job: read the last day of conversation, the current
//! profiles, recent appointments and feedback, ask a long-context model
//! what it learned about each person, and append the structured result to
//! the profiles. A file lock makes the cycle globally singleton across all
//! processes sharing the profiles directory.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::extractor::first_balanced_object;
use crate::persons::{PersonStore, ProfileUpdate};
use crate::traits::store_prelude::*;
use crate::traits::ModelProvider;

const MESSAGE_LIMIT: usize = 50;
const LLM_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, Default, Deserialize)]
struct ReflectionMeta {
    #[serde(default)]
    gaps_identified: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ReflectionReply {
    #[serde(default)]
    updates: BTreeMap<String, ProfileUpdate>,
    #[serde(default)]
    meta: ReflectionMeta,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReflectionOutcome {
    /// Another process holds a fresh lock.
    LockHeld,
    /// Cycle ran; diff lines and identified gaps.
    Ran {
        applied: Vec<String>,
        gaps: Vec<String>,
    },
}

pub struct ReflectionAgent {
    store: Arc<dyn StateStore>,
    persons: Arc<PersonStore>,
    provider: Arc<dyn ModelProvider>,
    model: String,
    lock_path: PathBuf,
    lock_ttl: chrono::Duration,
}

impl ReflectionAgent {
    pub fn new(
        store: Arc<dyn StateStore>,
        persons: Arc<PersonStore>,
        provider: Arc<dyn ModelProvider>,
        model: impl Into<String>,
        lock_path: impl Into<PathBuf>,
        lock_ttl_min: u64,
    ) -> Self {
        Self {
            store,
            persons,
            provider,
            model: model.into(),
            lock_path: lock_path.into(),
            lock_ttl: chrono::Duration::minutes(lock_ttl_min as i64),
        }
    }

    /// One idempotent reflection cycle. Profile write failures abort the
    /// cycle; the next tick retries.
    pub async fn run_cycle(&self) -> anyhow::Result<ReflectionOutcome> {
        if !self.acquire_lock()? {
            info!("reflection lock held elsewhere, skipping cycle");
            return Ok(ReflectionOutcome::LockHeld);
        }

        let result = self.cycle_inner().await;
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            warn!("failed to remove reflection lock: {}", e);
        }
        result
    }

    /// Lock file contains the acquisition instant; a lock older than the
    /// TTL is considered stale (crashed run) and reclaimed.
    fn acquire_lock(&self) -> anyhow::Result<bool> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
        {
            Ok(file) => {
                use std::io::Write;
                let mut file = file;
                file.write_all(Utc::now().to_rfc3339().as_bytes())?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let held_since = std::fs::read_to_string(&self.lock_path)
                    .ok()
                    .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
                    .map(|dt| dt.with_timezone(&Utc));
                match held_since {
                    Some(since) if Utc::now() - since < self.lock_ttl => Ok(false),
                    _ => {
                        warn!("reclaiming stale reflection lock");
                        std::fs::remove_file(&self.lock_path)?;
                        std::fs::write(&self.lock_path, Utc::now().to_rfc3339())?;
                        Ok(true)
                    }
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn cycle_inner(&self) -> anyhow::Result<ReflectionOutcome> {
        let now = Utc::now();
        let messages = self
            .store
            .messages_since(now - chrono::Duration::hours(24), MESSAGE_LIMIT)
            .await?;
        let appointments = self
            .store
            .appointments_since(now - chrono::Duration::hours(24))
            .await?;
        let feedback = self
            .store
            .feedback_since(now - chrono::Duration::days(7))
            .await?;
        let profiles = self.persons.load();

        if messages.is_empty() && feedback.is_empty() {
            info!("nothing to reflect on");
            return Ok(ReflectionOutcome::Ran { applied: vec![], gaps: vec![] });
        }

        let system = build_system_prompt();
        let user = build_user_prompt(&profiles, &messages, &appointments, &feedback);

        let response =
            tokio::time::timeout(LLM_TIMEOUT, self.provider.chat(&self.model, &system, &user))
                .await
                .map_err(|_| anyhow::anyhow!("reflection LLM call timed out"))??;
        let Some(content) = response.content else {
            anyhow::bail!("reflection LLM returned no content");
        };

        let reply = parse_reply(&content)
            .ok_or_else(|| anyhow::anyhow!("unparseable reflection response"))?;

        let applied = self.persons.apply_reflection(&reply.updates).await?;
        info!(
            persons = reply.updates.len(),
            applied = applied.len(),
            gaps = reply.meta.gaps_identified.len(),
            "reflection cycle complete"
        );
        Ok(ReflectionOutcome::Ran {
            applied,
            gaps: reply.meta.gaps_identified,
        })
    }
}

fn parse_reply(raw: &str) -> Option<ReflectionReply> {
    let trimmed = raw.trim();
    if let Ok(reply) = serde_json::from_str(trimmed) {
        return Some(reply);
    }
    first_balanced_object(trimmed).and_then(|candidate| serde_json::from_str(candidate).ok())
}

fn build_system_prompt() -> String {
    "\
Du bist der Reflexions-Agent eines Familienkoordinations-Systems. Du liest den \
Chatverlauf des letzten Tages und aktualisierst das Wissen über die Familienmitglieder.

DEINE HALTUNG — DEMUT VOR DEN DATEN:
- Du kennst diese Familie nur aus Textfragmenten. Vieles, was plausibel wirkt, ist falsch.
- Alles, was nicht AUSDRÜCKLICH bestätigt wurde, gehört in confidence_notes, NICHT in new_facts.
- new_facts ist NUR für Aussagen, die im Verlauf wörtlich bestätigt wurden.
- Du erfindest NIEMALS Personen. Du verwendest nur die unten aufgeführten Personen-Schlüssel.
- Du entfernst oder korrigierst NIEMALS bestehendes Wissen; du fügst nur hinzu. \
Widerspricht eine Beobachtung einem bekannten Fakt, notiere den Widerspruch in confidence_notes.

ANTWORTFORMAT — exakt EIN JSON-Objekt:
{
  \"updates\": {
    \"<person_key>\": {
      \"new_facts\": [\"...\"],
      \"new_activities\": {\"<name>\": {\"type\": \"...\", \"pattern\": \"...\", \"termin_logic\": [\"...\"]}},
      \"new_termin_hints\": [\"...\"],
      \"confidence_notes\": [\"...\"]
    }
  },
  \"meta\": {\"gaps_identified\": [\"...\"]}
}

Leere Felder weglassen. Keine Person ohne neue Erkenntnis aufführen."
        .to_string()
}

fn build_user_prompt(
    profiles: &[crate::persons::Person],
    messages: &[crate::types::IncomingMessage],
    appointments: &[crate::types::Appointment],
    feedback: &[(crate::types::FeedbackRecord, String)],
) -> String {
    let mut sections = Vec::new();

    let keys: Vec<&str> = profiles.iter().map(|p| p.key.as_str()).collect();
    sections.push(format!("BEKANNTE PERSONEN-SCHLÜSSEL: {}", keys.join(", ")));

    let rendered: Vec<String> = profiles.iter().map(|p| p.render_prompt_fragment()).collect();
    sections.push(format!("AKTUELLE PROFILE:\n{}", rendered.join("\n\n")));

    let lines: Vec<String> = messages
        .iter()
        .map(|m| format!("[{}] {}: {}", m.timestamp.format("%Y-%m-%d %H:%M"), m.sender, m.text))
        .collect();
    sections.push(format!("NACHRICHTEN DER LETZTEN 24H:\n{}", lines.join("\n")));

    if !appointments.is_empty() {
        let lines: Vec<String> = appointments
            .iter()
            .map(|a| format!("- {} ({})", a.title, a.status.as_str()))
            .collect();
        sections.push(format!("ERKANNTE TERMINE DER LETZTEN 24H:\n{}", lines.join("\n")));
    }

    if !feedback.is_empty() {
        let lines: Vec<String> = feedback
            .iter()
            .map(|(record, title)| {
                format!(
                    "- \"{}\": {} {}",
                    title,
                    record.action.as_str(),
                    record.reason.as_deref().unwrap_or("")
                )
            })
            .collect();
        sections.push(format!("FEEDBACK DER LETZTEN 7 TAGE:\n{}", lines.join("\n")));
    }

    sections.push("Analysiere und antworte mit dem JSON-Objekt.".to_string());
    sections.join("\n\n")
}
