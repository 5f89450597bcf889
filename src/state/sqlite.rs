//! SQLite-backed state store.
//!
//! The core reads the ingest collaborator's `messages` table and owns
//! `appointments`, `feedback` and the `extraction_log` cursor. Datetimes
//! are stored as RFC 3339 UTC text; all-day dates as `YYYY-MM-DD`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::traits::{AppointmentStore, FeedbackStore, InsertOutcome, MessageStore};
use crate::types::{
    Appointment, AppointmentStatus, Category, FeedbackAction, FeedbackRecord, IncomingMessage,
    Relevance, ValidatedAction,
};
use crate::utils::title_tokens;

pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub async fn new(db_path: &str) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
        // Owned by the ingest collaborator; created here so a fresh
        // deployment has the full layout.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                chat_id TEXT NOT NULL,
                sender TEXT NOT NULL,
                text TEXT,
                timestamp TEXT NOT NULL,
                reply_to TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, timestamp)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS appointments (
                id TEXT PRIMARY KEY,
                chat_id TEXT NOT NULL,
                title TEXT NOT NULL,
                start_utc TEXT,
                date TEXT,
                all_day INTEGER NOT NULL DEFAULT 0,
                end_utc TEXT,
                participants TEXT NOT NULL DEFAULT '[]',
                category TEXT NOT NULL DEFAULT 'appointment',
                relevance TEXT NOT NULL DEFAULT 'shared',
                status TEXT NOT NULL DEFAULT 'suggested',
                confidence REAL NOT NULL DEFAULT 0.5,
                source_message_ids TEXT NOT NULL DEFAULT '[]',
                calendar_uid TEXT,
                reminders TEXT NOT NULL DEFAULT '[]',
                reasoning TEXT NOT NULL DEFAULT '',
                pending_sync INTEGER NOT NULL DEFAULT 0,
                dedup_key TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        // The duplicate-or-update correctness boundary: concurrent inserts
        // for the same (chat, title-shape, day, 30-minute slot) collide
        // here instead of racing past each other. Terminal rows release
        // their key.
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_appointments_dedup
             ON appointments(dedup_key)
             WHERE status NOT IN ('rejected','cancelled','skipped')",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_appointments_chat
             ON appointments(chat_id, start_utc)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS feedback (
                id TEXT PRIMARY KEY,
                appointment_id TEXT NOT NULL REFERENCES appointments(id),
                action TEXT NOT NULL,
                correction TEXT,
                reason TEXT,
                created_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        // Peer pipeline table (sentiment/markers); untouched by the core.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS analysis (
                id TEXT PRIMARY KEY,
                message_id TEXT NOT NULL,
                payload TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS extraction_log (
                message_id TEXT PRIMARY KEY,
                outcome TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Ingest-side write, exposed for the ingest collaborator's embedded
    /// mode and for tests.
    pub async fn insert_message(&self, message: &IncomingMessage) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO messages (id, chat_id, sender, text, timestamp, reply_to, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.message_id)
        .bind(&message.chat_id)
        .bind(&message.sender)
        .bind(&message.text)
        .bind(message.timestamp.to_rfc3339())
        .bind(&message.reply_to)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> IncomingMessage {
        let raw_ts: String = row.get("timestamp");
        // Documented leniency: unparseable timestamps fall back to now.
        let timestamp = DateTime::parse_from_rfc3339(&raw_ts)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| {
                warn!("unparseable message timestamp '{}', using now", raw_ts);
                Utc::now()
            });
        IncomingMessage {
            message_id: row.get("id"),
            chat_id: row.get("chat_id"),
            sender: row.get("sender"),
            text: row.get::<Option<String>, _>("text").unwrap_or_default(),
            timestamp,
            reply_to: row.get("reply_to"),
        }
    }

    fn row_to_appointment(row: &sqlx::sqlite::SqliteRow) -> Appointment {
        let parse_utc = |s: Option<String>| {
            s.and_then(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()
            })
        };
        let parse_json_list = |s: String| -> Vec<String> {
            serde_json::from_str(&s).unwrap_or_default()
        };

        Appointment {
            id: row.get("id"),
            chat_id: row.get("chat_id"),
            title: row.get("title"),
            start_utc: parse_utc(row.get("start_utc")),
            date: row
                .get::<Option<String>, _>("date")
                .and_then(|s| s.parse::<NaiveDate>().ok()),
            all_day: row.get::<i64, _>("all_day") != 0,
            end_utc: parse_utc(row.get("end_utc")),
            participants: parse_json_list(row.get("participants")),
            category: Category::parse(row.get::<String, _>("category").as_str()),
            relevance: Relevance::parse(row.get::<String, _>("relevance").as_str()),
            status: AppointmentStatus::parse(row.get::<String, _>("status").as_str()),
            confidence: row.get("confidence"),
            source_message_ids: parse_json_list(row.get("source_message_ids")),
            calendar_uid: row.get("calendar_uid"),
            reminders: serde_json::from_str(row.get::<String, _>("reminders").as_str())
                .unwrap_or_default(),
            reasoning: row.get("reasoning"),
            pending_sync: row.get::<i64, _>("pending_sync") != 0,
            created_at: parse_utc(row.get("created_at")).unwrap_or_else(Utc::now),
            updated_at: parse_utc(row.get("updated_at")).unwrap_or_else(Utc::now),
        }
    }

    fn row_to_feedback(row: &sqlx::sqlite::SqliteRow) -> Option<FeedbackRecord> {
        let action = FeedbackAction::parse(row.get::<String, _>("action").as_str())?;
        Some(FeedbackRecord {
            id: row.get("id"),
            appointment_id: row.get("appointment_id"),
            action,
            correction: row
                .get::<Option<String>, _>("correction")
                .and_then(|s| serde_json::from_str(&s).ok()),
            reason: row.get("reason"),
            created_at: DateTime::parse_from_rfc3339(row.get::<String, _>("created_at").as_str())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

/// Lock key for the duplicate-or-update window: chat, title shape, day,
/// and a 30-minute start slot.
///
/// The slot granularity matches the validator's time-proximity indicator:
/// two starts in the same slot are always under 30 minutes apart, so a
/// key collision is always a duplicate (suppress or update), never a
/// genuinely distinct appointment. Same-title entries at different times
/// of the day ("Zahnarzt" 9:00 and 16:00) get different keys and coexist.
pub fn dedup_key(
    chat_id: &str,
    title: &str,
    bucket: Option<NaiveDate>,
    slot: Option<u32>,
) -> String {
    let mut hasher = DefaultHasher::new();
    for token in title_tokens(title) {
        token.hash(&mut hasher);
    }
    format!(
        "{}|{:016x}|{}|{}",
        chat_id,
        hasher.finish(),
        bucket.map(|d| d.to_string()).unwrap_or_else(|| "none".into()),
        slot.map(|s| s.to_string()).unwrap_or_else(|| "allday".into())
    )
}

/// The date bucket an appointment's start falls into (UTC day).
pub fn date_bucket(appt: &Appointment) -> Option<NaiveDate> {
    appt.date.or_else(|| appt.start_utc.map(|dt| dt.date_naive()))
}

/// The 30-minute slot of a timed appointment's start; all-day rows have
/// no slot.
pub fn time_slot(appt: &Appointment) -> Option<u32> {
    use chrono::Timelike;
    appt.start_utc.map(|dt| dt.hour() * 2 + dt.minute() / 30)
}

#[async_trait]
impl MessageStore for SqliteStateStore {
    async fn recent_messages(
        &self,
        chat_id: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<IncomingMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE chat_id = ? AND timestamp < ?
             ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(chat_id)
        .bind(before.to_rfc3339())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<IncomingMessage> =
            rows.iter().map(Self::row_to_message).collect();
        messages.reverse();
        Ok(messages)
    }

    async fn messages_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<IncomingMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE timestamp >= ? ORDER BY timestamp ASC LIMIT ?",
        )
        .bind(since.to_rfc3339())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::row_to_message).collect())
    }

    async fn unprocessed_messages(&self, limit: usize) -> anyhow::Result<Vec<IncomingMessage>> {
        let rows = sqlx::query(
            "SELECT m.* FROM messages m
             LEFT JOIN extraction_log e ON e.message_id = m.id
             WHERE e.message_id IS NULL
             ORDER BY m.timestamp ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::row_to_message).collect())
    }

    async fn mark_processed(&self, message_id: &str, outcome: &str) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO extraction_log (message_id, outcome, created_at)
             VALUES (?, ?, ?)",
        )
        .bind(message_id)
        .bind(outcome)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AppointmentStore for SqliteStateStore {
    async fn insert_appointment(&self, appt: &Appointment) -> anyhow::Result<InsertOutcome> {
        let key = dedup_key(&appt.chat_id, &appt.title, date_bucket(appt), time_slot(appt));
        let result = sqlx::query(
            "INSERT INTO appointments
             (id, chat_id, title, start_utc, date, all_day, end_utc, participants,
              category, relevance, status, confidence, source_message_ids,
              calendar_uid, reminders, reasoning, pending_sync, dedup_key, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&appt.id)
        .bind(&appt.chat_id)
        .bind(&appt.title)
        .bind(appt.start_utc.map(|dt| dt.to_rfc3339()))
        .bind(appt.date.map(|d| d.to_string()))
        .bind(appt.all_day as i64)
        .bind(appt.end_utc.map(|dt| dt.to_rfc3339()))
        .bind(serde_json::to_string(&appt.participants)?)
        .bind(appt.category.as_str())
        .bind(appt.relevance.as_str())
        .bind(appt.status.as_str())
        .bind(appt.confidence)
        .bind(serde_json::to_string(&appt.source_message_ids)?)
        .bind(&appt.calendar_uid)
        .bind(serde_json::to_string(&appt.reminders)?)
        .bind(&appt.reasoning)
        .bind(appt.pending_sync as i64)
        .bind(&key)
        .bind(appt.created_at.to_rfc3339())
        .bind(appt.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Ok(InsertOutcome::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_appointment(&self, id: &str) -> anyhow::Result<Option<Appointment>> {
        let row = sqlx::query("SELECT * FROM appointments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::row_to_appointment))
    }

    async fn appointments_in_window(
        &self,
        chat_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Appointment>> {
        let rows = sqlx::query(
            "SELECT * FROM appointments
             WHERE chat_id = ?
               AND ((start_utc IS NOT NULL AND start_utc >= ? AND start_utc <= ?)
                 OR (date IS NOT NULL AND date >= ? AND date <= ?))
             ORDER BY COALESCE(start_utc, date) ASC
             LIMIT ?",
        )
        .bind(chat_id)
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .bind(from.date_naive().to_string())
        .bind(to.date_naive().to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::row_to_appointment).collect())
    }

    async fn apply_update(&self, id: &str, action: &ValidatedAction) -> anyhow::Result<()> {
        let Some(mut appt) = self.get_appointment(id).await? else {
            anyhow::bail!("appointment {} not found", id);
        };

        if !action.title.trim().is_empty() {
            appt.title = action.title.clone();
        }
        if action.start_utc.is_some() || action.date.is_some() {
            appt.start_utc = action.start_utc;
            appt.date = action.date;
            appt.all_day = action.all_day;
        }
        if action.end_utc.is_some() {
            appt.end_utc = action.end_utc;
        }
        if !action.participants.is_empty() {
            appt.participants = action.participants.clone();
        }
        appt.category = action.category;
        appt.relevance = action.relevance;
        appt.confidence = action.confidence;

        let key = dedup_key(&appt.chat_id, &appt.title, date_bucket(&appt), time_slot(&appt));
        sqlx::query(
            "UPDATE appointments SET
                title = ?, start_utc = ?, date = ?, all_day = ?, end_utc = ?,
                participants = ?, category = ?, relevance = ?, confidence = ?,
                dedup_key = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&appt.title)
        .bind(appt.start_utc.map(|dt| dt.to_rfc3339()))
        .bind(appt.date.map(|d| d.to_string()))
        .bind(appt.all_day as i64)
        .bind(appt.end_utc.map(|dt| dt.to_rfc3339()))
        .bind(serde_json::to_string(&appt.participants)?)
        .bind(appt.category.as_str())
        .bind(appt.relevance.as_str())
        .bind(appt.confidence)
        .bind(&key)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_correction(
        &self,
        id: &str,
        correction: &serde_json::Value,
    ) -> anyhow::Result<()> {
        let Some(mut appt) = self.get_appointment(id).await? else {
            anyhow::bail!("appointment {} not found", id);
        };
        let Some(fields) = correction.as_object() else {
            anyhow::bail!("correction is not an object");
        };

        for (field, value) in fields {
            match field.as_str() {
                "title" => {
                    if let Some(s) = value.as_str() {
                        appt.title = s.to_string();
                    }
                }
                "datetime" => {
                    if let Some(s) = value.as_str() {
                        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                            appt.start_utc = Some(dt.with_timezone(&Utc));
                            appt.date = None;
                            appt.all_day = false;
                        }
                    }
                }
                "date" => {
                    if let Some(s) = value.as_str() {
                        if let Ok(d) = s.parse::<NaiveDate>() {
                            appt.date = Some(d);
                            appt.start_utc = None;
                            appt.all_day = true;
                        }
                    }
                }
                "end_datetime" => {
                    if let Some(s) = value.as_str() {
                        appt.end_utc = DateTime::parse_from_rfc3339(s)
                            .map(|dt| dt.with_timezone(&Utc))
                            .ok();
                    }
                }
                "category" => {
                    if let Some(s) = value.as_str() {
                        appt.category = Category::parse(s);
                    }
                }
                "relevance" => {
                    if let Some(s) = value.as_str() {
                        appt.relevance = Relevance::parse(s);
                    }
                }
                "participants" => {
                    if let Ok(list) = serde_json::from_value::<Vec<String>>(value.clone()) {
                        appt.participants = list;
                    }
                }
                other => warn!("ignoring unknown correction field '{}'", other),
            }
        }

        let key = dedup_key(&appt.chat_id, &appt.title, date_bucket(&appt), time_slot(&appt));
        sqlx::query(
            "UPDATE appointments SET
                title = ?, start_utc = ?, date = ?, all_day = ?, end_utc = ?,
                participants = ?, category = ?, relevance = ?, dedup_key = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&appt.title)
        .bind(appt.start_utc.map(|dt| dt.to_rfc3339()))
        .bind(appt.date.map(|d| d.to_string()))
        .bind(appt.all_day as i64)
        .bind(appt.end_utc.map(|dt| dt.to_rfc3339()))
        .bind(serde_json::to_string(&appt.participants)?)
        .bind(appt.category.as_str())
        .bind(appt.relevance.as_str())
        .bind(&key)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_status(&self, id: &str, status: AppointmentStatus) -> anyhow::Result<()> {
        sqlx::query("UPDATE appointments SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_calendar_uid(&self, id: &str, uid: Option<&str>) -> anyhow::Result<()> {
        sqlx::query("UPDATE appointments SET calendar_uid = ?, updated_at = ? WHERE id = ?")
            .bind(uid)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_pending_sync(&self, id: &str, pending: bool) -> anyhow::Result<()> {
        sqlx::query("UPDATE appointments SET pending_sync = ?, updated_at = ? WHERE id = ?")
            .bind(pending as i64)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_reasoning(&self, id: &str, note: &str) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE appointments
             SET reasoning = CASE WHEN reasoning = '' THEN ? ELSE reasoning || char(10) || ? END,
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(note)
        .bind(note)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn expire_stale_suggestions(
        &self,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Appointment>> {
        let rows = sqlx::query(
            "SELECT * FROM appointments WHERE status = 'suggested' AND created_at < ?",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        let stale: Vec<Appointment> = rows.iter().map(Self::row_to_appointment).collect();

        for appt in &stale {
            self.set_status(&appt.id, AppointmentStatus::Skipped).await?;
        }
        Ok(stale)
    }

    async fn active_appointments(&self) -> anyhow::Result<Vec<Appointment>> {
        let rows = sqlx::query(
            "SELECT * FROM appointments WHERE status IN ('auto','suggested','confirmed')
             ORDER BY COALESCE(start_utc, date) ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::row_to_appointment).collect())
    }

    async fn appointments_since(
        &self,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Appointment>> {
        let rows = sqlx::query(
            "SELECT * FROM appointments WHERE created_at >= ? ORDER BY created_at ASC",
        )
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::row_to_appointment).collect())
    }
}

#[async_trait]
impl FeedbackStore for SqliteStateStore {
    async fn insert_feedback(&self, record: &FeedbackRecord) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO feedback (id, appointment_id, action, correction, reason, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.appointment_id)
        .bind(record.action.as_str())
        .bind(
            record
                .correction
                .as_ref()
                .map(|c| serde_json::to_string(c))
                .transpose()?,
        )
        .bind(&record.reason)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_feedback(
        &self,
        chat_id: &str,
        actions: &[FeedbackAction],
        limit: usize,
    ) -> anyhow::Result<Vec<(FeedbackRecord, String)>> {
        if actions.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; actions.len()].join(",");
        let sql = format!(
            "SELECT f.*, a.title AS appt_title FROM feedback f
             JOIN appointments a ON a.id = f.appointment_id
             WHERE a.chat_id = ? AND f.action IN ({})
             ORDER BY f.created_at DESC LIMIT ?",
            placeholders
        );
        let mut query = sqlx::query(&sql).bind(chat_id);
        for action in actions {
            query = query.bind(action.as_str());
        }
        let rows = query.bind(limit as i64).fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                Self::row_to_feedback(row).map(|r| (r, row.get::<String, _>("appt_title")))
            })
            .collect())
    }

    async fn feedback_since(
        &self,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<(FeedbackRecord, String)>> {
        let rows = sqlx::query(
            "SELECT f.*, a.title AS appt_title FROM feedback f
             JOIN appointments a ON a.id = f.appointment_id
             WHERE f.created_at >= ?
             ORDER BY f.created_at ASC",
        )
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                Self::row_to_feedback(row).map(|r| (r, row.get::<String, _>("appt_title")))
            })
            .collect())
    }
}
