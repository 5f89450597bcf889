//! Memory seeding from a plain-text chat export.
//!
//! Parses the usual export format ("14.02.26, 09:01 - Marike: text",
//! continuation lines belong to the previous message) and pushes every
//! message into the semantic-memory service so recall has history to work
//! with from day one.

use std::path::PathBuf;

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::memory::MemoryClient;
use crate::types::IncomingMessage;

static EXPORT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})\.(\d{1,2})\.(\d{2,4}),?\s+(\d{1,2}):(\d{2})\s+-\s+([^:]+):\s(.*)$")
        .unwrap()
});

/// A timestamp header without a "Sender:" part is a group system notice.
static SYSTEM_NOTICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,2}\.\d{1,2}\.\d{2,4},?\s+\d{1,2}:\d{2}\s+-\s").unwrap());

/// Parse an export into messages. Lines that match no header are appended
/// to the previous message's text; header lines without a sender (group
/// system notices) are skipped.
pub fn parse_export(content: &str, chat_id: &str, tz: Tz) -> Vec<IncomingMessage> {
    let mut messages: Vec<IncomingMessage> = Vec::new();

    for line in content.lines() {
        if let Some(caps) = EXPORT_LINE.captures(line) {
            let (Ok(day), Ok(month), Ok(mut year), Ok(hour), Ok(minute)) = (
                caps[1].parse::<u32>(),
                caps[2].parse::<u32>(),
                caps[3].parse::<i32>(),
                caps[4].parse::<u32>(),
                caps[5].parse::<u32>(),
            ) else {
                continue;
            };
            if year < 100 {
                year += 2000;
            }
            let Some(naive) = NaiveDate::from_ymd_opt(year, month, day)
                .and_then(|d| NaiveTime::from_hms_opt(hour, minute, 0).map(|t| d.and_time(t)))
            else {
                warn!("skipping export line with invalid date: {}", line);
                continue;
            };
            let timestamp = tz
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);

            messages.push(IncomingMessage {
                message_id: format!("import-{}-{}", chat_id, messages.len()),
                chat_id: chat_id.to_string(),
                sender: caps[6].trim().to_string(),
                text: caps[7].to_string(),
                timestamp,
                reply_to: None,
            });
        } else if SYSTEM_NOTICE.is_match(line) {
            continue;
        } else if let Some(last) = messages.last_mut() {
            if !line.trim().is_empty() {
                last.text.push('\n');
                last.text.push_str(line);
            }
        }
    }

    messages
}

pub async fn run(config: AppConfig, export_path: PathBuf) -> anyhow::Result<()> {
    let tz: Tz = config
        .extraction
        .timezone
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid timezone"))?;
    if !config.memory.enabled {
        anyhow::bail!("memory is disabled in config; nothing to seed");
    }
    let memory = MemoryClient::new(&config.memory)?;

    let content = std::fs::read_to_string(&export_path)?;
    let chat_id = export_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("import")
        .to_string();

    let messages = parse_export(&content, &chat_id, tz);
    info!(count = messages.len(), chat = %chat_id, "parsed chat export");

    let mut stored = 0usize;
    let mut failed = 0usize;
    for (i, message) in messages.iter().enumerate() {
        if memory
            .memorize_now(
                &message.chat_id,
                &message.sender,
                &message.text,
                message.timestamp,
                &message.message_id,
            )
            .await
        {
            stored += 1;
        } else {
            failed += 1;
        }
        if (i + 1) % 100 == 0 {
            info!("seeded {}/{} messages", i + 1, messages.len());
        }
    }

    info!(stored, failed, "memory bootstrap complete");
    println!("Seeded {} messages into memory ({} failed).", stored, failed);
    Ok(())
}
