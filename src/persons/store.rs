//! Loading, caching and mutating person profiles.
//!
//! The store is a process-wide singleton. Reads observe the last committed
//! snapshot; writes are serialized per profile file and land atomically
//! via rename-into-place, then invalidate the cache.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::profile::{Activity, Person};
use crate::types::{FeedbackAction, FeedbackRecord};

/// Activity keywords recognized in appointment titles, used to attribute
/// an extraction to a recurring activity.
const ACTIVITY_KEYWORDS: &[&str] = &[
    "wettkampf",
    "turnier",
    "meisterschaft",
    "schwimmen",
    "training",
    "abholen",
    "abholung",
    "hort",
    "schule",
    "kita",
    "geburtstag",
    "kindergeburtstag",
    "arzt",
    "zahnarzt",
    "treffen",
    "übergabe",
];

const WEEKDAYS_DE: [&str; 7] = [
    "Montag", "Dienstag", "Mittwoch", "Donnerstag", "Freitag", "Samstag", "Sonntag",
];

/// One person's update block from a reflection cycle.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub new_facts: Vec<String>,
    #[serde(default)]
    pub new_activities: BTreeMap<String, Activity>,
    #[serde(default)]
    pub new_termin_hints: Vec<String>,
    #[serde(default)]
    pub confidence_notes: Vec<String>,
}

pub struct PersonStore {
    dir: PathBuf,
    cache: RwLock<Option<Arc<Vec<Person>>>>,
    write_locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PersonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(None),
            write_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Immutable snapshot of all profiles, loading from disk on first use.
    pub fn load(&self) -> Arc<Vec<Person>> {
        if let Some(snapshot) = self.cache.read().unwrap_or_else(|e| e.into_inner()).clone() {
            return snapshot;
        }
        self.reload()
    }

    /// Invalidate the cache and re-read every profile file.
    pub fn reload(&self) -> Arc<Vec<Person>> {
        let mut persons = Vec::new();
        match std::fs::read_dir(&self.dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                        continue;
                    }
                    match Self::read_profile(&path) {
                        Ok(person) => persons.push(person),
                        Err(e) => warn!("skipping unreadable profile {}: {}", path.display(), e),
                    }
                }
            }
            Err(e) => warn!("persons directory {} not readable: {}", self.dir.display(), e),
        }
        persons.sort_by(|a, b| a.key.cmp(&b.key));
        info!(count = persons.len(), "person profiles loaded");

        let snapshot = Arc::new(persons);
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = Some(snapshot.clone());
        snapshot
    }

    fn read_profile(path: &Path) -> anyhow::Result<Person> {
        let content = std::fs::read_to_string(path)?;
        let mut person: Person = serde_yaml::from_str(&content)?;
        if person.name.trim().is_empty() {
            anyhow::bail!("profile has no name");
        }
        person.key = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        Ok(person)
    }

    /// Persons referenced in the current text or the preceding window.
    pub fn detect(&self, text: &str, window_texts: &[String]) -> Vec<Person> {
        self.load()
            .iter()
            .filter(|p| {
                p.is_mentioned_in(text) || window_texts.iter().any(|t| p.is_mentioned_in(t))
            })
            .cloned()
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<Person> {
        self.load().iter().find(|p| p.key == key).cloned()
    }

    /// Which person an appointment title is about, if any.
    pub fn detect_in_title(&self, title: &str) -> Option<Person> {
        self.load()
            .iter()
            .find(|p| p.is_mentioned_in(title))
            .cloned()
    }

    /// Translate a user correction into profile edits. Append-only: a
    /// rejection or edit becomes a termin hint the next prompt will carry.
    pub async fn apply_feedback(
        &self,
        title: &str,
        record: &FeedbackRecord,
    ) -> anyhow::Result<Vec<String>> {
        let Some(mut person) = self.detect_in_title(title) else {
            debug!("no person detected in title '{}', nothing to learn", title);
            return Ok(Vec::new());
        };

        let mut diff = Vec::new();
        match record.action {
            FeedbackAction::Rejected => {
                let reason = record.reason.as_deref().unwrap_or("kein Grund angegeben");
                let hint = format!("[Feedback] '{}' wurde ABGELEHNT: {}", title, reason);
                if person.add_termin_hint(&hint) {
                    diff.push(format!("{}: +hint ({})", person.key, reason));
                }
            }
            FeedbackAction::Edited => {
                if let Some(correction) = record.correction.as_ref().and_then(|c| c.as_object()) {
                    let changes: Vec<String> = correction
                        .iter()
                        .map(|(k, v)| format!("{} -> {}", k, v))
                        .collect();
                    let hint = format!(
                        "[Feedback] '{}' wurde KORRIGIERT: {}",
                        title,
                        changes.join(", ")
                    );
                    if person.add_termin_hint(&hint) {
                        diff.push(format!("{}: +hint (korrigiert)", person.key));
                    }
                }
            }
            FeedbackAction::Confirmed | FeedbackAction::Skipped => {}
        }

        if !diff.is_empty() {
            self.save(&person).await?;
        }
        Ok(diff)
    }

    /// Accept a reflection cycle's structured updates. Never invents
    /// persons, never overwrites facts, never removes uncertain entries.
    pub async fn apply_reflection(
        &self,
        updates: &BTreeMap<String, ProfileUpdate>,
    ) -> anyhow::Result<Vec<String>> {
        let mut diff = Vec::new();

        for (key, update) in updates {
            let Some(mut person) = self.get(key) else {
                warn!("reflection referenced unknown person '{}', skipping", key);
                continue;
            };

            let mut changed = false;
            for fact in &update.new_facts {
                if person.add_fact(fact) {
                    diff.push(format!("{}: +fact '{}'", key, fact));
                    changed = true;
                }
            }
            for note in &update.confidence_notes {
                if person.note_uncertain(note) {
                    diff.push(format!("{}: +uncertain '{}'", key, note));
                    changed = true;
                }
            }
            for hint in &update.new_termin_hints {
                if person.add_termin_hint(hint) {
                    diff.push(format!("{}: +hint '{}'", key, hint));
                    changed = true;
                }
            }
            for (name, activity) in &update.new_activities {
                if !person.activities.contains_key(name) {
                    person.activities.insert(name.clone(), activity.clone());
                    diff.push(format!("{}: +activity '{}'", key, name));
                    changed = true;
                }
            }

            if changed {
                self.save(&person).await?;
            }
        }

        Ok(diff)
    }

    /// Learn time patterns from a confirmed extraction. Three samples on
    /// the same weekday materialize an `[Auto]` termin hint.
    pub async fn record_observation(
        &self,
        title: &str,
        local_start: NaiveDateTime,
    ) -> anyhow::Result<()> {
        let Some(mut person) = self.detect_in_title(title) else {
            return Ok(());
        };
        let Some(activity) = normalize_activity(title) else {
            return Ok(());
        };

        let weekday = WEEKDAYS_DE[local_start.format("%u").to_string().parse::<usize>()? - 1];
        let entry = format!("{} {}", weekday, local_start.format("%H:%M"));

        let observations = person
            .time_observations
            .entry(activity.to_string())
            .or_default();
        if observations.contains(&entry) {
            return Ok(());
        }
        observations.push(entry);
        if observations.len() > 20 {
            let excess = observations.len() - 20;
            observations.drain(..excess);
        }

        // Recurring pattern: 3+ observations on the same weekday.
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for obs in observations.iter() {
            if let Some(day) = obs.split_whitespace().next() {
                *counts.entry(day).or_default() += 1;
            }
        }
        let pattern_hint = counts.iter().find(|(_, &c)| c >= 3).map(|(day, _)| {
            let times: Vec<&str> = observations
                .iter()
                .filter(|o| o.starts_with(*day))
                .filter_map(|o| o.split_whitespace().nth(1))
                .collect();
            let mut time_counts: HashMap<&str, usize> = HashMap::new();
            for t in &times {
                *time_counts.entry(t).or_default() += 1;
            }
            let common_time = time_counts
                .into_iter()
                .max_by_key(|(_, c)| *c)
                .map(|(t, _)| t)
                .unwrap_or("?");
            format!("[Auto] {} ist regelmäßig {}s um {}", activity, day, common_time)
        });

        if let Some(hint) = pattern_hint {
            if person.add_termin_hint(&hint) {
                info!(person = %person.key, "learned recurring pattern: {}", hint);
            }
        }

        self.save(&person).await
    }

    /// Atomic per-profile write: temp file in the same directory, then
    /// rename into place. Serialized per key.
    pub async fn save(&self, person: &Person) -> anyhow::Result<()> {
        let lock = {
            let mut locks = self.write_locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(person.key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        std::fs::create_dir_all(&self.dir)?;
        let yaml = serde_yaml::to_string(person)?;
        let final_path = self.dir.join(format!("{}.yaml", person.key));
        let tmp_path = self.dir.join(format!(".{}.yaml.tmp", person.key));
        std::fs::write(&tmp_path, yaml)?;
        std::fs::rename(&tmp_path, &final_path)?;

        // Next read sees the committed state.
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

/// Extract the core activity from an appointment title.
/// "Enno Wettkampf bis 18 Uhr" -> "wettkampf"
fn normalize_activity(title: &str) -> Option<&'static str> {
    let lower = title.to_lowercase();
    ACTIVITY_KEYWORDS.iter().find(|kw| lower.contains(*kw)).copied()
}
