//! The per-person knowledge profile: the YAML shape on disk, the invariants
//! on its fact lists, and the prompt rendering.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

/// Hard cap on unverified observations per person.
pub const UNCERTAIN_CAP: usize = 20;

/// A recurring activity with the scheduling rules the LLM should apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Activity {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub termin_logic: Vec<String>,
}

/// One family member's profile. The YAML file on disk is the source of
/// truth; `key` is the file stem and is not serialized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Person {
    #[serde(skip)]
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Confirmed statements only.
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub activities: BTreeMap<String, Activity>,
    #[serde(default)]
    pub termin_hints: Vec<String>,
    /// Unverified observations; bounded ring, oldest aged out.
    #[serde(default)]
    pub uncertain: VecDeque<String>,
    /// Observed (weekday, time) samples per activity, for pattern learning.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub time_observations: BTreeMap<String, Vec<String>>,
}

impl Person {
    /// Whether `text` mentions this person by name or alias,
    /// case-insensitive with word boundaries.
    pub fn is_mentioned_in(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        std::iter::once(&self.name)
            .chain(self.aliases.iter())
            .any(|candidate| contains_word(&lower, &candidate.to_lowercase()))
    }

    /// Append a confirmed fact. Removes the same string from `uncertain`
    /// so no statement lives in both lists.
    pub fn add_fact(&mut self, fact: &str) -> bool {
        let fact = fact.trim();
        if fact.is_empty() || self.facts.iter().any(|f| f == fact) {
            return false;
        }
        self.uncertain.retain(|u| u != fact);
        self.facts.push(fact.to_string());
        true
    }

    /// Append an unverified observation. Deduplicates against both lists
    /// and ages out the oldest entry beyond the cap.
    pub fn note_uncertain(&mut self, observation: &str) -> bool {
        let observation = observation.trim();
        if observation.is_empty()
            || self.facts.iter().any(|f| f == observation)
            || self.uncertain.iter().any(|u| u == observation)
        {
            return false;
        }
        self.uncertain.push_back(observation.to_string());
        while self.uncertain.len() > UNCERTAIN_CAP {
            self.uncertain.pop_front();
        }
        true
    }

    pub fn add_termin_hint(&mut self, hint: &str) -> bool {
        let hint = hint.trim();
        if hint.is_empty()
            || self.termin_hints.iter().any(|h| h.eq_ignore_ascii_case(hint))
        {
            return false;
        }
        self.termin_hints.push(hint.to_string());
        true
    }

    /// Render the profile fragment shipped into the extraction prompt.
    /// Bounded: facts and hints are many-but-short, uncertain capped at 3.
    pub fn render_prompt_fragment(&self) -> String {
        let mut lines = vec![format!(
            "{} ({})",
            self.name,
            if self.role.is_empty() { "?" } else { &self.role }
        )];

        for fact in &self.facts {
            lines.push(format!("  - {}", fact));
        }

        for (name, activity) in &self.activities {
            if activity.pattern.is_empty() {
                lines.push(format!("  Aktivität {}:", name));
            } else {
                lines.push(format!("  Aktivität {}: {}", name, activity.pattern));
            }
            for rule in &activity.termin_logic {
                lines.push(format!("    -> {}", rule));
            }
        }

        if !self.termin_hints.is_empty() {
            lines.push("  Termin-Regeln:".to_string());
            for hint in &self.termin_hints {
                lines.push(format!("    * {}", hint));
            }
        }

        let recent_uncertain: Vec<&String> = self.uncertain.iter().rev().take(3).collect();
        if !recent_uncertain.is_empty() {
            lines.push("  Unbestätigt:".to_string());
            for u in recent_uncertain.into_iter().rev() {
                lines.push(format!("    ? {}", u));
            }
        }

        lines.truncate(80);
        lines.join("\n")
    }
}

/// Word-boundary containment on already-lowercased haystack/needle.
/// A trailing genitive "s" counts as part of the word ("Romys Feier").
fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let abs = start + pos;
        let before_ok = abs == 0
            || !haystack[..abs]
                .chars()
                .next_back()
                .map(|c| c.is_alphanumeric())
                .unwrap_or(false);
        let rest = &haystack[abs + needle.len()..];
        let after_ok = match rest.chars().next() {
            None => true,
            Some('s') => !rest
                .chars()
                .nth(1)
                .map(|c| c.is_alphanumeric())
                .unwrap_or(false),
            Some(c) => !c.is_alphanumeric(),
        };
        if before_ok && after_ok {
            return true;
        }
        start = abs + needle.len();
        if start >= haystack.len() {
            break;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn romy() -> Person {
        Person {
            key: "romy".into(),
            name: "Romy".into(),
            role: "Tochter".into(),
            aliases: vec!["Romylein".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_mention_detection_word_boundaries() {
        let p = romy();
        assert!(p.is_mentioned_in("Kannst du Romy abholen?"));
        assert!(p.is_mentioned_in("romy ist krank"));
        assert!(p.is_mentioned_in("Romylein hat Geburtstag"));
        // Substring inside another word must not match.
        assert!(!p.is_mentioned_in("Das Aeromystik-Festival"));
    }

    #[test]
    fn test_mention_genitive_and_punctuation() {
        let p = romy();
        assert!(p.is_mentioned_in("Für Romys Feier"));
        assert!(p.is_mentioned_in("Gehört Romy, oder?"));
        assert!(!p.is_mentioned_in("Romyverse ist ein Computerspiel"));
    }

    #[test]
    fn test_fact_removes_matching_uncertain() {
        let mut p = romy();
        assert!(p.note_uncertain("Geburtstag 18.02."));
        assert!(p.add_fact("Geburtstag 18.02."));
        assert!(p.uncertain.is_empty());
        assert_eq!(p.facts, vec!["Geburtstag 18.02."]);
    }

    #[test]
    fn test_uncertain_rejects_known_fact() {
        let mut p = romy();
        p.add_fact("Geburtstag 18.02.");
        assert!(!p.note_uncertain("Geburtstag 18.02."));
        assert!(p.uncertain.is_empty());
    }

    #[test]
    fn test_uncertain_ring_caps_at_20() {
        let mut p = romy();
        for i in 0..30 {
            p.note_uncertain(&format!("Beobachtung {}", i));
        }
        assert_eq!(p.uncertain.len(), UNCERTAIN_CAP);
        // Oldest aged out, newest kept.
        assert_eq!(p.uncertain.front().unwrap(), "Beobachtung 10");
        assert_eq!(p.uncertain.back().unwrap(), "Beobachtung 29");
    }

    #[test]
    fn test_uncertain_dedupes() {
        let mut p = romy();
        assert!(p.note_uncertain("schwimmt gern"));
        assert!(!p.note_uncertain("schwimmt gern"));
        assert_eq!(p.uncertain.len(), 1);
    }

    #[test]
    fn test_prompt_fragment_contains_sections() {
        let mut p = romy();
        p.add_fact("Geburtstag 18.02.");
        p.activities.insert(
            "hort".into(),
            Activity {
                kind: "abholung".into(),
                pattern: "Mo-Fr bis 16:00".into(),
                termin_logic: vec!["Abholung heißt: jemand muss hin".into()],
            },
        );
        p.add_termin_hint("[Auto] hort ist regelmäßig Montags um 16:00");
        p.note_uncertain("mag Süßigkeiten-Tüten");

        let fragment = p.render_prompt_fragment();
        assert!(fragment.starts_with("Romy (Tochter)"));
        assert!(fragment.contains("Geburtstag 18.02."));
        assert!(fragment.contains("Aktivität hort: Mo-Fr bis 16:00"));
        assert!(fragment.contains("Termin-Regeln:"));
        assert!(fragment.contains("? mag Süßigkeiten-Tüten"));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut p = romy();
        p.add_fact("Geburtstag 18.02.");
        p.note_uncertain("Feier evtl. am 21.02.");
        let yaml = serde_yaml::to_string(&p).unwrap();
        let back: Person = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.name, "Romy");
        assert_eq!(back.facts, p.facts);
        assert_eq!(back.uncertain, p.uncertain);
    }
}
