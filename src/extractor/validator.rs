//! Post-extraction validation and normalization.
//!
//! The rules run in a fixed order; an action that violates an invariant is
//! dropped while its valid siblings survive. Times leave this module as
//! UTC instants (timed) or naive dates (all-day), never both.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use super::dates::{parse_when, ParsedWhen};
use crate::config::FamilyConfig;
use crate::context::PromptContext;
use crate::types::{
    ActionKind, Appointment, AppointmentAction, IncomingMessage, ValidatedAction,
};
use crate::utils::{title_tokens, token_overlap};

static VON_BIS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bvon\s+(\d{1,2})(?::(\d{2}))?\s*(?:uhr)?\s+bis\s+(\d{1,2})(?::(\d{2}))?\s*(?:uhr)?")
        .unwrap()
});

// The tail keeps "bis 18. März" (a date) from being read as an end time.
static BIS_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bbis\s+(\d{1,2})(?::(\d{2}))?\s*(?:uhr\b|[^\.\d]|$)").unwrap());

static PREP_TASK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(einpacken|packen|kaufen|besorgen|backen|vorbereiten|mitbringen)\b").unwrap()
});

/// How far a prep task looks ahead for the event it belongs to.
const PREP_LOOKAHEAD_DAYS: u64 = 7;

/// Duplicate search window around the target start.
const DUPLICATE_WINDOW_DAYS: i64 = 14;

/// Validated actions plus reasoning notes to attach to existing rows
/// (prep-task demotions).
#[derive(Debug, Default)]
pub struct ValidationOutput {
    pub actions: Vec<ValidatedAction>,
    pub annotations: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateDecision {
    Distinct,
    Update(String),
    Suppress,
}

pub struct Validator {
    tz: Tz,
    family: FamilyConfig,
    duplicate_threshold: f64,
    suppress_threshold: f64,
}

impl Validator {
    pub fn new(
        tz: Tz,
        family: FamilyConfig,
        duplicate_threshold: f64,
        suppress_threshold: f64,
    ) -> Self {
        Self {
            tz,
            family,
            duplicate_threshold,
            suppress_threshold,
        }
    }

    pub fn validate(
        &self,
        actions: Vec<AppointmentAction>,
        ctx: &PromptContext,
        message: &IncomingMessage,
    ) -> ValidationOutput {
        let mut output = ValidationOutput::default();

        for action in actions {
            match self.validate_one(action, ctx, message, &mut output) {
                Some(validated) => output.actions.push(validated),
                None => {}
            }
        }

        output
    }

    fn validate_one(
        &self,
        action: AppointmentAction,
        ctx: &PromptContext,
        message: &IncomingMessage,
        output: &mut ValidationOutput,
    ) -> Option<ValidatedAction> {
        // Shape: a usable title, and resolvable references.
        let title = action.title.trim().to_string();
        if title.is_empty() {
            debug!("dropping action without title");
            return None;
        }
        let updates_termin_id = match action.action {
            ActionKind::Create => None,
            ActionKind::Update | ActionKind::Cancel => {
                let id = action.updates_termin_id.as_deref().unwrap_or("");
                // Weak reference: resolved against the shipped window only.
                let resolved = ctx.existing_appointments.iter().any(|a| a.id == id);
                if !resolved {
                    // A cancel for something we don't know is ignored by design.
                    debug!(
                        title = %title,
                        "dropping {:?} with unresolved updates_termin_id",
                        action.action
                    );
                    return None;
                }
                Some(id.to_string())
            }
        };

        // Time normalization.
        let synthesized = action.synthesized;
        let parsed = action
            .datetime
            .as_deref()
            .and_then(|raw| parse_when(raw, ctx.today));
        let (mut start_utc, mut date, mut all_day) = match parsed {
            Some(ParsedWhen::DateTime(naive)) => (self.to_utc(naive), None, false),
            Some(ParsedWhen::Date(d)) => (None, Some(d), true),
            None => (None, None, false),
        };
        if action.action == ActionKind::Create && start_utc.is_none() && date.is_none() {
            debug!(title = %title, "dropping create without usable datetime");
            return None;
        }
        let mut end_utc = action
            .end_datetime
            .as_deref()
            .and_then(|raw| parse_when(raw, ctx.today))
            .and_then(|when| match when {
                ParsedWhen::DateTime(naive) => self.to_utc(naive),
                ParsedWhen::Date(_) => None,
            });

        // End-vs-start, before the past check: "bis 18 Uhr" is an end
        // time, not a start time.
        self.apply_end_time_rules(
            &title,
            &message.text,
            &mut start_utc,
            &mut date,
            &mut all_day,
            &mut end_utc,
            ctx.today,
        );

        // Past suppression: historical references never become entries.
        if action.action != ActionKind::Cancel {
            if let Some(start_moment) = self.start_moment(start_utc, date) {
                if start_moment < message.timestamp - ChronoDuration::hours(24) {
                    info!(title = %title, "dropping past-dated action (historical reference)");
                    return None;
                }
            }
        }

        // Confidence clamp; fallback-synthesized actions never exceed 0.4.
        let mut confidence = action.confidence.unwrap_or(0.5).clamp(0.0, 1.0);
        if synthesized {
            confidence = confidence.min(0.4);
        }

        // Prep-task suppression.
        if action.action == ActionKind::Create && PREP_TASK.is_match(&title) {
            if let Some(event) = self.upcoming_event(ctx, message) {
                info!(
                    title = %title,
                    event = %event.title,
                    "demoting prep task to annotation on existing appointment"
                );
                output
                    .annotations
                    .push((event.id.clone(), format!("Vorbereitung: {}", title)));
                return None;
            }
        }

        // Relevance inference from detected persons.
        let relevance = self.infer_relevance(&ctx.detected_person_names, action.relevance);

        // Duplicate-or-update.
        let mut validated = ValidatedAction {
            action: action.action,
            updates_termin_id,
            title,
            start_utc,
            date,
            all_day,
            end_utc,
            participants: action.participants,
            category: action.category,
            relevance,
            confidence,
            reminders: action.reminders,
            reasoning: action.reasoning,
        };
        if validated.action == ActionKind::Create {
            match self.duplicate_decision(&ctx.existing_appointments, &validated) {
                DuplicateDecision::Suppress => {
                    info!(title = %validated.title, "suppressing duplicate create");
                    return None;
                }
                DuplicateDecision::Update(id) => {
                    info!(
                        title = %validated.title,
                        existing = %id,
                        "rewriting duplicate create into update"
                    );
                    validated.action = ActionKind::Update;
                    validated.updates_termin_id = Some(id);
                }
                DuplicateDecision::Distinct => {}
            }
        }

        Some(validated)
    }

    /// Score a create action against an appointment window. Also used by
    /// the pipeline after an insert conflict, with a freshly loaded window.
    pub fn duplicate_decision(
        &self,
        appointments: &[Appointment],
        action: &ValidatedAction,
    ) -> DuplicateDecision {
        let Some((existing, score)) =
            self.best_duplicate(appointments, action.start_utc, action.date, &action.title)
        else {
            return DuplicateDecision::Distinct;
        };
        if score >= self.suppress_threshold
            && self.effectively_identical(existing, action.start_utc, action.date, &action.title)
        {
            return DuplicateDecision::Suppress;
        }
        if score >= self.duplicate_threshold {
            return DuplicateDecision::Update(existing.id.clone());
        }
        DuplicateDecision::Distinct
    }

    fn to_utc(&self, naive: chrono::NaiveDateTime) -> Option<DateTime<Utc>> {
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn start_moment(
        &self,
        start_utc: Option<DateTime<Utc>>,
        date: Option<NaiveDate>,
    ) -> Option<DateTime<Utc>> {
        start_utc.or_else(|| {
            date.and_then(|d| d.and_hms_opt(0, 0, 0))
                .and_then(|naive| self.to_utc(naive))
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_end_time_rules(
        &self,
        title: &str,
        source_text: &str,
        start_utc: &mut Option<DateTime<Utc>>,
        date: &mut Option<NaiveDate>,
        all_day: &mut bool,
        end_utc: &mut Option<DateTime<Utc>>,
        today: NaiveDate,
    ) {
        let haystack = format!("{} {}", title, source_text);

        if let Some(caps) = VON_BIS.captures(&haystack) {
            // "von X bis Y": X is the start, Y the end.
            let from = capture_time(&caps, 1, 2);
            let to = capture_time(&caps, 3, 4);
            let base_date = start_utc
                .map(|dt| dt.with_timezone(&self.tz).date_naive())
                .or(*date)
                .unwrap_or(today);
            if let (Some(from), Some(to)) = (from, to) {
                *start_utc = self.to_utc(base_date.and_time(from));
                *end_utc = self.to_utc(base_date.and_time(to));
                *date = None;
                *all_day = false;
            }
            return;
        }

        if let Some(caps) = BIS_ONLY.captures(&haystack) {
            let Some(bis) = capture_time(&caps, 1, 2) else {
                return;
            };
            let base_date = start_utc
                .map(|dt| dt.with_timezone(&self.tz).date_naive())
                .or(*date)
                .unwrap_or(today);

            let start_is_the_bis_time = start_utc
                .map(|dt| dt.with_timezone(&self.tz).time() == bis)
                .unwrap_or(false);

            if start_is_the_bis_time {
                // The model mistook the end for the start.
                *start_utc = None;
                *date = Some(base_date);
                *all_day = true;
                *end_utc = self.to_utc(base_date.and_time(bis));
            } else if end_utc.is_none() {
                *end_utc = self.to_utc(base_date.and_time(bis));
            }
        }
    }

    /// Nearest upcoming appointment a prep task could belong to. Prefers
    /// title-token overlap, falls back to proximity within the lookahead.
    fn upcoming_event<'a>(
        &self,
        ctx: &'a PromptContext,
        message: &IncomingMessage,
    ) -> Option<&'a Appointment> {
        let horizon = message.timestamp + ChronoDuration::days(PREP_LOOKAHEAD_DAYS as i64);
        let candidates: Vec<&Appointment> = ctx
            .existing_appointments
            .iter()
            .filter(|a| !a.status.is_terminal())
            .filter(|a| {
                self.start_moment(a.start_utc, a.date)
                    .map(|s| s >= message.timestamp && s <= horizon)
                    .unwrap_or(false)
            })
            .collect();

        candidates
            .iter()
            .find(|a| token_overlap(&a.title, &message.text) > 0.0)
            .copied()
            .or_else(|| candidates.first().copied())
    }

    fn infer_relevance(
        &self,
        detected: &[String],
        from_model: crate::types::Relevance,
    ) -> crate::types::Relevance {
        use crate::types::Relevance;

        if detected.is_empty() {
            return from_model;
        }
        let is_child = |name: &str| {
            self.family
                .children_names
                .iter()
                .any(|c| c.eq_ignore_ascii_case(name))
        };
        if detected.iter().any(|n| is_child(n)) {
            return Relevance::Shared;
        }
        let only = |target: &str| {
            detected.len() == 1 && detected[0].eq_ignore_ascii_case(target)
        };
        if only(&self.family.partner_name) {
            return Relevance::PartnerOnly;
        }
        if only(&self.family.user_name) {
            return Relevance::ForMe;
        }
        Relevance::Shared
    }

    fn best_duplicate<'a>(
        &self,
        appointments: &'a [Appointment],
        start_utc: Option<DateTime<Utc>>,
        date: Option<NaiveDate>,
        title: &str,
    ) -> Option<(&'a Appointment, f64)> {
        let target = self.start_moment(start_utc, date)?;
        let window_start = target - ChronoDuration::days(DUPLICATE_WINDOW_DAYS);
        let window_end = target + ChronoDuration::days(DUPLICATE_WINDOW_DAYS);

        appointments
            .iter()
            .filter(|a| !a.status.is_terminal())
            .filter_map(|a| {
                let existing_start = self.start_moment(a.start_utc, a.date)?;
                if existing_start < window_start || existing_start > window_end {
                    return None;
                }
                let time_close = if date.is_some() || a.all_day {
                    // All-day proximity is date equality in the local zone.
                    let target_date = date.unwrap_or_else(|| {
                        target.with_timezone(&self.tz).date_naive()
                    });
                    let existing_date = a.date.unwrap_or_else(|| {
                        existing_start.with_timezone(&self.tz).date_naive()
                    });
                    target_date == existing_date
                } else {
                    (existing_start - target).num_minutes().abs() < 30
                };
                let score = 0.5 * token_overlap(&a.title, title)
                    + if time_close { 0.5 } else { 0.0 };
                Some((a, score))
            })
            .max_by(|(_, s1), (_, s2)| s1.partial_cmp(s2).unwrap_or(std::cmp::Ordering::Equal))
    }

    fn effectively_identical(
        &self,
        existing: &Appointment,
        start_utc: Option<DateTime<Utc>>,
        date: Option<NaiveDate>,
        title: &str,
    ) -> bool {
        if title_tokens(&existing.title) != title_tokens(title) {
            return false;
        }
        match (start_utc, existing.start_utc) {
            (Some(a), Some(b)) => (a - b).num_minutes().abs() < 1,
            (None, None) => date == existing.date,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{all_day_appointment, appointment, message_at};
    use crate::types::{Category, Relevance};

    fn family() -> FamilyConfig {
        FamilyConfig {
            user_name: "Jan".into(),
            partner_name: "Marike".into(),
            children_names: vec!["Enno".into(), "Romy".into()],
        }
    }

    fn validator() -> Validator {
        Validator::new(chrono_tz::Europe::Berlin, family(), 0.7, 0.9)
    }

    fn ctx_with(appointments: Vec<Appointment>, detected: Vec<&str>) -> PromptContext {
        PromptContext {
            user_name: "Jan".into(),
            partner_name: "Marike".into(),
            children_names: vec!["Enno".into(), "Romy".into()],
            today: NaiveDate::from_ymd_opt(2026, 2, 16).unwrap(),
            today_weekday: "Montag".into(),
            existing_appointments: appointments,
            detected_person_names: detected.into_iter().map(String::from).collect(),
            ..Default::default()
        }
    }

    fn create(title: &str, datetime: &str) -> AppointmentAction {
        AppointmentAction {
            title: title.into(),
            datetime: Some(datetime.into()),
            confidence: Some(0.8),
            ..Default::default()
        }
    }

    fn msg(text: &str) -> IncomingMessage {
        // 2026-02-16 09:00 Berlin = 08:00 UTC.
        message_at(text, Utc.with_ymd_and_hms(2026, 2, 16, 8, 0, 0).unwrap())
    }

    #[test]
    fn test_missing_title_dropped_siblings_kept() {
        let actions = vec![
            AppointmentAction { datetime: Some("2026-02-17T10:00".into()), ..Default::default() },
            create("Enno Training", "2026-02-17T17:00"),
        ];
        let out = validator().validate(actions, &ctx_with(vec![], vec![]), &msg("x"));
        assert_eq!(out.actions.len(), 1);
        assert_eq!(out.actions[0].title, "Enno Training");
    }

    #[test]
    fn test_timed_action_converts_to_utc() {
        let out = validator().validate(
            vec![create("Enno Training", "2026-02-17T17:00")],
            &ctx_with(vec![], vec![]),
            &msg("Training morgen 17:00"),
        );
        let a = &out.actions[0];
        assert!(!a.all_day);
        assert!(a.date.is_none());
        // 17:00 Berlin (CET, +1) = 16:00 UTC.
        assert_eq!(
            a.start_utc.unwrap(),
            Utc.with_ymd_and_hms(2026, 2, 17, 16, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_date_only_becomes_all_day() {
        let out = validator().validate(
            vec![create("Romy Geburtstagsfeier", "2026-02-21")],
            &ctx_with(vec![], vec![]),
            &msg("Feier am 21.02."),
        );
        let a = &out.actions[0];
        assert!(a.all_day);
        assert_eq!(a.date, NaiveDate::from_ymd_opt(2026, 2, 21));
        assert!(a.start_utc.is_none());
    }

    #[test]
    fn test_exactly_one_of_datetime_or_date() {
        let out = validator().validate(
            vec![
                create("A", "2026-02-17T17:00"),
                create("B", "2026-02-21"),
            ],
            &ctx_with(vec![], vec![]),
            &msg("x"),
        );
        for a in &out.actions {
            assert!(a.start_utc.is_some() ^ a.date.is_some());
            assert_eq!(a.all_day, a.date.is_some());
        }
    }

    #[test]
    fn test_historical_reference_dropped() {
        // Today is 2026-03-01; the message looks back at 18.02.
        let message = message_at(
            "Am 18.02. hatten wir Romys Geburtstag",
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        );
        let mut ctx = ctx_with(vec![], vec!["Romy"]);
        ctx.today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();

        let out = validator().validate(
            vec![create("Romy Geburtstag", "2026-02-18")],
            &ctx,
            &message,
        );
        assert!(out.actions.is_empty());
    }

    #[test]
    fn test_just_yesterday_is_kept() {
        // Within the 24h grace window.
        let message = message_at("Termin", Utc.with_ymd_and_hms(2026, 2, 16, 8, 0, 0).unwrap());
        let out = validator().validate(
            vec![create("Besprechung", "2026-02-16T09:00")],
            &ctx_with(vec![], vec![]),
            &message,
        );
        assert_eq!(out.actions.len(), 1);
    }

    #[test]
    fn test_bis_time_is_end_not_start() {
        // The model wrongly put 18:00 into datetime.
        let out = validator().validate(
            vec![create("Romy bei Lena", "2026-02-16T18:00")],
            &ctx_with(vec![], vec!["Romy"]),
            &msg("Romy ist bis 18 Uhr bei Lena"),
        );
        let a = &out.actions[0];
        assert!(a.start_utc.is_none(), "datetime must not be the bis time");
        assert!(a.all_day);
        assert_eq!(a.date, NaiveDate::from_ymd_opt(2026, 2, 16));
        // 18:00 Berlin = 17:00 UTC.
        assert_eq!(
            a.end_utc.unwrap(),
            Utc.with_ymd_and_hms(2026, 2, 16, 17, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_von_bis_sets_both_ends() {
        let out = validator().validate(
            vec![create("Enno Turnier", "2026-02-21T18:00")],
            &ctx_with(vec![], vec!["Enno"]),
            &msg("Turnier am Samstag von 10 bis 18 Uhr"),
        );
        let a = &out.actions[0];
        assert_eq!(
            a.start_utc.unwrap(),
            Utc.with_ymd_and_hms(2026, 2, 21, 9, 0, 0).unwrap()
        );
        assert_eq!(
            a.end_utc.unwrap(),
            Utc.with_ymd_and_hms(2026, 2, 21, 17, 0, 0).unwrap()
        );
        assert!(!a.all_day);
    }

    #[test]
    fn test_bis_before_a_date_is_not_an_end_time() {
        // "vom 15. bis 18. März" is a date range, not an end time.
        let out = validator().validate(
            vec![AppointmentAction {
                all_day: true,
                ..create("Enno Turnier", "2026-03-15")
            }],
            &ctx_with(vec![], vec!["Enno"]),
            &msg("Enno hat Turnier vom 15. bis 18. März"),
        );
        let a = &out.actions[0];
        assert!(a.all_day);
        assert!(a.end_utc.is_none());
        assert_eq!(a.date, NaiveDate::from_ymd_opt(2026, 3, 15));
    }

    #[test]
    fn test_genuine_start_keeps_bis_as_end() {
        let out = validator().validate(
            vec![create("Schwimmhalle", "2026-02-17T15:00")],
            &ctx_with(vec![], vec![]),
            &msg("Schwimmhalle morgen 15:00, bis 17 Uhr etwa"),
        );
        let a = &out.actions[0];
        assert_eq!(
            a.start_utc.unwrap(),
            Utc.with_ymd_and_hms(2026, 2, 17, 14, 0, 0).unwrap()
        );
        assert_eq!(
            a.end_utc.unwrap(),
            Utc.with_ymd_and_hms(2026, 2, 17, 16, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_prep_task_demoted_onto_existing_event() {
        // Wettkampf on Saturday; prep message mid-week.
        let wettkampf = appointment(
            "X",
            "Enno Wettkampf",
            Utc.with_ymd_and_hms(2026, 2, 21, 9, 0, 0).unwrap(),
        );
        let ctx = ctx_with(vec![wettkampf], vec!["Enno"]);
        let out = validator().validate(
            vec![create("Proviant einpacken", "2026-02-20T18:00")],
            &ctx,
            &msg("Kannst du Proviant einpacken?"),
        );
        assert!(out.actions.is_empty());
        assert_eq!(out.annotations.len(), 1);
        assert_eq!(out.annotations[0].0, "X");
        assert!(out.annotations[0].1.contains("Proviant einpacken"));
    }

    #[test]
    fn test_prep_task_without_upcoming_event_is_kept() {
        let out = validator().validate(
            vec![create("Kuchen backen", "2026-02-20T18:00")],
            &ctx_with(vec![], vec![]),
            &msg("Ich muss noch Kuchen backen am Freitag"),
        );
        assert_eq!(out.actions.len(), 1);
    }

    #[test]
    fn test_relevance_child_forces_shared() {
        let out = validator().validate(
            vec![AppointmentAction {
                relevance: Relevance::PartnerOnly,
                ..create("Romy Arzttermin", "2026-02-18T10:00")
            }],
            &ctx_with(vec![], vec!["Romy", "Marike"]),
            &msg("Marike bringt Romy zum Arzt"),
        );
        assert_eq!(out.actions[0].relevance, Relevance::Shared);
    }

    #[test]
    fn test_relevance_partner_only() {
        let out = validator().validate(
            vec![create("Marike Yoga", "2026-02-18T19:00")],
            &ctx_with(vec![], vec!["Marike"]),
            &msg("Marike hat Mittwoch Yoga"),
        );
        assert_eq!(out.actions[0].relevance, Relevance::PartnerOnly);
    }

    #[test]
    fn test_relevance_user_only() {
        let out = validator().validate(
            vec![create("Jan Zahnarzt", "2026-02-18T11:00")],
            &ctx_with(vec![], vec!["Jan"]),
            &msg("Jan hat Mittwoch Zahnarzt"),
        );
        assert_eq!(out.actions[0].relevance, Relevance::ForMe);
    }

    #[test]
    fn test_relevance_kept_when_nobody_detected() {
        let out = validator().validate(
            vec![AppointmentAction {
                relevance: Relevance::AffectsMe,
                ..create("Elternabend", "2026-02-19T19:30")
            }],
            &ctx_with(vec![], vec![]),
            &msg("Donnerstag ist Elternabend"),
        );
        assert_eq!(out.actions[0].relevance, Relevance::AffectsMe);
    }

    #[test]
    fn test_duplicate_becomes_update() {
        // Existing Tue 17:00 Berlin = 16:00 UTC.
        let existing = appointment(
            "X",
            "Enno Training",
            Utc.with_ymd_and_hms(2026, 2, 17, 16, 0, 0).unwrap(),
        );
        let ctx = ctx_with(vec![existing], vec!["Enno"]);
        let out = validator().validate(
            vec![create("Enno Schwimmen", "2026-02-17T17:15")],
            &ctx,
            &msg("Enno hat Dienstag 17:15 Schwimmen"),
        );
        assert_eq!(out.actions.len(), 1);
        let a = &out.actions[0];
        assert_eq!(a.action, ActionKind::Update);
        assert_eq!(a.updates_termin_id.as_deref(), Some("X"));
        assert_eq!(
            a.start_utc.unwrap(),
            Utc.with_ymd_and_hms(2026, 2, 17, 16, 15, 0).unwrap()
        );
    }

    #[test]
    fn test_exact_duplicate_suppressed() {
        let existing = appointment(
            "X",
            "Enno Training",
            Utc.with_ymd_and_hms(2026, 2, 17, 16, 0, 0).unwrap(),
        );
        let ctx = ctx_with(vec![existing], vec!["Enno"]);
        let out = validator().validate(
            vec![create("Enno Training", "2026-02-17T17:00")],
            &ctx,
            &msg("Enno hat Dienstag 17:00 Training"),
        );
        assert!(out.actions.is_empty());
    }

    #[test]
    fn test_all_day_duplicate_same_date_suppressed() {
        let existing = all_day_appointment(
            "X",
            "Romy Geburtstagsfeier",
            NaiveDate::from_ymd_opt(2026, 2, 21).unwrap(),
        );
        let ctx = ctx_with(vec![existing], vec!["Romy"]);
        let out = validator().validate(
            vec![create("Romy Geburtstagsfeier", "2026-02-21")],
            &ctx,
            &msg("Feier am 21.02. nicht vergessen"),
        );
        assert!(out.actions.is_empty());
    }

    #[test]
    fn test_unrelated_title_same_time_not_duplicate() {
        let existing = appointment(
            "X",
            "Zahnarzt Marike",
            Utc.with_ymd_and_hms(2026, 2, 17, 16, 0, 0).unwrap(),
        );
        let ctx = ctx_with(vec![existing], vec![]);
        let out = validator().validate(
            vec![create("Heizung ablesen", "2026-02-17T17:00")],
            &ctx,
            &msg("Dienstag 17:00 kommt der Ableser"),
        );
        assert_eq!(out.actions.len(), 1);
        assert_eq!(out.actions[0].action, ActionKind::Create);
    }

    #[test]
    fn test_update_with_unknown_id_dropped() {
        let out = validator().validate(
            vec![AppointmentAction {
                action: ActionKind::Update,
                updates_termin_id: Some("ghost".into()),
                ..create("Training", "2026-02-17T17:00")
            }],
            &ctx_with(vec![], vec![]),
            &msg("x"),
        );
        assert!(out.actions.is_empty());
    }

    #[test]
    fn test_cancel_with_unknown_id_ignored() {
        let out = validator().validate(
            vec![AppointmentAction {
                action: ActionKind::Cancel,
                updates_termin_id: Some("ghost".into()),
                title: "Training".into(),
                ..Default::default()
            }],
            &ctx_with(vec![], vec![]),
            &msg("Training fällt aus"),
        );
        assert!(out.actions.is_empty());
    }

    #[test]
    fn test_cancel_with_known_id_passes() {
        let existing = appointment(
            "X",
            "Enno Training",
            Utc.with_ymd_and_hms(2026, 2, 17, 16, 0, 0).unwrap(),
        );
        let out = validator().validate(
            vec![AppointmentAction {
                action: ActionKind::Cancel,
                updates_termin_id: Some("X".into()),
                title: "Enno Training".into(),
                ..Default::default()
            }],
            &ctx_with(vec![existing], vec!["Enno"]),
            &msg("Training fällt Dienstag aus"),
        );
        assert_eq!(out.actions.len(), 1);
        assert_eq!(out.actions[0].action, ActionKind::Cancel);
    }

    #[test]
    fn test_confidence_defaults_and_clamps() {
        let out = validator().validate(
            vec![
                AppointmentAction { confidence: None, ..create("A", "2026-02-17T10:00") },
                AppointmentAction { confidence: Some(1.7), ..create("B", "2026-02-17T11:00") },
            ],
            &ctx_with(vec![], vec![]),
            &msg("x"),
        );
        assert_eq!(out.actions[0].confidence, 0.5);
        assert_eq!(out.actions[1].confidence, 1.0);
    }

    #[test]
    fn test_synthesized_confidence_capped() {
        let out = validator().validate(
            vec![AppointmentAction {
                synthesized: true,
                confidence: Some(0.9),
                ..create("Training", "2026-02-17T17:00")
            }],
            &ctx_with(vec![], vec![]),
            &msg("x"),
        );
        assert!(out.actions[0].confidence <= 0.4);
    }

    #[test]
    fn test_category_passthrough() {
        let out = validator().validate(
            vec![AppointmentAction {
                category: Category::Reminder,
                ..create("Sportsachen mitgeben", "2026-02-18")
            }],
            &ctx_with(vec![], vec![]),
            &msg("Mittwoch Sportsachen mitgeben"),
        );
        assert_eq!(out.actions[0].category, Category::Reminder);
    }
}

fn capture_time(caps: &regex::Captures<'_>, hour_idx: usize, minute_idx: usize) -> Option<NaiveTime> {
    let hour: u32 = caps.get(hour_idx)?.as_str().parse().ok()?;
    let minute: u32 = caps
        .get(minute_idx)
        .map(|m| m.as_str().parse().unwrap_or(0))
        .unwrap_or(0);
    NaiveTime::from_hms_opt(hour, minute, 0)
}
