//! Prompt assembly for the extraction cascade.
//!
//! The prompt is data, not code: reasoning structure, calendar lookup and
//! family context are all rendered strings. No family detail is hard-coded
//! here: names flow from config, knowledge from the person profiles.

use crate::context::PromptContext;
use crate::types::IncomingMessage;

/// System preamble: role, reasoning dimensions, output contract.
pub fn build_system_prompt(ctx: &PromptContext) -> String {
    format!(
        "\
Du bist ein Termin-Extraktions-System für die Familienkoordination von {user} und {partner}.

Du analysierst einzelne Chat-Nachrichten IM KONTEXT der Konversation und entscheidest, \
ob sie Termine, Aufgaben oder Erinnerungen enthalten.

DENKE ENTLANG DIESER SECHS DIMENSIONEN, bevor du antwortest:
1. ZEIT: Welches Datum, welche Uhrzeit? Nutze AUSSCHLIESSLICH die Kalender-Tabelle unten — \
rechne NIEMALS selbst Wochentage oder relative Angaben aus.
2. FAMILIE: Wer ist beteiligt? Kinder-Termine betreffen IMMER beide Eltern.
3. AKTION: Neuer Termin (create), Änderung eines bestehenden (update) oder Absage (cancel)? \
Bei update/cancel MUSS updates_termin_id auf eine ID aus der Liste bestehender Termine zeigen.
4. KONTEXT: Beantwortet die Nachricht eine frühere Frage? Löse Pronomen über die \
Personenprofile und das Gedächtnis auf.
5. PLAUSIBILITÄT: Liegt der Termin in der Zukunft? Ist es nur ein Rückblick auf Vergangenes?
6. INTENTION: Ist das eine echte Verabredung oder nur Alltagsgespräch?

KATEGORIEN: appointment (fester Termin), task (Aufgabe/Vorbereitung), \
milestone (besonderes Ereignis), reminder (etwas mitbringen/besorgen).

RELEVANZ: for_me (nur {user}), shared (beide, inkl. ALLER Kinder-Termine), \
partner_only (NUR persönliche Termine von {partner} ohne Familienbezug), \
affects_me ({user} muss etwas wissen/vorbereiten).

UHRZEITEN: Wenn eine Uhrzeit genannt wird, gehört sie ins datetime-Feld und all_day ist false. \
all_day ist NUR true, wenn keine Uhrzeit genannt wird — dann datetime als YYYY-MM-DD. \
\"bis X Uhr\" ist eine ENDzeit (end_datetime), KEINE Startzeit.

ANTWORTFORMAT — exakt EIN JSON-Objekt, kein weiterer Text:
{{
  \"actions\": [
    {{
      \"action\": \"create|update|cancel\",
      \"updates_termin_id\": \"ID oder weglassen bei create\",
      \"title\": \"Kurze, klare Beschreibung\",
      \"datetime\": \"YYYY-MM-DDTHH:MM oder YYYY-MM-DD bei all_day\",
      \"all_day\": false,
      \"end_datetime\": \"YYYY-MM-DDTHH:MM oder weglassen\",
      \"participants\": [\"Name\"],
      \"category\": \"appointment|task|milestone|reminder\",
      \"relevance\": \"for_me|shared|partner_only|affects_me\",
      \"confidence\": 0.0,
      \"reminders\": [{{\"trigger\": \"-P1D\", \"description\": \"...\"}}],
      \"reasoning\": \"Begründung für genau diese Aktion\"
    }}
  ],
  \"reasoning\": \"Gesamtbegründung entlang der sechs Dimensionen\"
}}

Eine leere actions-Liste bedeutet: kein Termin in dieser Nachricht.",
        user = ctx.user_name,
        partner = ctx.partner_name,
    )
}

/// User content, assembled in fixed order: date, calendar table, names,
/// profiles, memory, existing appointments, conversation, feedback, and
/// finally the message to analyze.
pub fn build_user_prompt(ctx: &PromptContext, message: &IncomingMessage) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(format!("Heute ist {} ({}).", ctx.today, ctx.today_weekday));

    let mut lookup = String::from("KALENDER (relative Angabe -> Datum):");
    for (phrase, date) in &ctx.calendar_lookup {
        lookup.push_str(&format!("\n  {} = {}", phrase, date));
    }
    sections.push(lookup);

    sections.push(format!(
        "FAMILIE: {} (ich), {} (Partnerin), Kinder: {}",
        ctx.user_name,
        ctx.partner_name,
        if ctx.children_names.is_empty() {
            "keine".to_string()
        } else {
            ctx.children_names.join(", ")
        }
    ));

    if !ctx.persons.is_empty() {
        sections.push(format!("PERSONENPROFILE:\n{}", ctx.persons.join("\n\n")));
    }

    let memory_block = ctx.memory.as_prompt_block();
    if !memory_block.is_empty() {
        sections.push(memory_block);
    }

    if !ctx.existing_rendered.is_empty() {
        let mut block = String::from("BEREITS EXISTIERENDE TERMINE (für updates_termin_id):");
        for line in &ctx.existing_rendered {
            block.push_str("\n  ");
            block.push_str(line);
        }
        sections.push(block);
    }

    if !ctx.recent_messages.is_empty() {
        sections.push(format!(
            "KONVERSATIONS-KONTEXT (vorherige Nachrichten):\n{}",
            ctx.recent_messages.join("\n")
        ));
    }

    if !ctx.feedback_examples.is_empty() {
        sections.push(format!(
            "FEEDBACK-BEISPIELE (lerne daraus):\n{}",
            ctx.feedback_examples.join("\n")
        ));
    }

    sections.push(format!(
        "AKTUELLE NACHRICHT von {} (diese analysieren):\n\"{}\"",
        message.sender, message.text
    ));

    sections.join("\n\n")
}
