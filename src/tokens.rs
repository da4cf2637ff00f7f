//! Token budgeting for generation prompts. Counts are estimates (about four
//! characters per token in Spanish); no tokenizer call is made.

use regex::Regex;
use tracing::warn;

use crate::{
    prompting::{render_task, TaskContext},
    types::{HistoryEntry, Role},
};

pub const MAX_TOKENS_INPUT: usize = 4000;
pub const MAX_TOKENS_OUTPUT: usize = 300;
pub const HISTORY_SUMMARY_MAX_TOKENS: usize = 300;
/// Above this many logged messages the full history is summarised into the prompt.
pub const HISTORY_COMPRESSION_MIN_MESSAGES: usize = 10;

const LAST_MESSAGES_WINDOW: usize = 6;
const LONG_LINE_TOKENS: usize = 50;
const REPLY_FORMAT: &str = "Texto plano, sin Markdown. Máximo 3 oraciones.";

pub fn count_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

/// One-line summary of a conversation: intents touched, names, numbers and the
/// last thing the customer said.
pub fn compress_history(history: &[HistoryEntry]) -> String {
    if history.is_empty() {
        return String::new();
    }

    let number_re = Regex::new(r"\b\d+[.,]?\d*\b").ok();
    let name_re = Regex::new(r"\b[A-Z][a-z]+\b").ok();

    let mut intents = Vec::new();
    let mut names = Vec::new();
    let mut numbers = Vec::new();

    for entry in history {
        let lower = entry.content.to_lowercase();
        if let Some(re) = &number_re {
            for m in re.find_iter(&entry.content) {
                push_unique(&mut numbers, m.as_str());
            }
        }
        if ["turno", "reserva", "agenda", "cita"].iter().any(|w| lower.contains(w)) {
            push_unique(&mut intents, "turnos");
        }
        if ["precio", "costo", "cuanto"].iter().any(|w| lower.contains(w)) {
            push_unique(&mut intents, "precios");
        }
        if ["visagismo", "rostro", "cara"].iter().any(|w| lower.contains(w)) {
            push_unique(&mut intents, "visagismo");
        }
        if entry.role == Role::User {
            if let Some(re) = &name_re {
                for m in re.find_iter(&entry.content) {
                    push_unique(&mut names, m.as_str());
                }
            }
        }
    }

    let mut parts = Vec::new();
    if !intents.is_empty() {
        parts.push(format!("Intenciones: {}", intents.join(", ")));
    }
    if !names.is_empty() {
        names.truncate(5);
        parts.push(format!("Datos usuario: {}", names.join(", ")));
    }
    if !numbers.is_empty() {
        numbers.truncate(10);
        parts.push(format!("Números relevantes: {}", numbers.join(", ")));
    }
    if let Some(last_user) = history.iter().rev().find(|e| e.role == Role::User) {
        let snippet = last_user.content.chars().take(100).collect::<String>();
        parts.push(format!("Último mensaje usuario: {snippet}"));
    }

    let summary = parts.join(" | ");
    if count_tokens(&summary) > HISTORY_SUMMARY_MAX_TOKENS {
        parts.truncate(2);
        return parts.join(" | ");
    }
    summary
}

/// Sectioned prompt body. Empty sections are omitted; only the last six
/// messages are kept.
pub fn build_optimized_message(
    task: &str,
    data: &str,
    history_summary: &str,
    last_messages: &[HistoryEntry],
    format: &str,
) -> String {
    let mut parts = vec![format!("TAREA:\n{task}")];

    if !data.is_empty() {
        parts.push(format!("DATOS_UTILES:\n{data}"));
    }
    if !history_summary.is_empty() {
        parts.push(format!("HISTORIAL_COMPRESO:\n{history_summary}"));
    }
    if !last_messages.is_empty() {
        let start = last_messages.len().saturating_sub(LAST_MESSAGES_WINDOW);
        let lines = last_messages[start..]
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str().to_uppercase(), m.content))
            .collect::<Vec<_>>();
        parts.push(format!("ULTIMOS_MENSAJES:\n{}", lines.join("\n")));
    }
    if !format.is_empty() {
        parts.push(format!("FORMATO_RESPUESTA:\n{format}"));
    }

    parts.join("\n\n")
}

/// Full generation prompt for an intent. Knowledge goes under DATOS_UTILES;
/// history is only included once the conversation has context.
pub fn build_modular_prompt(
    intent: &str,
    text: &str,
    info: &str,
    history_summary: &str,
    last_messages: &[HistoryEntry],
    has_context: bool,
) -> String {
    let task = render_task(&TaskContext {
        intent,
        message: text,
        has_context,
    });
    let (summary, last) = if has_context {
        (history_summary, last_messages)
    } else {
        ("", &[][..])
    };
    build_optimized_message(&task, info, summary, last, REPLY_FORMAT)
}

/// Truncates long lines proportionally when `message` exceeds `max_tokens`.
/// Returns the (possibly shortened) message and its estimated token count.
pub fn validate_and_compress(message: &str, max_tokens: usize) -> (String, usize) {
    let tokens = count_tokens(message);
    if tokens <= max_tokens {
        return (message.to_string(), tokens);
    }

    warn!(tokens, max_tokens, "prompt over budget, compressing");
    let target = max_tokens.saturating_sub(100) as f64;
    let factor = target / tokens as f64;

    let compressed = message
        .split('\n')
        .map(|line| {
            if count_tokens(line) > LONG_LINE_TOKENS {
                let keep = (line.chars().count() as f64 * factor * 0.7) as usize;
                format!("{}...", line.chars().take(keep).collect::<String>())
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let compressed_tokens = count_tokens(&compressed);
    (compressed, compressed_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_four_chars_per_token() {
        assert_eq!(count_tokens(""), 0);
        assert_eq!(count_tokens("abc"), 0);
        assert_eq!(count_tokens("ñandú ok"), 2);
    }

    #[test]
    fn compress_history_collects_signals() {
        let history = vec![
            HistoryEntry::user("Hola, soy Martin y quiero un turno a las 15"),
            HistoryEntry::bot("Dale Martin, el corte sale 500"),
            HistoryEntry::user("cuanto sale con barba?"),
        ];
        let summary = compress_history(&history);
        assert_eq!(
            summary,
            "Intenciones: turnos, precios | Datos usuario: Hola, Martin | \
             Números relevantes: 15, 500 | Último mensaje usuario: cuanto sale con barba?"
        );
        assert_eq!(compress_history(&[]), "");
    }

    #[test]
    fn compress_history_truncates_oversized_summary() {
        let long_name = format!("Pedro{}", "a".repeat(1500));
        let history = vec![HistoryEntry::user(format!("turno 12 {long_name}"))];
        let summary = compress_history(&history);
        assert_eq!(summary, format!("Intenciones: turnos | Datos usuario: {long_name}"));
    }

    #[test]
    fn optimized_message_keeps_last_six() {
        let last = (0..8)
            .map(|i| HistoryEntry::user(format!("m{i}")))
            .collect::<Vec<_>>();
        let message = build_optimized_message("Responder", "", "", &last, "");
        assert!(message.starts_with("TAREA:\nResponder\n\nULTIMOS_MENSAJES:\nUSER: m2"));
        assert!(message.ends_with("USER: m7"));
        assert!(!message.contains("DATOS_UTILES"));
    }

    #[test]
    fn modular_prompt_drops_history_without_context() {
        let last = vec![HistoryEntry::bot("hola bro")];
        let fresh = build_modular_prompt("precios", "precio?", "PRECIOS: ...", "resumen", &last, false);
        assert!(fresh.contains("DATOS_UTILES:\nPRECIOS: ..."));
        assert!(!fresh.contains("HISTORIAL_COMPRESO"));
        assert!(!fresh.contains("ULTIMOS_MENSAJES"));

        let ongoing = build_modular_prompt("precios", "precio?", "", "resumen", &last, true);
        assert!(ongoing.contains("HISTORIAL_COMPRESO:\nresumen"));
        assert!(ongoing.contains("BOT: hola bro"));
        assert!(ongoing.ends_with(REPLY_FORMAT));
    }

    #[test]
    fn validate_and_compress_shortens_long_lines() {
        let short = "corto";
        assert_eq!(validate_and_compress(short, 10), (short.to_string(), 1));

        let long_line = "a".repeat(1000);
        let message = format!("titulo\n{long_line}");
        let (compressed, tokens) = validate_and_compress(&message, 150);
        assert!(tokens < 150);
        assert!(compressed.starts_with("titulo\n"));
        assert!(compressed.ends_with("..."));
    }
}
