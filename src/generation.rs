use regex::Regex;
use tracing::{debug, info, warn};

use crate::{
    error::BotResult,
    gemini::GeminiClient,
    intent::{classifier_eligible, classify_canned_key, detect_canned_key},
    responses::{replace_links, CannedResponses},
    tokens::{build_modular_prompt, validate_and_compress, MAX_TOKENS_INPUT},
    types::HistoryEntry,
};

pub const EMPTY_REPLY_APOLOGY: &str =
    "Disculpá, no pude generar una respuesta en este momento. ¿Querés que te derive con alguien del equipo?";
pub const TECHNICAL_APOLOGY: &str =
    "Disculpá, estoy teniendo problemas técnicos. ¿Querés que te derive con alguien del equipo?";

#[derive(Debug, Clone, Default)]
pub struct ReplyRequest<'a> {
    pub intent: &'a str,
    pub text: &'a str,
    pub info: &'a str,
    pub history_summary: &'a str,
    pub last_messages: &'a [HistoryEntry],
    pub has_context: bool,
    pub booking_link: &'a str,
    pub maps_link: &'a str,
    /// Canned slot under `intent` already picked by intent detection.
    pub canned_key: Option<&'a str>,
    /// The classifier already ran for this text; it is not asked again.
    pub classified: bool,
}

async fn canned_reply(
    req: &ReplyRequest<'_>,
    gemini: &GeminiClient,
    responses: &CannedResponses,
) -> Option<String> {
    if let Some(key) = req.canned_key {
        if let Some(answer) = responses.get(req.intent, key) {
            debug!(intent = req.intent, key, "canned reply from detected slot");
            return Some(answer.to_string());
        }
    }

    let text = req.text;
    if let Some((intent, key)) = detect_canned_key(text) {
        if let Some(answer) = responses.get(intent, key) {
            debug!(intent, key, "canned reply by keyword");
            return Some(answer.to_string());
        }
    }

    if req.classified || !classifier_eligible(text) {
        return None;
    }
    match classify_canned_key(text, gemini, responses).await {
        Ok(Some((intent, key))) => {
            debug!(%intent, %key, "canned reply by classifier");
            responses.get(&intent, &key).map(str::to_string)
        }
        Ok(None) => None,
        Err(err) => {
            debug!(error = %err, "canned classifier unavailable");
            None
        }
    }
}

fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.contains("```") {
        return trimmed.to_string();
    }
    let Ok(fence) = Regex::new(r"```[a-z]*\n?") else {
        return trimmed.replace("```", "").trim().to_string();
    };
    fence.replace_all(trimmed, "").trim().to_string()
}

/// Canned answer first, then the model. Only the model call can fail; the
/// caller decides what the customer sees in that case.
pub async fn generate_reply(
    req: &ReplyRequest<'_>,
    gemini: &GeminiClient,
    responses: &CannedResponses,
) -> BotResult<String> {
    if let Some(answer) = canned_reply(req, gemini, responses).await {
        return Ok(replace_links(&answer, req.booking_link, req.maps_link));
    }

    let prompt = build_modular_prompt(
        req.intent,
        req.text,
        req.info,
        req.history_summary,
        req.last_messages,
        req.has_context,
    );
    let (prompt, tokens) = validate_and_compress(&prompt, MAX_TOKENS_INPUT);
    info!(intent = req.intent, tokens, "generating reply");

    let raw = gemini.generate_text(&prompt).await?;
    if raw.trim().is_empty() {
        warn!(intent = req.intent, "model returned empty text");
        return Ok(EMPTY_REPLY_APOLOGY.to_string());
    }
    Ok(strip_code_fences(&raw))
}
