use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::{
    config::Config,
    error::{BotError, BotResult},
    tokens::{count_tokens, MAX_TOKENS_OUTPUT},
};

const TRANSCRIBE_PROMPT: &str = "Transcribe this audio file";
const TRANSCRIBE_ATTEMPTS: u32 = 3;
const TRANSCRIBE_BASE_DELAY_SECS: u64 = 2;

#[derive(Debug, Clone)]
pub enum Part {
    Text(String),
    InlineData { mime_type: String, data: Vec<u8> },
}

impl Part {
    pub fn text(value: impl Into<String>) -> Self {
        Part::Text(value.into())
    }

    fn to_json(&self) -> Value {
        match self {
            Part::Text(text) => json!({ "text": text }),
            Part::InlineData { mime_type, data } => json!({
                "inline_data": {
                    "mime_type": mime_type,
                    "data": STANDARD.encode(data),
                }
            }),
        }
    }
}

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, config: &Config) -> Self {
        GeminiClient {
            http,
            api_url: config.gemini_api_url.clone(),
            api_key: config.gemini_api_key.clone(),
            model: config.gemini_model.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Single-turn `generateContent` call with thinking disabled. Returns the
    /// concatenated text of the first candidate.
    pub async fn generate(&self, parts: &[Part]) -> BotResult<String> {
        if !self.is_configured() {
            return Err(BotError::GeminiNotConfigured);
        }

        let input_tokens = parts
            .iter()
            .map(|part| match part {
                Part::Text(text) => count_tokens(text),
                Part::InlineData { .. } => 0,
            })
            .sum::<usize>();

        let response = self
            .http
            .post(format!(
                "{}/models/{}:generateContent",
                self.api_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&json!({
                "contents": [{
                    "role": "user",
                    "parts": parts.iter().map(Part::to_json).collect::<Vec<_>>(),
                }],
                "generationConfig": {
                    "maxOutputTokens": MAX_TOKENS_OUTPUT,
                    "thinkingConfig": { "thinkingBudget": 0 },
                },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::Gemini(format!("gemini returned {status}: {body}")));
        }

        let payload = response.json::<Value>().await?;
        let text = payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<String>()
            })
            .unwrap_or_default()
            .trim()
            .to_string();

        info!(
            model = %self.model,
            input_tokens,
            output_tokens = count_tokens(&text),
            "gemini generation"
        );
        Ok(text)
    }

    pub async fn generate_text(&self, prompt: &str) -> BotResult<String> {
        self.generate(&[Part::text(prompt)]).await
    }

    /// Transcribes a voice note, retrying with exponential backoff.
    pub async fn transcribe(&self, audio: &[u8], mime_type: &str) -> BotResult<String> {
        let parts = [
            Part::text(TRANSCRIBE_PROMPT),
            Part::InlineData {
                mime_type: mime_type.to_string(),
                data: audio.to_vec(),
            },
        ];

        let mut last_error = BotError::Gemini("transcription not attempted".to_string());
        for attempt in 0..TRANSCRIBE_ATTEMPTS {
            match self.generate(&parts).await {
                Ok(text) if !text.is_empty() => return Ok(text),
                Ok(_) => {
                    last_error = BotError::Gemini("empty transcription".to_string());
                }
                Err(BotError::GeminiNotConfigured) => return Err(BotError::GeminiNotConfigured),
                Err(err) => last_error = err,
            }
            warn!(attempt = attempt + 1, error = %last_error, "transcription attempt failed");
            if attempt + 1 < TRANSCRIBE_ATTEMPTS {
                let delay = TRANSCRIBE_BASE_DELAY_SECS * 2u64.pow(attempt);
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }
        }
        Err(last_error)
    }
}

/// Parses the span between the first `{` and the last `}`; models often wrap
/// JSON in prose or code fences.
pub fn extract_json(text: &str) -> Option<Value> {
    let first = text.find('{')?;
    let last = text.rfind('}')?;
    if last <= first {
        return None;
    }
    serde_json::from_str(&text[first..=last]).ok()
}
