use axum::body::Bytes;
use hmac::{Hmac, Mac};
use reqwest::header;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{info, warn};

use crate::{
    config::Config,
    error::{BotError, BotResult},
    types::{InboundContent, InboundMessage, SendReceipt},
};

/// Strips separators and prefixes `+` so numbers from config and from Meta
/// compare equal.
pub fn normalize_phone(raw: &str) -> String {
    let cleaned = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect::<String>();
    if cleaned.starts_with('+') {
        cleaned
    } else {
        format!("+{cleaned}")
    }
}

pub fn verify_subscription(
    mode: &str,
    token: &str,
    challenge: &str,
    expected_token: &str,
) -> Option<String> {
    if mode == "subscribe" && !expected_token.is_empty() && token == expected_token {
        Some(challenge.to_string())
    } else {
        None
    }
}

pub fn verify_signature(app_secret: &str, signature_header: Option<&str>, body: &[u8]) -> bool {
    if app_secret.is_empty() {
        return true;
    }
    let signature = signature_header.unwrap_or("").trim();
    let signature = signature
        .strip_prefix("sha256=")
        .unwrap_or(signature)
        .trim();
    if signature.is_empty() {
        return false;
    }
    let Ok(signature_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature_bytes).is_ok()
}

fn inbound_content(message: &Value) -> InboundContent {
    let kind = message.get("type").and_then(Value::as_str).unwrap_or("");
    match kind {
        "text" => InboundContent::Text(
            message
                .get("text")
                .and_then(|t| t.get("body"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
        ),
        "interactive" => {
            let interactive = message.get("interactive").cloned().unwrap_or_default();
            let title = interactive
                .get("button_reply")
                .or_else(|| interactive.get("list_reply"))
                .and_then(|reply| reply.get("title"))
                .and_then(Value::as_str)
                .unwrap_or("");
            InboundContent::Text(title.to_string())
        }
        "button" => InboundContent::Text(
            message
                .get("button")
                .and_then(|b| b.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
        ),
        "audio" => {
            let audio = message.get("audio").cloned().unwrap_or_default();
            InboundContent::Audio {
                media_id: audio
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                mime_type: audio
                    .get("mime_type")
                    .and_then(Value::as_str)
                    .unwrap_or("audio/ogg")
                    .to_string(),
            }
        }
        other => InboundContent::Unsupported(other.to_string()),
    }
}

fn replied_message_id(message: &Value) -> Option<String> {
    let context = message.get("context")?;
    context
        .get("id")
        .and_then(Value::as_str)
        .or_else(|| {
            context
                .get("replied_message")
                .and_then(|r| r.get("id"))
                .and_then(Value::as_str)
        })
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Pulls every customer message out of a Cloud API webhook payload. Status
/// callbacks and echoes of the bot's own number produce nothing.
pub fn parse_inbound(payload: &Value, own_phone_number_id: &str) -> Vec<InboundMessage> {
    if payload.get("object").and_then(Value::as_str) != Some("whatsapp_business_account") {
        return Vec::new();
    }

    let entries = payload
        .get("entry")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut inbound = Vec::new();
    for entry in entries {
        let changes = entry
            .get("changes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for change in changes {
            let value = change.get("value").cloned().unwrap_or_else(|| json!({}));
            if value.get("statuses").is_some() {
                continue;
            }
            let messages = value
                .get("messages")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for message in messages {
                let from = message
                    .get("from")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                if from.is_empty() {
                    continue;
                }
                if from == own_phone_number_id {
                    info!("ignoring message echoed from the bot's own number");
                    continue;
                }
                inbound.push(InboundMessage {
                    from,
                    message_id: message
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    content: inbound_content(&message),
                    replied_message_id: replied_message_id(&message),
                });
            }
        }
    }
    inbound
}

#[derive(Clone)]
pub struct WhatsAppClient {
    http: reqwest::Client,
    api_url: String,
    access_token: String,
    phone_number_id: String,
}

impl WhatsAppClient {
    pub fn new(http: reqwest::Client, config: &Config) -> Self {
        WhatsAppClient {
            http,
            api_url: config.whatsapp_api_url.clone(),
            access_token: config.whatsapp_access_token.clone(),
            phone_number_id: config.whatsapp_phone_number_id.clone(),
        }
    }

    pub fn phone_number_id(&self) -> &str {
        &self.phone_number_id
    }

    pub async fn send_text(&self, to: &str, body: &str) -> BotResult<SendReceipt> {
        let payload = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": { "preview_url": false, "body": body },
        });

        let response = self
            .http
            .post(format!("{}/{}/messages", self.api_url, self.phone_number_id))
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!(to, status = status.as_u16(), "whatsapp send failed");
            return Err(BotError::WhatsApp {
                status: status.as_u16(),
                body: raw_body,
            });
        }

        let body = serde_json::from_str::<Value>(&raw_body).unwrap_or_else(|_| json!({}));
        let message_id = body
            .get("messages")
            .and_then(Value::as_array)
            .and_then(|messages| messages.first())
            .and_then(|m| m.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        info!(to, ?message_id, "whatsapp message sent");
        Ok(SendReceipt { message_id })
    }

    /// Resolves the media id to its download URL and fetches the bytes.
    pub async fn download_media(&self, media_id: &str) -> BotResult<(Bytes, String)> {
        let metadata_response = self
            .http
            .get(format!("{}/{media_id}", self.api_url))
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        if !metadata_response.status().is_success() {
            let status = metadata_response.status().as_u16();
            let body = metadata_response.text().await.unwrap_or_default();
            return Err(BotError::WhatsApp { status, body });
        }

        let metadata = metadata_response
            .json::<Value>()
            .await
            .unwrap_or_else(|_| json!({}));
        let media_url = metadata
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        if media_url.is_empty() {
            return Err(BotError::WhatsApp {
                status: 0,
                body: "missing media url from whatsapp".to_string(),
            });
        }
        let fallback_mime = metadata
            .get("mime_type")
            .and_then(Value::as_str)
            .unwrap_or("audio/ogg")
            .to_string();

        let media_response = self
            .http
            .get(media_url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        if !media_response.status().is_success() {
            let status = media_response.status().as_u16();
            let body = media_response.text().await.unwrap_or_default();
            return Err(BotError::WhatsApp { status, body });
        }

        let content_type = media_response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(&fallback_mime)
            .to_string();
        let bytes = media_response.bytes().await?;
        Ok((bytes, content_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header as header_matcher, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn webhook(message: Value) -> Value {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "changes": [{
                    "value": {
                        "metadata": { "phone_number_id": "1000" },
                        "messages": [message]
                    }
                }]
            }]
        })
    }

    #[test]
    fn normalize_phone_strips_separators() {
        assert_eq!(normalize_phone("598 (91) 453-663"), "+59891453663");
        assert_eq!(normalize_phone("+59891453663"), "+59891453663");
    }

    #[test]
    fn verify_subscription_requires_matching_token() {
        assert_eq!(
            verify_subscription("subscribe", "abc", "123", "abc").as_deref(),
            Some("123")
        );
        assert!(verify_subscription("subscribe", "nope", "123", "abc").is_none());
        assert!(verify_subscription("unsubscribe", "abc", "123", "abc").is_none());
        assert!(verify_subscription("subscribe", "", "123", "").is_none());
    }

    #[test]
    fn signature_is_checked_only_with_a_secret() {
        let body = br#"{"object":"whatsapp_business_account"}"#;
        assert!(verify_signature("", None, body));

        let mut mac = Hmac::<Sha256>::new_from_slice(b"secret").unwrap();
        mac.update(body);
        let good = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
        assert!(verify_signature("secret", Some(&good), body));
        assert!(!verify_signature("secret", Some("sha256=00"), body));
        assert!(!verify_signature("secret", None, body));
    }

    #[test]
    fn parses_text_message_with_reply_context() {
        let payload = webhook(json!({
            "from": "59899111222",
            "id": "wamid.in1",
            "type": "text",
            "text": { "body": "hola" },
            "context": { "id": "wamid.out9" }
        }));
        let messages = parse_inbound(&payload, "1000");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].from, "59899111222");
        assert_eq!(messages[0].text(), Some("hola"));
        assert_eq!(messages[0].replied_message_id.as_deref(), Some("wamid.out9"));
    }

    #[test]
    fn parses_interactive_and_audio_messages() {
        let button = webhook(json!({
            "from": "1", "id": "a", "type": "interactive",
            "interactive": { "type": "button_reply", "button_reply": { "id": "x", "title": "Agendar" } }
        }));
        assert_eq!(parse_inbound(&button, "1000")[0].text(), Some("Agendar"));

        let audio = webhook(json!({
            "from": "1", "id": "b", "type": "audio",
            "audio": { "id": "media-1", "mime_type": "audio/ogg; codecs=opus" }
        }));
        assert_eq!(
            parse_inbound(&audio, "1000")[0].content,
            InboundContent::Audio {
                media_id: "media-1".to_string(),
                mime_type: "audio/ogg; codecs=opus".to_string()
            }
        );

        let image = webhook(json!({ "from": "1", "id": "c", "type": "image" }));
        assert_eq!(
            parse_inbound(&image, "1000")[0].content,
            InboundContent::Unsupported("image".to_string())
        );
    }

    #[test]
    fn ignores_statuses_foreign_objects_and_own_number() {
        let statuses = json!({
            "object": "whatsapp_business_account",
            "entry": [{ "changes": [{ "value": { "statuses": [{ "id": "x" }] } }] }]
        });
        assert!(parse_inbound(&statuses, "1000").is_empty());

        let other = json!({ "object": "page", "entry": [] });
        assert!(parse_inbound(&other, "1000").is_empty());

        let echo = webhook(json!({ "from": "1000", "id": "e", "type": "text", "text": { "body": "hi" } }));
        assert!(parse_inbound(&echo, "1000").is_empty());
    }

    #[tokio::test]
    async fn send_text_returns_outbound_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1000/messages"))
            .and(header_matcher("authorization", "Bearer wa-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messaging_product": "whatsapp",
                "messages": [{ "id": "wamid.out1" }]
            })))
            .mount(&server)
            .await;

        let config = Config::for_tests(&server.uri(), "http://unused", "");
        let client = WhatsAppClient::new(reqwest::Client::new(), &config);
        let receipt = client.send_text("59899111222", "hola").await.unwrap();
        assert_eq!(receipt.message_id.as_deref(), Some("wamid.out1"));
    }

    #[tokio::test]
    async fn send_text_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1000/messages"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let config = Config::for_tests(&server.uri(), "http://unused", "");
        let client = WhatsAppClient::new(reqwest::Client::new(), &config);
        let err = client.send_text("1", "x").await.unwrap_err();
        assert!(matches!(err, BotError::WhatsApp { status: 401, .. }));
    }

    #[tokio::test]
    async fn download_media_follows_metadata_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "url": format!("{}/files/media-1", server.uri()),
                "mime_type": "audio/ogg"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/media-1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;

        let config = Config::for_tests(&server.uri(), "http://unused", "");
        let client = WhatsAppClient::new(reqwest::Client::new(), &config);
        let (bytes, _mime) = client.download_media("media-1").await.unwrap();
        assert_eq!(bytes.as_ref(), &[1u8, 2, 3]);
    }
}
