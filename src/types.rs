use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    config::Config, escalation::Escalation, gemini::GeminiClient, responses::CannedResponses,
    session::SessionStore, store::Store, whatsapp::WhatsAppClient,
};

/// Everything a webhook handler needs, shared as `Arc<AppState>`.
pub struct AppState {
    pub config: Config,
    pub whatsapp: WhatsAppClient,
    pub gemini: GeminiClient,
    pub sessions: SessionStore,
    pub responses: CannedResponses,
    pub escalation: Escalation,
    pub store: Store,
}

impl AppState {
    pub fn new(config: Config, store: Store, responses: CannedResponses) -> Self {
        let http = reqwest::Client::new();
        let whatsapp = WhatsAppClient::new(http.clone(), &config);
        let gemini = GeminiClient::new(http, &config);
        let escalation = Escalation::new(whatsapp.clone(), &config);
        AppState {
            config,
            whatsapp,
            gemini,
            sessions: SessionStore::new(),
            responses,
            escalation,
            store,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Cliente {
    pub id: i64,
    pub telefono: String,
    pub nombre: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id_chat: String,
    pub id_cliente: i64,
    pub fecha_creacion: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Mensaje {
    pub id_chat: String,
    pub contenido: String,
    pub es_cliente: bool,
    pub fecha_envio: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Bot => "bot",
        }
    }
}

/// One line of conversation history as fed into prompts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        HistoryEntry {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn bot(content: impl Into<String>) -> Self {
        HistoryEntry {
            role: Role::Bot,
            content: content.into(),
        }
    }
}

impl From<&Mensaje> for HistoryEntry {
    fn from(message: &Mensaje) -> Self {
        HistoryEntry {
            role: if message.es_cliente { Role::User } else { Role::Bot },
            content: message.contenido.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundContent {
    Text(String),
    /// Voice note or audio file, still to be transcribed.
    Audio { media_id: String, mime_type: String },
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub from: String,
    pub message_id: String,
    pub content: InboundContent,
    /// Id of the outbound message this one answers, when the sender used reply.
    pub replied_message_id: Option<String>,
}

impl InboundMessage {
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            InboundContent::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: Option<String>,
}
