/// Error type shared by every module of the bot.
///
/// Only the webhook handler and the escalation flow turn these into
/// customer-facing text; everything else propagates with `?`.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("config error: {0}")]
    Config(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("whatsapp returned {status}: {body}")]
    WhatsApp { status: u16, body: String },

    #[error("gemini error: {0}")]
    Gemini(String),

    #[error("GEMINI_API_KEY not configured")]
    GeminiNotConfigured,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BotError {
    /// Short variant name used in the developer notification.
    pub fn kind(&self) -> &'static str {
        match self {
            BotError::Config(_) => "Config",
            BotError::Http(_) => "Http",
            BotError::WhatsApp { .. } => "WhatsApp",
            BotError::Gemini(_) => "Gemini",
            BotError::GeminiNotConfigured => "GeminiNotConfigured",
            BotError::Database(_) => "Database",
            BotError::Migration(_) => "Migration",
            BotError::Json(_) => "Json",
            BotError::Io(_) => "Io",
        }
    }
}

pub type BotResult<T> = Result<T, BotError>;
