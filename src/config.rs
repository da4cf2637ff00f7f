use std::{env, path::PathBuf};

use crate::error::{BotError, BotResult};

pub const DEFAULT_WHATSAPP_API_URL: &str = "https://graph.facebook.com/v22.0";
pub const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_LINK_RESERVA: &str = "linkagenda.com";
pub const DEFAULT_LINK_MAPS: &str = "https://maps.app.goo.gl/uaJPmJrxUJr5wZE87";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub verify_token: String,
    pub whatsapp_api_url: String,
    pub whatsapp_access_token: String,
    pub whatsapp_phone_number_id: String,
    pub whatsapp_app_secret: String,
    pub gemini_api_url: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub developer_number: String,
    pub responsable_number: String,
    pub handoff_number: String,
    pub link_reserva: String,
    pub link_maps: String,
    pub respuestas_path: PathBuf,
    pub database_url: Option<String>,
}

fn env_text(key: &str) -> String {
    env::var(key)
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

fn env_or(key: &str, fallback: &str) -> String {
    let value = env_text(key);
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

/// `DATABASE_URL` wins; otherwise the URL is assembled from `POSTGRES_*`/`PG*`
/// parts, and persistence stays off when no host is given at all.
fn resolve_database_url() -> Option<String> {
    let url = env_text("DATABASE_URL");
    if !url.is_empty() {
        return Some(url);
    }
    let host = env::var("POSTGRES_HOST").or_else(|_| env::var("PGHOST")).ok()?;
    let port = env::var("POSTGRES_PORT")
        .or_else(|_| env::var("PGPORT"))
        .unwrap_or_else(|_| "5432".to_string());
    let user = env::var("POSTGRES_USER")
        .or_else(|_| env::var("PGUSER"))
        .unwrap_or_else(|_| "postgres".to_string());
    let password = env::var("POSTGRES_PASSWORD")
        .or_else(|_| env::var("PGPASSWORD"))
        .unwrap_or_default();
    let db = env::var("POSTGRES_DB")
        .or_else(|_| env::var("PGDATABASE"))
        .unwrap_or_else(|_| "barberia".to_string());
    Some(format!("postgres://{user}:{password}@{host}:{port}/{db}"))
}

impl Config {
    pub fn from_env() -> BotResult<Self> {
        let _ = dotenvy::dotenv();

        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(8000);

        let config = Config {
            port,
            verify_token: env_text("VERIFY_TOKEN"),
            whatsapp_api_url: env_or("WHATSAPP_API_URL", DEFAULT_WHATSAPP_API_URL)
                .trim_end_matches('/')
                .to_string(),
            whatsapp_access_token: env_text("WHATSAPP_ACCESS_TOKEN"),
            whatsapp_phone_number_id: env_text("WHATSAPP_PHONE_NUMBER_ID"),
            whatsapp_app_secret: env_text("WHATSAPP_APP_SECRET"),
            gemini_api_url: env_or("GEMINI_API_URL", DEFAULT_GEMINI_API_URL)
                .trim_end_matches('/')
                .to_string(),
            gemini_api_key: env_text("GEMINI_API_KEY"),
            gemini_model: env_or("GEMINI_MODEL", DEFAULT_GEMINI_MODEL),
            developer_number: env_text("NUM_DESARROLLADOR"),
            responsable_number: env_text("NUM_RESPONSABLE"),
            handoff_number: env_text("NUMERO_DERIVACION"),
            link_reserva: env_or("LINK_RESERVA", DEFAULT_LINK_RESERVA),
            link_maps: env_or("LINK_MAPS", DEFAULT_LINK_MAPS),
            respuestas_path: PathBuf::from(env_or(
                "RESPUESTAS_PATH",
                "data/respuestas_barberia.json",
            )),
            database_url: resolve_database_url(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> BotResult<()> {
        let mut missing = Vec::new();
        if self.verify_token.is_empty() {
            missing.push("VERIFY_TOKEN");
        }
        if self.whatsapp_access_token.is_empty() {
            missing.push("WHATSAPP_ACCESS_TOKEN");
        }
        if self.whatsapp_phone_number_id.is_empty() {
            missing.push("WHATSAPP_PHONE_NUMBER_ID");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(BotError::Config(format!(
                "missing whatsapp config fields: {}",
                missing.join(", ")
            )))
        }
    }

    /// Contact shown when handing a customer to a human; falls back to the
    /// responsable's number.
    pub fn handoff_contact(&self) -> &str {
        if self.handoff_number.is_empty() {
            &self.responsable_number
        } else {
            &self.handoff_number
        }
    }

    #[cfg(test)]
    pub fn for_tests(whatsapp_api_url: &str, gemini_api_url: &str, gemini_api_key: &str) -> Self {
        Config {
            port: 0,
            verify_token: "verify-me".to_string(),
            whatsapp_api_url: whatsapp_api_url.to_string(),
            whatsapp_access_token: "wa-token".to_string(),
            whatsapp_phone_number_id: "1000".to_string(),
            whatsapp_app_secret: String::new(),
            gemini_api_url: gemini_api_url.to_string(),
            gemini_api_key: gemini_api_key.to_string(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            developer_number: "59890000001".to_string(),
            responsable_number: "59890000002".to_string(),
            handoff_number: String::new(),
            link_reserva: "https://agenda.test/barberia".to_string(),
            link_maps: DEFAULT_LINK_MAPS.to_string(),
            respuestas_path: PathBuf::from("data/respuestas_barberia.json"),
            database_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handoff_contact_falls_back_to_responsable() {
        let mut config = Config::for_tests("http://wa", "http://gemini", "");
        assert_eq!(config.handoff_contact(), "59890000002");
        config.handoff_number = "+59899999999".to_string();
        assert_eq!(config.handoff_contact(), "+59899999999");
    }

    #[test]
    fn validate_lists_missing_credentials() {
        let mut config = Config::for_tests("http://wa", "http://gemini", "");
        config.whatsapp_access_token.clear();
        config.verify_token.clear();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("VERIFY_TOKEN"));
        assert!(err.contains("WHATSAPP_ACCESS_TOKEN"));
        assert!(!err.contains("WHATSAPP_PHONE_NUMBER_ID"));
    }
}
