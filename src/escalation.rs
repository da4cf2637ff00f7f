use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    error::BotError,
    whatsapp::{normalize_phone, WhatsAppClient},
};

pub const CUSTOMER_HOLD_MESSAGE: &str = "Bro ando atendiendo un cliente enseguida te respondo";
pub const RELAY_COMMAND: &str = "#Responder";
/// Unanswered contexts older than this are dropped.
const CONTEXT_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    pub client_number: String,
    pub responsable_number: String,
    pub customer_text: String,
    /// Id of the notice sent to the responsable; their reply quotes it.
    pub outbound_message_id: String,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
}

impl ErrorContext {
    fn is_open(&self, now: DateTime<Utc>) -> bool {
        !self.resolved && now - self.created_at < Duration::hours(CONTEXT_TTL_HOURS)
    }
}

/// Failure notifications and operator relay. Contexts are kept in memory until
/// they are answered or expire.
pub struct Escalation {
    whatsapp: WhatsAppClient,
    developer_number: String,
    responsable_number: String,
    contexts: Mutex<HashMap<Uuid, ErrorContext>>,
    last_customer: Mutex<Option<String>>,
}

impl Escalation {
    pub fn new(whatsapp: WhatsAppClient, config: &Config) -> Self {
        Escalation {
            whatsapp,
            developer_number: config.developer_number.clone(),
            responsable_number: config.responsable_number.clone(),
            contexts: Mutex::new(HashMap::new()),
            last_customer: Mutex::new(None),
        }
    }

    /// Sends without propagating; escalation must never fail the caller.
    async fn send_quietly(&self, to: &str, body: &str, purpose: &str) -> Option<String> {
        if to.trim().is_empty() {
            warn!(purpose, "escalation target not configured");
            return None;
        }
        match self.whatsapp.send_text(to, body).await {
            Ok(receipt) => receipt.message_id,
            Err(err) => {
                warn!(purpose, to, error = %err, "escalation message not delivered");
                None
            }
        }
    }

    async fn notify_developer(
        &self,
        err: &BotError,
        customer_text: &str,
        customer_number: &str,
        context: &str,
    ) {
        let body = format!(
            "🔴 *Error técnico en bot*\n\n\
             👤 Cliente: {customer_number}\n\
             💬 Mensaje original: {customer_text}\n\
             📍 Contexto: {context}\n\
             ❌ Error: {}\n\
             📝 Detalle: {err}",
            err.kind()
        );
        self.send_quietly(&self.developer_number, &body, "developer")
            .await;
    }

    /// Developer-only notice for failures the bot recovered from.
    pub async fn report_error(
        &self,
        err: &BotError,
        customer_text: &str,
        customer_number: &str,
        context: &str,
    ) {
        warn!(context, customer = customer_number, error = %err, "recoverable failure reported");
        self.notify_developer(err, customer_text, customer_number, context)
            .await;
    }

    /// Full escalation: developer, responsable and a holding reply to the
    /// customer. Returns the context id when the responsable notice came back
    /// with a message id.
    pub async fn handle_critical(
        &self,
        err: &BotError,
        customer_text: &str,
        customer_number: &str,
        context: &str,
    ) -> Option<Uuid> {
        error!(context, customer = customer_number, error = %err, "critical failure, escalating");
        self.notify_developer(err, customer_text, customer_number, context)
            .await;

        let notice = format!(
            "⚠️ Error atendiendo a un cliente\n\n\
             Cliente: {customer_number}\n\
             Mensaje: {customer_text}\n\n\
             Respondé a este mensaje para contestarle al cliente."
        );
        let outbound_id = self
            .send_quietly(&self.responsable_number, &notice, "responsable")
            .await;

        self.send_quietly(customer_number, CUSTOMER_HOLD_MESSAGE, "customer")
            .await;

        let outbound_id = outbound_id?;
        Some(
            self.register_context(customer_number, customer_text, &outbound_id)
                .await,
        )
    }

    pub async fn register_context(
        &self,
        client_number: &str,
        customer_text: &str,
        outbound_message_id: &str,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut contexts = self.contexts.lock().await;
        let before = contexts.len();
        contexts.retain(|_, ctx| ctx.is_open(now));
        if contexts.len() < before {
            debug!(pruned = before - contexts.len(), "old error contexts dropped");
        }
        contexts.insert(
            id,
            ErrorContext {
                client_number: client_number.to_string(),
                responsable_number: self.responsable_number.clone(),
                customer_text: customer_text.to_string(),
                outbound_message_id: outbound_message_id.to_string(),
                created_at: now,
                resolved: false,
            },
        );
        drop(contexts);
        info!(%id, client = client_number, "error context registered");
        id
    }

    pub fn is_responsable(&self, number: &str) -> bool {
        !self.responsable_number.trim().is_empty()
            && normalize_phone(number) == normalize_phone(&self.responsable_number)
    }

    async fn find_open_context(
        &self,
        responsable: &str,
        replied_id: Option<&str>,
    ) -> Option<(Uuid, ErrorContext)> {
        let contexts = self.contexts.lock().await;
        let now = Utc::now();
        let open = contexts.iter().filter(|(_, ctx)| ctx.is_open(now));
        match replied_id {
            Some(replied) => open
                .filter(|(_, ctx)| ctx.outbound_message_id == replied)
                .map(|(id, ctx)| (*id, ctx.clone()))
                .next(),
            None => {
                let responsable = normalize_phone(responsable);
                open.filter(|(_, ctx)| normalize_phone(&ctx.responsable_number) == responsable)
                    .max_by_key(|(_, ctx)| ctx.created_at)
                    .map(|(id, ctx)| (*id, ctx.clone()))
            }
        }
    }

    /// Relays the responsable's text verbatim to the customer behind the open
    /// error. Returns `true` only when the relay was delivered.
    pub async fn handle_responsable_reply(
        &self,
        number: &str,
        text: &str,
        replied_id: Option<&str>,
    ) -> bool {
        let Some((id, ctx)) = self.find_open_context(number, replied_id).await else {
            info!(responsable = number, "no open error context for reply");
            return false;
        };

        match self.whatsapp.send_text(&ctx.client_number, text).await {
            Ok(_) => {
                if let Some(stored) = self.contexts.lock().await.get_mut(&id) {
                    stored.resolved = true;
                }
                info!(
                    %id,
                    client = %ctx.client_number,
                    original = %ctx.customer_text,
                    "responsable reply relayed"
                );
                true
            }
            Err(err) => {
                warn!(%id, error = %err, "relay to customer failed");
                false
            }
        }
    }

    pub async fn track_customer(&self, number: &str) {
        if self.is_responsable(number) {
            return;
        }
        *self.last_customer.lock().await = Some(number.to_string());
    }

    pub async fn last_customer(&self) -> Option<String> {
        self.last_customer.lock().await.clone()
    }

    /// `#Responder <text>` from the responsable goes to the last customer that
    /// wrote to the bot. Returns `true` when the message was consumed.
    pub async fn forward_to_last_customer(&self, text: &str) -> bool {
        let Some(rest) = text.trim().strip_prefix(RELAY_COMMAND) else {
            return false;
        };
        let body = rest.trim();
        if body.is_empty() {
            warn!("empty #Responder message");
            return false;
        }
        let Some(customer) = self.last_customer().await else {
            warn!("#Responder without a tracked customer");
            return false;
        };
        if let Err(err) = self.whatsapp.send_text(&customer, body).await {
            warn!(customer, error = %err, "#Responder relay failed");
        }
        true
    }
}
