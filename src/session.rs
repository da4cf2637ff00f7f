use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::whatsapp::normalize_phone;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStep {
    #[default]
    None,
    SaludoInicial,
    AgendarTurno,
    LinkEnviado,
    ReservaConfirmada,
}

impl FlowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStep::None => "none",
            FlowStep::SaludoInicial => "saludo_inicial",
            FlowStep::AgendarTurno => "agendar_turno",
            FlowStep::LinkEnviado => "link_enviado",
            FlowStep::ReservaConfirmada => "reserva_confirmada",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub greeted: bool,
    pub flow_step: FlowStep,
}

/// Sessions untouched for this long are forgotten.
const SESSION_IDLE_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone)]
struct Session {
    waiting_for: Option<String>,
    context: SessionContext,
    touched_at: DateTime<Utc>,
}

impl Session {
    fn new() -> Self {
        Session {
            waiting_for: None,
            context: SessionContext::default(),
            touched_at: Utc::now(),
        }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now - self.touched_at < Duration::hours(SESSION_IDLE_TTL_HOURS)
    }
}

/// Drops idle sessions, then returns the one for `phone`, creating it if needed.
fn touch<'a>(sessions: &'a mut HashMap<String, Session>, phone: &str) -> &'a mut Session {
    let now = Utc::now();
    sessions.retain(|_, session| session.is_live(now));
    let session = sessions.entry(normalize_phone(phone)).or_insert_with(Session::new);
    session.touched_at = now;
    session
}

/// Conversation state per phone number, kept in memory until it goes idle.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn live_session(&self, phone: &str) -> Option<Session> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&normalize_phone(phone))
            .filter(|s| s.is_live(Utc::now()))
            .cloned()
    }

    pub async fn context(&self, phone: &str) -> SessionContext {
        self.live_session(phone)
            .await
            .map(|s| s.context)
            .unwrap_or_default()
    }

    pub async fn is_greeted(&self, phone: &str) -> bool {
        self.context(phone).await.greeted
    }

    pub async fn mark_greeted(&self, phone: &str) {
        let mut sessions = self.sessions.lock().await;
        let session = touch(&mut sessions, phone);
        session.context.greeted = true;
        session.context.flow_step = FlowStep::SaludoInicial;
        session.waiting_for = Some(FlowStep::SaludoInicial.as_str().to_string());
    }

    pub async fn flow_step(&self, phone: &str) -> FlowStep {
        self.context(phone).await.flow_step
    }

    /// Moves the flow forward. A finished booking (or `None`) leaves nothing
    /// pending for the number.
    pub async fn set_flow_step(&self, phone: &str, step: FlowStep) {
        let mut sessions = self.sessions.lock().await;
        let session = touch(&mut sessions, phone);
        session.context.flow_step = step;
        session.waiting_for = match step {
            FlowStep::None | FlowStep::ReservaConfirmada => None,
            other => Some(other.as_str().to_string()),
        };
    }

    pub async fn set_waiting_for(&self, phone: &str, waiting_for: Option<String>) {
        let mut sessions = self.sessions.lock().await;
        touch(&mut sessions, phone).waiting_for = waiting_for;
    }

    pub async fn waiting_for(&self, phone: &str) -> Option<String> {
        self.live_session(phone).await.and_then(|s| s.waiting_for)
    }

    pub async fn clear(&self, phone: &str) {
        self.sessions.lock().await.remove(&normalize_phone(phone));
    }
}
