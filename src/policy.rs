use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    gemini::{extract_json, GeminiClient},
    intent::is_delay_notice,
    prompting::render_delay_extraction_prompt,
};

pub const GENERIC_DELAY_MESSAGE: &str =
    "Bro, no pasa nada. Ya le avisamos al barbero con el cual agendaste tu turno.";

const SEVERE_DELAY_MESSAGE: &str = "Bro, cuando el atraso es así es un poco complicado porque tenemos otros turnos agendados detrás. Si podés llegar lo antes posible, genial. Si no, mejor cancelá ese turno y agendate uno nuevo en el primer horario disponible.";

const MISSED_TURN_MESSAGE: &str = "Bro, cuando el atraso es tan largo es muy difícil poder atenderte bien porque tenemos otros turnos agendados detrás. En este caso, lo mejor es que canceles ese turno y te agendes uno nuevo en el primer horario disponible, así podemos darte el tiempo que necesitás y no atrasamos al resto.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyState {
    DemoraLeve,
    DemoraMedia,
    DemoraGrave,
    TurnoPerdido,
    Neutro,
}

impl PolicyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyState::DemoraLeve => "demora_leve",
            PolicyState::DemoraMedia => "demora_media",
            PolicyState::DemoraGrave => "demora_grave",
            PolicyState::TurnoPerdido => "turno_perdido",
            PolicyState::Neutro => "neutro",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayData {
    pub hora_turno: Option<String>,
    pub hora_llegada: Option<String>,
    pub minutos_demora: Option<i64>,
}

impl DelayData {
    fn is_empty(&self) -> bool {
        self.hora_turno.is_none() && self.hora_llegada.is_none() && self.minutos_demora.is_none()
    }

    /// Fills `minutos_demora` from the two times when arrival is after the turn.
    fn derive_minutes(&mut self) {
        if self.minutos_demora.is_some() {
            return;
        }
        let (Some(turno), Some(llegada)) = (&self.hora_turno, &self.hora_llegada) else {
            return;
        };
        let (Some(turno), Some(llegada)) = (minutes_of_day(turno), minutes_of_day(llegada)) else {
            return;
        };
        let diff = llegada - turno;
        if diff > 0 {
            self.minutos_demora = Some(diff);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyOutcome {
    pub state: PolicyState,
    pub data: DelayData,
}

pub fn evaluate_delay(minutes: Option<i64>) -> PolicyState {
    match minutes {
        None => PolicyState::DemoraMedia,
        Some(m) if m <= 5 => PolicyState::DemoraLeve,
        Some(m) if m <= 10 => PolicyState::DemoraMedia,
        Some(m) if m <= 15 => PolicyState::DemoraGrave,
        Some(_) => PolicyState::TurnoPerdido,
    }
}

pub fn apply_policy(intent: &str, data: DelayData) -> PolicyOutcome {
    let state = if intent == "aviso_demora" {
        evaluate_delay(data.minutos_demora)
    } else {
        PolicyState::Neutro
    };
    PolicyOutcome { state, data }
}

/// Fixed customer text for a state. Severe states end with the booking link.
pub fn message_for(state: PolicyState, booking_link: &str) -> Option<String> {
    let base = match state {
        PolicyState::DemoraLeve | PolicyState::DemoraMedia => GENERIC_DELAY_MESSAGE,
        PolicyState::DemoraGrave => SEVERE_DELAY_MESSAGE,
        PolicyState::TurnoPerdido => MISSED_TURN_MESSAGE,
        PolicyState::Neutro => return None,
    };
    let mut message = base.to_string();
    if matches!(state, PolicyState::DemoraGrave | PolicyState::TurnoPerdido)
        && !booking_link.is_empty()
        && !message.contains(booking_link)
    {
        message.push_str("\n\n");
        message.push_str(booking_link);
    }
    Some(message)
}

fn minutes_of_day(hhmm: &str) -> Option<i64> {
    let (h, m) = hhmm.trim().split_once(':')?;
    Some(h.parse::<i64>().ok()? * 60 + m.parse::<i64>().ok()?)
}

fn minutes_from_text(text: &str) -> Option<i64> {
    let lower = text.to_lowercase();
    [
        r"(\d+)\s*(?:min|minutos|minuto)",
        r"demor(?:o|ar|ando)\s*(\d+)",
        r"llegando\s*(\d+)",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .find_map(|re| re.captures(&lower)?.get(1)?.as_str().parse().ok())
}

fn json_minutes(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_time(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Regex-only extraction: HH:MM pairs are turn then arrival, a single time is
/// the turn when the customer mentions "turno"/"tengo".
pub fn extract_delay_fallback(text: &str) -> Option<DelayData> {
    let lower = text.to_lowercase();
    let mut data = DelayData::default();

    if let Ok(time_re) = Regex::new(r"\b(\d{1,2}):(\d{2})\b") {
        let times = time_re
            .captures_iter(text)
            .filter_map(|c| {
                let hour = c.get(1)?.as_str().parse::<u32>().ok()?;
                Some(format!("{hour:02}:{}", c.get(2)?.as_str()))
            })
            .collect::<Vec<_>>();
        match times.as_slice() {
            [turno, llegada, ..] => {
                data.hora_turno = Some(turno.clone());
                data.hora_llegada = Some(llegada.clone());
            }
            [only] if lower.contains("turno") || lower.contains("tengo") => {
                data.hora_turno = Some(only.clone());
            }
            [only] => data.hora_llegada = Some(only.clone()),
            [] => {}
        }
    }

    if let Ok(minutes_re) = Regex::new(r"(\d+)\s*(?:min|minutos|minuto)") {
        data.minutos_demora = minutes_re
            .captures(&lower)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok());
    }
    data.derive_minutes();

    (!data.is_empty()).then_some(data)
}

/// Extracts turn time, arrival time and minutes late. The model does the
/// reading; times and text patterns fill what it leaves out.
pub async fn extract_delay_data(text: &str, gemini: &GeminiClient) -> Option<DelayData> {
    if text.trim().is_empty() {
        return None;
    }

    let raw = match gemini
        .generate_text(&render_delay_extraction_prompt(text))
        .await
    {
        Ok(raw) => raw,
        Err(err) => {
            warn!(error = %err, "delay extraction failed, using regex fallback");
            return extract_delay_fallback(text);
        }
    };

    let Some(parsed) = extract_json(&raw) else {
        warn!(raw = %raw, "delay extraction returned no json, using regex fallback");
        return extract_delay_fallback(text);
    };

    let mut data = DelayData {
        hora_turno: json_time(parsed.get("hora_turno")),
        hora_llegada: json_time(parsed.get("hora_llegada")),
        minutos_demora: json_minutes(parsed.get("minutos_demora")),
    };
    data.derive_minutes();
    if data.minutos_demora.is_none() {
        data.minutos_demora = minutes_from_text(text);
    }
    Some(data)
}

/// Full delay path: `None` when the message is not a delay notice.
pub async fn respond_to_delay(
    text: &str,
    booking_link: &str,
    gemini: &GeminiClient,
) -> Option<String> {
    if !is_delay_notice(text) {
        return None;
    }
    let Some(data) = extract_delay_data(text, gemini).await else {
        return Some(GENERIC_DELAY_MESSAGE.to_string());
    };
    let outcome = apply_policy("aviso_demora", data);
    info!(
        state = outcome.state.as_str(),
        minutes = ?outcome.data.minutos_demora,
        "delay policy applied"
    );
    message_for(outcome.state, booking_link)
}
