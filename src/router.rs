//! Picks the answer for one customer message. Stages run in priority order and
//! the first one that produces text wins: commands, welcome flow, critical
//! rules, canned responses, generation, default.

use tracing::{debug, info, warn};

use crate::{
    auto_flow::auto_reply,
    generation::{generate_reply, ReplyRequest, TECHNICAL_APOLOGY},
    intent::{
        detect_canned_key, detect_unified, is_booking_confirmation, is_greeting,
        is_positive_reply, mentions_booking, wants_link, DetectedIntent, IntentSource,
    },
    knowledge::info_for_intent,
    policy::respond_to_delay,
    responses::replace_links,
    session::FlowStep,
    store::chat_id_for,
    tokens::{build_modular_prompt, compress_history, count_tokens, HISTORY_COMPRESSION_MIN_MESSAGES},
    types::{AppState, HistoryEntry},
};

pub const CANCELLED_MESSAGE: &str = "❌ Operación cancelada.";
pub const DEFAULT_MESSAGE: &str =
    "Escribime lo que necesites o escribí *ayuda* para ver las opciones.";
pub const DEFAULT_MESSAGE_FIRST_CONTACT: &str =
    "¡Bro! ¿Todo bien?\n\nEscribime lo que necesites o escribí *ayuda* para ver las opciones.";

const HELP_MESSAGE: &str = "¡Hola hermano!\n\n\
Soy el asistente de la barbería. Te puedo ayudar con:\n\n\
*Turnos y reservas*\n\
• Agendar tu turno\n\
• Consultar disponibilidad\n\
• Cancelar o reagendar\n\n\
*Info sobre cortes*\n\
• Qué incluye el servicio\n\
• Precios\n\
• Visagismo (qué corte te queda según tu tipo de rostro)\n\
• Servicios de barba\n\n\
*Productos LC*\n\
• Info sobre productos exclusivos\n\
• Precios y disponibilidad\n\n\
*Preguntas frecuentes*\n\
• Diferencial del servicio\n\
• Ubicación\n\
• Formas de pago\n\
• Horarios\n\n\
Escribime lo que necesites, bro. Estoy acá para ayudarte.";

/// Prompts estimated above this go through the keyword flow before the model.
const DIRECT_GENERATION_MAX_TOKENS: usize = 500;
const HISTORY_WINDOW: usize = 6;
const LINK_ANNOUNCEMENTS: &[&str] = &[
    "te dejo el link",
    "te paso el link",
    "acá tenés el link",
    "aca tenes el link",
    "link de la agenda",
    "link de agenda",
];

pub fn handoff_message(contact: &str) -> String {
    format!(
        "Te voy a derivar con un asistente humano que te va a poder ayudar mejor. \
         En breve te contactará alguien de nuestro equipo.\n\nContacto: {contact}"
    )
}

fn with_link(mut reply: String, link: &str) -> String {
    if !link.is_empty() && !reply.contains(link) {
        reply.push_str("\n\n");
        reply.push_str(link);
    }
    reply
}

pub async fn route_message(state: &AppState, phone: &str, text: &str) -> String {
    let text = text.trim();
    let lower = text.to_lowercase();

    if let Some(reply) = handle_command(state, phone, &lower).await {
        return reply;
    }
    if let Some(reply) = handle_welcome_flow(state, phone, text).await {
        return reply;
    }

    let detected = match respond_to_delay(text, &state.config.link_reserva, &state.gemini).await {
        Some(reply) => {
            info!(phone, "delay notice answered by policy");
            return reply;
        }
        None => detect_unified(text, &state.gemini, &state.responses).await,
    };

    if let Some(reply) = handle_critical_rules(state, phone, text, detected.as_ref()).await {
        return reply;
    }
    if let Some(reply) = handle_canned(state, text) {
        return reply;
    }
    if let Some(reply) = handle_generation(state, phone, text, detected.as_ref()).await {
        return reply;
    }

    if state.sessions.is_greeted(phone).await {
        DEFAULT_MESSAGE.to_string()
    } else {
        DEFAULT_MESSAGE_FIRST_CONTACT.to_string()
    }
}

async fn handle_command(state: &AppState, phone: &str, lower: &str) -> Option<String> {
    match lower {
        "cancelar" | "salir" | "cancel" => {
            state.sessions.clear(phone).await;
            info!(phone, "session cleared by customer");
            Some(CANCELLED_MESSAGE.to_string())
        }
        "ayuda" => Some(HELP_MESSAGE.to_string()),
        _ => None,
    }
}

/// Generated text for a flow step. Failures are reported and the customer gets
/// the technical apology.
async fn flow_reply(
    state: &AppState,
    phone: &str,
    text: &str,
    intent: &str,
    booking_link: &str,
    maps_link: &str,
    has_context: bool,
) -> String {
    let request = ReplyRequest {
        intent,
        text,
        has_context,
        booking_link,
        maps_link,
        ..ReplyRequest::default()
    };
    match generate_reply(&request, &state.gemini, &state.responses).await {
        Ok(reply) => reply,
        Err(err) => {
            state
                .escalation
                .report_error(&err, text, phone, intent)
                .await;
            TECHNICAL_APOLOGY.to_string()
        }
    }
}

/// Booking link with a short generated lead-in. The link always closes the
/// message, even when generation fails.
async fn send_booking_link(state: &AppState, phone: &str, text: &str) -> String {
    let link = &state.config.link_reserva;
    let request = ReplyRequest {
        intent: "link_agenda",
        text,
        has_context: true,
        booking_link: link,
        ..ReplyRequest::default()
    };
    let reply = match generate_reply(&request, &state.gemini, &state.responses).await {
        Ok(reply) => reply,
        Err(err) => {
            state
                .escalation
                .report_error(&err, text, phone, "link_agenda")
                .await;
            "Dale bro, te paso la agenda para que elijas el horario que te quede mejor.".to_string()
        }
    };
    with_link(reply, link)
}

async fn handle_welcome_flow(state: &AppState, phone: &str, text: &str) -> Option<String> {
    let sessions = &state.sessions;
    let greeted = sessions.is_greeted(phone).await;

    if !greeted && is_greeting(text) {
        sessions.mark_greeted(phone).await;
        info!(phone, "first greeting");
        return Some(
            flow_reply(
                state,
                phone,
                text,
                "saludo_inicial",
                &state.config.link_reserva,
                &state.config.link_maps,
                false,
            )
            .await,
        );
    }

    let step = sessions.flow_step(phone).await;
    let waiting_for = sessions.waiting_for(phone).await;
    debug!(phone, step = step.as_str(), ?waiting_for, "welcome flow");
    match step {
        FlowStep::SaludoInicial if greeted => {
            if wants_link(text) {
                sessions.set_flow_step(phone, FlowStep::LinkEnviado).await;
                return Some(send_booking_link(state, phone, text).await);
            }
            if is_positive_reply(text) {
                sessions.set_flow_step(phone, FlowStep::AgendarTurno).await;
                return Some(
                    flow_reply(
                        state,
                        phone,
                        text,
                        "agendar_turno",
                        &state.config.link_reserva,
                        "",
                        true,
                    )
                    .await,
                );
            }
        }
        FlowStep::AgendarTurno => {
            if wants_link(text) || is_positive_reply(text) {
                sessions.set_flow_step(phone, FlowStep::LinkEnviado).await;
                return Some(send_booking_link(state, phone, text).await);
            }
        }
        FlowStep::LinkEnviado if is_booking_confirmation(text) => {
            sessions
                .set_flow_step(phone, FlowStep::ReservaConfirmada)
                .await;
            return Some(flow_reply(state, phone, text, "post_reserva", "", "", true).await);
        }
        _ => {}
    }
    None
}

async fn handle_critical_rules(
    state: &AppState,
    phone: &str,
    text: &str,
    detected: Option<&DetectedIntent>,
) -> Option<String> {
    let detected = detected?;
    debug!(
        intent = %detected.intent,
        source = ?detected.source,
        key = ?detected.key,
        "intent detected"
    );
    if detected.intent == "derivar_humano" {
        info!(phone, "handing off to a human");
        state
            .sessions
            .set_waiting_for(phone, Some("derivar_humano".to_string()))
            .await;
        return Some(handoff_message(state.config.handoff_contact()));
    }
    if wants_link(text) {
        return Some(send_booking_link(state, phone, text).await);
    }
    None
}

fn handle_canned(state: &AppState, text: &str) -> Option<String> {
    let (intent, key) = detect_canned_key(text)?;
    let answer = state.responses.get(intent, key)?;
    debug!(intent, key, "canned response");
    let reply = replace_links(answer, &state.config.link_reserva, &state.config.link_maps);
    if mentions_booking(text) {
        Some(with_link(reply, &state.config.link_reserva))
    } else {
        Some(reply)
    }
}

async fn load_history(state: &AppState, phone: &str) -> (String, Vec<HistoryEntry>) {
    let id_chat = chat_id_for(phone);
    let last: Vec<HistoryEntry> = match state.store.last_messages(&id_chat, HISTORY_WINDOW).await {
        Ok(messages) => messages.iter().map(HistoryEntry::from).collect(),
        Err(err) => {
            warn!(phone, error = %err, "could not load recent messages");
            Vec::new()
        }
    };
    let summary = match state.store.all_messages(&id_chat).await {
        Ok(all) if all.len() > HISTORY_COMPRESSION_MIN_MESSAGES => {
            compress_history(&all.iter().map(HistoryEntry::from).collect::<Vec<_>>())
        }
        Ok(_) => String::new(),
        Err(err) => {
            warn!(phone, error = %err, "could not load full history");
            String::new()
        }
    };
    (summary, last)
}

fn must_carry_link(intent: &str, text: &str, reply: &str) -> bool {
    let reply = reply.to_lowercase();
    matches!(intent, "turnos" | "link_agenda")
        || mentions_booking(text)
        || LINK_ANNOUNCEMENTS.iter().any(|p| reply.contains(p))
}

async fn handle_generation(
    state: &AppState,
    phone: &str,
    text: &str,
    detected: Option<&DetectedIntent>,
) -> Option<String> {
    let intent = detected.map(|d| d.intent.as_str()).unwrap_or("");
    let info = if intent.is_empty() {
        String::new()
    } else {
        info_for_intent(intent, text)
    };
    let has_context = state.sessions.is_greeted(phone).await || detected.is_some();
    let (history_summary, last_messages) = if has_context {
        load_history(state, phone).await
    } else {
        (String::new(), Vec::new())
    };

    let estimated = count_tokens(&build_modular_prompt(
        intent,
        text,
        &info,
        &history_summary,
        &last_messages,
        has_context,
    ));
    let link = &state.config.link_reserva;
    let maps = &state.config.link_maps;
    let request = ReplyRequest {
        intent,
        text,
        info: &info,
        history_summary: &history_summary,
        last_messages: &last_messages,
        has_context,
        booking_link: link,
        maps_link: maps,
        canned_key: detected.and_then(|d| d.key.as_deref()),
        // Keyword hits return before the classifier; everything else has had its turn.
        classified: detected.map_or(true, |d| d.source != IntentSource::Keywords),
    };

    let generated = if estimated <= DIRECT_GENERATION_MAX_TOKENS {
        generate_reply(&request, &state.gemini, &state.responses).await
    } else {
        debug!(estimated, "prompt too large, trying keyword flow first");
        match auto_reply(text, Some(intent), Some(info.as_str()), &state.responses) {
            Some(reply) => Ok(reply),
            None => generate_reply(&request, &state.gemini, &state.responses).await,
        }
    };

    match generated {
        Ok(reply) if reply.trim().is_empty() => None,
        Ok(reply) => {
            let reply = replace_links(&reply, link, maps);
            if must_carry_link(intent, text, &reply) {
                Some(with_link(reply, link))
            } else {
                Some(reply)
            }
        }
        Err(err) => {
            state
                .escalation
                .report_error(&err, text, phone, "generation")
                .await;
            auto_reply(text, Some(intent), Some(info.as_str()), &state.responses)
                .map(|reply| replace_links(&reply, link, maps))
        }
    }
}
