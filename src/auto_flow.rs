//! Answers built from keywords and the knowledge base alone, without the model.

use tracing::debug;

use crate::{
    intent::{detect_basic_intent, detect_canned_key},
    knowledge::{self, ADDRESS},
    responses::CannedResponses,
};

const GENERIC_SNIPPET_LINES: usize = 3;
const GENERIC_SNIPPET_MAX_CHARS: usize = 300;

/// Canned answer by keyword first, then a short text for the intent. `intent`
/// and `info` are reused when the caller already has them.
pub fn auto_reply(
    text: &str,
    intent: Option<&str>,
    info: Option<&str>,
    responses: &CannedResponses,
) -> Option<String> {
    if text.trim().is_empty() {
        return None;
    }

    if let Some((canned_intent, key)) = detect_canned_key(text) {
        if let Some(answer) = responses.get(canned_intent, key) {
            debug!(intent = canned_intent, key, "auto flow canned answer");
            return Some(answer.to_string());
        }
    }

    let intent = intent
        .filter(|i| !i.is_empty())
        .or_else(|| detect_basic_intent(text))?;
    let info = match info.filter(|i| !i.is_empty()) {
        Some(info) => info.to_string(),
        None => knowledge::info_for_intent(intent, text),
    };
    if info.is_empty() {
        return None;
    }
    reply_for_intent(intent, &info, text)
}

fn reply_for_intent(intent: &str, info: &str, text: &str) -> Option<String> {
    let lower = text.to_lowercase();

    if let Some(face) = intent.strip_prefix("visagismo_") {
        let info_lower = info.to_lowercase();
        let mut tips = Vec::new();
        if info_lower.contains("volumen arriba") || info_lower.contains("pompadour") {
            tips.push("volumen arriba");
        }
        if info_lower.contains("fade") || info_lower.contains("degradado") {
            tips.push("degradados");
        }
        if info_lower.contains("barba") {
            tips.push("barba");
        }
        let body = if tips.is_empty() {
            "un corte que te favorezca según tu estructura".to_string()
        } else {
            tips.join(", ")
        };
        return Some(format!(
            "Bro, para {} te puedo hacer: {body}. Te puedo hacer esto o contame si tenes una idea ya.",
            face.replace('_', " ")
        ));
    }

    let fixed = match intent {
        "turnos" => "Bro, podés agendar tu turno desde el link de la agenda. Ahí ves todos los horarios disponibles y elegís el que te quede mejor.".to_string(),
        "precios" => format!(
            "Bro, el valor depende de lo que vos quieras hacerte. Te paso la lista:\n{}",
            knowledge::price_list()
        ),
        "ubicacion" => format!("Estamos en {ADDRESS}. Te dejo la ubicación exacta en Google Maps."),
        _ if lower.contains("donde") || lower.contains("ubicacion") => {
            format!("Estamos en {ADDRESS}. Te dejo la ubicación exacta en Google Maps.")
        }
        "barba" => "Sí bro, se realizan trabajos de barba, también en base al tipo de rostro. Analizamos tu tipo de rostro y barba para crear un estilo que te quede perfecto.".to_string(),
        "productos_lc" => "Sí, también se venden productos de la marca LC para mantener el corte perfecto todos los días. Valor: $500 cada uno. Podés reservar el producto para retirarlo en la barbería.".to_string(),
        "diferencial" => "Bro, el diferencial es que hacemos cortes basados en visagismo: analizamos el rostro y creamos un corte a medida. Además, trabajamos el styling con productos y herramientas para que te veas como querés. Trabajamos solo con turnos para que no tengas que esperar.".to_string(),
        "cortes" => "Bro, el servicio se basa en cortes personalizados según el rostro (visagismo). Analizamos estructura craneal, tipo de rostro, tipo de cabello, volumen y densidad. A partir de eso decidimos qué corte va mejor con tu fisonomía.".to_string(),
        _ => return Some(generic_snippet(info)),
    };
    Some(fixed)
}

fn generic_snippet(info: &str) -> String {
    let snippet = info
        .lines()
        .take(GENERIC_SNIPPET_LINES)
        .collect::<Vec<_>>()
        .join("\n");
    if snippet.chars().count() > GENERIC_SNIPPET_MAX_CHARS {
        let cut = snippet
            .chars()
            .take(GENERIC_SNIPPET_MAX_CHARS)
            .collect::<String>();
        format!("{cut}...")
    } else {
        snippet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responses() -> CannedResponses {
        CannedResponses::from_json_str(r#"{"pago": {"pago_tarjeta": "Sí, aceptamos tarjeta."}}"#)
            .unwrap()
    }

    #[test]
    fn canned_answer_wins() {
        assert_eq!(
            auto_reply("aceptan tarjeta?", None, None, &responses()).as_deref(),
            Some("Sí, aceptamos tarjeta.")
        );
    }

    #[test]
    fn visagismo_summary() {
        let reply = auto_reply("tengo cara redonda", None, None, &responses()).unwrap();
        assert_eq!(
            reply,
            "Bro, para redondo te puedo hacer: volumen arriba, degradados, barba. \
             Te puedo hacer esto o contame si tenes una idea ya."
        );
    }

    #[test]
    fn fixed_texts_per_intent() {
        let prices = auto_reply("algo", Some("precios"), None, &responses()).unwrap();
        assert!(prices.contains("• Cejas en base a visagismo → $50"));

        let place = auto_reply("algo", Some("ubicacion"), None, &responses()).unwrap();
        assert!(place.starts_with("Estamos en Juan José de Amézaga 2241"));
    }

    #[test]
    fn other_intents_get_a_trimmed_snippet() {
        let reply = auto_reply("dudas", Some("preguntas_frecuentes"), None, &responses()).unwrap();
        assert_eq!(reply, "PREGUNTAS FRECUENTES:\n\n¿Cuál es el diferencial?");

        let long_info = "x".repeat(400);
        let reply = auto_reply("algo", Some("niños_mujeres"), Some(&long_info), &responses()).unwrap();
        assert_eq!(reply.chars().count(), GENERIC_SNIPPET_MAX_CHARS + 3);
    }

    #[test]
    fn nothing_to_say() {
        assert!(auto_reply("hola", None, None, &responses()).is_none());
        assert!(auto_reply("", Some("precios"), None, &responses()).is_none());
        assert!(auto_reply("algo", Some("saludo_inicial"), None, &responses()).is_none());
    }
}
