use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::BotResult,
    gemini::{extract_json, GeminiClient},
    prompting::render_classifier_prompt,
    responses::CannedResponses,
};

const DELAY_KEYWORDS: &[&str] = &[
    "llego", "llegando", "llegaré", "llegare", "llegó", "llegue",
    "voy a demorar", "demoro", "demorar", "demorando",
    "estoy yendo", "yendo", "viniendo", "estoy viniendo",
    "tengo turno", "mi turno", "turno a las", "turno es",
    "atrasado", "atrasé", "atrase", "me atrasé", "me atrase",
    "llegando tarde", "llegando unos minutos", "llegando 10", "llegando 15",
    "llegando 20", "llegando 30", "llegando 40",
    "retraso", "con retraso", "media hora de retraso", "media hora retraso",
    "con demora", "tengo demora", "voy con demora", "llegando con demora",
];

/// First match wins, so more specific intents come first.
const BASIC_INTENTS: &[(&str, &[&str])] = &[
    (
        "derivar_humano",
        &[
            "hablar con alguien", "hablar con una persona", "hablar con un humano",
            "persona real", "atención humana", "atencion humana", "asistente humano",
            "hablar con el barbero", "hablar con el dueño", "con un operador",
        ],
    ),
    ("visagismo_redondo", &["cara redonda", "rostro redondo"]),
    ("visagismo_cuadrado", &["cara cuadrada", "rostro cuadrado"]),
    ("visagismo_ovalado", &["cara ovalada", "rostro ovalado", "cara oval"]),
    (
        "visagismo_alargado",
        &["cara alargada", "rostro alargado", "cara larga", "rostro rectangular", "cara rectangular"],
    ),
    ("visagismo_diamante", &["cara diamante", "rostro diamante", "cara de diamante"]),
    ("visagismo_triangular", &["cara triangular", "rostro triangular"]),
    (
        "visagismo_entradas",
        &["entradas", "calvicie", "quedando pelado", "se me cae el pelo", "pérdida de pelo"],
    ),
    ("productos_lc", &["productos lc", "producto lc", "cera", "pomada", "productos"]),
    (
        "precios",
        &[
            "precio", "cuanto sale", "cuánto sale", "cuanto cuesta", "cuánto cuesta",
            "cuanto es", "cuánto es", "tarifa", "costo", "valor",
        ],
    ),
    (
        "turnos",
        &["turno", "reservar", "agendar", "agenda", "reserva", "cita", "disponibilidad"],
    ),
    (
        "ubicacion",
        &[
            "donde queda", "dónde queda", "donde están", "dónde están", "donde estan",
            "ubicación", "ubicacion", "dirección", "direccion",
        ],
    ),
    ("barba", &["barba"]),
    (
        "diferencial",
        &[
            "diferencial", "por qué ustedes", "por que ustedes", "qué los diferencia",
            "que los diferencia", "qué tienen de distinto", "que tienen de distinto",
        ],
    ),
    ("niños_mujeres", &["niño", "niños", "nene", "mi hijo", "mujer", "mujeres"]),
    ("preguntas_frecuentes", &["preguntas frecuentes", "tengo una duda", "consulta general"]),
    ("cortes", &["corte", "cortes", "pelo", "cabello", "fade", "degradado", "visagismo"]),
];

/// Keyword groups pointing at a canned `(intent, key)` slot.
pub const CANNED_KEYWORDS: &[(&[&str], (&str, &str))] = &[
    (
        &["cuanto sale", "cuánto sale", "precio", "precios", "cuánto cuesta", "cuanto cuesta", "tarifa", "costo"],
        ("precios", "cuanto_sale"),
    ),
    (
        &["más barato", "mas barato", "más económico", "mas economico", "otros lados", "otro lugar", "más caro", "mas caro"],
        ("precios", "mas_barato_otros_lados"),
    ),
    (
        &["donde están", "dónde están", "donde estan", "ubicación", "ubicacion", "dirección", "direccion", "donde queda", "dónde queda"],
        ("ubicacion", "donde_estan"),
    ),
    (
        &["turno hoy", "turno para hoy", "hora hoy", "tenes hora hoy", "tienes hora hoy", "disponible hoy"],
        ("turnos", "turno_hoy"),
    ),
    (
        &["agendar con tiempo", "reservar con tiempo", "con cuánto tiempo", "con cuanto tiempo", "anticipación", "anticipacion"],
        ("turnos", "agendar_con_tiempo"),
    ),
    (
        &["salgo del laburo", "salgo del trabajo", "salgo a las", "horarios después", "horarios despues", "después del trabajo", "despues del trabajo"],
        ("turnos", "horarios_salida_trabajo"),
    ),
    (
        &["no hay horarios", "no hay turnos", "no quedan turnos", "no quedan horarios", "sin horarios", "sin turnos"],
        ("turnos", "no_horarios_disponibles"),
    ),
    (
        &["no veo horarios hoy", "no aparecen horarios hoy", "no hay para hoy", "no queda nada hoy"],
        ("turnos", "no_veo_horarios_hoy"),
    ),
    (
        &["no aparecen horarios", "no veo horarios", "no hay disponibilidad"],
        ("situaciones", "no_aparen_horarios_agenda"),
    ),
    (
        &["qué incluye", "que incluye", "que trae", "qué trae", "incluye", "qué viene", "que viene"],
        ("servicios", "que_incluye_corte"),
    ),
    (
        &["qué es asesoramiento", "que es asesoramiento", "qué es el asesoramiento", "que es el asesoramiento", "asesoramiento", "asesoría", "asesoria"],
        ("servicios", "que_es_asesoramiento"),
    ),
    (
        &["solo barba", "solo la barba", "hacen barba", "arreglan barba", "barba sola"],
        ("servicios", "solo_barba"),
    ),
    (
        &["hacen tinta", "hacen tatuajes", "tatuajes", "tinta"],
        ("servicios", "hacen_tinta"),
    ),
    (
        &["asesoría se cobra", "asesoria se cobra", "asesoramiento se cobra", "se cobra aparte", "cobra aparte"],
        ("servicios", "asesoria_se_cobra_aparte"),
    ),
    (
        &["cuánto demora", "cuanto demora", "cuánto tarda", "cuanto tarda", "duración", "duracion", "tiempo demora"],
        ("tiempo", "cuanto_demora"),
    ),
    (
        &["pago con tarjeta", "aceptan tarjeta", "tarjeta de crédito", "tarjeta de credito", "tarjeta", "débito", "debito"],
        ("pago", "pago_tarjeta"),
    ),
    (
        &["venden productos", "venden cera", "productos a la venta", "productos en venta", "comprar productos", "comprar cera"],
        ("productos", "venden_productos"),
    ),
    (
        &["reagendar", "re agendar", "cambiar turno", "cambiar cita", "mover turno"],
        ("cancelaciones", "cancelar_reagendar_1"),
    ),
    (
        &["no voy a poder", "no puedo llegar", "no puedo ir", "cancelar", "cancelar turno", "cancelar cita"],
        ("cancelaciones", "cancelar_reagendar_2"),
    ),
    (
        &["no pude llegar", "no llegué", "no llegue", "perdí el turno", "perdi el turno", "se me pasó", "se me paso"],
        ("cancelaciones", "no_pude_llegar"),
    ),
    (
        &["voy ahora", "caer ahora", "sin agenda", "sin reserva", "sin turno", "llegar ahora"],
        ("situaciones", "caer_sin_agenda"),
    ),
    (
        &["dos personas", "somos dos", "dos turnos", "vamos dos", "con otra persona"],
        ("situaciones", "dos_personas"),
    ),
    (
        &["no me manejo", "no manejo web", "no sé usar", "no se usar", "ayuda con web", "ayuda reservar"],
        ("situaciones", "no_manejo_web"),
    ),
    (
        &["no encuentro", "no encuentro el lugar", "está cerrado", "esta cerrado", "cerrado", "no lo encuentro"],
        ("situaciones", "no_encuentro_lugar"),
    ),
    (
        &["llegando tarde", "llegando 10", "llegando 15", "atrasado", "me atrasé", "me atrase", "llegando unos minutos"],
        ("situaciones", "llegando_tarde"),
    ),
    (
        &["llegando 30", "llegando 40", "muy tarde", "muy atrasado", "atraso largo", "llegando mucho más tarde"],
        ("situaciones", "llegando_muy_tarde"),
    ),
    (
        &["política", "politica", "horarios", "respeto turnos", "cancelar con tiempo"],
        ("situaciones", "politica_horarios"),
    ),
    (
        &["ya me corté", "ya me corte", "me corté hace poco", "me corte hace poco", "corté hace poco", "corte hace poco"],
        ("otros", "ya_me_corte"),
    ),
    (
        &["son de montevideo", "están en montevideo", "estan en montevideo", "montevideo", "de dónde son", "de donde son"],
        ("otros", "son_de_montevideo"),
    ),
];

const GREETINGS: &[&str] = &[
    "hola", "holi", "holis",
    "buenas", "buenos días", "buenos dias", "buen día", "buen dia",
    "buenas tardes", "buenas noches",
    "que tal", "qué tal", "que onda", "qué onda",
    "como estas", "cómo estás",
    "todo bien", "qué hay", "que hay",
];

const POSITIVE_WORDS: &[&str] = &[
    "si", "sí", "dale", "ok", "perfecto", "bueno", "bien", "claro", "por supuesto",
    "de acuerdo", "vamos", "joya", "genial", "buenísimo", "buenisimo", "👍", "👌",
];

const LINK_PHRASES: &[&str] = &[
    "pasame", "pásame", "pasame el link", "pásame el link",
    "dale pasame", "dale pásame",
    "pásame la agenda", "pasame la agenda", "pásame link", "pasame link",
    "mandame", "mándame", "mandame el link", "mándame el link",
    "dame", "dame el link", "dame link", "dame la agenda",
    "envíame", "envíame el link", "envíame link", "envíame la agenda",
    "quiero agendar", "quiero reservar", "quiero turno",
    "necesito agendar", "necesito reservar", "necesito turno",
    "link", "la agenda", "el link", "link de agenda",
];

const BOOKING_CONFIRMATIONS: &[&str] = &[
    "ya agende", "ya agendé", "reserve", "reservé", "ya reservé", "ya reserve",
    "listo", "listo agende", "agende", "agendé", "confirmado", "ya está",
];

const POSITIVE_MAX_CHARS: usize = 20;
const LINK_REQUEST_MAX_CHARS: usize = 30;
const GREETING_SLACK_CHARS: usize = 10;
/// Messages this short are too thin for the LLM classifier.
const CLASSIFIER_MIN_CHARS: usize = 10;

pub fn classifier_eligible(text: &str) -> bool {
    text.trim().chars().count() > CLASSIFIER_MIN_CHARS
}

fn normalized(text: &str) -> String {
    text.trim().to_lowercase()
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

pub fn is_delay_notice(text: &str) -> bool {
    let lower = normalized(text);
    !lower.is_empty() && contains_any(&lower, DELAY_KEYWORDS)
}

pub fn detect_basic_intent(text: &str) -> Option<&'static str> {
    let lower = normalized(text);
    if lower.is_empty() {
        return None;
    }
    BASIC_INTENTS
        .iter()
        .find(|(_, keywords)| contains_any(&lower, keywords))
        .map(|(intent, _)| *intent)
}

pub fn detect_canned_key(text: &str) -> Option<(&'static str, &'static str)> {
    let lower = normalized(text);
    if lower.is_empty() {
        return None;
    }
    CANNED_KEYWORDS
        .iter()
        .find(|(keywords, _)| contains_any(&lower, keywords))
        .map(|(_, slot)| *slot)
}

pub fn is_greeting(text: &str) -> bool {
    let cleaned = normalized(text)
        .chars()
        .filter(|c| !matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | '¿' | '¡'))
        .collect::<String>();
    let length = cleaned.chars().count();

    let greeted = GREETINGS.iter().any(|greeting| {
        cleaned.contains(greeting)
            && (length <= greeting.chars().count() + GREETING_SLACK_CHARS
                || cleaned.starts_with(greeting))
    });
    greeted || (cleaned.contains("buenas") && cleaned.contains("todo bien"))
}

pub fn is_positive_reply(text: &str) -> bool {
    let lower = normalized(text);
    lower.chars().count() <= POSITIVE_MAX_CHARS && contains_any(&lower, POSITIVE_WORDS)
}

pub fn wants_link(text: &str) -> bool {
    let lower = normalized(text);
    !lower.is_empty()
        && lower.chars().count() <= LINK_REQUEST_MAX_CHARS
        && contains_any(&lower, LINK_PHRASES)
}

pub fn is_booking_confirmation(text: &str) -> bool {
    contains_any(&normalized(text), BOOKING_CONFIRMATIONS)
}

pub fn mentions_booking(text: &str) -> bool {
    contains_any(&normalized(text), &["turno", "agenda", "reserva"])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentSource {
    Keywords,
    Predefined,
    Gemini,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedIntent {
    pub intent: String,
    pub source: IntentSource,
    /// Canned-response slot, when the detection went through the canned table.
    pub key: Option<String>,
}

/// Asks the model which canned slot the message matches. Slots the table does
/// not contain are discarded.
pub async fn classify_canned_key(
    text: &str,
    gemini: &GeminiClient,
    responses: &CannedResponses,
) -> BotResult<Option<(String, String)>> {
    let keys = responses.keys();
    if keys.is_empty() {
        return Ok(None);
    }

    let raw = gemini
        .generate_text(&render_classifier_prompt(text, &keys))
        .await?;
    let Some(parsed) = extract_json(&raw) else {
        debug!(raw = %raw, "classifier returned no json");
        return Ok(None);
    };

    let intent = parsed.get("intencion").and_then(Value::as_str).unwrap_or("");
    let key = parsed.get("clave").and_then(Value::as_str).unwrap_or("");
    if intent.is_empty() || key.is_empty() || responses.get(intent, key).is_none() {
        return Ok(None);
    }
    Ok(Some((intent.to_string(), key.to_string())))
}

/// Layered detection: basic keywords, then canned keywords, then the LLM
/// classifier for messages long enough to be worth it. Classifier failures
/// count as "no intent".
pub async fn detect_unified(
    text: &str,
    gemini: &GeminiClient,
    responses: &CannedResponses,
) -> Option<DetectedIntent> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(intent) = detect_basic_intent(trimmed) {
        return Some(DetectedIntent {
            intent: intent.to_string(),
            source: IntentSource::Keywords,
            key: None,
        });
    }

    if let Some((intent, key)) = detect_canned_key(trimmed) {
        return Some(DetectedIntent {
            intent: intent.to_string(),
            source: IntentSource::Predefined,
            key: Some(key.to_string()),
        });
    }

    if !classifier_eligible(trimmed) {
        return None;
    }

    match classify_canned_key(trimmed, gemini, responses).await {
        Ok(Some((intent, key))) => Some(DetectedIntent {
            intent,
            source: IntentSource::Gemini,
            key: Some(key),
        }),
        Ok(None) => None,
        Err(err) => {
            warn!(error = %err, "intent classifier failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn responses() -> CannedResponses {
        CannedResponses::from_json_str(
            r#"{"turnos": {"turno_hoy": "Mirá la agenda"}, "pago": {"pago_tarjeta": "Sí"}}"#,
        )
        .unwrap()
    }

    fn offline_gemini() -> GeminiClient {
        GeminiClient::new(
            reqwest::Client::new(),
            &Config::for_tests("http://wa", "http://gemini", ""),
        )
    }

    #[test]
    fn delay_notices() {
        assert!(is_delay_notice("Bro llego 10 min tarde"));
        assert!(is_delay_notice("tengo turno a las 15 y voy con demora"));
        assert!(!is_delay_notice("cuánto sale el corte?"));
        assert!(!is_delay_notice("   "));
    }

    #[test]
    fn basic_intents_follow_priority() {
        assert_eq!(detect_basic_intent("quiero hablar con alguien"), Some("derivar_humano"));
        assert_eq!(detect_basic_intent("tengo cara redonda, qué corte?"), Some("visagismo_redondo"));
        assert_eq!(detect_basic_intent("cuánto sale un turno?"), Some("precios"));
        assert_eq!(detect_basic_intent("quiero un turno"), Some("turnos"));
        assert_eq!(detect_basic_intent("hacen barba?"), Some("barba"));
        assert_eq!(detect_basic_intent("un fade bajo"), Some("cortes"));
        assert_eq!(detect_basic_intent("hola"), None);
    }

    #[test]
    fn canned_keys() {
        assert_eq!(detect_canned_key("Aceptan tarjeta?"), Some(("pago", "pago_tarjeta")));
        assert_eq!(detect_canned_key("tenes hora hoy?"), Some(("turnos", "turno_hoy")));
        assert_eq!(detect_canned_key("mas barato que otros lados"), Some(("precios", "mas_barato_otros_lados")));
        assert_eq!(detect_canned_key("hola"), None);
    }

    #[test]
    fn greetings() {
        assert!(is_greeting("Hola!"));
        assert!(is_greeting("¡Buenas tardes!"));
        assert!(is_greeting("hola, quería consultar por un corte para mañana"));
        assert!(is_greeting("Buenas, todo bien?"));
        assert!(!is_greeting("quería consultar algo, hola"));
        assert!(!is_greeting("cuánto sale el corte"));
    }

    #[test]
    fn positive_replies_and_link_requests() {
        assert!(is_positive_reply("Dale!"));
        assert!(is_positive_reply("si"));
        assert!(!is_positive_reply("si pero primero decime cuanto sale el corte"));

        assert!(wants_link("pasame el link"));
        assert!(wants_link("Dame la agenda"));
        assert!(!wants_link("no sé, después veo si me paso a ver el link"));
        assert!(!wants_link(""));
    }

    #[test]
    fn booking_confirmation_and_mentions() {
        assert!(is_booking_confirmation("Listo, ya reservé"));
        assert!(!is_booking_confirmation("todavía no"));
        assert!(mentions_booking("Tenés Agenda mañana?"));
        assert!(!mentions_booking("hola"));
    }

    #[tokio::test]
    async fn unified_prefers_keywords() {
        let gemini = offline_gemini();
        let detected = detect_unified("cuánto sale el corte", &gemini, &responses()).await.unwrap();
        assert_eq!(detected.intent, "precios");
        assert_eq!(detected.source, IntentSource::Keywords);

        let detected = detect_unified("aceptan débito?", &gemini, &responses()).await.unwrap();
        assert_eq!(detected.source, IntentSource::Predefined);
        assert_eq!(detected.key.as_deref(), Some("pago_tarjeta"));
    }

    #[tokio::test]
    async fn unified_skips_classifier_for_short_or_unconfigured() {
        assert!(!classifier_eligible("  que onda  "));
        assert!(classifier_eligible("che bro me ayudás"));
        let gemini = offline_gemini();
        assert!(detect_unified("ehh", &gemini, &responses()).await.is_none());
        assert!(detect_unified("che bro me ayudás con algo?", &gemini, &responses()).await.is_none());
    }

    #[tokio::test]
    async fn unified_uses_classifier_for_ambiguous_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [{
                    "text": "```json\n{\"intencion\": \"turnos\", \"clave\": \"turno_hoy\"}\n```"
                }]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        let gemini = GeminiClient::new(
            reqwest::Client::new(),
            &Config::for_tests("http://wa", &server.uri(), "key"),
        );

        let detected = detect_unified("che bro me hacés un lugarcito pa hoy?", &gemini, &responses())
            .await
            .unwrap();
        assert_eq!(detected.intent, "turnos");
        assert_eq!(detected.source, IntentSource::Gemini);
        assert_eq!(detected.key.as_deref(), Some("turno_hoy"));
    }

    #[tokio::test]
    async fn classifier_discards_unknown_slots() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [{
                    "text": "{\"intencion\": \"inventada\", \"clave\": \"nada\"}"
                }]}}]
            })))
            .mount(&server)
            .await;
        let gemini = GeminiClient::new(
            reqwest::Client::new(),
            &Config::for_tests("http://wa", &server.uri(), "key"),
        );
        let result = classify_canned_key("algo raro que no entiendo", &gemini, &responses())
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
