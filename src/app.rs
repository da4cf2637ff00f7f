use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    config::Config,
    error::BotResult,
    responses::CannedResponses,
    router::route_message,
    store::Store,
    types::{AppState, InboundContent, InboundMessage},
    whatsapp::{parse_inbound, verify_signature, verify_subscription},
};

pub const UNSUPPORTED_MESSAGE: &str = "Tipo de mensaje no soportado aún.";
const EVENT_RECEIVED: &str = "EVENT_RECEIVED";

async fn root(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "service": "barberia-bot",
        "status": "running",
        "store": state.store.backend(),
        "endpoints": {
            "webhook": "/webhook",
            "health": "/health",
        },
    }))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "now": Utc::now().to_rfc3339(),
        "store": state.store.backend(),
        "gemini": state.gemini.is_configured(),
        "cannedResponses": !state.responses.is_empty(),
    }))
}

async fn webhook_verify(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let mode = params.get("hub.mode").map(String::as_str).unwrap_or("");
    let token = params.get("hub.verify_token").map(String::as_str).unwrap_or("");
    let challenge = params.get("hub.challenge").map(String::as_str).unwrap_or("");

    match verify_subscription(mode, token, challenge, &state.config.verify_token) {
        Some(challenge) => {
            info!("webhook subscription verified");
            (StatusCode::OK, challenge).into_response()
        }
        None => {
            warn!(mode, "webhook verification rejected");
            (StatusCode::FORBIDDEN, "Token inválido").into_response()
        }
    }
}

/// Meta retries anything that is not a 200, so every outcome is acknowledged
/// and the work happens off the request.
async fn webhook_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok());
    if !verify_signature(&state.config.whatsapp_app_secret, signature, &body) {
        warn!("webhook signature mismatch, payload dropped");
        return (StatusCode::OK, EVENT_RECEIVED);
    }

    let payload = match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "malformed webhook payload");
            return (StatusCode::OK, EVENT_RECEIVED);
        }
    };

    let messages = parse_inbound(&payload, state.whatsapp.phone_number_id());
    if !messages.is_empty() {
        info!(count = messages.len(), "inbound messages");
    }
    for message in messages {
        tokio::spawn(process_inbound(state.clone(), message));
    }
    (StatusCode::OK, EVENT_RECEIVED)
}

fn describe(message: &InboundMessage) -> String {
    match &message.content {
        InboundContent::Text(text) => text.clone(),
        InboundContent::Audio { .. } => "[audio]".to_string(),
        InboundContent::Unsupported(kind) => format!("[{kind}]"),
    }
}

/// Handles one inbound message end to end. Any failure is escalated.
pub async fn process_inbound(state: Arc<AppState>, message: InboundMessage) {
    if let Err(err) = handle_inbound(&state, &message).await {
        state
            .escalation
            .handle_critical(&err, &describe(&message), &message.from, "webhook")
            .await;
    }
}

async fn handle_inbound(state: &AppState, message: &InboundMessage) -> BotResult<()> {
    let from = message.from.as_str();

    if state.escalation.is_responsable(from) {
        if let Some(text) = message.text() {
            if state
                .escalation
                .handle_responsable_reply(from, text, message.replied_message_id.as_deref())
                .await
            {
                return Ok(());
            }
            if state.escalation.forward_to_last_customer(text).await {
                return Ok(());
            }
        }
    }

    let cliente = state.store.get_or_create_client(from, "").await?;
    let chat = state.store.get_or_create_chat(&cliente).await?;

    let text = match &message.content {
        InboundContent::Text(text) => text.clone(),
        InboundContent::Audio { media_id, mime_type } => {
            let (audio, downloaded_mime) = state.whatsapp.download_media(media_id).await?;
            let mime = if mime_type.is_empty() {
                downloaded_mime
            } else {
                mime_type.clone()
            };
            let transcript = state.gemini.transcribe(&audio, &mime).await?;
            info!(from, chars = transcript.chars().count(), "voice note transcribed");
            transcript
        }
        InboundContent::Unsupported(kind) => {
            info!(from, kind, "unsupported message kind");
            state.whatsapp.send_text(from, UNSUPPORTED_MESSAGE).await?;
            return Ok(());
        }
    };

    state.store.record_message(&chat.id_chat, &text, true).await?;
    state.escalation.track_customer(from).await;

    let reply = route_message(state, from, &text).await;

    state
        .store
        .record_message(&chat.id_chat, &reply, false)
        .await?;
    state.whatsapp.send_text(from, &reply).await?;
    Ok(())
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/webhook", get(webhook_verify).post(webhook_event))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run() -> BotResult<()> {
    let config = Config::from_env()?;

    let store = match &config.database_url {
        Some(url) => Store::connect(url).await?,
        None => {
            warn!("no database configured, conversation log kept in memory");
            Store::memory()
        }
    };
    let responses = CannedResponses::load(&config.respuestas_path);
    if config.gemini_api_key.is_empty() {
        warn!("GEMINI_API_KEY not set, replies limited to keywords and canned answers");
    }

    let port = config.port;
    let state = Arc::new(AppState::new(config, store, responses));
    let app = build_router(state.clone());

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, store = state.store.backend(), "barberia bot listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::CUSTOMER_HOLD_MESSAGE;
    use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn state_for(whatsapp: &MockServer) -> Arc<AppState> {
        let config = Config::for_tests(&whatsapp.uri(), "http://gemini.invalid", "");
        Arc::new(AppState::new(
            config,
            Store::memory(),
            CannedResponses::default(),
        ))
    }

    fn state_with_gemini(whatsapp: &MockServer, gemini: &MockServer) -> Arc<AppState> {
        let config = Config::for_tests(&whatsapp.uri(), &gemini.uri(), "test-key");
        Arc::new(AppState::new(
            config,
            Store::memory(),
            CannedResponses::default(),
        ))
    }

    fn sent() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "messages": [{ "id": "wamid.out" }] }))
    }

    fn text_message(from: &str, body: &str) -> InboundMessage {
        InboundMessage {
            from: from.to_string(),
            message_id: "wamid.in".to_string(),
            content: InboundContent::Text(body.to_string()),
            replied_message_id: None,
        }
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn verification_echoes_challenge_only_for_the_right_token() {
        let server = MockServer::start().await;
        let state = state_for(&server);

        let params = HashMap::from([
            ("hub.mode".to_string(), "subscribe".to_string()),
            ("hub.verify_token".to_string(), "verify-me".to_string()),
            ("hub.challenge".to_string(), "12345".to_string()),
        ]);
        let ok = webhook_verify(Query(params.clone()), State(state.clone()))
            .await
            .into_response();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(body_text(ok).await, "12345");

        let mut wrong = params;
        wrong.insert("hub.verify_token".to_string(), "nope".to_string());
        let denied = webhook_verify(Query(wrong), State(state))
            .await
            .into_response();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_text(denied).await, "Token inválido");
    }

    #[tokio::test]
    async fn events_are_always_acknowledged() {
        let server = MockServer::start().await;
        let state = state_for(&server);

        let garbage = webhook_event(State(state.clone()), HeaderMap::new(), Bytes::from("not json"))
            .await
            .into_response();
        assert_eq!(garbage.status(), StatusCode::OK);
        assert_eq!(body_text(garbage).await, EVENT_RECEIVED);

        let empty = webhook_event(
            State(state),
            HeaderMap::new(),
            Bytes::from(r#"{"object":"whatsapp_business_account","entry":[]}"#),
        )
        .await
        .into_response();
        assert_eq!(empty.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn text_message_is_logged_routed_and_answered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1000/messages"))
            .and(body_partial_json(json!({ "to": "59891111111" })))
            .respond_with(sent())
            .expect(1)
            .mount(&server)
            .await;
        let state = state_for(&server);

        process_inbound(state.clone(), text_message("59891111111", "ayuda")).await;

        let log = state.store.all_messages("chat_59891111111").await.unwrap();
        assert_eq!(log.len(), 2);
        assert!(log[0].es_cliente);
        assert_eq!(log[0].contenido, "ayuda");
        assert!(!log[1].es_cliente);
        assert!(log[1].contenido.starts_with("¡Hola hermano!"));
        assert_eq!(
            state.escalation.last_customer().await.as_deref(),
            Some("59891111111")
        );
    }

    #[tokio::test]
    async fn unsupported_kinds_get_a_fixed_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "text": { "body": UNSUPPORTED_MESSAGE } })))
            .respond_with(sent())
            .expect(1)
            .mount(&server)
            .await;
        let state = state_for(&server);

        let mut message = text_message("59891111111", "");
        message.content = InboundContent::Unsupported("image".to_string());
        process_inbound(state.clone(), message).await;
        assert!(state
            .store
            .all_messages("chat_59891111111")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn failed_send_escalates_to_the_customer_hold_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "text": { "body": CUSTOMER_HOLD_MESSAGE } })))
            .respond_with(sent())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "to": "59890000002" })))
            .respond_with(sent())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "to": "59890000001" })))
            .respond_with(sent())
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let state = state_for(&server);

        process_inbound(state, text_message("59891111111", "ayuda")).await;
    }

    #[tokio::test]
    async fn responsable_reply_is_relayed_instead_of_routed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "to": "59893333333",
                "text": { "body": "Ya te atiendo" }
            })))
            .respond_with(sent())
            .expect(1)
            .mount(&server)
            .await;
        let state = state_for(&server);
        state
            .escalation
            .register_context("59893333333", "hola", "wamid.notice")
            .await;

        let mut reply = text_message("59890000002", "Ya te atiendo");
        reply.replied_message_id = Some("wamid.notice".to_string());
        process_inbound(state.clone(), reply).await;

        assert!(state
            .store
            .all_messages("chat_59890000002")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn voice_note_is_downloaded_transcribed_and_routed() {
        let whatsapp = MockServer::start().await;
        let gemini = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media-77"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "url": format!("{}/files/media-77", whatsapp.uri()),
                "mime_type": "audio/ogg",
            })))
            .expect(1)
            .mount(&whatsapp)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/media-77"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "audio/ogg")
                    .set_body_bytes(vec![1u8, 2, 3, 4]),
            )
            .expect(1)
            .mount(&whatsapp)
            .await;
        Mock::given(method("POST"))
            .and(path("/1000/messages"))
            .and(body_partial_json(json!({ "to": "59891111111" })))
            .respond_with(sent())
            .expect(1)
            .mount(&whatsapp)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("inline_data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [{ "text": "ayuda" }] } }]
            })))
            .expect(1)
            .mount(&gemini)
            .await;
        let state = state_with_gemini(&whatsapp, &gemini);

        let mut message = text_message("59891111111", "");
        message.content = InboundContent::Audio {
            media_id: "media-77".to_string(),
            mime_type: "audio/ogg".to_string(),
        };
        handle_inbound(&state, &message).await.unwrap();

        let log = state.store.all_messages("chat_59891111111").await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].contenido, "ayuda");
        assert!(log[1].contenido.starts_with("¡Hola hermano!"));
    }

    #[tokio::test]
    async fn quoted_reply_wins_over_responder_command() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "to": "59893333333",
                "text": { "body": "#Responder ya voy" }
            })))
            .respond_with(sent())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "to": "59894444444" })))
            .respond_with(sent())
            .expect(0)
            .mount(&server)
            .await;
        let state = state_for(&server);
        state.escalation.track_customer("59894444444").await;
        state
            .escalation
            .register_context("59893333333", "hola", "wamid.notice")
            .await;

        let mut reply = text_message("59890000002", "#Responder ya voy");
        reply.replied_message_id = Some("wamid.notice".to_string());
        handle_inbound(&state, &reply).await.unwrap();
    }

    #[tokio::test]
    async fn responder_command_reaches_last_customer_without_open_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "to": "59894444444",
                "text": { "body": "ya voy" }
            })))
            .respond_with(sent())
            .expect(1)
            .mount(&server)
            .await;
        let state = state_for(&server);
        state.escalation.track_customer("59894444444").await;

        handle_inbound(&state, &text_message("59890000002", "#Responder ya voy"))
            .await
            .unwrap();
        assert!(state
            .store
            .all_messages("chat_59890000002")
            .await
            .unwrap()
            .is_empty());
    }
}
