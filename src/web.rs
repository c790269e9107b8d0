//! Browser surface: serves the chat page and its JSON / NDJSON API.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::mpsc;

use crate::chat::{validate_input, ResponseMode, Snapshot, TurnError, TurnPhase};
use crate::diagnostics::{self, Level};
use crate::session::Message;
use crate::{render, AppError, AppState};

pub const HEALTH_PATH: &str = "/health";
pub const STATUS_PATH: &str = "/api/status";
pub const CONVERSATION_PATH: &str = "/api/conversation";
pub const TRANSCRIPT_PATH: &str = "/api/transcript";
pub const CHAT_PATH: &str = "/api/chat";
pub const CLEAR_PATH: &str = "/api/clear";
pub const MODEL_PATH: &str = "/api/model";
pub const MODELS_PATH: &str = "/api/models";
pub const GENERATE_PATH: &str = "/api/generate";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route(HEALTH_PATH, get(health))
        .route(STATUS_PATH, get(status))
        .route(CONVERSATION_PATH, get(conversation))
        .route(TRANSCRIPT_PATH, get(transcript))
        .route(CHAT_PATH, post(chat))
        .route(CLEAR_PATH, post(clear))
        .route(MODEL_PATH, get(get_model).put(put_model))
        .route(MODELS_PATH, get(models))
        .route(GENERATE_PATH, post(generate))
        .with_state(state)
}

/// One line of the `/api/chat` response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Fragment { content: String },
    Done,
    Error { message: String },
}

impl ChatEvent {
    fn to_line(&self) -> Bytes {
        let mut line = serde_json::to_vec(self).unwrap_or_default();
        line.push(b'\n');
        Bytes::from(line)
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelRequest {
    pub model: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConversationDto {
    pub model: String,
    pub messages: Vec<Message>,
    pub busy: bool,
    pub phase: TurnPhase,
    pub error: Option<String>,
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

async fn status(State(st): State<AppState>) -> Json<serde_json::Value> {
    let ollama = st.provider.health().await.unwrap_or(false);
    Json(serde_json::json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "ollama": ollama,
    }))
}

async fn model_names(st: &AppState) -> Vec<String> {
    match st.provider.list_models().await {
        Ok(models) => models,
        Err(e) => {
            tracing::debug!(error = %e, "model listing unavailable, using fallback list");
            Vec::new()
        }
    }
}

async fn index(State(st): State<AppState>) -> Html<String> {
    let models = model_names(&st).await;
    let snap = st.snapshot();
    Html(render::render_page(
        &snap.state,
        &models,
        snap.last_error.as_deref(),
        snap.phase.in_flight(),
    ))
}

async fn conversation(State(st): State<AppState>) -> Json<ConversationDto> {
    let Snapshot {
        state,
        phase,
        last_error,
    } = st.snapshot();
    Json(ConversationDto {
        model: state.model().to_string(),
        messages: state.messages().to_vec(),
        busy: phase.in_flight(),
        phase,
        error: last_error,
    })
}

async fn transcript(State(st): State<AppState>) -> Html<String> {
    let snap = st.snapshot();
    Html(render::render_transcript(snap.state.messages()))
}

/// Streams `ChatEvent` lines while the turn runs. The session stays locked for
/// the whole turn, so a second submission gets 409 instead of queueing; reads
/// keep answering from the published snapshot.
async fn chat(
    State(st): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, AppError> {
    validate_input(&req.content)?;
    let mut session = st
        .session
        .clone()
        .try_lock_owned()
        .map_err(|_| TurnError::Busy)?;

    let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
    let provider = st.provider.clone();
    tokio::spawn(async move {
        let fragment_tx = tx.clone();
        let result = session
            .submit(
                provider.as_ref(),
                &req.content,
                ResponseMode::Incremental,
                |fragment| {
                    let evt = ChatEvent::Fragment {
                        content: fragment.to_string(),
                    };
                    let _ = fragment_tx.send(evt.to_line());
                },
            )
            .await;
        let last = match result {
            Ok(_) => ChatEvent::Done,
            Err(_) => ChatEvent::Error {
                message: session
                    .last_error()
                    .map(str::to_string)
                    .unwrap_or_else(|| "Error: Failed to get response from Ollama".to_string()),
            },
        };
        let _ = tx.send(last.to_line());
    });

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|line| (Ok::<_, Infallible>(line), rx))
    });
    let mut res = Body::from_stream(stream).into_response();
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-ndjson"),
    );
    Ok(res)
}

async fn clear(State(st): State<AppState>) -> Result<StatusCode, AppError> {
    let mut session = st
        .session
        .try_lock()
        .map_err(|_| TurnError::Busy)?;
    session.clear()?;
    diagnostics::log(Level::Info, "conversation cleared", None);
    Ok(StatusCode::NO_CONTENT)
}

async fn get_model(State(st): State<AppState>) -> Json<serde_json::Value> {
    let snap = st.snapshot();
    Json(serde_json::json!({ "model": snap.state.model() }))
}

async fn put_model(
    State(st): State<AppState>,
    Json(req): Json<ModelRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let model = req.model.trim();
    if model.is_empty() {
        return Err(AppError::BadRequest("model must not be empty".to_string()));
    }
    let mut session = st
        .session
        .try_lock()
        .map_err(|_| TurnError::Busy)?;
    let previous = session.state().model().to_string();
    session.set_model(model)?;
    if previous != model {
        diagnostics::log(
            Level::Info,
            "active_model change",
            Some(serde_json::json!({ "active_model": model })),
        );
    }
    Ok(Json(serde_json::json!({ "model": model })))
}

async fn models(State(st): State<AppState>) -> Json<Vec<String>> {
    let mut names = model_names(&st).await;
    if names.is_empty() {
        names = render::FALLBACK_MODELS.iter().map(|m| m.to_string()).collect();
    }
    Json(names)
}

async fn generate(
    State(st): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    validate_input(&req.prompt)?;
    let model = match req.model.filter(|m| !m.trim().is_empty()) {
        Some(m) => m,
        None => st.snapshot().state.model().to_string(),
    };
    let response = st
        .provider
        .generate(&model, &req.prompt)
        .await
        .map_err(AppError::from)?;
    Ok(Json(serde_json::json!({ "model": model, "response": response })))
}
