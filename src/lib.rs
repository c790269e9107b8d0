pub mod bot;
pub mod chat;
pub mod config;
pub mod diagnostics;
pub mod ollama;
pub mod provider;
pub mod relay;
pub mod render;
pub mod session;
pub mod storage;
pub mod web;

pub use chat::Session;
pub use ollama::OllamaClient;
pub use session::SessionStore;
pub use storage::Storage;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};

use crate::chat::{Snapshot, TurnError};
use crate::diagnostics::Level;
use crate::ollama::InferenceError;
use crate::provider::InferenceProvider;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),
    #[error(transparent)]
    Turn(#[from] TurnError),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<InferenceError> for AppError {
    fn from(e: InferenceError) -> Self {
        AppError::Turn(TurnError::Inference(e))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = match &self {
            AppError::Turn(TurnError::EmptyInput) | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Turn(TurnError::Busy) => StatusCode::CONFLICT,
            AppError::Turn(TurnError::Inference(_)) => StatusCode::BAD_GATEWAY,
            AppError::Turn(TurnError::Storage(_)) | AppError::Storage(_) | AppError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (code, body).into_response()
    }
}

/// Shared state of the web surface: one conversation per server process.
///
/// `session` is held for a whole turn; readers go through `snapshot` instead.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn InferenceProvider>,
    pub session: Arc<Mutex<Session>>,
    pub snapshot: watch::Receiver<Snapshot>,
}

impl AppState {
    pub fn new(provider: Arc<dyn InferenceProvider>, session: Session) -> Self {
        let snapshot = session.subscribe();
        Self {
            provider,
            session: Arc::new(Mutex::new(session)),
            snapshot,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }
}

/// Serve the browser chat UI on `addr` until the process is stopped.
pub async fn run_web(state: AppState, addr: SocketAddr) -> Result<(), AppError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    diagnostics::log(
        Level::Info,
        "web surface listening",
        Some(serde_json::json!({ "addr": local.to_string(), "provider": state.provider.name() })),
    );
    axum::serve(listener, web::router(state)).await?;
    Ok(())
}
