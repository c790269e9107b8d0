//! One chat turn: append the user's message, ask the provider, and fold the answer
//! into the trailing assistant message, persisting after every change.

use futures_util::StreamExt;
use serde::Serialize;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;

use crate::diagnostics::{self, Level};
use crate::ollama::InferenceError;
use crate::provider::InferenceProvider;
use crate::session::{ConversationState, Message, SessionStore};
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum TurnError {
    #[error("Message is empty")]
    EmptyInput,
    #[error("A response is already in progress")]
    Busy,
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    #[default]
    Idle,
    Submitted,
    Streaming,
    Completed,
    Failed,
}

impl TurnPhase {
    pub fn in_flight(self) -> bool {
        matches!(self, TurnPhase::Submitted | TurnPhase::Streaming)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResponseMode {
    /// Wait for the whole answer, then apply it at once.
    Atomic,
    /// Apply fragments as they arrive.
    #[default]
    Incremental,
}

/// Rejects blank submissions before anything is appended or sent.
pub fn validate_input(input: &str) -> Result<&str, TurnError> {
    if input.trim().is_empty() {
        Err(TurnError::EmptyInput)
    } else {
        Ok(input)
    }
}

/// What readers see of a session, refreshed on every change, including mid-turn.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub state: ConversationState,
    pub phase: TurnPhase,
    pub last_error: Option<String>,
}

/// Conversation state plus its store, driven one turn at a time.
pub struct Session {
    store: SessionStore,
    state: ConversationState,
    phase: TurnPhase,
    last_error: Option<String>,
    published: watch::Sender<Snapshot>,
}

impl Session {
    pub fn open(store: SessionStore) -> Self {
        let state = store.load();
        let (published, _) = watch::channel(Snapshot {
            state: state.clone(),
            ..Snapshot::default()
        });
        Self {
            store,
            state,
            phase: TurnPhase::Idle,
            last_error: None,
            published,
        }
    }

    /// Follow the session without contending with a running turn.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.published.subscribe()
    }

    fn publish(&self) {
        self.published.send_replace(Snapshot {
            state: self.state.clone(),
            phase: self.phase,
            last_error: self.last_error.clone(),
        });
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn set_model(&mut self, model: &str) -> Result<(), StorageError> {
        let saved = self.store.save_model(&mut self.state, model);
        self.publish();
        saved
    }

    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.last_error = None;
        let cleared = self.store.clear(&mut self.state);
        self.publish();
        cleared
    }

    /// Run one turn. `on_fragment` sees each piece of assistant text in arrival order.
    ///
    /// On failure the user's message stays in history and the error is kept in
    /// [`Session::last_error`] until the next submission.
    pub async fn submit<P, F>(
        &mut self,
        provider: &P,
        input: &str,
        mode: ResponseMode,
        mut on_fragment: F,
    ) -> Result<String, TurnError>
    where
        P: InferenceProvider + ?Sized,
        F: FnMut(&str),
    {
        let input = validate_input(input)?;
        if self.phase.in_flight() {
            return Err(TurnError::Busy);
        }
        self.phase = TurnPhase::Submitted;
        self.last_error = None;
        let turn_id = uuid::Uuid::new_v4().to_string();
        let model = self.state.model().to_string();

        let result = self
            .run(provider, &turn_id, &model, input, mode, &mut on_fragment)
            .await;
        match result {
            Ok(text) => {
                self.phase = TurnPhase::Completed;
                self.publish();
                Ok(text)
            }
            Err(e) => {
                self.phase = TurnPhase::Failed;
                self.last_error = Some(format!("Error: {}", e));
                if self.state.discard_empty_placeholder() {
                    if let Err(save_err) = self.store.save(&self.state) {
                        tracing::warn!(error = %save_err, "failed to persist after turn failure");
                    }
                }
                self.publish();
                diagnostics::log(
                    Level::Error,
                    "turn failed",
                    Some(serde_json::json!({ "turn_id": turn_id, "model": model, "error": e.to_string() })),
                );
                Err(e)
            }
        }
    }

    async fn run<P, F>(
        &mut self,
        provider: &P,
        turn_id: &str,
        model: &str,
        input: &str,
        mode: ResponseMode,
        on_fragment: &mut F,
    ) -> Result<String, TurnError>
    where
        P: InferenceProvider + ?Sized,
        F: FnMut(&str),
    {
        self.state.push(Message::user(input));
        self.store.save(&self.state)?;
        let history = self.state.messages().to_vec();
        self.state.push(Message::assistant(""));
        self.store.save(&self.state)?;
        self.publish();

        diagnostics::log(
            Level::Info,
            "turn submitted",
            Some(serde_json::json!({
                "turn_id": turn_id,
                "model": model,
                "provider": provider.name(),
                "history_len": history.len(),
            })),
        );
        let start = Instant::now();

        match mode {
            ResponseMode::Atomic => {
                let text = provider.chat(model, &history).await?;
                self.apply(&text, on_fragment)?;
            }
            ResponseMode::Incremental => {
                let mut stream = provider.chat_stream(model, &history).await?;
                self.phase = TurnPhase::Streaming;
                self.publish();
                let mut fragment_count: u32 = 0;
                let mut ttft_ms: u64 = 0;
                while let Some(fragment) = stream.next().await {
                    let fragment = fragment?;
                    if fragment_count == 0 {
                        ttft_ms = start.elapsed().as_millis() as u64;
                    }
                    fragment_count += 1;
                    self.apply(&fragment, on_fragment)?;
                }
                tracing::debug!(turn_id, fragment_count, ttft_ms, "stream finished");
            }
        }

        let text = self
            .state
            .messages()
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        diagnostics::log(
            Level::Info,
            "turn completed",
            Some(serde_json::json!({
                "turn_id": turn_id,
                "model": model,
                "duration_ms": start.elapsed().as_millis() as u64,
                "chars": text.chars().count(),
            })),
        );
        Ok(text)
    }

    fn apply<F>(&mut self, fragment: &str, on_fragment: &mut F) -> Result<(), StorageError>
    where
        F: FnMut(&str),
    {
        if fragment.is_empty() {
            return Ok(());
        }
        self.state.append_to_trailing(fragment);
        self.store.save(&self.state)?;
        self.publish();
        on_fragment(fragment);
        Ok(())
    }
}
