//! Relay a single prompt's answer back over a size-capped chat protocol.
//!
//! The first chunk answers the command directly; the rest go out as
//! follow-ups, in order. Every call ends with exactly one terminal reply,
//! even when inference fails.

use async_trait::async_trait;
use thiserror::Error;

use crate::chat::validate_input;
use crate::diagnostics::{self, Level};
use crate::provider::InferenceProvider;

/// Discord caps messages at 2000 characters; leave room for the header.
pub const DEFAULT_CHUNK_LIMIT: usize = 1900;

/// Longer model names are cut in the header so header plus a full default
/// chunk stays within 2000 characters.
pub const HEADER_MODEL_CHARS: usize = 64;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Reply failed: {0}")]
    Transport(String),
}

/// Where relayed text goes. Implemented over a deferred Discord interaction.
#[async_trait]
pub trait ReplyChannel: Send + Sync {
    /// The direct reply to the triggering command.
    async fn reply(&self, content: &str) -> Result<(), RelayError>;

    async fn follow_up(&self, content: &str) -> Result<(), RelayError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Answer delivered in `messages` messages.
    Answered { messages: usize },
    /// Error text delivered as the reply.
    Failed(String),
}

/// Split `text` into pieces of at most `limit` characters. Pure length-based:
/// words and markup may be cut.
pub fn chunk(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::with_capacity(text.len() / limit + 1);
    let mut current = String::new();
    let mut count = 0;
    for c in text.chars() {
        if count == limit {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(c);
        count += 1;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

pub fn format_answer_header(model: &str, first_chunk: &str) -> String {
    let shown = if model.chars().count() > HEADER_MODEL_CHARS {
        let mut cut: String = model.chars().take(HEADER_MODEL_CHARS - 1).collect();
        cut.push('…');
        cut
    } else {
        model.to_string()
    };
    format!("**Model**: {}\n**Response**:\n{}", shown, first_chunk)
}

pub fn format_error(message: impl std::fmt::Display) -> String {
    format!("❌ Error: {}", message)
}

/// Ask `provider` for a single-prompt answer and relay it through `channel`.
pub async fn relay_query<P, C>(
    provider: &P,
    channel: &C,
    model: &str,
    prompt: &str,
    limit: usize,
) -> Result<RelayOutcome, RelayError>
where
    P: InferenceProvider + ?Sized,
    C: ReplyChannel + ?Sized,
{
    if let Err(e) = validate_input(prompt) {
        let text = format_error(&e);
        channel.reply(&text).await?;
        return Ok(RelayOutcome::Failed(e.to_string()));
    }

    let response = match provider.generate(model, prompt).await {
        Ok(r) => r,
        Err(e) => {
            diagnostics::log(
                Level::Error,
                "query failed",
                Some(serde_json::json!({ "model": model, "error": e.to_string() })),
            );
            channel.reply(&format_error(&e)).await?;
            return Ok(RelayOutcome::Failed(e.to_string()));
        }
    };

    let chunks = chunk(&response, limit);
    let first = chunks.first().map(String::as_str).unwrap_or_default();
    channel.reply(&format_answer_header(model, first)).await?;
    for rest in chunks.iter().skip(1) {
        channel.follow_up(rest).await?;
    }
    let messages = chunks.len().max(1);
    diagnostics::log(
        Level::Info,
        "query relayed",
        Some(serde_json::json!({ "model": model, "chars": response.chars().count(), "messages": messages })),
    );
    Ok(RelayOutcome::Answered { messages })
}

/// Last-resort follow-up after a relay broke partway. Returns whether it was delivered.
pub async fn report_relay_failure<C>(channel: &C, error: &RelayError) -> bool
where
    C: ReplyChannel + ?Sized,
{
    diagnostics::log(
        Level::Error,
        "relay failed",
        Some(serde_json::json!({ "error": error.to_string() })),
    );
    match channel.follow_up(&format_error(error)).await {
        Ok(()) => true,
        Err(reply_err) => {
            diagnostics::log(
                Level::Error,
                "error reply failed",
                Some(serde_json::json!({ "error": reply_err.to_string() })),
            );
            false
        }
    }
}
