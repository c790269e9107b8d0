//! Ollama HTTP API client: health, list models, chat (whole or streamed), generate.

// No response timeout: a turn is one long-lived request and slow machines take as long as they need.
use async_trait::async_trait;
use futures_util::{Stream, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::provider::{FragmentStream, InferenceProvider};
use crate::session::Message;

pub const DEFAULT_HOST: &str = "http://localhost:11434";

/// Every way a call to the endpoint can fail: unreachable, non-2xx, or a payload we cannot read.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("{0}")]
    Unavailable(String),
}

impl InferenceError {
    fn malformed(e: impl std::fmt::Display) -> Self {
        InferenceError::Unavailable(format!("Malformed response from Ollama: {}", e))
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Option<Vec<TagModel>>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    message: Option<ChatChunkMessage>,
    #[allow(dead_code)]
    done: Option<bool>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChunkMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Option<String>,
    error: Option<String>,
}

impl ChatChunk {
    fn into_fragment(self) -> Result<Option<String>, InferenceError> {
        if let Some(e) = self.error {
            return Err(InferenceError::Unavailable(format!("Ollama error: {}", e)));
        }
        Ok(self
            .message
            .and_then(|m| m.content)
            .filter(|c| !c.is_empty()))
    }
}

pub struct OllamaClient {
    base: String,
    client: Client,
}

impl OllamaClient {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        let client = Client::builder().build().unwrap_or_default();
        Self { base, client }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, InferenceError> {
        let url = format!("{}{}", self.base, path);
        let res = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| InferenceError::Unavailable(format!("Ollama unreachable: {}", e)))?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(InferenceError::Unavailable(format!(
                "Ollama error {}: {}",
                status, text
            )));
        }
        Ok(res)
    }
}

#[async_trait]
impl InferenceProvider for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn health(&self) -> Result<bool, InferenceError> {
        let url = format!("{}/api/tags", self.base);
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| InferenceError::Unavailable(e.to_string()))?;
        Ok(res.status().is_success())
    }

    async fn list_models(&self) -> Result<Vec<String>, InferenceError> {
        let url = format!("{}/api/tags", self.base);
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| InferenceError::Unavailable(e.to_string()))?;
        if !res.status().is_success() {
            return Err(InferenceError::Unavailable(format!(
                "Ollama returned {}",
                res.status()
            )));
        }
        let body: TagsResponse = res.json().await.map_err(InferenceError::malformed)?;
        Ok(body
            .models
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.name)
            .collect())
    }

    async fn chat(&self, model: &str, messages: &[Message]) -> Result<String, InferenceError> {
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": false
        });
        let res = self.post("/api/chat", &body).await?;
        let chunk: ChatChunk = res.json().await.map_err(InferenceError::malformed)?;
        if chunk.message.is_none() && chunk.error.is_none() {
            return Err(InferenceError::malformed("missing message"));
        }
        Ok(chunk.into_fragment()?.unwrap_or_default())
    }

    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<FragmentStream, InferenceError> {
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": true
        });
        let res = self.post("/api/chat", &body).await?;
        let stream = decode_ndjson::<ChatChunk>(res)
            .try_filter_map(|chunk| async move { chunk.into_fragment() });
        Ok(stream.boxed())
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, InferenceError> {
        let body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "stream": false
        });
        let res = self.post("/api/generate", &body).await?;
        let out: GenerateResponse = res.json().await.map_err(InferenceError::malformed)?;
        if let Some(e) = out.error {
            return Err(InferenceError::Unavailable(format!("Ollama error: {}", e)));
        }
        out.response
            .ok_or_else(|| InferenceError::malformed("missing response"))
    }
}

/// Decode a newline-delimited JSON body into a stream of `T`.
fn decode_ndjson<T>(res: reqwest::Response) -> impl Stream<Item = Result<T, InferenceError>> + Send
where
    T: DeserializeOwned + Send + 'static,
{
    let stream = res.bytes_stream();
    futures_util::stream::try_unfold(
        (stream, Vec::new(), false),
        |(mut stream, mut buf, mut ended)| async move {
            loop {
                if let Some(line) = take_line(&mut buf, ended) {
                    let item = serde_json::from_str::<T>(&line).map_err(InferenceError::malformed)?;
                    return Ok(Some((item, (stream, buf, ended))));
                }
                if ended {
                    return Ok(None);
                }
                match stream.next().await {
                    Some(Ok(c)) => buf.extend_from_slice(&c),
                    Some(Err(e)) => return Err(InferenceError::Unavailable(e.to_string())),
                    None => ended = true,
                }
            }
        },
    )
}

/// Pop the next non-blank line. Once the body has ended, an unterminated remainder counts as a line.
fn take_line(buf: &mut Vec<u8>, at_end: bool) -> Option<String> {
    loop {
        let line: Vec<u8> = match buf.iter().position(|&b| b == b'\n') {
            Some(line_end) => buf.drain(..=line_end).collect(),
            None if at_end && !buf.is_empty() => std::mem::take(buf),
            None => return None,
        };
        let line_str = String::from_utf8_lossy(&line);
        let line_str = line_str.trim();
        if !line_str.is_empty() {
            return Some(line_str.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_line_splits_and_skips_blank() {
        let mut buf = b"{\"a\":1}\n\n{\"a\":2}\n{\"a\"".to_vec();
        assert_eq!(take_line(&mut buf, false).as_deref(), Some("{\"a\":1}"));
        assert_eq!(take_line(&mut buf, false).as_deref(), Some("{\"a\":2}"));
        assert_eq!(take_line(&mut buf, false), None);
        buf.extend_from_slice(b":3}");
        assert_eq!(take_line(&mut buf, true).as_deref(), Some("{\"a\":3}"));
        assert_eq!(take_line(&mut buf, true), None);
    }

    #[test]
    fn line_split_across_chunks_is_reassembled() {
        let mut buf = b"{\"message\":{\"con".to_vec();
        assert_eq!(take_line(&mut buf, false), None);
        buf.extend_from_slice(b"tent\":\"4\"}}\n");
        let line = take_line(&mut buf, false).unwrap();
        let chunk: ChatChunk = serde_json::from_str(&line).unwrap();
        assert_eq!(chunk.into_fragment().unwrap().as_deref(), Some("4"));
    }

    #[test]
    fn chunk_error_field_is_unavailable() {
        let chunk: ChatChunk =
            serde_json::from_str(r#"{"error":"model 'nope' not found"}"#).unwrap();
        assert_eq!(
            chunk.into_fragment(),
            Err(InferenceError::Unavailable(
                "Ollama error: model 'nope' not found".to_string()
            ))
        );
    }

    #[test]
    fn done_chunk_without_content_yields_nothing() {
        let chunk: ChatChunk =
            serde_json::from_str(r#"{"message":{"role":"assistant","content":""},"done":true}"#)
                .unwrap();
        assert_eq!(chunk.into_fragment(), Ok(None));
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        assert_eq!(OllamaClient::new("http://h:1/").base(), "http://h:1");
    }
}
