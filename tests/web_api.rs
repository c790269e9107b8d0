//! Browser-surface routes driven through `tower::ServiceExt::oneshot`.

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use futures_util::StreamExt;
use juniper::ollama::InferenceError;
use juniper::provider::{FragmentStream, InferenceProvider};
use juniper::session::{Message, SessionStore};
use juniper::web::{self, ChatEvent};
use juniper::{AppState, Session, Storage};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tower::ServiceExt;

struct FakeOllama {
    fragments: Vec<&'static str>,
    down: bool,
    /// Keep the stream open after the last fragment.
    stall: bool,
    calls: AtomicUsize,
}

impl FakeOllama {
    fn answering(fragments: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            fragments: fragments.to_vec(),
            down: false,
            stall: false,
            calls: AtomicUsize::new(0),
        })
    }

    fn stalling_after(fragments: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            fragments: fragments.to_vec(),
            down: false,
            stall: true,
            calls: AtomicUsize::new(0),
        })
    }

    fn down() -> Arc<Self> {
        Arc::new(Self {
            fragments: Vec::new(),
            down: true,
            stall: false,
            calls: AtomicUsize::new(0),
        })
    }

    fn check(&self) -> Result<(), InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down {
            Err(InferenceError::Unavailable(
                "Ollama unreachable: connection refused".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl InferenceProvider for FakeOllama {
    fn name(&self) -> &str {
        "fake"
    }

    async fn health(&self) -> Result<bool, InferenceError> {
        Ok(!self.down)
    }

    async fn list_models(&self) -> Result<Vec<String>, InferenceError> {
        if self.down {
            return Err(InferenceError::Unavailable("down".to_string()));
        }
        Ok(vec!["llama3".to_string(), "phi3".to_string()])
    }

    async fn chat(&self, _model: &str, _messages: &[Message]) -> Result<String, InferenceError> {
        self.check()?;
        Ok(self.fragments.concat())
    }

    async fn chat_stream(
        &self,
        _model: &str,
        _messages: &[Message],
    ) -> Result<FragmentStream, InferenceError> {
        self.check()?;
        let items: Vec<Result<String, InferenceError>> =
            self.fragments.iter().map(|f| Ok(f.to_string())).collect();
        let stream = futures_util::stream::iter(items);
        if self.stall {
            Ok(stream.chain(futures_util::stream::pending()).boxed())
        } else {
            Ok(stream.boxed())
        }
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, InferenceError> {
        self.check()?;
        Ok(format!("{model}: {prompt}"))
    }
}

fn app(provider: Arc<FakeOllama>) -> (Router, AppState) {
    let session = Session::open(SessionStore::new(Storage::in_memory().unwrap()));
    let state = AppState::new(provider, session);
    (web::router(state.clone()), state)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_string(res: axum::response::Response) -> String {
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn conversation_json(app: &Router) -> Value {
    let res = app.clone().oneshot(get("/api/conversation")).await.unwrap();
    serde_json::from_str(&body_string(res).await).unwrap()
}

fn events(body: &str) -> Vec<ChatEvent> {
    body.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn health_is_ok() {
    let (app, _) = app(FakeOllama::answering(&[]));
    let res = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn status_reports_version_and_endpoint_health() {
    let (app, _) = app(FakeOllama::down());
    let res = app.oneshot(get("/api/status")).await.unwrap();
    let body: Value = serde_json::from_str(&body_string(res).await).unwrap();
    assert_eq!(body["status"], "running");
    assert_eq!(body["ollama"], false);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn chat_streams_fragments_then_done() {
    let provider = FakeOllama::answering(&["4", "\n", "(four)"]);
    let (app, state) = app(provider.clone());
    let res = app
        .oneshot(json_request("POST", "/api/chat", json!({ "content": "2+2?" })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "application/x-ndjson");
    let body = body_string(res).await;
    assert_eq!(
        events(&body),
        vec![
            ChatEvent::Fragment { content: "4".to_string() },
            ChatEvent::Fragment { content: "\n".to_string() },
            ChatEvent::Fragment { content: "(four)".to_string() },
            ChatEvent::Done,
        ]
    );

    let session = state.session.lock().await;
    assert_eq!(
        session.state().messages(),
        &[Message::user("2+2?"), Message::assistant("4\n(four)")]
    );
}

#[tokio::test]
async fn blank_chat_is_rejected_before_inference() {
    let provider = FakeOllama::answering(&["x"]);
    let (app, state) = app(provider.clone());
    let res = app
        .oneshot(json_request("POST", "/api/chat", json!({ "content": "  \n" })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    assert!(state.session.lock().await.state().is_empty());
}

#[tokio::test]
async fn failed_chat_keeps_user_message_and_reports_one_error() {
    let (app, state) = app(FakeOllama::down());
    let res = app
        .clone()
        .oneshot(json_request("POST", "/api/chat", json!({ "content": "hello" })))
        .await
        .unwrap();
    let evts = events(&body_string(res).await);
    assert_eq!(
        evts,
        vec![ChatEvent::Error {
            message: "Error: Ollama unreachable: connection refused".to_string()
        }]
    );
    assert_eq!(
        state.session.lock().await.state().messages(),
        &[Message::user("hello")]
    );

    let body = conversation_json(&app).await;
    assert_eq!(body["phase"], "failed");
    assert_eq!(body["busy"], false);
    assert_eq!(body["error"], "Error: Ollama unreachable: connection refused");
    assert_eq!(body["messages"], json!([{ "role": "user", "content": "hello" }]));
}

#[tokio::test]
async fn reads_answer_while_a_turn_is_streaming() {
    let (app, _) = app(FakeOllama::stalling_after(&["par"]));
    let res = app
        .clone()
        .oneshot(json_request("POST", "/api/chat", json!({ "content": "slow?" })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = timeout(Duration::from_secs(5), async {
        loop {
            let body = conversation_json(&app).await;
            if body["phase"] == "streaming" && body["messages"][1]["content"] == "par" {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("conversation unreadable while the turn runs");
    assert_eq!(body["busy"], true);
    assert_eq!(
        body["messages"],
        json!([
            { "role": "user", "content": "slow?" },
            { "role": "assistant", "content": "par" }
        ])
    );

    let page = timeout(Duration::from_secs(5), app.clone().oneshot(get("/")))
        .await
        .expect("page unreadable while the turn runs")
        .unwrap();
    let page = body_string(page).await;
    assert!(page.contains(r#"autocomplete="off" disabled>"#));
    assert!(page.contains("<p>par</p>"));

    let transcript = timeout(Duration::from_secs(5), app.clone().oneshot(get("/api/transcript")))
        .await
        .expect("transcript unreadable while the turn runs")
        .unwrap();
    assert!(body_string(transcript).await.contains("slow?"));

    let again = app
        .clone()
        .oneshot(json_request("POST", "/api/chat", json!({ "content": "again" })))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let clear = app
        .clone()
        .oneshot(Request::builder().method("POST").uri("/api/clear").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(clear.status(), StatusCode::CONFLICT);

    let model = app
        .clone()
        .oneshot(json_request("PUT", "/api/model", json!({ "model": "gemma" })))
        .await
        .unwrap();
    assert_eq!(model.status(), StatusCode::CONFLICT);

    let body = conversation_json(&app).await;
    assert_eq!(body["phase"], "streaming");
    assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    assert_eq!(body["model"], "llama3");
}

#[tokio::test]
async fn clear_empties_conversation() {
    let (app, state) = app(FakeOllama::answering(&["a"]));
    let res = app
        .clone()
        .oneshot(json_request("POST", "/api/chat", json!({ "content": "q" })))
        .await
        .unwrap();
    body_string(res).await;
    let res = app
        .clone()
        .oneshot(Request::builder().method("POST").uri("/api/clear").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert!(state.session.lock().await.state().is_empty());
}

#[tokio::test]
async fn model_preference_round_trip() {
    let (app, _) = app(FakeOllama::answering(&[]));
    let res = app
        .clone()
        .oneshot(json_request("PUT", "/api/model", json!({ "model": "mistral" })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let res = app.clone().oneshot(get("/api/model")).await.unwrap();
    let body: Value = serde_json::from_str(&body_string(res).await).unwrap();
    assert_eq!(body["model"], "mistral");

    let res = app
        .oneshot(json_request("PUT", "/api/model", json!({ "model": " " })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn models_fall_back_when_listing_fails() {
    let (app, _) = app(FakeOllama::down());
    let res = app.oneshot(get("/api/models")).await.unwrap();
    let body: Vec<String> = serde_json::from_str(&body_string(res).await).unwrap();
    assert_eq!(body, vec!["llama3", "mistral", "llama2", "gemma"]);
}

#[tokio::test]
async fn page_renders_roles_differently() {
    let (app, _) = app(FakeOllama::answering(&["**bold** reply"]));
    let res = app
        .clone()
        .oneshot(json_request("POST", "/api/chat", json!({ "content": "<b>hi</b> **not bold**" })))
        .await
        .unwrap();
    body_string(res).await;

    let page = body_string(app.clone().oneshot(get("/")).await.unwrap()).await;
    assert!(page.contains("&lt;b&gt;hi&lt;/b&gt; **not bold**"));
    assert!(page.contains("<strong>bold</strong> reply"));
    assert!(page.contains(r#"<option value="phi3">phi3</option>"#));

    let transcript = body_string(app.oneshot(get("/api/transcript")).await.unwrap()).await;
    assert!(transcript.starts_with(r#"<div class="msg user">"#));
}

#[tokio::test]
async fn generate_uses_selected_model_by_default() {
    let (app, _) = app(FakeOllama::answering(&[]));
    let res = app
        .clone()
        .oneshot(json_request("POST", "/api/generate", json!({ "prompt": "hi" })))
        .await
        .unwrap();
    let body: Value = serde_json::from_str(&body_string(res).await).unwrap();
    assert_eq!(body["response"], "llama3: hi");

    let res = app
        .oneshot(json_request("POST", "/api/generate", json!({ "prompt": "hi", "model": "gemma" })))
        .await
        .unwrap();
    let body: Value = serde_json::from_str(&body_string(res).await).unwrap();
    assert_eq!(body["response"], "gemma: hi");
}

#[tokio::test]
async fn generate_failure_is_bad_gateway() {
    let (app, _) = app(FakeOllama::down());
    let res = app
        .oneshot(json_request("POST", "/api/generate", json!({ "prompt": "hi" })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let body: Value = serde_json::from_str(&body_string(res).await).unwrap();
    assert_eq!(body["error"], "Ollama unreachable: connection refused");
}
