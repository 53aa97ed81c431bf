//! End-to-end tests for the HTTP / SSE / WebSocket surface.
//!
//! Each test spins up mock Gmail and LLM provider servers plus the real
//! router on random ports, then talks to it over real sockets.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::Uri;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use mail_assist::config::MarkReadPolicy;
use mail_assist::error::AuthError;
use mail_assist::llm::{
    DocumentClient, ImageDescriptionClient, ReplyDraftClient, SummarizationClient,
    gemini_provider, mistral_provider,
};
use mail_assist::mail::{GmailTransport, TokenSource};
use mail_assist::pipeline::Orchestrator;
use mail_assist::session::SessionStore;
use mail_assist::web::{AppState, routes};
use mail_assist::worker::WorkerPool;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

struct StaticToken;

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<SecretString, AuthError> {
        Ok(SecretString::from("integration-token"))
    }
}

/// Everything the mock Gmail server saw.
#[derive(Default)]
struct Mailbox {
    marked: Mutex<Vec<String>>,
    sent: Mutex<Vec<Value>>,
}

fn message(id: &str) -> Value {
    let encode = |s: &str| URL_SAFE_NO_PAD.encode(s);
    match id {
        "m1" => json!({
            "id": "m1",
            "threadId": "t1",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [
                    {"name": "From", "value": "Alice <alice@example.com>"},
                    {"name": "Subject", "value": "=?UTF-8?B?UXVhcnRlcmx5IHVwZGF0ZQ==?="},
                    {"name": "Message-ID", "value": "<m1@mail.example.com>"}
                ],
                "parts": [
                    {"mimeType": "text/plain", "body": {"data": encode("Revenue is up 10%.")}},
                    {"mimeType": "text/html", "body": {"data": encode("<p>Revenue is up 10%.</p>")}}
                ]
            }
        }),
        "m2" => json!({
            "id": "m2",
            "threadId": "t2",
            "payload": {
                "mimeType": "text/html",
                "headers": [
                    {"name": "From", "value": "bob@example.com"},
                    {"name": "Subject", "value": "Lunch?"}
                ],
                "body": {"data": encode("<b>Lunch on Friday?</b>")}
            }
        }),
        // Listed but structurally empty: the decoder skips it.
        _ => json!({"id": id}),
    }
}

async fn spawn(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn mock_gmail(mailbox: Arc<Mailbox>) -> String {
    let app = Router::new()
        .route(
            "/users/me/profile",
            get(|| async { Json(json!({"emailAddress": "me@example.com"})) }),
        )
        .route(
            "/users/me/messages",
            get(|| async {
                Json(json!({"messages": [{"id": "m1"}, {"id": "broken"}, {"id": "m2"}]}))
            }),
        )
        .route(
            "/users/me/messages/send",
            post(|State(mb): State<Arc<Mailbox>>, Json(body): Json<Value>| async move {
                mb.sent.lock().unwrap().push(body);
                Json(json!({"id": "sent-1", "threadId": "t1"}))
            }),
        )
        .route(
            "/users/me/messages/{id}",
            get(|Path(id): Path<String>| async move { Json(message(&id)) }),
        )
        .route(
            "/users/me/messages/{id}/modify",
            post(|State(mb): State<Arc<Mailbox>>, Path(id): Path<String>| async move {
                mb.marked.lock().unwrap().push(id.clone());
                Json(json!({"id": id}))
            }),
        )
        .with_state(mailbox);
    spawn(app).await
}

/// Gemini-shaped completion.
fn gemini_reply(text: &str) -> Value {
    json!({
        "responseId": "resp-1",
        "modelVersion": "gemini-1.5-flash",
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": text}]},
            "finishReason": "STOP",
            "index": 0
        }],
        "usageMetadata": {
            "promptTokenCount": 10,
            "candidatesTokenCount": 2,
            "totalTokenCount": 12
        }
    })
}

/// Mistral-shaped completion.
fn mistral_reply(text: &str) -> Value {
    json!({
        "id": "cmpl-1",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": "ministral-8b-latest",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 4, "total_tokens": 14}
    })
}

/// One server for both providers, dispatched on the request path so the
/// clients' own URL layout is used unchanged.
async fn mock_llm() -> String {
    let app = Router::new().fallback(|uri: Uri, Json(body): Json<Value>| async move {
        let path = uri.path();
        let request = body.to_string();
        if path.contains("generateContent") {
            let text = if request.contains("Analyze this image") {
                if request.contains(PIXEL_PNG) {
                    "A single white pixel."
                } else {
                    "No image received."
                }
            } else if request.contains("Revenue") {
                "Revenue grew."
            } else {
                "Lunch invite."
            };
            Json(gemini_reply(text))
        } else if path.ends_with("chat/completions") {
            Json(mistral_reply("Thanks for the note."))
        } else {
            Json(json!({"error": format!("unexpected path {path}")}))
        }
    });
    spawn(app).await
}

/// 1x1 PNG.
const PIXEL_PNG: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8/x8AAwMCAO+ip1sAAAAASUVORK5CYII=";

/// Start the full stack, return (app base URL, mailbox record).
async fn start_server() -> (String, Arc<Mailbox>) {
    let mailbox = Arc::new(Mailbox::default());
    let gmail = mock_gmail(Arc::clone(&mailbox)).await;
    let llm = mock_llm().await;

    let transport = GmailTransport::with_token_source(Arc::new(StaticToken)).with_base_url(gmail);
    let gemini =
        gemini_provider(&SecretString::from("g"), "gemini-1.5-flash", Some(&llm)).unwrap();
    let mistral =
        mistral_provider(&SecretString::from("m"), "ministral-8b-latest", Some(&llm)).unwrap();

    let state = AppState {
        orchestrator: Arc::new(Orchestrator::new(
            Arc::new(transport),
            SummarizationClient::new(gemini.clone()),
            ReplyDraftClient::new(mistral.clone()),
            10,
            MarkReadPolicy::AfterSummary,
        )),
        pool: Arc::new(WorkerPool::new(2)),
        sessions: Arc::new(SessionStore::new(DocumentClient::new(mistral))),
        images: Arc::new(ImageDescriptionClient::new(gemini)),
    };
    let base = spawn(routes(state)).await;

    // Give the servers a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;
    (base, mailbox)
}

fn parse_sse(text: &str) -> Vec<Value> {
    text.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter_map(|data| serde_json::from_str(data).ok())
        .collect()
}

#[tokio::test]
async fn sse_fetch_streams_full_batch() {
    timeout(TEST_TIMEOUT, async {
        let (base, mailbox) = start_server().await;

        let text = reqwest::get(format!("{base}/api/emails/fetch"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        let events = parse_sse(&text);

        let summaries: Vec<&Value> = events
            .iter()
            .filter(|e| e["type"] == "email_summary")
            .collect();
        assert_eq!(summaries.len(), 2);

        let first = &summaries[0]["data"];
        assert_eq!(first["summary"]["subject"], "Quarterly update");
        assert_eq!(first["summary"]["summary_text"], "Revenue grew.");
        assert_eq!(first["draft"]["to_email"], "Alice <alice@example.com>");
        assert_eq!(first["draft"]["draft_text"], "Thanks for the note.");
        assert_eq!(summaries[1]["data"]["summary"]["summary_text"], "Lunch invite.");

        let progress: Vec<(u64, u64)> = events
            .iter()
            .filter(|e| e["type"] == "progress")
            .map(|e| (e["current"].as_u64().unwrap(), e["total"].as_u64().unwrap()))
            .collect();
        assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(events.iter().filter(|e| e["type"] == "error").count(), 1);

        let last = events.last().unwrap();
        assert_eq!(last["type"], "completed");
        assert_eq!(last["success"], true);

        // after_summary: only the two messages that produced a digest.
        assert_eq!(*mailbox.marked.lock().unwrap(), vec!["m1", "m2"]);

        let status: Value = reqwest::get(format!("{base}/api/emails/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["running"], false);
        assert_eq!(status["batch"]["state"], "completed");
        assert_eq!(status["batch"]["processed"], 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_fetch_action_broadcasts_events() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let ws_url = format!("{}/ws", base.replacen("http", "ws", 1));
        let (mut ws, _) = connect_async(&ws_url).await.unwrap();

        ws.send(Message::Text(r#"{"action":"fetch"}"#.into()))
            .await
            .unwrap();

        let mut summaries = 0;
        loop {
            let msg = ws.next().await.unwrap().unwrap();
            let Message::Text(text) = msg else { continue };
            let event: Value = serde_json::from_str(&text).unwrap();
            match event["type"].as_str() {
                Some("email_summary") => summaries += 1,
                Some("completed") => {
                    assert_eq!(event["success"], true);
                    break;
                }
                _ => {}
            }
        }
        assert_eq!(summaries, 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_status_action_replies_directly() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let ws_url = format!("{}/ws", base.replacen("http", "ws", 1));
        let (mut ws, _) = connect_async(&ws_url).await.unwrap();

        ws.send(Message::Text(r#"{"action":"status"}"#.into()))
            .await
            .unwrap();
        let msg = ws.next().await.unwrap().unwrap();
        let reply: Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
        assert_eq!(reply["type"], "batch_state");
        assert_eq!(reply["running"], false);
        assert_eq!(reply["batch"]["state"], "idle");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn reply_endpoint_sends_threaded_message() {
    timeout(TEST_TIMEOUT, async {
        let (base, mailbox) = start_server().await;
        let client = reqwest::Client::new();

        let body: Value = client
            .post(format!("{base}/api/emails/reply"))
            .json(&json!({
                "message_id": "m1",
                "to_email": "Alice <alice@example.com>",
                "subject": "Quarterly update",
                "reply_text": "Great numbers, thanks!"
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["success"], true);

        let sent = mailbox.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["threadId"], "t1");
        let raw = URL_SAFE.decode(sent[0]["raw"].as_str().unwrap()).unwrap();
        let raw = String::from_utf8(raw).unwrap();
        assert!(raw.contains("Subject: Re: Quarterly update"));
        assert!(raw.contains("In-Reply-To: <m1@mail.example.com>"));
        assert!(raw.contains("Great numbers, thanks!"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn document_chat_over_http() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let client = reqwest::Client::new();

        let created: Value = client
            .post(format!("{base}/api/sessions"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let id = created["session_id"].as_str().unwrap().to_string();

        let loaded = client
            .post(format!("{base}/api/sessions/{id}/document"))
            .json(&json!({"filename": "plan.txt", "content": "Launch is in May."}))
            .send()
            .await
            .unwrap();
        assert!(loaded.status().is_success());

        let answer: Value = client
            .post(format!("{base}/api/sessions/{id}/chat"))
            .json(&json!({"question": "When is launch?"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(answer["success"], true);
        assert_eq!(answer["answer"], "Thanks for the note.");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn object_detection_sends_inline_image() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        assert!(STANDARD.decode(PIXEL_PNG).is_ok());

        let body: Value = reqwest::Client::new()
            .post(format!("{base}/api/objects/detect"))
            .json(&json!({"filename": "pixel.png", "image_base64": PIXEL_PNG}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["result"], "A single white pixel.");
    })
    .await
    .expect("test timed out");
}
