//! HTTP surface: SSE fetch stream, reply endpoints, document sessions,
//! object detection and the event WebSocket.

mod ws;

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::SessionError;
use crate::llm::ImageDescriptionClient;
use crate::mail::OutgoingReply;
use crate::pipeline::{Orchestrator, PipelineEvent};
use crate::session::SessionStore;
use crate::worker::WorkerPool;

/// Events buffered per SSE client before the batch starts waiting on it.
const SSE_BUFFER: usize = 64;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub pool: Arc<WorkerPool>,
    pub sessions: Arc<SessionStore>,
    pub images: Arc<ImageDescriptionClient>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .route("/api/emails/fetch", get(fetch_emails))
        .route("/api/emails/status", get(batch_status))
        .route("/api/emails/reply", post(send_reply))
        .route("/api/emails/generate_reply", post(generate_reply))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", get(get_session).delete(delete_session))
        .route("/api/sessions/{id}/document", post(load_document))
        .route("/api/sessions/{id}/summarize", post(summarize_document))
        .route("/api/sessions/{id}/chat", post(chat_document))
        .route("/api/objects/detect", post(detect_objects))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn failure(status: StatusCode, key: &str, message: impl Into<String>) -> Response {
    let mut body = json!({ "success": false });
    body[key] = json!(message.into());
    (status, Json(body)).into_response()
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "mail-assist"
    }))
}

// ── Emails ──────────────────────────────────────────────────────────────

/// Start a batch on the worker pool and feed its events to the caller.
pub(crate) fn start_batch(
    state: &AppState,
    label: &str,
    sink: Option<mpsc::Sender<PipelineEvent>>,
) -> Result<(), (StatusCode, String)> {
    let permit = state
        .orchestrator
        .begin()
        .map_err(|e| (StatusCode::CONFLICT, e.to_string()))?;
    let orch = Arc::clone(&state.orchestrator);
    state
        .pool
        .submit(label, async move {
            if let Err(e) = orch.run(permit, sink).await {
                warn!(error = %e, "Batch failed");
            }
        })
        .map(|_| ())
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
}

async fn fetch_emails(State(state): State<AppState>) -> Response {
    let (tx, rx) = mpsc::channel(SSE_BUFFER);
    if let Err((status, message)) = start_batch(&state, "sse-fetch", Some(tx)) {
        info!(%status, "Fetch request rejected");
        return failure(status, "message", message);
    }

    let stream = ReceiverStream::new(rx).map(|event| {
        let event = Event::default()
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().data("{}"));
        Ok::<_, Infallible>(event)
    });
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

async fn batch_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "running": state.orchestrator.is_running(),
        "batch": state.orchestrator.state(),
    }))
}

#[derive(Deserialize)]
struct ReplyRequest {
    #[serde(default)]
    message_id: String,
    #[serde(default)]
    to_email: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    reply_text: String,
}

async fn send_reply(State(state): State<AppState>, Json(body): Json<ReplyRequest>) -> Response {
    let fields = [&body.message_id, &body.to_email, &body.subject, &body.reply_text];
    if fields.iter().any(|f| f.trim().is_empty()) {
        return failure(StatusCode::BAD_REQUEST, "message", "Missing required fields.");
    }

    let reply = OutgoingReply {
        original_message_id: body.message_id,
        to_email: body.to_email,
        subject: body.subject,
        body: body.reply_text,
    };
    let orch = Arc::clone(&state.orchestrator);
    match state
        .pool
        .run("send-reply", async move { orch.send_reply(reply).await })
        .await
    {
        Ok(outcome) if outcome.success => {
            Json(json!({"success": true, "message": "Email sent successfully!"})).into_response()
        }
        Ok(outcome) => Json(json!({
            "success": false,
            "message": format!("Failed to send email: {}", outcome.detail),
        }))
        .into_response(),
        Err(e) => failure(StatusCode::SERVICE_UNAVAILABLE, "message", e.to_string()),
    }
}

#[derive(Deserialize)]
struct GenerateReplyRequest {
    #[serde(default)]
    email_content: String,
}

async fn generate_reply(
    State(state): State<AppState>,
    Json(body): Json<GenerateReplyRequest>,
) -> Response {
    if body.email_content.trim().is_empty() {
        return failure(StatusCode::BAD_REQUEST, "error", "Missing email content.");
    }
    match state.orchestrator.generate_reply(&body.email_content).await {
        Ok(reply) => Json(json!({"success": true, "reply": reply})).into_response(),
        Err(e) => {
            warn!(error = %e, "Reply generation failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "error", e.to_string())
        }
    }
}

// ── Document sessions ───────────────────────────────────────────────────

fn session_error(err: SessionError) -> Response {
    let status = match &err {
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::NoDocument | SessionError::UnsupportedFile(_) => StatusCode::BAD_REQUEST,
        SessionError::Llm(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    failure(status, "error", err.to_string())
}

fn parse_session_id(id: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(id)
        .map_err(|_| failure(StatusCode::BAD_REQUEST, "error", "Invalid session ID"))
}

async fn create_session(State(state): State<AppState>) -> impl IntoResponse {
    let id = state.sessions.create().await;
    (StatusCode::CREATED, Json(json!({"success": true, "session_id": id})))
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.sessions.get(id).await {
        Some(session) => Json(session).into_response(),
        None => session_error(SessionError::NotFound(id.to_string())),
    }
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if state.sessions.remove(id).await {
        Json(json!({"success": true})).into_response()
    } else {
        session_error(SessionError::NotFound(id.to_string()))
    }
}

#[derive(Deserialize)]
struct DocumentRequest {
    filename: String,
    content: String,
}

async fn load_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DocumentRequest>,
) -> Response {
    let id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if body.filename.trim().is_empty() {
        return failure(StatusCode::BAD_REQUEST, "error", "No selected file.");
    }
    match state
        .sessions
        .load_document(id, &body.filename, body.content)
        .await
    {
        Ok(()) => Json(json!({"success": true, "filename": body.filename})).into_response(),
        Err(e) => session_error(e),
    }
}

async fn summarize_document(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.sessions.summarize_document(id).await {
        Ok(summary) => Json(json!({"success": true, "summary": summary})).into_response(),
        Err(e) => session_error(e),
    }
}

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    question: String,
}

async fn chat_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ChatRequest>,
) -> Response {
    let id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if body.question.trim().is_empty() {
        return failure(StatusCode::BAD_REQUEST, "error", "No question provided");
    }
    match state.sessions.chat(id, &body.question).await {
        Ok(answer) => Json(json!({"success": true, "answer": answer})).into_response(),
        Err(e) => session_error(e),
    }
}

// ── Object detection ────────────────────────────────────────────────────

#[derive(Deserialize)]
struct DetectRequest {
    #[serde(default)]
    filename: String,
    #[serde(default)]
    image_base64: String,
}

async fn detect_objects(State(state): State<AppState>, Json(body): Json<DetectRequest>) -> Response {
    if body.filename.trim().is_empty() || body.image_base64.trim().is_empty() {
        return failure(StatusCode::BAD_REQUEST, "error", "No image provided.");
    }
    let data = body.image_base64.trim();
    let data = data.split_once(";base64,").map_or(data, |(_, rest)| rest);
    if let Err(e) = STANDARD.decode(data) {
        info!(error = %e, "Rejected undecodable image upload");
        return failure(StatusCode::BAD_REQUEST, "error", "Image is not valid base64.");
    }

    match state.images.describe(&body.filename, data.to_string()).await {
        Ok(result) => Json(json!({"success": true, "result": result})).into_response(),
        Err(e) => {
            warn!(error = %e, "Object detection failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "error", e.to_string())
        }
    }
}
