//! Gmail REST transport.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info, warn};

use super::oauth::{OAuthManager, TokenSource};
use super::reply::{build_reply_message, encode_raw};
use super::types::{DayRange, MailSession, MessageRef, OutgoingReply, RawMessage};
use super::MailTransport;
use crate::config::MailConfig;
use crate::error::{AuthError, TransportError};
use crate::pipeline::types::SendOutcome;

const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

pub struct GmailTransport {
    tokens: Arc<dyn TokenSource>,
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    email_address: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

impl GmailTransport {
    pub fn new(config: &MailConfig) -> Self {
        Self::with_token_source(Arc::new(OAuthManager::new(
            &config.credentials_path,
            &config.token_path,
        )))
    }

    pub fn with_token_source(tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            tokens,
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/users/me/{path}", self.base_url)
    }

    async fn read_json<T: DeserializeOwned>(
        operation: &str,
        response: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<T, TransportError> {
        let response = response.map_err(|e| TransportError::RequestFailed {
            operation: operation.into(),
            reason: e.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                operation: operation.into(),
                status: status.as_u16(),
                body: clip(&body, 500),
            });
        }
        response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse {
                operation: operation.into(),
                reason: e.to_string(),
            })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        session: &MailSession,
        operation: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, TransportError> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(session.access_token.expose_secret())
            .query(query)
            .send()
            .await;
        Self::read_json(operation, response).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        session: &MailSession,
        operation: &str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, TransportError> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(session.access_token.expose_secret())
            .json(body)
            .send()
            .await;
        Self::read_json(operation, response).await
    }

    async fn try_send(
        &self,
        session: &MailSession,
        reply: &OutgoingReply,
    ) -> Result<String, TransportError> {
        let original: RawMessage = self
            .get_json(
                session,
                "messages.get(metadata)",
                &format!("messages/{}", reply.original_message_id),
                &[("format", "metadata"), ("metadataHeaders", "Message-ID")],
            )
            .await?;
        let message_id_header = original
            .payload
            .as_ref()
            .and_then(|p| p.header("Message-ID"))
            .map(str::to_string);

        let raw = build_reply_message(&session.account, reply, message_id_header.as_deref())?;
        let mut body = json!({ "raw": encode_raw(&raw) });
        if let Some(thread_id) = original.thread_id {
            body["threadId"] = json!(thread_id);
        }

        let sent: SentMessage = self
            .post_json(session, "messages.send", "messages/send", &body)
            .await?;
        Ok(sent.id)
    }
}

#[async_trait]
impl MailTransport for GmailTransport {
    async fn authenticate(&self) -> Result<MailSession, AuthError> {
        let access_token = self.tokens.access_token().await?;
        let provisional = MailSession {
            access_token,
            account: String::new(),
        };
        let profile: Profile = self
            .get_json(&provisional, "users.getProfile", "profile", &[])
            .await
            .map_err(|e| AuthError::Profile(e.to_string()))?;
        info!(account = %profile.email_address, "Mailbox authenticated");
        Ok(MailSession {
            account: profile.email_address,
            ..provisional
        })
    }

    async fn list_unread(
        &self,
        session: &MailSession,
        range: DayRange,
        max_results: u32,
    ) -> Result<Vec<MessageRef>, TransportError> {
        let query = range.unread_query();
        let max = max_results.to_string();
        let listed: ListResponse = self
            .get_json(
                session,
                "messages.list",
                "messages",
                &[("q", query.as_str()), ("maxResults", max.as_str()), ("labelIds", "INBOX")],
            )
            .await?;
        debug!(query = %query, count = listed.messages.len(), "Listed unread messages");
        Ok(listed.messages)
    }

    async fn fetch_full(
        &self,
        session: &MailSession,
        message: &MessageRef,
    ) -> Result<RawMessage, TransportError> {
        self.get_json(
            session,
            "messages.get",
            &format!("messages/{}", message.id),
            &[("format", "full")],
        )
        .await
    }

    async fn mark_read(
        &self,
        session: &MailSession,
        message_id: &str,
    ) -> Result<(), TransportError> {
        let _: serde_json::Value = self
            .post_json(
                session,
                "messages.modify",
                &format!("messages/{message_id}/modify"),
                &json!({ "removeLabelIds": ["UNREAD"] }),
            )
            .await?;
        Ok(())
    }

    async fn send_reply(&self, session: &MailSession, reply: &OutgoingReply) -> SendOutcome {
        match self.try_send(session, reply).await {
            Ok(id) => {
                info!(original = %reply.original_message_id, sent = %id, "Reply sent");
                SendOutcome::sent(format!("Reply sent successfully (id {id})"))
            }
            Err(e) => {
                warn!(original = %reply.original_message_id, error = %e, "Reply failed");
                SendOutcome::failed(e.to_string())
            }
        }
    }
}

/// Shorten an error body for logs and error messages.
fn clip(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE;
    use secrecy::SecretString;
    use serde_json::Value;

    use super::*;

    struct StaticToken;

    #[async_trait]
    impl TokenSource for StaticToken {
        async fn access_token(&self) -> Result<SecretString, AuthError> {
            Ok(SecretString::from("test-token"))
        }
    }

    #[derive(Default)]
    struct Recorded {
        list_query: Mutex<Vec<(String, String)>>,
        modified: Mutex<Vec<(String, Value)>>,
        sent: Mutex<Vec<Value>>,
    }

    async fn serve(recorded: Arc<Recorded>) -> String {
        let app = Router::new()
            .route(
                "/users/me/profile",
                get(|| async { Json(json!({"emailAddress": "me@example.com"})) }),
            )
            .route(
                "/users/me/messages",
                get(
                    |State(rec): State<Arc<Recorded>>,
                     Query(q): Query<Vec<(String, String)>>| async move {
                        *rec.list_query.lock().unwrap() = q;
                        Json(json!({"messages": [{"id": "a", "threadId": "t"}, {"id": "b"}]}))
                    },
                ),
            )
            .route(
                "/users/me/messages/send",
                post(|State(rec): State<Arc<Recorded>>, Json(body): Json<Value>| async move {
                    rec.sent.lock().unwrap().push(body);
                    Json(json!({"id": "sent-1"}))
                }),
            )
            .route(
                "/users/me/messages/{id}",
                get(|Path(id): Path<String>| async move {
                    if id == "missing" {
                        return (StatusCode::NOT_FOUND, Json(json!({"error": "not found"})));
                    }
                    (
                        StatusCode::OK,
                        Json(json!({
                            "id": id,
                            "threadId": "thread-9",
                            "payload": {
                                "mimeType": "text/plain",
                                "headers": [{"name": "Message-Id", "value": "<orig@mail.example.com>"}],
                                "body": {"data": "aGk"}
                            }
                        })),
                    )
                }),
            )
            .route(
                "/users/me/messages/{id}/modify",
                post(
                    |State(rec): State<Arc<Recorded>>,
                     Path(id): Path<String>,
                     Json(body): Json<Value>| async move {
                        rec.modified.lock().unwrap().push((id.clone(), body));
                        Json(json!({"id": id}))
                    },
                ),
            )
            .with_state(recorded);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn transport() -> (GmailTransport, MailSession, Arc<Recorded>) {
        let recorded = Arc::new(Recorded::default());
        let base = serve(recorded.clone()).await;
        let transport = GmailTransport::with_token_source(Arc::new(StaticToken)).with_base_url(base);
        let session = transport.authenticate().await.unwrap();
        (transport, session, recorded)
    }

    #[tokio::test]
    async fn authenticate_resolves_account() {
        let (_, session, _) = transport().await;
        assert_eq!(session.account, "me@example.com");
        assert_eq!(session.access_token.expose_secret(), "test-token");
    }

    #[tokio::test]
    async fn list_scopes_query_to_inbox_and_day() {
        let (transport, session, recorded) = transport().await;
        let range = DayRange::for_date(chrono::NaiveDate::from_ymd_opt(2026, 3, 9).unwrap());
        let refs = transport.list_unread(&session, range, 5).await.unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].thread_id.as_deref(), Some("t"));

        let query = recorded.list_query.lock().unwrap().clone();
        assert!(query.contains(&("q".into(), "is:unread after:2026/03/09 before:2026/03/10".into())));
        assert!(query.contains(&("maxResults".into(), "5".into())));
        assert!(query.contains(&("labelIds".into(), "INBOX".into())));
    }

    #[tokio::test]
    async fn fetch_and_status_errors() {
        let (transport, session, _) = transport().await;
        let raw = transport.fetch_full(&session, &MessageRef::new("abc")).await.unwrap();
        assert_eq!(raw.id, "abc");

        let err = transport
            .fetch_full(&session, &MessageRef::new("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn mark_read_removes_unread_label() {
        let (transport, session, recorded) = transport().await;
        transport.mark_read(&session, "abc").await.unwrap();
        let modified = recorded.modified.lock().unwrap().clone();
        assert_eq!(modified[0].0, "abc");
        assert_eq!(modified[0].1, json!({"removeLabelIds": ["UNREAD"]}));
    }

    #[tokio::test]
    async fn send_reply_threads_onto_original() {
        let (transport, session, recorded) = transport().await;
        let outcome = transport
            .send_reply(
                &session,
                &OutgoingReply {
                    original_message_id: "abc".into(),
                    to_email: "Alice <alice@example.com>".into(),
                    subject: "Quarterly update".into(),
                    body: "Thanks!".into(),
                },
            )
            .await;
        assert!(outcome.success, "{}", outcome.detail);

        let sent = recorded.sent.lock().unwrap().clone();
        assert_eq!(sent[0]["threadId"], "thread-9");
        let raw = URL_SAFE.decode(sent[0]["raw"].as_str().unwrap()).unwrap();
        let text = String::from_utf8(raw).unwrap();
        assert!(text.contains("Subject: Re: Quarterly update"));
        assert!(text.contains("In-Reply-To: <orig@mail.example.com>"));
        assert!(text.contains("From: me@example.com"));
    }

    #[tokio::test]
    async fn send_failure_is_reported_not_raised() {
        let (transport, session, recorded) = transport().await;
        let outcome = transport
            .send_reply(
                &session,
                &OutgoingReply {
                    original_message_id: "missing".into(),
                    to_email: "alice@example.com".into(),
                    subject: "x".into(),
                    body: "y".into(),
                },
            )
            .await;
        assert!(!outcome.success);
        assert!(outcome.detail.contains("404"));
        assert!(recorded.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn clip_long_bodies() {
        assert_eq!(clip("short", 10), "short");
        assert_eq!(clip("abcdef", 3), "abc…");
    }
}
