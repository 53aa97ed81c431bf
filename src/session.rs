//! Per-session document buffer and chat history.
//!
//! Each session owns at most one document. Loading a new document replaces
//! the old one wholesale and starts a fresh conversation.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::SessionError;
use crate::llm::{ChatMessage, DocumentClient};

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSession {
    pub id: Uuid,
    pub document_name: Option<String>,
    #[serde(skip)]
    pub document: Option<String>,
    pub history: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
}

impl DocumentSession {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            document_name: None,
            document: None,
            history: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Only plain text is accepted: `.txt` in any case, or no extension at all.
fn check_file_name(name: &str) -> Result<(), SessionError> {
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        None => Ok(()),
        Some(ext) if ext.eq_ignore_ascii_case("txt") => Ok(()),
        Some(_) => Err(SessionError::UnsupportedFile(name.to_string())),
    }
}

pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, DocumentSession>>,
    client: DocumentClient,
}

impl SessionStore {
    pub fn new(client: DocumentClient) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            client,
        }
    }

    pub async fn create(&self) -> Uuid {
        let session = DocumentSession::new();
        let id = session.id;
        self.sessions.write().await.insert(id, session);
        debug!(session = %id, "Session created");
        id
    }

    pub async fn get(&self, id: Uuid) -> Option<DocumentSession> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Drop a session and its document. Returns false for unknown ids.
    pub async fn remove(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&id).is_some();
        if removed {
            debug!(session = %id, "Session removed");
        }
        removed
    }

    /// Replace the session's document and clear its chat history.
    pub async fn load_document(
        &self,
        id: Uuid,
        name: &str,
        text: String,
    ) -> Result<(), SessionError> {
        check_file_name(name)?;
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        info!(session = %id, name, chars = text.chars().count(), "Document loaded");
        session.document_name = Some(name.to_string());
        session.document = Some(text);
        session.history.clear();
        Ok(())
    }

    fn document_of(
        sessions: &HashMap<Uuid, DocumentSession>,
        id: Uuid,
    ) -> Result<&DocumentSession, SessionError> {
        let session = sessions
            .get(&id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        if session.document.as_deref().is_none_or(str::is_empty) {
            return Err(SessionError::NoDocument);
        }
        Ok(session)
    }

    /// Detailed summary of the loaded document. Restarts the conversation.
    pub async fn summarize_document(&self, id: Uuid) -> Result<String, SessionError> {
        let document = {
            let mut sessions = self.sessions.write().await;
            let document = Self::document_of(&sessions, id)?.document.clone().unwrap_or_default();
            if let Some(session) = sessions.get_mut(&id) {
                session.history.clear();
            }
            document
        };
        Ok(self.client.summarize(&document).await?)
    }

    /// Answer from the loaded document. The turn is recorded only on success.
    pub async fn chat(&self, id: Uuid, question: &str) -> Result<String, SessionError> {
        let (document, history) = {
            let sessions = self.sessions.read().await;
            let session = Self::document_of(&sessions, id)?;
            (
                session.document.clone().unwrap_or_default(),
                session.history.clone(),
            )
        };

        let answer = self.client.chat(&document, &history, question).await?;

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&id) {
            // A document swapped in mid-call starts a new conversation.
            if session.document.as_deref() == Some(document.as_str()) {
                session.history.push(ChatMessage::user(question));
                session.history.push(ChatMessage::assistant(answer.clone()));
            }
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::error::LlmError;
    use crate::llm::{CompletionRequest, CompletionResponse, LlmProvider};

    /// Answers with the number of messages it was given.
    struct CountingLlm {
        seen: Mutex<Vec<usize>>,
        fail: bool,
    }

    #[async_trait]
    impl LlmProvider for CountingLlm {
        fn name(&self) -> &str {
            "counting"
        }
        fn model_name(&self) -> &str {
            "counting"
        }
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            if self.fail {
                return Err(LlmError::RequestFailed {
                    provider: "counting".into(),
                    reason: "down".into(),
                });
            }
            let n = request.messages.len();
            self.seen.lock().unwrap().push(n);
            Ok(CompletionResponse {
                content: format!("saw {n}"),
                input_tokens: 0,
                output_tokens: 0,
            })
        }
    }

    fn store(fail: bool) -> (SessionStore, Arc<CountingLlm>) {
        let llm = Arc::new(CountingLlm {
            seen: Mutex::new(Vec::new()),
            fail,
        });
        (SessionStore::new(DocumentClient::new(llm.clone())), llm)
    }

    #[test]
    fn file_name_rules() {
        assert!(check_file_name("notes.txt").is_ok());
        assert!(check_file_name("NOTES.TXT").is_ok());
        assert!(check_file_name("README").is_ok());
        assert!(matches!(
            check_file_name("report.pdf"),
            Err(SessionError::UnsupportedFile(name)) if name == "report.pdf"
        ));
    }

    #[tokio::test]
    async fn unknown_session() {
        let (store, _) = store(false);
        let err = store.chat(Uuid::new_v4(), "hi").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn chat_without_document() {
        let (store, _) = store(false);
        let id = store.create().await;
        assert!(matches!(store.chat(id, "hi").await, Err(SessionError::NoDocument)));
        assert!(matches!(
            store.summarize_document(id).await,
            Err(SessionError::NoDocument)
        ));
    }

    #[tokio::test]
    async fn chat_history_grows_and_feeds_later_turns() {
        let (store, llm) = store(false);
        let id = store.create().await;
        store
            .load_document(id, "plan.txt", "Launch is in May.".into())
            .await
            .unwrap();

        store.chat(id, "When is launch?").await.unwrap();
        store.chat(id, "Which year?").await.unwrap();

        // system + question, then system + 2 history + question.
        assert_eq!(*llm.seen.lock().unwrap(), vec![2, 4]);
        assert_eq!(store.get(id).await.unwrap().history.len(), 4);
    }

    #[tokio::test]
    async fn loading_new_document_resets_history() {
        let (store, _) = store(false);
        let id = store.create().await;
        store.load_document(id, "a.txt", "A".into()).await.unwrap();
        store.chat(id, "q").await.unwrap();

        store.load_document(id, "b.txt", "B".into()).await.unwrap();
        let session = store.get(id).await.unwrap();
        assert!(session.history.is_empty());
        assert_eq!(session.document.as_deref(), Some("B"));
        assert_eq!(session.document_name.as_deref(), Some("b.txt"));
    }

    #[tokio::test]
    async fn failed_chat_does_not_record_turn() {
        let (store, _) = store(true);
        let id = store.create().await;
        store.load_document(id, "a.txt", "A".into()).await.unwrap();
        let err = store.chat(id, "q").await.unwrap_err();
        assert!(matches!(err, SessionError::Llm(_)));
        assert!(store.get(id).await.unwrap().history.is_empty());
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let (store, _) = store(false);
        let a = store.create().await;
        let b = store.create().await;
        store.load_document(a, "a.txt", "A".into()).await.unwrap();
        assert!(matches!(store.chat(b, "q").await, Err(SessionError::NoDocument)));
        assert!(store.remove(a).await);
        assert!(store.get(a).await.is_none());
    }

    #[tokio::test]
    async fn summarize_returns_text() {
        let (store, _) = store(false);
        let id = store.create().await;
        store.load_document(id, "a.txt", "Body".into()).await.unwrap();
        assert_eq!(store.summarize_document(id).await.unwrap(), "saw 2");
    }
}
