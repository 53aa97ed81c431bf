//! Batch orchestrator. Authenticates, lists today's unread mail, then runs
//! each message through fetch → mark-read → decode → summarize → draft.
//!
//! Only authentication and listing abort a batch. Any per-message failure is
//! logged, reported as an `Error` event and the loop moves on. A message
//! whose summary or draft alone failed still yields a digest with the
//! surviving half.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::MarkReadPolicy;
use crate::decoder;
use crate::error::{Error, LlmError, PipelineError};
use crate::llm::{ReplyDraftClient, SummarizationClient};
use crate::mail::{DayRange, MailSession, MailTransport, MessageRef, OutgoingReply};
use crate::pipeline::types::{
    BatchReport, BatchState, EmailDigest, PipelineEvent, ReplyDraft, SendOutcome, SummaryResult,
};

/// Broadcast buffer for pipeline events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long one event may wait on a full per-request sink.
const SINK_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Holds the single-flight slot. Released on drop, even if the batch panics.
#[derive(Debug)]
pub struct BatchPermit {
    flag: Arc<AtomicBool>,
}

impl Drop for BatchPermit {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Per-request event stream. A consumer that stops reading is detached so
/// it cannot stall the batch, and with it the broadcast feed.
struct EventSink {
    tx: Option<mpsc::Sender<PipelineEvent>>,
    detached: AtomicBool,
}

impl EventSink {
    fn new(tx: Option<mpsc::Sender<PipelineEvent>>) -> Self {
        Self {
            tx,
            detached: AtomicBool::new(false),
        }
    }

    async fn deliver(&self, event: PipelineEvent) {
        let Some(tx) = &self.tx else { return };
        if self.detached.load(Ordering::Relaxed) {
            return;
        }
        match tokio::time::timeout(SINK_SEND_TIMEOUT, tx.send(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                debug!("Event sink closed, continuing batch");
                self.detached.store(true, Ordering::Relaxed);
            }
            Err(_) => {
                warn!(
                    timeout_secs = SINK_SEND_TIMEOUT.as_secs(),
                    "Event sink stalled, detaching it"
                );
                self.detached.store(true, Ordering::Relaxed);
            }
        }
    }
}

pub struct Orchestrator {
    transport: Arc<dyn MailTransport>,
    summarizer: SummarizationClient,
    drafter: ReplyDraftClient,
    max_results: u32,
    mark_read: MarkReadPolicy,
    in_flight: Arc<AtomicBool>,
    state_tx: watch::Sender<BatchState>,
    events_tx: broadcast::Sender<PipelineEvent>,
}

impl Orchestrator {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        summarizer: SummarizationClient,
        drafter: ReplyDraftClient,
        max_results: u32,
        mark_read: MarkReadPolicy,
    ) -> Self {
        let (state_tx, _) = watch::channel(BatchState::Idle);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            summarizer,
            drafter,
            max_results,
            mark_read,
            in_flight: Arc::new(AtomicBool::new(false)),
            state_tx,
            events_tx,
        }
    }

    /// Claim the single-flight slot. A second caller is rejected, not queued.
    pub fn begin(&self) -> Result<BatchPermit, PipelineError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| PipelineError::AlreadyRunning)?;
        Ok(BatchPermit {
            flag: Arc::clone(&self.in_flight),
        })
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> BatchState {
        self.state_tx.borrow().clone()
    }

    /// Every event of every batch, for long-lived listeners.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events_tx.subscribe()
    }

    /// Claim the slot and run a batch to completion.
    pub async fn trigger(&self) -> Result<BatchReport, PipelineError> {
        let permit = self.begin()?;
        self.run(permit, None).await
    }

    async fn emit(&self, sink: &EventSink, event: PipelineEvent) {
        debug!(event = event.label(), "Pipeline event");
        // No subscribers is fine.
        let _ = self.events_tx.send(event.clone());
        sink.deliver(event).await;
    }

    fn set_state(&self, state: BatchState) {
        self.state_tx.send_replace(state);
    }

    async fn fail(
        &self,
        sink: &EventSink,
        message: &str,
        err: PipelineError,
    ) -> Result<BatchReport, PipelineError> {
        error!(error = %err, "{message}");
        self.set_state(BatchState::Failed {
            reason: err.to_string(),
        });
        self.emit(sink, PipelineEvent::error(message)).await;
        self.emit(
            sink,
            PipelineEvent::Completed {
                success: false,
                message: err.to_string(),
            },
        )
        .await;
        Err(err)
    }

    /// Run one batch. `sink` receives the same events as broadcast
    /// subscribers, for a caller streaming this batch. A sink left full for
    /// longer than `SINK_SEND_TIMEOUT` stops receiving events.
    pub async fn run(
        &self,
        permit: BatchPermit,
        sink: Option<mpsc::Sender<PipelineEvent>>,
    ) -> Result<BatchReport, PipelineError> {
        // Locals drop in reverse order: the slot frees before the sink closes.
        let sink = EventSink::new(sink);
        let _permit = permit;
        let sink = &sink;

        self.set_state(BatchState::Authenticating);
        self.emit(sink, PipelineEvent::status("Authenticating with Gmail..."))
            .await;
        let session = match self.transport.authenticate().await {
            Ok(session) => session,
            Err(e) => {
                return self
                    .fail(sink, "Failed to authenticate with Gmail.", e.into())
                    .await;
            }
        };

        self.set_state(BatchState::Listing);
        self.emit(sink, PipelineEvent::status("Fetching unread emails..."))
            .await;
        let refs = match self
            .transport
            .list_unread(&session, DayRange::today(), self.max_results)
            .await
        {
            Ok(refs) => refs,
            Err(e) => {
                return self
                    .fail(sink, "Failed to list unread emails.", PipelineError::Listing(e))
                    .await;
            }
        };

        let total = refs.len();
        let mut report = BatchReport {
            total,
            ..BatchReport::default()
        };

        if total == 0 {
            info!("No unread emails today");
            self.set_state(BatchState::Completed {
                processed: 0,
                total: 0,
            });
            self.emit(sink, PipelineEvent::status("No new emails found."))
                .await;
            self.emit(
                sink,
                PipelineEvent::Completed {
                    success: true,
                    message: "No new emails.".into(),
                },
            )
            .await;
            return Ok(report);
        }

        info!(total, "Processing unread emails");
        self.emit(sink, PipelineEvent::status(format!("Processing {total} emails...")))
            .await;

        for (index, message) in refs.iter().enumerate() {
            let current = index + 1;
            self.set_state(BatchState::Processing { current, total });
            self.emit(
                sink,
                PipelineEvent::status(format!("Processing email {current}/{total}...")),
            )
            .await;

            match self.process_one(&session, message).await {
                Ok(digest) => {
                    info!(message_id = %message.id, current, total, "Processed email");
                    report.processed += 1;
                    if !digest.is_complete() {
                        report.partial += 1;
                    }
                    let failures = digest.errors.clone();
                    report.digests.push(digest.clone());
                    self.emit(sink, PipelineEvent::EmailSummary { data: digest })
                        .await;
                    for failure in failures {
                        self.emit(
                            sink,
                            PipelineEvent::error(format!(
                                "Error processing email {current}: {failure}"
                            )),
                        )
                        .await;
                    }
                }
                Err(e) => {
                    warn!(message_id = %message.id, current, total, error = %e, "Skipping email");
                    report.failed += 1;
                    self.emit(
                        sink,
                        PipelineEvent::error(format!("Error processing email {current}: {e}")),
                    )
                    .await;
                }
            }

            self.emit(sink, PipelineEvent::Progress { current, total })
                .await;
        }

        self.set_state(BatchState::Completed {
            processed: report.processed,
            total,
        });
        self.emit(
            sink,
            PipelineEvent::status(format!(
                "Completed processing {}/{total} emails.",
                report.processed
            )),
        )
        .await;
        self.emit(
            sink,
            PipelineEvent::Completed {
                success: true,
                message: "Email fetch complete.".into(),
            },
        )
        .await;
        Ok(report)
    }

    async fn process_one(
        &self,
        session: &MailSession,
        message: &MessageRef,
    ) -> Result<EmailDigest, Error> {
        let raw = self.transport.fetch_full(session, message).await?;
        if self.mark_read == MarkReadPolicy::AfterFetch {
            self.transport.mark_read(session, &message.id).await?;
        }

        let parsed = decoder::decode(&raw)?;
        let content = parsed.prompt_content();

        let summary = self
            .summarizer
            .generate(&content, SummarizationClient::DEFAULT_MAX_OUTPUT_TOKENS)
            .await;
        let draft = self
            .drafter
            .generate(&content, ReplyDraftClient::DEFAULT_MAX_OUTPUT_TOKENS)
            .await;

        let (summary, draft) = match (summary, draft) {
            (Err(summary_err), Err(draft_err)) => {
                debug!(message_id = %message.id, error = %draft_err, "Reply draft failed too");
                return Err(summary_err.into());
            }
            pair => pair,
        };

        if self.mark_read == MarkReadPolicy::AfterSummary && summary.is_ok() && draft.is_ok() {
            if let Err(e) = self.transport.mark_read(session, &message.id).await {
                warn!(message_id = %message.id, error = %e, "Failed to mark email read");
            }
        }

        let mut errors = Vec::new();
        let summary = match summary {
            Ok(summary_text) => Some(SummaryResult {
                message_id: parsed.message_id.clone(),
                sender: parsed.sender.clone(),
                subject: parsed.subject.clone(),
                summary_text,
            }),
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Summary failed, keeping draft");
                errors.push(format!("summary failed: {e}"));
                None
            }
        };
        let draft = match draft {
            Ok(draft_text) => Some(ReplyDraft {
                message_id: parsed.message_id,
                to_email: parsed.sender,
                subject: parsed.subject,
                draft_text,
            }),
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Reply draft failed, keeping summary");
                errors.push(format!("reply draft failed: {e}"));
                None
            }
        };

        Ok(EmailDigest {
            summary,
            draft,
            errors,
        })
    }

    /// Send a (possibly edited) reply. Never fails; problems land in the outcome.
    pub async fn send_reply(&self, reply: OutgoingReply) -> SendOutcome {
        let session = match self.transport.authenticate().await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Cannot send reply without a mailbox session");
                return SendOutcome::failed(format!("Failed to authenticate with Gmail: {e}"));
            }
        };
        self.transport.send_reply(&session, &reply).await
    }

    /// Draft a reply for arbitrary content supplied by the caller.
    pub async fn generate_reply(&self, email_content: &str) -> Result<String, LlmError> {
        self.drafter
            .generate(email_content, ReplyDraftClient::DEFAULT_MAX_OUTPUT_TOKENS)
            .await
    }
}
