//! Lifecycle of one in-flight chat exchange.
//!
//! A session starts the streaming request, pumps the response body through
//! the line decoder and event parser, pushes updates to the UI over a
//! channel, and finalizes exactly once whatever way the stream ends. The
//! caller keeps at most one session alive at a time through [`SessionSlot`].

use crate::client::ApiClient;
use crate::protocol::{ConversationSummary, StreamEvent};
use crate::sse::{parse_event_line, LineDecoder};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Shown in place of the reply when the request fails for any reason other
/// than the user stopping it.
pub const CONNECTIVITY_NOTICE: &str =
    "Network request failed. Check that the backend service is running.";

/// Updates pushed from the session task to the UI, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// A conversation was created on the fly because none was active.
    ConversationCreated(ConversationSummary),
    /// Full accumulated reply text so far. Always the whole text, so
    /// rendering it is idempotent and never regresses or duplicates.
    Content(String),
    /// The backend renamed the conversation; the list should be re-fetched.
    TitleChanged,
    /// The session is over and will send nothing further.
    Finished(SessionOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Requesting,
    Streaming,
}

/// Handle to an in-flight exchange. Dropping it does not stop the stream;
/// stopping is always an explicit `cancel`.
pub struct ChatSession {
    cancel: CancellationToken,
}

impl ChatSession {
    /// Starts a session. Returns `None` without any side effect when the
    /// text is blank. When `conversation` is `None` a new conversation is
    /// created before the chat request is issued.
    pub fn start(
        client: Arc<ApiClient>,
        conversation: Option<String>,
        text: &str,
        updates: mpsc::Sender<SessionUpdate>,
    ) -> Option<ChatSession> {
        let text = text.trim().to_string();
        if text.is_empty() {
            return None;
        }

        let cancel = CancellationToken::new();
        tokio::spawn(run(client, conversation, text, updates, cancel.clone()));
        Some(ChatSession { cancel })
    }

    /// Requests cancellation. Returns immediately; the read loop observes
    /// the token at its next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Owns the single allowed in-flight session. A second send while one is
/// running is rejected, not queued.
#[derive(Default)]
pub struct SessionSlot {
    active: Option<ChatSession>,
}

impl SessionSlot {
    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    /// Starts a session unless one is already running or the text is blank.
    pub fn begin(
        &mut self,
        client: Arc<ApiClient>,
        conversation: Option<String>,
        text: &str,
        updates: mpsc::Sender<SessionUpdate>,
    ) -> bool {
        if self.active.is_some() {
            return false;
        }
        match ChatSession::start(client, conversation, text, updates) {
            Some(session) => {
                self.active = Some(session);
                true
            }
            None => false,
        }
    }

    /// No-op while idle.
    pub fn cancel(&self) {
        if let Some(session) = &self.active {
            session.cancel();
        }
    }

    /// Clears the busy state; called when the `Finished` update arrives.
    pub fn finish(&mut self) {
        self.active = None;
    }
}

async fn run(
    client: Arc<ApiClient>,
    conversation: Option<String>,
    text: String,
    updates: mpsc::Sender<SessionUpdate>,
    cancel: CancellationToken,
) {
    let mut accumulated = String::new();

    let (conversation_id, outcome) =
        match ensure_conversation(client.as_ref(), conversation, &updates).await {
            Ok(id) => {
                let outcome = stream_chat(
                    client.as_ref(),
                    &id,
                    &text,
                    &updates,
                    &cancel,
                    &mut accumulated,
                )
                .await;
                (Some(id), outcome)
            }
            Err(err) => {
                warn!(error = %err, "failed to create conversation");
                (None, SessionOutcome::Failed)
            }
        };

    // Finalize. This block runs once on every exit path.
    match outcome {
        SessionOutcome::Cancelled => {
            if let Some(id) = conversation_id.filter(|_| !accumulated.is_empty()) {
                debug!(conversation = %id, "saving partial reply after cancellation");
                if let Err(err) = client.save_partial(&id, &accumulated).await {
                    warn!(error = %err, "failed to save partial reply");
                }
            }
        }
        SessionOutcome::Failed => {
            let _ = updates
                .send(SessionUpdate::Content(CONNECTIVITY_NOTICE.to_string()))
                .await;
        }
        SessionOutcome::Completed => {}
    }

    debug!(?outcome, "session finished");
    let _ = updates.send(SessionUpdate::Finished(outcome)).await;
}

async fn ensure_conversation(
    client: &ApiClient,
    conversation: Option<String>,
    updates: &mpsc::Sender<SessionUpdate>,
) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    if let Some(id) = conversation {
        return Ok(id);
    }
    let summary = client.create_conversation().await?;
    let id = summary.id.clone();
    let _ = updates
        .send(SessionUpdate::ConversationCreated(summary))
        .await;
    Ok(id)
}

async fn stream_chat(
    client: &ApiClient,
    conversation_id: &str,
    text: &str,
    updates: &mpsc::Sender<SessionUpdate>,
    cancel: &CancellationToken,
    accumulated: &mut String,
) -> SessionOutcome {
    let response = tokio::select! {
        _ = cancel.cancelled() => return SessionOutcome::Cancelled,
        response = client.open_chat_stream(conversation_id, text) => match response {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "chat request failed");
                return SessionOutcome::Failed;
            }
        },
    };

    pump(Box::pin(response.bytes_stream()), updates, cancel, accumulated).await
}

/// Reads chunks until the stream ends, fails or is cancelled. Dropping the
/// stream on cancellation closes the connection, which is what tells the
/// server to stop generating.
async fn pump<S, E>(
    mut stream: S,
    updates: &mpsc::Sender<SessionUpdate>,
    cancel: &CancellationToken,
    accumulated: &mut String,
) -> SessionOutcome
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let mut decoder = LineDecoder::new();
    let mut phase = Phase::Requesting;

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("cancellation observed by read loop");
                return SessionOutcome::Cancelled;
            }
            chunk = stream.next() => chunk,
        };

        match chunk {
            None => return SessionOutcome::Completed,
            Some(Err(err)) => {
                warn!(error = %err, "chat stream broke mid-response");
                return SessionOutcome::Failed;
            }
            Some(Ok(bytes)) => {
                if phase == Phase::Requesting {
                    phase = Phase::Streaming;
                    debug!("first chunk received");
                }
                for line in decoder.feed(&bytes) {
                    for event in parse_event_line(&line) {
                        apply_event(event, updates, accumulated).await;
                    }
                }
            }
        }
    }
}

async fn apply_event(
    event: StreamEvent,
    updates: &mpsc::Sender<SessionUpdate>,
    accumulated: &mut String,
) {
    match event {
        StreamEvent::ContentDelta(delta) => {
            accumulated.push_str(&delta);
            let _ = updates
                .send(SessionUpdate::Content(accumulated.clone()))
                .await;
        }
        StreamEvent::TitleUpdate => {
            let _ = updates.send(SessionUpdate::TitleChanged).await;
        }
        StreamEvent::ErrorMessage(message) => {
            // The reply shown to the user is replaced wholesale; the
            // accumulation buffer is left alone.
            let _ = updates.send(SessionUpdate::Content(message)).await;
        }
        // End of stream is also observed as natural body completion.
        StreamEvent::Done => {}
    }
}
