//! In-process backend double for integration tests. Serves the same HTTP
//! surface the real service does, with a scripted chat stream so tests can
//! control chunk boundaries, delays and mid-body failures.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use bytes::Bytes;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;
use xuanming::protocol::{
    ChatRequest, ConversationSummary, Role, SavePartialRequest, StoredMessage, TitleRequest,
};

/// One scripted step of the chat response body.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Chunk(&'static [u8]),
    Delay(u64),
    Fail,
}

pub struct MockState {
    script: Vec<Step>,
    saves: Mutex<Vec<String>>,
    conversations: Mutex<Vec<ConversationSummary>>,
    chat_messages: Mutex<Vec<String>>,
}

pub struct MockBackend {
    pub base_url: String,
    state: Arc<MockState>,
}

impl MockBackend {
    pub async fn start(script: Vec<Step>) -> MockBackend {
        let state = Arc::new(MockState {
            script,
            saves: Mutex::new(Vec::new()),
            conversations: Mutex::new(Vec::new()),
            chat_messages: Mutex::new(Vec::new()),
        });

        let router = Router::new()
            .route(
                "/api/conversations",
                post(create_conversation).get(list_conversations),
            )
            .route(
                "/api/conversations/:id",
                axum::routing::delete(delete_conversation),
            )
            .route("/api/conversations/:id/title", put(set_title))
            .route("/api/conversations/:id/messages", get(conversation_messages))
            .route("/api/conversations/:id/chat", post(chat))
            .route("/api/conversations/:id/save-partial", post(save_partial))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        MockBackend {
            base_url: format!("http://{}/api", addr),
            state,
        }
    }

    pub fn saves(&self) -> Vec<String> {
        self.state.saves.lock().unwrap().clone()
    }

    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.state.conversations.lock().unwrap().clone()
    }

    pub fn chat_messages(&self) -> Vec<String> {
        self.state.chat_messages.lock().unwrap().clone()
    }
}

async fn create_conversation(
    State(state): State<Arc<MockState>>,
) -> Json<ConversationSummary> {
    let summary = ConversationSummary {
        id: Uuid::new_v4().to_string(),
        title: "New conversation".to_string(),
    };
    state.conversations.lock().unwrap().push(summary.clone());
    Json(summary)
}

async fn list_conversations(
    State(state): State<Arc<MockState>>,
) -> Json<Vec<ConversationSummary>> {
    Json(state.conversations.lock().unwrap().clone())
}

async fn delete_conversation(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
) -> StatusCode {
    state
        .conversations
        .lock()
        .unwrap()
        .retain(|conv| conv.id != id);
    StatusCode::NO_CONTENT
}

async fn set_title(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    Json(request): Json<TitleRequest>,
) -> StatusCode {
    let mut conversations = state.conversations.lock().unwrap();
    match conversations.iter_mut().find(|conv| conv.id == id) {
        Some(conv) => {
            conv.title = request.title;
            StatusCode::OK
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn conversation_messages(
    State(_state): State<Arc<MockState>>,
    Path(_id): Path<String>,
) -> Json<Vec<StoredMessage>> {
    Json(vec![
        StoredMessage {
            role: Role::User,
            content: "What does my chart say?".to_string(),
        },
        StoredMessage {
            role: Role::Assistant,
            content: "A promising season lies ahead.".to_string(),
        },
    ])
}

async fn chat(
    State(state): State<Arc<MockState>>,
    Path(_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Response {
    state.chat_messages.lock().unwrap().push(request.message);

    let steps = state.script.clone();
    let stream = futures::stream::unfold(steps.into_iter(), |mut steps| async move {
        loop {
            match steps.next() {
                None => return None,
                Some(Step::Delay(ms)) => tokio::time::sleep(Duration::from_millis(ms)).await,
                Some(Step::Chunk(bytes)) => {
                    return Some((Ok::<Bytes, io::Error>(Bytes::from_static(bytes)), steps));
                }
                Some(Step::Fail) => {
                    return Some((
                        Err(io::Error::new(io::ErrorKind::ConnectionAborted, "scripted")),
                        steps,
                    ));
                }
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(stream))
        .unwrap()
}

async fn save_partial(
    State(state): State<Arc<MockState>>,
    Path(_id): Path<String>,
    Json(request): Json<SavePartialRequest>,
) -> StatusCode {
    state.saves.lock().unwrap().push(request.content);
    StatusCode::OK
}
