mod support;

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use support::{MockBackend, Step};
use tokio::sync::mpsc;
use xuanming::client::ApiClient;
use xuanming::session::{ChatSession, SessionOutcome, SessionUpdate, CONNECTIVITY_NOTICE};

fn start_session(
    backend: &MockBackend,
    conversation: Option<&str>,
    text: &str,
) -> (ChatSession, mpsc::Receiver<SessionUpdate>) {
    let client = Arc::new(ApiClient::new(&backend.base_url));
    let (tx, rx) = mpsc::channel(100);
    let session = ChatSession::start(client, conversation.map(str::to_string), text, tx)
        .expect("session should start");
    (session, rx)
}

async fn next_update(rx: &mut mpsc::Receiver<SessionUpdate>) -> SessionUpdate {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for update")
        .expect("update channel closed")
}

async fn collect_until_finished(rx: &mut mpsc::Receiver<SessionUpdate>) -> Vec<SessionUpdate> {
    let mut updates = Vec::new();
    loop {
        let update = next_update(rx).await;
        let finished = matches!(update, SessionUpdate::Finished(_));
        updates.push(update);
        if finished {
            return updates;
        }
    }
}

/// The session must go quiet after `Finished`; anything else would mean the
/// finalize step ran more than once.
async fn assert_quiet(rx: &mut mpsc::Receiver<SessionUpdate>) {
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(rx.try_recv().is_err(), "updates arrived after Finished");
}

#[tokio::test]
async fn completes_and_accumulates_split_frames() {
    let backend = MockBackend::start(vec![
        Step::Chunk(b"data: {\"content\":\"Hel"),
        Step::Chunk(b"lo\"}\n\n"),
        Step::Chunk(b"data: [DONE]\n\n"),
    ])
    .await;

    let (_session, mut rx) = start_session(&backend, Some("c1"), "hello there");
    let updates = collect_until_finished(&mut rx).await;

    assert_eq!(
        updates,
        vec![
            SessionUpdate::Content("Hello".to_string()),
            SessionUpdate::Finished(SessionOutcome::Completed),
        ]
    );
    assert!(backend.saves().is_empty());
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn reassembles_multibyte_characters_split_across_chunks() {
    // 你好 with the chunk boundary inside the first character.
    let backend = MockBackend::start(vec![
        Step::Chunk(b"data: {\"content\":\"\xE4\xBD"),
        Step::Chunk(b"\xA0\xE5\xA5\xBD\"}\n\ndata: [DONE]\n\n"),
    ])
    .await;

    let (_session, mut rx) = start_session(&backend, Some("c1"), "greet me");
    let updates = collect_until_finished(&mut rx).await;

    assert_eq!(
        updates,
        vec![
            SessionUpdate::Content("你好".to_string()),
            SessionUpdate::Finished(SessionOutcome::Completed),
        ]
    );
}

#[tokio::test]
async fn creates_conversation_when_none_is_active() {
    let backend = MockBackend::start(vec![
        Step::Chunk(b"data: {\"content\":\"hi\"}\n\ndata: [DONE]\n\n"),
    ])
    .await;

    let (_session, mut rx) = start_session(&backend, None, "first message");
    let updates = collect_until_finished(&mut rx).await;

    let created = backend.conversations();
    assert_eq!(created.len(), 1);
    assert_eq!(
        updates,
        vec![
            SessionUpdate::ConversationCreated(created[0].clone()),
            SessionUpdate::Content("hi".to_string()),
            SessionUpdate::Finished(SessionOutcome::Completed),
        ]
    );
}

#[tokio::test]
async fn request_body_carries_trimmed_text() {
    let backend = MockBackend::start(vec![Step::Chunk(b"data: [DONE]\n\n")]).await;

    let (_session, mut rx) = start_session(&backend, Some("c1"), "  hello  \n");
    collect_until_finished(&mut rx).await;

    assert_eq!(backend.chat_messages(), vec!["hello".to_string()]);
}

#[tokio::test]
async fn cancel_saves_partial_content_exactly_once() {
    let backend = MockBackend::start(vec![
        Step::Chunk(b"data: {\"content\":\"draft \"}\n\n"),
        Step::Chunk(b"data: {\"content\":\"text\"}\n\n"),
        Step::Delay(30_000),
        Step::Chunk(b"data: [DONE]\n\n"),
    ])
    .await;

    let (session, mut rx) = start_session(&backend, Some("c1"), "tell me more");

    loop {
        match next_update(&mut rx).await {
            SessionUpdate::Content(text) if text == "draft text" => break,
            SessionUpdate::Content(_) => {}
            other => panic!("unexpected update before cancel: {:?}", other),
        }
    }
    session.cancel();

    let updates = collect_until_finished(&mut rx).await;
    assert_eq!(
        updates,
        vec![SessionUpdate::Finished(SessionOutcome::Cancelled)]
    );
    assert_eq!(backend.saves(), vec!["draft text".to_string()]);
    assert_quiet(&mut rx).await;
    assert_eq!(backend.saves().len(), 1);
}

#[tokio::test]
async fn cancel_with_no_content_skips_partial_save() {
    let backend = MockBackend::start(vec![
        Step::Delay(30_000),
        Step::Chunk(b"data: [DONE]\n\n"),
    ])
    .await;

    let (session, mut rx) = start_session(&backend, Some("c1"), "anything");
    tokio::time::sleep(Duration::from_millis(200)).await;
    session.cancel();

    let updates = collect_until_finished(&mut rx).await;
    assert_eq!(
        updates,
        vec![SessionUpdate::Finished(SessionOutcome::Cancelled)]
    );
    assert!(backend.saves().is_empty());
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn transport_failure_replaces_reply_with_notice() {
    let backend = MockBackend::start(vec![
        Step::Chunk(b"data: {\"content\":\"par\"}\n\n"),
        // Give hyper a chance to flush the chunk before the body errors,
        // otherwise the abort can race ahead of the delta.
        Step::Delay(100),
        Step::Fail,
    ])
    .await;

    let (_session, mut rx) = start_session(&backend, Some("c1"), "hello");
    let updates = collect_until_finished(&mut rx).await;

    assert_eq!(
        updates,
        vec![
            SessionUpdate::Content("par".to_string()),
            SessionUpdate::Content(CONNECTIVITY_NOTICE.to_string()),
            SessionUpdate::Finished(SessionOutcome::Failed),
        ]
    );
    // A broken transport leaves no trustworthy partial content.
    assert!(backend.saves().is_empty());
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn backend_error_frame_is_shown_in_place() {
    let backend = MockBackend::start(vec![
        Step::Chunk(b"data: {\"content\":\"ok\"}\n\n"),
        Step::Chunk(b"data: {\"error\":\"service overloaded\"}\n\n"),
        Step::Chunk(b"data: [DONE]\n\n"),
    ])
    .await;

    let (_session, mut rx) = start_session(&backend, Some("c1"), "hello");
    let updates = collect_until_finished(&mut rx).await;

    assert_eq!(
        updates,
        vec![
            SessionUpdate::Content("ok".to_string()),
            SessionUpdate::Content("service overloaded".to_string()),
            SessionUpdate::Finished(SessionOutcome::Completed),
        ]
    );
}

#[tokio::test]
async fn title_update_signals_a_refresh() {
    let backend = MockBackend::start(vec![
        Step::Chunk(b"data: {\"content\":\"hi\",\"title_update\":\"Reading\"}\n\n"),
        Step::Chunk(b"data: [DONE]\n\n"),
    ])
    .await;

    let (_session, mut rx) = start_session(&backend, Some("c1"), "hello");
    let updates = collect_until_finished(&mut rx).await;

    assert_eq!(
        updates,
        vec![
            SessionUpdate::Content("hi".to_string()),
            SessionUpdate::TitleChanged,
            SessionUpdate::Finished(SessionOutcome::Completed),
        ]
    );
}

#[tokio::test]
async fn malformed_frames_are_skipped_without_failing_the_stream() {
    let backend = MockBackend::start(vec![
        Step::Chunk(b"data: not-json\n\n"),
        Step::Chunk(b"data: {\"content\":\"x\"}\n\ndata: [DONE]\n\n"),
    ])
    .await;

    let (_session, mut rx) = start_session(&backend, Some("c1"), "hello");
    let updates = collect_until_finished(&mut rx).await;

    assert_eq!(
        updates,
        vec![
            SessionUpdate::Content("x".to_string()),
            SessionUpdate::Finished(SessionOutcome::Completed),
        ]
    );
}

#[tokio::test]
async fn conversation_crud_round_trip() {
    let backend = MockBackend::start(Vec::new()).await;
    let client = ApiClient::new(&backend.base_url);

    let created = client.create_conversation().await.unwrap();
    assert_eq!(created.title, "New conversation");

    let listed = client.list_conversations().await.unwrap();
    assert_eq!(listed, vec![created.clone()]);

    client.set_title(&created.id, "Morning reading").await.unwrap();
    let listed = client.list_conversations().await.unwrap();
    assert_eq!(listed[0].title, "Morning reading");

    let messages = client.conversation_messages(&created.id).await.unwrap();
    assert_eq!(messages.len(), 2);

    client.delete_conversation(&created.id).await.unwrap();
    assert!(client.list_conversations().await.unwrap().is_empty());
}
