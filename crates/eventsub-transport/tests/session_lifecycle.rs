use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use eventsub_transport::{
    error::{TransportError, TransportResult},
    helix::{EventSubApi, OutgoingChatMessage},
    reconnect::FixedBackoff,
    websocket::{
        Event, Session, SessionConfig, SessionHandle, SessionState, SessionStream, Subscription,
        SubscriptionRegistry,
    },
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::{net::TcpListener, time::timeout};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// What one accepted connection does.
#[derive(Clone)]
enum Script {
    /// Send the frames, then keep the connection open until the client leaves.
    Hold(Vec<String>),
    /// Send the frames, then close from the server side.
    Close(Vec<String>),
    /// Send a reconnect frame pointing back at this server, then hold.
    RedirectToSelf,
}

struct TestServer {
    url: String,
    accepted: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
    /// Connections on which the client sent a Close frame.
    close_frames: Arc<AtomicUsize>,
}

/// Connection `n` runs `scripts[n]`, or the last script once they run out.
async fn start_server(scripts: Vec<Script>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let accepted = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    let close_frames = Arc::new(AtomicUsize::new(0));

    let accepted_clone = Arc::clone(&accepted);
    let finished_clone = Arc::clone(&finished);
    let close_frames_clone = Arc::clone(&close_frames);
    let self_url = url.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let index = accepted_clone.fetch_add(1, Ordering::SeqCst);
            let script = scripts[index.min(scripts.len() - 1)].clone();
            let finished = Arc::clone(&finished_clone);
            let close_frames = Arc::clone(&close_frames_clone);
            let self_url = self_url.clone();

            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                let (frames, close) = match script {
                    Script::Hold(frames) => (frames, false),
                    Script::Close(frames) => (frames, true),
                    Script::RedirectToSelf => (vec![reconnect("sess-r", &self_url)], false),
                };
                for frame in frames {
                    if ws.send(Message::text(frame)).await.is_err() {
                        return;
                    }
                }
                if close {
                    let _ = ws.close(None).await;
                }
                while let Some(Ok(message)) = ws.next().await {
                    if message.is_close() {
                        close_frames.fetch_add(1, Ordering::SeqCst);
                    }
                }
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }
    });

    TestServer {
        url,
        accepted,
        finished,
        close_frames,
    }
}

fn welcome(session_id: &str, keepalive: u64) -> String {
    json!({
        "metadata": {"message_id": "m", "message_type": "session_welcome"},
        "payload": {"session": {
            "id": session_id,
            "status": "connected",
            "keepalive_timeout_seconds": keepalive,
            "reconnect_url": null,
        }},
    })
    .to_string()
}

fn reconnect(session_id: &str, url: &str) -> String {
    json!({
        "metadata": {"message_type": "session_reconnect"},
        "payload": {"session": {
            "id": session_id,
            "status": "reconnecting",
            "keepalive_timeout_seconds": null,
            "reconnect_url": url,
        }},
    })
    .to_string()
}

fn chat(text: &str) -> String {
    json!({
        "metadata": {"message_type": "notification"},
        "payload": {
            "subscription": {
                "id": "sub-1",
                "type": "channel.chat.message",
                "version": "1",
                "condition": {"broadcaster_user_id": "100", "user_id": "200"},
            },
            "event": {"message": {"text": text}},
        },
    })
    .to_string()
}

fn keepalive() -> String {
    json!({
        "metadata": {"message_type": "session_keepalive"},
        "payload": {},
    })
    .to_string()
}

fn revocation() -> String {
    json!({
        "metadata": {"message_type": "revocation"},
        "payload": {"subscription": {
            "id": "sub-1",
            "type": "channel.chat.message",
            "version": "1",
            "status": "authorization_revoked",
            "condition": {"broadcaster_user_id": "100", "user_id": "200"},
        }},
    })
    .to_string()
}

#[derive(Debug, Default)]
struct RecordingApi {
    submissions: Mutex<Vec<String>>,
    unauthorized: bool,
}

impl RecordingApi {
    fn submissions(&self) -> Vec<String> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSubApi for RecordingApi {
    async fn lookup_user_id(&self, _login: &str) -> TransportResult<String> {
        Ok("200".into())
    }

    async fn lookup_user_ids(&self, _logins: &[String]) -> TransportResult<HashMap<String, String>> {
        Ok(HashMap::new())
    }

    async fn create_subscription(
        &self,
        session_id: &str,
        _subscription: &Subscription,
    ) -> TransportResult<()> {
        if self.unauthorized {
            return Err(TransportError::unauthorized("token revoked"));
        }
        self.submissions.lock().unwrap().push(session_id.to_string());
        Ok(())
    }

    async fn send_chat_message(&self, _message: &OutgoingChatMessage) -> TransportResult<()> {
        Ok(())
    }
}

fn registry() -> SubscriptionRegistry {
    SubscriptionRegistry::for_chat_channels(["100"], "200")
}

fn start(url: &str, api: Arc<RecordingApi>) -> (SessionHandle, SessionStream) {
    let config = SessionConfig::new(url).welcome_timeout(Duration::from_millis(300));
    Session::start(
        config,
        api,
        registry(),
        FixedBackoff::new(Duration::from_millis(20)),
    )
    .unwrap()
}

async fn next_event(events: &mut SessionStream) -> Event {
    timeout(Duration::from_secs(5), events.next())
        .await
        .expect("timed out waiting for event")
        .expect("event stream ended")
}

fn notification_text(event: &Event) -> String {
    match event {
        Event::Notification(notification) => notification.event["message"]["text"]
            .as_str()
            .unwrap()
            .to_string(),
        other => panic!("expected notification, got {other:?}"),
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_welcome_notifications_and_server_reconnect() {
    let second = start_server(vec![Script::Hold(vec![
        welcome("sess-b", 30),
        chat("three"),
    ])])
    .await;
    let first = start_server(vec![Script::Hold(vec![
        welcome("sess-a", 30),
        chat("one"),
        chat("two"),
        reconnect("sess-a", &second.url),
    ])])
    .await;

    let api = Arc::new(RecordingApi::default());
    let (handle, mut events) = start(&first.url, Arc::clone(&api));

    match next_event(&mut events).await {
        Event::Connected {
            epoch, session_id, ..
        } => {
            assert_eq!(epoch.0, 1);
            assert_eq!(session_id, "sess-a");
        }
        other => panic!("expected connected, got {other:?}"),
    }
    assert_eq!(notification_text(&next_event(&mut events).await), "one");
    assert_eq!(notification_text(&next_event(&mut events).await), "two");
    assert!(matches!(
        next_event(&mut events).await,
        Event::Disconnected { .. }
    ));

    match next_event(&mut events).await {
        Event::Connected {
            epoch,
            session_id,
            subscriptions,
        } => {
            assert_eq!(epoch.0, 2);
            assert_eq!(session_id, "sess-b");
            assert_eq!(subscriptions.created, 1);
        }
        other => panic!("expected connected, got {other:?}"),
    }
    assert_eq!(notification_text(&next_event(&mut events).await), "three");

    // One submission per session, against the new session's id.
    assert_eq!(api.submissions(), vec!["sess-a", "sess-b"]);
    // The replaced connection is closed once the new one is up.
    wait_until(|| first.finished.load(Ordering::SeqCst) == 1).await;
    assert_eq!(first.accepted.load(Ordering::SeqCst), 1);

    handle.close().await.unwrap();
    handle.closed().await;
    assert_eq!(handle.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_welcome_timeout_triggers_reconnect() {
    let server = start_server(vec![
        Script::Hold(vec![]),
        Script::Hold(vec![welcome("sess-late", 30)]),
    ])
    .await;

    let api = Arc::new(RecordingApi::default());
    let (handle, mut events) = start(&server.url, Arc::clone(&api));

    match next_event(&mut events).await {
        Event::Disconnected { epoch, reason } => {
            assert_eq!(epoch.0, 0);
            assert!(reason.contains("timed out"), "{reason}");
        }
        other => panic!("expected disconnected, got {other:?}"),
    }
    match next_event(&mut events).await {
        Event::Connected { session_id, .. } => assert_eq!(session_id, "sess-late"),
        other => panic!("expected connected, got {other:?}"),
    }
    assert_eq!(server.accepted.load(Ordering::SeqCst), 2);
    assert_eq!(api.submissions(), vec!["sess-late"]);

    handle.close().await.unwrap();
    handle.closed().await;
}

#[tokio::test]
async fn test_server_close_reconnects_and_resubscribes() {
    let server = start_server(vec![
        Script::Close(vec![welcome("sess-1", 30)]),
        Script::Hold(vec![welcome("sess-2", 30)]),
    ])
    .await;

    let api = Arc::new(RecordingApi::default());
    let (handle, mut events) = start(&server.url, Arc::clone(&api));

    assert!(matches!(
        next_event(&mut events).await,
        Event::Connected { .. }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        Event::Disconnected { .. }
    ));
    match next_event(&mut events).await {
        Event::Connected {
            epoch, session_id, ..
        } => {
            assert_eq!(epoch.0, 2);
            assert_eq!(session_id, "sess-2");
        }
        other => panic!("expected connected, got {other:?}"),
    }
    assert_eq!(api.submissions(), vec!["sess-1", "sess-2"]);

    handle.close().await.unwrap();
    handle.closed().await;
}

#[tokio::test]
async fn test_keepalive_silence_triggers_reconnect() {
    let server = start_server(vec![Script::Hold(vec![welcome("sess-quiet", 0)])]).await;

    let api = Arc::new(RecordingApi::default());
    let config = SessionConfig::new(&server.url).keepalive_grace(Duration::from_millis(100));
    let (handle, mut events) = Session::start(
        config,
        Arc::clone(&api),
        registry(),
        FixedBackoff::new(Duration::from_millis(20)),
    )
    .unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        Event::Connected { .. }
    ));
    match next_event(&mut events).await {
        Event::Disconnected { reason, .. } => assert!(reason.contains("timed out"), "{reason}"),
        other => panic!("expected disconnected, got {other:?}"),
    }
    assert!(matches!(
        next_event(&mut events).await,
        Event::Connected { .. }
    ));
    assert!(server.accepted.load(Ordering::SeqCst) >= 2);

    handle.close().await.unwrap();
    handle.closed().await;
}

#[tokio::test]
async fn test_unauthorized_subscription_is_fatal() {
    let server = start_server(vec![Script::Hold(vec![welcome("sess-x", 30)])]).await;

    let api = Arc::new(RecordingApi {
        unauthorized: true,
        ..Default::default()
    });
    let (handle, mut events) = start(&server.url, api);

    match next_event(&mut events).await {
        Event::Fatal { reason } => assert!(reason.contains("Unauthorized"), "{reason}"),
        other => panic!("expected fatal, got {other:?}"),
    }
    handle.closed().await;
    assert!(events.next().await.is_none());
    assert_eq!(server.accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_close_shuts_down_transport() {
    let server = start_server(vec![Script::Hold(vec![welcome("sess-1", 30)])]).await;

    let api = Arc::new(RecordingApi::default());
    let (handle, mut events) = start(&server.url, api);

    assert!(matches!(
        next_event(&mut events).await,
        Event::Connected { .. }
    ));
    handle.wait_for_state(SessionState::is_active).await;

    handle.close().await.unwrap();
    handle.closed().await;
    assert!(!handle.is_running());
    wait_until(|| server.finished.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn test_interleaved_frames_keep_notification_order() {
    let server = start_server(vec![Script::Hold(vec![
        welcome("sess-1", 30),
        chat("a"),
        keepalive(),
        chat("b"),
        revocation(),
        "not json".to_string(),
        chat("c"),
        json!({"metadata": {"message_type": "mystery"}, "payload": {}}).to_string(),
        chat("d"),
    ])])
    .await;

    let api = Arc::new(RecordingApi::default());
    let (handle, mut events) = start(&server.url, api);

    let mut seen = Vec::new();
    while seen.len() < 6 {
        let label = match next_event(&mut events).await {
            Event::Connected { .. } => "CONNECTED".to_string(),
            Event::Revocation(subscription) => {
                assert_eq!(subscription.kind, "channel.chat.message");
                assert_eq!(subscription.status.as_deref(), Some("authorization_revoked"));
                "REVOKED".to_string()
            }
            event @ Event::Notification(_) => notification_text(&event),
            other => panic!("unexpected event: {other:?}"),
        };
        seen.push(label);
    }
    assert_eq!(seen, vec!["CONNECTED", "a", "b", "REVOKED", "c", "d"]);

    // A revocation leaves the session up.
    assert!(handle.state().is_active());
    assert_eq!(server.accepted.load(Ordering::SeqCst), 1);

    handle.close().await.unwrap();
    handle.closed().await;
}

#[tokio::test]
async fn test_close_while_awaiting_welcome_sends_close_frame() {
    let server = start_server(vec![Script::Hold(vec![])]).await;

    let api = Arc::new(RecordingApi::default());
    let config = SessionConfig::new(&server.url).welcome_timeout(Duration::from_secs(30));
    let (handle, _events) = Session::start(
        config,
        Arc::clone(&api),
        registry(),
        FixedBackoff::new(Duration::from_millis(20)),
    )
    .unwrap();

    handle
        .wait_for_state(|state| *state == SessionState::AwaitingWelcome)
        .await;
    handle.close().await.unwrap();
    handle.closed().await;

    wait_until(|| server.close_frames.load(Ordering::SeqCst) == 1).await;
    assert!(api.submissions().is_empty());
}

#[tokio::test]
async fn test_repeated_redirects_before_welcome_back_off() {
    let server = start_server(vec![Script::RedirectToSelf]).await;

    let api = Arc::new(RecordingApi::default());
    let config = SessionConfig::new(&server.url).welcome_timeout(Duration::from_secs(30));
    let (handle, _events) = Session::start(
        config,
        Arc::clone(&api),
        registry(),
        FixedBackoff::new(Duration::from_millis(200)),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let accepted = server.accepted.load(Ordering::SeqCst);
    // First connection, one free redirect, then one attempt per 200ms.
    assert!((2..=5).contains(&accepted), "accepted {accepted} connections");
    // Each redirected connection is closed with a Close frame.
    assert!(server.close_frames.load(Ordering::SeqCst) >= 1);
    assert!(api.submissions().is_empty());

    handle.close().await.unwrap();
    handle.closed().await;
}
