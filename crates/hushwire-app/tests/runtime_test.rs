//! Integration tests for the runtime loop.
//!
//! The runtime runs on paused tokio time against in-memory drivers:
//! - `MockTransport` hands the server side of every stream to the test
//! - `MockApi` answers REST calls from queued results
//!
//! # Oracle Pattern
//!
//! Tests end with oracle checks on the emitted [`ClientEvent`]s and on what
//! the drivers observed (connections, closes, submitted ciphertexts).

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use hushwire_app::{
    ApiError, ChatApi, ChatRequest, ChatSummary, ClientConfig, ClientEvent, ClientHandle, Command,
    FilePlatform, FileStore, Runtime, RuntimeError, Transport, TransportConnection,
    TransportEvent, UserSummary, WipeReason,
};
use hushwire_core::{
    ChatId, ConnectionError, ConnectionState, DeliveryError, Environment, InboundMessage,
    KeyValueStore, MessageId, MessageType, SendReceipt, SessionCrypto, TrackedConnection, UserId,
    WipeRegistry, storage::TOKEN,
};
use tempfile::TempDir;
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};

const CHAT: ChatId = 42;
const ME: u64 = 1;
const PEER: u64 = 2;
const BASE_CLOCK: u64 = 1_700_000_000;

/// Upper bound on any single wait, in virtual time.
const PATIENCE: Duration = Duration::from_secs(120);

/// Real sleeps (virtual under paused time) and a wall clock that follows them.
#[derive(Clone)]
struct TestEnv {
    start: Instant,
    counter: Arc<AtomicU64>,
}

impl TestEnv {
    fn new() -> Self {
        Self { start: Instant::now(), counter: Arc::default() }
    }
}

impl Environment for TestEnv {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        let n = self.counter.fetch_add(1, Ordering::SeqCst).to_le_bytes();
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = n[i % n.len()] ^ (i as u8).wrapping_mul(31);
        }
    }

    fn wall_clock_secs(&self) -> u64 {
        BASE_CLOCK + self.start.elapsed().as_secs()
    }
}

/// Test side of one accepted stream.
struct ServerSide {
    url: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    closes: Arc<Mutex<Vec<u16>>>,
}

impl ServerSide {
    fn push(&self, event: TransportEvent) {
        self.events.send(event).unwrap();
    }

    fn closes(&self) -> Vec<u16> {
        self.closes.lock().unwrap().clone()
    }
}

#[derive(Clone)]
struct MockTransport {
    accepted: mpsc::UnboundedSender<ServerSide>,
}

struct MockConnection {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    closes: Arc<Mutex<Vec<u16>>>,
}

struct MockCloser {
    closes: Arc<Mutex<Vec<u16>>>,
}

impl TrackedConnection for MockCloser {
    fn force_close(&self, code: u16, _reason: &str) {
        self.closes.lock().unwrap().push(code);
    }
}

impl Transport for MockTransport {
    type Connection = MockConnection;

    fn connect(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<Self::Connection, ConnectionError>> + Send {
        let (tx, rx) = mpsc::unbounded_channel();
        let closes = Arc::new(Mutex::new(Vec::new()));
        let server = ServerSide { url: url.to_string(), events: tx, closes: closes.clone() };
        let accepted = self.accepted.send(server).is_ok();

        async move {
            if accepted {
                Ok(MockConnection { events: rx, closes })
            } else {
                Err(ConnectionError::Transport("test finished".into()))
            }
        }
    }
}

impl TransportConnection for MockConnection {
    fn next_event(&mut self) -> impl Future<Output = Option<TransportEvent>> + Send {
        self.events.recv()
    }

    fn close(&mut self, code: u16, _reason: &str) -> impl Future<Output = ()> + Send {
        self.closes.lock().unwrap().push(code);
        async {}
    }

    fn closer(&self) -> Arc<dyn TrackedConnection> {
        Arc::new(MockCloser { closes: self.closes.clone() })
    }
}

#[derive(Default)]
struct ApiState {
    send_results: VecDeque<Result<SendReceipt, DeliveryError>>,
    sent: Vec<(ChatId, String)>,
    history: HashMap<ChatId, Vec<InboundMessage>>,
    users: Vec<UserSummary>,
    /// Management calls in arrival order
    calls: Vec<String>,
    reject_token: bool,
}

#[derive(Clone, Default)]
struct MockApi {
    state: Arc<Mutex<ApiState>>,
}

impl MockApi {
    fn queue_send(&self, result: Result<SendReceipt, DeliveryError>) {
        self.state.lock().unwrap().send_results.push_back(result);
    }

    fn set_history(&self, chat_id: ChatId, history: Vec<InboundMessage>) {
        self.state.lock().unwrap().history.insert(chat_id, history);
    }

    fn reject_token(&self) {
        self.state.lock().unwrap().reject_token = true;
    }

    fn sent(&self) -> Vec<(ChatId, String)> {
        self.state.lock().unwrap().sent.clone()
    }

    fn set_users(&self, users: Vec<UserSummary>) {
        self.state.lock().unwrap().users = users;
    }

    fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl ChatApi for MockApi {
    fn send_message(
        &self,
        _token: &str,
        chat_id: ChatId,
        ciphertext: &str,
        _message_type: &MessageType,
    ) -> impl Future<Output = Result<SendReceipt, DeliveryError>> + Send {
        let mut state = self.state.lock().unwrap();
        state.sent.push((chat_id, ciphertext.to_string()));
        let result = state.send_results.pop_front().unwrap_or_else(|| {
            Ok(SendReceipt { message_id: 1_000, created_at: "2024-01-01T00:00:00".into() })
        });
        async move { result }
    }

    fn active_chats(
        &self,
        _token: &str,
    ) -> impl Future<Output = Result<Vec<ChatSummary>, ApiError>> + Send {
        let rejected = self.state.lock().unwrap().reject_token;
        async move { if rejected { Err(ApiError::Unauthorized) } else { Ok(Vec::new()) } }
    }

    fn pending_requests(
        &self,
        _token: &str,
    ) -> impl Future<Output = Result<Vec<ChatRequest>, ApiError>> + Send {
        async { Ok(Vec::new()) }
    }

    fn messages(
        &self,
        _token: &str,
        chat_id: ChatId,
    ) -> impl Future<Output = Result<Vec<InboundMessage>, ApiError>> + Send {
        let history = self.state.lock().unwrap().history.get(&chat_id).cloned().unwrap_or_default();
        async move { Ok(history) }
    }

    fn search_users(
        &self,
        _token: &str,
        query: &str,
    ) -> impl Future<Output = Result<Vec<UserSummary>, ApiError>> + Send {
        let users: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .users
            .iter()
            .filter(|u| u.display_name().contains(query))
            .cloned()
            .collect();
        async move { Ok(users) }
    }

    fn send_chat_request(
        &self,
        _token: &str,
        to_user: UserId,
        code: &str,
    ) -> impl Future<Output = Result<u64, ApiError>> + Send {
        self.record(format!("request {to_user} {code}"));
        async { Ok(12) }
    }

    fn accept_chat_request(
        &self,
        _token: &str,
        request_id: u64,
        code: &str,
    ) -> impl Future<Output = Result<ChatId, ApiError>> + Send {
        self.record(format!("accept {request_id} {code}"));
        async { Ok(CHAT) }
    }

    fn verify_chat(
        &self,
        _token: &str,
        chat_id: ChatId,
        code: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send {
        self.record(format!("verify {chat_id} {code}"));
        let result = if code == "0000" {
            Err(ApiError::Refused { status: 400, detail: "Invalid verification code".into() })
        } else {
            Ok(())
        };
        async move { result }
    }

    fn clear_chat(
        &self,
        _token: &str,
        chat_id: ChatId,
    ) -> impl Future<Output = Result<(), ApiError>> + Send {
        self.record(format!("clear {chat_id}"));
        async { Ok(()) }
    }

    fn request_delete_chat(
        &self,
        _token: &str,
        chat_id: ChatId,
    ) -> impl Future<Output = Result<String, ApiError>> + Send {
        self.record(format!("delete {chat_id}"));
        async { Ok("Deletion requested. Waiting for other user.".to_string()) }
    }
}

/// A running runtime plus everything a test pokes at.
struct Harness {
    handle: ClientHandle,
    servers: mpsc::UnboundedReceiver<ServerSide>,
    api: MockApi,
    store: FileStore,
    platform: FilePlatform,
    task: JoinHandle<Result<(), RuntimeError>>,
    _dir: TempDir,
}

impl Harness {
    fn start() -> Self {
        Self::start_with(MockApi::default())
    }

    fn start_with(api: MockApi) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let platform = FilePlatform::new(dir.path());
        let store = platform.store();
        let (accepted, servers) = mpsc::unbounded_channel();

        let (runtime, handle) = Runtime::new(
            ClientConfig::default(),
            TestEnv::new(),
            MockTransport { accepted },
            api.clone(),
            platform.store(),
            platform.clone(),
        );
        let task = tokio::spawn(runtime.run());

        Self { handle, servers, api, store, platform, task, _dir: dir }
    }

    async fn send(&self, command: Command) {
        assert!(self.handle.send(command).await, "runtime stopped");
    }

    async fn login(&self, expires_at: Option<u64>) {
        self.send(Command::Login { token: "tok".into(), user_id: ME, expires_at }).await;
    }

    /// Log in and wait until the stream is open.
    async fn online(&mut self) -> ServerSide {
        self.login(None).await;
        let server = self.next_server().await;
        self.wait_for(is_open).await;
        server
    }

    /// Wait for the next stream the runtime opens.
    async fn next_server(&mut self) -> ServerSide {
        tokio::time::timeout(PATIENCE, self.servers.recv())
            .await
            .expect("no connection attempt")
            .expect("transport dropped")
    }

    /// Skip events until one matches.
    async fn wait_for(&mut self, mut pred: impl FnMut(&ClientEvent) -> bool) -> ClientEvent {
        tokio::time::timeout(PATIENCE, async {
            loop {
                let event = self.handle.next_event().await.expect("runtime stopped");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event never arrived")
    }

    /// Everything emitted during the next `window` of virtual time.
    async fn drain_for(&mut self, window: Duration) -> Vec<ClientEvent> {
        let deadline = Instant::now() + window;
        let mut events = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout_at(deadline, self.handle.next_event()).await
        {
            events.push(event);
        }
        events
    }
}

fn inbound_frame(id: u64, wire: &str) -> String {
    serde_json::json!({
        "type": "message",
        "data": {
            "id": id,
            "chat_id": CHAT,
            "sender_id": PEER,
            "encrypted_content": wire,
            "created_at": "2024-01-01T00:00:00",
        },
    })
    .to_string()
}

fn image_frame(id: u64, data_url: &str) -> String {
    serde_json::json!({
        "type": "message",
        "data": {
            "id": id,
            "chat_id": CHAT,
            "sender_id": PEER,
            "encrypted_content": peer_wire(data_url),
            "message_type": "image",
        },
    })
    .to_string()
}

fn peer_wire(text: &str) -> String {
    SessionCrypto::new(TestEnv::new(), WipeRegistry::new()).encrypt_for_chat(CHAT, text).unwrap()
}

fn log_texts(event: &ClientEvent) -> Vec<String> {
    match event {
        ClientEvent::Log { messages, .. } => messages.iter().map(|m| m.text.clone()).collect(),
        _ => Vec::new(),
    }
}

fn is_open(event: &ClientEvent) -> bool {
    *event == ClientEvent::Connection(ConnectionState::Open)
}

#[tokio::test(start_paused = true)]
async fn login_connects_with_token() {
    let mut h = Harness::start();
    h.wait_for(|e| matches!(e, ClientEvent::Identity { .. })).await;

    h.login(None).await;
    let server = h.next_server().await;
    h.wait_for(is_open).await;

    assert!(server.url.ends_with("/chat/ws?token=tok"));
    assert_eq!(h.store.get(TOKEN).unwrap().as_deref(), Some("tok"));
}

#[tokio::test(start_paused = true)]
async fn inbound_message_renders_decrypted() {
    let api = MockApi::default();
    let history = serde_json::from_value::<InboundMessage>(serde_json::json!({
        "id": 1, "chat_id": CHAT, "sender_id": ME, "encrypted_content": peer_wire("earlier"),
    }))
    .unwrap();
    api.set_history(CHAT, vec![history]);

    let mut h = Harness::start_with(api);
    h.login(None).await;
    let server = h.next_server().await;
    h.wait_for(is_open).await;

    h.send(Command::SelectChat(Some(CHAT))).await;
    h.wait_for(|e| log_texts(e) == ["earlier"]).await;

    server.push(TransportEvent::Frame(inbound_frame(2, &peer_wire("hello"))));
    let event = h.wait_for(|e| log_texts(e).len() == 2).await;

    let ClientEvent::Log { chat_id, messages } = event else { unreachable!() };
    assert_eq!(chat_id, Some(CHAT));
    assert_eq!(messages[0].text, "earlier");
    assert!(messages[0].mine);
    assert_eq!(messages[1].text, "hello");
    assert_eq!(messages[1].id, MessageId::Server(2));
    assert!(!messages[1].mine);
}

#[tokio::test(start_paused = true)]
async fn clean_close_reconnects_after_delay() {
    let mut h = Harness::start();
    h.login(None).await;
    let first = h.next_server().await;
    h.wait_for(is_open).await;

    let closed_at = Instant::now();
    first.push(TransportEvent::Closed { code: 1000, reason: "bye".into() });
    h.wait_for(|e| *e == ClientEvent::Connection(ConnectionState::Closed)).await;

    let _second = h.next_server().await;
    assert!(closed_at.elapsed() >= Duration::from_secs(2));
    h.wait_for(is_open).await;
}

#[tokio::test(start_paused = true)]
async fn policy_close_wipes_without_reconnect() {
    let mut h = Harness::start();
    h.login(None).await;
    let server = h.next_server().await;
    h.wait_for(is_open).await;

    server.push(TransportEvent::Closed { code: 1008, reason: "bad token".into() });
    h.wait_for(|e| matches!(e, ClientEvent::Wiped { reason: WipeReason::SessionRejected, .. }))
        .await;

    let reconnect = tokio::time::timeout(Duration::from_secs(30), h.servers.recv()).await;
    assert!(reconnect.is_err(), "rejected session must not reconnect");
    assert_eq!(h.store.get(TOKEN).unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn failed_send_retries_then_confirms() {
    let api = MockApi::default();
    api.queue_send(Err(DeliveryError::Transport("offline".into())));
    api.queue_send(Ok(SendReceipt { message_id: 77, created_at: "2024-01-01T00:00:01".into() }));

    let mut h = Harness::start_with(api);
    h.login(None).await;
    h.next_server().await;
    h.wait_for(is_open).await;
    h.send(Command::SelectChat(Some(CHAT))).await;

    let sent_at = Instant::now();
    h.send(Command::Send { chat_id: CHAT, text: "hi".into(), message_type: MessageType::Text })
        .await;

    let event = h
        .wait_for(|e| {
            matches!(e, ClientEvent::Log { messages, .. }
                if messages.iter().any(|m| m.id == MessageId::Server(77)))
        })
        .await;

    let ClientEvent::Log { messages, .. } = event else { unreachable!() };
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "hi");
    assert!(messages[0].mine);
    assert!(sent_at.elapsed() >= Duration::from_secs(2));

    let sent = h.api.sent();
    assert_eq!(sent.len(), 2);
    assert_ne!(sent[0].1, sent[1].1, "resend must use a fresh nonce");
}

#[tokio::test(start_paused = true)]
async fn send_without_login_is_refused() {
    let mut h = Harness::start();
    h.send(Command::Send { chat_id: CHAT, text: "hi".into(), message_type: MessageType::Text })
        .await;

    let event = h.wait_for(|e| matches!(e, ClientEvent::Error(_))).await;
    assert_eq!(event, ClientEvent::Error("not logged in".into()));
    assert!(h.api.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn expiry_wipes_exactly_once() {
    let mut h = Harness::start();
    h.login(Some(BASE_CLOCK + 3)).await;
    let server = h.next_server().await;

    let countdown = h.wait_for(|e| matches!(e, ClientEvent::Countdown { .. })).await;
    let ClientEvent::Countdown { remaining, display } = countdown else { unreachable!() };
    assert!(remaining <= 3);
    assert!(display.starts_with("00:0"));

    h.wait_for(|e| matches!(e, ClientEvent::Wiped { reason: WipeReason::Expired, .. })).await;

    let later = h.drain_for(Duration::from_secs(10)).await;
    assert!(!later.iter().any(|e| matches!(e, ClientEvent::Wiped { .. })));
    assert!(!later.iter().any(|e| matches!(e, ClientEvent::Countdown { .. })));
    assert_eq!(h.store.get(TOKEN).unwrap(), None);
    assert_eq!(server.closes(), vec![4000], "wipe close must be the only close sent");
}

#[tokio::test(start_paused = true)]
async fn logout_closes_stream_with_wipe_code_first() {
    let mut h = Harness::start();
    let server = h.online().await;

    h.send(Command::Logout).await;
    h.wait_for(|e| matches!(e, ClientEvent::Wiped { .. })).await;
    h.drain_for(Duration::from_secs(5)).await;

    assert_eq!(server.closes().first(), Some(&4000));
    assert!(!server.closes().contains(&1000));
}

#[tokio::test(start_paused = true)]
async fn renew_rearms_countdown_and_reconnects_with_new_token() {
    let mut h = Harness::start();
    h.login(Some(BASE_CLOCK + 5)).await;
    let first = h.next_server().await;
    h.wait_for(is_open).await;

    h.send(Command::Renew { token: "fresh".into(), expires_at: Some(BASE_CLOCK + 600) }).await;
    let second = h.next_server().await;
    assert!(second.url.ends_with("token=fresh"));
    assert_eq!(h.store.get(TOKEN).unwrap().as_deref(), Some("fresh"));

    let later = h.drain_for(Duration::from_secs(30)).await;
    assert!(!later.iter().any(|e| matches!(e, ClientEvent::Wiped { .. })));
    assert!(
        later
            .iter()
            .any(|e| matches!(e, ClientEvent::Countdown { remaining, .. } if *remaining > 500))
    );
    assert_eq!(first.closes(), vec![1000]);
    assert!(second.closes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn renew_without_session_is_refused() {
    let mut h = Harness::start();
    h.send(Command::Renew { token: "fresh".into(), expires_at: None }).await;

    let event = h.wait_for(|e| matches!(e, ClientEvent::Error(_))).await;
    assert_eq!(event, ClientEvent::Error("not logged in".into()));
    assert_eq!(h.store.get(TOKEN).unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn image_is_stashed_and_removed_by_wipe() {
    let mut h = Harness::start();
    let server = h.online().await;
    h.send(Command::SelectChat(Some(CHAT))).await;

    server.push(TransportEvent::Frame(image_frame(5, "data:image/png;base64,iVBORw0K")));
    let event = h
        .wait_for(|e| matches!(e, ClientEvent::Log { messages, .. } if messages.len() == 1))
        .await;
    let ClientEvent::Log { messages, .. } = event else { unreachable!() };
    let path = messages[0].attachment.clone().expect("image not stashed");
    assert!(std::path::Path::new(&path).starts_with(h.platform.ephemeral_dir()));
    assert_eq!(&std::fs::read(&path).unwrap()[..4], b"\x89PNG");

    h.send(Command::Logout).await;
    let ClientEvent::Wiped { report, .. } =
        h.wait_for(|e| matches!(e, ClientEvent::Wiped { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(report.handles_revoked, 1);
    assert!(!std::path::Path::new(&path).exists());
}

#[tokio::test(start_paused = true)]
async fn switching_user_drops_previous_state() {
    let api = MockApi::default();
    api.queue_send(Err(DeliveryError::Transport("offline".into())));

    let mut h = Harness::start_with(api);
    h.online().await;
    h.send(Command::SelectChat(Some(CHAT))).await;
    h.send(Command::Send { chat_id: CHAT, text: "hi".into(), message_type: MessageType::Text })
        .await;
    h.wait_for(|e| log_texts(e) == ["hi"]).await;

    h.send(Command::Login { token: "other".into(), user_id: 3, expires_at: None }).await;
    h.wait_for(|e| *e == ClientEvent::Log { chat_id: None, messages: Vec::new() }).await;

    h.drain_for(Duration::from_secs(10)).await;
    assert_eq!(h.api.sent().len(), 1, "previous user's retry must be cancelled");
}

#[tokio::test(start_paused = true)]
async fn user_search_lists_matches() {
    let api = MockApi::default();
    api.set_users(vec![
        UserSummary { id: 7, email: Some("ada@x.io".into()), username: None },
        UserSummary { id: 8, email: None, username: Some("bob".into()) },
    ]);

    let mut h = Harness::start_with(api);
    h.online().await;
    h.send(Command::SearchUsers { query: "ada".into() }).await;

    let event = h.wait_for(|e| matches!(e, ClientEvent::Users(_))).await;
    let ClientEvent::Users(users) = event else { unreachable!() };
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].id, 7);
}

#[tokio::test(start_paused = true)]
async fn chat_request_lifecycle() {
    let mut h = Harness::start();
    h.online().await;

    h.send(Command::RequestChat { user_id: 7, code: "ab12".into() }).await;
    h.wait_for(|e| *e == ClientEvent::Notice("Chat request 12 sent to user 7".into())).await;

    h.send(Command::AcceptRequest { request_id: 12, code: "cd34".into() }).await;
    h.wait_for(|e| *e == ClientEvent::Notice(format!("Chat {CHAT} is open"))).await;
    h.wait_for(|e| matches!(e, ClientEvent::Chats(_))).await;

    h.send(Command::VerifyChat { chat_id: CHAT, code: "ef56".into() }).await;
    h.wait_for(|e| *e == ClientEvent::Notice(format!("Chat {CHAT} verified"))).await;

    assert_eq!(h.api.calls(), vec!["request 7 ab12", "accept 12 cd34", "verify 42 ef56"]);
}

#[tokio::test(start_paused = true)]
async fn malformed_code_never_reaches_server() {
    let mut h = Harness::start();
    h.online().await;

    h.send(Command::RequestChat { user_id: 7, code: "toolong".into() }).await;
    let event = h.wait_for(|e| matches!(e, ClientEvent::Error(_))).await;
    assert_eq!(event, ClientEvent::Error("verification code must be 4 characters".into()));
    assert!(h.api.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn wrong_verification_code_reports_server_detail() {
    let mut h = Harness::start();
    h.online().await;

    h.send(Command::VerifyChat { chat_id: CHAT, code: "0000".into() }).await;
    let event = h.wait_for(|e| matches!(e, ClientEvent::Error(_))).await;
    assert_eq!(
        event,
        ClientEvent::Error(format!(
            "verifying chat {CHAT}: Invalid verification code (status 400)"
        ))
    );
}

#[tokio::test(start_paused = true)]
async fn clear_empties_log_and_delete_reports_outcome() {
    let mut h = Harness::start();
    let server = h.online().await;
    h.send(Command::SelectChat(Some(CHAT))).await;
    server.push(TransportEvent::Frame(inbound_frame(2, &peer_wire("hello"))));
    h.wait_for(|e| log_texts(e) == ["hello"]).await;

    h.send(Command::ClearChat(CHAT)).await;
    h.wait_for(|e| *e == ClientEvent::Log { chat_id: Some(CHAT), messages: Vec::new() }).await;

    h.send(Command::DeleteChat(CHAT)).await;
    let event = h.wait_for(|e| matches!(e, ClientEvent::Notice(_))).await;
    assert_eq!(
        event,
        ClientEvent::Notice(format!("Chat {CHAT}: Deletion requested. Waiting for other user."))
    );
    assert_eq!(h.api.calls(), vec!["clear 42", "delete 42"]);
}

#[tokio::test(start_paused = true)]
async fn management_without_session_is_refused() {
    let mut h = Harness::start();
    h.send(Command::ClearChat(CHAT)).await;

    let event = h.wait_for(|e| matches!(e, ClientEvent::Error(_))).await;
    assert_eq!(event, ClientEvent::Error("not logged in".into()));
    assert!(h.api.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rejected_api_token_wipes() {
    let api = MockApi::default();
    api.reject_token();

    let mut h = Harness::start_with(api);
    h.login(None).await;

    let event = h.wait_for(|e| matches!(e, ClientEvent::Wiped { .. })).await;
    assert!(matches!(event, ClientEvent::Wiped { reason: WipeReason::SessionRejected, .. }));
}

#[tokio::test(start_paused = true)]
async fn logout_clears_log_and_identity() {
    let mut h = Harness::start();
    let ClientEvent::Identity { public_key: first } =
        h.wait_for(|e| matches!(e, ClientEvent::Identity { .. })).await
    else {
        unreachable!()
    };

    h.login(None).await;
    h.next_server().await;
    h.wait_for(is_open).await;
    h.send(Command::Logout).await;

    h.wait_for(|e| *e == ClientEvent::Log { chat_id: None, messages: Vec::new() }).await;
    h.wait_for(|e| matches!(e, ClientEvent::Wiped { reason: WipeReason::Logout, .. })).await;

    h.login(None).await;
    let ClientEvent::Identity { public_key: second } =
        h.wait_for(|e| matches!(e, ClientEvent::Identity { .. })).await
    else {
        unreachable!()
    };
    assert_ne!(first, second, "wipe must destroy the identity key");
}

#[tokio::test(start_paused = true)]
async fn quit_stops_runtime() {
    let h = Harness::start();
    h.send(Command::Quit).await;

    let result = tokio::time::timeout(PATIENCE, h.task).await.unwrap().unwrap();
    assert!(result.is_ok());
}
