//! Generic runtime for client orchestration.
//!
//! The Runtime owns every state machine and mutates them from one task:
//! - [`ConnectionManager`]: event stream lifecycle
//! - [`DeliveryPipeline`]: optimistic send and reconciliation
//! - [`SessionExpiry`]: login countdown
//! - [`PanicWipe`]: teardown on logout, expiry or token rejection
//!
//! Timers, stream I/O and API calls run in spawned tasks that post their
//! results back into the loop, so every state transition runs to completion
//! before the next input is looked at.

use std::{collections::HashMap, future::Future, time::Duration};

use hushwire_core::{
    AttemptId, ChatId, ConnectionAction, ConnectionError, ConnectionManager, ConnectionState,
    DeliveryAction, DeliveryError, DeliveryPipeline, Environment, InboundMessage, KeyValueStore,
    MessageId, MessageType, PanicWipe, PersistedKeys, SendReceipt, ServerEvent, SessionCrypto,
    SessionExpiry, SessionStore, StorageError, TempId, TimerId, UserId, WipeError, WipePlatform,
    WipeRegistry,
};
use hushwire_crypto::KeyPair;
use tokio::{
    sync::mpsc,
    task::AbortHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};

use crate::{
    attachment::Attachment,
    config::ClientConfig,
    driver::{CLOSE_ABNORMAL, ChatApi, Platform, Transport, TransportConnection, TransportEvent},
    error::{ApiError, RuntimeError},
    event::{ClientEvent, ClientHandle, Command, WipeReason},
    state::{ChatRequest, ChatSummary, DisplayMessage, UserSummary},
};

/// Capacity of the command queue
const COMMAND_QUEUE: usize = 64;

/// Length the server demands of verification codes
const VERIFICATION_CODE_LEN: usize = 4;

/// Expiry countdown resolution
const EXPIRY_TICK: Duration = Duration::from_secs(1);

/// Inputs posted back into the loop by spawned tasks.
#[derive(Debug)]
enum LoopEvent {
    Stream { attempt: AttemptId, event: TransportEvent },
    ConnectFailed { attempt: AttemptId, error: ConnectionError },
    ReconnectTimer(TimerId),
    RetryTimer { temp_id: TempId, timer: TimerId },
    Api { epoch: u64, reply: ApiReply },
}

#[derive(Debug)]
enum ApiReply {
    Submitted { temp_id: TempId, result: Result<SendReceipt, DeliveryError> },
    Chats(Result<Vec<ChatSummary>, ApiError>),
    Requests(Result<Vec<ChatRequest>, ApiError>),
    History { chat_id: ChatId, result: Result<Vec<InboundMessage>, ApiError> },
    Users(Result<Vec<UserSummary>, ApiError>),
    RequestSent { user_id: UserId, result: Result<u64, ApiError> },
    Accepted(Result<ChatId, ApiError>),
    Verified { chat_id: ChatId, result: Result<(), ApiError> },
    Cleared { chat_id: ChatId, result: Result<(), ApiError> },
    DeleteRequested { chat_id: ChatId, result: Result<String, ApiError> },
}

/// Close requests for one stream task
type StreamCloser = mpsc::UnboundedSender<(u16, String)>;

/// Generic runtime over its drivers.
///
/// # Type Parameters
///
/// - `T`: event stream driver
/// - `A`: REST driver
/// - `S`: key-value store for the identity and token
/// - `P`: platform wiped by the panic wipe
/// - `E`: time and randomness
pub struct Runtime<T, A, S, P, E>
where
    T: Transport,
    A: ChatApi,
    S: KeyValueStore,
    P: Platform,
    E: Environment,
{
    config: ClientConfig,
    env: E,
    transport: T,
    api: A,
    keys: PersistedKeys<S>,
    platform: P,
    connection: ConnectionManager,
    delivery: DeliveryPipeline<E>,
    wiper: PanicWipe<E>,
    expiry: Option<SessionExpiry>,
    identity: Option<KeyPair>,
    token: Option<String>,
    user_id: UserId,
    /// Bumped on every login and wipe; API replies from older epochs are dropped
    epoch: u64,
    reported_state: ConnectionState,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<ClientEvent>,
    loop_tx: mpsc::UnboundedSender<LoopEvent>,
    loop_rx: mpsc::UnboundedReceiver<LoopEvent>,
    streams: HashMap<AttemptId, StreamCloser>,
    reconnect_timers: HashMap<TimerId, AbortHandle>,
    retry_timers: HashMap<TimerId, AbortHandle>,
    /// Ephemeral files of decoded images, by message
    attachments: HashMap<MessageId, String>,
}

impl<T, A, S, P, E> Runtime<T, A, S, P, E>
where
    T: Transport,
    A: ChatApi,
    S: KeyValueStore,
    P: Platform,
    E: Environment,
{
    /// Create a runtime and the handle a front end drives it with.
    pub fn new(
        config: ClientConfig,
        env: E,
        transport: T,
        api: A,
        store: S,
        platform: P,
    ) -> (Self, ClientHandle) {
        let registry = WipeRegistry::new();
        let crypto = SessionCrypto::new(env.clone(), registry.clone());
        let sessions = SessionStore::new(crypto, config.session_ttl());
        let delivery = DeliveryPipeline::new(sessions, config.delivery_config(), 0);
        let connection = ConnectionManager::new(config.reconnect_policy());
        let wiper = PanicWipe::new(registry, env.clone());

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (loop_tx, loop_rx) = mpsc::unbounded_channel();

        let runtime = Self {
            config,
            env,
            transport,
            api,
            keys: PersistedKeys::new(store),
            platform,
            connection,
            delivery,
            wiper,
            expiry: None,
            identity: None,
            token: None,
            user_id: 0,
            epoch: 0,
            reported_state: ConnectionState::Idle,
            commands: command_rx,
            events: event_tx,
            loop_tx,
            loop_rx,
            streams: HashMap::new(),
            reconnect_timers: HashMap::new(),
            retry_timers: HashMap::new(),
            attachments: HashMap::new(),
        };
        (runtime, ClientHandle::new(command_tx, event_rx))
    }

    /// Registry shared with the crypto layer and the stream tasks.
    pub fn registry(&self) -> &WipeRegistry {
        self.wiper.registry()
    }

    /// Run until [`Command::Quit`] or until every handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored identity cannot be loaded or created.
    pub async fn run(mut self) -> Result<(), RuntimeError> {
        self.load_identity()?;

        let mut ticker = interval(EXPIRY_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        None | Some(Command::Quit) => break,
                        Some(command) => self.handle_command(command),
                    }
                },
                Some(event) = self.loop_rx.recv() => self.handle_loop_event(event),
                _ = ticker.tick() => self.tick_expiry(),
            }
        }

        self.shutdown();
        Ok(())
    }

    fn load_identity(&mut self) -> Result<(), StorageError> {
        let identity = self.keys.load_or_generate(&self.env)?;
        self.emit(ClientEvent::Identity { public_key: identity.public_key_base64() });
        self.identity = Some(identity);
        Ok(())
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Login { token, user_id, expires_at } => self.login(token, user_id, expires_at),
            Command::Renew { token, expires_at } => self.renew(token, expires_at),
            Command::Logout => self.wipe(WipeReason::Logout),
            Command::SelectChat(chat_id) => {
                let actions = self.delivery.select_chat(chat_id);
                self.process_delivery(actions);
            },
            Command::Send { chat_id, text, message_type } => {
                if !self.require_session() {
                    return;
                }
                let actions = self.delivery.send(chat_id, text, message_type);
                self.process_delivery(actions);
            },
            Command::Resubmit(temp_id) => {
                let actions = self.delivery.resubmit(temp_id);
                self.process_delivery(actions);
            },
            Command::EstablishSession { chat_id, peer_public_key } => {
                self.establish_session(chat_id, &peer_public_key);
            },
            Command::Refresh => {
                self.process_delivery(vec![
                    DeliveryAction::RefreshChats,
                    DeliveryAction::RefreshRequests,
                ]);
            },
            Command::SearchUsers { query } => {
                if self.require_session() {
                    self.spawn_api(move |api, token| async move {
                        ApiReply::Users(api.search_users(&token, &query).await)
                    });
                }
            },
            Command::RequestChat { user_id, code } => {
                if self.require_session() && self.require_code(&code) {
                    self.spawn_api(move |api, token| async move {
                        let result = api.send_chat_request(&token, user_id, &code).await;
                        ApiReply::RequestSent { user_id, result }
                    });
                }
            },
            Command::AcceptRequest { request_id, code } => {
                if self.require_session() && self.require_code(&code) {
                    self.spawn_api(move |api, token| async move {
                        let result = api.accept_chat_request(&token, request_id, &code).await;
                        ApiReply::Accepted(result)
                    });
                }
            },
            Command::VerifyChat { chat_id, code } => {
                if self.require_session() && self.require_code(&code) {
                    self.spawn_api(move |api, token| async move {
                        let result = api.verify_chat(&token, chat_id, &code).await;
                        ApiReply::Verified { chat_id, result }
                    });
                }
            },
            Command::ClearChat(chat_id) => {
                if self.require_session() {
                    self.spawn_api(move |api, token| async move {
                        ApiReply::Cleared { chat_id, result: api.clear_chat(&token, chat_id).await }
                    });
                }
            },
            Command::DeleteChat(chat_id) => {
                if self.require_session() {
                    self.spawn_api(move |api, token| async move {
                        let result = api.request_delete_chat(&token, chat_id).await;
                        ApiReply::DeleteRequested { chat_id, result }
                    });
                }
            },
            Command::Wipe => self.wipe(WipeReason::Requested),
            Command::Quit => {},
        }
    }

    fn require_session(&self) -> bool {
        if self.token.is_some() {
            return true;
        }
        self.emit(ClientEvent::Error("not logged in".to_string()));
        false
    }

    fn require_code(&self, code: &str) -> bool {
        if code.chars().count() == VERIFICATION_CODE_LEN {
            return true;
        }
        self.emit(ClientEvent::Error(format!(
            "verification code must be {VERIFICATION_CODE_LEN} characters"
        )));
        false
    }

    fn login(&mut self, token: String, user_id: UserId, expires_at: Option<u64>) {
        if self.identity.is_none()
            && let Err(err) = self.load_identity()
        {
            self.emit(ClientEvent::Error(format!("identity unavailable: {err}")));
            return;
        }
        if let Err(err) = self.keys.set_token(&token) {
            warn!(error = %err, "could not persist token");
        }

        if self.user_id != 0 && self.user_id != user_id {
            info!(previous = self.user_id, user_id, "user changed, dropping previous state");
            self.delivery.sessions_mut().remove_all();
            let actions = self.delivery.reset();
            self.process_delivery(actions);
            self.attachments.clear();
            self.render();
        }

        self.epoch += 1;
        self.token = Some(token);
        self.user_id = user_id;
        self.delivery.set_self_id(user_id);
        self.expiry = expires_at.map(SessionExpiry::new);
        info!(user_id, ?expires_at, "session started");

        let mut actions = self.connection.disconnect();
        actions.extend(self.connection.set_session_live(true));
        actions.extend(self.connection.connect());
        self.process_connection(actions);
        self.process_delivery(vec![DeliveryAction::RefreshChats, DeliveryAction::RefreshRequests]);
    }

    fn renew(&mut self, token: String, expires_at: Option<u64>) {
        if !self.require_session() {
            return;
        }
        if let Err(err) = self.keys.set_token(&token) {
            warn!(error = %err, "could not persist token");
        }
        self.token = Some(token);

        match (&mut self.expiry, expires_at) {
            (Some(expiry), Some(expires_at)) => expiry.renew(expires_at),
            (expiry, expires_at) => *expiry = expires_at.map(SessionExpiry::new),
        }
        info!(?expires_at, "session renewed");

        // The open stream authenticated with the old token
        let mut actions = self.connection.disconnect();
        actions.extend(self.connection.connect());
        self.process_connection(actions);
    }

    fn establish_session(&mut self, chat_id: ChatId, peer_public_key: &str) {
        let Some(identity) = &self.identity else {
            self.emit(ClientEvent::Error("no identity key".to_string()));
            return;
        };

        let crypto = self.delivery.sessions().crypto();
        let secret = match crypto.shared_secret(identity, peer_public_key) {
            Ok(secret) => secret,
            Err(err) => {
                self.emit(ClientEvent::Error(format!("key exchange failed: {err}")));
                return;
            },
        };

        let established = self.delivery.sessions_mut().establish(chat_id, &secret).map(|_| ());
        self.delivery.sessions().crypto().discard(&secret);

        match established {
            Ok(()) => self.emit(ClientEvent::SessionEstablished { chat_id }),
            Err(err) => self.emit(ClientEvent::Error(format!("session derivation failed: {err}"))),
        }
    }

    fn handle_loop_event(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::Stream { attempt, event } => {
                let actions = match event {
                    TransportEvent::Opened => self.connection.transport_opened(attempt),
                    TransportEvent::Frame(text) => self.connection.frame_received(attempt, &text),
                    TransportEvent::Error(reason) => {
                        self.connection.transport_error(attempt, &reason)
                    },
                    TransportEvent::Closed { code, reason } => {
                        self.streams.remove(&attempt);
                        self.connection.transport_closed(attempt, code, &reason)
                    },
                };
                self.process_connection(actions);
            },
            LoopEvent::ConnectFailed { attempt, error } => {
                self.streams.remove(&attempt);
                let actions = self.connection.connect_failed(attempt, &error);
                self.process_connection(actions);
            },
            LoopEvent::ReconnectTimer(timer) => {
                self.reconnect_timers.remove(&timer);
                let actions = self.connection.reconnect_timer_fired(timer);
                self.process_connection(actions);
            },
            LoopEvent::RetryTimer { temp_id, timer } => {
                self.retry_timers.remove(&timer);
                let actions = self.delivery.retry_timer_fired(temp_id, timer);
                self.process_delivery(actions);
            },
            LoopEvent::Api { epoch, reply } => {
                if epoch != self.epoch {
                    debug!(epoch, current = self.epoch, "dropping reply from an earlier session");
                    return;
                }
                self.handle_api_reply(reply);
            },
        }
    }

    fn handle_api_reply(&mut self, reply: ApiReply) {
        match reply {
            ApiReply::Submitted { temp_id, result } => {
                let actions = match result {
                    Ok(receipt) => self.delivery.submit_succeeded(temp_id, receipt),
                    Err(err) => self.delivery.submit_failed(temp_id, &err),
                };
                self.process_delivery(actions);
            },
            ApiReply::Chats(Ok(chats)) => self.emit(ClientEvent::Chats(chats)),
            ApiReply::Requests(Ok(requests)) => self.emit(ClientEvent::Requests(requests)),
            ApiReply::History { chat_id, result: Ok(history) } => {
                let actions = self.delivery.history_loaded(chat_id, history);
                self.process_delivery(actions);
            },
            ApiReply::Users(Ok(users)) => self.emit(ClientEvent::Users(users)),
            ApiReply::RequestSent { user_id, result: Ok(request_id) } => {
                self.emit(ClientEvent::Notice(format!(
                    "Chat request {request_id} sent to user {user_id}"
                )));
            },
            ApiReply::Accepted(Ok(chat_id)) => {
                self.emit(ClientEvent::Notice(format!("Chat {chat_id} is open")));
                self.process_delivery(vec![
                    DeliveryAction::RefreshRequests,
                    DeliveryAction::RefreshChats,
                ]);
            },
            ApiReply::Verified { chat_id, result: Ok(()) } => {
                self.emit(ClientEvent::Notice(format!("Chat {chat_id} verified")));
                self.process_delivery(vec![DeliveryAction::RefreshChats]);
            },
            ApiReply::Cleared { chat_id, result: Ok(()) } => {
                self.emit(ClientEvent::Notice(format!("Chat {chat_id} cleared")));
                let actions = self.delivery.handle_event(ServerEvent::ChatCleared { chat_id });
                self.process_delivery(actions);
            },
            ApiReply::DeleteRequested { chat_id, result: Ok(outcome) } => {
                self.emit(ClientEvent::Notice(format!("Chat {chat_id}: {outcome}")));
            },
            ApiReply::Chats(Err(err)) => self.api_failed("chat list", &err),
            ApiReply::Requests(Err(err)) => self.api_failed("chat requests", &err),
            ApiReply::History { chat_id, result: Err(err) } => {
                self.api_failed(&format!("history of chat {chat_id}"), &err);
            },
            ApiReply::Users(Err(err)) => self.api_failed("user search", &err),
            ApiReply::RequestSent { user_id, result: Err(err) } => {
                self.api_failed(&format!("chat request to user {user_id}"), &err);
            },
            ApiReply::Accepted(Err(err)) => self.api_failed("accepting request", &err),
            ApiReply::Verified { chat_id, result: Err(err) } => {
                self.api_failed(&format!("verifying chat {chat_id}"), &err);
            },
            ApiReply::Cleared { chat_id, result: Err(err) } => {
                self.api_failed(&format!("clearing chat {chat_id}"), &err);
            },
            ApiReply::DeleteRequested { chat_id, result: Err(err) } => {
                self.api_failed(&format!("deleting chat {chat_id}"), &err);
            },
        }
    }

    fn api_failed(&mut self, what: &str, err: &ApiError) {
        if *err == ApiError::Unauthorized {
            warn!(what, "API rejected token");
            self.wipe(WipeReason::SessionRejected);
            return;
        }
        warn!(what, error = %err, "API call failed");
        self.emit(ClientEvent::Error(format!("{what}: {err}")));
    }

    fn process_connection(&mut self, actions: Vec<ConnectionAction>) {
        for action in actions {
            match action {
                ConnectionAction::OpenTransport { attempt } => self.open_stream(attempt),
                ConnectionAction::CloseTransport { attempt, code, reason } => {
                    if let Some(closer) = self.streams.remove(&attempt) {
                        // Send fails only if the stream already ended
                        let _ = closer.send((code, reason));
                    }
                },
                ConnectionAction::ScheduleReconnect { timer, delay } => {
                    let handle = self.spawn_timer(delay, LoopEvent::ReconnectTimer(timer));
                    self.reconnect_timers.insert(timer, handle);
                },
                ConnectionAction::CancelReconnect { timer } => {
                    if let Some(handle) = self.reconnect_timers.remove(&timer) {
                        handle.abort();
                    }
                },
                ConnectionAction::SessionExpired => self.wipe(WipeReason::SessionRejected),
                ConnectionAction::Dispatch(event) => {
                    let actions = self.delivery.handle_event(event);
                    self.process_delivery(actions);
                },
            }
        }
        self.report_connection_state();
    }

    fn process_delivery(&mut self, actions: Vec<DeliveryAction>) {
        for action in actions {
            match action {
                DeliveryAction::Submit { temp_id, chat_id, ciphertext, message_type } => {
                    self.spawn_api(move |api, token| async move {
                        let result =
                            api.send_message(&token, chat_id, &ciphertext, &message_type).await;
                        ApiReply::Submitted { temp_id, result }
                    });
                },
                DeliveryAction::ScheduleRetry { temp_id, timer, delay } => {
                    let handle = self.spawn_timer(delay, LoopEvent::RetryTimer { temp_id, timer });
                    self.retry_timers.insert(timer, handle);
                },
                DeliveryAction::CancelRetry { timer } => {
                    if let Some(handle) = self.retry_timers.remove(&timer) {
                        handle.abort();
                    }
                },
                DeliveryAction::RefreshChats => self.spawn_api(|api, token| async move {
                    ApiReply::Chats(api.active_chats(&token).await)
                }),
                DeliveryAction::RefreshRequests => self.spawn_api(|api, token| async move {
                    ApiReply::Requests(api.pending_requests(&token).await)
                }),
                DeliveryAction::LoadHistory { chat_id } => {
                    self.spawn_api(move |api, token| async move {
                        ApiReply::History { chat_id, result: api.messages(&token, chat_id).await }
                    });
                },
                DeliveryAction::Notify { message } => self.emit(ClientEvent::Notice(message)),
                DeliveryAction::Render => self.render(),
                DeliveryAction::SessionExpired => self.wipe(WipeReason::SessionRejected),
            }
        }
    }

    fn open_stream(&mut self, attempt: AttemptId) {
        let Some(token) = self.token.as_deref() else {
            warn!(attempt = attempt.0, "no token for stream attempt");
            return;
        };

        let url = self.config.websocket_url(token);
        let (close_tx, close_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_stream(
            self.transport.clone(),
            url,
            attempt,
            self.wiper.registry().clone(),
            self.loop_tx.clone(),
            close_rx,
        ));
        self.streams.insert(attempt, close_tx);
    }

    fn spawn_timer(&self, delay: Duration, event: LoopEvent) -> AbortHandle {
        let env = self.env.clone();
        let tx = self.loop_tx.clone();
        tokio::spawn(async move {
            env.sleep(delay).await;
            let _ = tx.send(event);
        })
        .abort_handle()
    }

    fn spawn_api<F, Fut>(&self, call: F)
    where
        F: FnOnce(A, String) -> Fut,
        Fut: Future<Output = ApiReply> + Send + 'static,
    {
        let Some(token) = self.token.clone() else {
            debug!("no session, skipping API call");
            return;
        };

        let epoch = self.epoch;
        let tx = self.loop_tx.clone();
        let call = call(self.api.clone(), token);
        tokio::spawn(async move {
            let reply = call.await;
            let _ = tx.send(LoopEvent::Api { epoch, reply });
        });
    }

    fn render(&mut self) {
        let log = self.delivery.log().to_vec();
        let mut messages = Vec::with_capacity(log.len());
        for message in &log {
            let text = self.delivery.display_text(message).to_string();
            let attachment = if message.message_type == MessageType::Image {
                self.stash_attachment(message.id, &text)
            } else {
                None
            };
            messages.push(DisplayMessage {
                id: message.id,
                sender_id: message.sender_id,
                text,
                message_type: message.message_type.clone(),
                created_at: message.created_at.clone(),
                status: message.status,
                mine: message.sender_id == self.user_id,
                attachment,
            });
        }
        self.emit(ClientEvent::Log { chat_id: self.delivery.active_chat(), messages });
    }

    /// Decode an image message to an ephemeral file the wipe will revoke.
    fn stash_attachment(&mut self, id: MessageId, text: &str) -> Option<String> {
        if let Some(handle) = self.attachments.get(&id) {
            return Some(handle.clone());
        }

        let attachment = Attachment::from_data_url(text)?;
        let name = format!("message_{id}.{}", attachment.extension());
        match self.platform.ephemeral_file(&name, &attachment.bytes) {
            Ok(handle) => {
                self.wiper.registry().register_handle(handle.clone());
                self.attachments.insert(id, handle.clone());
                Some(handle)
            },
            Err(err) => {
                warn!(%id, error = %err, "could not store attachment");
                None
            },
        }
    }

    fn tick_expiry(&mut self) {
        let Some(expiry) = &mut self.expiry else {
            return;
        };

        let now = self.env.wall_clock_secs();
        let remaining = expiry.remaining(now);
        let display = expiry.countdown(now);
        let fired = expiry.tick(now).is_some();

        self.emit(ClientEvent::Countdown { remaining, display });
        if fired {
            self.wipe(WipeReason::Expired);
        }
    }

    /// Run the panic wipe and return to the logged-out state.
    ///
    /// The wipe force-closes open streams with the wipe code, so the
    /// connection machine's own close requests are never sent.
    fn wipe(&mut self, reason: WipeReason) {
        warn!(?reason, "panic wipe");
        self.epoch += 1;

        let report = {
            let mut target = WipeTarget { keys: &mut self.keys, platform: &mut self.platform };
            self.wiper.wipe(&mut target)
        };

        // Dropping the close senders ends any stream still connecting
        self.streams.clear();
        let mut actions = self.connection.set_session_live(false);
        actions.extend(self.connection.disconnect());
        self.process_connection(actions);
        for (_, handle) in self.reconnect_timers.drain() {
            handle.abort();
        }

        let actions = self.delivery.reset();
        self.process_delivery(actions);
        self.attachments.clear();

        self.token = None;
        self.identity = None;
        self.expiry = None;
        self.user_id = 0;

        self.emit(ClientEvent::Log { chat_id: None, messages: Vec::new() });
        self.emit(ClientEvent::Wiped { reason, report });
    }

    fn shutdown(&mut self) {
        let actions = self.connection.disconnect();
        self.process_connection(actions);
        self.streams.clear();
        for (_, handle) in self.reconnect_timers.drain().chain(self.retry_timers.drain()) {
            handle.abort();
        }
        info!("runtime stopped");
    }

    fn report_connection_state(&mut self) {
        let state = self.connection.state();
        if state != self.reported_state {
            self.reported_state = state;
            self.emit(ClientEvent::Connection(state));
        }
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            debug!("front end gone, dropping event");
        }
    }
}

/// Bridge one event stream to the loop.
async fn run_stream<T: Transport>(
    transport: T,
    url: String,
    attempt: AttemptId,
    registry: WipeRegistry,
    tx: mpsc::UnboundedSender<LoopEvent>,
    mut close_rx: mpsc::UnboundedReceiver<(u16, String)>,
) {
    let mut conn = match transport.connect(&url).await {
        Ok(conn) => conn,
        Err(error) => {
            let _ = tx.send(LoopEvent::ConnectFailed { attempt, error });
            return;
        },
    };

    registry.register_connection(attempt.0, conn.closer());
    let _ = tx.send(LoopEvent::Stream { attempt, event: TransportEvent::Opened });

    loop {
        tokio::select! {
            request = close_rx.recv() => {
                if let Some((code, reason)) = request {
                    conn.close(code, &reason).await;
                }
                break;
            },
            event = conn.next_event() => {
                let event = event.unwrap_or_else(|| TransportEvent::Closed {
                    code: CLOSE_ABNORMAL,
                    reason: "stream ended".to_string(),
                });
                let finished = matches!(event, TransportEvent::Closed { .. });
                let _ = tx.send(LoopEvent::Stream { attempt, event });
                if finished {
                    break;
                }
            },
        }
    }

    registry.unregister_connection(attempt.0);
}

/// Wipe target that clears the runtime's own key-value handle alongside the
/// platform.
struct WipeTarget<'a, S, P> {
    keys: &'a mut PersistedKeys<S>,
    platform: &'a mut P,
}

impl<S: KeyValueStore, P: WipePlatform> WipePlatform for WipeTarget<'_, S, P> {
    fn clear_key_value(&mut self) -> Result<(), StorageError> {
        let persisted = self.keys.clear();
        let platform = self.platform.clear_key_value();
        persisted.and(platform)
    }

    fn cache_names(&self) -> Result<Vec<String>, WipeError> {
        self.platform.cache_names()
    }

    fn delete_cache(&mut self, name: &str) -> Result<(), WipeError> {
        self.platform.delete_cache(name)
    }

    fn database_names(&self) -> Result<Vec<String>, WipeError> {
        self.platform.database_names()
    }

    fn delete_database(&mut self, name: &str) -> Result<(), WipeError> {
        self.platform.delete_database(name)
    }

    fn revoke_handle(&mut self, handle: &str) -> Result<(), WipeError> {
        self.platform.revoke_handle(handle)
    }

    fn navigate_wiped(&mut self) -> Result<(), WipeError> {
        self.platform.navigate_wiped()
    }

    fn reload(&mut self) -> Result<(), WipeError> {
        self.platform.reload()
    }
}
