//! Optimistic send, retry and reconciliation.
//!
//! Outgoing messages appear in the display log immediately under a temporary
//! id. The server confirmation swaps in the server id in place; failures retry
//! on a fixed schedule up to [`MAX_RETRIES`] times. Inbound events are
//! reconciled against the same log so every id appears exactly once.
//!
//! # Per-message lifecycle
//!
//! ```text
//!            send                 submit_succeeded
//! (new) ────────────> Sending ───────────────────> Sent (leaves pending set)
//!                      │   ^
//!       submit_failed  │   │ retry_timer_fired (retry_count += 1)
//!                      v   │
//!                     Failed ── retry_count == MAX_RETRIES ──> stays Failed
//!                      │                                       until resubmit
//! ```
//!
//! Pure: no I/O. Network calls and timers are carried in [`DeliveryAction`]s.

use std::{collections::BTreeMap, fmt, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    connection::TimerId,
    env::Environment,
    error::{DeliveryError, Failure},
    event::{InboundMessage, ServerEvent},
    message::{
        ChatId, Message, MessageId, MessageType, PendingMessage, SendReceipt, SendStatus, TempId,
        UserId,
    },
    session::SessionStore,
};

/// Automatic retries after the first failed submit
pub const MAX_RETRIES: u32 = 3;

/// Delay before the first retry
pub const DEFAULT_FIRST_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Delay before every later retry
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Shown in place of a message that cannot be decrypted
pub const UNDECRYPTABLE_PLACEHOLDER: &str = "[undecryptable]";

/// Retry schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Automatic retries per message
    pub max_retries: u32,
    /// Delay before the first retry
    pub first_retry_delay: Duration,
    /// Delay before later retries
    pub retry_delay: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            first_retry_delay: DEFAULT_FIRST_RETRY_DELAY,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Actions returned by the delivery pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryAction {
    /// POST the ciphertext to the server
    Submit {
        /// Local id to report the result under
        temp_id: TempId,
        /// Conversation
        chat_id: ChatId,
        /// Wire ciphertext
        ciphertext: String,
        /// Payload kind
        message_type: MessageType,
    },

    /// Start a retry timer for `temp_id`
    ScheduleRetry {
        /// Message to retry
        temp_id: TempId,
        /// Timer tag
        timer: TimerId,
        /// Delay until it fires
        delay: Duration,
    },

    /// Cancel a retry timer
    CancelRetry {
        /// Timer to cancel
        timer: TimerId,
    },

    /// Fetch the active chat list
    RefreshChats,

    /// Fetch pending chat requests
    RefreshRequests,

    /// Fetch the history of `chat_id`
    LoadHistory {
        /// Conversation to load
        chat_id: ChatId,
    },

    /// Tell the user something. Emitted before any destructive mutation.
    Notify {
        /// Text for the user
        message: String,
    },

    /// The display log or a message status changed
    Render,

    /// The server rejected our credentials
    SessionExpired,
}

/// Result of decrypting a message for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayText {
    /// Decrypted content
    Plain(String),
    /// Tag failure or malformed ciphertext
    Undecryptable,
}

impl DisplayText {
    /// Text to render.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Plain(text) => text,
            Self::Undecryptable => UNDECRYPTABLE_PLACEHOLDER,
        }
    }
}

impl fmt::Display for DisplayText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct PendingEntry {
    message: PendingMessage,
    /// Latest ciphertext, `None` if encryption failed
    ciphertext: Option<String>,
    timer: Option<TimerId>,
}

impl PendingEntry {
    fn optimistic(&self, sender_id: UserId) -> Message {
        Message {
            id: MessageId::Temp(self.message.temp_id),
            chat_id: self.message.chat_id,
            sender_id,
            ciphertext: self.ciphertext.clone().unwrap_or_default(),
            message_type: self.message.message_type.clone(),
            created_at: None,
            status: Some(self.message.status),
        }
    }
}

/// Send/retry/reconcile state machine for the display log.
#[derive(Debug)]
pub struct DeliveryPipeline<E> {
    sessions: SessionStore<E>,
    config: DeliveryConfig,
    self_id: UserId,
    active_chat: Option<ChatId>,
    log: Vec<Message>,
    pending: BTreeMap<TempId, PendingEntry>,
    next_temp: u64,
    next_timer: u64,
}

impl<E: Environment> DeliveryPipeline<E> {
    /// Create an empty pipeline for user `self_id`.
    pub fn new(sessions: SessionStore<E>, config: DeliveryConfig, self_id: UserId) -> Self {
        Self {
            sessions,
            config,
            self_id,
            active_chat: None,
            log: Vec::new(),
            pending: BTreeMap::new(),
            next_temp: 1,
            next_timer: 1,
        }
    }

    /// Display log of the active chat, in arrival order.
    pub fn log(&self) -> &[Message] {
        &self.log
    }

    /// Active chat, if one is selected.
    pub fn active_chat(&self) -> Option<ChatId> {
        self.active_chat
    }

    /// Pending message by temporary id.
    pub fn pending(&self, temp_id: TempId) -> Option<&PendingMessage> {
        self.pending.get(&temp_id).map(|entry| &entry.message)
    }

    /// Number of unconfirmed messages.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Per-conversation key cache.
    pub fn sessions(&self) -> &SessionStore<E> {
        &self.sessions
    }

    /// Mutable key cache, for establishing exchange sessions.
    pub fn sessions_mut(&mut self) -> &mut SessionStore<E> {
        &mut self.sessions
    }

    /// Set the local user's id, used as sender of optimistic entries.
    pub fn set_self_id(&mut self, self_id: UserId) {
        self.self_id = self_id;
    }

    /// Queue `plaintext` for delivery to `chat_id`.
    ///
    /// Never fails: encryption errors mark the message Failed.
    pub fn send(
        &mut self,
        chat_id: ChatId,
        plaintext: String,
        message_type: MessageType,
    ) -> Vec<DeliveryAction> {
        let temp_id = TempId(self.next_temp);
        self.next_temp += 1;

        let created_at = self.sessions.crypto().wall_clock_secs();
        let mut entry = PendingEntry {
            message: PendingMessage {
                temp_id,
                chat_id,
                content: plaintext,
                message_type,
                created_at,
                status: SendStatus::Sending,
                retry_count: 0,
            },
            ciphertext: None,
            timer: None,
        };

        let mut actions = Vec::new();
        match self.encrypt(chat_id, &entry.message.content) {
            Ok(ciphertext) => {
                entry.ciphertext = Some(ciphertext.clone());
                actions.push(DeliveryAction::Submit {
                    temp_id,
                    chat_id,
                    ciphertext,
                    message_type: entry.message.message_type.clone(),
                });
            },
            Err(err) => {
                warn!(%temp_id, error = %err, "encryption failed, message not sent");
                entry.message.status = SendStatus::Failed;
                if let DeliveryError::Session(err) = err {
                    actions.push(DeliveryAction::Notify { message: err.to_string() });
                }
            },
        }

        if self.active_chat == Some(chat_id) {
            self.log.push(entry.optimistic(self.self_id));
            actions.push(DeliveryAction::Render);
        }
        self.pending.insert(temp_id, entry);

        actions
    }

    /// The server confirmed `temp_id`.
    pub fn submit_succeeded(
        &mut self,
        temp_id: TempId,
        receipt: SendReceipt,
    ) -> Vec<DeliveryAction> {
        let Some(entry) = self.pending.remove(&temp_id) else {
            debug!(%temp_id, "ignoring confirmation of unknown message");
            return vec![];
        };

        let mut actions: Vec<_> =
            entry.timer.map(|timer| DeliveryAction::CancelRetry { timer }).into_iter().collect();

        let server_id = MessageId::Server(receipt.message_id);
        let already_present = self.log.iter().any(|m| m.id == server_id);

        if let Some(index) = self.position(MessageId::Temp(temp_id)) {
            if already_present {
                // Inbound echo won the race
                self.log.remove(index);
            } else {
                let message = &mut self.log[index];
                message.id = server_id;
                message.status = Some(SendStatus::Sent);
                message.created_at = Some(receipt.created_at);
            }
            actions.push(DeliveryAction::Render);
        }

        info!(%temp_id, message_id = receipt.message_id, "message delivered");
        actions
    }

    /// Submitting `temp_id` failed.
    pub fn submit_failed(&mut self, temp_id: TempId, error: &DeliveryError) -> Vec<DeliveryAction> {
        let Some(entry) = self.pending.get_mut(&temp_id) else {
            debug!(%temp_id, "ignoring failure of unknown message");
            return vec![];
        };

        entry.message.status = SendStatus::Failed;
        let failure = error.failure();
        let mut actions = Vec::new();

        if failure == Failure::SessionExpired {
            actions.push(DeliveryAction::SessionExpired);
        } else if failure.is_retryable() && entry.message.retry_count < self.config.max_retries {
            let delay = if entry.message.retry_count == 0 {
                self.config.first_retry_delay
            } else {
                self.config.retry_delay
            };
            let timer = TimerId(self.next_timer);
            self.next_timer += 1;
            entry.timer = Some(timer);
            let retry = entry.message.retry_count + 1;
            warn!(%temp_id, retry, ?delay, %error, "send failed, retrying");
            actions.push(DeliveryAction::ScheduleRetry { temp_id, timer, delay });
        } else {
            warn!(%temp_id, %error, "send failed, giving up");
        }

        self.set_log_status(temp_id, SendStatus::Failed, None);
        actions.push(DeliveryAction::Render);
        actions
    }

    /// A retry timer fired.
    pub fn retry_timer_fired(&mut self, temp_id: TempId, timer: TimerId) -> Vec<DeliveryAction> {
        let current = self.pending.get(&temp_id).is_some_and(|entry| {
            entry.timer == Some(timer) && entry.message.status == SendStatus::Failed
        });
        if !current {
            debug!(%temp_id, timer = timer.0, "ignoring stray retry timer");
            return vec![];
        }

        if let Some(entry) = self.pending.get_mut(&temp_id) {
            entry.timer = None;
            entry.message.retry_count += 1;
        }
        self.resend(temp_id)
    }

    /// User-initiated resend of a failed message. Resets the retry budget.
    pub fn resubmit(&mut self, temp_id: TempId) -> Vec<DeliveryAction> {
        let Some(entry) = self.pending.get_mut(&temp_id) else {
            return vec![];
        };
        if entry.message.status != SendStatus::Failed {
            debug!(%temp_id, "resubmit ignored: message not failed");
            return vec![];
        }

        let mut actions: Vec<_> = entry
            .timer
            .take()
            .map(|timer| DeliveryAction::CancelRetry { timer })
            .into_iter()
            .collect();
        entry.message.retry_count = 0;

        actions.extend(self.resend(temp_id));
        actions
    }

    /// Reconcile an inbound server event.
    pub fn handle_event(&mut self, event: ServerEvent) -> Vec<DeliveryAction> {
        match event {
            ServerEvent::NewMessage(inbound) => {
                let mut actions = Vec::new();
                if self.active_chat == Some(inbound.chat_id) {
                    let id = MessageId::Server(inbound.id);
                    if self.position(id).is_some() {
                        debug!(message_id = inbound.id, "dropping duplicate message");
                    } else {
                        self.log.push(inbound.into_message());
                        actions.push(DeliveryAction::Render);
                    }
                }
                actions.push(DeliveryAction::RefreshChats);
                actions
            },
            ServerEvent::ChatRequest => vec![DeliveryAction::RefreshRequests],
            ServerEvent::ChatAccepted { .. } | ServerEvent::ChatVerified { .. } => {
                vec![DeliveryAction::RefreshChats]
            },
            ServerEvent::VerificationRequired { chat_id, deadline } => {
                let message = match deadline {
                    Some(deadline) => {
                        format!("Verification required for chat {chat_id} before {deadline}")
                    },
                    None => format!("Verification required for chat {chat_id}"),
                };
                vec![DeliveryAction::Notify { message }, DeliveryAction::RefreshChats]
            },
            ServerEvent::ChatDestroyed { chat_id, reason } => {
                let reason = reason.unwrap_or_else(|| "no reason given".to_string());
                let notice = format!("Chat {chat_id} was destroyed: {reason}");
                self.drop_chat(chat_id, notice)
            },
            ServerEvent::ChatDeleted { chat_id } => {
                let notice = format!("Chat {chat_id} has been deleted by mutual consent");
                self.drop_chat(chat_id, notice)
            },
            ServerEvent::ChatCleared { chat_id } => {
                if self.active_chat == Some(chat_id) {
                    self.log.clear();
                    vec![DeliveryAction::Render]
                } else {
                    vec![]
                }
            },
            ServerEvent::DeleteRequested { chat_id, requester } => {
                let who = requester.unwrap_or_else(|| "The other user".to_string());
                vec![DeliveryAction::Notify {
                    message: format!("{who} wants to delete chat {chat_id}"),
                }]
            },
        }
    }

    /// Change the active chat. `None` deselects.
    pub fn select_chat(&mut self, chat_id: Option<ChatId>) -> Vec<DeliveryAction> {
        self.active_chat = chat_id;
        self.log.clear();

        let mut actions = Vec::new();
        if let Some(chat_id) = chat_id {
            actions.push(DeliveryAction::LoadHistory { chat_id });
        }
        actions.push(DeliveryAction::Render);
        actions
    }

    /// History of `chat_id` arrived.
    ///
    /// Replaces the log if the chat is still active; unconfirmed local entries
    /// of that chat stay appended after the history.
    pub fn history_loaded(
        &mut self,
        chat_id: ChatId,
        history: Vec<InboundMessage>,
    ) -> Vec<DeliveryAction> {
        if self.active_chat != Some(chat_id) {
            debug!(chat_id, "discarding history of inactive chat");
            return vec![];
        }

        let mut log: Vec<Message> = Vec::with_capacity(history.len() + self.pending.len());
        for inbound in history {
            let message = inbound.into_message();
            if !log.iter().any(|m| m.id == message.id) {
                log.push(message);
            }
        }
        log.extend(
            self.pending
                .values()
                .filter(|entry| entry.message.chat_id == chat_id)
                .map(|entry| entry.optimistic(self.self_id)),
        );

        self.log = log;
        vec![DeliveryAction::Render]
    }

    /// Decrypt a log entry for display.
    pub fn display_text(&mut self, message: &Message) -> DisplayText {
        if let MessageId::Temp(temp_id) = message.id
            && let Some(entry) = self.pending.get(&temp_id)
        {
            return DisplayText::Plain(entry.message.content.clone());
        }

        if message.ciphertext.is_empty() {
            return DisplayText::Undecryptable;
        }

        let key = match self.sessions.get_or_derive(message.chat_id) {
            Ok(session) => session.message_key.clone(),
            Err(err) => {
                debug!(id = %message.id, error = %err, "no key to display message");
                return DisplayText::Undecryptable;
            },
        };
        match self.sessions.crypto().decrypt_wire(&key, &message.ciphertext) {
            Ok(text) => DisplayText::Plain(text),
            Err(err) => {
                debug!(id = %message.id, error = %err, "message cannot be displayed");
                DisplayText::Undecryptable
            },
        }
    }

    /// Drop all state after a wipe. Returns timer cancellations.
    pub fn reset(&mut self) -> Vec<DeliveryAction> {
        let actions = self
            .pending
            .values()
            .filter_map(|entry| entry.timer)
            .map(|timer| DeliveryAction::CancelRetry { timer })
            .collect();

        self.pending.clear();
        self.log.clear();
        self.active_chat = None;
        self.sessions.clear();
        actions
    }

    fn resend(&mut self, temp_id: TempId) -> Vec<DeliveryAction> {
        let Some((chat_id, content)) = self
            .pending
            .get(&temp_id)
            .map(|entry| (entry.message.chat_id, entry.message.content.clone()))
        else {
            return vec![];
        };

        let encrypted = self.encrypt(chat_id, &content);
        let Some(entry) = self.pending.get_mut(&temp_id) else {
            return vec![];
        };

        match encrypted {
            Ok(ciphertext) => {
                entry.message.status = SendStatus::Sending;
                entry.ciphertext = Some(ciphertext.clone());
                let message_type = entry.message.message_type.clone();
                self.set_log_status(temp_id, SendStatus::Sending, Some(&ciphertext));
                vec![
                    DeliveryAction::Submit { temp_id, chat_id, ciphertext, message_type },
                    DeliveryAction::Render,
                ]
            },
            Err(err) => {
                warn!(%temp_id, error = %err, "re-encryption failed");
                entry.message.status = SendStatus::Failed;
                self.set_log_status(temp_id, SendStatus::Failed, None);
                let mut actions = vec![DeliveryAction::Render];
                if let DeliveryError::Session(err) = err {
                    actions.insert(0, DeliveryAction::Notify { message: err.to_string() });
                }
                actions
            },
        }
    }

    fn drop_chat(&mut self, chat_id: ChatId, notice: String) -> Vec<DeliveryAction> {
        let mut actions = vec![DeliveryAction::Notify { message: notice }];

        self.sessions.remove(chat_id);

        let dropped: Vec<TempId> = self
            .pending
            .values()
            .filter(|entry| entry.message.chat_id == chat_id)
            .map(|entry| entry.message.temp_id)
            .collect();
        for temp_id in dropped {
            if let Some(timer) = self.pending.remove(&temp_id).and_then(|entry| entry.timer) {
                actions.push(DeliveryAction::CancelRetry { timer });
            }
        }

        if self.active_chat == Some(chat_id) {
            self.active_chat = None;
            self.log.clear();
            actions.push(DeliveryAction::Render);
        }

        info!(chat_id, "chat removed, keys wiped");
        actions.push(DeliveryAction::RefreshChats);
        actions
    }

    fn encrypt(&mut self, chat_id: ChatId, plaintext: &str) -> Result<String, DeliveryError> {
        let key = self.sessions.get_or_derive(chat_id)?.message_key.clone();
        Ok(self.sessions.crypto().encrypt_wire(&key, plaintext)?)
    }

    fn position(&self, id: MessageId) -> Option<usize> {
        self.log.iter().position(|m| m.id == id)
    }

    fn set_log_status(&mut self, temp_id: TempId, status: SendStatus, ciphertext: Option<&str>) {
        if let Some(index) = self.position(MessageId::Temp(temp_id)) {
            let message = &mut self.log[index];
            message.status = Some(status);
            if let Some(ciphertext) = ciphertext {
                message.ciphertext = ciphertext.to_string();
            }
        }
    }
}
