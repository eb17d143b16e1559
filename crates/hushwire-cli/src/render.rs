//! One-line text rendering of client events.

use hushwire_app::{ClientEvent, DisplayMessage, WipeReason};
use hushwire_core::{ConnectionState, SendStatus};

/// Lines to print for `event`. Empty for events with nothing to show.
pub fn render(event: &ClientEvent) -> Vec<String> {
    match event {
        ClientEvent::Identity { public_key } => vec![format!("* identity key {public_key}")],
        ClientEvent::Connection(state) => vec![format!("* connection {}", state_name(*state))],
        ClientEvent::Log { chat_id: Some(chat_id), messages } => {
            let mut lines = vec![format!("--- chat {chat_id} ({} messages)", messages.len())];
            lines.extend(messages.iter().map(message_line));
            lines
        },
        ClientEvent::Log { chat_id: None, .. } => Vec::new(),
        ClientEvent::Notice(text) => vec![format!("! {text}")],
        ClientEvent::Chats(chats) => {
            let mut lines = vec![format!("* {} chats", chats.len())];
            for chat in chats {
                let pending = if chat.verification_pending { " (verification due)" } else { "" };
                let peer = chat.other_user.display_name();
                lines.push(format!("  {} with {peer}{pending}", chat.id));
            }
            lines
        },
        ClientEvent::Requests(requests) if requests.is_empty() => Vec::new(),
        ClientEvent::Requests(requests) => {
            let mut lines = vec![format!("* {} chat requests", requests.len())];
            for request in requests {
                let from = request.username.as_deref().unwrap_or("unknown");
                let status = request.status.as_deref().unwrap_or("pending");
                lines.push(format!("  {} from {from} ({status})", request.id));
            }
            lines
        },
        ClientEvent::Users(users) if users.is_empty() => vec!["* no users found".to_string()],
        ClientEvent::Users(users) => {
            let mut lines = vec![format!("* {} users", users.len())];
            lines.extend(users.iter().map(|u| format!("  {} {}", u.id, u.display_name())));
            lines
        },
        // Only the last ten seconds are worth printing
        ClientEvent::Countdown { remaining, display } if *remaining <= 10 => {
            vec![format!("* session ends in {display}, /renew <token> to extend")]
        },
        ClientEvent::Countdown { .. } => Vec::new(),
        ClientEvent::SessionEstablished { chat_id } => {
            vec![format!("* exchanged session active for chat {chat_id}")]
        },
        ClientEvent::Wiped { reason, report } => {
            let mut lines = vec![format!(
                "* local state wiped ({}): {} buffers, {} handles, {} connections",
                reason_name(*reason),
                report.buffers_wiped,
                report.handles_revoked,
                report.connections_closed,
            )];
            lines.extend(report.failures.iter().map(|(step, err)| format!("  {step:?}: {err}")));
            lines
        },
        ClientEvent::Error(text) => vec![format!("error: {text}")],
    }
}

fn message_line(message: &DisplayMessage) -> String {
    let who = if message.mine { "me".to_string() } else { format!("user {}", message.sender_id) };
    let status = match message.status {
        Some(SendStatus::Sending) => " [sending]".to_string(),
        Some(SendStatus::Failed) => format!(" [failed, /retry {}]", message.id),
        Some(SendStatus::Sent) | None => String::new(),
    };
    match &message.attachment {
        Some(path) => format!("{who}: [image {path}]{status}"),
        None => format!("{who}: {}{status}", message.text),
    }
}

fn state_name(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Idle => "idle",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Open => "open",
        ConnectionState::Closed => "closed",
    }
}

fn reason_name(reason: WipeReason) -> &'static str {
    match reason {
        WipeReason::Logout => "logout",
        WipeReason::Requested => "requested",
        WipeReason::Expired => "session expired",
        WipeReason::SessionRejected => "token rejected",
    }
}
