//! Headless hushwire client.
//!
//! # Usage
//!
//! ```bash
//! # Log in right away
//! hushwire --token "$TOKEN" --user-id 7
//!
//! # Point at another server and keep state in a scratch directory
//! hushwire --api-url https://chat.example --ws-url wss://chat.example --data-dir /tmp/hw
//! ```
//!
//! Lines read from stdin are commands (`/login`, `/chat 42`, `/request 7 ab12`,
//! `/quit`, ...) or messages for the open chat. Events are printed to stdout, logs go to stderr.

mod commands;
mod render;

use std::{io::Write, path::PathBuf};

use clap::Parser;
use commands::LineCommand;
use hushwire_app::{
    ClientConfig, Command, FilePlatform, Runtime, SystemEnv,
    network::{HttpApi, WsTransport},
};
use hushwire_core::ChatId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Hushwire end-to-end encrypted chat client
#[derive(Parser, Debug)]
#[command(name = "hushwire")]
#[command(about = "Headless client for hushwire encrypted chat")]
#[command(version)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// REST base URL (overrides the config file)
    #[arg(long)]
    api_url: Option<String>,

    /// WebSocket base URL (overrides the config file)
    #[arg(long)]
    ws_url: Option<String>,

    /// Directory for persisted state (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Bearer token to log in with at startup
    #[arg(long, requires = "user_id")]
    token: Option<String>,

    /// Own user id, required with --token
    #[arg(long)]
    user_id: Option<u64>,

    /// Unix time at which the login expires
    #[arg(long)]
    expires_at: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn client_config(&self) -> Result<ClientConfig, hushwire_app::RuntimeError> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)?,
            None => ClientConfig::default(),
        };
        if let Some(url) = &self.api_url {
            config.api_base_url.clone_from(url);
        }
        if let Some(url) = &self.ws_url {
            config.ws_base_url.clone_from(url);
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = Some(dir.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = args.client_config()?;
    let data_dir = config.resolve_data_dir()?;
    tracing::info!(data_dir = %data_dir.display(), api = %config.api_base_url, "hushwire starting");

    let platform = FilePlatform::new(&data_dir);
    let api = HttpApi::new(&config.api_base_url)?;
    let (runtime, mut handle) =
        Runtime::new(config, SystemEnv::new(), WsTransport::new(), api, platform.store(), platform);
    let runtime_task = tokio::spawn(runtime.run());

    if let (Some(token), Some(user_id)) = (args.token.clone(), args.user_id) {
        handle.send(Command::Login { token, user_id, expires_at: args.expires_at }).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut active: Option<ChatId> = None;
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    stdin_open = false;
                    handle.send(Command::Quit).await;
                    continue;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match to_command(commands::parse(&line), &mut active) {
                    Ok(command) => {
                        let quit = command == Command::Quit;
                        handle.send(command).await;
                        if quit {
                            stdin_open = false;
                        }
                    },
                    Err(message) => writeln!(std::io::stdout(), "{message}")?,
                }
            },
            event = handle.next_event() => {
                let Some(event) = event else { break };
                let mut out = std::io::stdout().lock();
                for line in render::render(&event) {
                    writeln!(out, "{line}")?;
                }
            },
        }
    }

    runtime_task.await??;
    tracing::info!("hushwire stopped");
    Ok(())
}

/// Map a parsed line onto a runtime command, tracking the open chat.
fn to_command(line: LineCommand, active: &mut Option<ChatId>) -> Result<Command, String> {
    if let Some((text, message_type)) = line.message() {
        let chat_id = active.ok_or("no open chat, use /chat <id>")?;
        return Ok(Command::Send { chat_id, text, message_type });
    }

    match line {
        LineCommand::Login { token, user_id, expires_at } => {
            Ok(Command::Login { token, user_id, expires_at })
        },
        LineCommand::Renew { token, expires_at } => Ok(Command::Renew { token, expires_at }),
        LineCommand::Logout => {
            *active = None;
            Ok(Command::Logout)
        },
        LineCommand::Open { chat_id } => {
            *active = Some(chat_id);
            Ok(Command::SelectChat(Some(chat_id)))
        },
        LineCommand::Close => {
            *active = None;
            Ok(Command::SelectChat(None))
        },
        LineCommand::Retry { temp_id } => Ok(Command::Resubmit(temp_id)),
        LineCommand::Session { peer_public_key } => {
            let chat_id = active.ok_or("no open chat, use /chat <id>")?;
            Ok(Command::EstablishSession { chat_id, peer_public_key })
        },
        LineCommand::Refresh => Ok(Command::Refresh),
        LineCommand::Search { query } => Ok(Command::SearchUsers { query }),
        LineCommand::Request { user_id, code } => Ok(Command::RequestChat { user_id, code }),
        LineCommand::Accept { request_id, code } => Ok(Command::AcceptRequest { request_id, code }),
        LineCommand::Verify { code } => {
            let chat_id = active.ok_or("no open chat, use /chat <id>")?;
            Ok(Command::VerifyChat { chat_id, code })
        },
        LineCommand::Clear => {
            let chat_id = active.ok_or("no open chat, use /chat <id>")?;
            Ok(Command::ClearChat(chat_id))
        },
        LineCommand::Delete => {
            let chat_id = active.ok_or("no open chat, use /chat <id>")?;
            Ok(Command::DeleteChat(chat_id))
        },
        LineCommand::Wipe => {
            *active = None;
            Ok(Command::Wipe)
        },
        LineCommand::Quit => Ok(Command::Quit),
        LineCommand::Unknown { input } => Err(format!("unknown command: {input}")),
        LineCommand::InvalidArgs { command, error } => Err(format!("/{command}: {error}")),
        LineCommand::Message { .. } | LineCommand::Image { .. } => {
            Err("message without text".to_string())
        },
    }
}

#[cfg(test)]
mod tests {
    use hushwire_core::MessageType;

    use super::*;

    #[test]
    fn message_needs_open_chat() {
        let mut active = None;
        assert!(to_command(commands::parse("hello"), &mut active).is_err());

        to_command(commands::parse("/chat 42"), &mut active).unwrap();
        assert_eq!(active, Some(42));
        assert_eq!(
            to_command(commands::parse("hello"), &mut active).unwrap(),
            Command::Send { chat_id: 42, text: "hello".into(), message_type: MessageType::Text }
        );
    }

    #[test]
    fn chat_actions_target_open_chat() {
        let mut active = None;
        assert!(to_command(commands::parse("/verify ab12"), &mut active).is_err());
        assert!(to_command(commands::parse("/delete"), &mut active).is_err());

        active = Some(42);
        assert_eq!(
            to_command(commands::parse("/verify ab12"), &mut active).unwrap(),
            Command::VerifyChat { chat_id: 42, code: "ab12".into() }
        );
        assert_eq!(
            to_command(commands::parse("/clear"), &mut active).unwrap(),
            Command::ClearChat(42)
        );
        assert_eq!(
            to_command(commands::parse("/delete"), &mut active).unwrap(),
            Command::DeleteChat(42)
        );
        assert_eq!(
            to_command(commands::parse("/request 7 ab12"), &mut active).unwrap(),
            Command::RequestChat { user_id: 7, code: "ab12".into() }
        );
    }

    #[test]
    fn wipe_forgets_open_chat() {
        let mut active = Some(42);
        assert_eq!(to_command(commands::parse("/wipe"), &mut active).unwrap(), Command::Wipe);
        assert_eq!(active, None);
    }

    #[test]
    fn args_override_config() {
        let args = Args::parse_from([
            "hushwire",
            "--ws-url",
            "wss://chat.example",
            "--data-dir",
            "/tmp/hw",
        ]);
        let config = args.client_config().unwrap();
        assert_eq!(config.ws_base_url, "wss://chat.example");
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/hw")));
        assert_eq!(config.api_base_url, ClientConfig::default().api_base_url);
    }
}
