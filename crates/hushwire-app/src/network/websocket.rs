//! Event stream driver over WebSocket.
//!
//! The socket is split: reads happen in [`WsConnection::next_event`], writes
//! go through a channel to a writer task so the panic wipe can close the
//! socket from any thread.

use std::{future::Future, sync::Arc};

use futures::{SinkExt, StreamExt, stream::SplitStream};
use hushwire_core::{ConnectionError, TrackedConnection};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self, Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tracing::{debug, warn};

use crate::driver::{CLOSE_ABNORMAL, Transport, TransportConnection, TransportEvent};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code for a close frame that carried none.
const CLOSE_NO_STATUS: u16 = 1005;

/// [`Transport`] over tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

impl WsTransport {
    /// New transport.
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WsTransport {
    type Connection = WsConnection;

    fn connect(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<Self::Connection, ConnectionError>> + Send {
        let url = url.to_string();
        async move {
            let (socket, _) = connect_async(url.as_str()).await.map_err(handshake_error)?;
            Ok(WsConnection::new(socket))
        }
    }
}

fn handshake_error(err: tungstenite::Error) -> ConnectionError {
    match err {
        tungstenite::Error::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            ConnectionError::Unauthorized { reason: format!("handshake {}", response.status()) }
        },
        other => ConnectionError::Transport(other.to_string()),
    }
}

/// One open WebSocket.
pub struct WsConnection {
    reader: SplitStream<Socket>,
    outgoing: mpsc::UnboundedSender<Message>,
}

impl WsConnection {
    fn new(socket: Socket) -> Self {
        let (mut writer, reader) = socket.split();
        let (outgoing, mut rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = writer.send(message).await {
                    debug!(error = %e, "websocket write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        Self { reader, outgoing }
    }
}

impl TransportConnection for WsConnection {
    fn next_event(&mut self) -> impl Future<Output = Option<TransportEvent>> + Send {
        async move {
            loop {
                let message = match self.reader.next().await? {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(error = %e, "websocket read failed");
                        return Some(TransportEvent::Closed {
                            code: CLOSE_ABNORMAL,
                            reason: e.to_string(),
                        });
                    },
                };

                match message {
                    Message::Text(text) => return Some(TransportEvent::Frame(text.to_string())),
                    Message::Close(frame) => {
                        let (code, reason) = frame.map_or((CLOSE_NO_STATUS, String::new()), |f| {
                            (u16::from(f.code), f.reason.to_string())
                        });
                        return Some(TransportEvent::Closed { code, reason });
                    },
                    Message::Ping(payload) => {
                        let _ = self.outgoing.send(Message::Pong(payload));
                    },
                    Message::Binary(_) | Message::Pong(_) | Message::Frame(_) => {},
                }
            }
        }
    }

    fn close(&mut self, code: u16, reason: &str) -> impl Future<Output = ()> + Send {
        let _ = self.outgoing.send(close_message(code, reason));
        async {}
    }

    fn closer(&self) -> Arc<dyn TrackedConnection> {
        Arc::new(WsCloser { outgoing: self.outgoing.clone() })
    }
}

struct WsCloser {
    outgoing: mpsc::UnboundedSender<Message>,
}

impl TrackedConnection for WsCloser {
    fn force_close(&self, code: u16, reason: &str) {
        let _ = self.outgoing.send(close_message(code, reason));
    }
}

fn close_message(code: u16, reason: &str) -> Message {
    let frame = CloseFrame { code: CloseCode::from(code), reason: reason.to_string().into() };
    Message::Close(Some(frame))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_frame_carries_code() {
        let Message::Close(Some(frame)) = close_message(4000, "panic wipe") else {
            panic!("expected close frame");
        };
        assert_eq!(u16::from(frame.code), 4000);
        assert_eq!(frame.reason, "panic wipe");
    }

    #[test]
    fn refused_handshake_is_unauthorized() {
        let response = tungstenite::http::Response::builder().status(401).body(None).unwrap();
        let err = handshake_error(tungstenite::Error::Http(response));
        assert!(err.is_auth());
    }

    #[test]
    fn other_handshake_errors_are_transport() {
        let err = handshake_error(tungstenite::Error::ConnectionClosed);
        assert!(matches!(err, ConnectionError::Transport(_)));
    }
}
