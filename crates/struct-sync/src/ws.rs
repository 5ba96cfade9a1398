//! WebSocket push channel.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::emitter::ListenerId;
use crate::error::TransportError;
use crate::transport::{LocalSocket, PushHandler, Socket};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;

/// One push event as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PushFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Parses `{"event": …, "data": …}` or the two-element form `[event, data]`.
pub fn parse_push_frame(text: &str) -> Result<PushFrame, TransportError> {
    let value: Value = serde_json::from_str(text).map_err(|error| TransportError::Decode {
        message: error.to_string(),
    })?;
    match value {
        Value::Array(mut items) if !items.is_empty() && items.len() <= 2 => {
            let data = if items.len() == 2 {
                items.pop().unwrap_or(Value::Null)
            } else {
                Value::Null
            };
            match items.pop() {
                Some(Value::String(event)) => Ok(PushFrame { event, data }),
                _ => Err(TransportError::Decode {
                    message: "push frame event name must be a string".to_string(),
                }),
            }
        }
        other => serde_json::from_value(other).map_err(|error| TransportError::Decode {
            message: error.to_string(),
        }),
    }
}

/// [`Socket`] fed by a WebSocket connection. Incoming frames are dispatched synchronously,
/// in arrival order, to handlers registered through the [`Socket`] interface.
pub struct WsSocket {
    url: Url,
    local: Arc<LocalSocket>,
    writer: tokio::sync::Mutex<Option<WsWriter>>,
    recv_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WsSocket {
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, TransportError> {
        let parsed = Url::parse(url).map_err(|error| TransportError::Socket {
            message: error.to_string(),
        })?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(TransportError::Socket {
                message: format!("URL must use ws:// or wss:// scheme, got: {}", parsed.scheme()),
            });
        }

        let (stream, _response) = timeout(connect_timeout, connect_async(parsed.as_str()))
            .await
            .map_err(|_| TransportError::Socket {
                message: format!("connection timeout after {connect_timeout:?}"),
            })?
            .map_err(|error| TransportError::Socket {
                message: error.to_string(),
            })?;
        info!(url = %parsed, "struct socket connected");

        let (writer, mut reader) = stream.split();
        let local = Arc::new(LocalSocket::new());
        let dispatcher = Arc::clone(&local);
        let socket_url = parsed.to_string();

        let task = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match parse_push_frame(text.as_str()) {
                        Ok(frame) => {
                            dispatcher.dispatch(frame.event.as_str(), &frame.data);
                        }
                        Err(error) => {
                            warn!(url = %socket_url, error = %error, "push frame decode failed");
                        }
                    },
                    Ok(Message::Ping(payload)) => {
                        debug!(url = %socket_url, bytes = payload.len(), "received ping");
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {}
                    Err(error) => {
                        warn!(url = %socket_url, error = %error, "struct socket read error");
                        break;
                    }
                }
            }
            debug!(url = %socket_url, "struct socket reader stopped");
        });

        Ok(Self {
            url: parsed,
            local,
            writer: tokio::sync::Mutex::new(Some(writer)),
            recv_task: Mutex::new(Some(task)),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer
                .send(Message::Close(None))
                .await
                .map_err(|error| TransportError::Socket {
                    message: error.to_string(),
                })?;
        }
        self.stop_reader();
        self.local.close();
        Ok(())
    }

    fn stop_reader(&self) {
        let task = self
            .recv_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Socket for WsSocket {
    fn on(&self, event: &str, handler: PushHandler) -> ListenerId {
        self.local.on(event, handler)
    }

    fn off(&self, event: &str, id: Option<ListenerId>) {
        self.local.off(event, id);
    }
}

impl Drop for WsSocket {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

impl std::fmt::Debug for WsSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsSocket")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}
