//! The streaming connection under a session.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, protocol::CloseFrame},
};
use tracing::{debug, warn};

use crate::error::{TransportError, TransportResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A single bidirectional WebSocket connection yielding text frames.
pub struct WsTransport {
    url: String,
    stream: WsStream,
    max_message_size: usize,
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport").field("url", &self.url).finish()
    }
}

impl WsTransport {
    /// Open a connection to `url`.
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        max_message_size: usize,
    ) -> TransportResult<Self> {
        let (stream, _response) = timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| TransportError::timeout(connect_timeout))??;
        debug!(%url, "WebSocket connected");

        Ok(Self {
            url: url.to_string(),
            stream,
            max_message_size,
        })
    }

    /// The URL this connection was opened against.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Wait for the next text payload.
    ///
    /// Control frames are consumed here. A close frame or a read error is
    /// returned as an error; `None` means the stream ended without one.
    pub async fn next_text(&mut self) -> Option<TransportResult<String>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(err) => return Some(Err(err.into())),
            };

            let size = match &message {
                Message::Text(text) => text.len(),
                Message::Binary(data) => data.len(),
                _ => 0,
            };
            if self.max_message_size > 0 && size > self.max_message_size {
                warn!(
                    size,
                    max = self.max_message_size,
                    "Dropping oversized WebSocket message"
                );
                continue;
            }

            match message {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => warn!(len = data.len(), "Dropping non-UTF-8 binary frame"),
                },
                Message::Close(frame) => {
                    return Some(Err(TransportError::connection_closed(
                        frame.map(describe_close),
                    )));
                }
                // tungstenite answers pings itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    /// Close the connection, ignoring errors from an already-dead peer.
    pub async fn close(mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(error = %err, url = %self.url, "Error while closing WebSocket");
        }
    }
}

fn describe_close(frame: CloseFrame) -> String {
    if frame.reason.is_empty() {
        frame.code.to_string()
    } else {
        format!("{} {}", frame.code, frame.reason)
    }
}
