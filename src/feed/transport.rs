//! Transport seam between the stream client and the network.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// One inbound unit from an open connection
#[derive(Clone, Debug, PartialEq)]
pub enum FeedFrame {
    Text(String),
    /// Frame that cannot carry a feed message (e.g. non-UTF-8 binary);
    /// dropped without affecting the connection
    Invalid(String),
    /// Peer closed the connection; `clean` for a normal close code
    Closed { clean: bool },
    Error(String),
}

/// An open feed connection
#[async_trait]
pub trait FeedConnection: Send {
    /// Next frame; a closed connection yields `Closed` (end of stream is
    /// reported as an abnormal close)
    async fn next_frame(&mut self) -> FeedFrame;

    /// Close from our side; errors are ignored
    async fn close(&mut self);
}

/// Opens feed connections
#[async_trait]
pub trait FeedTransport: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Box<dyn FeedConnection>>;
}

/// WebSocket transport over tokio-tungstenite
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl FeedTransport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn FeedConnection>> {
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .with_context(|| format!("Failed to connect to feed at {}", url))?;

        debug!(status = %response.status(), "Feed WebSocket handshake complete");

        Ok(Box::new(WebSocketConnection { stream }))
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FeedConnection for WebSocketConnection {
    async fn next_frame(&mut self) -> FeedFrame {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return FeedFrame::Text(text.to_string()),
                Some(Ok(Message::Binary(bytes))) => return binary_frame(bytes.into()),
                Some(Ok(Message::Close(frame))) => {
                    let clean = frame
                        .map(|f| f.code == CloseCode::Normal)
                        .unwrap_or(false);
                    return FeedFrame::Closed { clean };
                }
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => return FeedFrame::Error(e.to_string()),
                None => return FeedFrame::Closed { clean: false },
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
        let _ = self.stream.flush().await;
    }
}

/// Binary frames are accepted only when they hold UTF-8 text
pub(crate) fn binary_frame(bytes: Vec<u8>) -> FeedFrame {
    match String::from_utf8(bytes) {
        Ok(text) => FeedFrame::Text(text),
        Err(e) => FeedFrame::Invalid(format!("binary frame is not UTF-8: {}", e)),
    }
}
