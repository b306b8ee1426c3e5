//! WebSocket connector - thin client over `tokio-tungstenite`.

use super::{Connector, Socket};
use crate::error::TransportError;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens real WebSocket connections. `wss://` URLs need the `tls` feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn Socket>, TransportError> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        debug!(status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(WebSocket { stream }))
    }
}

struct WebSocket {
    stream: WsStream,
}

#[async_trait]
impl Socket for WebSocket {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "WebSocket close frame");
                    return None;
                }
                // Binary and control frames carry nothing routable.
                Ok(_) => continue,
                Err(e) => return Some(Err(TransportError::ReceiveFailed(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "WebSocket close failed");
        }
    }
}
