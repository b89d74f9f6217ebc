//! WebSocket transport to the coordinating server. Every protocol message
//! travels as one binary frame.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use syncbeats_core::net::transport::{Connector, Transport, TransportError};

/// Opens a WebSocket to `url` for every connect attempt.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    fn connect(
        &self,
    ) -> impl Future<Output = Result<WsTransport, TransportError>> + Send + 'static {
        let url = self.url.clone();
        async move {
            let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
            tracing::debug!(%url, "WebSocket open");
            Ok(WsTransport { stream })
        }
    }
}

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Transport for WsTransport {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.stream
            .send(Message::Binary(frame.into()))
            .await
            .map_err(|e| TransportError::ConnectionLost(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Binary(data)) => return Some(Ok(data.to_vec())),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "Server closed the WebSocket");
                    return None;
                },
                // Ping/pong is answered by tungstenite; text is not part of the protocol.
                Ok(_) => continue,
                Err(e) => return Some(Err(TransportError::ConnectionLost(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "WebSocket close failed");
        }
    }
}
