use std::future::Future;

/// Failure of the connection to the coordinating server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// A connect attempt was refused or failed before the session opened.
    ConnectFailed(String),
    /// A connect attempt did not complete within the configured timeout.
    ConnectTimedOut,
    /// An established connection dropped.
    ConnectionLost(String),
    /// A send was attempted while no connection is open.
    NotConnected,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectFailed(e) => write!(f, "connect failed: {e}"),
            Self::ConnectTimedOut => write!(f, "connect timed out"),
            Self::ConnectionLost(e) => write!(f, "connection lost: {e}"),
            Self::NotConnected => write!(f, "not connected"),
        }
    }
}

impl std::error::Error for TransportError {}

/// An open, message-framed connection to the coordinating server.
///
/// `recv` must be cancel-safe: it is polled inside `select!` and dropped
/// whenever another branch wins.
pub trait Transport: Send + Sync + 'static {
    fn send(&mut self, frame: Vec<u8>) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Next inbound frame. `None` means the peer closed the connection.
    fn recv(&mut self) -> impl Future<Output = Option<Result<Vec<u8>, TransportError>>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens transports. Cloned into a spawned task for every attempt.
pub trait Connector: Clone + Send + Sync + 'static {
    type Transport: Transport;

    fn connect(
        &self,
    ) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send + 'static;
}
