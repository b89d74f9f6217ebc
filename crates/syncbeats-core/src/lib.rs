pub mod net;
pub mod room;
pub mod sync;
pub mod time;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use tokio::sync::mpsc;

    use crate::net::messages::{ClientMessage, ServerMessage};
    use crate::net::protocol::{decode_client_message, encode_server_message};
    use crate::net::transport::{Connector, Transport, TransportError};
    use crate::room::{RoomState, Track, TrackKind};
    use crate::time::Clock;

    /// Build a consistent snapshot with `users[0]` as host.
    pub fn room_snapshot(room_code: &str, users: &[&str]) -> RoomState {
        RoomState {
            room_code: room_code.to_string(),
            host_id: users.first().map(|u| u.to_string()).unwrap_or_default(),
            users: users.iter().map(|u| u.to_string()).collect(),
            user_count: users.len() as u32,
            current_track: None,
            is_playing: false,
            current_time: 0.0,
            created_at: 1_700_000_000_000,
        }
    }

    pub fn sample_track() -> Track {
        Track {
            title: "Night Drive".to_string(),
            url: "https://cdn.example.com/night-drive.mp3".to_string(),
            kind: TrackKind::Upload,
            size: Some(4_194_304),
            uploaded_at: Some(1_700_000_000_000),
        }
    }

    /// Wall clock anchored at `epoch_millis` that advances with tokio's
    /// clock, so it stays in step with `start_paused` tests.
    #[derive(Debug, Clone)]
    pub struct TokioClock {
        epoch_millis: u64,
        origin: tokio::time::Instant,
    }

    impl TokioClock {
        pub fn new(epoch_millis: u64) -> Self {
            Self {
                epoch_millis,
                origin: tokio::time::Instant::now(),
            }
        }
    }

    impl Clock for TokioClock {
        fn now_millis(&self) -> u64 {
            self.epoch_millis + self.origin.elapsed().as_millis() as u64
        }
    }

    /// In-memory connector. Every accepted connection hands a [`ServerEnd`]
    /// to the receiver returned by [`ChannelConnector::new`].
    #[derive(Clone)]
    pub struct ChannelConnector {
        attempts: Arc<AtomicU32>,
        refuse: Arc<AtomicU32>,
        accepted: mpsc::UnboundedSender<ServerEnd>,
    }

    impl ChannelConnector {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
            let (accepted, rx) = mpsc::unbounded_channel();
            let connector = Self {
                attempts: Arc::new(AtomicU32::new(0)),
                refuse: Arc::new(AtomicU32::new(0)),
                accepted,
            };
            (connector, rx)
        }

        /// Refuse the next `n` connect attempts.
        pub fn refuse_next(&self, n: u32) {
            self.refuse.store(n, Ordering::SeqCst);
        }

        /// Total connect attempts so far, refused ones included.
        pub fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl Connector for ChannelConnector {
        type Transport = ChannelTransport;

        fn connect(
            &self,
        ) -> impl std::future::Future<Output = Result<ChannelTransport, TransportError>> + Send + 'static
        {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let refused = self
                .refuse
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            let accepted = self.accepted.clone();
            async move {
                if refused {
                    return Err(TransportError::ConnectFailed(
                        "connection refused".to_string(),
                    ));
                }
                let (to_client, from_server) = mpsc::unbounded_channel();
                let (to_server, from_client) = mpsc::unbounded_channel();
                accepted
                    .send(ServerEnd {
                        tx: Some(to_client),
                        rx: from_client,
                    })
                    .map_err(|_| TransportError::ConnectFailed("server gone".to_string()))?;
                Ok(ChannelTransport {
                    tx: to_server,
                    rx: from_server,
                })
            }
        }
    }

    pub struct ChannelTransport {
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: mpsc::UnboundedReceiver<Result<Vec<u8>, TransportError>>,
    }

    impl Transport for ChannelTransport {
        async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
            self.tx
                .send(frame)
                .map_err(|_| TransportError::ConnectionLost("server end dropped".to_string()))
        }

        async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
            self.rx.recv().await
        }

        async fn close(&mut self) {
            self.rx.close();
        }
    }

    /// The server's side of an in-memory connection.
    pub struct ServerEnd {
        tx: Option<mpsc::UnboundedSender<Result<Vec<u8>, TransportError>>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
    }

    impl ServerEnd {
        pub fn send(&self, msg: &ServerMessage) {
            let frame = encode_server_message(msg).expect("encode server message");
            if let Some(tx) = &self.tx {
                let _ = tx.send(Ok(frame));
            }
        }

        /// Push raw bytes, e.g. a malformed frame.
        pub fn send_raw(&self, frame: Vec<u8>) {
            if let Some(tx) = &self.tx {
                let _ = tx.send(Ok(frame));
            }
        }

        /// Next request from the client, or `None` once it hung up.
        pub async fn recv(&mut self) -> Option<ClientMessage> {
            let frame = self.rx.recv().await?;
            Some(decode_client_message(&frame).expect("decode client message"))
        }

        /// Next request from the client, panicking after 5 seconds.
        pub async fn expect_request(&mut self) -> ClientMessage {
            tokio::time::timeout(Duration::from_secs(5), self.recv())
                .await
                .expect("timed out waiting for client request")
                .expect("client hung up")
        }

        /// A request already queued, without waiting.
        pub fn try_recv(&mut self) -> Option<ClientMessage> {
            let frame = self.rx.try_recv().ok()?;
            Some(decode_client_message(&frame).expect("decode client message"))
        }

        /// Close from the server side: the client sees a clean peer close.
        pub fn close(&mut self) {
            self.tx = None;
        }

        /// Break the connection: the client sees a network error.
        pub fn fail(&mut self, reason: &str) {
            if let Some(tx) = self.tx.take() {
                let _ = tx.send(Err(TransportError::ConnectionLost(reason.to_string())));
            }
        }
    }
}
