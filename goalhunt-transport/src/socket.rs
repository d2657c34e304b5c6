use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use goalhunt_logic::{
    ClientEvent, ConnectionHandle, ConnectionState, ConnectionTracker, EventHandler,
    HandlerRegistry, ServerEventKind, Transport,
};
use log::{debug, error, info, warn};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream,
    tungstenite::{Error as WsError, Message},
};
use tokio_util::sync::CancellationToken;

use crate::frames::{self, FrameEncoding};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Queue<T> = (mpsc::Sender<T>, tokio::sync::Mutex<mpsc::Receiver<T>>);

#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Base wait between connection attempts
    pub retry_interval: Duration,
    /// Upper bound of the random delay added to each wait
    pub retry_jitter: Duration,
    pub encoding: FrameEncoding,
    /// Outbound events that can wait for the socket before new ones get dropped
    pub outgoing_capacity: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(2),
            retry_jitter: Duration::from_millis(500),
            encoding: FrameEncoding::Json,
            outgoing_capacity: 15,
        }
    }
}

impl TransportSettings {
    fn retry_delay(&self) -> Duration {
        let jitter = self.retry_jitter.as_millis() as u64;
        let jitter = if jitter == 0 {
            0
        } else {
            rand::random_range(0..=jitter)
        };
        self.retry_interval + Duration::from_millis(jitter)
    }
}

/// [Transport] over a WebSocket, reconnecting whenever the link drops until
/// [Transport::disconnect] is called.
pub struct WebSocketTransport {
    shared: Arc<Shared>,
}

struct Shared {
    settings: TransportSettings,
    connection: ConnectionTracker,
    handlers: HandlerRegistry,
    outgoing: Queue<ClientEvent>,
    /// Set while a connection loop is running
    cancel: Mutex<Option<CancellationToken>>,
}

impl WebSocketTransport {
    pub fn new(settings: TransportSettings) -> Self {
        let (tx, rx) = mpsc::channel(settings.outgoing_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                settings,
                connection: ConnectionTracker::default(),
                handlers: HandlerRegistry::default(),
                outgoing: (tx, tokio::sync::Mutex::new(rx)),
                cancel: Mutex::new(None),
            }),
        }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(TransportSettings::default())
    }
}

impl Shared {
    async fn connection_loop(self: Arc<Self>, address: String, cancel: CancellationToken) {
        loop {
            let attempt = tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                res = tokio_tungstenite::connect_async(address.as_str()) => res,
            };

            match attempt {
                Ok((socket, _)) => {
                    info!("Connected to {address}");
                    self.drop_stale_outgoing().await;
                    if !self.set_state_if_live(&cancel, ConnectionState::Connected) {
                        break;
                    }

                    let res = self.run_socket(socket, &cancel).await;

                    if cancel.is_cancelled() {
                        break;
                    }

                    match res {
                        Ok(()) => warn!("Server closed the connection"),
                        Err(why) => warn!("Connection to {address} lost: {why}"),
                    }
                }
                Err(why) => warn!("Failed to connect to {address}: {why}"),
            }

            if !self.set_state_if_live(&cancel, ConnectionState::Connecting) {
                break;
            }

            let delay = self.settings.retry_delay();
            debug!("Retrying in {}ms", delay.as_millis());
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        // A connect after the stop already owns the state
        let current = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_none() {
            self.connection.set(ConnectionState::Disconnected);
        }
        drop(current);

        debug!("Connection loop for {address} stopped");
    }

    /// Publish `state` unless this loop has been stopped. Holds the same lock as [Shared::stop]
    /// so a stop can never be overwritten.
    fn set_state_if_live(&self, cancel: &CancellationToken, state: ConnectionState) -> bool {
        let _guard = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if cancel.is_cancelled() {
            return false;
        }
        self.connection.set(state);
        true
    }

    /// Sends that raced a previous link going down are dropped, not replayed
    async fn drop_stale_outgoing(&self) {
        let mut rx = self.outgoing.1.lock().await;
        let mut stale = 0;
        while rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!("Dropped {stale} stale outgoing events");
        }
    }

    async fn run_socket(&self, socket: Socket, cancel: &CancellationToken) -> Result<(), WsError> {
        let (mut sink, mut stream) = socket.split();
        let mut outgoing = self.outgoing.1.lock().await;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    sink.close().await.ok();
                    break Ok(());
                }

                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Close(_))) | None => break Ok(()),
                        Some(Ok(frame)) => self.handle_frame(&frame),
                        Some(Err(why)) => break Err(why),
                    }
                }

                Some(event) = outgoing.recv() => {
                    match frames::encode(&event, self.settings.encoding) {
                        Ok(frame) => {
                            if let Err(why) = sink.send(frame).await {
                                break Err(why);
                            }
                        }
                        Err(why) => error!("Error encoding {}: {why}", event.name()),
                    }
                }
            }
        }
    }

    fn handle_frame(&self, frame: &Message) {
        match frames::decode(frame) {
            Ok(Some(event)) => {
                if self.handlers.dispatch(&event) == 0 {
                    debug!("No handlers for {:?}", event.kind());
                }
            }
            Ok(None) => {}
            Err(why) => warn!("Dropping invalid frame: {why}"),
        }
    }

    fn stop(&self) {
        let mut cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = cancel.take() {
            info!("Disconnecting");
            token.cancel();
        }
        self.connection.set(ConnectionState::Disconnected);
        drop(cancel);

        self.handlers.clear();
    }
}

impl Transport for WebSocketTransport {
    fn connect(&self, address: &str) -> ConnectionHandle {
        let mut cancel = self
            .shared
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if cancel.is_some() {
            debug!("Already connecting, not opening a second connection");
            return self.shared.connection.handle();
        }

        let token = CancellationToken::new();
        *cancel = Some(token.clone());
        info!("Connecting to {address}");
        self.shared.connection.set(ConnectionState::Connecting);
        drop(cancel);

        let handle = self.shared.connection.handle();

        tokio::spawn({
            let shared = self.shared.clone();
            let address = address.to_string();
            async move {
                shared.connection_loop(address, token).await;
            }
        });

        handle
    }

    fn handle(&self) -> ConnectionHandle {
        self.shared.connection.handle()
    }

    async fn send(&self, event: ClientEvent) {
        if !self.shared.connection.is_connected() {
            debug!("Not connected, dropping {}", event.name());
            return;
        }

        if let Err(why) = self.shared.outgoing.0.try_send(event) {
            warn!("Dropping {}: {why}", event.name());
        }
    }

    fn on(&self, kind: ServerEventKind, handler: EventHandler) {
        self.shared.handlers.register(kind, handler);
    }

    fn disconnect(&self) {
        self.shared.stop();
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.shared.stop();
    }
}
