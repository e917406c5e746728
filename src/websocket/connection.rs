use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::auth::Identity;
use crate::config::ChatConfig;
use crate::db::{MessageStore, NewMessage};
use crate::error::{ChatError, DatabaseError};
use crate::websocket::hub::HubHandle;
use crate::websocket::protocol::{decode_frame, ChatMessage, ClientRequest};

/// The hub's reference to a live connection: where to deliver, and how to
/// tell it to shut down.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    identity: Identity,
    inbox: mpsc::Sender<ChatMessage>,
    done: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(identity: Identity, inbox: mpsc::Sender<ChatMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            inbox,
            done: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn inbox(&self) -> &mpsc::Sender<ChatMessage> {
        &self.inbox
    }

    /// Asks both loops to stop. Safe to call any number of times.
    pub fn signal_done(&self) {
        self.done.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    async fn done(&self) {
        self.done.cancelled().await
    }
}

/// One authenticated socket bridged to the hub.
pub struct Connection<S> {
    handle: ConnectionHandle,
    socket: WebSocketStream<S>,
    inbox: mpsc::Receiver<ChatMessage>,
    hub: HubHandle,
    store: Arc<dyn MessageStore>,
    config: ChatConfig,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        identity: Identity,
        socket: WebSocketStream<S>,
        hub: HubHandle,
        store: Arc<dyn MessageStore>,
        config: &ChatConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.inbox_capacity);
        Self {
            handle: ConnectionHandle::new(identity, tx),
            socket,
            inbox: rx,
            hub,
            store,
            config: config.clone(),
        }
    }

    /// Registers with the hub and drives the socket until either side fails,
    /// the peer closes, or the hub evicts this connection. Unregistration and
    /// socket close happen exactly once, after both loops have ended.
    pub async fn run(self) {
        let Connection { handle, socket, inbox, hub, store, config } = self;
        let identity = handle.identity();

        if let Err(e) = hub.register(handle.clone()).await {
            error!("Could not register {}: {}", identity, e);
            return;
        }

        let (sink, stream) = socket.split();
        let mut delivery = tokio::spawn(delivery_loop(
            sink,
            inbox,
            handle.clone(),
            hub.clone(),
            config.heartbeat_interval(),
            config.write_timeout(),
        ));

        let reading = read_loop(stream, &handle, &hub, store.as_ref(), &config);
        tokio::pin!(reading);

        // Whichever loop ends first stops the other one
        let sink = tokio::select! {
            _ = &mut reading => {
                handle.signal_done();
                delivery.await
            }
            finished = &mut delivery => {
                handle.signal_done();
                reading.as_mut().await;
                finished
            }
        };

        if let Err(e) = hub.unregister(&handle).await {
            error!("Could not unregister {}: {}", identity, e);
        }

        match sink {
            Ok(mut sink) => {
                if let Ok(Err(e)) = timeout(config.write_timeout(), sink.close()).await {
                    debug!("Error closing socket of {}: {}", identity, e);
                }
            }
            Err(e) => error!("Delivery task of {} failed: {}", identity, e),
        }

        info!("Connection {} of {} closed", handle.id(), identity);
    }
}

/// Writes queued messages and heartbeats to the socket.
async fn delivery_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut inbox: mpsc::Receiver<ChatMessage>,
    handle: ConnectionHandle,
    hub: HubHandle,
    heartbeat_interval: Duration,
    write_timeout: Duration,
) -> SplitSink<WebSocketStream<S>, Message>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut heartbeat = interval(heartbeat_interval);
    // The first tick completes immediately
    heartbeat.tick().await;

    loop {
        let frame = tokio::select! {
            _ = handle.done() => break,
            queued = inbox.recv() => match queued {
                Some(message) => match serde_json::to_string(&message) {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        hub.report_error(e.into()).await;
                        handle.signal_done();
                        break;
                    }
                },
                None => break,
            },
            _ = heartbeat.tick() => Message::Ping(Vec::new()),
        };

        let written = match timeout(write_timeout, sink.send(frame)).await {
            Ok(result) => result.map_err(ChatError::from),
            Err(_) => Err(ChatError::WriteTimeout(write_timeout)),
        };

        if let Err(e) = written {
            hub.report_error(e).await;
            handle.signal_done();
            break;
        }
    }

    sink
}

/// Reads client frames, storing and routing every chat message. Any error
/// ends the connection.
async fn read_loop<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    handle: &ConnectionHandle,
    hub: &HubHandle,
    store: &dyn MessageStore,
    config: &ChatConfig,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let identity = handle.identity();
    let idle_timeout = config.idle_timeout();
    let store_timeout = config.store_timeout();

    loop {
        let next = tokio::select! {
            _ = handle.done() => return,
            next = timeout(idle_timeout, stream.next()) => next,
        };

        let result = match next {
            Err(_) => Err(ChatError::IdleTimeout(idle_timeout)),
            Ok(None) => {
                info!("Socket of {} ended", identity);
                return;
            }
            Ok(Some(Err(e))) => Err(ChatError::from(e)),
            Ok(Some(Ok(Message::Text(text)))) => {
                handle_frame(text.as_bytes(), identity, hub, store, store_timeout).await
            }
            Ok(Some(Ok(Message::Binary(bytes)))) => {
                handle_frame(&bytes, identity, hub, store, store_timeout).await
            }
            Ok(Some(Ok(Message::Close(reason)))) => {
                info!("{} closed the connection: {:?}", identity, reason);
                return;
            }
            // Pings are answered by the protocol layer, pongs only reset the idle timer
            Ok(Some(Ok(_))) => Ok(()),
        };

        if let Err(e) = result {
            hub.report_error(e).await;
            handle.signal_done();
            return;
        }
    }
}

async fn handle_frame(
    bytes: &[u8],
    sender: Identity,
    hub: &HubHandle,
    store: &dyn MessageStore,
    store_timeout: Duration,
) -> Result<(), ChatError> {
    match decode_frame(bytes)? {
        ClientRequest::Ignored(kind) => {
            debug!("Ignoring '{}' envelope from {}", kind, sender);
            Ok(())
        }
        ClientRequest::Send(incoming) => {
            let new_message = NewMessage::from_incoming(incoming, sender);

            let receipt = timeout(store_timeout, store.create_message(&new_message))
                .await
                .map_err(|_| DatabaseError::Timeout(store_timeout))??;

            hub.route(ChatMessage::from_receipt(new_message, receipt)).await
        }
    }
}
