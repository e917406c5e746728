//! Single owner of the live connection registry.
//!
//! Every registration, removal and routing decision runs on the hub task, fed
//! through one bounded queue. Nothing else ever touches the registry, so it
//! needs no lock.

use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::Identity;
use crate::error::ChatError;
use crate::websocket::connection::ConnectionHandle;
use crate::websocket::protocol::ChatMessage;

#[derive(Debug)]
enum HubEvent {
    Register(ConnectionHandle),
    Unregister { id: Uuid, identity: Identity },
    Route(ChatMessage),
    Error(ChatError),
    Online(oneshot::Sender<Vec<Identity>>),
}

/// Outcome of a single routing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Delivered,
    /// Recipient has no live connection; the message stays in the store only.
    Offline,
    /// Recipient's inbox was full or gone and the connection was dropped.
    Disconnected,
}

pub struct Hub {
    connections: HashMap<Identity, ConnectionHandle>,
    events: mpsc::Receiver<HubEvent>,
}

impl Hub {
    pub fn new(capacity: usize) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(capacity);
        let hub = Self {
            connections: HashMap::new(),
            events: rx,
        };
        (hub, HubHandle { tx })
    }

    /// Starts the hub loop on the current runtime.
    pub fn spawn(capacity: usize) -> HubHandle {
        let (hub, handle) = Self::new(capacity);
        tokio::spawn(hub.run());
        handle
    }

    /// Processes events until every [`HubHandle`] is dropped.
    pub async fn run(mut self) {
        info!("Chat hub listening for events");
        while let Some(event) = self.events.recv().await {
            self.handle_event(event);
        }
        info!("Chat hub stopped, {} connections left", self.connections.len());
    }

    fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register(connection) => self.register(connection),
            HubEvent::Unregister { id, identity } => {
                self.unregister(id, identity);
            }
            HubEvent::Route(message) => {
                let (id, recipient) = (message.id, message.recipient());
                if self.route(message) != Delivery::Delivered {
                    debug!("Message {} stored for {} but not delivered", id, recipient);
                }
            }
            HubEvent::Error(err) => error!("WS error: {}", err),
            HubEvent::Online(reply) => {
                let _ = reply.send(self.connections.keys().copied().collect());
            }
        }
    }

    fn register(&mut self, connection: ConnectionHandle) {
        let identity = connection.identity();
        let id = connection.id();

        if let Some(previous) = self.connections.insert(identity, connection) {
            if previous.id() != id {
                warn!(
                    "{} reconnected, closing previous connection {}",
                    identity,
                    previous.id()
                );
                previous.signal_done();
            }
        }

        info!(
            "{} added to hub (connection {}), {} online",
            identity,
            id,
            self.connections.len()
        );
    }

    /// Removes `identity` only while it is still bound to connection `id`.
    fn unregister(&mut self, id: Uuid, identity: Identity) -> bool {
        match self.connections.get(&identity) {
            Some(current) if current.id() == id => {
                self.connections.remove(&identity);
                info!(
                    "{} removed from hub (connection {}), {} online",
                    identity,
                    id,
                    self.connections.len()
                );
                true
            }
            _ => false,
        }
    }

    fn route(&mut self, message: ChatMessage) -> Delivery {
        let recipient = message.recipient();
        let message_id = message.id;

        let connection = match self.connections.get(&recipient) {
            Some(connection) => connection,
            None => {
                info!("{} is offline, message {} not delivered", recipient, message_id);
                return Delivery::Offline;
            }
        };

        match connection.inbox().try_send(message) {
            Ok(()) => {
                info!("Message {} to {} is sent", message_id, recipient);
                Delivery::Delivered
            }
            Err(TrySendError::Full(_)) => {
                let err = ChatError::SlowConsumer(recipient.to_string());
                warn!("{} (message {})", err, message_id);
                connection.signal_done();
                self.connections.remove(&recipient);
                Delivery::Disconnected
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Connection of {} is gone, message {} not delivered", recipient, message_id);
                connection.signal_done();
                self.connections.remove(&recipient);
                Delivery::Disconnected
            }
        }
    }
}

/// Cheap, cloneable entry point into the hub loop.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    async fn send(&self, event: HubEvent) -> Result<(), ChatError> {
        self.tx.send(event).await.map_err(|_| ChatError::HubClosed)
    }

    /// Queues `connection` for registration. It becomes routable once the hub
    /// has processed the event.
    pub async fn register(&self, connection: ConnectionHandle) -> Result<(), ChatError> {
        self.send(HubEvent::Register(connection)).await
    }

    pub async fn unregister(&self, connection: &ConnectionHandle) -> Result<(), ChatError> {
        self.send(HubEvent::Unregister {
            id: connection.id(),
            identity: connection.identity(),
        })
        .await
    }

    /// Queues a delivery attempt. The message must already be stored.
    pub async fn route(&self, message: ChatMessage) -> Result<(), ChatError> {
        self.send(HubEvent::Route(message)).await
    }

    pub async fn report_error(&self, err: ChatError) {
        if let Err(e) = self.send(HubEvent::Error(err)).await {
            error!("Could not report connection error: {}", e);
        }
    }

    /// Identities online once every previously queued event has been handled.
    pub async fn online(&self) -> Result<Vec<Identity>, ChatError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubEvent::Online(tx)).await?;
        rx.await.map_err(|_| ChatError::HubClosed)
    }

    pub async fn online_count(&self) -> Result<usize, ChatError> {
        Ok(self.online().await?.len())
    }

    pub async fn is_online(&self, identity: Identity) -> Result<bool, ChatError> {
        Ok(self.online().await?.contains(&identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message_to_trainer(id: i64, user_id: i64, trainer_id: i64) -> ChatMessage {
        ChatMessage {
            id,
            user_id,
            trainer_id,
            message: Some("hi".to_string()),
            service_id: None,
            is_to_user: false,
            time: Utc::now(),
        }
    }

    fn connection(
        identity: Identity,
        capacity: usize,
    ) -> (ConnectionHandle, mpsc::Receiver<ChatMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ConnectionHandle::new(identity, tx), rx)
    }

    #[test]
    fn test_route_delivers_exactly_once() {
        let (mut hub, _handle) = Hub::new(8);
        let (trainer, mut trainer_rx) = connection(Identity::trainer(2), 8);
        hub.register(trainer);

        assert_eq!(hub.route(message_to_trainer(1, 1, 2)), Delivery::Delivered);

        assert_eq!(trainer_rx.try_recv().unwrap().id, 1);
        assert!(trainer_rx.try_recv().is_err());
    }

    #[test]
    fn test_role_is_part_of_the_key() {
        let (mut hub, _handle) = Hub::new(8);
        let (user, mut user_rx) = connection(Identity::user(5), 8);
        hub.register(user);

        // Addressed to trainer #5, only user #5 is online
        assert_eq!(hub.route(message_to_trainer(1, 1, 5)), Delivery::Offline);
        assert!(user_rx.try_recv().is_err());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let (mut hub, _handle) = Hub::new(8);
        let (first, _first_rx) = connection(Identity::user(1), 8);
        let (second, _second_rx) = connection(Identity::trainer(1), 8);
        let (first_id, first_identity) = (first.id(), first.identity());
        hub.register(first);
        hub.register(second);

        assert!(hub.unregister(first_id, first_identity));
        assert!(!hub.unregister(first_id, first_identity));
        assert_eq!(hub.connections.len(), 1);
    }

    #[test]
    fn test_reconnect_evicts_previous_connection() {
        let (mut hub, _handle) = Hub::new(8);
        let (old, mut old_rx) = connection(Identity::trainer(2), 8);
        let (new, mut new_rx) = connection(Identity::trainer(2), 8);
        let old_done = old.clone();
        let (old_id, identity) = (old.id(), old.identity());

        hub.register(old);
        hub.register(new);
        assert!(old_done.is_done());
        assert_eq!(hub.connections.len(), 1);

        // A late unregister from the evicted connection leaves the new one alone
        assert!(!hub.unregister(old_id, identity));

        hub.route(message_to_trainer(7, 1, 2));
        assert_eq!(new_rx.try_recv().unwrap().id, 7);
        assert!(old_rx.try_recv().is_err());
    }

    #[test]
    fn test_full_inbox_disconnects_slow_consumer() {
        let (mut hub, _handle) = Hub::new(8);
        let (trainer, _trainer_rx) = connection(Identity::trainer(2), 1);
        let watcher = trainer.clone();
        hub.register(trainer);

        assert_eq!(hub.route(message_to_trainer(1, 1, 2)), Delivery::Delivered);
        assert_eq!(hub.route(message_to_trainer(2, 1, 2)), Delivery::Disconnected);
        assert!(watcher.is_done());
        assert!(hub.connections.is_empty());
        assert_eq!(hub.route(message_to_trainer(3, 1, 2)), Delivery::Offline);
    }

    #[tokio::test]
    async fn test_concurrent_registrations() {
        let handle = Hub::spawn(16);
        let mut inboxes = Vec::new();
        let mut tasks = Vec::new();

        for id in 0..200 {
            let role_identity =
                if id % 2 == 0 { Identity::user(id) } else { Identity::trainer(id) };
            let (conn, rx) = connection(role_identity, 1);
            inboxes.push(rx);
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move { handle.register(conn).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(handle.online_count().await.unwrap(), 200);
    }

    #[tokio::test]
    async fn test_handle_reports_closed_hub() {
        let (hub, handle) = Hub::new(1);
        drop(hub);

        assert!(matches!(handle.online().await, Err(ChatError::HubClosed)));
        let (conn, _rx) = connection(Identity::user(1), 1);
        assert!(matches!(handle.register(conn).await, Err(ChatError::HubClosed)));
    }
}
