//! Realtime chat between users and trainers.
//!
//! [`ChatServer`] authenticates the upgrade and spawns a [`Connection`] per
//! socket. Connections store incoming messages and hand them to the [`Hub`],
//! which owns the registry of who is online and routes each message to its
//! recipient, dropping it when the recipient is offline.

mod connection;
mod hub;
pub mod protocol;
mod server;

pub use connection::{Connection, ConnectionHandle};
pub use hub::{Hub, HubHandle};
pub use protocol::{ChatMessage, ClientRequest, Envelope, IncomingMessage};
pub use server::ChatServer;
