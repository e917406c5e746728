//! Message persistence for the chat server.
//!
//! The schema and the history/chat-list queries belong to the REST side of the
//! platform; the chat server only ever writes new messages.

pub mod memory;
pub mod models;
pub mod operations;

pub use memory::MemoryMessageStore;
pub use models::{MessageReceipt, NewMessage};
pub use operations::{MessageStore, PgMessageStore};

#[cfg(test)]
pub use operations::MockMessageStore;
