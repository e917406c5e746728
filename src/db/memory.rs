use async_trait::async_trait;
use chrono::Utc;
use std::sync::Mutex;

use crate::db::models::{MessageReceipt, NewMessage};
use crate::db::operations::MessageStore;
use crate::error::DatabaseError;

/// Keeps messages in process memory. Ids start at 1 and grow by one.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    messages: Mutex<Vec<(MessageReceipt, NewMessage)>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything stored so far, in creation order.
    pub fn messages(&self) -> Vec<(MessageReceipt, NewMessage)> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().map(|messages| messages.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create_message(&self, message: &NewMessage) -> Result<MessageReceipt, DatabaseError> {
        let mut messages = self
            .messages
            .lock()
            .map_err(|e| DatabaseError::QueryError(e.to_string()))?;

        let receipt = MessageReceipt {
            id: messages.len() as i64 + 1,
            time: Utc::now(),
        };
        messages.push((receipt, message.clone()));

        Ok(receipt)
    }
}
