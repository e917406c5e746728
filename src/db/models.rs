use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat message about to be persisted.
///
/// `is_to_user` tells which side sent it: `true` means the trainer wrote to
/// the user, `false` the other way around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub user_id: i64,
    pub trainer_id: i64,
    pub message: Option<String>,
    pub service_id: Option<i64>,
    pub is_to_user: bool,
}

/// What the store hands back once a message is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageReceipt {
    pub id: i64,
    pub time: DateTime<Utc>,
}
