pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod websocket;

use std::sync::Arc;
use actix_web::{web, HttpResponse};

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use crate::config::Settings;

pub use auth::{Authorizer, Identity, JwtAuthorizer, Role};
pub use db::{MemoryMessageStore, MessageStore, PgMessageStore};
pub use websocket::{ChatServer, Hub, HubHandle};

/// Health check endpoint handler
/// Reports server status, timestamp and how many chat participants are online
pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse> {
    let online = state.hub.online_count().await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "online": online,
    })))
}

/// Application state shared with the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub hub: HubHandle,
}

impl AppState {
    pub fn new(config: Settings, hub: HubHandle) -> Self {
        Self {
            config: Arc::new(config),
            hub,
        }
    }
}
