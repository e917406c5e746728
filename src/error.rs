use thiserror::Error;
use actix_web::{ResponseError, HttpResponse, http::StatusCode};
use serde_json::json;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    AuthError(#[from] AuthError),

    #[error("Chat error: {0}")]
    ChatError(#[from] ChatError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.into())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = self.to_string();
        let response = json!({
            "error": {
                "status": status.as_u16(),
                "message": message
            }
        });
        HttpResponse::build(status).json(response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::AuthError(e) => {
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::UNAUTHORIZED)
            }
            AppError::ChatError(ChatError::HubClosed) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::DatabaseError(DatabaseError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Failures while authorizing a chat handshake.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("No jwt provided")]
    MissingToken,

    #[error("Bad jwt provided: {0}")]
    InvalidToken(String),

    #[error("Access token is expired or invalid")]
    Unauthorized,
}

impl AuthError {
    /// HTTP status the upgrade gate answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::MissingToken | AuthError::InvalidToken(_) => 400,
            AuthError::Unauthorized => 401,
        }
    }

    /// Message placed in the rejected handshake's body.
    pub fn client_message(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "No jwt provided",
            AuthError::InvalidToken(_) => "Bad jwt provided",
            AuthError::Unauthorized => "Access token is expired or invalid",
        }
    }
}

/// Everything that can end a single chat connection.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    #[error("Message carries neither text nor a service reference")]
    EmptyMessage,

    #[error("Failed to store message: {0}")]
    Store(#[from] DatabaseError),

    #[error("Connection idle for longer than {0:?}")]
    IdleTimeout(std::time::Duration),

    #[error("Write did not complete within {0:?}")]
    WriteTimeout(std::time::Duration),

    #[error("Inbox of {0} is full, disconnecting slow consumer")]
    SlowConsumer(String),

    #[error("Chat hub is not running")]
    HubClosed,
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::InvalidFormat(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Database did not respond within {0:?}")]
    Timeout(std::time::Duration),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::ConnectionError(err.to_string())
            }
            _ => DatabaseError::QueryError(err.to_string()),
        }
    }
}
