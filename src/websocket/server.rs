use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::{CONTENT_TYPE, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tracing::{error, info, warn};

use crate::auth::{Authorizer, Identity, CHAT_ROLES};
use crate::config::ChatConfig;
use crate::db::MessageStore;
use crate::error::AuthError;
use crate::websocket::hub::HubHandle;
use crate::websocket::Connection;

/// Accepts chat clients, authenticates the handshake and hands each socket
/// to its own [`Connection`].
pub struct ChatServer {
    hub: HubHandle,
    authorizer: Arc<dyn Authorizer>,
    store: Arc<dyn MessageStore>,
    config: ChatConfig,
}

impl ChatServer {
    pub fn new(
        hub: HubHandle,
        authorizer: Arc<dyn Authorizer>,
        store: Arc<dyn MessageStore>,
        config: ChatConfig,
    ) -> Self {
        Self {
            hub,
            authorizer,
            store,
            config,
        }
    }

    /// Accept loop. Runs until the listener fails permanently.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        match listener.local_addr() {
            Ok(addr) => {
                info!("Chat server accepting connections at ws://{}{}", addr, self.config.path)
            }
            Err(e) => warn!("Chat server listener has no local address: {}", e),
        }

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let server = self.clone();
                    tokio::spawn(async move {
                        server.handle_connection(stream, addr).await;
                    });
                }
                Err(e) => error!("Failed to accept chat connection: {}", e),
            }
        }
    }

    pub async fn handle_connection(self: Arc<Self>, raw_stream: TcpStream, addr: SocketAddr) {
        let mut identity = None;

        let gate = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let (caller, response) = self.authorize_upgrade(request, response)?;
            identity = Some(caller);
            Ok(response)
        };

        let ws_stream = match accept_hdr_async(raw_stream, gate).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!("Chat handshake with {} failed: {}", addr, e);
                return;
            }
        };

        let identity = match identity {
            Some(identity) => identity,
            None => return,
        };
        info!("{} connected from {}", identity, addr);

        Connection::new(identity, ws_stream, self.hub.clone(), self.store.clone(), &self.config)
            .run()
            .await;
    }

    /// Checks path and access token of an upgrade request. The token travels
    /// in `Sec-WebSocket-Protocol` and is echoed back as the chosen protocol.
    fn authorize_upgrade(
        &self,
        request: &Request,
        mut response: Response,
    ) -> Result<(Identity, Response), ErrorResponse> {
        if request.uri().path() != self.config.path {
            return Err(reject(StatusCode::NOT_FOUND, "Not found"));
        }

        let header = request
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .filter(|value| !value.as_bytes().is_empty())
            .ok_or_else(|| deny(AuthError::MissingToken))?;
        let token = header
            .to_str()
            .map_err(|e| deny(AuthError::InvalidToken(e.to_string())))?;

        let identity = match self.authorizer.authorize(token.trim(), &CHAT_ROLES) {
            Ok(Some(identity)) => identity,
            Ok(None) => return Err(deny(AuthError::Unauthorized)),
            Err(e) => return Err(deny(e)),
        };

        response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, header.clone());
        Ok((identity, response))
    }
}

fn deny(err: AuthError) -> ErrorResponse {
    warn!("Rejected chat handshake: {}", err);
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
    reject(status, err.client_message())
}

fn reject(status: StatusCode, message: &str) -> ErrorResponse {
    let body = json!({ "message": message }).to_string();
    let mut response = ErrorResponse::new(Some(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
