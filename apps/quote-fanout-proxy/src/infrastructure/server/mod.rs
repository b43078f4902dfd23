//! Client WebSocket Server
//!
//! Accepts downstream clients on `/` (and `/ws`).
//!
//! # Per-connection flow
//!
//! 1. Register a session with a bounded outbound queue
//! 2. Spawn a writer task forwarding queued payloads to the socket
//! 3. Handle inbound requests one at a time
//! 4. On close, error or shutdown, release the session's subscriptions once
//!
//! Malformed requests are logged and counted; the connection stays open.

mod channel;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use channel::QueuedChannel;

use crate::application::dto::ClientRequest;
use crate::application::services::{ClientId, ClientSessionTable, SubscribeError};
use crate::infrastructure::metrics;

// =============================================================================
// Errors
// =============================================================================

/// Errors for a single inbound request.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// Not a valid request document.
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Binary frame that is not UTF-8 text.
    #[error("binary frame is not valid UTF-8")]
    InvalidUtf8,

    /// The request was understood but failed.
    #[error(transparent)]
    Subscribe(#[from] SubscribeError),
}

/// WebSocket server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind the listen address.
    #[error("failed to bind {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Server
// =============================================================================

/// Shared state for connection handlers.
struct WsServerState {
    sessions: Arc<ClientSessionTable>,
    outbound_capacity: usize,
    cancel: CancellationToken,
}

/// Client-facing WebSocket server.
pub struct WsServer {
    addr: SocketAddr,
    state: Arc<WsServerState>,
}

impl WsServer {
    /// Create a server for `addr`.
    #[must_use]
    pub fn new(
        addr: SocketAddr,
        sessions: Arc<ClientSessionTable>,
        outbound_capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            addr,
            state: Arc::new(WsServerState {
                sessions,
                outbound_capacity: outbound_capacity.max(1),
                cancel,
            }),
        }
    }

    fn router(state: Arc<WsServerState>) -> Router {
        Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .with_state(state)
    }

    /// Bind the configured address and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the server stops with an
    /// error.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| ServerError::BindFailed(self.addr, e.to_string()))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if the server stops with an error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener.local_addr().unwrap_or(self.addr);
        tracing::info!(addr = %local, "WebSocket server listening");

        let cancel = self.state.cancel.clone();
        let app = Self::router(self.state);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

        tracing::info!("WebSocket server stopped");
        Ok(())
    }
}

// =============================================================================
// Connection Handling
// =============================================================================

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<WsServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, peer, state))
}

async fn handle_socket(socket: WebSocket, peer: SocketAddr, state: Arc<WsServerState>) {
    let (tx, mut rx) = mpsc::channel::<String>(state.outbound_capacity);
    let client_id = state
        .sessions
        .on_connect(Arc::new(QueuedChannel::new(tx, peer.to_string())));

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        let frame = tokio::select! {
            () = state.cancel.cancelled() => {
                tracing::debug!(client_id, "Closing client connection for shutdown");
                break;
            }
            frame = ws_receiver.next() => frame,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    report(client_id, &RequestError::InvalidUtf8);
                    continue;
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Err(e)) => {
                tracing::debug!(client_id, error = %e, "Client socket error");
                break;
            }
        };

        if let Err(error) = handle_request(&text, client_id, &state.sessions).await {
            report(client_id, &error);
        }
    }

    state.sessions.on_disconnect(client_id);
    send_task.abort();
}

/// Parse and execute one client request.
///
/// # Errors
///
/// Returns `RequestError` if the request is malformed or fails.
pub async fn handle_request(
    text: &str,
    client_id: ClientId,
    sessions: &ClientSessionTable,
) -> Result<(), RequestError> {
    let request: ClientRequest = serde_json::from_str(text)?;
    tracing::debug!(client_id, action = request.action(), "Client request");

    match request {
        ClientRequest::Subscribe {
            underlying,
            options,
        } => {
            sessions.subscribe(client_id, &underlying, &options).await?;
        }
        ClientRequest::SyncUnderlying { underlying } => {
            sessions.sync_underlying(client_id, &underlying).await?;
        }
    }
    Ok(())
}

fn report(client_id: ClientId, error: &RequestError) {
    match error {
        RequestError::Malformed(_) | RequestError::InvalidUtf8 => {
            metrics::record_malformed_request();
            tracing::warn!(client_id, error = %error, "Malformed client request");
        }
        RequestError::Subscribe(_) => {
            tracing::warn!(client_id, error = %error, "Client request failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::application::ports::MockClientChannel;
    use crate::application::services::testing::FakeSession;
    use crate::domain::subscription::StreamRegistry;

    fn table() -> (Arc<FakeSession>, ClientSessionTable) {
        let session = Arc::new(FakeSession::default());
        let registry = Arc::new(StreamRegistry::new(session.clone()));
        let table =
            ClientSessionTable::new(session.clone(), registry, Duration::from_millis(1));
        (session, table)
    }

    fn channel() -> Arc<MockClientChannel> {
        let mut channel = MockClientChannel::new();
        channel.expect_peer().return_const("test".to_string());
        channel.expect_send().returning(|_| Ok(()));
        Arc::new(channel)
    }

    #[tokio::test]
    async fn invalid_json_is_malformed() {
        let (_session, table) = table();
        let id = table.on_connect(channel());

        let result = handle_request("{not json", id, &table).await;

        assert!(matches!(result, Err(RequestError::Malformed(_))));
    }

    #[tokio::test]
    async fn unknown_action_is_malformed() {
        let (_session, table) = table();
        let id = table.on_connect(channel());

        let result = handle_request(r#"{"action":"unsubscribe"}"#, id, &table).await;

        assert!(matches!(result, Err(RequestError::Malformed(_))));
    }

    #[tokio::test]
    async fn subscribe_request_binds_legs() {
        let (session, table) = table();
        let id = table.on_connect(channel());

        handle_request(
            r#"{"action":"subscribe","underlying":"AAPL","options":[{"id":"p","expDate":"2025-03-21","strike":140,"right":"P"}]}"#,
            id,
            &table,
        )
        .await
        .unwrap();

        assert_eq!(table.legs(id), vec!["p".to_string(), "underlying".to_string()]);
        assert_eq!(session.requested().len(), 2);
    }

    #[tokio::test]
    async fn bad_leg_date_skips_only_that_leg() {
        let (session, table) = table();
        let id = table.on_connect(channel());
        let request = r#"{"action":"subscribe","underlying":"AAPL","options":[
            {"id":"a","expDate":"2025-03-21","strike":140,"right":"C"},
            {"id":"b","expDate":"2025-02-30","strike":145,"right":"C"},
            {"id":"c","expDate":"2025-03-21","strike":150,"right":"C"}]}"#;

        handle_request(request, id, &table).await.unwrap();

        assert_eq!(table.legs(id), vec!["a", "c", "underlying"]);
        assert_eq!(session.requested().len(), 3);
    }

    #[tokio::test]
    async fn request_for_departed_client_fails() {
        let (_session, table) = table();

        let request = r#"{"action":"sync_underlying","underlying":"SPY"}"#;

        let result = handle_request(request, 42, &table).await;

        assert!(matches!(
            result,
            Err(RequestError::Subscribe(SubscribeError::UnknownClient(42)))
        ));
    }
}
