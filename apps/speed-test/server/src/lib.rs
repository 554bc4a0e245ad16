use std::{future::Future, sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Extension, Router,
};
use speed_test_types::{ServerOptions, MAX_PAYLOAD_BYTES, WS_PATH};
use tokio::{net::TcpListener, time::Instant};
use tower_http::trace::TraceLayer;

mod payload;

pub use payload::{generate_payload, load_payload, PayloadError};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("heartbeat interval must be greater than zero")]
    ZeroHeartbeat,
    #[error("payload has {size} bytes, more than the {max} clients accept")]
    PayloadTooLarge { size: usize, max: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
struct SpeedTestState {
    payload: Arc<[u8]>,
    heartbeat: Duration,
    client_timeout: Duration,
}

/// Builds the router serving the speed test route.
pub fn router(payload: Arc<[u8]>, options: &ServerOptions) -> Result<Router, ServerError> {
    if options.heartbeat.is_zero() {
        return Err(ServerError::ZeroHeartbeat);
    }
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(ServerError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_BYTES,
        });
    }
    let state = SpeedTestState {
        payload,
        heartbeat: options.heartbeat,
        client_timeout: options.client_timeout,
    };
    Ok(Router::new()
        .route(WS_PATH, get(speed_test_ws))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http()))
}

/// Serves the speed test on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    payload: Arc<[u8]>,
    options: ServerOptions,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let app = router(payload, &options)?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn speed_test_ws(
    ws: WebSocketUpgrade,
    Extension(state): Extension<SpeedTestState>,
) -> Response {
    ws.on_upgrade(move |socket: WebSocket| async move {
        tracing::debug!("websocket connection established");
        if let Err(error) = speed_test_interface(socket, state).await {
            let error_msg = error.to_string();
            if error_msg.contains("Connection reset without closing handshake") {
                tracing::warn!("WebSocket client disconnect: {error}");
            } else {
                tracing::error!("WebSocket protocol error: {error}");
            }
        }
    })
}

async fn speed_test_interface(
    mut socket: WebSocket,
    state: SpeedTestState,
) -> anyhow::Result<()> {
    let mut last_seen = Instant::now();
    let mut heartbeat =
        tokio::time::interval_at(Instant::now() + state.heartbeat, state.heartbeat);
    let mut replies = 0usize;
    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if last_seen.elapsed() > state.client_timeout {
                    tracing::debug!(replies, "client heartbeat timed out, closing");
                    let _ = socket.send(Message::Close(None)).await;
                    return Ok(());
                }
                socket.send(Message::Ping(Vec::new())).await?;
            }
            msg = socket.recv() => {
                let Some(msg) = msg else {
                    tracing::debug!(replies, "client stream ended");
                    return Ok(());
                };
                last_seen = Instant::now();
                match msg? {
                    Message::Ping(ping) => socket.send(Message::Pong(ping)).await?,
                    Message::Pong(_) => {}
                    Message::Text(_) => {
                        // axum's Binary owns a Vec, so each reply copies the shared buffer
                        socket.send(Message::Binary(state.payload.to_vec())).await?;
                        replies += 1;
                        tracing::trace!(replies, "payload sent");
                    }
                    Message::Close(frame) => {
                        tracing::debug!(replies, ?frame, "client closed the connection");
                        let _ = socket.send(Message::Close(frame)).await;
                        return Ok(());
                    }
                    Message::Binary(_) => {
                        tracing::debug!("unexpected binary message, closing");
                        let _ = socket
                            .send(Message::Close(Some(CloseFrame {
                                code: close_code::UNSUPPORTED,
                                reason: "binary messages are not supported".into(),
                            })))
                            .await;
                        return Ok(());
                    }
                }
            }
        }
    }
}
