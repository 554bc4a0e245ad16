#![allow(unused)]
use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use speed_test_server::{generate_payload, serve};
use speed_test_types::ServerOptions;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

pub const TEST_PAYLOAD_BYTES: usize = 64 * 1024;

/// Starts the real speed test server on an ephemeral port.
pub async fn start_server() -> Result<SocketAddr> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    let addr = listener.local_addr()?;
    tokio::spawn(serve(
        listener,
        generate_payload(TEST_PAYLOAD_BYTES),
        ServerOptions::default(),
        std::future::pending(),
    ));
    Ok(addr)
}

/// An address nothing listens on.
pub async fn unused_addr() -> Result<SocketAddr> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    Ok(listener.local_addr()?)
}

#[derive(Debug, Default, Clone)]
pub struct PacingStats {
    pub connections: usize,
    pub tokens: usize,
    /// Tokens that arrived while the previous reply was still pending.
    pub pipelined: usize,
    pub closes: usize,
}

/// Starts a server that holds every reply for `reply_delay` and records
/// whether the client sends anything in the meantime.
pub async fn start_pacing_server(
    reply_delay: Duration,
) -> Result<(SocketAddr, Arc<Mutex<PacingStats>>)> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    let addr = listener.local_addr()?;
    let stats = Arc::new(Mutex::new(PacingStats::default()));
    let server_stats = stats.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let stats = server_stats.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                stats.lock().unwrap().connections += 1;
                while let Some(Ok(msg)) = ws.next().await {
                    match msg {
                        Message::Text(_) => {
                            stats.lock().unwrap().tokens += 1;
                            let early = tokio::time::timeout(reply_delay, ws.next()).await;
                            if let Ok(Some(Ok(Message::Text(_)))) = early {
                                let mut stats = stats.lock().unwrap();
                                stats.tokens += 1;
                                stats.pipelined += 1;
                            }
                            if ws.send(Message::binary(vec![0u8; 32])).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => stats.lock().unwrap().closes += 1,
                        _ => {}
                    }
                }
            });
        }
    });
    Ok((addr, stats))
}
