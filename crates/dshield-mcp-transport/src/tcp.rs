//! TCP transport with an API-key handshake.
//!
//! The first frame on a new connection must be `{"api_key": "..."}`; three
//! bad attempts close the connection. Authenticated connections then speak
//! the same newline-delimited protocol as stdio.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, info, warn};

use crate::McpService;
use crate::connection::{ConnectionInfo, MAX_LINE_LENGTH, run_framed};

/// Handshake attempts before the connection is closed.
pub const MAX_HANDSHAKE_ATTEMPTS: usize = 3;

/// TCP listener configuration.
#[derive(Debug, Clone)]
pub struct TcpServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl TcpServerConfig {
    /// The bind address string.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Accept loop. Each connection handshakes, then runs the shared frame
/// loop. Returns when shutdown is triggered.
pub async fn serve_tcp<S: McpService>(
    service: Arc<S>,
    config: TcpServerConfig,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(config.bind_addr()).await?;
    info!(addr = %config.bind_addr(), "serving MCP over TCP");

    let mut shutdown = service.shutdown_receiver();
    let mut connections: JoinSet<()> = JoinSet::new();

    loop {
        while connections.try_join_next().is_some() {}

        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                let service = Arc::clone(&service);
                connections.spawn(async move {
                    handle_connection(service, stream, peer).await;
                });
            }
            Err(err) => warn!(%err, "accept failed"),
        }
    }

    // Let live connections drain through their own shutdown paths.
    while connections.join_next().await.is_some() {}
    Ok(())
}

async fn handle_connection<S: McpService>(service: Arc<S>, stream: TcpStream, peer: SocketAddr) {
    let (read_half, write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let mut sink = FramedWrite::new(write_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    let Some(api_key) = handshake(&service, &mut frames, &mut sink, peer).await else {
        debug!(%peer, "handshake failed, closing connection");
        return;
    };

    let conn = ConnectionInfo::tcp(peer.to_string(), api_key);
    info!(connection = %conn.id, %peer, "TCP connection authenticated");
    run_framed(service, conn, frames, sink).await;
}

/// Read handshake frames until a valid key or the attempt budget runs out.
async fn handshake<S, R, W>(
    service: &Arc<S>,
    frames: &mut FramedRead<R, LinesCodec>,
    sink: &mut FramedWrite<W, LinesCodec>,
    peer: SocketAddr,
) -> Option<String>
where
    S: McpService,
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    for attempt in 1..=MAX_HANDSHAKE_ATTEMPTS {
        let line = match frames.next().await {
            Some(Ok(line)) => line,
            _ => return None,
        };

        let key = serde_json::from_str::<serde_json::Value>(&line)
            .ok()
            .and_then(|v| v.get("api_key").and_then(|k| k.as_str()).map(str::to_string));

        if let Some(key) = key
            && service.authenticate(&key)
        {
            let ack = json!({ "authenticated": true }).to_string();
            if sink.send(ack).await.is_err() {
                return None;
            }
            return Some(key);
        }

        warn!(%peer, attempt, "bad handshake attempt");
        let nack = json!({ "authenticated": false, "attempt": attempt }).to_string();
        if sink.send(nack).await.is_err() {
            return None;
        }
    }
    None
}
