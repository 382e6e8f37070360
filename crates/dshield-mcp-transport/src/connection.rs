//! Per-connection frame loop shared by both transports.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use dshield_mcp_protocol::jsonrpc::Frame;

use crate::McpService;

/// Concurrent in-flight requests per connection.
pub const CONNECTION_CONCURRENCY: usize = 8;

/// How long a closing connection waits for in-flight work.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Codec bound on one line. Far above the validator's 10 MiB frame limit so
/// oversized frames reach the validator (which drops them and keeps the
/// connection open) instead of poisoning the codec.
pub const MAX_LINE_LENGTH: usize = 64 * 1024 * 1024;

/// Identity of one client connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Unique connection id.
    pub id: String,
    /// API key from the TCP handshake; stdio connections have none.
    pub api_key: Option<String>,
    /// Remote peer, when the transport knows one.
    pub peer: Option<String>,
}

impl ConnectionInfo {
    /// The singular stdio connection.
    pub fn stdio() -> Self {
        Self {
            id: format!("stdio-{}", Uuid::new_v4()),
            api_key: None,
            peer: None,
        }
    }

    /// An authenticated TCP connection.
    pub fn tcp(peer: String, api_key: String) -> Self {
        Self {
            id: format!("tcp-{}", Uuid::new_v4()),
            api_key: Some(api_key),
            peer: Some(peer),
        }
    }
}

/// Why the frame loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// The peer closed the stream.
    PeerClosed,
    /// A shutdown notification or signal arrived.
    Shutdown,
    /// The transport failed.
    TransportError,
}

/// Drive one connection from raw reader/writer halves.
pub(crate) async fn run_connection<S, R, W>(
    service: Arc<S>,
    conn: ConnectionInfo,
    reader: R,
    writer: W,
) -> ConnectionEnd
where
    S: McpService,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let frames = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let sink = FramedWrite::new(writer, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    run_framed(service, conn, frames, sink).await
}

/// Drive one connection over already-framed halves. The frame loop reads
/// sequentially, dispatches requests concurrently up to the cap, and writes
/// responses as they complete.
pub(crate) async fn run_framed<S, R, W>(
    service: Arc<S>,
    conn: ConnectionInfo,
    mut frames: FramedRead<R, LinesCodec>,
    mut sink: FramedWrite<W, LinesCodec>,
) -> ConnectionEnd
where
    S: McpService,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{

    // Responses funnel through one writer task; completion order is fine,
    // the id preserves correspondence.
    let (response_tx, mut response_rx) = mpsc::channel::<String>(256);
    let writer_task = tokio::spawn(async move {
        while let Some(line) = response_rx.recv().await {
            if let Err(err) = sink.send(line).await {
                warn!(%err, "failed to write response, closing writer");
                break;
            }
        }
    });

    let semaphore = Arc::new(Semaphore::new(CONNECTION_CONCURRENCY));
    let mut in_flight: JoinSet<()> = JoinSet::new();
    let mut shutdown = service.shutdown_receiver();

    let end = loop {
        // Reap finished handlers so the set stays small.
        while in_flight.try_join_next().is_some() {}

        // Shutdown may have begun before this connection subscribed.
        if *shutdown.borrow() {
            break ConnectionEnd::Shutdown;
        }

        let line = tokio::select! {
            _ = shutdown.changed() => break ConnectionEnd::Shutdown,
            line = frames.next() => line,
        };

        let line = match line {
            None => break ConnectionEnd::PeerClosed,
            Some(Ok(line)) => line,
            Some(Err(err)) => {
                warn!(%err, connection = %conn.id, "transport read error");
                break ConnectionEnd::TransportError;
            }
        };

        let Some(frame) = service.validate_frame(line.as_bytes()) else {
            // Dropped by the validator; the connection stays open.
            continue;
        };

        match frame {
            Frame::Request(request) => {
                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break ConnectionEnd::Shutdown,
                };
                let service = Arc::clone(&service);
                let conn = conn.clone();
                let response_tx = response_tx.clone();
                in_flight.spawn(async move {
                    let _permit = permit;
                    let response = service.handle_request(request, &conn).await;
                    match serde_json::to_string(&response) {
                        Ok(line) => {
                            if response_tx.send(line).await.is_err() {
                                debug!("response channel closed before send");
                            }
                        }
                        Err(err) => warn!(%err, "response failed to serialize"),
                    }
                });
            }
            Frame::Notification(note) => {
                // Notifications are handled inline, in arrival order.
                if service.handle_notification(&note, &conn) {
                    break ConnectionEnd::Shutdown;
                }
            }
            Frame::Response(_) => {
                trace!(connection = %conn.id, "ignoring unsolicited response frame");
            }
        }
    };

    match end {
        ConnectionEnd::PeerClosed | ConnectionEnd::TransportError => {
            // A dead peer reads nothing; cancel its in-flight work.
            in_flight.abort_all();
        }
        ConnectionEnd::Shutdown => {
            // Graceful: give in-flight calls a bounded drain.
            let drain = async {
                while in_flight.join_next().await.is_some() {}
            };
            if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
                warn!(connection = %conn.id, "drain timeout, aborting in-flight calls");
                in_flight.abort_all();
            }
        }
    }
    while in_flight.join_next().await.is_some() {}

    drop(response_tx);
    let _ = writer_task.await;
    service.connection_closed(&conn);
    debug!(connection = %conn.id, ?end, "connection closed");
    end
}
