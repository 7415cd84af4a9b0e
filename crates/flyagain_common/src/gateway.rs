//! Shared gateway pipeline.
//!
//! Every gateway runs the same four stages, in order: connection limiter,
//! idle watchdog, length-prefix framer, per-service router. The router is
//! supplied by the service as a [`FrameHandler`]; everything else lives
//! here. Heartbeats are echoed by this loop (server wall-clock alongside
//! the client's timestamp), so handlers never see them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use flyagain_protocol::messages::{ErrorResponse, Heartbeat};
use flyagain_protocol::{decode_payload, encode_frame, Frame, FrameCodec, FrameEvent, Opcode};

use crate::error::ServiceError;
use crate::limiter::ConnectionLimiter;
use crate::unix_now_ms;

/// Close a connection after this long without an inbound frame.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// A service's frame router. One value of `Conn` lives per connection and
/// carries whatever the service caches there (authenticated account, ...).
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    type Conn: Default + Send;

    async fn handle(
        &self,
        frame: Frame,
        conn: &mut Self::Conn,
        peer: SocketAddr,
    ) -> Result<Vec<Frame>, ServiceError>;
}

/// Accept loop: admit through the limiter, then one task per connection.
/// Connections over a cap are accepted and immediately dropped.
pub async fn run_gateway<H: FrameHandler>(
    listener: TcpListener,
    limiter: Arc<ConnectionLimiter>,
    handler: Arc<H>,
) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let Some(guard) = limiter.try_acquire(peer.ip()) else {
            warn!(%peer, "connection cap reached, closing");
            continue;
        };

        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = run_connection(stream, peer, handler).await {
                debug!(%peer, error = %e, "connection ended with error");
            }
        });
    }
}

async fn run_connection<H: FrameHandler>(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<H>,
) -> anyhow::Result<()> {
    stream.set_nodelay(true).ok();
    let mut framed = Framed::new(stream, FrameCodec::default());
    let mut conn = H::Conn::default();

    loop {
        let event = match tokio::time::timeout(IDLE_TIMEOUT, framed.next()).await {
            Err(_) => {
                info!(%peer, "idle for 60s, closing");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                // The stream cannot be resynchronized; drop it.
                warn!(%peer, error = %e, "unrecoverable framing error");
                break;
            }
            Ok(Some(Ok(event))) => event,
        };

        let frame = match event {
            FrameEvent::Oversized(len) => {
                framed
                    .send(error_frame(0, &ServiceError::Protocol(format!(
                        "frame of {len} bytes exceeds the limit"
                    ))))
                    .await?;
                continue;
            }
            FrameEvent::Frame(frame) => frame,
        };

        // Single heartbeat echo path for every gateway.
        if frame.opcode == Opcode::Heartbeat as u16 {
            let beat: Heartbeat = decode_payload(&frame).unwrap_or_default();
            framed
                .send(encode_frame(
                    Opcode::Heartbeat,
                    &Heartbeat {
                        client_time_ms: beat.client_time_ms,
                        server_time_ms: unix_now_ms(),
                    },
                ))
                .await?;
            continue;
        }

        let opcode = frame.opcode;
        match handler.handle(frame, &mut conn, peer).await {
            Ok(responses) => {
                for response in responses {
                    framed.send(response).await?;
                }
            }
            Err(e) => {
                let closes = e.closes_connection();
                framed.send(error_frame(opcode, &e)).await?;
                if closes {
                    debug!(%peer, error = %e, "closing connection after auth failure");
                    break;
                }
            }
        }
    }
    Ok(())
}

/// ErrorResponse frame for a failed operation, echoing the original opcode.
pub fn error_frame(opcode: u16, error: &ServiceError) -> Frame {
    encode_frame(
        Opcode::ErrorResponse,
        &ErrorResponse {
            opcode: opcode as u32,
            code: error.code(),
            message: error.wire_message(),
        },
    )
}
