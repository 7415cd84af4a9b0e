//! World TCP endpoint.
//!
//! Pipeline per connection: limiter, idle watchdog, framer, router. The
//! first non-heartbeat frame must be EnterWorld; everything after rides
//! the input queue onto the tick thread.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use flyagain_common::gateway::{error_frame, IDLE_TIMEOUT};
use flyagain_common::{
    unix_now_ms, ConnectionLimiter, ServiceError, SharedStore, TokenService,
};
use flyagain_protocol::messages::{EnterWorldRequest, Heartbeat};
use flyagain_protocol::{
    decode_payload, encode_frame, udp, Frame, FrameCodec, FrameEvent, Opcode,
};

use crate::connection::ConnectionHandle;
use crate::entity::EntityManager;
use crate::net::udp::UdpSessionTable;
use crate::queue::{InputQueue, JoinRequest, QueuedPacket, WorldCommand};

pub struct WorldNet {
    pub tokens: TokenService,
    pub store: SharedStore,
    pub entities: Arc<EntityManager>,
    pub queue: Arc<InputQueue>,
    pub udp_sessions: Arc<UdpSessionTable>,
    next_conn_id: AtomicU64,
}

impl WorldNet {
    pub fn new(
        tokens: TokenService,
        store: SharedStore,
        entities: Arc<EntityManager>,
        queue: Arc<InputQueue>,
        udp_sessions: Arc<UdpSessionTable>,
    ) -> Self {
        Self {
            tokens,
            store,
            entities,
            queue,
            udp_sessions,
            next_conn_id: AtomicU64::new(1),
        }
    }
}

pub async fn run_tcp(
    listener: TcpListener,
    limiter: Arc<ConnectionLimiter>,
    net: Arc<WorldNet>,
) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let Some(guard) = limiter.try_acquire(peer.ip()) else {
            warn!(%peer, "connection cap reached, closing");
            continue;
        };

        let net = Arc::clone(&net);
        tokio::spawn(async move {
            let _guard = guard;
            handle_client(stream, peer, net).await;
        });
    }
}

/// What the connection knows after a successful EnterWorld.
struct AuthedPlayer {
    account_id: i64,
    udp_token: u64,
}

async fn handle_client(stream: TcpStream, peer: SocketAddr, net: Arc<WorldNet>) {
    stream.set_nodelay(true).ok();
    let conn_id = net.next_conn_id.fetch_add(1, Ordering::Relaxed);
    let (read_half, write_half) = stream.into_split();
    let conn = ConnectionHandle::spawn_writer(conn_id, write_half);
    let mut framed = FramedRead::new(read_half, FrameCodec::default());
    let mut authed: Option<AuthedPlayer> = None;

    debug!(%peer, conn_id, "world client connected");

    loop {
        let event = match tokio::time::timeout(IDLE_TIMEOUT, framed.next()).await {
            Err(_) => {
                info!(%peer, conn_id, "idle for 60s, closing");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                warn!(%peer, error = %e, "unrecoverable framing error");
                break;
            }
            Ok(Some(Ok(event))) => event,
        };

        let frame = match event {
            FrameEvent::Oversized(len) => {
                conn.send_frame(&error_frame(
                    0,
                    &ServiceError::Protocol(format!("frame of {len} bytes exceeds the limit")),
                ));
                continue;
            }
            FrameEvent::Frame(frame) => frame,
        };

        if frame.opcode == Opcode::Heartbeat as u16 {
            let beat: Heartbeat = decode_payload(&frame).unwrap_or_default();
            conn.send_frame(&encode_frame(
                Opcode::Heartbeat,
                &Heartbeat {
                    client_time_ms: beat.client_time_ms,
                    server_time_ms: unix_now_ms(),
                },
            ));
            continue;
        }

        if let Some(player) = &authed {
            match Opcode::from_u16(frame.opcode) {
                Some(
                    Opcode::MovementInput
                    | Opcode::SelectTarget
                    | Opcode::MoveItem
                    | Opcode::ChatMessage
                    | Opcode::ChannelSwitch
                    | Opcode::ChannelList,
                ) => {
                    net.queue.push(WorldCommand::Packet(QueuedPacket {
                        account_id: player.account_id,
                        opcode: frame.opcode,
                        payload: frame.payload,
                        conn: Some(conn.clone()),
                        received_ms: unix_now_ms(),
                    }));
                }
                Some(Opcode::EnterWorld) => {
                    conn.send_frame(&error_frame(
                        frame.opcode,
                        &ServiceError::Protocol("already in world".to_string()),
                    ));
                }
                _ => {
                    conn.send_frame(&error_frame(
                        frame.opcode,
                        &ServiceError::Protocol(format!("unknown opcode {:#06x}", frame.opcode)),
                    ));
                }
            }
        } else {
            // The first non-heartbeat frame must be EnterWorld.
            if frame.opcode != Opcode::EnterWorld as u16 {
                conn.send_frame(&error_frame(frame.opcode, &ServiceError::Auth));
                break;
            }
            match handle_enter_world(&net, &frame, &conn).await {
                Ok(player) => authed = Some(player),
                Err(e) => {
                    let closes = e.closes_connection();
                    conn.send_frame(&error_frame(frame.opcode, &e));
                    if closes {
                        break;
                    }
                }
            }
        }
    }

    // Reader gone: hand the despawn/flush over to the tick thread.
    if let Some(player) = authed {
        net.udp_sessions.remove(player.udp_token);
        net.queue.push(WorldCommand::Leave {
            account_id: player.account_id,
        });
    } else {
        conn.close();
    }
    debug!(%peer, conn_id, "world client disconnected");
}

/// The suspending half of world entry: token, snapshot, session, CAS
/// registration, online set. Zone placement happens on the tick thread.
async fn handle_enter_world(
    net: &WorldNet,
    frame: &Frame,
    conn: &ConnectionHandle,
) -> Result<AuthedPlayer, ServiceError> {
    let req: EnterWorldRequest = decode_payload(frame)?;
    let claims = net.tokens.verify(&req.token)?;
    let account_id = claims.account_id()?;

    let Some(record) = net.store.read_character_cache(req.character_id).await? else {
        return Err(ServiceError::Business(
            "Character not staged. Select your character again.".to_string(),
        ));
    };
    if record.account_id != account_id {
        return Err(ServiceError::Forbidden);
    }

    let Some(session) = net.store.get_session(&claims.sid).await? else {
        return Err(ServiceError::Auth);
    };
    if session.account_id != account_id {
        return Err(ServiceError::Auth);
    }

    let entity_id = net
        .entities
        .try_register(account_id)
        .map_err(|_| ServiceError::Business("Account already has a character in world.".to_string()))?;

    let udp_token = match udp::session_token(&claims.sid) {
        Ok(token) => token,
        Err(_) => {
            net.entities.unregister(account_id);
            return Err(ServiceError::Auth);
        }
    };
    net.udp_sessions
        .insert(udp_token, account_id, &session.hmac_secret);

    if let Err(e) = net.store.add_online(record.id).await {
        net.entities.unregister(account_id);
        net.udp_sessions.remove(udp_token);
        return Err(e);
    }

    info!(account_id, entity_id, character_id = record.id, "world entry accepted");
    net.queue.push(WorldCommand::Join(Box::new(JoinRequest {
        account_id,
        entity_id,
        record,
        session_id: session.session_id,
        udp_token,
        conn: conn.clone(),
    })));

    Ok(AuthedPlayer {
        account_id,
        udp_token,
    })
}
