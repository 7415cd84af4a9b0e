//! Authenticated UDP movement endpoint.
//!
//! Pipeline per datagram: per-address flood gate, header parse, secret
//! lookup (process cache, shared-store fallback), HMAC verification,
//! replay check, enqueue. Every rejection is a silent drop; UDP gets no
//! error responses.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

use flyagain_common::{unix_now_ms, SharedStore};
use flyagain_protocol::udp::UdpFrame;
use flyagain_protocol::Opcode;

use crate::queue::{InputQueue, QueuedPacket, WorldCommand};

pub const FLOOD_LIMIT_PER_SECOND: u32 = 100;
pub const FLOOD_REAP_INTERVAL: Duration = Duration::from_secs(60);

pub struct UdpSession {
    pub account_id: i64,
    pub secret: Vec<u8>,
    high_water: AtomicU64,
}

/// sessionToken -> signing secret, populated at world entry with a
/// shared-store fallback for process restarts.
#[derive(Default)]
pub struct UdpSessionTable {
    map: DashMap<u64, Arc<UdpSession>>,
}

impl UdpSessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: u64, account_id: i64, secret_b64: &str) {
        let secret = URL_SAFE_NO_PAD
            .decode(secret_b64)
            .unwrap_or_else(|_| secret_b64.as_bytes().to_vec());
        self.map.insert(
            token,
            Arc::new(UdpSession {
                account_id,
                secret,
                high_water: AtomicU64::new(0),
            }),
        );
    }

    pub fn remove(&self, token: u64) {
        self.map.remove(&token);
    }

    pub fn get(&self, token: u64) -> Option<Arc<UdpSession>> {
        self.map.get(&token).map(|entry| Arc::clone(&entry))
    }

    /// Session ids encode exactly the 8 token bytes, so the store key can
    /// be reconstructed from the numeric token.
    pub async fn resolve(&self, token: u64, store: &SharedStore) -> Option<Arc<UdpSession>> {
        if let Some(session) = self.get(token) {
            return Some(session);
        }
        let session_id = URL_SAFE_NO_PAD.encode(token.to_be_bytes());
        let data = store.get_session(&session_id).await.ok()??;
        self.insert(token, data.account_id, &data.hmac_secret);
        self.get(token)
    }
}

impl UdpSession {
    /// Strictly increasing sequence: anything at or below the high-water
    /// mark is a replay or stale arrival and is dropped.
    pub fn accept_sequence(&self, sequence: u64) -> bool {
        let previous = self.high_water.fetch_max(sequence, Ordering::SeqCst);
        sequence > previous
    }
}

struct Window {
    second: AtomicU64,
    count: AtomicU32,
}

/// Fixed one-second window per sender address, checked before any
/// cryptography. Stale windows are reaped periodically.
#[derive(Default)]
pub struct FloodGate {
    windows: DashMap<IpAddr, Window>,
}

impl FloodGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&self, addr: IpAddr, now_ms: u64) -> bool {
        let second = now_ms / 1_000;
        let window = self.windows.entry(addr).or_insert_with(|| Window {
            second: AtomicU64::new(second),
            count: AtomicU32::new(0),
        });
        if window.second.swap(second, Ordering::Relaxed) != second {
            window.count.store(0, Ordering::Relaxed);
        }
        window.count.fetch_add(1, Ordering::Relaxed) < FLOOD_LIMIT_PER_SECOND
    }

    pub fn reap(&self, now_ms: u64) {
        let current = now_ms / 1_000;
        self.windows
            .retain(|_, window| current.saturating_sub(window.second.load(Ordering::Relaxed)) < 60);
    }
}

pub async fn run_udp(
    socket: UdpSocket,
    sessions: Arc<UdpSessionTable>,
    store: SharedStore,
    queue: Arc<InputQueue>,
) -> anyhow::Result<()> {
    let flood = Arc::new(FloodGate::new());

    let reaper_flood = Arc::clone(&flood);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(FLOOD_REAP_INTERVAL);
        loop {
            ticker.tick().await;
            reaper_flood.reap(unix_now_ms());
        }
    });

    let mut buf = [0u8; 2048];
    loop {
        let (len, peer) = socket.recv_from(&mut buf).await?;
        process_datagram(&buf[..len], peer, &flood, &sessions, &store, &queue).await;
    }
}

async fn process_datagram(
    datagram: &[u8],
    peer: SocketAddr,
    flood: &FloodGate,
    sessions: &UdpSessionTable,
    store: &SharedStore,
    queue: &InputQueue,
) {
    let now_ms = unix_now_ms();
    if !flood.allow(peer.ip(), now_ms) {
        trace!(%peer, "flood gate drop");
        return;
    }

    let Ok(frame) = UdpFrame::parse(datagram) else {
        trace!(%peer, "malformed datagram");
        return;
    };

    let Some(session) = sessions.resolve(frame.session_token, store).await else {
        debug!(%peer, token = frame.session_token, "datagram for unknown session");
        return;
    };

    if frame.verify(&session.secret).is_err() {
        debug!(%peer, "datagram failed authentication");
        return;
    }
    if !session.accept_sequence(frame.sequence) {
        trace!(%peer, sequence = frame.sequence, "replayed or stale datagram");
        return;
    }

    if frame.opcode != Opcode::MovementInput as u16 {
        debug!(%peer, opcode = frame.opcode, "unexpected opcode on UDP");
        return;
    }

    queue.push(WorldCommand::Packet(QueuedPacket {
        account_id: session.account_id,
        opcode: frame.opcode,
        payload: frame.payload,
        conn: None,
        received_ms: now_ms,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_replay_rejected() {
        let session = UdpSession {
            account_id: 1,
            secret: vec![0; 32],
            high_water: AtomicU64::new(0),
        };
        assert!(session.accept_sequence(1));
        assert!(session.accept_sequence(2));
        // Replay of the same sequence.
        assert!(!session.accept_sequence(2));
        // Stale arrival below the window.
        assert!(!session.accept_sequence(1));
        assert!(session.accept_sequence(10));
        assert!(!session.accept_sequence(5));
    }

    #[test]
    fn test_flood_gate_limits_per_second() {
        let gate = FloodGate::new();
        let addr: IpAddr = "10.0.0.1".parse().unwrap();
        let now = 1_000_000;

        for _ in 0..FLOOD_LIMIT_PER_SECOND {
            assert!(gate.allow(addr, now));
        }
        assert!(!gate.allow(addr, now));

        // A different address has its own window.
        let other: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(gate.allow(other, now));

        // The next second resets the count.
        assert!(gate.allow(addr, now + 1_000));
    }

    #[test]
    fn test_flood_gate_reaps_stale_windows() {
        let gate = FloodGate::new();
        let addr: IpAddr = "10.0.0.1".parse().unwrap();
        gate.allow(addr, 1_000_000);
        assert_eq!(gate.windows.len(), 1);

        gate.reap(1_000_000 + 61_000);
        assert_eq!(gate.windows.len(), 0);

        gate.allow(addr, 1_000_000 + 61_000);
        gate.reap(1_000_000 + 90_000);
        assert_eq!(gate.windows.len(), 1);
    }

    #[test]
    fn test_session_table_insert_and_remove() {
        let table = UdpSessionTable::new();
        let secret = URL_SAFE_NO_PAD.encode([7u8; 32]);
        table.insert(42, 9, &secret);

        let session = table.get(42).unwrap();
        assert_eq!(session.account_id, 9);
        assert_eq!(session.secret, vec![7u8; 32]);

        table.remove(42);
        assert!(table.get(42).is_none());
    }
}
