//! Per-tick event accumulation and coalesced outbound writes.
//!
//! Components queue events with the world position they happened at; the
//! flush stage folds everything inside a player's 3x3 neighborhood into a
//! single EntitySync frame and issues exactly one network write per
//! connection per tick.

use std::collections::BTreeMap;

use bytes::BytesMut;

use flyagain_protocol::messages::{DamageResult, DeathEvent, EntityMove, EntityState, EntitySync};
use flyagain_protocol::{encode_frame, Frame, Opcode};

use crate::connection::ConnectionHandle;
use crate::entity::PlayerEntity;
use crate::grid::SpatialGrid;

#[derive(Debug)]
pub enum EventKind {
    Spawn(EntityState),
    Despawn(u64),
    Move(EntityMove),
    Damage(DamageResult),
    Death(DeathEvent),
}

/// Events of one channel for one tick, tagged with their position for
/// interest filtering.
#[derive(Debug, Default)]
pub struct PendingEvents {
    events: Vec<(f32, f32, EventKind)>,
    /// Loot rolls scheduled for the I/O pool: (character id, item id, qty).
    pub loot: Vec<(i64, u32, u32)>,
}

impl PendingEvents {
    pub fn push(&mut self, x: f32, z: f32, event: EventKind) {
        self.events.push((x, z, event));
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.loot.clear();
    }

    /// The EntitySync visible from (x, z), or None when nothing applies.
    /// The viewer's own spawn/move/despawn is skipped; damage and deaths
    /// are delivered even when the viewer is a participant.
    pub fn sync_for(&self, x: f32, z: f32, skip_entity: u64) -> Option<EntitySync> {
        let mut sync = EntitySync::default();
        for (ex, ez, event) in &self.events {
            if !SpatialGrid::in_neighborhood(x, z, *ex, *ez) {
                continue;
            }
            match event {
                EventKind::Spawn(state) if state.entity_id != skip_entity => {
                    sync.spawns.push(state.clone())
                }
                EventKind::Despawn(id) if *id != skip_entity => sync.despawns.push(*id),
                EventKind::Move(mv) if mv.entity_id != skip_entity => sync.moves.push(mv.clone()),
                EventKind::Damage(dmg) => sync.damage.push(dmg.clone()),
                EventKind::Death(death) => sync.deaths.push(death.clone()),
                _ => {}
            }
        }

        let empty = sync.spawns.is_empty()
            && sync.despawns.is_empty()
            && sync.moves.is_empty()
            && sync.damage.is_empty()
            && sync.deaths.is_empty();
        (!empty).then_some(sync)
    }
}

/// Batches frames per connection during a tick; one write per connection
/// at flush.
#[derive(Default)]
pub struct Broadcaster {
    pending: BTreeMap<u64, (ConnectionHandle, BytesMut)>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&mut self, conn: &ConnectionHandle, frame: &Frame) {
        let entry = self
            .pending
            .entry(conn.conn_id)
            .or_insert_with(|| (conn.clone(), BytesMut::new()));
        frame.write_to(&mut entry.1);
    }

    /// Fan the channel's tick events out to every player in it.
    pub fn queue_channel_events(
        &mut self,
        players: &BTreeMap<u64, PlayerEntity>,
        events: &PendingEvents,
    ) {
        if events.is_empty() {
            return;
        }
        for player in players.values() {
            if let Some(sync) = events.sync_for(player.x, player.z, player.entity_id) {
                self.queue(&player.conn, &encode_frame(Opcode::EntitySync, &sync));
            }
        }
    }

    /// One TCP write per connection with everything queued this tick.
    pub fn flush(&mut self) {
        for (_, (conn, buf)) in std::mem::take(&mut self.pending) {
            if !buf.is_empty() {
                conn.send_bytes(buf.freeze());
            }
        }
    }
}
