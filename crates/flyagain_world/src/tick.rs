//! The world tick.
//!
//! One dedicated thread, fixed rate, never suspends. Each tick: drain the
//! input queue, apply movement, step monster AI, process auto-attacks,
//! broadcast coalesced state, and periodically stage dirty players for
//! persistence. Overruns are logged; ticks are never dropped.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use flyagain_common::gateway::error_frame;
use flyagain_common::unix_now_ms;
use flyagain_common::zones;
use flyagain_common::ServiceError;
use flyagain_protocol::messages::*;
use flyagain_protocol::{decode_payload, encode_frame, Opcode};

use crate::ai;
use crate::broadcast::{Broadcaster, EventKind, PendingEvents};
use crate::combat;
use crate::entity::{EntityManager, PlayerEntity};
use crate::movement::{self, MoveOutcome};
use crate::persistence::{IoSink, IoTask};
use crate::queue::{InputQueue, JoinRequest, QueuedPacket, WorldCommand};
use crate::zone::ZoneManager;

/// Dirty players are staged to the shared store this often.
pub const PERSIST_INTERVAL_MS: u64 = 60_000;
pub const MAX_CHAT_LEN: usize = 255;

/// Static data the tick consults: skills by id, loot entries by monster
/// definition id as (item, chance, min, max).
#[derive(Default)]
pub struct GameData {
    pub skills: BTreeMap<u32, SkillDef>,
    pub loot_tables: BTreeMap<u32, Vec<(u32, f32, u32, u32)>>,
}

impl GameData {
    pub fn from_defs(skills: Vec<SkillDef>, loot: Vec<LootTableEntry>) -> Self {
        let mut tables: BTreeMap<u32, Vec<(u32, f32, u32, u32)>> = BTreeMap::new();
        for entry in loot {
            tables.entry(entry.monster_id).or_default().push((
                entry.item_id,
                entry.chance,
                entry.min_quantity,
                entry.max_quantity,
            ));
        }
        Self {
            skills: skills.into_iter().map(|s| (s.id, s)).collect(),
            loot_tables: tables,
        }
    }
}

/// All world state, owned exclusively by the tick thread.
pub struct Simulation {
    pub zones: ZoneManager,
    pub entities: Arc<EntityManager>,
    pub game_data: GameData,
    pub io: IoSink,
    rng: StdRng,
    /// account id -> (zone, channel, entity id)
    locations: BTreeMap<i64, (u32, u32, u64)>,
    events: BTreeMap<(u32, u32), PendingEvents>,
    last_persist_ms: u64,
}

impl Simulation {
    pub fn new(
        zones: ZoneManager,
        entities: Arc<EntityManager>,
        game_data: GameData,
        io: IoSink,
        rng_seed: u64,
    ) -> Self {
        Self {
            zones,
            entities,
            game_data,
            io,
            rng: StdRng::seed_from_u64(rng_seed),
            locations: BTreeMap::new(),
            events: BTreeMap::new(),
            last_persist_ms: 0,
        }
    }

    fn events_for(&mut self, zone_id: u32, channel_id: u32) -> &mut PendingEvents {
        self.events.entry((zone_id, channel_id)).or_default()
    }

    // -- commands -----------------------------------------------------------

    pub fn handle_command(
        &mut self,
        command: WorldCommand,
        now_ms: u64,
        broadcaster: &mut Broadcaster,
    ) {
        match command {
            WorldCommand::Join(join) => self.handle_join(*join, now_ms),
            WorldCommand::Leave { account_id } => self.handle_leave(account_id, now_ms),
            WorldCommand::Packet(packet) => self.handle_packet(packet, now_ms, broadcaster),
        }
    }

    /// World entry, tick side: zone placement, spatial registration,
    /// initial ZoneData, spawn broadcast, presence write.
    fn handle_join(&mut self, join: JoinRequest, now_ms: u64) {
        let (zone_id, spawn_override) = match self.zones.zone_def(join.record.map_id) {
            Some(zone) => (zone.id, None),
            None => {
                let town = zones::town();
                (town.id, Some(town.spawn))
            }
        };
        let zone_name = self
            .zones
            .zone_def(zone_id)
            .map(|z| z.name.to_string())
            .unwrap_or_default();
        let Some(channel_id) = self.zones.best_channel_id(zone_id, &self.entities) else {
            // The fixed zone set always contains the town; this is a bug
            // guard, not a player-facing path.
            warn!(zone_id, "no channel available for join");
            self.entities.unregister(join.account_id);
            return;
        };

        let mut player = PlayerEntity::from_record(
            join.entity_id,
            &join.record,
            join.session_id,
            join.udp_token,
            join.conn,
            now_ms,
        );
        if let Some((x, y, z)) = spawn_override {
            player.x = x;
            player.y = y;
            player.z = z;
        }

        let character_id = player.character_id;
        let account_id = player.account_id;
        let entity_id = player.entity_id;
        let conn = player.conn.clone();
        let state = {
            let Some(channel) = self.zones.channel_mut(zone_id, channel_id) else {
                warn!(zone_id, channel_id, "channel missing during join");
                self.entities.unregister(account_id);
                conn.send_frame(&error_frame(
                    Opcode::EnterWorld as u16,
                    &ServiceError::Business("World entry failed. Try again shortly.".to_string()),
                ));
                return;
            };
            let (px, pz) = (player.x, player.z);

            if channel.add_player(player).is_err() {
                warn!(zone_id, channel_id, "channel filled during join");
                self.entities.unregister(account_id);
                conn.send_frame(&error_frame(
                    Opcode::EnterWorld as u16,
                    &ServiceError::Business("World is full. Try again shortly.".to_string()),
                ));
                return;
            }

            // Initial interest set: everything in the 3x3 neighborhood.
            let mut entities_in_view = Vec::new();
            for id in channel.grid.nearby(px, pz) {
                if id == entity_id {
                    continue;
                }
                if let Some(p) = channel.players.get(&id) {
                    entities_in_view.push(p.to_entity_state());
                } else if let Some(m) = channel.monsters.get(&id) {
                    if m.alive() {
                        entities_in_view.push(m.to_entity_state());
                    }
                }
            }

            let player = &channel.players[&entity_id];
            conn.send_frame(&encode_frame(
                Opcode::ZoneData,
                &ZoneData {
                    zone_id,
                    zone_name,
                    channel_id,
                    entity_id,
                    x: player.x,
                    y: player.y,
                    z: player.z,
                    entities: entities_in_view,
                },
            ));
            player.to_entity_state()
        };

        let (sx, sz) = (state.x, state.z);
        self.events_for(zone_id, channel_id)
            .push(sx, sz, EventKind::Spawn(state));
        self.locations
            .insert(account_id, (zone_id, channel_id, entity_id));
        self.io.send(IoTask::PresenceAdd {
            zone_id,
            channel_id,
            character_id,
        });
        info!(account_id, entity_id, zone_id, channel_id, "player entered world");
    }

    fn handle_leave(&mut self, account_id: i64, now_ms: u64) {
        let Some((zone_id, channel_id, entity_id)) = self.locations.remove(&account_id) else {
            return;
        };
        let Some(channel) = self.zones.channel_mut(zone_id, channel_id) else {
            return;
        };
        let Some(player) = channel.remove_player(entity_id) else {
            return;
        };

        self.events_for(zone_id, channel_id).push(
            player.x,
            player.z,
            EventKind::Despawn(entity_id),
        );
        self.entities.unregister(account_id);
        self.io.send(IoTask::DisconnectFlush {
            record: player.to_record(now_ms),
            zone_id,
            channel_id,
            session_id: player.session_id.clone(),
            account_id,
        });
        player.conn.close();
        info!(account_id, entity_id, "player left world");
    }

    fn handle_packet(
        &mut self,
        packet: QueuedPacket,
        now_ms: u64,
        broadcaster: &mut Broadcaster,
    ) {
        let Some(&(zone_id, channel_id, entity_id)) = self.locations.get(&packet.account_id)
        else {
            return;
        };

        match Opcode::from_u16(packet.opcode) {
            Some(Opcode::MovementInput) => {
                let Ok(input) = decode_payload::<MovementInput>(&frame_of(&packet)) else {
                    return;
                };
                let Some(channel) = self.zones.channel_mut(zone_id, channel_id) else {
                    return;
                };
                let Some(player) = channel.players.get_mut(&entity_id) else {
                    return;
                };
                match movement::sanitize_input(&input) {
                    Ok(state) => movement::apply_input(player, state, input.rotation),
                    Err(why) => {
                        player.conn.send_frame(&encode_frame(
                            Opcode::PositionCorrection,
                            &PositionCorrection {
                                x: player.x,
                                y: player.y,
                                z: player.z,
                                rotation: player.rotation,
                                reason: why.to_string(),
                            },
                        ));
                    }
                }
            }
            Some(Opcode::SelectTarget) => {
                let Ok(select) = decode_payload::<SelectTarget>(&frame_of(&packet)) else {
                    return;
                };
                let Some(channel) = self.zones.channel_mut(zone_id, channel_id) else {
                    return;
                };
                let Some(player) = channel.players.get_mut(&entity_id) else {
                    return;
                };
                if select.target_entity_id == 0 {
                    player.target_entity_id = None;
                    player.auto_attacking = false;
                } else {
                    player.target_entity_id = Some(select.target_entity_id);
                    player.auto_attacking = select.auto_attack;
                }
            }
            Some(Opcode::ChatMessage) => {
                self.handle_chat(&packet, zone_id, channel_id, entity_id, broadcaster);
            }
            Some(Opcode::MoveItem) => {
                let Ok(req) = decode_payload::<MoveItemRequest>(&frame_of(&packet)) else {
                    return;
                };
                let Some(channel) = self.zones.channel_mut(zone_id, channel_id) else {
                    return;
                };
                let Some(player) = channel.players.get(&entity_id) else {
                    return;
                };
                self.io.send(IoTask::ItemMove {
                    character_id: player.character_id,
                    from_slot: req.from_slot,
                    to_slot: req.to_slot,
                    conn: player.conn.clone(),
                });
            }
            Some(Opcode::ChannelSwitch) => {
                let Ok(req) = decode_payload::<ChannelSwitchRequest>(&frame_of(&packet)) else {
                    return;
                };
                self.handle_channel_switch(packet.account_id, req.channel_id, now_ms);
            }
            Some(Opcode::ChannelList) => {
                let Some(channel) = self.zones.channel(zone_id, channel_id) else {
                    return;
                };
                let Some(player) = channel.players.get(&entity_id) else {
                    return;
                };
                player.conn.send_frame(&encode_frame(
                    Opcode::ChannelList,
                    &ChannelListResponse {
                        zone_id,
                        channels: self.zones.channel_list(zone_id),
                    },
                ));
            }
            _ => {
                tracing::debug!(opcode = packet.opcode, "unhandled world opcode in queue");
            }
        }
    }

    fn handle_chat(
        &mut self,
        packet: &QueuedPacket,
        zone_id: u32,
        channel_id: u32,
        entity_id: u64,
        broadcaster: &mut Broadcaster,
    ) {
        let Ok(chat) = decode_payload::<ChatMessage>(&frame_of(packet)) else {
            return;
        };
        if chat.text.is_empty() || chat.text.chars().count() > MAX_CHAT_LEN {
            return;
        }
        let Some(channel) = self.zones.channel(zone_id, channel_id) else {
            return;
        };
        let Some(sender) = channel.players.get(&entity_id) else {
            return;
        };

        let frame = encode_frame(
            Opcode::ChatMessage,
            &ChatMessage {
                sender_entity_id: entity_id,
                sender_name: sender.name.clone(),
                text: chat.text,
            },
        );
        for id in channel.grid.nearby(sender.x, sender.z) {
            if let Some(listener) = channel.players.get(&id) {
                broadcaster.queue(&listener.conn, &frame);
            }
        }
    }

    /// Move a player to another channel of its zone: despawn broadcast in
    /// the old channel, spawn broadcast plus fresh ZoneData in the new one.
    fn handle_channel_switch(&mut self, account_id: i64, target_channel: u32, now_ms: u64) {
        let Some(&(zone_id, channel_id, entity_id)) = self.locations.get(&account_id) else {
            return;
        };
        if target_channel == channel_id {
            return;
        }

        let switch_error = match self.zones.channel(zone_id, target_channel) {
            None => Some("No such channel."),
            Some(target) if !target.has_capacity() => Some("Channel is full."),
            Some(_) => None,
        };
        if let Some(message) = switch_error {
            let conn = self
                .zones
                .channel(zone_id, channel_id)
                .and_then(|c| c.players.get(&entity_id).map(|p| p.conn.clone()));
            if let Some(conn) = conn {
                conn.send_frame(&error_frame(
                    Opcode::ChannelSwitch as u16,
                    &ServiceError::Business(message.to_string()),
                ));
            }
            return;
        }

        let player = {
            let Some(channel) = self.zones.channel_mut(zone_id, channel_id) else {
                warn!(zone_id, channel_id, "source channel missing during switch");
                return;
            };
            match channel.remove_player(entity_id) {
                Some(player) => player,
                None => return,
            }
        };

        self.events_for(zone_id, channel_id).push(
            player.x,
            player.z,
            EventKind::Despawn(entity_id),
        );

        let character_id = player.character_id;
        let conn = player.conn.clone();
        let (px, pz) = (player.x, player.z);
        let Some(target) = self.zones.channel_mut(zone_id, target_channel) else {
            warn!(zone_id, target_channel, "target channel missing during switch");
            self.restore_after_failed_switch(player, account_id, zone_id, channel_id, now_ms);
            return;
        };
        if let Err(player) = target.add_player(player) {
            warn!(zone_id, target_channel, "target channel filled during switch");
            self.restore_after_failed_switch(player, account_id, zone_id, channel_id, now_ms);
            return;
        }

        let mut entities_in_view = Vec::new();
        for id in target.grid.nearby(px, pz) {
            if id == entity_id {
                continue;
            }
            if let Some(p) = target.players.get(&id) {
                entities_in_view.push(p.to_entity_state());
            } else if let Some(m) = target.monsters.get(&id) {
                if m.alive() {
                    entities_in_view.push(m.to_entity_state());
                }
            }
        }
        let state = target.players[&entity_id].to_entity_state();
        let zone_name = self
            .zones
            .zone_def(zone_id)
            .map(|z| z.name.to_string())
            .unwrap_or_default();
        conn.send_frame(&encode_frame(
            Opcode::ZoneData,
            &ZoneData {
                zone_id,
                zone_name,
                channel_id: target_channel,
                entity_id,
                x: px,
                y: state.y,
                z: pz,
                entities: entities_in_view,
            },
        ));

        self.events_for(zone_id, target_channel)
            .push(px, pz, EventKind::Spawn(state));
        self.locations
            .insert(account_id, (zone_id, target_channel, entity_id));
        self.io.send(IoTask::PresenceSwitch {
            from_zone: zone_id,
            from_channel: channel_id,
            to_zone: zone_id,
            to_channel: target_channel,
            character_id,
        });
    }

    /// Put a player back into its previous channel after a failed switch.
    /// If even that fails, fall through to a full removal so no state is
    /// left dangling; the client hears about the failure either way.
    fn restore_after_failed_switch(
        &mut self,
        player: PlayerEntity,
        account_id: i64,
        zone_id: u32,
        channel_id: u32,
        now_ms: u64,
    ) {
        let conn = player.conn.clone();
        let state = player.to_entity_state();
        let record = player.to_record(now_ms);
        let session_id = player.session_id.clone();

        let restored = match self.zones.channel_mut(zone_id, channel_id) {
            Some(old) => old.add_player(player).is_ok(),
            None => false,
        };
        if restored {
            // Undo the despawn that already went out for the old channel.
            self.events_for(zone_id, channel_id)
                .push(state.x, state.z, EventKind::Spawn(state));
        } else {
            warn!(account_id, "player not restorable after failed switch, removing");
            self.locations.remove(&account_id);
            self.entities.unregister(account_id);
            self.io.send(IoTask::DisconnectFlush {
                record,
                zone_id,
                channel_id,
                session_id,
                account_id,
            });
        }

        conn.send_frame(&error_frame(
            Opcode::ChannelSwitch as u16,
            &ServiceError::Business("Channel switch failed.".to_string()),
        ));
        if !restored {
            conn.close();
        }
    }

    // -- simulation step ----------------------------------------------------

    pub fn step(&mut self, now_ms: u64, dt_ms: u64, broadcaster: &mut Broadcaster) {
        self.apply_movement(dt_ms);
        self.step_ai(now_ms, dt_ms);
        self.process_combat(now_ms);
        self.flush_events(broadcaster);
        self.persist_dirty(now_ms);
    }

    fn apply_movement(&mut self, dt_ms: u64) {
        let mut moves: Vec<(u32, u32, f32, f32, EntityMove)> = Vec::new();
        for channel in self.zones.channels_mut() {
            let ids: Vec<u64> = channel.players.keys().copied().collect();
            for id in ids {
                let Some(player) = channel.players.get_mut(&id) else {
                    continue;
                };
                match movement::apply_movement(player, dt_ms) {
                    MoveOutcome::Idle => {}
                    MoveOutcome::Moved { old_x, old_z } => {
                        channel.grid.update(id, old_x, old_z, player.x, player.z);
                        moves.push((
                            channel.zone_id,
                            channel.channel_id,
                            player.x,
                            player.z,
                            EntityMove {
                                entity_id: id,
                                x: player.x,
                                y: player.y,
                                z: player.z,
                                rotation: player.rotation,
                            },
                        ));
                    }
                    MoveOutcome::Rejected(why) => {
                        player.conn.send_frame(&encode_frame(
                            Opcode::PositionCorrection,
                            &PositionCorrection {
                                x: player.x,
                                y: player.y,
                                z: player.z,
                                rotation: player.rotation,
                                reason: why.to_string(),
                            },
                        ));
                    }
                }
            }
        }
        for (zone_id, channel_id, x, z, mv) in moves {
            self.events_for(zone_id, channel_id)
                .push(x, z, EventKind::Move(mv));
        }
    }

    fn step_ai(&mut self, now_ms: u64, dt_ms: u64) {
        for channel in self.zones.channels_mut() {
            let events = self
                .events
                .entry((channel.zone_id, channel.channel_id))
                .or_default();
            let crate::zone::ZoneChannel {
                players,
                monsters,
                grid,
                ..
            } = channel;
            for monster in monsters.values_mut() {
                ai::step_monster(monster, players, grid, now_ms, dt_ms, &mut self.rng, events);
            }
        }
    }

    fn process_combat(&mut self, now_ms: u64) {
        for channel in self.zones.channels_mut() {
            let events = self
                .events
                .entry((channel.zone_id, channel.channel_id))
                .or_default();
            combat::process_auto_attacks(
                &mut channel.players,
                &mut channel.monsters,
                now_ms,
                &mut self.rng,
                events,
                &self.game_data.loot_tables,
            );
        }
    }

    fn flush_events(&mut self, broadcaster: &mut Broadcaster) {
        for ((zone_id, channel_id), events) in self.events.iter_mut() {
            if events.is_empty() && events.loot.is_empty() {
                continue;
            }
            for grant in events.loot.drain(..) {
                self.io.send(IoTask::LootGrant {
                    character_id: grant.0,
                    item_id: grant.1,
                    quantity: grant.2,
                });
            }
            if let Some(channel) = self.zones.channel(*zone_id, *channel_id) {
                broadcaster.queue_channel_events(&channel.players, events);
            }
            events.clear();
        }
    }

    /// Every minute, stage dirty players into the shared store and mark
    /// them for the DataService write-back. The flag clears immediately so
    /// a slow save cannot double-stage.
    fn persist_dirty(&mut self, now_ms: u64) {
        if now_ms.saturating_sub(self.last_persist_ms) < PERSIST_INTERVAL_MS {
            return;
        }
        self.last_persist_ms = now_ms;

        let mut staged = 0usize;
        let mut tasks = Vec::new();
        for channel in self.zones.channels_mut() {
            for player in channel.players.values_mut() {
                // Liveness probe: a session evicted by a newer login gets
                // this player removed on a later tick.
                tasks.push(IoTask::SessionCheck {
                    account_id: player.account_id,
                    session_id: player.session_id.clone(),
                });
                if !player.dirty {
                    continue;
                }
                player.dirty = false;
                player.last_save_ms = now_ms;
                tasks.push(IoTask::SnapshotSave(player.to_record(now_ms)));
                staged += 1;
            }
        }
        for task in tasks {
            self.io.send(task);
        }
        if staged > 0 {
            info!(staged, "dirty players staged for write-back");
        }
    }

    /// Authoritative records of everyone still in world, for the shutdown
    /// flush.
    pub fn final_snapshots(&self, now_ms: u64) -> Vec<CharacterRecord> {
        self.zones
            .channels_iter()
            .flat_map(|c| c.players.values())
            .map(|p| p.to_record(now_ms))
            .collect()
    }
}

fn frame_of(packet: &QueuedPacket) -> flyagain_protocol::Frame {
    flyagain_protocol::Frame {
        opcode: packet.opcode,
        payload: packet.payload.clone(),
    }
}

/// The dedicated tick thread body. Returns the final snapshots once the
/// shutdown flag is observed.
pub fn run_loop(
    mut sim: Simulation,
    queue: Arc<InputQueue>,
    shutdown: Arc<AtomicBool>,
    tick_ms: u64,
) -> Vec<CharacterRecord> {
    let mut broadcaster = Broadcaster::new();
    let mut buf: Vec<WorldCommand> = Vec::with_capacity(4_096);
    let interval = Duration::from_millis(tick_ms);
    let mut next_tick = Instant::now() + interval;

    loop {
        let now_ms = unix_now_ms();
        queue.drain_into(&mut buf);
        for command in buf.drain(..) {
            sim.handle_command(command, now_ms, &mut broadcaster);
        }
        sim.step(now_ms, tick_ms, &mut broadcaster);
        broadcaster.flush();

        if shutdown.load(Ordering::SeqCst) {
            info!("tick loop stopping, capturing final snapshots");
            return sim.final_snapshots(unix_now_ms());
        }

        let now = Instant::now();
        if now < next_tick {
            std::thread::sleep(next_tick - now);
        } else {
            // Fell behind: log it and keep the cadence without sleeping
            // negative time or skipping work.
            warn!(
                behind_ms = (now - next_tick).as_millis() as u64,
                "tick overran its budget"
            );
        }
        next_tick += interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use flyagain_protocol::decode_payload;

    use crate::connection::{ConnectionHandle, TestReceiver};
    use crate::entity::FIRST_MONSTER_ENTITY_ID;
    use crate::zone::ZoneManager;

    fn record(character_id: i64, account_id: i64) -> CharacterRecord {
        CharacterRecord {
            id: character_id,
            account_id,
            name: format!("Char{character_id}"),
            class_id: 2,
            level: 1,
            hp: 100,
            max_hp: 100,
            mp: 50,
            max_mp: 50,
            map_id: 1,
            x: 500.0,
            y: 0.0,
            z: 500.0,
            ..Default::default()
        }
    }

    fn monster_def() -> MonsterDef {
        MonsterDef {
            id: 1,
            name: "Wolf".to_string(),
            level: 3,
            max_hp: 30,
            attack: 10,
            defense: 0,
            xp_reward: 35,
            aggro_range: 15.0,
            attack_range: 2.0,
            attack_speed_ms: 1_000,
            move_speed: 3.0,
            respawn_ms: 30_000,
            leash_distance: 40.0,
        }
    }

    struct Harness {
        sim: Simulation,
        broadcaster: Broadcaster,
        now_ms: u64,
        io_rx: tokio::sync::mpsc::UnboundedReceiver<IoTask>,
    }

    impl Harness {
        fn new(spawns: Vec<SpawnRecord>) -> Self {
            let entities = Arc::new(EntityManager::new());
            let zones = ZoneManager::new(1_000, &[monster_def()], &spawns, &entities);
            let (io, io_rx) = IoSink::new();
            Self {
                sim: Simulation::new(zones, entities, GameData::default(), io, 7),
                broadcaster: Broadcaster::new(),
                now_ms: 1_000_000,
                io_rx,
            }
        }

        fn join(&mut self, character_id: i64, account_id: i64) -> (u64, TestReceiver) {
            let entity_id = self.sim.entities.try_register(account_id).unwrap();
            let (conn, rx) = ConnectionHandle::new_for_test();
            self.sim.handle_command(
                WorldCommand::Join(Box::new(JoinRequest {
                    account_id,
                    entity_id,
                    record: record(character_id, account_id),
                    session_id: "sid".to_string(),
                    udp_token: 1,
                    conn,
                })),
                self.now_ms,
                &mut self.broadcaster,
            );
            (entity_id, rx)
        }

        fn packet(&mut self, account_id: i64, opcode: Opcode, payload: Bytes) {
            self.sim.handle_command(
                WorldCommand::Packet(QueuedPacket {
                    account_id,
                    opcode: opcode as u16,
                    payload,
                    conn: None,
                    received_ms: self.now_ms,
                }),
                self.now_ms,
                &mut self.broadcaster,
            );
        }

        fn tick(&mut self) {
            self.sim.step(self.now_ms, 50, &mut self.broadcaster);
            self.broadcaster.flush();
            self.now_ms += 50;
        }
    }

    fn payload_of<M: prost::Message>(msg: &M) -> Bytes {
        let mut buf = bytes::BytesMut::new();
        msg.encode(&mut buf).unwrap();
        buf.freeze()
    }

    #[test]
    fn test_join_sends_zone_data_for_town() {
        let mut harness = Harness::new(vec![]);
        let (entity_id, mut rx) = harness.join(1, 42);
        assert_eq!(entity_id, 1);

        let frames = rx.drain_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].opcode, Opcode::ZoneData as u16);
        let zone: ZoneData = decode_payload(&frames[0]).unwrap();
        assert_eq!(zone.zone_id, 1);
        assert_eq!(zone.zone_name, "Aerheim");
        assert_eq!(zone.channel_id, 0);
        assert_eq!(zone.entity_id, 1);
        // No other observers yet.
        assert!(zone.entities.is_empty());
    }

    #[test]
    fn test_unknown_map_falls_back_to_town_spawn() {
        let mut harness = Harness::new(vec![]);
        let entity_id = harness.sim.entities.try_register(7).unwrap();
        let (conn, mut rx) = ConnectionHandle::new_for_test();
        let mut rec = record(5, 7);
        rec.map_id = 99;
        rec.x = 9_000.0;
        harness.sim.handle_command(
            WorldCommand::Join(Box::new(JoinRequest {
                account_id: 7,
                entity_id,
                record: rec,
                session_id: "sid".to_string(),
                udp_token: 1,
                conn,
            })),
            harness.now_ms,
            &mut harness.broadcaster,
        );

        let frames = rx.drain_frames();
        let zone: ZoneData = decode_payload(&frames[0]).unwrap();
        assert_eq!(zone.zone_id, 1);
        assert_eq!(zone.x, 500.0);
    }

    #[test]
    fn test_neighbor_sees_spawn_broadcast() {
        let mut harness = Harness::new(vec![]);
        let (_, mut rx1) = harness.join(1, 41);
        harness.tick();
        rx1.drain_frames(); // own ZoneData + first tick output

        let (entity2, _rx2) = harness.join(2, 42);
        harness.tick();

        let frames = rx1.drain_frames();
        let sync = frames
            .iter()
            .find(|f| f.opcode == Opcode::EntitySync as u16)
            .expect("spawn broadcast");
        let sync: EntitySync = decode_payload(sync).unwrap();
        assert_eq!(sync.spawns.len(), 1);
        assert_eq!(sync.spawns[0].entity_id, entity2);
    }

    #[test]
    fn test_movement_packet_moves_player_and_broadcasts() {
        let mut harness = Harness::new(vec![]);
        let (_e1, mut rx1) = harness.join(1, 41);
        let (_e2, _rx2) = harness.join(2, 42);
        harness.tick();
        rx1.drain_frames();

        harness.packet(
            42,
            Opcode::MovementInput,
            payload_of(&MovementInput {
                dx: 1.0,
                dy: 0.0,
                dz: 0.0,
                rotation: 0.0,
                moving: true,
                flying: false,
            }),
        );
        harness.tick();

        // Entity 2 advanced 0.25 units (5 u/s x 50 ms); neighbor was told.
        let frames = rx1.drain_frames();
        let sync = frames
            .iter()
            .find(|f| f.opcode == Opcode::EntitySync as u16)
            .expect("move broadcast");
        let sync: EntitySync = decode_payload(sync).unwrap();
        assert_eq!(sync.moves.len(), 1);
        assert!((sync.moves[0].x - 500.25).abs() < 1e-3);
    }

    #[test]
    fn test_rejected_movement_gets_correction() {
        let mut harness = Harness::new(vec![]);
        let (_entity, mut rx) = harness.join(1, 42);
        rx.drain_frames();

        harness.packet(
            42,
            Opcode::MovementInput,
            payload_of(&MovementInput {
                dx: 0.0,
                dy: 1.0,
                dz: 0.0,
                rotation: 0.0,
                moving: true,
                flying: false,
            }),
        );
        // Climb until the inclusive walking ceiling would be crossed.
        for _ in 0..6 {
            harness.tick();
        }

        let frames = rx.drain_frames();
        let correction = frames
            .iter()
            .find(|f| f.opcode == Opcode::PositionCorrection as u16)
            .expect("position correction");
        let correction: PositionCorrection = decode_payload(correction).unwrap();
        assert_eq!(correction.reason, "no_fly");
        assert!(correction.y <= 1.0);
    }

    #[test]
    fn test_auto_attack_kills_monster_and_awards_xp() {
        let mut harness = Harness::new(vec![SpawnRecord {
            monster_id: 1,
            zone_id: 1,
            x: 501.0,
            y: 0.0,
            z: 500.0,
            radius: 0.0,
        }]);
        let (_entity, mut rx) = harness.join(1, 42);
        // str 0/level 1 gives attack 1; raise strength via the record
        // instead: reach in directly.
        {
            let channel = harness.sim.zones.channel_mut(1, 0).unwrap();
            let player = channel.players.get_mut(&1).unwrap();
            player.strength = 20; // attack 41
        }

        harness.packet(
            42,
            Opcode::SelectTarget,
            payload_of(&SelectTarget {
                target_entity_id: FIRST_MONSTER_ENTITY_ID,
                auto_attack: true,
            }),
        );
        harness.now_ms += combat::AUTO_ATTACK_INTERVAL_MS;
        harness.tick();

        let frames = rx.drain_frames();
        let sync = frames
            .iter()
            .filter(|f| f.opcode == Opcode::EntitySync as u16)
            .last()
            .expect("combat sync");
        let sync: EntitySync = decode_payload(sync).unwrap();
        assert_eq!(sync.damage.len(), 1);
        assert!(sync.damage[0].amount >= 30, "one hit kills the wolf");
        assert_eq!(sync.deaths.len(), 1);
        assert_eq!(sync.deaths[0].xp_awarded, 35);

        let channel = harness.sim.zones.channel(1, 0).unwrap();
        assert_eq!(
            channel.monsters[&FIRST_MONSTER_ENTITY_ID].ai_state,
            crate::entity::AiState::Dead
        );
        assert_eq!(channel.players[&1].xp, 35);
    }

    #[test]
    fn test_chat_reaches_neighborhood_only() {
        let mut harness = Harness::new(vec![]);
        let (_e1, mut rx1) = harness.join(1, 41);
        let (_e2, _rx2) = harness.join(2, 42);
        harness.tick();
        rx1.drain_frames();

        harness.packet(
            42,
            Opcode::ChatMessage,
            payload_of(&ChatMessage {
                sender_entity_id: 0,
                sender_name: String::new(),
                text: "hallo".to_string(),
            }),
        );
        harness.tick();

        let frames = rx1.drain_frames();
        let chat = frames
            .iter()
            .find(|f| f.opcode == Opcode::ChatMessage as u16)
            .expect("chat relayed");
        let chat: ChatMessage = decode_payload(chat).unwrap();
        assert_eq!(chat.text, "hallo");
        assert_eq!(chat.sender_name, "Char2");
        assert_eq!(chat.sender_entity_id, 2);
    }

    #[test]
    fn test_leave_despawns_and_flushes() {
        let mut harness = Harness::new(vec![]);
        let (_e1, mut rx1) = harness.join(1, 41);
        let (entity2, _rx2) = harness.join(2, 42);
        harness.tick();
        rx1.drain_frames();

        harness.sim.handle_command(
            WorldCommand::Leave { account_id: 42 },
            harness.now_ms,
            &mut harness.broadcaster,
        );
        harness.tick();

        let frames = rx1.drain_frames();
        let sync = frames
            .iter()
            .find(|f| f.opcode == Opcode::EntitySync as u16)
            .expect("despawn broadcast");
        let sync: EntitySync = decode_payload(sync).unwrap();
        assert_eq!(sync.despawns, vec![entity2]);

        assert!(!harness.sim.entities.is_registered(42));
        // The disconnect flush was dispatched to the I/O pool.
        let mut saw_flush = false;
        while let Ok(task) = harness.io_rx.try_recv() {
            if let IoTask::DisconnectFlush { record, .. } = task {
                assert_eq!(record.id, 2);
                saw_flush = true;
            }
        }
        assert!(saw_flush);
    }

    #[test]
    fn test_periodic_persistence_stages_dirty_players_once() {
        let mut harness = Harness::new(vec![]);
        let (_entity, _rx) = harness.join(1, 42);
        harness.packet(
            42,
            Opcode::MovementInput,
            payload_of(&MovementInput {
                dx: 1.0,
                dy: 0.0,
                dz: 0.0,
                rotation: 0.0,
                moving: true,
                flying: false,
            }),
        );
        harness.tick();

        // The very first sweep stages the freshly dirtied player once.
        let mut snapshots = 0;
        while let Ok(task) = harness.io_rx.try_recv() {
            if let IoTask::SnapshotSave(record) = task {
                assert_eq!(record.id, 1);
                snapshots += 1;
            }
        }
        assert_eq!(snapshots, 1);

        // Stop moving: the flag stays clear, so the next sweep stages
        // nothing.
        harness.packet(
            42,
            Opcode::MovementInput,
            payload_of(&MovementInput {
                dx: 0.0,
                dy: 0.0,
                dz: 0.0,
                rotation: 0.0,
                moving: false,
                flying: false,
            }),
        );
        harness.tick();
        harness.now_ms += PERSIST_INTERVAL_MS;
        harness.tick();
        let mut more = 0;
        while let Ok(task) = harness.io_rx.try_recv() {
            if matches!(task, IoTask::SnapshotSave(_)) {
                more += 1;
            }
        }
        assert_eq!(more, 0);
    }

    #[test]
    fn test_channel_list_and_switch() {
        let mut harness = Harness::new(vec![]);
        let (_e1, mut rx1) = harness.join(1, 41);
        harness.tick();
        rx1.drain_frames();

        harness.packet(41, Opcode::ChannelList, Bytes::new());
        let frames = rx1.drain_frames();
        let list = frames
            .iter()
            .find(|f| f.opcode == Opcode::ChannelList as u16)
            .expect("channel list");
        let list: ChannelListResponse = decode_payload(list).unwrap();
        assert_eq!(list.zone_id, 1);
        assert_eq!(list.channels.len(), 1);
        assert_eq!(list.channels[0].players, 1);

        // Switching to a channel that does not exist is a business error.
        harness.packet(
            41,
            Opcode::ChannelSwitch,
            payload_of(&ChannelSwitchRequest { channel_id: 5 }),
        );
        let frames = rx1.drain_frames();
        assert!(frames
            .iter()
            .any(|f| f.opcode == Opcode::ErrorResponse as u16));
    }

    #[test]
    fn test_final_snapshots_cover_everyone() {
        let mut harness = Harness::new(vec![]);
        harness.join(1, 41);
        harness.join(2, 42);
        let snapshots = harness.sim.final_snapshots(harness.now_ms);
        let mut ids: Vec<i64> = snapshots.iter().map(|r| r.id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }
}
