//! Zones and channels.
//!
//! A zone is a fixed map region; each channel is an independent instance
//! of it with a capped player count. Channels are created on demand and
//! never deleted. Entity maps are ordered so iteration (and therefore AI
//! target selection) is deterministic.

use std::collections::BTreeMap;

use tracing::info;

use flyagain_common::zones::{self, ZoneDef};
use flyagain_protocol::messages::{ChannelInfo, MonsterDef, SpawnRecord};

use crate::entity::{EntityManager, MonsterEntity, PlayerEntity};
use crate::grid::SpatialGrid;

pub struct ZoneChannel {
    pub zone_id: u32,
    pub channel_id: u32,
    pub max_players: usize,
    pub players: BTreeMap<u64, PlayerEntity>,
    pub monsters: BTreeMap<u64, MonsterEntity>,
    pub grid: SpatialGrid,
}

impl ZoneChannel {
    pub fn new(zone_id: u32, channel_id: u32, max_players: usize) -> Self {
        Self {
            zone_id,
            channel_id,
            max_players,
            players: BTreeMap::new(),
            monsters: BTreeMap::new(),
            grid: SpatialGrid::new(),
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.players.len() < self.max_players
    }

    /// Admission is capacity-checked; a full channel hands the player
    /// back so the caller can restore or report without losing it.
    pub fn add_player(&mut self, mut player: PlayerEntity) -> Result<u64, PlayerEntity> {
        if !self.has_capacity() {
            return Err(player);
        }
        player.zone_id = self.zone_id;
        player.channel_id = self.channel_id;
        self.grid.insert(player.entity_id, player.x, player.z);
        let entity_id = player.entity_id;
        self.players.insert(entity_id, player);
        Ok(entity_id)
    }

    pub fn remove_player(&mut self, entity_id: u64) -> Option<PlayerEntity> {
        let player = self.players.remove(&entity_id)?;
        self.grid.remove(entity_id, player.x, player.z);
        Some(player)
    }

    pub fn add_monster(&mut self, monster: MonsterEntity) {
        self.grid.insert(monster.entity_id, monster.x, monster.z);
        self.monsters.insert(monster.entity_id, monster);
    }
}

/// A monster population blueprint: definition plus placement.
#[derive(Clone)]
pub struct MonsterSeed {
    pub def: MonsterDef,
    pub spawn: (f32, f32, f32),
    pub radius: f32,
}

pub struct ZoneManager {
    channels: BTreeMap<u32, Vec<ZoneChannel>>,
    seeds: BTreeMap<u32, Vec<MonsterSeed>>,
    channel_capacity: usize,
}

impl ZoneManager {
    /// Build the fixed zone set, channel 0 each, populated from the spawn
    /// table handed over by the DataService.
    pub fn new(
        channel_capacity: usize,
        monsters: &[MonsterDef],
        spawns: &[SpawnRecord],
        entities: &EntityManager,
    ) -> Self {
        let mut seeds: BTreeMap<u32, Vec<MonsterSeed>> = BTreeMap::new();
        for spawn in spawns {
            let Some(def) = monsters.iter().find(|m| m.id == spawn.monster_id) else {
                tracing::warn!(monster_id = spawn.monster_id, "spawn references unknown monster");
                continue;
            };
            seeds.entry(spawn.zone_id).or_default().push(MonsterSeed {
                def: def.clone(),
                spawn: (spawn.x, spawn.y, spawn.z),
                radius: spawn.radius,
            });
        }

        let mut manager = Self {
            channels: BTreeMap::new(),
            seeds,
            channel_capacity,
        };
        for zone in &zones::ZONES {
            let channel = build_channel(
                manager.seeds.get(&zone.id),
                manager.channel_capacity,
                zone.id,
                0,
                entities,
            );
            manager.channels.insert(zone.id, vec![channel]);
        }
        manager
    }

    pub fn zone_def(&self, zone_id: u32) -> Option<&'static ZoneDef> {
        zones::zone(zone_id)
    }

    /// The first channel of the zone with capacity, creating the next
    /// sequential channel when all are full.
    pub fn best_channel_id(&mut self, zone_id: u32, entities: &EntityManager) -> Option<u32> {
        let next_id = {
            let channels = self.channels.get(&zone_id)?;
            if let Some(channel) = channels.iter().find(|c| c.has_capacity()) {
                return Some(channel.channel_id);
            }
            channels.len() as u32
        };

        let channel = build_channel(
            self.seeds.get(&zone_id),
            self.channel_capacity,
            zone_id,
            next_id,
            entities,
        );
        match self.channels.get_mut(&zone_id) {
            Some(channels) => {
                channels.push(channel);
                Some(next_id)
            }
            None => {
                tracing::warn!(zone_id, "zone disappeared while opening a channel");
                None
            }
        }
    }

    pub fn channel_mut(&mut self, zone_id: u32, channel_id: u32) -> Option<&mut ZoneChannel> {
        self.channels
            .get_mut(&zone_id)?
            .iter_mut()
            .find(|c| c.channel_id == channel_id)
    }

    pub fn channel(&self, zone_id: u32, channel_id: u32) -> Option<&ZoneChannel> {
        self.channels
            .get(&zone_id)?
            .iter()
            .find(|c| c.channel_id == channel_id)
    }

    pub fn channel_list(&self, zone_id: u32) -> Vec<ChannelInfo> {
        self.channels
            .get(&zone_id)
            .map(|channels| {
                channels
                    .iter()
                    .map(|c| ChannelInfo {
                        channel_id: c.channel_id,
                        players: c.players.len() as u32,
                        capacity: c.max_players as u32,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut ZoneChannel> {
        self.channels.values_mut().flatten()
    }

    pub fn channels_iter(&self) -> impl Iterator<Item = &ZoneChannel> {
        self.channels.values().flatten()
    }
}

fn build_channel(
    seeds: Option<&Vec<MonsterSeed>>,
    capacity: usize,
    zone_id: u32,
    channel_id: u32,
    entities: &EntityManager,
) -> ZoneChannel {
    let mut channel = ZoneChannel::new(zone_id, channel_id, capacity);
    if let Some(seeds) = seeds {
        for seed in seeds {
            channel.add_monster(MonsterEntity::from_def(
                entities.next_monster_id(),
                &seed.def,
                zone_id,
                channel_id,
                seed.spawn,
                seed.radius,
            ));
        }
    }
    info!(
        zone_id,
        channel_id,
        monsters = channel.monsters.len(),
        "channel opened"
    );
    channel
}

#[cfg(test)]
mod tests {
    use super::*;
    use flyagain_protocol::messages::CharacterRecord;

    use crate::connection::ConnectionHandle;

    fn monster_def(id: u32) -> MonsterDef {
        MonsterDef {
            id,
            name: format!("Wolf{id}"),
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

    fn spawn_record(monster_id: u32, zone_id: u32) -> SpawnRecord {
        SpawnRecord {
            monster_id,
            zone_id,
            x: 100.0,
            y: 0.0,
            z: 100.0,
            radius: 5.0,
        }
    }

    fn test_player(entity_id: u64) -> PlayerEntity {
        let record = CharacterRecord {
            id: entity_id as i64,
            account_id: entity_id as i64,
            level: 1,
            max_hp: 100,
            hp: 100,
            ..Default::default()
        };
        let (conn, _rx) = ConnectionHandle::new_for_test();
        PlayerEntity::from_record(entity_id, &record, "sid".into(), 0, conn, 0)
    }

    #[test]
    fn test_all_zones_open_channel_zero() {
        let entities = EntityManager::new();
        let manager = ZoneManager::new(1_000, &[], &[], &entities);
        for zone_id in [1, 2, 3] {
            assert!(manager.channel(zone_id, 0).is_some());
        }
    }

    #[test]
    fn test_channel_zero_is_seeded_with_monsters() {
        let entities = EntityManager::new();
        let manager = ZoneManager::new(
            1_000,
            &[monster_def(1)],
            &[spawn_record(1, 1), spawn_record(1, 1)],
            &entities,
        );
        let channel = manager.channel(1, 0).unwrap();
        assert_eq!(channel.monsters.len(), 2);
        let first = channel.monsters.values().next().unwrap();
        assert_eq!(first.entity_id, 1_000_000);
        assert!(first.alive());
    }

    #[test]
    fn test_best_channel_creates_next_when_full() {
        let entities = EntityManager::new();
        let mut manager = ZoneManager::new(2, &[monster_def(1)], &[spawn_record(1, 1)], &entities);

        assert_eq!(manager.best_channel_id(1, &entities), Some(0));
        for entity_id in [1, 2] {
            manager
                .channel_mut(1, 0)
                .unwrap()
                .add_player(test_player(entity_id))
                .unwrap();
        }

        // Channel 0 full: the next sequential channel is created, with its
        // own monster population.
        assert_eq!(manager.best_channel_id(1, &entities), Some(1));
        assert_eq!(manager.channel(1, 1).unwrap().monsters.len(), 1);
        assert_eq!(manager.channel_list(1).len(), 2);
    }

    #[test]
    fn test_add_player_respects_capacity() {
        let mut channel = ZoneChannel::new(1, 0, 1);
        channel.add_player(test_player(1)).unwrap();
        assert!(channel.add_player(test_player(2)).is_err());

        channel.remove_player(1).unwrap();
        assert!(channel.add_player(test_player(2)).is_ok());
    }

    #[test]
    fn test_unknown_zone_has_no_channel() {
        let entities = EntityManager::new();
        let mut manager = ZoneManager::new(1_000, &[], &[], &entities);
        assert_eq!(manager.best_channel_id(99, &entities), None);
    }
}
