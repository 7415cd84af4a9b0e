//! Runtime entities and the entity manager.
//!
//! Player and monster state is owned by the tick thread inside zone
//! channels. The [`EntityManager`] is the only entity structure network
//! tasks touch: id allocation and the atomic account -> entity
//! registration that rejects duplicate world entries.

use std::collections::HashMap;

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use flyagain_protocol::messages::{
    CharacterRecord, EntityState, MonsterDef, ENTITY_KIND_MONSTER, ENTITY_KIND_PLAYER,
};

use crate::connection::ConnectionHandle;

pub const FIRST_PLAYER_ENTITY_ID: u64 = 1;
pub const FIRST_MONSTER_ENTITY_ID: u64 = 1_000_000;

/// Movement intent as last reported by the client, already sanitized.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputState {
    pub dx: f32,
    pub dy: f32,
    pub dz: f32,
    pub moving: bool,
    pub flying: bool,
}

#[derive(Debug)]
pub struct PlayerEntity {
    pub entity_id: u64,
    pub character_id: i64,
    pub account_id: i64,
    pub session_id: String,
    pub udp_token: u64,
    pub name: String,
    pub class_id: u32,
    pub level: u32,
    pub xp: i64,
    pub hp: i32,
    pub mp: i32,
    pub max_hp: i32,
    pub max_mp: i32,
    pub strength: u32,
    pub stamina: u32,
    pub dexterity: u32,
    pub intellect: u32,
    pub stat_points: u32,
    pub gold: i64,
    pub zone_id: u32,
    pub channel_id: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub rotation: f32,
    pub input: InputState,
    pub target_entity_id: Option<u64>,
    pub auto_attacking: bool,
    pub last_attack_ms: u64,
    pub skill_cooldowns: HashMap<u32, u64>,
    pub conn: ConnectionHandle,
    pub last_save_ms: u64,
    pub dirty: bool,
    pub session_start_ms: u64,
    /// Play time persisted before this session, in seconds.
    pub stored_play_time: i64,
}

impl PlayerEntity {
    pub fn from_record(
        entity_id: u64,
        record: &CharacterRecord,
        session_id: String,
        udp_token: u64,
        conn: ConnectionHandle,
        now_ms: u64,
    ) -> Self {
        Self {
            entity_id,
            character_id: record.id,
            account_id: record.account_id,
            session_id,
            udp_token,
            name: record.name.clone(),
            class_id: record.class_id,
            level: record.level.max(1),
            xp: record.xp,
            hp: record.hp.min(record.max_hp),
            mp: record.mp.min(record.max_mp),
            max_hp: record.max_hp,
            max_mp: record.max_mp,
            strength: record.strength,
            stamina: record.stamina,
            dexterity: record.dexterity,
            intellect: record.intellect,
            stat_points: record.stat_points,
            gold: record.gold,
            zone_id: record.map_id,
            channel_id: 0,
            x: record.x,
            y: record.y,
            z: record.z,
            rotation: 0.0,
            input: InputState::default(),
            target_entity_id: None,
            auto_attacking: false,
            last_attack_ms: 0,
            skill_cooldowns: HashMap::new(),
            conn,
            last_save_ms: now_ms,
            dirty: false,
            session_start_ms: now_ms,
            stored_play_time: record.play_time,
        }
    }

    pub fn alive(&self) -> bool {
        self.hp > 0
    }

    pub fn attack_power(&self) -> i32 {
        (self.strength * 2 + self.level) as i32
    }

    pub fn defense(&self) -> i32 {
        (self.stamina + self.level) as i32
    }

    pub fn distance_to(&self, x: f32, y: f32, z: f32) -> f32 {
        let (dx, dy, dz) = (self.x - x, self.y - y, self.z - z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Authoritative persistent field set, including play time accrued
    /// this session.
    pub fn to_record(&self, now_ms: u64) -> CharacterRecord {
        let session_secs = now_ms.saturating_sub(self.session_start_ms) / 1_000;
        CharacterRecord {
            id: self.character_id,
            account_id: self.account_id,
            name: self.name.clone(),
            class_id: self.class_id,
            level: self.level,
            xp: self.xp,
            hp: self.hp,
            mp: self.mp,
            max_hp: self.max_hp,
            max_mp: self.max_mp,
            strength: self.strength,
            stamina: self.stamina,
            dexterity: self.dexterity,
            intellect: self.intellect,
            stat_points: self.stat_points,
            map_id: self.zone_id,
            x: self.x,
            y: self.y,
            z: self.z,
            gold: self.gold,
            play_time: self.stored_play_time + session_secs as i64,
        }
    }

    pub fn to_entity_state(&self) -> EntityState {
        EntityState {
            entity_id: self.entity_id,
            kind: ENTITY_KIND_PLAYER,
            name: self.name.clone(),
            class_or_definition_id: self.class_id,
            level: self.level,
            x: self.x,
            y: self.y,
            z: self.z,
            rotation: self.rotation,
            hp: self.hp,
            max_hp: self.max_hp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiState {
    Idle,
    Aggro,
    Attack,
    Return,
    Dead,
}

#[derive(Debug)]
pub struct MonsterEntity {
    pub entity_id: u64,
    pub definition_id: u32,
    pub name: String,
    pub level: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub spawn_x: f32,
    pub spawn_y: f32,
    pub spawn_z: f32,
    pub spawn_radius: f32,
    pub hp: i32,
    pub max_hp: i32,
    pub attack: i32,
    pub defense: i32,
    pub xp_reward: i64,
    pub aggro_range: f32,
    pub attack_range: f32,
    pub attack_speed_ms: u64,
    pub move_speed: f32,
    pub respawn_ms: u64,
    pub leash_distance: f32,
    pub zone_id: u32,
    pub channel_id: u32,
    pub ai_state: AiState,
    pub target_entity_id: Option<u64>,
    pub last_attack_ms: u64,
    pub death_ms: u64,
}

impl MonsterEntity {
    pub fn from_def(
        entity_id: u64,
        def: &MonsterDef,
        zone_id: u32,
        channel_id: u32,
        spawn: (f32, f32, f32),
        spawn_radius: f32,
    ) -> Self {
        Self {
            entity_id,
            definition_id: def.id,
            name: def.name.clone(),
            level: def.level,
            x: spawn.0,
            y: spawn.1,
            z: spawn.2,
            spawn_x: spawn.0,
            spawn_y: spawn.1,
            spawn_z: spawn.2,
            spawn_radius,
            hp: def.max_hp,
            max_hp: def.max_hp,
            attack: def.attack,
            defense: def.defense,
            xp_reward: def.xp_reward,
            aggro_range: def.aggro_range,
            attack_range: def.attack_range,
            attack_speed_ms: def.attack_speed_ms,
            move_speed: def.move_speed,
            respawn_ms: def.respawn_ms,
            leash_distance: def.leash_distance,
            zone_id,
            channel_id,
            ai_state: AiState::Idle,
            target_entity_id: None,
            last_attack_ms: 0,
            death_ms: 0,
        }
    }

    pub fn alive(&self) -> bool {
        self.hp > 0
    }

    pub fn distance_to(&self, x: f32, y: f32, z: f32) -> f32 {
        let (dx, dy, dz) = (self.x - x, self.y - y, self.z - z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn distance_to_spawn(&self) -> f32 {
        self.distance_to(self.spawn_x, self.spawn_y, self.spawn_z)
    }

    pub fn to_entity_state(&self) -> EntityState {
        EntityState {
            entity_id: self.entity_id,
            kind: ENTITY_KIND_MONSTER,
            name: self.name.clone(),
            class_or_definition_id: self.definition_id,
            level: self.level,
            x: self.x,
            y: self.y,
            z: self.z,
            rotation: 0.0,
            hp: self.hp,
            max_hp: self.max_hp,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("account already has an entity in this world")]
pub struct AlreadyInWorld;

/// Network-facing entity registry. Holds no entity state beyond the
/// account -> entity id binding used to reject double entry.
#[derive(Default)]
pub struct EntityManager {
    registrations: DashMap<i64, u64>,
    next_player_id: AtomicU64,
    next_monster_id: AtomicU64,
}

impl EntityManager {
    pub fn new() -> Self {
        Self {
            registrations: DashMap::new(),
            next_player_id: AtomicU64::new(FIRST_PLAYER_ENTITY_ID),
            next_monster_id: AtomicU64::new(FIRST_MONSTER_ENTITY_ID),
        }
    }

    /// Compare-and-set registration: the first concurrent EnterWorld for an
    /// account wins, later ones fail without touching world state.
    pub fn try_register(&self, account_id: i64) -> Result<u64, AlreadyInWorld> {
        match self.registrations.entry(account_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AlreadyInWorld),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let entity_id = self.next_player_id.fetch_add(1, Ordering::SeqCst);
                slot.insert(entity_id);
                Ok(entity_id)
            }
        }
    }

    pub fn unregister(&self, account_id: i64) {
        self.registrations.remove(&account_id);
    }

    pub fn is_registered(&self, account_id: i64) -> bool {
        self.registrations.contains_key(&account_id)
    }

    pub fn next_monster_id(&self) -> u64 {
        self.next_monster_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn online_count(&self) -> usize {
        self.registrations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_ids_start_at_one() {
        let manager = EntityManager::new();
        assert_eq!(manager.try_register(10).unwrap(), 1);
        assert_eq!(manager.try_register(11).unwrap(), 2);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let manager = EntityManager::new();
        manager.try_register(10).unwrap();
        assert!(manager.try_register(10).is_err());

        manager.unregister(10);
        assert!(manager.try_register(10).is_ok());
    }

    #[test]
    fn test_monster_ids_start_at_a_million() {
        let manager = EntityManager::new();
        assert_eq!(manager.next_monster_id(), 1_000_000);
        assert_eq!(manager.next_monster_id(), 1_000_001);
    }

    #[test]
    fn test_player_combat_stats() {
        let record = CharacterRecord {
            id: 1,
            strength: 20,
            stamina: 10,
            level: 1,
            max_hp: 100,
            hp: 100,
            ..Default::default()
        };
        let (conn, _rx) = ConnectionHandle::new_for_test();
        let player = PlayerEntity::from_record(1, &record, "sid".into(), 0, conn, 0);
        assert_eq!(player.attack_power(), 41);
        assert_eq!(player.defense(), 11);
    }

    #[test]
    fn test_play_time_accrues_across_session() {
        let record = CharacterRecord {
            id: 1,
            play_time: 100,
            level: 1,
            ..Default::default()
        };
        let (conn, _rx) = ConnectionHandle::new_for_test();
        let player = PlayerEntity::from_record(1, &record, "sid".into(), 0, conn, 10_000);
        let saved = player.to_record(70_000);
        assert_eq!(saved.play_time, 160);
    }
}
