//! Monster AI state machine.
//!
//! IDLE -> AGGRO -> ATTACK with RETURN as the way home and DEAD awaiting
//! respawn. All transitions are checked once per tick per monster, on the
//! tick thread. Player scanning iterates the ordered entity map, so a
//! seeded run is fully deterministic.

use rand::Rng;
use std::collections::BTreeMap;

use flyagain_protocol::messages::{DamageResult, DeathEvent, EntityMove};

use crate::broadcast::{EventKind, PendingEvents};
use crate::combat::roll_damage;
use crate::entity::{AiState, MonsterEntity, PlayerEntity};
use crate::grid::SpatialGrid;

/// Pulling beyond this multiple of attack range drops ATTACK back to AGGRO.
pub const ATTACK_RANGE_SLACK: f32 = 1.2;
/// Close enough to the spawn point to snap home.
pub const RETURN_SNAP_DISTANCE: f32 = 2.0;
/// Monsters run home at twice their chase speed.
pub const RETURN_SPEED_FACTOR: f32 = 2.0;

/// One AI tick for one monster.
pub fn step_monster(
    monster: &mut MonsterEntity,
    players: &mut BTreeMap<u64, PlayerEntity>,
    grid: &mut SpatialGrid,
    now_ms: u64,
    dt_ms: u64,
    rng: &mut impl Rng,
    events: &mut PendingEvents,
) {
    if monster.ai_state == AiState::Dead {
        try_respawn(monster, grid, now_ms, events);
        return;
    }

    if monster.ai_state == AiState::Idle {
        if let Some(target_id) = scan_for_target(monster, players) {
            monster.target_entity_id = Some(target_id);
            monster.ai_state = AiState::Aggro;
        } else {
            return;
        }
    }

    if monster.ai_state == AiState::Aggro {
        step_aggro(monster, players, grid, dt_ms, now_ms, events);
    }

    if monster.ai_state == AiState::Attack {
        step_attack(monster, players, now_ms, rng, events);
    }

    if monster.ai_state == AiState::Return {
        step_return(monster, grid, dt_ms, events);
    }
}

/// First living player in iteration order inside the 3x3 neighborhood and
/// within true 3D aggro distance.
fn scan_for_target(
    monster: &MonsterEntity,
    players: &BTreeMap<u64, PlayerEntity>,
) -> Option<u64> {
    players
        .values()
        .find(|p| {
            p.alive()
                && SpatialGrid::in_neighborhood(monster.x, monster.z, p.x, p.z)
                && monster.distance_to(p.x, p.y, p.z) <= monster.aggro_range
        })
        .map(|p| p.entity_id)
}

fn begin_return(monster: &mut MonsterEntity) {
    monster.target_entity_id = None;
    monster.ai_state = AiState::Return;
}

fn step_aggro(
    monster: &mut MonsterEntity,
    players: &BTreeMap<u64, PlayerEntity>,
    grid: &mut SpatialGrid,
    dt_ms: u64,
    now_ms: u64,
    events: &mut PendingEvents,
) {
    let target = monster
        .target_entity_id
        .and_then(|id| players.get(&id))
        .filter(|p| p.alive());
    let Some(target) = target else {
        begin_return(monster);
        return;
    };
    if monster.distance_to_spawn() > monster.leash_distance {
        begin_return(monster);
        return;
    }

    let distance = monster.distance_to(target.x, target.y, target.z);
    if distance <= monster.attack_range {
        // Arm the swing timer so the first hit lands one full attack
        // interval after closing in.
        monster.ai_state = AiState::Attack;
        monster.last_attack_ms = now_ms;
        return;
    }

    let step = (monster.move_speed * dt_ms as f32 / 1_000.0).min(distance);
    move_monster_toward(monster, (target.x, target.y, target.z), step, grid, events);
}

fn step_attack(
    monster: &mut MonsterEntity,
    players: &mut BTreeMap<u64, PlayerEntity>,
    now_ms: u64,
    rng: &mut impl Rng,
    events: &mut PendingEvents,
) {
    let target_id = match monster.target_entity_id {
        Some(id) => id,
        None => {
            begin_return(monster);
            return;
        }
    };
    let Some(target) = players.get_mut(&target_id) else {
        begin_return(monster);
        return;
    };
    if !target.alive() {
        begin_return(monster);
        return;
    }
    if monster.distance_to_spawn() > monster.leash_distance {
        begin_return(monster);
        return;
    }

    let distance = monster.distance_to(target.x, target.y, target.z);
    if distance > monster.attack_range * ATTACK_RANGE_SLACK {
        monster.ai_state = AiState::Aggro;
        return;
    }

    if now_ms.saturating_sub(monster.last_attack_ms) < monster.attack_speed_ms {
        return;
    }
    monster.last_attack_ms = now_ms;

    let (damage, crit) = roll_damage(monster.attack, target.defense(), rng);
    target.hp = (target.hp - damage).max(0);
    target.dirty = true;
    events.push(
        monster.x,
        monster.z,
        EventKind::Damage(DamageResult {
            attacker_id: monster.entity_id,
            target_id,
            amount: damage,
            crit,
            target_hp: target.hp,
        }),
    );

    if !target.alive() {
        // Dead players stop moving (movement checks alive); respawn UI is
        // client-side from here.
        events.push(
            target.x,
            target.z,
            EventKind::Death(DeathEvent {
                entity_id: target_id,
                killer_id: monster.entity_id,
                xp_awarded: 0,
            }),
        );
        begin_return(monster);
    }
}

fn step_return(
    monster: &mut MonsterEntity,
    grid: &mut SpatialGrid,
    dt_ms: u64,
    events: &mut PendingEvents,
) {
    let distance = monster.distance_to_spawn();
    if distance <= RETURN_SNAP_DISTANCE {
        snap_home(monster, grid, events);
        return;
    }
    let step = (monster.move_speed * RETURN_SPEED_FACTOR * dt_ms as f32 / 1_000.0).min(distance);
    move_monster_toward(
        monster,
        (monster.spawn_x, monster.spawn_y, monster.spawn_z),
        step,
        grid,
        events,
    );
}

fn snap_home(monster: &mut MonsterEntity, grid: &mut SpatialGrid, events: &mut PendingEvents) {
    let (old_x, old_z) = (monster.x, monster.z);
    monster.x = monster.spawn_x;
    monster.y = monster.spawn_y;
    monster.z = monster.spawn_z;
    monster.hp = monster.max_hp;
    monster.ai_state = AiState::Idle;
    monster.target_entity_id = None;
    grid.update(monster.entity_id, old_x, old_z, monster.x, monster.z);
    events.push(
        monster.x,
        monster.z,
        EventKind::Move(EntityMove {
            entity_id: monster.entity_id,
            x: monster.x,
            y: monster.y,
            z: monster.z,
            rotation: 0.0,
        }),
    );
}

fn try_respawn(
    monster: &mut MonsterEntity,
    grid: &mut SpatialGrid,
    now_ms: u64,
    events: &mut PendingEvents,
) {
    if now_ms.saturating_sub(monster.death_ms) < monster.respawn_ms {
        return;
    }
    let (old_x, old_z) = (monster.x, monster.z);
    monster.x = monster.spawn_x;
    monster.y = monster.spawn_y;
    monster.z = monster.spawn_z;
    monster.hp = monster.max_hp;
    monster.ai_state = AiState::Idle;
    monster.target_entity_id = None;
    monster.last_attack_ms = 0;
    grid.update(monster.entity_id, old_x, old_z, monster.x, monster.z);
    events.push(monster.x, monster.z, EventKind::Spawn(monster.to_entity_state()));
}

fn move_monster_toward(
    monster: &mut MonsterEntity,
    target: (f32, f32, f32),
    step: f32,
    grid: &mut SpatialGrid,
    events: &mut PendingEvents,
) {
    let (dx, dy, dz) = (
        target.0 - monster.x,
        target.1 - monster.y,
        target.2 - monster.z,
    );
    let distance = (dx * dx + dy * dy + dz * dz).sqrt();
    if distance <= f32::EPSILON || step <= 0.0 {
        return;
    }
    let scale = step / distance;
    let (old_x, old_z) = (monster.x, monster.z);
    monster.x += dx * scale;
    monster.y += dy * scale;
    monster.z += dz * scale;
    grid.update(monster.entity_id, old_x, old_z, monster.x, monster.z);
    events.push(
        monster.x,
        monster.z,
        EventKind::Move(EntityMove {
            entity_id: monster.entity_id,
            x: monster.x,
            y: monster.y,
            z: monster.z,
            rotation: 0.0,
        }),
    );
}
