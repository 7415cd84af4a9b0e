//! Server-authoritative combat.
//!
//! One damage formula for everything: attacker attack minus defender
//! defense, small integer variance, 10% crits at 1.5x, never below 1.

use rand::Rng;
use std::collections::BTreeMap;

use flyagain_common::validation::{max_hp_for, max_mp_for};
use flyagain_protocol::messages::{DamageResult, DeathEvent, SkillDef};

use crate::broadcast::{EventKind, PendingEvents};
use crate::entity::{AiState, MonsterEntity, PlayerEntity};

pub const AUTO_ATTACK_INTERVAL_MS: u64 = 1_500;
pub const CRIT_CHANCE: f64 = 0.10;
pub const CRIT_MULTIPLIER: f64 = 1.5;
pub const LEVEL_CAP: u32 = 99;
pub const STAT_POINTS_PER_LEVEL: u32 = 5;

/// `max(1, atk - def + uniform[-2, 2])`, floored 1.5x on a crit.
pub fn roll_damage(attack: i32, defense: i32, rng: &mut impl Rng) -> (i32, bool) {
    let mut raw = attack - defense + rng.gen_range(-2..=2);
    let crit = rng.gen::<f64>() < CRIT_CHANCE;
    if crit {
        raw = (raw as f64 * CRIT_MULTIPLIER).floor() as i32;
    }
    (raw.max(1), crit)
}

/// Skill damage raises the attacker's attack before the common formula.
pub fn skill_attack(base_attack: i32, skill: &SkillDef, skill_level: u32) -> i32 {
    base_attack + skill.base_damage + skill_level as i32 * skill.damage_per_level
}

/// Experience needed to leave the given level.
pub fn xp_to_next(level: u32) -> i64 {
    level as i64 * 1_000
}

/// Award kill experience and apply any level-ups (stat points, resource
/// maxima, full heal).
pub fn award_xp(player: &mut PlayerEntity, amount: i64) {
    player.xp += amount;
    player.dirty = true;
    while player.level < LEVEL_CAP && player.xp >= xp_to_next(player.level) {
        player.xp -= xp_to_next(player.level);
        player.level += 1;
        player.stat_points += STAT_POINTS_PER_LEVEL;
        player.max_hp = max_hp_for(player.level, player.stamina);
        player.max_mp = max_mp_for(player.level, player.intellect);
        player.hp = player.max_hp;
        player.mp = player.max_mp;
        tracing::info!(
            entity_id = player.entity_id,
            level = player.level,
            "level up"
        );
    }
}

/// Per-tick player auto-attacks against monster targets.
pub fn process_auto_attacks(
    players: &mut BTreeMap<u64, PlayerEntity>,
    monsters: &mut BTreeMap<u64, MonsterEntity>,
    now_ms: u64,
    rng: &mut impl Rng,
    events: &mut PendingEvents,
    loot_tables: &BTreeMap<u32, Vec<(u32, f32, u32, u32)>>,
) {
    let attacker_ids: Vec<u64> = players.keys().copied().collect();
    for attacker_id in attacker_ids {
        let Some(player) = players.get(&attacker_id) else {
            continue;
        };
        if !player.auto_attacking || !player.alive() {
            continue;
        }
        let Some(target_id) = player.target_entity_id else {
            continue;
        };
        if now_ms.saturating_sub(player.last_attack_ms) < AUTO_ATTACK_INTERVAL_MS {
            continue;
        }

        let Some(monster) = monsters.get_mut(&target_id) else {
            continue;
        };
        if !monster.alive() {
            continue;
        }

        let attack = player.attack_power();
        let (damage, crit) = roll_damage(attack, monster.defense, rng);
        monster.hp = (monster.hp - damage).max(0);

        let (mx, mz) = (monster.x, monster.z);
        events.push(
            mx,
            mz,
            EventKind::Damage(DamageResult {
                attacker_id,
                target_id,
                amount: damage,
                crit,
                target_hp: monster.hp,
            }),
        );

        let killed = !monster.alive();
        let xp_reward = monster.xp_reward;
        let monster_def_id = monster.definition_id;
        if killed {
            monster.ai_state = AiState::Dead;
            monster.death_ms = now_ms;
            monster.target_entity_id = None;
            events.push(
                mx,
                mz,
                EventKind::Death(DeathEvent {
                    entity_id: target_id,
                    killer_id: attacker_id,
                    xp_awarded: xp_reward,
                }),
            );
        }

        if let Some(player) = players.get_mut(&attacker_id) {
            player.last_attack_ms = now_ms;
            if killed {
                award_xp(player, xp_reward);
                roll_loot(player.character_id, monster_def_id, loot_tables, rng, events);
            }
        }
    }
}

fn roll_loot(
    character_id: i64,
    monster_def_id: u32,
    loot_tables: &BTreeMap<u32, Vec<(u32, f32, u32, u32)>>,
    rng: &mut impl Rng,
    events: &mut PendingEvents,
) {
    let Some(entries) = loot_tables.get(&monster_def_id) else {
        return;
    };
    for (item_id, chance, min_qty, max_qty) in entries {
        if rng.gen::<f32>() < *chance {
            let quantity = if max_qty > min_qty {
                rng.gen_range(*min_qty..=*max_qty)
            } else {
                *min_qty
            };
            events.loot.push((character_id, *item_id, quantity));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use flyagain_protocol::messages::CharacterRecord;

    use crate::connection::ConnectionHandle;

    #[test]
    fn test_damage_never_below_one() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..10_000 {
            let (damage, _) = roll_damage(1, 100, &mut rng);
            assert!(damage >= 1);
        }
    }

    #[test]
    fn test_damage_band_without_crit() {
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..10_000 {
            let (damage, crit) = roll_damage(41, 0, &mut rng);
            if crit {
                // floor((41 + [-2, 2]) * 1.5)
                assert!((58..=64).contains(&damage), "crit damage {damage}");
            } else {
                assert!((39..=43).contains(&damage), "damage {damage}");
            }
        }
    }

    #[test]
    fn test_crit_frequency_near_ten_percent() {
        let mut rng = StdRng::seed_from_u64(3);
        let rolls = 100_000;
        let crits = (0..rolls)
            .filter(|_| roll_damage(10, 0, &mut rng).1)
            .count();
        let rate = crits as f64 / rolls as f64;
        assert!((rate - 0.10).abs() < 0.01, "crit rate {rate}");
    }

    #[test]
    fn test_seeded_rolls_are_deterministic() {
        let one: Vec<(i32, bool)> = {
            let mut rng = StdRng::seed_from_u64(42);
            (0..100).map(|_| roll_damage(20, 5, &mut rng)).collect()
        };
        let two: Vec<(i32, bool)> = {
            let mut rng = StdRng::seed_from_u64(42);
            (0..100).map(|_| roll_damage(20, 5, &mut rng)).collect()
        };
        assert_eq!(one, two);
    }

    #[test]
    fn test_skill_attack_adds_scaled_damage() {
        let skill = SkillDef {
            id: 1,
            name: "Feuerball".to_string(),
            class_id: 2,
            base_damage: 12,
            damage_per_level: 3,
            cooldown_ms: 4_000,
            mp_cost: 10,
        };
        assert_eq!(skill_attack(40, &skill, 2), 58);
    }

    #[test]
    fn test_xp_award_and_level_up() {
        let record = CharacterRecord {
            id: 1,
            account_id: 1,
            level: 1,
            stamina: 10,
            intellect: 5,
            hp: 10,
            max_hp: 100,
            max_mp: 55,
            ..Default::default()
        };
        let (conn, _rx) = ConnectionHandle::new_for_test();
        let mut player = PlayerEntity::from_record(1, &record, "sid".into(), 0, conn, 0);

        award_xp(&mut player, 999);
        assert_eq!(player.level, 1);

        award_xp(&mut player, 1);
        assert_eq!(player.level, 2);
        assert_eq!(player.xp, 0);
        assert_eq!(player.stat_points, STAT_POINTS_PER_LEVEL);
        // Leveling recomputes maxima and heals to full.
        assert_eq!(player.max_hp, max_hp_for(2, 10));
        assert_eq!(player.hp, player.max_hp);
    }

    #[test]
    fn test_multi_level_jump() {
        let record = CharacterRecord {
            id: 1,
            level: 1,
            hp: 1,
            max_hp: 100,
            ..Default::default()
        };
        let (conn, _rx) = ConnectionHandle::new_for_test();
        let mut player = PlayerEntity::from_record(1, &record, "sid".into(), 0, conn, 0);

        // 1000 + 2000 + 500 carries through two levels.
        award_xp(&mut player, 3_500);
        assert_eq!(player.level, 3);
        assert_eq!(player.xp, 500);
    }
}
