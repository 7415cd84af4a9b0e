//! Static game data reads. Loaded once per consumer at startup.

use sqlx::{PgPool, Row};

use flyagain_protocol::messages::{ItemDef, LootTableEntry, MonsterDef, SkillDef, SpawnRecord};

use super::RepoError;

pub async fn get_all_items(pool: &PgPool) -> Result<Vec<ItemDef>, RepoError> {
    let rows = sqlx::query("SELECT * FROM items ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|row| ItemDef {
            id: row.get::<i32, _>("id") as u32,
            name: row.get("name"),
            kind: row.get::<i32, _>("kind") as u32,
            stack_size: row.get::<i32, _>("stack_size") as u32,
            attack_bonus: row.get("attack_bonus"),
            defense_bonus: row.get("defense_bonus"),
        })
        .collect())
}

pub async fn get_all_monsters(pool: &PgPool) -> Result<Vec<MonsterDef>, RepoError> {
    let rows = sqlx::query("SELECT * FROM monsters ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|row| MonsterDef {
            id: row.get::<i32, _>("id") as u32,
            name: row.get("name"),
            level: row.get::<i32, _>("level") as u32,
            max_hp: row.get("max_hp"),
            attack: row.get("attack"),
            defense: row.get("defense"),
            xp_reward: row.get("xp_reward"),
            aggro_range: row.get("aggro_range"),
            attack_range: row.get("attack_range"),
            attack_speed_ms: row.get::<i64, _>("attack_speed_ms") as u64,
            move_speed: row.get("move_speed"),
            respawn_ms: row.get::<i64, _>("respawn_ms") as u64,
            leash_distance: row.get("leash_distance"),
        })
        .collect())
}

pub async fn get_all_spawns(pool: &PgPool) -> Result<Vec<SpawnRecord>, RepoError> {
    let rows = sqlx::query("SELECT * FROM spawns ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|row| SpawnRecord {
            monster_id: row.get::<i32, _>("monster_id") as u32,
            zone_id: row.get::<i32, _>("zone_id") as u32,
            x: row.get("pos_x"),
            y: row.get("pos_y"),
            z: row.get("pos_z"),
            radius: row.get("radius"),
        })
        .collect())
}

pub async fn get_all_skills(pool: &PgPool) -> Result<Vec<SkillDef>, RepoError> {
    let rows = sqlx::query("SELECT * FROM skills ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|row| SkillDef {
            id: row.get::<i32, _>("id") as u32,
            name: row.get("name"),
            class_id: row.get::<i32, _>("class_id") as u32,
            base_damage: row.get("base_damage"),
            damage_per_level: row.get("damage_per_level"),
            cooldown_ms: row.get::<i64, _>("cooldown_ms") as u64,
            mp_cost: row.get::<i32, _>("mp_cost") as u32,
        })
        .collect())
}

pub async fn get_all_loot_tables(pool: &PgPool) -> Result<Vec<LootTableEntry>, RepoError> {
    let rows = sqlx::query("SELECT * FROM loot_tables ORDER BY monster_id, item_id")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|row| LootTableEntry {
            monster_id: row.get::<i32, _>("monster_id") as u32,
            item_id: row.get::<i32, _>("item_id") as u32,
            chance: row.get("chance"),
            min_quantity: row.get::<i32, _>("min_quantity") as u32,
            max_quantity: row.get::<i32, _>("max_quantity") as u32,
        })
        .collect())
}
