//! Character repository.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use flyagain_common::validation::{max_hp_for, max_mp_for, CharacterClass};
use flyagain_common::zones;
use flyagain_protocol::messages::{CharacterRecord, SkillRecord};

use super::RepoError;

pub const MAX_CHARACTERS_PER_ACCOUNT: i64 = 4;

fn map_character(row: &PgRow) -> CharacterRecord {
    CharacterRecord {
        id: row.get("id"),
        account_id: row.get("account_id"),
        name: row.get("name"),
        class_id: row.get::<i32, _>("class_id") as u32,
        level: row.get::<i32, _>("level") as u32,
        xp: row.get("xp"),
        hp: row.get("hp"),
        mp: row.get("mp"),
        max_hp: row.get("max_hp"),
        max_mp: row.get("max_mp"),
        strength: row.get::<i32, _>("strength") as u32,
        stamina: row.get::<i32, _>("stamina") as u32,
        dexterity: row.get::<i32, _>("dexterity") as u32,
        intellect: row.get::<i32, _>("intellect") as u32,
        stat_points: row.get::<i32, _>("stat_points") as u32,
        map_id: row.get::<i32, _>("map_id") as u32,
        x: row.get("pos_x"),
        y: row.get("pos_y"),
        z: row.get("pos_z"),
        gold: row.get("gold"),
        play_time: row.get("play_time"),
    }
}

pub async fn get_by_account(
    pool: &PgPool,
    account_id: i64,
) -> Result<Vec<CharacterRecord>, RepoError> {
    let rows = sqlx::query("SELECT * FROM characters WHERE account_id = $1 ORDER BY id")
        .bind(account_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(map_character).collect())
}

/// Fetch one character. When `account_id` is non-zero the row must belong
/// to that account; the write-back path passes zero and skips the check.
pub async fn get(
    pool: &PgPool,
    character_id: i64,
    account_id: i64,
) -> Result<Option<CharacterRecord>, RepoError> {
    let row = sqlx::query(
        "SELECT * FROM characters WHERE id = $1 AND ($2 = 0 OR account_id = $2)",
    )
    .bind(character_id)
    .bind(account_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(map_character))
}

/// Create a character with class base stats, full resources, and the town
/// spawn. At most four characters per account.
pub async fn create(
    pool: &PgPool,
    account_id: i64,
    name: &str,
    class: CharacterClass,
) -> Result<CharacterRecord, RepoError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM characters WHERE account_id = $1")
        .bind(account_id)
        .fetch_one(pool)
        .await?;
    if count >= MAX_CHARACTERS_PER_ACCOUNT {
        return Err(RepoError::CharacterLimit);
    }

    let (strength, stamina, dexterity, intellect) = class.base_stats();
    let max_hp = max_hp_for(1, stamina);
    let max_mp = max_mp_for(1, intellect);
    let town = zones::town();

    let row = sqlx::query(
        "INSERT INTO characters
            (account_id, name, class_id, level, hp, mp, max_hp, max_mp,
             strength, stamina, dexterity, intellect, stat_points,
             map_id, pos_x, pos_y, pos_z)
         VALUES ($1, $2, $3, 1, $4, $5, $4, $5, $6, $7, $8, $9, 4, $10, $11, $12, $13)
         RETURNING *",
    )
    .bind(account_id)
    .bind(name)
    .bind(class.id() as i32)
    .bind(max_hp)
    .bind(max_mp)
    .bind(strength as i32)
    .bind(stamina as i32)
    .bind(dexterity as i32)
    .bind(intellect as i32)
    .bind(town.id as i32)
    .bind(town.spawn.0)
    .bind(town.spawn.1)
    .bind(town.spawn.2)
    .fetch_one(pool)
    .await
    .map_err(RepoError::from_insert)?;

    Ok(map_character(&row))
}

/// Full upsert of the mutable field set. Name, class and ownership never
/// change through this path.
pub async fn save(pool: &PgPool, record: &CharacterRecord) -> Result<(), RepoError> {
    let result = sqlx::query(
        "UPDATE characters SET
            level = $1, xp = $2, hp = $3, mp = $4, max_hp = $5, max_mp = $6,
            strength = $7, stamina = $8, dexterity = $9, intellect = $10,
            stat_points = $11, map_id = $12, pos_x = $13, pos_y = $14,
            pos_z = $15, gold = $16, play_time = $17
         WHERE id = $18",
    )
    .bind(record.level as i32)
    .bind(record.xp)
    .bind(record.hp)
    .bind(record.mp)
    .bind(record.max_hp)
    .bind(record.max_mp)
    .bind(record.strength as i32)
    .bind(record.stamina as i32)
    .bind(record.dexterity as i32)
    .bind(record.intellect as i32)
    .bind(record.stat_points as i32)
    .bind(record.map_id as i32)
    .bind(record.x)
    .bind(record.y)
    .bind(record.z)
    .bind(record.gold)
    .bind(record.play_time)
    .bind(record.id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}

pub async fn delete(pool: &PgPool, character_id: i64, account_id: i64) -> Result<(), RepoError> {
    let result = sqlx::query("DELETE FROM characters WHERE id = $1 AND account_id = $2")
        .bind(character_id)
        .bind(account_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}

pub async fn get_skills(
    pool: &PgPool,
    character_id: i64,
) -> Result<Vec<SkillRecord>, RepoError> {
    let rows = sqlx::query(
        "SELECT skill_id, level FROM character_skills WHERE character_id = $1 ORDER BY skill_id",
    )
    .bind(character_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| SkillRecord {
            skill_id: row.get::<i32, _>("skill_id") as u32,
            level: row.get::<i32, _>("level") as u32,
        })
        .collect())
}
