//! Inventory and equipment repository.

use sqlx::{PgPool, Row};

use flyagain_protocol::messages::ItemStack;

use super::RepoError;

const INVENTORY_SLOTS: i32 = 40;

fn map_stack(row: &sqlx::postgres::PgRow) -> ItemStack {
    ItemStack {
        slot: row.get::<i32, _>("slot") as u32,
        item_id: row.get::<i32, _>("item_id") as u32,
        quantity: row.get::<i32, _>("quantity") as u32,
        equipped: row.get("equipped"),
    }
}

pub async fn get_inventory(
    pool: &PgPool,
    character_id: i64,
) -> Result<Vec<ItemStack>, RepoError> {
    let rows = sqlx::query(
        "SELECT slot, item_id, quantity, equipped
         FROM inventory WHERE character_id = $1 AND NOT equipped ORDER BY slot",
    )
    .bind(character_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(map_stack).collect())
}

pub async fn get_equipment(
    pool: &PgPool,
    character_id: i64,
) -> Result<Vec<ItemStack>, RepoError> {
    let rows = sqlx::query(
        "SELECT slot, item_id, quantity, equipped
         FROM inventory WHERE character_id = $1 AND equipped ORDER BY slot",
    )
    .bind(character_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(map_stack).collect())
}

/// Move a stack between slots, swapping when the target is occupied.
pub async fn move_item(
    pool: &PgPool,
    character_id: i64,
    from_slot: u32,
    to_slot: u32,
) -> Result<(), RepoError> {
    if from_slot == to_slot || to_slot as i32 >= INVENTORY_SLOTS {
        return Err(RepoError::NotFound);
    }

    let mut tx = pool.begin().await?;

    let source = sqlx::query("SELECT slot FROM inventory WHERE character_id = $1 AND slot = $2")
        .bind(character_id)
        .bind(from_slot as i32)
        .fetch_optional(&mut *tx)
        .await?;
    if source.is_none() {
        return Err(RepoError::NotFound);
    }

    // Three-step swap through a parking slot to dodge the primary key.
    sqlx::query("UPDATE inventory SET slot = -1 WHERE character_id = $1 AND slot = $2")
        .bind(character_id)
        .bind(from_slot as i32)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE inventory SET slot = $3 WHERE character_id = $1 AND slot = $2")
        .bind(character_id)
        .bind(to_slot as i32)
        .bind(from_slot as i32)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE inventory SET slot = $2 WHERE character_id = $1 AND slot = -1")
        .bind(character_id)
        .bind(to_slot as i32)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Add items, stacking onto an existing unequipped stack of the same item
/// first, then taking the lowest free slot.
pub async fn add_item(
    pool: &PgPool,
    character_id: i64,
    item_id: u32,
    quantity: u32,
) -> Result<(), RepoError> {
    let mut tx = pool.begin().await?;

    let existing = sqlx::query(
        "SELECT slot FROM inventory
         WHERE character_id = $1 AND item_id = $2 AND NOT equipped
         ORDER BY slot LIMIT 1",
    )
    .bind(character_id)
    .bind(item_id as i32)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(row) = existing {
        let slot: i32 = row.get("slot");
        sqlx::query(
            "UPDATE inventory SET quantity = quantity + $3
             WHERE character_id = $1 AND slot = $2",
        )
        .bind(character_id)
        .bind(slot)
        .bind(quantity as i32)
        .execute(&mut *tx)
        .await?;
    } else {
        let used: Vec<i32> = sqlx::query_scalar(
            "SELECT slot FROM inventory WHERE character_id = $1 ORDER BY slot",
        )
        .bind(character_id)
        .fetch_all(&mut *tx)
        .await?;
        let free = (0..INVENTORY_SLOTS)
            .find(|slot| !used.contains(slot))
            .ok_or(RepoError::NotFound)?;

        sqlx::query(
            "INSERT INTO inventory (character_id, slot, item_id, quantity)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(character_id)
        .bind(free)
        .bind(item_id as i32)
        .bind(quantity as i32)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn remove_item(
    pool: &PgPool,
    character_id: i64,
    slot: u32,
    quantity: u32,
) -> Result<(), RepoError> {
    let mut tx = pool.begin().await?;

    let current: i32 = sqlx::query_scalar(
        "SELECT quantity FROM inventory WHERE character_id = $1 AND slot = $2",
    )
    .bind(character_id)
    .bind(slot as i32)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(RepoError::NotFound)?;

    if current <= quantity as i32 {
        sqlx::query("DELETE FROM inventory WHERE character_id = $1 AND slot = $2")
            .bind(character_id)
            .bind(slot as i32)
            .execute(&mut *tx)
            .await?;
    } else {
        sqlx::query(
            "UPDATE inventory SET quantity = quantity - $3
             WHERE character_id = $1 AND slot = $2",
        )
        .bind(character_id)
        .bind(slot as i32)
        .bind(quantity as i32)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn set_equipped(
    pool: &PgPool,
    character_id: i64,
    slot: u32,
    equipped: bool,
) -> Result<(), RepoError> {
    let result = sqlx::query(
        "UPDATE inventory SET equipped = $3 WHERE character_id = $1 AND slot = $2",
    )
    .bind(character_id)
    .bind(slot as i32)
    .bind(equipped)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}
