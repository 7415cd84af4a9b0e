//! Schema setup.
//!
//! Versioned migration scripts applied once at startup. The applied
//! version set lives in `schema_migrations`; each pending script runs in
//! its own transaction.

use sqlx::PgPool;

const MIGRATIONS: &[(i32, &str)] = &[
    (
        1,
        r#"
        CREATE TABLE accounts (
            id            BIGSERIAL PRIMARY KEY,
            username      TEXT NOT NULL UNIQUE,
            email         TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            created_at    BIGINT NOT NULL,
            last_login    BIGINT NOT NULL DEFAULT 0,
            banned        BOOLEAN NOT NULL DEFAULT FALSE,
            ban_reason    TEXT NOT NULL DEFAULT '',
            banned_until  BIGINT
        );
        "#,
    ),
    (
        2,
        r#"
        CREATE TABLE characters (
            id          BIGSERIAL PRIMARY KEY,
            account_id  BIGINT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
            name        TEXT NOT NULL UNIQUE,
            class_id    INT NOT NULL,
            level       INT NOT NULL DEFAULT 1,
            xp          BIGINT NOT NULL DEFAULT 0,
            hp          INT NOT NULL,
            mp          INT NOT NULL,
            max_hp      INT NOT NULL,
            max_mp      INT NOT NULL,
            strength    INT NOT NULL,
            stamina     INT NOT NULL,
            dexterity   INT NOT NULL,
            intellect   INT NOT NULL,
            stat_points INT NOT NULL DEFAULT 0,
            map_id      INT NOT NULL DEFAULT 1,
            pos_x       REAL NOT NULL DEFAULT 0,
            pos_y       REAL NOT NULL DEFAULT 0,
            pos_z       REAL NOT NULL DEFAULT 0,
            gold        BIGINT NOT NULL DEFAULT 0,
            play_time   BIGINT NOT NULL DEFAULT 0
        );
        CREATE INDEX idx_characters_account ON characters(account_id);
        "#,
    ),
    (
        3,
        r#"
        CREATE TABLE character_skills (
            character_id BIGINT NOT NULL REFERENCES characters(id) ON DELETE CASCADE,
            skill_id     INT NOT NULL,
            level        INT NOT NULL DEFAULT 1,
            PRIMARY KEY (character_id, skill_id)
        );
        CREATE TABLE inventory (
            character_id BIGINT NOT NULL REFERENCES characters(id) ON DELETE CASCADE,
            slot         INT NOT NULL,
            item_id      INT NOT NULL,
            quantity     INT NOT NULL DEFAULT 1,
            equipped     BOOLEAN NOT NULL DEFAULT FALSE,
            PRIMARY KEY (character_id, slot)
        );
        "#,
    ),
    (
        4,
        r#"
        CREATE TABLE items (
            id            INT PRIMARY KEY,
            name          TEXT NOT NULL,
            kind          INT NOT NULL,
            stack_size    INT NOT NULL DEFAULT 1,
            attack_bonus  INT NOT NULL DEFAULT 0,
            defense_bonus INT NOT NULL DEFAULT 0
        );
        CREATE TABLE monsters (
            id              INT PRIMARY KEY,
            name            TEXT NOT NULL,
            level           INT NOT NULL,
            max_hp          INT NOT NULL,
            attack          INT NOT NULL,
            defense         INT NOT NULL,
            xp_reward       BIGINT NOT NULL,
            aggro_range     REAL NOT NULL,
            attack_range    REAL NOT NULL,
            attack_speed_ms BIGINT NOT NULL,
            move_speed      REAL NOT NULL,
            respawn_ms      BIGINT NOT NULL,
            leash_distance  REAL NOT NULL
        );
        CREATE TABLE spawns (
            id         SERIAL PRIMARY KEY,
            monster_id INT NOT NULL REFERENCES monsters(id),
            zone_id    INT NOT NULL,
            pos_x      REAL NOT NULL,
            pos_y      REAL NOT NULL,
            pos_z      REAL NOT NULL,
            radius     REAL NOT NULL DEFAULT 0
        );
        CREATE TABLE skills (
            id               INT PRIMARY KEY,
            name             TEXT NOT NULL,
            class_id         INT NOT NULL,
            base_damage      INT NOT NULL,
            damage_per_level INT NOT NULL,
            cooldown_ms      BIGINT NOT NULL,
            mp_cost          INT NOT NULL
        );
        CREATE TABLE loot_tables (
            monster_id   INT NOT NULL REFERENCES monsters(id),
            item_id      INT NOT NULL REFERENCES items(id),
            chance       REAL NOT NULL,
            min_quantity INT NOT NULL DEFAULT 1,
            max_quantity INT NOT NULL DEFAULT 1,
            PRIMARY KEY (monster_id, item_id)
        );
        "#,
    ),
];

pub async fn run(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INT PRIMARY KEY,
            applied_at BIGINT NOT NULL
         )",
    )
    .execute(pool)
    .await?;

    let applied: Vec<i32> = sqlx::query_scalar("SELECT version FROM schema_migrations")
        .fetch_all(pool)
        .await?;

    for (version, script) in MIGRATIONS {
        if applied.contains(version) {
            continue;
        }
        tracing::info!(version, "applying migration");

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(script).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES ($1, $2)")
            .bind(version)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }
    Ok(())
}
