//! Account repository.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use flyagain_protocol::messages::AccountRecord;

use super::RepoError;

fn map_account(row: &PgRow) -> AccountRecord {
    AccountRecord {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        created_at: row.get("created_at"),
        last_login: row.get("last_login"),
        banned: row.get("banned"),
        ban_reason: row.get("ban_reason"),
        banned_until: row.get::<Option<i64>, _>("banned_until").unwrap_or(0),
    }
}

pub async fn get_by_username(
    pool: &PgPool,
    username: &str,
) -> Result<Option<AccountRecord>, RepoError> {
    let row = sqlx::query("SELECT * FROM accounts WHERE username = $1")
        .bind(username)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(map_account))
}

pub async fn get_by_id(pool: &PgPool, account_id: i64) -> Result<Option<AccountRecord>, RepoError> {
    let row = sqlx::query("SELECT * FROM accounts WHERE id = $1")
        .bind(account_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(map_account))
}

pub async fn create(
    pool: &PgPool,
    username: &str,
    email: &str,
    password_hash: &str,
) -> Result<i64, RepoError> {
    let row = sqlx::query(
        "INSERT INTO accounts (username, email, password_hash, created_at)
         VALUES ($1, $2, $3, $4)
         RETURNING id",
    )
    .bind(username)
    .bind(email)
    .bind(password_hash)
    .bind(chrono::Utc::now().timestamp())
    .fetch_one(pool)
    .await
    .map_err(RepoError::from_insert)?;
    Ok(row.get(0))
}

pub async fn update_last_login(pool: &PgPool, account_id: i64) -> Result<(), RepoError> {
    sqlx::query("UPDATE accounts SET last_login = $1 WHERE id = $2")
        .bind(chrono::Utc::now().timestamp())
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Ban state: banned accounts with an until-time in the past count as
/// unbanned again.
pub async fn check_ban(
    pool: &PgPool,
    account_id: i64,
) -> Result<(bool, String, i64), RepoError> {
    let row = sqlx::query("SELECT banned, ban_reason, banned_until FROM accounts WHERE id = $1")
        .bind(account_id)
        .fetch_optional(pool)
        .await?
        .ok_or(RepoError::NotFound)?;

    let banned: bool = row.get("banned");
    let reason: String = row.get("ban_reason");
    let until: i64 = row.get::<Option<i64>, _>("banned_until").unwrap_or(0);

    let active = banned && (until == 0 || until > chrono::Utc::now().timestamp());
    Ok((active, reason, until))
}
