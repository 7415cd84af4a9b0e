//! Repository layer - all SQL lives here.
//!
//! ## Module Structure
//! - `account` - Account lookup, creation, ban checks
//! - `character` - Character CRUD and the full-field save
//! - `inventory` - Inventory and equipment operations
//! - `game_data` - Static item/monster/spawn/skill/loot reads

pub mod account;
pub mod character;
pub mod game_data;
pub mod inventory;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("duplicate {0}")]
    Duplicate(&'static str),
    #[error("character limit reached")]
    CharacterLimit,
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl RepoError {
    /// Classify a unique-constraint violation by the constraint it hit.
    pub fn from_insert(err: sqlx::Error) -> RepoError {
        if let sqlx::Error::Database(ref db) = err {
            if db.is_unique_violation() {
                return match db.constraint() {
                    Some(c) if c.contains("email") => RepoError::Duplicate("email"),
                    Some(c) if c.contains("username") => RepoError::Duplicate("username"),
                    Some(c) if c.contains("name") => RepoError::Duplicate("name"),
                    _ => RepoError::Duplicate("record"),
                };
            }
        }
        RepoError::Db(err)
    }
}
