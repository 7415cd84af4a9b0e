//! Account and character input validation.

use once_cell::sync::Lazy;
use regex::Regex;

static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9-]{3,16}$").expect("static pattern"));

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static pattern"));

pub const MAX_EMAIL_LEN: usize = 254;
pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 72;

/// Letters accepted in character names beyond ASCII.
const UMLAUTS: &str = "äöüßÄÖÜẞ";

pub fn validate_username(username: &str) -> Result<(), String> {
    if USERNAME_RE.is_match(username) {
        Ok(())
    } else {
        Err("Username must be 3-16 characters: letters, digits or '-'.".to_string())
    }
}

pub fn validate_email(email: &str) -> Result<(), String> {
    if email.len() <= MAX_EMAIL_LEN && EMAIL_RE.is_match(email) {
        Ok(())
    } else {
        Err("Invalid email address.".to_string())
    }
}

pub fn validate_password(password: &str) -> Result<(), String> {
    // bcrypt truncates beyond 72 bytes, so longer inputs are refused.
    if (MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&password.len()) {
        Ok(())
    } else {
        Err(format!(
            "Password must be {MIN_PASSWORD_LEN}-{MAX_PASSWORD_LEN} characters."
        ))
    }
}

/// Character names: 2-16 code points, first a letter (ASCII or umlaut),
/// the rest alphanumeric from the same set.
pub fn validate_character_name(name: &str) -> Result<(), String> {
    let count = name.chars().count();
    if !(2..=16).contains(&count) {
        return Err("Character name must be 2-16 characters.".to_string());
    }
    let mut chars = name.chars();
    let first = chars.next().expect("length checked above");
    if !(first.is_ascii_alphabetic() || UMLAUTS.contains(first)) {
        return Err("Character name must start with a letter.".to_string());
    }
    for c in chars {
        if !(c.is_ascii_alphanumeric() || UMLAUTS.contains(c)) {
            return Err("Character name may only contain letters and digits.".to_string());
        }
    }
    Ok(())
}

/// The four playable classes. Creation requests name them in German;
/// ids and display labels are what the rest of the system uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterClass {
    Krieger = 1,
    Magier = 2,
    Assassine = 3,
    Kleriker = 4,
}

impl CharacterClass {
    pub fn from_name(name: &str) -> Option<CharacterClass> {
        match name.to_lowercase().as_str() {
            "krieger" => Some(CharacterClass::Krieger),
            "magier" => Some(CharacterClass::Magier),
            "assassine" => Some(CharacterClass::Assassine),
            "kleriker" => Some(CharacterClass::Kleriker),
            _ => None,
        }
    }

    pub fn from_id(id: u32) -> Option<CharacterClass> {
        match id {
            1 => Some(CharacterClass::Krieger),
            2 => Some(CharacterClass::Magier),
            3 => Some(CharacterClass::Assassine),
            4 => Some(CharacterClass::Kleriker),
            _ => None,
        }
    }

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn label(self) -> &'static str {
        match self {
            CharacterClass::Krieger => "Warrior",
            CharacterClass::Magier => "Mage",
            CharacterClass::Assassine => "Assassin",
            CharacterClass::Kleriker => "Cleric",
        }
    }

    /// Base primary stats rolled at creation: (str, sta, dex, int).
    pub fn base_stats(self) -> (u32, u32, u32, u32) {
        match self {
            CharacterClass::Krieger => (12, 11, 7, 5),
            CharacterClass::Magier => (5, 7, 8, 15),
            CharacterClass::Assassine => (9, 7, 14, 5),
            CharacterClass::Kleriker => (6, 10, 7, 12),
        }
    }
}

/// Max HP from level and stamina.
pub fn max_hp_for(level: u32, stamina: u32) -> i32 {
    (50 + stamina * 5 + (level - 1) * 20) as i32
}

/// Max MP from level and intellect.
pub fn max_mp_for(level: u32, intellect: u32) -> i32 {
    (30 + intellect * 5 + (level - 1) * 10) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_rules() {
        assert!(validate_username("neo").is_ok());
        assert!(validate_username("a-b-c-123").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("seventeen-chars-x").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username("umläut").is_err());
    }

    #[test]
    fn test_email_rules() {
        assert!(validate_email("neo@x.io").is_ok());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("two@@x.io").is_err());
        let long = format!("{}@example.com", "a".repeat(250));
        assert!(validate_email(&long).is_err());
    }

    #[test]
    fn test_password_length_bounds() {
        assert!(validate_password("hunter2xx").is_ok());
        assert!(validate_password("short").is_err());
        assert!(validate_password(&"x".repeat(72)).is_ok());
        assert!(validate_password(&"x".repeat(73)).is_err());
    }

    #[test]
    fn test_character_name_rules() {
        assert!(validate_character_name("Gandalf").is_ok());
        assert!(validate_character_name("Ära").is_ok());
        assert!(validate_character_name("Bjß").is_ok());
        assert!(validate_character_name("ab").is_ok());
        assert!(validate_character_name("a").is_err());
        assert!(validate_character_name("1Gandalf").is_err());
        assert!(validate_character_name("Gan dalf").is_err());
        assert!(validate_character_name("Gandalf!").is_err());
        assert!(validate_character_name(&"G".repeat(17)).is_err());
    }

    #[test]
    fn test_class_mapping() {
        assert_eq!(
            CharacterClass::from_name("magier"),
            Some(CharacterClass::Magier)
        );
        assert_eq!(
            CharacterClass::from_name("KRIEGER"),
            Some(CharacterClass::Krieger)
        );
        assert_eq!(CharacterClass::from_name("wizard"), None);
        assert_eq!(CharacterClass::Magier.id(), 2);
        assert_eq!(CharacterClass::Kleriker.label(), "Cleric");
        assert_eq!(CharacterClass::from_id(4), Some(CharacterClass::Kleriker));
        assert_eq!(CharacterClass::from_id(5), None);
    }
}
