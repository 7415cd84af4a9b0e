//! Shared in-memory store access.
//!
//! LoginService, AccountService and WorldService meet in one Redis-style
//! key/value server: sessions, rate-limit windows, the character cache,
//! dirty-flush markers and presence sets. The typed operations live on
//! [`SharedStore`]; the raw commands sit behind the small [`Kv`] trait so
//! tests can run against the in-memory backend.
//!
//! Key shapes (domain invariants, not implementation details):
//! - `session:{sessionId}` hash, TTL 24 h
//! - `session:account:{accountId}` string → current session id, TTL 24 h
//! - `char:{characterId}` hash: gateway character cache (5 min from
//!   AccountService, refreshed to 1 h by world snapshots)
//! - `character:{characterId}` hash + `character:{characterId}:dirty`
//!   marker: pending DataService write-back
//! - `online_players`, `zone:{zoneId}:channel:{channelId}` sets
//! - `rate_limit:{ip}:{op}` fixed-window counters

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use redis::AsyncCommands;

use flyagain_protocol::messages::CharacterRecord;

use crate::error::ServiceError;

/// Gateway cache TTL set by AccountService at character select.
pub const CHAR_CACHE_TTL_SECS: u64 = 5 * 60;
/// Cache TTL applied when the world refreshes a snapshot.
pub const CHAR_SNAPSHOT_TTL_SECS: u64 = 60 * 60;
/// Dirty marker TTL.
pub const DIRTY_TTL_SECS: u64 = 60 * 60;

/// Raw command surface. One production implementation (Redis) and one
/// in-memory implementation for tests.
#[async_trait]
pub trait Kv: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, ServiceError>;
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), ServiceError>;
    async fn del(&self, key: &str) -> Result<(), ServiceError>;
    async fn del_many(&self, keys: &[String]) -> Result<(), ServiceError>;
    async fn incr(&self, key: &str) -> Result<u64, ServiceError>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), ServiceError>;
    async fn hset_all(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl_secs: u64,
    ) -> Result<(), ServiceError>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), ServiceError>;
    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, ServiceError>;
    async fn sadd(&self, key: &str, member: &str) -> Result<(), ServiceError>;
    async fn srem(&self, key: &str, member: &str) -> Result<(), ServiceError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, ServiceError>;
    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, ServiceError>;
}

// ---------------------------------------------------------------------------
// Redis backend
// ---------------------------------------------------------------------------

/// Production backend over a multiplexed Redis connection.
#[derive(Clone)]
pub struct RedisKv {
    manager: redis::aio::ConnectionManager,
}

impl RedisKv {
    pub async fn connect(url: &str) -> Result<Self, ServiceError> {
        let client = redis::Client::open(url)?;
        let manager = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl Kv for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>, ServiceError> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn del_many(&self, keys: &[String]) -> Result<(), ServiceError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.del(key).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<u64, ServiceError> {
        let mut conn = self.manager.clone();
        Ok(conn.incr(key, 1u64).await?)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        conn.expire::<_, ()>(key, ttl_secs as i64).await?;
        Ok(())
    }

    async fn hset_all(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl_secs: u64,
    ) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        let _: () = redis::pipe()
            .hset_multiple(key, fields)
            .ignore()
            .expire(key, ttl_secs as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        conn.hset::<_, _, _, ()>(key, field, value).await?;
        Ok(())
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, ServiceError> {
        let mut conn = self.manager.clone();
        Ok(conn.hgetall(key).await?)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        conn.sadd::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        conn.srem::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, ServiceError> {
        let mut conn = self.manager.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, ServiceError> {
        let mut conn = self.manager.clone();
        let mut keys = Vec::new();
        let mut iter = conn.scan_match::<_, String>(pattern).await?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// In-memory backend (test support)
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum MemValue {
    Str(String),
    Hash(HashMap<String, String>),
    Set(std::collections::HashSet<String>),
}

struct MemEntry {
    value: MemValue,
    expires_at: Option<u64>,
}

/// In-memory [`Kv`] with a manually advanced clock, so TTL behavior
/// (window resets, cache expiry) is testable without a live server.
#[derive(Default)]
pub struct MemoryKv {
    inner: parking_lot::Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    map: HashMap<String, MemEntry>,
    now_secs: u64,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the fake clock, expiring entries along the way.
    pub fn advance_secs(&self, secs: u64) {
        let mut inner = self.inner.lock();
        inner.now_secs += secs;
        let now = inner.now_secs;
        inner
            .map
            .retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
    }

    fn with_live<R>(&self, key: &str, f: impl FnOnce(Option<&mut MemEntry>) -> R) -> R {
        let mut inner = self.inner.lock();
        let now = inner.now_secs;
        if let Some(entry) = inner.map.get(key) {
            if entry.expires_at.is_some_and(|at| at <= now) {
                inner.map.remove(key);
            }
        }
        f(inner.map.get_mut(key))
    }
}

#[async_trait]
impl Kv for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, ServiceError> {
        Ok(self.with_live(key, |entry| match entry {
            Some(MemEntry {
                value: MemValue::Str(s),
                ..
            }) => Some(s.clone()),
            _ => None,
        }))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), ServiceError> {
        let mut inner = self.inner.lock();
        let expires_at = Some(inner.now_secs + ttl_secs);
        inner.map.insert(
            key.to_string(),
            MemEntry {
                value: MemValue::Str(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), ServiceError> {
        self.inner.lock().map.remove(key);
        Ok(())
    }

    async fn del_many(&self, keys: &[String]) -> Result<(), ServiceError> {
        let mut inner = self.inner.lock();
        for key in keys {
            inner.map.remove(key);
        }
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<u64, ServiceError> {
        let mut inner = self.inner.lock();
        let now = inner.now_secs;
        if inner
            .map
            .get(key)
            .is_some_and(|e| e.expires_at.is_some_and(|at| at <= now))
        {
            inner.map.remove(key);
        }
        let entry = inner.map.entry(key.to_string()).or_insert(MemEntry {
            value: MemValue::Str("0".to_string()),
            expires_at: None,
        });
        match &mut entry.value {
            MemValue::Str(s) => {
                let next = s.parse::<u64>().unwrap_or(0) + 1;
                *s = next.to_string();
                Ok(next)
            }
            _ => Err(ServiceError::Internal(format!(
                "INCR on non-string key {key}"
            ))),
        }
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), ServiceError> {
        let mut inner = self.inner.lock();
        let now = inner.now_secs;
        if let Some(entry) = inner.map.get_mut(key) {
            entry.expires_at = Some(now + ttl_secs);
        }
        Ok(())
    }

    async fn hset_all(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl_secs: u64,
    ) -> Result<(), ServiceError> {
        let mut inner = self.inner.lock();
        let expires_at = Some(inner.now_secs + ttl_secs);
        let map = fields.iter().cloned().collect();
        inner.map.insert(
            key.to_string(),
            MemEntry {
                value: MemValue::Hash(map),
                expires_at,
            },
        );
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), ServiceError> {
        let mut inner = self.inner.lock();
        match inner.map.get_mut(key) {
            Some(MemEntry {
                value: MemValue::Hash(map),
                ..
            }) => {
                map.insert(field.to_string(), value.to_string());
            }
            _ => {
                inner.map.insert(
                    key.to_string(),
                    MemEntry {
                        value: MemValue::Hash(HashMap::from([(
                            field.to_string(),
                            value.to_string(),
                        )])),
                        expires_at: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, ServiceError> {
        Ok(self.with_live(key, |entry| match entry {
            Some(MemEntry {
                value: MemValue::Hash(map),
                ..
            }) => map.clone(),
            _ => HashMap::new(),
        }))
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), ServiceError> {
        let mut inner = self.inner.lock();
        match inner.map.get_mut(key) {
            Some(MemEntry {
                value: MemValue::Set(set),
                ..
            }) => {
                set.insert(member.to_string());
            }
            _ => {
                inner.map.insert(
                    key.to_string(),
                    MemEntry {
                        value: MemValue::Set(std::collections::HashSet::from([
                            member.to_string()
                        ])),
                        expires_at: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), ServiceError> {
        let mut inner = self.inner.lock();
        if let Some(MemEntry {
            value: MemValue::Set(set),
            ..
        }) = inner.map.get_mut(key)
        {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, ServiceError> {
        Ok(self.with_live(key, |entry| match entry {
            Some(MemEntry {
                value: MemValue::Set(set),
                ..
            }) => set.iter().cloned().collect(),
            _ => Vec::new(),
        }))
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, ServiceError> {
        // Only the `prefix*suffix` shapes the services use.
        let inner = self.inner.lock();
        let now = inner.now_secs;
        let (prefix, suffix) = match pattern.split_once('*') {
            Some((p, s)) => (p, s),
            None => (pattern, ""),
        };
        Ok(inner
            .map
            .iter()
            .filter(|(_, entry)| entry.expires_at.map_or(true, |at| at > now))
            .filter(|(key, _)| key.starts_with(prefix) && key.ends_with(suffix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Typed store
// ---------------------------------------------------------------------------

/// An active session as stored under `session:{id}`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionData {
    pub session_id: String,
    pub account_id: i64,
    pub character_id: i64,
    pub ip: String,
    pub login_time: i64,
    pub hmac_secret: String,
}

/// Generate a session id: 8 bytes from the system RNG, base64-url-no-pad.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a UDP signing secret: 32 bytes, base64-url-no-pad (43 chars).
pub fn generate_hmac_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Clone)]
pub struct SharedStore {
    kv: Arc<dyn Kv>,
}

impl SharedStore {
    pub async fn connect(url: &str) -> Result<Self, ServiceError> {
        Ok(Self {
            kv: Arc::new(RedisKv::connect(url).await?),
        })
    }

    pub fn with_backend(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    // -- sessions -----------------------------------------------------------

    pub async fn create_session(
        &self,
        session: &SessionData,
        ttl_secs: u64,
    ) -> Result<(), ServiceError> {
        let key = format!("session:{}", session.session_id);
        let fields = vec![
            ("account_id".to_string(), session.account_id.to_string()),
            ("character_id".to_string(), session.character_id.to_string()),
            ("ip".to_string(), session.ip.clone()),
            ("login_time".to_string(), session.login_time.to_string()),
            ("hmac_secret".to_string(), session.hmac_secret.clone()),
        ];
        self.kv.hset_all(&key, &fields, ttl_secs).await?;
        self.kv
            .set_ex(
                &format!("session:account:{}", session.account_id),
                &session.session_id,
                ttl_secs,
            )
            .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionData>, ServiceError> {
        let fields = self.kv.hget_all(&format!("session:{session_id}")).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(SessionData {
            session_id: session_id.to_string(),
            account_id: parse_or_default(&fields, "account_id"),
            character_id: parse_or_default(&fields, "character_id"),
            ip: fields.get("ip").cloned().unwrap_or_default(),
            login_time: parse_or_default(&fields, "login_time"),
            hmac_secret: fields.get("hmac_secret").cloned().unwrap_or_default(),
        }))
    }

    pub async fn session_for_account(
        &self,
        account_id: i64,
    ) -> Result<Option<String>, ServiceError> {
        self.kv.get(&format!("session:account:{account_id}")).await
    }

    /// Delete the account's current session and reverse key, if any.
    /// Returns the evicted session id.
    pub async fn evict_session(&self, account_id: i64) -> Result<Option<String>, ServiceError> {
        let reverse_key = format!("session:account:{account_id}");
        let Some(old_id) = self.kv.get(&reverse_key).await? else {
            return Ok(None);
        };
        self.kv
            .del_many(&[format!("session:{old_id}"), reverse_key])
            .await?;
        Ok(Some(old_id))
    }

    pub async fn set_session_character(
        &self,
        session_id: &str,
        character_id: i64,
    ) -> Result<(), ServiceError> {
        self.kv
            .hset(
                &format!("session:{session_id}"),
                "character_id",
                &character_id.to_string(),
            )
            .await
    }

    // -- rate limits --------------------------------------------------------

    /// Fixed-window counter: INCR, arm the TTL on the first hit, report the
    /// running count. The caller compares against its threshold.
    pub async fn fixed_window_count(
        &self,
        key: &str,
        window_secs: u64,
    ) -> Result<u64, ServiceError> {
        let count = self.kv.incr(key).await?;
        if count == 1 {
            self.kv.expire(key, window_secs).await?;
        }
        Ok(count)
    }

    pub fn rate_limit_key(ip: &str, op: &str) -> String {
        format!("rate_limit:{ip}:{op}")
    }

    // -- character cache & write-back ---------------------------------------

    /// Prime the gateway cache at character select (5 min TTL).
    pub async fn prime_character_cache(
        &self,
        record: &CharacterRecord,
    ) -> Result<(), ServiceError> {
        self.kv
            .hset_all(
                &format!("char:{}", record.id),
                &character_fields(record),
                CHAR_CACHE_TTL_SECS,
            )
            .await
    }

    pub async fn read_character_cache(
        &self,
        character_id: i64,
    ) -> Result<Option<CharacterRecord>, ServiceError> {
        let fields = self.kv.hget_all(&format!("char:{character_id}")).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(character_from_fields(character_id, &fields)))
    }

    /// World snapshot: refresh the gateway cache to 1 h and stage the
    /// write-back hash plus dirty marker for the DataService sweep.
    pub async fn write_character_snapshot(
        &self,
        record: &CharacterRecord,
    ) -> Result<(), ServiceError> {
        let fields = character_fields(record);
        self.kv
            .hset_all(&format!("char:{}", record.id), &fields, CHAR_SNAPSHOT_TTL_SECS)
            .await?;
        self.kv
            .hset_all(
                &format!("character:{}", record.id),
                &fields,
                CHAR_SNAPSHOT_TTL_SECS,
            )
            .await?;
        self.kv
            .set_ex(
                &format!("character:{}:dirty", record.id),
                "1",
                DIRTY_TTL_SECS,
            )
            .await
    }

    pub async fn scan_dirty_markers(&self) -> Result<Vec<String>, ServiceError> {
        self.kv.scan_match("character:*:dirty").await
    }

    pub async fn read_writeback_hash(
        &self,
        character_id: i64,
    ) -> Result<HashMap<String, String>, ServiceError> {
        self.kv.hget_all(&format!("character:{character_id}")).await
    }

    pub async fn clear_dirty_marker(&self, character_id: i64) -> Result<(), ServiceError> {
        self.kv.del(&format!("character:{character_id}:dirty")).await
    }

    // -- presence -----------------------------------------------------------

    pub async fn add_online(&self, character_id: i64) -> Result<(), ServiceError> {
        self.kv
            .sadd("online_players", &character_id.to_string())
            .await
    }

    pub async fn add_channel_member(
        &self,
        zone_id: u32,
        channel_id: u32,
        character_id: i64,
    ) -> Result<(), ServiceError> {
        self.kv
            .sadd(
                &format!("zone:{zone_id}:channel:{channel_id}"),
                &character_id.to_string(),
            )
            .await
    }

    pub async fn remove_channel_member(
        &self,
        zone_id: u32,
        channel_id: u32,
        character_id: i64,
    ) -> Result<(), ServiceError> {
        self.kv
            .srem(
                &format!("zone:{zone_id}:channel:{channel_id}"),
                &character_id.to_string(),
            )
            .await
    }

    /// Disconnect cleanup, batched: drop the character caches, dirty marker,
    /// presence memberships, the session, and (only if it still points at
    /// this session) the account reverse key.
    pub async fn disconnect_cleanup(
        &self,
        character_id: i64,
        zone_id: u32,
        channel_id: u32,
        session_id: &str,
        account_id: i64,
    ) -> Result<(), ServiceError> {
        self.kv
            .srem("online_players", &character_id.to_string())
            .await?;
        self.remove_channel_member(zone_id, channel_id, character_id)
            .await?;

        let mut to_delete = vec![
            format!("char:{character_id}"),
            format!("character:{character_id}"),
            format!("character:{character_id}:dirty"),
            format!("session:{session_id}"),
        ];
        let reverse_key = format!("session:account:{account_id}");
        if self.kv.get(&reverse_key).await?.as_deref() == Some(session_id) {
            to_delete.push(reverse_key);
        }
        self.kv.del_many(&to_delete).await
    }

    pub async fn online_players(&self) -> Result<Vec<String>, ServiceError> {
        self.kv.smembers("online_players").await
    }
}

/// Field names of the character hash. The write-back sweep parses exactly
/// these, with safe defaults for anything missing.
fn character_fields(record: &CharacterRecord) -> Vec<(String, String)> {
    vec![
        ("account_id".to_string(), record.account_id.to_string()),
        ("name".to_string(), record.name.clone()),
        ("class_id".to_string(), record.class_id.to_string()),
        ("level".to_string(), record.level.to_string()),
        ("xp".to_string(), record.xp.to_string()),
        ("hp".to_string(), record.hp.to_string()),
        ("mp".to_string(), record.mp.to_string()),
        ("max_hp".to_string(), record.max_hp.to_string()),
        ("max_mp".to_string(), record.max_mp.to_string()),
        ("strength".to_string(), record.strength.to_string()),
        ("stamina".to_string(), record.stamina.to_string()),
        ("dexterity".to_string(), record.dexterity.to_string()),
        ("intellect".to_string(), record.intellect.to_string()),
        ("stat_points".to_string(), record.stat_points.to_string()),
        ("map_id".to_string(), record.map_id.to_string()),
        ("pos_x".to_string(), record.x.to_string()),
        ("pos_y".to_string(), record.y.to_string()),
        ("pos_z".to_string(), record.z.to_string()),
        ("gold".to_string(), record.gold.to_string()),
        ("play_time".to_string(), record.play_time.to_string()),
    ]
}

/// Rebuild a record from hash fields. Missing fields take the documented
/// safe defaults (level 1, map 1, everything else zero).
pub fn character_from_fields(
    character_id: i64,
    fields: &HashMap<String, String>,
) -> CharacterRecord {
    CharacterRecord {
        id: character_id,
        account_id: parse_or_default(fields, "account_id"),
        name: fields.get("name").cloned().unwrap_or_default(),
        class_id: parse_or_default(fields, "class_id"),
        level: fields
            .get("level")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1),
        xp: parse_or_default(fields, "xp"),
        hp: parse_or_default(fields, "hp"),
        mp: parse_or_default(fields, "mp"),
        max_hp: parse_or_default(fields, "max_hp"),
        max_mp: parse_or_default(fields, "max_mp"),
        strength: parse_or_default(fields, "strength"),
        stamina: parse_or_default(fields, "stamina"),
        dexterity: parse_or_default(fields, "dexterity"),
        intellect: parse_or_default(fields, "intellect"),
        stat_points: parse_or_default(fields, "stat_points"),
        map_id: fields
            .get("map_id")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1),
        x: parse_or_default(fields, "pos_x"),
        y: parse_or_default(fields, "pos_y"),
        z: parse_or_default(fields, "pos_z"),
        gold: parse_or_default(fields, "gold"),
        play_time: parse_or_default(fields, "play_time"),
    }
}

fn parse_or_default<T: std::str::FromStr + Default>(
    fields: &HashMap<String, String>,
    name: &str,
) -> T {
    fields
        .get(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_store() -> (SharedStore, Arc<MemoryKv>) {
        let kv = Arc::new(MemoryKv::new());
        (SharedStore::with_backend(kv.clone()), kv)
    }

    fn session(id: &str, account_id: i64) -> SessionData {
        SessionData {
            session_id: id.to_string(),
            account_id,
            character_id: 0,
            ip: "10.0.0.1".to_string(),
            login_time: 1_700_000_000,
            hmac_secret: generate_hmac_secret(),
        }
    }

    #[tokio::test]
    async fn test_session_roundtrip() {
        let (store, _) = memory_store();
        let data = session("abc", 42);
        store.create_session(&data, 86_400).await.unwrap();

        assert_eq!(store.get_session("abc").await.unwrap(), Some(data));
        assert_eq!(
            store.session_for_account(42).await.unwrap(),
            Some("abc".to_string())
        );
        assert_eq!(store.get_session("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_evict_session_removes_both_keys() {
        let (store, _) = memory_store();
        store
            .create_session(&session("first", 42), 86_400)
            .await
            .unwrap();

        let evicted = store.evict_session(42).await.unwrap();
        assert_eq!(evicted, Some("first".to_string()));
        assert_eq!(store.get_session("first").await.unwrap(), None);
        assert_eq!(store.session_for_account(42).await.unwrap(), None);
        assert_eq!(store.evict_session(42).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fixed_window_counts_and_resets() {
        let (store, kv) = memory_store();
        let key = SharedStore::rate_limit_key("10.0.0.1", "login");

        for expected in 1..=6 {
            assert_eq!(
                store.fixed_window_count(&key, 60).await.unwrap(),
                expected
            );
        }

        kv.advance_secs(61);
        assert_eq!(store.fixed_window_count(&key, 60).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_character_cache_roundtrip_and_ttl() {
        let (store, kv) = memory_store();
        let record = CharacterRecord {
            id: 7,
            account_id: 42,
            name: "Gandalf".into(),
            class_id: 2,
            level: 3,
            max_hp: 110,
            hp: 90,
            max_mp: 150,
            mp: 140,
            map_id: 1,
            ..Default::default()
        };
        store.prime_character_cache(&record).await.unwrap();

        let cached = store.read_character_cache(7).await.unwrap().unwrap();
        assert_eq!(cached, record);

        kv.advance_secs(CHAR_CACHE_TTL_SECS + 1);
        assert_eq!(store.read_character_cache(7).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_snapshot_stages_writeback() {
        let (store, _) = memory_store();
        let record = CharacterRecord {
            id: 9,
            account_id: 1,
            name: "Frodo".into(),
            level: 2,
            map_id: 2,
            ..Default::default()
        };
        store.write_character_snapshot(&record).await.unwrap();

        let markers = store.scan_dirty_markers().await.unwrap();
        assert_eq!(markers, vec!["character:9:dirty".to_string()]);

        let fields = store.read_writeback_hash(9).await.unwrap();
        assert_eq!(character_from_fields(9, &fields), record);

        store.clear_dirty_marker(9).await.unwrap();
        assert!(store.scan_dirty_markers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_fields_take_safe_defaults() {
        let fields = HashMap::from([("name".to_string(), "Ghost".to_string())]);
        let record = character_from_fields(5, &fields);
        assert_eq!(record.level, 1);
        assert_eq!(record.map_id, 1);
        assert_eq!(record.hp, 0);
        assert_eq!(record.mp, 0);
        assert_eq!(record.gold, 0);
        assert_eq!(record.stat_points, 0);
        assert_eq!((record.x, record.y, record.z), (0.0, 0.0, 0.0));
    }

    #[tokio::test]
    async fn test_disconnect_cleanup_preserves_foreign_reverse_key() {
        let (store, _) = memory_store();
        store
            .create_session(&session("mine", 42), 86_400)
            .await
            .unwrap();
        store.add_online(7).await.unwrap();
        store.add_channel_member(1, 0, 7).await.unwrap();

        // Another login already replaced the reverse key.
        store
            .create_session(&session("newer", 42), 86_400)
            .await
            .unwrap();

        store.disconnect_cleanup(7, 1, 0, "mine", 42).await.unwrap();
        assert_eq!(store.get_session("mine").await.unwrap(), None);
        // The newer session's reverse mapping must survive.
        assert_eq!(
            store.session_for_account(42).await.unwrap(),
            Some("newer".to_string())
        );
        assert!(store.online_players().await.unwrap().is_empty());
    }

    #[test]
    fn test_generated_ids_have_documented_shape() {
        let sid = generate_session_id();
        assert_eq!(sid.len(), 11); // 8 bytes, base64-url-no-pad
        let secret = generate_hmac_secret();
        assert_eq!(secret.len(), 43); // 32 bytes, base64-url-no-pad
        assert_ne!(generate_session_id(), sid);
    }
}
