//! Configuration loading.
//!
//! A `config.toml` next to the binary provides the base values; `.env` /
//! process environment variables override the keys that differ between
//! deployments. Every key has a default so a bare checkout boots against
//! local stores.

use serde::Deserialize;
use std::fs;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: Database,
    pub shared_store: SharedStoreCfg,
    pub auth: Auth,
    pub network: Network,
    pub services: Services,
    pub world: WorldCfg,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Database {
    pub url: String,
    pub user: String,
    pub password: String,
    pub pool_size: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SharedStoreCfg {
    pub url: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Auth {
    pub token_secret: String,
    pub token_ttl_secs: i64,
    pub session_ttl_secs: u64,
    pub bcrypt_cost: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Network {
    pub max_connections: usize,
    pub max_connections_per_ip: usize,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Services {
    pub data_host: String,
    pub data_port: u16,
    pub login_port: u16,
    /// AccountService address as advertised to clients.
    pub account_host: String,
    pub account_port: u16,
    /// WorldService addresses as advertised to clients.
    pub world_host: String,
    pub world_tcp_port: u16,
    pub world_udp_port: u16,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WorldCfg {
    pub tick_rate: u32,
    pub writeback_interval_secs: u64,
    pub channel_capacity: usize,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/flyagain".to_string(),
            user: "flyagain".to_string(),
            password: "flyagain".to_string(),
            pool_size: 8,
        }
    }
}

impl Default for SharedStoreCfg {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            token_secret: "dev-secret-change-in-production-please".to_string(),
            token_ttl_secs: 86_400,
            session_ttl_secs: 86_400,
            bcrypt_cost: 12,
        }
    }
}

impl Default for Network {
    fn default() -> Self {
        Self {
            max_connections: 5_000,
            max_connections_per_ip: 5,
        }
    }
}

impl Default for Services {
    fn default() -> Self {
        Self {
            data_host: "127.0.0.1".to_string(),
            data_port: 9090,
            login_port: 7777,
            account_host: "127.0.0.1".to_string(),
            account_port: 7779,
            world_host: "127.0.0.1".to_string(),
            world_tcp_port: 7780,
            world_udp_port: 7781,
        }
    }
}

impl Default for WorldCfg {
    fn default() -> Self {
        Self {
            tick_rate: 20,
            writeback_interval_secs: 300,
            channel_capacity: 1_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: Database::default(),
            shared_store: SharedStoreCfg::default(),
            auth: Auth::default(),
            network: Network::default(),
            services: Services::default(),
            world: WorldCfg::default(),
        }
    }
}

impl Config {
    /// Load `config.toml` (or `$CONFIG_PATH`), then apply environment
    /// overrides. A missing file falls back to defaults.
    pub fn load() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        let mut config = match fs::read_to_string(&path) {
            Ok(raw) => toml::from_str::<Config>(&raw)
                .map_err(|e| format!("failed to parse {path}: {e}"))?,
            Err(_) => Config::default(),
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("DATABASE_USER") {
            self.database.user = v;
        }
        if let Ok(v) = std::env::var("DATABASE_PASSWORD") {
            self.database.password = v;
        }
        if let Ok(v) = std::env::var("SHARED_STORE_URL") {
            self.shared_store.url = v;
        }
        if let Ok(v) = std::env::var("TOKEN_SECRET") {
            self.auth.token_secret = v;
        }
        if let Ok(v) = std::env::var("BCRYPT_COST") {
            if let Ok(parsed) = v.parse() {
                self.auth.bcrypt_cost = parsed;
            }
        }
        if let Ok(v) = std::env::var("TICK_RATE") {
            if let Ok(parsed) = v.parse() {
                self.world.tick_rate = parsed;
            }
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.world.tick_rate == 0 || self.world.tick_rate > 200 {
            return Err(format!(
                "tick_rate {} is outside the sane range 1..=200",
                self.world.tick_rate
            ));
        }
        if !(4..=31).contains(&self.auth.bcrypt_cost) {
            return Err(format!(
                "bcrypt_cost {} is outside bcrypt's 4..=31 domain",
                self.auth.bcrypt_cost
            ));
        }
        if self.auth.token_secret == Auth::default().token_secret {
            tracing::warn!(
                "using the default token secret; generate one for production deployments"
            );
        }
        Ok(())
    }

    /// Tick budget in milliseconds, derived from the configured rate.
    pub fn tick_interval_ms(&self) -> u64 {
        1_000 / self.world.tick_rate as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_ports() {
        let config = Config::default();
        assert_eq!(config.services.login_port, 7777);
        assert_eq!(config.services.account_port, 7779);
        assert_eq!(config.services.world_tcp_port, 7780);
        assert_eq!(config.services.world_udp_port, 7781);
        assert_eq!(config.services.data_port, 9090);
        assert_eq!(config.world.tick_rate, 20);
        assert_eq!(config.tick_interval_ms(), 50);
        assert_eq!(config.world.writeback_interval_secs, 300);
        assert_eq!(config.auth.session_ttl_secs, 86_400);
        assert_eq!(config.auth.bcrypt_cost, 12);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [world]
            tick_rate = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.world.tick_rate, 10);
        assert_eq!(config.world.channel_capacity, 1_000);
        assert_eq!(config.services.login_port, 7777);
    }

    #[test]
    fn test_bad_tick_rate_rejected() {
        let mut config = Config::default();
        config.world.tick_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_bcrypt_cost_rejected() {
        let mut config = Config::default();
        config.auth.bcrypt_cost = 3;
        assert!(config.validate().is_err());
        config.auth.bcrypt_cost = 32;
        assert!(config.validate().is_err());
    }
}
