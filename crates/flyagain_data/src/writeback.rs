//! Redis to database write-back.
//!
//! Every flush interval, scan the shared store for dirty markers, read the
//! staged character hash, and persist it through the character repository.
//! One character's failure never blocks the rest of the sweep.

use std::future::Future;
use std::time::Duration;

use sqlx::PgPool;
use tracing::{info, warn};

use flyagain_common::store::character_from_fields;
use flyagain_common::{ServiceError, SharedStore};
use flyagain_protocol::messages::CharacterRecord;

use crate::repo;

/// Extract the character id from a `character:{id}:dirty` key.
/// Anything that does not parse is skipped by the sweep.
pub fn parse_dirty_key(key: &str) -> Option<i64> {
    key.strip_prefix("character:")?
        .strip_suffix(":dirty")?
        .parse()
        .ok()
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub flushed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// One sweep over all dirty markers. The save operation is injected so the
/// sweep logic is testable without a database.
pub async fn run_cycle<F, Fut>(store: &SharedStore, save: F) -> FlushStats
where
    F: Fn(CharacterRecord) -> Fut,
    Fut: Future<Output = Result<(), ServiceError>>,
{
    let mut stats = FlushStats::default();

    let keys = match store.scan_dirty_markers().await {
        Ok(keys) => keys,
        Err(e) => {
            warn!(error = %e, "dirty marker scan failed, skipping sweep");
            return stats;
        }
    };

    for key in keys {
        let Some(character_id) = parse_dirty_key(&key) else {
            warn!(key, "dirty marker with non-numeric character id, skipping");
            stats.skipped += 1;
            continue;
        };

        let fields = match store.read_writeback_hash(character_id).await {
            Ok(fields) => fields,
            Err(e) => {
                warn!(character_id, error = %e, "failed to read staged character");
                stats.failed += 1;
                continue;
            }
        };
        if fields.is_empty() {
            // Nothing staged; leave the marker for a later sweep.
            stats.skipped += 1;
            continue;
        }

        let record = character_from_fields(character_id, &fields);
        match save(record).await {
            Ok(()) => {
                if let Err(e) = store.clear_dirty_marker(character_id).await {
                    warn!(character_id, error = %e, "failed to clear dirty marker");
                }
                stats.flushed += 1;
            }
            Err(e) => {
                warn!(character_id, error = %e, "character flush failed");
                stats.failed += 1;
            }
        }
    }
    stats
}

pub async fn run_scheduler(store: SharedStore, pool: PgPool, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick of an interval completes immediately; wait it out so
    // the first sweep happens one full interval after boot.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let stats = run_cycle(&store, |record| {
            let pool = pool.clone();
            async move {
                repo::character::save(&pool, &record)
                    .await
                    .map_err(|e| ServiceError::Internal(e.to_string()))
            }
        })
        .await;
        info!(
            flushed = stats.flushed,
            skipped = stats.skipped,
            failed = stats.failed,
            "write-back sweep complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::Mutex;

    use flyagain_common::store::{Kv, MemoryKv};

    fn record(id: i64) -> CharacterRecord {
        CharacterRecord {
            id,
            account_id: 42,
            name: format!("Char{id}"),
            class_id: 1,
            level: 7,
            xp: 6_500,
            hp: 80,
            mp: 20,
            max_hp: 100,
            max_mp: 40,
            strength: 12,
            stamina: 11,
            dexterity: 7,
            intellect: 5,
            stat_points: 3,
            map_id: 2,
            x: 10.0,
            y: 0.0,
            z: -4.0,
            gold: 99,
            play_time: 1_234,
        }
    }

    #[test]
    fn test_parse_dirty_key() {
        assert_eq!(parse_dirty_key("character:42:dirty"), Some(42));
        assert_eq!(parse_dirty_key("character:abc:dirty"), None);
        assert_eq!(parse_dirty_key("character:42"), None);
        assert_eq!(parse_dirty_key("char:42:dirty"), None);
        assert_eq!(parse_dirty_key("character::dirty"), None);
    }

    #[tokio::test]
    async fn test_sweep_flushes_and_clears_marker() {
        let kv = Arc::new(MemoryKv::new());
        let store = SharedStore::with_backend(kv);
        store.write_character_snapshot(&record(7)).await.unwrap();

        let saved = Arc::new(Mutex::new(Vec::new()));
        let saved_ref = saved.clone();
        let stats = run_cycle(&store, move |rec| {
            let saved = saved_ref.clone();
            async move {
                saved.lock().unwrap().push(rec);
                Ok(())
            }
        })
        .await;

        assert_eq!(stats, FlushStats { flushed: 1, skipped: 0, failed: 0 });
        let saved = saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0], record(7));
        assert!(store.scan_dirty_markers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_fields_flush_with_safe_defaults() {
        let kv = Arc::new(MemoryKv::new());
        let store = SharedStore::with_backend(kv.clone());
        kv.set_ex("character:5:dirty", "1", 3600).await.unwrap();
        kv.hset_all(
            "character:5",
            &[("name".to_string(), "Sparse".to_string())],
            3600,
        )
        .await
        .unwrap();

        let saved = Arc::new(Mutex::new(Vec::new()));
        let saved_ref = saved.clone();
        run_cycle(&store, move |rec| {
            let saved = saved_ref.clone();
            async move {
                saved.lock().unwrap().push(rec);
                Ok(())
            }
        })
        .await;

        let saved = saved.lock().unwrap();
        assert_eq!(saved[0].level, 1);
        assert_eq!(saved[0].map_id, 1);
        assert_eq!(saved[0].hp, 0);
        assert_eq!(saved[0].gold, 0);
    }

    #[tokio::test]
    async fn test_empty_hash_skipped_and_marker_kept() {
        let kv = Arc::new(MemoryKv::new());
        let store = SharedStore::with_backend(kv.clone());
        kv.set_ex("character:9:dirty", "1", 3600).await.unwrap();

        let stats = run_cycle(&store, |_| async { Ok(()) }).await;
        assert_eq!(stats, FlushStats { flushed: 0, skipped: 1, failed: 0 });
        assert_eq!(
            store.scan_dirty_markers().await.unwrap(),
            vec!["character:9:dirty".to_string()]
        );
    }

    #[tokio::test]
    async fn test_non_numeric_id_skipped() {
        let kv = Arc::new(MemoryKv::new());
        let store = SharedStore::with_backend(kv.clone());
        kv.set_ex("character:abc:dirty", "1", 3600).await.unwrap();

        let stats = run_cycle(&store, |_| async { Ok(()) }).await;
        assert_eq!(stats, FlushStats { flushed: 0, skipped: 1, failed: 0 });
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_the_rest() {
        let kv = Arc::new(MemoryKv::new());
        let store = SharedStore::with_backend(kv);
        store.write_character_snapshot(&record(1)).await.unwrap();
        store.write_character_snapshot(&record(2)).await.unwrap();
        store.write_character_snapshot(&record(3)).await.unwrap();

        let stats = run_cycle(&store, |rec| async move {
            if rec.id == 2 {
                Err(ServiceError::Unavailable)
            } else {
                Ok(())
            }
        })
        .await;

        assert_eq!(stats, FlushStats { flushed: 2, skipped: 0, failed: 1 });
        // Only the failed character's marker survives.
        assert_eq!(
            store.scan_dirty_markers().await.unwrap(),
            vec!["character:2:dirty".to_string()]
        );
    }

    #[tokio::test]
    async fn test_field_mapping_roundtrip() {
        let staged = record(11);
        let mut fields = HashMap::new();
        for (k, v) in [
            ("account_id", "42"),
            ("name", "Char11"),
            ("class_id", "1"),
            ("level", "7"),
            ("xp", "6500"),
            ("hp", "80"),
            ("mp", "20"),
            ("max_hp", "100"),
            ("max_mp", "40"),
            ("strength", "12"),
            ("stamina", "11"),
            ("dexterity", "7"),
            ("intellect", "5"),
            ("stat_points", "3"),
            ("map_id", "2"),
            ("pos_x", "10"),
            ("pos_y", "0"),
            ("pos_z", "-4"),
            ("gold", "99"),
            ("play_time", "1234"),
        ] {
            fields.insert(k.to_string(), v.to_string());
        }
        assert_eq!(character_from_fields(11, &fields), staged);
    }
}
