//! Value cache keyed by `(variable, geog, time_part_hash)`.
//!
//! A process-local tier fronts the warehouse table. Reads honor expiration;
//! inserts keep the first value written for a key unless the cache is
//! refreshing.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::RwLock;
use std::time::Duration;

use profiles_warehouse::{CachedValueRecord, Warehouse};
use serde::{Deserialize, Serialize};

use crate::domain::{TimePoint, UtcDateTime};
use crate::{CoreError, ValidationError};

/// How resolution interacts with the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Read hits, write misses.
    #[default]
    Use,
    /// Skip reads, overwrite on write.
    Refresh,
    /// Neither read nor write.
    Bypass,
}

impl CacheMode {
    pub const ALL: [Self; 3] = [Self::Use, Self::Refresh, Self::Bypass];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Use => "use",
            Self::Refresh => "refresh",
            Self::Bypass => "bypass",
        }
    }

    const fn reads(self) -> bool {
        matches!(self, Self::Use)
    }

    const fn writes(self) -> bool {
        !matches!(self, Self::Bypass)
    }
}

impl Display for CacheMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheMode {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| ValidationError::InvalidCacheMode {
                value: value.to_owned(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachedValue {
    pub value: Option<f64>,
    pub moe: Option<f64>,
    pub denom: Option<f64>,
}

type CacheKey = (String, String, String);

#[derive(Debug, Clone, Copy)]
struct MemoryEntry {
    value: CachedValue,
    expiration: Option<TimePoint>,
}

impl MemoryEntry {
    fn is_live(&self, now: TimePoint) -> bool {
        self.expiration.is_none_or(|expiration| expiration > now)
    }
}

pub struct ValueCache {
    warehouse: Option<Warehouse>,
    memory: RwLock<HashMap<CacheKey, MemoryEntry>>,
    ttl: Option<Duration>,
    mode: CacheMode,
}

impl ValueCache {
    /// Cache without a persistent tier.
    pub fn in_memory() -> Self {
        Self {
            warehouse: None,
            memory: RwLock::new(HashMap::new()),
            ttl: None,
            mode: CacheMode::Use,
        }
    }

    pub fn persistent(warehouse: Warehouse) -> Self {
        Self {
            warehouse: Some(warehouse),
            ..Self::in_memory()
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    pub const fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Live entries for `geogs`, keyed by geography slug.
    pub fn get_many(
        &self,
        variable: &str,
        time_part_hash: &str,
        geogs: &[String],
        now: UtcDateTime,
    ) -> Result<HashMap<String, CachedValue>, CoreError> {
        let mut hits = HashMap::new();
        if !self.mode.reads() || geogs.is_empty() {
            return Ok(hits);
        }
        let instant = TimePoint::from(now);

        {
            let memory = self
                .memory
                .read()
                .expect("value cache lock should not be poisoned");
            for geog in geogs {
                let key = (variable.to_owned(), geog.clone(), time_part_hash.to_owned());
                if let Some(entry) = memory.get(&key).filter(|entry| entry.is_live(instant)) {
                    hits.insert(geog.clone(), entry.value);
                }
            }
        }

        if let Some(warehouse) = &self.warehouse {
            let missing: Vec<String> = geogs
                .iter()
                .filter(|geog| !hits.contains_key(*geog))
                .cloned()
                .collect();
            if !missing.is_empty() {
                let rows = warehouse.cached_values(
                    variable,
                    time_part_hash,
                    &missing,
                    &instant.to_string(),
                )?;
                let mut memory = self
                    .memory
                    .write()
                    .expect("value cache lock should not be poisoned");
                for row in rows {
                    let value = CachedValue {
                        value: row.value,
                        moe: row.moe,
                        denom: row.denom,
                    };
                    let expiration = row
                        .expiration
                        .as_deref()
                        .and_then(|text| TimePoint::parse(text).ok());
                    memory.insert(
                        (row.variable, row.geog.clone(), row.time_part_hash),
                        MemoryEntry { value, expiration },
                    );
                    hits.insert(row.geog, value);
                }
            }
        }

        tracing::debug!(
            variable = %variable,
            requested = geogs.len(),
            hits = hits.len(),
            "value cache probe"
        );
        Ok(hits)
    }

    /// Write one variable's values at one time-part. Returns rows persisted.
    pub fn put_many(
        &self,
        variable: &str,
        time_part_hash: &str,
        entries: &[(String, CachedValue)],
        now: UtcDateTime,
    ) -> Result<usize, CoreError> {
        if !self.mode.writes() || entries.is_empty() {
            return Ok(0);
        }
        let expiration = self.ttl.and_then(|ttl| {
            let ttl = time::Duration::try_from(ttl).ok()?;
            TimePoint::from(now).checked_add(ttl)
        });
        let overwrite = self.mode == CacheMode::Refresh;

        let mut written = 0;
        {
            let mut memory = self
                .memory
                .write()
                .expect("value cache lock should not be poisoned");
            for (geog, value) in entries {
                let key = (variable.to_owned(), geog.clone(), time_part_hash.to_owned());
                let entry = MemoryEntry {
                    value: *value,
                    expiration,
                };
                if overwrite {
                    memory.insert(key, entry);
                    written += 1;
                } else if let std::collections::hash_map::Entry::Vacant(slot) = memory.entry(key) {
                    slot.insert(entry);
                    written += 1;
                }
            }
        }

        if let Some(warehouse) = &self.warehouse {
            let rows: Vec<CachedValueRecord> = entries
                .iter()
                .map(|(geog, value)| CachedValueRecord {
                    variable: variable.to_owned(),
                    geog: geog.clone(),
                    time_part_hash: time_part_hash.to_owned(),
                    value: value.value,
                    moe: value.moe,
                    denom: value.denom,
                    expiration: expiration.map(|expiration| expiration.to_string()),
                })
                .collect();
            written = if overwrite {
                warehouse.replace_cached_values(&rows)?
            } else {
                warehouse.insert_cached_values(&rows)?
            };
        }
        Ok(written)
    }

    /// Truncate both tiers. Returns persisted rows removed.
    pub fn clear(&self) -> Result<usize, CoreError> {
        let mut memory = self
            .memory
            .write()
            .expect("value cache lock should not be poisoned");
        let in_memory = memory.len();
        memory.clear();
        drop(memory);

        match &self.warehouse {
            Some(warehouse) => Ok(warehouse.clear_cached_values()?),
            None => Ok(in_memory),
        }
    }

    /// Drop expired entries from both tiers.
    pub fn clear_expired(&self, now: UtcDateTime) -> Result<usize, CoreError> {
        let instant = TimePoint::from(now);
        let mut memory = self
            .memory
            .write()
            .expect("value cache lock should not be poisoned");
        let before = memory.len();
        memory.retain(|_, entry| entry.is_live(instant));
        let pruned = before - memory.len();
        drop(memory);

        match &self.warehouse {
            Some(warehouse) => Ok(warehouse.prune_cached_values(&instant.to_string())?),
            None => Ok(pruned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(value: f64) -> CachedValue {
        CachedValue {
            value: Some(value),
            moe: None,
            denom: None,
        }
    }

    fn now(text: &str) -> UtcDateTime {
        UtcDateTime::parse(text).expect("timestamp")
    }

    fn geogs() -> Vec<String> {
        vec![String::from("tract-1"), String::from("tract-2")]
    }

    #[test]
    fn first_writer_wins_in_use_mode() {
        let cache = ValueCache::in_memory();
        let at = now("2024-01-01T00:00:00Z");
        cache
            .put_many("pop", "h", &[(String::from("tract-1"), value(1.0))], at)
            .expect("put");
        cache
            .put_many("pop", "h", &[(String::from("tract-1"), value(2.0))], at)
            .expect("put");

        let hits = cache.get_many("pop", "h", &geogs(), at).expect("get");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits["tract-1"].value, Some(1.0));
    }

    #[test]
    fn expired_entries_are_invisible_and_cleared() {
        let cache = ValueCache::in_memory().with_ttl(Some(Duration::from_secs(60)));
        cache
            .put_many(
                "pop",
                "h",
                &[(String::from("tract-1"), value(1.0))],
                now("2024-01-01T00:00:00Z"),
            )
            .expect("put");

        let later = now("2024-01-01T00:05:00Z");
        assert!(cache.get_many("pop", "h", &geogs(), later).expect("get").is_empty());
        assert_eq!(cache.clear_expired(later).expect("prune"), 1);
    }

    #[test]
    fn bypass_neither_reads_nor_writes() {
        let cache = ValueCache::in_memory().with_mode(CacheMode::Bypass);
        let at = now("2024-01-01T00:00:00Z");
        let written = cache
            .put_many("pop", "h", &[(String::from("tract-1"), value(1.0))], at)
            .expect("put");
        assert_eq!(written, 0);
        assert!(cache.get_many("pop", "h", &geogs(), at).expect("get").is_empty());
    }

    #[test]
    fn warehouse_tier_survives_a_new_cache_instance() {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse =
            Warehouse::open(profiles_warehouse::WarehouseConfig::in_dir(temp.path()))
                .expect("warehouse open");
        let at = now("2024-01-01T00:00:00Z");

        ValueCache::persistent(warehouse.clone())
            .put_many("pop", "h", &[(String::from("tract-2"), value(7.0))], at)
            .expect("put");

        let fresh = ValueCache::persistent(warehouse);
        let hits = fresh.get_many("pop", "h", &geogs(), at).expect("get");
        assert_eq!(hits["tract-2"].value, Some(7.0));

        let refreshing = ValueCache::persistent(fresh.warehouse.clone().expect("warehouse"))
            .with_mode(CacheMode::Refresh);
        assert!(refreshing.get_many("pop", "h", &geogs(), at).expect("get").is_empty());
        refreshing
            .put_many("pop", "h", &[(String::from("tract-2"), value(8.0))], at)
            .expect("overwrite");
        let hits = fresh.get_many("pop", "h", &geogs(), at).expect("get");
        assert_eq!(hits["tract-2"].value, Some(7.0), "memory tier keeps first value");
        let reopened = ValueCache::persistent(refreshing.warehouse.clone().expect("warehouse"));
        assert_eq!(
            reopened.get_many("pop", "h", &geogs(), at).expect("get")["tract-2"].value,
            Some(8.0)
        );
    }
}
