use crate::domain::market::{DataSource, OhlcvSeries, Timeframe};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bars: usize,
    pub source: DataSource,
}

impl CacheKey {
    pub fn new(symbol: &str, timeframe: Timeframe, bars: usize, source: DataSource) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            bars,
            source,
        }
    }
}

struct Entry {
    series: Arc<OhlcvSeries>,
    stored_at: Instant,
    generation: u64,
}

/// In-memory series cache with a time-to-live and a generation counter.
///
/// Every invalidation bumps the generation. Entries stamped with an older
/// generation are never served, and a fetch that started before an
/// invalidation cannot store its now stale result.
pub struct DataCache {
    entries: RwLock<HashMap<CacheKey, Entry>>,
    generation: AtomicU64,
    ttl: Duration,
}

impl std::fmt::Debug for DataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataCache")
            .field("ttl", &self.ttl)
            .field("generation", &self.generation())
            .finish()
    }
}

impl DataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            ttl,
        }
    }

    /// Current generation; pass it back to [`DataCache::insert`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<OhlcvSeries>> {
        let current = self.generation();
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("DataCache: Lock poisoned during read, recovering");
                poisoned.into_inner()
            }
        };

        let entry = entries.get(key)?;
        if entry.generation != current || entry.stored_at.elapsed() >= self.ttl {
            debug!("DataCache: Stale entry for {} {}", key.symbol, key.timeframe);
            return None;
        }
        Some(Arc::clone(&entry.series))
    }

    /// Stores a non-empty series fetched under `generation`. Returns the
    /// shared handle, which is the cached one when the store succeeded.
    pub fn insert(&self, key: CacheKey, series: OhlcvSeries, generation: u64) -> Arc<OhlcvSeries> {
        let series = Arc::new(series);
        if series.is_empty() || generation != self.generation() {
            return series;
        }

        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("DataCache: Lock poisoned during write, recovering");
                poisoned.into_inner()
            }
        };
        // Re-checked under the lock so a concurrent invalidation wins
        if generation != self.generation() {
            return series;
        }
        entries.retain(|_, e| e.generation == generation && e.stored_at.elapsed() < self.ttl);
        entries.insert(
            key,
            Entry {
                series: Arc::clone(&series),
                stored_at: Instant::now(),
                generation,
            },
        );
        series
    }

    /// Drops every entry for `(symbol, timeframe)` regardless of bar count
    /// or source. Returns how many entries were removed.
    pub fn invalidate(&self, symbol: &str, timeframe: Timeframe) -> usize {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.generation.fetch_add(1, Ordering::SeqCst);

        let before = entries.len();
        entries.retain(|k, _| !(k.symbol == symbol && k.timeframe == timeframe));
        // Survivors move to the new generation; only the invalidated pair is stale
        let current = self.generation();
        for entry in entries.values_mut() {
            entry.generation = current;
        }
        before - entries.len()
    }

    pub fn invalidate_all(&self) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.generation.fetch_add(1, Ordering::SeqCst);
        entries.clear();
    }

    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
