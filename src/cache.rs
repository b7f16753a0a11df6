//! Keyed store for compilation outcomes.
//!
//! Both outcomes are cached: a known-bad program costs one lookup on the
//! second attempt, same as a known-good one. Entries are compute-once: a
//! racing writer overwrites with an identical value, so double compute is
//! harmless.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha1::{Digest, Sha1};

use crate::compiler::Compilation;

const SEP: &str = "\u{1}";

/// SHA-1 digest of one compilation's inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 20]);

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Digest of `(user source, return type, argument types, auxiliary texts)`.
pub fn cache_key(
    user_source: &str,
    return_type: &str,
    arg_types: &[String],
    aux_texts: &[String],
) -> CacheKey {
    let mut hasher = Sha1::new();
    hasher.update(user_source.as_bytes());
    hasher.update(SEP.as_bytes());
    hasher.update(return_type.as_bytes());
    hasher.update(SEP.as_bytes());
    hasher.update(arg_types.join(SEP).as_bytes());
    hasher.update(SEP.as_bytes());
    hasher.update(aux_texts.join(SEP).as_bytes());
    CacheKey(hasher.finalize().into())
}

/// Pluggable compilation store. Implementations are shared across calls, so
/// they carry their own interior mutability.
pub trait CompileCache: Send + Sync {
    fn has(&self, key: &CacheKey) -> bool;
    fn get(&self, key: &CacheKey) -> Option<Compilation>;
    fn set(&self, key: CacheKey, entry: Compilation);
}

/// Grows without bound. Useful for tests and short-lived processes.
#[derive(Default)]
pub struct UnboundedCache {
    entries: Mutex<HashMap<CacheKey, Compilation>>,
}

impl UnboundedCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CompileCache for UnboundedCache {
    fn has(&self, key: &CacheKey) -> bool {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).contains_key(key)
    }

    fn get(&self, key: &CacheKey) -> Option<Compilation> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: CacheKey, entry: Compilation) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, entry);
    }
}

struct Slot {
    entry: Compilation,
    inserted: Instant,
    last_used: Instant,
}

/// Size- and age-bounded store; the default.
///
/// Eviction scans for the least-recently-used slot, which is fine at the
/// capacities this cache runs at (hundreds, not millions).
pub struct LruTtlCache {
    capacity: usize,
    ttl: Duration,
    slots: Mutex<HashMap<CacheKey, Slot>>,
}

impl LruTtlCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn expired(&self, slot: &Slot) -> bool {
        slot.inserted.elapsed() > self.ttl
    }
}

impl Default for LruTtlCache {
    fn default() -> Self {
        Self::new(256, Duration::from_secs(60 * 60))
    }
}

impl CompileCache for LruTtlCache {
    fn has(&self, key: &CacheKey) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(key).map(|s| !self.expired(s)).unwrap_or(false)
    }

    fn get(&self, key: &CacheKey) -> Option<Compilation> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        match slots.get_mut(key) {
            Some(slot) if slot.inserted.elapsed() <= self.ttl => {
                slot.last_used = Instant::now();
                Some(slot.entry.clone())
            }
            Some(_) => {
                slots.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: CacheKey, entry: Compilation) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.retain(|_, slot| slot.inserted.elapsed() <= self.ttl);
        if slots.len() >= self.capacity && !slots.contains_key(&key) {
            if let Some(oldest) = slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(k, _)| *k)
            {
                slots.remove(&oldest);
            }
        }
        let now = Instant::now();
        slots.insert(
            key,
            Slot {
                entry,
                inserted: now,
                last_used: now,
            },
        );
    }
}

pub fn default_cache() -> Arc<dyn CompileCache> {
    Arc::new(LruTtlCache::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(entry: &str) -> Compilation {
        use crate::diagnostics::{Location, UserCodeError};
        Err(vec![UserCodeError {
            message: entry.to_string(),
            stack: String::new(),
            location: Location { line: 1, column: 1 },
        }])
    }

    fn key(n: u8) -> CacheKey {
        cache_key(&n.to_string(), "number", &[], &[])
    }

    #[test]
    fn key_is_stable_and_input_sensitive() {
        let a = cache_key("src", "number", &["string".into()], &[]);
        let b = cache_key("src", "number", &["string".into()], &[]);
        let c = cache_key("src", "string", &["string".into()], &[]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn key_separates_adjacent_fields() {
        // "ab" + "" must not collide with "a" + "b".
        let a = cache_key("ab", "", &[], &[]);
        let b = cache_key("a", "b", &[], &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn unbounded_round_trips_failures() {
        let cache = UnboundedCache::new();
        let k = key(1);
        assert!(!cache.has(&k));
        cache.set(k, failed("boom"));
        assert!(cache.has(&k));
        assert!(cache.get(&k).unwrap().is_err());
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let cache = LruTtlCache::new(2, Duration::from_secs(600));
        cache.set(key(1), failed("1"));
        cache.set(key(2), failed("2"));
        let _ = cache.get(&key(1));
        cache.set(key(3), failed("3"));
        assert!(cache.has(&key(1)));
        assert!(!cache.has(&key(2)));
        assert!(cache.has(&key(3)));
    }

    #[test]
    fn ttl_expires_entries() {
        let cache = LruTtlCache::new(8, Duration::ZERO);
        cache.set(key(1), failed("1"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key(1)).is_none());
    }
}
