//! TTL result cache with a per-key compute-once guard.
//!
//! The cache is an explicit instance owned by the caller. Expired entries are
//! purged lazily on lookup. Each key has its own slot mutex, so concurrent
//! callers for the same key wait for a single computation while other keys
//! proceed. A slot holds either nothing or a complete `Arc<V>`; a reader never
//! sees a partially built value.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sha2::{Digest, Sha256};

use crate::error::EngineResult;
use crate::logging::log_cache;
use crate::state::State;

pub const DEFAULT_TTL_MS: u64 = 30 * 60 * 1000;

/// Millisecond clock, injectable for TTL tests.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Shape check run on every hit; a failing entry is dropped and recomputed.
pub trait WellFormed {
    fn is_well_formed(&self) -> bool;
}

struct Entry<V> {
    value: Arc<V>,
    inserted_ms: u64,
}

type Slot<V> = Arc<Mutex<Option<Entry<V>>>>;

enum Lookup<V> {
    Hit(Arc<V>, u64),
    Expired(u64),
    Corrupt(u64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub corrupt: u64,
    pub computations: u64,
}

pub struct ResultCache<V> {
    ttl_ms: u64,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<String, Slot<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    corrupt: AtomicU64,
    computations: AtomicU64,
}

impl<V: WellFormed> ResultCache<V> {
    pub fn new(ttl_ms: u64) -> Self {
        Self::with_clock(ttl_ms, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl_ms,
            clock,
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            corrupt: AtomicU64::new(0),
            computations: AtomicU64::new(0),
        }
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    /// Return the live value for `key`, or run `compute` once and store it.
    /// Errors from `compute` are returned and not cached.
    pub fn get_or_compute<F>(&self, key: &str, compute: F) -> EngineResult<Arc<V>>
    where
        F: FnOnce() -> EngineResult<V>,
    {
        loop {
            let slot = {
                let mut slots = self.lock_slots();
                self.purge_expired(&mut slots, self.clock.now_ms());
                slots
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(None)))
                    .clone()
            };
            let guard = self.lock_slot(&slot, key);

            // A purge may have dropped the slot while we waited on it; a value
            // stored there would be invisible to later callers.
            let current = self
                .lock_slots()
                .get(key)
                .is_some_and(|s| Arc::ptr_eq(s, &slot));
            if !current {
                drop(guard);
                log_cache("slot_retry", key, None);
                continue;
            }
            return self.fill(key, guard, compute);
        }
    }

    fn lock_slot<'a>(&self, slot: &'a Slot<V>, key: &str) -> MutexGuard<'a, Option<Entry<V>>> {
        match slot.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                // A computation panicked mid-way; whatever is there is suspect.
                self.corrupt.fetch_add(1, Ordering::Relaxed);
                log_cache("corrupt_entry", key, None);
                let mut g = poisoned.into_inner();
                *g = None;
                g
            }
        }
    }

    fn fill<F>(&self, key: &str, mut guard: MutexGuard<'_, Option<Entry<V>>>, compute: F) -> EngineResult<Arc<V>>
    where
        F: FnOnce() -> EngineResult<V>,
    {
        // Re-read the clock: another caller may have held the slot for a while.
        let now = self.clock.now_ms();
        let found = guard.as_ref().map(|entry| {
            let age = now.saturating_sub(entry.inserted_ms);
            if age >= self.ttl_ms {
                Lookup::Expired(age)
            } else if !entry.value.is_well_formed() {
                Lookup::Corrupt(age)
            } else {
                Lookup::Hit(entry.value.clone(), age)
            }
        });
        match found {
            Some(Lookup::Hit(value, age)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                log_cache("hit", key, Some(age));
                return Ok(value);
            }
            Some(Lookup::Expired(age)) => {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                log_cache("evict", key, Some(age));
                *guard = None;
            }
            Some(Lookup::Corrupt(age)) => {
                self.corrupt.fetch_add(1, Ordering::Relaxed);
                log_cache("corrupt_entry", key, Some(age));
                *guard = None;
            }
            None => {}
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        log_cache("miss", key, None);
        self.computations.fetch_add(1, Ordering::SeqCst);
        let value = Arc::new(compute()?);
        *guard = Some(Entry {
            value: value.clone(),
            inserted_ms: self.clock.now_ms(),
        });
        Ok(value)
    }

    /// Drop every entry whose age has reached the TTL, and every empty slot
    /// left behind by a failed computation. Slots held by an in-flight
    /// computation are left alone.
    fn purge_expired(&self, slots: &mut HashMap<String, Slot<V>>, now: u64) {
        let ttl = self.ttl_ms;
        let mut expired = Vec::new();
        let mut empty = Vec::new();
        for (key, slot) in slots.iter() {
            if let Ok(guard) = slot.try_lock() {
                match guard.as_ref() {
                    Some(entry) => {
                        let age = now.saturating_sub(entry.inserted_ms);
                        if age >= ttl {
                            expired.push((key.clone(), age));
                        }
                    }
                    None => empty.push(key.clone()),
                }
            }
        }
        for key in empty {
            slots.remove(&key);
        }
        for (key, age) in expired {
            slots.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            log_cache("evict", &key, Some(age));
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<String, Slot<V>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock_slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock_slots().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            corrupt: self.corrupt.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::SeqCst),
        }
    }
}

/// SHA-256 over the canonical start state and the context, hex encoded.
pub fn cache_key(start: &State, context: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(start.hexagram.code.to_lines().as_bytes());
    hasher.update([b':', start.line.get(), b'\n']);
    hasher.update(context.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::hexagram::{HexagramTable, LinePosition};
    use std::sync::atomic::AtomicBool;
    use std::thread;

    #[derive(Debug)]
    struct Value {
        n: u32,
        ok: Arc<AtomicBool>,
    }

    impl WellFormed for Value {
        fn is_well_formed(&self) -> bool {
            self.ok.load(Ordering::SeqCst)
        }
    }

    fn value(n: u32) -> Value {
        Value {
            n,
            ok: Arc::new(AtomicBool::new(true)),
        }
    }

    fn cache(ttl: u64) -> (ResultCache<Value>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        (ResultCache::with_clock(ttl, clock.clone()), clock)
    }

    #[test]
    fn test_hit_within_ttl() {
        let (c, clock) = cache(100);
        let a = c.get_or_compute("k", || Ok(value(1))).unwrap();
        clock.advance(99);
        let b = c.get_or_compute("k", || Ok(value(2))).unwrap();
        assert_eq!(b.n, 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(c.stats().computations, 1);
        assert_eq!(c.stats().hits, 1);
    }

    #[test]
    fn test_expired_entry_recomputed() {
        let (c, clock) = cache(100);
        c.get_or_compute("k", || Ok(value(1))).unwrap();
        clock.advance(100);
        let b = c.get_or_compute("k", || Ok(value(2))).unwrap();
        assert_eq!(b.n, 2);
        assert_eq!(c.stats().computations, 2);
        assert!(c.stats().evictions >= 1);
    }

    #[test]
    fn test_lazy_purge_of_other_keys() {
        let (c, clock) = cache(100);
        c.get_or_compute("a", || Ok(value(1))).unwrap();
        c.get_or_compute("b", || Ok(value(2))).unwrap();
        assert_eq!(c.len(), 2);
        clock.advance(150);
        // nothing happens until the next lookup
        assert_eq!(c.len(), 2);
        c.get_or_compute("c", || Ok(value(3))).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c.stats().evictions, 2);
    }

    #[test]
    fn test_errors_not_cached() {
        let (c, _clock) = cache(100);
        let err = c
            .get_or_compute("k", || Err(EngineError::integrity("boom")))
            .unwrap_err();
        assert!(matches!(err, EngineError::DataIntegrity { .. }));
        let ok = c.get_or_compute("k", || Ok(value(7))).unwrap();
        assert_eq!(ok.n, 7);
    }

    #[test]
    fn test_failed_compute_leaves_no_slot_behind() {
        let (c, _clock) = cache(100);
        for _ in 0..3 {
            let _ = c.get_or_compute("bad", || Err(EngineError::integrity("boom")));
        }
        assert_eq!(c.len(), 1);
        c.get_or_compute("good", || Ok(value(1))).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c.stats().evictions, 0);
    }

    #[test]
    fn test_waiter_on_dropped_slot_uses_live_one() {
        let (c, clock) = cache(100);
        c.get_or_compute("k", || Ok(value(1))).unwrap();
        clock.advance(100);
        let c = Arc::new(c);

        // Keep the expired slot busy so the next caller queues on it.
        let stale = c.lock_slots().get("k").unwrap().clone();
        let held = stale.lock().unwrap();
        let waiter = {
            let c = c.clone();
            thread::spawn(move || c.get_or_compute("k", || Ok(value(2))).unwrap().n)
        };
        thread::sleep(std::time::Duration::from_millis(50));

        // The slot leaves the map and a fresh value lands under a new one.
        c.lock_slots().remove("k");
        let fresh = c.get_or_compute("k", || Ok(value(3))).unwrap();
        drop(held);

        assert_eq!(waiter.join().unwrap(), 3);
        assert_eq!(fresh.n, 3);
        assert_eq!(c.stats().computations, 2);
    }

    #[test]
    fn test_ill_formed_entry_is_miss() {
        let (c, _clock) = cache(100);
        let first = c.get_or_compute("k", || Ok(value(1))).unwrap();
        first.ok.store(false, Ordering::SeqCst);
        let second = c.get_or_compute("k", || Ok(value(2))).unwrap();
        assert_eq!(second.n, 2);
        assert_eq!(c.stats().corrupt, 1);
    }

    #[test]
    fn test_poisoned_slot_is_miss() {
        let (c, _clock) = cache(100);
        let c = Arc::new(c);
        let c2 = c.clone();
        let joined = thread::spawn(move || {
            let _ = c2.get_or_compute("k", || -> EngineResult<Value> { panic!("compute failed") });
        })
        .join();
        assert!(joined.is_err());
        let v = c.get_or_compute("k", || Ok(value(5))).unwrap();
        assert_eq!(v.n, 5);
        assert_eq!(c.stats().corrupt, 1);
    }

    #[test]
    fn test_concurrent_callers_compute_once() {
        let (c, _clock) = cache(10_000);
        let c = Arc::new(c);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = c.clone();
                thread::spawn(move || {
                    c.get_or_compute("shared", || {
                        thread::sleep(std::time::Duration::from_millis(20));
                        Ok(value(9))
                    })
                    .unwrap()
                    .n
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 9);
        }
        assert_eq!(c.stats().computations, 1);
    }

    #[test]
    fn test_cache_key_stable_and_distinct() {
        let hexes = HexagramTable::king_wen();
        let tai = hexes.by_name("地天泰").unwrap().clone();
        let a = State::new(tai.clone(), LinePosition::new(5).unwrap());
        let b = State::new(tai, LinePosition::new(4).unwrap());
        assert_eq!(cache_key(&a, "ctx"), cache_key(&a, "ctx"));
        assert_ne!(cache_key(&a, "ctx"), cache_key(&b, "ctx"));
        assert_ne!(cache_key(&a, "ctx"), cache_key(&a, "other"));
        assert_eq!(cache_key(&a, "").len(), 64);
    }
}
