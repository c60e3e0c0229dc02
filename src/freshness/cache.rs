// Purpose: Process-scoped TTL cache of latest versions with single-flight fetches.
// Inputs/Outputs: Normalized name + fetch closure in, cached or freshly fetched Version out.
// Invariants: At most one fetch per key is in flight; waiters reuse the leader's result.
// Gotchas: Failures are handed to waiters but never stored, so the next request retries.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::error::RegistryError;
use crate::version::Version;

pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Version,
    pub fetched_at: Instant,
}

type FetchResult = Result<Version, RegistryError>;

#[derive(Default)]
struct Flight {
    result: Mutex<Option<FetchResult>>,
    done: Condvar,
}

impl Flight {
    fn publish(&self, result: FetchResult) {
        *self.result.lock() = Some(result);
        self.done.notify_all();
    }

    fn wait(&self) -> FetchResult {
        let mut guard = self.result.lock();
        loop {
            if let Some(r) = guard.as_ref() {
                return r.clone();
            }
            self.done.wait(&mut guard);
        }
    }
}

enum Slot {
    Ready(CacheEntry),
    Pending(Arc<Flight>),
}

enum Role {
    Leader(Arc<Flight>),
    Waiter(Arc<Flight>),
}

pub struct VersionCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<String, Slot>>,
}

// Publishes a failure to waiters if the leader unwinds before finishing.
struct LeaderGuard<'a> {
    cache: &'a VersionCache,
    key: &'a str,
    flight: Arc<Flight>,
    finished: bool,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.cache.slots.lock().remove(self.key);
        self.flight.publish(Err(RegistryError::Transport {
            name: self.key.to_string(),
            message: "lookup aborted".to_string(),
        }));
    }
}

impl VersionCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        self.clock.now().saturating_duration_since(entry.fetched_at) < self.ttl
    }

    /// Cached value for `key` if it has not expired.
    pub fn get(&self, key: &str) -> Option<Version> {
        match self.slots.lock().get(key) {
            Some(Slot::Ready(entry)) if self.is_fresh(entry) => Some(entry.value.clone()),
            _ => None,
        }
    }

    pub fn insert(&self, key: &str, value: Version) {
        let entry = CacheEntry {
            value,
            fetched_at: self.clock.now(),
        };
        self.slots.lock().insert(key.to_string(), Slot::Ready(entry));
    }

    /// Returns the cached value, or runs `fetch` once for all concurrent callers of `key`.
    pub fn get_or_fetch<F>(&self, key: &str, fetch: F) -> FetchResult
    where
        F: FnOnce() -> FetchResult,
    {
        let role = {
            let mut slots = self.slots.lock();
            match slots.get(key) {
                Some(Slot::Ready(entry)) if self.is_fresh(entry) => {
                    trace!(key, "version cache hit");
                    return Ok(entry.value.clone());
                }
                Some(Slot::Pending(flight)) => Role::Waiter(flight.clone()),
                _ => {
                    let flight = Arc::new(Flight::default());
                    slots.insert(key.to_string(), Slot::Pending(flight.clone()));
                    Role::Leader(flight)
                }
            }
        };

        let flight = match role {
            Role::Waiter(flight) => {
                debug!(key, "joining in-flight lookup");
                return flight.wait();
            }
            Role::Leader(flight) => flight,
        };

        let mut guard = LeaderGuard {
            cache: self,
            key,
            flight,
            finished: false,
        };
        let result = fetch();
        {
            let mut slots = self.slots.lock();
            match &result {
                Ok(value) => {
                    slots.insert(
                        key.to_string(),
                        Slot::Ready(CacheEntry {
                            value: value.clone(),
                            fetched_at: self.clock.now(),
                        }),
                    );
                }
                Err(_) => {
                    slots.remove(key);
                }
            }
        }
        guard.finished = true;
        guard.flight.publish(result.clone());
        result
    }

    /// Number of settled entries, expired ones included.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|s| matches!(s, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.slots.lock().retain(|_, s| matches!(s, Slot::Pending(_)));
    }
}

#[cfg(test)]
mod tests {
    use super::{ManualClock, VersionCache};
    use crate::error::RegistryError;
    use crate::version::Version;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn v(s: &str) -> Version {
        Version::parse(s).expect("version")
    }

    #[test]
    fn second_lookup_within_ttl_is_a_hit() {
        let cache = VersionCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let got = cache
                .get_or_fetch("requests", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(v("2.32.0"))
                })
                .expect("fetch");
            assert_eq!(got, v("2.32.0"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expired_entry_is_refetched() {
        let clock = Arc::new(ManualClock::new());
        let cache = VersionCache::with_clock(Duration::from_secs(10), clock.clone());
        let calls = AtomicUsize::new(0);
        let fetch = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(v("1.0"))
        };
        cache.get_or_fetch("rich", fetch).expect("first");
        clock.advance(Duration::from_secs(9));
        cache.get_or_fetch("rich", fetch).expect("still fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        clock.advance(Duration::from_secs(1));
        assert!(cache.get("rich").is_none());
        cache.get_or_fetch("rich", fetch).expect("expired");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failures_are_not_cached() {
        let cache = VersionCache::new(Duration::from_secs(60));
        let err = cache.get_or_fetch("x", || Err(RegistryError::NotFound("x".to_string())));
        assert!(err.is_err());
        assert!(cache.is_empty());
        let ok = cache.get_or_fetch("x", || Ok(v("1.0")));
        assert!(ok.is_ok());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_requests_share_one_fetch() {
        let cache = Arc::new(VersionCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                thread::spawn(move || {
                    cache.get_or_fetch("numpy", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        Ok(v("2.0.0"))
                    })
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().expect("join").expect("fetch"), v("2.0.0"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_drops_settled_entries() {
        let cache = VersionCache::new(Duration::from_secs(60));
        cache.insert("a", v("1"));
        assert_eq!(cache.get("a"), Some(v("1")));
        cache.clear();
        assert!(cache.get("a").is_none());
    }
}
