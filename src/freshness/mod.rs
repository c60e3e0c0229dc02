// Purpose: Classify each dependency as current, outdated, unpinned or unknown against a registry.
// Inputs/Outputs: Targets (name + current version source) in, one VersionRecord per target out.
// Invariants: Never more than `concurrency` lookups in flight per checker, across calls; one failing name never aborts the rest.
// Gotchas: On deadline expiry workers are abandoned, not joined; their names come back `unknown`.

pub mod cache;
pub mod registry;

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::manifest::normalize_name;
use crate::version::Version;
pub use cache::{CacheEntry, Clock, ManualClock, SystemClock, VersionCache};
pub use registry::{PypiRegistry, Registry};

pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_RETRIES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Current,
    Outdated,
    Unpinned,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionRecord {
    pub name: String,
    pub current: Option<Version>,
    pub latest: Option<Version>,
    pub state: State,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Where a target's "current" version comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrentVersion {
    /// Exact pin in the manifest, or the installed version.
    Known(Version),
    Unpinned,
    NotInstalled,
}

#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub current: CurrentVersion,
}

impl Target {
    pub fn new(name: impl Into<String>, current: CurrentVersion) -> Self {
        Self {
            name: name.into(),
            current,
        }
    }

    fn key(&self) -> String {
        normalize_name(&self.name)
    }

    fn needs_lookup(&self, lookup_unpinned: bool) -> bool {
        match self.current {
            CurrentVersion::Known(_) => true,
            CurrentVersion::Unpinned => lookup_unpinned,
            CurrentVersion::NotInstalled => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckSettings {
    pub concurrency: usize,
    pub retries: u32,
    pub retry_backoff: Duration,
    /// Caller-level deadline for the whole check.
    pub deadline: Option<Duration>,
    /// Also resolve `latest` for unpinned names, for reporting only.
    pub lookup_unpinned: bool,
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retries: DEFAULT_RETRIES,
            retry_backoff: Duration::from_millis(200),
            deadline: None,
            lookup_unpinned: false,
        }
    }
}

/// Classifies one target given the lookup outcome (if a lookup was made).
pub fn classify(target: &Target, lookup: Option<&Result<Version, RegistryError>>) -> VersionRecord {
    let latest = lookup.and_then(|r| r.as_ref().ok().cloned());
    let (current, state, detail) = match &target.current {
        CurrentVersion::Unpinned => (None, State::Unpinned, None),
        CurrentVersion::NotInstalled => (None, State::Unknown, Some("not installed".to_string())),
        CurrentVersion::Known(cur) => match (lookup, &latest) {
            (_, Some(l)) if l <= cur => (Some(cur.clone()), State::Current, None),
            (_, Some(_)) => (Some(cur.clone()), State::Outdated, None),
            (Some(Err(e)), None) => (Some(cur.clone()), State::Unknown, Some(e.to_string())),
            _ => (
                Some(cur.clone()),
                State::Unknown,
                Some("no registry lookup was made".to_string()),
            ),
        },
    };
    VersionRecord {
        name: target.name.clone(),
        current,
        latest,
        state,
        detail,
    }
}

/// Counting permits owned by one checker. Abandoned workers keep theirs until their call returns.
struct Permits {
    available: Mutex<usize>,
    freed: Condvar,
}

struct Permit {
    pool: Arc<Permits>,
}

impl Permits {
    fn new(n: usize) -> Self {
        Self {
            available: Mutex::new(n.max(1)),
            freed: Condvar::new(),
        }
    }

    fn acquire(pool: &Arc<Permits>) -> Permit {
        let mut n = pool.available.lock();
        while *n == 0 {
            pool.freed.wait(&mut n);
        }
        *n -= 1;
        Permit { pool: pool.clone() }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        *self.pool.available.lock() += 1;
        self.pool.freed.notify_one();
    }
}

#[derive(Clone)]
struct Lookup {
    registry: Arc<dyn Registry>,
    cache: Arc<VersionCache>,
    permits: Arc<Permits>,
    retries: u32,
    backoff: Duration,
}

impl Lookup {
    fn resolve(&self, key: &str, cancel: &AtomicBool) -> Result<Version, RegistryError> {
        self.cache.get_or_fetch(key, || {
            let mut attempt = 0;
            loop {
                let result = {
                    let _permit = Permits::acquire(&self.permits);
                    self.registry.latest_version(key)
                };
                match result {
                    Ok(v) => return Ok(v),
                    Err(e) if e.is_transient() && attempt < self.retries && !cancel.load(Ordering::SeqCst) => {
                        attempt += 1;
                        debug!(key, attempt, error = %e, "retrying registry lookup");
                        thread::sleep(self.backoff * attempt);
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}

pub struct FreshnessChecker {
    registry: Arc<dyn Registry>,
    cache: Arc<VersionCache>,
    permits: Arc<Permits>,
    settings: CheckSettings,
}

impl FreshnessChecker {
    pub fn new(registry: Arc<dyn Registry>, cache: Arc<VersionCache>, settings: CheckSettings) -> Self {
        Self {
            registry,
            cache,
            permits: Arc::new(Permits::new(settings.concurrency)),
            settings,
        }
    }

    pub fn cache(&self) -> &Arc<VersionCache> {
        &self.cache
    }

    pub fn settings(&self) -> &CheckSettings {
        &self.settings
    }

    /// One record per target, in target order.
    pub fn check(&self, targets: &[Target]) -> Vec<VersionRecord> {
        let mut keys: Vec<String> = Vec::new();
        for t in targets {
            let key = t.key();
            if t.needs_lookup(self.settings.lookup_unpinned) && !keys.contains(&key) {
                keys.push(key);
            }
        }
        let results = self.resolve_all(keys);
        targets
            .iter()
            .map(|t| {
                let lookup = if t.needs_lookup(self.settings.lookup_unpinned) {
                    results.get(&t.key())
                } else {
                    None
                };
                classify(t, lookup)
            })
            .collect()
    }

    fn resolve_all(&self, keys: Vec<String>) -> HashMap<String, Result<Version, RegistryError>> {
        let mut results = HashMap::with_capacity(keys.len());
        if keys.is_empty() {
            return results;
        }
        let workers = self.settings.concurrency.clamp(1, keys.len());
        let started = Instant::now();
        let expected = keys.len();
        let queue = Arc::new(Mutex::new(keys.iter().cloned().collect::<VecDeque<_>>()));
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<(String, Result<Version, RegistryError>)>();
        let lookup = Lookup {
            registry: self.registry.clone(),
            cache: self.cache.clone(),
            permits: self.permits.clone(),
            retries: self.settings.retries,
            backoff: self.settings.retry_backoff,
        };

        debug!(names = expected, workers, "starting registry lookups");
        for _ in 0..workers {
            let queue = queue.clone();
            let cancel = cancel.clone();
            let tx = tx.clone();
            let lookup = lookup.clone();
            thread::spawn(move || {
                loop {
                    if cancel.load(Ordering::SeqCst) {
                        break;
                    }
                    let Some(key) = queue.lock().pop_front() else {
                        break;
                    };
                    let result = lookup.resolve(&key, &cancel);
                    if tx.send((key, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        while results.len() < expected {
            let received = match self.settings.deadline {
                Some(limit) => {
                    let remaining = limit.saturating_sub(started.elapsed());
                    rx.recv_timeout(remaining).map_err(|e| matches!(e, mpsc::RecvTimeoutError::Timeout))
                }
                None => rx.recv().map_err(|_| false),
            };
            match received {
                Ok((key, result)) => {
                    if let Err(e) = &result {
                        info!(name = %key, error = %e, "registry lookup failed");
                    }
                    results.insert(key, result);
                }
                Err(timed_out) => {
                    if timed_out {
                        warn!(
                            pending = expected - results.len(),
                            "freshness deadline reached; abandoning in-flight lookups"
                        );
                    }
                    break;
                }
            }
        }
        cancel.store(true, Ordering::SeqCst);
        for key in keys {
            results
                .entry(key.clone())
                .or_insert(Err(RegistryError::TimedOut(key)));
        }
        results
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Registry;
    use crate::error::RegistryError;
    use crate::version::Version;
    use parking_lot::{Condvar, Mutex};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    /// Map-backed registry that records call counts and peak concurrency.
    #[derive(Default)]
    pub struct FakeRegistry {
        pub latest: HashMap<String, Result<Version, RegistryError>>,
        pub delay: Duration,
        pub calls: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub peak: AtomicUsize,
        pub per_name: Mutex<HashMap<String, usize>>,
        pub transient_failures: Mutex<HashMap<String, usize>>,
    }

    impl FakeRegistry {
        pub fn with(entries: &[(&str, &str)]) -> Self {
            let latest = entries
                .iter()
                .map(|(n, v)| (n.to_string(), Ok(Version::parse(v).expect("version"))))
                .collect();
            Self {
                latest,
                ..Self::default()
            }
        }

        pub fn calls_for(&self, name: &str) -> usize {
            self.per_name.lock().get(name).copied().unwrap_or(0)
        }
    }

    impl Registry for FakeRegistry {
        fn latest_version(&self, name: &str) -> Result<Version, RegistryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.per_name.lock().entry(name.to_string()).or_default() += 1;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if let Some(left) = self.transient_failures.lock().get_mut(name)
                && *left > 0
            {
                *left -= 1;
                return Err(RegistryError::Transport {
                    name: name.to_string(),
                    message: "connection reset".to_string(),
                });
            }
            self.latest
                .get(name)
                .cloned()
                .unwrap_or_else(|| Err(RegistryError::NotFound(name.to_string())))
        }
    }
}
