//! Bounded in-memory session cache.
//!
//! Point lookups go through a sharded concurrent map and never block on a
//! purge. Purges and explicit removals share one exclusive section, so at
//! most one of them mutates the map in bulk at a time.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{
    DEFAULT_INACTIVITY_TIMEOUT_SECONDS, DEFAULT_MIN_SECONDS_BETWEEN_PURGES,
    DEFAULT_SESSION_TIMEOUT_MINUTES, SessionConfig,
};
use crate::purge::{PurgeReport, select_least_recent};
use crate::record::SessionRecord;

const PURGE_THREAD_NAME: &str = "crumb-session-purge";

/// Where purge passes run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeMode {
    /// Request threads purge opportunistically, throttled by the interval.
    Inline,
    /// A single background thread purges every interval.
    Background,
}

/// Runtime-adjustable cache settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    /// Maximum number of cached records. Zero or negative disables caching.
    pub capacity: i64,

    /// Absolute session lifetime used by expiry sweeps.
    pub session_timeout_minutes: i64,

    /// Inactivity timeout given to records the cache creates itself.
    pub inactivity_timeout_seconds: i64,

    /// Where purges run.
    pub purge_mode: PurgeMode,

    /// Minimum gap between purges.
    pub purge_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: -1,
            session_timeout_minutes: DEFAULT_SESSION_TIMEOUT_MINUTES,
            inactivity_timeout_seconds: DEFAULT_INACTIVITY_TIMEOUT_SECONDS,
            purge_mode: PurgeMode::Inline,
            purge_interval: Duration::from_secs(DEFAULT_MIN_SECONDS_BETWEEN_PURGES),
        }
    }
}

impl CacheSettings {
    /// Settings with the given capacity and defaults for everything else.
    pub fn new(capacity: i64) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Derive cache settings from the store configuration.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            capacity: config.max_in_memory_sessions,
            session_timeout_minutes: config.session_timeout_minutes,
            inactivity_timeout_seconds: config.inactivity_timeout_seconds,
            purge_mode: if config.purge_with_background_thread {
                PurgeMode::Background
            } else {
                PurgeMode::Inline
            },
            purge_interval: config.purge_interval(),
        }
    }

    pub fn with_session_timeout_minutes(mut self, minutes: i64) -> Self {
        self.session_timeout_minutes = minutes;
        self
    }

    pub fn with_inactivity_timeout_seconds(mut self, seconds: i64) -> Self {
        self.inactivity_timeout_seconds = seconds;
        self
    }

    pub fn with_purge_mode(mut self, mode: PurgeMode) -> Self {
        self.purge_mode = mode;
        self
    }

    pub fn with_purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval = interval;
        self
    }

    /// Whether the cache holds anything at all.
    pub fn caching_enabled(&self) -> bool {
        self.capacity > 0
    }

    fn background_active(&self) -> bool {
        self.caching_enabled() && self.purge_mode == PurgeMode::Background
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: i64,
    pub purge_passes: u64,
    pub background_running: bool,
}

struct BackgroundPurge {
    wake: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

struct CacheShared {
    entries: DashMap<String, Arc<SessionRecord>>,
    settings: RwLock<CacheSettings>,
    clock: Arc<dyn Clock>,

    /// Exclusive section for purge passes and explicit removals.
    removal_lock: Mutex<()>,

    /// Set while an inline purge is in flight.
    purging: AtomicBool,
    last_purge_at: Mutex<Option<DateTime<Utc>>>,
    purge_passes: AtomicU64,

    background_started: AtomicBool,
    background: Mutex<Option<BackgroundPurge>>,
}

impl CacheShared {
    fn purge(&self) -> PurgeReport {
        let _exclusive = self.removal_lock.lock();
        self.purge_passes.fetch_add(1, Ordering::Relaxed);

        let settings = self.settings.read().clone();

        if !settings.caching_enabled() {
            let dropped = self.entries.len();
            if dropped > 0 {
                self.entries.clear();
                debug!(dropped, "Caching disabled, cleared session cache");
            }
            return PurgeReport {
                expired: 0,
                evicted: dropped,
                remaining: 0,
            };
        }

        let now = self.clock.now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .has_expired(now, settings.session_timeout_minutes)
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut report = PurgeReport::default();
        for id in &expired {
            if self.entries.remove(id).is_some() {
                report.expired += 1;
            }
        }

        let capacity = settings.capacity as usize;
        let size = self.entries.len();
        if size > capacity {
            let overflow = size - capacity;
            let candidates = self
                .entries
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().last_accessed_at()));
            let victims = select_least_recent(candidates, overflow);

            for id in &victims {
                if self.entries.remove(id).is_some() {
                    report.evicted += 1;
                }
            }
        }

        report.remaining = self.entries.len();
        if report.removed() > 0 {
            debug!(
                expired = report.expired,
                evicted = report.evicted,
                remaining = report.remaining,
                "Purged session cache"
            );
        } else {
            trace!(remaining = report.remaining, "Purge pass found nothing to remove");
        }
        report
    }

    fn purge_due(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        match *self.last_purge_at.lock() {
            None => true,
            Some(last) => {
                let interval = TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX);
                now - last >= interval
            }
        }
    }
}

/// Releases the inline purge flag and records when the pass finished.
struct InlinePurgeGuard<'a> {
    shared: &'a CacheShared,
}

impl Drop for InlinePurgeGuard<'_> {
    fn drop(&mut self) {
        *self.shared.last_purge_at.lock() = Some(self.shared.clock.now());
        self.shared.purging.store(false, Ordering::Release);
    }
}

/// Concurrent map from session id to shared session record.
///
/// Cloning is cheap and every clone refers to the same cache.
#[derive(Clone)]
pub struct SessionCache {
    shared: Arc<CacheShared>,
}

impl SessionCache {
    /// Create a cache on the wall clock.
    pub fn new(settings: CacheSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    /// Create a cache with an explicit time source.
    pub fn with_clock(settings: CacheSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(CacheShared {
                entries: DashMap::new(),
                settings: RwLock::new(settings),
                clock,
                removal_lock: Mutex::new(()),
                purging: AtomicBool::new(false),
                last_purge_at: Mutex::new(None),
                purge_passes: AtomicU64::new(0),
                background_started: AtomicBool::new(false),
                background: Mutex::new(None),
            }),
        }
    }

    /// Current settings.
    pub fn settings(&self) -> CacheSettings {
        self.shared.settings.read().clone()
    }

    /// Change settings at runtime.
    ///
    /// A running background purge is woken so it notices the change. Shrinking
    /// the capacity or disabling caching takes effect on the next purge.
    pub fn update_settings(&self, update: impl FnOnce(&mut CacheSettings)) {
        {
            let mut settings = self.shared.settings.write();
            update(&mut settings);
            debug!(
                capacity = settings.capacity,
                mode = ?settings.purge_mode,
                "Session cache settings updated"
            );
        }
        if let Some(background) = self.shared.background.lock().as_ref() {
            let _ = background.wake.send(());
        }
    }

    pub fn caching_enabled(&self) -> bool {
        self.shared.settings.read().caching_enabled()
    }

    /// The cache's time source.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.shared.clock
    }

    pub fn len(&self) -> usize {
        self.shared.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.shared.entries.contains_key(id)
    }

    /// Look up a cached record without loading anything.
    pub fn get(&self, id: &str) -> Option<Arc<SessionRecord>> {
        self.shared.entries.get(id).map(|entry| entry.value().clone())
    }

    /// Find a record by id, loading it with `supplier` on a miss.
    ///
    /// When caching is disabled the supplier runs every time and nothing is
    /// stored, so two calls never share an instance. When enabled, a record
    /// inserted concurrently under the same id wins over the one just loaded.
    /// If the supplier yields nothing and `create_if_missing` is set, a fresh
    /// record is created and stored under its own id.
    pub fn resolve<F>(
        &self,
        id: &str,
        supplier: F,
        create_if_missing: bool,
    ) -> Option<Arc<SessionRecord>>
    where
        F: FnOnce() -> Option<SessionRecord>,
    {
        let settings = self.settings();

        if !settings.caching_enabled() {
            return match supplier() {
                Some(record) => Some(Arc::new(record)),
                None if create_if_missing => Some(Arc::new(self.fresh_record(&settings))),
                None => None,
            };
        }

        if let Some(entry) = self.shared.entries.get(id) {
            trace!(session_id = %id, "Session found in cache");
            return Some(entry.value().clone());
        }

        let (key, record) = match supplier() {
            Some(record) => (id.to_string(), Arc::new(record)),
            None if create_if_missing => {
                let record = self.fresh_record(&settings);
                (record.id().to_string(), Arc::new(record))
            }
            None => return None,
        };

        trace!(session_id = %key, "Caching session");
        Some(self.shared.entries.entry(key).or_insert(record).value().clone())
    }

    /// Store a record unless one with the same id is already cached.
    /// Returns whichever record ends up cached. No-op when caching is off.
    pub fn insert_if_absent(&self, record: Arc<SessionRecord>) -> Arc<SessionRecord> {
        if !self.caching_enabled() {
            return record;
        }
        self.shared
            .entries
            .entry(record.id().to_string())
            .or_insert(record)
            .value()
            .clone()
    }

    /// Drop a record. Waits for any purge pass in progress.
    pub fn remove(&self, id: &str) -> Option<Arc<SessionRecord>> {
        let _exclusive = self.shared.removal_lock.lock();
        let removed = self.shared.entries.remove(id).map(|(_, record)| record);
        if removed.is_some() {
            trace!(session_id = %id, "Removed session from cache");
        }
        removed
    }

    /// Run a purge pass now, regardless of throttling.
    ///
    /// Removes expired records, then evicts the least recently accessed
    /// records until the cache is back within capacity. With caching
    /// disabled, empties the cache.
    pub fn purge(&self) -> PurgeReport {
        self.shared.purge()
    }

    /// Run an inline purge unless one ran within the purge interval or one
    /// is already running. Returns whether this call ran a pass.
    pub fn purge_if_due(&self) -> bool {
        let interval = self.shared.settings.read().purge_interval;
        let now = self.shared.clock.now();
        if !self.shared.purge_due(now, interval) {
            return false;
        }

        if self
            .shared
            .purging
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        // Another pass may have finished between the check and the flag.
        if !self.shared.purge_due(now, interval) {
            self.shared.purging.store(false, Ordering::Release);
            return false;
        }

        let _guard = InlinePurgeGuard {
            shared: &self.shared,
        };
        self.shared.purge();
        true
    }

    /// Drive the purge schedule for one request: start the background purge
    /// if that mode is configured, or try an inline purge otherwise. With
    /// caching disabled, releases anything cached before it was switched off.
    pub fn maintain(&self) {
        let settings = self.settings();
        if !settings.caching_enabled() {
            if !self.is_empty() {
                self.purge();
            }
            return;
        }
        match settings.purge_mode {
            PurgeMode::Background => {
                self.ensure_background_purge();
            }
            PurgeMode::Inline => {
                self.purge_if_due();
            }
        }
    }

    /// Start the background purge thread if caching is enabled, background
    /// mode is selected and no purge thread is running. Returns whether
    /// this call started it.
    pub fn ensure_background_purge(&self) -> bool {
        // Held until the handle is stored so `shutdown` always finds it.
        let mut background = self.shared.background.lock();
        if !self.shared.settings.read().background_active() {
            return false;
        }

        if self
            .shared
            .background_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let (wake, wake_rx) = mpsc::channel();
        let shared = Arc::downgrade(&self.shared);
        let spawned = std::thread::Builder::new()
            .name(PURGE_THREAD_NAME.to_string())
            .spawn(move || run_background_purge(shared, wake_rx));

        match spawned {
            Ok(thread) => {
                *background = Some(BackgroundPurge { wake, thread });
                debug!("Started background session purge");
                true
            }
            Err(e) => {
                self.shared
                    .background_started
                    .store(false, Ordering::Release);
                warn!(error = %e, "Failed to start background session purge");
                false
            }
        }
    }

    /// Switch to inline purging and wait for the background thread to exit.
    pub fn shutdown(&self) {
        {
            let mut settings = self.shared.settings.write();
            settings.purge_mode = PurgeMode::Inline;
        }

        let background = self.shared.background.lock().take();
        if let Some(background) = background {
            let _ = background.wake.send(());
            if background.thread.join().is_err() {
                warn!("Background session purge panicked");
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.shared.entries.len(),
            capacity: self.shared.settings.read().capacity,
            purge_passes: self.shared.purge_passes.load(Ordering::Relaxed),
            background_running: self.shared.background_started.load(Ordering::Acquire),
        }
    }

    fn fresh_record(&self, settings: &CacheSettings) -> SessionRecord {
        SessionRecord::new(self.shared.clock.now(), settings.inactivity_timeout_seconds)
    }
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("stats", &self.stats())
            .finish()
    }
}

fn run_background_purge(shared: Weak<CacheShared>, wake: mpsc::Receiver<()>) {
    loop {
        let interval = {
            let Some(cache) = shared.upgrade() else {
                break;
            };
            let settings = cache.settings.read().clone();
            if !settings.background_active() {
                if !settings.caching_enabled() {
                    cache.purge();
                }
                cache.background_started.store(false, Ordering::Release);
                debug!("Background session purge stopping");
                break;
            }
            cache.purge();
            settings.purge_interval
        };

        match wake.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    fn cache_with_clock(settings: CacheSettings) -> (SessionCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        (SessionCache::with_clock(settings, clock.clone()), clock)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    #[test]
    fn test_disabled_cache_never_shares_instances() {
        let (cache, _clock) = cache_with_clock(CacheSettings::new(0));
        let loaded = SessionRecord::new(start(), -1);
        let id = loaded.id().to_string();
        let control = loaded.control_data();

        let supply = || Some(SessionRecord::from_control(control.clone(), Default::default()));
        let a = cache.resolve(&id, supply, false).unwrap();
        let b = cache.resolve(&id, supply, false).unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.id(), b.id());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disabled_cache_creates_without_storing() {
        let (cache, _clock) = cache_with_clock(CacheSettings::new(-1));
        let record = cache.resolve("missing", || None, true).unwrap();
        assert!(record.is_new());
        assert!(cache.is_empty());
        assert!(cache.resolve("missing", || None, false).is_none());
    }

    #[test]
    fn test_hit_skips_supplier() {
        let (cache, _clock) = cache_with_clock(CacheSettings::new(10));
        let record = Arc::new(SessionRecord::new(start(), -1));
        let id = record.id().to_string();
        cache.insert_if_absent(record.clone());

        let calls = AtomicUsize::new(0);
        let found = cache
            .resolve(
                &id,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    None
                },
                false,
            )
            .unwrap();

        assert!(Arc::ptr_eq(&found, &record));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_miss_loads_and_caches() {
        let (cache, _clock) = cache_with_clock(CacheSettings::new(10));
        let control = SessionRecord::new(start(), -1).control_data();
        let id = control.session_id.clone();

        let first = cache
            .resolve(
                &id,
                || Some(SessionRecord::from_control(control.clone(), Default::default())),
                false,
            )
            .unwrap();
        let second = cache.resolve(&id, || None, false).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_insert_wins_over_loaded_record() {
        let (cache, _clock) = cache_with_clock(CacheSettings::new(10));
        let winner = Arc::new(SessionRecord::new(start(), -1));
        let id = winner.id().to_string();
        let control = winner.control_data();

        // The supplier runs outside any map lock; simulate another request
        // caching the same session while this one was decoding.
        let found = cache
            .resolve(
                &id,
                || {
                    cache.insert_if_absent(winner.clone());
                    Some(SessionRecord::from_control(control.clone(), Default::default()))
                },
                false,
            )
            .unwrap();

        assert!(Arc::ptr_eq(&found, &winner));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_create_if_missing_stores_under_own_id() {
        let (cache, _clock) = cache_with_clock(
            CacheSettings::new(10).with_inactivity_timeout_seconds(120),
        );
        let created = cache.resolve("unknown", || None, true).unwrap();

        assert_ne!(created.id(), "unknown");
        assert_eq!(created.inactivity_timeout_seconds(), 120);
        assert!(Arc::ptr_eq(&cache.get(created.id()).unwrap(), &created));
        assert!(cache.resolve("other", || None, false).is_none());
    }

    #[test]
    fn test_insert_if_absent_is_idempotent() {
        let (cache, _clock) = cache_with_clock(CacheSettings::new(10));
        let first = Arc::new(SessionRecord::new(start(), -1));
        let duplicate = Arc::new(SessionRecord::from_control(
            first.control_data(),
            Default::default(),
        ));

        let kept = cache.insert_if_absent(first.clone());
        let kept_again = cache.insert_if_absent(duplicate);

        assert!(Arc::ptr_eq(&kept, &first));
        assert!(Arc::ptr_eq(&kept_again, &first));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove() {
        let (cache, _clock) = cache_with_clock(CacheSettings::new(10));
        let record = cache.insert_if_absent(Arc::new(SessionRecord::new(start(), -1)));

        assert!(cache.remove(record.id()).is_some());
        assert!(cache.remove(record.id()).is_none());
        assert!(!cache.contains(record.id()));
    }

    #[test]
    fn test_purge_removes_expired() {
        let (cache, clock) = cache_with_clock(
            CacheSettings::new(10).with_session_timeout_minutes(30),
        );
        let old = cache.insert_if_absent(Arc::new(SessionRecord::new(start(), -1)));
        clock.advance(TimeDelta::minutes(20));
        let young = cache.insert_if_absent(Arc::new(SessionRecord::new(clock.now(), -1)));
        clock.advance(TimeDelta::minutes(11));

        let report = cache.purge();

        assert_eq!(report.expired, 1);
        assert_eq!(report.evicted, 0);
        assert!(!cache.contains(old.id()));
        assert!(cache.contains(young.id()));
    }

    #[test]
    fn test_purge_keeps_most_recent_within_capacity() {
        let (cache, clock) = cache_with_clock(CacheSettings::new(3));
        let mut records = Vec::new();
        for i in 0..7 {
            let record = cache.insert_if_absent(Arc::new(SessionRecord::new(start(), -1)));
            record.touch(start() + TimeDelta::seconds(i));
            records.push(record);
        }
        // Make the first record the most recently used.
        records[0].touch(start() + TimeDelta::seconds(60));
        clock.advance(TimeDelta::seconds(61));

        let report = cache.purge();

        assert_eq!(report.evicted, 4);
        assert_eq!(report.remaining, 3);
        for (i, record) in records.iter().enumerate() {
            let expected = matches!(i, 0 | 5 | 6);
            assert_eq!(cache.contains(record.id()), expected, "record {}", i);
        }
    }

    #[test]
    fn test_purge_with_caching_disabled_clears() {
        let (cache, _clock) = cache_with_clock(CacheSettings::new(5));
        for _ in 0..3 {
            cache.insert_if_absent(Arc::new(SessionRecord::new(start(), -1)));
        }

        cache.update_settings(|s| s.capacity = 0);
        let report = cache.purge();

        assert_eq!(report.evicted, 3);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().purge_passes, 1);
    }

    #[test]
    fn test_inline_purge_is_throttled() {
        let (cache, clock) = cache_with_clock(
            CacheSettings::new(10).with_purge_interval(Duration::from_secs(15)),
        );

        assert!(cache.purge_if_due());
        assert!(!cache.purge_if_due());
        assert_eq!(cache.stats().purge_passes, 1);

        clock.advance(TimeDelta::seconds(14));
        assert!(!cache.purge_if_due());

        clock.advance(TimeDelta::seconds(1));
        assert!(cache.purge_if_due());
        assert_eq!(cache.stats().purge_passes, 2);
    }

    #[test]
    fn test_inline_purge_single_flight() {
        let (cache, _clock) = cache_with_clock(
            CacheSettings::new(10).with_purge_interval(Duration::from_secs(15)),
        );
        let barrier = Barrier::new(8);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    barrier.wait();
                    cache.purge_if_due();
                });
            }
        });

        // The clock never moves, so only one pass can ever be due.
        assert_eq!(cache.stats().purge_passes, 1);
    }

    #[test]
    fn test_maintain_inline_mode() {
        let (cache, _clock) = cache_with_clock(CacheSettings::new(10));
        cache.maintain();
        cache.maintain();
        assert_eq!(cache.stats().purge_passes, 1);
        assert!(!cache.stats().background_running);

        let (disabled, _clock) = cache_with_clock(CacheSettings::new(0));
        disabled.maintain();
        assert_eq!(disabled.stats().purge_passes, 0);
    }

    #[test]
    fn test_maintain_releases_entries_after_disable() {
        let (cache, _clock) = cache_with_clock(CacheSettings::new(10));
        for _ in 0..3 {
            cache.insert_if_absent(Arc::new(SessionRecord::new(start(), -1)));
        }

        cache.update_settings(|s| s.capacity = 0);
        cache.maintain();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().purge_passes, 1);

        // Nothing left to release, so no further passes.
        cache.maintain();
        assert_eq!(cache.stats().purge_passes, 1);
    }

    #[test]
    fn test_background_exit_releases_entries() {
        let cache = SessionCache::new(
            CacheSettings::new(10)
                .with_purge_mode(PurgeMode::Background)
                .with_purge_interval(Duration::from_secs(60)),
        );
        assert!(cache.ensure_background_purge());
        for _ in 0..3 {
            cache.insert_if_absent(Arc::new(SessionRecord::new(Utc::now(), -1)));
        }

        cache.update_settings(|s| s.capacity = 0);

        assert!(wait_until(|| !cache.stats().background_running));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_shutdown_joins_freshly_started_thread() {
        for _ in 0..20 {
            let cache = SessionCache::new(
                CacheSettings::new(10)
                    .with_purge_mode(PurgeMode::Background)
                    .with_purge_interval(Duration::from_secs(60)),
            );
            std::thread::scope(|scope| {
                scope.spawn(|| cache.ensure_background_purge());
                scope.spawn(|| cache.shutdown());
            });
            assert!(!cache.stats().background_running);
        }
    }

    #[test]
    fn test_concurrent_access_stays_bounded() {
        let (cache, _clock) = cache_with_clock(CacheSettings::new(20));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        let record = cache.resolve("unknown", || None, true).unwrap();
                        record.set("n", 1i64).unwrap();
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..20 {
                    cache.purge();
                }
            });
        });

        cache.purge();
        assert!(cache.len() <= 20);
    }

    #[test]
    fn test_background_purge_starts_once() {
        let cache = SessionCache::new(
            CacheSettings::new(10)
                .with_purge_mode(PurgeMode::Background)
                .with_purge_interval(Duration::from_millis(20)),
        );
        let barrier = Barrier::new(8);
        let started = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    barrier.wait();
                    if cache.ensure_background_purge() {
                        started.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(cache.stats().background_running);
        assert!(wait_until(|| cache.stats().purge_passes >= 2));

        cache.shutdown();
        assert!(!cache.stats().background_running);
    }

    #[test]
    fn test_background_purge_stops_when_caching_disabled() {
        let cache = SessionCache::new(
            CacheSettings::new(10)
                .with_purge_mode(PurgeMode::Background)
                .with_purge_interval(Duration::from_secs(60)),
        );
        cache.insert_if_absent(Arc::new(SessionRecord::new(Utc::now(), -1)));
        assert!(cache.ensure_background_purge());

        cache.update_settings(|s| s.capacity = 0);

        assert!(wait_until(|| !cache.stats().background_running));
        assert!(cache.is_empty());
        assert!(!cache.ensure_background_purge());

        // Re-enabling allows a new thread to start.
        cache.update_settings(|s| s.capacity = 10);
        assert!(cache.ensure_background_purge());
        cache.shutdown();
    }

    #[test]
    fn test_background_not_started_in_inline_mode() {
        let cache = SessionCache::new(CacheSettings::new(10));
        assert!(!cache.ensure_background_purge());
        assert!(!cache.stats().background_running);
    }

    #[test]
    fn test_settings_from_config() {
        let config = SessionConfig::new()
            .with_max_in_memory_sessions(50)
            .with_background_purge(true)
            .with_min_seconds_between_purges(5)
            .with_inactivity_timeout_seconds(300);
        let settings = CacheSettings::from_config(&config);

        assert_eq!(settings.capacity, 50);
        assert_eq!(settings.purge_mode, PurgeMode::Background);
        assert_eq!(settings.purge_interval, Duration::from_secs(5));
        assert_eq!(settings.inactivity_timeout_seconds, 300);
        assert!(settings.caching_enabled());
    }
}
