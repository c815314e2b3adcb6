//! In-memory result cache with TTL expiry and single-flight computation.
//!
//! Concurrent callers asking for the same [`Query`] while no fresh value is
//! stored share one computation: the first caller starts it, later callers
//! attach to it, and all of them receive the same value or the same error.
//! Failures are never stored.
//!
//! The state mutex is only held for map bookkeeping, never across an await,
//! so unrelated keys do not wait on each other's computations.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    future::Future,
    sync::{Arc, Weak},
    time::Duration,
};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{error::WeatherError, model::AggregatedAnswer, model::Query};

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

type Outcome = Result<Arc<AggregatedAnswer>, WeatherError>;
type Flight = Shared<BoxFuture<'static, Outcome>>;

/// Counters describing cache behaviour since creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub in_flight: usize,
}

struct CacheEntry {
    value: Arc<AggregatedAnswer>,
    expires_at: Instant,
    seq: u64,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

struct InFlight {
    id: u64,
    future: Flight,
    waiters: usize,
}

#[derive(Default)]
struct State {
    entries: HashMap<Query, CacheEntry>,
    /// Keys in insertion order, tagged with the entry's sequence number so
    /// replaced entries can be told apart from the live one.
    insertion_order: VecDeque<(Query, u64)>,
    in_flight: HashMap<Query, InFlight>,
    next_seq: u64,
    stats: CacheStats,
}

impl State {
    fn insert(
        &mut self,
        query: Query,
        value: Arc<AggregatedAnswer>,
        ttl: Duration,
        max_entries: usize,
    ) {
        if max_entries == 0 {
            return;
        }

        let now = Instant::now();
        if !self.entries.contains_key(&query) && self.entries.len() >= max_entries {
            self.purge_expired(now);
            while self.entries.len() >= max_entries && self.evict_oldest() {}
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(query.clone(), CacheEntry { value, expires_at: now + ttl, seq });
        self.insertion_order.push_back((query, seq));

        if self.insertion_order.len() > max_entries.saturating_mul(2).max(16) {
            let entries = &self.entries;
            self.insertion_order
                .retain(|(key, seq)| entries.get(key).is_some_and(|e| e.seq == *seq));
        }
    }

    /// Removes the oldest inserted live entry. Returns false when nothing was
    /// left to evict.
    fn evict_oldest(&mut self) -> bool {
        while let Some((query, seq)) = self.insertion_order.pop_front() {
            if self.entries.get(&query).is_some_and(|e| e.seq == seq) {
                self.entries.remove(&query);
                self.stats.evictions += 1;
                debug!(%query, "evicted oldest cache entry");
                return true;
            }
        }
        false
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now));
        before - self.entries.len()
    }
}

struct Inner {
    ttl: Duration,
    max_entries: usize,
    state: Mutex<State>,
}

impl Inner {
    /// Called once by the computation itself when it settles.
    fn complete(&self, query: &Query, id: u64, outcome: &Outcome) {
        let finished = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let registered = state.in_flight.get(query).is_some_and(|f| f.id == id);
            if !registered {
                return;
            }
            let finished = state.in_flight.remove(query);

            match outcome {
                Ok(value) => {
                    state.insert(query.clone(), value.clone(), self.ttl, self.max_entries);
                    info!(%query, "cached aggregated answer");
                }
                Err(err) => warn!(%query, error = %err, "computation failed, nothing cached"),
            }
            finished
        };
        drop(finished);
    }
}

/// Process-local cache of aggregated answers, keyed by normalized [`Query`].
///
/// Cloning is cheap and every clone shares the same storage. The owner creates
/// it at start-up and drops it at shutdown.
#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<Inner>,
}

impl fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache")
            .field("ttl", &self.inner.ttl)
            .field("max_entries", &self.inner.max_entries)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }
}

impl ResultCache {
    /// `max_entries == 0` disables storage; single-flight still applies.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                ttl,
                max_entries,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Returns the stored answer for `query`, or runs `compute` to produce it.
    ///
    /// At most one `compute` runs per key at any time. If every caller waiting
    /// on a computation goes away before it settles, the computation is
    /// dropped and the next request starts over.
    pub async fn get_or_compute<F, Fut>(&self, query: &Query, compute: F) -> Outcome
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<AggregatedAnswer, WeatherError>> + Send + 'static,
    {
        let (flight, id) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let now = Instant::now();

            match state.entries.get(query) {
                Some(entry) if entry.is_fresh(now) => {
                    state.stats.hits += 1;
                    debug!(%query, "cache hit");
                    return Ok(entry.value.clone());
                }
                Some(_) => {
                    state.entries.remove(query);
                }
                None => {}
            }
            state.stats.misses += 1;

            match state.in_flight.get_mut(query) {
                Some(flight) => {
                    flight.waiters += 1;
                    debug!(%query, waiters = flight.waiters, "joining in-flight computation");
                    (flight.future.clone(), flight.id)
                }
                None => {
                    let id = state.next_seq;
                    state.next_seq += 1;
                    info!(%query, "cache miss, computing");

                    let inner = Arc::downgrade(&self.inner);
                    let future = start_flight(inner, query.clone(), id, compute);
                    state.in_flight.insert(
                        query.clone(),
                        InFlight { id, future: future.clone(), waiters: 1 },
                    );
                    (future, id)
                }
            }
        };

        let _waiter = Waiter { inner: &self.inner, query, id };
        flight.await
    }

    /// Fresh stored answer for `query`, without computing anything.
    pub fn get(&self, query: &Query) -> Option<Arc<AggregatedAnswer>> {
        let state = self.inner.state.lock();
        state
            .entries
            .get(query)
            .filter(|entry| entry.is_fresh(Instant::now()))
            .map(|entry| entry.value.clone())
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.inner.state.lock().purge_expired(Instant::now())
    }

    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.entries.clear();
        state.insertion_order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        CacheStats {
            entries: state.entries.len(),
            in_flight: state.in_flight.len(),
            ..state.stats.clone()
        }
    }
}

/// `compute` first runs when the flight is polled, after the state lock is
/// released, so it may call back into the cache.
fn start_flight<F, Fut>(inner: Weak<Inner>, query: Query, id: u64, compute: F) -> Flight
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<AggregatedAnswer, WeatherError>> + Send + 'static,
{
    async move {
        let outcome = compute().await.map(Arc::new);
        if let Some(inner) = inner.upgrade() {
            inner.complete(&query, id, &outcome);
        }
        outcome
    }
    .boxed()
    .shared()
}

/// Registration of one caller on an in-flight computation. The last waiter to
/// leave before the computation settles tears it down.
struct Waiter<'a> {
    inner: &'a Inner,
    query: &'a Query,
    id: u64,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        let abandoned = {
            let mut state = self.inner.state.lock();
            let remaining = match state.in_flight.get_mut(self.query) {
                Some(flight) if flight.id == self.id => {
                    flight.waiters -= 1;
                    Some(flight.waiters)
                }
                _ => None,
            };
            if remaining == Some(0) {
                state.in_flight.remove(self.query)
            } else {
                None
            }
        };

        if abandoned.is_some() {
            debug!(query = %self.query, "all waiters left, abandoning computation");
        }
    }
}
