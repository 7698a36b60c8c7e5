//! Keyed single-flight cache with TTL and bounded capacity.
//!
//! Built for long-lived MCP sessions: constructing an entry means a network
//! handshake, so concurrent `get` calls on an absent key share exactly one
//! construction. Construction runs on a detached task: a waiter dropping its
//! future never cancels the shared work; only eviction or `close` aborts it.
//!
//! Eviction (TTL expiry observed at access, capacity pressure, `close`) runs
//! the destructor exactly once per entry that finished constructing. A failed
//! construction is never cached: the flight is forgotten and the next caller
//! retries.

use std::collections::HashMap;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    #[error("cache is closed")]
    Closed,
    #[error("constructing cache entry: {0}")]
    Construction(CoreError),
    #[error("cache entry constructor panicked: {0}")]
    Panicked(String),
    #[error("cache entry construction aborted")]
    Aborted,
}

pub type Constructor<K, V> =
    Arc<dyn Fn(K) -> BoxFuture<'static, Result<V, CoreError>> + Send + Sync>;
pub type Destructor<K, V> = Arc<dyn Fn(K, V) + Send + Sync>;

enum FlightState<V> {
    Idle,
    Running,
    Ready(V),
    Failed(CacheError),
}

struct Flight<V> {
    state: Mutex<FlightState<V>>,
    notify: Notify,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<V> Flight<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(FlightState::Idle),
            notify: Notify::new(),
            handle: Mutex::new(None),
        }
    }
}

struct Entry<V> {
    expires_at: Instant,
    flight: Arc<Flight<V>>,
}

struct Inner<K, V> {
    closed: bool,
    entries: HashMap<K, Entry<V>>,
}

pub struct Cache<K, V> {
    inner: Mutex<Inner<K, V>>,
    constructor: Constructor<K, V>,
    destructor: Destructor<K, V>,
    capacity: usize,
    ttl: Duration,
}

impl<K, V> Cache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    pub fn new(
        constructor: Constructor<K, V>,
        destructor: Destructor<K, V>,
        capacity: usize,
        ttl: Duration,
    ) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");

        Self {
            inner: Mutex::new(Inner {
                closed: false,
                entries: HashMap::new(),
            }),
            constructor,
            destructor,
            capacity,
            ttl,
        }
    }

    /// Return the cached value, joining or starting the per-key flight.
    pub async fn get(&self, key: K) -> Result<V, CacheError> {
        let mut first_check = true;

        loop {
            let flight = self.admit(&key)?;

            loop {
                let notified = flight.notify.notified();

                enum Action {
                    Wait,
                    Run,
                }

                let action = {
                    let mut state = flight.state.lock().unwrap_or_else(|e| e.into_inner());
                    match &*state {
                        FlightState::Ready(value) => return Ok(value.clone()),
                        FlightState::Failed(err) => {
                            let err = err.clone();
                            drop(state);
                            self.forget(&key, &flight);
                            if first_check {
                                // The failure predates this call: retry with a
                                // fresh flight instead of replaying it.
                                break;
                            }
                            return Err(err);
                        }
                        FlightState::Running => Action::Wait,
                        FlightState::Idle => {
                            *state = FlightState::Running;
                            Action::Run
                        }
                    }
                };

                match action {
                    Action::Wait => {
                        first_check = false;
                        notified.await;
                    }
                    Action::Run => {
                        first_check = false;
                        self.spawn_constructor(key.clone(), &flight);
                    }
                }
            }
        }
    }

    /// Shut the cache down, destructing every live entry. The first call
    /// wins; later calls observe `Closed`.
    pub fn close(&self) -> Result<(), CacheError> {
        let drained = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if inner.closed {
                return Err(CacheError::Closed);
            }
            inner.closed = true;
            inner.entries.drain().collect::<Vec<_>>()
        };

        for (key, entry) in drained {
            self.destruct(key, entry);
        }
        Ok(())
    }

    /// Find or insert the entry for `key`, evicting expired and over-capacity
    /// entries on the way. The admission and the flight registration happen
    /// under one lock, so two callers can never race into separate flights.
    fn admit(&self, key: &K) -> Result<Arc<Flight<V>>, CacheError> {
        let now = Instant::now();
        let mut evicted = Vec::new();

        let flight = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if inner.closed {
                return Err(CacheError::Closed);
            }

            if let Some(entry) = inner.entries.get(key) {
                if entry.expires_at > now {
                    entry.flight.clone()
                } else {
                    let entry = inner.entries.remove(key).expect("entry just observed");
                    evicted.push((key.clone(), entry));

                    let fresh = Arc::new(Flight::new());
                    inner.entries.insert(
                        key.clone(),
                        Entry {
                            expires_at: now + self.ttl,
                            flight: fresh.clone(),
                        },
                    );
                    fresh
                }
            } else {
                let fresh = Arc::new(Flight::new());
                inner.entries.insert(
                    key.clone(),
                    Entry {
                        expires_at: now + self.ttl,
                        flight: fresh.clone(),
                    },
                );
                fresh
            }
        };

        // Capacity pressure: drop the entry closest to expiry.
        loop {
            let victim = {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                if inner.entries.len() <= self.capacity {
                    None
                } else {
                    let candidate = inner
                        .entries
                        .iter()
                        .filter(|(candidate, _)| *candidate != key)
                        .min_by_key(|(_, entry)| entry.expires_at)
                        .map(|(candidate, _)| candidate.clone());
                    candidate.and_then(|candidate| {
                        let entry = inner.entries.remove(&candidate)?;
                        Some((candidate, entry))
                    })
                }
            };

            match victim {
                Some(pair) => evicted.push(pair),
                None => break,
            }
        }

        for (key, entry) in evicted {
            self.destruct(key, entry);
        }

        Ok(flight)
    }

    fn spawn_constructor(&self, key: K, flight: &Arc<Flight<V>>) {
        let constructor = self.constructor.clone();
        let task_flight = flight.clone();
        let task_key = key;

        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe((constructor)(task_key)).catch_unwind().await;

            let mut state = task_flight.state.lock().unwrap_or_else(|e| e.into_inner());
            *state = match outcome {
                Ok(Ok(value)) => FlightState::Ready(value),
                Ok(Err(err)) => FlightState::Failed(CacheError::Construction(err)),
                Err(panic) => FlightState::Failed(CacheError::Panicked(panic_message(&panic))),
            };
            drop(state);
            task_flight.notify.notify_waiters();
        });

        *flight.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Drop a failed flight from the map so the next `get` reconstructs.
    fn forget(&self, key: &K, flight: &Arc<Flight<V>>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = inner.entries.get(key) {
            if Arc::ptr_eq(&entry.flight, flight) {
                inner.entries.remove(key);
            }
        }
    }

    /// Tear one evicted entry down: abort a still-running construction, run
    /// the destructor for a constructed value. The entry left the map before
    /// this runs, so the destructor cannot fire twice for one key.
    fn destruct(&self, key: K, entry: Entry<V>) {
        if let Some(handle) = entry
            .flight
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            if !handle.is_finished() {
                handle.abort();
            }
        }

        let value = {
            let mut state = entry.flight.state.lock().unwrap_or_else(|e| e.into_inner());
            match std::mem::replace(&mut *state, FlightState::Failed(CacheError::Aborted)) {
                FlightState::Ready(value) => Some(value),
                _ => None,
            }
        };
        entry.flight.notify.notify_waiters();

        if let Some(value) = value {
            (self.destructor)(key, value);
        }
    }
}

impl<K, V> Drop for Cache<K, V> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, entry) in inner.entries.drain() {
            if let Some(handle) = entry
                .flight
                .handle
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
            {
                handle.abort();
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        format!("unknown panic payload: type_id={:?} strid={:?} stringid={:?}", (*panic).type_id(), std::any::TypeId::of::<&str>(), std::any::TypeId::of::<String>())
    }
}
