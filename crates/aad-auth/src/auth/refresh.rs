//! Single-flight snapshot cell shared by the metadata cache and key store.
//!
//! The cell holds an immutable `Arc<T>` snapshot. Readers clone the `Arc`
//! under a read lock and never see a partially updated value. Refreshes
//! serialize on an async mutex and are tracked with an attempt counter: a
//! caller that observed attempt `n` and finds the counter advanced once it
//! holds the mutex reuses that attempt's outcome instead of fetching again.
//! N concurrent cold callers therefore cause exactly one fetch, whether that
//! fetch succeeds or fails.
//!
//! A snapshot's generation is the attempt that last confirmed it: a failed
//! refresh that falls back to the stale value advances the generation too, so
//! callers holding the stale snapshot can still force a fresh attempt.
//!
//! If a caller is dropped mid-fetch the mutex is released without
//! publishing or bumping the counter, and the next caller fetches.

use crate::observability::metrics::{record_cache_refresh, record_stale_fallback, CacheKind};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// How long a stale snapshot is served after a failed refresh before the
/// next caller tries the network again.
const STALE_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// A published value and the attempt that last confirmed it.
#[derive(Debug)]
pub(crate) struct Snapshot<T> {
    pub value: Arc<T>,
    pub generation: u64,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            generation: self.generation,
        }
    }
}

struct Published<T> {
    snapshot: Snapshot<T>,
    expires_at: Instant,
}

/// Outcome of the most recent fetch attempt, kept for coalesced waiters.
struct RefreshState<E> {
    last_error: Option<E>,
}

pub(crate) struct RefreshCell<T, E = String> {
    kind: CacheKind,
    ttl: Duration,
    current: RwLock<Option<Published<T>>>,
    refresh: Mutex<RefreshState<E>>,
    attempts: AtomicU64,
}

impl<T, E: Clone + Display> RefreshCell<T, E> {
    pub fn new(kind: CacheKind, ttl: Duration) -> Self {
        Self {
            kind,
            ttl,
            current: RwLock::new(None),
            refresh: Mutex::new(RefreshState { last_error: None }),
            attempts: AtomicU64::new(0),
        }
    }

    /// Number of completed fetch attempts, successful or not.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Acquire)
    }

    /// The current snapshot if it is within its TTL.
    pub async fn fresh(&self) -> Option<Snapshot<T>> {
        let current = self.current.read().await;
        current
            .as_ref()
            .filter(|p| p.expires_at > Instant::now())
            .map(|p| p.snapshot.clone())
    }

    /// The current snapshot regardless of age.
    pub async fn latest(&self) -> Option<Snapshot<T>> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|p| p.snapshot.clone())
    }

    /// Mark the current snapshot expired. It stays available as a stale
    /// fallback.
    pub async fn invalidate(&self) {
        if let Some(published) = self.current.write().await.as_mut() {
            published.expires_at = Instant::now();
        }
    }

    /// Return the fresh snapshot, fetching if there is none.
    pub async fn get<F, Fut>(&self, fetch: F) -> Result<Snapshot<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let observed = self.attempts();
        if let Some(snapshot) = self.fresh().await {
            return Ok(snapshot);
        }
        self.refresh_after(observed, fetch).await
    }

    /// Fetch unless another attempt has completed since `observed`.
    ///
    /// Callers pass the attempt count they saw (or the generation of the
    /// snapshot they found lacking); concurrent callers passing the same value
    /// coalesce onto a single fetch.
    pub async fn refresh_after<F, Fut>(&self, observed: u64, fetch: F) -> Result<Snapshot<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut state = self.refresh.lock().await;

        if self.attempts() != observed {
            if let Some(outcome) = self.settled(&state).await {
                tracing::debug!(
                    target: "aad.refresh",
                    cache = self.kind.as_str(),
                    "Reusing concurrent refresh outcome"
                );
                return outcome;
            }
        }

        let started = Instant::now();
        let result = fetch().await;
        record_cache_refresh(self.kind, result.is_ok(), started.elapsed());
        let generation = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;

        match result {
            Ok(value) => {
                let snapshot = Snapshot {
                    value: Arc::new(value),
                    generation,
                };
                *self.current.write().await = Some(Published {
                    snapshot: snapshot.clone(),
                    expires_at: Instant::now() + self.ttl,
                });
                state.last_error = None;
                Ok(snapshot)
            }
            Err(error) => {
                state.last_error = Some(error.clone());
                let mut current = self.current.write().await;
                match current.as_mut() {
                    Some(published) => {
                        tracing::warn!(
                            target: "aad.refresh",
                            cache = self.kind.as_str(),
                            error = %error,
                            "Refresh failed, serving stale snapshot"
                        );
                        record_stale_fallback(self.kind);
                        published.snapshot.generation = generation;
                        published.expires_at = Instant::now() + STALE_RETRY_INTERVAL.min(self.ttl);
                        Ok(published.snapshot.clone())
                    }
                    None => Err(error),
                }
            }
        }
    }

    /// Outcome of the attempt that completed while this caller waited.
    async fn settled(&self, state: &RefreshState<E>) -> Option<Result<Snapshot<T>, E>> {
        match (self.latest().await, &state.last_error) {
            (Some(snapshot), _) => Some(Ok(snapshot)),
            (None, Some(error)) => Some(Err(error.clone())),
            (None, None) => None,
        }
    }
}
