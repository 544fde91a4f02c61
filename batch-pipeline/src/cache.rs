use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::error::AppError;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Cached upstream outcome for one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAnswer {
    pub answer: String,
    pub model: String,
    pub call_ms: u64,
    pub attempts: u32,
}

/// Counter snapshot. Evictions include capacity, TTL, and corruption
/// removals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

struct Entry {
    payload: serde_json::Value,
    inserted_at: Instant,
    touch: u64,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, Entry>,
    touch_counter: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

type Flight = Arc<OnceCell<CachedAnswer>>;

/// Bounded LRU + TTL cache keyed by request fingerprint, with single-flight
/// coalescing: concurrent lookups of an absent key produce exactly one
/// upstream computation.
pub struct ContentCache {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<CacheInner>,
    inflight: Mutex<HashMap<String, Flight>>,
}

impl ContentCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            inner: Mutex::new(CacheInner::default()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<CachedAnswer> {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.entries.get(key) else {
            inner.misses += 1;
            return None;
        };

        if entry.inserted_at.elapsed() > self.ttl {
            inner.entries.remove(key);
            inner.evictions += 1;
            inner.misses += 1;
            return None;
        }

        match serde_json::from_value::<CachedAnswer>(entry.payload.clone()) {
            Ok(answer) => {
                inner.touch_counter += 1;
                let touch = inner.touch_counter;
                if let Some(entry) = inner.entries.get_mut(key) {
                    entry.touch = touch;
                }
                inner.hits += 1;
                Some(answer)
            }
            Err(err) => {
                // Undecodable entries are dropped and treated as a miss
                debug!(error = %err, "evicting corrupt cache entry");
                inner.entries.remove(key);
                inner.evictions += 1;
                inner.misses += 1;
                None
            }
        }
    }

    pub async fn put(&self, key: &str, answer: &CachedAnswer) -> Result<(), AppError> {
        let payload = serde_json::to_value(answer)?;
        let mut inner = self.inner.lock().await;

        while !inner.entries.contains_key(key) && inner.entries.len() >= self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.touch)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                    inner.evictions += 1;
                }
                None => break,
            }
        }

        inner.touch_counter += 1;
        let touch = inner.touch_counter;
        inner.entries.insert(
            key.to_owned(),
            Entry {
                payload,
                inserted_at: Instant::now(),
                touch,
            },
        );
        Ok(())
    }

    /// Inserts an arbitrary raw payload, bypassing `put`'s typed
    /// serialization, so corruption handling can be exercised.
    #[cfg(test)]
    async fn put_raw(&self, key: &str, payload: serde_json::Value) {
        let mut inner = self.inner.lock().await;
        inner.touch_counter += 1;
        let touch = inner.touch_counter;
        inner.entries.insert(
            key.to_owned(),
            Entry {
                payload,
                inserted_at: Instant::now(),
                touch,
            },
        );
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            size: inner.entries.len(),
        }
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
    }

    /// Returns the cached answer or computes it once across concurrent
    /// callers. The bool is true only for a hit on an already-stored entry;
    /// coalesced waiters count as misses. A failed computation is not
    /// cached, and the next caller retries.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        compute: F,
    ) -> Result<(CachedAnswer, bool), AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedAnswer, AppError>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok((hit, true));
        }

        let flight = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(
                inflight
                    .entry(key.to_owned())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let ran = AtomicBool::new(false);
        let outcome = flight
            .get_or_try_init(|| async {
                ran.store(true, Ordering::Relaxed);
                let answer = compute().await?;
                self.put(key, &answer).await?;
                Ok::<_, AppError>(answer)
            })
            .await
            .cloned();

        if ran.load(Ordering::Relaxed) {
            let mut inflight = self.inflight.lock().await;
            if inflight
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current, &flight))
            {
                inflight.remove(key);
            }
        }

        outcome.map(|answer| (answer, false))
    }
}
