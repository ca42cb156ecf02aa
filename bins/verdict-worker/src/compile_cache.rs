// In-memory cache of compile responses keyed by compilation identifier.
// Bounded: expired entries go first, then the oldest insertion.

use anyhow::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;
use verdict_common::types::CompileResponse;

struct Entry {
    response: CompileResponse,
    inserted: Instant,
}

pub struct CompileCache {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
    /// One lock per identifier with a compile in flight
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CompileCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, identifier: &str) -> Option<CompileResponse> {
        let entries = self.entries.lock().await;
        entries
            .get(identifier)
            .filter(|entry| entry.inserted.elapsed() < self.ttl)
            .map(|entry| entry.response.clone())
    }

    pub async fn insert(&self, identifier: &str, response: CompileResponse) {
        let mut entries = self.entries.lock().await;
        self.insert_locked(&mut entries, identifier, response);
    }

    /// Return the fresh response for `identifier`, or compute and store it.
    ///
    /// Concurrent callers with the same identifier compile once; different
    /// identifiers compile in parallel. Errors are not cached.
    pub async fn get_or_try_insert_with<F, Fut>(&self, identifier: &str, compile: F) -> Result<CompileResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CompileResponse>>,
    {
        let slot = self
            .in_flight
            .lock()
            .await
            .entry(identifier.to_string())
            .or_default()
            .clone();
        let guard = slot.lock().await;

        let result = match self.get(identifier).await {
            Some(response) => {
                debug!(identifier = %identifier, "Compile cache hit");
                Ok(response)
            }
            None => {
                debug!(identifier = %identifier, "Compile cache miss");
                match compile().await {
                    Ok(response) => {
                        self.insert(identifier, response.clone()).await;
                        Ok(response)
                    }
                    Err(e) => Err(e),
                }
            }
        };

        // Waiters clone the slot under `in_flight`, so nobody else holds it here
        let mut in_flight = self.in_flight.lock().await;
        if Arc::strong_count(&slot) == 2 {
            in_flight.remove(identifier);
        }
        drop(guard);
        result
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    fn insert_locked(&self, entries: &mut HashMap<String, Entry>, identifier: &str, response: CompileResponse) {
        if self.capacity == 0 {
            return;
        }
        entries.remove(identifier);
        if entries.len() >= self.capacity {
            let ttl = self.ttl;
            entries.retain(|_, entry| entry.inserted.elapsed() < ttl);
        }
        while entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    entries.remove(&key);
                }
                None => break,
            }
        }
        entries.insert(
            identifier.to_string(),
            Entry {
                response,
                inserted: Instant::now(),
            },
        );
    }
}
