//! Per-session HTTP clients with idle eviction.
//!
//! Each session gets its own `reqwest::Client` so connection pools
//! stay separate. A client unused for the idle period is dropped,
//! either lazily on the next lookup or by the reaper task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

struct Entry {
    client: reqwest::Client,
    last_used: Instant,
}

pub struct HttpClientPool {
    idle: Duration,
    request_timeout: Duration,
    clients: Mutex<HashMap<String, Entry>>,
}

impl HttpClientPool {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            request_timeout: Duration::from_secs(30),
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The client for `session_id`, created on first use.
    pub fn client_for(&self, session_id: &str) -> reqwest::Client {
        let now = Instant::now();
        let mut clients = self.lock();
        let idle = self.idle;
        clients.retain(|_, entry| now.duration_since(entry.last_used) < idle);

        let entry = clients.entry(session_id.to_string()).or_insert_with(|| {
            debug!(session_id, "Creating HTTP client");
            Entry {
                client: build_client(self.request_timeout),
                last_used: now,
            }
        });
        entry.last_used = now;
        entry.client.clone()
    }

    /// Drop clients idle for longer than the idle period. Returns how many went.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut clients = self.lock();
        let before = clients.len();
        clients.retain(|_, entry| now.duration_since(entry.last_used) < self.idle);
        let evicted = before - clients.len();
        if evicted > 0 {
            debug!(evicted, "Evicted idle HTTP clients");
        }
        evicted
    }

    /// Drop the client for one session, if any.
    pub fn release(&self, session_id: &str) -> bool {
        self.lock().remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run eviction periodically until `shutdown` fires.
    pub fn spawn_reaper(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let period = (self.idle / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.evict_idle();
                    }
                }
            }
        })
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn clients_are_per_session_and_evicted_when_idle() {
        let pool = HttpClientPool::new(Duration::from_secs(300));
        pool.client_for("s1");
        pool.client_for("s2");
        assert_eq!(pool.len(), 2);

        tokio::time::advance(Duration::from_secs(200)).await;
        pool.client_for("s1");
        tokio::time::advance(Duration::from_secs(150)).await;

        assert_eq!(pool.evict_idle(), 1);
        assert_eq!(pool.len(), 1);
        assert!(pool.release("s1"));
        assert!(pool.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_evicts_in_background() {
        let pool = Arc::new(HttpClientPool::new(Duration::from_secs(10)));
        pool.client_for("s1");
        let shutdown = CancellationToken::new();
        let handle = pool.clone().spawn_reaper(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(pool.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
