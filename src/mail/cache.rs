//! Per-user mailbox client cache
//!
//! Entries live for a fixed TTL measured on an injectable `Clock`, so tests
//! can move time forward without sleeping. moka provides the concurrent map.
//! Rebuilds go through its per-key compute lock, so concurrent callers that
//! find no entry, or an expired one, share a single construction. Its own
//! `time_to_live` is set to the same TTL as a memory backstop.

use moka::future::Cache;
use moka::ops::compute::Op;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::client::{MailboxClient, UserTokenSupplier};
use crate::constants::CLIENT_CACHE_MAX_CAPACITY;
use crate::error::{Error, Result};
use crate::token::TokenManager;

/// Time source for cache expiry
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

/// Clock that only moves when told to.
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    elapsed: std::sync::Mutex<Duration>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: std::sync::Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *elapsed += by;
    }
}

#[cfg(test)]
impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone)]
struct CachedClient {
    client: Arc<MailboxClient>,
    inserted_at: Instant,
}

pub struct ClientCache {
    entries: Cache<String, CachedClient>,
    tokens: Arc<TokenManager>,
    http: reqwest::Client,
    base_url: String,
    ttl: Duration,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl ClientCache {
    pub fn new(
        tokens: Arc<TokenManager>,
        base_url: &str,
        ttl: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport {
                operation: "mailbox client setup",
                message: e.to_string(),
            })?;

        let entries = Cache::builder()
            .max_capacity(CLIENT_CACHE_MAX_CAPACITY)
            .time_to_live(ttl)
            .build();

        Ok(Self {
            entries,
            tokens,
            http,
            base_url: base_url.to_string(),
            ttl,
            timeout,
            clock: Arc::new(SystemClock),
        })
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Return the cached client for `user_id`, building one on a miss.
    ///
    /// A miss checks the stored grant first, so a user without one is
    /// rejected with `Unauthenticated` before any network traffic and
    /// nothing is cached for them.
    pub async fn get_client(&self, user_id: &str) -> Result<Arc<MailboxClient>> {
        if let Some(entry) = self.entries.get(user_id).await {
            if self.is_fresh(&entry) {
                debug!(user_id, "Mailbox client cache hit");
                return Ok(entry.client);
            }
        }

        // Freshness is re-checked under the key lock: whoever got here first
        // may already have rebuilt the entry.
        let result = self
            .entries
            .entry(user_id.to_string())
            .and_try_compute_with(|current| async move {
                match current {
                    Some(entry) if self.is_fresh(entry.value()) => Ok(Op::Nop),
                    Some(_) => {
                        debug!(user_id, "Mailbox client expired");
                        self.build(user_id).await.map(Op::Put)
                    }
                    None => self.build(user_id).await.map(Op::Put),
                }
            })
            .await?;

        match result.into_entry() {
            Some(entry) => Ok(entry.into_value().client),
            None => Err(Error::unauthenticated(user_id)),
        }
    }

    /// Drop the cached client so the next request rebuilds it.
    pub async fn invalidate(&self, user_id: &str) {
        self.entries.invalidate(user_id).await;
    }

    fn is_fresh(&self, entry: &CachedClient) -> bool {
        self.clock.now().saturating_duration_since(entry.inserted_at) < self.ttl
    }

    async fn build(&self, user_id: &str) -> Result<CachedClient> {
        debug!(user_id, "Mailbox client cache miss");
        self.tokens.ensure_grant(user_id).await?;

        let supplier = UserTokenSupplier::new(self.tokens.clone(), user_id);
        let client = MailboxClient::new(
            self.http.clone(),
            &self.base_url,
            user_id,
            Arc::new(supplier),
            self.timeout,
        );

        Ok(CachedClient {
            client: Arc::new(client),
            inserted_at: self.clock.now(),
        })
    }
}
