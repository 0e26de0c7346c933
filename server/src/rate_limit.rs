//! Per-client rate limiting using the token bucket algorithm.
//!
//! Every client (identified by the IP address of the connecting peer) owns a
//! token bucket that replenishes continuously. The buckets live in a
//! [`ClientRegistry`], a map guarded by a single exclusive lock that is shared
//! between the admission gate middleware and a background sweeper.
//!
//! # Algorithm
//!
//! - Each client has a bucket that can hold up to `burst` tokens
//! - Tokens are added at a rate of `rps` tokens per second, fractionally
//! - Each request consumes one whole token
//! - If no whole token is available, the request is rejected
//!
//! # Eviction
//!
//! Each client also records the instant it was last seen. The sweeper wakes on
//! a fixed interval and drops every client idle for longer than the idle
//! threshold. An evicted client simply gets a fresh, full bucket on its next
//! request.
//!
//! # Example
//!
//! ```rust
//! use greenlight_server::rate_limit::ClientRegistry;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = ClientRegistry::new(2.0, 4);
//!
//!     if registry.check("10.0.0.1").await {
//!         // Forward the request
//!     } else {
//!         // Respond with 429 Too Many Requests
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Default refill rate: 2 requests per second.
pub const DEFAULT_RPS: f64 = 2.0;

/// Default bucket capacity: bursts of up to 4 requests.
pub const DEFAULT_BURST: u32 = 4;

/// Default period between two sweeps of the registry.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default idle time after which a client is evicted (three sweep intervals).
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(180);

/// Longest accepted period between two sweeps (one day).
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest accepted idle threshold (one week).
pub const MAX_IDLE_THRESHOLD: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A token bucket tracking the request allowance of a single client.
///
/// The bucket refills at a constant rate and never holds more than its
/// capacity. Each admitted request consumes exactly one token.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Current number of tokens in the bucket.
    tokens: f64,

    /// Time of the last token refill.
    last_refill: Instant,

    /// Maximum number of tokens the bucket can hold.
    capacity: u32,

    /// Rate at which tokens are added (tokens per second).
    rate: f64,
}

impl TokenBucket {
    /// Creates a new token bucket with the specified rate and capacity.
    ///
    /// The bucket starts full, so a new client's first burst is never
    /// throttled.
    ///
    /// # Arguments
    ///
    /// * `rate` - Number of tokens added per second
    /// * `capacity` - Maximum number of tokens the bucket can hold
    pub fn new(rate: f64, capacity: u32) -> Self {
        Self {
            tokens: f64::from(capacity),
            last_refill: Instant::now(),
            capacity,
            rate,
        }
    }

    /// Attempts to consume a token from the bucket.
    ///
    /// Tokens accrued since the previous call are credited first. Returns
    /// `true` and removes one token when at least one whole token is
    /// available; otherwise leaves the balance untouched and returns `false`.
    pub fn try_consume(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Refills tokens based on elapsed time since last refill.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed_secs = now.duration_since(self.last_refill).as_secs_f64();

        let tokens_to_add = elapsed_secs * self.rate;
        self.tokens = (self.tokens + tokens_to_add).min(f64::from(self.capacity));
        self.last_refill = now;
    }

    /// Returns the current number of tokens (for testing/debugging).
    #[cfg(test)]
    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}

/// Limiter state kept for a single client.
#[derive(Debug, Clone)]
pub struct ClientState {
    limiter: TokenBucket,
    last_seen: Instant,
}

impl ClientState {
    fn new(rate: f64, burst: u32) -> Self {
        Self {
            limiter: TokenBucket::new(rate, burst),
            last_seen: Instant::now(),
        }
    }

    /// Records that the client was seen just now.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Attempts to take one token from the client's bucket.
    pub fn try_consume(&mut self) -> bool {
        self.limiter.try_consume()
    }

    /// Time elapsed since the client was last seen.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }
}

/// Thread-safe registry of per-client limiter state.
///
/// Cloning is cheap and every clone shares the same map, so the registry can
/// be stored in the axum application state and handed to the sweeper task.
///
/// # Thread Safety
///
/// A single `tokio::sync::Mutex` covers lookup, insertion, touching and
/// eviction. Two concurrent requests from the same client are therefore
/// serialized and can never observe the same token balance.
#[derive(Debug, Clone)]
pub struct ClientRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

#[derive(Debug)]
struct RegistryInner {
    /// Per-client limiter state, keyed by client identity.
    clients: HashMap<String, ClientState>,

    /// Token replenishment rate handed to new buckets.
    rate: f64,

    /// Capacity handed to new buckets.
    burst: u32,
}

/// Exclusive access to the registry map.
///
/// Holding a `Clients` holds the registry lock; drop it before doing any
/// I/O or invoking a downstream handler.
#[derive(Debug)]
pub struct Clients<'a> {
    inner: MutexGuard<'a, RegistryInner>,
}

impl Clients<'_> {
    /// Returns the state for `identity`, inserting a fresh full bucket if the
    /// client is unknown.
    pub fn get_or_create(&mut self, identity: &str) -> &mut ClientState {
        let RegistryInner {
            clients,
            rate,
            burst,
        } = &mut *self.inner;

        clients
            .entry(identity.to_string())
            .or_insert_with(|| ClientState::new(*rate, *burst))
    }

    /// Updates the last-seen instant of `identity`.
    ///
    /// Returns the touched state, or `None` when the client is not tracked.
    pub fn touch(&mut self, identity: &str) -> Option<&mut ClientState> {
        let client = self.inner.clients.get_mut(identity)?;
        client.touch();
        Some(client)
    }

    /// Number of tracked clients.
    pub fn len(&self) -> usize {
        self.inner.clients.len()
    }

    /// Returns `true` when no client is tracked.
    pub fn is_empty(&self) -> bool {
        self.inner.clients.is_empty()
    }
}

impl ClientRegistry {
    /// Creates an empty registry whose buckets refill at `rate` tokens per
    /// second and hold at most `burst` tokens.
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                clients: HashMap::new(),
                rate,
                burst,
            })),
        }
    }

    /// Acquires the registry lock.
    pub async fn lock(&self) -> Clients<'_> {
        Clients {
            inner: self.inner.lock().await,
        }
    }

    /// Admission check for one request from `identity`.
    ///
    /// Within one critical section this creates the client if absent,
    /// touches it (whatever the outcome) and tries to consume a token.
    pub async fn check(&self, identity: &str) -> bool {
        let mut clients = self.lock().await;

        clients.get_or_create(identity);
        clients
            .touch(identity)
            .is_some_and(|client| client.try_consume())
    }

    /// Removes every client idle for longer than `idle_threshold`.
    ///
    /// # Returns
    ///
    /// The number of clients that were removed.
    pub async fn sweep(&self, idle_threshold: Duration) -> usize {
        let mut inner = self.inner.lock().await;
        let initial_count = inner.clients.len();

        inner
            .clients
            .retain(|_, client| client.idle_for() <= idle_threshold);

        initial_count - inner.clients.len()
    }

    /// Returns the current number of tracked clients.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.clients.len()
    }

    /// Returns `true` when no client is tracked.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.clients.is_empty()
    }

    /// Returns `true` if `identity` currently has limiter state.
    pub async fn contains(&self, identity: &str) -> bool {
        self.inner.lock().await.clients.contains_key(identity)
    }

    /// Spawns a background task that sweeps the registry every `interval`,
    /// evicting clients idle for longer than `idle_threshold`.
    ///
    /// The first sweep happens one full interval after the call. Intervals
    /// longer than [`MAX_SWEEP_INTERVAL`] are clamped to it. The task never
    /// finishes on its own; abort the returned handle on shutdown.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use greenlight_server::rate_limit::ClientRegistry;
    /// use std::time::Duration;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let registry = ClientRegistry::new(2.0, 4);
    ///     let sweeper = registry.spawn_sweeper(
    ///         Duration::from_secs(60),
    ///         Duration::from_secs(180),
    ///     );
    ///
    ///     // Server runs...
    ///
    ///     sweeper.abort();
    /// }
    /// ```
    pub fn spawn_sweeper(&self, interval: Duration, idle_threshold: Duration) -> JoinHandle<()> {
        let registry = self.clone();

        let interval = if interval > MAX_SWEEP_INTERVAL {
            warn!(
                requested_secs = interval.as_secs(),
                max_secs = MAX_SWEEP_INTERVAL.as_secs(),
                "Sweep interval too long, clamping"
            );
            MAX_SWEEP_INTERVAL
        } else {
            interval
        };

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let removed = registry.sweep(idle_threshold).await;
                if removed > 0 {
                    debug!(removed_count = removed, "Evicted idle rate limit clients");
                }
            }
        })
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_RPS, DEFAULT_BURST)
    }
}
