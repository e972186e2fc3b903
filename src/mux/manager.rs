use super::client::{
    ClientId, Destination, DialerClientFactory, DialerClientHandle, StreamSettings,
};
use crate::config::{MultiplexingConfig, MuxMode};
use crate::utils::error::{MuxError, Result};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Eviction uses a strict `>` on age, so wake a hair after the boundary.
const EXPIRY_GRACE: Duration = Duration::from_millis(1);

/// A live dialer client together with its bookkeeping.
struct PoolEntry<C> {
    id: ClientId,
    client: Arc<C>,
    usage: u32,
    created_at: Instant,
    allotted_lifetime: Duration,
}

impl<C> PoolEntry<C> {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    fn is_reusable(&self, concurrency_cap: u32, now: Instant) -> bool {
        self.usage < concurrency_cap && self.age(now) <= self.allotted_lifetime
    }

    fn is_expired(&self, max_age: Duration, now: Instant) -> bool {
        self.age(now) > max_age
    }
}

/// Pool contents, kept in insertion order so the oldest client is tried first.
struct PoolState<C> {
    entries: Vec<PoolEntry<C>>,
    next_id: u64,
}

impl<C> PoolState<C> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    fn remove_expired(&mut self, max_age: Duration, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| {
            if entry.is_expired(max_age, now) {
                debug!(
                    client = %entry.id,
                    age = ?entry.age(now),
                    usage = entry.usage,
                    "Evicting expired dialer client"
                );
                false
            } else {
                true
            }
        });
        before - self.entries.len()
    }

    fn try_reuse(&mut self, concurrency_cap: u32, now: Instant) -> Option<DialerClientHandle<C>> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.is_reusable(concurrency_cap, now))?;

        entry.usage += 1;
        trace!(client = %entry.id, usage = entry.usage, "Reusing dialer client");
        Some(DialerClientHandle::pooled(entry.id, Arc::clone(&entry.client)))
    }

    /// Time until the next entry becomes eligible for eviction.
    fn next_expiry(&self, max_age: Duration, now: Instant) -> Option<Duration> {
        self.entries
            .iter()
            .map(|entry| (entry.created_at + max_age).saturating_duration_since(now))
            .min()
            .map(|remaining| remaining + EXPIRY_GRACE)
    }
}

/// Decides, for every new logical stream, which dialer client carries it.
///
/// All pool reads and writes happen under one mutex. A dial that finds
/// nothing usable releases the lock and waits until the pool changes, the
/// upload delay passes, the oldest client expires, or the caller cancels.
pub struct MuxManager<F: DialerClientFactory> {
    factory: F,
    config: RwLock<MultiplexingConfig>,
    state: Mutex<PoolState<F::Client>>,
    changed: Notify,
}

impl<F: DialerClientFactory> MuxManager<F> {
    /// Create an empty pool bound to `config`
    ///
    /// # Arguments
    /// * `config` - Multiplexing settings, observed live on every decision
    /// * `factory` - Builds new dialer clients when the pool grows
    pub fn new(config: MultiplexingConfig, factory: F) -> Self {
        Self {
            factory,
            config: RwLock::new(config),
            state: Mutex::new(PoolState::new()),
            changed: Notify::new(),
        }
    }

    /// Factory used for new dialer clients
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Snapshot of the current multiplexing config
    pub async fn config(&self) -> MultiplexingConfig {
        self.config.read().await.clone()
    }

    /// Swap the multiplexing config; later decisions observe the new values.
    pub async fn update_config(&self, config: MultiplexingConfig) {
        debug!(mode = %config.mode, max_connections = config.max_connections, "Updating mux config");
        *self.config.write().await = config;
        self.changed.notify_waiters();
    }

    /// Hand out a dialer client for a new logical stream.
    ///
    /// # Arguments
    /// * `cancel` - Ends a dial that is waiting for a free slot
    /// * `destination` - Target the new stream tunnels to
    /// * `settings` - Transport settings; the upload delay sets backoff and allotted lifetime
    ///
    /// # Returns
    /// A pooled handle (reused or new), or an unpooled one when multiplexing is disabled
    pub async fn dial(
        &self,
        cancel: &CancellationToken,
        destination: &Destination,
        settings: &StreamSettings,
    ) -> Result<DialerClientHandle<F::Client>> {
        loop {
            if cancel.is_cancelled() {
                return Err(MuxError::Cancelled);
            }

            // Register interest before reading the config or the pool so a
            // change made between our check and the wait is not lost.
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let config = self.config.read().await.clone();
            debug!(%destination, mode = %config.mode, "Mux dial");

            let next_expiry = {
                let mut state = self.state.lock().await;
                if !state.entries.is_empty() {
                    self.sweep(&mut state, &config);
                }

                if config.mode == MuxMode::Disabled {
                    drop(state);
                    return self.dial_unpooled(destination, settings).await;
                }

                let attempt = if config.mode == MuxMode::PreferNew {
                    self.dial_prefer_new(&mut state, &config, destination, settings)
                        .await?
                } else {
                    self.dial_prefer_existing(&mut state, &config, destination, settings)
                        .await?
                };

                if let Some(handle) = attempt {
                    return Ok(handle);
                }

                debug!(
                    %destination,
                    total_conns = state.entries.len(),
                    "No dialer client available"
                );
                state.next_expiry(config.eviction_age(), Instant::now())
            };

            self.wait_for_change(cancel, changed, settings, next_expiry)
                .await?;
        }
    }

    async fn dial_unpooled(
        &self,
        destination: &Destination,
        settings: &StreamSettings,
    ) -> Result<DialerClientHandle<F::Client>> {
        let client = self.factory.create_client(destination, settings).await?;
        trace!(%destination, "Created unpooled dialer client");
        Ok(DialerClientHandle::unpooled(client))
    }

    async fn dial_prefer_existing(
        &self,
        state: &mut PoolState<F::Client>,
        config: &MultiplexingConfig,
        destination: &Destination,
        settings: &StreamSettings,
    ) -> Result<Option<DialerClientHandle<F::Client>>> {
        if let Some(handle) = state.try_reuse(config.concurrency_cap(), Instant::now()) {
            return Ok(Some(handle));
        }

        if config.is_saturated(state.entries.len()) {
            return Ok(None);
        }

        self.create_connection(state, destination, settings)
            .await
            .map(Some)
    }

    async fn dial_prefer_new(
        &self,
        state: &mut PoolState<F::Client>,
        config: &MultiplexingConfig,
        destination: &Destination,
        settings: &StreamSettings,
    ) -> Result<Option<DialerClientHandle<F::Client>>> {
        if !config.is_saturated(state.entries.len()) {
            return self
                .create_connection(state, destination, settings)
                .await
                .map(Some);
        }

        Ok(state.try_reuse(config.concurrency_cap(), Instant::now()))
    }

    async fn create_connection(
        &self,
        state: &mut PoolState<F::Client>,
        destination: &Destination,
        settings: &StreamSettings,
    ) -> Result<DialerClientHandle<F::Client>> {
        let client = Arc::new(self.factory.create_client(destination, settings).await?);

        let id = ClientId(state.next_id);
        state.next_id += 1;

        let allotted_lifetime = settings.transport.normalized_upload_delay();
        state.entries.push(PoolEntry {
            id,
            client: Arc::clone(&client),
            usage: 1,
            created_at: Instant::now(),
            allotted_lifetime,
        });

        debug!(
            client = %id,
            %destination,
            ?allotted_lifetime,
            total_conns = state.entries.len(),
            "Created dialer client"
        );
        self.changed.notify_waiters();

        Ok(DialerClientHandle::pooled(id, client))
    }

    async fn wait_for_change(
        &self,
        cancel: &CancellationToken,
        changed: Pin<&mut impl Future<Output = ()>>,
        settings: &StreamSettings,
        next_expiry: Option<Duration>,
    ) -> Result<()> {
        let delay = settings.transport.normalized_upload_delay();
        let bound = match next_expiry {
            Some(expiry) if !delay.is_zero() => Some(delay.min(expiry)),
            Some(expiry) => Some(expiry),
            None if !delay.is_zero() => Some(delay),
            None => None,
        };
        trace!(?bound, "Waiting for pool change");

        let timer = async move {
            match bound {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(MuxError::Cancelled),
            _ = changed => Ok(()),
            _ = timer => Ok(()),
        }
    }

    fn sweep(&self, state: &mut PoolState<F::Client>, config: &MultiplexingConfig) -> usize {
        let removed = state.remove_expired(config.eviction_age(), Instant::now());
        if removed > 0 {
            debug!(removed, total_conns = state.entries.len(), "Expiry sweep");
            self.changed.notify_waiters();
        }
        removed
    }

    /// Evict every client older than the configured lifetime upper bound.
    pub async fn remove_expired_connections(&self) -> usize {
        let config = self.config.read().await.clone();
        let mut state = self.state.lock().await;
        self.sweep(&mut state, &config)
    }

    /// A logical stream on `handle` has finished.
    pub async fn release(&self, handle: &DialerClientHandle<F::Client>) {
        let Some(id) = handle.id() else {
            return;
        };

        let mut state = self.state.lock().await;
        if let Some(entry) = state.entries.iter_mut().find(|entry| entry.id == id) {
            entry.usage = entry.usage.saturating_sub(1);
            trace!(client = %id, usage = entry.usage, "Released dialer client");
        }
        drop(state);

        self.changed.notify_waiters();
    }

    /// Drop a client the caller found broken. Returns whether it was pooled.
    pub async fn discard(&self, handle: &DialerClientHandle<F::Client>) -> bool {
        let Some(id) = handle.id() else {
            return false;
        };

        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state.entries.retain(|entry| entry.id != id);
        let removed = state.entries.len() != before;
        drop(state);

        if removed {
            debug!(client = %id, "Discarded dialer client");
            self.changed.notify_waiters();
        }
        removed
    }

    /// Number of live pooled dialer clients.
    pub async fn total_conns(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Get pool statistics
    ///
    /// # Returns
    /// Per-client usage and age plus pool-wide totals
    pub async fn stats(&self) -> MuxStats {
        let config = self.config.read().await.clone();
        let state = self.state.lock().await;
        let now = Instant::now();

        let entries: Vec<EntryStats> = state
            .entries
            .iter()
            .map(|entry| EntryStats {
                id: entry.id,
                usage: entry.usage,
                age_ms: duration_millis(entry.age(now)),
                allotted_lifetime_ms: duration_millis(entry.allotted_lifetime),
            })
            .collect();

        MuxStats {
            mode: config.mode,
            max_connections: config.max_connections,
            total_conns: entries.len(),
            total_usage: entries.iter().map(|entry| entry.usage as u64).sum(),
            entries,
        }
    }
}

impl<F: DialerClientFactory + 'static> MuxManager<F> {
    /// Run the expiry sweep every `interval` until `cancel` fires.
    pub fn spawn_expiry_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = manager.remove_expired_connections().await;
                        if removed > 0 {
                            trace!(removed, "Periodic sweep evicted dialer clients");
                        }
                    }
                }
            }
        })
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Point-in-time view of one pooled client.
#[derive(Debug, Clone, Serialize)]
pub struct EntryStats {
    pub id: ClientId,
    pub usage: u32,
    pub age_ms: u64,
    pub allotted_lifetime_ms: u64,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Serialize)]
pub struct MuxStats {
    pub mode: MuxMode,
    pub max_connections: u32,
    pub total_conns: usize,
    pub total_usage: u64,
    pub entries: Vec<EntryStats>,
}

impl MuxStats {
    /// Stats for the pooled client `id`, if it is still live
    pub fn entry(&self, id: ClientId) -> Option<&EntryStats> {
        self.entries.iter().find(|entry| entry.id == id)
    }
}
