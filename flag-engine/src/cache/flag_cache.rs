use common_redis::{
    Client as RedisClient, CustomRedisError, MessageStream, RedisClient as LiveRedisClient,
};
use futures::StreamExt;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::{
    CacheKeys, CacheResult, CacheSource, CacheStats, CacheStatsSnapshot, FarTier,
    InvalidationEvent, InvalidationMessage, NearTier,
};
use crate::config::Config;
use crate::errors::FlagError;
use crate::flags::flag_models::{FeatureFlag, FlagOverride};
use crate::metrics_consts::{
    FLAG_CACHE_FAR_ERRORS_COUNTER, FLAG_CACHE_READS_COUNTER,
    FLAG_INVALIDATION_PUBLISH_ERRORS_COUNTER,
};
use crate::repository::FlagRepository;

const FAR_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);
const RESUBSCRIBE_BACKOFF_MIN: Duration = Duration::from_millis(50);
const RESUBSCRIBE_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Tunables for one [`FlagCache`], normally built from [`Config`].
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub near_ttl: Duration,
    pub near_max_entries: u64,
    pub far_ttl_seconds: u64,
    pub far_timeout: Duration,
    pub repository_timeout: Duration,
    pub sweep_interval: Duration,
    pub listener_capacity: usize,
    pub key_prefix: String,
}

impl From<&Config> for CacheSettings {
    fn from(config: &Config) -> Self {
        Self {
            near_ttl: config.near_cache_ttl(),
            near_max_entries: config.near_cache_max_entries,
            far_ttl_seconds: config.far_cache_ttl_seconds,
            far_timeout: config.far_cache_timeout(),
            repository_timeout: config.repository_timeout(),
            sweep_interval: config.sweep_interval(),
            listener_capacity: config.invalidation_listener_capacity,
            key_prefix: config.cache_key_prefix.clone(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from(&Config::default_test_config())
    }
}

#[derive(Debug, Clone)]
enum NearEntry {
    // None is a remembered "does not exist"
    Flag(Option<FeatureFlag>),
    AllFlags(Vec<FeatureFlag>),
    Overrides(Vec<FlagOverride>),
}

/// A value that can live in both tiers.
trait TierValue: Serialize + DeserializeOwned + Clone {
    fn into_entry(self) -> NearEntry;
    fn from_entry(entry: NearEntry) -> Option<Self>;

    /// Whether the value may be written to the far tier.
    fn shareable(&self) -> bool {
        true
    }
}

impl TierValue for Option<FeatureFlag> {
    fn into_entry(self) -> NearEntry {
        NearEntry::Flag(self)
    }

    fn from_entry(entry: NearEntry) -> Option<Self> {
        match entry {
            NearEntry::Flag(flag) => Some(flag),
            _ => None,
        }
    }

    // a missing flag is only remembered locally; peers must not inherit it
    fn shareable(&self) -> bool {
        self.is_some()
    }
}

impl TierValue for Vec<FeatureFlag> {
    fn into_entry(self) -> NearEntry {
        NearEntry::AllFlags(self)
    }

    fn from_entry(entry: NearEntry) -> Option<Self> {
        match entry {
            NearEntry::AllFlags(flags) => Some(flags),
            _ => None,
        }
    }
}

impl TierValue for Vec<FlagOverride> {
    fn into_entry(self) -> NearEntry {
        NearEntry::Overrides(self)
    }

    fn from_entry(entry: NearEntry) -> Option<Self> {
        match entry {
            NearEntry::Overrides(overrides) => Some(overrides),
            _ => None,
        }
    }
}

/// Read-through, write-through cache in front of a [`FlagRepository`].
///
/// Reads go near tier, then far tier (a far hit repopulates near), then the
/// repository. Far-tier trouble is logged and skipped, never returned.
/// Writes and invalidations are published so peers drop their near copies
/// before TTL expiry.
///
/// Background tasks are opt-in: call [`FlagCache::start_invalidation_listener`]
/// and [`FlagCache::start_sweeper`], keep the handles, and call
/// [`FlagCache::shutdown`] to stop them.
pub struct FlagCache {
    repository: Arc<dyn FlagRepository>,
    near: NearTier<NearEntry>,
    far: Option<FarTier>,
    keys: CacheKeys,
    settings: CacheSettings,
    stats: CacheStats,
    instance_id: Uuid,
    listeners: broadcast::Sender<InvalidationEvent>,
    shutdown: CancellationToken,
}

impl FlagCache {
    pub fn new(
        settings: CacheSettings,
        repository: Arc<dyn FlagRepository>,
        far_client: Option<Arc<dyn RedisClient + Send + Sync>>,
    ) -> Self {
        let far = far_client
            .map(|client| FarTier::new(client, settings.far_ttl_seconds, settings.far_timeout));
        let (listeners, _) = broadcast::channel(settings.listener_capacity.max(1));

        Self {
            repository,
            near: NearTier::new(settings.near_max_entries, settings.near_ttl),
            far,
            keys: CacheKeys::new(settings.key_prefix.clone()),
            settings,
            stats: CacheStats::default(),
            instance_id: Uuid::new_v4(),
            listeners,
            shutdown: CancellationToken::new(),
        }
    }

    /// Connects to redis when the far tier is enabled. If the connection
    /// can't be made the cache runs near-only.
    pub async fn from_config(config: &Config, repository: Arc<dyn FlagRepository>) -> Self {
        let settings = CacheSettings::from(config);
        if !*config.far_cache_enabled {
            info!("Far cache disabled, caching in-process only");
            return Self::new(settings, repository, None);
        }

        match LiveRedisClient::with_config(
            config.redis_url.clone(),
            Some(settings.far_timeout),
            Some(FAR_CONNECT_TIMEOUT),
        )
        .await
        {
            Ok(client) => {
                info!("Connected far cache");
                Self::new(settings, repository, Some(Arc::new(client)))
            }
            Err(e) => {
                warn!(error = %e, "Failed to connect far cache, caching in-process only");
                Self::new(settings, repository, None)
            }
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn repository_timeout(&self) -> Duration {
        self.settings.repository_timeout
    }

    /// `value` is `None` when the flag doesn't exist.
    pub async fn get_flag(&self, key: &str) -> Result<CacheResult<Option<FeatureFlag>>, FlagError> {
        let repository = Arc::clone(&self.repository);
        self.read_through(self.keys.flag(key), || async move {
            repository.get_flag_by_key(key).await
        })
        .await
    }

    pub async fn get_all_flags(&self) -> Result<CacheResult<Vec<FeatureFlag>>, FlagError> {
        let repository = Arc::clone(&self.repository);
        self.read_through(self.keys.all_flags(), || async move {
            repository.get_all_flags().await
        })
        .await
    }

    /// Every override stored for the flag. Expiry is left to the caller.
    pub async fn get_overrides(
        &self,
        flag_key: &str,
    ) -> Result<CacheResult<Vec<FlagOverride>>, FlagError> {
        let repository = Arc::clone(&self.repository);
        self.read_through(self.keys.overrides(flag_key), || async move {
            repository.get_overrides_for_flag(flag_key).await
        })
        .await
    }

    async fn read_through<V, F, Fut>(
        &self,
        cache_key: String,
        loader: F,
    ) -> Result<CacheResult<V>, FlagError>
    where
        V: TierValue,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FlagError>>,
    {
        self.stats.record_request();

        if let Some(value) = self.near.get(&cache_key).and_then(V::from_entry) {
            self.stats.record_near_hit();
            return Ok(track(CacheResult::new(value, CacheSource::NearCache)));
        }
        self.stats.record_near_miss();

        let mut far_unavailable = false;
        if let Some(far) = &self.far {
            match far.get::<V>(&cache_key).await {
                Ok(value) => {
                    self.stats.record_far_hit();
                    self.near.insert(cache_key, value.clone().into_entry());
                    return Ok(track(CacheResult::new(value, CacheSource::FarCache)));
                }
                Err(CustomRedisError::NotFound) => self.stats.record_far_miss(),
                Err(CustomRedisError::ParseError(e)) => {
                    // overwritten below with a fresh copy
                    self.stats.record_far_miss();
                    warn!(key = %cache_key, error = %e, "Corrupted far cache entry, reloading");
                }
                Err(e) => {
                    self.stats.record_far_error();
                    metrics::counter!(FLAG_CACHE_FAR_ERRORS_COUNTER, "op" => "get").increment(1);
                    warn!(key = %cache_key, error = %e, "Far cache unavailable, reading from repository");
                    far_unavailable = true;
                }
            }
        }

        let value = self.load(loader()).await?;
        self.near.insert(cache_key.clone(), value.clone().into_entry());
        if !far_unavailable && value.shareable() {
            self.write_far(&cache_key, &value).await;
        }

        let source = if far_unavailable {
            CacheSource::LoaderFarUnavailable
        } else {
            CacheSource::LoaderCacheMiss
        };
        Ok(track(CacheResult::new(value, source)))
    }

    async fn load<V, Fut>(&self, fut: Fut) -> Result<V, FlagError>
    where
        Fut: Future<Output = Result<V, FlagError>>,
    {
        self.stats.record_repository_load();
        let result = match tokio::time::timeout(self.settings.repository_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(FlagError::Timeout("repository")),
        };
        if let Err(e) = &result {
            self.stats.record_repository_error();
            warn!(error = %e, "Repository load failed");
        }
        result
    }

    async fn write_far<V: Serialize>(&self, cache_key: &str, value: &V) {
        if let Some(far) = &self.far {
            if let Err(e) = far.set(cache_key, value).await {
                self.stats.record_far_error();
                metrics::counter!(FLAG_CACHE_FAR_ERRORS_COUNTER, "op" => "set").increment(1);
                warn!(key = %cache_key, error = %e, "Failed to write far cache");
            }
        }
    }

    /// Stores `flag` in both tiers. The cached full list no longer matches,
    /// so it is dropped.
    pub async fn set_flag(&self, flag: &FeatureFlag) {
        let cache_key = self.keys.flag(&flag.key);
        self.near
            .insert(cache_key.clone(), NearEntry::Flag(Some(flag.clone())));
        self.near.invalidate(&self.keys.all_flags());
        self.write_far(&cache_key, flag).await;
        self.delete_far(vec![self.keys.all_flags()]).await;
    }

    pub async fn set_all_flags(&self, flags: &[FeatureFlag]) {
        let cache_key = self.keys.all_flags();
        self.near
            .insert(cache_key.clone(), NearEntry::AllFlags(flags.to_vec()));
        self.write_far(&cache_key, &flags).await;
    }

    pub async fn set_overrides(&self, flag_key: &str, overrides: &[FlagOverride]) {
        let cache_key = self.keys.overrides(flag_key);
        self.near
            .insert(cache_key.clone(), NearEntry::Overrides(overrides.to_vec()));
        self.write_far(&cache_key, &overrides).await;
    }

    /// Invalidates everything derived from `flag`, then caches the new
    /// definition. Used after a successful write.
    pub async fn refresh_flag(&self, flag: &FeatureFlag) {
        self.invalidate_flag(&flag.key).await;
        self.set_flag(flag).await;
    }

    /// Drops the flag, its overrides and the full list from both tiers and
    /// tells peers to do the same.
    pub async fn invalidate_flag(&self, key: &str) {
        let event = InvalidationEvent::Flag(key.to_string());
        self.evict_near(&event);
        self.delete_far(self.keys.for_flag(key)).await;
        self.publish(&event).await;
        self.notify(event);
    }

    /// Clears the near tier, deletes every far entry for the flags the
    /// repository knows about (best effort), and tells peers to clear theirs.
    pub async fn invalidate_all(&self) {
        let event = InvalidationEvent::All;
        self.evict_near(&event);

        if self.far.is_some() {
            let mut keys = vec![self.keys.all_flags()];
            match self.load(self.repository.get_all_flags()).await {
                Ok(flags) => {
                    for flag in &flags {
                        keys.push(self.keys.flag(&flag.key));
                        keys.push(self.keys.overrides(&flag.key));
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Could not enumerate flags, far cache entries will expire on TTL");
                }
            }
            self.delete_far(keys).await;
        }

        self.publish(&event).await;
        self.notify(event);
    }

    async fn delete_far(&self, keys: Vec<String>) {
        if let Some(far) = &self.far {
            if let Err(e) = far.delete(keys).await {
                self.stats.record_far_error();
                metrics::counter!(FLAG_CACHE_FAR_ERRORS_COUNTER, "op" => "delete").increment(1);
                warn!(error = %e, "Failed to delete far cache entries");
            }
        }
    }

    fn evict_near(&self, event: &InvalidationEvent) {
        match event {
            InvalidationEvent::Flag(key) => {
                for cache_key in self.keys.for_flag(key) {
                    self.near.invalidate(&cache_key);
                }
            }
            InvalidationEvent::All => self.near.invalidate_all(),
        }
    }

    /// Fire and forget: if this fails peers converge when their TTL runs out.
    async fn publish(&self, event: &InvalidationEvent) {
        let Some(far) = &self.far else {
            return;
        };

        let message = InvalidationMessage::new(event, self.instance_id);
        let payload = match serde_json::to_string(&message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode invalidation message");
                return;
            }
        };

        match far.publish(&self.keys.channel(), payload).await {
            Ok(()) => self.stats.record_invalidation_published(),
            Err(e) => {
                metrics::counter!(FLAG_INVALIDATION_PUBLISH_ERRORS_COUNTER).increment(1);
                warn!(key = %event.key(), error = %e, "Failed to publish invalidation");
            }
        }
    }

    fn notify(&self, event: InvalidationEvent) {
        if self.listeners.send(event).is_err() {
            trace!("No local invalidation listeners");
        }
    }

    /// Local listeners hear about every invalidation, local or from a peer.
    /// A listener that falls more than the configured capacity behind loses
    /// the oldest events.
    pub fn subscribe_invalidations(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.listeners.subscribe()
    }

    fn handle_invalidation(&self, payload: &str) {
        let message: InvalidationMessage = match serde_json::from_str(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed invalidation message");
                return;
            }
        };

        // already applied when it was published
        if message.origin == self.instance_id {
            return;
        }

        let event = message.event();
        debug!(key = %event.key(), origin = %message.origin, "Received invalidation");
        self.evict_near(&event);
        self.stats.record_invalidation_received();
        self.notify(event);
    }

    /// Subscribes to the invalidation channel and spawns the task that
    /// applies peer invalidations. The subscription is live when this
    /// returns. `Ok(None)` when there is no far tier to listen on.
    ///
    /// If the channel drops the task resubscribes with backoff until
    /// shutdown. Messages sent during the gap are lost, so the near tier is
    /// cleared once the subscription is back.
    pub async fn start_invalidation_listener(
        self: &Arc<Self>,
    ) -> Result<Option<JoinHandle<()>>, FlagError> {
        let Some(far) = &self.far else {
            return Ok(None);
        };

        let mut messages = far.subscribe(&self.keys.channel()).await?;
        let cache = Arc::clone(self);
        let shutdown = self.shutdown.clone();

        Ok(Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    message = messages.next() => match message {
                        Some(payload) => {
                            cache.handle_invalidation(&payload);
                            continue;
                        }
                        None => warn!("Invalidation channel closed, resubscribing"),
                    },
                }

                match cache.resubscribe(&shutdown).await {
                    Some(stream) => {
                        messages = stream;
                        cache.evict_near(&InvalidationEvent::All);
                        cache.notify(InvalidationEvent::All);
                        info!("Resubscribed to invalidations, cleared near cache");
                    }
                    None => break,
                }
            }
            debug!("Invalidation listener stopped");
        })))
    }

    /// Retries the subscription with capped exponential backoff. `None` once
    /// shutdown is requested.
    async fn resubscribe(&self, shutdown: &CancellationToken) -> Option<MessageStream> {
        let far = self.far.as_ref()?;
        let mut backoff = RESUBSCRIBE_BACKOFF_MIN;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep(backoff) => {}
            }
            match far.subscribe(&self.keys.channel()).await {
                Ok(stream) => return Some(stream),
                Err(e) => {
                    warn!(error = %e, retry_in = ?backoff, "Failed to resubscribe to invalidations");
                    backoff = (backoff * 2).min(RESUBSCRIBE_BACKOFF_MAX);
                }
            }
        }
    }

    /// Spawns the task that periodically evicts expired near entries and
    /// exports the stats as gauges.
    pub fn start_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let period = self.settings.sweep_interval.max(MIN_SWEEP_INTERVAL);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        cache.near.sweep();
                        cache.stats.export(cache.near.entry_count());
                    }
                }
            }
            debug!("Cache sweeper stopped");
        })
    }

    /// Stops the background tasks. Reads and writes keep working.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

fn track<V>(result: CacheResult<V>) -> CacheResult<V> {
    metrics::counter!(FLAG_CACHE_READS_COUNTER, "source" => result.source.to_string())
        .increment(1);
    result
}
