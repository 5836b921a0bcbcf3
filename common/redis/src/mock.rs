use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::{Client, CustomRedisError, MessageStream};

const PUBSUB_CAPACITY: usize = 1024;

/// In-memory stand-in for a redis server.
///
/// Clones share the same keyspace, pub/sub bus and call log, so two clones
/// handed to two cache instances behave like two processes talking to one
/// redis. `set_unavailable(true)` makes every operation fail the way a dead
/// connection would, and `set_latency` slows every operation down.
#[derive(Clone)]
pub struct MockRedisClient {
    store: Arc<Mutex<HashMap<String, String>>>,
    unavailable: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
    bus: Arc<Mutex<broadcast::Sender<(String, String)>>>,
    calls: Arc<Mutex<Vec<MockRedisCall>>>,
}

impl Default for MockRedisClient {
    fn default() -> Self {
        let (bus, _) = broadcast::channel(PUBSUB_CAPACITY);
        Self {
            store: Arc::new(Mutex::new(HashMap::new())),
            unavailable: Arc::new(AtomicBool::new(false)),
            latency_ms: Arc::new(AtomicU64::new(0)),
            bus: Arc::new(Mutex::new(bus)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MockRedisClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Seed a value directly, bypassing the call log.
    pub fn insert(&self, key: &str, value: &str) {
        lock(&self.store).insert(key.to_owned(), value.to_owned());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        lock(&self.store).contains_key(key)
    }

    /// Ends every open subscription stream, as a dropped pub/sub connection
    /// would. Later `subscribe` calls work as normal.
    pub fn disconnect_subscribers(&self) {
        let (bus, _) = broadcast::channel(PUBSUB_CAPACITY);
        *lock(&self.bus) = bus;
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        lock(&self.calls).clone()
    }

    /// Logs the call, then applies the configured latency and outage.
    async fn call(
        &self,
        op: &str,
        key: String,
        value: MockRedisValue,
    ) -> Result<(), CustomRedisError> {
        lock(&self.calls).push(MockRedisCall {
            op: op.to_string(),
            key,
            value,
        });
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CustomRedisError::Other("connection refused".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRedisValue {
    None,
    String(String),
    StringWithTTL(String, u64),
    VecString(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRedisCall {
    pub op: String,
    pub key: String,
    pub value: MockRedisValue,
}

#[async_trait]
impl Client for MockRedisClient {
    async fn get(&self, key: String) -> Result<String, CustomRedisError> {
        self.call("get", key.clone(), MockRedisValue::None).await?;

        match lock(&self.store).get(&key) {
            Some(value) => Ok(value.clone()),
            None => Err(CustomRedisError::NotFound),
        }
    }

    async fn setex(&self, key: String, value: String, seconds: u64) -> Result<(), CustomRedisError> {
        self.call(
            "setex",
            key.clone(),
            MockRedisValue::StringWithTTL(value.clone(), seconds),
        )
        .await?;

        lock(&self.store).insert(key, value);
        Ok(())
    }

    async fn batch_del(&self, keys: Vec<String>) -> Result<(), CustomRedisError> {
        self.call(
            "batch_del",
            keys.join(","),
            MockRedisValue::VecString(keys.clone()),
        )
        .await?;

        let mut store = lock(&self.store);
        for key in keys {
            store.remove(&key);
        }
        Ok(())
    }

    async fn publish(&self, channel: String, message: String) -> Result<(), CustomRedisError> {
        self.call(
            "publish",
            channel.clone(),
            MockRedisValue::String(message.clone()),
        )
        .await?;

        // no subscribers is not an error, same as PUBLISH returning 0
        if lock(&self.bus).send((channel, message)).is_err() {
            tracing::trace!("published with no subscribers");
        }
        Ok(())
    }

    async fn subscribe(&self, channel: String) -> Result<MessageStream, CustomRedisError> {
        self.call("subscribe", channel.clone(), MockRedisValue::None).await?;

        let rx = lock(&self.bus).subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(message) => return Some((message, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter_map(move |(published_on, payload)| {
            let wanted = published_on == channel;
            async move { wanted.then_some(payload) }
        });

        Ok(stream.boxed())
    }
}
