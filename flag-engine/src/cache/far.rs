use common_redis::{Client as RedisClient, CustomRedisError, MessageStream};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Shared tier backed by redis. Values are stored as JSON.
///
/// Every call is bounded by `timeout`; a slow redis reads as
/// [`CustomRedisError::Timeout`] rather than stalling evaluation.
#[derive(Clone)]
pub struct FarTier {
    client: Arc<dyn RedisClient + Send + Sync>,
    ttl_seconds: u64,
    timeout: Duration,
}

impl FarTier {
    pub fn new(
        client: Arc<dyn RedisClient + Send + Sync>,
        ttl_seconds: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            ttl_seconds,
            timeout,
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, CustomRedisError>
    where
        F: Future<Output = Result<T, CustomRedisError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CustomRedisError::Timeout),
        }
    }

    /// `Err(NotFound)` on a miss. Undecodable data is a `ParseError`.
    pub async fn get<V>(&self, key: &str) -> Result<V, CustomRedisError>
    where
        V: DeserializeOwned,
    {
        let raw = self.bounded(self.client.get(key.to_string())).await?;
        serde_json::from_str(&raw).map_err(|e| {
            CustomRedisError::ParseError(format!("Failed to deserialize cached value: {e}"))
        })
    }

    pub async fn set<V>(&self, key: &str, value: &V) -> Result<(), CustomRedisError>
    where
        V: Serialize,
    {
        let serialized = serde_json::to_string(value).map_err(|e| {
            CustomRedisError::ParseError(format!("Failed to serialize value for cache: {e}"))
        })?;
        self.bounded(
            self.client
                .setex(key.to_string(), serialized, self.ttl_seconds),
        )
        .await
    }

    pub async fn delete(&self, keys: Vec<String>) -> Result<(), CustomRedisError> {
        if keys.is_empty() {
            return Ok(());
        }
        self.bounded(self.client.batch_del(keys)).await
    }

    pub async fn publish(&self, channel: &str, message: String) -> Result<(), CustomRedisError> {
        self.bounded(self.client.publish(channel.to_string(), message))
            .await
    }

    /// Not bounded by the per-call timeout: establishing a subscription is a
    /// startup step, not part of a request.
    pub async fn subscribe(&self, channel: &str) -> Result<MessageStream, CustomRedisError> {
        self.client.subscribe(channel.to_string()).await
    }
}
