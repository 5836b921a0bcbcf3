use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::warn;

use crate::{Client, CustomRedisError, MessageStream};

pub struct RedisClient {
    client: redis::Client,
    connection: MultiplexedConnection,
}

impl RedisClient {
    /// Connects with optional per-command and connect timeouts. `None`
    /// waits forever; a zero duration is rejected as misconfiguration.
    pub async fn with_config(
        addr: String,
        response_timeout: Option<Duration>,
        connection_timeout: Option<Duration>,
    ) -> Result<RedisClient, CustomRedisError> {
        let client = redis::Client::open(addr)?;

        let mut config = redis::AsyncConnectionConfig::new();
        if let Some(timeout) = non_zero("response", response_timeout)? {
            config = config.set_response_timeout(timeout);
        }
        if let Some(timeout) = non_zero("connection", connection_timeout)? {
            config = config.set_connection_timeout(timeout);
        }

        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;

        Ok(RedisClient { client, connection })
    }
}

fn non_zero(
    name: &str,
    timeout: Option<Duration>,
) -> Result<Option<Duration>, CustomRedisError> {
    match timeout {
        Some(timeout) if timeout.is_zero() => Err(CustomRedisError::InvalidConfiguration(
            format!("redis {name} timeout can't be zero, use None to wait forever"),
        )),
        timeout => Ok(timeout),
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn get(&self, k: String) -> Result<String, CustomRedisError> {
        let mut conn = self.connection.clone();
        let result: Option<Vec<u8>> = conn.get(k).await?;

        match result {
            Some(bytes) if !bytes.is_empty() => Ok(String::from_utf8(bytes)?),
            _ => Err(CustomRedisError::NotFound),
        }
    }

    async fn setex(&self, k: String, v: String, seconds: u64) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(k, v, seconds).await?;
        Ok(())
    }

    async fn batch_del(&self, keys: Vec<String>) -> Result<(), CustomRedisError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(keys).await?;
        Ok(())
    }

    async fn publish(&self, channel: String, message: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.publish::<_, _, ()>(channel, message).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: String) -> Result<MessageStream, CustomRedisError> {
        // pub/sub needs a dedicated connection, the multiplexed one can't be put in subscriber mode
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel.as_str()).await?;

        let stream = pubsub.into_on_message().filter_map(move |msg| {
            let channel = channel.clone();
            async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "Dropping undecodable pub/sub payload");
                        None
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}
