use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CustomRedisError {
    #[error("Not found in redis")]
    NotFound,
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Timeout error")]
    Timeout,
    #[error("Redis unavailable: {0}")]
    Other(String),
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
}

impl From<redis::RedisError> for CustomRedisError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CustomRedisError::Timeout
        } else {
            CustomRedisError::Redis(Arc::new(err))
        }
    }
}

impl From<std::string::FromUtf8Error> for CustomRedisError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        CustomRedisError::ParseError(err.to_string())
    }
}

impl CustomRedisError {
    /// Whether this error means the key simply isn't there, as opposed to
    /// redis being slow, broken or unreachable.
    pub fn is_miss(&self) -> bool {
        matches!(self, CustomRedisError::NotFound)
    }
}

/// Payloads delivered to a channel subscriber, in publish order.
pub type MessageStream = BoxStream<'static, String>;

#[async_trait]
pub trait Client {
    async fn get(&self, k: String) -> Result<String, CustomRedisError>;
    async fn setex(&self, k: String, v: String, seconds: u64) -> Result<(), CustomRedisError>;
    async fn batch_del(&self, keys: Vec<String>) -> Result<(), CustomRedisError>;

    /// Publish `message` on `channel`. Delivery is best effort: subscribers that
    /// are disconnected when the message is sent never see it.
    async fn publish(&self, channel: String, message: String) -> Result<(), CustomRedisError>;

    /// Subscribe to `channel`. The subscription is active once this returns,
    /// so anything published afterwards shows up on the stream.
    async fn subscribe(&self, channel: String) -> Result<MessageStream, CustomRedisError>;
}

mod client;
mod mock;

pub use client::RedisClient;
pub use mock::{MockRedisCall, MockRedisClient, MockRedisValue};
