//! Publishing the winch depth/velocity to a key-value store.

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default key the payload is stored under.
pub const DEFAULT_KEY: &str = "depth-encoder";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// JSON has no NaN or infinity; serde_json would write `null`.
    #[error("non-finite payload (depth={depth}, velocity={velocity})")]
    NonFinite { depth: f64, velocity: f64 },
}

/// `{"depth": <f>, "velocity": <f>}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncoderPayload {
    pub depth: f64,
    pub velocity: f64,
}

impl EncoderPayload {
    pub fn to_json(&self) -> Result<String, PublishError> {
        if !(self.depth.is_finite() && self.velocity.is_finite()) {
            return Err(PublishError::NonFinite {
                depth: self.depth,
                velocity: self.velocity,
            });
        }
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, PublishError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Where payloads go. Last value wins; there is no history.
#[async_trait]
pub trait PublishSink: Send + 'static {
    async fn publish(&mut self, key: &str, payload: &str) -> Result<(), PublishError>;
}

/// `SET key payload` on a Redis server.
pub struct RedisPublisher {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisPublisher {
    pub async fn connect(url: &str) -> Result<Self, PublishError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        tracing::info!(url = %url, "Connected to Redis");
        Ok(Self { conn })
    }

    /// Read back the payload currently stored under `key`, if any.
    pub async fn latest(&mut self, key: &str) -> Result<Option<EncoderPayload>, PublishError> {
        let text: Option<String> = self.conn.get(key).await?;
        text.as_deref().map(EncoderPayload::from_json).transpose()
    }
}

#[async_trait]
impl PublishSink for RedisPublisher {
    async fn publish(&mut self, key: &str, payload: &str) -> Result<(), PublishError> {
        self.conn.set::<_, _, ()>(key, payload).await?;
        Ok(())
    }
}
