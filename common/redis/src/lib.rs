use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

mod client;
mod connection;
mod mock;
mod retry;

pub use client::{RedisClient, RedisConnector};
pub use connection::{ConnectionState, StoreConnection};
pub use mock::{MockConnector, MockRedisCall, MockRedisClient, MockRedisValue};
pub use retry::RetryPolicy;

// Re-export ErrorKind so consumers can construct CustomRedisError in tests
pub use redis::ErrorKind as RedisErrorKind;

#[derive(Error, Debug, Clone)]
pub enum CustomRedisError {
    #[error("not connected to redis")]
    NotConnected,
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Timeout error")]
    Timeout,
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

impl CustomRedisError {
    /// Create a Redis error from an ErrorKind (primarily for testing)
    pub fn from_redis_kind(kind: redis::ErrorKind, description: &'static str) -> Self {
        CustomRedisError::Redis(Arc::new(redis::RedisError::from((kind, description))))
    }

    /// Whether this error means the connection itself is unusable, as opposed to a
    /// single command failing on a healthy connection.
    ///
    /// Connection-level errors are recovered by reconnecting, never by retrying the command.
    pub fn is_connection_error(&self) -> bool {
        match self {
            CustomRedisError::NotConnected | CustomRedisError::Timeout => true,
            CustomRedisError::InvalidConfiguration(_) => false,
            CustomRedisError::Redis(err) => {
                err.kind() == redis::ErrorKind::IoError
                    || err.is_connection_dropped()
                    || err.is_connection_refusal()
                    || err.is_timeout()
            }
        }
    }
}

/// The store commands the service needs, over one multiplexed connection.
#[async_trait]
pub trait Client: Send + Sync {
    async fn lrange(
        &self,
        k: String,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CustomRedisError>;

    async fn rpush(&self, k: String, v: String) -> Result<(), CustomRedisError>;

    async fn ping(&self) -> Result<(), CustomRedisError>;

    /// Ask the server to close the connection once every command issued before it is answered.
    async fn quit(&self) -> Result<(), CustomRedisError>;
}

/// Opens fresh connections for [`StoreConnection`]. Each call is one connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Client>, CustomRedisError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_are_connection_errors() {
        let refused = CustomRedisError::from(redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "Connection refused",
        )));
        assert!(refused.is_connection_error());

        let dropped = CustomRedisError::from(redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "broken pipe",
        )));
        assert!(dropped.is_connection_error());

        let kind = CustomRedisError::from_redis_kind(redis::ErrorKind::IoError, "reset");
        assert!(kind.is_connection_error());
    }

    #[test]
    fn test_command_errors_are_not_connection_errors() {
        let err = CustomRedisError::from_redis_kind(
            redis::ErrorKind::TypeError,
            "WRONGTYPE Operation against a key holding the wrong kind of value",
        );
        assert!(!err.is_connection_error());
        assert!(!CustomRedisError::InvalidConfiguration("bad".to_string()).is_connection_error());
    }

    #[test]
    fn test_not_connected_and_timeout_are_connection_errors() {
        assert!(CustomRedisError::NotConnected.is_connection_error());
        assert!(CustomRedisError::Timeout.is_connection_error());
    }
}
