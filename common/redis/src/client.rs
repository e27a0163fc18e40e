use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::{Client, Connector, CustomRedisError};

/// A client over a single multiplexed connection: concurrent callers share one
/// socket and their commands are pipelined, so no pooling or locking is needed.
pub struct RedisClient {
    connection: MultiplexedConnection,
    response_timeout: Option<Duration>,
}

impl RedisClient {
    pub fn new(connection: MultiplexedConnection, response_timeout: Option<Duration>) -> Self {
        RedisClient {
            connection,
            response_timeout,
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, CustomRedisError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match self.response_timeout {
            Some(limit) => timeout(limit, fut)
                .await
                .map_err(|_| CustomRedisError::Timeout)?
                .map_err(CustomRedisError::from),
            None => fut.await.map_err(CustomRedisError::from),
        }
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn lrange(
        &self,
        k: String,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CustomRedisError> {
        let mut conn = self.connection.clone();
        self.bounded(async move { conn.lrange(k, start, stop).await })
            .await
    }

    async fn rpush(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        self.bounded(async move { conn.rpush(k, v).await })
            .await
    }

    async fn ping(&self) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        self.bounded(async move {
            redis::cmd("PING")
                .query_async::<_, String>(&mut conn)
                .await
                .map(|_| ())
        })
        .await
    }

    async fn quit(&self) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        // No response timeout here: QUIT is answered after everything queued before it
        redis::cmd("QUIT")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(CustomRedisError::from)
    }
}

/// Opens multiplexed connections to a single Redis node.
pub struct RedisConnector {
    client: redis::Client,
    response_timeout: Option<Duration>,
}

impl RedisConnector {
    /// Build a connector for `host:port`, authenticating with `password` when set.
    ///
    /// Fails with `InvalidConfiguration` if `Some(Duration::ZERO)` is passed as the
    /// response timeout, use `None` for no timeout instead.
    pub fn new(
        host: String,
        port: u16,
        password: Option<String>,
        response_timeout: Option<Duration>,
    ) -> Result<RedisConnector, CustomRedisError> {
        if let Some(timeout) = response_timeout {
            if timeout.is_zero() {
                return Err(CustomRedisError::InvalidConfiguration(
                    "Redis response timeout cannot be Duration::ZERO - use None for no timeout"
                        .to_string(),
                ));
            }
        }

        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(host, port),
            redis: RedisConnectionInfo {
                db: 0,
                username: None,
                password: password.filter(|p| !p.is_empty()),
            },
        };
        let client = redis::Client::open(info)?;

        Ok(RedisConnector {
            client,
            response_timeout,
        })
    }

    /// How long a command may wait for its reply, `None` when unbounded.
    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self) -> Result<Arc<dyn Client>, CustomRedisError> {
        let connection = self.client.get_multiplexed_async_connection().await?;
        Ok(Arc::new(RedisClient::new(connection, self.response_timeout)))
    }
}
