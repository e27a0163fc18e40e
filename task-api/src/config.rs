use std::str::FromStr;
use std::sync::Arc;
use std::time;

use common_redis::{CustomRedisError, RedisConnector, RetryPolicy, StoreConnection};
use envconfig::Envconfig;

const MIN_PING_INTERVAL: time::Duration = time::Duration::from_millis(100);

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "APP_PORT", default = "3000")]
    pub port: u16,

    #[envconfig(from = "REDIS_HOST", default = "localhost")]
    pub redis_host: String,

    #[envconfig(from = "REDIS_PORT", default = "6379")]
    pub redis_port: u16,

    #[envconfig(from = "REDIS_PASSWORD")]
    pub redis_password: Option<String>,

    #[envconfig(from = "APP_VERSION", default = "1.0.0")]
    pub app_version: String,

    #[envconfig(from = "REDIS_CONNECT_TIMEOUT_MS", default = "2000")]
    pub redis_connect_timeout: EnvMsDuration,

    #[envconfig(from = "REDIS_RETRY_DELAY_MS", default = "1000")]
    pub redis_retry_delay: EnvMsDuration,

    #[envconfig(from = "SHUTDOWN_TIMEOUT_MS", default = "10000")]
    pub shutdown_timeout: EnvMsDuration,

    #[envconfig(from = "EXPORT_PROMETHEUS", default = "true")]
    pub export_prometheus: bool,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connector for the configured server. Commands wait for their reply as long as it
    /// takes: `REDIS_CONNECT_TIMEOUT_MS` bounds connection attempts and pings only, and a
    /// dead connection is caught by the ping rather than by a slow command.
    pub fn redis_connector(&self) -> Result<RedisConnector, CustomRedisError> {
        RedisConnector::new(
            self.redis_host.clone(),
            self.redis_port,
            self.redis_password.clone(),
            None,
        )
    }

    /// Store connection over [`Config::redis_connector`], not yet started.
    pub fn store_connection(&self) -> Result<StoreConnection, CustomRedisError> {
        let connector = self.redis_connector()?;
        Ok(StoreConnection::new(
            Arc::new(connector),
            RetryPolicy::fixed(self.redis_retry_delay.0),
        )
        .with_connect_timeout(self.redis_connect_timeout.0)
        .with_ping_interval(self.redis_retry_delay.0.max(MIN_PING_INTERVAL)))
    }

    pub fn default_for_test() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            redis_password: None,
            app_version: "1.0.0".to_string(),
            redis_connect_timeout: EnvMsDuration(time::Duration::from_millis(2000)),
            redis_retry_delay: EnvMsDuration(time::Duration::from_millis(1000)),
            shutdown_timeout: EnvMsDuration(time::Duration::from_millis(10000)),
            export_prometheus: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl std::fmt::Display for ParseEnvMsDurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("expected a duration in whole milliseconds")
    }
}

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}
