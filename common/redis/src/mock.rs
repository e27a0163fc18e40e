use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::{Client, Connector, CustomRedisError};

/// In-memory stand-in for a Redis node. Clones share the same data, so a test can keep
/// one clone to flip availability and inspect calls while the code under test uses another.
#[derive(Clone, Default)]
pub struct MockRedisClient {
    lists: Arc<Mutex<HashMap<String, Vec<String>>>>,
    calls: Arc<Mutex<Vec<MockRedisCall>>>,
    unavailable: Arc<AtomicBool>,
    hang_on_connect: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
    command_delay: Arc<Mutex<Option<Duration>>>,
    lrange_error: Arc<Mutex<Option<CustomRedisError>>>,
    rpush_error: Arc<Mutex<Option<CustomRedisError>>>,
    quit_error: Arc<Mutex<Option<CustomRedisError>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MockRedisValue {
    None,
    String(String),
    Range(isize, isize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockRedisCall {
    pub op: String,
    pub key: String,
    pub value: MockRedisValue,
}

// Poisoning only happens if a test panicked while holding the lock, keep going with the data
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn dropped_connection() -> CustomRedisError {
    CustomRedisError::from(redis::RedisError::from(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "mock store unavailable",
    )))
}

impl MockRedisClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the node going away (`false`) or coming back (`true`). While unavailable,
    /// connection attempts are refused and commands on open connections fail as dropped.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    /// Connection attempts never complete, to exercise connect timeouts.
    pub fn set_hang_on_connect(&self, hang: bool) {
        self.hang_on_connect.store(hang, Ordering::SeqCst);
    }

    /// Every data command sleeps this long before answering.
    pub fn set_command_delay(&self, delay: Option<Duration>) {
        *lock(&self.command_delay) = delay;
    }

    pub fn lrange_ret(&self, ret: Option<CustomRedisError>) -> Self {
        *lock(&self.lrange_error) = ret;
        self.clone()
    }

    pub fn rpush_ret(&self, ret: Option<CustomRedisError>) -> Self {
        *lock(&self.rpush_error) = ret;
        self.clone()
    }

    pub fn quit_ret(&self, ret: Option<CustomRedisError>) -> Self {
        *lock(&self.quit_error) = ret;
        self.clone()
    }

    /// Seed a list directly, without recording a call.
    pub fn with_list(&self, key: &str, values: Vec<String>) -> Self {
        lock(&self.lists).insert(key.to_owned(), values);
        self.clone()
    }

    pub fn list(&self, key: &str) -> Vec<String> {
        lock(&self.lists).get(key).cloned().unwrap_or_default()
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        lock(&self.calls).clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn record(&self, op: &str, key: &str, value: MockRedisValue) {
        lock(&self.calls).push(MockRedisCall {
            op: op.to_string(),
            key: key.to_string(),
            value,
        });
    }

    async fn before_command(&self) -> Result<(), CustomRedisError> {
        let delay = *lock(&self.command_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.is_available() {
            Ok(())
        } else {
            Err(dropped_connection())
        }
    }
}

#[async_trait]
impl Client for MockRedisClient {
    async fn lrange(
        &self,
        key: String,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CustomRedisError> {
        self.record("lrange", &key, MockRedisValue::Range(start, stop));
        self.before_command().await?;

        if let Some(err) = lock(&self.lrange_error).clone() {
            return Err(err);
        }

        let lists = lock(&self.lists);
        let values = lists.get(&key).cloned().unwrap_or_default();
        let len = values.len() as isize;
        let normalize = |i: isize| if i < 0 { len + i } else { i };
        let (from, to) = (normalize(start).max(0), normalize(stop).min(len - 1));
        if from > to {
            return Ok(Vec::new());
        }
        Ok(values[from as usize..=to as usize].to_vec())
    }

    async fn rpush(&self, key: String, value: String) -> Result<(), CustomRedisError> {
        self.record("rpush", &key, MockRedisValue::String(value.clone()));
        self.before_command().await?;

        if let Some(err) = lock(&self.rpush_error).clone() {
            return Err(err);
        }

        lock(&self.lists).entry(key).or_default().push(value);
        Ok(())
    }

    async fn ping(&self) -> Result<(), CustomRedisError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(dropped_connection())
        }
    }

    async fn quit(&self) -> Result<(), CustomRedisError> {
        self.record("quit", "", MockRedisValue::None);
        match lock(&self.quit_error).clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Hands out connections to a shared [`MockRedisClient`].
#[derive(Clone)]
pub struct MockConnector {
    client: MockRedisClient,
}

impl MockConnector {
    pub fn new(client: MockRedisClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Arc<dyn Client>, CustomRedisError> {
        self.client.connects.fetch_add(1, Ordering::SeqCst);
        if self.client.hang_on_connect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.client.is_available() {
            return Err(CustomRedisError::from(redis::RedisError::from(
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "Connection refused"),
            )));
        }
        Ok(Arc::new(self.client.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lists_keep_insertion_order() {
        let client = MockRedisClient::new();
        for v in ["a", "b", "c"] {
            client
                .rpush("tasks".to_string(), v.to_string())
                .await
                .unwrap();
        }

        let all = client.lrange("tasks".to_string(), 0, -1).await.unwrap();
        assert_eq!(all, vec!["a", "b", "c"]);

        let tail = client.lrange("tasks".to_string(), -2, -1).await.unwrap();
        assert_eq!(tail, vec!["b", "c"]);

        let missing = client.lrange("other".to_string(), 0, -1).await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_refuses_connections_and_drops_commands() {
        let client = MockRedisClient::new();
        let connector = MockConnector::new(client.clone());
        let conn = connector.connect().await.unwrap();

        client.set_available(false);
        assert!(connector.connect().await.is_err());

        let err = conn.ping().await.unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(client.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_injected_errors() {
        let client = MockRedisClient::new().rpush_ret(Some(CustomRedisError::from_redis_kind(
            redis::ErrorKind::TypeError,
            "WRONGTYPE",
        )));

        let err = client
            .rpush("tasks".to_string(), "a".to_string())
            .await
            .unwrap_err();
        assert!(!err.is_connection_error());
        assert!(client.list("tasks").is_empty());
        assert_eq!(client.get_calls().len(), 1);
    }
}
