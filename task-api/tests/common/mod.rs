#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common_redis::{MockConnector, MockRedisClient, RetryPolicy, StoreConnection};
use lifecycle::{ShutdownCoordinator, ShutdownOptions, ShutdownOutcome};
use once_cell::sync::Lazy;
use reqwest::header::CONTENT_TYPE;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use task_api::config::Config;
use task_api::server::serve;

pub static DEFAULT_CONFIG: Lazy<Config> = Lazy::new(Config::default_for_test);

/// A real server on an ephemeral port, backed by an in-memory store.
pub struct ServerHandle {
    pub addr: SocketAddr,
    pub store: StoreConnection,
    pub coordinator: ShutdownCoordinator,
    outcome: Option<JoinHandle<ShutdownOutcome>>,
}

impl ServerHandle {
    pub async fn for_client(client: &MockRedisClient) -> ServerHandle {
        Self::for_config(DEFAULT_CONFIG.clone(), client).await
    }

    pub async fn for_config(config: Config, client: &MockRedisClient) -> ServerHandle {
        Self::spawn(config, client, true).await
    }

    /// Leave the first connection attempt to the server, as the binary does.
    pub async fn starting(client: &MockRedisClient) -> ServerHandle {
        Self::spawn(DEFAULT_CONFIG.clone(), client, false).await
    }

    async fn spawn(config: Config, client: &MockRedisClient, connect: bool) -> ServerHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let store = StoreConnection::new(
            Arc::new(MockConnector::new(client.clone())),
            RetryPolicy::fixed(Duration::from_millis(50)),
        )
        .with_connect_timeout(Duration::from_millis(200))
        .with_ping_interval(Duration::from_millis(50));
        if connect {
            store.connect().await;
        }

        let coordinator = ShutdownCoordinator::new(ShutdownOptions {
            name: "task-api-test".to_string(),
            shutdown_timeout: config.shutdown_timeout.0,
        });

        let outcome = tokio::spawn({
            let store = store.clone();
            let coordinator = coordinator.clone();
            async move { serve(&config, listener, store, coordinator, None).await }
        });

        ServerHandle {
            addr,
            store,
            coordinator,
            outcome: Some(outcome),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        reqwest::Client::new()
            .get(self.url(path))
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn create_task<T: Into<reqwest::Body>>(&self, body: T) -> reqwest::Response {
        reqwest::Client::new()
            .post(self.url("/tasks"))
            .body(body)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .expect("failed to send request")
    }

    /// Trigger shutdown as a termination signal would, and wait for the sequence to end.
    pub async fn shutdown(&mut self) -> ShutdownOutcome {
        self.coordinator.trigger("SIGTERM");
        self.outcome
            .take()
            .expect("server already shut down")
            .await
            .expect("server task panicked")
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.coordinator.trigger("test_finished");
    }
}

/// Poll `check` until it holds, failing the test after a few seconds.
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
