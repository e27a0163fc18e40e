use std::time::Duration;

use assert_json_diff::assert_json_eq;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::time::Instant;

use common_redis::{ConnectionState, MockRedisCall, MockRedisClient, MockRedisValue};
use lifecycle::{ShutdownOutcome, ShutdownPhase};
use task_api::config::EnvMsDuration;

use crate::common::*;
mod common;

async fn ready_status(server: &ServerHandle) -> StatusCode {
    server.get("/ready").await.status()
}

#[tokio::test]
async fn readiness_follows_the_store_while_health_stays_up() {
    let client = MockRedisClient::new();
    let server = ServerHandle::for_client(&client).await;

    let res = server.get("/ready").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_json_eq!(
        res.json::<Value>().await.unwrap(),
        json!({ "status": "READY", "redis": "CONNECTED" })
    );

    client.set_available(false);
    eventually(|| !server.store.is_connected()).await;

    let res = server.get("/ready").await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_json_eq!(
        res.json::<Value>().await.unwrap(),
        json!({ "status": "NOT READY", "redis": "DISCONNECTED" })
    );

    let res = server.get("/health").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.json::<Value>().await.unwrap();
    assert_eq!(body["status"], "UP");
    assert_eq!(body["version"], "1.0.0");

    client.set_available(true);
    eventually(|| server.store.is_connected()).await;
    assert_eq!(ready_status(&server).await, StatusCode::OK);
}

#[tokio::test]
async fn readiness_flips_within_one_retry_delay() {
    let client = MockRedisClient::new();
    let server = ServerHandle::for_client(&client).await;
    let mut events = server.store.subscribe();

    let down = Instant::now();
    client.set_available(false);
    events
        .wait_for(|state| *state == ConnectionState::Disconnected)
        .await
        .unwrap();
    // Pings run every 50ms in these tests, leave room for a slow scheduler
    assert!(down.elapsed() < Duration::from_secs(1));
    assert_eq!(ready_status(&server).await, StatusCode::SERVICE_UNAVAILABLE);

    let up = Instant::now();
    client.set_available(true);
    events
        .wait_for(|state| *state == ConnectionState::Connected)
        .await
        .unwrap();
    assert!(up.elapsed() < Duration::from_secs(1));
    assert_eq!(ready_status(&server).await, StatusCode::OK);
}

#[tokio::test]
async fn it_serves_liveness_without_a_store() {
    let client = MockRedisClient::new();
    client.set_available(false);
    let server = ServerHandle::for_client(&client).await;

    assert_eq!(server.get("/health").await.status(), StatusCode::OK);
    assert_eq!(
        ready_status(&server).await,
        StatusCode::SERVICE_UNAVAILABLE
    );

    let res = server.get("/version").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_json_eq!(res.json::<Value>().await.unwrap(), json!({ "version": "1.0.0" }));
}

#[tokio::test]
async fn it_answers_liveness_while_the_store_is_still_connecting() {
    let client = MockRedisClient::new();
    client.set_hang_on_connect(true);
    let server = ServerHandle::starting(&client).await;

    assert_eq!(server.get("/health").await.status(), StatusCode::OK);
    assert_eq!(
        ready_status(&server).await,
        StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(
        server.get("/tasks").await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
    // The server started the attempt itself
    eventually(|| client.connect_count() >= 1).await;
    assert!(!server.store.is_connected());

    client.set_hang_on_connect(false);
    eventually(|| server.store.is_connected()).await;
    assert_eq!(ready_status(&server).await, StatusCode::OK);
}

#[tokio::test]
async fn shutdown_drains_in_flight_requests_then_closes_the_store() {
    let client = MockRedisClient::new();
    let mut server = ServerHandle::for_client(&client).await;
    client.set_command_delay(Some(Duration::from_millis(1500)));

    let url = server.url("/tasks");
    let in_flight = tokio::spawn(async move {
        reqwest::Client::new()
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(json!({ "description": "slow write" }).to_string())
            .send()
            .await
    });
    eventually(|| !client.get_calls().is_empty()).await;

    let health = server.url("/health");
    let started = Instant::now();
    let mut phases = server.coordinator.subscribe();
    let shutdown = tokio::spawn(async move {
        let outcome = server.shutdown().await;
        (outcome, server)
    });

    phases
        .wait_for(|phase| *phase != ShutdownPhase::Running)
        .await
        .unwrap();

    // New connections are refused while the slow write is still draining
    let refused_by = Instant::now() + Duration::from_secs(1);
    loop {
        match reqwest::Client::new().get(&health).send().await {
            Err(err) if err.is_connect() => break,
            _ => {
                assert!(Instant::now() < refused_by, "listener still accepting");
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }
    assert!(!in_flight.is_finished());

    let res = in_flight.await.unwrap().expect("in-flight request was dropped");
    assert_eq!(res.status(), StatusCode::CREATED);

    let (outcome, server) = shutdown.await.unwrap();
    assert_eq!(outcome, ShutdownOutcome::Terminated);
    assert_eq!(outcome.exit_code(), 0);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(server.store.state(), ConnectionState::Closed);

    // The write landed before the connection was closed
    assert_eq!(client.list("tasks").len(), 1);
    assert_eq!(
        client.get_calls().last(),
        Some(&MockRedisCall {
            op: "quit".to_string(),
            key: "".to_string(),
            value: MockRedisValue::None,
        })
    );

    // Nothing is accepted any more
    assert!(reqwest::Client::new()
        .get(server.url("/health"))
        .send()
        .await
        .is_err());
}

#[tokio::test]
async fn slow_drain_forces_exit_at_the_deadline() {
    let mut config = DEFAULT_CONFIG.clone();
    config.shutdown_timeout = EnvMsDuration(Duration::from_millis(300));

    let client = MockRedisClient::new();
    let mut server = ServerHandle::for_config(config, &client).await;
    client.set_command_delay(Some(Duration::from_secs(30)));

    let url = server.url("/tasks");
    tokio::spawn(async move { reqwest::Client::new().get(url).send().await });
    eventually(|| !client.get_calls().is_empty()).await;

    let started = Instant::now();
    let outcome = server.shutdown().await;

    assert_eq!(outcome, ShutdownOutcome::ForcedExit);
    assert_ne!(outcome.exit_code(), 0);
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(server.coordinator.phase(), ShutdownPhase::ForcedExit);

    // The store close never got its turn
    assert!(client.get_calls().iter().all(|call| call.op != "quit"));
}

#[tokio::test]
async fn second_signal_does_not_restart_shutdown() {
    let client = MockRedisClient::new();
    let mut server = ServerHandle::for_client(&client).await;

    assert!(server.coordinator.trigger("SIGINT"));
    assert!(!server.coordinator.trigger("SIGTERM"));

    let outcome = server.shutdown().await;
    assert_eq!(outcome, ShutdownOutcome::Terminated);
    assert_eq!(server.coordinator.state().unwrap().signal, "SIGINT");
}
