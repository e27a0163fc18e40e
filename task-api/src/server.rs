use std::future::IntoFuture;

use common_redis::{ConnectionState, StoreConnection};
use lifecycle::{ShutdownCoordinator, ShutdownOutcome};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::Config;
use crate::router::{router, AppState};

/// Serve the API on `listener` until `coordinator` is triggered, then drain in-flight
/// requests and close the store.
///
/// The store is connected in the background once the listener is serving, so liveness
/// answers while the first attempt is still pending. Task requests answer 503 until the
/// store is up. A store that was already started is left as it is.
pub async fn serve(
    config: &Config,
    listener: TcpListener,
    store: StoreConnection,
    coordinator: ShutdownCoordinator,
    metrics: Option<PrometheusHandle>,
) -> ShutdownOutcome {
    let app = router(AppState::new(store.clone(), &config.app_version), metrics);

    match listener.local_addr() {
        Ok(addr) => info!(%addr, version = %config.app_version, "listening"),
        Err(e) => info!(error = %e, "listening on an unknown address"),
    }

    tokio::spawn({
        let store = store.clone();
        let host = config.redis_host.clone();
        let port = config.redis_port;
        async move {
            if !store.connect().await && store.state() != ConnectionState::Closed {
                warn!(
                    %host,
                    port,
                    "store unreachable at startup, serving liveness only until it comes back"
                );
            }
        }
    });

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(coordinator.shutdown_signal())
        .into_future();

    coordinator.run(server, store.close()).await
}
