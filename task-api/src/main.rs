use envconfig::Envconfig;
use lifecycle::{ShutdownCoordinator, ShutdownOptions};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use task_api::config::Config;
use task_api::metrics_middleware::setup_metrics_recorder;
use task_api::server::serve;

#[tokio::main]
async fn main() {
    // Verbosity comes from RUST_LOG, info unless told otherwise
    let fmt_layer = fmt::layer().with_target(true).with_level(true).with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(fmt_layer).init();

    let config = Config::init_from_env().expect("Invalid configuration:");

    let metrics = config.export_prometheus.then(|| {
        setup_metrics_recorder().expect("failed to install prometheus recorder")
    });

    let store = config
        .store_connection()
        .expect("failed to create redis connector");

    // Signals are trapped before anything can block, so a SIGTERM during startup still
    // goes through the shutdown sequence
    let coordinator = ShutdownCoordinator::new(ShutdownOptions {
        name: "task-api".to_string(),
        shutdown_timeout: config.shutdown_timeout.0,
    });
    coordinator
        .trap_signals()
        .expect("failed to install signal handlers");

    let listener = tokio::net::TcpListener::bind(config.bind())
        .await
        .expect("could not bind port");

    let outcome = serve(&config, listener, store, coordinator, metrics).await;
    std::process::exit(outcome.exit_code());
}
