pub mod api;
pub mod config;
pub mod handlers;
pub mod metrics_middleware;
pub mod router;
pub mod server;
