// `server.rs` composes the HTTP application: it registers Prometheus
// metrics, builds the `Clicker` that owns the trigger lock, and mounts the
// handlers. Broker settings are not read here; each trigger reloads them.
use crate::config::{ConfigSource, EnvSource};
use crate::handlers;
use crate::mqtt::{MqttPublisher, Publisher};
use crate::state::{Clicker, ClickerMetrics, TriggerOptions};
use axum::{routing::get, Extension, Router};
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub trigger: TriggerOptions,
}

/// Build the router around an already constructed `Clicker`.
pub fn router(clicker: Arc<Clicker>, registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/open/sesame", get(handlers::open_sesame))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/health", get(|| async { "ok" }))
        .layer(Extension(clicker))
        .layer(Extension(registry))
}

/// Wire a `Clicker` to the given configuration source and publisher.
pub fn build_app(
    source: Arc<dyn ConfigSource>,
    publisher: Arc<dyn Publisher>,
    options: TriggerOptions,
) -> anyhow::Result<Router> {
    let registry = Arc::new(Registry::new());
    let metrics = ClickerMetrics::register(&registry)?;
    let clicker = Arc::new(Clicker::new(source, publisher, options, metrics));
    Ok(router(clicker, registry))
}

pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let app = build_app(Arc::new(EnvSource), Arc::new(MqttPublisher), config.trigger)?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(
        addr = %listener.local_addr()?,
        strict_responses = config.trigger.strict_responses,
        credential_policy = ?config.trigger.credential_policy,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
