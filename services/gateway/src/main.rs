use anyhow::Context;
use shared::logger::init_logger;
use shared::nats::DurableStream;
use shared::{EventBus, NatsBus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use gateway_service::directory::ProjectDirectory;
use gateway_service::{create_router, ActionListener, AppState, Bridges, GatewayConfig, SessionCache, SessionTokens};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let config = GatewayConfig::load().context("loading gateway configuration")?;
    tracing::info!(
        port = config.port,
        nats_url = %config.nats_url,
        prefix = %config.topic_prefix,
        "Starting gateway"
    );

    let bus: Arc<dyn EventBus> = Arc::new(
        NatsBus::connect(&config.nats_url, DurableStream::for_prefix(&config.topic_prefix)).await?,
    );
    let bridges = Arc::new(Bridges::start(Arc::clone(&bus), &config.topic_prefix, config.bridge_timeout()).await?);
    let cache = Arc::new(SessionCache::new(config.session_idle()));
    let tokens = Arc::new(SessionTokens::new(&config.jwt_secret, config.token_ttl()));

    let cancel = CancellationToken::new();
    let sweeper = cache.spawn_sweeper(config.sweep_interval(), cancel.clone());
    let listener = ActionListener::new(
        Arc::clone(&cache),
        ProjectDirectory::new(Arc::clone(&bridges.project), config.bridge_timeout()),
    )
    .spawn(Arc::clone(&bus), &config.topic_prefix, cancel.clone())
    .await?;

    let state = AppState::new(
        Arc::clone(&bridges),
        cache,
        tokens,
        config.auth_timeout(),
        config.bridge_timeout(),
    );
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let tcp = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!(addr = %addr, "Gateway listening");

    let shutdown = cancel.clone();
    axum::serve(tcp, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    let _ = tokio::join!(sweeper, listener);
    bridges.shutdown().await;
    tracing::info!("Gateway stopped");
    Ok(())
}
