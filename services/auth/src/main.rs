use anyhow::Context;
use shared::events::{Domain, SessionDomain, UserDomain};
use shared::logger::init_logger;
use shared::nats::DurableStream;
use shared::{CommandProcessor, CorrelationBridge, EventBus, NatsBus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use auth_service::{
    create_router, AuthConfig, LoginService, SessionCommandHandler, SessionStore, UserActionReactor,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let config = AuthConfig::load().context("loading auth configuration")?;
    tracing::info!(
        port = config.port,
        nats_url = %config.nats_url,
        prefix = %config.topic_prefix,
        lifetime_days = config.session_lifetime_days,
        "Starting auth service"
    );

    let bus: Arc<dyn EventBus> = Arc::new(
        NatsBus::connect(&config.nats_url, DurableStream::for_prefix(&config.topic_prefix)).await?,
    );
    let store = Arc::new(SessionStore::new(config.session_lifetime()));
    let cancel = CancellationToken::new();

    let processor = CommandProcessor::spawn::<SessionDomain, _>(
        Arc::clone(&bus),
        SessionDomain::topics(&config.topic_prefix),
        Arc::new(SessionCommandHandler::new(Arc::clone(&store))),
        cancel.clone(),
    )
    .await?;
    let reactor = UserActionReactor::new(Arc::clone(&bus), Arc::clone(&store), &config.topic_prefix)
        .spawn(&config.topic_prefix, cancel.clone())
        .await?;
    let purger = store.spawn_purger(config.purge_interval(), cancel.clone());

    let users = Arc::new(
        CorrelationBridge::<UserDomain>::start(
            Arc::clone(&bus),
            UserDomain::topics(&config.topic_prefix),
            config.user_timeout(),
        )
        .await?,
    );
    let logins = Arc::new(LoginService::new(Arc::clone(&users), Arc::clone(&store), config.user_timeout()));
    let app = create_router(logins);

    let addr = format!("0.0.0.0:{}", config.port);
    let tcp = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!(addr = %addr, "Auth service listening");

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
    let _ = tokio::join!(processor, reactor, purger);
    users.shutdown().await;
    tracing::info!("Auth service stopped");
    Ok(())
}
