use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatekeeper::{
    auth::AuthGate,
    config::Settings,
    metrics::Metrics,
    middleware::AdmissionState,
    redis::{RedisClient, RedisCounterStore},
    routes::{build_router, AppState},
    store::CounterStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatekeeper=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting gatekeeper");

    let settings = Settings::load()?;
    let metrics = Arc::new(Metrics::new()?);

    let redis_client = RedisClient::connect(settings.redis.to_client_settings()).await?;
    let store: Arc<dyn CounterStore> =
        Arc::new(RedisCounterStore::new(redis_client, "gatekeeper"));

    let quota = settings.limit.quota();
    info!(
        rate = quota.rate,
        period_secs = quota.period.as_secs(),
        burst = quota.burst,
        fail_open = settings.admission.fail_open,
        "admission quota configured"
    );

    let admission = AdmissionState::new(store.clone(), quota, metrics.clone())
        .with_fail_open(settings.admission.fail_open)
        .with_key_strategy(settings.admission.key_strategy);
    let auth = AuthGate::new(&settings.auth.jwt_secret, metrics.clone());

    let app = build_router(
        auth,
        admission,
        AppState {
            store,
            metrics,
        },
    );

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if signal::ctrl_c().await.is_ok() {
        info!("received ctrl+c, shutting down");
    }
}
