use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use sqlx::postgres::PgPoolOptions;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use keysteward::cleanup::{spawn_cleanup_scheduler, CleanUpService};
use keysteward::kms::aws::AwsKeyServiceClient;
use keysteward::kms::memory::InMemoryKeyService;
use keysteward::kms::{KeyPolicyService, KeyRecordStore, KeyServiceClient, KmsService, PgKeyRecordStore};
use keysteward::supply::{Clock, SystemClock, UuidGenerator};
use keysteward::{config, routes, KmsBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Fail fast if the JWT secret is missing
    let _ = config::JWT_SECRET.as_str();
    let policies = KeyPolicyService::new(
        config::KMS_OPERATOR_ROLE_ARN.as_str(),
        config::KMS_ADMIN_ROLE_ARN.clone(),
    )?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config::DATABASE_URL.as_str())
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(error.into());
        }
    }

    let kms: Arc<dyn KeyServiceClient> = match *config::KMS_BACKEND {
        KmsBackend::Aws => Arc::new(AwsKeyServiceClient::from_env().await),
        KmsBackend::Memory => {
            tracing::warn!("using in-memory kms emulator; keys do not survive restarts");
            Arc::new(InMemoryKeyService::default())
        }
    };
    let store: Arc<dyn KeyRecordStore> = Arc::new(PgKeyRecordStore::new(pool.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());

    let engine = Arc::new(KmsService::new(
        store.clone(),
        kms,
        policies,
        clock.clone(),
        Arc::new(UuidGenerator),
        config::kms_service_config_from_env(),
    ));
    let cleanup = Arc::new(CleanUpService::new(
        engine,
        store,
        clock,
        config::clean_up_config_from_env(),
    ));

    let shutdown = CancellationToken::new();
    let interval_secs = *config::KMS_CLEANUP_INTERVAL_SECS;
    let scheduler = (interval_secs > 0).then(|| {
        spawn_cleanup_scheduler(
            cleanup.clone(),
            Duration::from_secs(interval_secs),
            shutdown.clone(),
        )
    });

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = routes::app(cleanup, shutdown.clone())
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .layer(prometheus_layer);

    let addr: SocketAddr =
        format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT).parse()?;
    tracing::info!(%addr, "Listening for incoming connections");
    let signal = shutdown.clone();
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::warn!(?error, "failed to listen for shutdown signal");
            }
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = scheduler {
        handle.await?;
    }
    Ok(())
}
