use rust_hsds_analysis::circuit_breaker::BreakerSettings;
use rust_hsds_analysis::config::Config;
use rust_hsds_analysis::db_storage::HsdsStorage;
use rust_hsds_analysis::handlers::{self, AppState};
use rust_hsds_analysis::inference::{AnthropicClient, InferenceClient, InferenceSettings};
use rust_hsds_analysis::orchestrator::AnalyzerRegistry;
use rust_hsds_analysis::processor::{PipelineRunner, TranscriptProcessor};
use rust_hsds_analysis::store::{connect_store, Store};

use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Starts the transcript analysis service.
///
/// Sets up tracing, configuration, the Postgres-backed store, the inference client and
/// the background pipeline pool, then serves `/transcript` and `/health`.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_hsds_analysis=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let breaker = BreakerSettings::from_config(&config);
    let store: Arc<dyn Store> = Arc::new(connect_store(&config.database_url, breaker).await?);
    tracing::info!("Database connection pool established");

    let storage = HsdsStorage::new(store, config.audit_actor.clone());

    let client: Arc<dyn InferenceClient> =
        Arc::new(AnthropicClient::new(InferenceSettings::from_config(&config))?);
    tracing::info!("✓ Inference client initialized: {}", config.anthropic_api_url);

    let registry = AnalyzerRegistry::with_defaults(client.clone(), storage.clone());
    let processor = TranscriptProcessor::new(client, storage, registry);
    let runner = PipelineRunner::new(processor, config.pipeline_workers);
    tracing::info!(
        "Pipeline pool ready ({} concurrent run(s))",
        config.pipeline_workers
    );

    let app_state = Arc::new(AppState::new(config.clone(), runner));

    // 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limiter configuration"))?,
    );

    let app = handlers::router(app_state)
        .layer(
            ServiceBuilder::new()
                .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
