use axum::{routing::get, Router};
use rust_recon_api::circuit_breaker::ResilienceGuard;
use rust_recon_api::config::Config;
use rust_recon_api::handlers::{self, AppState};
use rust_recon_api::orchestrator::ScoringOrchestrator;
use rust_recon_api::pipeline::ReconciliationService;
use rust_recon_api::review::ReviewQueue;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Multipart overhead allowed on top of three maximum-size files.
const MULTIPART_SLACK_BYTES: usize = 1024 * 1024;

/// Main entry point for the reconciliation service.
///
/// Initializes tracing, configuration, the scoring client with its circuit
/// breaker and health monitor, the score cache and job runner, then serves the
/// HTTP API.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_recon_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    // One breaker per process, shared by every job and the test endpoint
    let guard = Arc::new(ResilienceGuard::new(
        config.circuit_failure_threshold,
        config.circuit_cooldown(),
    ));

    let orchestrator = ScoringOrchestrator::from_config(&config, guard.clone())?;
    tracing::info!(
        "Scoring client initialized: {} ({:?} mode, {}s cache TTL)",
        orchestrator.client().base_url(),
        config.scoring_mode,
        config.score_cache_ttl_secs
    );

    let health_client = orchestrator.client().clone();
    guard
        .clone()
        .spawn_health_monitor(config.health_check_interval(), move || {
            let client = health_client.clone();
            async move { client.health().await.is_ok() }
        });
    tracing::info!(
        "Scoring health monitor started ({}s interval)",
        config.health_check_interval_secs
    );

    let service = Arc::new(ReconciliationService::new(
        config.clone(),
        orchestrator,
        Arc::new(ReviewQueue::new()),
    ));

    let app_state = Arc::new(AppState {
        config: config.clone(),
        service,
        guard,
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let body_limit = config.max_upload_bytes * 3 + MULTIPART_SLACK_BYTES;
    let protected_routes = handlers::api_routes(body_limit).layer(
        ServiceBuilder::new()
            .layer(RequestBodyLimitLayer::new(body_limit))
            .layer(GovernorLayer {
                config: governor_conf,
            }),
    );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
