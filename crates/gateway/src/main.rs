//! RevForge API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Review task lifecycle (create, advance, cancel, status)
//! - Study listing and human screening decisions
//! - PRISMA flow and provenance reporting
//! - Rate limiting and observability (logging, metrics, tracing)

mod handlers;
mod middleware;

use axum::{
    routing::{get, post},
    Router,
};
use revforge_common::{
    capabilities::{HttpDecisionClient, HttpExtractionClient, HttpSearchClient},
    config::AppConfig,
    db::{DbPool, Repository},
    metrics,
};
use revforge_engine::appraisal::ToolRegistry;
use revforge_engine::source::SourceGateway;
use revforge_engine::workflow::Orchestrator;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, Level};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub orchestrator: Arc<Orchestrator>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting RevForge API Gateway v{}", revforge_common::VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    let config = Arc::new(config);

    // Initialize metrics
    metrics::register_metrics();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from((
            [0, 0, 0, 0],
            config.observability.metrics_port,
        )))
        .install()?;

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    let repository = Repository::new(db.clone());

    // Wire capability clients and the workflow engine
    let search = Arc::new(HttpSearchClient::new(config.capabilities.timeout_secs)?);
    let decision = Arc::new(HttpDecisionClient::new(&config.capabilities)?);
    let extraction = Arc::new(HttpExtractionClient::new(&config.capabilities)?);

    let tools = ToolRegistry::with_builtins(decision.clone());

    // An unknown appraisal tool or empty reason vocabulary stops the
    // service here, never mid-workflow
    config.validate(&tools.known_names())?;

    let gateway = SourceGateway::new(search, &config.sources);
    let orchestrator = Arc::new(Orchestrator::new(
        repository,
        config.clone(),
        gateway,
        decision,
        extraction,
        tools,
    ));

    // Create app state
    let state = AppState {
        config: config.clone(),
        db,
        orchestrator,
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // Rate limiting
    let limiter = middleware::rate_limit::build_limiter(&state.config.rate_limit);

    // API routes
    let api_routes = Router::new()
        // Task lifecycle
        .route("/tasks", post(handlers::tasks::create_task))
        .route("/tasks/{id}", get(handlers::tasks::get_task))
        .route("/tasks/{id}/advance", post(handlers::tasks::advance_task))
        .route("/tasks/{id}/cancel", post(handlers::tasks::cancel_task))
        // Study listing
        .route("/tasks/{id}/studies", get(handlers::studies::list_studies))
        // Human screening decisions
        .route(
            "/records/{id}/decisions",
            post(handlers::screening::submit_decision),
        )
        // PRISMA flow and audit trail
        .route("/tasks/{id}/prisma", get(handlers::reports::get_prisma_flow))
        .route(
            "/tasks/{id}/provenance",
            get(handlers::reports::get_provenance),
        );

    // Compose the app
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/health/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .layer(axum::middleware::from_fn(move |req, next| {
            middleware::rate_limit::rate_limit_middleware(req, next, limiter.clone())
        }))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
