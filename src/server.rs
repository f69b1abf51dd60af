//! # Server Configuration
//!
//! Wires the job store, ingestion, worker and scheduler together and
//! exposes the admin router.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{AppConfig, ConfigProvider};
use crate::handlers;
use crate::ingestion::IngestionService;
use crate::orders::OrderSource;
use crate::repositories::{JobRepository, RetryPolicy, SchedulerRunRepository};
use crate::routing::RoutingResolver;
use crate::scheduler::SchedulerShim;
use crate::telemetry;
use crate::worker::RetryWorker;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub jobs: JobRepository,
    pub ingestion: Arc<IngestionService>,
    pub scheduler: Arc<SchedulerShim>,
    pub provider_config: Arc<dyn ConfigProvider>,
}

impl AppState {
    /// Build every service from configuration and the host collaborators.
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        routing: Arc<dyn RoutingResolver>,
        orders: Arc<dyn OrderSource>,
        provider_config: Arc<dyn ConfigProvider>,
    ) -> Self {
        let worker = RetryWorker::new(
            JobRepository::new(db.clone(), RetryPolicy::from(&config.worker)),
            orders.clone(),
            provider_config.clone(),
            config.worker.clone(),
        );
        Self::with_worker(config, db, routing, orders, provider_config, worker)
    }

    /// Like [`AppState::new`] with a preconfigured worker (custom transports).
    pub fn with_worker(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        routing: Arc<dyn RoutingResolver>,
        orders: Arc<dyn OrderSource>,
        provider_config: Arc<dyn ConfigProvider>,
        worker: RetryWorker,
    ) -> Self {
        let jobs = JobRepository::new(db.clone(), RetryPolicy::from(&config.worker));

        let ingestion = IngestionService::new(
            jobs.clone(),
            routing,
            orders,
            config.ingestion.clone(),
            chrono::Duration::seconds(config.worker.initial_delay_seconds as i64),
        );

        let scheduler = SchedulerShim::new(
            Arc::new(worker),
            SchedulerRunRepository::new(db.clone()),
            &config.scheduler,
        );

        Self {
            config,
            db,
            jobs,
            ingestion: Arc::new(ingestion),
            scheduler: Arc::new(scheduler),
            provider_config,
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/jobs", get(handlers::jobs::list_jobs))
        .route("/jobs/counts", get(handlers::jobs::job_counts))
        .route("/jobs/sweep", post(handlers::jobs::run_sweep))
        .route("/jobs/reset", post(handlers::jobs::reset_jobs))
        .route(
            "/jobs/{job_id}/provider-status",
            get(handlers::provider::job_provider_status),
        )
        .route("/jobs/{job_id}/refill", post(handlers::provider::refill_job))
        .route("/jobs/{job_id}/cancel", post(handlers::provider::cancel_job))
        .route("/orders/events", post(handlers::orders::order_event))
        .route("/provider/balance", get(handlers::provider::provider_balance))
        .route("/provider/services", get(handlers::provider::provider_services))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(telemetry::trace_context_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Serve the admin API and run the retry scheduler until `shutdown` fires.
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = state.config.bind_addr()?;

    let scheduler = tokio::spawn(state.scheduler.clone().run(shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %state.config.profile, "Admin API listening");

    let app = create_app(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    shutdown.cancel();
    scheduler.await?;
    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::jobs::list_jobs,
        crate::handlers::jobs::job_counts,
        crate::handlers::jobs::run_sweep,
        crate::handlers::jobs::reset_jobs,
        crate::handlers::orders::order_event,
        crate::handlers::provider::provider_balance,
        crate::handlers::provider::provider_services,
        crate::handlers::provider::job_provider_status,
        crate::handlers::provider::refill_job,
        crate::handlers::provider::cancel_job,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::HealthResponse,
            crate::handlers::jobs::JobInfo,
            crate::handlers::jobs::JobsResponse,
            crate::handlers::jobs::SweepResponse,
            crate::handlers::orders::OrderEventResponse,
            crate::repositories::JobCounts,
            crate::ingestion::ResetReport,
            crate::orders::OrderEvent,
            crate::orders::Order,
            crate::orders::LineItem,
            crate::orders::MetaEntry,
            crate::client::Balance,
            crate::client::ServiceEntry,
            crate::client::OrderStatus,
            crate::handlers::provider::ProviderOrderStatus,
            crate::handlers::provider::JobProviderStatusResponse,
            crate::handlers::provider::ProviderActionResponse,
        )
    ),
    tags(
        (name = "root", description = "Service information and health"),
        (name = "jobs", description = "Job store administration"),
        (name = "orders", description = "Order lifecycle intake"),
        (name = "provider", description = "Provider pass-through"),
    ),
    info(
        title = "SMM Dispatch API",
        description = "Admin API for the SMM order dispatch pipeline",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
