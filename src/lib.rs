use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
// Conditionally import CORS and SwaggerUi only when needed (not test)
#[cfg(not(test))]
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
#[cfg(not(test))]
use utoipa_swagger_ui::SwaggerUi;

pub mod config;
pub mod detect;
pub mod entities;
pub mod error;
pub mod jobs;
pub mod rate_limit;
pub mod report;
pub mod routes;
pub mod scraper;
pub mod validators;

use config::AppConfig;
use routes::{capture_lead, get_audit, process_jobs, start_audit};

/// Shared handler state: one database pool, one HTTP client, immutable
/// configuration. Cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub http: reqwest::Client,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(db: DatabaseConnection, config: AppConfig) -> Self {
        Self {
            db,
            http: reqwest::Client::new(),
            config: Arc::new(config),
        }
    }
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = String)
    )
)]
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "Service is healthy")
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "CRO Signal API",
        version = "0.1.0"
    ),
    paths(
        routes::audit::start_audit,
        routes::audit::get_audit,
        routes::audit::process_jobs,
        routes::lead::capture_lead,
        health_check
    ),
    components(schemas(
        routes::audit::StartAuditRequest,
        routes::audit::StartAuditResponse,
        routes::audit::AuditStatusResponse,
        routes::audit::ProcessResponse,
        routes::lead::LeadRequest,
        routes::lead::LeadResponse,
        jobs::audit::SweepResult,
        entities::AuditStatus,
        entities::PageType,
        entities::Platform
    ))
)]
struct ApiDoc;

/// Create the application with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    // Build our API documentation (needed regardless for ApiDoc::openapi())
    let api_doc = ApiDoc::openapi();

    let api_routes = Router::new()
        .route("/api/audit/start", post(start_audit))
        .route("/api/audit/{report_id}", get(get_audit))
        .route("/api/audit/process", get(process_jobs).post(process_jobs))
        .route("/api/lead", post(capture_lead))
        .route("/health", get(health_check))
        .with_state(state);

    // Swagger UI only outside tests
    #[cfg(not(test))]
    let docs_router = SwaggerUi::new("/docs").url("/api-doc/openapi.json", api_doc);
    #[cfg(test)]
    let docs_router = {
        let _ = api_doc;
        Router::new()
    };

    let mut app = Router::new().merge(api_routes).merge(docs_router);

    #[cfg(not(test))]
    {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    app
}
