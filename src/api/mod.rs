//! HTTP status surface: health and registry status.
//!
//! Not part of the negotiation protocol; meant for load balancers and
//! operators polling the relay.

pub mod system;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI description of the status endpoints.
#[derive(Debug, OpenApi)]
#[openapi(
    paths(system::health_handler, system::status_handler),
    components(schemas(system::HealthResponse, crate::app_state::RelayStatus)),
    tags((name = "System", description = "Health and status endpoints"))
)]
pub struct ApiDoc;

/// Builds the router with all HTTP endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new().merge(system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
}
