//! OpenAPI document for the REST surface.

use utoipa::OpenApi;

use super::handlers::{state, system};
use crate::domain::LastState;
use crate::error::{ErrorBody, ErrorResponse};

/// Generated OpenAPI description of the relay's REST endpoints.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "coord-relay",
        description = "Read-only views of the location relay. Publishing and queries go over the `/ws` WebSocket."
    ),
    paths(
        system::health_handler,
        state::get_state,
        state::get_connections,
    ),
    components(schemas(
        system::HealthResponse,
        state::ConnectionCountResponse,
        LastState,
        ErrorResponse,
        ErrorBody,
    )),
    tags(
        (name = "System", description = "Service health"),
        (name = "Relay", description = "Registry and cached state"),
    )
)]
pub struct ApiDoc;

/// Swagger UI at `/swagger-ui`, serving the document at
/// `/api-docs/openapi.json`.
#[cfg(feature = "swagger-ui")]
pub fn swagger_ui() -> utoipa_swagger_ui::SwaggerUi {
    utoipa_swagger_ui::SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi())
}
