//! C5/C6 — Control and Transfer surfaces: router assembly shared by both.

pub mod control_api;
pub mod transfer_api;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::app_state::AppState;

/// Identifies the caller for rate-limiting purposes. Prefers an explicit
/// `x-client-id` header (used by tests and well-behaved clients that sit
/// behind a shared egress IP) and falls back to the socket's remote
/// address when available.
#[derive(Debug, Clone)]
pub struct ClientIdentity(pub String);

impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(header) = parts.headers.get("x-client-id") {
            if let Ok(value) = header.to_str() {
                return Ok(ClientIdentity(value.to_string()));
            }
        }
        if let Some(connect_info) =
            parts.extensions.get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        {
            return Ok(ClientIdentity(connect_info.0.to_string()));
        }
        Ok(ClientIdentity("unknown".to_string()))
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        control_api::health,
        control_api::metrics,
        control_api::register,
        control_api::peers,
        control_api::files,
        control_api::search,
        control_api::bootstrap,
        control_api::status,
    ),
    components(schemas(
        control_api::HealthResponse,
        control_api::RegisterRequest,
        control_api::RegisterResponse,
        control_api::PeersResponse,
        control_api::FilesResponseBody,
        control_api::SearchResponse,
        control_api::SearchResultEntry,
        control_api::BootstrapResponse,
        control_api::StatusResponse,
        crate::client::IndexedFile,
        crate::indexer::FileMeta,
        crate::indexer::FileKind,
        crate::peer_state::Stats,
    ))
)]
pub struct ApiDoc;

/// Builds the control surface router. `/health` and `/metrics` bypass the
/// global rate limit per spec §4.4; every other route is wrapped with it.
pub fn control_router(state: AppState) -> Router {
    let unrestricted = Router::new()
        .route("/health", get(control_api::health))
        .route("/metrics", get(control_api::metrics));

    let restricted = Router::new()
        .route("/register", post(control_api::register))
        .route("/peers", get(control_api::peers))
        .route("/files", get(control_api::files))
        .route("/search", get(control_api::search))
        .route("/bootstrap", post(control_api::bootstrap))
        .route("/status", get(control_api::status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            control_api::rate_limit,
        ));

    // `allow_credentials(true)` can't be paired with `AllowOrigin::any()` (the
    // underlying crate panics), so mirroring the request's `Origin` header is
    // the only way to satisfy spec §6's "allow all origins ... credentials".
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(tower_http::cors::AllowOrigin::mirror_request())
        .allow_headers(Any)
        .allow_credentials(true);

    unrestricted
        .merge(restricted)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            control_api::record_request,
        ))
        .layer(cors)
        .with_state(state)
}

/// Builds the transfer surface router: chunked download/upload, each
/// subject to the shared `downloads` rate bucket (spec §4.5).
pub fn transfer_router(state: AppState) -> Router {
    Router::new()
        .route("/download/{filename}", get(transfer_api::download))
        .route("/upload", post(transfer_api::upload))
        .with_state(state)
}
