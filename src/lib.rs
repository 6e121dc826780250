use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Pure domain logic: no I/O.
pub mod access;
pub mod reorder;
pub mod steps;

// Data shapes, failures and the content tree built on top of them.
pub mod content;
pub mod error;
pub mod models;

// Collaborators and the HTTP surface.
pub mod auth;
pub mod config;
pub mod handlers;
pub mod repository;
pub mod session;
pub mod storage;

pub mod routes;
use auth::AuthUser;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use access::{Capability, Role, RoleSet, can_access};
pub use config::AppConfig;
pub use error::{AuthError, PortalError, PortalResult};
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};
pub use session::{AuthProviderState, SessionManager, SupabaseAuthProvider};
pub use storage::{MockStorageService, S3StorageClient, StorageState};

/// ApiDoc
///
/// OpenAPI document for every routed handler, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::login, handlers::logout, handlers::get_me, handlers::get_dashboard,
        handlers::get_folders, handlers::get_folder, handlers::get_module,
        handlers::create_folder, handlers::update_folder, handlers::delete_folder,
        handlers::move_folder, handlers::list_managed_modules, handlers::create_module,
        handlers::update_module, handlers::delete_module, handlers::replace_steps,
        handlers::move_module, handlers::upload_image, handlers::list_users,
        handlers::update_user_role
    ),
    components(
        schemas(
            access::Role, access::NavigationLinks, reorder::Direction, reorder::Position,
            reorder::ReorderUpdate, models::User, models::Folder, models::Module,
            models::Step, models::SubModule, models::FolderRequest, models::ModuleRequest,
            models::ReplaceStepsRequest, models::MoveRequest, models::UpdateRoleRequest,
            models::LoginRequest, models::LoginResponse, models::UserProfile,
            models::ModuleEntry, models::FolderEntry, models::FolderView, models::StepView,
            models::SubModuleView, models::ModuleDetail, models::DashboardSummary,
            models::ImageUploadResponse, error::ErrorResponse,
        )
    ),
    tags(
        (name = "training-portal", description = "Role-gated training content API")
    )
)]
pub struct ApiDoc;

/// AppState
///
/// The shared state of every request: the three collaborators and the configuration.
#[derive(Clone)]
pub struct AppState {
    pub repo: RepositoryState,
    pub storage: StorageState,
    /// Auth provider used by login/logout. Token validation itself is local (JWT).
    pub auth: AuthProviderState,
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for StorageState {
    fn from_ref(app_state: &AppState) -> StorageState {
        app_state.storage.clone()
    }
}

impl FromRef<AppState> for AuthProviderState {
    fn from_ref(app_state: &AppState) -> AuthProviderState {
        app_state.auth.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Rejects the request unless `AuthUser` can be extracted from it. The extractor's
/// rejection (`PortalError::Auth`) becomes the response, so an expired token reaches
/// the client as `session_expired`.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles the routers, the auth layer, and the observability stack.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        .nest(
            "/admin",
            admin::admin_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                // Outermost: every request gets an id before the span is opened.
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Opens the per-request span, tagged with the `x-request-id` so every log line of a
/// request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
