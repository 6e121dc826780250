use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Authenticated Router Module
///
/// Routes for any user with a valid session. Every listing here is narrowed to the
/// content the caller's role may view; nothing in this module mutates content.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /me
        // Profile plus the management entries the role unlocks.
        .route("/me", get(handlers::get_me))
        // POST /auth/logout
        .route("/auth/logout", post(handlers::logout))
        // GET /dashboard
        .route("/dashboard", get(handlers::get_dashboard))
        // GET /folders
        .route("/folders", get(handlers::get_folders))
        // GET /folders/{id}?search=...
        // Position flags are computed against the full folder, not the filtered view.
        .route("/folders/{id}", get(handlers::get_folder))
        // GET /modules/{id}
        // Hidden modules answer 404 rather than 403.
        .route("/modules/{id}", get(handlers::get_module))
}
