use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Admin Router Module
///
/// Content and user management, nested under `/admin`.
///
/// Access Control:
/// The router is wrapped in the authentication layer; each handler then checks its own
/// requirement. Folder CRUD, module creation and image upload need `back_office` or
/// above. Editing a module needs its `edit_roles`. Reordering and user management are
/// admin only.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // --- Folders ---
        .route("/folders", post(handlers::create_folder))
        .route(
            "/folders/{id}",
            put(handlers::update_folder).delete(handlers::delete_folder),
        )
        // POST /admin/folders/{id}/move  { "direction": "up" | "down" }
        .route("/folders/{id}/move", post(handlers::move_folder))
        // --- Modules ---
        .route(
            "/modules",
            get(handlers::list_managed_modules).post(handlers::create_module),
        )
        .route(
            "/modules/{id}",
            put(handlers::update_module).delete(handlers::delete_module),
        )
        // PUT /admin/modules/{id}/steps
        // Saves the whole step list in one write.
        .route("/modules/{id}/steps", put(handlers::replace_steps))
        .route("/modules/{id}/move", post(handlers::move_module))
        // POST /admin/uploads/images?filename=...
        // Raw image body; returns the stored path and its public URL.
        .route("/uploads/images", post(handlers::upload_image))
        // --- Users ---
        .route("/users", get(handlers::list_users))
        .route("/users/{id}/role", put(handlers::update_user_role))
}
