use crate::{
    AppState,
    access::{Capability, Role},
    auth::{self, AuthUser},
    content,
    error::{AuthError, ErrorResponse, PortalError, PortalResult},
    models::{
        DashboardSummary, Folder, FolderEntry, FolderRequest, FolderView, ImageUploadResponse,
        LoginRequest, LoginResponse, Module, ModuleDetail, ModuleEntry, ModuleRequest,
        ModuleSearch, MoveRequest, ReplaceStepsRequest, SubModule, UpdateRoleRequest, User,
        UserFilter, UserProfile,
    },
    reorder::ReorderUpdate,
    repository::{ModuleFilter, Repository},
    storage::image_object_key,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
};
use serde::Deserialize;
use uuid::Uuid;

/// ImageUploadParams
///
/// Query parameters of the image upload endpoint. The body is the raw image.
#[derive(Deserialize, utoipa::IntoParams)]
pub struct ImageUploadParams {
    /// Original file name; only its extension is kept.
    pub filename: String,
}

// --- Session ---

/// login
///
/// [Public Route] Password sign-in through the auth provider. An identity without a
/// portal user record is signed back out and rejected.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> PortalResult<Json<LoginResponse>> {
    let email = payload.email.trim();
    if email.is_empty() || payload.password.is_empty() {
        return Err(PortalError::validation("email and password are required"));
    }

    let session = state.auth.sign_in_with_password(email, &payload.password).await?;

    let Some(user) = state.repo.get_user(session.user_id).await? else {
        if let Err(e) = state.auth.sign_out(&session.access_token).await {
            tracing::warn!(error = %e, "sign-out of orphan identity failed");
        }
        return Err(AuthError::UnknownUser.into());
    };

    tracing::info!(user = %user.id, role = %user.role, "login");
    Ok(Json(LoginResponse {
        access_token: session.access_token,
        refresh_token: session.refresh_token,
        expires_at: session.expires_at,
        user,
    }))
}

/// logout
///
/// [Authenticated Route] Revokes the caller's session at the auth provider. Always
/// answers 204; a failed revocation is only logged.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Signed out"))
)]
pub async fn logout(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> StatusCode {
    if let Some(token) = auth::bearer_from_headers(&headers) {
        if let Err(e) = state.auth.sign_out(token).await {
            tracing::warn!(user = %user.id, error = %e, "provider sign-out failed");
        }
    }
    StatusCode::NO_CONTENT
}

/// get_me
///
/// [Authenticated Route] The caller's profile and the management entries their role
/// unlocks.
#[utoipa::path(
    get,
    path = "/me",
    responses((status = 200, description = "Profile", body = UserProfile))
)]
pub async fn get_me(user: AuthUser, State(state): State<AppState>) -> PortalResult<Json<UserProfile>> {
    let record = state
        .repo
        .get_user(user.id)
        .await?
        .ok_or(AuthError::UnknownUser)?;

    Ok(Json(UserProfile {
        id: record.id,
        email: record.email,
        role: record.role,
        role_name: record.role.display_name().to_string(),
        navigation: crate::access::NavigationLinks::for_role(record.role),
    }))
}

// --- Content (read) ---

/// get_dashboard
///
/// [Authenticated Route] Landing summary, restricted to what the caller may view.
#[utoipa::path(
    get,
    path = "/dashboard",
    responses((status = 200, description = "Dashboard", body = DashboardSummary))
)]
pub async fn get_dashboard(
    user: AuthUser,
    State(state): State<AppState>,
) -> PortalResult<Json<DashboardSummary>> {
    let folders = state.repo.list_folders().await?;
    let modules = state.repo.list_modules(ModuleFilter::All).await?;
    Ok(Json(content::dashboard(user.role, folders, modules)))
}

/// get_folders
///
/// [Authenticated Route] All folders in display order with per-folder visible module
/// counts.
#[utoipa::path(
    get,
    path = "/folders",
    responses((status = 200, description = "Folders", body = [FolderEntry]))
)]
pub async fn get_folders(
    user: AuthUser,
    State(state): State<AppState>,
) -> PortalResult<Json<Vec<FolderEntry>>> {
    let folders = state.repo.list_folders().await?;
    let modules = state.repo.list_modules(ModuleFilter::All).await?;
    Ok(Json(content::folder_entries(user.role, folders, &modules)))
}

/// get_folder
///
/// [Authenticated Route] A folder and the modules the caller may view in it.
#[utoipa::path(
    get,
    path = "/folders/{id}",
    params(("id" = Uuid, Path, description = "Folder ID"), ModuleSearch),
    responses(
        (status = 200, description = "Folder", body = FolderView),
        (status = 404, description = "Not Found", body = ErrorResponse)
    )
)]
pub async fn get_folder(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ModuleSearch>,
) -> PortalResult<Json<FolderView>> {
    let folder = state.repo.get_folder(id).await?;
    let siblings = state.repo.list_modules(ModuleFilter::Folder(Some(id))).await?;
    Ok(Json(content::folder_view(
        user.role,
        folder,
        &siblings,
        query.search.as_deref(),
    )))
}

/// get_module
///
/// [Authenticated Route] A module with its instruction steps; image paths are resolved
/// to public URLs. Modules the caller may not view answer 404.
#[utoipa::path(
    get,
    path = "/modules/{id}",
    params(("id" = Uuid, Path, description = "Module ID")),
    responses(
        (status = 200, description = "Module", body = ModuleDetail),
        (status = 404, description = "Not Found", body = ErrorResponse)
    )
)]
pub async fn get_module(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> PortalResult<Json<ModuleDetail>> {
    let module = content::viewable_module(state.repo.as_ref(), &user, id).await?;
    let sub_modules = state.repo.get_sub_modules(id).await?;
    Ok(Json(content::module_detail(
        user.role,
        module,
        sub_modules,
        state.storage.as_ref(),
    )))
}

// --- Folder management ---

fn validate_folder_request(mut req: FolderRequest) -> PortalResult<FolderRequest> {
    req.name = req.name.trim().to_string();
    if req.name.is_empty() {
        return Err(PortalError::validation("name is required"));
    }
    req.description = req.description.filter(|d| !d.trim().is_empty());
    Ok(req)
}

/// create_folder
///
/// [Admin Route] Appends a folder at the end of the folder ordering.
#[utoipa::path(
    post,
    path = "/admin/folders",
    request_body = FolderRequest,
    responses(
        (status = 201, description = "Created", body = Folder),
        (status = 403, description = "Forbidden", body = ErrorResponse)
    )
)]
pub async fn create_folder(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<FolderRequest>,
) -> PortalResult<(StatusCode, Json<Folder>)> {
    user.require(Capability::ManageContent)?;
    let req = validate_folder_request(payload)?;
    let folder = state.repo.create_folder(req, user.id).await?;
    tracing::info!(folder = %folder.id, by = %user.id, "folder created");
    Ok((StatusCode::CREATED, Json(folder)))
}

/// update_folder
#[utoipa::path(
    put,
    path = "/admin/folders/{id}",
    params(("id" = Uuid, Path, description = "Folder ID")),
    request_body = FolderRequest,
    responses((status = 200, description = "Updated", body = Folder))
)]
pub async fn update_folder(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<FolderRequest>,
) -> PortalResult<Json<Folder>> {
    user.require(Capability::ManageContent)?;
    let req = validate_folder_request(payload)?;
    Ok(Json(state.repo.update_folder(id, req, user.id).await?))
}

/// delete_folder
///
/// [Admin Route] Removes the folder and compacts the remaining folders. Its modules
/// are left in place.
#[utoipa::path(
    delete,
    path = "/admin/folders/{id}",
    params(("id" = Uuid, Path, description = "Folder ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found", body = ErrorResponse)
    )
)]
pub async fn delete_folder(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> PortalResult<StatusCode> {
    user.require(Capability::ManageContent)?;
    state.repo.delete_folder(id).await?;
    tracing::info!(folder = %id, by = %user.id, "folder deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// move_folder
///
/// [Admin Route] Moves a folder one slot up or down. Returns the applied updates; an
/// empty list means the folder was already at that edge.
#[utoipa::path(
    post,
    path = "/admin/folders/{id}/move",
    params(("id" = Uuid, Path, description = "Folder ID")),
    request_body = MoveRequest,
    responses(
        (status = 200, description = "Moved", body = [ReorderUpdate]),
        (status = 409, description = "Ordering changed concurrently", body = ErrorResponse)
    )
)]
pub async fn move_folder(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<MoveRequest>,
) -> PortalResult<Json<Vec<ReorderUpdate>>> {
    user.require(Capability::ReorderContent)?;
    let updates = content::move_folder(state.repo.as_ref(), id, payload.direction).await?;
    Ok(Json(updates))
}

// --- Module management ---

async fn ensure_folder(repo: &dyn Repository, folder_id: Option<Uuid>) -> PortalResult<()> {
    let Some(folder_id) = folder_id else {
        return Ok(());
    };
    match repo.get_folder(folder_id).await {
        Ok(_) => Ok(()),
        Err(PortalError::NotFound(_)) => Err(PortalError::validation(format!(
            "folder {folder_id} does not exist"
        ))),
        Err(e) => Err(e),
    }
}

/// list_managed_modules
///
/// [Admin Route] Every module the caller may view, grouped by folder, with edit and
/// move flags for the management screen.
#[utoipa::path(
    get,
    path = "/admin/modules",
    responses((status = 200, description = "Modules", body = [ModuleEntry]))
)]
pub async fn list_managed_modules(
    user: AuthUser,
    State(state): State<AppState>,
) -> PortalResult<Json<Vec<ModuleEntry>>> {
    user.require(Capability::ManageContent)?;
    let modules = state.repo.list_modules(ModuleFilter::All).await?;
    Ok(Json(content::management_listing(user.role, &modules)))
}

/// create_module
///
/// [Admin Route] Creates a module at the end of its folder. When `steps` is present
/// the instruction sub-module is created with it.
#[utoipa::path(
    post,
    path = "/admin/modules",
    request_body = ModuleRequest,
    responses(
        (status = 201, description = "Created", body = Module),
        (status = 400, description = "Invalid payload", body = ErrorResponse)
    )
)]
pub async fn create_module(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<ModuleRequest>,
) -> PortalResult<(StatusCode, Json<Module>)> {
    user.require(Capability::ManageContent)?;
    let req = content::validate_module_request(payload)?;
    ensure_folder(state.repo.as_ref(), req.folder_id).await?;
    let module = state.repo.create_module(req, user.id).await?;
    tracing::info!(module = %module.id, by = %user.id, "module created");
    Ok((StatusCode::CREATED, Json(module)))
}

/// update_module
///
/// [Admin Route] Full replacement of a module. Requires the caller to satisfy the
/// module's current `edit_roles`. The target folder is checked only when it changes.
#[utoipa::path(
    put,
    path = "/admin/modules/{id}",
    params(("id" = Uuid, Path, description = "Module ID")),
    request_body = ModuleRequest,
    responses(
        (status = 200, description = "Updated", body = Module),
        (status = 403, description = "Not an editor", body = ErrorResponse)
    )
)]
pub async fn update_module(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ModuleRequest>,
) -> PortalResult<Json<Module>> {
    let current = content::editable_module(state.repo.as_ref(), &user, id).await?;
    let req = content::validate_module_request(payload)?;
    // A module whose folder was deleted keeps its dangling folder_id until it is moved.
    if req.folder_id != current.folder_id {
        ensure_folder(state.repo.as_ref(), req.folder_id).await?;
    }
    Ok(Json(state.repo.update_module(id, req).await?))
}

/// delete_module
#[utoipa::path(
    delete,
    path = "/admin/modules/{id}",
    params(("id" = Uuid, Path, description = "Module ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not an editor", body = ErrorResponse)
    )
)]
pub async fn delete_module(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> PortalResult<StatusCode> {
    content::editable_module(state.repo.as_ref(), &user, id).await?;
    state.repo.delete_module(id).await?;
    tracing::info!(module = %id, by = %user.id, "module deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// replace_steps
///
/// [Admin Route] Saves the edited step list in one write. Steps are renumbered from 1
/// before saving; an empty list removes the instructions.
#[utoipa::path(
    put,
    path = "/admin/modules/{id}/steps",
    params(("id" = Uuid, Path, description = "Module ID")),
    request_body = ReplaceStepsRequest,
    responses((status = 200, description = "Saved; null once the list is empty", body = SubModule))
)]
pub async fn replace_steps(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReplaceStepsRequest>,
) -> PortalResult<Json<Option<SubModule>>> {
    content::editable_module(state.repo.as_ref(), &user, id).await?;
    let steps = content::normalize_steps(payload.steps);
    let saved = state.repo.replace_sub_module_steps(id, steps).await?;
    Ok(Json(saved))
}

/// move_module
///
/// [Admin Route] Moves a module one slot within its folder.
#[utoipa::path(
    post,
    path = "/admin/modules/{id}/move",
    params(("id" = Uuid, Path, description = "Module ID")),
    request_body = MoveRequest,
    responses(
        (status = 200, description = "Moved", body = [ReorderUpdate]),
        (status = 409, description = "Ordering changed concurrently", body = ErrorResponse)
    )
)]
pub async fn move_module(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<MoveRequest>,
) -> PortalResult<Json<Vec<ReorderUpdate>>> {
    user.require(Capability::ReorderContent)?;
    let updates = content::move_module(state.repo.as_ref(), id, payload.direction).await?;
    Ok(Json(updates))
}

/// upload_image
///
/// [Admin Route] Stores a step image under a fresh object name and returns its path
/// (to save on the step) and public URL (for preview).
#[utoipa::path(
    post,
    path = "/admin/uploads/images",
    params(ImageUploadParams),
    request_body(content = Vec<u8>, content_type = "image/*"),
    responses(
        (status = 200, description = "Stored", body = ImageUploadResponse),
        (status = 400, description = "Not an image", body = ErrorResponse)
    )
)]
pub async fn upload_image(
    user: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<ImageUploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> PortalResult<Json<ImageUploadResponse>> {
    user.require(Capability::ManageContent)?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with("image/") {
        return Err(PortalError::validation("content type must be an image"));
    }
    if body.is_empty() {
        return Err(PortalError::validation("empty upload"));
    }

    let key = image_object_key(&params.filename);
    let path = state
        .storage
        .upload_image(&key, body.to_vec(), content_type)
        .await?;
    let public_url = state.storage.public_url(&path);
    Ok(Json(ImageUploadResponse { path, public_url }))
}

// --- User management ---

/// list_users
///
/// [Admin Route] Users newest first, filtered by email substring, role and creation day.
#[utoipa::path(
    get,
    path = "/admin/users",
    params(UserFilter),
    responses((status = 200, description = "Users", body = [User]))
)]
pub async fn list_users(
    user: AuthUser,
    State(state): State<AppState>,
    Query(filter): Query<UserFilter>,
) -> PortalResult<Json<Vec<User>>> {
    user.require(Capability::ManageUsers)?;
    let users = state.repo.list_users().await?;
    Ok(Json(users.into_iter().filter(|u| filter.matches(u)).collect()))
}

/// update_user_role
///
/// [Admin Route] Changes a user's role. Takes effect on their next request since the
/// role is resolved per request. An admin cannot demote themselves.
#[utoipa::path(
    put,
    path = "/admin/users/{id}/role",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Updated", body = User),
        (status = 400, description = "Self-demotion", body = ErrorResponse)
    )
)]
pub async fn update_user_role(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRoleRequest>,
) -> PortalResult<Json<User>> {
    user.require(Capability::ManageUsers)?;
    if id == user.id && payload.role != Role::Admin {
        return Err(PortalError::validation("admins cannot change their own role"));
    }
    let updated = state.repo.update_user_role(id, payload.role).await?;
    tracing::info!(target_user = %id, role = %updated.role, by = %user.id, "role changed");
    Ok(Json(updated))
}
