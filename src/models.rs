use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::access::{NavigationLinks, Role, RoleSet};
use crate::reorder::{Ordered, Position};

// --- Core Schemas (Mapped to Storage) ---

/// User
///
/// The identity record from the `public.users` table. The auth collaborator owns it;
/// the portal only reads `role` (and changes it from user management).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// Folder
///
/// Top-level grouping of modules. All folders share one ordering domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Folder {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub display_order: i32,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
}

/// Module
///
/// A unit of instructional content. `view_roles`/`edit_roles` are the minimal roles
/// required to read or author it (see `access::can_access`). Siblings are the modules
/// sharing the same `folder_id`, unfiled modules (`folder_id = None`) included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Module {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub folder_id: Option<Uuid>,
    pub display_order: i32,
    pub view_roles: RoleSet,
    pub edit_roles: RoleSet,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
}

/// Step
///
/// One instruction. `order` is 1-based and always equal to the step's position + 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Step {
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
}

impl Step {
    pub fn empty() -> Self {
        Self {
            order: 0,
            description: String::new(),
            image_path: None,
        }
    }
}

/// SubModule
///
/// Holds the ordered instruction steps of a module. The portal creates at most one
/// per module, titled [`INSTRUCTIONS_TITLE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SubModule {
    pub id: Uuid,
    pub module_id: Uuid,
    pub title: String,
    pub content: Option<String>,
    pub steps: Vec<Step>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

pub const INSTRUCTIONS_TITLE: &str = "Instructions";

impl Ordered for Folder {
    fn order_id(&self) -> Uuid {
        self.id
    }
    fn display_order(&self) -> i32 {
        self.display_order
    }
}

impl Ordered for Module {
    fn order_id(&self) -> Uuid {
        self.id
    }
    fn display_order(&self) -> i32 {
        self.display_order
    }
}

// --- Request Payloads (Input Schemas) ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct FolderRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// ModuleRequest
///
/// Create/update payload for a module. Updates replace every field, matching the
/// management form which always submits the full module.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ModuleRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub folder_id: Option<Uuid>,
    pub view_roles: RoleSet,
    pub edit_roles: RoleSet,
    /// When present, the module's instruction steps are replaced with this list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<Step>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ReplaceStepsRequest {
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct MoveRequest {
    pub direction: crate::reorder::Direction,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateRoleRequest {
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

// --- Output Schemas ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[ts(type = "string")]
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

/// UserProfile
///
/// Output of `GET /me`: the user record plus what the portal should show them.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub role_name: String,
    pub navigation: NavigationLinks,
}

/// ModuleEntry
///
/// A module as listed inside a folder, with the flags the listing needs to render
/// its controls.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ModuleEntry {
    pub module: Module,
    pub position: Position,
    pub can_edit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct FolderEntry {
    pub folder: Folder,
    pub position: Position,
    pub module_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct FolderView {
    pub folder: Folder,
    pub modules: Vec<ModuleEntry>,
    pub can_reorder: bool,
}

/// StepView
///
/// A step with its image resolved to a public URL.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct StepView {
    pub order: u32,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SubModuleView {
    pub id: Uuid,
    pub title: String,
    pub content: Option<String>,
    pub steps: Vec<StepView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ModuleDetail {
    pub module: Module,
    pub can_edit: bool,
    pub sub_modules: Vec<SubModuleView>,
}

/// DashboardSummary
///
/// Landing page payload: how much the subject can see, the first folders in display
/// order and the most recently created modules.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct DashboardSummary {
    pub total_modules: usize,
    pub folders: Vec<FolderEntry>,
    pub recent_modules: Vec<Module>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ImageUploadResponse {
    pub path: String,
    pub public_url: String,
}

/// UserFilter
///
/// Query parameters of the user-management listing. Every filter is optional and they
/// combine with AND.
#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct UserFilter {
    /// Case-insensitive substring of the email.
    pub search: Option<String>,
    pub role: Option<Role>,
    /// Calendar day (UTC) the account was created on.
    pub created_on: Option<NaiveDate>,
}

impl UserFilter {
    pub fn matches(&self, user: &User) -> bool {
        let matches_search = self.search.as_deref().is_none_or(|term| {
            user.email.to_lowercase().contains(&term.to_lowercase())
        });
        let matches_role = self.role.is_none_or(|role| user.role == role);
        let matches_date = self
            .created_on
            .is_none_or(|day| user.created_at.date_naive() == day);
        matches_search && matches_role && matches_date
    }
}

#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct ModuleSearch {
    /// Case-insensitive substring of the title or description.
    pub search: Option<String>,
}
