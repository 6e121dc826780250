//! Content tree: folder -> module -> sub-module -> step.
//!
//! Role filtering goes through `access::can_access`; anything that changes sibling order
//! goes through `reorder`. The functions that touch storage take the repository
//! explicitly; the rest are pure.

use std::collections::HashMap;
use uuid::Uuid;

use crate::access::{Capability, Role, has_capability};
use crate::auth::AuthUser;
use crate::error::{PortalError, PortalResult};
use crate::models::{
    DashboardSummary, Folder, FolderEntry, FolderView, Module, ModuleDetail, ModuleEntry,
    ModuleRequest, Step, StepView, SubModule, SubModuleView,
};
use crate::reorder::{self, Direction, Position, ReorderUpdate};
use crate::repository::{ModuleFilter, OrderKind, Repository};
use crate::steps::StepList;
use crate::storage::StorageService;

const DASHBOARD_FOLDERS: usize = 5;
const DASHBOARD_RECENT_MODULES: usize = 5;

pub fn can_view(role: Role, module: &Module) -> bool {
    crate::access::can_access(role, &module.view_roles)
}

pub fn can_edit(role: Role, module: &Module) -> bool {
    crate::access::can_access(role, &module.edit_roles)
}

/// Keeps the modules `role` may view, preserving their order.
pub fn visible_modules(role: Role, modules: Vec<Module>) -> Vec<Module> {
    modules.into_iter().filter(|m| can_view(role, m)).collect()
}

/// Case-insensitive match on title or description. An empty term matches everything.
pub fn matches_search(module: &Module, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return true;
    }
    module.title.to_lowercase().contains(&term)
        || module
            .description
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(&term))
}

/// folder_view
///
/// `siblings` is the folder's full module list in display order. Position flags are
/// computed against that full list, since that is the set a move operates on, and
/// only then is it narrowed to what `role` may see and to `search`.
pub fn folder_view(role: Role, folder: Folder, siblings: &[Module], search: Option<&str>) -> FolderView {
    let modules = siblings
        .iter()
        .enumerate()
        .filter(|(_, m)| can_view(role, m))
        .filter(|(_, m)| search.is_none_or(|term| matches_search(m, term)))
        .map(|(index, m)| ModuleEntry {
            module: m.clone(),
            position: Position::within(index, siblings.len()),
            can_edit: can_edit(role, m),
        })
        .collect();

    FolderView {
        folder,
        modules,
        can_reorder: has_capability(role, Capability::ReorderContent),
    }
}

/// management_listing
///
/// Every module `role` may view, each positioned within its own sibling set (its
/// folder, or the unfiled modules). Sibling sets are grouped and sorted once.
pub fn management_listing(role: Role, modules: &[Module]) -> Vec<ModuleEntry> {
    let mut domains: HashMap<Option<Uuid>, Vec<&Module>> = HashMap::new();
    for module in modules {
        domains.entry(module.folder_id).or_default().push(module);
    }

    let mut positions: HashMap<Uuid, Position> = HashMap::with_capacity(modules.len());
    for siblings in domains.values_mut() {
        siblings.sort_by_key(|m| m.display_order);
        let len = siblings.len();
        for (index, m) in siblings.iter().enumerate() {
            positions.insert(m.id, Position::within(index, len));
        }
    }

    modules
        .iter()
        .filter(|m| can_view(role, m))
        .filter_map(|m| {
            positions.get(&m.id).map(|position| ModuleEntry {
                module: m.clone(),
                position: *position,
                can_edit: can_edit(role, m),
            })
        })
        .collect()
}

/// Folder listing with positions and the number of modules `role` can see in each.
pub fn folder_entries(role: Role, folders: Vec<Folder>, modules: &[Module]) -> Vec<FolderEntry> {
    let len = folders.len();
    folders
        .into_iter()
        .enumerate()
        .map(|(index, folder)| {
            let module_count = modules
                .iter()
                .filter(|m| m.folder_id == Some(folder.id) && can_view(role, m))
                .count();
            FolderEntry {
                folder,
                position: Position::within(index, len),
                module_count,
            }
        })
        .collect()
}

/// dashboard
///
/// Counts and lists only what `role` may view.
pub fn dashboard(role: Role, folders: Vec<Folder>, modules: Vec<Module>) -> DashboardSummary {
    let visible = visible_modules(role, modules);
    let mut folders = folder_entries(role, folders, &visible);
    folders.truncate(DASHBOARD_FOLDERS);

    let mut recent = visible.clone();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    recent.truncate(DASHBOARD_RECENT_MODULES);

    DashboardSummary {
        total_modules: visible.len(),
        folders,
        recent_modules: recent,
    }
}

pub fn step_view(step: &Step, storage: &dyn StorageService) -> StepView {
    StepView {
        order: step.order,
        description: step.description.clone(),
        image_path: step.image_path.clone(),
        image_url: step.image_path.as_deref().map(|path| storage.public_url(path)),
    }
}

pub fn module_detail(
    role: Role,
    module: Module,
    sub_modules: Vec<SubModule>,
    storage: &dyn StorageService,
) -> ModuleDetail {
    let sub_modules = sub_modules
        .into_iter()
        .map(|sub| SubModuleView {
            id: sub.id,
            title: sub.title,
            content: sub.content,
            steps: sub.steps.iter().map(|step| step_view(step, storage)).collect(),
        })
        .collect();

    ModuleDetail {
        can_edit: can_edit(role, &module),
        module,
        sub_modules,
    }
}

/// Rejects module payloads that would break the data model invariants and normalizes
/// the step list it carries.
pub fn validate_module_request(mut req: ModuleRequest) -> PortalResult<ModuleRequest> {
    req.title = req.title.trim().to_string();
    if req.title.is_empty() {
        return Err(PortalError::validation("title is required"));
    }
    if req.view_roles.is_empty() {
        return Err(PortalError::validation("view_roles must name at least one role"));
    }
    if req.edit_roles.is_empty() {
        return Err(PortalError::validation("edit_roles must name at least one role"));
    }
    req.description = req.description.filter(|d| !d.trim().is_empty());
    req.steps = req.steps.map(normalize_steps);
    Ok(req)
}

pub fn normalize_steps(steps: Vec<Step>) -> Vec<Step> {
    StepList::from(steps).into_steps()
}

/// Loads a module the user may view; hidden modules read as missing.
pub async fn viewable_module(
    repo: &dyn Repository,
    user: &AuthUser,
    id: Uuid,
) -> PortalResult<Module> {
    let module = repo.get_module(id).await?;
    if !user.can_access(&module.view_roles) {
        return Err(PortalError::not_found(format!("module {id}")));
    }
    Ok(module)
}

/// Loads a module the user may edit.
pub async fn editable_module(
    repo: &dyn Repository,
    user: &AuthUser,
    id: Uuid,
) -> PortalResult<Module> {
    let module = repo.get_module(id).await?;
    if !user.can_access(&module.edit_roles) {
        return Err(PortalError::forbidden(format!("module {id} is not editable by this role")));
    }
    Ok(module)
}

/// move_folder
///
/// Plans a one-slot move against the current folder listing and applies it as one
/// batch. Returns the applied updates; empty when the folder was already at the edge.
pub async fn move_folder(
    repo: &dyn Repository,
    id: Uuid,
    direction: Direction,
) -> PortalResult<Vec<ReorderUpdate>> {
    let folders = repo.list_folders().await?;
    if !folders.iter().any(|f| f.id == id) {
        return Err(PortalError::not_found(format!("folder {id}")));
    }
    let plan = reorder::move_one_step(&folders, id, direction);
    apply_plan(repo, OrderKind::Folder, plan).await
}

/// move_module
///
/// The sibling set is the module's folder (or the unfiled modules), read in full from
/// storage rather than from any filtered view.
pub async fn move_module(
    repo: &dyn Repository,
    id: Uuid,
    direction: Direction,
) -> PortalResult<Vec<ReorderUpdate>> {
    let module = repo.get_module(id).await?;
    let siblings = repo.list_modules(ModuleFilter::Folder(module.folder_id)).await?;
    let plan = reorder::move_one_step(&siblings, id, direction);
    apply_plan(repo, OrderKind::Module, plan).await
}

async fn apply_plan(
    repo: &dyn Repository,
    kind: OrderKind,
    plan: Vec<ReorderUpdate>,
) -> PortalResult<Vec<ReorderUpdate>> {
    if plan.is_empty() {
        return Ok(plan);
    }
    repo.apply_reorder(kind, &plan).await?;
    tracing::info!(?kind, updates = plan.len(), "reorder applied");
    Ok(plan)
}
