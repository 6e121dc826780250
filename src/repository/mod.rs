use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::access::Role;
use crate::error::PortalResult;
use crate::models::{Folder, FolderRequest, Module, ModuleRequest, Step, SubModule, User};
use crate::reorder::ReorderUpdate;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;

/// Which sibling set a reorder batch targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Folder,
    Module,
}

/// ModuleFilter
///
/// `All` lists every module; `Folder(None)` lists the unfiled modules, which form their
/// own ordering domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleFilter {
    All,
    Folder(Option<Uuid>),
}

/// Repository Trait
///
/// The persistence collaborator. Handlers and the content layer only see this trait,
/// so the Postgres backend and the in-memory backend are interchangeable.
///
/// Ordering contract: listings of folders and of a module sibling set come back sorted
/// by `display_order`. Create appends at the end of the ordering domain; delete (and a
/// module changing folder) compacts the remaining siblings, so every mutation leaves a
/// gapless `0..N-1` sequence behind.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn get_user(&self, id: Uuid) -> PortalResult<Option<User>>;
    /// Newest accounts first.
    async fn list_users(&self) -> PortalResult<Vec<User>>;
    async fn update_user_role(&self, id: Uuid, role: Role) -> PortalResult<User>;

    // --- Folders ---
    async fn list_folders(&self) -> PortalResult<Vec<Folder>>;
    async fn get_folder(&self, id: Uuid) -> PortalResult<Folder>;
    async fn create_folder(&self, req: FolderRequest, created_by: Uuid) -> PortalResult<Folder>;
    async fn update_folder(
        &self,
        id: Uuid,
        req: FolderRequest,
        updated_by: Uuid,
    ) -> PortalResult<Folder>;
    /// Does not touch the folder's modules; they keep their `folder_id`.
    async fn delete_folder(&self, id: Uuid) -> PortalResult<()>;

    // --- Modules ---
    async fn list_modules(&self, filter: ModuleFilter) -> PortalResult<Vec<Module>>;
    async fn get_module(&self, id: Uuid) -> PortalResult<Module>;
    async fn create_module(&self, req: ModuleRequest, created_by: Uuid) -> PortalResult<Module>;
    async fn update_module(&self, id: Uuid, req: ModuleRequest) -> PortalResult<Module>;
    /// Removes the module and its sub-modules.
    async fn delete_module(&self, id: Uuid) -> PortalResult<()>;

    // --- Sub-modules ---
    async fn get_sub_modules(&self, module_id: Uuid) -> PortalResult<Vec<SubModule>>;
    /// Atomically replaces the module's instruction steps. An empty list removes the
    /// sub-module and returns `None`.
    async fn replace_sub_module_steps(
        &self,
        module_id: Uuid,
        steps: Vec<Step>,
    ) -> PortalResult<Option<SubModule>>;

    // --- Ordering ---
    /// Applies a reorder plan as one batch. Each update only applies if the item still
    /// sits at `previous_order`; otherwise nothing is applied and `Conflict` is returned.
    async fn apply_reorder(&self, kind: OrderKind, updates: &[ReorderUpdate]) -> PortalResult<()>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;
