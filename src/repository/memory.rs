//! In-memory implementation of the portal repository.
//!
//! Used by the test-suite and by local runs without `DATABASE_URL`. State lives in
//! `HashMap`s behind a single `tokio::sync::RwLock`; every mutation runs under the write
//! lock, which is what makes reorder batches and step replacement atomic here.
//! Nothing is durable.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ModuleFilter, OrderKind, Repository};
use crate::access::Role;
use crate::error::{PortalError, PortalResult};
use crate::models::{
    Folder, FolderRequest, INSTRUCTIONS_TITLE, Module, ModuleRequest, Step, SubModule, User,
};
use crate::reorder::{self, ReorderUpdate};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    folders: HashMap<Uuid, Folder>,
    modules: HashMap<Uuid, Module>,
    /// Keyed by `module_id`: at most one sub-module per module.
    sub_modules: HashMap<Uuid, SubModule>,
}

impl State {
    fn sorted_folders(&self) -> Vec<Folder> {
        let mut folders: Vec<Folder> = self.folders.values().cloned().collect();
        folders.sort_by_key(|f| (f.display_order, f.created_at));
        folders
    }

    fn module_siblings(&self, folder_id: Option<Uuid>) -> Vec<Module> {
        let mut modules: Vec<Module> = self
            .modules
            .values()
            .filter(|m| m.folder_id == folder_id)
            .cloned()
            .collect();
        modules.sort_by_key(|m| (m.display_order, m.created_at));
        modules
    }

    fn compact_folders(&mut self) {
        for update in reorder::compact(&self.sorted_folders()) {
            if let Some(folder) = self.folders.get_mut(&update.id) {
                folder.display_order = update.new_order;
            }
        }
    }

    fn compact_modules(&mut self, folder_id: Option<Uuid>) {
        for update in reorder::compact(&self.module_siblings(folder_id)) {
            if let Some(module) = self.modules.get_mut(&update.id) {
                module.display_order = update.new_order;
            }
        }
    }

    fn current_order(&self, kind: OrderKind, id: Uuid) -> Option<i32> {
        match kind {
            OrderKind::Folder => self.folders.get(&id).map(|f| f.display_order),
            OrderKind::Module => self.modules.get(&id).map(|m| m.display_order),
        }
    }

    fn set_order(&mut self, kind: OrderKind, id: Uuid, order: i32) {
        match kind {
            OrderKind::Folder => {
                if let Some(folder) = self.folders.get_mut(&id) {
                    folder.display_order = order;
                }
            }
            OrderKind::Module => {
                if let Some(module) = self.modules.get_mut(&id) {
                    module.display_order = order;
                }
            }
        }
    }

    fn replace_steps(&mut self, module_id: Uuid, steps: Vec<Step>) -> Option<SubModule> {
        if steps.is_empty() {
            self.sub_modules.remove(&module_id);
            return None;
        }
        let sub_module = match self.sub_modules.get(&module_id) {
            Some(existing) => SubModule {
                steps,
                ..existing.clone()
            },
            None => SubModule {
                id: Uuid::new_v4(),
                module_id,
                title: INSTRUCTIONS_TITLE.to_string(),
                content: None,
                steps,
                created_at: Utc::now(),
            },
        };
        self.sub_modules.insert(module_id, sub_module.clone());
        Some(sub_module)
    }
}

/// InMemoryRepository
#[derive(Default)]
pub struct InMemoryRepository {
    state: RwLock<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a user record; identities are owned by the auth collaborator, so there is
    /// no `create_user` on the trait.
    pub async fn insert_user(&self, user: User) {
        self.state.write().await.users.insert(user.id, user);
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_user(&self, id: Uuid) -> PortalResult<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn list_users(&self) -> PortalResult<Vec<User>> {
        let mut users: Vec<User> = self.state.read().await.users.values().cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users)
    }

    async fn update_user_role(&self, id: Uuid, role: Role) -> PortalResult<User> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| PortalError::not_found(format!("user {id}")))?;
        user.role = role;
        Ok(user.clone())
    }

    async fn list_folders(&self) -> PortalResult<Vec<Folder>> {
        Ok(self.state.read().await.sorted_folders())
    }

    async fn get_folder(&self, id: Uuid) -> PortalResult<Folder> {
        self.state
            .read()
            .await
            .folders
            .get(&id)
            .cloned()
            .ok_or_else(|| PortalError::not_found(format!("folder {id}")))
    }

    async fn create_folder(&self, req: FolderRequest, created_by: Uuid) -> PortalResult<Folder> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let folder = Folder {
            id: Uuid::new_v4(),
            name: req.name,
            description: req.description,
            display_order: reorder::next_position(state.folders.len()),
            created_at: now,
            updated_at: now,
            created_by: Some(created_by),
            updated_by: Some(created_by),
        };
        state.folders.insert(folder.id, folder.clone());
        Ok(folder)
    }

    async fn update_folder(
        &self,
        id: Uuid,
        req: FolderRequest,
        updated_by: Uuid,
    ) -> PortalResult<Folder> {
        let mut state = self.state.write().await;
        let folder = state
            .folders
            .get_mut(&id)
            .ok_or_else(|| PortalError::not_found(format!("folder {id}")))?;
        folder.name = req.name;
        folder.description = req.description;
        folder.updated_at = Utc::now();
        folder.updated_by = Some(updated_by);
        Ok(folder.clone())
    }

    async fn delete_folder(&self, id: Uuid) -> PortalResult<()> {
        let mut state = self.state.write().await;
        state
            .folders
            .remove(&id)
            .ok_or_else(|| PortalError::not_found(format!("folder {id}")))?;
        state.compact_folders();
        Ok(())
    }

    async fn list_modules(&self, filter: ModuleFilter) -> PortalResult<Vec<Module>> {
        let state = self.state.read().await;
        Ok(match filter {
            ModuleFilter::Folder(folder_id) => state.module_siblings(folder_id),
            ModuleFilter::All => {
                let mut modules: Vec<Module> = state.modules.values().cloned().collect();
                modules.sort_by_key(|m| (m.folder_id, m.display_order));
                modules
            }
        })
    }

    async fn get_module(&self, id: Uuid) -> PortalResult<Module> {
        self.state
            .read()
            .await
            .modules
            .get(&id)
            .cloned()
            .ok_or_else(|| PortalError::not_found(format!("module {id}")))
    }

    async fn create_module(&self, req: ModuleRequest, created_by: Uuid) -> PortalResult<Module> {
        let mut state = self.state.write().await;
        let module = Module {
            id: Uuid::new_v4(),
            title: req.title,
            description: req.description,
            folder_id: req.folder_id,
            display_order: reorder::next_position(state.module_siblings(req.folder_id).len()),
            view_roles: req.view_roles,
            edit_roles: req.edit_roles,
            created_at: Utc::now(),
            created_by: Some(created_by),
        };
        state.modules.insert(module.id, module.clone());
        if let Some(steps) = req.steps {
            state.replace_steps(module.id, steps);
        }
        Ok(module)
    }

    async fn update_module(&self, id: Uuid, req: ModuleRequest) -> PortalResult<Module> {
        let mut state = self.state.write().await;
        let previous_folder = state
            .modules
            .get(&id)
            .map(|m| m.folder_id)
            .ok_or_else(|| PortalError::not_found(format!("module {id}")))?;

        let moved = previous_folder != req.folder_id;
        let new_order = moved.then(|| reorder::next_position(state.module_siblings(req.folder_id).len()));

        let updated = {
            let module = state
                .modules
                .get_mut(&id)
                .ok_or_else(|| PortalError::not_found(format!("module {id}")))?;
            module.title = req.title;
            module.description = req.description;
            module.folder_id = req.folder_id;
            module.view_roles = req.view_roles;
            module.edit_roles = req.edit_roles;
            if let Some(order) = new_order {
                module.display_order = order;
            }
            module.clone()
        };

        if moved {
            state.compact_modules(previous_folder);
        }
        if let Some(steps) = req.steps {
            state.replace_steps(id, steps);
        }
        Ok(updated)
    }

    async fn delete_module(&self, id: Uuid) -> PortalResult<()> {
        let mut state = self.state.write().await;
        let module = state
            .modules
            .remove(&id)
            .ok_or_else(|| PortalError::not_found(format!("module {id}")))?;
        state.sub_modules.remove(&id);
        state.compact_modules(module.folder_id);
        Ok(())
    }

    async fn get_sub_modules(&self, module_id: Uuid) -> PortalResult<Vec<SubModule>> {
        Ok(self
            .state
            .read()
            .await
            .sub_modules
            .get(&module_id)
            .cloned()
            .into_iter()
            .collect())
    }

    async fn replace_sub_module_steps(
        &self,
        module_id: Uuid,
        steps: Vec<Step>,
    ) -> PortalResult<Option<SubModule>> {
        let mut state = self.state.write().await;
        if !state.modules.contains_key(&module_id) {
            return Err(PortalError::not_found(format!("module {module_id}")));
        }
        Ok(state.replace_steps(module_id, steps))
    }

    async fn apply_reorder(&self, kind: OrderKind, updates: &[ReorderUpdate]) -> PortalResult<()> {
        let mut state = self.state.write().await;

        // Check every precondition before the first write.
        for update in updates {
            match state.current_order(kind, update.id) {
                None => return Err(PortalError::not_found(format!("{kind:?} {}", update.id))),
                Some(order) if order != update.previous_order => {
                    return Err(PortalError::Conflict(format!(
                        "{kind:?} {} moved since it was listed",
                        update.id
                    )));
                }
                Some(_) => {}
            }
        }

        for update in updates {
            state.set_order(kind, update.id, update.new_order);
        }
        Ok(())
    }
}
