//! Postgres implementation of the portal repository (Supabase database).
//!
//! Expected tables (owned by the backend, not migrated from here):
//! - `users (id uuid, email text, role text, created_at timestamptz)`
//! - `folders (id uuid, name text, description text, display_order int4, created_at, updated_at, created_by uuid, updated_by uuid)`
//! - `modules (id uuid, title text, description text, folder_id uuid, display_order int4, view_roles text[], edit_roles text[], created_at, created_by uuid)`
//! - `sub_modules (id uuid, module_id uuid, title text, content text, steps jsonb, created_at)`
//!
//! Multi-statement writes (reorder batches, step replacement, deletes that compact
//! siblings) run inside one transaction. Every write that reads or shifts
//! `display_order` first takes the table's ordering lock, so positions stay gapless
//! under concurrent writers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction, types::Json};
use uuid::Uuid;

use super::{ModuleFilter, OrderKind, Repository};
use crate::access::{Role, RoleSet};
use crate::error::{PortalError, PortalResult};
use crate::models::{
    Folder, FolderRequest, INSTRUCTIONS_TITLE, Module, ModuleRequest, Step, SubModule, User,
};
use crate::reorder::ReorderUpdate;

const FOLDER_COLUMNS: &str =
    "id, name, description, display_order, created_at, updated_at, created_by, updated_by";
const MODULE_COLUMNS: &str =
    "id, title, description, folder_id, display_order, view_roles, edit_roles, created_at, created_by";
const SUB_MODULE_COLUMNS: &str = "id, module_id, title, content, steps, created_at";

// --- Row types: storage keeps roles as text; an unknown role is a corrupt record ---

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    role: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = PortalError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            email: row.email,
            role: row.role.parse::<Role>().map_err(PortalError::corrupt_record)?,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct ModuleRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    folder_id: Option<Uuid>,
    display_order: i32,
    view_roles: Vec<String>,
    edit_roles: Vec<String>,
    created_at: DateTime<Utc>,
    created_by: Option<Uuid>,
}

impl TryFrom<ModuleRow> for Module {
    type Error = PortalError;

    fn try_from(row: ModuleRow) -> Result<Self, Self::Error> {
        Ok(Module {
            id: row.id,
            title: row.title,
            description: row.description,
            folder_id: row.folder_id,
            display_order: row.display_order,
            view_roles: RoleSet::parse_all(&row.view_roles)
                .map_err(PortalError::corrupt_record)?,
            edit_roles: RoleSet::parse_all(&row.edit_roles)
                .map_err(PortalError::corrupt_record)?,
            created_at: row.created_at,
            created_by: row.created_by,
        })
    }
}

#[derive(FromRow)]
struct SubModuleRow {
    id: Uuid,
    module_id: Uuid,
    title: String,
    content: Option<String>,
    steps: Json<Vec<Step>>,
    created_at: DateTime<Utc>,
}

impl From<SubModuleRow> for SubModule {
    fn from(row: SubModuleRow) -> Self {
        SubModule {
            id: row.id,
            module_id: row.module_id,
            title: row.title,
            content: row.content,
            steps: row.steps.0,
            created_at: row.created_at,
        }
    }
}

fn order_table(kind: OrderKind) -> &'static str {
    match kind {
        OrderKind::Folder => "folders",
        OrderKind::Module => "modules",
    }
}

/// Rolls back after a failed statement. When the rollback itself cannot be confirmed the
/// caller gets `PartialWrite` instead of the original error.
async fn abort(
    tx: Transaction<'_, Postgres>,
    err: PortalError,
    applied: usize,
    total: usize,
) -> PortalError {
    match tx.rollback().await {
        Ok(()) => err,
        Err(rollback_err) => {
            tracing::error!(error = ?rollback_err, original = %err, applied, total, "rollback failed");
            PortalError::PartialWrite { applied, total }
        }
    }
}

/// PostgresRepository
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Takes the ordering lock on the table behind `kind` until the transaction ends. The
    /// mode conflicts with itself, so ordering writers on one table queue behind each
    /// other while plain reads continue.
    async fn lock_ordering(
        tx: &mut Transaction<'_, Postgres>,
        kind: OrderKind,
    ) -> PortalResult<()> {
        let table = order_table(kind);
        sqlx::query(&format!("LOCK TABLE {table} IN SHARE ROW EXCLUSIVE MODE"))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn sibling_count(
        tx: &mut Transaction<'_, Postgres>,
        folder_id: Option<Uuid>,
    ) -> PortalResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM modules WHERE folder_id IS NOT DISTINCT FROM $1",
        )
        .bind(folder_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(count)
    }

    async fn write_steps(
        tx: &mut Transaction<'_, Postgres>,
        module_id: Uuid,
        steps: Vec<Step>,
    ) -> PortalResult<Option<SubModule>> {
        sqlx::query("DELETE FROM sub_modules WHERE module_id = $1")
            .bind(module_id)
            .execute(&mut **tx)
            .await?;

        if steps.is_empty() {
            return Ok(None);
        }

        let row = sqlx::query_as::<_, SubModuleRow>(&format!(
            "INSERT INTO sub_modules (id, module_id, title, steps, created_at) \
             VALUES ($1, $2, $3, $4, NOW()) RETURNING {SUB_MODULE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(module_id)
        .bind(INSTRUCTIONS_TITLE)
        .bind(Json(steps))
        .fetch_one(&mut **tx)
        .await?;
        Ok(Some(row.into()))
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_user(&self, id: Uuid) -> PortalResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, role, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn list_users(&self) -> PortalResult<Vec<User>> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, email, role, created_at FROM users ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(User::try_from)
        .collect()
    }

    async fn update_user_role(&self, id: Uuid, role: Role) -> PortalResult<User> {
        sqlx::query_as::<_, UserRow>(
            "UPDATE users SET role = $2 WHERE id = $1 RETURNING id, email, role, created_at",
        )
        .bind(id)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| PortalError::not_found(format!("user {id}")))
        .and_then(User::try_from)
    }

    async fn list_folders(&self) -> PortalResult<Vec<Folder>> {
        let folders = sqlx::query_as::<_, Folder>(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folders ORDER BY display_order ASC, created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(folders)
    }

    async fn get_folder(&self, id: Uuid) -> PortalResult<Folder> {
        sqlx::query_as::<_, Folder>(&format!("SELECT {FOLDER_COLUMNS} FROM folders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| PortalError::not_found(format!("folder {id}")))
    }

    async fn create_folder(&self, req: FolderRequest, created_by: Uuid) -> PortalResult<Folder> {
        let mut tx = self.pool.begin().await?;
        if let Err(e) = Self::lock_ordering(&mut tx, OrderKind::Folder).await {
            return Err(abort(tx, e, 0, 1).await);
        }

        // The subquery picks the next free position under the lock.
        let inserted = sqlx::query_as::<_, Folder>(&format!(
            "INSERT INTO folders (id, name, description, display_order, created_at, updated_at, created_by, updated_by) \
             VALUES ($1, $2, $3, (SELECT COUNT(*) FROM folders), NOW(), NOW(), $4, $4) \
             RETURNING {FOLDER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(req.name)
        .bind(req.description)
        .bind(created_by)
        .fetch_one(&mut *tx)
        .await;

        let folder = match inserted {
            Ok(folder) => folder,
            Err(e) => return Err(abort(tx, e.into(), 0, 1).await),
        };
        tx.commit().await?;
        Ok(folder)
    }

    async fn update_folder(
        &self,
        id: Uuid,
        req: FolderRequest,
        updated_by: Uuid,
    ) -> PortalResult<Folder> {
        sqlx::query_as::<_, Folder>(&format!(
            "UPDATE folders SET name = $2, description = $3, updated_at = NOW(), updated_by = $4 \
             WHERE id = $1 RETURNING {FOLDER_COLUMNS}"
        ))
        .bind(id)
        .bind(req.name)
        .bind(req.description)
        .bind(updated_by)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| PortalError::not_found(format!("folder {id}")))
    }

    async fn delete_folder(&self, id: Uuid) -> PortalResult<()> {
        let mut tx = self.pool.begin().await?;
        if let Err(e) = Self::lock_ordering(&mut tx, OrderKind::Folder).await {
            return Err(abort(tx, e, 0, 2).await);
        }

        let deleted: Option<i32> =
            match sqlx::query_scalar("DELETE FROM folders WHERE id = $1 RETURNING display_order")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
            {
                Ok(order) => order,
                Err(e) => return Err(abort(tx, e.into(), 0, 2).await),
            };

        let Some(order) = deleted else {
            tx.rollback().await?;
            return Err(PortalError::not_found(format!("folder {id}")));
        };

        if let Err(e) =
            sqlx::query("UPDATE folders SET display_order = display_order - 1 WHERE display_order > $1")
                .bind(order)
                .execute(&mut *tx)
                .await
        {
            return Err(abort(tx, e.into(), 1, 2).await);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_modules(&self, filter: ModuleFilter) -> PortalResult<Vec<Module>> {
        let rows = match filter {
            ModuleFilter::All => {
                sqlx::query_as::<_, ModuleRow>(&format!(
                    "SELECT {MODULE_COLUMNS} FROM modules ORDER BY folder_id, display_order ASC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
            ModuleFilter::Folder(folder_id) => {
                sqlx::query_as::<_, ModuleRow>(&format!(
                    "SELECT {MODULE_COLUMNS} FROM modules \
                     WHERE folder_id IS NOT DISTINCT FROM $1 \
                     ORDER BY display_order ASC, created_at ASC"
                ))
                .bind(folder_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(Module::try_from).collect()
    }

    async fn get_module(&self, id: Uuid) -> PortalResult<Module> {
        sqlx::query_as::<_, ModuleRow>(&format!("SELECT {MODULE_COLUMNS} FROM modules WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| PortalError::not_found(format!("module {id}")))
            .and_then(Module::try_from)
    }

    async fn create_module(&self, req: ModuleRequest, created_by: Uuid) -> PortalResult<Module> {
        let mut tx = self.pool.begin().await?;
        if let Err(e) = Self::lock_ordering(&mut tx, OrderKind::Module).await {
            return Err(abort(tx, e, 0, 2).await);
        }

        let position = match Self::sibling_count(&mut tx, req.folder_id).await {
            Ok(count) => count as i32,
            Err(e) => return Err(abort(tx, e, 0, 2).await),
        };

        let inserted = sqlx::query_as::<_, ModuleRow>(&format!(
            "INSERT INTO modules (id, title, description, folder_id, display_order, view_roles, edit_roles, created_at, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), $8) RETURNING {MODULE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&req.title)
        .bind(&req.description)
        .bind(req.folder_id)
        .bind(position)
        .bind(req.view_roles.to_strings())
        .bind(req.edit_roles.to_strings())
        .bind(created_by)
        .fetch_one(&mut *tx)
        .await;

        let module = match inserted.map_err(PortalError::from).and_then(Module::try_from) {
            Ok(module) => module,
            Err(e) => return Err(abort(tx, e, 0, 2).await),
        };

        if let Some(steps) = req.steps {
            if let Err(e) = Self::write_steps(&mut tx, module.id, steps).await {
                return Err(abort(tx, e, 1, 2).await);
            }
        }

        tx.commit().await?;
        Ok(module)
    }

    async fn update_module(&self, id: Uuid, req: ModuleRequest) -> PortalResult<Module> {
        let mut tx = self.pool.begin().await?;
        if let Err(e) = Self::lock_ordering(&mut tx, OrderKind::Module).await {
            return Err(abort(tx, e, 0, 3).await);
        }

        let current = match sqlx::query_as::<_, (Option<Uuid>, i32)>(
            "SELECT folder_id, display_order FROM modules WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        {
            Ok(Some(row)) => row,
            Ok(None) => {
                tx.rollback().await?;
                return Err(PortalError::not_found(format!("module {id}")));
            }
            Err(e) => return Err(abort(tx, e.into(), 0, 3).await),
        };
        let (previous_folder, previous_order) = current;
        let moved = previous_folder != req.folder_id;

        let position = if moved {
            match Self::sibling_count(&mut tx, req.folder_id).await {
                Ok(count) => count as i32,
                Err(e) => return Err(abort(tx, e, 0, 3).await),
            }
        } else {
            previous_order
        };

        let updated = sqlx::query_as::<_, ModuleRow>(&format!(
            "UPDATE modules SET title = $2, description = $3, folder_id = $4, display_order = $5, \
             view_roles = $6, edit_roles = $7 WHERE id = $1 RETURNING {MODULE_COLUMNS}"
        ))
        .bind(id)
        .bind(&req.title)
        .bind(&req.description)
        .bind(req.folder_id)
        .bind(position)
        .bind(req.view_roles.to_strings())
        .bind(req.edit_roles.to_strings())
        .fetch_one(&mut *tx)
        .await;

        let module = match updated.map_err(PortalError::from).and_then(Module::try_from) {
            Ok(module) => module,
            Err(e) => return Err(abort(tx, e, 0, 3).await),
        };

        if moved {
            if let Err(e) = sqlx::query(
                "UPDATE modules SET display_order = display_order - 1 \
                 WHERE folder_id IS NOT DISTINCT FROM $1 AND display_order > $2",
            )
            .bind(previous_folder)
            .bind(previous_order)
            .execute(&mut *tx)
            .await
            {
                return Err(abort(tx, e.into(), 1, 3).await);
            }
        }

        if let Some(steps) = req.steps {
            if let Err(e) = Self::write_steps(&mut tx, id, steps).await {
                return Err(abort(tx, e, 2, 3).await);
            }
        }

        tx.commit().await?;
        Ok(module)
    }

    async fn delete_module(&self, id: Uuid) -> PortalResult<()> {
        let mut tx = self.pool.begin().await?;
        if let Err(e) = Self::lock_ordering(&mut tx, OrderKind::Module).await {
            return Err(abort(tx, e, 0, 3).await);
        }

        if let Err(e) = sqlx::query("DELETE FROM sub_modules WHERE module_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
        {
            return Err(abort(tx, e.into(), 0, 3).await);
        }

        let deleted = match sqlx::query_as::<_, (Option<Uuid>, i32)>(
            "DELETE FROM modules WHERE id = $1 RETURNING folder_id, display_order",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        {
            Ok(row) => row,
            Err(e) => return Err(abort(tx, e.into(), 1, 3).await),
        };

        let Some((folder_id, order)) = deleted else {
            tx.rollback().await?;
            return Err(PortalError::not_found(format!("module {id}")));
        };

        if let Err(e) = sqlx::query(
            "UPDATE modules SET display_order = display_order - 1 \
             WHERE folder_id IS NOT DISTINCT FROM $1 AND display_order > $2",
        )
        .bind(folder_id)
        .bind(order)
        .execute(&mut *tx)
        .await
        {
            return Err(abort(tx, e.into(), 2, 3).await);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_sub_modules(&self, module_id: Uuid) -> PortalResult<Vec<SubModule>> {
        let rows = sqlx::query_as::<_, SubModuleRow>(&format!(
            "SELECT {SUB_MODULE_COLUMNS} FROM sub_modules WHERE module_id = $1 ORDER BY created_at ASC"
        ))
        .bind(module_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SubModule::from).collect())
    }

    async fn replace_sub_module_steps(
        &self,
        module_id: Uuid,
        steps: Vec<Step>,
    ) -> PortalResult<Option<SubModule>> {
        let mut tx = self.pool.begin().await?;

        let exists: bool = match sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM modules WHERE id = $1)")
            .bind(module_id)
            .fetch_one(&mut *tx)
            .await
        {
            Ok(exists) => exists,
            Err(e) => return Err(abort(tx, e.into(), 0, 2).await),
        };
        if !exists {
            tx.rollback().await?;
            return Err(PortalError::not_found(format!("module {module_id}")));
        }

        let sub_module = match Self::write_steps(&mut tx, module_id, steps).await {
            Ok(sub_module) => sub_module,
            Err(e) => return Err(abort(tx, e, 0, 2).await),
        };

        tx.commit().await?;
        Ok(sub_module)
    }

    /// apply_reorder
    ///
    /// One transaction; each `UPDATE` is guarded by `display_order = previous_order`, so a
    /// plan built from a stale listing touches zero rows and the whole batch is rolled back.
    async fn apply_reorder(&self, kind: OrderKind, updates: &[ReorderUpdate]) -> PortalResult<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let table = order_table(kind);
        let statement =
            format!("UPDATE {table} SET display_order = $2 WHERE id = $1 AND display_order = $3");
        let total = updates.len();
        let mut tx = self.pool.begin().await?;
        if let Err(e) = Self::lock_ordering(&mut tx, kind).await {
            return Err(abort(tx, e, 0, total).await);
        }

        for (applied, update) in updates.iter().enumerate() {
            let result = sqlx::query(&statement)
                .bind(update.id)
                .bind(update.new_order)
                .bind(update.previous_order)
                .execute(&mut *tx)
                .await;

            match result {
                Ok(done) if done.rows_affected() == 1 => {}
                Ok(_) => {
                    let conflict = PortalError::Conflict(format!(
                        "{table} {} moved since it was listed",
                        update.id
                    ));
                    return Err(abort(tx, conflict, applied, total).await);
                }
                Err(e) => return Err(abort(tx, e.into(), applied, total).await),
            }
        }

        tx.commit().await?;
        tracing::debug!(table, total, "reorder batch committed");
        Ok(())
    }
}
