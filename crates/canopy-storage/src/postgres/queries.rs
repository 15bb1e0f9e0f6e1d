use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use canopy_core::domain::{
    Binding, Condition, Permission, Policy, Resource, Role, ensure_id, members_json,
};

use crate::traits::{NewBinding, Page, StorageError};

pub(crate) fn to_storage_error(e: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return StorageError::Conflict(db_err.to_string());
    }
    StorageError::Internal(e.to_string())
}

/// Appends `LIMIT`/`OFFSET` for a page window. A zero limit is unbounded.
pub(crate) fn page_clause(page: Page) -> String {
    let mut clause = String::new();
    if page.limit > 0 {
        clause.push_str(&format!(" LIMIT {}", page.limit));
    }
    if page.offset > 0 {
        clause.push_str(&format!(" OFFSET {}", page.offset));
    }
    clause
}

pub(crate) const RESOURCE_COLS: &str =
    "id, type, name, parent_id, attributes, created_at, updated_at";

pub(crate) type ResourceRow = (
    Uuid,
    String,
    String,
    Option<Uuid>,
    serde_json::Value,
    DateTime<Utc>,
    DateTime<Utc>,
);

pub(crate) fn resource_from_row(row: ResourceRow) -> Resource {
    let (id, resource_type, name, parent_id, attributes, created_at, updated_at) = row;
    Resource {
        id,
        resource_type,
        name,
        parent_id,
        attributes: serde_json::from_value(attributes).unwrap_or_default(),
        created_at,
        updated_at,
    }
}

pub(crate) const PERMISSION_COLS: &str = "id, name, description, service, created_at";

pub(crate) type PermissionRow = (Uuid, String, String, String, DateTime<Utc>);

pub(crate) fn permission_from_row(row: PermissionRow) -> Permission {
    let (id, name, description, service, created_at) = row;
    Permission {
        id,
        name,
        description,
        service,
        created_at,
    }
}

pub(crate) const ROLE_COLS: &str =
    "id, name, title, description, is_custom, created_at, updated_at";

pub(crate) type RoleRow = (
    Uuid,
    String,
    String,
    String,
    bool,
    DateTime<Utc>,
    DateTime<Utc>,
);

pub(crate) const POLICY_COLS: &str = "id, resource_id, version, etag, created_at, updated_at";

pub(crate) type PolicyRow = (Uuid, Uuid, i32, String, DateTime<Utc>, DateTime<Utc>);

pub(crate) fn policy_from_row(row: PolicyRow) -> Policy {
    let (id, resource_id, version, etag, created_at, updated_at) = row;
    Policy {
        id,
        resource_id,
        version,
        etag,
        bindings: Vec::new(),
        created_at,
        updated_at,
    }
}

pub(crate) const BINDING_COLS: &str = "id, policy_id, role_id, members, created_at";

pub(crate) type BindingRow = (Uuid, Uuid, Uuid, serde_json::Value, DateTime<Utc>);

type ConditionRow = (
    Uuid,
    Uuid,
    String,
    String,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
);

/// Attaches roles (with their permissions) and conditions to raw binding
/// rows. Three batched queries regardless of the number of bindings.
pub(crate) async fn load_bindings(
    pool: &PgPool,
    rows: Vec<BindingRow>,
) -> Result<Vec<Binding>, StorageError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let binding_ids: Vec<Uuid> = rows.iter().map(|r| r.0).collect();
    let mut role_ids: Vec<Uuid> = rows.iter().map(|r| r.2).collect();
    role_ids.sort();
    role_ids.dedup();

    let roles = load_roles_by_ids(pool, &role_ids).await?;

    let condition_rows: Vec<ConditionRow> = sqlx::query_as(
        "SELECT id, binding_id, title, description, expression, created_at, updated_at
         FROM conditions WHERE binding_id = ANY($1) AND deleted_at IS NULL",
    )
    .bind(&binding_ids)
    .fetch_all(pool)
    .await
    .map_err(to_storage_error)?;

    let mut conditions: HashMap<Uuid, Condition> = condition_rows
        .into_iter()
        .map(
            |(id, binding_id, title, description, expression, created_at, updated_at)| {
                (
                    binding_id,
                    Condition {
                        id,
                        binding_id,
                        title,
                        description,
                        expression,
                        created_at,
                        updated_at,
                    },
                )
            },
        )
        .collect();

    Ok(rows
        .into_iter()
        .map(|(id, policy_id, role_id, members, created_at)| Binding {
            id,
            policy_id,
            role_id,
            role: roles.get(&role_id).cloned(),
            members,
            condition: conditions.remove(&id),
            created_at,
        })
        .collect())
}

/// Loads live roles by id, permissions attached, keyed by role id.
pub(crate) async fn load_roles_by_ids(
    pool: &PgPool,
    role_ids: &[Uuid],
) -> Result<HashMap<Uuid, Role>, StorageError> {
    if role_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let role_rows: Vec<RoleRow> = sqlx::query_as(&format!(
        "SELECT {ROLE_COLS} FROM roles WHERE id = ANY($1) AND deleted_at IS NULL"
    ))
    .bind(role_ids)
    .fetch_all(pool)
    .await
    .map_err(to_storage_error)?;

    let mut roles: HashMap<Uuid, Role> = role_rows
        .into_iter()
        .map(
            |(id, name, title, description, is_custom, created_at, updated_at)| {
                (
                    id,
                    Role {
                        id,
                        name,
                        title,
                        description,
                        is_custom,
                        permissions: Vec::new(),
                        created_at,
                        updated_at,
                    },
                )
            },
        )
        .collect();

    let permission_rows: Vec<(Uuid, Uuid, String, String, String, DateTime<Utc>)> =
        sqlx::query_as(
            "SELECT rp.role_id, p.id, p.name, p.description, p.service, p.created_at
             FROM role_permissions rp
             JOIN permissions p ON p.id = rp.permission_id
             WHERE rp.role_id = ANY($1) AND p.deleted_at IS NULL",
        )
        .bind(role_ids)
        .fetch_all(pool)
        .await
        .map_err(to_storage_error)?;

    for (role_id, id, name, description, service, created_at) in permission_rows {
        if let Some(role) = roles.get_mut(&role_id) {
            role.permissions.push(Permission {
                id,
                name,
                description,
                service,
                created_at,
            });
        }
    }

    Ok(roles)
}

/// Expands raw policy rows into fully loaded policies: bindings with their
/// roles, role permissions, and conditions.
pub(crate) async fn load_policies(
    pool: &PgPool,
    rows: Vec<PolicyRow>,
) -> Result<Vec<Policy>, StorageError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let policy_ids: Vec<Uuid> = rows.iter().map(|r| r.0).collect();
    let binding_rows: Vec<BindingRow> = sqlx::query_as(&format!(
        "SELECT {BINDING_COLS} FROM bindings WHERE policy_id = ANY($1) AND deleted_at IS NULL"
    ))
    .bind(&policy_ids)
    .fetch_all(pool)
    .await
    .map_err(to_storage_error)?;

    let bindings = load_bindings(pool, binding_rows).await?;
    let mut grouped: HashMap<Uuid, Vec<Binding>> = HashMap::new();
    for binding in bindings {
        grouped.entry(binding.policy_id).or_default().push(binding);
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let mut policy = policy_from_row(row);
            policy.bindings = grouped.remove(&policy.id).unwrap_or_default();
            policy
        })
        .collect())
}

/// Inserts a binding and its optional condition on the given connection,
/// so callers can compose it into a wider transaction.
pub(crate) async fn insert_binding(
    conn: &mut PgConnection,
    policy_id: Uuid,
    input: NewBinding,
) -> Result<Uuid, StorageError> {
    let binding_id = ensure_id(input.id);
    sqlx::query("INSERT INTO bindings (id, policy_id, role_id, members) VALUES ($1, $2, $3, $4)")
        .bind(binding_id)
        .bind(policy_id)
        .bind(input.role_id)
        .bind(members_json(&input.members))
        .execute(&mut *conn)
        .await
        .map_err(to_storage_error)?;

    if let Some(condition) = input.condition {
        sqlx::query(
            "INSERT INTO conditions (id, binding_id, title, description, expression)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(ensure_id(condition.id))
        .bind(binding_id)
        .bind(&condition.title)
        .bind(&condition.description)
        .bind(&condition.expression)
        .execute(&mut *conn)
        .await
        .map_err(to_storage_error)?;
    }

    Ok(binding_id)
}

/// Soft-deletes a policy's live bindings together with their conditions.
pub(crate) async fn retire_policy_bindings(
    conn: &mut PgConnection,
    policy_id: Uuid,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE conditions SET deleted_at = now()
         WHERE deleted_at IS NULL AND binding_id IN
             (SELECT id FROM bindings WHERE policy_id = $1 AND deleted_at IS NULL)",
    )
    .bind(policy_id)
    .execute(&mut *conn)
    .await
    .map_err(to_storage_error)?;

    sqlx::query("UPDATE bindings SET deleted_at = now() WHERE policy_id = $1 AND deleted_at IS NULL")
        .bind(policy_id)
        .execute(&mut *conn)
        .await
        .map_err(to_storage_error)?;

    Ok(())
}
