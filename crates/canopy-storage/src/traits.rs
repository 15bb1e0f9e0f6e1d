use std::collections::HashMap;
use std::future::Future;

use uuid::Uuid;

use canopy_core::domain::{Binding, Permission, Policy, Resource, Role};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("stale etag for policy {policy_id}")]
    StaleEtag { policy_id: Uuid },

    #[error("internal storage error: {0}")]
    Internal(String),
}

/// Pagination window for list queries. A limit of zero means unbounded.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Page {
    pub fn unbounded() -> Self {
        Self {
            limit: 0,
            offset: 0,
        }
    }
}

/// Create inputs. A nil `id` is replaced with a fresh one by the store;
/// a caller-supplied id is preserved.
#[derive(Debug, Clone)]
pub struct NewResource {
    pub id: Uuid,
    pub resource_type: String,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ResourceUpdate {
    pub name: String,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    pub parent_id: Option<Uuid>,
    pub resource_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPermission {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub service: String,
}

#[derive(Debug, Clone)]
pub struct NewRole {
    pub id: Uuid,
    pub name: String,
    pub title: String,
    pub description: String,
    pub is_custom: bool,
    pub permission_ids: Vec<Uuid>,
}

/// Full replacement of a role's mutable fields, permission set included.
#[derive(Debug, Clone)]
pub struct RoleUpdate {
    pub title: String,
    pub description: String,
    pub permission_ids: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewPolicy {
    pub id: Uuid,
    pub resource_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct NewBinding {
    pub id: Uuid,
    pub policy_id: Uuid,
    pub role_id: Uuid,
    pub members: Vec<String>,
    pub condition: Option<NewCondition>,
}

#[derive(Debug, Clone)]
pub struct NewCondition {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub expression: String,
}

/// Resource tree persistence. Ancestor and descendant queries are single
/// round-trips; `ancestors` returns the chain from the immediate parent up
/// to the root.
pub trait ResourceRepo: Send + Sync {
    fn create(
        &self,
        input: NewResource,
    ) -> impl Future<Output = Result<Resource, StorageError>> + Send;

    fn get_by_id(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Resource>, StorageError>> + Send;

    fn update(
        &self,
        id: Uuid,
        update: ResourceUpdate,
    ) -> impl Future<Output = Result<Option<Resource>, StorageError>> + Send;

    /// Soft-deletes the resource and cascades to its policy, that policy's
    /// bindings, and their conditions. Returns false when the resource does
    /// not exist.
    fn delete(&self, id: Uuid) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn list(
        &self,
        filter: ResourceFilter,
        page: Page,
    ) -> impl Future<Output = Result<Vec<Resource>, StorageError>> + Send;

    fn children(&self, id: Uuid)
    -> impl Future<Output = Result<Vec<Resource>, StorageError>> + Send;

    fn ancestors(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Vec<Resource>, StorageError>> + Send;

    /// The full subtree below the resource, excluding the resource itself.
    fn descendants(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Vec<Resource>, StorageError>> + Send;
}

pub trait PermissionRepo: Send + Sync {
    fn create(
        &self,
        input: NewPermission,
    ) -> impl Future<Output = Result<Permission, StorageError>> + Send;

    fn get_by_id(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Permission>, StorageError>> + Send;

    fn get_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<Permission>, StorageError>> + Send;

    /// Bulk lookup. Missing ids are skipped; no particular order.
    fn get_by_ids(
        &self,
        ids: &[Uuid],
    ) -> impl Future<Output = Result<Vec<Permission>, StorageError>> + Send;

    fn list(
        &self,
        service: Option<&str>,
        page: Page,
    ) -> impl Future<Output = Result<Vec<Permission>, StorageError>> + Send;

    fn delete(&self, id: Uuid) -> impl Future<Output = Result<bool, StorageError>> + Send;
}

pub trait RoleRepo: Send + Sync {
    fn create(&self, input: NewRole) -> impl Future<Output = Result<Role, StorageError>> + Send;

    /// Loaded with permissions.
    fn get_by_id(&self, id: Uuid)
    -> impl Future<Output = Result<Option<Role>, StorageError>> + Send;

    fn get_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<Role>, StorageError>> + Send;

    fn update(
        &self,
        id: Uuid,
        update: RoleUpdate,
    ) -> impl Future<Output = Result<Option<Role>, StorageError>> + Send;

    fn delete(&self, id: Uuid) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn list(
        &self,
        include_custom: bool,
        page: Page,
    ) -> impl Future<Output = Result<Vec<Role>, StorageError>> + Send;

    /// Returns false when the role does not exist.
    fn add_permissions(
        &self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn remove_permissions(
        &self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn get_permissions(
        &self,
        role_id: Uuid,
    ) -> impl Future<Output = Result<Vec<Permission>, StorageError>> + Send;
}

/// Policy persistence. All reads return policies fully loaded: bindings
/// with their roles, role permissions, and conditions.
pub trait PolicyRepo: Send + Sync {
    /// Creates a version-1 policy with a fresh etag. Fails with `Conflict`
    /// when the resource already has a live policy.
    fn create(&self, input: NewPolicy)
    -> impl Future<Output = Result<Policy, StorageError>> + Send;

    fn get_by_id(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Policy>, StorageError>> + Send;

    fn get_by_resource_id(
        &self,
        resource_id: Uuid,
    ) -> impl Future<Output = Result<Option<Policy>, StorageError>> + Send;

    /// Replaces the policy's bindings in a single transaction: the etag is
    /// compared-and-swapped, old bindings and their conditions are removed,
    /// the new bindings are inserted, the version increments, and a fresh
    /// etag is stored. `StaleEtag` when the expected etag no longer matches;
    /// `None` when the policy does not exist.
    fn replace_bindings(
        &self,
        policy_id: Uuid,
        expected_etag: &str,
        bindings: Vec<NewBinding>,
    ) -> impl Future<Output = Result<Option<Policy>, StorageError>> + Send;

    /// Soft-deletes the policy and cascades to its bindings and conditions.
    fn delete(&self, id: Uuid) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn list(
        &self,
        parent_resource_id: Option<Uuid>,
        page: Page,
    ) -> impl Future<Output = Result<Vec<Policy>, StorageError>> + Send;
}

/// Binding persistence. Reads come back loaded with the role, its
/// permissions, and the attached condition.
pub trait BindingRepo: Send + Sync {
    /// Persists the binding and its optional condition in one transaction.
    fn create(
        &self,
        input: NewBinding,
    ) -> impl Future<Output = Result<Binding, StorageError>> + Send;

    fn get_by_id(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Binding>, StorageError>> + Send;

    /// Soft-deletes the binding and its condition.
    fn delete(&self, id: Uuid) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn list_by_resource_id(
        &self,
        resource_id: Uuid,
        page: Page,
    ) -> impl Future<Output = Result<Vec<Binding>, StorageError>> + Send;

    /// Bindings whose member array contains the principal, byte-exact.
    fn list_by_principal(
        &self,
        principal: &str,
        page: Page,
    ) -> impl Future<Output = Result<Vec<Binding>, StorageError>> + Send;

    fn get_by_policy_and_principal(
        &self,
        policy_id: Uuid,
        principal: &str,
    ) -> impl Future<Output = Result<Vec<Binding>, StorageError>> + Send;
}

/// Aggregate view of one backing store: a repository per entity, all
/// reading and writing the same underlying state.
pub trait Store: Send + Sync + 'static {
    type Resources: ResourceRepo;
    type Permissions: PermissionRepo;
    type Roles: RoleRepo;
    type Policies: PolicyRepo;
    type Bindings: BindingRepo;

    fn resources(&self) -> &Self::Resources;
    fn permissions(&self) -> &Self::Permissions;
    fn roles(&self) -> &Self::Roles;
    fn policies(&self) -> &Self::Policies;
    fn bindings(&self) -> &Self::Bindings;
}
