use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use canopy_core::domain::{Binding, Condition, Permission, Policy, Resource, Role};
use canopy_core::engine::{Decision, EffectiveAccess};

#[derive(Debug, Deserialize)]
pub struct CheckPermissionRequest {
    pub principal: String,
    pub resource_id: Uuid,
    pub permission: String,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct CheckPermissionResponse {
    pub allowed: bool,
    pub reason: String,
}

impl From<Decision> for CheckPermissionResponse {
    fn from(decision: Decision) -> Self {
        Self {
            allowed: decision.allowed,
            reason: decision.reason,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchCheckPermissionsRequest {
    pub checks: Vec<CheckPermissionRequest>,
}

#[derive(Debug, Serialize)]
pub struct BatchCheckPermissionsResponse {
    pub results: Vec<CheckPermissionResponse>,
}

#[derive(Debug, Deserialize)]
pub struct EffectivePermissionsRequest {
    pub principal: String,
    pub resource_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct EffectivePermissionsResponse {
    pub permissions: Vec<String>,
    pub roles: Vec<String>,
}

impl From<EffectiveAccess> for EffectivePermissionsResponse {
    fn from(access: EffectiveAccess) -> Self {
        Self {
            permissions: access.permissions,
            roles: access.roles,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateResourceRequest {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateResourceRequest {
    pub name: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ResourceResponse {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    pub attributes: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Resource> for ResourceResponse {
    fn from(resource: Resource) -> Self {
        Self {
            id: resource.id,
            resource_type: resource.resource_type,
            name: resource.name,
            parent_id: resource.parent_id,
            attributes: resource.attributes,
            created_at: resource.created_at,
            updated_at: resource.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListResourcesQuery {
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ResourceHierarchyResponse {
    pub ancestors: Vec<ResourceResponse>,
    pub descendants: Vec<ResourceResponse>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePermissionRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub service: String,
}

#[derive(Debug, Serialize)]
pub struct PermissionResponse {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub service: String,
    pub created_at: DateTime<Utc>,
}

impl From<Permission> for PermissionResponse {
    fn from(permission: Permission) -> Self {
        Self {
            id: permission.id,
            name: permission.name,
            description: permission.description,
            service: permission.service,
            created_at: permission.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListPermissionsQuery {
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permission_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permission_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct RoleResponse {
    pub id: Uuid,
    pub name: String,
    pub title: String,
    pub description: String,
    pub is_custom: bool,
    pub permissions: Vec<PermissionResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Role> for RoleResponse {
    fn from(role: Role) -> Self {
        Self {
            id: role.id,
            name: role.name,
            title: role.title,
            description: role.description,
            is_custom: role.is_custom,
            permissions: role.permissions.into_iter().map(Into::into).collect(),
            created_at: role.created_at,
            updated_at: role.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListRolesQuery {
    #[serde(default = "default_include_custom")]
    pub include_custom: bool,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

fn default_include_custom() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct BindingSpecRequest {
    pub role_id: Uuid,
    pub members: Vec<String>,
    #[serde(default)]
    pub condition: Option<ConditionSpecRequest>,
}

#[derive(Debug, Deserialize)]
pub struct ConditionSpecRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub expression: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatePolicyRequest {
    pub resource_id: Uuid,
    #[serde(default)]
    pub bindings: Vec<BindingSpecRequest>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePolicyRequest {
    pub etag: String,
    #[serde(default)]
    pub bindings: Vec<BindingSpecRequest>,
}

#[derive(Debug, Deserialize)]
pub struct DeletePolicyRequest {
    pub etag: String,
}

#[derive(Debug, Serialize)]
pub struct PolicyResponse {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub version: i32,
    pub etag: String,
    pub bindings: Vec<BindingResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Policy> for PolicyResponse {
    fn from(policy: Policy) -> Self {
        Self {
            id: policy.id,
            resource_id: policy.resource_id,
            version: policy.version,
            etag: policy.etag,
            bindings: policy.bindings.into_iter().map(Into::into).collect(),
            created_at: policy.created_at,
            updated_at: policy.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListPoliciesQuery {
    #[serde(default)]
    pub parent_resource_id: Option<Uuid>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBindingRequest {
    pub resource_id: Uuid,
    pub role_id: Uuid,
    pub members: Vec<String>,
    #[serde(default)]
    pub condition: Option<ConditionSpecRequest>,
}

#[derive(Debug, Serialize)]
pub struct BindingResponse {
    pub id: Uuid,
    pub policy_id: Uuid,
    pub role_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<RoleResponse>,
    pub members: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionResponse>,
    pub created_at: DateTime<Utc>,
}

impl From<Binding> for BindingResponse {
    fn from(binding: Binding) -> Self {
        let members = binding.members();
        Self {
            id: binding.id,
            policy_id: binding.policy_id,
            role_id: binding.role_id,
            role: binding.role.map(Into::into),
            members,
            condition: binding.condition.map(Into::into),
            created_at: binding.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConditionResponse {
    pub id: Uuid,
    pub binding_id: Uuid,
    pub title: String,
    pub description: String,
    pub expression: String,
}

impl From<Condition> for ConditionResponse {
    fn from(condition: Condition) -> Self {
        Self {
            id: condition.id,
            binding_id: condition.binding_id,
            title: condition.title,
            description: condition.description,
            expression: condition.expression,
        }
    }
}

/// Exactly one of `resource_id` and `principal` must be set; the handler
/// rejects ambiguous filters instead of guessing a precedence.
#[derive(Debug, Deserialize)]
pub struct ListBindingsQuery {
    #[serde(default)]
    pub resource_id: Option<Uuid>,
    #[serde(default)]
    pub principal: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
