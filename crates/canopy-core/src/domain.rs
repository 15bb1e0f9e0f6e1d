use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Returns a fresh opaque etag value.
///
/// Etags are regenerated on every policy create and update; callers must
/// treat them as opaque strings and echo the last value they read.
pub fn fresh_etag() -> String {
    Uuid::new_v4().to_string()
}

/// Replaces a nil identifier with a freshly generated one. Callers that
/// submit a non-nil id on create keep it.
pub fn ensure_id(id: Uuid) -> Uuid {
    if id.is_nil() { Uuid::new_v4() } else { id }
}

/// A node in the resource forest. The parent pointer is a non-owning
/// reference: an identifier resolved through the repository, never a
/// structural field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub resource_type: String,
    pub name: String,
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A leaf action identifier, e.g. `storage.buckets.create`. Names are
/// globally unique in dotted `service.object.verb` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub service: String,
    pub created_at: DateTime<Utc>,
}

/// A named bundle of permissions, e.g. `roles/storage.viewer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub title: String,
    pub description: String,
    pub is_custom: bool,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    /// Whether this role contains a permission with the given name.
    /// Roles are small, so a linear scan is fine.
    pub fn has_permission(&self, permission_name: &str) -> bool {
        self.permissions.iter().any(|p| p.name == permission_name)
    }
}

/// The set of bindings attached to a resource, with an opaque etag for
/// optimistic concurrency. `version` increments and `etag` is replaced on
/// every successful update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub version: i32,
    pub etag: String,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An association of members to a role within a policy, optionally gated
/// by a condition. `members` holds the stored JSON array verbatim, e.g.
/// `["user:alice@example.com", "group:admins"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub id: Uuid,
    pub policy_id: Uuid,
    pub role_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    pub members: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    pub created_at: DateTime<Utc>,
}

impl Binding {
    /// Decodes the stored members array. Ill-formed JSON decodes to an
    /// empty list rather than an error.
    pub fn members(&self) -> Vec<String> {
        serde_json::from_value(self.members.clone()).unwrap_or_default()
    }

    /// Byte-exact membership test for a principal string.
    pub fn has_member(&self, principal: &str) -> bool {
        self.members().iter().any(|m| m == principal)
    }
}

/// Encodes a member list into the stored JSON representation.
pub fn members_json(members: &[String]) -> serde_json::Value {
    serde_json::Value::Array(
        members
            .iter()
            .map(|m| serde_json::Value::String(m.clone()))
            .collect(),
    )
}

/// A conditional expression gating a binding. The expression is opaque to
/// the core and only interpreted by the condition hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub id: Uuid,
    pub binding_id: Uuid,
    pub title: String,
    pub description: String,
    pub expression: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
