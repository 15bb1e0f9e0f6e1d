use std::sync::{Arc, Mutex};

use chrono::Utc;
use uuid::Uuid;

use canopy_core::domain::{
    Binding, Condition, Permission, Policy, Resource, Role, ensure_id, fresh_etag, members_json,
};

use crate::traits::{
    BindingRepo, NewBinding, NewPermission, NewPolicy, NewResource, NewRole, Page, PermissionRepo,
    PolicyRepo, ResourceFilter, ResourceRepo, ResourceUpdate, RoleRepo, RoleUpdate, StorageError,
    Store,
};

#[derive(Debug, Clone)]
struct Row<T> {
    value: T,
    deleted: bool,
}

impl<T> Row<T> {
    fn live(value: T) -> Self {
        Self {
            value,
            deleted: false,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    resources: Vec<Row<Resource>>,
    permissions: Vec<Row<Permission>>,
    roles: Vec<Row<Role>>,
    role_permissions: Vec<(Uuid, Uuid)>,
    policies: Vec<Row<Policy>>,
    bindings: Vec<Row<Binding>>,
}

impl State {
    fn live_resource(&self, id: Uuid) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|r| !r.deleted && r.value.id == id)
            .map(|r| &r.value)
    }

    fn load_role(&self, role_id: Uuid) -> Option<Role> {
        let row = self
            .roles
            .iter()
            .find(|r| !r.deleted && r.value.id == role_id)?;
        let mut role = row.value.clone();
        role.permissions = self
            .role_permissions
            .iter()
            .filter(|(rid, _)| *rid == role_id)
            .filter_map(|(_, pid)| {
                self.permissions
                    .iter()
                    .find(|p| !p.deleted && p.value.id == *pid)
                    .map(|p| p.value.clone())
            })
            .collect();
        Some(role)
    }

    fn load_binding(&self, binding: &Binding) -> Binding {
        let mut loaded = binding.clone();
        loaded.role = self.load_role(binding.role_id);
        loaded
    }

    fn load_policy(&self, policy_id: Uuid) -> Option<Policy> {
        let row = self
            .policies
            .iter()
            .find(|p| !p.deleted && p.value.id == policy_id)?;
        let mut policy = row.value.clone();
        policy.bindings = self
            .bindings
            .iter()
            .filter(|b| !b.deleted && b.value.policy_id == policy_id)
            .map(|b| self.load_binding(&b.value))
            .collect();
        Some(policy)
    }

    fn insert_binding(&mut self, input: NewBinding, policy_id: Uuid) -> Uuid {
        let binding_id = ensure_id(input.id);
        let now = Utc::now();
        let condition = input.condition.map(|c| Condition {
            id: ensure_id(c.id),
            binding_id,
            title: c.title,
            description: c.description,
            expression: c.expression,
            created_at: now,
            updated_at: now,
        });
        self.bindings.push(Row::live(Binding {
            id: binding_id,
            policy_id,
            role_id: input.role_id,
            role: None,
            members: members_json(&input.members),
            condition,
            created_at: now,
        }));
        binding_id
    }
}

type Shared = Arc<Mutex<State>>;

fn apply_page<T>(items: Vec<T>, page: Page) -> Vec<T> {
    let iter = items.into_iter().skip(page.offset);
    if page.limit > 0 {
        iter.take(page.limit).collect()
    } else {
        iter.collect()
    }
}

/// Process-local store backing all five repositories with one shared state.
/// Used by tests and by deployments without a database.
#[derive(Debug)]
pub struct InMemoryStore {
    resources: MemResourceRepo,
    permissions: MemPermissionRepo,
    roles: MemRoleRepo,
    policies: MemPolicyRepo,
    bindings: MemBindingRepo,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let state: Shared = Arc::new(Mutex::new(State::default()));
        Self {
            resources: MemResourceRepo {
                state: Arc::clone(&state),
            },
            permissions: MemPermissionRepo {
                state: Arc::clone(&state),
            },
            roles: MemRoleRepo {
                state: Arc::clone(&state),
            },
            policies: MemPolicyRepo {
                state: Arc::clone(&state),
            },
            bindings: MemBindingRepo { state },
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for InMemoryStore {
    type Resources = MemResourceRepo;
    type Permissions = MemPermissionRepo;
    type Roles = MemRoleRepo;
    type Policies = MemPolicyRepo;
    type Bindings = MemBindingRepo;

    fn resources(&self) -> &MemResourceRepo {
        &self.resources
    }

    fn permissions(&self) -> &MemPermissionRepo {
        &self.permissions
    }

    fn roles(&self) -> &MemRoleRepo {
        &self.roles
    }

    fn policies(&self) -> &MemPolicyRepo {
        &self.policies
    }

    fn bindings(&self) -> &MemBindingRepo {
        &self.bindings
    }
}

#[derive(Debug, Clone)]
pub struct MemResourceRepo {
    state: Shared,
}

impl ResourceRepo for MemResourceRepo {
    async fn create(&self, input: NewResource) -> Result<Resource, StorageError> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let resource = Resource {
            id: ensure_id(input.id),
            resource_type: input.resource_type,
            name: input.name,
            parent_id: input.parent_id,
            attributes: input.attributes,
            created_at: now,
            updated_at: now,
        };
        state.resources.push(Row::live(resource.clone()));
        Ok(resource)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Resource>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state.live_resource(id).cloned())
    }

    async fn update(
        &self,
        id: Uuid,
        update: ResourceUpdate,
    ) -> Result<Option<Resource>, StorageError> {
        let mut state = self.state.lock().unwrap();
        let Some(row) = state
            .resources
            .iter_mut()
            .find(|r| !r.deleted && r.value.id == id)
        else {
            return Ok(None);
        };
        row.value.name = update.name;
        row.value.attributes = update.attributes;
        row.value.updated_at = Utc::now();
        Ok(Some(row.value.clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StorageError> {
        let mut state = self.state.lock().unwrap();
        let Some(row) = state
            .resources
            .iter_mut()
            .find(|r| !r.deleted && r.value.id == id)
        else {
            return Ok(false);
        };
        row.deleted = true;

        let policy_ids: Vec<Uuid> = state
            .policies
            .iter_mut()
            .filter(|p| !p.deleted && p.value.resource_id == id)
            .map(|p| {
                p.deleted = true;
                p.value.id
            })
            .collect();
        for binding in state
            .bindings
            .iter_mut()
            .filter(|b| !b.deleted && policy_ids.contains(&b.value.policy_id))
        {
            binding.deleted = true;
        }
        Ok(true)
    }

    async fn list(
        &self,
        filter: ResourceFilter,
        page: Page,
    ) -> Result<Vec<Resource>, StorageError> {
        let state = self.state.lock().unwrap();
        let matches: Vec<Resource> = state
            .resources
            .iter()
            .filter(|r| !r.deleted)
            .filter(|r| match filter.parent_id {
                Some(parent) => r.value.parent_id == Some(parent),
                None => true,
            })
            .filter(|r| match &filter.resource_type {
                Some(t) => &r.value.resource_type == t,
                None => true,
            })
            .map(|r| r.value.clone())
            .collect();
        Ok(apply_page(matches, page))
    }

    async fn children(&self, id: Uuid) -> Result<Vec<Resource>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .resources
            .iter()
            .filter(|r| !r.deleted && r.value.parent_id == Some(id))
            .map(|r| r.value.clone())
            .collect())
    }

    async fn ancestors(&self, id: Uuid) -> Result<Vec<Resource>, StorageError> {
        let state = self.state.lock().unwrap();
        let mut chain = Vec::new();
        let mut current = state.live_resource(id);
        while let Some(resource) = current {
            match resource.parent_id {
                Some(parent_id) => {
                    current = state.live_resource(parent_id);
                    if let Some(parent) = current {
                        chain.push(parent.clone());
                    }
                }
                None => break,
            }
        }
        Ok(chain)
    }

    async fn descendants(&self, id: Uuid) -> Result<Vec<Resource>, StorageError> {
        let state = self.state.lock().unwrap();
        let mut result = Vec::new();
        let mut frontier = vec![id];
        while let Some(parent) = frontier.pop() {
            for row in state
                .resources
                .iter()
                .filter(|r| !r.deleted && r.value.parent_id == Some(parent))
            {
                frontier.push(row.value.id);
                result.push(row.value.clone());
            }
        }
        Ok(result)
    }
}

#[derive(Debug, Clone)]
pub struct MemPermissionRepo {
    state: Shared,
}

impl PermissionRepo for MemPermissionRepo {
    async fn create(&self, input: NewPermission) -> Result<Permission, StorageError> {
        let mut state = self.state.lock().unwrap();
        if state
            .permissions
            .iter()
            .any(|p| !p.deleted && p.value.name == input.name)
        {
            return Err(StorageError::Conflict(format!(
                "permission name '{}'",
                input.name
            )));
        }
        let permission = Permission {
            id: ensure_id(input.id),
            name: input.name,
            description: input.description,
            service: input.service,
            created_at: Utc::now(),
        };
        state.permissions.push(Row::live(permission.clone()));
        Ok(permission)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Permission>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .permissions
            .iter()
            .find(|p| !p.deleted && p.value.id == id)
            .map(|p| p.value.clone()))
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Permission>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .permissions
            .iter()
            .find(|p| !p.deleted && p.value.name == name)
            .map(|p| p.value.clone()))
    }

    async fn get_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Permission>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .permissions
            .iter()
            .filter(|p| !p.deleted && ids.contains(&p.value.id))
            .map(|p| p.value.clone())
            .collect())
    }

    async fn list(
        &self,
        service: Option<&str>,
        page: Page,
    ) -> Result<Vec<Permission>, StorageError> {
        let state = self.state.lock().unwrap();
        let matches: Vec<Permission> = state
            .permissions
            .iter()
            .filter(|p| !p.deleted)
            .filter(|p| match service {
                Some(s) => p.value.service == s,
                None => true,
            })
            .map(|p| p.value.clone())
            .collect();
        Ok(apply_page(matches, page))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StorageError> {
        let mut state = self.state.lock().unwrap();
        let Some(row) = state
            .permissions
            .iter_mut()
            .find(|p| !p.deleted && p.value.id == id)
        else {
            return Ok(false);
        };
        row.deleted = true;
        Ok(true)
    }
}

#[derive(Debug, Clone)]
pub struct MemRoleRepo {
    state: Shared,
}

impl RoleRepo for MemRoleRepo {
    async fn create(&self, input: NewRole) -> Result<Role, StorageError> {
        let mut state = self.state.lock().unwrap();
        if state
            .roles
            .iter()
            .any(|r| !r.deleted && r.value.name == input.name)
        {
            return Err(StorageError::Conflict(format!(
                "role name '{}'",
                input.name
            )));
        }
        let now = Utc::now();
        let role_id = ensure_id(input.id);
        state.roles.push(Row::live(Role {
            id: role_id,
            name: input.name,
            title: input.title,
            description: input.description,
            is_custom: input.is_custom,
            permissions: Vec::new(),
            created_at: now,
            updated_at: now,
        }));
        for permission_id in input.permission_ids {
            if !state
                .role_permissions
                .contains(&(role_id, permission_id))
            {
                state.role_permissions.push((role_id, permission_id));
            }
        }
        state
            .load_role(role_id)
            .ok_or_else(|| StorageError::Internal("role vanished after insert".to_string()))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Role>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state.load_role(id))
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Role>, StorageError> {
        let state = self.state.lock().unwrap();
        let id = state
            .roles
            .iter()
            .find(|r| !r.deleted && r.value.name == name)
            .map(|r| r.value.id);
        Ok(id.and_then(|id| state.load_role(id)))
    }

    async fn update(&self, id: Uuid, update: RoleUpdate) -> Result<Option<Role>, StorageError> {
        let mut state = self.state.lock().unwrap();
        let Some(row) = state
            .roles
            .iter_mut()
            .find(|r| !r.deleted && r.value.id == id)
        else {
            return Ok(None);
        };
        row.value.title = update.title;
        row.value.description = update.description;
        row.value.updated_at = Utc::now();

        state.role_permissions.retain(|(rid, _)| *rid != id);
        for permission_id in update.permission_ids {
            if !state.role_permissions.contains(&(id, permission_id)) {
                state.role_permissions.push((id, permission_id));
            }
        }
        Ok(state.load_role(id))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StorageError> {
        let mut state = self.state.lock().unwrap();
        let Some(row) = state
            .roles
            .iter_mut()
            .find(|r| !r.deleted && r.value.id == id)
        else {
            return Ok(false);
        };
        row.deleted = true;
        state.role_permissions.retain(|(rid, _)| *rid != id);
        Ok(true)
    }

    async fn list(&self, include_custom: bool, page: Page) -> Result<Vec<Role>, StorageError> {
        let state = self.state.lock().unwrap();
        let ids: Vec<Uuid> = state
            .roles
            .iter()
            .filter(|r| !r.deleted)
            .filter(|r| include_custom || !r.value.is_custom)
            .map(|r| r.value.id)
            .collect();
        let roles = ids
            .into_iter()
            .filter_map(|id| state.load_role(id))
            .collect();
        Ok(apply_page(roles, page))
    }

    async fn add_permissions(
        &self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> Result<bool, StorageError> {
        let mut state = self.state.lock().unwrap();
        if !state
            .roles
            .iter()
            .any(|r| !r.deleted && r.value.id == role_id)
        {
            return Ok(false);
        }
        for permission_id in permission_ids {
            if !state.role_permissions.contains(&(role_id, *permission_id)) {
                state.role_permissions.push((role_id, *permission_id));
            }
        }
        Ok(true)
    }

    async fn remove_permissions(
        &self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> Result<bool, StorageError> {
        let mut state = self.state.lock().unwrap();
        if !state
            .roles
            .iter()
            .any(|r| !r.deleted && r.value.id == role_id)
        {
            return Ok(false);
        }
        state
            .role_permissions
            .retain(|(rid, pid)| *rid != role_id || !permission_ids.contains(pid));
        Ok(true)
    }

    async fn get_permissions(&self, role_id: Uuid) -> Result<Vec<Permission>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .load_role(role_id)
            .map(|r| r.permissions)
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
pub struct MemPolicyRepo {
    state: Shared,
}

impl PolicyRepo for MemPolicyRepo {
    async fn create(&self, input: NewPolicy) -> Result<Policy, StorageError> {
        let mut state = self.state.lock().unwrap();
        if state
            .policies
            .iter()
            .any(|p| !p.deleted && p.value.resource_id == input.resource_id)
        {
            return Err(StorageError::Conflict(format!(
                "policy for resource '{}'",
                input.resource_id
            )));
        }
        let now = Utc::now();
        let policy = Policy {
            id: ensure_id(input.id),
            resource_id: input.resource_id,
            version: 1,
            etag: fresh_etag(),
            bindings: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        state.policies.push(Row::live(policy.clone()));
        Ok(policy)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Policy>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state.load_policy(id))
    }

    async fn get_by_resource_id(&self, resource_id: Uuid) -> Result<Option<Policy>, StorageError> {
        let state = self.state.lock().unwrap();
        let id = state
            .policies
            .iter()
            .find(|p| !p.deleted && p.value.resource_id == resource_id)
            .map(|p| p.value.id);
        Ok(id.and_then(|id| state.load_policy(id)))
    }

    async fn replace_bindings(
        &self,
        policy_id: Uuid,
        expected_etag: &str,
        bindings: Vec<NewBinding>,
    ) -> Result<Option<Policy>, StorageError> {
        let mut state = self.state.lock().unwrap();
        let Some(row) = state
            .policies
            .iter_mut()
            .find(|p| !p.deleted && p.value.id == policy_id)
        else {
            return Ok(None);
        };
        if row.value.etag != expected_etag {
            return Err(StorageError::StaleEtag { policy_id });
        }
        row.value.version += 1;
        row.value.etag = fresh_etag();
        row.value.updated_at = Utc::now();

        for binding in state
            .bindings
            .iter_mut()
            .filter(|b| !b.deleted && b.value.policy_id == policy_id)
        {
            binding.deleted = true;
        }
        for binding in bindings {
            state.insert_binding(binding, policy_id);
        }
        Ok(state.load_policy(policy_id))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StorageError> {
        let mut state = self.state.lock().unwrap();
        let Some(row) = state
            .policies
            .iter_mut()
            .find(|p| !p.deleted && p.value.id == id)
        else {
            return Ok(false);
        };
        row.deleted = true;
        for binding in state
            .bindings
            .iter_mut()
            .filter(|b| !b.deleted && b.value.policy_id == id)
        {
            binding.deleted = true;
        }
        Ok(true)
    }

    async fn list(
        &self,
        parent_resource_id: Option<Uuid>,
        page: Page,
    ) -> Result<Vec<Policy>, StorageError> {
        let state = self.state.lock().unwrap();
        let ids: Vec<Uuid> = state
            .policies
            .iter()
            .filter(|p| !p.deleted)
            .filter(|p| match parent_resource_id {
                Some(parent) => state
                    .live_resource(p.value.resource_id)
                    .is_some_and(|r| r.parent_id == Some(parent)),
                None => true,
            })
            .map(|p| p.value.id)
            .collect();
        let policies = ids
            .into_iter()
            .filter_map(|id| state.load_policy(id))
            .collect();
        Ok(apply_page(policies, page))
    }
}

#[derive(Debug, Clone)]
pub struct MemBindingRepo {
    state: Shared,
}

impl BindingRepo for MemBindingRepo {
    async fn create(&self, input: NewBinding) -> Result<Binding, StorageError> {
        let mut state = self.state.lock().unwrap();
        let policy_id = input.policy_id;
        let binding_id = state.insert_binding(input, policy_id);
        state
            .bindings
            .iter()
            .find(|b| b.value.id == binding_id)
            .map(|row| state.load_binding(&row.value))
            .ok_or_else(|| StorageError::Internal("binding vanished after insert".to_string()))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Binding>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .bindings
            .iter()
            .find(|b| !b.deleted && b.value.id == id)
            .map(|b| state.load_binding(&b.value)))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StorageError> {
        let mut state = self.state.lock().unwrap();
        let Some(row) = state
            .bindings
            .iter_mut()
            .find(|b| !b.deleted && b.value.id == id)
        else {
            return Ok(false);
        };
        row.deleted = true;
        Ok(true)
    }

    async fn list_by_resource_id(
        &self,
        resource_id: Uuid,
        page: Page,
    ) -> Result<Vec<Binding>, StorageError> {
        let state = self.state.lock().unwrap();
        let policy_ids: Vec<Uuid> = state
            .policies
            .iter()
            .filter(|p| !p.deleted && p.value.resource_id == resource_id)
            .map(|p| p.value.id)
            .collect();
        let bindings: Vec<Binding> = state
            .bindings
            .iter()
            .filter(|b| !b.deleted && policy_ids.contains(&b.value.policy_id))
            .map(|b| state.load_binding(&b.value))
            .collect();
        Ok(apply_page(bindings, page))
    }

    async fn list_by_principal(
        &self,
        principal: &str,
        page: Page,
    ) -> Result<Vec<Binding>, StorageError> {
        let state = self.state.lock().unwrap();
        let bindings: Vec<Binding> = state
            .bindings
            .iter()
            .filter(|b| !b.deleted && b.value.has_member(principal))
            .map(|b| state.load_binding(&b.value))
            .collect();
        Ok(apply_page(bindings, page))
    }

    async fn get_by_policy_and_principal(
        &self,
        policy_id: Uuid,
        principal: &str,
    ) -> Result<Vec<Binding>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .bindings
            .iter()
            .filter(|b| {
                !b.deleted && b.value.policy_id == policy_id && b.value.has_member(principal)
            })
            .map(|b| state.load_binding(&b.value))
            .collect())
    }
}
