use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use canopy_core::cache::DecisionCache;
use canopy_core::condition::ConditionEvaluator;
use canopy_core::domain::{Binding, Permission, Policy, Resource, Role};
use canopy_core::engine::{CheckRequest, Decision, EffectiveAccess, Evaluator};
use canopy_storage::traits::{
    BindingRepo, NewBinding, NewCondition, NewPermission, NewPolicy, NewResource, NewRole, Page,
    PermissionRepo, PolicyRepo, ResourceFilter, ResourceRepo, ResourceUpdate, RoleRepo,
    RoleUpdate, Store,
};

use crate::adapter::StoreReader;
use crate::audit;
use crate::error::ApiError;

/// One binding as submitted by a caller, before it is attached to a policy.
#[derive(Debug, Clone)]
pub struct BindingSpec {
    pub role_id: Uuid,
    pub members: Vec<String>,
    pub condition: Option<ConditionSpec>,
}

#[derive(Debug, Clone)]
pub struct ConditionSpec {
    pub title: String,
    pub description: String,
    pub expression: String,
}

impl BindingSpec {
    fn into_new_binding(self, policy_id: Uuid) -> NewBinding {
        NewBinding {
            id: Uuid::nil(),
            policy_id,
            role_id: self.role_id,
            members: self.members,
            condition: self.condition.map(|c| NewCondition {
                id: Uuid::nil(),
                title: c.title,
                description: c.description,
                expression: c.expression,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceHierarchy {
    pub ancestors: Vec<Resource>,
    pub descendants: Vec<Resource>,
}

fn validate_check(request: &CheckRequest) -> Result<(), ApiError> {
    if request.principal.is_empty() {
        return Err(ApiError::Invalid("principal must not be empty".to_string()));
    }
    if request.permission.is_empty() {
        return Err(ApiError::Invalid(
            "permission must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), ApiError> {
    if cancel.is_cancelled() {
        return Err(ApiError::Cancelled);
    }
    Ok(())
}

/// Single entry point for external callers: permission decisions delegate to
/// the evaluator, structural mutations go to the repositories and clear the
/// decision cache, and policy mutations are additionally guarded by etags.
///
/// Clearing the whole cache on every mutation is the conservative choice;
/// after any mutation returns, the next check consults the store.
pub struct IamService<S: Store> {
    store: Arc<S>,
    evaluator: Evaluator<StoreReader<S>>,
    cache: Arc<dyn DecisionCache>,
}

impl<S: Store> IamService<S> {
    pub fn new(
        store: Arc<S>,
        cache: Arc<dyn DecisionCache>,
        conditions: Arc<dyn ConditionEvaluator>,
    ) -> Self {
        let reader = StoreReader::new(Arc::clone(&store));
        let evaluator = Evaluator::new(Arc::new(reader), Arc::clone(&cache), conditions);
        Self {
            store,
            evaluator,
            cache,
        }
    }

    // --- permission decisions ---

    #[tracing::instrument(skip(self, request, cancel), fields(principal = %request.principal, resource_id = %request.resource_id, permission = %request.permission))]
    pub async fn check_permission(
        &self,
        request: CheckRequest,
        cancel: &CancellationToken,
    ) -> Result<Decision, ApiError> {
        validate_check(&request)?;
        Ok(self.evaluator.check(&request, cancel).await?)
    }

    /// Decisions come back in input order, one per request.
    #[tracing::instrument(skip_all, fields(count = requests.len()))]
    pub async fn batch_check_permissions(
        &self,
        requests: Vec<CheckRequest>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Decision>, ApiError> {
        let mut decisions = Vec::with_capacity(requests.len());
        for request in requests {
            validate_check(&request)?;
            decisions.push(self.evaluator.check(&request, cancel).await?);
        }
        Ok(decisions)
    }

    #[tracing::instrument(skip(self, cancel), fields(%principal, %resource_id))]
    pub async fn effective_permissions(
        &self,
        principal: &str,
        resource_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<EffectiveAccess, ApiError> {
        if principal.is_empty() {
            return Err(ApiError::Invalid("principal must not be empty".to_string()));
        }
        Ok(self.evaluator.effective(principal, resource_id, cancel).await?)
    }

    // --- resources ---

    #[tracing::instrument(skip_all, fields(name = %input.name, resource_type = %input.resource_type))]
    pub async fn create_resource(
        &self,
        input: NewResource,
        cancel: &CancellationToken,
    ) -> Result<Resource, ApiError> {
        ensure_live(cancel)?;
        if let Some(parent_id) = input.parent_id
            && self.store.resources().get_by_id(parent_id).await?.is_none()
        {
            return Err(ApiError::Invalid(format!(
                "parent resource '{parent_id}' does not exist"
            )));
        }
        let resource = self.store.resources().create(input).await?;
        self.cache.clear().await;
        Ok(resource)
    }

    pub async fn get_resource(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Resource, ApiError> {
        ensure_live(cancel)?;
        self.store
            .resources()
            .get_by_id(id)
            .await?
            .ok_or_else(|| ApiError::not_found("resource"))
    }

    #[tracing::instrument(skip_all, fields(%id))]
    pub async fn update_resource(
        &self,
        id: Uuid,
        update: ResourceUpdate,
        cancel: &CancellationToken,
    ) -> Result<Resource, ApiError> {
        ensure_live(cancel)?;
        let resource = self
            .store
            .resources()
            .update(id, update)
            .await?
            .ok_or_else(|| ApiError::not_found("resource"))?;
        self.cache.clear().await;
        Ok(resource)
    }

    #[tracing::instrument(skip_all, fields(%id))]
    pub async fn delete_resource(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        ensure_live(cancel)?;
        if !self.store.resources().delete(id).await? {
            return Err(ApiError::not_found("resource"));
        }
        self.cache.clear().await;
        audit::audit_resource_deleted(id);
        Ok(())
    }

    pub async fn list_resources(
        &self,
        filter: ResourceFilter,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<Vec<Resource>, ApiError> {
        ensure_live(cancel)?;
        Ok(self.store.resources().list(filter, page).await?)
    }

    /// Ancestors and descendants in one call.
    pub async fn resource_hierarchy(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<ResourceHierarchy, ApiError> {
        ensure_live(cancel)?;
        if self.store.resources().get_by_id(id).await?.is_none() {
            return Err(ApiError::not_found("resource"));
        }
        let ancestors = self.store.resources().ancestors(id).await?;
        let descendants = self.store.resources().descendants(id).await?;
        Ok(ResourceHierarchy {
            ancestors,
            descendants,
        })
    }

    // --- permissions ---

    #[tracing::instrument(skip_all, fields(name = %input.name))]
    pub async fn create_permission(
        &self,
        input: NewPermission,
        cancel: &CancellationToken,
    ) -> Result<Permission, ApiError> {
        ensure_live(cancel)?;
        let permission = self.store.permissions().create(input).await?;
        self.cache.clear().await;
        Ok(permission)
    }

    pub async fn get_permission(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Permission, ApiError> {
        ensure_live(cancel)?;
        self.store
            .permissions()
            .get_by_id(id)
            .await?
            .ok_or_else(|| ApiError::not_found("permission"))
    }

    pub async fn list_permissions(
        &self,
        service: Option<&str>,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<Vec<Permission>, ApiError> {
        ensure_live(cancel)?;
        Ok(self.store.permissions().list(service, page).await?)
    }

    #[tracing::instrument(skip_all, fields(%id))]
    pub async fn delete_permission(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        ensure_live(cancel)?;
        if !self.store.permissions().delete(id).await? {
            return Err(ApiError::not_found("permission"));
        }
        self.cache.clear().await;
        Ok(())
    }

    // --- roles ---

    /// Roles created through the API are always custom roles. Unknown
    /// permission ids are dropped, matching the bulk-lookup contract.
    #[tracing::instrument(skip_all, fields(%name))]
    pub async fn create_role(
        &self,
        name: String,
        title: String,
        description: String,
        permission_ids: Vec<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<Role, ApiError> {
        ensure_live(cancel)?;
        let permissions = self.store.permissions().get_by_ids(&permission_ids).await?;
        let role = self
            .store
            .roles()
            .create(NewRole {
                id: Uuid::nil(),
                name,
                title,
                description,
                is_custom: true,
                permission_ids: permissions.iter().map(|p| p.id).collect(),
            })
            .await?;
        self.cache.clear().await;
        Ok(role)
    }

    pub async fn get_role(&self, id: Uuid, cancel: &CancellationToken) -> Result<Role, ApiError> {
        ensure_live(cancel)?;
        self.store
            .roles()
            .get_by_id(id)
            .await?
            .ok_or_else(|| ApiError::not_found("role"))
    }

    #[tracing::instrument(skip_all, fields(%id))]
    pub async fn update_role(
        &self,
        id: Uuid,
        update: RoleUpdate,
        cancel: &CancellationToken,
    ) -> Result<Role, ApiError> {
        ensure_live(cancel)?;
        let role = self
            .store
            .roles()
            .update(id, update)
            .await?
            .ok_or_else(|| ApiError::not_found("role"))?;
        self.cache.clear().await;
        Ok(role)
    }

    #[tracing::instrument(skip_all, fields(%id))]
    pub async fn delete_role(&self, id: Uuid, cancel: &CancellationToken) -> Result<(), ApiError> {
        ensure_live(cancel)?;
        if !self.store.roles().delete(id).await? {
            return Err(ApiError::not_found("role"));
        }
        self.cache.clear().await;
        Ok(())
    }

    pub async fn list_roles(
        &self,
        include_custom: bool,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<Vec<Role>, ApiError> {
        ensure_live(cancel)?;
        Ok(self.store.roles().list(include_custom, page).await?)
    }

    // --- policies ---

    #[tracing::instrument(skip_all, fields(%resource_id))]
    pub async fn create_policy(
        &self,
        resource_id: Uuid,
        bindings: Vec<BindingSpec>,
        cancel: &CancellationToken,
    ) -> Result<Policy, ApiError> {
        ensure_live(cancel)?;
        if self.store.resources().get_by_id(resource_id).await?.is_none() {
            return Err(ApiError::not_found("resource"));
        }
        let policy = self
            .store
            .policies()
            .create(NewPolicy {
                id: Uuid::nil(),
                resource_id,
            })
            .await?;
        for spec in bindings {
            self.store
                .bindings()
                .create(spec.into_new_binding(policy.id))
                .await?;
        }
        self.cache.clear().await;
        audit::audit_policy_created(resource_id, policy.id);

        self.store
            .policies()
            .get_by_id(policy.id)
            .await?
            .ok_or_else(|| ApiError::Storage("policy vanished after create".to_string()))
    }

    pub async fn get_policy(
        &self,
        resource_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Policy, ApiError> {
        ensure_live(cancel)?;
        self.store
            .policies()
            .get_by_resource_id(resource_id)
            .await?
            .ok_or_else(|| ApiError::not_found("policy"))
    }

    /// Whole-policy replacement, guarded by the caller's etag. The store
    /// swaps bindings, bumps the version, and refreshes the etag in a
    /// single transaction; a stale etag fails with `EtagMismatch`.
    #[tracing::instrument(skip_all, fields(%resource_id))]
    pub async fn update_policy(
        &self,
        resource_id: Uuid,
        bindings: Vec<BindingSpec>,
        etag: &str,
        cancel: &CancellationToken,
    ) -> Result<Policy, ApiError> {
        ensure_live(cancel)?;
        let policy = self
            .store
            .policies()
            .get_by_resource_id(resource_id)
            .await?
            .ok_or_else(|| ApiError::not_found("policy"))?;

        let new_bindings = bindings
            .into_iter()
            .map(|spec| spec.into_new_binding(policy.id))
            .collect();
        let updated = self
            .store
            .policies()
            .replace_bindings(policy.id, etag, new_bindings)
            .await?
            .ok_or_else(|| ApiError::not_found("policy"))?;

        self.cache.clear().await;
        audit::audit_policy_updated(resource_id, updated.id, updated.version);
        Ok(updated)
    }

    #[tracing::instrument(skip_all, fields(%resource_id))]
    pub async fn delete_policy(
        &self,
        resource_id: Uuid,
        etag: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        ensure_live(cancel)?;
        let policy = self
            .store
            .policies()
            .get_by_resource_id(resource_id)
            .await?
            .ok_or_else(|| ApiError::not_found("policy"))?;
        if policy.etag != etag {
            return Err(ApiError::EtagMismatch);
        }
        if !self.store.policies().delete(policy.id).await? {
            return Err(ApiError::not_found("policy"));
        }
        self.cache.clear().await;
        audit::audit_policy_deleted(resource_id, policy.id);
        Ok(())
    }

    pub async fn list_policies(
        &self,
        parent_resource_id: Option<Uuid>,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<Vec<Policy>, ApiError> {
        ensure_live(cancel)?;
        Ok(self.store.policies().list(parent_resource_id, page).await?)
    }

    // --- bindings ---

    /// Creates a binding on a resource, implicitly creating the policy if
    /// the resource does not have one yet. The condition, when present, is
    /// persisted with the binding.
    #[tracing::instrument(skip_all, fields(%resource_id, %role_id))]
    pub async fn create_binding(
        &self,
        resource_id: Uuid,
        role_id: Uuid,
        members: Vec<String>,
        condition: Option<ConditionSpec>,
        cancel: &CancellationToken,
    ) -> Result<Binding, ApiError> {
        ensure_live(cancel)?;
        if self.store.resources().get_by_id(resource_id).await?.is_none() {
            return Err(ApiError::not_found("resource"));
        }
        if self.store.roles().get_by_id(role_id).await?.is_none() {
            return Err(ApiError::not_found("role"));
        }

        let policy = match self.store.policies().get_by_resource_id(resource_id).await? {
            Some(policy) => policy,
            None => {
                self.store
                    .policies()
                    .create(NewPolicy {
                        id: Uuid::nil(),
                        resource_id,
                    })
                    .await?
            }
        };

        let spec = BindingSpec {
            role_id,
            members,
            condition,
        };
        let binding = self
            .store
            .bindings()
            .create(spec.into_new_binding(policy.id))
            .await?;

        self.cache.clear().await;
        audit::audit_binding_created(binding.id, policy.id, role_id);
        Ok(binding)
    }

    #[tracing::instrument(skip_all, fields(%id))]
    pub async fn delete_binding(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        ensure_live(cancel)?;
        if !self.store.bindings().delete(id).await? {
            return Err(ApiError::not_found("binding"));
        }
        self.cache.clear().await;
        audit::audit_binding_deleted(id);
        Ok(())
    }

    pub async fn list_bindings_by_resource(
        &self,
        resource_id: Uuid,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<Vec<Binding>, ApiError> {
        ensure_live(cancel)?;
        Ok(self
            .store
            .bindings()
            .list_by_resource_id(resource_id, page)
            .await?)
    }

    pub async fn list_bindings_by_principal(
        &self,
        principal: &str,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<Vec<Binding>, ApiError> {
        ensure_live(cancel)?;
        if principal.is_empty() {
            return Err(ApiError::Invalid("principal must not be empty".to_string()));
        }
        Ok(self.store.bindings().list_by_principal(principal, page).await?)
    }
}
