use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::{DecisionCache, decision_key};
use crate::condition::ConditionEvaluator;
use crate::domain::Resource;

use super::{EvalError, PolicyReader, ResourceReader};

#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub principal: String,
    pub resource_id: Uuid,
    pub permission: String,
    pub context: HashMap<String, String>,
}

/// Outcome of a permission check. The reason is user-visible: it names the
/// granting role and resource, or carries the `(cached)` marker when the
/// decision was served from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
}

/// All roles and permissions a principal holds on a resource, including
/// everything inherited from ancestors. Ordering of both sets is
/// unspecified.
#[derive(Debug, Clone, Default)]
pub struct EffectiveAccess {
    pub permissions: Vec<String>,
    pub roles: Vec<String>,
}

/// Hierarchical permission evaluator.
///
/// A check walks the target resource and its ancestors nearest-first,
/// matching the principal against each policy's bindings and the requested
/// permission against each matching binding's role. The first grant wins
/// and is cached; denials are never cached.
pub struct Evaluator<R> {
    reader: Arc<R>,
    cache: Arc<dyn DecisionCache>,
    conditions: Arc<dyn ConditionEvaluator>,
}

impl<R: ResourceReader + PolicyReader> Evaluator<R> {
    pub fn new(
        reader: Arc<R>,
        cache: Arc<dyn DecisionCache>,
        conditions: Arc<dyn ConditionEvaluator>,
    ) -> Self {
        Self {
            reader,
            cache,
            conditions,
        }
    }

    pub async fn check(
        &self,
        request: &CheckRequest,
        cancel: &CancellationToken,
    ) -> Result<Decision, EvalError> {
        let key = decision_key(&request.principal, request.resource_id, &request.permission);
        if self.cache.get(&key).await == Some(true) {
            return Ok(Decision {
                allowed: true,
                reason: "permission granted (cached)".to_string(),
            });
        }

        if cancel.is_cancelled() {
            return Err(EvalError::Cancelled);
        }
        let Some(resource) = self.reader.resource_by_id(request.resource_id).await? else {
            return Ok(Decision {
                allowed: false,
                reason: "resource not found".to_string(),
            });
        };

        for link in self.evaluation_chain(resource, cancel).await? {
            if cancel.is_cancelled() {
                return Err(EvalError::Cancelled);
            }
            let Some(policy) = self.reader.policy_for_resource(link.id).await? else {
                continue;
            };

            for binding in &policy.bindings {
                if !binding.has_member(&request.principal) {
                    continue;
                }
                if let Some(condition) = &binding.condition
                    && !self
                        .conditions
                        .evaluate(&condition.expression, &request.context)
                {
                    continue;
                }
                if let Some(role) = &binding.role
                    && role.has_permission(&request.permission)
                {
                    let reason = format!(
                        "permission granted via role '{}' on resource '{}'",
                        role.name, link.id
                    );
                    self.cache.set(&key, true).await;
                    return Ok(Decision {
                        allowed: true,
                        reason,
                    });
                }
            }
        }

        Ok(Decision {
            allowed: false,
            reason: "permission denied: no matching policy found".to_string(),
        })
    }

    pub async fn effective(
        &self,
        principal: &str,
        resource_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<EffectiveAccess, EvalError> {
        if cancel.is_cancelled() {
            return Err(EvalError::Cancelled);
        }
        let Some(resource) = self.reader.resource_by_id(resource_id).await? else {
            return Err(EvalError::ResourceNotFound(resource_id));
        };

        let mut permissions = HashSet::new();
        let mut roles = HashSet::new();
        let context = HashMap::new();

        for link in self.evaluation_chain(resource, cancel).await? {
            if cancel.is_cancelled() {
                return Err(EvalError::Cancelled);
            }
            let Some(policy) = self.reader.policy_for_resource(link.id).await? else {
                continue;
            };

            for binding in &policy.bindings {
                if !binding.has_member(principal) {
                    continue;
                }
                if let Some(condition) = &binding.condition
                    && !self.conditions.evaluate(&condition.expression, &context)
                {
                    continue;
                }
                if let Some(role) = &binding.role {
                    roles.insert(role.name.clone());
                    for permission in &role.permissions {
                        permissions.insert(permission.name.clone());
                    }
                }
            }
        }

        Ok(EffectiveAccess {
            permissions: permissions.into_iter().collect(),
            roles: roles.into_iter().collect(),
        })
    }

    /// The resource itself followed by its ancestors, nearest to farthest.
    /// The order only affects which resource a grant reason names; the final
    /// boolean is order-independent.
    async fn evaluation_chain(
        &self,
        resource: Resource,
        cancel: &CancellationToken,
    ) -> Result<Vec<Resource>, EvalError> {
        if cancel.is_cancelled() {
            return Err(EvalError::Cancelled);
        }
        let mut chain = vec![resource];
        chain.extend(self.reader.ancestors(chain[0].id).await?);
        Ok(chain)
    }
}
