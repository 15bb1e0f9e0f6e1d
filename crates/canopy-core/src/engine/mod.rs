mod check;

pub use check::{CheckRequest, Decision, EffectiveAccess, Evaluator};

use std::future::Future;

use uuid::Uuid;

use crate::domain::{Policy, Resource};

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("resource not found: {0}")]
    ResourceNotFound(Uuid),

    #[error("storage error while fetching {stage}: {message}")]
    Storage { stage: &'static str, message: String },

    #[error("evaluation cancelled")]
    Cancelled,
}

/// Read access to the resource tree, as the evaluator needs it.
pub trait ResourceReader: Send + Sync {
    fn resource_by_id(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Resource>, EvalError>> + Send;

    /// Ancestor chain from the immediate parent up to the root.
    fn ancestors(&self, id: Uuid)
    -> impl Future<Output = Result<Vec<Resource>, EvalError>> + Send;
}

/// Read access to policies, fully loaded: bindings with their roles, role
/// permissions, and conditions.
pub trait PolicyReader: Send + Sync {
    fn policy_for_resource(
        &self,
        resource_id: Uuid,
    ) -> impl Future<Output = Result<Option<Policy>, EvalError>> + Send;
}
