use std::sync::Arc;

use uuid::Uuid;

use canopy_core::domain::{Policy, Resource};
use canopy_core::engine::{EvalError, PolicyReader, ResourceReader};
use canopy_storage::{PolicyRepo, ResourceRepo, Store};

/// Bridges the evaluator's reader contracts onto a concrete store,
/// tagging failures with the fetch stage they occurred in.
pub struct StoreReader<S> {
    store: Arc<S>,
}

impl<S> StoreReader<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: Store> ResourceReader for StoreReader<S> {
    async fn resource_by_id(&self, id: Uuid) -> Result<Option<Resource>, EvalError> {
        self.store
            .resources()
            .get_by_id(id)
            .await
            .map_err(|e| EvalError::Storage {
                stage: "resource",
                message: e.to_string(),
            })
    }

    async fn ancestors(&self, id: Uuid) -> Result<Vec<Resource>, EvalError> {
        self.store
            .resources()
            .ancestors(id)
            .await
            .map_err(|e| EvalError::Storage {
                stage: "ancestors",
                message: e.to_string(),
            })
    }
}

impl<S: Store> PolicyReader for StoreReader<S> {
    async fn policy_for_resource(&self, resource_id: Uuid) -> Result<Option<Policy>, EvalError> {
        self.store
            .policies()
            .get_by_resource_id(resource_id)
            .await
            .map_err(|e| EvalError::Storage {
                stage: "policy",
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_storage::InMemoryStore;
    use canopy_storage::traits::{NewPolicy, NewResource};
    use std::collections::HashMap;

    #[tokio::test]
    async fn adapter_reads_resources_and_policies() {
        let store = Arc::new(InMemoryStore::new());
        let resource = store
            .resources()
            .create(NewResource {
                id: Uuid::nil(),
                resource_type: "bucket".to_string(),
                name: "data".to_string(),
                parent_id: None,
                attributes: HashMap::new(),
            })
            .await
            .unwrap();
        store
            .policies()
            .create(NewPolicy {
                id: Uuid::nil(),
                resource_id: resource.id,
            })
            .await
            .unwrap();

        let reader = StoreReader::new(Arc::clone(&store));

        let fetched = reader.resource_by_id(resource.id).await.unwrap();
        assert_eq!(fetched.map(|r| r.id), Some(resource.id));

        let policy = reader.policy_for_resource(resource.id).await.unwrap();
        assert!(policy.is_some());

        let missing = reader.resource_by_id(Uuid::new_v4()).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn adapter_walks_ancestors_nearest_first() {
        let store = Arc::new(InMemoryStore::new());
        let org = store
            .resources()
            .create(NewResource {
                id: Uuid::nil(),
                resource_type: "organization".to_string(),
                name: "org".to_string(),
                parent_id: None,
                attributes: HashMap::new(),
            })
            .await
            .unwrap();
        let project = store
            .resources()
            .create(NewResource {
                id: Uuid::nil(),
                resource_type: "project".to_string(),
                name: "proj".to_string(),
                parent_id: Some(org.id),
                attributes: HashMap::new(),
            })
            .await
            .unwrap();

        let reader = StoreReader::new(store);
        let ancestors = reader.ancestors(project.id).await.unwrap();

        assert_eq!(ancestors.len(), 1);
        assert_eq!(ancestors[0].id, org.id);
    }
}
