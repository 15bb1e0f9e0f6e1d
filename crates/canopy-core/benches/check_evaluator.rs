use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use criterion::{Criterion, criterion_group, criterion_main};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use canopy_core::cache::NoopCache;
use canopy_core::condition::AcceptAll;
use canopy_core::domain::{Binding, Permission, Policy, Resource, Role, fresh_etag, members_json};
use canopy_core::engine::{
    CheckRequest, EvalError, Evaluator, PolicyReader, ResourceReader,
};

struct TestStore {
    resources: Vec<Resource>,
    policies: Vec<Policy>,
}

impl ResourceReader for TestStore {
    async fn resource_by_id(&self, id: Uuid) -> Result<Option<Resource>, EvalError> {
        Ok(self.resources.iter().find(|r| r.id == id).cloned())
    }

    async fn ancestors(&self, id: Uuid) -> Result<Vec<Resource>, EvalError> {
        let mut chain = Vec::new();
        let mut current = self.resources.iter().find(|r| r.id == id);
        while let Some(resource) = current {
            match resource.parent_id {
                Some(parent_id) => {
                    current = self.resources.iter().find(|r| r.id == parent_id);
                    if let Some(parent) = current {
                        chain.push(parent.clone());
                    }
                }
                None => break,
            }
        }
        Ok(chain)
    }
}

impl PolicyReader for TestStore {
    async fn policy_for_resource(&self, resource_id: Uuid) -> Result<Option<Policy>, EvalError> {
        Ok(self
            .policies
            .iter()
            .find(|p| p.resource_id == resource_id)
            .cloned())
    }
}

fn resource(name: &str, parent_id: Option<Uuid>) -> Resource {
    Resource {
        id: Uuid::new_v4(),
        resource_type: "bucket".to_string(),
        name: name.to_string(),
        parent_id,
        attributes: HashMap::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn viewer_role() -> Role {
    Role {
        id: Uuid::new_v4(),
        name: "roles/storage.viewer".to_string(),
        title: "Viewer".to_string(),
        description: String::new(),
        is_custom: false,
        permissions: vec![Permission {
            id: Uuid::new_v4(),
            name: "storage.objects.read".to_string(),
            description: String::new(),
            service: "storage".to_string(),
            created_at: Utc::now(),
        }],
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn policy_granting(resource_id: Uuid, members: Vec<String>) -> Policy {
    let policy_id = Uuid::new_v4();
    let role = viewer_role();
    Policy {
        id: policy_id,
        resource_id,
        version: 1,
        etag: fresh_etag(),
        bindings: vec![Binding {
            id: Uuid::new_v4(),
            policy_id,
            role_id: role.id,
            role: Some(role),
            members: members_json(&members),
            condition: None,
            created_at: Utc::now(),
        }],
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn make_evaluator(store: TestStore) -> Evaluator<TestStore> {
    Evaluator::new(Arc::new(store), Arc::new(NoopCache), Arc::new(AcceptAll))
}

/// A chain of `depth` resources with the grant at the root.
fn ancestor_chain(depth: usize) -> (TestStore, Uuid) {
    let mut resources = vec![resource("level0", None)];
    for i in 1..depth {
        let parent_id = resources[i - 1].id;
        resources.push(resource(&format!("level{i}"), Some(parent_id)));
    }
    let leaf = resources[depth - 1].id;
    let policies = vec![policy_granting(
        resources[0].id,
        vec!["user:alice@example.com".to_string()],
    )];
    (TestStore { resources, policies }, leaf)
}

fn fan_out_members(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("user:user{i}@example.com")).collect()
}

fn request(principal: &str, resource_id: Uuid) -> CheckRequest {
    CheckRequest {
        principal: principal.to_string(),
        resource_id,
        permission: "storage.objects.read".to_string(),
        context: HashMap::new(),
    }
}

fn bench_check_direct_grant(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let bucket = resource("bucket", None);
    let bucket_id = bucket.id;
    let policies = vec![policy_granting(
        bucket_id,
        vec!["user:alice@example.com".to_string()],
    )];
    let evaluator = make_evaluator(TestStore {
        resources: vec![bucket],
        policies,
    });
    let cancel = CancellationToken::new();

    c.bench_function("check_direct_grant", |b| {
        b.to_async(&rt).iter(|| async {
            evaluator
                .check(&request("user:alice@example.com", bucket_id), &cancel)
                .await
                .unwrap()
        });
    });
}

fn bench_check_ancestor_depth_3(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let (store, leaf) = ancestor_chain(3);
    let evaluator = make_evaluator(store);
    let cancel = CancellationToken::new();

    c.bench_function("check_ancestor_depth_3", |b| {
        b.to_async(&rt).iter(|| async {
            evaluator
                .check(&request("user:alice@example.com", leaf), &cancel)
                .await
                .unwrap()
        });
    });
}

fn bench_check_ancestor_depth_6(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let (store, leaf) = ancestor_chain(6);
    let evaluator = make_evaluator(store);
    let cancel = CancellationToken::new();

    c.bench_function("check_ancestor_depth_6", |b| {
        b.to_async(&rt).iter(|| async {
            evaluator
                .check(&request("user:alice@example.com", leaf), &cancel)
                .await
                .unwrap()
        });
    });
}

fn bench_check_member_fan_out_10(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let bucket = resource("bucket", None);
    let bucket_id = bucket.id;
    let policies = vec![policy_granting(bucket_id, fan_out_members(10))];
    let evaluator = make_evaluator(TestStore {
        resources: vec![bucket],
        policies,
    });
    let cancel = CancellationToken::new();

    c.bench_function("check_member_fan_out_10", |b| {
        b.to_async(&rt).iter(|| async {
            evaluator
                .check(&request("user:user5@example.com", bucket_id), &cancel)
                .await
                .unwrap()
        });
    });
}

fn bench_check_member_fan_out_100(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let bucket = resource("bucket", None);
    let bucket_id = bucket.id;
    let policies = vec![policy_granting(bucket_id, fan_out_members(100))];
    let evaluator = make_evaluator(TestStore {
        resources: vec![bucket],
        policies,
    });
    let cancel = CancellationToken::new();

    c.bench_function("check_member_fan_out_100", |b| {
        b.to_async(&rt).iter(|| async {
            evaluator
                .check(&request("user:user50@example.com", bucket_id), &cancel)
                .await
                .unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_check_direct_grant,
    bench_check_ancestor_depth_3,
    bench_check_ancestor_depth_6,
    bench_check_member_fan_out_10,
    bench_check_member_fan_out_100,
);
criterion_main!(benches);
