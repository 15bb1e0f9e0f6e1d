use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use canopy_core::cache::{DecisionCache, NoopCache, decision_key};
use canopy_core::condition::{AcceptAll, ConditionEvaluator};
use canopy_core::engine::CheckRequest;
use canopy_server::cache::LocalCache;
use canopy_server::error::ApiError;
use canopy_server::service::{BindingSpec, ConditionSpec, IamService};
use canopy_storage::InMemoryStore;
use canopy_storage::traits::NewPermission;
use canopy_storage::traits::NewResource;

struct RejectAll;

impl ConditionEvaluator for RejectAll {
    fn evaluate(&self, _expression: &str, _context: &HashMap<String, String>) -> bool {
        false
    }
}

fn service() -> IamService<InMemoryStore> {
    IamService::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(NoopCache),
        Arc::new(AcceptAll),
    )
}

fn service_with_cache(cache: Arc<dyn DecisionCache>) -> IamService<InMemoryStore> {
    IamService::new(Arc::new(InMemoryStore::new()), cache, Arc::new(AcceptAll))
}

fn cancel() -> CancellationToken {
    CancellationToken::new()
}

fn check(principal: &str, resource_id: Uuid, permission: &str) -> CheckRequest {
    CheckRequest {
        principal: principal.to_string(),
        resource_id,
        permission: permission.to_string(),
        context: HashMap::new(),
    }
}

fn new_resource(name: &str, parent_id: Option<Uuid>) -> NewResource {
    NewResource {
        id: Uuid::nil(),
        resource_type: "bucket".to_string(),
        name: name.to_string(),
        parent_id,
        attributes: HashMap::new(),
    }
}

fn new_permission(name: &str) -> NewPermission {
    NewPermission {
        id: Uuid::nil(),
        name: name.to_string(),
        description: String::new(),
        service: "storage".to_string(),
    }
}

async fn grant(
    svc: &IamService<InMemoryStore>,
    resource_id: Uuid,
    role_name: &str,
    permission_names: &[&str],
    member: &str,
) -> Uuid {
    let mut permission_ids = Vec::new();
    for name in permission_names {
        let permission = match svc.create_permission(new_permission(name), &cancel()).await {
            Ok(permission) => permission,
            // Already seeded by an earlier grant in the same test.
            Err(ApiError::Conflict(_)) => {
                svc.list_permissions(None, Default::default(), &cancel())
                    .await
                    .unwrap()
                    .into_iter()
                    .find(|p| p.name == *name)
                    .unwrap()
            }
            Err(e) => panic!("create permission: {e}"),
        };
        permission_ids.push(permission.id);
    }
    let role = svc
        .create_role(
            role_name.to_string(),
            role_name.to_string(),
            String::new(),
            permission_ids,
            &cancel(),
        )
        .await
        .unwrap();
    let binding = svc
        .create_binding(
            resource_id,
            role.id,
            vec![member.to_string()],
            None,
            &cancel(),
        )
        .await
        .unwrap();
    binding.id
}

#[tokio::test]
async fn direct_grant_names_role_and_resource() {
    let svc = service();
    let bucket = svc
        .create_resource(new_resource("bucket-A", None), &cancel())
        .await
        .unwrap();
    grant(
        &svc,
        bucket.id,
        "roles/storage.viewer",
        &["storage.objects.read"],
        "user:alice@example.com",
    )
    .await;

    let decision = svc
        .check_permission(
            check("user:alice@example.com", bucket.id, "storage.objects.read"),
            &cancel(),
        )
        .await
        .unwrap();

    assert!(decision.allowed);
    assert!(decision.reason.contains("roles/storage.viewer"));
    assert!(decision.reason.contains(&bucket.id.to_string()));
}

#[tokio::test]
async fn grant_on_org_reaches_bucket() {
    let svc = service();
    let org = svc
        .create_resource(new_resource("org", None), &cancel())
        .await
        .unwrap();
    let project = svc
        .create_resource(new_resource("project", Some(org.id)), &cancel())
        .await
        .unwrap();
    let bucket = svc
        .create_resource(new_resource("bucket", Some(project.id)), &cancel())
        .await
        .unwrap();
    grant(
        &svc,
        org.id,
        "roles/storage.admin",
        &["storage.objects.read", "storage.objects.delete"],
        "user:charlie@example.com",
    )
    .await;

    let decision = svc
        .check_permission(
            check("user:charlie@example.com", bucket.id, "storage.objects.read"),
            &cancel(),
        )
        .await
        .unwrap();

    assert!(decision.allowed);
    assert!(decision.reason.contains(&org.id.to_string()));
}

#[tokio::test]
async fn grant_on_bucket_does_not_reach_org() {
    let svc = service();
    let org = svc
        .create_resource(new_resource("org", None), &cancel())
        .await
        .unwrap();
    let bucket = svc
        .create_resource(new_resource("bucket", Some(org.id)), &cancel())
        .await
        .unwrap();
    grant(
        &svc,
        bucket.id,
        "roles/storage.viewer",
        &["storage.objects.read"],
        "user:alice@example.com",
    )
    .await;

    let decision = svc
        .check_permission(
            check("user:alice@example.com", org.id, "storage.objects.read"),
            &cancel(),
        )
        .await
        .unwrap();

    assert!(!decision.allowed);
}

#[tokio::test]
async fn denial_when_role_lacks_permission() {
    let svc = service();
    let bucket = svc
        .create_resource(new_resource("bucket-A", None), &cancel())
        .await
        .unwrap();
    grant(
        &svc,
        bucket.id,
        "roles/storage.viewer",
        &["storage.objects.read"],
        "user:alice@example.com",
    )
    .await;

    let decision = svc
        .check_permission(
            check("user:alice@example.com", bucket.id, "storage.objects.delete"),
            &cancel(),
        )
        .await
        .unwrap();

    assert!(!decision.allowed);
    assert!(decision.reason.contains("no matching policy"));
}

#[tokio::test]
async fn membership_is_byte_exact() {
    let svc = service();
    let bucket = svc
        .create_resource(new_resource("bucket-A", None), &cancel())
        .await
        .unwrap();
    grant(
        &svc,
        bucket.id,
        "roles/storage.viewer",
        &["storage.objects.read"],
        "user:alice@example.com",
    )
    .await;

    for principal in ["user:Alice@example.com", "user:alice@example.com "] {
        let decision = svc
            .check_permission(check(principal, bucket.id, "storage.objects.read"), &cancel())
            .await
            .unwrap();
        assert!(!decision.allowed, "{principal:?} must not be granted");
    }
}

#[tokio::test]
async fn stale_etag_update_fails_after_concurrent_update() {
    let svc = service();
    let bucket = svc
        .create_resource(new_resource("bucket-A", None), &cancel())
        .await
        .unwrap();
    let role = svc
        .create_role(
            "roles/storage.viewer".to_string(),
            "Viewer".to_string(),
            String::new(),
            vec![],
            &cancel(),
        )
        .await
        .unwrap();
    svc.create_policy(bucket.id, vec![], &cancel()).await.unwrap();

    // Two readers fetch the same version of the policy.
    let first_read = svc.get_policy(bucket.id, &cancel()).await.unwrap();
    let second_read = svc.get_policy(bucket.id, &cancel()).await.unwrap();
    assert_eq!(first_read.etag, second_read.etag);

    let binding = BindingSpec {
        role_id: role.id,
        members: vec!["user:alice@example.com".to_string()],
        condition: None,
    };
    let updated = svc
        .update_policy(bucket.id, vec![binding.clone()], &first_read.etag, &cancel())
        .await
        .unwrap();
    assert_eq!(updated.version, first_read.version + 1);
    assert_ne!(updated.etag, first_read.etag);

    let err = svc
        .update_policy(bucket.id, vec![binding], &second_read.etag, &cancel())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::EtagMismatch));
}

#[tokio::test]
async fn condition_veto_blocks_grant() {
    let store = Arc::new(InMemoryStore::new());
    let vetoing = IamService::new(Arc::clone(&store), Arc::new(NoopCache), Arc::new(RejectAll));

    let bucket = vetoing
        .create_resource(new_resource("bucket-A", None), &cancel())
        .await
        .unwrap();
    let role = vetoing
        .create_role(
            "roles/storage.viewer".to_string(),
            "Viewer".to_string(),
            String::new(),
            vec![],
            &cancel(),
        )
        .await
        .unwrap();
    let permission = vetoing
        .create_permission(new_permission("storage.objects.read"), &cancel())
        .await
        .unwrap();
    vetoing
        .update_role(
            role.id,
            canopy_storage::traits::RoleUpdate {
                title: "Viewer".to_string(),
                description: String::new(),
                permission_ids: vec![permission.id],
            },
            &cancel(),
        )
        .await
        .unwrap();
    vetoing
        .create_binding(
            bucket.id,
            role.id,
            vec!["user:alice@example.com".to_string()],
            Some(ConditionSpec {
                title: "Business Hours".to_string(),
                description: String::new(),
                expression: "request.time.hour >= 9".to_string(),
            }),
            &cancel(),
        )
        .await
        .unwrap();

    let decision = vetoing
        .check_permission(
            check("user:alice@example.com", bucket.id, "storage.objects.read"),
            &cancel(),
        )
        .await
        .unwrap();
    assert!(!decision.allowed);

    // Same data, permissive hook: the binding grants.
    let accepting = IamService::new(store, Arc::new(NoopCache), Arc::new(AcceptAll));
    let decision = accepting
        .check_permission(
            check("user:alice@example.com", bucket.id, "storage.objects.read"),
            &cancel(),
        )
        .await
        .unwrap();
    assert!(decision.allowed);
}

#[tokio::test]
async fn batch_check_preserves_input_order() {
    let svc = service();
    let bucket = svc
        .create_resource(new_resource("bucket-A", None), &cancel())
        .await
        .unwrap();
    grant(
        &svc,
        bucket.id,
        "roles/storage.viewer",
        &["storage.objects.read"],
        "user:alice@example.com",
    )
    .await;

    let decisions = svc
        .batch_check_permissions(
            vec![
                check("user:alice@example.com", bucket.id, "storage.objects.delete"),
                check("user:alice@example.com", bucket.id, "storage.objects.read"),
                check("user:bob@example.com", bucket.id, "storage.objects.read"),
            ],
            &cancel(),
        )
        .await
        .unwrap();

    assert_eq!(decisions.len(), 3);
    assert!(!decisions[0].allowed);
    assert!(decisions[1].allowed);
    assert!(!decisions[2].allowed);
}

#[tokio::test]
async fn only_positive_decisions_are_cached() {
    let cache = Arc::new(LocalCache::new(Duration::from_secs(300), 128));
    let svc = service_with_cache(cache.clone());

    let bucket = svc
        .create_resource(new_resource("bucket-A", None), &cancel())
        .await
        .unwrap();
    grant(
        &svc,
        bucket.id,
        "roles/storage.viewer",
        &["storage.objects.read"],
        "user:alice@example.com",
    )
    .await;

    svc.check_permission(
        check("user:alice@example.com", bucket.id, "storage.objects.read"),
        &cancel(),
    )
    .await
    .unwrap();
    svc.check_permission(
        check("user:alice@example.com", bucket.id, "storage.objects.delete"),
        &cancel(),
    )
    .await
    .unwrap();

    let grant_key = decision_key("user:alice@example.com", bucket.id, "storage.objects.read");
    let deny_key = decision_key("user:alice@example.com", bucket.id, "storage.objects.delete");
    assert_eq!(cache.get(&grant_key).await, Some(true));
    assert_eq!(cache.get(&deny_key).await, None);

    let cached = svc
        .check_permission(
            check("user:alice@example.com", bucket.id, "storage.objects.read"),
            &cancel(),
        )
        .await
        .unwrap();
    assert!(cached.allowed);
    assert!(cached.reason.contains("(cached)"));
}

#[tokio::test]
async fn mutations_take_effect_despite_long_cache_ttl() {
    // TTL far longer than the test: only invalidation can explain the
    // decisions changing.
    let cache = Arc::new(LocalCache::new(Duration::from_secs(3600), 128));
    let svc = service_with_cache(cache);

    let bucket = svc
        .create_resource(new_resource("bucket-A", None), &cancel())
        .await
        .unwrap();
    let binding_id = grant(
        &svc,
        bucket.id,
        "roles/storage.viewer",
        &["storage.objects.read"],
        "user:alice@example.com",
    )
    .await;

    let before = svc
        .check_permission(
            check("user:alice@example.com", bucket.id, "storage.objects.read"),
            &cancel(),
        )
        .await
        .unwrap();
    assert!(before.allowed);

    svc.delete_binding(binding_id, &cancel()).await.unwrap();

    let after = svc
        .check_permission(
            check("user:alice@example.com", bucket.id, "storage.objects.read"),
            &cancel(),
        )
        .await
        .unwrap();
    assert!(!after.allowed, "revocation must be visible immediately");
}

#[tokio::test]
async fn idempotent_deletes_report_not_found() {
    let svc = service();
    let bucket = svc
        .create_resource(new_resource("bucket-A", None), &cancel())
        .await
        .unwrap();
    let binding_id = grant(
        &svc,
        bucket.id,
        "roles/storage.viewer",
        &["storage.objects.read"],
        "user:alice@example.com",
    )
    .await;

    svc.delete_binding(binding_id, &cancel()).await.unwrap();
    let err = svc.delete_binding(binding_id, &cancel()).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound { entity: "binding" }));

    svc.delete_resource(bucket.id, &cancel()).await.unwrap();
    let err = svc.delete_resource(bucket.id, &cancel()).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound { entity: "resource" }));
}

#[tokio::test]
async fn deleting_resource_revokes_access_through_its_policy() {
    let svc = service();
    let org = svc
        .create_resource(new_resource("org", None), &cancel())
        .await
        .unwrap();
    let bucket = svc
        .create_resource(new_resource("bucket", Some(org.id)), &cancel())
        .await
        .unwrap();
    grant(
        &svc,
        bucket.id,
        "roles/storage.viewer",
        &["storage.objects.read"],
        "user:alice@example.com",
    )
    .await;

    svc.delete_resource(bucket.id, &cancel()).await.unwrap();

    let decision = svc
        .check_permission(
            check("user:alice@example.com", bucket.id, "storage.objects.read"),
            &cancel(),
        )
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.reason, "resource not found");
}

#[tokio::test]
async fn effective_permissions_on_leaf_include_inherited() {
    let svc = service();
    let org = svc
        .create_resource(new_resource("org", None), &cancel())
        .await
        .unwrap();
    let bucket = svc
        .create_resource(new_resource("bucket", Some(org.id)), &cancel())
        .await
        .unwrap();
    grant(
        &svc,
        org.id,
        "roles/storage.admin",
        &["storage.objects.read", "storage.objects.delete"],
        "user:alice@example.com",
    )
    .await;
    grant(
        &svc,
        bucket.id,
        "roles/storage.viewer",
        &["storage.objects.read"],
        "user:alice@example.com",
    )
    .await;

    let access = svc
        .effective_permissions("user:alice@example.com", bucket.id, &cancel())
        .await
        .unwrap();

    let mut roles = access.roles.clone();
    roles.sort();
    assert_eq!(roles, vec!["roles/storage.admin", "roles/storage.viewer"]);
    let mut permissions = access.permissions.clone();
    permissions.sort();
    assert_eq!(
        permissions,
        vec!["storage.objects.delete", "storage.objects.read"]
    );
}
