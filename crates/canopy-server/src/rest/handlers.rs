use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use canopy_core::engine::CheckRequest;
use canopy_storage::Store;
use canopy_storage::traits::{NewPermission, NewResource, Page, ResourceFilter, ResourceUpdate, RoleUpdate};

use crate::error::ApiError;
use crate::service::{BindingSpec, ConditionSpec};

use super::AppState;
use super::types::*;

fn api_error_to_response(err: ApiError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &err {
        ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
        ApiError::EtagMismatch | ApiError::Conflict(_) => StatusCode::CONFLICT,
        ApiError::Invalid(_) => StatusCode::BAD_REQUEST,
        ApiError::Storage(_) | ApiError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(
            serde_json::to_value(ErrorResponse {
                error: err.to_string(),
            })
            .unwrap(),
        ),
    )
}

fn json_response<T: Serialize>(status: StatusCode, value: T) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(serde_json::to_value(value).unwrap()))
}

fn page_from(limit: Option<usize>, offset: Option<usize>) -> Page {
    Page {
        limit: limit.unwrap_or(50),
        offset: offset.unwrap_or(0),
    }
}

fn check_request_from(req: CheckPermissionRequest) -> CheckRequest {
    CheckRequest {
        principal: req.principal,
        resource_id: req.resource_id,
        permission: req.permission,
        context: req.context,
    }
}

fn binding_spec_from(req: BindingSpecRequest) -> BindingSpec {
    BindingSpec {
        role_id: req.role_id,
        members: req.members,
        condition: req.condition.map(|c| ConditionSpec {
            title: c.title,
            description: c.description,
            expression: c.expression,
        }),
    }
}

// --- permission decisions ---

pub async fn check_permission<S: Store>(
    State(state): State<AppState<S>>,
    Json(req): Json<CheckPermissionRequest>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    match state
        .service
        .check_permission(check_request_from(req), &cancel)
        .await
    {
        Ok(decision) => json_response(StatusCode::OK, CheckPermissionResponse::from(decision)),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn batch_check_permissions<S: Store>(
    State(state): State<AppState<S>>,
    Json(req): Json<BatchCheckPermissionsRequest>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    let requests = req.checks.into_iter().map(check_request_from).collect();
    match state
        .service
        .batch_check_permissions(requests, &cancel)
        .await
    {
        Ok(decisions) => json_response(
            StatusCode::OK,
            BatchCheckPermissionsResponse {
                results: decisions.into_iter().map(Into::into).collect(),
            },
        ),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn effective_permissions<S: Store>(
    State(state): State<AppState<S>>,
    Json(req): Json<EffectivePermissionsRequest>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    match state
        .service
        .effective_permissions(&req.principal, req.resource_id, &cancel)
        .await
    {
        Ok(access) => json_response(StatusCode::OK, EffectivePermissionsResponse::from(access)),
        Err(e) => api_error_to_response(e),
    }
}

// --- resources ---

pub async fn create_resource<S: Store>(
    State(state): State<AppState<S>>,
    Json(req): Json<CreateResourceRequest>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    let input = NewResource {
        id: Uuid::nil(),
        resource_type: req.resource_type,
        name: req.name,
        parent_id: req.parent_id,
        attributes: req.attributes,
    };
    match state.service.create_resource(input, &cancel).await {
        Ok(resource) => json_response(StatusCode::CREATED, ResourceResponse::from(resource)),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn get_resource<S: Store>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    match state.service.get_resource(id, &cancel).await {
        Ok(resource) => json_response(StatusCode::OK, ResourceResponse::from(resource)),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn update_resource<S: Store>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateResourceRequest>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    let update = ResourceUpdate {
        name: req.name,
        attributes: req.attributes,
    };
    match state.service.update_resource(id, update, &cancel).await {
        Ok(resource) => json_response(StatusCode::OK, ResourceResponse::from(resource)),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn delete_resource<S: Store>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    match state.service.delete_resource(id, &cancel).await {
        Ok(()) => json_response(StatusCode::NO_CONTENT, serde_json::json!({})),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn list_resources<S: Store>(
    State(state): State<AppState<S>>,
    Query(query): Query<ListResourcesQuery>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    let filter = ResourceFilter {
        parent_id: query.parent_id,
        resource_type: query.resource_type,
    };
    let page = page_from(query.limit, query.offset);
    match state.service.list_resources(filter, page, &cancel).await {
        Ok(resources) => json_response(
            StatusCode::OK,
            resources
                .into_iter()
                .map(ResourceResponse::from)
                .collect::<Vec<_>>(),
        ),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn resource_hierarchy<S: Store>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    match state.service.resource_hierarchy(id, &cancel).await {
        Ok(hierarchy) => json_response(
            StatusCode::OK,
            ResourceHierarchyResponse {
                ancestors: hierarchy.ancestors.into_iter().map(Into::into).collect(),
                descendants: hierarchy.descendants.into_iter().map(Into::into).collect(),
            },
        ),
        Err(e) => api_error_to_response(e),
    }
}

// --- permissions ---

pub async fn create_permission<S: Store>(
    State(state): State<AppState<S>>,
    Json(req): Json<CreatePermissionRequest>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    let input = NewPermission {
        id: Uuid::nil(),
        name: req.name,
        description: req.description,
        service: req.service,
    };
    match state.service.create_permission(input, &cancel).await {
        Ok(permission) => json_response(StatusCode::CREATED, PermissionResponse::from(permission)),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn get_permission<S: Store>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    match state.service.get_permission(id, &cancel).await {
        Ok(permission) => json_response(StatusCode::OK, PermissionResponse::from(permission)),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn list_permissions<S: Store>(
    State(state): State<AppState<S>>,
    Query(query): Query<ListPermissionsQuery>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    let page = page_from(query.limit, query.offset);
    match state
        .service
        .list_permissions(query.service.as_deref(), page, &cancel)
        .await
    {
        Ok(permissions) => json_response(
            StatusCode::OK,
            permissions
                .into_iter()
                .map(PermissionResponse::from)
                .collect::<Vec<_>>(),
        ),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn delete_permission<S: Store>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    match state.service.delete_permission(id, &cancel).await {
        Ok(()) => json_response(StatusCode::NO_CONTENT, serde_json::json!({})),
        Err(e) => api_error_to_response(e),
    }
}

// --- roles ---

pub async fn create_role<S: Store>(
    State(state): State<AppState<S>>,
    Json(req): Json<CreateRoleRequest>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    match state
        .service
        .create_role(req.name, req.title, req.description, req.permission_ids, &cancel)
        .await
    {
        Ok(role) => json_response(StatusCode::CREATED, RoleResponse::from(role)),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn get_role<S: Store>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    match state.service.get_role(id, &cancel).await {
        Ok(role) => json_response(StatusCode::OK, RoleResponse::from(role)),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn update_role<S: Store>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateRoleRequest>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    let update = RoleUpdate {
        title: req.title,
        description: req.description,
        permission_ids: req.permission_ids,
    };
    match state.service.update_role(id, update, &cancel).await {
        Ok(role) => json_response(StatusCode::OK, RoleResponse::from(role)),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn delete_role<S: Store>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    match state.service.delete_role(id, &cancel).await {
        Ok(()) => json_response(StatusCode::NO_CONTENT, serde_json::json!({})),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn list_roles<S: Store>(
    State(state): State<AppState<S>>,
    Query(query): Query<ListRolesQuery>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    let page = page_from(query.limit, query.offset);
    match state
        .service
        .list_roles(query.include_custom, page, &cancel)
        .await
    {
        Ok(roles) => json_response(
            StatusCode::OK,
            roles.into_iter().map(RoleResponse::from).collect::<Vec<_>>(),
        ),
        Err(e) => api_error_to_response(e),
    }
}

// --- policies ---

pub async fn create_policy<S: Store>(
    State(state): State<AppState<S>>,
    Json(req): Json<CreatePolicyRequest>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    let bindings = req.bindings.into_iter().map(binding_spec_from).collect();
    match state
        .service
        .create_policy(req.resource_id, bindings, &cancel)
        .await
    {
        Ok(policy) => json_response(StatusCode::CREATED, PolicyResponse::from(policy)),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn get_policy<S: Store>(
    State(state): State<AppState<S>>,
    Path(resource_id): Path<Uuid>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    match state.service.get_policy(resource_id, &cancel).await {
        Ok(policy) => json_response(StatusCode::OK, PolicyResponse::from(policy)),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn update_policy<S: Store>(
    State(state): State<AppState<S>>,
    Path(resource_id): Path<Uuid>,
    Json(req): Json<UpdatePolicyRequest>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    let bindings = req.bindings.into_iter().map(binding_spec_from).collect();
    match state
        .service
        .update_policy(resource_id, bindings, &req.etag, &cancel)
        .await
    {
        Ok(policy) => json_response(StatusCode::OK, PolicyResponse::from(policy)),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn delete_policy<S: Store>(
    State(state): State<AppState<S>>,
    Path(resource_id): Path<Uuid>,
    Json(req): Json<DeletePolicyRequest>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    match state
        .service
        .delete_policy(resource_id, &req.etag, &cancel)
        .await
    {
        Ok(()) => json_response(StatusCode::NO_CONTENT, serde_json::json!({})),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn list_policies<S: Store>(
    State(state): State<AppState<S>>,
    Query(query): Query<ListPoliciesQuery>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    let page = page_from(query.limit, query.offset);
    match state
        .service
        .list_policies(query.parent_resource_id, page, &cancel)
        .await
    {
        Ok(policies) => json_response(
            StatusCode::OK,
            policies
                .into_iter()
                .map(PolicyResponse::from)
                .collect::<Vec<_>>(),
        ),
        Err(e) => api_error_to_response(e),
    }
}

// --- bindings ---

pub async fn create_binding<S: Store>(
    State(state): State<AppState<S>>,
    Json(req): Json<CreateBindingRequest>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    let condition = req.condition.map(|c| ConditionSpec {
        title: c.title,
        description: c.description,
        expression: c.expression,
    });
    match state
        .service
        .create_binding(req.resource_id, req.role_id, req.members, condition, &cancel)
        .await
    {
        Ok(binding) => json_response(StatusCode::CREATED, BindingResponse::from(binding)),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn delete_binding<S: Store>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    match state.service.delete_binding(id, &cancel).await {
        Ok(()) => json_response(StatusCode::NO_CONTENT, serde_json::json!({})),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn list_bindings<S: Store>(
    State(state): State<AppState<S>>,
    Query(query): Query<ListBindingsQuery>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    let page = page_from(query.limit, query.offset);
    let result = match (query.resource_id, query.principal) {
        (Some(resource_id), None) => {
            state
                .service
                .list_bindings_by_resource(resource_id, page, &cancel)
                .await
        }
        (None, Some(principal)) => {
            state
                .service
                .list_bindings_by_principal(&principal, page, &cancel)
                .await
        }
        _ => Err(ApiError::Invalid(
            "exactly one of resource_id and principal must be provided".to_string(),
        )),
    };

    match result {
        Ok(bindings) => json_response(
            StatusCode::OK,
            bindings
                .into_iter()
                .map(BindingResponse::from)
                .collect::<Vec<_>>(),
        ),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}
