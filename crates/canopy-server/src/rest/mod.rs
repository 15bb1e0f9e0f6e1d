mod handlers;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use canopy_storage::Store;

use crate::service::IamService;

pub struct AppState<S: Store> {
    pub service: Arc<IamService<S>>,
}

impl<S: Store> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
        }
    }
}

pub fn create_router<S: Store>(state: AppState<S>) -> Router {
    Router::new()
        .route("/v1/permissions/check", post(handlers::check_permission))
        .route(
            "/v1/permissions/check-batch",
            post(handlers::batch_check_permissions),
        )
        .route(
            "/v1/permissions/effective",
            post(handlers::effective_permissions),
        )
        .route(
            "/v1/resources",
            post(handlers::create_resource).get(handlers::list_resources),
        )
        .route(
            "/v1/resources/{id}",
            get(handlers::get_resource)
                .put(handlers::update_resource)
                .delete(handlers::delete_resource),
        )
        .route(
            "/v1/resources/{id}/hierarchy",
            get(handlers::resource_hierarchy),
        )
        .route(
            "/v1/resources/{id}/policy",
            get(handlers::get_policy)
                .put(handlers::update_policy)
                .delete(handlers::delete_policy),
        )
        .route(
            "/v1/permissions",
            post(handlers::create_permission).get(handlers::list_permissions),
        )
        .route(
            "/v1/permissions/{id}",
            get(handlers::get_permission).delete(handlers::delete_permission),
        )
        .route(
            "/v1/roles",
            post(handlers::create_role).get(handlers::list_roles),
        )
        .route(
            "/v1/roles/{id}",
            get(handlers::get_role)
                .put(handlers::update_role)
                .delete(handlers::delete_role),
        )
        .route(
            "/v1/policies",
            post(handlers::create_policy).get(handlers::list_policies),
        )
        .route(
            "/v1/bindings",
            post(handlers::create_binding).get(handlers::list_bindings),
        )
        .route("/v1/bindings/{id}", delete(handlers::delete_binding))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
}
