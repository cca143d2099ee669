use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use super::handlers;
use super::ApiState;

pub fn create_router(state: Arc<ApiState>) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            state.config.request_timeout_secs,
        )));

    Router::new()
        .route(
            "/api/organizations/:organization_id/allocations",
            get(handlers::list_department_allocations),
        )
        .route(
            "/api/organizations/:organization_id/credits/reset",
            post(handlers::reset_organization_credits),
        )
        .route(
            "/api/organizations/:organization_id/status",
            get(handlers::organization_status),
        )
        .route(
            "/api/departments/:department_id/allocation",
            put(handlers::set_department_allocation)
                .get(handlers::get_department_allocation)
                .delete(handlers::remove_department_allocation),
        )
        .route(
            "/api/departments/:department_id/member-allocations",
            get(handlers::list_member_allocations),
        )
        .route(
            "/api/departments/:department_id/credits/check",
            post(handlers::check_department_credits),
        )
        .route(
            "/api/departments/:department_id/credits/record",
            post(handlers::record_department_credits),
        )
        .route(
            "/api/departments/:department_id/status",
            get(handlers::department_status),
        )
        .route(
            "/api/departments/:department_id/members/:user_id/allocation",
            put(handlers::set_member_allocation)
                .get(handlers::get_member_allocation)
                .delete(handlers::remove_member_allocation),
        )
        .route(
            "/api/departments/:department_id/members/:user_id/credits/check",
            post(handlers::check_member_credits),
        )
        .route(
            "/api/departments/:department_id/members/:user_id/credits/record",
            post(handlers::record_member_credits),
        )
        .route(
            "/api/departments/:department_id/members/:user_id/status",
            get(handlers::member_status),
        )
        .route("/api/status/personal", get(handlers::personal_status))
        .route(
            "/api/usage/:owner_id",
            get(handlers::get_usage).post(handlers::track_usage),
        )
        .route(
            "/api/usage/:owner_id/history",
            get(handlers::get_usage_history),
        )
        .route("/health", get(handlers::health_check))
        .with_state(state)
        .layer(middleware)
}
