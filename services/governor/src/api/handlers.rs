use std::sync::Arc;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    Json,
};
use tracing::{error, info, warn};

use crate::allocation::{
    ActorContext, AllocationError, Capability, CreditCheck, DeptAllocation, MemberAllocation,
};
use crate::status::{
    DepartmentStatus, MemberStatus, OrganizationStatus, PersonalStatus, StatusError,
};
use crate::usage::{CreditCategory, RealTimeUsage, UsageMetricKind, UsageRecord};

use super::types::{
    CreditCheckRequest, ErrorResponse, RecordCreditRequest, RecordCreditResponse,
    RemoveAllocationResponse, ResetCreditResponse, SetAllocationRequest, TrackUsageRequest,
    TrackUsageResponse, UsageHistoryQuery,
};
use super::ApiState;

pub const ACTOR_HEADER: &str = "x-actor-id";

pub type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

/// Caller identity forwarded by the authentication layer in front of the
/// service.
pub struct Actor(pub ActorContext);

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                error_response(
                    StatusCode::UNAUTHORIZED,
                    "missing_actor",
                    format!("{ACTOR_HEADER} header is required"),
                )
            })?;
        Ok(Actor(ActorContext::new(user_id)))
    }
}

pub async fn set_department_allocation(
    State(state): State<Arc<ApiState>>,
    Actor(actor): Actor,
    Path(department_id): Path<String>,
    payload: Result<Json<SetAllocationRequest>, JsonRejection>,
) -> ApiResult<DeptAllocation> {
    let Json(request) = payload.map_err(invalid_body)?;
    let allocation = state
        .allocations
        .set_department_allocation(&actor, &department_id, request.caps(), request.allocation_mode)
        .map_err(allocation_error)?;
    Ok(Json(allocation))
}

pub async fn get_department_allocation(
    State(state): State<Arc<ApiState>>,
    Actor(actor): Actor,
    Path(department_id): Path<String>,
) -> ApiResult<DeptAllocation> {
    let department = state
        .allocations
        .department(&department_id)
        .map_err(allocation_error)?;
    state
        .allocations
        .authorize(
            &actor,
            Capability::ViewOrganization {
                organization_id: department.organization_id,
            },
        )
        .map_err(allocation_error)?;

    match state
        .allocations
        .get_department_allocation(&department_id)
        .map_err(allocation_error)?
    {
        Some(allocation) => Ok(Json(allocation)),
        None => Err(not_found(
            "allocation_not_found",
            &format!("department {department_id} has no allocation"),
        )),
    }
}

pub async fn remove_department_allocation(
    State(state): State<Arc<ApiState>>,
    Actor(actor): Actor,
    Path(department_id): Path<String>,
) -> ApiResult<RemoveAllocationResponse> {
    let removed = state
        .allocations
        .remove_department_allocation(&actor, &department_id)
        .map_err(allocation_error)?;
    Ok(Json(RemoveAllocationResponse { removed }))
}

pub async fn list_department_allocations(
    State(state): State<Arc<ApiState>>,
    Actor(actor): Actor,
    Path(organization_id): Path<String>,
) -> ApiResult<Vec<DeptAllocation>> {
    state
        .allocations
        .organization_plan(&organization_id)
        .map_err(allocation_error)?;
    state
        .allocations
        .authorize(
            &actor,
            Capability::ViewOrganization {
                organization_id: organization_id.clone(),
            },
        )
        .map_err(allocation_error)?;

    let allocations = state
        .allocations
        .list_department_allocations(&organization_id)
        .map_err(allocation_error)?;
    Ok(Json(allocations))
}

pub async fn set_member_allocation(
    State(state): State<Arc<ApiState>>,
    Actor(actor): Actor,
    Path((department_id, user_id)): Path<(String, String)>,
    payload: Result<Json<SetAllocationRequest>, JsonRejection>,
) -> ApiResult<MemberAllocation> {
    let Json(request) = payload.map_err(invalid_body)?;
    if request.max_plugins.is_some() {
        return Err(bad_request(
            "invalid_request",
            "member allocations do not carry a plugin cap",
        ));
    }
    let allocation = state
        .allocations
        .set_member_allocation(
            &actor,
            &department_id,
            &user_id,
            request.caps(),
            request.allocation_mode,
        )
        .map_err(allocation_error)?;
    Ok(Json(allocation))
}

pub async fn get_member_allocation(
    State(state): State<Arc<ApiState>>,
    Actor(actor): Actor,
    Path((department_id, user_id)): Path<(String, String)>,
) -> ApiResult<MemberAllocation> {
    let department = state
        .allocations
        .department(&department_id)
        .map_err(allocation_error)?;
    if actor.user_id != user_id {
        state
            .allocations
            .authorize(
                &actor,
                Capability::ViewOrganization {
                    organization_id: department.organization_id,
                },
            )
            .map_err(allocation_error)?;
    }

    match state
        .allocations
        .get_member_allocation(&user_id, &department_id)
        .map_err(allocation_error)?
    {
        Some(allocation) => Ok(Json(allocation)),
        None => Err(not_found(
            "allocation_not_found",
            &format!("member {user_id} has no allocation in department {department_id}"),
        )),
    }
}

pub async fn remove_member_allocation(
    State(state): State<Arc<ApiState>>,
    Actor(actor): Actor,
    Path((department_id, user_id)): Path<(String, String)>,
) -> ApiResult<RemoveAllocationResponse> {
    let removed = state
        .allocations
        .remove_member_allocation(&actor, &department_id, &user_id)
        .map_err(allocation_error)?;
    Ok(Json(RemoveAllocationResponse { removed }))
}

pub async fn list_member_allocations(
    State(state): State<Arc<ApiState>>,
    Actor(actor): Actor,
    Path(department_id): Path<String>,
) -> ApiResult<Vec<MemberAllocation>> {
    let department = state
        .allocations
        .department(&department_id)
        .map_err(allocation_error)?;
    state
        .allocations
        .authorize(
            &actor,
            Capability::ViewOrganization {
                organization_id: department.organization_id,
            },
        )
        .map_err(allocation_error)?;

    let allocations = state
        .allocations
        .list_member_allocations(&department_id)
        .map_err(allocation_error)?;
    Ok(Json(allocations))
}

/// Credit checks need view access, or the member's own identity.
fn authorize_credit_check(
    state: &ApiState,
    actor: &ActorContext,
    department_id: &str,
    user_id: Option<&str>,
) -> Result<(), ApiError> {
    let department = state
        .allocations
        .department(department_id)
        .map_err(allocation_error)?;
    if user_id == Some(actor.user_id.as_str()) {
        return Ok(());
    }
    state
        .allocations
        .authorize(
            actor,
            Capability::ViewOrganization {
                organization_id: department.organization_id,
            },
        )
        .map_err(allocation_error)
}

/// Recording spend mutates accumulators and needs management rights.
fn authorize_credit_record(
    state: &ApiState,
    actor: &ActorContext,
    department_id: &str,
) -> Result<(), ApiError> {
    let department = state
        .allocations
        .department(department_id)
        .map_err(allocation_error)?;
    state
        .allocations
        .authorize(
            actor,
            Capability::ManageOrganization {
                organization_id: department.organization_id,
            },
        )
        .map_err(allocation_error)
}

pub async fn check_department_credits(
    State(state): State<Arc<ApiState>>,
    Actor(actor): Actor,
    Path(department_id): Path<String>,
    payload: Result<Json<CreditCheckRequest>, JsonRejection>,
) -> ApiResult<CreditCheck> {
    let Json(request) = payload.map_err(invalid_body)?;
    authorize_credit_check(&state, &actor, &department_id, None)?;
    let check = state
        .allocations
        .check_dept_credit_budget(&department_id, request.required)
        .map_err(allocation_error)?;
    Ok(Json(check))
}

pub async fn record_department_credits(
    State(state): State<Arc<ApiState>>,
    Actor(actor): Actor,
    Path(department_id): Path<String>,
    payload: Result<Json<RecordCreditRequest>, JsonRejection>,
) -> ApiResult<RecordCreditResponse> {
    let Json(request) = payload.map_err(invalid_body)?;
    authorize_credit_record(&state, &actor, &department_id)?;
    let recorded = state
        .allocations
        .record_dept_credit_usage(&department_id, request.amount)
        .map_err(allocation_error)?;
    Ok(Json(RecordCreditResponse { recorded }))
}

pub async fn check_member_credits(
    State(state): State<Arc<ApiState>>,
    Actor(actor): Actor,
    Path((department_id, user_id)): Path<(String, String)>,
    payload: Result<Json<CreditCheckRequest>, JsonRejection>,
) -> ApiResult<CreditCheck> {
    let Json(request) = payload.map_err(invalid_body)?;
    authorize_credit_check(&state, &actor, &department_id, Some(&user_id))?;
    let check = state
        .allocations
        .check_member_credit_budget(&user_id, &department_id, request.required)
        .map_err(allocation_error)?;
    Ok(Json(check))
}

pub async fn record_member_credits(
    State(state): State<Arc<ApiState>>,
    Actor(actor): Actor,
    Path((department_id, user_id)): Path<(String, String)>,
    payload: Result<Json<RecordCreditRequest>, JsonRejection>,
) -> ApiResult<RecordCreditResponse> {
    let Json(request) = payload.map_err(invalid_body)?;
    authorize_credit_record(&state, &actor, &department_id)?;
    let recorded = state
        .allocations
        .record_member_credit_usage(&user_id, &department_id, request.amount)
        .map_err(allocation_error)?;
    Ok(Json(RecordCreditResponse { recorded }))
}

pub async fn reset_organization_credits(
    State(state): State<Arc<ApiState>>,
    Actor(actor): Actor,
    Path(organization_id): Path<String>,
) -> ApiResult<ResetCreditResponse> {
    let rows_reset = state
        .allocations
        .reset_org_credit_usage(&actor, &organization_id)
        .map_err(allocation_error)?;
    Ok(Json(ResetCreditResponse { rows_reset }))
}

pub async fn personal_status(
    State(state): State<Arc<ApiState>>,
    Actor(actor): Actor,
) -> ApiResult<PersonalStatus> {
    let status = state
        .status
        .personal_status(&actor.user_id)
        .map_err(status_error)?;
    Ok(Json(status))
}

pub async fn organization_status(
    State(state): State<Arc<ApiState>>,
    Actor(actor): Actor,
    Path(organization_id): Path<String>,
) -> ApiResult<OrganizationStatus> {
    state
        .allocations
        .organization_plan(&organization_id)
        .map_err(allocation_error)?;
    state
        .allocations
        .authorize(
            &actor,
            Capability::ViewOrganization {
                organization_id: organization_id.clone(),
            },
        )
        .map_err(allocation_error)?;

    let status = state
        .status
        .organization_status(&organization_id)
        .map_err(status_error)?;
    Ok(Json(status))
}

pub async fn department_status(
    State(state): State<Arc<ApiState>>,
    Actor(actor): Actor,
    Path(department_id): Path<String>,
) -> ApiResult<DepartmentStatus> {
    let department = state
        .allocations
        .department(&department_id)
        .map_err(allocation_error)?;
    state
        .allocations
        .authorize(
            &actor,
            Capability::ViewOrganization {
                organization_id: department.organization_id,
            },
        )
        .map_err(allocation_error)?;

    let status = state
        .status
        .department_status(&department_id)
        .map_err(status_error)?;
    Ok(Json(status))
}

pub async fn member_status(
    State(state): State<Arc<ApiState>>,
    Actor(actor): Actor,
    Path((department_id, user_id)): Path<(String, String)>,
) -> ApiResult<MemberStatus> {
    let department = state
        .allocations
        .department(&department_id)
        .map_err(allocation_error)?;
    if actor.user_id != user_id {
        state
            .allocations
            .authorize(
                &actor,
                Capability::ViewOrganization {
                    organization_id: department.organization_id,
                },
            )
            .map_err(allocation_error)?;
    }

    let status = state
        .status
        .member_status(&department_id, &user_id)
        .map_err(status_error)?;
    Ok(Json(status))
}

/// Callers always reach their own counters, including their member key in
/// a department. Organization and department counters need view access to
/// read and management rights to write. Unknown owners are refused without
/// revealing whether they exist.
fn authorize_usage_owner(
    state: &ApiState,
    actor: &ActorContext,
    owner_id: &str,
    write: bool,
) -> Result<(), ApiError> {
    let own = owner_id == actor.user_id
        || owner_id
            .split_once(':')
            .is_some_and(|(_, user_id)| user_id == actor.user_id);
    if own {
        return Ok(());
    }

    let organization_id = state
        .allocations
        .owning_organization(owner_id)
        .map_err(allocation_error)?
        .ok_or_else(|| {
            allocation_error(AllocationError::Forbidden {
                actor: actor.user_id.clone(),
                action: format!("access usage of {owner_id}"),
            })
        })?;
    let capability = if write {
        Capability::ManageOrganization { organization_id }
    } else {
        Capability::ViewOrganization { organization_id }
    };
    state
        .allocations
        .authorize(actor, capability)
        .map_err(allocation_error)
}

pub async fn track_usage(
    State(state): State<Arc<ApiState>>,
    Actor(actor): Actor,
    Path(owner_id): Path<String>,
    payload: Result<Json<TrackUsageRequest>, JsonRejection>,
) -> ApiResult<TrackUsageResponse> {
    let Json(request) = payload.map_err(invalid_body)?;
    if owner_id.trim().is_empty() {
        return Err(bad_request("invalid_owner", "owner id cannot be empty"));
    }
    authorize_usage_owner(&state, &actor, &owner_id, true)?;

    let tracker = &state.usage;
    match request.metric {
        UsageMetricKind::WorkflowRuns => tracker.track_workflow_run(&owner_id),
        UsageMetricKind::GatewayRequests => tracker.track_gateway_request(&owner_id),
        UsageMetricKind::PluginExecutions => tracker.track_plugin_execution(&owner_id),
        UsageMetricKind::ApiCalls => tracker.track_api_call(&owner_id),
        UsageMetricKind::Errors => tracker.track_error(&owner_id),
        UsageMetricKind::Credits => {
            let amount = request.amount.ok_or_else(|| {
                bad_request("invalid_request", "credit usage requires an amount")
            })?;
            if !amount.is_finite() || amount < 0.0 {
                return Err(bad_request(
                    "invalid_request",
                    "amount must be a non-negative number",
                ));
            }
            let category = request.category.unwrap_or(CreditCategory::Other);
            tracker.track_credit_usage(&owner_id, category, amount);
        }
    }

    Ok(Json(TrackUsageResponse { tracked: true }))
}

pub async fn get_usage(
    State(state): State<Arc<ApiState>>,
    Actor(actor): Actor,
    Path(owner_id): Path<String>,
) -> ApiResult<RealTimeUsage> {
    authorize_usage_owner(&state, &actor, &owner_id, false)?;
    let usage = state
        .usage
        .get_real_time_usage(&owner_id)
        .map_err(internal_error)?;
    Ok(Json(usage))
}

pub async fn get_usage_history(
    State(state): State<Arc<ApiState>>,
    Actor(actor): Actor,
    Path(owner_id): Path<String>,
    Query(query): Query<UsageHistoryQuery>,
) -> ApiResult<Vec<UsageRecord>> {
    authorize_usage_owner(&state, &actor, &owner_id, false)?;
    let history = state
        .usage
        .get_usage_history(&owner_id, query.period, query.periods)
        .map_err(internal_error)?;
    Ok(Json(history))
}

pub async fn health_check() -> ApiResult<serde_json::Value> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": "quota-governor"
    })))
}

pub fn allocation_error(err: AllocationError) -> ApiError {
    let message = err.to_string();
    match err {
        AllocationError::PoolExceeded(violations) => {
            info!(violations = violations.len(), "allocation rejected");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorResponse {
                    error: message,
                    code: "pool_exceeded".to_string(),
                    violations: Some(violations),
                    details: None,
                }),
            )
        }
        AllocationError::NotFound(_) => not_found("not_found", &message),
        AllocationError::Forbidden { .. } => {
            error_response(StatusCode::FORBIDDEN, "forbidden", message)
        }
        AllocationError::InvalidRequest(_) => bad_request("invalid_request", &message),
        AllocationError::Storage(_) => internal_error(message),
    }
}

pub fn status_error(err: StatusError) -> ApiError {
    let message = err.to_string();
    match err {
        StatusError::Allocation(inner) => allocation_error(inner),
        StatusError::NotFound(_) => not_found("not_found", &message),
        StatusError::Storage(_) => internal_error(message),
    }
}

fn invalid_body(rejection: JsonRejection) -> ApiError {
    warn!(error = %rejection.body_text(), "rejected request body");
    bad_request("invalid_request", &rejection.body_text())
}

fn error_response(status: StatusCode, code: &str, message: String) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message,
            code: code.to_string(),
            violations: None,
            details: None,
        }),
    )
}

fn bad_request(code: &str, message: &str) -> ApiError {
    error_response(StatusCode::BAD_REQUEST, code, message.to_string())
}

fn not_found(code: &str, message: &str) -> ApiError {
    error_response(StatusCode::NOT_FOUND, code, message.to_string())
}

fn internal_error<E: std::fmt::Display>(err: E) -> ApiError {
    error!(error = %err, "governor API internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "internal server error".to_string(),
            code: "internal_error".to_string(),
            violations: None,
            details: Some(serde_json::json!({ "message": err.to_string() })),
        }),
    )
}
