use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use quota_hub_primitives::Limit;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::plans::{PlanCatalog, PlanLimits};
use crate::storage::{AllocationStore, Department, DirectoryStore};
use crate::usage::tracker::month_label;

use super::error::{AllocationError, PoolViolation};
use super::models::{
    sum_allocated, AllocationMode, CreditCheck, DeptAllocation, MemberAllocation, Resource,
    ResourceCaps,
};
use super::permissions::{ActorContext, Capability, PermissionChecker};

const EPSILON: f64 = 1e-9;

/// Checks `siblings + requested <= pool` for every resource the caller
/// supplied and whose pool is finite.
pub fn pool_violations<F>(
    resources: &[Resource],
    requested: &ResourceCaps,
    siblings: &[&ResourceCaps],
    pool: F,
) -> Vec<PoolViolation>
where
    F: Fn(Resource) -> Limit<f64>,
{
    resources
        .iter()
        .filter_map(|&resource| {
            let wanted = requested.get(resource)?;
            let cap = pool(resource).finite()?;
            let taken = sum_allocated(siblings.iter().copied(), resource);
            (taken + wanted > cap + EPSILON)
                .then(|| PoolViolation::exceeds_pool(resource, wanted, taken, cap))
        })
        .collect()
}

/// Checks that a new cap does not fall below what children already hold.
pub fn floor_violations(
    resources: &[Resource],
    requested: &ResourceCaps,
    children: &[&ResourceCaps],
) -> Vec<PoolViolation> {
    resources
        .iter()
        .filter_map(|&resource| {
            let wanted = requested.get(resource)?;
            let held = sum_allocated(children.iter().copied(), resource);
            (held > wanted + EPSILON)
                .then(|| PoolViolation::below_children(resource, wanted, held))
        })
        .collect()
}

fn validate_caps(caps: &ResourceCaps) -> Result<(), AllocationError> {
    let counts = [
        (Resource::Gateways, caps.max_gateways),
        (Resource::Plugins, caps.max_plugins),
        (Resource::Workflows, caps.max_workflows),
        (Resource::RamMb, caps.max_ram_mb),
        (Resource::StorageMb, caps.max_storage_mb),
        (Resource::CreditBudget, caps.credit_budget),
    ];
    for (resource, value) in counts {
        if value.is_some_and(|v| i64::try_from(v).is_err()) {
            return Err(AllocationError::InvalidRequest(format!(
                "{resource} cap exceeds the storable maximum of {}",
                i64::MAX
            )));
        }
    }
    if let Some(cores) = caps.max_cpu_cores {
        if !cores.is_finite() || cores < 0.0 {
            return Err(AllocationError::InvalidRequest(
                "max_cpu_cores must be a non-negative number".into(),
            ));
        }
    }
    Ok(())
}

fn validate_amount(amount: f64) -> Result<(), AllocationError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(AllocationError::InvalidRequest(
            "credit amount must be a non-negative number".into(),
        ));
    }
    Ok(())
}

/// Creates, validates and removes department and member allocations, and
/// enforces their credit budgets.
///
/// Validation recomputes sibling totals on every write instead of keeping a
/// running balance. Two concurrent writers on the same parent can both pass
/// validation; the next write against that parent is rejected until the
/// totals are back under the pool.
#[derive(Clone)]
pub struct AllocationService {
    allocations: Arc<dyn AllocationStore>,
    directory: Arc<dyn DirectoryStore>,
    permissions: Arc<dyn PermissionChecker>,
    plans: Arc<PlanCatalog>,
}

impl AllocationService {
    pub fn new(
        allocations: Arc<dyn AllocationStore>,
        directory: Arc<dyn DirectoryStore>,
        permissions: Arc<dyn PermissionChecker>,
        plans: Arc<PlanCatalog>,
    ) -> Self {
        Self {
            allocations,
            directory,
            permissions,
            plans,
        }
    }

    pub fn authorize(
        &self,
        actor: &ActorContext,
        capability: Capability,
    ) -> Result<(), AllocationError> {
        let known = self.directory.find_user(&actor.user_id)?.is_some();
        if !known || !self.permissions.can_do(actor, &capability) {
            warn!(user_id = %actor.user_id, capability = %capability, "permission denied");
            return Err(AllocationError::Forbidden {
                actor: actor.user_id.clone(),
                action: capability.to_string(),
            });
        }
        Ok(())
    }

    pub fn department(&self, department_id: &str) -> Result<Department, AllocationError> {
        self.directory
            .find_department(department_id)?
            .ok_or_else(|| AllocationError::NotFound(format!("department {department_id}")))
    }

    pub fn organization_plan(&self, organization_id: &str) -> Result<PlanLimits, AllocationError> {
        let organization = self
            .directory
            .find_organization(organization_id)?
            .ok_or_else(|| AllocationError::NotFound(format!("organization {organization_id}")))?;
        Ok(self.plans.limits(&organization.plan).clone())
    }

    /// Organization a usage counter owner belongs to. Owners are organization
    /// ids, department ids or `{department_id}:{user_id}` member keys.
    pub fn owning_organization(&self, owner_id: &str) -> Result<Option<String>, AllocationError> {
        let department_id = owner_id
            .split_once(':')
            .map_or(owner_id, |(department_id, _)| department_id);
        if let Some(department) = self.directory.find_department(department_id)? {
            return Ok(Some(department.organization_id));
        }
        if department_id != owner_id {
            return Ok(None);
        }
        Ok(self
            .directory
            .find_organization(owner_id)?
            .map(|organization| organization.id))
    }

    fn ensure_member(&self, department_id: &str, user_id: &str) -> Result<(), AllocationError> {
        if self.directory.find_membership(department_id, user_id)?.is_none() {
            return Err(AllocationError::NotFound(format!(
                "member {user_id} in department {department_id}"
            )));
        }
        Ok(())
    }

    pub fn set_department_allocation(
        &self,
        actor: &ActorContext,
        department_id: &str,
        caps: ResourceCaps,
        mode: AllocationMode,
    ) -> Result<DeptAllocation, AllocationError> {
        let department = self.department(department_id)?;
        self.authorize(
            actor,
            Capability::ManageOrganization {
                organization_id: department.organization_id.clone(),
            },
        )?;
        validate_caps(&caps)?;

        let plan = self.organization_plan(&department.organization_id)?;
        let siblings = self
            .allocations
            .list_department_allocations(&department.organization_id)?;
        let sibling_caps: Vec<&ResourceCaps> = siblings
            .iter()
            .filter(|a| a.department_id != department_id)
            .map(|a| &a.caps)
            .collect();
        let members = self.allocations.list_member_allocations(department_id)?;
        let member_caps: Vec<&ResourceCaps> = members.iter().map(|a| &a.caps).collect();

        let mut violations =
            pool_violations(&Resource::DEPARTMENT, &caps, &sibling_caps, |r| plan.pool(r));
        violations.extend(floor_violations(&Resource::MEMBER, &caps, &member_caps));

        if !violations.is_empty() {
            warn!(
                department_id,
                organization_id = %department.organization_id,
                violations = violations.len(),
                "rejected department allocation"
            );
            return Err(AllocationError::PoolExceeded(violations));
        }

        let now = Utc::now();
        let stored = self.allocations.upsert_department_allocation(&DeptAllocation {
            id: Uuid::new_v4().to_string(),
            department_id: department_id.to_string(),
            caps,
            credit_used: 0.0,
            credit_reset_at: None,
            allocation_mode: mode,
            set_by: actor.user_id.clone(),
            created_at: now,
            updated_at: now,
        })?;

        info!(
            department_id,
            organization_id = %department.organization_id,
            mode = %mode,
            set_by = %actor.user_id,
            "department allocation updated"
        );
        Ok(stored)
    }

    /// A department without an explicit cap for a resource leaves members
    /// unconstrained for it here; outer plan enforcement still applies.
    pub fn set_member_allocation(
        &self,
        actor: &ActorContext,
        department_id: &str,
        user_id: &str,
        caps: ResourceCaps,
        mode: AllocationMode,
    ) -> Result<MemberAllocation, AllocationError> {
        let department = self.department(department_id)?;
        self.authorize(
            actor,
            Capability::ManageOrganization {
                organization_id: department.organization_id.clone(),
            },
        )?;
        self.ensure_member(department_id, user_id)?;
        let caps = caps.without_plugins();
        validate_caps(&caps)?;

        let parent = self.allocations.find_department_allocation(department_id)?;
        let siblings = self.allocations.list_member_allocations(department_id)?;
        let sibling_caps: Vec<&ResourceCaps> = siblings
            .iter()
            .filter(|a| a.user_id != user_id)
            .map(|a| &a.caps)
            .collect();

        let violations = pool_violations(&Resource::MEMBER, &caps, &sibling_caps, |r| {
            Limit::from_option(parent.as_ref().and_then(|p| p.caps.get(r)))
        });

        if !violations.is_empty() {
            warn!(
                department_id,
                user_id,
                violations = violations.len(),
                "rejected member allocation"
            );
            return Err(AllocationError::PoolExceeded(violations));
        }

        let now = Utc::now();
        let stored = self.allocations.upsert_member_allocation(&MemberAllocation {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            department_id: department_id.to_string(),
            caps,
            credit_used: 0.0,
            credit_reset_at: None,
            allocation_mode: mode,
            set_by: actor.user_id.clone(),
            created_at: now,
            updated_at: now,
        })?;

        info!(
            department_id,
            user_id,
            mode = %mode,
            set_by = %actor.user_id,
            "member allocation updated"
        );
        Ok(stored)
    }

    pub fn remove_department_allocation(
        &self,
        actor: &ActorContext,
        department_id: &str,
    ) -> Result<bool, AllocationError> {
        let department = self.department(department_id)?;
        self.authorize(
            actor,
            Capability::ManageOrganization {
                organization_id: department.organization_id,
            },
        )?;
        let removed = self.allocations.delete_department_allocation(department_id)?;
        info!(department_id, removed, "department allocation removed");
        Ok(removed)
    }

    pub fn remove_member_allocation(
        &self,
        actor: &ActorContext,
        department_id: &str,
        user_id: &str,
    ) -> Result<bool, AllocationError> {
        let department = self.department(department_id)?;
        self.authorize(
            actor,
            Capability::ManageOrganization {
                organization_id: department.organization_id,
            },
        )?;
        self.ensure_member(department_id, user_id)?;
        let removed = self
            .allocations
            .delete_member_allocation(user_id, department_id)?;
        info!(department_id, user_id, removed, "member allocation removed");
        Ok(removed)
    }

    pub fn get_department_allocation(
        &self,
        department_id: &str,
    ) -> Result<Option<DeptAllocation>, AllocationError> {
        Ok(self.allocations.find_department_allocation(department_id)?)
    }

    pub fn get_member_allocation(
        &self,
        user_id: &str,
        department_id: &str,
    ) -> Result<Option<MemberAllocation>, AllocationError> {
        Ok(self
            .allocations
            .find_member_allocation(user_id, department_id)?)
    }

    pub fn list_department_allocations(
        &self,
        organization_id: &str,
    ) -> Result<Vec<DeptAllocation>, AllocationError> {
        Ok(self
            .allocations
            .list_department_allocations(organization_id)?)
    }

    pub fn list_member_allocations(
        &self,
        department_id: &str,
    ) -> Result<Vec<MemberAllocation>, AllocationError> {
        Ok(self.allocations.list_member_allocations(department_id)?)
    }

    pub fn check_dept_credit_budget(
        &self,
        department_id: &str,
        required: f64,
    ) -> Result<CreditCheck, AllocationError> {
        validate_amount(required)?;
        let allocation = self.allocations.find_department_allocation(department_id)?;
        let check = match allocation {
            Some(DeptAllocation {
                caps:
                    ResourceCaps {
                        credit_budget: Some(budget),
                        ..
                    },
                credit_used,
                allocation_mode,
                ..
            }) => CreditCheck::evaluate(budget, credit_used, allocation_mode, required),
            _ => CreditCheck::unbounded(),
        };

        debug!(department_id, required, allowed = check.allowed, "department credit check");
        Ok(check)
    }

    pub fn check_member_credit_budget(
        &self,
        user_id: &str,
        department_id: &str,
        required: f64,
    ) -> Result<CreditCheck, AllocationError> {
        validate_amount(required)?;
        let allocation = self
            .allocations
            .find_member_allocation(user_id, department_id)?;
        let check = match allocation {
            Some(MemberAllocation {
                caps:
                    ResourceCaps {
                        credit_budget: Some(budget),
                        ..
                    },
                credit_used,
                allocation_mode,
                ..
            }) => CreditCheck::evaluate(budget, credit_used, allocation_mode, required),
            _ => CreditCheck::unbounded(),
        };

        debug!(
            department_id,
            user_id,
            required,
            allowed = check.allowed,
            "member credit check"
        );
        Ok(check)
    }

    /// Adds spend after the caller obtained an allowing check. Does not
    /// re-check the budget. Returns false when the department has no
    /// allocation row to account against.
    pub fn record_dept_credit_usage(
        &self,
        department_id: &str,
        amount: f64,
    ) -> Result<bool, AllocationError> {
        validate_amount(amount)?;
        let recorded = self
            .allocations
            .increment_department_credit_used(department_id, amount)?;
        debug!(department_id, amount, recorded, "recorded department credit usage");
        Ok(recorded)
    }

    pub fn record_member_credit_usage(
        &self,
        user_id: &str,
        department_id: &str,
        amount: f64,
    ) -> Result<bool, AllocationError> {
        validate_amount(amount)?;
        let recorded = self
            .allocations
            .increment_member_credit_used(user_id, department_id, amount)?;
        debug!(
            department_id,
            user_id, amount, recorded, "recorded member credit usage"
        );
        Ok(recorded)
    }

    pub fn reset_all_credit_usage(&self) -> Result<usize, AllocationError> {
        let rows = self.allocations.reset_all_credit_usage(Utc::now())?;
        info!(rows, "reset credit usage platform-wide");
        Ok(rows)
    }

    pub fn reset_org_credit_usage(
        &self,
        actor: &ActorContext,
        organization_id: &str,
    ) -> Result<usize, AllocationError> {
        if self.directory.find_organization(organization_id)?.is_none() {
            return Err(AllocationError::NotFound(format!(
                "organization {organization_id}"
            )));
        }
        self.authorize(
            actor,
            Capability::ManageOrganization {
                organization_id: organization_id.to_string(),
            },
        )?;
        let rows = self
            .allocations
            .reset_organization_credit_usage(organization_id, Utc::now())?;
        info!(organization_id, rows, reset_by = %actor.user_id, "reset organization credit usage");
        Ok(rows)
    }

    /// Zeroes every row not yet reset in the billing month containing `now`.
    /// Rows created this month and never reset are left alone.
    pub fn reset_stale_credit_usage(&self, now: DateTime<Utc>) -> Result<usize, AllocationError> {
        let period_start = month_start(now);
        let rows = self
            .allocations
            .reset_credit_usage_before(period_start, now)?;
        if rows > 0 {
            info!(rows, period = %month_label(now), "reset credit usage for new billing period");
        }
        Ok(rows)
    }

    /// Resets stale credit accumulators on the first tick and on every tick
    /// after it, so a month boundary crossed while the process was down is
    /// still caught up.
    pub fn start_credit_reset_task(&self, check_interval: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if let Err(err) = service.reset_stale_credit_usage(Utc::now()) {
                    error!(error = %err, "failed to reset credit usage");
                }
            }
        })
    }
}

/// Midnight UTC on the first day of the month containing `now`.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .with_day(1)
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|midnight| Utc.from_utc_datetime(&midnight))
        .unwrap_or(now)
}
