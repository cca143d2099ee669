use std::sync::Arc;

use chrono::{DateTime, Utc};
use quota_hub_primitives::{
    AllocatedResource, AllocationQuota, CountQuota, Limit, PeriodType, ResourceUnit, UsageMetric,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::allocation::models::sum_allocated;
use crate::allocation::{AllocationError, AllocationService, Resource, ResourceCaps};
use crate::plans::{PlanCatalog, PlanLimits, WorkspaceLimits};
use crate::storage::{DirectoryStore, EntityKind, OwnerFilter, StorageError};
use crate::usage::{RealTimeUsage, UsageTracker};

use super::models::{
    AllocatedAutomation, AllocatedBilling, AllocatedWorkspace, AutomationPool, BillingPool,
    DepartmentStatus, MemberStatus, OrganizationStatus, PersonalStatus, PoolShare, Subscription,
    WorkspacePool,
};

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Counter owner for a member's spend inside one department, kept apart from
/// the user's personal counters.
pub fn member_usage_owner(department_id: &str, user_id: &str) -> String {
    format!("{department_id}:{user_id}")
}

fn to_u64(limit: Limit<f64>) -> Limit<u64> {
    match limit {
        Limit::Finite(v) => Limit::Finite(v.max(0.0) as u64),
        Limit::Unlimited => Limit::Unlimited,
    }
}

fn cap_u64(caps: Option<&ResourceCaps>, resource: Resource) -> Option<u64> {
    caps.and_then(|c| c.get(resource)).map(|v| v.max(0.0) as u64)
}

/// Read-only snapshots of every pool an owner draws from. Nothing here is
/// persisted; each call recomputes from the stores.
#[derive(Clone)]
pub struct ResourceStatusService {
    allocations: AllocationService,
    usage: UsageTracker,
    plans: Arc<PlanCatalog>,
    directory: Arc<dyn DirectoryStore>,
}

impl ResourceStatusService {
    pub fn new(
        allocations: AllocationService,
        usage: UsageTracker,
        plans: Arc<PlanCatalog>,
        directory: Arc<dyn DirectoryStore>,
    ) -> Self {
        Self {
            allocations,
            usage,
            plans,
            directory,
        }
    }

    fn real_time_usage(&self, owner_id: &str, now: DateTime<Utc>) -> RealTimeUsage {
        self.usage
            .real_time_usage_at(owner_id, now)
            .unwrap_or_else(|err| {
                warn!(owner_id, error = %err, "usage read failed, reporting zero");
                RealTimeUsage::empty(owner_id, now)
            })
    }

    fn count(&self, kind: EntityKind, filter: &OwnerFilter) -> Result<u64, StatusError> {
        Ok(self.directory.count_entities(kind, filter)?)
    }

    fn automation(
        &self,
        plan: &PlanLimits,
        filter: &OwnerFilter,
        usage: &RealTimeUsage,
    ) -> Result<AutomationPool, StatusError> {
        Ok(AutomationPool {
            gateways: CountQuota::new(self.count(EntityKind::Gateway, filter)?, plan.max_gateways),
            plugins: CountQuota::new(self.count(EntityKind::Plugin, filter)?, plan.max_plugins),
            workflows: CountQuota::new(
                self.count(EntityKind::Workflow, filter)?,
                plan.max_workflows,
            ),
            workflow_runs: UsageMetric::new(
                usage.workflow_runs,
                plan.monthly_workflow_runs,
                PeriodType::Monthly,
                Some(usage.resets_at),
            ),
            api_calls: UsageMetric::new(
                usage.api_calls,
                plan.monthly_api_calls,
                PeriodType::Monthly,
                Some(usage.resets_at),
            ),
        })
    }

    fn billing(
        plan: &PlanLimits,
        credit_balance: f64,
        usage: &RealTimeUsage,
        subscription: Subscription,
    ) -> BillingPool {
        BillingPool {
            credit_balance,
            monthly_credits: UsageMetric::new(
                usage.credits_used,
                plan.monthly_credits,
                PeriodType::Monthly,
                Some(usage.resets_at),
            ),
            credits_by_category: usage.credits_by_category.clone(),
            subscription,
            features: plan.features.clone(),
        }
    }

    fn allocated_automation(
        &self,
        plan: &PlanLimits,
        filter: &OwnerFilter,
        own: Option<&ResourceCaps>,
        parent: impl Fn(Resource) -> Limit<u64>,
        usage: &RealTimeUsage,
    ) -> Result<AllocatedAutomation, StatusError> {
        let allocated = |kind: EntityKind, resource: Resource| -> Result<_, StatusError> {
            Ok(AllocatedResource::new(
                cap_u64(own, resource),
                self.count(kind, filter)?,
                parent(resource),
            ))
        };

        Ok(AllocatedAutomation {
            gateways: allocated(EntityKind::Gateway, Resource::Gateways)?,
            plugins: allocated(EntityKind::Plugin, Resource::Plugins)?,
            workflows: allocated(EntityKind::Workflow, Resource::Workflows)?,
            workflow_runs: UsageMetric::new(
                usage.workflow_runs,
                plan.monthly_workflow_runs,
                PeriodType::Monthly,
                Some(usage.resets_at),
            ),
            api_calls: UsageMetric::new(
                usage.api_calls,
                plan.monthly_api_calls,
                PeriodType::Monthly,
                Some(usage.resets_at),
            ),
        })
    }

    fn allocated_workspace(
        plan: &PlanLimits,
        own: Option<&ResourceCaps>,
        used: impl Fn(Resource) -> f64,
        parent: impl Fn(Resource) -> Limit<f64>,
    ) -> Option<AllocatedWorkspace> {
        plan.workspace.as_ref()?;
        Some(AllocatedWorkspace {
            ram_mb: AllocatedResource::new(
                cap_u64(own, Resource::RamMb),
                used(Resource::RamMb) as u64,
                to_u64(parent(Resource::RamMb)),
            ),
            cpu_cores: AllocatedResource::new(
                own.and_then(|c| c.max_cpu_cores),
                used(Resource::CpuCores),
                parent(Resource::CpuCores),
            ),
            storage_mb: AllocatedResource::new(
                cap_u64(own, Resource::StorageMb),
                used(Resource::StorageMb) as u64,
                to_u64(parent(Resource::StorageMb)),
            ),
        })
    }

    /// The whole workspace entitlement of a personal plan belongs to the user.
    fn personal_workspace(workspace: &WorkspaceLimits) -> WorkspacePool {
        let held = |limit: Limit<u64>| limit.finite().unwrap_or_default();
        WorkspacePool {
            ram_mb: AllocationQuota::new(
                held(workspace.ram_mb),
                workspace.ram_mb,
                ResourceUnit::Megabytes,
            ),
            cpu_cores: AllocationQuota::new(
                workspace.cpu_cores.finite().unwrap_or_default(),
                workspace.cpu_cores,
                ResourceUnit::Cores,
            ),
            storage_mb: AllocationQuota::new(
                held(workspace.storage_mb),
                workspace.storage_mb,
                ResourceUnit::Megabytes,
            ),
        }
    }

    pub fn personal_status(&self, user_id: &str) -> Result<PersonalStatus, StatusError> {
        let user = self
            .directory
            .find_user(user_id)?
            .ok_or_else(|| StatusError::NotFound(format!("user {user_id}")))?;
        let plan = self.plans.limits(&user.plan);
        let usage = self.real_time_usage(user_id, Utc::now());
        let filter = OwnerFilter::Personal {
            user_id: user_id.to_string(),
        };

        let status = PersonalStatus {
            user_id: user.id.clone(),
            automation: self.automation(plan, &filter, &usage)?,
            workspace: plan.workspace.as_ref().map(Self::personal_workspace),
            billing: Self::billing(
                plan,
                user.credit_balance,
                &usage,
                Subscription {
                    plan: user.plan.clone(),
                    seats: None,
                    departments: None,
                },
            ),
        };

        debug!(user_id, "personal status computed");
        Ok(status)
    }

    pub fn organization_status(
        &self,
        organization_id: &str,
    ) -> Result<OrganizationStatus, StatusError> {
        let organization = self
            .directory
            .find_organization(organization_id)?
            .ok_or_else(|| StatusError::NotFound(format!("organization {organization_id}")))?;
        let plan = self.plans.limits(&organization.plan);
        let usage = self.real_time_usage(organization_id, Utc::now());
        let filter = OwnerFilter::Organization {
            organization_id: organization_id.to_string(),
        };

        let departments = self.allocations.list_department_allocations(organization_id)?;
        let children: Vec<&ResourceCaps> = departments.iter().map(|a| &a.caps).collect();
        let allocated = |resource: Resource| sum_allocated(children.iter().copied(), resource);

        let workspace = plan.workspace.as_ref().map(|w| WorkspacePool {
            ram_mb: AllocationQuota::new(
                allocated(Resource::RamMb) as u64,
                w.ram_mb,
                ResourceUnit::Megabytes,
            ),
            cpu_cores: AllocationQuota::new(
                allocated(Resource::CpuCores),
                w.cpu_cores,
                ResourceUnit::Cores,
            ),
            storage_mb: AllocationQuota::new(
                allocated(Resource::StorageMb) as u64,
                w.storage_mb,
                ResourceUnit::Megabytes,
            ),
        });

        let allocations = Resource::DEPARTMENT
            .iter()
            .map(|&resource| PoolShare::new(resource, plan.pool(resource), allocated(resource)))
            .collect();

        let subscription = Subscription {
            plan: organization.plan.clone(),
            seats: Some(CountQuota::new(
                self.directory.count_organization_seats(organization_id)?,
                plan.max_seats,
            )),
            departments: Some(CountQuota::new(
                self.directory.count_departments(organization_id)?,
                plan.max_departments,
            )),
        };

        let status = OrganizationStatus {
            organization_id: organization.id.clone(),
            automation: self.automation(plan, &filter, &usage)?,
            workspace,
            billing: Self::billing(
                plan,
                organization.credit_balance,
                &usage,
                subscription,
            ),
            allocations,
        };

        debug!(organization_id, departments = departments.len(), "organization status computed");
        Ok(status)
    }

    pub fn department_status(&self, department_id: &str) -> Result<DepartmentStatus, StatusError> {
        let department = self.allocations.department(department_id)?;
        let plan = self
            .allocations
            .organization_plan(&department.organization_id)?;
        let allocation = self.allocations.get_department_allocation(department_id)?;
        let own = allocation.as_ref().map(|a| &a.caps);
        let usage = self.real_time_usage(department_id, Utc::now());
        let filter = OwnerFilter::Department {
            department_id: department_id.to_string(),
        };

        let members = self.allocations.list_member_allocations(department_id)?;
        let handed_out =
            |resource: Resource| sum_allocated(members.iter().map(|m| &m.caps), resource);

        let automation =
            self.allocated_automation(&plan, &filter, own, |r| to_u64(plan.pool(r)), &usage)?;
        let workspace = Self::allocated_workspace(&plan, own, handed_out, |r| plan.pool(r));

        let status = DepartmentStatus {
            department_id: department.id.clone(),
            organization_id: department.organization_id.clone(),
            allocation_mode: allocation.as_ref().map(|a| a.allocation_mode),
            automation,
            workspace,
            billing: AllocatedBilling {
                credits: AllocatedResource::new(
                    own.and_then(|c| c.credit_budget).map(|b| b as f64),
                    allocation.as_ref().map_or(0.0, |a| a.credit_used),
                    plan.monthly_credits,
                ),
                unit: ResourceUnit::Credits,
                credits_by_category: usage.credits_by_category.clone(),
            },
        };

        debug!(department_id, "department status computed");
        Ok(status)
    }

    /// Compute consumption is not metered per member, so member workspace
    /// usage reads as zero.
    pub fn member_status(
        &self,
        department_id: &str,
        user_id: &str,
    ) -> Result<MemberStatus, StatusError> {
        let department = self.allocations.department(department_id)?;
        if self.directory.find_membership(department_id, user_id)?.is_none() {
            return Err(StatusError::NotFound(format!(
                "member {user_id} in department {department_id}"
            )));
        }
        let plan = self
            .allocations
            .organization_plan(&department.organization_id)?;
        let parent = self.allocations.get_department_allocation(department_id)?;
        let parent_caps = parent.as_ref().map(|a| &a.caps);
        let allocation = self
            .allocations
            .get_member_allocation(user_id, department_id)?;
        let own = allocation.as_ref().map(|a| &a.caps);
        let usage = self.real_time_usage(&member_usage_owner(department_id, user_id), Utc::now());
        let filter = OwnerFilter::Member {
            user_id: user_id.to_string(),
            department_id: department_id.to_string(),
        };

        let parent_limit =
            |resource: Resource| Limit::from_option(parent_caps.and_then(|c| c.get(resource)));

        let automation = self.allocated_automation(
            &plan,
            &filter,
            own,
            |r| to_u64(parent_limit(r)),
            &usage,
        )?;
        let workspace = Self::allocated_workspace(&plan, own, |_| 0.0, parent_limit);

        let status = MemberStatus {
            user_id: user_id.to_string(),
            department_id: department.id.clone(),
            allocation_mode: allocation.as_ref().map(|a| a.allocation_mode),
            automation,
            workspace,
            billing: AllocatedBilling {
                credits: AllocatedResource::new(
                    own.and_then(|c| c.credit_budget).map(|b| b as f64),
                    allocation.as_ref().map_or(0.0, |a| a.credit_used),
                    parent_limit(Resource::CreditBudget),
                ),
                unit: ResourceUnit::Credits,
                credits_by_category: usage.credits_by_category.clone(),
            },
        };

        debug!(department_id, user_id, "member status computed");
        Ok(status)
    }
}
