use std::collections::BTreeMap;

use quota_hub_primitives::{
    AllocatedResource, AllocationQuota, CountQuota, Limit, ResourceUnit, UsageMetric,
};
use serde::{Deserialize, Serialize};

use crate::allocation::{AllocationMode, Resource};
use crate::plans::PlanFeatures;
use crate::usage::CreditCategory;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationPool {
    pub gateways: CountQuota,
    pub plugins: CountQuota,
    pub workflows: CountQuota,
    pub workflow_runs: UsageMetric,
    pub api_calls: UsageMetric,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspacePool {
    pub ram_mb: AllocationQuota,
    pub cpu_cores: AllocationQuota<f64>,
    pub storage_mb: AllocationQuota,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub plan: String,
    pub seats: Option<CountQuota>,
    pub departments: Option<CountQuota>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingPool {
    pub credit_balance: f64,
    pub monthly_credits: UsageMetric<f64>,
    pub credits_by_category: BTreeMap<CreditCategory, f64>,
    pub subscription: Subscription,
    pub features: PlanFeatures,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalStatus {
    pub user_id: String,
    pub automation: AutomationPool,
    pub workspace: Option<WorkspacePool>,
    pub billing: BillingPool,
}

/// How much of one organization pool has been carved into departments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolShare {
    pub resource: Resource,
    pub pool: Option<f64>,
    pub allocated: f64,
    /// `None` when the pool is unlimited.
    pub unallocated: Option<f64>,
}

impl PoolShare {
    pub fn new(resource: Resource, pool: Limit<f64>, allocated: f64) -> Self {
        Self {
            resource,
            pool: pool.finite(),
            allocated,
            unallocated: pool.finite().map(|p| (p - allocated).max(0.0)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationStatus {
    pub organization_id: String,
    pub automation: AutomationPool,
    pub workspace: Option<WorkspacePool>,
    pub billing: BillingPool,
    pub allocations: Vec<PoolShare>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatedAutomation {
    pub gateways: AllocatedResource,
    pub plugins: AllocatedResource,
    pub workflows: AllocatedResource,
    pub workflow_runs: UsageMetric,
    pub api_calls: UsageMetric,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatedWorkspace {
    pub ram_mb: AllocatedResource,
    pub cpu_cores: AllocatedResource<f64>,
    pub storage_mb: AllocatedResource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatedBilling {
    pub credits: AllocatedResource<f64>,
    pub unit: ResourceUnit,
    pub credits_by_category: BTreeMap<CreditCategory, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentStatus {
    pub department_id: String,
    pub organization_id: String,
    pub allocation_mode: Option<AllocationMode>,
    pub automation: AllocatedAutomation,
    pub workspace: Option<AllocatedWorkspace>,
    pub billing: AllocatedBilling,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberStatus {
    pub user_id: String,
    pub department_id: String,
    pub allocation_mode: Option<AllocationMode>,
    pub automation: AllocatedAutomation,
    pub workspace: Option<AllocatedWorkspace>,
    pub billing: AllocatedBilling,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_share_clamps_and_nulls() {
        let share = PoolShare::new(Resource::Gateways, Limit::Finite(5.0), 7.0);
        assert_eq!(share.unallocated, Some(0.0));

        let share = PoolShare::new(Resource::RamMb, Limit::Finite(4096.0), 1024.0);
        assert_eq!(share.unallocated, Some(3072.0));

        let share = PoolShare::new(Resource::Workflows, Limit::Unlimited, 40.0);
        assert_eq!(share.pool, None);
        assert_eq!(share.unallocated, None);
    }
}
