//! Quota governor: hierarchical resource allocation, credit budgets and
//! usage accounting for personal, organization, department and member
//! owners.

pub mod allocation;
pub mod api;
pub mod config;
pub mod plans;
pub mod status;
pub mod storage;
pub mod usage;

use std::sync::Arc;

use allocation::{AllocationService, MembershipPermissions};
use config::GovernorConfig;
use plans::PlanCatalog;
use status::ResourceStatusService;
use storage::QuotaDatabase;
use usage::{CounterStore, UsageTracker};

/// Wires the services over one database and counter store.
pub fn build_state(
    database: Arc<QuotaDatabase>,
    counters: Arc<dyn CounterStore>,
    plans: Arc<PlanCatalog>,
    config: GovernorConfig,
) -> api::ApiState {
    let permissions = Arc::new(MembershipPermissions::new(database.clone()));
    let allocations = AllocationService::new(
        database.clone(),
        database.clone(),
        permissions,
        Arc::clone(&plans),
    );
    let usage = UsageTracker::new(counters, config.usage_counter_ttl_secs);
    let status = ResourceStatusService::new(allocations.clone(), usage.clone(), plans, database);

    api::ApiState::new(allocations, status, usage, config)
}
