use std::sync::Arc;

use chrono::Utc;
use quota_hub_governor::allocation::{
    ActorContext, AllocationMode, AllocationService, ResourceCaps,
};
use quota_hub_governor::api::ApiState;
use quota_hub_governor::config::GovernorConfig;
use quota_hub_governor::plans::PlanCatalog;
use quota_hub_governor::status::ResourceStatusService;
use quota_hub_governor::storage::{
    Department, EntityKind, EntityRecord, OrgRole, Organization, QuotaDatabase, UserAccount,
};
use quota_hub_governor::usage::{CreditCategory, InMemoryCounterStore, UsageTracker};
use tempfile::TempDir;
use uuid::Uuid;

pub use quota_hub_governor;

pub const BENCH_ORGANIZATION: &str = "org-bench";
pub const BENCH_ADMIN: &str = "bench-admin";

/// An enterprise organization with `departments` departments, each holding
/// `members_per_department` members with small allocations and some live
/// entities and usage.
pub struct QuotaBenchFixture {
    pub state: Arc<ApiState>,
    pub database: Arc<QuotaDatabase>,
    pub departments: Vec<String>,
    pub members: Vec<(String, String)>,
    pub temp_dir: TempDir,
}

impl QuotaBenchFixture {
    pub fn new(departments: usize, members_per_department: usize) -> Self {
        let temp_dir = TempDir::new().expect("tempdir");
        let database =
            Arc::new(QuotaDatabase::new(temp_dir.path().to_path_buf()).expect("bench database"));
        let now = Utc::now();

        database
            .insert_organization(&Organization {
                id: BENCH_ORGANIZATION.to_string(),
                name: "Bench Org".to_string(),
                plan: "business".to_string(),
                credit_balance: 1_000.0,
                created_at: now,
            })
            .expect("insert organization");
        insert_user(&database, BENCH_ADMIN);
        database
            .add_organization_member(BENCH_ORGANIZATION, BENCH_ADMIN, OrgRole::Owner)
            .expect("admin membership");

        let config = GovernorConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..GovernorConfig::default()
        };
        let state = Arc::new(quota_hub_governor::build_state(
            Arc::clone(&database),
            Arc::new(InMemoryCounterStore::new()),
            Arc::new(PlanCatalog::default()),
            config,
        ));

        let admin = ActorContext::new(BENCH_ADMIN);
        let mut department_ids = Vec::with_capacity(departments);
        let mut members = Vec::with_capacity(departments * members_per_department);

        for d in 0..departments {
            let department_id = format!("dept-{d}");
            database
                .insert_department(&Department {
                    id: department_id.clone(),
                    organization_id: BENCH_ORGANIZATION.to_string(),
                    name: format!("Department {d}"),
                    created_at: now,
                })
                .expect("insert department");

            state
                .allocations
                .set_department_allocation(
                    &admin,
                    &department_id,
                    department_caps(members_per_department as u64),
                    AllocationMode::HardCap,
                )
                .expect("department allocation");

            for m in 0..members_per_department {
                let user_id = format!("user-{d}-{m}");
                insert_user(&database, &user_id);
                database
                    .add_organization_member(BENCH_ORGANIZATION, &user_id, OrgRole::Member)
                    .expect("org membership");
                database
                    .add_department_member(&department_id, &user_id)
                    .expect("department membership");
                state
                    .allocations
                    .set_member_allocation(
                        &admin,
                        &department_id,
                        &user_id,
                        member_caps(),
                        AllocationMode::SoftCap,
                    )
                    .expect("member allocation");

                database
                    .insert_entity(&EntityRecord {
                        id: Uuid::new_v4().to_string(),
                        kind: EntityKind::Workflow,
                        name: format!("workflow-{d}-{m}"),
                        owner_id: user_id.clone(),
                        organization_id: Some(BENCH_ORGANIZATION.to_string()),
                        department_id: Some(department_id.clone()),
                    })
                    .expect("insert workflow");
                members.push((department_id.clone(), user_id));
            }

            state.usage.track_workflow_run(&department_id);
            state
                .usage
                .track_credit_usage(&department_id, CreditCategory::WorkflowExecution, 1.0);
            department_ids.push(department_id);
        }

        Self {
            state,
            database,
            departments: department_ids,
            members,
            temp_dir,
        }
    }

    pub fn admin(&self) -> ActorContext {
        ActorContext::new(BENCH_ADMIN)
    }

    pub fn allocations(&self) -> &AllocationService {
        &self.state.allocations
    }

    pub fn status(&self) -> &ResourceStatusService {
        &self.state.status
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.state.usage
    }
}

fn department_caps(members: u64) -> ResourceCaps {
    ResourceCaps {
        max_gateways: Some(1),
        max_workflows: Some(members * 2),
        max_ram_mb: Some(members * 256),
        max_cpu_cores: Some(members as f64 * 0.25),
        credit_budget: Some(members * 100),
        ..Default::default()
    }
}

fn member_caps() -> ResourceCaps {
    ResourceCaps {
        max_workflows: Some(2),
        max_ram_mb: Some(256),
        max_cpu_cores: Some(0.25),
        credit_budget: Some(100),
        ..Default::default()
    }
}

fn insert_user(database: &QuotaDatabase, user_id: &str) {
    database
        .insert_user(&UserAccount {
            id: user_id.to_string(),
            email: format!("{user_id}@bench.test"),
            plan: "free".to_string(),
            credit_balance: 0.0,
            created_at: Utc::now(),
        })
        .expect("insert user");
}
