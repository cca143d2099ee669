use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use quota_hub_primitives::Limit;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::allocation::Resource;

pub const DEFAULT_PLAN: &str = "free";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceLimits {
    pub ram_mb: Limit<u64>,
    pub cpu_cores: Limit<f64>,
    pub storage_mb: Limit<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanFeatures {
    pub custom_plugins: bool,
    pub departments: bool,
    pub sso: bool,
    pub audit_log: bool,
    pub priority_support: bool,
}

/// Ceilings granted by a subscription plan.
///
/// Plan files write unlimited as `-1`; it is translated to [`Limit::Unlimited`]
/// on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub max_gateways: Limit<u64>,
    pub max_plugins: Limit<u64>,
    pub max_workflows: Limit<u64>,
    pub monthly_workflow_runs: Limit<u64>,
    pub monthly_api_calls: Limit<u64>,
    pub monthly_credits: Limit<f64>,
    pub max_seats: Limit<u64>,
    pub max_departments: Limit<u64>,
    #[serde(default)]
    pub workspace: Option<WorkspaceLimits>,
    #[serde(default)]
    pub features: PlanFeatures,
}

impl PlanLimits {
    /// Organization-level pool a department allocation is carved from.
    ///
    /// A plan without a workspace has a zero compute pool.
    pub fn pool(&self, resource: Resource) -> Limit<f64> {
        let as_f64 = |limit: Limit<u64>| match limit {
            Limit::Finite(v) => Limit::Finite(v as f64),
            Limit::Unlimited => Limit::Unlimited,
        };

        match resource {
            Resource::Gateways => as_f64(self.max_gateways),
            Resource::Plugins => as_f64(self.max_plugins),
            Resource::Workflows => as_f64(self.max_workflows),
            Resource::RamMb => self
                .workspace
                .as_ref()
                .map_or(Limit::Finite(0.0), |w| as_f64(w.ram_mb)),
            Resource::CpuCores => self
                .workspace
                .as_ref()
                .map_or(Limit::Finite(0.0), |w| w.cpu_cores),
            Resource::StorageMb => self
                .workspace
                .as_ref()
                .map_or(Limit::Finite(0.0), |w| as_f64(w.storage_mb)),
            Resource::CreditBudget => self.monthly_credits,
        }
    }
}

/// Injected plan table keyed by plan name. Always contains the free plan.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: HashMap<String, PlanLimits>,
}

impl PlanCatalog {
    pub fn new(plans: HashMap<String, PlanLimits>) -> Result<Self> {
        if !plans.contains_key(DEFAULT_PLAN) {
            anyhow::bail!("plan catalog must define the '{DEFAULT_PLAN}' plan");
        }
        Ok(Self { plans })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("unable to read plan file {}", path.display()))?;
        let plans: HashMap<String, PlanLimits> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid plan file {}", path.display()))?;
        Self::new(plans)
    }

    /// Looks up a plan, falling back to the free plan for unknown names.
    pub fn limits(&self, plan: &str) -> &PlanLimits {
        if let Some(limits) = self.plans.get(plan) {
            return limits;
        }
        warn!(plan, "unknown plan, applying {DEFAULT_PLAN} limits");
        &self.plans[DEFAULT_PLAN]
    }

    pub fn plan_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plans.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        let mut plans = HashMap::new();

        plans.insert(
            "free".to_string(),
            PlanLimits {
                max_gateways: Limit::Finite(2),
                max_plugins: Limit::Finite(3),
                max_workflows: Limit::Finite(5),
                monthly_workflow_runs: Limit::Finite(1_000),
                monthly_api_calls: Limit::Finite(10_000),
                monthly_credits: Limit::Finite(100.0),
                max_seats: Limit::Finite(1),
                max_departments: Limit::Finite(0),
                workspace: None,
                features: PlanFeatures::default(),
            },
        );
        plans.insert(
            "starter".to_string(),
            PlanLimits {
                max_gateways: Limit::Finite(5),
                max_plugins: Limit::Finite(10),
                max_workflows: Limit::Finite(25),
                monthly_workflow_runs: Limit::Finite(10_000),
                monthly_api_calls: Limit::Finite(100_000),
                monthly_credits: Limit::Finite(1_000.0),
                max_seats: Limit::Finite(3),
                max_departments: Limit::Finite(1),
                workspace: Some(WorkspaceLimits {
                    ram_mb: Limit::Finite(2_048),
                    cpu_cores: Limit::Finite(1.0),
                    storage_mb: Limit::Finite(10_240),
                }),
                features: PlanFeatures {
                    custom_plugins: true,
                    ..PlanFeatures::default()
                },
            },
        );
        plans.insert(
            "pro".to_string(),
            PlanLimits {
                max_gateways: Limit::Finite(20),
                max_plugins: Limit::Finite(50),
                max_workflows: Limit::Finite(100),
                monthly_workflow_runs: Limit::Finite(100_000),
                monthly_api_calls: Limit::Finite(1_000_000),
                monthly_credits: Limit::Finite(10_000.0),
                max_seats: Limit::Finite(10),
                max_departments: Limit::Finite(5),
                workspace: Some(WorkspaceLimits {
                    ram_mb: Limit::Finite(8_192),
                    cpu_cores: Limit::Finite(4.0),
                    storage_mb: Limit::Finite(51_200),
                }),
                features: PlanFeatures {
                    custom_plugins: true,
                    departments: true,
                    audit_log: true,
                    ..PlanFeatures::default()
                },
            },
        );
        plans.insert(
            "business".to_string(),
            PlanLimits {
                max_gateways: Limit::Finite(50),
                max_plugins: Limit::Finite(200),
                max_workflows: Limit::Finite(500),
                monthly_workflow_runs: Limit::Finite(1_000_000),
                monthly_api_calls: Limit::Unlimited,
                monthly_credits: Limit::Finite(50_000.0),
                max_seats: Limit::Finite(50),
                max_departments: Limit::Finite(20),
                workspace: Some(WorkspaceLimits {
                    ram_mb: Limit::Finite(32_768),
                    cpu_cores: Limit::Finite(16.0),
                    storage_mb: Limit::Finite(204_800),
                }),
                features: PlanFeatures {
                    custom_plugins: true,
                    departments: true,
                    sso: true,
                    audit_log: true,
                    priority_support: false,
                },
            },
        );
        plans.insert(
            "enterprise".to_string(),
            PlanLimits {
                max_gateways: Limit::Unlimited,
                max_plugins: Limit::Unlimited,
                max_workflows: Limit::Unlimited,
                monthly_workflow_runs: Limit::Unlimited,
                monthly_api_calls: Limit::Unlimited,
                monthly_credits: Limit::Unlimited,
                max_seats: Limit::Unlimited,
                max_departments: Limit::Unlimited,
                workspace: Some(WorkspaceLimits {
                    ram_mb: Limit::Unlimited,
                    cpu_cores: Limit::Unlimited,
                    storage_mb: Limit::Unlimited,
                }),
                features: PlanFeatures {
                    custom_plugins: true,
                    departments: true,
                    sso: true,
                    audit_log: true,
                    priority_support: true,
                },
            },
        );

        Self { plans }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PLAN_FILE: &str = r#"{
        "free": {
            "max_gateways": 1, "max_plugins": 1, "max_workflows": 2,
            "monthly_workflow_runs": 100, "monthly_api_calls": -1,
            "monthly_credits": 10, "max_seats": 1, "max_departments": 0
        },
        "team": {
            "max_gateways": -1, "max_plugins": 5, "max_workflows": 10,
            "monthly_workflow_runs": 1000, "monthly_api_calls": 5000,
            "monthly_credits": 250.5, "max_seats": 5, "max_departments": 2,
            "workspace": { "ram_mb": 1024, "cpu_cores": 0.5, "storage_mb": -1 },
            "features": { "departments": true }
        }
    }"#;

    #[test]
    fn loads_plan_file_with_sentinels() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PLAN_FILE.as_bytes()).unwrap();

        let catalog = PlanCatalog::from_file(file.path()).unwrap();
        let team = catalog.limits("team");
        assert!(team.max_gateways.is_unlimited());
        assert_eq!(team.monthly_credits, Limit::Finite(250.5));
        assert!(team.features.departments);
        assert!(!team.features.sso);

        let workspace = team.workspace.as_ref().unwrap();
        assert_eq!(workspace.cpu_cores, Limit::Finite(0.5));
        assert!(workspace.storage_mb.is_unlimited());
        assert!(catalog.limits("free").monthly_api_calls.is_unlimited());
    }

    #[test]
    fn rejects_catalog_without_free_plan() {
        let mut plans = PlanCatalog::default().plans;
        plans.remove(DEFAULT_PLAN);
        assert!(PlanCatalog::new(plans).is_err());
    }

    #[test]
    fn unknown_plan_falls_back_to_free() {
        let catalog = PlanCatalog::default();
        assert_eq!(catalog.limits("platinum"), catalog.limits(DEFAULT_PLAN));
    }

    #[test]
    fn pool_without_workspace_is_zero() {
        let catalog = PlanCatalog::default();
        let free = catalog.limits("free");
        assert_eq!(free.pool(Resource::RamMb), Limit::Finite(0.0));
        assert_eq!(free.pool(Resource::Gateways), Limit::Finite(2.0));
        assert!(catalog
            .limits("enterprise")
            .pool(Resource::CreditBudget)
            .is_unlimited());
    }
}
