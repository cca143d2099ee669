use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a credit budget is enforced.
///
/// Only `HardCap` blocks spend. `Reserved` is accepted and stored but is
/// enforced exactly like `SoftCap`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationMode {
    #[default]
    SoftCap,
    HardCap,
    Reserved,
}

impl AllocationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationMode::SoftCap => "SOFT_CAP",
            AllocationMode::HardCap => "HARD_CAP",
            AllocationMode::Reserved => "RESERVED",
        }
    }

    pub fn blocks_overspend(&self) -> bool {
        matches!(self, AllocationMode::HardCap)
    }
}

impl fmt::Display for AllocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllocationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SOFT_CAP" => Ok(AllocationMode::SoftCap),
            "HARD_CAP" => Ok(AllocationMode::HardCap),
            "RESERVED" => Ok(AllocationMode::Reserved),
            other => Err(format!("unknown allocation mode '{other}'")),
        }
    }
}

/// A resource that can be carved out of a parent pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Gateways,
    Plugins,
    Workflows,
    RamMb,
    CpuCores,
    StorageMb,
    CreditBudget,
}

impl Resource {
    pub const DEPARTMENT: [Resource; 7] = [
        Resource::Gateways,
        Resource::Plugins,
        Resource::Workflows,
        Resource::RamMb,
        Resource::CpuCores,
        Resource::StorageMb,
        Resource::CreditBudget,
    ];

    /// Members carry no plugin cap.
    pub const MEMBER: [Resource; 6] = [
        Resource::Gateways,
        Resource::Workflows,
        Resource::RamMb,
        Resource::CpuCores,
        Resource::StorageMb,
        Resource::CreditBudget,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Gateways => "gateways",
            Resource::Plugins => "plugins",
            Resource::Workflows => "workflows",
            Resource::RamMb => "ram_mb",
            Resource::CpuCores => "cpu_cores",
            Resource::StorageMb => "storage_mb",
            Resource::CreditBudget => "credit_budget",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-resource maxima of one allocation row. `None` means no explicit cap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceCaps {
    pub max_gateways: Option<u64>,
    pub max_plugins: Option<u64>,
    pub max_workflows: Option<u64>,
    pub max_ram_mb: Option<u64>,
    pub max_cpu_cores: Option<f64>,
    pub max_storage_mb: Option<u64>,
    pub credit_budget: Option<u64>,
}

impl ResourceCaps {
    pub fn get(&self, resource: Resource) -> Option<f64> {
        match resource {
            Resource::Gateways => self.max_gateways.map(|v| v as f64),
            Resource::Plugins => self.max_plugins.map(|v| v as f64),
            Resource::Workflows => self.max_workflows.map(|v| v as f64),
            Resource::RamMb => self.max_ram_mb.map(|v| v as f64),
            Resource::CpuCores => self.max_cpu_cores,
            Resource::StorageMb => self.max_storage_mb.map(|v| v as f64),
            Resource::CreditBudget => self.credit_budget.map(|v| v as f64),
        }
    }

    pub fn without_plugins(mut self) -> Self {
        self.max_plugins = None;
        self
    }
}

/// Sum of one resource across a set of sibling allocations; rows without an
/// explicit cap contribute nothing.
pub fn sum_allocated<'a, I>(caps: I, resource: Resource) -> f64
where
    I: IntoIterator<Item = &'a ResourceCaps>,
{
    caps.into_iter().filter_map(|c| c.get(resource)).sum()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeptAllocation {
    pub id: String,
    pub department_id: String,
    #[serde(flatten)]
    pub caps: ResourceCaps,
    pub credit_used: f64,
    pub credit_reset_at: Option<DateTime<Utc>>,
    pub allocation_mode: AllocationMode,
    pub set_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberAllocation {
    pub id: String,
    pub user_id: String,
    pub department_id: String,
    #[serde(flatten)]
    pub caps: ResourceCaps,
    pub credit_used: f64,
    pub credit_reset_at: Option<DateTime<Utc>>,
    pub allocation_mode: AllocationMode,
    pub set_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a credit budget check.
///
/// `available` is `None` when no budget applies at this level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditCheck {
    pub allowed: bool,
    pub available: Option<f64>,
    pub budget: Option<u64>,
    pub used: f64,
    pub mode: Option<AllocationMode>,
}

impl CreditCheck {
    pub fn unbounded() -> Self {
        Self {
            allowed: true,
            available: None,
            budget: None,
            used: 0.0,
            mode: None,
        }
    }

    /// Decides a spend of `required` against `budget` with `used` already spent.
    pub fn evaluate(budget: u64, used: f64, mode: AllocationMode, required: f64) -> Self {
        let headroom = budget as f64 - used;
        Self {
            allowed: !mode.blocks_overspend() || headroom >= required,
            available: Some(headroom.max(0.0)),
            budget: Some(budget),
            used,
            mode: Some(mode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_cap_blocks_when_headroom_is_short() {
        let check = CreditCheck::evaluate(1000, 950.0, AllocationMode::HardCap, 60.0);
        assert!(!check.allowed);
        assert_eq!(check.available, Some(50.0));

        let check = CreditCheck::evaluate(1000, 950.0, AllocationMode::HardCap, 40.0);
        assert!(check.allowed);
        assert_eq!(check.available, Some(50.0));

        let exact = CreditCheck::evaluate(1000, 950.0, AllocationMode::HardCap, 50.0);
        assert!(exact.allowed);
    }

    #[test]
    fn soft_modes_never_block() {
        for mode in [AllocationMode::SoftCap, AllocationMode::Reserved] {
            let check = CreditCheck::evaluate(100, 400.0, mode, 1_000.0);
            assert!(check.allowed);
            assert_eq!(check.available, Some(0.0));
        }
    }

    #[test]
    fn mode_round_trips_through_text() {
        for mode in [
            AllocationMode::SoftCap,
            AllocationMode::HardCap,
            AllocationMode::Reserved,
        ] {
            assert_eq!(mode.as_str().parse::<AllocationMode>().unwrap(), mode);
        }
        assert!("hard_cap".parse::<AllocationMode>().is_err());
        assert!(serde_json::from_str::<AllocationMode>("\"UNLIMITED\"").is_err());
    }

    #[test]
    fn sum_skips_uncapped_rows() {
        let rows = vec![
            ResourceCaps {
                max_gateways: Some(2),
                ..Default::default()
            },
            ResourceCaps::default(),
            ResourceCaps {
                max_gateways: Some(3),
                max_cpu_cores: Some(0.5),
                ..Default::default()
            },
        ];
        assert_eq!(sum_allocated(&rows, Resource::Gateways), 5.0);
        assert_eq!(sum_allocated(&rows, Resource::CpuCores), 0.5);
        assert_eq!(sum_allocated(&rows, Resource::Workflows), 0.0);
    }
}
