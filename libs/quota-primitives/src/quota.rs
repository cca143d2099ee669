use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::limit::{percentage, ratio_percentage, Amount, Limit};

/// Live entity count against a ceiling (gateways, plugins, workflows, seats).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountQuota {
    pub used: u64,
    pub limit: Option<u64>,
    pub percentage: u8,
    pub is_unlimited: bool,
}

impl CountQuota {
    pub fn new(used: u64, limit: Limit<u64>) -> Self {
        Self {
            used,
            limit: limit.finite(),
            percentage: percentage(used, limit),
            is_unlimited: limit.is_unlimited(),
        }
    }

    pub fn remaining(&self) -> Option<u64> {
        self.limit.map(|limit| limit.saturating_sub(self.used))
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.limit, Some(limit) if self.used >= limit)
    }
}

/// Accounting window of a usage counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    #[serde(alias = "HOURLY")]
    Hourly,
    #[serde(alias = "DAILY")]
    Daily,
    #[serde(alias = "WEEKLY")]
    Weekly,
    #[serde(alias = "MONTHLY")]
    Monthly,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Hourly => "hourly",
            PeriodType::Daily => "daily",
            PeriodType::Weekly => "weekly",
            PeriodType::Monthly => "monthly",
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hourly" => Ok(PeriodType::Hourly),
            "daily" => Ok(PeriodType::Daily),
            "weekly" => Ok(PeriodType::Weekly),
            "monthly" => Ok(PeriodType::Monthly),
            other => Err(format!("unknown period type '{other}'")),
        }
    }
}

/// Time-windowed consumption (workflow runs, API calls, credits).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageMetric<T = u64> {
    pub current: T,
    pub limit: Option<T>,
    pub period: PeriodType,
    pub resets_at: Option<DateTime<Utc>>,
    pub percentage: u8,
    pub is_unlimited: bool,
}

impl<T: Amount> UsageMetric<T> {
    pub fn new(
        current: T,
        limit: Limit<T>,
        period: PeriodType,
        resets_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            current,
            limit: limit.finite(),
            period,
            resets_at,
            percentage: percentage(current, limit),
            is_unlimited: limit.is_unlimited(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceUnit {
    #[serde(rename = "MB")]
    Megabytes,
    #[serde(rename = "cores")]
    Cores,
    #[serde(rename = "credits")]
    Credits,
}

/// Share of a compute pool that has been handed out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationQuota<T = u64> {
    pub allocated: T,
    pub limit: Option<T>,
    pub unit: ResourceUnit,
    pub percentage: u8,
    pub is_unlimited: bool,
}

impl<T: Amount> AllocationQuota<T> {
    pub fn new(allocated: T, limit: Limit<T>, unit: ResourceUnit) -> Self {
        Self {
            allocated,
            limit: limit.finite(),
            unit,
            percentage: percentage(allocated, limit),
            is_unlimited: limit.is_unlimited(),
        }
    }
}

/// A child's allocation seen from inside the child: what it was given, what
/// it uses, and what its parent could have given.
///
/// Usage is measured against the allocation when one exists, otherwise
/// against the parent's ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatedResource<T = u64> {
    pub allocated: Option<T>,
    pub used: T,
    pub parent_limit: Option<T>,
    pub percentage: u8,
    pub is_unlimited: bool,
}

impl<T: Amount> AllocatedResource<T> {
    pub fn new(allocated: Option<T>, used: T, parent_limit: Limit<T>) -> Self {
        let effective = allocated.or(parent_limit.finite());
        let percentage = match effective {
            Some(limit) => ratio_percentage(used.as_f64(), limit.as_f64()),
            None => 0,
        };

        Self {
            allocated,
            used,
            parent_limit: parent_limit.finite(),
            percentage,
            is_unlimited: effective.is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_quota_normalizes_unlimited() {
        let quota = CountQuota::new(42, Limit::Unlimited);
        assert!(quota.is_unlimited);
        assert_eq!(quota.limit, None);
        assert_eq!(quota.percentage, 0);
        assert_eq!(quota.remaining(), None);
        assert!(!quota.is_exhausted());
    }

    #[test]
    fn count_quota_finite() {
        let quota = CountQuota::new(3, Limit::Finite(4));
        assert!(!quota.is_unlimited);
        assert_eq!(quota.percentage, 75);
        assert_eq!(quota.remaining(), Some(1));

        let full = CountQuota::new(6, Limit::Finite(5));
        assert_eq!(full.percentage, 100);
        assert!(full.is_exhausted());
    }

    #[test]
    fn usage_metric_carries_period() {
        let metric = UsageMetric::new(250u64, Limit::Finite(1000), PeriodType::Monthly, None);
        assert_eq!(metric.percentage, 25);
        assert_eq!(metric.period, PeriodType::Monthly);

        let credits = UsageMetric::new(12.5f64, Limit::Unlimited, PeriodType::Monthly, None);
        assert!(credits.is_unlimited);
        assert_eq!(credits.percentage, 0);
    }

    #[test]
    fn allocated_resource_prefers_own_allocation() {
        let resource = AllocatedResource::new(Some(4u64), 1, Limit::Finite(10));
        assert_eq!(resource.percentage, 25);
        assert!(!resource.is_unlimited);

        let fallback = AllocatedResource::new(None, 5u64, Limit::Finite(10));
        assert_eq!(fallback.percentage, 50);

        let open = AllocatedResource::new(None, 5u64, Limit::Unlimited);
        assert!(open.is_unlimited);
        assert_eq!(open.percentage, 0);
    }

    #[test]
    fn period_type_parses_case_insensitively() {
        assert_eq!("WEEKLY".parse::<PeriodType>().unwrap(), PeriodType::Weekly);
        assert_eq!("daily".parse::<PeriodType>().unwrap(), PeriodType::Daily);
        assert!("yearly".parse::<PeriodType>().is_err());

        let parsed: PeriodType = serde_json::from_str("\"HOURLY\"").unwrap();
        assert_eq!(parsed, PeriodType::Hourly);
    }

    #[test]
    fn allocation_quota_serializes_unit() {
        let quota = AllocationQuota::new(512u64, Limit::Finite(2048), ResourceUnit::Megabytes);
        let json = serde_json::to_value(&quota).unwrap();
        assert_eq!(json["unit"], "MB");
        assert_eq!(json["percentage"], 25);
    }
}
