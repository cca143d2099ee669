use serde::{Deserialize, Deserializer, Serialize};

use quota_hub_primitives::PeriodType;

use crate::allocation::{AllocationMode, PoolViolation, ResourceCaps};
use crate::usage::{CreditCategory, UsageMetricKind};

fn non_negative_cores<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    match value {
        Some(cores) if !cores.is_finite() || cores < 0.0 => Err(serde::de::Error::custom(
            "max_cpu_cores must be a non-negative number",
        )),
        other => Ok(other),
    }
}

fn non_negative_amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || value < 0.0 {
        return Err(serde::de::Error::custom("amount must be a non-negative number"));
    }
    Ok(value)
}

/// Counts are unsigned integers, so negative or fractional values fail to
/// deserialize. `null` or an omitted field leaves the resource uncapped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetAllocationRequest {
    #[serde(default)]
    pub max_gateways: Option<u64>,
    #[serde(default)]
    pub max_plugins: Option<u64>,
    #[serde(default)]
    pub max_workflows: Option<u64>,
    #[serde(default)]
    pub max_ram_mb: Option<u64>,
    #[serde(default, deserialize_with = "non_negative_cores")]
    pub max_cpu_cores: Option<f64>,
    #[serde(default)]
    pub max_storage_mb: Option<u64>,
    #[serde(default)]
    pub credit_budget: Option<u64>,
    #[serde(default)]
    pub allocation_mode: AllocationMode,
}

impl SetAllocationRequest {
    pub fn caps(&self) -> ResourceCaps {
        ResourceCaps {
            max_gateways: self.max_gateways,
            max_plugins: self.max_plugins,
            max_workflows: self.max_workflows,
            max_ram_mb: self.max_ram_mb,
            max_cpu_cores: self.max_cpu_cores,
            max_storage_mb: self.max_storage_mb,
            credit_budget: self.credit_budget,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditCheckRequest {
    #[serde(deserialize_with = "non_negative_amount")]
    pub required: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordCreditRequest {
    #[serde(deserialize_with = "non_negative_amount")]
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordCreditResponse {
    pub recorded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveAllocationResponse {
    pub removed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetCreditResponse {
    pub rows_reset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackUsageRequest {
    pub metric: UsageMetricKind,
    #[serde(default)]
    pub category: Option<CreditCategory>,
    #[serde(default)]
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackUsageResponse {
    pub tracked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageHistoryQuery {
    pub period: PeriodType,
    #[serde(default = "default_history_periods")]
    pub periods: u32,
}

fn default_history_periods() -> u32 {
    12
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<PoolViolation>>,
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_request_rejects_bad_numbers() {
        assert!(serde_json::from_str::<SetAllocationRequest>(r#"{"max_gateways": -1}"#).is_err());
        assert!(serde_json::from_str::<SetAllocationRequest>(r#"{"max_gateways": 1.5}"#).is_err());
        assert!(
            serde_json::from_str::<SetAllocationRequest>(r#"{"max_cpu_cores": -0.5}"#).is_err()
        );
        assert!(serde_json::from_str::<SetAllocationRequest>(
            r#"{"allocation_mode": "UNLIMITED"}"#
        )
        .is_err());
    }

    #[test]
    fn allocation_request_defaults() {
        let request: SetAllocationRequest =
            serde_json::from_str(r#"{"max_cpu_cores": 0.5, "max_workflows": null}"#).unwrap();
        assert_eq!(request.max_cpu_cores, Some(0.5));
        assert_eq!(request.max_workflows, None);
        assert_eq!(request.allocation_mode, AllocationMode::SoftCap);

        let request: SetAllocationRequest =
            serde_json::from_str(r#"{"credit_budget": 1000, "allocation_mode": "HARD_CAP"}"#)
                .unwrap();
        assert_eq!(request.caps().credit_budget, Some(1000));
        assert_eq!(request.allocation_mode, AllocationMode::HardCap);
    }

    #[test]
    fn credit_requests_reject_negative_amounts() {
        assert!(serde_json::from_str::<CreditCheckRequest>(r#"{"required": -1}"#).is_err());
        assert!(serde_json::from_str::<RecordCreditRequest>(r#"{"amount": 2.5}"#).is_ok());
    }
}
