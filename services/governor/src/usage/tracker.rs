use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Months, TimeZone, Timelike, Utc};
use quota_hub_primitives::PeriodType;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::counter_store::CounterStore;
use super::error::UsageError;

/// One billing month plus a buffer against boundary drift.
pub const DEFAULT_COUNTER_TTL_SECS: u64 = 32 * 24 * 60 * 60;
pub const MAX_HISTORY_PERIODS: u32 = 366;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageMetricKind {
    WorkflowRuns,
    GatewayRequests,
    PluginExecutions,
    ApiCalls,
    Errors,
    Credits,
}

impl UsageMetricKind {
    pub const COUNTS: [UsageMetricKind; 5] = [
        UsageMetricKind::WorkflowRuns,
        UsageMetricKind::GatewayRequests,
        UsageMetricKind::PluginExecutions,
        UsageMetricKind::ApiCalls,
        UsageMetricKind::Errors,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UsageMetricKind::WorkflowRuns => "workflow_runs",
            UsageMetricKind::GatewayRequests => "gateway_requests",
            UsageMetricKind::PluginExecutions => "plugin_executions",
            UsageMetricKind::ApiCalls => "api_calls",
            UsageMetricKind::Errors => "errors",
            UsageMetricKind::Credits => "credits",
        }
    }
}

impl fmt::Display for UsageMetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UsageMetricKind {
    type Err = UsageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workflow_runs" => Ok(UsageMetricKind::WorkflowRuns),
            "gateway_requests" => Ok(UsageMetricKind::GatewayRequests),
            "plugin_executions" => Ok(UsageMetricKind::PluginExecutions),
            "api_calls" => Ok(UsageMetricKind::ApiCalls),
            "errors" => Ok(UsageMetricKind::Errors),
            "credits" => Ok(UsageMetricKind::Credits),
            other => Err(UsageError::InvalidMetric(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditCategory {
    AiInference,
    WorkflowExecution,
    GatewayRequests,
    PluginExecution,
    Storage,
    Other,
}

impl CreditCategory {
    pub const ALL: [CreditCategory; 6] = [
        CreditCategory::AiInference,
        CreditCategory::WorkflowExecution,
        CreditCategory::GatewayRequests,
        CreditCategory::PluginExecution,
        CreditCategory::Storage,
        CreditCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CreditCategory::AiInference => "ai_inference",
            CreditCategory::WorkflowExecution => "workflow_execution",
            CreditCategory::GatewayRequests => "gateway_requests",
            CreditCategory::PluginExecution => "plugin_execution",
            CreditCategory::Storage => "storage",
            CreditCategory::Other => "other",
        }
    }
}

/// Current-month counters for one owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealTimeUsage {
    pub owner_id: String,
    pub period: String,
    pub resets_at: DateTime<Utc>,
    pub workflow_runs: u64,
    pub gateway_requests: u64,
    pub plugin_executions: u64,
    pub api_calls: u64,
    pub errors: u64,
    pub credits_used: f64,
    pub credits_by_category: BTreeMap<CreditCategory, f64>,
}

impl RealTimeUsage {
    pub fn empty(owner_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            period: month_label(at),
            resets_at: next_month_start(at),
            workflow_runs: 0,
            gateway_requests: 0,
            plugin_executions: 0,
            api_calls: 0,
            errors: 0,
            credits_used: 0.0,
            credits_by_category: CreditCategory::ALL.iter().map(|c| (*c, 0.0)).collect(),
        }
    }
}

/// One history bucket. Buckets whose keys were never written or have been
/// evicted read as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub period: String,
    pub workflow_runs: u64,
    pub gateway_requests: u64,
    pub plugin_executions: u64,
    pub api_calls: u64,
    pub errors: u64,
    pub credits_used: f64,
}

impl UsageRecord {
    fn zero(period: String) -> Self {
        Self {
            period,
            workflow_runs: 0,
            gateway_requests: 0,
            plugin_executions: 0,
            api_calls: 0,
            errors: 0,
            credits_used: 0.0,
        }
    }

    fn set_count(&mut self, metric: UsageMetricKind, value: u64) {
        match metric {
            UsageMetricKind::WorkflowRuns => self.workflow_runs = value,
            UsageMetricKind::GatewayRequests => self.gateway_requests = value,
            UsageMetricKind::PluginExecutions => self.plugin_executions = value,
            UsageMetricKind::ApiCalls => self.api_calls = value,
            UsageMetricKind::Errors => self.errors = value,
            UsageMetricKind::Credits => self.credits_used = value as f64,
        }
    }
}

pub fn month_label(at: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", at.year(), at.month())
}

pub fn bucket_label(period: PeriodType, at: DateTime<Utc>) -> String {
    match period {
        PeriodType::Hourly => format!(
            "{:04}-{:02}-{:02}-{:02}",
            at.year(),
            at.month(),
            at.day(),
            at.hour()
        ),
        PeriodType::Daily => format!("{:04}-{:02}-{:02}", at.year(), at.month(), at.day()),
        PeriodType::Weekly => {
            let week = at.iso_week();
            format!("{:04}-W{:02}", week.year(), week.week())
        }
        PeriodType::Monthly => month_label(at),
    }
}

pub fn next_month_start(at: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if at.month() == 12 {
        (at.year() + 1, 1)
    } else {
        (at.year(), at.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(at)
}

fn usage_key(metric: &str, owner_id: &str, bucket: &str) -> String {
    format!("usage:{metric}:{owner_id}:{bucket}")
}

fn credit_metric(category: CreditCategory) -> String {
    format!("credits:{}", category.as_str())
}

fn step_back(period: PeriodType, at: DateTime<Utc>, steps: u32) -> DateTime<Utc> {
    match period {
        PeriodType::Hourly => at - Duration::hours(i64::from(steps)),
        PeriodType::Daily => at - Duration::days(i64::from(steps)),
        PeriodType::Weekly => at - Duration::weeks(i64::from(steps)),
        PeriodType::Monthly => at
            .checked_sub_months(Months::new(steps))
            .unwrap_or(at),
    }
}

#[derive(Clone, Copy)]
enum Increment {
    One,
    By(f64),
}

/// Records and reads time-windowed consumption counters.
///
/// Tracking is best-effort: a failing counter store is logged and never
/// surfaces to the operation being measured.
#[derive(Clone)]
pub struct UsageTracker {
    store: Arc<dyn CounterStore>,
    ttl_secs: u64,
}

impl UsageTracker {
    pub fn new(store: Arc<dyn CounterStore>, ttl_secs: u64) -> Self {
        Self { store, ttl_secs }
    }

    pub fn track_workflow_run(&self, owner_id: &str) {
        self.track_count(owner_id, UsageMetricKind::WorkflowRuns, Utc::now());
    }

    pub fn track_gateway_request(&self, owner_id: &str) {
        self.track_count(owner_id, UsageMetricKind::GatewayRequests, Utc::now());
    }

    pub fn track_plugin_execution(&self, owner_id: &str) {
        self.track_count(owner_id, UsageMetricKind::PluginExecutions, Utc::now());
    }

    pub fn track_api_call(&self, owner_id: &str) {
        self.track_count(owner_id, UsageMetricKind::ApiCalls, Utc::now());
    }

    pub fn track_error(&self, owner_id: &str) {
        self.track_count(owner_id, UsageMetricKind::Errors, Utc::now());
    }

    pub fn track_credit_usage(&self, owner_id: &str, category: CreditCategory, amount: f64) {
        self.track_credit_usage_at(owner_id, category, amount, Utc::now());
    }

    pub fn track_count(&self, owner_id: &str, metric: UsageMetricKind, at: DateTime<Utc>) {
        if metric == UsageMetricKind::Credits {
            self.track_credit_usage_at(owner_id, CreditCategory::Other, 1.0, at);
            return;
        }
        self.record(metric.as_str(), owner_id, Increment::One, at, true);
    }

    pub fn track_credit_usage_at(
        &self,
        owner_id: &str,
        category: CreditCategory,
        amount: f64,
        at: DateTime<Utc>,
    ) {
        if !amount.is_finite() || amount <= 0.0 {
            warn!(owner_id, amount, "ignoring non-positive credit usage");
            return;
        }
        self.record(
            UsageMetricKind::Credits.as_str(),
            owner_id,
            Increment::By(amount),
            at,
            true,
        );
        self.record(
            &credit_metric(category),
            owner_id,
            Increment::By(amount),
            at,
            false,
        );
    }

    fn record(
        &self,
        metric: &str,
        owner_id: &str,
        amount: Increment,
        at: DateTime<Utc>,
        with_buckets: bool,
    ) {
        let mut buckets = vec![month_label(at)];
        if with_buckets {
            buckets.extend(
                [PeriodType::Hourly, PeriodType::Daily, PeriodType::Weekly]
                    .into_iter()
                    .map(|period| bucket_label(period, at)),
            );
        }

        for bucket in buckets {
            let key = usage_key(metric, owner_id, &bucket);
            let result = match amount {
                Increment::One => self.store.increment(&key).map(|_| ()),
                Increment::By(value) => self.store.increment_by_float(&key, value).map(|_| ()),
            }
            .and_then(|_| self.store.expire(&key, self.ttl_secs).map(|_| ()));

            if let Err(err) = result {
                warn!(key = %key, error = %err, "failed to record usage counter");
            }
        }

        debug!(owner_id, metric, "recorded usage");
    }

    fn read(&self, key: &str) -> Result<f64, UsageError> {
        match self.store.get(key)? {
            Some(value) => value.parse::<f64>().map_err(|_| UsageError::NotANumber {
                key: key.to_string(),
                value,
            }),
            None => Ok(0.0),
        }
    }

    fn read_count(&self, key: &str) -> Result<u64, UsageError> {
        Ok(self.read(key)?.max(0.0) as u64)
    }

    /// Current-month value of one metric; absent counters read as zero.
    pub fn get_usage(&self, owner_id: &str, metric: UsageMetricKind) -> Result<f64, UsageError> {
        self.read(&usage_key(metric.as_str(), owner_id, &month_label(Utc::now())))
    }

    pub fn get_real_time_usage(&self, owner_id: &str) -> Result<RealTimeUsage, UsageError> {
        self.real_time_usage_at(owner_id, Utc::now())
    }

    pub fn real_time_usage_at(
        &self,
        owner_id: &str,
        at: DateTime<Utc>,
    ) -> Result<RealTimeUsage, UsageError> {
        let mut usage = RealTimeUsage::empty(owner_id, at);
        let month = usage.period.clone();
        let key = |metric: &str| usage_key(metric, owner_id, &month);

        usage.workflow_runs = self.read_count(&key(UsageMetricKind::WorkflowRuns.as_str()))?;
        usage.gateway_requests =
            self.read_count(&key(UsageMetricKind::GatewayRequests.as_str()))?;
        usage.plugin_executions =
            self.read_count(&key(UsageMetricKind::PluginExecutions.as_str()))?;
        usage.api_calls = self.read_count(&key(UsageMetricKind::ApiCalls.as_str()))?;
        usage.errors = self.read_count(&key(UsageMetricKind::Errors.as_str()))?;
        usage.credits_used = self.read(&key(UsageMetricKind::Credits.as_str()))?;

        for category in CreditCategory::ALL {
            let spent = self.read(&key(&credit_metric(category)))?;
            usage.credits_by_category.insert(category, spent);
        }

        Ok(usage)
    }

    pub fn get_usage_history(
        &self,
        owner_id: &str,
        period: PeriodType,
        periods: u32,
    ) -> Result<Vec<UsageRecord>, UsageError> {
        self.usage_history_at(owner_id, period, periods, Utc::now())
    }

    /// `periods` buckets ending at `at`, oldest first.
    pub fn usage_history_at(
        &self,
        owner_id: &str,
        period: PeriodType,
        periods: u32,
        at: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, UsageError> {
        let periods = periods.clamp(1, MAX_HISTORY_PERIODS);
        let mut history = Vec::with_capacity(periods as usize);

        for back in (0..periods).rev() {
            let bucket = bucket_label(period, step_back(period, at, back));
            let mut record = UsageRecord::zero(bucket.clone());

            for metric in UsageMetricKind::COUNTS {
                let value = self.read_count(&usage_key(metric.as_str(), owner_id, &bucket))?;
                record.set_count(metric, value);
            }
            record.credits_used =
                self.read(&usage_key(UsageMetricKind::Credits.as_str(), owner_id, &bucket))?;

            history.push(record);
        }

        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::InMemoryCounterStore;

    fn tracker() -> (UsageTracker, InMemoryCounterStore) {
        let store = InMemoryCounterStore::new();
        let tracker = UsageTracker::new(Arc::new(store.clone()), DEFAULT_COUNTER_TTL_SECS);
        (tracker, store)
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).single().unwrap()
    }

    #[test]
    fn bucket_labels_are_deterministic() {
        let moment = at(2024, 1, 1, 7);
        assert_eq!(bucket_label(PeriodType::Hourly, moment), "2024-01-01-07");
        assert_eq!(bucket_label(PeriodType::Daily, moment), "2024-01-01");
        assert_eq!(bucket_label(PeriodType::Weekly, moment), "2024-W01");
        assert_eq!(bucket_label(PeriodType::Monthly, moment), "2024-01");

        // 2021-01-03 belongs to ISO week 53 of 2020.
        assert_eq!(bucket_label(PeriodType::Weekly, at(2021, 1, 3, 0)), "2020-W53");
    }

    #[test]
    fn next_month_rolls_over_year() {
        assert_eq!(next_month_start(at(2024, 12, 31, 23)), at(2025, 1, 1, 0));
        assert_eq!(next_month_start(at(2024, 2, 10, 5)), at(2024, 3, 1, 0));
    }

    #[test]
    fn no_activity_reads_all_zero() {
        let (tracker, store) = tracker();
        let usage = tracker.get_real_time_usage("quiet-owner").unwrap();
        assert_eq!(usage.workflow_runs, 0);
        assert_eq!(usage.api_calls, 0);
        assert_eq!(usage.credits_used, 0.0);
        assert!(usage.credits_by_category.values().all(|v| *v == 0.0));
        assert_eq!(usage.credits_by_category.len(), CreditCategory::ALL.len());
        assert!(store.is_empty());
    }

    #[test]
    fn tracks_counts_and_credit_breakdown() {
        let (tracker, store) = tracker();
        tracker.track_workflow_run("owner-1");
        tracker.track_workflow_run("owner-1");
        tracker.track_api_call("owner-1");
        tracker.track_credit_usage("owner-1", CreditCategory::AiInference, 2.5);
        tracker.track_credit_usage("owner-1", CreditCategory::Storage, 1.0);

        let usage = tracker.get_real_time_usage("owner-1").unwrap();
        assert_eq!(usage.workflow_runs, 2);
        assert_eq!(usage.api_calls, 1);
        assert_eq!(usage.credits_used, 3.5);
        assert_eq!(usage.credits_by_category[&CreditCategory::AiInference], 2.5);
        assert_eq!(usage.credits_by_category[&CreditCategory::Storage], 1.0);
        assert_eq!(
            tracker
                .get_usage("owner-1", UsageMetricKind::WorkflowRuns)
                .unwrap(),
            2.0
        );

        let month_key = format!("usage:workflow_runs:owner-1:{}", month_label(Utc::now()));
        assert_eq!(store.get(&month_key).unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn history_fills_missing_buckets_with_zero() {
        let (tracker, _) = tracker();
        let now = at(2024, 3, 15, 12);
        tracker.track_count("owner-1", UsageMetricKind::GatewayRequests, now);
        tracker.track_count(
            "owner-1",
            UsageMetricKind::GatewayRequests,
            now - Duration::days(2),
        );

        let history = tracker
            .usage_history_at("owner-1", PeriodType::Daily, 4, now)
            .unwrap();
        let labels: Vec<&str> = history.iter().map(|r| r.period.as_str()).collect();
        assert_eq!(
            labels,
            vec!["2024-03-12", "2024-03-13", "2024-03-14", "2024-03-15"]
        );
        let counts: Vec<u64> = history.iter().map(|r| r.gateway_requests).collect();
        assert_eq!(counts, vec![0, 1, 0, 1]);

        let monthly = tracker
            .usage_history_at("owner-1", PeriodType::Monthly, 3, now)
            .unwrap();
        assert_eq!(monthly.last().unwrap().gateway_requests, 2);
        assert_eq!(monthly[0].period, "2024-01");
    }

    #[test]
    fn history_period_count_is_clamped() {
        let (tracker, _) = tracker();
        let history = tracker
            .usage_history_at("owner-1", PeriodType::Hourly, 0, at(2024, 1, 1, 0))
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn ignores_non_positive_credit_amounts() {
        let (tracker, store) = tracker();
        tracker.track_credit_usage("owner-1", CreditCategory::Other, 0.0);
        tracker.track_credit_usage("owner-1", CreditCategory::Other, f64::NAN);
        assert!(store.is_empty());
    }
}
