//! Shared quota vocabulary for Quota Hub.
//!
//! Every snapshot the governor produces is assembled from these value types.
//! They are pure: construction normalizes the unlimited sentinel and computes
//! the utilisation percentage, nothing else.

pub mod limit;
pub mod quota;

pub use limit::{percentage, ratio_percentage, Amount, Limit};
pub use quota::{
    AllocatedResource, AllocationQuota, CountQuota, PeriodType, ResourceUnit, UsageMetric,
};
