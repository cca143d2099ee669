pub mod counter_store;
pub mod error;
pub mod tracker;

pub use counter_store::{CounterStore, InMemoryCounterStore};
pub use error::UsageError;
pub use tracker::{
    CreditCategory, RealTimeUsage, UsageMetricKind, UsageRecord, UsageTracker,
    DEFAULT_COUNTER_TTL_SECS,
};
