use std::sync::Arc;

pub mod handlers;
pub mod router;
pub mod types;

pub use handlers::{Actor, ApiError, ACTOR_HEADER};
pub use router::create_router;
pub use types::*;

use crate::allocation::AllocationService;
use crate::config::GovernorConfig;
use crate::status::ResourceStatusService;
use crate::usage::UsageTracker;

pub struct ApiState {
    pub allocations: AllocationService,
    pub status: ResourceStatusService,
    pub usage: UsageTracker,
    pub config: Arc<GovernorConfig>,
}

impl ApiState {
    pub fn new(
        allocations: AllocationService,
        status: ResourceStatusService,
        usage: UsageTracker,
        config: GovernorConfig,
    ) -> Self {
        Self {
            allocations,
            status,
            usage,
            config: Arc::new(config),
        }
    }
}
