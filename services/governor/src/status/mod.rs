pub mod aggregator;
pub mod models;

pub use aggregator::{member_usage_owner, ResourceStatusService, StatusError};
pub use models::{
    AllocatedAutomation, AllocatedBilling, AllocatedWorkspace, AutomationPool, BillingPool,
    DepartmentStatus, MemberStatus, OrganizationStatus, PersonalStatus, PoolShare, Subscription,
    WorkspacePool,
};
