pub mod engine;
pub mod error;
pub mod models;
pub mod permissions;

pub use engine::AllocationService;
pub use error::{AllocationError, PoolViolation, ViolationKind};
pub use models::{
    AllocationMode, CreditCheck, DeptAllocation, MemberAllocation, Resource, ResourceCaps,
};
pub use permissions::{ActorContext, Capability, MembershipPermissions, PermissionChecker};
