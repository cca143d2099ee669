//! Persistence contracts the governor relies on.
//!
//! The platform's relational store owns these rows; [`super::QuotaDatabase`]
//! is the SQLite adapter used by the service and its tests.

use chrono::{DateTime, Utc};

use crate::allocation::{DeptAllocation, MemberAllocation};

use super::error::StorageError;
use super::records::{
    Department, DepartmentMembership, EntityKind, OrgRole, Organization, OwnerFilter, UserAccount,
};

pub trait AllocationStore: Send + Sync {
    /// Inserts or replaces caps, mode and actor keyed by department; credit
    /// accounting columns survive the update.
    fn upsert_department_allocation(
        &self,
        allocation: &DeptAllocation,
    ) -> Result<DeptAllocation, StorageError>;

    fn find_department_allocation(
        &self,
        department_id: &str,
    ) -> Result<Option<DeptAllocation>, StorageError>;

    fn delete_department_allocation(&self, department_id: &str) -> Result<bool, StorageError>;

    fn list_department_allocations(
        &self,
        organization_id: &str,
    ) -> Result<Vec<DeptAllocation>, StorageError>;

    fn upsert_member_allocation(
        &self,
        allocation: &MemberAllocation,
    ) -> Result<MemberAllocation, StorageError>;

    fn find_member_allocation(
        &self,
        user_id: &str,
        department_id: &str,
    ) -> Result<Option<MemberAllocation>, StorageError>;

    fn delete_member_allocation(
        &self,
        user_id: &str,
        department_id: &str,
    ) -> Result<bool, StorageError>;

    fn list_member_allocations(
        &self,
        department_id: &str,
    ) -> Result<Vec<MemberAllocation>, StorageError>;

    /// Atomic `credit_used += amount`. Returns false when no row exists.
    fn increment_department_credit_used(
        &self,
        department_id: &str,
        amount: f64,
    ) -> Result<bool, StorageError>;

    fn increment_member_credit_used(
        &self,
        user_id: &str,
        department_id: &str,
        amount: f64,
    ) -> Result<bool, StorageError>;

    /// Zeroes every department and member row. Returns rows touched.
    fn reset_all_credit_usage(&self, now: DateTime<Utc>) -> Result<usize, StorageError>;

    /// Zeroes rows whose last reset, or creation when never reset, falls
    /// before `period_start`. Returns rows touched.
    fn reset_credit_usage_before(
        &self,
        period_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError>;

    fn reset_organization_credit_usage(
        &self,
        organization_id: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError>;
}

pub trait DirectoryStore: Send + Sync {
    fn find_user(&self, user_id: &str) -> Result<Option<UserAccount>, StorageError>;

    fn find_organization(&self, organization_id: &str)
        -> Result<Option<Organization>, StorageError>;

    fn find_department(&self, department_id: &str) -> Result<Option<Department>, StorageError>;

    fn find_membership(
        &self,
        department_id: &str,
        user_id: &str,
    ) -> Result<Option<DepartmentMembership>, StorageError>;

    fn find_org_role(
        &self,
        organization_id: &str,
        user_id: &str,
    ) -> Result<Option<OrgRole>, StorageError>;

    fn count_entities(&self, kind: EntityKind, filter: &OwnerFilter) -> Result<u64, StorageError>;

    fn count_organization_seats(&self, organization_id: &str) -> Result<u64, StorageError>;

    fn count_departments(&self, organization_id: &str) -> Result<u64, StorageError>;
}
