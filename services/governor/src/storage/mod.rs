pub mod contracts;
pub mod database;
pub mod error;
pub mod records;
pub mod schema;

pub use contracts::{AllocationStore, DirectoryStore};
pub use database::QuotaDatabase;
pub use error::StorageError;
pub use records::{
    Department, DepartmentMembership, EntityKind, EntityRecord, OrgRole, Organization,
    OwnerFilter, UserAccount,
};

pub const QUOTA_DB_FILENAME: &str = "governor.db";
