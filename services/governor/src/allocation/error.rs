use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::StorageError;

use super::models::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Siblings plus the request would exceed the parent pool.
    ExceedsPool,
    /// The request is smaller than what this allocation already handed to its
    /// own children.
    BelowChildAllocations,
}

/// One resource that failed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolViolation {
    pub resource: Resource,
    pub kind: ViolationKind,
    pub requested: f64,
    pub allocated: f64,
    pub limit: f64,
    pub message: String,
}

impl PoolViolation {
    pub fn exceeds_pool(resource: Resource, requested: f64, siblings: f64, pool: f64) -> Self {
        let remaining = (pool - siblings).max(0.0);
        Self {
            resource,
            kind: ViolationKind::ExceedsPool,
            requested,
            allocated: siblings,
            limit: pool,
            message: format!(
                "{resource}: requested {requested} but only {remaining} of {pool} remains \
                 ({siblings} already allocated)"
            ),
        }
    }

    pub fn below_children(resource: Resource, requested: f64, children: f64) -> Self {
        Self {
            resource,
            kind: ViolationKind::BelowChildAllocations,
            requested,
            allocated: children,
            limit: requested,
            message: format!(
                "{resource}: requested {requested} is below the {children} already allocated to members"
            ),
        }
    }
}

fn summarize(violations: &[PoolViolation]) -> String {
    violations
        .iter()
        .map(|v| v.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("allocation exceeds available pool: {}", summarize(.0))]
    PoolExceeded(Vec<PoolViolation>),
    #[error("{0} not found")]
    NotFound(String),
    #[error("user {actor} is not allowed to {action}")]
    Forbidden { actor: String, action: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl AllocationError {
    pub fn violations(&self) -> &[PoolViolation] {
        match self {
            AllocationError::PoolExceeded(violations) => violations,
            _ => &[],
        }
    }
}
