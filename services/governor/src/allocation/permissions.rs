use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::storage::{DirectoryStore, OrgRole};

/// Authenticated caller as handed over by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub user_id: String,
}

impl ActorContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// Write allocations and reset credits inside an organization.
    ManageOrganization { organization_id: String },
    /// Read allocations and status inside an organization.
    ViewOrganization { organization_id: String },
}

impl Capability {
    pub fn organization_id(&self) -> &str {
        match self {
            Capability::ManageOrganization { organization_id }
            | Capability::ViewOrganization { organization_id } => organization_id,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::ManageOrganization { organization_id } => {
                write!(f, "manage organization {organization_id}")
            }
            Capability::ViewOrganization { organization_id } => {
                write!(f, "view organization {organization_id}")
            }
        }
    }
}

pub trait PermissionChecker: Send + Sync {
    fn can_do(&self, ctx: &ActorContext, capability: &Capability) -> bool;
}

/// Grants capabilities from organization roles: owners and admins manage,
/// every member views.
pub struct MembershipPermissions {
    directory: Arc<dyn DirectoryStore>,
}

impl MembershipPermissions {
    pub fn new(directory: Arc<dyn DirectoryStore>) -> Self {
        Self { directory }
    }
}

impl PermissionChecker for MembershipPermissions {
    fn can_do(&self, ctx: &ActorContext, capability: &Capability) -> bool {
        let role = match self
            .directory
            .find_org_role(capability.organization_id(), &ctx.user_id)
        {
            Ok(role) => role,
            Err(err) => {
                error!(
                    user_id = %ctx.user_id,
                    capability = %capability,
                    error = %err,
                    "permission lookup failed, denying"
                );
                return false;
            }
        };

        let granted = match (capability, role) {
            (_, None) => false,
            (Capability::ManageOrganization { .. }, Some(role)) => {
                matches!(role, OrgRole::Owner | OrgRole::Admin)
            }
            (Capability::ViewOrganization { .. }, Some(_)) => true,
        };

        debug!(user_id = %ctx.user_id, capability = %capability, granted, "permission check");
        granted
    }
}
