use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: String,
    pub email: String,
    pub plan: String,
    pub credit_balance: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub plan: String,
    pub credit_balance: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Department {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentMembership {
    pub department_id: String,
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgRole {
    Owner,
    Admin,
    Member,
}

impl OrgRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgRole::Owner => "owner",
            OrgRole::Admin => "admin",
            OrgRole::Member => "member",
        }
    }
}

impl FromStr for OrgRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(OrgRole::Owner),
            "admin" => Ok(OrgRole::Admin),
            "member" => Ok(OrgRole::Member),
            other => Err(format!("unknown organization role '{other}'")),
        }
    }
}

/// Governed entity whose live count is checked against a quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Gateway,
    Plugin,
    Workflow,
}

impl EntityKind {
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Gateway => "gateways",
            EntityKind::Plugin => "plugins",
            EntityKind::Workflow => "workflows",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Which entities count toward an owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerFilter {
    /// Owned by the user outside of any organization.
    Personal { user_id: String },
    Organization { organization_id: String },
    Department { department_id: String },
    /// Owned by the user inside one department.
    Member {
        user_id: String,
        department_id: String,
    },
}

impl OwnerFilter {
    /// SQL predicate plus its positional parameters.
    pub fn predicate(&self) -> (&'static str, Vec<&str>) {
        match self {
            OwnerFilter::Personal { user_id } => {
                ("owner_id = ?1 AND organization_id IS NULL", vec![user_id.as_str()])
            }
            OwnerFilter::Organization { organization_id } => {
                ("organization_id = ?1", vec![organization_id.as_str()])
            }
            OwnerFilter::Department { department_id } => {
                ("department_id = ?1", vec![department_id.as_str()])
            }
            OwnerFilter::Member {
                user_id,
                department_id,
            } => (
                "owner_id = ?1 AND department_id = ?2",
                vec![user_id.as_str(), department_id.as_str()],
            ),
        }
    }
}

/// A gateway, plugin or workflow row as the platform writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub kind: EntityKind,
    pub name: String,
    pub owner_id: String,
    pub organization_id: Option<String>,
    pub department_id: Option<String>,
}
