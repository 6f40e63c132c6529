//! # Authorization
//!
//! Capability checks performed before any mutating service call. Callers
//! resolve an [`Actor`] at the boundary; the core only asks whether that
//! actor holds a capability.

use crate::UserId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A permission checked by the services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ManageDeals,
    ViewDeals,
    ManageContacts,
    ViewContacts,
    ExportData,
    ManageTasks,
    AdministerWebhooks,
    ViewAudit,
}

impl Capability {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManageDeals => "manage_deals",
            Self::ViewDeals => "view_deals",
            Self::ManageContacts => "manage_contacts",
            Self::ViewContacts => "view_contacts",
            Self::ExportData => "export_data",
            Self::ManageTasks => "manage_tasks",
            Self::AdministerWebhooks => "administer_webhooks",
            Self::ViewAudit => "view_audit",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator role with a fixed capability set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    SalesManager,
    SalesRep,
    Viewer,
}

impl Role {
    /// Capabilities granted to this role
    pub fn capabilities(&self) -> BTreeSet<Capability> {
        use Capability::*;

        let granted: &[Capability] = match self {
            Self::Admin => &[
                ManageDeals,
                ViewDeals,
                ManageContacts,
                ViewContacts,
                ExportData,
                ManageTasks,
                AdministerWebhooks,
                ViewAudit,
            ],
            Self::SalesManager => &[
                ManageDeals,
                ViewDeals,
                ManageContacts,
                ViewContacts,
                ExportData,
                ManageTasks,
                ViewAudit,
            ],
            Self::SalesRep => &[
                ManageDeals,
                ViewDeals,
                ManageContacts,
                ViewContacts,
                ManageTasks,
            ],
            Self::Viewer => &[ViewDeals, ViewContacts],
        };
        granted.iter().copied().collect()
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::SalesManager => "sales_manager",
            Self::SalesRep => "sales_rep",
            Self::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Denied capability check
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{actor} lacks capability '{capability}'")]
pub struct AuthorizationError {
    pub actor: String,
    pub capability: Capability,
}

/// The caller on whose behalf a service operation runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    /// `None` for the system actor
    pub user_id: Option<UserId>,
    pub display_name: String,
    pub role: Option<Role>,
    capabilities: BTreeSet<Capability>,
}

impl Actor {
    /// Build an operator actor from a role
    pub fn user(user_id: UserId, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: Some(user_id),
            display_name: display_name.into(),
            role: Some(role),
            capabilities: role.capabilities(),
        }
    }

    /// Actor for work the system performs on its own, such as webhook ingestion
    pub fn system() -> Self {
        Self {
            user_id: None,
            display_name: "system".to_string(),
            role: None,
            capabilities: Role::Admin.capabilities(),
        }
    }

    /// Whether the actor holds the capability
    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Fail unless the actor holds the capability
    pub fn require(&self, capability: Capability) -> Result<(), AuthorizationError> {
        if self.can(capability) {
            Ok(())
        } else {
            Err(AuthorizationError {
                actor: self.to_string(),
                capability,
            })
        }
    }

    /// Capabilities held by the actor
    pub fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.user_id {
            Some(id) => write!(f, "user {} ({})", id, self.display_name),
            None => f.write_str(&self.display_name),
        }
    }
}

#[cfg(test)]
#[path = "authz_tests.rs"]
mod tests;
