use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::ProfileKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Mentor,
    Manager,
    Admin,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl Role {
    pub const ALL: [Role; 4] = [Role::User, Role::Mentor, Role::Manager, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Mentor => "MENTOR",
            Role::Manager => "MANAGER",
            Role::Admin => "ADMIN",
        }
    }

    /// The profile variant an account with this role owns. ADMIN has none.
    pub fn profile_kind(&self) -> Option<ProfileKind> {
        match self {
            Role::User => Some(ProfileKind::User),
            Role::Mentor => Some(ProfileKind::Mentor),
            Role::Manager => Some(ProfileKind::Manager),
            Role::Admin => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USER" => Ok(Role::User),
            "MENTOR" => Ok(Role::Mentor),
            "MANAGER" => Ok(Role::Manager),
            "ADMIN" => Ok(Role::Admin),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthorizationFlags {
    pub is_staff: bool,
    pub is_superuser: bool,
    pub role: Role,
}

/// Derives the staff/superuser flags from the role.
///
/// A superuser flag seen on a non-admin account means the account was elevated
/// outside the role model; the role follows the privilege and becomes ADMIN.
pub fn resolve_authorization_flags(role: Role, current_is_superuser: bool) -> AuthorizationFlags {
    match role {
        Role::Admin => AuthorizationFlags { is_staff: true, is_superuser: true, role: Role::Admin },
        _ if current_is_superuser => AuthorizationFlags { is_staff: true, is_superuser: true, role: Role::Admin },
        Role::Manager => AuthorizationFlags { is_staff: true, is_superuser: false, role: Role::Manager },
        Role::User | Role::Mentor => AuthorizationFlags { is_staff: false, is_superuser: false, role },
    }
}
