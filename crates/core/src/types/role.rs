//! Privilege levels for identities.

use serde::{Deserialize, Serialize};

/// Ordered privilege levels.
///
/// The derive order gives `User < Admin < SuperAdmin`, so hierarchy checks
/// are a single comparison (`role >= Role::Admin`) instead of scattered
/// boolean flag combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(feature = "postgres", sqlx(type_name = "role", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular storefront customer.
    User,
    /// Store management: catalog updates, order fulfillment, admin views.
    Admin,
    /// Everything an admin can do, plus identity and role management.
    SuperAdmin,
}

impl Role {
    /// Whether this role carries any administrative privilege.
    #[must_use]
    pub fn is_admin(self) -> bool {
        self >= Self::Admin
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Admin => write!(f, "admin"),
            Self::SuperAdmin => write!(f, "super_admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            "super_admin" => Ok(Self::SuperAdmin),
            _ => Err(format!("invalid role: {s}")),
        }
    }
}
