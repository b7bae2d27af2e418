//! Identity domain type.

use chrono::{DateTime, Utc};

use copperleaf_core::{Email, Role, UserId};

/// An identity record (customer or staff member).
///
/// Identities are never physically deleted. Deletion anonymizes the email
/// and sets the soft-delete marker, preserving referential integrity for
/// historical orders.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Unique identity id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Email address (unique, case-normalized).
    pub email: Email,
    /// Argon2 password hash. Absent for externally-authenticated identities.
    pub password_hash: Option<String>,
    /// Privilege level.
    pub role: Role,
    /// When the identity was soft-deleted, if ever.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Who performed the soft delete.
    pub deleted_by: Option<UserId>,
    /// When the identity was created.
    pub created_at: DateTime<Utc>,
    /// When the identity was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    /// Whether this identity has been soft-deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
