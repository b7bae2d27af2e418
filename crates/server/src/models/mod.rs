//! Domain model types.
//!
//! These types represent validated domain objects. Untrusted input is parsed
//! into them at the route boundary; everything below the routes operates on
//! these types only.

pub mod catalog;
pub mod identity;
pub mod order;

pub use catalog::CatalogItem;
pub use identity::Identity;
pub use order::{Order, OrderLine, PaymentResult, ShippingAddress};

/// Session storage keys.
pub mod session_keys {
    /// Key under which the authenticated identity id is stored.
    ///
    /// Only the id is stored. Roles are never cached in the session; every
    /// privileged decision re-reads the identity record.
    pub const CURRENT_USER: &str = "current_user";
}
