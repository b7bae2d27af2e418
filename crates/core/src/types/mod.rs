//! Shared newtype wrappers and enums.

pub mod email;
pub mod id;
pub mod money;
pub mod role;
pub mod status;

pub use email::{Email, EmailError};
pub use id::{IdError, ItemId, OrderId, UserId, is_well_formed_id};
pub use money::round2;
pub use role::Role;
pub use status::{OrderStatus, PaymentMethod, PaymentStatus};
