//! HTTP middleware: session layer and session extractors.

pub mod auth;
pub mod session;

pub use auth::{MaybeSessionUser, SessionUser, clear_current_user, set_current_user};
pub use session::create_session_layer;
