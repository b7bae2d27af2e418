//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! # Auth
//! POST /auth/register            - Register a new identity
//! POST /auth/login               - Login (session establishment)
//! POST /auth/logout              - Logout
//!
//! # Catalog
//! GET  /items                    - Item listing
//! GET  /items/{id}               - Item detail
//! POST /items/{id}/ratings       - Rate an item (session)
//!
//! # Orders
//! POST /orders                   - Checkout (session)
//! GET  /orders                   - Caller's order history (session)
//! GET  /orders/{id}              - Order detail (owner or admin)
//! POST /orders/{id}/pay          - Settle payment (owner only)
//!
//! # Back office (admin session; mutations also need the anti-forgery token)
//! GET    /admin/csrf             - Issue an anti-forgery token
//! GET    /admin/orders           - All orders with payment detail
//! POST   /admin/orders/{id}/deliver - Mark delivered
//! PUT    /admin/items/{id}       - Create/update a catalog item
//! PUT    /admin/users/{id}/role  - Change a role (super-admin)
//! DELETE /admin/users/{id}       - Soft-delete a user (super-admin)
//! ```
//!
//! Handlers stay thin: they resolve the session, run the relevant service,
//! and shape the response. Every rule lives in `crate::services`.

pub mod admin;
pub mod auth;
pub mod catalog;
pub mod orders;

use axum::{
    Router,
    routing::{delete, get, post, put},
};

use crate::state::AppState;

/// Create the auth routes router.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
}

/// Create the catalog routes router.
pub fn item_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(catalog::index))
        .route("/{id}", get(catalog::show))
        .route("/{id}/ratings", post(catalog::rate))
}

/// Create the order routes router.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(orders::create).get(orders::index))
        .route("/{id}", get(orders::show))
        .route("/{id}/pay", post(orders::pay))
}

/// Create the back-office routes router.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/csrf", get(admin::csrf_token))
        .route("/orders", get(admin::list_orders))
        .route("/orders/{id}/deliver", post(admin::deliver_order))
        .route("/items/{id}", put(admin::upsert_item))
        .route("/users/{id}/role", put(admin::update_role))
        .route("/users/{id}", delete(admin::delete_user))
}

/// Assemble the full application router.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/auth", auth_routes())
        .nest("/items", item_routes())
        .nest("/orders", order_routes())
        .nest("/admin", admin_routes())
}
