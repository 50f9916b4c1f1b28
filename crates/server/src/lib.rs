//! Berth registry server: OCI Distribution v2 surface, token endpoint,
//! JWKS publication, and the management JSON API.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod session;
pub mod state;
pub mod v2;

pub use routes::create_router;
pub use session::SessionVerifier;
pub use state::AppState;
