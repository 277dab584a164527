//! HTTP surface: bearer authentication, the tenancy guard, JSON handlers.

pub mod auth;
mod endpoints;
pub mod error;
pub mod guard;
pub mod router;
pub mod types;

use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::cache::ViewCache;
use crate::tenant::TenantManager;

pub use error::ApiError;
pub use router::build_router;

/// Shared state for every route and middleware.
#[derive(Clone)]
pub struct AppState {
    pub tenants: Arc<TenantManager>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub views: ViewCache,
}
