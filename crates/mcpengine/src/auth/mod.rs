//! Per-method authentication and authorization in front of dispatch.

pub mod backend;
#[cfg(feature = "http")]
pub mod challenge;
pub mod scopes;

pub use backend::{extract_bearer, AuthBackend, BearerTokenBackend, NoAuth};
#[cfg(feature = "http")]
pub use challenge::challenge_response;
pub use scopes::ScopeMapping;

pub use mcpengine_auth::{AuthContext, AuthError, IdpConfig};
