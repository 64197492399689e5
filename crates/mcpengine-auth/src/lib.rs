//! MCPEngine auth — bearer-token validation against an OAuth/OpenID identity provider.

pub mod config;
pub mod context;
pub mod error;
pub mod jwks;
pub mod scopes;
pub mod token;

pub use config::{AudiencePolicy, IdpConfig};
pub use context::AuthContext;
pub use error::{AuthError, AuthResult, JwksError};
pub use jwks::{CachedJwksProvider, HttpJwksProvider, JwksProvider};
pub use scopes::{join_scopes, missing_scopes, parse_scopes};
pub use token::{validate_token, Claims, JwksTokenVerifier, TokenVerifier};
